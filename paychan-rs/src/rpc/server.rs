use crate::{
    error::Error,
    rpc::{Method, RpcError, RpcRequest, RpcResponse},
};
use async_trait::async_trait;
use axum::{
    extract::{Json, State},
    http::HeaderMap,
    routing::{post, IntoMakeService},
    Router,
};
use hyper::server::conn::AddrIncoming;
use serde_json::Value;
use std::net::{Ipv4Addr, SocketAddr};
use tokio::task::JoinHandle;

/// Type alias for the configured axum server
pub type RpcHttpServer = axum::Server<AddrIncoming, IntoMakeService<Router>>;

/// Dispatch target for authenticated inbound calls.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// Bearer token a request must present to be dispatched.
    fn auth_token(&self) -> String;

    fn prefix(&self) -> String;

    async fn handle(&self, method: Method, args: Vec<Value>) -> Result<Value, Error>;
}

async fn handle_rpc<H: RpcHandler>(
    State(handler): State<H>,
    headers: HeaderMap,
    Json(request): Json<RpcRequest>,
) -> Result<Json<RpcResponse>, Error> {
    authorize(&headers, &handler.auth_token())?;

    let method: Method = request.method.parse().map_err(Error::Rpc)?;
    if request.prefix != handler.prefix() {
        return Err(Error::InvalidFields(format!(
            "request prefix `{}` does not match `{}`",
            request.prefix,
            handler.prefix()
        )))
    }
    tracing::trace!(%method, "dispatching rpc request");
    let result = handler.handle(method, request.args).await?;
    Ok(Json(RpcResponse::Ok { result }))
}

fn authorize(headers: &HeaderMap, token: &str) -> Result<(), Error> {
    let presented = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    match presented {
        Some(presented) if presented == token => Ok(()),
        _ => Err(Error::Rpc(RpcError::Unauthorized)),
    }
}

pub struct RpcServer<H: RpcHandler> {
    host: Ipv4Addr,
    port: u16,
    handler: H,
}

impl<H: RpcHandler + Clone + Send + Sync + 'static> RpcServer<H> {
    pub fn new(host: Ipv4Addr, port: u16, handler: H) -> Self {
        Self { host, port, handler }
    }

    /// Configures and returns the axum server
    pub fn serve(&self) -> RpcHttpServer {
        let router =
            Router::new().route("/rpc", post(handle_rpc::<H>)).with_state(self.handler.clone());
        let addr = SocketAddr::from((self.host, self.port));
        axum::Server::bind(&addr).serve(router.into_make_service())
    }

    /// Spawns the server on a new task returning the handle for it
    pub fn spawn(&self) -> JoinHandle<Result<(), Error>> {
        let server = self.serve();
        let address = server.local_addr();
        tokio::spawn(async move {
            tracing::info!("listening at {address}...");
            let result = server.await;
            if let Err(ref err) = result {
                tracing::error!(%err, "error while listening for incoming")
            }
            result.map_err(Error::Server)
        })
    }
}
