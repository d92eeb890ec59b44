use crate::rpc::{Method, RpcError, RpcRequest, RpcResponse};
use serde_json::Value;
use tracing::warn;
use url::Url;

/// Authenticated request/response client for the peer endpoint(s). The URI
/// list is ordered; the first endpoint that answers wins, and transport
/// failure is only reported after every endpoint has been attempted. An
/// application error from a peer is final and is not retried elsewhere.
#[derive(Clone)]
pub struct RpcClient {
    client: reqwest::Client,
    endpoints: Vec<Url>,
    prefix: String,
    token: String,
}

impl RpcClient {
    pub fn new(endpoints: Vec<Url>, prefix: &str, token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
            prefix: prefix.to_string(),
            token: token.to_string(),
        }
    }

    pub async fn call(&self, method: Method, args: Vec<Value>) -> Result<Value, RpcError> {
        let request =
            RpcRequest { method: method.as_str().to_string(), prefix: self.prefix.clone(), args };
        for endpoint in &self.endpoints {
            match self.call_endpoint(endpoint, &request).await {
                Ok(result) => return Ok(result),
                // the peer answered; failing over would just replay the error
                Err(err @ RpcError::Peer { .. }) => return Err(err),
                Err(err) => {
                    warn!(%endpoint, %method, "rpc endpoint failed: {err}");
                }
            }
        }
        Err(RpcError::AllEndpointsFailed)
    }

    async fn call_endpoint(&self, endpoint: &Url, request: &RpcRequest) -> Result<Value, RpcError> {
        let response = self
            .client
            .post(endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.token))
            .json(request)
            .send()
            .await?;
        let response: RpcResponse = response.json().await?;
        match response {
            RpcResponse::Ok { result } => Ok(result),
            RpcResponse::Err { error } => {
                Err(RpcError::Peer { name: error.name, message: error.message })
            }
        }
    }
}
