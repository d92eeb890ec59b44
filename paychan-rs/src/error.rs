use crate::{rpc::RpcError, store::StoreError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid fields: {0}")]
    InvalidFields(String),
    #[error("not accepted: {0}")]
    NotAccepted(String),
    #[error("transfer {0} has already been rejected")]
    AlreadyRejected(Uuid),
    #[error("transfer {0} has already been fulfilled")]
    AlreadyFulfilled(Uuid),
    #[error("transfer {0} already exists with different contents")]
    Duplicate(Uuid),
    #[error("plugin is not connected")]
    NotConnected,
    #[error("a request handler is already registered")]
    RequestHandlerAlreadyRegistered,
    #[error("transfer {0} has not yet been fulfilled")]
    MissingFulfillment(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("server error: {0}")]
    Server(#[from] hyper::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable name carried in the wire error envelope so the peer can
    /// distinguish failure kinds without parsing messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::InvalidFields(..) => "InvalidFieldsError",
            Self::NotAccepted(..) => "NotAcceptedError",
            Self::AlreadyRejected(..) => "AlreadyRejectedError",
            Self::AlreadyFulfilled(..) => "AlreadyFulfilledError",
            Self::Duplicate(..) => "DuplicateIdError",
            Self::NotConnected => "NotConnectedError",
            Self::RequestHandlerAlreadyRegistered => "RequestHandlerAlreadyRegisteredError",
            Self::MissingFulfillment(..) => "MissingFulfillmentError",
            Self::Store(..) => "StoreError",
            Self::Rpc(RpcError::Unauthorized) => "UnauthorizedError",
            Self::Rpc(RpcError::UnknownMethod(..)) => "UnknownMethodError",
            Self::Rpc(..) => "RpcError",
            Self::Server(..) | Self::Internal(..) => "InternalError",
        }
    }
}

use axum::extract::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = match self {
            Self::Rpc(RpcError::Unauthorized) => StatusCode::UNAUTHORIZED,
            Self::Rpc(RpcError::UnknownMethod(..)) => StatusCode::NOT_FOUND,
            Self::Store(..) | Self::Server(..) | Self::Internal(..) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };
        let body = crate::rpc::RpcResponse::from_error(&self);
        (code, Json(body)).into_response()
    }
}
