mod client;
mod server;

pub use client::RpcClient;
pub use server::{RpcHandler, RpcServer};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, str::FromStr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("peer returned {name}: {message}")]
    Peer { name: String, message: String },
    #[error("no rpc endpoint accepted the call")]
    AllEndpointsFailed,
    #[error("rpc request is not authorized")]
    Unauthorized,
    #[error("unknown rpc method `{0}`")]
    UnknownMethod(String),
    #[error("rpc response was not understood: {0}")]
    UnexpectedResponse(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    SendTransfer,
    SendMessage,
    SendRequest,
    FulfillCondition,
    RejectIncomingTransfer,
    ExpireTransfer,
    GetLimit,
    GetBalance,
    GetInfo,
    GetFulfillment,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendTransfer => "send_transfer",
            Self::SendMessage => "send_message",
            Self::SendRequest => "send_request",
            Self::FulfillCondition => "fulfill_condition",
            Self::RejectIncomingTransfer => "reject_incoming_transfer",
            Self::ExpireTransfer => "expire_transfer",
            Self::GetLimit => "get_limit",
            Self::GetBalance => "get_balance",
            Self::GetInfo => "get_info",
            Self::GetFulfillment => "get_fulfillment",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "send_transfer" => Ok(Self::SendTransfer),
            "send_message" => Ok(Self::SendMessage),
            "send_request" => Ok(Self::SendRequest),
            "fulfill_condition" => Ok(Self::FulfillCondition),
            "reject_incoming_transfer" => Ok(Self::RejectIncomingTransfer),
            "expire_transfer" => Ok(Self::ExpireTransfer),
            "get_limit" => Ok(Self::GetLimit),
            "get_balance" => Ok(Self::GetBalance),
            "get_info" => Ok(Self::GetInfo),
            "get_fulfillment" => Ok(Self::GetFulfillment),
            other => Err(RpcError::UnknownMethod(other.to_string())),
        }
    }
}

/// Wire request frame. The method travels as a plain string so an unknown
/// name can be answered with a method error instead of a parse failure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub prefix: String,
    pub args: Vec<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub name: String,
    pub message: String,
}

/// Wire response frame: exactly one of `result` or `error`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcResponse {
    Ok { result: Value },
    Err { error: RpcErrorBody },
}

impl RpcResponse {
    pub fn from_error(err: &crate::Error) -> Self {
        Self::Err {
            error: RpcErrorBody { name: err.kind_name().to_string(), message: err.to_string() },
        }
    }
}
