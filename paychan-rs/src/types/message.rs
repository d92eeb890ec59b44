use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One-way datagram between the two peers on a channel. Also the carrier
/// for the request/response messaging layered on `send_request`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub ledger: String,
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
