use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A conditional promise to pay `amount`, released by a 32-byte preimage
/// whose SHA-256 matches `execution_condition` before `expires_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transfer {
    pub id: Uuid,
    pub amount: String,
    pub ledger: String,
    pub from: String,
    pub to: String,
    pub execution_condition: String,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ilp: Option<String>,
    // local annotation only, stripped before the transfer goes on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_to_self: Option<Value>,
}

impl Transfer {
    /// Copy of this transfer with local-only fields removed, suitable for
    /// sending to the peer.
    pub fn for_wire(&self) -> Self {
        let mut transfer = self.clone();
        transfer.note_to_self = None;
        transfer
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Prepared,
    Fulfilled,
    Cancelled,
}

/// A transfer as recorded by the log, together with its direction and the
/// outcome of its state machine. `fulfillment` is present iff fulfilled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    #[serde(flatten)]
    pub transfer: Transfer,
    pub is_incoming: bool,
    pub state: TransferState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fulfillment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_reason: Option<Value>,
}

/// Structured reason attached to rejections, mirrored to the peer as the
/// `F00 Bad Request` family of interledger errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionReason {
    pub code: String,
    pub name: String,
    pub message: String,
    pub triggered_by: String,
    pub triggered_at: DateTime<Utc>,
}

impl RejectionReason {
    pub fn bad_request(message: impl Into<String>, triggered_by: impl Into<String>) -> Self {
        Self {
            code: "F00".to_string(),
            name: "Bad Request".to_string(),
            message: message.into(),
            triggered_by: triggered_by.into(),
            triggered_at: Utc::now(),
        }
    }
}
