mod message;
mod transfer;

pub use message::Message;
pub use transfer::{RejectionReason, Transfer, TransferRecord, TransferState};
