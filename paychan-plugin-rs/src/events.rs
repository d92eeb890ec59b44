use paychan_rs::types::{Message, Transfer};
use serde_json::Value;
use tokio::sync::broadcast;

/// Lifecycle notifications. Every variant is emitted strictly after the
/// corresponding state change has committed to the transfer log.
#[derive(Clone, Debug)]
pub enum PluginEvent {
    Connect,
    Disconnect,
    OutgoingPrepare(Transfer),
    IncomingPrepare(Transfer),
    OutgoingFulfill { transfer: Transfer, fulfillment: String },
    IncomingFulfill { transfer: Transfer, fulfillment: String },
    OutgoingReject { transfer: Transfer, reason: Value },
    IncomingReject { transfer: Transfer, reason: Value },
    OutgoingCancel { transfer: Transfer, reason: Value },
    IncomingCancel { transfer: Transfer, reason: Value },
    OutgoingMessage(Message),
    IncomingMessage(Message),
    OutgoingRequest(Message),
    IncomingRequest(Message),
    OutgoingResponse(Message),
    IncomingResponse(Message),
}

impl PluginEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::OutgoingPrepare(..) => "outgoing_prepare",
            Self::IncomingPrepare(..) => "incoming_prepare",
            Self::OutgoingFulfill { .. } => "outgoing_fulfill",
            Self::IncomingFulfill { .. } => "incoming_fulfill",
            Self::OutgoingReject { .. } => "outgoing_reject",
            Self::IncomingReject { .. } => "incoming_reject",
            Self::OutgoingCancel { .. } => "outgoing_cancel",
            Self::IncomingCancel { .. } => "incoming_cancel",
            Self::OutgoingMessage(..) => "outgoing_message",
            Self::IncomingMessage(..) => "incoming_message",
            Self::OutgoingRequest(..) => "outgoing_request",
            Self::IncomingRequest(..) => "incoming_request",
            Self::OutgoingResponse(..) => "outgoing_response",
            Self::IncomingResponse(..) => "incoming_response",
        }
    }
}

/// Broadcast fan-out to subscribers. A slow or panicking subscriber only
/// affects its own receiver; the engine never observes delivery failures.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PluginEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: PluginEvent) {
        tracing::debug!(event = event.name(), "emitting event");
        // no subscribers is fine
        let _ = self.tx.send(event);
    }
}
