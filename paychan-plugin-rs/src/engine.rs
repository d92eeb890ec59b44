use crate::{
    events::{EventBus, PluginEvent},
    expiry::ExpiryScheduler,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use paychan_rs::{
    fulfillment_matches_condition, negate,
    rpc::{Method, RpcClient, RpcHandler},
    types::{Message, RejectionReason, Transfer, TransferState},
    Error, LedgerFacade, PluginContext, SettlementBackend, StateFactory, TransferLog, Validator,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Custom responder for the request/response messaging layer. At most one
/// may be registered at a time.
pub type RequestHandler =
    Arc<dyn Fn(Message) -> BoxFuture<'static, Result<Message, Error>> + Send + Sync>;

pub struct PluginOptions {
    pub prefix: String,
    /// Shared bearer secret; required when no backend supplies one.
    pub token: Option<String>,
    /// Ledger info record served to callers of `get_info`.
    pub info: Value,
    /// Which side of an asymmetric pair this is. Ignored (always stateful)
    /// when a settlement backend is configured.
    pub stateful: bool,
    pub tolerate_rpc_failure: bool,
    pub rpc: RpcClient,
    pub log: TransferLog,
    pub factory: StateFactory,
    pub backend: Option<Arc<dyn SettlementBackend>>,
}

/// One side of a bilateral payment channel: the authoritative transfer log,
/// the request/response protocol with the peer, and the hooks into the
/// settlement backend that secures the running balance.
#[derive(Clone)]
pub struct Plugin(Arc<PluginInner>);

impl std::ops::Deref for Plugin {
    type Target = PluginInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub struct PluginInner {
    prefix: String,
    account: String,
    peer_account: String,
    token: String,
    info: Value,
    stateful: bool,
    tolerate_rpc_failure: bool,
    connection: Mutex<ConnectionState>,
    log: TransferLog,
    rpc: RpcClient,
    backend: Option<Arc<dyn SettlementBackend>>,
    ctx: Arc<PluginContext>,
    events: EventBus,
    validator: Validator,
    expiry: ExpiryScheduler,
    request_handler: RwLock<Option<RequestHandler>>,
}

impl Plugin {
    pub fn new(options: PluginOptions) -> Result<Self, Error> {
        let (account, peer_account, token, stateful) = match &options.backend {
            Some(backend) => (
                backend.get_account(),
                backend.get_peer_account(),
                backend.get_auth_token(),
                true,
            ),
            None => {
                let token = options.token.clone().ok_or_else(|| {
                    Error::InvalidFields(
                        "a shared token is required without a settlement backend".to_string(),
                    )
                })?;
                let (account, peer_account) = if options.stateful {
                    (format!("{}server", options.prefix), format!("{}client", options.prefix))
                } else {
                    (format!("{}client", options.prefix), format!("{}server", options.prefix))
                };
                (account, peer_account, token, options.stateful)
            }
        };
        let validator = Validator::new(&options.prefix, &account, &peer_account);
        let ctx = Arc::new(PluginContext::new(
            options.rpc.clone(),
            options.factory.clone(),
            options.log.clone(),
        ));
        Ok(Self(Arc::new(PluginInner {
            prefix: options.prefix,
            account,
            peer_account,
            token,
            info: options.info,
            stateful,
            tolerate_rpc_failure: options.tolerate_rpc_failure,
            connection: Mutex::new(ConnectionState::Disconnected),
            log: options.log,
            rpc: options.rpc,
            backend: options.backend,
            ctx,
            events: EventBus::default(),
            validator,
            expiry: ExpiryScheduler::new(),
            request_handler: RwLock::new(None),
        })))
    }

    pub async fn connect(&self) -> Result<(), Error> {
        {
            let mut connection = self.connection.lock();
            match *connection {
                ConnectionState::Connected | ConnectionState::Connecting => return Ok(()),
                ConnectionState::Disconnecting => return Err(Error::NotConnected),
                ConnectionState::Disconnected => *connection = ConnectionState::Connecting,
            }
        }
        if let Some(backend) = &self.backend {
            if let Err(err) = backend.connect(&self.ctx).await {
                *self.connection.lock() = ConnectionState::Disconnected;
                return Err(err)
            }
        }
        self.ctx.set_plugin(Some(Arc::new(self.clone())));
        *self.connection.lock() = ConnectionState::Connected;
        self.events.emit(PluginEvent::Connect);
        Ok(())
    }

    /// Refuse new public operations, drop the expiry timers, give the
    /// backend its final settlement opportunity, then report disconnected.
    pub async fn disconnect(&self) -> Result<(), Error> {
        {
            let mut connection = self.connection.lock();
            if *connection != ConnectionState::Connected {
                return Ok(())
            }
            *connection = ConnectionState::Disconnecting;
        }
        self.expiry.clear();
        if let Some(backend) = &self.backend {
            if let Err(err) = backend.disconnect(&self.ctx).await {
                warn!("backend disconnect failed: {err}");
            }
        }
        self.ctx.set_plugin(None);
        *self.connection.lock() = ConnectionState::Disconnected;
        self.events.emit(PluginEvent::Disconnect);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        *self.connection.lock() == ConnectionState::Connected
    }

    fn assert_connected(&self) -> Result<(), Error> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    pub fn get_prefix(&self) -> String {
        self.prefix.clone()
    }

    pub fn get_account(&self) -> String {
        self.account.clone()
    }

    pub fn get_peer_account(&self) -> String {
        self.peer_account.clone()
    }

    pub async fn get_info(&self) -> Result<Value, Error> {
        self.assert_connected()?;
        if let Some(backend) = &self.backend {
            return Ok(backend.get_info())
        }
        if self.stateful {
            return Ok(self.info.clone())
        }
        Ok(self.rpc.call(Method::GetInfo, vec![]).await?)
    }

    /// Signed net position. The stateless side proxies the query to the
    /// peer and flips the sign of its report.
    pub async fn get_balance(&self) -> Result<String, Error> {
        self.assert_connected()?;
        if self.stateful {
            return Ok(self.log.get_balance())
        }
        let result = self.rpc.call(Method::GetBalance, vec![]).await?;
        let balance: String = from_value(result)?;
        Ok(negate(&balance))
    }

    /// The peer's configured maximum, from their perspective, so negated
    /// into ours.
    pub async fn get_limit(&self) -> Result<String, Error> {
        self.assert_connected()?;
        let result = self.rpc.call(Method::GetLimit, vec![]).await?;
        let limit: String = from_value(result)?;
        Ok(negate(&limit))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PluginEvent> {
        self.events.subscribe()
    }

    pub fn transfer_log(&self) -> &TransferLog {
        &self.log
    }

    pub fn context(&self) -> &PluginContext {
        &self.ctx
    }

    pub fn register_request_handler(&self, handler: RequestHandler) -> Result<(), Error> {
        let mut slot = self.request_handler.write();
        if slot.is_some() {
            return Err(Error::RequestHandlerAlreadyRegistered)
        }
        *slot = Some(handler);
        Ok(())
    }

    pub fn deregister_request_handler(&self) {
        *self.request_handler.write() = None;
    }

    /// Prepare an outgoing conditional transfer and announce it to the
    /// peer. On the stateful side an RPC failure is tolerated: the peer may
    /// still have recorded the transfer, and the expiry timer is
    /// authoritative either way.
    pub async fn send_transfer(&self, transfer: Transfer) -> Result<(), Error> {
        self.assert_connected()?;
        let mut transfer = transfer;
        transfer.ledger = self.prefix.clone();
        self.validator.validate_outgoing_transfer(&transfer)?;

        let inserted = self.log.prepare(&transfer, false).await?;
        if !inserted {
            debug!(id = %transfer.id, "transfer already prepared");
            return Ok(())
        }

        let wire = to_value(&transfer.for_wire())?;
        if let Err(err) = self.rpc.call(Method::SendTransfer, vec![wire]).await {
            if self.stateful || self.tolerate_rpc_failure {
                warn!(id = %transfer.id, "peer did not acknowledge transfer, expiry will settle it: {err}");
            } else {
                self.schedule_expiry(&transfer);
                return Err(err.into())
            }
        }
        self.events.emit(PluginEvent::OutgoingPrepare(transfer.clone()));
        self.schedule_expiry(&transfer);
        Ok(())
    }

    /// Release an incoming prepared transfer with its preimage. Only the
    /// receiving side may fulfill, and only before expiry.
    pub async fn fulfill_condition(&self, id: Uuid, fulfillment: &str) -> Result<(), Error> {
        self.assert_connected()?;
        let record = self
            .log
            .get(id)
            .ok_or_else(|| Error::NotAccepted(format!("no transfer with id {id}")))?;
        if !record.is_incoming {
            return Err(Error::NotAccepted(format!(
                "transfer {id} is outgoing and can only be fulfilled by the peer"
            )))
        }
        match record.state {
            TransferState::Cancelled => return Err(Error::AlreadyRejected(id)),
            TransferState::Prepared if Utc::now() >= record.transfer.expires_at => {
                self.handle_expiry(id).await;
                return Err(Error::NotAccepted(format!("transfer {id} has expired")))
            }
            _ => {}
        }
        if !fulfillment_matches_condition(fulfillment, &record.transfer.execution_condition)? {
            return Err(Error::NotAccepted(format!(
                "fulfillment does not match the condition of transfer {id}"
            )))
        }

        let transitioned = self.log.fulfill(id, fulfillment).await?;
        self.expiry.cancel(&id);
        if transitioned {
            self.events.emit(PluginEvent::IncomingFulfill {
                transfer: record.transfer.clone(),
                fulfillment: fulfillment.to_string(),
            });
        }

        // settlement is best effort from here on
        match self.rpc.call(Method::FulfillCondition, vec![json!(id), json!(fulfillment)]).await {
            Ok(result) => {
                if let Some(backend) = &self.backend {
                    if !matches!(result, Value::Bool(true)) {
                        if let Err(err) = backend.handle_incoming_claim(&self.ctx, &result).await {
                            warn!(%id, "backend failed to handle incoming claim: {err}");
                        }
                    }
                }
            }
            Err(err) => warn!(%id, "peer did not acknowledge fulfillment: {err}"),
        }
        Ok(())
    }

    /// Refuse an incoming prepared transfer. The peer mirrors the
    /// cancellation on its side.
    pub async fn reject_incoming_transfer(
        &self,
        id: Uuid,
        reason: Option<Value>,
    ) -> Result<(), Error> {
        self.assert_connected()?;
        let record = self
            .log
            .get(id)
            .ok_or_else(|| Error::NotAccepted(format!("no transfer with id {id}")))?;
        if !record.is_incoming {
            return Err(Error::NotAccepted(format!(
                "transfer {id} is outgoing and can only be rejected by the peer"
            )))
        }
        let reason = match reason {
            Some(reason) => reason,
            None => to_value(&RejectionReason::bad_request("transfer was rejected", &self.account))?,
        };

        let transitioned = self.log.cancel(id, Some(reason.clone())).await?;
        self.expiry.cancel(&id);
        if transitioned {
            self.events.emit(PluginEvent::IncomingReject {
                transfer: record.transfer.clone(),
                reason: reason.clone(),
            });
        }
        if let Err(err) =
            self.rpc.call(Method::RejectIncomingTransfer, vec![json!(id), reason]).await
        {
            warn!(%id, "peer did not acknowledge rejection, expiry will settle it: {err}");
        }
        Ok(())
    }

    /// The fulfillment of a transfer this side already saw fulfilled.
    pub async fn get_fulfillment(&self, id: Uuid) -> Result<String, Error> {
        self.assert_connected()?;
        let record = self
            .log
            .get(id)
            .ok_or_else(|| Error::NotAccepted(format!("no transfer with id {id}")))?;
        match record.state {
            TransferState::Cancelled => Err(Error::AlreadyRejected(id)),
            TransferState::Prepared => Err(Error::MissingFulfillment(id)),
            TransferState::Fulfilled => record.fulfillment.ok_or(Error::MissingFulfillment(id)),
        }
    }

    pub async fn send_message(&self, message: Message) -> Result<(), Error> {
        self.assert_connected()?;
        let mut message = message;
        message.ledger = self.prefix.clone();
        self.validator.validate_outgoing_message(&message)?;
        self.rpc.call(Method::SendMessage, vec![to_value(&message)?]).await?;
        self.events.emit(PluginEvent::OutgoingMessage(message));
        Ok(())
    }

    /// Round-trip a request to the peer's registered request handler.
    pub async fn send_request(&self, message: Message) -> Result<Message, Error> {
        self.assert_connected()?;
        let mut message = message;
        message.ledger = self.prefix.clone();
        self.validator.validate_outgoing_message(&message)?;
        self.events.emit(PluginEvent::OutgoingRequest(message.clone()));

        let result = self.rpc.call(Method::SendRequest, vec![to_value(&message)?]).await?;
        let response: Message = from_value(result)?;
        self.validator.validate_incoming_message(&response)?;
        self.events.emit(PluginEvent::IncomingResponse(response.clone()));
        Ok(response)
    }

    fn schedule_expiry(&self, transfer: &Transfer) {
        let plugin = self.clone();
        let id = transfer.id;
        self.expiry.schedule(id, transfer.expires_at, async move {
            plugin.handle_expiry(id).await;
        });
    }

    async fn handle_expiry(&self, id: Uuid) {
        let Some(record) = self.log.get(id) else { return };
        if record.state != TransferState::Prepared {
            return
        }
        let transitioned = match self.log.cancel(id, Some(json!("expired"))).await {
            Ok(transitioned) => transitioned,
            Err(err) => {
                debug!(%id, "transfer settled before its expiry: {err}");
                return
            }
        };
        if !transitioned {
            return
        }
        if let Err(err) = self.rpc.call(Method::ExpireTransfer, vec![json!(id)]).await {
            debug!(%id, "peer expiry notification failed: {err}");
        }
        self.emit_cancel(record.is_incoming, record.transfer, json!("expired"));
    }

    fn emit_cancel(&self, is_incoming: bool, transfer: Transfer, reason: Value) {
        let event = if is_incoming {
            PluginEvent::IncomingCancel { transfer, reason }
        } else {
            PluginEvent::OutgoingCancel { transfer, reason }
        };
        self.events.emit(event);
    }

    async fn handle_send_transfer(&self, args: Vec<Value>) -> Result<Value, Error> {
        let transfer: Transfer = arg(&args, 0)?;
        self.validator.validate_incoming_transfer(&transfer)?;

        let inserted = self.log.prepare(&transfer, true).await?;
        if !inserted {
            debug!(id = %transfer.id, "replayed transfer already prepared");
            return Ok(json!(true))
        }

        if let Some(backend) = &self.backend {
            if let Err(err) = backend.handle_incoming_prepare(&self.ctx, &transfer).await {
                let reason =
                    to_value(&RejectionReason::bad_request(err.to_string(), &self.account))?;
                if let Err(cancel_err) = self.log.cancel(transfer.id, Some(reason)).await {
                    warn!(id = %transfer.id, "could not cancel refused transfer: {cancel_err}");
                }
                return Err(Error::NotAccepted(format!(
                    "transfer {} was refused: {err}",
                    transfer.id
                )))
            }
        }

        self.events.emit(PluginEvent::IncomingPrepare(transfer.clone()));
        self.schedule_expiry(&transfer);
        Ok(json!(true))
    }

    async fn handle_fulfill_condition(&self, args: Vec<Value>) -> Result<Value, Error> {
        let id: Uuid = arg(&args, 0)?;
        let fulfillment: String = arg(&args, 1)?;
        let record = self
            .log
            .get(id)
            .ok_or_else(|| Error::NotAccepted(format!("no transfer with id {id}")))?;
        if record.is_incoming {
            return Err(Error::NotAccepted(format!(
                "transfer {id} is incoming and can only be fulfilled by this side"
            )))
        }
        match record.state {
            TransferState::Cancelled => return Err(Error::AlreadyRejected(id)),
            TransferState::Prepared if Utc::now() >= record.transfer.expires_at => {
                self.handle_expiry(id).await;
                return Err(Error::NotAccepted(format!("transfer {id} has expired")))
            }
            _ => {}
        }
        if !fulfillment_matches_condition(&fulfillment, &record.transfer.execution_condition)? {
            return Err(Error::NotAccepted(format!(
                "fulfillment does not match the condition of transfer {id}"
            )))
        }

        let transitioned = self.log.fulfill(id, &fulfillment).await?;
        self.expiry.cancel(&id);
        if transitioned {
            self.events.emit(PluginEvent::OutgoingFulfill {
                transfer: record.transfer.clone(),
                fulfillment: fulfillment.clone(),
            });
        }

        if let Some(backend) = &self.backend {
            match backend
                .create_outgoing_claim(&self.ctx, &self.log.get_outgoing_fulfilled())
                .await
            {
                Ok(Some(claim)) => return Ok(claim),
                Ok(None) => {}
                Err(err) => warn!(%id, "backend failed to create outgoing claim: {err}"),
            }
        }
        Ok(json!(true))
    }

    async fn handle_reject_incoming_transfer(&self, args: Vec<Value>) -> Result<Value, Error> {
        let id: Uuid = arg(&args, 0)?;
        let reason = args.get(1).cloned().unwrap_or(Value::Null);
        let record = self
            .log
            .get(id)
            .ok_or_else(|| Error::NotAccepted(format!("no transfer with id {id}")))?;
        if record.is_incoming {
            return Err(Error::NotAccepted(format!(
                "transfer {id} is incoming and can only be rejected by this side"
            )))
        }
        let transitioned = self.log.cancel(id, Some(reason.clone())).await?;
        self.expiry.cancel(&id);
        if transitioned {
            self.events
                .emit(PluginEvent::OutgoingReject { transfer: record.transfer.clone(), reason });
        }
        Ok(json!(true))
    }

    async fn handle_expire_transfer(&self, args: Vec<Value>) -> Result<Value, Error> {
        let id: Uuid = arg(&args, 0)?;
        let record = self
            .log
            .get(id)
            .ok_or_else(|| Error::NotAccepted(format!("no transfer with id {id}")))?;
        if Utc::now() < record.transfer.expires_at {
            return Err(Error::NotAccepted(format!("transfer {id} has not expired yet")))
        }
        let transitioned = self.log.cancel(id, Some(json!("expired"))).await?;
        self.expiry.cancel(&id);
        if transitioned {
            self.emit_cancel(record.is_incoming, record.transfer, json!("expired"));
        }
        Ok(json!(true))
    }

    async fn handle_send_message(&self, args: Vec<Value>) -> Result<Value, Error> {
        let message: Message = arg(&args, 0)?;
        self.validator.validate_incoming_message(&message)?;
        self.events.emit(PluginEvent::IncomingMessage(message));
        Ok(json!(true))
    }

    async fn handle_send_request(&self, args: Vec<Value>) -> Result<Value, Error> {
        let message: Message = arg(&args, 0)?;
        self.validator.validate_incoming_message(&message)?;
        self.events.emit(PluginEvent::IncomingRequest(message.clone()));

        let handler = self.request_handler.read().clone();
        let Some(handler) = handler else {
            return Err(Error::NotAccepted("no request handler is registered".to_string()))
        };
        let mut response = handler(message).await?;
        response.ledger = self.prefix.clone();
        self.validator.validate_outgoing_message(&response)?;
        self.events.emit(PluginEvent::OutgoingResponse(response.clone()));
        to_value(&response)
    }
}

#[async_trait]
impl RpcHandler for Plugin {
    fn auth_token(&self) -> String {
        self.token.clone()
    }

    fn prefix(&self) -> String {
        self.prefix.clone()
    }

    async fn handle(&self, method: Method, args: Vec<Value>) -> Result<Value, Error> {
        self.assert_connected()?;
        match method {
            Method::SendTransfer => self.handle_send_transfer(args).await,
            Method::FulfillCondition => self.handle_fulfill_condition(args).await,
            Method::RejectIncomingTransfer => self.handle_reject_incoming_transfer(args).await,
            Method::ExpireTransfer => self.handle_expire_transfer(args).await,
            Method::SendMessage => self.handle_send_message(args).await,
            Method::SendRequest => self.handle_send_request(args).await,
            Method::GetLimit => {
                Ok(json!(self.log.get_maximum().unwrap_or_else(|| "0".to_string())))
            }
            Method::GetBalance => Ok(json!(self.log.get_balance())),
            Method::GetInfo => {
                if let Some(backend) = &self.backend {
                    Ok(backend.get_info())
                } else {
                    Ok(self.info.clone())
                }
            }
            Method::GetFulfillment => {
                let id: Uuid = arg(&args, 0)?;
                Ok(json!(self.get_fulfillment(id).await?))
            }
        }
    }
}

#[async_trait]
impl LedgerFacade for Plugin {
    fn prefix(&self) -> String {
        self.get_prefix()
    }

    fn account(&self) -> String {
        self.get_account()
    }

    fn peer_account(&self) -> String {
        self.get_peer_account()
    }

    async fn balance(&self) -> Result<String, Error> {
        self.get_balance().await
    }

    async fn send_transfer(&self, transfer: Transfer) -> Result<(), Error> {
        Plugin::send_transfer(self, transfer).await
    }

    async fn fulfill_condition(&self, id: Uuid, fulfillment: String) -> Result<(), Error> {
        Plugin::fulfill_condition(self, id, &fulfillment).await
    }
}

fn arg<T: DeserializeOwned>(args: &[Value], index: usize) -> Result<T, Error> {
    let value = args
        .get(index)
        .ok_or_else(|| Error::InvalidFields(format!("missing rpc argument {index}")))?;
    serde_json::from_value(value.clone())
        .map_err(|err| Error::InvalidFields(format!("malformed rpc argument {index}: {err}")))
}

fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    serde_json::from_value(value)
        .map_err(|err| Error::InvalidFields(format!("malformed rpc result: {err}")))
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, Error> {
    serde_json::to_value(value).map_err(|err| Error::InvalidFields(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use paychan_rs::MemoryStore;
    use url::Url;

    fn plugin(stateful: bool) -> Plugin {
        let store = MemoryStore::new();
        let factory = StateFactory::new(store.clone());
        let log = TransferLog::ephemeral(store);
        let rpc = RpcClient::new(
            vec![Url::parse("http://127.0.0.1:9/rpc").unwrap()],
            "peer.t.",
            "secret",
        );
        Plugin::new(PluginOptions {
            prefix: "peer.t.".to_string(),
            token: Some("secret".to_string()),
            info: json!({ "currencyScale": 9 }),
            stateful,
            tolerate_rpc_failure: false,
            rpc,
            log,
            factory,
            backend: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn public_operations_require_connected() {
        let plugin = plugin(true);
        assert!(!plugin.is_connected());
        assert!(matches!(plugin.get_balance().await, Err(Error::NotConnected)));
        assert!(matches!(
            plugin.fulfill_condition(Uuid::new_v4(), "x").await,
            Err(Error::NotConnected)
        ));

        plugin.connect().await.unwrap();
        assert!(plugin.is_connected());
        assert_eq!(plugin.get_balance().await.unwrap(), "0");
    }

    #[tokio::test]
    async fn connect_and_disconnect_are_idempotent() {
        let plugin = plugin(true);
        plugin.connect().await.unwrap();
        plugin.connect().await.unwrap();
        plugin.disconnect().await.unwrap();
        plugin.disconnect().await.unwrap();
        assert!(!plugin.is_connected());
    }

    #[tokio::test]
    async fn asymmetric_accounts_are_fixed() {
        let server = plugin(true);
        assert_eq!(server.get_account(), "peer.t.server");
        assert_eq!(server.get_peer_account(), "peer.t.client");

        let client = plugin(false);
        assert_eq!(client.get_account(), "peer.t.client");
        assert_eq!(client.get_peer_account(), "peer.t.server");
    }

    #[tokio::test]
    async fn only_the_receiving_side_may_fulfill() {
        let plugin = plugin(true);
        plugin.connect().await.unwrap();

        let preimage = [3u8; 32];
        let fulfillment =
            base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, preimage);
        let transfer = Transfer {
            id: Uuid::new_v4(),
            amount: "10".to_string(),
            ledger: "peer.t.".to_string(),
            from: "peer.t.server".to_string(),
            to: "peer.t.client".to_string(),
            execution_condition: paychan_rs::condition_from_preimage(&preimage),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
            ilp: None,
            note_to_self: None,
        };
        plugin.transfer_log().prepare(&transfer, false).await.unwrap();

        let err = plugin.fulfill_condition(transfer.id, &fulfillment).await.unwrap_err();
        assert!(matches!(err, Error::NotAccepted(_)));
        assert_eq!(
            plugin.transfer_log().get(transfer.id).unwrap().state,
            TransferState::Prepared
        );
    }

    #[tokio::test]
    async fn stateless_side_surfaces_rpc_failures_unless_tolerated() {
        let transfer = |to: &str| Transfer {
            id: Uuid::new_v4(),
            amount: "10".to_string(),
            ledger: "peer.t.".to_string(),
            from: "peer.t.client".to_string(),
            to: to.to_string(),
            execution_condition: paychan_rs::condition_from_preimage(&[2u8; 32]),
            expires_at: Utc::now() + chrono::Duration::seconds(60),
            ilp: None,
            note_to_self: None,
        };

        // nothing listens on the configured endpoint
        let strict = plugin(false);
        strict.connect().await.unwrap();
        let outgoing = transfer("peer.t.server");
        assert!(matches!(
            strict.send_transfer(outgoing.clone()).await,
            Err(Error::Rpc(_))
        ));
        // the record stays prepared and is left to its expiry timer
        assert_eq!(
            strict.transfer_log().get(outgoing.id).unwrap().state,
            TransferState::Prepared
        );

        let tolerant = {
            let store = MemoryStore::new();
            let factory = StateFactory::new(store.clone());
            let log = TransferLog::ephemeral(store);
            let rpc = RpcClient::new(
                vec![Url::parse("http://127.0.0.1:9/rpc").unwrap()],
                "peer.t.",
                "secret",
            );
            Plugin::new(PluginOptions {
                prefix: "peer.t.".to_string(),
                token: Some("secret".to_string()),
                info: Value::Null,
                stateful: false,
                tolerate_rpc_failure: true,
                rpc,
                log,
                factory,
                backend: None,
            })
            .unwrap()
        };
        tolerant.connect().await.unwrap();
        tolerant.send_transfer(transfer("peer.t.server")).await.unwrap();
    }

    #[tokio::test]
    async fn only_one_request_handler_at_a_time() {
        let plugin = plugin(true);
        let handler: RequestHandler = Arc::new(|message| Box::pin(async move { Ok(message) }));
        plugin.register_request_handler(handler.clone()).unwrap();
        assert!(matches!(
            plugin.register_request_handler(handler.clone()),
            Err(Error::RequestHandlerAlreadyRegistered)
        ));
        plugin.deregister_request_handler();
        plugin.register_request_handler(handler).unwrap();
    }
}
