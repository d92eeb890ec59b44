use async_trait::async_trait;
use parking_lot::Mutex;
use paychan_rs::{
    types::Transfer, Error, MaxEntry, MaxValueTracker, PluginContext, SettlementBackend,
};
use serde_json::{json, Value};

#[derive(Clone, Debug, PartialEq)]
pub enum BackendCall {
    Connect,
    IncomingPrepare(String),
    CreateOutgoingClaim(String),
    IncomingClaim(Value),
    Disconnect,
}

/// Claim-producing settlement backend stub. Claims are plain JSON objects
/// carrying the secured value; the best incoming claim is kept in a
/// max-value tracker the way a real channel backend would.
pub struct ClaimBackend {
    account: String,
    peer_account: String,
    token: String,
    pub best_claim: MaxValueTracker,
    pub calls: Mutex<Vec<BackendCall>>,
}

impl ClaimBackend {
    pub fn new(account: &str, peer_account: &str, token: &str, best_claim: MaxValueTracker) -> Self {
        Self {
            account: account.to_string(),
            peer_account: peer_account.to_string(),
            token: token.to_string(),
            best_claim,
            calls: Mutex::new(vec![]),
        }
    }

    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SettlementBackend for ClaimBackend {
    async fn connect(&self, _ctx: &PluginContext) -> Result<(), Error> {
        self.calls.lock().push(BackendCall::Connect);
        Ok(())
    }

    async fn handle_incoming_prepare(
        &self,
        _ctx: &PluginContext,
        transfer: &Transfer,
    ) -> Result<(), Error> {
        self.calls.lock().push(BackendCall::IncomingPrepare(transfer.amount.clone()));
        Ok(())
    }

    async fn create_outgoing_claim(
        &self,
        _ctx: &PluginContext,
        outgoing_fulfilled: &str,
    ) -> Result<Option<Value>, Error> {
        self.calls.lock().push(BackendCall::CreateOutgoingClaim(outgoing_fulfilled.to_string()));
        Ok(Some(json!({ "value": outgoing_fulfilled, "signature": "stub" })))
    }

    async fn handle_incoming_claim(&self, _ctx: &PluginContext, claim: &Value) -> Result<(), Error> {
        self.calls.lock().push(BackendCall::IncomingClaim(claim.clone()));
        let value: String = claim
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidFields("claim is missing its value".to_string()))?
            .to_string();
        self.best_claim.set_if_max(MaxEntry { value, data: claim.clone() }).await?;
        Ok(())
    }

    fn get_auth_token(&self) -> String {
        self.token.clone()
    }

    fn get_account(&self) -> String {
        self.account.clone()
    }

    fn get_peer_account(&self) -> String {
        self.peer_account.clone()
    }

    fn get_info(&self) -> Value {
        json!({ "prefix": "peer.t.", "currencyScale": 9 })
    }

    async fn disconnect(&self, _ctx: &PluginContext) -> Result<(), Error> {
        self.calls.lock().push(BackendCall::Disconnect);
        Ok(())
    }
}
