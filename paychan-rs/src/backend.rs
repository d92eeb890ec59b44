use crate::{
    error::Error, rpc::RpcClient, state_factory::StateFactory, transfer_log::TransferLog,
    types::Transfer,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// The public ledger operations the engine exposes back to its settlement
/// backend. Deliberately narrow: a backend drives settlement, it does not
/// reach into engine internals.
#[async_trait]
pub trait LedgerFacade: Send + Sync {
    fn prefix(&self) -> String;

    fn account(&self) -> String;

    fn peer_account(&self) -> String;

    async fn balance(&self) -> Result<String, Error>;

    async fn send_transfer(&self, transfer: Transfer) -> Result<(), Error>;

    async fn fulfill_condition(&self, id: Uuid, fulfillment: String) -> Result<(), Error>;
}

/// Everything a settlement backend may touch: the peer RPC channel for
/// backend-to-backend chatter, the factory for its own trackers and logs,
/// the engine's transfer log, and the engine facade.
pub struct PluginContext {
    pub rpc: RpcClient,
    pub factory: StateFactory,
    pub transfer_log: TransferLog,
    plugin: RwLock<Option<Arc<dyn LedgerFacade>>>,
}

impl PluginContext {
    pub fn new(rpc: RpcClient, factory: StateFactory, transfer_log: TransferLog) -> Self {
        Self { rpc, factory, transfer_log, plugin: RwLock::new(None) }
    }

    /// Installed by the engine when it connects, dropped when it
    /// disconnects.
    pub fn set_plugin(&self, plugin: Option<Arc<dyn LedgerFacade>>) {
        *self.plugin.write() = plugin;
    }

    pub fn plugin(&self) -> Option<Arc<dyn LedgerFacade>> {
        self.plugin.read().clone()
    }
}

/// Capability set a settlement backend provides to the engine. Each call
/// except `connect` and `disconnect` is expected to return promptly;
/// anything slower belongs on the backend's own background tasks.
#[async_trait]
pub trait SettlementBackend: Send + Sync {
    /// Establish settlement-network resources. Called once, before the
    /// engine reports itself connected.
    async fn connect(&self, ctx: &PluginContext) -> Result<(), Error>;

    /// Inspect an incoming transfer that has just been recorded as
    /// prepared. An error here makes the engine cancel the transfer and
    /// propagate the refusal to the peer.
    async fn handle_incoming_prepare(&self, ctx: &PluginContext, transfer: &Transfer)
        -> Result<(), Error>;

    /// Produce a claim covering the accumulated outgoing fulfilled sum, or
    /// `None` to skip this round. Called after each outgoing fulfillment.
    async fn create_outgoing_claim(
        &self,
        ctx: &PluginContext,
        outgoing_fulfilled: &str,
    ) -> Result<Option<Value>, Error>;

    /// Receive the claim the peer produced for our incoming fulfillment.
    async fn handle_incoming_claim(&self, ctx: &PluginContext, claim: &Value) -> Result<(), Error>;

    fn get_auth_token(&self) -> String;

    fn get_account(&self) -> String;

    fn get_peer_account(&self) -> String;

    fn get_info(&self) -> Value;

    /// Final settlement, best effort. May submit the best claim on-chain.
    async fn disconnect(&self, ctx: &PluginContext) -> Result<(), Error>;
}
