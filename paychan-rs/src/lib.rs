mod backend;
mod decimal;
mod error;
mod max_value_tracker;
pub mod rpc;
mod state_factory;
mod store;
mod transfer_log;
pub mod types;
mod validator;

pub use backend::{LedgerFacade, PluginContext, SettlementBackend};
pub use decimal::{negate, parse_amount};
pub use error::Error;
pub use max_value_tracker::{MaxEntry, MaxValueTracker};
pub use state_factory::StateFactory;
pub use store::{MemoryStore, SledStore, Store, StoreError};
pub use transfer_log::TransferLog;
pub use validator::{
    condition_from_preimage, decode_condition, decode_fulfillment, fulfillment_matches_condition,
    Validator,
};
