use crate::{
    config::Config,
    engine::{Plugin, PluginOptions},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use paychan_rs::{
    rpc::{RpcClient, RpcServer},
    Error, MemoryStore, SettlementBackend, SledStore, StateFactory, TransferLog,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Wires a plugin out of its configuration: store, transfer log, RPC
/// client, engine, and the listening RPC server.
pub struct Service {
    config: Config,
    backend: Option<Arc<dyn SettlementBackend>>,
}

impl Service {
    pub fn from(config: Config) -> Self {
        Self { config, backend: None }
    }

    pub fn with_backend(mut self, backend: Arc<dyn SettlementBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Build the engine and its server without starting either.
    pub async fn build(&self) -> Result<(Plugin, RpcServer<Plugin>), Error> {
        let config = &self.config;
        let store = match &config.store_path {
            Some(path) => SledStore::open(path)?,
            None => MemoryStore::new(),
        };
        let factory = StateFactory::new(store.clone());

        let log_key = URL_SAFE_NO_PAD.encode(format!("transfers:{}", config.prefix));
        let log = TransferLog::open(store, &log_key).await?;
        if let Some(maximum) = &config.max_balance {
            log.set_maximum(maximum).await?;
        }
        if let Some(minimum) = &config.min_balance {
            log.set_minimum(minimum).await?;
        }

        let token = match (&self.backend, &config.token) {
            (Some(backend), _) => backend.get_auth_token(),
            (None, Some(token)) => token.clone(),
            (None, None) => {
                return Err(Error::InvalidFields(
                    "a shared token is required without a settlement backend".to_string(),
                ))
            }
        };
        let rpc = RpcClient::new(config.rpc_endpoints()?, &config.prefix, &token);

        let plugin = Plugin::new(PluginOptions {
            prefix: config.prefix.clone(),
            token: Some(token),
            info: config.info.clone().unwrap_or(Value::Null),
            stateful: config.stateful,
            tolerate_rpc_failure: config.tolerate_rpc_failure,
            rpc,
            log,
            factory,
            backend: self.backend.clone(),
        })?;

        let server = RpcServer::new(config.host, config.port, plugin.clone());
        Ok((plugin, server))
    }

    /// Connect the plugin and serve inbound peer calls until the server
    /// task stops.
    pub async fn run(&self) -> Result<(), Error> {
        let (plugin, server) = self.build().await?;
        plugin.connect().await?;
        info!(prefix = %self.config.prefix, "payment channel plugin connected");

        let result = match server.spawn().await {
            Ok(result) => result,
            Err(err) => Err(Error::Internal(format!("rpc server task failed: {err}"))),
        };
        plugin.disconnect().await?;
        result
    }
}
