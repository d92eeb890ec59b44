use paychan_rs::Error;
use serde::Deserialize;
use serde_json::Value;
use std::net::Ipv4Addr;
use url::Url;

fn default_host() -> Ipv4Addr {
    Ipv4Addr::UNSPECIFIED
}

fn default_port() -> u16 {
    18470
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: Ipv4Addr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Address prefix shared by both accounts on this channel.
    pub prefix: String,
    /// Shared bearer secret for asymmetric pairs.
    #[serde(default)]
    pub token: Option<String>,
    /// Peer endpoint, e.g. `http://peer:18470/rpc`. Exactly one of
    /// `rpc_uri` and `rpc_uris` must be set; a list enables failover.
    #[serde(default)]
    pub rpc_uri: Option<String>,
    #[serde(default)]
    pub rpc_uris: Vec<String>,
    #[serde(default)]
    pub tolerate_rpc_failure: bool,
    /// Upper bound on incoming fulfilled-and-prepared (stateful side).
    #[serde(default)]
    pub max_balance: Option<String>,
    /// Lower bound on the signed net position (stateful side).
    #[serde(default)]
    pub min_balance: Option<String>,
    /// Opaque ledger info served to `get_info` callers.
    #[serde(default)]
    pub info: Option<Value>,
    /// Which side of an asymmetric pair this is.
    #[serde(default)]
    pub stateful: bool,
    /// Directory for the durable store; in-memory when unset.
    #[serde(default)]
    pub store_path: Option<String>,
}

impl Config {
    pub fn rpc_endpoints(&self) -> Result<Vec<Url>, Error> {
        let uris: Vec<&String> = match (&self.rpc_uri, self.rpc_uris.is_empty()) {
            (Some(uri), true) => vec![uri],
            (None, false) => self.rpc_uris.iter().collect(),
            _ => {
                return Err(Error::InvalidFields(
                    "exactly one of `rpc_uri` and `rpc_uris` must be configured".to_string(),
                ))
            }
        };
        uris.into_iter()
            .map(|uri| {
                Url::parse(uri)
                    .map_err(|err| Error::InvalidFields(format!("invalid rpc uri `{uri}`: {err}")))
            })
            .collect()
    }
}
