use crate::cmd::config::Config;
use anyhow::{anyhow, Result};
use clap::Args;
use paychan_plugin_rs::Service;

#[derive(Debug, Args)]
#[clap(about = "🔗 clearing conditional transfers with a channel peer")]
pub struct Command {
    #[clap(env, default_value = "config.toml")]
    config_file: String,
}

impl Command {
    pub async fn execute(self) -> Result<()> {
        let config_file = &self.config_file;

        let config = Config::from_toml_file(config_file)?;

        if let Some(config) = config.peer {
            Service::from(config).run().await.map_err(|err| anyhow!(err))
        } else {
            Err(anyhow!("missing peer config from file provided"))
        }
    }
}
