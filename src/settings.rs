use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::keypair::Keypair;
use crate::networking::message_types::status_message::NodeEndpoint;
use crate::SwarmError;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Everything a [`crate::client::SwarmClient`] needs to reach a swarm.
///
/// ```toml
/// swarm_id = "my-swarm"
/// timeout_secs = 30
/// private_key = "<64 hex chars>"   # optional, a fresh key is generated otherwise
///
/// [[nodes]]
/// uuid = "<base58 public key>"     # optional, empty for a bootstrap node
/// host = "10.0.0.1"
/// port = 50000
/// ```
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub swarm_id: String,
    pub nodes: Vec<NodeEndpoint>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Skip signing and verification altogether.
    #[serde(default)]
    pub trusted: bool,
}

impl ClientSettings {
    /// Reads the named config file (any format the `config` crate knows) and
    /// applies `SWARMDB_*` environment overrides on top.
    pub fn load(config_name: &str) -> crate::Result<ClientSettings> {
        let mut settings = Config::default();
        settings
            .merge(File::with_name(config_name))?
            .merge(Environment::with_prefix("SWARMDB"))?;
        ClientSettings::from_config(settings)
    }

    pub fn from_toml(toml: &str) -> crate::Result<ClientSettings> {
        let mut settings = Config::default();
        settings.merge(File::from_str(toml, FileFormat::Toml))?;
        ClientSettings::from_config(settings)
    }

    fn from_config(settings: Config) -> crate::Result<ClientSettings> {
        let settings: ClientSettings = settings.try_into()?;
        if settings.nodes.is_empty() {
            return Err(SwarmError::Configuration(String::from(
                "no swarm nodes configured",
            )));
        }
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The configured signing key, or a new random one.
    pub fn keypair(&self) -> crate::Result<Keypair> {
        match &self.private_key {
            Some(private_key) => Keypair::from_secret_hex(private_key),
            None => Ok(Keypair::new()),
        }
    }
}
