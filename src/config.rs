use bitcoin::Network;
use serde::Deserialize;

use crate::constants::DEFAULT_UNCONFIRMED_TIMEOUT_SECS;

/// Host-supplied watcher settings.
#[derive(Deserialize, Debug, Clone)]
pub struct WatcherConfig {
    /// Network the watched addresses belong to.
    pub network: Network,
    /// Seconds before a stale unconfirmed transaction is dropped from the
    /// serialized blob.
    #[serde(default = "default_unconfirmed_timeout")]
    pub unconfirmed_timeout_secs: u64,
}

fn default_unconfirmed_timeout() -> u64 {
    DEFAULT_UNCONFIRMED_TIMEOUT_SECS
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            network: Network::Bitcoin,
            unconfirmed_timeout_secs: DEFAULT_UNCONFIRMED_TIMEOUT_SECS,
        }
    }
}
