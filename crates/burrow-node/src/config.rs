use std::{
    path::PathBuf,
    time::Duration,
};

use figment::{
    providers::Env,
    Figment,
};
use serde::{
    Deserialize,
    Serialize,
};

pub const ENV_PREFIX: &str = "BURROW_NODE_";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The endpoint on which the node listens for ABCI requests.
    pub listen_addr: String,
    /// The path to the cnidarium storage db.
    pub db_filepath: PathBuf,
    /// The genesis document applied when the storage db is empty.
    pub genesis_filepath: PathBuf,
    /// Log level: debug, info, warn, or error
    pub log: String,
    /// Writes human readable logs instead of json.
    pub pretty_print: bool,
    /// Returned as the `data` of ABCI info responses.
    pub node_info: String,
    /// Runs the node as a single process without a consensus engine.
    pub no_consensus: bool,
    /// Without consensus, the interval at which pending transactions are committed. `0`
    /// commits after every transaction.
    pub commit_interval_ms: u64,
    /// How long to wait for pending work to be committed on shutdown.
    pub shutdown_timeout_ms: u64,
    /// Comma separated node ids allowed to connect. Empty allows every node.
    pub authorized_peer_ids: String,
    /// Comma separated `host:port` addresses allowed to connect. Empty allows every address.
    pub authorized_peer_addresses: String,
}

impl Config {
    /// Reads the config from `BURROW_NODE_` prefixed environment variables. `RUST_LOG` takes
    /// precedence over `BURROW_NODE_LOG`.
    ///
    /// # Errors
    /// Returns an error if a variable is missing, cannot be parsed, or is unknown.
    pub fn get() -> Result<Self, figment::Error> {
        Self::get_with_prefix(ENV_PREFIX)
    }

    fn get_with_prefix(prefix: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Env::prefixed(prefix))
            .merge(Env::prefixed("RUST_").split("_").only(&["log"]))
            .extract()
    }

    #[must_use]
    pub fn commit_interval(&self) -> Option<Duration> {
        (self.commit_interval_ms > 0).then(|| Duration::from_millis(self.commit_interval_ms))
    }

    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    #[must_use]
    pub fn authorized_peer_ids(&self) -> Vec<String> {
        split_list(&self.authorized_peer_ids)
    }

    #[must_use]
    pub fn authorized_peer_addresses(&self) -> Vec<String> {
        split_list(&self.authorized_peer_addresses)
    }
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
