//! Node configuration: storage location, RPC bind address, chain parameters,
//! and the pool/work service tunables layered on top of [`ChainParams`].
//!
//! Parsing this from a config file is an external concern (§1 Non-goals);
//! this module only owns the in-process defaults and the handful of derived
//! paths the storage and service layers need.

use std::path::PathBuf;

use solidus_core::constants::ChainParams;

/// Default TCP port for the pool service's line-delimited JSON protocol
/// (§4.8). Arbitrary but fixed so a deployment's firewall rules are stable.
pub const DEFAULT_POOL_PORT: u16 = 3333;

/// Configuration for a full node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Bind address for the pool service's TCP listener.
    pub pool_bind: String,
    pub pool_port: u16,
    /// Chain-wide tunables (§6 "Chain parameters").
    pub chain: ChainParams,
    /// `tracing` filter directive (e.g. "info", "debug,solidus_node=trace").
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./solidus-data"),
            pool_bind: "127.0.0.1".to_string(),
            pool_port: DEFAULT_POOL_PORT,
            chain: ChainParams::default(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    /// Socket address string for the pool service's TCP listener.
    pub fn pool_addr(&self) -> String {
        format!("{}:{}", self.pool_bind, self.pool_port)
    }
}
