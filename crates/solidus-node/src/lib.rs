//! Full node: RocksDB-backed storage, the work/pool/ticket services that sit
//! on top of [`solidus_consensus`], and the message contracts external
//! callers speak against.
//!
//! - [`storage::RocksStore`] — persistent chain state (§4.2 retry policy)
//! - [`node`] — work service, ticketed solo mining, pool service (§4.6, §4.8)
//! - [`rpc`] — serde DTOs and dispatch functions for §6's external interfaces
//! - [`config::NodeConfig`] — node configuration

pub mod config;
pub mod node;
pub mod rpc;
pub mod storage;

pub use config::{NodeConfig, DEFAULT_POOL_PORT};
pub use node::{
    issue_ticket, submit_block, submit_near_target, Job, NodeError, PoolService, PoolSession,
    PoolSubmitOutcome, Ticket, TicketPayload, WorkService,
};
pub use rpc::{run_pool_server, PoolState};
pub use storage::RocksStore;
