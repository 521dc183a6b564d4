//! Message contracts for the external interfaces listed in §6: Work RPC,
//! transaction submission, the pool session line protocol, and ticketed solo
//! mining. Transport (HTTP routing, connection framing) is left to callers;
//! this module only defines the request/response shapes and the dispatch
//! functions that translate them into [`crate::node`] and
//! [`solidus_consensus`] calls. The one piece of actual I/O here is
//! [`run_pool_server`], a bare line-delimited-JSON TCP loop for the pool
//! session — the wire format itself (one JSON object per newline) is
//! specified, so this is the protocol, not framing around it.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use solidus_consensus::AcceptedHeader;
use solidus_core::chain_state::Store;
use solidus_core::constants::ChainParams;
use solidus_core::error::{AcceptanceError, AdmissionError};
use solidus_core::hash;
use solidus_core::mempool;
use solidus_core::types::{Hash256, TransactionRecord, WireTransaction};

use crate::node::{Job, NodeError, PoolService, PoolSubmitOutcome, WorkService};

fn hex32(h: Hash256) -> String {
    h.to_hex()
}

fn parse_hex32(s: &str) -> Option<Hash256> {
    Hash256::from_hex(s)
}

/// `GetWork(miner_hint?) → Job` (§6 Work RPC).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetWorkRequest {
    pub miner_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetWorkResponse {
    pub job_id: String,
    pub issued_ms: u64,
    pub ttl_ms: u64,
    pub height: u32,
    pub prev_hash: String,
    pub target: String,
    pub version: u32,
    pub timestamp: u64,
    pub miner_hint: Option<String>,
    pub txids: Vec<String>,
}

impl From<Job> for GetWorkResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.job_id,
            issued_ms: job.issued_ms,
            ttl_ms: job.ttl_ms,
            height: job.height,
            prev_hash: hex32(job.prev_hash),
            target: job.target.to_hex(),
            version: job.version,
            timestamp: job.timestamp,
            miner_hint: job.miner_hint,
            txids: job.txids_snapshot.into_iter().map(hex32).collect(),
        }
    }
}

pub fn handle_get_work(
    work: &mut WorkService,
    store: &dyn Store,
    params: &ChainParams,
    req: GetWorkRequest,
    now_ms: u64,
) -> GetWorkResponse {
    work.get_work(store, params, req.miner_hint, now_ms).into()
}

/// `SubmitWork{...} → {accepted:true,...} | {accepted:false, error, ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitWorkRequest {
    pub job_id: String,
    pub miner_address: String,
    pub nonce: u64,
    pub timestamp: u64,
    pub version: u32,
    pub merkle_root_hex: String,
    pub prev_hash_hex: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitWorkResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txids_len: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitWorkResponse {
    fn rejected(error: String) -> Self {
        Self {
            accepted: false,
            hash: None,
            height: None,
            prev: None,
            job_id: None,
            txids_len: None,
            error: Some(error),
        }
    }
}

pub fn handle_submit_work(
    work: &mut WorkService,
    store: &mut dyn Store,
    params: &ChainParams,
    req: SubmitWorkRequest,
    now_ms: u64,
) -> SubmitWorkResponse {
    let merkle_root = match parse_hex32(&req.merkle_root_hex) {
        Some(h) => h,
        None => return SubmitWorkResponse::rejected("bad-format".to_string()),
    };
    let prev_hash = match req.prev_hash_hex.as_deref() {
        Some(s) => match parse_hex32(s) {
            Some(h) => Some(h),
            None => return SubmitWorkResponse::rejected("bad-format".to_string()),
        },
        None => None,
    };

    let job_id = req.job_id.clone();
    match work.submit_work(
        store,
        params,
        &req.job_id,
        &req.miner_address,
        req.nonce,
        req.timestamp,
        req.version,
        merkle_root,
        prev_hash,
        now_ms,
    ) {
        Ok(accepted) => submit_work_accepted(accepted, job_id),
        Err(e) => SubmitWorkResponse::rejected(node_error_kind(&e)),
    }
}

fn submit_work_accepted(accepted: AcceptedHeader, job_id: String) -> SubmitWorkResponse {
    SubmitWorkResponse {
        accepted: true,
        hash: Some(hex32(accepted.header.hash)),
        height: Some(accepted.header.height),
        prev: Some(hex32(accepted.header.prev_hash)),
        job_id: Some(job_id),
        txids_len: Some(accepted.txids.len()),
        error: None,
    }
}

/// Stable error kind string per §7, used across every response in this
/// module so a client matches on the same taxonomy regardless of which
/// entry point rejected its submission.
fn node_error_kind(err: &NodeError) -> String {
    match err {
        NodeError::Acceptance(e) => acceptance_error_kind(e),
        NodeError::Engine(e) => e.to_string(),
    }
}

fn acceptance_error_kind(err: &AcceptanceError) -> String {
    match err {
        AcceptanceError::StalePrev => "stale-prev".to_string(),
        AcceptanceError::MerkleMismatch { rebuilt, submitted, txids_len } => {
            format!("merkle-mismatch: rebuilt={rebuilt}, submitted={submitted}, txids_len={txids_len}")
        }
        AcceptanceError::HeaderInvalid(reason) => format!("header-invalid:{reason}"),
        AcceptanceError::UnknownOrExpiredJob => "unknown-or-expired-job".to_string(),
        AcceptanceError::StaleJob => "stale-job".to_string(),
        AcceptanceError::PrevMismatch => "prev-mismatch".to_string(),
        AcceptanceError::AddrMismatch => "addr-mismatch".to_string(),
        AcceptanceError::NonceOutOfWindow => "nonce-out-of-window".to_string(),
        AcceptanceError::NotANearTarget => "not-a-near-target".to_string(),
        AcceptanceError::TicketExpired => "ticket-expired".to_string(),
        AcceptanceError::BadTicketSignature => "bad-ticket-signature".to_string(),
        AcceptanceError::BadTicketPayload => "bad-ticket-payload".to_string(),
    }
}

fn admission_error_kind(err: &AdmissionError) -> String {
    match err {
        AdmissionError::BadFormat => "bad-format",
        AdmissionError::BadVersion => "bad-version",
        AdmissionError::FeeTooLow => "fee-too-low",
        AdmissionError::MissingIo => "missing-io",
        AdmissionError::BadInput => "bad-input",
        AdmissionError::BadInputRef => "bad-input-ref",
        AdmissionError::UtxoMissingOrSpent => "utxo-missing-or-spent",
        AdmissionError::CoinbaseImmature => "coinbase-immature",
        AdmissionError::BadOutput => "bad-output",
        AdmissionError::BadOutputAmt => "bad-output-amt",
        AdmissionError::MissingSig => "missing-sig",
        AdmissionError::BadSignature => "bad-signature",
        AdmissionError::InsufficientInput => "insufficient-input",
        AdmissionError::DoubleSpend { .. } => "double-spend",
        AdmissionError::AlreadyExists => "already-exists",
    }
    .to_string()
}

/// `TxSubmit{tx} → {accepted, txid} | {accepted:false, error, txid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSubmitRequest {
    pub tx: WireTransaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxSubmitResponse {
    pub accepted: bool,
    pub txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn handle_tx_submit(
    store: &mut dyn Store,
    params: &ChainParams,
    req: TxSubmitRequest,
    now_ms: u64,
) -> TxSubmitResponse {
    let txid = hash::canonical_tx_digest(&req.tx);
    match mempool::admit(store, &req.tx, params.mempool_min_fee, now_ms) {
        Ok(mempool::Admitted::New(entry)) => {
            store.put_tx_record(TransactionRecord {
                txid: entry.txid,
                raw: entry.raw.clone(),
                fee_sats: entry.fee_sats,
                added_at_ms: entry.added_at_ms,
                in_block_hash: None,
            });
            store.mempool_insert(entry);
            TxSubmitResponse {
                accepted: true,
                txid: hex32(txid),
                error: None,
            }
        }
        Ok(mempool::Admitted::Existing(entry)) => TxSubmitResponse {
            accepted: true,
            txid: hex32(entry.txid),
            error: None,
        },
        Err(e) => TxSubmitResponse {
            accepted: false,
            txid: hex32(txid),
            error: Some(admission_error_kind(&e)),
        },
    }
}

/// Ticketed solo RPC (§4.6, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTicketRequest {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTicketResponse {
    pub ticket_id: String,
    pub payload: crate::node::TicketPayload,
    pub sig: String,
}

pub fn handle_get_ticket(
    store: &mut dyn Store,
    params: &ChainParams,
    req: GetTicketRequest,
    now_ms: u64,
) -> GetTicketResponse {
    let ticket = crate::node::issue_ticket(store, params, &req.addr, now_ms);
    GetTicketResponse {
        ticket_id: ticket.ticket_id,
        payload: ticket.payload,
        sig: ticket.sig,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitNearTargetRequest {
    pub ticket_id: String,
    pub addr: String,
    pub nonce: u32,
    pub digest_hex: String,
    pub proof_level: f64,
    pub payload: crate::node::TicketPayload,
    pub sig: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitNearTargetResponse {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn ticket_from_request(ticket_id: String, payload: crate::node::TicketPayload, sig: String) -> crate::node::Ticket {
    crate::node::Ticket { ticket_id, payload, sig }
}

pub fn handle_submit_near_target(
    store: &mut dyn Store,
    params: &ChainParams,
    req: SubmitNearTargetRequest,
    now_ms: u64,
) -> SubmitNearTargetResponse {
    let digest = match Hash256::from_hex(&req.digest_hex) {
        Some(d) => d,
        None => {
            return SubmitNearTargetResponse {
                accepted: false,
                error: Some("bad-format".to_string()),
            }
        }
    };
    let ticket = ticket_from_request(req.ticket_id, req.payload, req.sig);
    match crate::node::submit_near_target(store, params, &ticket, req.nonce, &digest, req.proof_level, now_ms) {
        Ok(()) => SubmitNearTargetResponse { accepted: true, error: None },
        Err(e) => SubmitNearTargetResponse {
            accepted: false,
            error: Some(node_error_kind(&e)),
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitBlockTicketRequest {
    pub ticket_id: String,
    pub addr: String,
    pub nonce: u32,
    pub version: u32,
    pub timestamp: u64,
    pub merkle_root_hex: String,
    pub payload: crate::node::TicketPayload,
    pub sig: String,
}

pub fn handle_submit_block_ticket(
    store: &mut dyn Store,
    params: &ChainParams,
    req: SubmitBlockTicketRequest,
    now_ms: u64,
) -> SubmitWorkResponse {
    let merkle_root = match parse_hex32(&req.merkle_root_hex) {
        Some(h) => h,
        None => return SubmitWorkResponse::rejected("bad-format".to_string()),
    };
    let job_id = req.ticket_id.clone();
    let ticket = ticket_from_request(req.ticket_id, req.payload, req.sig);
    match crate::node::submit_block(store, params, &ticket, req.nonce, req.version, req.timestamp, merkle_root, now_ms) {
        Ok(accepted) => submit_work_accepted(accepted, job_id),
        Err(e) => SubmitWorkResponse::rejected(node_error_kind(&e)),
    }
}

/// Pool session line protocol (§4.8, §6): one JSON object per line, in
/// either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolClientMessage {
    Subscribe,
    Authorize { address: String },
    GetJob,
    Submit {
        address: String,
        job_id: String,
        nonce: u64,
        timestamp: u64,
        merkle_root_hex: String,
        version: u32,
        prev_hash_hex: Option<String>,
    },
}

/// Everything a miner needs to reconstruct the same header bytes the server
/// will verify: `height` and `txids` let it rebuild the canonical tx list
/// (coinbase included) and merkle root locally, since the miner's own
/// address only enters via the coinbase, never the wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    pub height: u32,
    pub prev_hash: String,
    pub version: u32,
    pub target: String,
    pub timestamp: u64,
    pub tx_count: u32,
    pub txids: Vec<String>,
}

impl From<&Job> for JobTemplate {
    fn from(job: &Job) -> Self {
        Self {
            height: job.height,
            prev_hash: hex32(job.prev_hash),
            version: job.version,
            target: job.target.to_hex(),
            timestamp: job.timestamp,
            tx_count: job.tx_count,
            txids: job.txids_snapshot.iter().map(|t| hex32(*t)).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PoolServerMessage {
    Subscribed { session_id: String },
    Authorized { ok: bool },
    Job {
        job_id: String,
        template: JobTemplate,
        pool_target: String,
        share_diff: u64,
    },
    Notify {
        job_id: String,
        template: JobTemplate,
        pool_target: String,
        share_diff: u64,
    },
    SubmitOk,
    SubmitErr { error: String },
}

fn job_message(job: &Job, pool_target: &str, share_diff: u64, is_notify: bool) -> PoolServerMessage {
    let template = JobTemplate::from(job);
    if is_notify {
        PoolServerMessage::Notify {
            job_id: job.job_id.clone(),
            template,
            pool_target: pool_target.to_string(),
            share_diff,
        }
    } else {
        PoolServerMessage::Job {
            job_id: job.job_id.clone(),
            template,
            pool_target: pool_target.to_string(),
            share_diff,
        }
    }
}

/// Shared state handed to every pool connection: the store, chain params,
/// work-independent pool session table, and the fixed share difficulty this
/// deployment mines at.
pub struct PoolState<S: Store> {
    pub store: Mutex<S>,
    pub params: ChainParams,
    pub pool: Mutex<PoolService>,
    pub share_difficulty: u64,
}

impl<S: Store> PoolState<S> {
    pub fn new(store: S, params: ChainParams, share_difficulty: u64) -> Self {
        Self {
            store: Mutex::new(store),
            params,
            pool: Mutex::new(PoolService::new(share_difficulty)),
            share_difficulty,
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Dispatch one decoded client message for a single session against shared
/// pool state, returning the message(s) to write back. `session_id` is
/// `None` until `Subscribe` has been handled.
pub fn handle_pool_message<S: Store>(
    state: &PoolState<S>,
    session_id: &mut Option<String>,
    msg: PoolClientMessage,
) -> Vec<PoolServerMessage> {
    let now = now_ms();
    match msg {
        PoolClientMessage::Subscribe => {
            let mut pool = state.pool.lock();
            let store = state.store.lock();
            pool.refresh_job(&*store, &state.params, now);
            let sid = pool.subscribe();
            *session_id = Some(sid.clone());
            let mut out = vec![PoolServerMessage::Subscribed { session_id: sid }];
            if let Some(job) = pool.current_job() {
                let pool_target = hash::target_from_difficulty(state.share_difficulty).to_hex();
                out.push(job_message(job, &pool_target, state.share_difficulty, false));
            }
            out
        }
        PoolClientMessage::Authorize { address } => {
            let Some(sid) = session_id.clone() else {
                return vec![PoolServerMessage::Authorized { ok: false }];
            };
            let mut pool = state.pool.lock();
            let ok = pool.authorize(&sid, address);
            vec![PoolServerMessage::Authorized { ok }]
        }
        PoolClientMessage::GetJob => {
            let mut pool = state.pool.lock();
            let store = state.store.lock();
            pool.refresh_job(&*store, &state.params, now);
            match pool.current_job() {
                Some(job) => {
                    let pool_target = hash::target_from_difficulty(state.share_difficulty).to_hex();
                    vec![job_message(job, &pool_target, state.share_difficulty, false)]
                }
                None => vec![PoolServerMessage::SubmitErr {
                    error: "unknown-or-expired-job".to_string(),
                }],
            }
        }
        PoolClientMessage::Submit {
            address,
            job_id,
            nonce,
            timestamp,
            merkle_root_hex,
            version,
            prev_hash_hex,
        } => {
            let Some(sid) = session_id.clone() else {
                return vec![PoolServerMessage::SubmitErr {
                    error: "addr-mismatch".to_string(),
                }];
            };
            let Some(merkle_root) = parse_hex32(&merkle_root_hex) else {
                return vec![PoolServerMessage::SubmitErr {
                    error: "bad-format".to_string(),
                }];
            };
            let prev_hash = match prev_hash_hex.as_deref() {
                Some(s) => match parse_hex32(s) {
                    Some(h) => Some(h),
                    None => {
                        return vec![PoolServerMessage::SubmitErr {
                            error: "bad-format".to_string(),
                        }]
                    }
                },
                None => None,
            };
            let mut pool = state.pool.lock();
            let mut store = state.store.lock();
            match pool.submit(
                &mut *store,
                &state.params,
                &sid,
                &address,
                &job_id,
                nonce,
                timestamp,
                merkle_root,
                version,
                prev_hash,
                now,
            ) {
                Ok(PoolSubmitOutcome::Share) => vec![PoolServerMessage::SubmitOk],
                Ok(PoolSubmitOutcome::Block(_)) => vec![PoolServerMessage::SubmitOk],
                Err(e) => vec![PoolServerMessage::SubmitErr {
                    error: node_error_kind(&e),
                }],
            }
        }
    }
}

/// Run the pool's line-delimited JSON protocol over a single accepted
/// connection until EOF or a decode error.
async fn serve_pool_connection<S: Store + Send + 'static>(
    socket: TcpStream,
    state: Arc<PoolState<S>>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut session_id: Option<String> = None;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let responses = match serde_json::from_str::<PoolClientMessage>(&line) {
            Ok(msg) => handle_pool_message(&state, &mut session_id, msg),
            Err(_) => vec![PoolServerMessage::SubmitErr {
                error: "bad-format".to_string(),
            }],
        };
        for resp in responses {
            let mut encoded = serde_json::to_vec(&resp).expect("pool server message always serializes");
            encoded.push(b'\n');
            write_half.write_all(&encoded).await?;
        }
    }
    Ok(())
}

/// Accept connections on `addr` and serve the pool protocol on each one
/// (§4.8). Runs until the listener itself errors; callers typically spawn
/// this as a background task.
pub async fn run_pool_server<S: Store + Send + 'static>(
    addr: &str,
    state: Arc<PoolState<S>>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (socket, _) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = serve_pool_connection(socket, state).await {
                tracing::debug!(error = %e, "pool connection closed");
            }
        });
    }
}
