//! Work service, ticketed solo mining, and pool service (§4.6, §4.8).
//!
//! Three orchestration layers sit on top of [`solidus_consensus`] here, all
//! sharing the same shape: snapshot the tip and a mempool selection into a
//! short-lived job, then on submission rebuild the authoritative txid list
//! and hand it to [`accept_external_header`]. The work service and pool
//! service keep an explicit job table; ticketed solo mining is stateless —
//! the ticket itself is a signed, self-contained lease (§9: "re-architect as
//! an explicitly-passed service context", which this module follows by
//! taking `&mut dyn Store` rather than touching any process-global state).

use std::collections::HashMap;

use hmac::{Hmac, Mac};
use rand::Rng;
use sha3::Sha3_256;

use solidus_consensus::{
    accept_external_header, AcceptedHeader, EngineError, ExternalHeaderSubmission,
};
use solidus_core::chain_state::Store;
use solidus_core::constants::ChainParams;
use solidus_core::error::AcceptanceError;
use solidus_core::hash::{self, bytes32_to_biguint, biguint_to_bytes32};
use solidus_core::header::{self, GENESIS_PREV_HASH};
use solidus_core::mempool;
use solidus_core::types::{amount_to_sats, Bytes32, Hash256, MempoolEntry};

type HmacSha3_256 = Hmac<Sha3_256>;

/// Errors a work/pool/ticket caller can see: the service-level rejections
/// from §7 plus whatever `accept_external_header` itself reports.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error(transparent)]
    Acceptance(#[from] AcceptanceError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// The next-block template a job snapshots: tip, retarget target, and the
/// mempool selection a miner will build its header around (§4.5.6 steps 1-2).
fn build_template(
    store: &dyn Store,
    params: &ChainParams,
) -> (u32, Hash256, Bytes32, Vec<Hash256>, u32) {
    let (tip_height, tip_hash) = store.tip();
    let is_genesis = store.is_empty();
    let next_height: u32 = if is_genesis { 0 } else { tip_height + 1 };
    let prev_hash = if is_genesis { GENESIS_PREV_HASH } else { tip_hash };

    let ancestors: Vec<solidus_core::difficulty::RetargetHeader> = store
        .recent_headers(params.retarget_window)
        .into_iter()
        .map(|h| solidus_core::difficulty::RetargetHeader {
            timestamp: h.timestamp,
            cumulative_work: h.cumulative_work,
        })
        .collect();
    let diff = solidus_core::difficulty::next_difficulty(
        next_height,
        &ancestors,
        params.bootstrap_coinbase_only_below_height,
        params.target_block_time_sec,
        params.difficulty_initial,
        params.difficulty_min,
        params.difficulty_max,
        params.retarget_window,
        params.retarget_clamp,
    );
    let target = hash::target_from_difficulty(diff);

    let min_fee_sats = amount_to_sats(params.mempool_min_fee).unwrap_or(0);
    let txids_snapshot: Vec<Hash256> = if next_height < params.bootstrap_coinbase_only_below_height {
        Vec::new()
    } else {
        mempool::query(store, None)
            .into_iter()
            .filter(|e: &MempoolEntry| e.amount_sats > 0 && e.fee_sats >= min_fee_sats)
            .take(params.txs_per_block_cap)
            .map(|e| e.txid)
            .collect()
    };

    let coinbase_txid = header::coinbase_txid(next_height);
    let tx_count = header::canonical_txids(
        next_height,
        coinbase_txid,
        &txids_snapshot,
        params.bootstrap_coinbase_only_below_height,
    )
    .len() as u32;

    (next_height, prev_hash, target, txids_snapshot, tx_count)
}

fn random_hex_id(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(buf.as_mut_slice());
    hex::encode(buf)
}

/// A job snapshot held by [`WorkService`] or [`PoolService`] (§4.6 state).
#[derive(Debug, Clone)]
pub struct Job {
    pub job_id: String,
    pub issued_ms: u64,
    pub ttl_ms: u64,
    pub height: u32,
    pub prev_hash: Hash256,
    pub target: Bytes32,
    pub version: u32,
    pub timestamp: u64,
    pub txids_snapshot: Vec<Hash256>,
    pub tx_count: u32,
    pub miner_hint: Option<String>,
}

impl Job {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.issued_ms.saturating_add(self.ttl_ms)
    }
}

/// Ephemeral job table keyed by job_id (§4.6). TTL = 5 minutes by default
/// (`ChainParams::work_job_ttl_ms`); expired jobs are removed lazily on
/// access, never by a background sweep.
pub struct WorkService {
    jobs: HashMap<String, Job>,
}

impl Default for WorkService {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkService {
    pub fn new() -> Self {
        Self { jobs: HashMap::new() }
    }

    fn purge_expired(&mut self, now_ms: u64) {
        self.jobs.retain(|_, job| !job.is_expired(now_ms));
    }

    /// Snapshot the current tip and mempool into a fresh job (§4.6
    /// `get_work`).
    pub fn get_work(
        &mut self,
        store: &dyn Store,
        params: &ChainParams,
        miner_hint: Option<String>,
        now_ms: u64,
    ) -> Job {
        self.purge_expired(now_ms);
        let (height, prev_hash, target, txids_snapshot, tx_count) = build_template(store, params);
        let job = Job {
            job_id: random_hex_id(16),
            issued_ms: now_ms,
            ttl_ms: params.work_job_ttl_ms,
            height,
            prev_hash,
            target,
            version: params.block_version,
            timestamp: now_ms / 1000,
            txids_snapshot,
            tx_count,
            miner_hint,
        };
        self.jobs.insert(job.job_id.clone(), job.clone());
        job
    }

    /// Resolve `job_id`, validate the optional `prev_hash` the miner echoed
    /// back, rebuild the authoritative txid list, and accept the header
    /// (§4.6 `submit_work`). Removes the job only on success, so a
    /// transiently-rejected submit can be retried against the same job.
    #[allow(clippy::too_many_arguments)]
    pub fn submit_work(
        &mut self,
        store: &mut dyn Store,
        params: &ChainParams,
        job_id: &str,
        miner_address: &str,
        nonce: u64,
        timestamp: u64,
        version: u32,
        merkle_root: Hash256,
        prev_hash: Option<Hash256>,
        now_ms: u64,
    ) -> Result<AcceptedHeader, NodeError> {
        self.purge_expired(now_ms);
        let job = self
            .jobs
            .get(job_id)
            .cloned()
            .ok_or(AcceptanceError::UnknownOrExpiredJob)?;
        if let Some(submitted_prev) = prev_hash {
            if submitted_prev != job.prev_hash {
                return Err(AcceptanceError::PrevMismatch.into());
            }
        }

        let submission = ExternalHeaderSubmission {
            prev_hash: job.prev_hash,
            version,
            timestamp,
            nonce,
            miner_address: miner_address.to_string(),
            merkle_root,
            txids_snapshot: job.txids_snapshot.clone(),
        };
        let accepted = accept_external_header(store, params, submission, now_ms)?;
        self.jobs.remove(job_id);
        Ok(accepted)
    }
}

/// Canonical JSON payload signed by [`issue_ticket`] (§4.6 ticketed solo
/// mining). `height`/`txids_snapshot` are folded into the signed payload
/// (not in the wire spec's informal description) so a ticket cannot be
/// replayed against a different tip or have its tx selection substituted
/// without invalidating the signature.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TicketPayload {
    pub addr: String,
    pub height: u32,
    pub prev_hash: Hash256,
    pub target: Bytes32,
    pub version: u32,
    pub issued_ms: u64,
    pub valid_to: u64,
    pub nonce_start: u32,
    pub nonce_window: u32,
    pub seed: String,
    pub txids_snapshot: Vec<Hash256>,
}

#[derive(Debug, Clone)]
pub struct Ticket {
    pub ticket_id: String,
    pub payload: TicketPayload,
    pub sig: String,
}

const TICKET_SECRET_KV_KEY: &str = "ticket_secret_hex";

fn ensure_ticket_secret(store: &mut dyn Store) -> Vec<u8> {
    if let Some(hex_secret) = store.kv_get(TICKET_SECRET_KV_KEY) {
        if let Ok(bytes) = hex::decode(&hex_secret) {
            return bytes;
        }
    }
    let secret: Vec<u8> = (0..32).map(|_| rand::thread_rng().r#gen()).collect();
    store.kv_put(TICKET_SECRET_KV_KEY, hex::encode(&secret));
    secret
}

fn sign_payload(secret: &[u8], payload: &TicketPayload) -> String {
    let bytes = serde_json::to_vec(payload).expect("ticket payload always serializes");
    let mut mac = HmacSha3_256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(&bytes);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_ticket_sig(store: &mut dyn Store, ticket: &Ticket) -> bool {
    let secret = ensure_ticket_secret(store);
    let expected = sign_payload(&secret, &ticket.payload);
    expected == ticket.sig
}

/// Issue a signed, short-lived lease binding `addr` to the current tip and a
/// nonce window (§4.6 `issue_ticket`).
pub fn issue_ticket(store: &mut dyn Store, params: &ChainParams, addr: &str, now_ms: u64) -> Ticket {
    let (height, prev_hash, target, txids_snapshot, _tx_count) = build_template(store, params);
    let nonce_window = params.ticket_nonce_window();
    let payload = TicketPayload {
        addr: addr.to_string(),
        height,
        prev_hash,
        target,
        version: params.block_version,
        issued_ms: now_ms,
        valid_to: now_ms + params.ticket_window_ms,
        nonce_start: rand::thread_rng().r#gen(),
        nonce_window,
        seed: random_hex_id(16),
        txids_snapshot,
    };
    let secret = ensure_ticket_secret(store);
    let sig = sign_payload(&secret, &payload);
    Ticket {
        ticket_id: random_hex_id(16),
        payload,
        sig,
    }
}

fn validate_ticket_common(store: &mut dyn Store, ticket: &Ticket, nonce: u32, now_ms: u64) -> Result<(), AcceptanceError> {
    if !verify_ticket_sig(store, ticket) {
        return Err(AcceptanceError::BadTicketSignature);
    }
    if now_ms > ticket.payload.valid_to {
        return Err(AcceptanceError::TicketExpired);
    }
    let window_end = ticket
        .payload
        .nonce_start
        .checked_add(ticket.payload.nonce_window)
        .unwrap_or(u32::MAX);
    if nonce < ticket.payload.nonce_start || nonce >= window_end {
        return Err(AcceptanceError::NonceOutOfWindow);
    }
    Ok(())
}

/// Credit a near-target proof toward the ticket holder's fairness share
/// without extending the chain (§4.6 `submit_near_target`, §9 glossary
/// "near-target proof"). `digest` must meet `target << ticket_near_target_shift`.
pub fn submit_near_target(
    store: &mut dyn Store,
    params: &ChainParams,
    ticket: &Ticket,
    nonce: u32,
    digest: &Bytes32,
    proof_level: f64,
    now_ms: u64,
) -> Result<(), NodeError> {
    validate_ticket_common(store, ticket, nonce, now_ms)?;

    let shift = params.ticket_near_target_shift;
    let near_target_int = bytes32_to_biguint(&ticket.payload.target) << shift;
    let max_int = bytes32_to_biguint(&Bytes32([0xff; 32]));
    let near_target = biguint_to_bytes32(&near_target_int.min(max_int));
    if !hash::meets_target(digest, &near_target) {
        return Err(AcceptanceError::NotANearTarget.into());
    }

    let (epoch_start, _) = solidus_core::fairness::epoch_bounds(
        ticket.payload.height as u64,
        params.fairness_epoch_length_main,
    );
    solidus_core::fairness::ensure_epoch(
        store,
        ticket.payload.height as u64,
        params.fairness_epoch_length_main,
        params.fairness_pool_ratio,
    );
    store.add_credit(epoch_start, &ticket.payload.addr, proof_level, now_ms);
    Ok(())
}

/// Redeem a ticket for a fully-mined block (§4.6 `submit_block`).
#[allow(clippy::too_many_arguments)]
pub fn submit_block(
    store: &mut dyn Store,
    params: &ChainParams,
    ticket: &Ticket,
    nonce: u32,
    version: u32,
    timestamp: u64,
    merkle_root: Hash256,
    now_ms: u64,
) -> Result<AcceptedHeader, NodeError> {
    validate_ticket_common(store, ticket, nonce, now_ms)?;

    let submission = ExternalHeaderSubmission {
        prev_hash: ticket.payload.prev_hash,
        version,
        timestamp,
        nonce: nonce as u64,
        miner_address: ticket.payload.addr.clone(),
        merkle_root,
        txids_snapshot: ticket.payload.txids_snapshot.clone(),
    };
    Ok(accept_external_header(store, params, submission, now_ms)?)
}

/// Per-connection state tracked by [`PoolService`] (§4.8).
#[derive(Debug, Clone, Default)]
pub struct PoolSession {
    pub address: Option<String>,
    pub accepted_shares: u64,
    pub rejected_shares: u64,
    pub last_submit_ms: u64,
}

/// Outcome of a pool submit: either a verified share or a block promotion
/// that has already been accepted onto the chain.
#[derive(Debug)]
pub enum PoolSubmitOutcome {
    Share,
    Block(AcceptedHeader),
}

/// Line-delimited-JSON pool protocol state (§4.8). One current job is
/// shared by every subscribed session; `refresh_job` regenerates it when the
/// tip or mempool selection has moved, and callers are expected to push the
/// new job to subscribers (the actual line-protocol I/O is a transport
/// concern left to the caller, per §1).
pub struct PoolService {
    sessions: HashMap<String, PoolSession>,
    current_job: Option<Job>,
    share_difficulty: u64,
}

impl PoolService {
    pub fn new(share_difficulty: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            current_job: None,
            share_difficulty,
        }
    }

    pub fn subscribe(&mut self) -> String {
        let session_id = random_hex_id(12);
        self.sessions.insert(session_id.clone(), PoolSession::default());
        session_id
    }

    pub fn authorize(&mut self, session_id: &str, address: String) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                session.address = Some(address);
                true
            }
            None => false,
        }
    }

    pub fn session(&self, session_id: &str) -> Option<&PoolSession> {
        self.sessions.get(session_id)
    }

    pub fn current_job(&self) -> Option<&Job> {
        self.current_job.as_ref()
    }

    /// Rebuild the shared job if the tip has moved or no job has been issued
    /// yet. Returns `true` when the job changed, signalling the caller to
    /// push `notify` to every subscribed session (§4.8 "server pushes
    /// current job on subscribe and on job change").
    pub fn refresh_job(&mut self, store: &dyn Store, params: &ChainParams, now_ms: u64) -> bool {
        let (height, prev_hash, target, txids_snapshot, tx_count) = build_template(store, params);
        let changed = match &self.current_job {
            Some(job) => job.prev_hash != prev_hash || job.height != height,
            None => true,
        };
        if changed {
            self.current_job = Some(Job {
                job_id: random_hex_id(16),
                issued_ms: now_ms,
                ttl_ms: params.work_job_ttl_ms,
                height,
                prev_hash,
                target,
                version: params.block_version,
                timestamp: now_ms / 1000,
                txids_snapshot,
                tx_count,
                miner_hint: None,
            });
        }
        changed
    }

    /// Verify a submit against the current job: stale-job/same-prev-override
    /// rules (§4.8), share-vs-block promotion, and — on promotion — accepts
    /// the block onto the chain.
    #[allow(clippy::too_many_arguments)]
    pub fn submit(
        &mut self,
        store: &mut dyn Store,
        params: &ChainParams,
        session_id: &str,
        address: &str,
        job_id: &str,
        nonce: u64,
        timestamp: u64,
        merkle_root: Hash256,
        version: u32,
        prev_hash: Option<Hash256>,
        now_ms: u64,
    ) -> Result<PoolSubmitOutcome, NodeError> {
        // The session must have authorized at least once (the pool's
        // admission gate), but attribution follows the address carried on
        // this submit, not the session-bound one — a session may relay
        // shares for several sub-accounts (original_source/newproj/apps/
        // pool/stratum_server.py:264,298,335).
        self.sessions
            .get(session_id)
            .and_then(|s| s.address.as_ref())
            .ok_or(AcceptanceError::AddrMismatch)?;
        let address = address.to_string();

        let job = self.current_job.clone().ok_or(AcceptanceError::UnknownOrExpiredJob)?;
        let is_current = job.job_id == job_id;
        let same_prev_override = prev_hash.map(|p| p == job.prev_hash).unwrap_or(false);
        if !is_current && !same_prev_override {
            if let Some(session) = self.sessions.get_mut(session_id) {
                session.rejected_shares += 1;
                session.last_submit_ms = now_ms;
            }
            return Err(AcceptanceError::StaleJob.into());
        }

        let header_bytes = header::header_serialize(
            version,
            &job.prev_hash,
            &merkle_root,
            timestamp,
            &job.target,
            nonce,
            &address,
            job.tx_count,
        );
        let digest = hash::pow_digest(
            &header_bytes,
            nonce,
            &job.prev_hash,
            params.argon2_time_cost,
            params.argon2_memory_mib,
            params.argon2_parallelism,
        );

        let share_target = hash::target_from_difficulty(self.share_difficulty);
        if !hash::meets_target(&digest, &share_target) {
            if let Some(session) = self.sessions.get_mut(session_id) {
                session.rejected_shares += 1;
                session.last_submit_ms = now_ms;
            }
            return Err(AcceptanceError::NotANearTarget.into());
        }

        if let Some(session) = self.sessions.get_mut(session_id) {
            session.accepted_shares += 1;
            session.last_submit_ms = now_ms;
        }

        if !hash::meets_target(&digest, &job.target) {
            return Ok(PoolSubmitOutcome::Share);
        }

        let submission = ExternalHeaderSubmission {
            prev_hash: job.prev_hash,
            version,
            timestamp,
            nonce,
            miner_address: address,
            merkle_root,
            txids_snapshot: job.txids_snapshot.clone(),
        };
        let accepted = accept_external_header(store, params, submission, now_ms)?;
        Ok(PoolSubmitOutcome::Block(accepted))
    }
}
