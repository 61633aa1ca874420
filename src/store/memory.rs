//! In-memory implementation of `LedgerStore`.
//!
//! All tenants live in one map behind a `tokio::sync::Mutex`; each trait
//! call takes the lock once, which is what makes `conditional_append` and
//! `write_checkpoint` atomic. Used by unit tests, by offline verification of
//! exported ledgers, and anywhere a process-local ledger is enough.
//!
//! With the `test-util` feature (always on in unit tests) failure
//! injection and tampering hooks exercise the store-unavailable,
//! checkpoint-commit, erasure-failure and divergence paths.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::checkpoint::Checkpoint;
use crate::audit::event::{AuditEvent, SequenceRange};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{AppendOutcome, ChainTail, CheckpointOutcome, LedgerStore};

#[derive(Default)]
struct TenantLedger {
    events: BTreeMap<u64, AuditEvent>,
    idempotency: HashMap<String, u64>,
    checkpoints: Vec<Checkpoint>,
    erased_checkpoints: HashSet<Uuid>,
    lease: Option<(String, Instant)>,
}

#[derive(Default)]
struct Faults {
    unavailable: AtomicBool,
    failing_erasures: AtomicU32,
    failing_checkpoint_commits: AtomicU32,
}

impl Faults {
    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    tenants: Arc<Mutex<HashMap<String, TenantLedger>>>,
    faults: Arc<Faults>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store holding exactly the given records, bypassing the
    /// conditional write. Used to replay ledgers loaded from an export.
    pub async fn from_records(events: Vec<AuditEvent>, checkpoints: Vec<Checkpoint>) -> Self {
        let store = Self::new();
        {
            let mut tenants = store.tenants.lock().await;
            for event in events {
                tenants
                    .entry(event.tenant_id.clone())
                    .or_default()
                    .events
                    .insert(event.sequence, event);
            }
            for checkpoint in checkpoints {
                tenants
                    .entry(checkpoint.tenant_id.clone())
                    .or_default()
                    .checkpoints
                    .push(checkpoint);
            }
            for ledger in tenants.values_mut() {
                ledger.checkpoints.sort_by_key(|c| c.covered_range.from_seq);
            }
        }
        store
    }

    fn check_available(&self) -> LedgerResult<()> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

/// Failure injection and tampering, for exercising detection paths.
#[cfg(any(test, feature = "test-util"))]
impl InMemoryLedgerStore {
    /// Make every call fail with `StoreUnavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `delete_payloads`.
    pub fn fail_next_erasures(&self, count: u32) {
        self.faults.failing_erasures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` calls to `write_checkpoint`.
    pub fn fail_next_checkpoint_commits(&self, count: u32) {
        self.faults.failing_checkpoint_commits.store(count, Ordering::SeqCst);
    }

    /// Mutate a stored event in place, as an attacker with store access could.
    pub async fn tamper<F>(&self, tenant_id: &str, sequence: u64, mutate: F) -> bool
    where
        F: FnOnce(&mut AuditEvent),
    {
        let mut tenants = self.tenants.lock().await;
        match tenants
            .get_mut(tenant_id)
            .and_then(|ledger| ledger.events.get_mut(&sequence))
        {
            Some(event) => {
                mutate(event);
                true
            }
            None => false,
        }
    }

    /// Physically drop a stored event, leaving a hole in the chain.
    pub async fn remove_event(&self, tenant_id: &str, sequence: u64) -> Option<AuditEvent> {
        let mut tenants = self.tenants.lock().await;
        tenants
            .get_mut(tenant_id)
            .and_then(|ledger| ledger.events.remove(&sequence))
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn read_tail(&self, tenant_id: &str) -> LedgerResult<ChainTail> {
        self.check_available()?;
        let tenants = self.tenants.lock().await;
        let tail = tenants
            .get(tenant_id)
            .and_then(|ledger| ledger.events.values().next_back())
            .map(|event| ChainTail {
                last_sequence: event.sequence,
                last_content_hash: event.content_hash,
            })
            .unwrap_or(ChainTail::EMPTY);
        Ok(tail)
    }

    async fn conditional_append(
        &self,
        expected_last_sequence: u64,
        event: &AuditEvent,
        idempotency_key: Option<&str>,
    ) -> LedgerResult<AppendOutcome> {
        self.check_available()?;
        if event.sequence != expected_last_sequence + 1 {
            return Err(LedgerError::InvalidEvent(format!(
                "sequence {} does not follow expected tail {}",
                event.sequence, expected_last_sequence
            )));
        }

        let mut tenants = self.tenants.lock().await;
        let ledger = tenants.entry(event.tenant_id.clone()).or_default();

        if let Some(key) = idempotency_key {
            if let Some(seq) = ledger.idempotency.get(key) {
                let existing = ledger.events.get(seq).cloned().ok_or_else(|| {
                    LedgerError::corrupt(format!("idempotency key {} points at missing event {}", key, seq))
                })?;
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }

        let tail = ledger.events.keys().next_back().copied().unwrap_or(0);
        if tail != expected_last_sequence {
            return Ok(AppendOutcome::Conflict);
        }

        ledger.events.insert(event.sequence, event.clone());
        if let Some(key) = idempotency_key {
            ledger.idempotency.insert(key.to_string(), event.sequence);
        }
        Ok(AppendOutcome::Appended)
    }

    async fn read_range(&self, tenant_id: &str, range: SequenceRange) -> LedgerResult<Vec<AuditEvent>> {
        self.check_available()?;
        let tenants = self.tenants.lock().await;
        Ok(tenants
            .get(tenant_id)
            .map(|ledger| {
                ledger
                    .events
                    .range(range.from_seq..=range.to_seq)
                    .map(|(_, event)| event.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_checkpoints(&self, tenant_id: &str) -> LedgerResult<Vec<Checkpoint>> {
        self.check_available()?;
        let tenants = self.tenants.lock().await;
        Ok(tenants
            .get(tenant_id)
            .map(|ledger| ledger.checkpoints.clone())
            .unwrap_or_default())
    }

    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> LedgerResult<CheckpointOutcome> {
        self.check_available()?;
        if Faults::take(&self.faults.failing_checkpoint_commits) {
            return Err(LedgerError::StoreUnavailable(
                "injected checkpoint commit failure".to_string(),
            ));
        }

        let mut tenants = self.tenants.lock().await;
        let ledger = tenants.entry(checkpoint.tenant_id.clone()).or_default();
        let boundary = ledger
            .checkpoints
            .last()
            .map(|c| c.covered_range.to_seq)
            .unwrap_or(0);
        let tail = ledger.events.keys().next_back().copied().unwrap_or(0);

        if checkpoint.covered_range.from_seq != boundary + 1 || checkpoint.covered_range.to_seq > tail {
            return Ok(CheckpointOutcome::Overlap);
        }

        ledger.checkpoints.push(checkpoint.clone());
        Ok(CheckpointOutcome::Committed)
    }

    async fn delete_payloads(&self, tenant_id: &str, range: SequenceRange) -> LedgerResult<u64> {
        self.check_available()?;
        if Faults::take(&self.faults.failing_erasures) {
            return Err(LedgerError::StoreUnavailable(
                "injected payload erasure failure".to_string(),
            ));
        }

        let mut tenants = self.tenants.lock().await;
        let mut erased = 0;
        if let Some(ledger) = tenants.get_mut(tenant_id) {
            for (_, event) in ledger.events.range_mut(range.from_seq..=range.to_seq) {
                if event.payload.take().is_some() {
                    erased += 1;
                }
            }
        }
        Ok(erased)
    }

    async fn pending_erasures(&self, limit: usize) -> LedgerResult<Vec<Checkpoint>> {
        self.check_available()?;
        let tenants = self.tenants.lock().await;
        let mut pending: Vec<Checkpoint> = tenants
            .values()
            .flat_map(|ledger| {
                ledger.checkpoints.iter().filter(move |c| {
                    c.action.erases_payloads() && !ledger.erased_checkpoints.contains(&c.checkpoint_id)
                })
            })
            .cloned()
            .collect();
        pending.sort_by_key(|c| c.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_payloads_erased(&self, tenant_id: &str, checkpoint_id: Uuid) -> LedgerResult<()> {
        self.check_available()?;
        let mut tenants = self.tenants.lock().await;
        if let Some(ledger) = tenants.get_mut(tenant_id) {
            ledger.erased_checkpoints.insert(checkpoint_id);
        }
        Ok(())
    }

    async fn try_acquire_retention_lease(
        &self,
        tenant_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> LedgerResult<bool> {
        self.check_available()?;
        let mut tenants = self.tenants.lock().await;
        let ledger = tenants.entry(tenant_id.to_string()).or_default();
        let now = Instant::now();

        match &ledger.lease {
            Some((current, expires)) if current != holder && *expires > now => Ok(false),
            _ => {
                ledger.lease = Some((holder.to_string(), now + ttl));
                Ok(true)
            }
        }
    }

    async fn release_retention_lease(&self, tenant_id: &str, holder: &str) -> LedgerResult<()> {
        self.check_available()?;
        let mut tenants = self.tenants.lock().await;
        if let Some(ledger) = tenants.get_mut(tenant_id) {
            if matches!(&ledger.lease, Some((current, _)) if current == holder) {
                ledger.lease = None;
            }
        }
        Ok(())
    }

    async fn tenants(&self) -> LedgerResult<Vec<String>> {
        self.check_available()?;
        let tenants = self.tenants.lock().await;
        let mut ids: Vec<String> = tenants
            .iter()
            .filter(|(_, ledger)| !ledger.events.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
