//! Retention Enforcement
//!
//! Collapses the expired prefix of a tenant's un-checkpointed events into a
//! checkpoint, then erases the covered payloads. Ordering matters:
//!
//! 1. the expired range is replayed and must be intact,
//! 2. the checkpoint is committed (all or nothing),
//! 3. only then are payloads erased; hashes and sequences stay.
//!
//! A failed erasure leaves the committed checkpoint in place and is picked
//! up again by `retry_pending_erasures`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::cancel::CancelToken;
use crate::audit::checkpoint::{Checkpoint, RetentionPolicy};
use crate::audit::event::{ContentHash, SequenceRange};
use crate::audit::merkle::RollupKind;
use crate::audit::verify::Replay;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{CheckpointOutcome, LedgerStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionReceipt {
    pub checkpoint: Checkpoint,
    /// False for archive checkpoints and for erasures deferred to a retry.
    pub payloads_erased: bool,
    pub erased_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErasureSweep {
    pub attempted: usize,
    pub completed: usize,
    pub payloads_erased: u64,
    pub failed: Vec<Uuid>,
}

pub struct RetentionEnforcer<S: ?Sized> {
    store: Arc<S>,
    holder: String,
    page_size: u64,
    lease_ttl: Duration,
    rollup_kind: RollupKind,
}

impl<S: LedgerStore + ?Sized> RetentionEnforcer<S> {
    pub fn new(store: Arc<S>, page_size: u64, lease_ttl: Duration, rollup_kind: RollupKind) -> Self {
        Self {
            store,
            holder: format!("retention-{}", Uuid::new_v4()),
            page_size: page_size.max(1),
            lease_ttl,
            rollup_kind,
        }
    }

    /// Checkpoint and purge the events of `tenant_id` that expired under
    /// `policy` as of `now`. Returns `None` when nothing has expired.
    pub async fn enforce(
        &self,
        tenant_id: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> LedgerResult<Option<RetentionReceipt>> {
        policy.validate()?;

        if !self
            .store
            .try_acquire_retention_lease(tenant_id, &self.holder, self.lease_ttl)
            .await?
        {
            return Err(LedgerError::RetentionInProgress {
                tenant_id: tenant_id.to_string(),
            });
        }

        let result = self.enforce_leased(tenant_id, policy, now, cancel).await;

        if let Err(e) = self.store.release_retention_lease(tenant_id, &self.holder).await {
            warn!(tenant_id = %tenant_id, error = %e, "failed to release retention lease; it will expire");
        }
        result
    }

    async fn enforce_leased(
        &self,
        tenant_id: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> LedgerResult<Option<RetentionReceipt>> {
        let checkpoints = self.store.list_checkpoints(tenant_id).await?;
        let (start, anchor) = match checkpoints.last() {
            Some(latest) => (latest.covered_range.to_seq + 1, latest.tail_hash),
            None => (1, ContentHash::GENESIS),
        };
        let tail = self.store.read_tail(tenant_id).await?;
        let cutoff = policy.cutoff(now);

        let hashes = self
            .collect_expired(tenant_id, start, anchor, tail.last_sequence, cutoff, &checkpoints, cancel)
            .await?;
        let Some(tail_hash) = hashes.last().copied() else {
            debug!(tenant_id = %tenant_id, cutoff = %cutoff, "no expired events to checkpoint");
            return Ok(None);
        };

        let covered_range = SequenceRange {
            from_seq: start,
            to_seq: start + hashes.len() as u64 - 1,
        };
        let checkpoint = Checkpoint {
            checkpoint_id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            covered_range,
            rollup_hash: self.rollup_kind.rollup(&hashes),
            rollup_kind: self.rollup_kind,
            tail_hash,
            event_count: hashes.len() as u64,
            action: policy.action,
            reason: policy.action.reason().to_string(),
            created_at: now,
        };

        match self.store.write_checkpoint(&checkpoint).await {
            Ok(CheckpointOutcome::Committed) => {}
            Ok(CheckpointOutcome::Overlap) => {
                return Err(LedgerError::CheckpointCommitFailed(format!(
                    "range {} for {} overlaps an existing checkpoint",
                    covered_range, tenant_id
                )));
            }
            Err(e) => return Err(LedgerError::CheckpointCommitFailed(e.to_string())),
        }
        info!(
            tenant_id = %tenant_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            range = %covered_range,
            rollup = %checkpoint.rollup_hash,
            reason = %checkpoint.reason,
            "checkpoint committed"
        );

        if !policy.action.erases_payloads() {
            return Ok(Some(RetentionReceipt {
                checkpoint,
                payloads_erased: false,
                erased_count: 0,
            }));
        }

        match self.erase(&checkpoint).await {
            Ok(erased_count) => Ok(Some(RetentionReceipt {
                checkpoint,
                payloads_erased: true,
                erased_count,
            })),
            Err(e) => {
                warn!(
                    tenant_id = %tenant_id,
                    checkpoint_id = %checkpoint.checkpoint_id,
                    error = %e,
                    "payload erasure deferred; checkpoint stands"
                );
                Ok(Some(RetentionReceipt {
                    checkpoint,
                    payloads_erased: false,
                    erased_count: 0,
                }))
            }
        }
    }

    /// Content hashes of the contiguous expired prefix starting at `start`,
    /// replayed against the chain as they are read.
    #[allow(clippy::too_many_arguments)]
    async fn collect_expired(
        &self,
        tenant_id: &str,
        start: u64,
        anchor: ContentHash,
        last: u64,
        cutoff: DateTime<Utc>,
        checkpoints: &[Checkpoint],
        cancel: &CancelToken,
    ) -> LedgerResult<Vec<ContentHash>> {
        let mut replay = Replay::new(start, anchor, checkpoints.to_vec());
        let mut hashes = Vec::new();
        let violation = |sequence| LedgerError::IntegrityViolation {
            tenant_id: tenant_id.to_string(),
            sequence,
        };

        let mut next = start;
        while next <= last {
            cancel.check()?;
            let to = next.saturating_add(self.page_size - 1).min(last);
            let page = self
                .store
                .read_range(tenant_id, SequenceRange { from_seq: next, to_seq: to })
                .await?;

            for event in &page {
                if event.sequence == replay.expected_sequence() && event.occurred_at >= cutoff {
                    return Ok(hashes);
                }
                replay.feed(event).map_err(|d| violation(d.sequence))?;
                hashes.push(event.content_hash);
            }
            if replay.expected_sequence() != to + 1 {
                return Err(violation(replay.expected_sequence()));
            }
            next = to + 1;
        }
        Ok(hashes)
    }

    /// Erase the payloads covered by `checkpoint` and record completion.
    /// Safe to repeat.
    pub async fn erase(&self, checkpoint: &Checkpoint) -> LedgerResult<u64> {
        let erased = self
            .store
            .delete_payloads(&checkpoint.tenant_id, checkpoint.covered_range)
            .await
            .map_err(|e| LedgerError::PayloadEraseFailed(e.to_string()))?;
        self.store
            .mark_payloads_erased(&checkpoint.tenant_id, checkpoint.checkpoint_id)
            .await
            .map_err(|e| LedgerError::PayloadEraseFailed(e.to_string()))?;

        info!(
            tenant_id = %checkpoint.tenant_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            erased,
            "payloads erased"
        );
        Ok(erased)
    }

    /// Retry erasure for checkpoints whose payloads are still present.
    pub async fn retry_pending_erasures(&self, limit: usize) -> LedgerResult<ErasureSweep> {
        let pending = self.store.pending_erasures(limit).await?;
        let mut sweep = ErasureSweep {
            attempted: pending.len(),
            ..ErasureSweep::default()
        };

        for checkpoint in &pending {
            match self.erase(checkpoint).await {
                Ok(erased) => {
                    sweep.completed += 1;
                    sweep.payloads_erased += erased;
                }
                Err(e) => {
                    warn!(
                        tenant_id = %checkpoint.tenant_id,
                        checkpoint_id = %checkpoint.checkpoint_id,
                        error = %e,
                        "payload erasure retry failed"
                    );
                    sweep.failed.push(checkpoint.checkpoint_id);
                }
            }
        }
        Ok(sweep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::append::AppendCoordinator;
    use crate::audit::checkpoint::RetentionAction;
    use crate::audit::event::NewEvent;
    use crate::audit::verify::{DivergenceKind, IntegrityVerifier};
    use crate::config::AppendConfig;
    use crate::store::InMemoryLedgerStore;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    /// Events 1..=old are 400 days old, the remaining ones are 1 day old.
    async fn seeded(old: u64, recent: u64) -> Arc<InMemoryLedgerStore> {
        let store = Arc::new(InMemoryLedgerStore::new());
        let coordinator = AppendCoordinator::new(store.clone(), AppendConfig::default());
        for i in 1..=(old + recent) {
            let age = if i <= old { 400 } else { 1 };
            let req = NewEvent::new("T1", "u1", "consent.grant", "student", format!("s-{}", i))
                .occurred_at(now() - chrono::Duration::days(age));
            coordinator.append(&req, format!("enc-{}", i).as_bytes()).await.unwrap();
        }
        store
    }

    fn enforcer(store: &Arc<InMemoryLedgerStore>, kind: RollupKind) -> RetentionEnforcer<InMemoryLedgerStore> {
        RetentionEnforcer::new(store.clone(), 2, Duration::from_secs(60), kind)
    }

    fn policy(action: RetentionAction) -> RetentionPolicy {
        RetentionPolicy::new(365, action)
    }

    #[tokio::test]
    async fn test_rollup_checkpoints_expired_prefix_and_erases() {
        let store = seeded(3, 2).await;
        let receipt = enforcer(&store, RollupKind::Flat)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(receipt.checkpoint.covered_range, SequenceRange { from_seq: 1, to_seq: 3 });
        assert_eq!(receipt.checkpoint.reason, "retention-expired");
        assert!(receipt.payloads_erased);
        assert_eq!(receipt.erased_count, 3);

        let events = store.read_range("T1", SequenceRange::new(1, 5).unwrap()).await.unwrap();
        assert!(events[..3].iter().all(|e| e.payload.is_none()));
        assert!(events[3..].iter().all(|e| e.payload.is_some()));
        assert_eq!(receipt.checkpoint.tail_hash, events[2].content_hash);

        let hashes: Vec<_> = events[..3].iter().map(|e| e.content_hash).collect();
        assert_eq!(receipt.checkpoint.rollup_hash, RollupKind::Flat.rollup(&hashes));
    }

    #[tokio::test]
    async fn test_nothing_expired() {
        let store = seeded(0, 3).await;
        let outcome = enforcer(&store, RollupKind::Flat)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap();
        assert!(outcome.is_none());
        assert!(store.list_checkpoints("T1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_run_continues_from_boundary() {
        let store = seeded(3, 0).await;
        let e = enforcer(&store, RollupKind::Merkle);
        e.enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(e
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap()
            .is_none());

        // more expired events arrive later
        let coordinator = AppendCoordinator::new(store.clone(), AppendConfig::default());
        for i in 0..2 {
            let req = NewEvent::new("T1", "u2", "disclosure", "record", format!("r-{}", i))
                .occurred_at(now() - chrono::Duration::days(500));
            coordinator.append(&req, b"late").await.unwrap();
        }
        let receipt = e
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.checkpoint.covered_range, SequenceRange { from_seq: 4, to_seq: 5 });
        assert_eq!(store.list_checkpoints("T1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_expired_range_stops_at_first_recent_event() {
        let store = seeded(2, 1).await;
        let coordinator = AppendCoordinator::new(store.clone(), AppendConfig::default());
        let late_but_old = NewEvent::new("T1", "u1", "a", "r", "x")
            .occurred_at(now() - chrono::Duration::days(900));
        coordinator.append(&late_but_old, b"enc").await.unwrap();

        let receipt = enforcer(&store, RollupKind::Flat)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(receipt.checkpoint.covered_range, SequenceRange { from_seq: 1, to_seq: 2 });
    }

    #[tokio::test]
    async fn test_archive_keeps_payloads() {
        let store = seeded(2, 0).await;
        let receipt = enforcer(&store, RollupKind::Flat)
            .enforce("T1", &policy(RetentionAction::Archive), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(!receipt.payloads_erased);
        assert_eq!(receipt.checkpoint.reason, "retention-archived");

        let events = store.read_range("T1", SequenceRange::new(1, 2).unwrap()).await.unwrap();
        assert!(events.iter().all(|e| e.payload.is_some()));
        assert!(store.pending_erasures(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_commit_failure_changes_nothing() {
        let store = seeded(3, 0).await;
        store.fail_next_checkpoint_commits(1);

        let err = enforcer(&store, RollupKind::Flat)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::CheckpointCommitFailed(_)));
        assert!(store.list_checkpoints("T1").await.unwrap().is_empty());

        let events = store.read_range("T1", SequenceRange::new(1, 3).unwrap()).await.unwrap();
        assert!(events.iter().all(|e| e.payload.is_some()));
    }

    #[tokio::test]
    async fn test_erase_failure_is_deferred_and_retried() {
        let store = seeded(3, 0).await;
        store.fail_next_erasures(1);
        let e = enforcer(&store, RollupKind::Flat);

        let receipt = e
            .enforce("T1", &policy(RetentionAction::Anonymize), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(!receipt.payloads_erased);
        assert_eq!(store.list_checkpoints("T1").await.unwrap().len(), 1);
        assert_eq!(store.pending_erasures(10).await.unwrap().len(), 1);

        let sweep = e.retry_pending_erasures(10).await.unwrap();
        assert_eq!(sweep.attempted, 1);
        assert_eq!(sweep.completed, 1);
        assert_eq!(sweep.payloads_erased, 3);
        assert!(store.pending_erasures(10).await.unwrap().is_empty());

        // idempotent
        let again = e.erase(&receipt.checkpoint).await.unwrap();
        assert_eq!(again, 0);
    }

    #[tokio::test]
    async fn test_lease_blocks_concurrent_enforcement() {
        let store = seeded(3, 0).await;
        assert!(store
            .try_acquire_retention_lease("T1", "someone-else", Duration::from_secs(60))
            .await
            .unwrap());

        let err = enforcer(&store, RollupKind::Flat)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::RetentionInProgress { .. }));
    }

    #[tokio::test]
    async fn test_corrupted_range_is_not_checkpointed() {
        let store = seeded(3, 0).await;
        store
            .tamper("T1", 2, |e| e.payload.as_mut().unwrap().push(0))
            .await;

        let err = enforcer(&store, RollupKind::Flat)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::IntegrityViolation { sequence: 2, .. }));
        assert!(store.list_checkpoints("T1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verification_survives_retention() {
        let store = seeded(4, 2).await;
        enforcer(&store, RollupKind::Merkle)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();

        let verifier = IntegrityVerifier::new(store.clone(), 3);
        let full = verifier.verify("T1", Some(1), &CancelToken::new()).await.unwrap();
        assert!(full.valid, "{}", full.summary());
        assert_eq!(full.total_checked, 6);
        assert_eq!(full.checkpoints_checked, 1);

        let from_boundary = verifier.verify("T1", None, &CancelToken::new()).await.unwrap();
        assert!(from_boundary.valid);
        assert_eq!(from_boundary.checked_from, 5);
        assert_eq!(from_boundary.total_checked, 2);
    }

    #[tokio::test]
    async fn test_edited_hash_of_erased_event_is_attributed_to_it() {
        let store = seeded(3, 1).await;
        enforcer(&store, RollupKind::Flat)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();
        store
            .tamper("T1", 3, |e| e.content_hash = ContentHash::from_bytes([4; 32]))
            .await;
        let verifier = IntegrityVerifier::new(store.clone(), 10);

        // checkpoint only partly scanned: event 4 still recomputes, so the
        // broken link is pinned on erased event 3
        let partial = verifier.verify("T1", Some(2), &CancelToken::new()).await.unwrap();
        assert_eq!(partial.first_divergence, Some(3));
        assert_eq!(partial.divergence_kind, Some(DivergenceKind::LinkMismatch));

        let full = verifier.verify("T1", Some(1), &CancelToken::new()).await.unwrap();
        assert_eq!(full.first_divergence, Some(3));
        assert_eq!(full.divergence_kind, Some(DivergenceKind::RollupMismatch));
    }

    #[tokio::test]
    async fn test_edited_hash_inside_erased_run_is_attributed_to_it() {
        let store = seeded(5, 1).await;
        enforcer(&store, RollupKind::Flat)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();
        store
            .tamper("T1", 3, |e| e.content_hash = ContentHash::from_bytes([4; 32]))
            .await;

        let report = IntegrityVerifier::new(store.clone(), 10)
            .verify("T1", Some(1), &CancelToken::new())
            .await
            .unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_divergence, Some(3));
        assert_eq!(report.divergence_kind, Some(DivergenceKind::RollupMismatch));
    }

    #[tokio::test]
    async fn test_edited_link_inside_erased_run_is_attributed_to_successor() {
        let store = seeded(5, 1).await;
        enforcer(&store, RollupKind::Merkle)
            .enforce("T1", &policy(RetentionAction::Rollup), now(), &CancelToken::new())
            .await
            .unwrap()
            .unwrap();
        store
            .tamper("T1", 4, |e| e.previous_hash = ContentHash::from_bytes([4; 32]))
            .await;

        let report = IntegrityVerifier::new(store.clone(), 2)
            .verify("T1", Some(1), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.first_divergence, Some(4));
        assert_eq!(report.divergence_kind, Some(DivergenceKind::LinkMismatch));
    }

    /// Runs retention on the inner store right before the first page read,
    /// after the verifier has already listed checkpoints.
    struct RetainBeforeFirstRead {
        inner: Arc<InMemoryLedgerStore>,
        fired: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl LedgerStore for RetainBeforeFirstRead {
        async fn read_tail(&self, tenant_id: &str) -> LedgerResult<crate::store::ChainTail> {
            self.inner.read_tail(tenant_id).await
        }

        async fn conditional_append(
            &self,
            expected_last_sequence: u64,
            event: &crate::audit::event::AuditEvent,
            idempotency_key: Option<&str>,
        ) -> LedgerResult<crate::store::AppendOutcome> {
            self.inner
                .conditional_append(expected_last_sequence, event, idempotency_key)
                .await
        }

        async fn read_range(
            &self,
            tenant_id: &str,
            range: SequenceRange,
        ) -> LedgerResult<Vec<crate::audit::event::AuditEvent>> {
            if !self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
                enforcer(&self.inner, RollupKind::Flat)
                    .enforce(tenant_id, &policy(RetentionAction::Rollup), now(), &CancelToken::new())
                    .await?;
            }
            self.inner.read_range(tenant_id, range).await
        }

        async fn list_checkpoints(&self, tenant_id: &str) -> LedgerResult<Vec<Checkpoint>> {
            self.inner.list_checkpoints(tenant_id).await
        }

        async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> LedgerResult<CheckpointOutcome> {
            self.inner.write_checkpoint(checkpoint).await
        }

        async fn delete_payloads(&self, tenant_id: &str, range: SequenceRange) -> LedgerResult<u64> {
            self.inner.delete_payloads(tenant_id, range).await
        }

        async fn pending_erasures(&self, limit: usize) -> LedgerResult<Vec<Checkpoint>> {
            self.inner.pending_erasures(limit).await
        }

        async fn mark_payloads_erased(&self, tenant_id: &str, checkpoint_id: Uuid) -> LedgerResult<()> {
            self.inner.mark_payloads_erased(tenant_id, checkpoint_id).await
        }

        async fn try_acquire_retention_lease(
            &self,
            tenant_id: &str,
            holder: &str,
            ttl: Duration,
        ) -> LedgerResult<bool> {
            self.inner.try_acquire_retention_lease(tenant_id, holder, ttl).await
        }

        async fn release_retention_lease(&self, tenant_id: &str, holder: &str) -> LedgerResult<()> {
            self.inner.release_retention_lease(tenant_id, holder).await
        }

        async fn tenants(&self) -> LedgerResult<Vec<String>> {
            self.inner.tenants().await
        }
    }

    #[tokio::test]
    async fn test_verify_tolerates_retention_committed_mid_scan() {
        let inner = seeded(3, 2).await;
        let store = Arc::new(RetainBeforeFirstRead {
            inner: inner.clone(),
            fired: std::sync::atomic::AtomicBool::new(false),
        });

        let report = IntegrityVerifier::new(store.clone(), 10)
            .verify("T1", None, &CancelToken::new())
            .await
            .unwrap();
        assert!(report.valid, "{}", report.summary());
        assert_eq!(report.checked_from, 1);
        assert_eq!(report.total_checked, 5);
        assert_eq!(report.checkpoints_checked, 1);

        let events = inner.read_range("T1", SequenceRange::new(1, 3).unwrap()).await.unwrap();
        assert!(events.iter().all(|e| e.payload.is_none()));
    }

    #[tokio::test]
    async fn test_erasure_without_any_checkpoint_still_flagged_after_refresh() {
        let store = seeded(3, 0).await;
        store.tamper("T1", 2, |e| e.payload = None).await;

        let report = IntegrityVerifier::new(store.clone(), 10)
            .verify("T1", None, &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(report.first_divergence, Some(2));
        assert_eq!(report.divergence_kind, Some(DivergenceKind::PayloadMissing));
    }
}
