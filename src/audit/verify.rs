//! Integrity Verification
//!
//! Replays a tenant's chain in ascending sequence order, recomputing every
//! content hash it can and checking every link. Verification only reads:
//! it never repairs, and it scans up to the tail observed when it started,
//! so appends that land mid-scan are simply not part of the result.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::cancel::CancelToken;
use crate::audit::chain::recompute;
use crate::audit::checkpoint::Checkpoint;
use crate::audit::event::{AuditEvent, ContentHash, SequenceRange};
use crate::error::{LedgerError, LedgerResult};
use crate::store::LedgerStore;

/// Why replay stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DivergenceKind {
    /// An expected sequence number is missing.
    SequenceGap,
    /// `previous_hash` does not match the prior event's content hash.
    LinkMismatch,
    /// The stored content hash does not match the recomputed one.
    HashMismatch,
    /// The payload is gone but no checkpoint covers the event.
    PayloadMissing,
    /// A checkpoint's rollup or tail hash does not match the stored hashes.
    RollupMismatch,
}

impl DivergenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DivergenceKind::SequenceGap => "sequence_gap",
            DivergenceKind::LinkMismatch => "link_mismatch",
            DivergenceKind::HashMismatch => "hash_mismatch",
            DivergenceKind::PayloadMissing => "payload_missing",
            DivergenceKind::RollupMismatch => "rollup_mismatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub sequence: u64,
    pub kind: DivergenceKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub tenant_id: String,
    pub valid: bool,
    pub total_checked: u64,
    pub first_divergence: Option<u64>,
    pub divergence_kind: Option<DivergenceKind>,
    pub checked_from: u64,
    /// Last sequence of the snapshot the scan covered.
    pub checked_through: u64,
    pub checkpoints_checked: u64,
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    pub fn summary(&self) -> String {
        if self.valid {
            format!(
                "✅ Ledger for {} is valid ({} events checked from {} through {}, {} checkpoints)",
                self.tenant_id,
                self.total_checked,
                self.checked_from,
                self.checked_through,
                self.checkpoints_checked
            )
        } else {
            format!(
                "❌ Ledger for {} diverges at sequence {} ({}) after {} events",
                self.tenant_id,
                self.first_divergence.unwrap_or_default(),
                self.divergence_kind.map(|k| k.as_str()).unwrap_or("unknown"),
                self.total_checked
            )
        }
    }
}

/// Streaming replay state. Feed events in ascending order; the first
/// divergence is returned and replay must not continue afterwards.
pub(crate) struct Replay {
    expected_sequence: u64,
    expected_previous: ContentHash,
    /// The previous event was accepted without recomputing its hash.
    previous_unverified: bool,
    /// Every checkpoint of the tenant, for coverage checks.
    checkpoints: Vec<Checkpoint>,
    /// Checkpoints whose whole range lies inside the scan.
    tracked_from: u64,
    /// Checkpoints discovered after part of their range was already fed.
    untracked: Vec<Uuid>,
    rollup_buffer: Vec<ContentHash>,
    /// First broken link between two erased events of a tracked
    /// checkpoint, settled when the checkpoint closes.
    pending_link: Option<u64>,
    pub(crate) checked: u64,
    pub(crate) checkpoints_checked: u64,
}

impl Replay {
    pub(crate) fn new(start: u64, anchor: ContentHash, checkpoints: Vec<Checkpoint>) -> Self {
        Self {
            expected_sequence: start,
            expected_previous: anchor,
            previous_unverified: false,
            checkpoints,
            tracked_from: start,
            untracked: Vec::new(),
            rollup_buffer: Vec::new(),
            pending_link: None,
            checked: 0,
            checkpoints_checked: 0,
        }
    }

    pub(crate) fn expected_sequence(&self) -> u64 {
        self.expected_sequence
    }

    /// Swap in a fresher checkpoint list. Checkpoints that start before the
    /// next expected event are only used for coverage, never for rollups.
    pub(crate) fn refresh_checkpoints(&mut self, checkpoints: Vec<Checkpoint>) {
        for checkpoint in &checkpoints {
            let known = self
                .checkpoints
                .iter()
                .any(|c| c.checkpoint_id == checkpoint.checkpoint_id);
            if !known && checkpoint.covered_range.from_seq < self.expected_sequence {
                self.untracked.push(checkpoint.checkpoint_id);
            }
        }
        self.checkpoints = checkpoints;
    }

    /// The divergence to report: a link break still awaiting its
    /// checkpoint comes first.
    pub(crate) fn settle(&mut self, divergence: Option<Divergence>) -> Option<Divergence> {
        match self.pending_link.take() {
            Some(sequence) => Some(Divergence { sequence, kind: DivergenceKind::LinkMismatch }),
            None => divergence,
        }
    }

    fn covering(&self, sequence: u64) -> Option<Checkpoint> {
        self.checkpoints
            .iter()
            .find(|c| c.covered_range.contains(sequence))
            .cloned()
    }

    fn is_tracked(&self, checkpoint: &Checkpoint) -> bool {
        checkpoint.covered_range.from_seq >= self.tracked_from
            && !self.untracked.contains(&checkpoint.checkpoint_id)
    }

    pub(crate) fn feed(&mut self, event: &AuditEvent) -> Result<(), Divergence> {
        let sequence = self.expected_sequence;
        if event.sequence != sequence {
            return Err(Divergence { sequence, kind: DivergenceKind::SequenceGap });
        }

        let covering = self.covering(sequence);
        let recomputed = recompute(event);
        match recomputed {
            Some(hash) if hash != event.content_hash => {
                return Err(Divergence { sequence, kind: DivergenceKind::HashMismatch });
            }
            None if covering.is_none() => {
                return Err(Divergence { sequence, kind: DivergenceKind::PayloadMissing });
            }
            _ => {}
        }
        let tracked = covering.filter(|c| self.is_tracked(c));

        if event.previous_hash != self.expected_previous {
            let inside_tracked = tracked
                .as_ref()
                .is_some_and(|c| c.covered_range.from_seq < sequence);
            if self.previous_unverified && recomputed.is_none() && inside_tracked {
                // Neither side can be recomputed; the rollup decides.
                self.pending_link.get_or_insert(sequence);
            } else {
                // A self-consistent event after an unverifiable one points
                // the finger at the stored hash of the unverifiable one.
                let blamed = if self.previous_unverified && recomputed.is_some() {
                    sequence - 1
                } else {
                    sequence
                };
                return Err(Divergence { sequence: blamed, kind: DivergenceKind::LinkMismatch });
            }
        }

        if let Some(checkpoint) = tracked {
            self.rollup_buffer.push(event.content_hash);
            if sequence == checkpoint.covered_range.to_seq {
                self.close_checkpoint(&checkpoint, event)?;
            }
        }

        self.expected_sequence += 1;
        self.expected_previous = event.content_hash;
        self.previous_unverified = recomputed.is_none();
        self.checked += 1;
        Ok(())
    }

    fn close_checkpoint(&mut self, checkpoint: &Checkpoint, last: &AuditEvent) -> Result<(), Divergence> {
        let hashes = std::mem::take(&mut self.rollup_buffer);
        let range = checkpoint.covered_range;
        let rollup_matches = hashes.len() as u64 == range.count()
            && checkpoint.rollup_kind.rollup(&hashes) == checkpoint.rollup_hash;

        if let Some(broken) = self.pending_link.take() {
            // Intact hashes mean the successor's link was edited; otherwise
            // the stored hash before the break was.
            return Err(if rollup_matches {
                Divergence { sequence: broken, kind: DivergenceKind::LinkMismatch }
            } else {
                Divergence { sequence: broken - 1, kind: DivergenceKind::RollupMismatch }
            });
        }
        if last.content_hash != checkpoint.tail_hash {
            return Err(Divergence { sequence: range.to_seq, kind: DivergenceKind::RollupMismatch });
        }
        if !rollup_matches {
            return Err(Divergence { sequence: range.from_seq, kind: DivergenceKind::RollupMismatch });
        }

        debug!(
            tenant_id = %checkpoint.tenant_id,
            checkpoint_id = %checkpoint.checkpoint_id,
            range = %range,
            "checkpoint rollup verified"
        );
        self.checkpoints_checked += 1;
        Ok(())
    }
}

pub struct IntegrityVerifier<S: ?Sized> {
    store: Arc<S>,
    page_size: u64,
}

impl<S: LedgerStore + ?Sized> IntegrityVerifier<S> {
    pub fn new(store: Arc<S>, page_size: u64) -> Self {
        Self {
            store,
            page_size: page_size.max(1),
        }
    }

    /// Verify `tenant_id` starting at `from_sequence`, or at the latest
    /// checkpoint boundary when `None`.
    ///
    /// Divergences are reported in the returned report; `Err` is reserved
    /// for store failures, invalid arguments and cancellation.
    pub async fn verify(
        &self,
        tenant_id: &str,
        from_sequence: Option<u64>,
        cancel: &CancelToken,
    ) -> LedgerResult<VerificationReport> {
        let tail = self.store.read_tail(tenant_id).await?;
        let checkpoints = self.store.list_checkpoints(tenant_id).await?;
        let last = tail.last_sequence;

        let (start, anchor) = match from_sequence {
            None => match checkpoints.last() {
                Some(latest) => (latest.covered_range.to_seq + 1, latest.tail_hash),
                None => (1, ContentHash::GENESIS),
            },
            Some(0) => {
                return Err(LedgerError::InvalidRange("sequences start at 1".to_string()));
            }
            Some(from) if from > last + 1 => {
                return Err(LedgerError::InvalidRange(format!(
                    "from {} is beyond the tail {} of {}",
                    from, last, tenant_id
                )));
            }
            Some(1) => (1, ContentHash::GENESIS),
            Some(from) => match self.anchor_before(tenant_id, from, &checkpoints).await? {
                Some(anchor) => (from, anchor),
                None => {
                    let divergence = Divergence { sequence: from - 1, kind: DivergenceKind::SequenceGap };
                    return Ok(self.report(tenant_id, from, last, 0, 0, Some(divergence)));
                }
            },
        };

        info!(tenant_id = %tenant_id, from = start, through = last, "verifying ledger");

        let mut replay = Replay::new(start, anchor, checkpoints);
        let mut next = start;
        while next <= last {
            cancel.check()?;
            let to = next.saturating_add(self.page_size - 1).min(last);
            let page = self
                .store
                .read_range(tenant_id, SequenceRange { from_seq: next, to_seq: to })
                .await?;

            for event in &page {
                if let Err(divergence) = self.feed_or_refresh(tenant_id, &mut replay, event).await? {
                    return Ok(self.finish(tenant_id, start, last, &mut replay, Some(divergence)));
                }
            }
            if replay.expected_sequence() != to + 1 {
                let divergence = Divergence {
                    sequence: replay.expected_sequence(),
                    kind: DivergenceKind::SequenceGap,
                };
                return Ok(self.finish(tenant_id, start, last, &mut replay, Some(divergence)));
            }
            next = to + 1;
        }

        Ok(self.finish(tenant_id, start, last, &mut replay, None))
    }

    /// Feed one event. Retention may have checkpointed and erased it after
    /// the checkpoint list was read, so a missing payload is only reported
    /// once a fresh list still shows no covering checkpoint.
    async fn feed_or_refresh(
        &self,
        tenant_id: &str,
        replay: &mut Replay,
        event: &AuditEvent,
    ) -> LedgerResult<Result<(), Divergence>> {
        match replay.feed(event) {
            Err(Divergence { kind: DivergenceKind::PayloadMissing, sequence }) => {
                warn!(
                    tenant_id = %tenant_id,
                    sequence,
                    "payload erased without a known checkpoint, re-reading checkpoints"
                );
                replay.refresh_checkpoints(self.store.list_checkpoints(tenant_id).await?);
                Ok(replay.feed(event))
            }
            outcome => Ok(outcome),
        }
    }

    /// Hash the event before `from` must carry: a checkpoint's tail hash
    /// when `from` starts right after one, otherwise the stored hash.
    async fn anchor_before(
        &self,
        tenant_id: &str,
        from: u64,
        checkpoints: &[Checkpoint],
    ) -> LedgerResult<Option<ContentHash>> {
        if let Some(checkpoint) = checkpoints.iter().find(|c| c.covered_range.to_seq == from - 1) {
            return Ok(Some(checkpoint.tail_hash));
        }
        let prior = self
            .store
            .read_range(tenant_id, SequenceRange { from_seq: from - 1, to_seq: from - 1 })
            .await?;
        Ok(prior.first().map(|event| event.content_hash))
    }

    fn finish(
        &self,
        tenant_id: &str,
        start: u64,
        last: u64,
        replay: &mut Replay,
        divergence: Option<Divergence>,
    ) -> VerificationReport {
        let divergence = replay.settle(divergence);
        self.report(tenant_id, start, last, replay.checked, replay.checkpoints_checked, divergence)
    }

    fn report(
        &self,
        tenant_id: &str,
        start: u64,
        last: u64,
        checked: u64,
        checkpoints_checked: u64,
        divergence: Option<Divergence>,
    ) -> VerificationReport {
        let report = VerificationReport {
            tenant_id: tenant_id.to_string(),
            valid: divergence.is_none(),
            total_checked: checked,
            first_divergence: divergence.map(|d| d.sequence),
            divergence_kind: divergence.map(|d| d.kind),
            checked_from: start,
            checked_through: last,
            checkpoints_checked,
            verified_at: Utc::now(),
        };

        match divergence {
            None => info!(
                tenant_id = %tenant_id,
                checked = checked,
                checkpoints = checkpoints_checked,
                "ledger verified"
            ),
            Some(d) => error!(
                tenant_id = %tenant_id,
                sequence = d.sequence,
                kind = d.kind.as_str(),
                "ledger integrity divergence detected"
            ),
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::append::AppendCoordinator;
    use crate::audit::event::NewEvent;
    use crate::config::AppendConfig;
    use crate::store::InMemoryLedgerStore;

    async fn seeded(count: u64) -> Arc<InMemoryLedgerStore> {
        let store = Arc::new(InMemoryLedgerStore::new());
        let coordinator = AppendCoordinator::new(store.clone(), AppendConfig::default());
        for i in 1..=count {
            let req = NewEvent::new("T1", "u1", "data.access", "student", format!("s-{}", i));
            coordinator
                .append(&req, format!("payload-{}", i).as_bytes())
                .await
                .unwrap();
        }
        store
    }

    fn verifier(store: &Arc<InMemoryLedgerStore>, page_size: u64) -> IntegrityVerifier<InMemoryLedgerStore> {
        IntegrityVerifier::new(store.clone(), page_size)
    }

    #[tokio::test]
    async fn test_empty_ledger_is_valid() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let report = verifier(&store, 10).verify("T1", None, &CancelToken::new()).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.total_checked, 0);
    }

    #[tokio::test]
    async fn test_valid_chain_across_pages() {
        let store = seeded(7).await;
        let report = verifier(&store, 3).verify("T1", None, &CancelToken::new()).await.unwrap();
        assert!(report.valid, "{}", report.summary());
        assert_eq!(report.total_checked, 7);
        assert_eq!(report.checked_from, 1);
        assert_eq!(report.checked_through, 7);
    }

    #[tokio::test]
    async fn test_corrupted_hash_reports_its_sequence() {
        let store = seeded(4).await;
        store
            .tamper("T1", 1, |e| e.content_hash = ContentHash::from_bytes([9; 32]))
            .await;

        let report = verifier(&store, 10).verify("T1", None, &CancelToken::new()).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_divergence, Some(1));
        assert_eq!(report.divergence_kind, Some(DivergenceKind::HashMismatch));
        assert_eq!(report.total_checked, 0);
    }

    #[tokio::test]
    async fn test_payload_byte_flip_detected() {
        let store = seeded(5).await;
        store
            .tamper("T1", 3, |e| e.payload.as_mut().unwrap()[0] ^= 0x80)
            .await;

        let report = verifier(&store, 2).verify("T1", None, &CancelToken::new()).await.unwrap();
        assert_eq!(report.first_divergence, Some(3));
        assert_eq!(report.total_checked, 2);
    }

    #[tokio::test]
    async fn test_subsequent_events_fail_when_replayed_from_them() {
        let store = seeded(4).await;
        store
            .tamper("T1", 2, |e| e.content_hash = ContentHash::from_bytes([1; 32]))
            .await;

        // event 3 still links to the original hash of event 2
        let report = verifier(&store, 10).verify("T1", Some(3), &CancelToken::new()).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.first_divergence, Some(3));
        assert_eq!(report.divergence_kind, Some(DivergenceKind::LinkMismatch));
    }

    #[tokio::test]
    async fn test_sequence_gap_detected() {
        let store = seeded(5).await;
        store.remove_event("T1", 3).await.unwrap();

        let report = verifier(&store, 10).verify("T1", None, &CancelToken::new()).await.unwrap();
        assert_eq!(report.first_divergence, Some(3));
        assert_eq!(report.divergence_kind, Some(DivergenceKind::SequenceGap));
    }

    #[tokio::test]
    async fn test_gap_at_page_end_detected() {
        let store = seeded(6).await;
        store.remove_event("T1", 4).await.unwrap();

        let report = verifier(&store, 4).verify("T1", None, &CancelToken::new()).await.unwrap();
        assert_eq!(report.first_divergence, Some(4));
        assert_eq!(report.divergence_kind, Some(DivergenceKind::SequenceGap));
    }

    #[tokio::test]
    async fn test_erased_payload_without_checkpoint_is_flagged() {
        let store = seeded(3).await;
        store.tamper("T1", 2, |e| e.payload = None).await;

        let report = verifier(&store, 10).verify("T1", None, &CancelToken::new()).await.unwrap();
        assert_eq!(report.first_divergence, Some(2));
        assert_eq!(report.divergence_kind, Some(DivergenceKind::PayloadMissing));
    }

    #[tokio::test]
    async fn test_from_sequence_bounds() {
        let store = seeded(3).await;
        let v = verifier(&store, 10);
        assert!(matches!(
            v.verify("T1", Some(0), &CancelToken::new()).await,
            Err(LedgerError::InvalidRange(_))
        ));
        assert!(matches!(
            v.verify("T1", Some(5), &CancelToken::new()).await,
            Err(LedgerError::InvalidRange(_))
        ));

        let report = v.verify("T1", Some(4), &CancelToken::new()).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.total_checked, 0);

        let report = v.verify("T1", Some(2), &CancelToken::new()).await.unwrap();
        assert!(report.valid);
        assert_eq!(report.total_checked, 2);
    }

    #[tokio::test]
    async fn test_cancelled_scan() {
        let store = seeded(3).await;
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = verifier(&store, 1).verify("T1", None, &cancel).await.unwrap_err();
        assert!(matches!(err, LedgerError::Cancelled));
    }

    #[tokio::test]
    async fn test_verification_never_mutates() {
        let store = seeded(3).await;
        let before = store.read_range("T1", SequenceRange::new(1, 3).unwrap()).await.unwrap();
        store
            .tamper("T1", 2, |e| e.content_hash = ContentHash::from_bytes([5; 32]))
            .await;
        verifier(&store, 10).verify("T1", None, &CancelToken::new()).await.unwrap();

        let after = store.read_range("T1", SequenceRange::new(1, 3).unwrap()).await.unwrap();
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1].content_hash, ContentHash::from_bytes([5; 32]));
        assert_eq!(after[2], before[2]);
    }
}
