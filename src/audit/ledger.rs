//! Public facade over the ledger components.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::audit::append::AppendCoordinator;
use crate::audit::cancel::CancelToken;
use crate::audit::checkpoint::{Checkpoint, RetentionPolicy};
use crate::audit::event::{AuditEvent, EventReceipt, NewEvent, SequenceRange};
use crate::audit::merkle::{prove, MerkleProof, RollupKind};
use crate::audit::retention::{ErasureSweep, RetentionEnforcer, RetentionReceipt};
use crate::audit::verify::{IntegrityVerifier, VerificationReport};
use crate::config::AppConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{ChainTail, LedgerStore};
use crate::vault::EncryptionVault;

pub struct AuditLedger {
    store: Arc<dyn LedgerStore>,
    vault: Arc<dyn EncryptionVault>,
    appender: AppendCoordinator<dyn LedgerStore>,
    verifier: IntegrityVerifier<dyn LedgerStore>,
    retention: RetentionEnforcer<dyn LedgerStore>,
}

impl AuditLedger {
    pub fn new(store: Arc<dyn LedgerStore>, vault: Arc<dyn EncryptionVault>, config: &AppConfig) -> Self {
        Self {
            appender: AppendCoordinator::new(store.clone(), config.append),
            verifier: IntegrityVerifier::new(store.clone(), config.verify.page_size),
            retention: RetentionEnforcer::new(
                store.clone(),
                config.retention.page_size,
                config.retention.lease_ttl(),
                config.retention.rollup_kind,
            ),
            store,
            vault,
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Encrypt the payload and append the event to its tenant's chain.
    pub async fn append(&self, request: NewEvent) -> LedgerResult<EventReceipt> {
        request.validate()?;
        let ciphertext = self
            .vault
            .encrypt(&request.tenant_id, &request.payload)
            .await?;
        self.appender.append(&request, &ciphertext).await
    }

    pub async fn verify(&self, tenant_id: &str, from_sequence: Option<u64>) -> LedgerResult<VerificationReport> {
        self.verify_with_cancel(tenant_id, from_sequence, &CancelToken::new()).await
    }

    pub async fn verify_with_cancel(
        &self,
        tenant_id: &str,
        from_sequence: Option<u64>,
        cancel: &CancelToken,
    ) -> LedgerResult<VerificationReport> {
        self.verifier.verify(tenant_id, from_sequence, cancel).await
    }

    pub async fn enforce_retention(
        &self,
        tenant_id: &str,
        policy: &RetentionPolicy,
    ) -> LedgerResult<Option<RetentionReceipt>> {
        self.enforce_retention_at(tenant_id, policy, Utc::now(), &CancelToken::new())
            .await
    }

    /// Retention as of `now`; lets schedulers and tests pin the clock.
    pub async fn enforce_retention_at(
        &self,
        tenant_id: &str,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        cancel: &CancelToken,
    ) -> LedgerResult<Option<RetentionReceipt>> {
        self.retention.enforce(tenant_id, policy, now, cancel).await
    }

    pub async fn retry_pending_erasures(&self, limit: usize) -> LedgerResult<ErasureSweep> {
        self.retention.retry_pending_erasures(limit).await
    }

    /// Events with `from <= sequence <= to`, payloads as stored.
    pub async fn read_range(&self, tenant_id: &str, from: u64, to: u64) -> LedgerResult<Vec<AuditEvent>> {
        let range = SequenceRange::new(from, to)?;
        self.store.read_range(tenant_id, range).await
    }

    pub async fn tail(&self, tenant_id: &str) -> LedgerResult<ChainTail> {
        self.store.read_tail(tenant_id).await
    }

    pub async fn checkpoints(&self, tenant_id: &str) -> LedgerResult<Vec<Checkpoint>> {
        self.store.list_checkpoints(tenant_id).await
    }

    pub async fn tenants(&self) -> LedgerResult<Vec<String>> {
        self.store.tenants().await
    }

    /// Inclusion proof of a checkpointed event under its checkpoint's
    /// Merkle root. Only `merkle` checkpoints can produce one.
    pub async fn prove_event(&self, tenant_id: &str, sequence: u64) -> LedgerResult<MerkleProof> {
        let checkpoints = self.store.list_checkpoints(tenant_id).await?;
        let checkpoint = checkpoints
            .iter()
            .find(|c| c.covered_range.contains(sequence))
            .ok_or_else(|| {
                LedgerError::InvalidRange(format!(
                    "sequence {} of {} is not covered by a checkpoint",
                    sequence, tenant_id
                ))
            })?;
        if checkpoint.rollup_kind != RollupKind::Merkle {
            return Err(LedgerError::InvalidRange(format!(
                "checkpoint {} uses a {} rollup; proofs need merkle",
                checkpoint.checkpoint_id, checkpoint.rollup_kind
            )));
        }

        let range = checkpoint.covered_range;
        let events = self.store.read_range(tenant_id, range).await?;
        let violation = |sequence| LedgerError::IntegrityViolation {
            tenant_id: tenant_id.to_string(),
            sequence,
        };
        if events.len() as u64 != range.count() {
            return Err(violation(range.from_seq));
        }

        let hashes: Vec<_> = events.iter().map(|e| e.content_hash).collect();
        let proof = prove(&hashes, (sequence - range.from_seq) as usize)?;
        if proof.root != checkpoint.rollup_hash {
            return Err(violation(range.from_seq));
        }

        debug!(tenant_id = %tenant_id, sequence, steps = proof.size(), "inclusion proof built");
        Ok(proof)
    }
}
