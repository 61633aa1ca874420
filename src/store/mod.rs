//! Ledger Store
//!
//! The persistence primitives the ledger needs. Implementations must make
//! `conditional_append` and `write_checkpoint` atomic: every ordering
//! guarantee of the chain reduces to those two writes.

pub mod memory;

use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::audit::checkpoint::Checkpoint;
use crate::audit::event::{AuditEvent, ContentHash, SequenceRange};
use crate::error::LedgerResult;

pub use memory::InMemoryLedgerStore;

/// The last event of a tenant's chain as seen by one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainTail {
    /// Zero for a tenant with no events.
    pub last_sequence: u64,
    /// `ContentHash::GENESIS` for a tenant with no events.
    pub last_content_hash: ContentHash,
}

impl ChainTail {
    pub const EMPTY: ChainTail = ChainTail {
        last_sequence: 0,
        last_content_hash: ContentHash::GENESIS,
    };

    pub fn is_empty(&self) -> bool {
        self.last_sequence == 0
    }

    pub fn next_sequence(&self) -> u64 {
        self.last_sequence + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    /// The tail moved since it was read; nothing was written.
    Conflict,
    /// The idempotency key is already bound to this event; nothing was written.
    Duplicate(AuditEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Committed,
    /// The range does not start right after the previous checkpoint.
    Overlap,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn read_tail(&self, tenant_id: &str) -> LedgerResult<ChainTail>;

    /// Persist `event` only if the tenant's tail is still at
    /// `expected_last_sequence` and `idempotency_key` is unused.
    async fn conditional_append(
        &self,
        expected_last_sequence: u64,
        event: &AuditEvent,
        idempotency_key: Option<&str>,
    ) -> LedgerResult<AppendOutcome>;

    /// Events with `from_seq <= sequence <= to_seq`, ascending.
    async fn read_range(&self, tenant_id: &str, range: SequenceRange) -> LedgerResult<Vec<AuditEvent>>;

    /// Checkpoints for the tenant ordered by covered range.
    async fn list_checkpoints(&self, tenant_id: &str) -> LedgerResult<Vec<Checkpoint>>;

    /// Persist a checkpoint only if it starts right after the previous one.
    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> LedgerResult<CheckpointOutcome>;

    /// Erase payload bytes in the range, leaving hashes and sequences.
    /// Returns how many payloads were erased by this call.
    async fn delete_payloads(&self, tenant_id: &str, range: SequenceRange) -> LedgerResult<u64>;

    /// Erasing checkpoints whose payload erasure has not been confirmed.
    async fn pending_erasures(&self, limit: usize) -> LedgerResult<Vec<Checkpoint>>;

    async fn mark_payloads_erased(&self, tenant_id: &str, checkpoint_id: Uuid) -> LedgerResult<()>;

    /// Take the tenant's retention lease unless another live holder has it.
    async fn try_acquire_retention_lease(
        &self,
        tenant_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> LedgerResult<bool>;

    async fn release_retention_lease(&self, tenant_id: &str, holder: &str) -> LedgerResult<()>;

    /// Every tenant with at least one event.
    async fn tenants(&self) -> LedgerResult<Vec<String>>;
}
