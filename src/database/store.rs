//! `LedgerStore` backed by SQLite.
//!
//! Both guarded writes are single `INSERT ... SELECT ... WHERE` statements,
//! so the tail check and the insert happen atomically inside SQLite no
//! matter how many processes share the database file.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

use crate::audit::checkpoint::Checkpoint;
use crate::audit::event::{AuditEvent, SequenceRange};
use crate::database::models::to_db_int;
use crate::database::queries::Queries;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{AppendOutcome, ChainTail, CheckpointOutcome, LedgerStore};

#[derive(Clone)]
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Errors that mean another writer got there first.
fn lost_race(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation()
                // SQLITE_BUSY, SQLITE_LOCKED and their extended codes
                || matches!(db.code().as_deref(), Some("5" | "6" | "261" | "262" | "517"))
        }
        _ => false,
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn read_tail(&self, tenant_id: &str) -> LedgerResult<ChainTail> {
        Queries::read_tail(&self.pool, tenant_id).await
    }

    async fn conditional_append(
        &self,
        expected_last_sequence: u64,
        event: &AuditEvent,
        idempotency_key: Option<&str>,
    ) -> LedgerResult<AppendOutcome> {
        if event.sequence != expected_last_sequence + 1 {
            return Err(LedgerError::InvalidEvent(format!(
                "sequence {} does not follow expected tail {}",
                event.sequence, expected_last_sequence
            )));
        }
        to_db_int(event.sequence)?;

        if let Some(key) = idempotency_key {
            if let Some(existing) = Queries::find_by_idempotency_key(&self.pool, &event.tenant_id, key).await? {
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }

        let written = match Queries::insert_event_if_tail(&self.pool, expected_last_sequence, event, idempotency_key).await {
            Ok(written) => written,
            Err(e) if lost_race(&e) => {
                debug!(tenant_id = %event.tenant_id, error = %e, "append lost a write race");
                false
            }
            Err(e) => return Err(e.into()),
        };
        if written {
            return Ok(AppendOutcome::Appended);
        }

        // A concurrent append with the same key may have won the race.
        if let Some(key) = idempotency_key {
            if let Some(existing) = Queries::find_by_idempotency_key(&self.pool, &event.tenant_id, key).await? {
                return Ok(AppendOutcome::Duplicate(existing));
            }
        }
        Ok(AppendOutcome::Conflict)
    }

    async fn read_range(&self, tenant_id: &str, range: SequenceRange) -> LedgerResult<Vec<AuditEvent>> {
        Queries::read_range(&self.pool, tenant_id, range).await
    }

    async fn list_checkpoints(&self, tenant_id: &str) -> LedgerResult<Vec<Checkpoint>> {
        Queries::list_checkpoints(&self.pool, tenant_id).await
    }

    async fn write_checkpoint(&self, checkpoint: &Checkpoint) -> LedgerResult<CheckpointOutcome> {
        to_db_int(checkpoint.covered_range.to_seq)?;
        match Queries::insert_checkpoint_if_contiguous(&self.pool, checkpoint).await {
            Ok(true) => Ok(CheckpointOutcome::Committed),
            Ok(false) => Ok(CheckpointOutcome::Overlap),
            Err(e) if lost_race(&e) => Ok(CheckpointOutcome::Overlap),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_payloads(&self, tenant_id: &str, range: SequenceRange) -> LedgerResult<u64> {
        Queries::clear_payloads(&self.pool, tenant_id, range).await
    }

    async fn pending_erasures(&self, limit: usize) -> LedgerResult<Vec<Checkpoint>> {
        Queries::pending_erasures(&self.pool, limit).await
    }

    async fn mark_payloads_erased(&self, tenant_id: &str, checkpoint_id: Uuid) -> LedgerResult<()> {
        Queries::mark_payloads_erased(&self.pool, tenant_id, checkpoint_id).await
    }

    async fn try_acquire_retention_lease(
        &self,
        tenant_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> LedgerResult<bool> {
        Queries::acquire_lease(&self.pool, tenant_id, holder, ttl).await
    }

    async fn release_retention_lease(&self, tenant_id: &str, holder: &str) -> LedgerResult<()> {
        Queries::release_lease(&self.pool, tenant_id, holder).await
    }

    async fn tenants(&self) -> LedgerResult<Vec<String>> {
        Queries::tenants(&self.pool).await
    }
}
