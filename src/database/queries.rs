use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;
use uuid::Uuid;

use crate::audit::checkpoint::Checkpoint;
use crate::audit::event::{AuditEvent, SequenceRange};
use crate::database::models::{checkpoint_from_row, event_from_row, to_db_int};
use crate::error::LedgerResult;
use crate::store::ChainTail;

const EVENT_COLUMNS: &str = "tenant_id, sequence, actor_id, action, resource_type, resource_id, \
                             occurred_at_micros, payload, previous_hash, content_hash";

const CHECKPOINT_COLUMNS: &str = "checkpoint_id, tenant_id, from_seq, to_seq, rollup_hash, rollup_kind, \
                                  tail_hash, event_count, action, reason, created_at";

pub struct Queries;

impl Queries {
    pub async fn read_tail(pool: &SqlitePool, tenant_id: &str) -> LedgerResult<ChainTail> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE tenant_id = ? ORDER BY sequence DESC LIMIT 1",
            EVENT_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_optional(pool)
        .await?;

        match row {
            Some(row) => {
                let event = event_from_row(&row)?;
                Ok(ChainTail {
                    last_sequence: event.sequence,
                    last_content_hash: event.content_hash,
                })
            }
            None => Ok(ChainTail::EMPTY),
        }
    }

    /// Insert `event` only if the tenant's highest sequence is still
    /// `expected_last_sequence`. Returns whether a row was written.
    pub async fn insert_event_if_tail(
        pool: &SqlitePool,
        expected_last_sequence: u64,
        event: &AuditEvent,
        idempotency_key: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO audit_events
            (tenant_id, sequence, actor_id, action, resource_type, resource_id,
             occurred_at_micros, payload, previous_hash, content_hash, idempotency_key)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            WHERE (SELECT COALESCE(MAX(sequence), 0) FROM audit_events WHERE tenant_id = ?1) = ?12
            "#,
        )
        .bind(&event.tenant_id)
        .bind(event.sequence as i64)
        .bind(&event.actor_id)
        .bind(&event.action)
        .bind(&event.resource_type)
        .bind(&event.resource_id)
        .bind(event.occurred_at.timestamp_micros())
        .bind(event.payload.as_deref())
        .bind(event.previous_hash.to_string())
        .bind(event.content_hash.to_string())
        .bind(idempotency_key)
        .bind(expected_last_sequence as i64)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn find_by_idempotency_key(
        pool: &SqlitePool,
        tenant_id: &str,
        idempotency_key: &str,
    ) -> LedgerResult<Option<AuditEvent>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE tenant_id = ? AND idempotency_key = ?",
            EVENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(idempotency_key)
        .fetch_optional(pool)
        .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    pub async fn read_range(
        pool: &SqlitePool,
        tenant_id: &str,
        range: SequenceRange,
    ) -> LedgerResult<Vec<AuditEvent>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM audit_events WHERE tenant_id = ? AND sequence BETWEEN ? AND ? ORDER BY sequence",
            EVENT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(to_db_int(range.from_seq)?)
        .bind(to_db_int(range.to_seq)?)
        .fetch_all(pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    pub async fn list_checkpoints(pool: &SqlitePool, tenant_id: &str) -> LedgerResult<Vec<Checkpoint>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM checkpoints WHERE tenant_id = ? ORDER BY from_seq",
            CHECKPOINT_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(pool)
        .await?;

        rows.iter().map(checkpoint_from_row).collect()
    }

    /// Insert `checkpoint` only if it starts right after the previous one
    /// and ends at or before the tail. Returns whether a row was written.
    pub async fn insert_checkpoint_if_contiguous(
        pool: &SqlitePool,
        checkpoint: &Checkpoint,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO checkpoints
            (checkpoint_id, tenant_id, from_seq, to_seq, rollup_hash, rollup_kind,
             tail_hash, event_count, action, reason, created_at)
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11
            WHERE (SELECT COALESCE(MAX(to_seq), 0) FROM checkpoints WHERE tenant_id = ?2) + 1 = ?3
              AND (SELECT COALESCE(MAX(sequence), 0) FROM audit_events WHERE tenant_id = ?2) >= ?4
            "#,
        )
        .bind(checkpoint.checkpoint_id.to_string())
        .bind(&checkpoint.tenant_id)
        .bind(checkpoint.covered_range.from_seq as i64)
        .bind(checkpoint.covered_range.to_seq as i64)
        .bind(checkpoint.rollup_hash.to_string())
        .bind(checkpoint.rollup_kind.as_str())
        .bind(checkpoint.tail_hash.to_string())
        .bind(checkpoint.event_count as i64)
        .bind(checkpoint.action.as_str())
        .bind(&checkpoint.reason)
        .bind(checkpoint.created_at)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn clear_payloads(pool: &SqlitePool, tenant_id: &str, range: SequenceRange) -> LedgerResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE audit_events SET payload = NULL
            WHERE tenant_id = ? AND sequence BETWEEN ? AND ? AND payload IS NOT NULL
            "#,
        )
        .bind(tenant_id)
        .bind(to_db_int(range.from_seq)?)
        .bind(to_db_int(range.to_seq)?)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }

    pub async fn pending_erasures(pool: &SqlitePool, limit: usize) -> LedgerResult<Vec<Checkpoint>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM checkpoints
            WHERE payloads_erased = 0 AND action != 'archive'
            ORDER BY created_at
            LIMIT ?
            "#,
            CHECKPOINT_COLUMNS
        ))
        .bind(to_db_int(limit as u64)?)
        .fetch_all(pool)
        .await?;

        rows.iter().map(checkpoint_from_row).collect()
    }

    pub async fn mark_payloads_erased(pool: &SqlitePool, tenant_id: &str, checkpoint_id: Uuid) -> LedgerResult<()> {
        sqlx::query("UPDATE checkpoints SET payloads_erased = 1 WHERE tenant_id = ? AND checkpoint_id = ?")
            .bind(tenant_id)
            .bind(checkpoint_id.to_string())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Take the lease if it is free, expired, or already ours.
    pub async fn acquire_lease(
        pool: &SqlitePool,
        tenant_id: &str,
        holder: &str,
        ttl: Duration,
    ) -> LedgerResult<bool> {
        let now = Utc::now().timestamp_micros();
        let ttl_micros = i64::try_from(ttl.as_micros()).unwrap_or(i64::MAX);
        let result = sqlx::query(
            r#"
            INSERT INTO retention_leases (tenant_id, holder, expires_at_micros)
            VALUES (?1, ?2, ?3)
            ON CONFLICT (tenant_id) DO UPDATE SET
                holder = excluded.holder,
                expires_at_micros = excluded.expires_at_micros
            WHERE retention_leases.holder = excluded.holder
               OR retention_leases.expires_at_micros <= ?4
            "#,
        )
        .bind(tenant_id)
        .bind(holder)
        .bind(now.saturating_add(ttl_micros))
        .bind(now)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn release_lease(pool: &SqlitePool, tenant_id: &str, holder: &str) -> LedgerResult<()> {
        sqlx::query("DELETE FROM retention_leases WHERE tenant_id = ? AND holder = ?")
            .bind(tenant_id)
            .bind(holder)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn tenants(pool: &SqlitePool) -> LedgerResult<Vec<String>> {
        let tenants: Vec<String> = sqlx::query_scalar("SELECT DISTINCT tenant_id FROM audit_events ORDER BY tenant_id")
            .fetch_all(pool)
            .await?;
        Ok(tenants)
    }
}
