//! Row mapping between SQLite and ledger types.
//!
//! Hashes are stored in their `sha256:<hex>` text form, timestamps of
//! events as Unix microseconds (the precision the hash commits to).

use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::audit::checkpoint::Checkpoint;
use crate::audit::event::{AuditEvent, ContentHash, SequenceRange};
use crate::error::{LedgerError, LedgerResult};

/// SQLite integers are signed.
pub fn to_db_int(value: u64) -> LedgerResult<i64> {
    i64::try_from(value).map_err(|_| LedgerError::InvalidRange(format!("{} does not fit in the store", value)))
}

fn from_db_int(value: i64, column: &str) -> LedgerResult<u64> {
    u64::try_from(value).map_err(|_| LedgerError::corrupt(format!("negative {}: {}", column, value)))
}

fn hash_column(row: &SqliteRow, column: &str) -> LedgerResult<ContentHash> {
    let text: String = row.try_get(column)?;
    text.parse()
}

pub fn micros_to_datetime(micros: i64) -> LedgerResult<DateTime<Utc>> {
    Utc.timestamp_micros(micros)
        .single()
        .ok_or_else(|| LedgerError::corrupt(format!("timestamp out of range: {}", micros)))
}

pub fn event_from_row(row: &SqliteRow) -> LedgerResult<AuditEvent> {
    Ok(AuditEvent {
        tenant_id: row.try_get("tenant_id")?,
        sequence: from_db_int(row.try_get("sequence")?, "sequence")?,
        actor_id: row.try_get("actor_id")?,
        action: row.try_get("action")?,
        resource_type: row.try_get("resource_type")?,
        resource_id: row.try_get("resource_id")?,
        occurred_at: micros_to_datetime(row.try_get("occurred_at_micros")?)?,
        payload: row.try_get("payload")?,
        previous_hash: hash_column(row, "previous_hash")?,
        content_hash: hash_column(row, "content_hash")?,
    })
}

pub fn checkpoint_from_row(row: &SqliteRow) -> LedgerResult<Checkpoint> {
    let checkpoint_id: String = row.try_get("checkpoint_id")?;
    let covered_range = SequenceRange::new(
        from_db_int(row.try_get("from_seq")?, "from_seq")?,
        from_db_int(row.try_get("to_seq")?, "to_seq")?,
    )
    .map_err(|e| LedgerError::corrupt(format!("checkpoint {}: {}", checkpoint_id, e)))?;

    Ok(Checkpoint {
        checkpoint_id: Uuid::parse_str(&checkpoint_id)
            .map_err(|e| LedgerError::corrupt(format!("checkpoint id {:?}: {}", checkpoint_id, e)))?,
        tenant_id: row.try_get("tenant_id")?,
        covered_range,
        rollup_hash: hash_column(row, "rollup_hash")?,
        rollup_kind: row.try_get::<String, _>("rollup_kind")?.parse()?,
        tail_hash: hash_column(row, "tail_hash")?,
        event_count: from_db_int(row.try_get("event_count")?, "event_count")?,
        action: row.try_get::<String, _>("action")?.parse()?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}
