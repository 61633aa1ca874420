//! Canonical Event Encoding
//!
//! Serializes the logical fields of an audit event into a fixed byte
//! sequence. The layout is independent of struct field order, JSON key
//! order or database column order:
//!
//! ```text
//! DOMAIN_TAG
//! len(tenant_id)     u64 BE | tenant_id bytes
//! sequence           u64 BE
//! len(actor_id)      u64 BE | actor_id bytes
//! len(action)        u64 BE | action bytes
//! len(resource_type) u64 BE | resource_type bytes
//! len(resource_id)   u64 BE | resource_id bytes
//! occurred_at        i64 BE, Unix microseconds
//! len(payload)       u64 BE | payload bytes
//! ```
//!
//! Length prefixes keep adjacent variable-length fields from sliding into
//! each other (`"ab" + "c"` never encodes like `"a" + "bc"`).

use chrono::{DateTime, Utc};

use crate::audit::event::AuditEvent;

/// Versioned tag that opens every encoding.
pub const DOMAIN_TAG: &[u8] = b"compliance-ledger/event/v1";

/// Borrowed view of the fields that contribute to an event's content hash,
/// minus the previous hash which the chain engine supplies.
#[derive(Debug, Clone, Copy)]
pub struct EventFields<'a> {
    pub tenant_id: &'a str,
    pub sequence: u64,
    pub actor_id: &'a str,
    pub action: &'a str,
    pub resource_type: &'a str,
    pub resource_id: &'a str,
    pub occurred_at: DateTime<Utc>,
    pub payload: &'a [u8],
}

impl<'a> EventFields<'a> {
    /// Fields of a stored event, or `None` when its payload has been erased.
    pub fn of(event: &'a AuditEvent) -> Option<Self> {
        let payload = event.payload.as_deref()?;
        Some(Self {
            tenant_id: &event.tenant_id,
            sequence: event.sequence,
            actor_id: &event.actor_id,
            action: &event.action,
            resource_type: &event.resource_type,
            resource_id: &event.resource_id,
            occurred_at: event.occurred_at,
            payload,
        })
    }

    fn encoded_len(&self) -> usize {
        DOMAIN_TAG.len()
            + 8 * 8
            + self.tenant_id.len()
            + self.actor_id.len()
            + self.action.len()
            + self.resource_type.len()
            + self.resource_id.len()
            + self.payload.len()
    }
}

/// Encode event fields into their canonical byte form.
pub fn encode(fields: &EventFields<'_>) -> Vec<u8> {
    let mut out = Vec::with_capacity(fields.encoded_len());
    out.extend_from_slice(DOMAIN_TAG);
    put_bytes(&mut out, fields.tenant_id.as_bytes());
    out.extend_from_slice(&fields.sequence.to_be_bytes());
    put_bytes(&mut out, fields.actor_id.as_bytes());
    put_bytes(&mut out, fields.action.as_bytes());
    put_bytes(&mut out, fields.resource_type.as_bytes());
    put_bytes(&mut out, fields.resource_id.as_bytes());
    out.extend_from_slice(&fields.occurred_at.timestamp_micros().to_be_bytes());
    put_bytes(&mut out, fields.payload);
    out
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_be_bytes());
    out.extend_from_slice(bytes);
}
