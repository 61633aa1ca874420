//! Hash Chain Engine
//!
//! `content_hash = SHA-256(previous_hash || canonical_bytes)`, where the
//! previous hash is the raw 32-byte digest of the prior event in the same
//! tenant's chain, or `ContentHash::GENESIS` for sequence 1.

use sha2::{Digest, Sha256};

use crate::audit::encoding::{encode, EventFields};
use crate::audit::event::{AuditEvent, ContentHash};

/// Link canonical bytes onto the chain.
pub fn next_hash(previous_hash: &ContentHash, canonical_bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(canonical_bytes);
    ContentHash::from_bytes(hasher.finalize().into())
}

/// Content hash for a set of fields linked to `previous_hash`.
pub fn hash_fields(fields: &EventFields<'_>, previous_hash: &ContentHash) -> ContentHash {
    next_hash(previous_hash, &encode(fields))
}

/// Recompute a stored event's content hash from its own fields.
///
/// Returns `None` when the payload has been erased and the hash can no
/// longer be derived.
pub fn recompute(event: &AuditEvent) -> Option<ContentHash> {
    EventFields::of(event).map(|fields| hash_fields(&fields, &event.previous_hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(sequence: u64, previous_hash: ContentHash) -> AuditEvent {
        let mut event = AuditEvent {
            tenant_id: "T1".to_string(),
            sequence,
            actor_id: "u1".to_string(),
            action: "consent.grant".to_string(),
            resource_type: "student".to_string(),
            resource_id: "s-1".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            payload: Some(format!("payload-{}", sequence).into_bytes()),
            previous_hash,
            content_hash: ContentHash::GENESIS,
        };
        event.content_hash = recompute(&event).unwrap();
        event
    }

    #[test]
    fn test_next_hash_is_deterministic() {
        let h1 = next_hash(&ContentHash::GENESIS, b"abc");
        let h2 = next_hash(&ContentHash::GENESIS, b"abc");
        assert_eq!(h1, h2);
        assert!(!h1.is_genesis());
    }

    #[test]
    fn test_previous_hash_changes_result() {
        let other = ContentHash::from_bytes([7; 32]);
        assert_ne!(
            next_hash(&ContentHash::GENESIS, b"abc"),
            next_hash(&other, b"abc")
        );
    }

    #[test]
    fn test_chain_links() {
        let first = event(1, ContentHash::GENESIS);
        let second = event(2, first.content_hash);
        assert_eq!(second.previous_hash, first.content_hash);
        assert_eq!(recompute(&second), Some(second.content_hash));
    }

    #[test]
    fn test_recompute_detects_payload_change() {
        let mut first = event(1, ContentHash::GENESIS);
        first.payload.as_mut().unwrap()[0] ^= 0x01;
        assert_ne!(recompute(&first), Some(first.content_hash));
    }

    #[test]
    fn test_recompute_without_payload() {
        let mut first = event(1, ContentHash::GENESIS);
        first.payload = None;
        assert_eq!(recompute(&first), None);
    }
}
