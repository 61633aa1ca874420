//! Audit Event
//!
//! Defines the ledger entry, the digest type that links entries together,
//! and the caller-facing append request/response shapes.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerError;

const HASH_PREFIX: &str = "sha256:";

/// 32-byte SHA-256 digest used for content hashes and rollups.
///
/// Rendered as `sha256:<64 lowercase hex>` in text and JSON.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The reserved `previous_hash` of every tenant's first event.
    pub const GENESIS: ContentHash = ContentHash([0u8; 32]);

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_genesis(&self) -> bool {
        *self == Self::GENESIS
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", HASH_PREFIX, hex::encode(self.0))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self)
    }
}

impl FromStr for ContentHash {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex_part = s.strip_prefix(HASH_PREFIX).unwrap_or(s);
        let raw = hex::decode(hex_part)
            .map_err(|e| LedgerError::corrupt(format!("invalid hash {:?}: {}", s, e)))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| LedgerError::corrupt(format!("hash {:?} is not 32 bytes", s)))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Inclusive range of sequence numbers within one tenant's chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRange {
    pub from_seq: u64,
    pub to_seq: u64,
}

impl SequenceRange {
    pub fn new(from_seq: u64, to_seq: u64) -> Result<Self, LedgerError> {
        if from_seq == 0 {
            return Err(LedgerError::InvalidRange("sequences start at 1".to_string()));
        }
        if from_seq > to_seq {
            return Err(LedgerError::InvalidRange(format!(
                "from {} is after to {}",
                from_seq, to_seq
            )));
        }
        Ok(Self { from_seq, to_seq })
    }

    pub fn contains(&self, sequence: u64) -> bool {
        sequence >= self.from_seq && sequence <= self.to_seq
    }

    pub fn count(&self) -> u64 {
        self.to_seq - self.from_seq + 1
    }
}

impl fmt::Display for SequenceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from_seq, self.to_seq)
    }
}

/// A request to record one sensitive action.
///
/// `payload` is plaintext here; the ledger passes it through the
/// encryption vault before it is hashed or stored.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub tenant_id: String,
    pub actor_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: Vec<u8>,
    pub idempotency_key: Option<String>,
}

impl NewEvent {
    pub fn new(
        tenant_id: impl Into<String>,
        actor_id: impl Into<String>,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            actor_id: actor_id.into(),
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            occurred_at: Utc::now(),
            payload: Vec::new(),
            idempotency_key: None,
        }
    }

    pub fn occurred_at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }

    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Reject requests the chain cannot meaningfully attribute.
    pub fn validate(&self) -> Result<(), LedgerError> {
        for (name, value) in [
            ("tenant_id", &self.tenant_id),
            ("actor_id", &self.actor_id),
            ("action", &self.action),
        ] {
            if value.is_empty() {
                return Err(LedgerError::InvalidEvent(format!("{} must not be empty", name)));
            }
        }
        if matches!(&self.idempotency_key, Some(key) if key.is_empty()) {
            return Err(LedgerError::InvalidEvent(
                "idempotency_key must not be empty when present".to_string(),
            ));
        }
        Ok(())
    }
}

/// One immutable entry in a tenant's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub tenant_id: String,
    pub sequence: u64,
    pub actor_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    pub occurred_at: DateTime<Utc>,
    /// Ciphertext as produced by the vault; `None` once erased by retention.
    #[serde(with = "payload_base64")]
    pub payload: Option<Vec<u8>>,
    pub previous_hash: ContentHash,
    pub content_hash: ContentHash,
}

impl AuditEvent {
    pub fn payload_erased(&self) -> bool {
        self.payload.is_none()
    }

    pub fn summary(&self) -> String {
        format!(
            "{}#{} {} {} {}/{}",
            self.tenant_id,
            self.sequence,
            self.actor_id,
            self.action,
            self.resource_type,
            self.resource_id
        )
    }
}

/// Normalize a caller timestamp to the precision the ledger persists.
pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

/// What `append` hands back once the store has confirmed the write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventReceipt {
    pub tenant_id: String,
    pub sequence: u64,
    pub content_hash: ContentHash,
    /// True when the idempotency key matched an event recorded earlier.
    pub deduplicated: bool,
}

mod payload_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(payload: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match payload {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_content_hash_text_form() {
        let hash = ContentHash::from_bytes([0xab; 32]);
        let text = hash.to_string();
        assert!(text.starts_with("sha256:"));
        assert_eq!(text.len(), 71); // "sha256:" + 64 hex chars

        let parsed: ContentHash = text.parse().unwrap();
        assert_eq!(parsed, hash);

        // bare hex is accepted too
        let bare: ContentHash = hash.to_hex().parse().unwrap();
        assert_eq!(bare, hash);
    }

    #[test]
    fn test_content_hash_rejects_bad_input() {
        assert!("sha256:zz".parse::<ContentHash>().is_err());
        assert!("sha256:abcd".parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_genesis_is_all_zero() {
        assert!(ContentHash::GENESIS.is_genesis());
        assert_eq!(ContentHash::GENESIS.as_bytes(), &[0u8; 32]);
    }

    #[test]
    fn test_sequence_range_bounds() {
        assert!(SequenceRange::new(0, 3).is_err());
        assert!(SequenceRange::new(5, 4).is_err());

        let range = SequenceRange::new(2, 4).unwrap();
        assert_eq!(range.count(), 3);
        assert!(range.contains(2) && range.contains(4));
        assert!(!range.contains(5));
    }

    #[test]
    fn test_new_event_validation() {
        assert!(NewEvent::new("t1", "u1", "consent.grant", "student", "s-1")
            .validate()
            .is_ok());
        assert!(NewEvent::new("", "u1", "a", "r", "1").validate().is_err());
        assert!(NewEvent::new("t1", "", "a", "r", "1").validate().is_err());
        assert!(NewEvent::new("t1", "u1", "a", "r", "1")
            .idempotency_key("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_event_json_payload_is_base64() {
        let event = AuditEvent {
            tenant_id: "t1".to_string(),
            sequence: 1,
            actor_id: "u1".to_string(),
            action: "consent.grant".to_string(),
            resource_type: "student".to_string(),
            resource_id: "s-1".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            payload: Some(b"cipher".to_vec()),
            previous_hash: ContentHash::GENESIS,
            content_hash: ContentHash::from_bytes([1; 32]),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"], "Y2lwaGVy");

        let back: AuditEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);

        let erased = AuditEvent { payload: None, ..event };
        let json = serde_json::to_value(&erased).unwrap();
        assert!(json["payload"].is_null());
        assert!(erased.payload_erased());
    }
}
