//! Checkpoints and Retention Policies
//!
//! A checkpoint is the durable summary left behind when a range of events
//! expires. It is written once and never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::audit::event::{ContentHash, SequenceRange};
use crate::audit::merkle::RollupKind;
use crate::error::LedgerError;

/// What retention does with the payloads of an expired range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionAction {
    /// Summarize, keep payloads for an external archiver.
    Archive,
    /// Summarize, then erase payloads.
    Anonymize,
    /// Summarize, then erase payloads.
    Rollup,
}

impl RetentionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionAction::Archive => "archive",
            RetentionAction::Anonymize => "anonymize",
            RetentionAction::Rollup => "rollup",
        }
    }

    pub fn erases_payloads(&self) -> bool {
        !matches!(self, RetentionAction::Archive)
    }

    /// Reason recorded on checkpoints produced by this action.
    pub fn reason(&self) -> &'static str {
        match self {
            RetentionAction::Archive => "retention-archived",
            RetentionAction::Anonymize => "retention-anonymized",
            RetentionAction::Rollup => "retention-expired",
        }
    }
}

impl fmt::Display for RetentionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetentionAction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "archive" => Ok(RetentionAction::Archive),
            "anonymize" => Ok(RetentionAction::Anonymize),
            "rollup" => Ok(RetentionAction::Rollup),
            other => Err(LedgerError::corrupt(format!("unknown retention action {:?}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub max_age_days: u32,
    pub action: RetentionAction,
}

impl RetentionPolicy {
    pub fn new(max_age_days: u32, action: RetentionAction) -> Self {
        Self { max_age_days, action }
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.max_age_days == 0 {
            return Err(LedgerError::ConfigError(
                "max_age_days must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Events that occurred strictly before this instant are expired.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(self.max_age_days))
    }
}

/// Immutable rollup record for an expired, contiguous range of events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub checkpoint_id: Uuid,
    pub tenant_id: String,
    pub covered_range: SequenceRange,
    pub rollup_hash: ContentHash,
    pub rollup_kind: RollupKind,
    /// Content hash of the event at `covered_range.to_seq`; replay from the
    /// boundary starts with this as the expected previous hash.
    pub tail_hash: ContentHash,
    pub event_count: u64,
    pub action: RetentionAction,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn summary(&self) -> String {
        format!(
            "checkpoint {} for {} covering {} ({} events, {} rollup {}, {})",
            self.checkpoint_id,
            self.tenant_id,
            self.covered_range,
            self.event_count,
            self.rollup_kind,
            self.rollup_hash,
            self.reason
        )
    }
}
