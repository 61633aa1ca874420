//! Audit Ledger
//!
//! Per-tenant, append-only event chains. Every event commits to its
//! predecessor through a SHA-256 content hash, so any edit, deletion or
//! reordering of stored history is detectable by replay. Retention folds
//! expired ranges into checkpoints without breaking that property.

pub mod append;
pub mod cancel;
pub mod chain;
pub mod checkpoint;
pub mod encoding;
pub mod event;
pub mod export;
pub mod ledger;
pub mod merkle;
pub mod retention;
pub mod verify;

pub use cancel::CancelToken;
pub use checkpoint::{Checkpoint, RetentionAction, RetentionPolicy};
pub use event::{AuditEvent, ContentHash, EventReceipt, NewEvent, SequenceRange};
pub use export::{export_tenant, load_export, verify_export};
pub use ledger::AuditLedger;
pub use merkle::{MerkleProof, RollupKind};
pub use retention::{ErasureSweep, RetentionReceipt};
pub use verify::{DivergenceKind, VerificationReport};
