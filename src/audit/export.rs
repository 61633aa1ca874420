//! Offline export and verification.
//!
//! A tenant's ledger is written as JSON Lines: one header record, every
//! checkpoint, then every event in sequence order with base64 payloads.
//! Anyone holding the file can replay the chain without store access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audit::cancel::CancelToken;
use crate::audit::checkpoint::Checkpoint;
use crate::audit::event::{AuditEvent, ContentHash, SequenceRange};
use crate::audit::verify::{DivergenceKind, IntegrityVerifier, VerificationReport};
use crate::error::{LedgerError, LedgerResult};
use crate::store::{InMemoryLedgerStore, LedgerStore};

pub const EXPORT_FORMAT: &str = "compliance-ledger-export/v1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportHeader {
    pub format: String,
    pub tenant_id: String,
    pub exported_at: DateTime<Utc>,
    /// Tail at the moment the export started; later appends are excluded.
    pub last_sequence: u64,
    pub last_content_hash: ContentHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum ExportRecord {
    Header(ExportHeader),
    Checkpoint(Checkpoint),
    Event(AuditEvent),
}

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub events: u64,
    pub checkpoints: usize,
}

#[derive(Debug, Clone)]
pub struct LoadedExport {
    pub header: ExportHeader,
    pub checkpoints: Vec<Checkpoint>,
    pub events: Vec<AuditEvent>,
}

fn write_record(writer: &mut impl Write, record: &ExportRecord) -> LedgerResult<()> {
    let json = serde_json::to_string(record)?;
    writeln!(writer, "{}", json)?;
    Ok(())
}

/// Write `tenant_id`'s ledger, up to its current tail, to `path`.
pub async fn export_tenant<S: LedgerStore + ?Sized>(
    store: &S,
    tenant_id: &str,
    path: &Path,
    page_size: u64,
) -> LedgerResult<ExportSummary> {
    let page_size = page_size.max(1);
    let tail = store.read_tail(tenant_id).await?;
    let checkpoints = store.list_checkpoints(tenant_id).await?;

    let mut writer = BufWriter::new(File::create(path)?);
    write_record(
        &mut writer,
        &ExportRecord::Header(ExportHeader {
            format: EXPORT_FORMAT.to_string(),
            tenant_id: tenant_id.to_string(),
            exported_at: Utc::now(),
            last_sequence: tail.last_sequence,
            last_content_hash: tail.last_content_hash,
        }),
    )?;
    for checkpoint in &checkpoints {
        write_record(&mut writer, &ExportRecord::Checkpoint(checkpoint.clone()))?;
    }

    let mut events = 0u64;
    let mut next = 1;
    while next <= tail.last_sequence {
        let to = next.saturating_add(page_size - 1).min(tail.last_sequence);
        let page = store
            .read_range(tenant_id, SequenceRange { from_seq: next, to_seq: to })
            .await?;
        for event in page {
            write_record(&mut writer, &ExportRecord::Event(event))?;
            events += 1;
        }
        next = to + 1;
    }
    writer.flush()?;

    info!(
        tenant_id = %tenant_id,
        events,
        checkpoints = checkpoints.len(),
        "Exported ledger to {:?}",
        path
    );
    Ok(ExportSummary {
        path: path.to_path_buf(),
        events,
        checkpoints: checkpoints.len(),
    })
}

/// Parse an export file. The first record must be the header and every
/// record must belong to the header's tenant.
pub fn load_export(path: &Path) -> LedgerResult<LoadedExport> {
    let file = File::open(path)
        .map_err(|e| LedgerError::corrupt(format!("Failed to open export {:?}: {}", path, e)))?;
    let reader = BufReader::new(file);

    let mut header: Option<ExportHeader> = None;
    let mut checkpoints = Vec::new();
    let mut events = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: ExportRecord = serde_json::from_str(&line).map_err(|e| {
            LedgerError::corrupt(format!("Failed to parse record at line {}: {}", line_num + 1, e))
        })?;

        let Some(current) = &header else {
            match record {
                ExportRecord::Header(h) if h.format == EXPORT_FORMAT => {
                    header = Some(h);
                    continue;
                }
                ExportRecord::Header(h) => {
                    return Err(LedgerError::corrupt(format!("unsupported export format {:?}", h.format)));
                }
                _ => return Err(LedgerError::corrupt("export does not start with a header")),
            }
        };

        match record {
            ExportRecord::Header(_) => {
                return Err(LedgerError::corrupt(format!("second header at line {}", line_num + 1)));
            }
            ExportRecord::Checkpoint(c) if c.tenant_id == current.tenant_id => checkpoints.push(c),
            ExportRecord::Event(e) if e.tenant_id == current.tenant_id => events.push(e),
            _ => {
                return Err(LedgerError::corrupt(format!(
                    "record at line {} belongs to another tenant",
                    line_num + 1
                )));
            }
        }
    }

    let header = header.ok_or_else(|| LedgerError::corrupt("export file is empty"))?;
    debug!("Loaded {} events and {} checkpoints from {:?}", events.len(), checkpoints.len(), path);
    Ok(LoadedExport { header, checkpoints, events })
}

/// Replay an export file from genesis with the same verifier used against
/// live stores, and check it ends at the tail recorded in its header.
pub async fn verify_export(path: &Path, page_size: u64) -> LedgerResult<VerificationReport> {
    info!("Verifying ledger export: {:?}", path);
    let LoadedExport { header, checkpoints, events } = load_export(path)?;

    let store = Arc::new(InMemoryLedgerStore::from_records(events, checkpoints).await);
    let tail = store.read_tail(&header.tenant_id).await?;
    let mut report = IntegrityVerifier::new(store, page_size)
        .verify(&header.tenant_id, Some(1), &CancelToken::new())
        .await?;

    if report.valid {
        let truncation = if tail.last_sequence < header.last_sequence {
            Some((tail.last_sequence + 1, DivergenceKind::SequenceGap))
        } else if tail.last_sequence > header.last_sequence {
            Some((header.last_sequence + 1, DivergenceKind::SequenceGap))
        } else if tail.last_content_hash != header.last_content_hash {
            Some((header.last_sequence, DivergenceKind::HashMismatch))
        } else {
            None
        };
        if let Some((sequence, kind)) = truncation {
            warn!(
                tenant_id = %header.tenant_id,
                sequence,
                "export does not end at the tail recorded in its header"
            );
            report.valid = false;
            report.first_divergence = Some(sequence);
            report.divergence_kind = Some(kind);
        }
    }
    Ok(report)
}
