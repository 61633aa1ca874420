//! Append Coordinator
//!
//! Serializes appends per tenant through the store's conditional write
//! rather than a process-local lock, so any number of service instances can
//! write concurrently:
//!
//! 1. read the tenant's tail,
//! 2. build the next event linked to it,
//! 3. conditionally append, expecting the tail to be unchanged,
//! 4. on conflict, back off and start over, up to `max_attempts`.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::audit::chain::hash_fields;
use crate::audit::encoding::EventFields;
use crate::audit::event::{normalize_timestamp, AuditEvent, EventReceipt, NewEvent};
use crate::config::AppendConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::store::{AppendOutcome, ChainTail, LedgerStore};

pub struct AppendCoordinator<S: ?Sized> {
    store: Arc<S>,
    config: AppendConfig,
}

impl<S: LedgerStore + ?Sized> AppendCoordinator<S> {
    pub fn new(store: Arc<S>, config: AppendConfig) -> Self {
        Self { store, config }
    }

    /// Record `request` with an already-encrypted payload.
    ///
    /// Returns only after the store has confirmed the write, or the
    /// idempotency key matched an earlier event.
    pub async fn append(&self, request: &NewEvent, ciphertext: &[u8]) -> LedgerResult<EventReceipt> {
        request.validate()?;
        let occurred_at = normalize_timestamp(request.occurred_at);
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let tail = self.store.read_tail(&request.tenant_id).await?;
            let event = link_event(request, occurred_at, ciphertext, &tail);

            match self
                .store
                .conditional_append(tail.last_sequence, &event, request.idempotency_key.as_deref())
                .await?
            {
                AppendOutcome::Appended => {
                    info!(
                        tenant_id = %event.tenant_id,
                        sequence = event.sequence,
                        action = %event.action,
                        attempt,
                        "audit event appended"
                    );
                    return Ok(EventReceipt {
                        tenant_id: event.tenant_id,
                        sequence: event.sequence,
                        content_hash: event.content_hash,
                        deduplicated: false,
                    });
                }
                AppendOutcome::Duplicate(existing) => {
                    debug!(
                        tenant_id = %existing.tenant_id,
                        sequence = existing.sequence,
                        "idempotency key already recorded"
                    );
                    return Ok(EventReceipt {
                        tenant_id: existing.tenant_id,
                        sequence: existing.sequence,
                        content_hash: existing.content_hash,
                        deduplicated: true,
                    });
                }
                AppendOutcome::Conflict => {
                    debug!(
                        tenant_id = %request.tenant_id,
                        expected_tail = tail.last_sequence,
                        attempt,
                        "tail moved during append"
                    );
                    if attempt < max_attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        warn!(
            tenant_id = %request.tenant_id,
            attempts = max_attempts,
            "append gave up after repeated conflicts"
        );
        Err(LedgerError::ConflictRetryExhausted {
            tenant_id: request.tenant_id.clone(),
            attempts: max_attempts,
        })
    }

    /// Full-jitter exponential backoff for the given (1-based) attempt.
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = self
            .config
            .base_backoff_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16));
        let ceiling = exp.min(self.config.max_backoff_ms);
        if ceiling == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
    }
}

/// Build the event that would follow `tail`.
fn link_event(
    request: &NewEvent,
    occurred_at: chrono::DateTime<chrono::Utc>,
    ciphertext: &[u8],
    tail: &ChainTail,
) -> AuditEvent {
    let sequence = tail.next_sequence();
    let fields = EventFields {
        tenant_id: &request.tenant_id,
        sequence,
        actor_id: &request.actor_id,
        action: &request.action,
        resource_type: &request.resource_type,
        resource_id: &request.resource_id,
        occurred_at,
        payload: ciphertext,
    };
    let content_hash = hash_fields(&fields, &tail.last_content_hash);

    AuditEvent {
        tenant_id: request.tenant_id.clone(),
        sequence,
        actor_id: request.actor_id.clone(),
        action: request.action.clone(),
        resource_type: request.resource_type.clone(),
        resource_id: request.resource_id.clone(),
        occurred_at,
        payload: Some(ciphertext.to_vec()),
        previous_hash: tail.last_content_hash,
        content_hash,
    }
}
