//! Append-only audit trail. Every governed request produces exactly one
//! entry here regardless of how the pipeline ended. Entries are hash
//! chained so tampering with a stored record breaks verification of
//! every later record.

pub mod sanitizer;
pub mod sink;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::core::errors::GovernanceError;
use crate::core::models::{
    AuditFilter, AuditLogEntry, AuthorizationOutcome, ComplianceMarker, ExecutionOutcome, PiiType,
    RiskLevel,
};

pub use sink::{AuditSink, MemoryAuditSink, PgAuditSink};

const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// What the pipeline hands the recorder. The raw query is sanitized
/// here so no caller can slip an unredacted query into the trail.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub correlation_id: Uuid,
    pub agent_id: String,
    pub raw_query: String,
    pub risk_level: RiskLevel,
    pub pii_types_found: Vec<PiiType>,
    pub authorization_outcome: AuthorizationOutcome,
    pub execution_outcome: ExecutionOutcome,
    pub duration_ms: u64,
}

/// Where the entry ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditRecordOutcome {
    /// Persisted to the durable sink.
    Recorded,
    /// Durable sink unreachable; entry retained in the fallback sink.
    FellBack,
    /// Durable sink unreachable and the recorder is configured to treat
    /// that as fatal. The entry is still retained in the fallback sink.
    FailedClosed,
}

pub struct AuditTrailRecorder {
    primary: Arc<dyn AuditSink>,
    fallback: Arc<MemoryAuditSink>,
    chain_tail: Mutex<String>,
    retry_max: u32,
    retry_delay: Duration,
    fail_closed: bool,
    query_max_len: usize,
}

impl AuditTrailRecorder {
    pub fn new(primary: Arc<dyn AuditSink>, config: &Config) -> Self {
        Self {
            primary,
            fallback: Arc::new(MemoryAuditSink::new()),
            chain_tail: Mutex::new(GENESIS_HASH.to_string()),
            retry_max: config.audit_retry_max,
            retry_delay: Duration::from_millis(config.audit_retry_delay_ms),
            fail_closed: config.audit_fail_closed,
            query_max_len: config.audit_query_max_len,
        }
    }

    /// Seal an event into a chained entry and persist it. Retries the
    /// durable sink a bounded number of times with exponential backoff,
    /// then falls back to the in-process sink so the entry is never
    /// silently dropped.
    pub async fn record(&self, event: AuditEvent) -> AuditRecordOutcome {
        let entry = self.seal(event, Utc::now());

        let mut delay = self.retry_delay;
        let mut last_err: Option<GovernanceError> = None;
        for attempt in 0..=self.retry_max {
            match self.primary.append(&entry).await {
                Ok(()) => return AuditRecordOutcome::Recorded,
                Err(e) => {
                    warn!(
                        correlation_id = %entry.correlation_id,
                        attempt = attempt + 1,
                        error = %e,
                        "audit append failed"
                    );
                    last_err = Some(e);
                }
            }
            if attempt < self.retry_max {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        // MemoryAuditSink::append is infallible.
        let _ = self.fallback.append(&entry).await;
        error!(
            correlation_id = %entry.correlation_id,
            agent_id = %entry.agent_id,
            error = %last_err.map(|e| e.to_string()).unwrap_or_default(),
            fail_closed = self.fail_closed,
            "audit entry diverted to fallback sink"
        );

        if self.fail_closed {
            AuditRecordOutcome::FailedClosed
        } else {
            AuditRecordOutcome::FellBack
        }
    }

    /// Read-only compliance surface over the durable sink.
    pub async fn history(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditLogEntry>, GovernanceError> {
        self.primary.query(filter).await
    }

    /// Entries currently held only by the fallback sink.
    pub async fn fallback_entries(&self) -> Vec<AuditLogEntry> {
        self.fallback
            .query(&AuditFilter::default())
            .await
            .unwrap_or_default()
    }

    fn seal(&self, event: AuditEvent, timestamp_utc: DateTime<Utc>) -> AuditLogEntry {
        let sanitized_query = sanitizer::sanitize_query(&event.raw_query, self.query_max_len);
        let compliance_markers = ComplianceMarker::from_pii_types(&event.pii_types_found);

        // The lock serializes chain extension; two concurrent requests
        // get distinct prev_hash values.
        let (prev_hash, entry_hash) = {
            let mut tail = match self.chain_tail.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let prev = tail.clone();
            let hash = compute_entry_hash(
                &event,
                &sanitized_query,
                &compliance_markers,
                timestamp_utc,
                &prev,
            );
            *tail = hash.clone();
            (prev, hash)
        };

        AuditLogEntry {
            correlation_id: event.correlation_id,
            agent_id: event.agent_id,
            timestamp_utc,
            sanitized_query,
            risk_level: event.risk_level,
            pii_types_found: event.pii_types_found,
            authorization_outcome: event.authorization_outcome,
            execution_outcome: event.execution_outcome,
            compliance_markers,
            duration_ms: event.duration_ms,
            prev_hash,
            entry_hash,
        }
    }
}

fn compute_entry_hash(
    event: &AuditEvent,
    sanitized_query: &str,
    markers: &[ComplianceMarker],
    timestamp_utc: DateTime<Utc>,
    prev_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(event.correlation_id.as_bytes());
    hasher.update(event.agent_id.as_bytes());
    hasher.update(timestamp_utc.to_rfc3339().as_bytes());
    hasher.update(sanitized_query.as_bytes());
    hasher.update(event.risk_level.as_str().as_bytes());
    for t in &event.pii_types_found {
        hasher.update(t.as_str().as_bytes());
    }
    hasher.update(format!("{:?}", event.authorization_outcome).as_bytes());
    hasher.update(format!("{:?}", event.execution_outcome).as_bytes());
    for m in markers {
        hasher.update(format!("{m:?}").as_bytes());
    }
    hasher.update(event.duration_ms.to_be_bytes());
    hasher.update(prev_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Walk a slice of entries in chain order and confirm each link.
pub fn verify_chain(entries: &[AuditLogEntry]) -> bool {
    let mut expected_prev = GENESIS_HASH.to_string();
    for entry in entries {
        if entry.prev_hash != expected_prev {
            return false;
        }
        expected_prev = entry.entry_hash.clone();
    }
    true
}
