//! Audit storage backends. Both sinks are append-and-query only; there
//! is deliberately no update or delete surface.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use std::sync::Mutex;

use crate::core::errors::GovernanceError;
use crate::core::models::{
    AuditFilter, AuditLogEntry, AuthorizationOutcome, ComplianceMarker, ExecutionOutcome, PiiType,
    RiskLevel,
};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), GovernanceError>;
    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, GovernanceError>;
}

fn matches_filter(entry: &AuditLogEntry, filter: &AuditFilter) -> bool {
    if let Some(agent_id) = &filter.agent_id {
        if &entry.agent_id != agent_id {
            return false;
        }
    }
    if let Some(correlation_id) = &filter.correlation_id {
        if &entry.correlation_id != correlation_id {
            return false;
        }
    }
    if let Some(since) = &filter.since {
        if entry.timestamp_utc < *since {
            return false;
        }
    }
    if let Some(min_risk) = &filter.min_risk_level {
        if entry.risk_level < *min_risk {
            return false;
        }
    }
    true
}

/// In-process sink backed by a plain Vec. Doubles as the fallback sink
/// when the durable store is unreachable.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditLogEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), GovernanceError> {
        let mut guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(entry.clone());
        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, GovernanceError> {
        let guard = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(guard
            .iter()
            .filter(|e| matches_filter(e, filter))
            .cloned()
            .collect())
    }
}

/// Durable sink over Postgres. Enum fields are stored as text columns,
/// list fields as text arrays.
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    correlation_id: uuid::Uuid,
    agent_id: String,
    timestamp_utc: chrono::DateTime<chrono::Utc>,
    sanitized_query: String,
    risk_level: String,
    pii_types_found: Vec<String>,
    authorization_outcome: String,
    execution_outcome: String,
    compliance_markers: Vec<String>,
    duration_ms: i64,
    prev_hash: String,
    entry_hash: String,
}

fn authz_outcome_str(outcome: AuthorizationOutcome) -> &'static str {
    match outcome {
        AuthorizationOutcome::Granted => "granted",
        AuthorizationOutcome::Denied => "denied",
        AuthorizationOutcome::NotReached => "not_reached",
    }
}

fn exec_outcome_str(outcome: ExecutionOutcome) -> &'static str {
    match outcome {
        ExecutionOutcome::Completed => "completed",
        ExecutionOutcome::Failed => "failed",
        ExecutionOutcome::TimedOut => "timed_out",
        ExecutionOutcome::CircuitOpen => "circuit_open",
        ExecutionOutcome::NotReached => "not_reached",
    }
}

fn marker_str(marker: ComplianceMarker) -> &'static str {
    match marker {
        ComplianceMarker::Gdpr => "gdpr",
        ComplianceMarker::Hipaa => "hipaa",
        ComplianceMarker::Pci => "pci",
    }
}

fn parse_risk(value: &str) -> Result<RiskLevel, GovernanceError> {
    match value {
        "low" => Ok(RiskLevel::Low),
        "medium" => Ok(RiskLevel::Medium),
        "high" => Ok(RiskLevel::High),
        "critical" => Ok(RiskLevel::Critical),
        other => Err(GovernanceError::Internal(format!(
            "unknown risk level in audit row: {other}"
        ))),
    }
}

fn parse_pii(value: &str) -> Result<PiiType, GovernanceError> {
    match value {
        "email" => Ok(PiiType::Email),
        "phone" => Ok(PiiType::Phone),
        "ssn" => Ok(PiiType::Ssn),
        "credit_card" => Ok(PiiType::CreditCard),
        "name" => Ok(PiiType::Name),
        "address" => Ok(PiiType::Address),
        "date_of_birth" => Ok(PiiType::DateOfBirth),
        other => Err(GovernanceError::Internal(format!(
            "unknown pii type in audit row: {other}"
        ))),
    }
}

fn parse_authz_outcome(value: &str) -> Result<AuthorizationOutcome, GovernanceError> {
    match value {
        "granted" => Ok(AuthorizationOutcome::Granted),
        "denied" => Ok(AuthorizationOutcome::Denied),
        "not_reached" => Ok(AuthorizationOutcome::NotReached),
        other => Err(GovernanceError::Internal(format!(
            "unknown authorization outcome in audit row: {other}"
        ))),
    }
}

fn parse_exec_outcome(value: &str) -> Result<ExecutionOutcome, GovernanceError> {
    match value {
        "completed" => Ok(ExecutionOutcome::Completed),
        "failed" => Ok(ExecutionOutcome::Failed),
        "timed_out" => Ok(ExecutionOutcome::TimedOut),
        "circuit_open" => Ok(ExecutionOutcome::CircuitOpen),
        "not_reached" => Ok(ExecutionOutcome::NotReached),
        other => Err(GovernanceError::Internal(format!(
            "unknown execution outcome in audit row: {other}"
        ))),
    }
}

fn parse_marker(value: &str) -> Result<ComplianceMarker, GovernanceError> {
    match value {
        "gdpr" => Ok(ComplianceMarker::Gdpr),
        "hipaa" => Ok(ComplianceMarker::Hipaa),
        "pci" => Ok(ComplianceMarker::Pci),
        other => Err(GovernanceError::Internal(format!(
            "unknown compliance marker in audit row: {other}"
        ))),
    }
}

impl TryFrom<AuditRow> for AuditLogEntry {
    type Error = GovernanceError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditLogEntry {
            correlation_id: row.correlation_id,
            agent_id: row.agent_id,
            timestamp_utc: row.timestamp_utc,
            sanitized_query: row.sanitized_query,
            risk_level: parse_risk(&row.risk_level)?,
            pii_types_found: row
                .pii_types_found
                .iter()
                .map(|s| parse_pii(s))
                .collect::<Result<Vec<_>, _>>()?,
            authorization_outcome: parse_authz_outcome(&row.authorization_outcome)?,
            execution_outcome: parse_exec_outcome(&row.execution_outcome)?,
            compliance_markers: row
                .compliance_markers
                .iter()
                .map(|s| parse_marker(s))
                .collect::<Result<Vec<_>, _>>()?,
            duration_ms: row.duration_ms.max(0) as u64,
            prev_hash: row.prev_hash,
            entry_hash: row.entry_hash,
        })
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), GovernanceError> {
        let pii: Vec<String> = entry
            .pii_types_found
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        let markers: Vec<String> = entry
            .compliance_markers
            .iter()
            .map(|m| marker_str(*m).to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO audit_log (
                correlation_id, agent_id, timestamp_utc, sanitized_query,
                risk_level, pii_types_found, authorization_outcome,
                execution_outcome, compliance_markers, duration_ms,
                prev_hash, entry_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(entry.correlation_id)
        .bind(&entry.agent_id)
        .bind(entry.timestamp_utc)
        .bind(&entry.sanitized_query)
        .bind(entry.risk_level.as_str())
        .bind(&pii)
        .bind(authz_outcome_str(entry.authorization_outcome))
        .bind(exec_outcome_str(entry.execution_outcome))
        .bind(&markers)
        .bind(entry.duration_ms as i64)
        .bind(&entry.prev_hash)
        .bind(&entry.entry_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| GovernanceError::AuditSinkUnavailable(e.to_string()))?;

        Ok(())
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, GovernanceError> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT correlation_id, agent_id, timestamp_utc, sanitized_query,
                   risk_level, pii_types_found, authorization_outcome,
                   execution_outcome, compliance_markers, duration_ms,
                   prev_hash, entry_hash
            FROM audit_log
            WHERE ($1::text IS NULL OR agent_id = $1)
              AND ($2::uuid IS NULL OR correlation_id = $2)
              AND ($3::timestamptz IS NULL OR timestamp_utc >= $3)
            ORDER BY timestamp_utc ASC
            "#,
        )
        .bind(&filter.agent_id)
        .bind(filter.correlation_id)
        .bind(filter.since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| GovernanceError::AuditSinkUnavailable(e.to_string()))?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            entries.push(AuditLogEntry::try_from(row)?);
        }
        // Risk ordering lives in the domain type, not the schema.
        if let Some(min_risk) = filter.min_risk_level {
            entries.retain(|e| e.risk_level >= min_risk);
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn entry(agent_id: &str, risk: RiskLevel) -> AuditLogEntry {
        AuditLogEntry {
            correlation_id: Uuid::new_v4(),
            agent_id: agent_id.to_string(),
            timestamp_utc: Utc::now(),
            sanitized_query: "SELECT * FROM t WHERE id = ?".to_string(),
            risk_level: risk,
            pii_types_found: vec![],
            authorization_outcome: AuthorizationOutcome::Granted,
            execution_outcome: ExecutionOutcome::Completed,
            compliance_markers: vec![],
            duration_ms: 5,
            prev_hash: "0".repeat(64),
            entry_hash: "a".repeat(64),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_append_and_query() {
        let sink = MemoryAuditSink::new();
        sink.append(&entry("agent-7", RiskLevel::Low)).await.unwrap();
        sink.append(&entry("agent-9", RiskLevel::High)).await.unwrap();

        let all = sink.query(&AuditFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let by_agent = sink
            .query(&AuditFilter {
                agent_id: Some("agent-7".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_agent.len(), 1);
        assert_eq!(by_agent[0].agent_id, "agent-7");
    }

    #[tokio::test]
    async fn test_memory_sink_min_risk_filter() {
        let sink = MemoryAuditSink::new();
        sink.append(&entry("a", RiskLevel::Low)).await.unwrap();
        sink.append(&entry("a", RiskLevel::Medium)).await.unwrap();
        sink.append(&entry("a", RiskLevel::Critical)).await.unwrap();

        let high = sink
            .query(&AuditFilter {
                min_risk_level: Some(RiskLevel::Medium),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(high.len(), 2);
    }

    #[tokio::test]
    async fn test_memory_sink_correlation_filter() {
        let sink = MemoryAuditSink::new();
        let target = entry("a", RiskLevel::Low);
        let wanted = target.correlation_id;
        sink.append(&target).await.unwrap();
        sink.append(&entry("a", RiskLevel::Low)).await.unwrap();

        let found = sink
            .query(&AuditFilter {
                correlation_id: Some(wanted),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].correlation_id, wanted);
    }

    #[test]
    fn test_outcome_strings_round_trip() {
        for outcome in [
            ExecutionOutcome::Completed,
            ExecutionOutcome::Failed,
            ExecutionOutcome::TimedOut,
            ExecutionOutcome::CircuitOpen,
            ExecutionOutcome::NotReached,
        ] {
            assert_eq!(parse_exec_outcome(exec_outcome_str(outcome)).unwrap(), outcome);
        }
    }
}
