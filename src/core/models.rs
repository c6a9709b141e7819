// Shared contracts for the governance pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// A single query submission from an agent.
///
/// Immutable: created once by the caller, threaded through every pipeline
/// stage by reference. The correlation id ties the tracing span, the
/// decision path and the audit entry together.
#[derive(Debug, Clone)]
pub struct GovernanceQueryRequest {
    pub agent_id: String,
    pub raw_query: String,
    pub target_tables: BTreeSet<String>,
    pub requested_at: DateTime<Utc>,
    pub claimed_clearance: ClearanceTier,
    pub correlation_id: Uuid,
    pub timeout: Duration,
}

impl GovernanceQueryRequest {
    pub fn new(
        agent_id: impl Into<String>,
        raw_query: impl Into<String>,
        target_tables: BTreeSet<String>,
        claimed_clearance: ClearanceTier,
        timeout: Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            raw_query: raw_query.into(),
            target_tables,
            requested_at: Utc::now(),
            claimed_clearance,
            correlation_id: Uuid::new_v4(),
            timeout,
        }
    }
}

/// Ordered risk classification for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskRecommendation {
    Allow,
    Block,
}

/// One catalogue pattern that fired, with the text that triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub name: String,
    pub excerpt: String,
}

/// Output of the risk analyzer. Produced once, immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityRiskAssessment {
    pub level: RiskLevel,
    pub matched_patterns: Vec<PatternMatch>,
    pub complexity_score: u32,
    pub recommendation: RiskRecommendation,
}

/// Categories of personally identifiable information the classifier detects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiType {
    Email,
    Phone,
    Ssn,
    CreditCard,
    Name,
    Address,
    DateOfBirth,
}

impl PiiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiiType::Email => "email",
            PiiType::Phone => "phone",
            PiiType::Ssn => "ssn",
            PiiType::CreditCard => "credit_card",
            PiiType::Name => "name",
            PiiType::Address => "address",
            PiiType::DateOfBirth => "date_of_birth",
        }
    }
}

/// A single sensitive-value detection. Immutable once created.
/// Invariant: `confidence` is within [0, 1] and `masked_value` never
/// contains the original sensitive substring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiFinding {
    pub field: String,
    pub pii_type: PiiType,
    pub confidence: f64,
    pub masked_value: String,
}

/// Ordered clearance tiers: Restricted < Internal < Confidential < Administrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClearanceTier {
    Restricted,
    Internal,
    Confidential,
    Administrator,
}

impl ClearanceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClearanceTier::Restricted => "restricted",
            ClearanceTier::Internal => "internal",
            ClearanceTier::Confidential => "confidential",
            ClearanceTier::Administrator => "administrator",
        }
    }
}

/// Long-lived reference data describing what one agent may do.
/// Mutated only by an external administrative process; served from a TTL
/// cache inside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentClearanceRecord {
    pub agent_id: String,
    pub tier: ClearanceTier,
    pub allowed_tables: BTreeSet<String>,
    pub max_queries_per_hour: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Why an authorization request was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    UnknownAgent,
    InactiveAgent,
    ClearanceEscalation,
    TableNotAllowed { table: String },
    ElevatedTierRequired { table: String },
    RateLimitExceeded,
    ClearanceStoreUnavailable,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::UnknownAgent => "UnknownAgent",
            DenialReason::InactiveAgent => "InactiveAgent",
            DenialReason::ClearanceEscalation => "ClearanceEscalation",
            DenialReason::TableNotAllowed { .. } => "TableNotAllowed",
            DenialReason::ElevatedTierRequired { .. } => "ElevatedTierRequired",
            DenialReason::RateLimitExceeded => "RateLimitExceeded",
            DenialReason::ClearanceStoreUnavailable => "ClearanceStoreUnavailable",
        }
    }
}

/// Computed per request; not persisted beyond the audit record.
#[derive(Debug, Clone)]
pub struct AuthorizationDecision {
    pub allowed: bool,
    pub reason: Option<DenialReason>,
    pub remaining_quota: u32,
    pub retry_after: Option<Duration>,
}

impl AuthorizationDecision {
    pub fn granted(remaining_quota: u32) -> Self {
        Self {
            allowed: true,
            reason: None,
            remaining_quota,
            retry_after: None,
        }
    }

    pub fn denied(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            remaining_quota: 0,
            retry_after: None,
        }
    }
}

/// Regulatory regimes an audit entry may fall under, derived from the
/// PII types found in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ComplianceMarker {
    Gdpr,
    Hipaa,
    Pci,
}

impl ComplianceMarker {
    /// Map detected PII types to the markers they imply.
    pub fn from_pii_types(types: &[PiiType]) -> Vec<ComplianceMarker> {
        let mut markers = BTreeSet::new();
        for t in types {
            match t {
                PiiType::Email
                | PiiType::Phone
                | PiiType::Name
                | PiiType::Address => {
                    markers.insert(ComplianceMarker::Gdpr);
                }
                PiiType::DateOfBirth => {
                    markers.insert(ComplianceMarker::Gdpr);
                    markers.insert(ComplianceMarker::Hipaa);
                }
                PiiType::Ssn => {
                    markers.insert(ComplianceMarker::Hipaa);
                }
                PiiType::CreditCard => {
                    markers.insert(ComplianceMarker::Pci);
                }
            }
        }
        markers.into_iter().collect()
    }
}

/// Terminal authorization outcome recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationOutcome {
    Granted,
    Denied,
    NotReached,
}

/// Terminal execution outcome recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    Failed,
    TimedOut,
    CircuitOpen,
    NotReached,
}

/// One append-only audit record per request. Never updated or deleted;
/// corrections are compensating new entries. `prev_hash`/`entry_hash`
/// form a tamper-evident chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub correlation_id: Uuid,
    pub agent_id: String,
    pub timestamp_utc: DateTime<Utc>,
    pub sanitized_query: String,
    pub risk_level: RiskLevel,
    pub pii_types_found: Vec<PiiType>,
    pub authorization_outcome: AuthorizationOutcome,
    pub execution_outcome: ExecutionOutcome,
    pub compliance_markers: Vec<ComplianceMarker>,
    pub duration_ms: u64,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Filter for the read-only compliance query surface.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub agent_id: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub min_risk_level: Option<RiskLevel>,
}

/// Pipeline stages of a governed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    RiskAssessed,
    Authorized,
    Scanned,
    Executing,
    Completed,
    Rejected,
    Faulted,
}

impl PipelineStage {
    /// Legal transitions of the request state machine.
    pub fn can_transition_to(&self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        matches!(
            (self, next),
            (Received, RiskAssessed)
                | (RiskAssessed, Authorized)
                | (RiskAssessed, Rejected)
                | (Authorized, Scanned)
                | (Authorized, Rejected)
                | (Scanned, Executing)
                | (Executing, Completed)
                | (Executing, Faulted)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStage::Completed | PipelineStage::Rejected | PipelineStage::Faulted
        )
    }
}

/// Result rows handed back by the injected executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
    pub rows_affected: u64,
}

/// Why a request was turned away or failed. Part of the discriminated
/// result surface - callers never see raw executor errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultReason {
    CircuitOpen,
    ExecutionTimeout,
    ExecutionFailed { message: String },
    AuditUnavailable,
}

/// The discriminated outcome of `GovernanceProxy::execute`.
#[derive(Debug, Clone)]
pub enum QueryVerdict {
    /// Policy passed and the executor completed.
    Completed {
        result: QueryResult,
        findings: Vec<PiiFinding>,
    },
    /// Rejected by risk assessment or authorization.
    Denied {
        stage: PipelineStage,
        reason: String,
    },
    /// Reached the executing stage but did not complete.
    Faulted { reason: FaultReason },
}

impl QueryVerdict {
    pub fn is_completed(&self) -> bool {
        matches!(self, QueryVerdict::Completed { .. })
    }
}
