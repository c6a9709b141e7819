// Domain error types - policy rejections are returned as data, never as errors

use thiserror::Error;

/// Infrastructure-level failures of the governance layer itself.
///
/// Note the asymmetry: a clearance-store outage surfaces as a fail-closed
/// denial inside `AuthorizationDecision`, while an audit-sink outage
/// degrades to the fallback sink. Both originate here.
#[derive(Error, Debug)]
pub enum GovernanceError {
    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Clearance store unreachable - always a fail-closed deny upstream
    #[error("Clearance store unavailable: {0}")]
    ClearanceStoreUnavailable(String),

    /// Audit sink unreachable after retries
    #[error("Audit sink unavailable: {0}")]
    AuditSinkUnavailable(String),

    /// A catalogue or ACL entry carried an uncompilable regex
    #[error("Invalid pattern '{name}': {reason}")]
    InvalidPattern { name: String, reason: String },

    /// Invariant breach inside the pipeline
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Typed failures from the injected query executor.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// The executor did not complete within the request timeout
    #[error("Query execution timed out")]
    Timeout,

    /// Connection-level failure (pool exhausted, network, handshake)
    #[error("Connection failure: {0}")]
    Connection(String),

    /// The engine rejected the query itself
    #[error("Query failed: {0}")]
    Query(String),
}

impl ExecutorError {
    /// Whether this failure counts toward the circuit breaker's failure ratio.
    pub fn is_transient(&self) -> bool {
        matches!(self, ExecutorError::Timeout | ExecutorError::Connection(_))
    }

    /// Message safe to hand back to callers - engine internals stay hidden.
    pub fn caller_message(&self) -> String {
        match self {
            ExecutorError::Timeout => "Query execution timed out".to_string(),
            ExecutorError::Connection(_) => "Database unavailable".to_string(),
            ExecutorError::Query(_) => "Query execution failed".to_string(),
        }
    }
}
