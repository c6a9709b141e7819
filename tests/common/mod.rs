//! Shared fixtures and mocks for the pipeline tests.

use async_trait::async_trait;
use query_warden::audit::{AuditSink, MemoryAuditSink};
use query_warden::core::errors::{ExecutorError, GovernanceError};
use query_warden::core::models::{AuditFilter, AuditLogEntry, AgentClearanceRecord, QueryResult};
use query_warden::loader::{ClearanceStore, YamlClearanceStore};
use query_warden::proxy::QueryExecutor;
use query_warden::Config;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

pub const AGENTS_YAML: &str = r#"
agents:
  - agent_id: agent-7
    tier: internal
    allowed_tables: [Orders, Customers]
    max_queries_per_hour: 100
  - agent_id: limited-bot
    tier: internal
    allowed_tables: [Orders]
    max_queries_per_hour: 3
  - agent_id: admin-bot
    tier: administrator
    allowed_tables: [Orders, agent_clearances]
    max_queries_per_hour: 100
"#;

pub fn clearance_store() -> YamlClearanceStore {
    YamlClearanceStore::from_yaml(AGENTS_YAML).expect("fixture yaml")
}

pub fn test_config() -> Config {
    Config::test_config()
}

fn sample_result() -> QueryResult {
    QueryResult {
        columns: vec!["id".to_string(), "total".to_string()],
        rows: vec![vec![serde_json::json!(1), serde_json::json!(99.5)]],
        rows_affected: 0,
    }
}

enum Behavior {
    Succeed,
    Fail,
    Sleep(Duration),
}

/// Scriptable executor that counts invocations.
pub struct MockExecutor {
    calls: AtomicU32,
    behavior: Behavior,
}

impl MockExecutor {
    pub fn succeeding() -> Self {
        Self {
            calls: AtomicU32::new(0),
            behavior: Behavior::Succeed,
        }
    }

    pub fn failing() -> Self {
        Self {
            calls: AtomicU32::new(0),
            behavior: Behavior::Fail,
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            calls: AtomicU32::new(0),
            behavior: Behavior::Sleep(delay),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for MockExecutor {
    async fn execute(
        &self,
        _query: &str,
        _timeout: Duration,
    ) -> Result<QueryResult, ExecutorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Succeed => Ok(sample_result()),
            Behavior::Fail => Err(ExecutorError::Connection("connection reset".to_string())),
            Behavior::Sleep(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(sample_result())
            }
        }
    }
}

/// Clearance store that is always unreachable.
pub struct DownClearanceStore;

#[async_trait]
impl ClearanceStore for DownClearanceStore {
    async fn get_clearance(
        &self,
        _agent_id: &str,
    ) -> Result<Option<AgentClearanceRecord>, GovernanceError> {
        Err(GovernanceError::ClearanceStoreUnavailable(
            "dns resolution failed".to_string(),
        ))
    }
}

/// Audit sink whose durable half is down; used to exercise the
/// fallback and fail-closed paths end to end.
pub struct DownAuditSink {
    inner: MemoryAuditSink,
}

impl DownAuditSink {
    pub fn new() -> Self {
        Self {
            inner: MemoryAuditSink::new(),
        }
    }
}

#[async_trait]
impl AuditSink for DownAuditSink {
    async fn append(&self, _entry: &AuditLogEntry) -> Result<(), GovernanceError> {
        Err(GovernanceError::AuditSinkUnavailable(
            "write timed out".to_string(),
        ))
    }

    async fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>, GovernanceError> {
        self.inner.query(filter).await
    }
}
