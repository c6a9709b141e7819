// Clearance reference data - YAML file store and database store behind one trait

use crate::core::errors::GovernanceError;
use crate::core::models::{AgentClearanceRecord, ClearanceTier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

/// Source of truth for agent clearances, updated by an external
/// administrative process. Outages here are a fail-closed deny upstream.
#[async_trait]
pub trait ClearanceStore: Send + Sync {
    async fn get_clearance(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentClearanceRecord>, GovernanceError>;
}

#[derive(Debug, Deserialize)]
struct ClearanceFile {
    agents: Vec<ClearanceEntry>,
}

#[derive(Debug, Deserialize)]
struct ClearanceEntry {
    agent_id: String,
    tier: ClearanceTier,
    #[serde(default)]
    allowed_tables: BTreeSet<String>,
    max_queries_per_hour: u32,
    #[serde(default = "default_active")]
    active: bool,
}

fn default_active() -> bool {
    true
}

/// YAML-backed clearance store for deployments without a database.
///
/// The whole file is parsed and validated once at load; lookups are
/// in-memory map hits.
pub struct YamlClearanceStore {
    records: HashMap<String, AgentClearanceRecord>,
}

impl YamlClearanceStore {
    pub fn from_file(path: &Path) -> Result<Self, GovernanceError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GovernanceError::Configuration(format!("Cannot read clearance file {:?}: {}", path, e))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, GovernanceError> {
        let file: ClearanceFile = serde_yaml::from_str(content).map_err(|e| {
            GovernanceError::Configuration(format!("Invalid clearance YAML: {}", e))
        })?;

        let loaded_at = Utc::now();
        let mut records = HashMap::new();
        for entry in file.agents {
            if entry.max_queries_per_hour == 0 {
                return Err(GovernanceError::Configuration(format!(
                    "Agent '{}' has a zero hourly quota",
                    entry.agent_id
                )));
            }
            let record = AgentClearanceRecord {
                agent_id: entry.agent_id.clone(),
                tier: entry.tier,
                allowed_tables: entry.allowed_tables,
                max_queries_per_hour: entry.max_queries_per_hour,
                active: entry.active,
                created_at: loaded_at,
                updated_at: loaded_at,
            };
            if records.insert(entry.agent_id.clone(), record).is_some() {
                return Err(GovernanceError::Configuration(format!(
                    "Duplicate agent_id '{}' in clearance file",
                    entry.agent_id
                )));
            }
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl ClearanceStore for YamlClearanceStore {
    async fn get_clearance(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentClearanceRecord>, GovernanceError> {
        Ok(self.records.get(agent_id).cloned())
    }
}

#[derive(FromRow)]
struct ClearanceRow {
    agent_id: String,
    tier: String,
    allowed_tables: Vec<String>,
    max_queries_per_hour: i32,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Database-backed clearance store.
pub struct PgClearanceStore {
    db_pool: PgPool,
}

impl PgClearanceStore {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl ClearanceStore for PgClearanceStore {
    async fn get_clearance(
        &self,
        agent_id: &str,
    ) -> Result<Option<AgentClearanceRecord>, GovernanceError> {
        let row = sqlx::query_as::<_, ClearanceRow>(
            "SELECT agent_id, tier, allowed_tables, max_queries_per_hour, active,
                    created_at, updated_at
             FROM agent_clearances
             WHERE agent_id = $1",
        )
        .bind(agent_id)
        .fetch_optional(&self.db_pool)
        .await
        .map_err(|e| GovernanceError::ClearanceStoreUnavailable(e.to_string()))?;

        row.map(|r| {
            let tier = parse_tier(&r.tier)?;
            Ok(AgentClearanceRecord {
                agent_id: r.agent_id,
                tier,
                allowed_tables: r.allowed_tables.into_iter().collect(),
                max_queries_per_hour: r.max_queries_per_hour.max(0) as u32,
                active: r.active,
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
        })
        .transpose()
    }
}

fn parse_tier(value: &str) -> Result<ClearanceTier, GovernanceError> {
    match value.to_lowercase().as_str() {
        "restricted" => Ok(ClearanceTier::Restricted),
        "internal" => Ok(ClearanceTier::Internal),
        "confidential" => Ok(ClearanceTier::Confidential),
        "administrator" => Ok(ClearanceTier::Administrator),
        other => Err(GovernanceError::Internal(format!(
            "Unknown clearance tier '{}' in store",
            other
        ))),
    }
}
