// RBAC, clearance caching and rate limiting

pub mod clearance_cache;
pub mod rate_limiter;

use crate::config::Config;
use crate::core::models::{AuthorizationDecision, ClearanceTier, DenialReason};
use crate::loader::ClearanceStore;
use clearance_cache::ClearanceCache;
use rate_limiter::SlidingWindowRateLimiter;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Role/clearance-based authorization with per-agent quota enforcement.
///
/// Clearance-store unavailability is a hard, auditable deny - never
/// fail-open. The only shared mutable state (rate counters, clearance
/// cache) is synchronized per agent key.
pub struct AuthorizationEngine {
    clearances: ClearanceCache,
    limiter: SlidingWindowRateLimiter,
    admin_tables: BTreeSet<String>,
}

impl AuthorizationEngine {
    pub fn new(store: Arc<dyn ClearanceStore>, config: &Config) -> Self {
        Self {
            clearances: ClearanceCache::new(
                store,
                config.clearance_cache_ttl_secs,
                config.clearance_cache_capacity,
            ),
            limiter: SlidingWindowRateLimiter::new(),
            admin_tables: config
                .admin_tables
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
        }
    }

    /// Evaluate one request. Denials are data, not errors.
    pub async fn authorize(
        &self,
        agent_id: &str,
        requested_tables: &BTreeSet<String>,
        claimed_clearance: ClearanceTier,
    ) -> AuthorizationDecision {
        let record = match self.clearances.get(agent_id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!(agent_id = %agent_id, "Authorization denied: unknown agent");
                return AuthorizationDecision::denied(DenialReason::UnknownAgent);
            }
            Err(e) => {
                // Fail closed: an unreachable source of truth is a deny,
                // and also an operational incident worth shouting about
                error!(agent_id = %agent_id, error = %e, "Clearance store unavailable - denying");
                return AuthorizationDecision::denied(DenialReason::ClearanceStoreUnavailable);
            }
        };

        if !record.active {
            warn!(agent_id = %agent_id, "Authorization denied: inactive agent");
            return AuthorizationDecision::denied(DenialReason::InactiveAgent);
        }

        // Privilege-escalation guard: an agent may understate its tier,
        // never overstate it
        if claimed_clearance > record.tier {
            warn!(
                agent_id = %agent_id,
                claimed = claimed_clearance.as_str(),
                actual = record.tier.as_str(),
                "Authorization denied: claimed clearance above stored tier"
            );
            return AuthorizationDecision::denied(DenialReason::ClearanceEscalation);
        }

        for table in requested_tables {
            if !record.allowed_tables.contains(table) {
                warn!(agent_id = %agent_id, table = %table, "Authorization denied: table outside ACL");
                return AuthorizationDecision::denied(DenialReason::TableNotAllowed {
                    table: table.clone(),
                });
            }
        }

        // Independent second check, orthogonal to the ACL: cross-schema
        // references and administrative tables need the top tier even
        // when the ACL happens to list them
        for table in requested_tables {
            if self.is_high_risk_table(table) && record.tier < ClearanceTier::Administrator {
                warn!(agent_id = %agent_id, table = %table, "Authorization denied: elevated tier required");
                return AuthorizationDecision::denied(DenialReason::ElevatedTierRequired {
                    table: table.clone(),
                });
            }
        }

        let quota = self
            .limiter
            .check_and_record(agent_id, record.max_queries_per_hour)
            .await;
        if !quota.allowed {
            warn!(
                agent_id = %agent_id,
                quota_per_hour = record.max_queries_per_hour,
                "Authorization denied: rate limit exceeded"
            );
            let mut decision = AuthorizationDecision::denied(DenialReason::RateLimitExceeded);
            decision.retry_after = quota.retry_after;
            return decision;
        }

        info!(
            agent_id = %agent_id,
            tier = record.tier.as_str(),
            remaining_quota = quota.remaining,
            "Authorization granted"
        );
        AuthorizationDecision::granted(quota.remaining)
    }

    fn is_high_risk_table(&self, table: &str) -> bool {
        table.contains('.') || self.admin_tables.contains(&table.to_lowercase())
    }

    /// Evict one agent's cached clearance after an administrative update.
    pub async fn invalidate_clearance(&self, agent_id: &str) {
        self.clearances.invalidate(agent_id).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::core::errors::GovernanceError;
    use crate::core::models::AgentClearanceRecord;
    use crate::loader::YamlClearanceStore;
    use async_trait::async_trait;

    const AGENTS: &str = r#"
agents:
  - agent_id: "agent-7"
    tier: internal
    allowed_tables: ["Orders"]
    max_queries_per_hour: 100
  - agent_id: "admin-bot"
    tier: administrator
    allowed_tables: ["Orders", "audit_log", "billing.invoices"]
    max_queries_per_hour: 50
  - agent_id: "dormant"
    tier: internal
    allowed_tables: ["Orders"]
    max_queries_per_hour: 10
    active: false
  - agent_id: "curious"
    tier: confidential
    allowed_tables: ["Orders", "audit_log"]
    max_queries_per_hour: 10
"#;

    fn engine() -> AuthorizationEngine {
        let store = Arc::new(YamlClearanceStore::from_yaml(AGENTS).unwrap());
        AuthorizationEngine::new(store, &Config::test_config())
    }

    fn tables(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_grant_within_acl() {
        let decision = engine()
            .authorize("agent-7", &tables(&["Orders"]), ClearanceTier::Internal)
            .await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining_quota, 99);
    }

    #[tokio::test]
    async fn test_unknown_agent_denied() {
        let decision = engine()
            .authorize("ghost", &tables(&["Orders"]), ClearanceTier::Restricted)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenialReason::UnknownAgent));
    }

    #[tokio::test]
    async fn test_inactive_agent_denied() {
        let decision = engine()
            .authorize("dormant", &tables(&["Orders"]), ClearanceTier::Internal)
            .await;
        assert_eq!(decision.reason, Some(DenialReason::InactiveAgent));
    }

    #[tokio::test]
    async fn test_claimed_clearance_escalation_denied() {
        let decision = engine()
            .authorize("agent-7", &tables(&["Orders"]), ClearanceTier::Administrator)
            .await;
        assert_eq!(decision.reason, Some(DenialReason::ClearanceEscalation));
    }

    #[tokio::test]
    async fn test_understated_clearance_allowed() {
        let decision = engine()
            .authorize("agent-7", &tables(&["Orders"]), ClearanceTier::Restricted)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_table_outside_acl_denied() {
        let decision = engine()
            .authorize("agent-7", &tables(&["Orders", "Payroll"]), ClearanceTier::Internal)
            .await;
        assert_eq!(
            decision.reason,
            Some(DenialReason::TableNotAllowed { table: "Payroll".to_string() })
        );
    }

    #[tokio::test]
    async fn test_admin_table_requires_administrator_even_inside_acl() {
        // "curious" has audit_log in its ACL but is only Confidential
        let decision = engine()
            .authorize("curious", &tables(&["audit_log"]), ClearanceTier::Confidential)
            .await;
        assert_eq!(
            decision.reason,
            Some(DenialReason::ElevatedTierRequired { table: "audit_log".to_string() })
        );

        let decision = engine()
            .authorize("admin-bot", &tables(&["audit_log"]), ClearanceTier::Administrator)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_cross_schema_requires_administrator() {
        let decision = engine()
            .authorize("admin-bot", &tables(&["billing.invoices"]), ClearanceTier::Administrator)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_rate_limit_denies_with_zero_quota() {
        let engine = engine();
        for _ in 0..10 {
            let decision = engine
                .authorize("curious", &tables(&["Orders"]), ClearanceTier::Confidential)
                .await;
            assert!(decision.allowed);
        }
        let decision = engine
            .authorize("curious", &tables(&["Orders"]), ClearanceTier::Confidential)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenialReason::RateLimitExceeded));
        assert_eq!(decision.remaining_quota, 0);
        assert!(decision.retry_after.is_some());
    }

    struct DownStore;

    #[async_trait]
    impl ClearanceStore for DownStore {
        async fn get_clearance(
            &self,
            _agent_id: &str,
        ) -> Result<Option<AgentClearanceRecord>, GovernanceError> {
            Err(GovernanceError::ClearanceStoreUnavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_outage_fails_closed() {
        let engine = AuthorizationEngine::new(Arc::new(DownStore), &Config::test_config());
        let decision = engine
            .authorize("agent-7", &tables(&["Orders"]), ClearanceTier::Internal)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, Some(DenialReason::ClearanceStoreUnavailable));
    }
}
