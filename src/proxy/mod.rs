//! The governance pipeline. Every agent query passes through here;
//! nothing reaches the executor any other way.

use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::audit::{AuditEvent, AuditRecordOutcome, AuditSink, AuditTrailRecorder};
use crate::authz::AuthorizationEngine;
use crate::config::Config;
use crate::core::errors::{ExecutorError, GovernanceError};
use crate::core::models::{
    AuditFilter, AuditLogEntry, AuthorizationOutcome, DenialReason, ExecutionOutcome, FaultReason,
    GovernanceQueryRequest, PiiFinding, PipelineStage, QueryResult, QueryVerdict,
    RiskRecommendation, SecurityRiskAssessment,
};
use crate::core::resilience::{
    create_circuit_breaker, execute_with_breaker_if, BreakerError, SharedCircuitBreaker,
};
use crate::loader::ClearanceStore;
use crate::pii::PiiClassifier;
use crate::risk::SecurityRiskAnalyzer;

/// Downstream database adapter. The proxy owns policy; implementations
/// own connections and dialect.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        timeout: Duration,
    ) -> Result<QueryResult, ExecutorError>;
}

pub struct GovernanceProxy {
    analyzer: SecurityRiskAnalyzer,
    classifier: PiiClassifier,
    engine: AuthorizationEngine,
    recorder: AuditTrailRecorder,
    executor: Arc<dyn QueryExecutor>,
    breaker: SharedCircuitBreaker,
    literal_re: Regex,
}

impl GovernanceProxy {
    pub fn new(
        config: &Config,
        clearance_store: Arc<dyn ClearanceStore>,
        audit_sink: Arc<dyn AuditSink>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Result<Self, GovernanceError> {
        Ok(Self {
            analyzer: SecurityRiskAnalyzer::new(config)?,
            classifier: PiiClassifier::new(config)?,
            engine: AuthorizationEngine::new(clearance_store, config),
            recorder: AuditTrailRecorder::new(audit_sink, config),
            executor,
            breaker: create_circuit_breaker(&config.breaker_settings()),
            literal_re: Regex::new(
                r"(?i)\b([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:'((?:[^']|'')*)'|(\d[\d\-./ ]*\d|\d))",
            )
            .map_err(|e| GovernanceError::Internal(format!("literal pattern: {e}")))?,
        })
    }

    /// Run one request through the full pipeline. Rejections and faults
    /// are returned as verdicts; this function never errors and always
    /// writes exactly one audit entry.
    pub async fn execute(&self, request: GovernanceQueryRequest) -> QueryVerdict {
        let span = info_span!(
            "governed_query",
            correlation_id = %request.correlation_id,
            agent_id = %request.agent_id,
            clearance = request.claimed_clearance.as_str(),
            risk_level = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );
        self.run_pipeline(request).instrument(span).await
    }

    async fn run_pipeline(&self, request: GovernanceQueryRequest) -> QueryVerdict {
        let started = Instant::now();
        let mut stage = PipelineStage::Received;

        // Stage 1: risk assessment. Assesses every query, including
        // empty and oversized ones, so every request is auditable.
        let assessment = info_span!("risk_assessment")
            .in_scope(|| self.analyzer.assess(&request.raw_query));
        advance(&mut stage, PipelineStage::RiskAssessed);
        tracing::Span::current().record("risk_level", assessment.level.as_str());

        if assessment.recommendation == RiskRecommendation::Block {
            let matched: Vec<&str> = assessment
                .matched_patterns
                .iter()
                .map(|m| m.name.as_str())
                .collect();
            warn!(
                risk_level = assessment.level.as_str(),
                patterns = ?matched,
                "query blocked by risk assessment"
            );
            advance(&mut stage, PipelineStage::Rejected);
            let reason = format!(
                "risk level {} (patterns: {})",
                assessment.level.as_str(),
                matched.join(", ")
            );
            return self
                .finish(
                    &request,
                    &assessment,
                    &[],
                    AuthorizationOutcome::NotReached,
                    ExecutionOutcome::NotReached,
                    started,
                    QueryVerdict::Denied {
                        stage: PipelineStage::RiskAssessed,
                        reason,
                    },
                )
                .await;
        }

        // Stage 2: authorization. Denials are part of normal operation.
        let decision = self
            .engine
            .authorize(
                &request.agent_id,
                &request.target_tables,
                request.claimed_clearance,
            )
            .instrument(info_span!("authorization"))
            .await;

        if !decision.allowed {
            advance(&mut stage, PipelineStage::Rejected);
            let reason = decision
                .reason
                .as_ref()
                .map(describe_denial)
                .unwrap_or_else(|| "denied".to_string());
            return self
                .finish(
                    &request,
                    &assessment,
                    &[],
                    AuthorizationOutcome::Denied,
                    ExecutionOutcome::NotReached,
                    started,
                    QueryVerdict::Denied {
                        stage: PipelineStage::Authorized,
                        reason,
                    },
                )
                .await;
        }
        advance(&mut stage, PipelineStage::Authorized);

        // Stage 3: PII scan over the query's literal assignments.
        // Advisory only; findings flow to the audit entry and caller.
        let findings = info_span!("pii_scan").in_scope(|| {
            let fields = self.extract_literal_fields(&request.raw_query);
            self.classifier.scan(&fields)
        });
        advance(&mut stage, PipelineStage::Scanned);
        if !findings.is_empty() {
            debug!(findings = findings.len(), "sensitive values detected in query literals");
        }

        // Stage 4: execution behind the shared breaker. An open circuit
        // rejects before the executor is touched; a timeout counts as a
        // breaker failure like any other.
        advance(&mut stage, PipelineStage::Executing);
        let exec_result = execute_with_breaker_if(&self.breaker, ExecutorError::is_transient, || async {
            match tokio::time::timeout(
                request.timeout,
                self.executor.execute(&request.raw_query, request.timeout),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(ExecutorError::Timeout),
            }
        })
        .instrument(info_span!("execution"))
        .await;

        let (exec_outcome, verdict) = match exec_result {
            Ok(result) => {
                advance(&mut stage, PipelineStage::Completed);
                info!(
                    rows = result.rows.len(),
                    rows_affected = result.rows_affected,
                    "query completed"
                );
                (
                    ExecutionOutcome::Completed,
                    QueryVerdict::Completed {
                        result,
                        findings: findings.clone(),
                    },
                )
            }
            Err(BreakerError::Open) => {
                advance(&mut stage, PipelineStage::Faulted);
                warn!("execution short-circuited: breaker open");
                (
                    ExecutionOutcome::CircuitOpen,
                    QueryVerdict::Faulted {
                        reason: FaultReason::CircuitOpen,
                    },
                )
            }
            Err(BreakerError::Inner(ExecutorError::Timeout)) => {
                advance(&mut stage, PipelineStage::Faulted);
                warn!(timeout_ms = request.timeout.as_millis() as u64, "execution timed out");
                (
                    ExecutionOutcome::TimedOut,
                    QueryVerdict::Faulted {
                        reason: FaultReason::ExecutionTimeout,
                    },
                )
            }
            Err(BreakerError::Inner(e)) => {
                advance(&mut stage, PipelineStage::Faulted);
                warn!(error = %e, "execution failed");
                (
                    ExecutionOutcome::Failed,
                    QueryVerdict::Faulted {
                        reason: FaultReason::ExecutionFailed {
                            message: e.caller_message(),
                        },
                    },
                )
            }
        };

        self.finish(
            &request,
            &assessment,
            &findings,
            AuthorizationOutcome::Granted,
            exec_outcome,
            started,
            verdict,
        )
        .await
    }

    /// Single audit choke point for every terminal path. A fail-closed
    /// audit outage overrides the verdict.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        request: &GovernanceQueryRequest,
        assessment: &SecurityRiskAssessment,
        findings: &[PiiFinding],
        authorization_outcome: AuthorizationOutcome,
        execution_outcome: ExecutionOutcome,
        started: Instant,
        verdict: QueryVerdict,
    ) -> QueryVerdict {
        let mut pii_types: Vec<_> = findings.iter().map(|f| f.pii_type).collect();
        pii_types.sort_unstable();
        pii_types.dedup();

        let record_outcome = self
            .recorder
            .record(AuditEvent {
                correlation_id: request.correlation_id,
                agent_id: request.agent_id.clone(),
                raw_query: request.raw_query.clone(),
                risk_level: assessment.level,
                pii_types_found: pii_types,
                authorization_outcome,
                execution_outcome,
                duration_ms: started.elapsed().as_millis() as u64,
            })
            .instrument(info_span!("audit"))
            .await;

        let verdict = if record_outcome == AuditRecordOutcome::FailedClosed {
            QueryVerdict::Faulted {
                reason: FaultReason::AuditUnavailable,
            }
        } else {
            verdict
        };
        tracing::Span::current().record("outcome", verdict_label(&verdict));
        verdict
    }

    /// Heuristic `col = literal` extraction from the raw query text.
    /// Not a SQL parse; good enough to feed the classifier.
    fn extract_literal_fields(&self, query: &str) -> Vec<(String, String)> {
        self.literal_re
            .captures_iter(query)
            .filter_map(|caps| {
                let column = caps.get(1)?.as_str().to_string();
                let value = caps
                    .get(2)
                    .or_else(|| caps.get(3))?
                    .as_str()
                    .to_string();
                Some((column, value))
            })
            .collect()
    }

    /// Read-only compliance surface.
    pub async fn get_audit_history(
        &self,
        filter: &AuditFilter,
    ) -> Result<Vec<AuditLogEntry>, GovernanceError> {
        self.recorder.history(filter).await
    }

    /// Evict a cached clearance after an administrative change.
    pub async fn invalidate_clearance(&self, agent_id: &str) {
        self.engine.invalidate_clearance(agent_id).await;
    }
}

fn advance(stage: &mut PipelineStage, next: PipelineStage) {
    debug_assert!(
        stage.can_transition_to(next),
        "illegal stage transition {stage:?} -> {next:?}"
    );
    debug!(from = ?stage, to = ?next, "stage transition");
    *stage = next;
}

fn describe_denial(reason: &DenialReason) -> String {
    match reason {
        DenialReason::TableNotAllowed { table } => {
            format!("{}: {table}", reason.as_str())
        }
        DenialReason::ElevatedTierRequired { table } => {
            format!("{}: {table}", reason.as_str())
        }
        other => other.as_str().to_string(),
    }
}

fn verdict_label(verdict: &QueryVerdict) -> &'static str {
    match verdict {
        QueryVerdict::Completed { .. } => "completed",
        QueryVerdict::Denied { .. } => "denied",
        QueryVerdict::Faulted { .. } => "faulted",
    }
}
