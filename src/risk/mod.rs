// SQL risk classification - heuristic pattern and structure detection

pub mod catalogue;

use crate::config::Config;
use crate::core::errors::GovernanceError;
use crate::core::models::{PatternMatch, RiskLevel, RiskRecommendation, SecurityRiskAssessment};
use catalogue::DangerPattern;
use regex::Regex;
use tracing::debug;

/// Pattern/structure-based SQL risk analyzer.
///
/// Stateless and pure: `assess` never fails and never suspends. Malformed
/// or hostile input degrades to Critical, because every request must
/// still reach the audit stage.
pub struct SecurityRiskAnalyzer {
    patterns: Vec<DangerPattern>,
    join_re: Regex,
    subquery_re: Regex,
    cte_re: Regex,
    block_level: RiskLevel,
    max_query_bytes: usize,
    medium_weight: u32,
    high_weight: u32,
    complexity_threshold: u32,
}

impl SecurityRiskAnalyzer {
    pub fn new(config: &Config) -> Result<Self, GovernanceError> {
        let compile = |name: &'static str, p: &str| {
            Regex::new(p).map_err(|e| GovernanceError::InvalidPattern {
                name: name.to_string(),
                reason: e.to_string(),
            })
        };
        Ok(Self {
            patterns: catalogue::builtin_catalogue()?,
            join_re: compile("complexity-join", r"(?i)\bjoin\b")?,
            subquery_re: compile("complexity-subquery", r"(?i)\(\s*select\b")?,
            cte_re: compile("complexity-cte", r"(?i)\bwith\s+\w+\s+as\s*\(")?,
            block_level: config.risk_block_level,
            max_query_bytes: config.max_query_bytes,
            medium_weight: config.risk_medium_weight,
            high_weight: config.risk_high_weight,
            complexity_threshold: config.complexity_escalation_threshold,
        })
    }

    /// Classify a query. Pure function of the text.
    pub fn assess(&self, query: &str) -> SecurityRiskAssessment {
        // Degenerate inputs are Critical without scanning: an empty query
        // is never legitimate agent traffic, and an oversized one could
        // blow up the regex pass.
        if query.trim().is_empty() {
            return self.degenerate("empty-query");
        }
        if query.len() > self.max_query_bytes {
            return self.degenerate("oversized-query");
        }

        let mut matched = Vec::new();
        let mut total_weight = 0u32;
        let mut escalation_floor = RiskLevel::Low;

        for pattern in &self.patterns {
            if let Some(excerpt) = pattern.find(query) {
                total_weight += pattern.weight;
                escalation_floor = escalation_floor.max(pattern.escalation);
                matched.push(PatternMatch {
                    name: pattern.name.to_string(),
                    excerpt,
                });
            }
        }

        let weight_level = if total_weight >= self.high_weight {
            RiskLevel::High
        } else if total_weight >= self.medium_weight {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        // One catastrophic pattern outranks any accumulated score
        let mut level = weight_level.max(escalation_floor);

        let complexity_score = self.complexity_score(query);
        if complexity_score >= self.complexity_threshold {
            if matched.is_empty() {
                // Complexity alone caps at Medium
                level = level.max(RiskLevel::Medium);
            } else if level == RiskLevel::High {
                level = RiskLevel::Critical;
            }
        }

        let recommendation = if level >= self.block_level {
            RiskRecommendation::Block
        } else {
            RiskRecommendation::Allow
        };

        if !matched.is_empty() {
            debug!(
                level = level.as_str(),
                total_weight,
                complexity_score,
                pattern_count = matched.len(),
                "Dangerous patterns matched"
            );
        }

        SecurityRiskAssessment {
            level,
            matched_patterns: matched,
            complexity_score,
            recommendation,
        }
    }

    /// Structural complexity, independent of the danger catalogue:
    /// joins, nested subqueries and CTEs.
    fn complexity_score(&self, query: &str) -> u32 {
        let joins = self.join_re.find_iter(query).count() as u32;
        let subqueries = self.subquery_re.find_iter(query).count() as u32;
        let ctes = self.cte_re.find_iter(query).count() as u32;
        joins * 2 + subqueries * 3 + ctes * 2
    }

    fn degenerate(&self, name: &'static str) -> SecurityRiskAssessment {
        SecurityRiskAssessment {
            level: RiskLevel::Critical,
            matched_patterns: vec![PatternMatch {
                name: name.to_string(),
                excerpt: String::new(),
            }],
            complexity_score: 0,
            recommendation: RiskRecommendation::Block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer() -> SecurityRiskAnalyzer {
        SecurityRiskAnalyzer::new(&Config::test_config()).unwrap()
    }

    #[test]
    fn test_plain_select_is_low_and_allowed() {
        let a = analyzer().assess("SELECT id, total FROM Orders WHERE id = 42");
        assert_eq!(a.level, RiskLevel::Low);
        assert_eq!(a.recommendation, RiskRecommendation::Allow);
        assert!(a.matched_patterns.is_empty());
    }

    #[test]
    fn test_drop_forces_critical_block() {
        let a = analyzer().assess("DROP TABLE Orders");
        assert_eq!(a.level, RiskLevel::Critical);
        assert_eq!(a.recommendation, RiskRecommendation::Block);
    }

    #[test]
    fn test_truncate_union_stacking_block() {
        for q in [
            "TRUNCATE TABLE Orders",
            "SELECT a FROM t UNION SELECT password FROM users",
            "SELECT 1; DELETE FROM Orders WHERE 1=1",
        ] {
            let a = analyzer().assess(q);
            assert!(a.level >= RiskLevel::High, "query {:?} scored {:?}", q, a.level);
            assert_eq!(a.recommendation, RiskRecommendation::Block, "query {:?}", q);
        }
    }

    #[test]
    fn test_stacked_drop_is_critical() {
        let a = analyzer().assess("SELECT * FROM Orders; DROP TABLE Orders;");
        assert_eq!(a.level, RiskLevel::Critical);
        assert_eq!(a.recommendation, RiskRecommendation::Block);
        let names: Vec<&str> = a.matched_patterns.iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"drop-statement"));
        assert!(names.contains(&"stacked-statements"));
    }

    #[test]
    fn test_empty_and_oversized_are_critical() {
        let a = analyzer().assess("   ");
        assert_eq!(a.level, RiskLevel::Critical);
        assert_eq!(a.matched_patterns[0].name, "empty-query");

        let huge = format!("SELECT '{}'", "x".repeat(70 * 1024));
        let a = analyzer().assess(&huge);
        assert_eq!(a.level, RiskLevel::Critical);
        assert_eq!(a.matched_patterns[0].name, "oversized-query");
    }

    #[test]
    fn test_complexity_alone_caps_at_medium() {
        let q = "SELECT * FROM a \
                 JOIN b ON a.id = b.a_id \
                 JOIN c ON b.id = c.b_id \
                 JOIN d ON c.id = d.c_id \
                 JOIN e ON d.id = e.d_id \
                 JOIN f ON e.id = f.e_id";
        let a = analyzer().assess(q);
        assert!(a.complexity_score >= 10);
        assert_eq!(a.level, RiskLevel::Medium);
        assert_eq!(a.recommendation, RiskRecommendation::Allow);
    }

    #[test]
    fn test_complexity_escalates_high_to_critical() {
        // Tautology (High) plus heavy structure
        let q = "SELECT * FROM a \
                 JOIN b ON a.id = b.a_id JOIN c ON b.id = c.b_id \
                 JOIN d ON c.id = d.c_id JOIN e ON d.id = e.d_id \
                 JOIN f ON e.id = f.e_id \
                 WHERE a.x = '' OR 1=1";
        let a = analyzer().assess(q);
        assert_eq!(a.level, RiskLevel::Critical);
    }

    #[test]
    fn test_weights_combine_across_patterns() {
        // Comment (3) alone stays Low; comment plus catalog probe (5)
        // crosses the high threshold of 8
        let a = analyzer().assess("SELECT 1 -- peek");
        assert_eq!(a.level, RiskLevel::Medium); // escalation floor of the comment pattern

        let a = analyzer().assess("SELECT * FROM information_schema.tables -- peek");
        assert!(a.level >= RiskLevel::High);
    }

    #[test]
    fn test_never_panics_on_garbage() {
        let a = analyzer().assess("\u{0}\u{1};;;'''((( SELECT");
        assert!(a.level <= RiskLevel::Critical); // merely: returns
    }
}
