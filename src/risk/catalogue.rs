// Dangerous-pattern catalogue, represented as data rather than an if/else chain

use crate::core::errors::GovernanceError;
use crate::core::models::RiskLevel;
use regex::Regex;

/// How a catalogue entry decides whether it fires.
///
/// `MissingClause` exists because the regex crate has no lookaround:
/// "UPDATE without WHERE" is a trigger pattern plus the absence of a
/// required clause, evaluated as one matcher.
pub enum MatcherKind {
    /// Fires when the pattern matches anywhere in the query.
    Pattern(Regex),
    /// Fires when `trigger` matches but `required` does not.
    MissingClause { trigger: Regex, required: Regex },
}

/// One entry in the danger catalogue.
///
/// `escalation` is a floor on the resulting risk level when the entry
/// fires; `weight` feeds the accumulated score so several lesser signals
/// can still combine into a higher level.
pub struct DangerPattern {
    pub name: &'static str,
    pub matcher: MatcherKind,
    pub weight: u32,
    pub escalation: RiskLevel,
}

impl DangerPattern {
    /// The matched excerpt if this entry fires against `query`.
    pub fn find(&self, query: &str) -> Option<String> {
        match &self.matcher {
            MatcherKind::Pattern(re) => re.find(query).map(|m| excerpt(m.as_str())),
            MatcherKind::MissingClause { trigger, required } => {
                if required.is_match(query) {
                    return None;
                }
                trigger.find(query).map(|m| excerpt(m.as_str()))
            }
        }
    }
}

/// Truncate matched text so audit payloads stay small.
fn excerpt(matched: &str) -> String {
    const MAX: usize = 48;
    if matched.len() <= MAX {
        matched.to_string()
    } else {
        let mut end = MAX;
        while !matched.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &matched[..end])
    }
}

fn compile(name: &'static str, pattern: &str) -> Result<Regex, GovernanceError> {
    Regex::new(pattern).map_err(|e| GovernanceError::InvalidPattern {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn entry(
    name: &'static str,
    pattern: &str,
    weight: u32,
    escalation: RiskLevel,
) -> Result<DangerPattern, GovernanceError> {
    Ok(DangerPattern {
        name,
        matcher: MatcherKind::Pattern(compile(name, pattern)?),
        weight,
        escalation,
    })
}

fn missing_clause_entry(
    name: &'static str,
    trigger: &str,
    required: &str,
    weight: u32,
    escalation: RiskLevel,
) -> Result<DangerPattern, GovernanceError> {
    Ok(DangerPattern {
        name,
        matcher: MatcherKind::MissingClause {
            trigger: compile(name, trigger)?,
            required: compile(name, required)?,
        },
        weight,
        escalation,
    })
}

/// The built-in catalogue. Loaded once at analyzer construction; new
/// entries extend this table without touching the scoring logic.
pub fn builtin_catalogue() -> Result<Vec<DangerPattern>, GovernanceError> {
    Ok(vec![
        entry(
            "drop-statement",
            r"(?i)\bdrop\s+(table|database|schema|index|view|user|role)\b",
            10,
            RiskLevel::Critical,
        )?,
        entry(
            "truncate-statement",
            r"(?i)\btruncate\s+(table\s+)?\S+",
            10,
            RiskLevel::Critical,
        )?,
        entry(
            "union-select",
            r"(?i)\bunion(\s+all)?\s*(\(|\s)\s*select\b",
            6,
            RiskLevel::High,
        )?,
        entry(
            "alter-statement",
            r"(?i)\balter\s+(table|database|schema|user|role)\b",
            6,
            RiskLevel::High,
        )?,
        entry(
            "stacked-statements",
            r";\s*[A-Za-z(]",
            6,
            RiskLevel::High,
        )?,
        entry(
            "comment-obfuscation",
            r"(--|/\*)",
            3,
            RiskLevel::Medium,
        )?,
        entry(
            "tautology",
            r#"(?i)\bor\s+(1\s*=\s*1|true|'[^']*'\s*=\s*'[^']*'|"[^"]*"\s*=\s*"[^"]*")"#,
            6,
            RiskLevel::High,
        )?,
        entry(
            "system-catalog-probe",
            r"(?i)(information_schema|pg_catalog|pg_shadow|pg_authid|sqlite_master|mysql\.user|\bsys\.)",
            5,
            RiskLevel::High,
        )?,
        entry(
            "dynamic-exec",
            r"(?i)\b(exec|execute)\s*(\(|@|\s+immediate\b|\s+sp_)",
            6,
            RiskLevel::High,
        )?,
        entry(
            "command-shell",
            r"(?i)\bxp_cmdshell\b",
            10,
            RiskLevel::Critical,
        )?,
        entry(
            "file-exfiltration",
            r"(?i)\binto\s+(out|dump)file\b",
            10,
            RiskLevel::Critical,
        )?,
        entry(
            "privilege-change",
            r"(?i)\b(grant|revoke)\s+\w+",
            5,
            RiskLevel::High,
        )?,
        missing_clause_entry(
            "delete-without-where",
            r"(?i)\bdelete\s+from\s+\S+",
            r"(?i)\bwhere\b",
            6,
            RiskLevel::High,
        )?,
        missing_clause_entry(
            "update-without-where",
            r"(?i)\bupdate\s+\S+\s+set\b",
            r"(?i)\bwhere\b",
            6,
            RiskLevel::High,
        )?,
    ])
}
