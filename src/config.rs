// Configuration management

use crate::core::errors::GovernanceError;
use crate::core::models::RiskLevel;
use crate::core::resilience::BreakerSettings;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Governance configuration loaded from environment variables.
///
/// Every policy threshold the pipeline consults lives here - risk block
/// level, PII confidence floor, cache TTLs, quotas source, breaker
/// parameters and the audit fail mode. Nothing is hardcoded in the
/// components themselves. All values are validated on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Risk analyzer
    pub risk_block_level: RiskLevel,
    pub max_query_bytes: usize,
    pub risk_medium_weight: u32,
    pub risk_high_weight: u32,
    pub complexity_escalation_threshold: u32,

    // PII classifier
    pub pii_confidence_floor: f64,

    // Authorization
    pub clearance_cache_ttl_secs: u64,
    pub clearance_cache_capacity: u64,
    pub admin_tables: Vec<String>,

    // Circuit breaker
    pub breaker_failure_ratio: f64,
    pub breaker_window_secs: u64,
    pub breaker_min_throughput: u32,
    pub breaker_open_secs: u64,

    // Audit trail
    pub audit_fail_closed: bool,
    pub audit_retry_max: u32,
    pub audit_retry_delay_ms: u64,
    pub audit_query_max_len: usize,

    // Clearance source (one of the two must be set)
    pub clearance_yaml_path: Option<PathBuf>,
    pub database_url: Option<String>,

    // Logging
    pub log_level: String,
    pub log_format: String, // "json" or "text"
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Supports `.env` file loading in development (via dotenv crate).
    pub fn from_env() -> Result<Self, GovernanceError> {
        #[cfg(not(test))]
        {
            dotenv::dotenv().ok(); // File may not exist
        }

        let config = Self {
            risk_block_level: Self::parse_risk_level_or_default("RISK_BLOCK_LEVEL", RiskLevel::High)?,
            max_query_bytes: Self::parse_usize_or_default("MAX_QUERY_BYTES", 64 * 1024)?,
            risk_medium_weight: Self::parse_u32_or_default("RISK_MEDIUM_WEIGHT", 4)?,
            risk_high_weight: Self::parse_u32_or_default("RISK_HIGH_WEIGHT", 8)?,
            complexity_escalation_threshold: Self::parse_u32_or_default(
                "COMPLEXITY_ESCALATION_THRESHOLD",
                10,
            )?,
            pii_confidence_floor: Self::parse_ratio_or_default("PII_CONFIDENCE_FLOOR", 0.35)?,
            clearance_cache_ttl_secs: Self::parse_u64_or_default("CLEARANCE_CACHE_TTL_SECS", 900)?,
            clearance_cache_capacity: Self::parse_u64_or_default("CLEARANCE_CACHE_CAPACITY", 10_000)?,
            admin_tables: Self::parse_list_or_default(
                "ADMIN_TABLES",
                &["agent_clearances", "audit_log"],
            ),
            breaker_failure_ratio: Self::parse_ratio_or_default("BREAKER_FAILURE_RATIO", 0.3)?,
            breaker_window_secs: Self::parse_u64_or_default("BREAKER_WINDOW_SECS", 10)?,
            breaker_min_throughput: Self::parse_u32_or_default("BREAKER_MIN_THROUGHPUT", 5)?,
            breaker_open_secs: Self::parse_u64_or_default("BREAKER_OPEN_SECS", 60)?,
            audit_fail_closed: Self::parse_bool_or_default("AUDIT_FAIL_CLOSED", false)?,
            audit_retry_max: Self::parse_u32_or_default("AUDIT_RETRY_MAX", 3)?,
            audit_retry_delay_ms: Self::parse_u64_or_default("AUDIT_RETRY_DELAY_MS", 100)?,
            audit_query_max_len: Self::parse_usize_or_default("AUDIT_QUERY_MAX_LEN", 512)?,
            clearance_yaml_path: Self::get_optional_path("CLEARANCE_YAML_PATH"),
            database_url: Self::get_optional_env("DATABASE_URL"),
            log_level: Self::get_env_or_default("LOG_LEVEL", "info"),
            log_format: Self::get_env_or_default("LOG_FORMAT", "json"),
        };

        config.validate()?;

        Ok(config)
    }

    /// Breaker parameters as a settings struct for the resilience module.
    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_ratio: self.breaker_failure_ratio,
            window: Duration::from_secs(self.breaker_window_secs),
            min_throughput: self.breaker_min_throughput,
            open_duration: Duration::from_secs(self.breaker_open_secs),
        }
    }

    fn get_env_or_default(key: &str, default: &str) -> String {
        env::var(key).unwrap_or_else(|_| default.to_string())
    }

    fn get_optional_env(key: &str) -> Option<String> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => Some(value),
            _ => None,
        }
    }

    fn get_optional_path(key: &str) -> Option<PathBuf> {
        Self::get_optional_env(key).map(PathBuf::from)
    }

    fn parse_u64_or_default(key: &str, default: u64) -> Result<u64, GovernanceError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<u64>().map_err(|e| {
                    GovernanceError::Configuration(format!("Invalid {} value '{}': {}", key, value, e))
                })?;
                if parsed == 0 {
                    return Err(GovernanceError::Configuration(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }
                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    fn parse_u32_or_default(key: &str, default: u32) -> Result<u32, GovernanceError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<u32>().map_err(|e| {
                    GovernanceError::Configuration(format!("Invalid {} value '{}': {}", key, value, e))
                })?;
                if parsed == 0 {
                    return Err(GovernanceError::Configuration(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }
                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    fn parse_usize_or_default(key: &str, default: usize) -> Result<usize, GovernanceError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<usize>().map_err(|e| {
                    GovernanceError::Configuration(format!("Invalid {} value '{}': {}", key, value, e))
                })?;
                if parsed == 0 {
                    return Err(GovernanceError::Configuration(format!(
                        "{} must be greater than 0",
                        key
                    )));
                }
                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    /// Parse a ratio in (0, 1].
    fn parse_ratio_or_default(key: &str, default: f64) -> Result<f64, GovernanceError> {
        match env::var(key) {
            Ok(value) => {
                let parsed = value.parse::<f64>().map_err(|e| {
                    GovernanceError::Configuration(format!("Invalid {} value '{}': {}", key, value, e))
                })?;
                if !(parsed > 0.0 && parsed <= 1.0) {
                    return Err(GovernanceError::Configuration(format!(
                        "{} must be within (0, 1], got {}",
                        key, parsed
                    )));
                }
                Ok(parsed)
            }
            _ => Ok(default),
        }
    }

    fn parse_bool_or_default(key: &str, default: bool) -> Result<bool, GovernanceError> {
        match env::var(key) {
            Ok(value) => match value.to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(GovernanceError::Configuration(format!(
                    "Invalid {} value '{}': expected true/false",
                    key, other
                ))),
            },
            _ => Ok(default),
        }
    }

    fn parse_risk_level_or_default(key: &str, default: RiskLevel) -> Result<RiskLevel, GovernanceError> {
        match env::var(key) {
            Ok(value) => match value.to_lowercase().as_str() {
                "low" => Ok(RiskLevel::Low),
                "medium" => Ok(RiskLevel::Medium),
                "high" => Ok(RiskLevel::High),
                "critical" => Ok(RiskLevel::Critical),
                other => Err(GovernanceError::Configuration(format!(
                    "Invalid {} value '{}': must be low, medium, high or critical",
                    key, other
                ))),
            },
            _ => Ok(default),
        }
    }

    fn parse_list_or_default(key: &str, default: &[&str]) -> Vec<String> {
        match env::var(key) {
            Ok(value) if !value.is_empty() => value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => default.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn validate(&self) -> Result<(), GovernanceError> {
        if self.risk_medium_weight >= self.risk_high_weight {
            return Err(GovernanceError::Configuration(format!(
                "RISK_MEDIUM_WEIGHT ({}) must be below RISK_HIGH_WEIGHT ({})",
                self.risk_medium_weight, self.risk_high_weight
            )));
        }

        if self.clearance_yaml_path.is_none() && self.database_url.is_none() {
            return Err(GovernanceError::Configuration(
                "Either DATABASE_URL or CLEARANCE_YAML_PATH must be set".to_string(),
            ));
        }

        if let Some(ref path) = self.clearance_yaml_path {
            if !path.exists() || !path.is_file() {
                return Err(GovernanceError::Configuration(format!(
                    "Clearance file not found at {:?}",
                    path
                )));
            }
        }

        Self::validate_log_level(&self.log_level)?;
        Self::validate_log_format(&self.log_format)?;

        Ok(())
    }

    fn validate_log_level(level: &str) -> Result<(), GovernanceError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&level.to_lowercase().as_str()) {
            return Err(GovernanceError::Configuration(format!(
                "Invalid LOG_LEVEL '{}': must be one of {}",
                level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }

    fn validate_log_format(format: &str) -> Result<(), GovernanceError> {
        if format != "json" && format != "text" {
            return Err(GovernanceError::Configuration(format!(
                "Invalid LOG_FORMAT '{}': must be 'json' or 'text'",
                format
            )));
        }
        Ok(())
    }
}

impl Config {
    /// Create a test configuration for unit tests.
    ///
    /// Bypasses environment loading and file validation.
    pub fn test_config() -> Self {
        Self {
            risk_block_level: RiskLevel::High,
            max_query_bytes: 64 * 1024,
            risk_medium_weight: 4,
            risk_high_weight: 8,
            complexity_escalation_threshold: 10,
            pii_confidence_floor: 0.35,
            clearance_cache_ttl_secs: 900,
            clearance_cache_capacity: 10_000,
            admin_tables: vec!["agent_clearances".to_string(), "audit_log".to_string()],
            breaker_failure_ratio: 0.3,
            breaker_window_secs: 10,
            breaker_min_throughput: 5,
            breaker_open_secs: 60,
            audit_fail_closed: false,
            audit_retry_max: 3,
            audit_retry_delay_ms: 10,
            audit_query_max_len: 512,
            clearance_yaml_path: None,
            database_url: Some("postgresql://localhost/test".to_string()),
            log_level: "info".to_string(),
            log_format: "json".to_string(),
        }
    }
}

/// Initialize the tracing subscriber from config.
///
/// Call at most once per process; tracing panics on double init.
pub fn init_tracing(config: &Config) -> Result<(), GovernanceError> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt()
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .with_env_filter(filter);

    if config.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}
