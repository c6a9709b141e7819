// Sensitive-value detection and masking - annotation only, never blocks

use crate::config::Config;
use crate::core::errors::GovernanceError;
use crate::core::models::{PiiFinding, PiiType};
use regex::Regex;
use tracing::debug;

/// Confidence added when the column name and the value pattern agree.
const AGREEMENT_BOOST: f64 = 0.25;
/// Confidence assigned when only the column name suggests PII.
const NAME_ONLY_CONFIDENCE: f64 = 0.4;

struct ValuePattern {
    pii_type: PiiType,
    regex: Regex,
    base_confidence: f64,
}

/// Regex + context-based PII classifier.
///
/// Value patterns provide the base score; column-name heuristics bias it
/// upward. Values matched only by column name classify at low confidence
/// rather than raising an error.
pub struct PiiClassifier {
    patterns: Vec<ValuePattern>,
    confidence_floor: f64,
}

impl PiiClassifier {
    pub fn new(config: &Config) -> Result<Self, GovernanceError> {
        let compile = |name: &'static str, p: &str| {
            Regex::new(p).map_err(|e| GovernanceError::InvalidPattern {
                name: name.to_string(),
                reason: e.to_string(),
            })
        };
        let patterns = vec![
            ValuePattern {
                pii_type: PiiType::Ssn,
                regex: compile("pii-ssn", r"\b\d{3}-\d{2}-\d{4}\b")?,
                base_confidence: 0.85,
            },
            ValuePattern {
                pii_type: PiiType::CreditCard,
                regex: compile("pii-credit-card", r"\b(?:\d[ -]?){13,19}\b")?,
                base_confidence: 0.8,
            },
            ValuePattern {
                pii_type: PiiType::Email,
                regex: compile("pii-email", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")?,
                base_confidence: 0.7,
            },
            ValuePattern {
                pii_type: PiiType::Phone,
                regex: compile(
                    "pii-phone",
                    r"(\+\d{1,2}[\s.-]?)?\(?\d{3}\)?[\s.-]\d{3}[\s.-]?\d{4}\b",
                )?,
                base_confidence: 0.5,
            },
            ValuePattern {
                pii_type: PiiType::DateOfBirth,
                regex: compile(
                    "pii-dob",
                    r"\b(19|20)\d{2}[-/](0?[1-9]|1[0-2])[-/](0?[1-9]|[12]\d|3[01])\b",
                )?,
                base_confidence: 0.45,
            },
            ValuePattern {
                pii_type: PiiType::Address,
                regex: compile(
                    "pii-address",
                    r"(?i)\b\d{1,5}\s+\w+(\s+\w+)?\s+(street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|way)\b",
                )?,
                base_confidence: 0.6,
            },
        ];
        Ok(Self {
            patterns,
            confidence_floor: config.pii_confidence_floor,
        })
    }

    /// Scan (column, value) pairs. Best effort: findings below the
    /// configured confidence floor are dropped, and nothing here can
    /// reject the request.
    pub fn scan(&self, fields: &[(String, String)]) -> Vec<PiiFinding> {
        let mut findings = Vec::new();

        for (name, value) in fields {
            let hint = column_name_hint(name);
            let mut value_matched = false;

            for pattern in &self.patterns {
                if !pattern.regex.is_match(value) {
                    continue;
                }
                // Card numbers must also pass the Luhn check to count
                if pattern.pii_type == PiiType::CreditCard && !luhn_valid(value) {
                    continue;
                }
                value_matched = true;

                let mut confidence = pattern.base_confidence;
                if hint == Some(pattern.pii_type) {
                    confidence = (confidence + AGREEMENT_BOOST).min(1.0);
                }
                if confidence < self.confidence_floor {
                    continue;
                }
                findings.push(PiiFinding {
                    field: name.clone(),
                    pii_type: pattern.pii_type,
                    confidence,
                    masked_value: mask(value, pattern.pii_type),
                });
            }

            // Column name alone: classify at low confidence
            if !value_matched {
                if let Some(pii_type) = hint {
                    if NAME_ONLY_CONFIDENCE >= self.confidence_floor {
                        findings.push(PiiFinding {
                            field: name.clone(),
                            pii_type,
                            confidence: NAME_ONLY_CONFIDENCE,
                            masked_value: mask(value, pii_type),
                        });
                    }
                }
            }
        }

        if !findings.is_empty() {
            debug!(finding_count = findings.len(), "PII findings recorded");
        }
        findings
    }
}

/// Column-name heuristic. Substring checks on the lowercased name.
fn column_name_hint(name: &str) -> Option<PiiType> {
    let lower = name.to_lowercase();
    if lower.contains("ssn") || lower.contains("social_sec") {
        Some(PiiType::Ssn)
    } else if lower.contains("email") || lower.contains("e_mail") {
        Some(PiiType::Email)
    } else if lower.contains("phone") || lower.contains("mobile") || lower.contains("fax") {
        Some(PiiType::Phone)
    } else if lower.contains("card") || lower.contains("pan") || lower.contains("cc_num") {
        Some(PiiType::CreditCard)
    } else if lower.contains("dob") || lower.contains("birth") {
        Some(PiiType::DateOfBirth)
    } else if lower.contains("address") || lower.contains("street") || lower.contains("addr") {
        Some(PiiType::Address)
    } else if lower.contains("name") && !lower.contains("username") && !lower.contains("filename") {
        Some(PiiType::Name)
    } else {
        None
    }
}

/// Deterministic, type-aware masking. Per-type policy:
/// SSN and credit card retain the last 4 digits, email retains the
/// domain, phone retains the last 4 digits, everything else is fully
/// redacted. Never reveals more than this.
pub fn mask(value: &str, pii_type: PiiType) -> String {
    match pii_type {
        PiiType::Ssn => format!("***-**-{}", last_digits(value, 4)),
        PiiType::CreditCard => format!("**** **** **** {}", last_digits(value, 4)),
        PiiType::Email => match value.split_once('@') {
            Some((_, domain)) => format!("***@{}", domain),
            None => "***".to_string(),
        },
        PiiType::Phone => format!("***-***-{}", last_digits(value, 4)),
        PiiType::Name | PiiType::Address => "[REDACTED]".to_string(),
        PiiType::DateOfBirth => "****-**-**".to_string(),
    }
}

fn last_digits(value: &str, n: usize) -> String {
    let digits: Vec<char> = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < n {
        return "****".to_string();
    }
    digits[digits.len() - n..].iter().collect()
}

/// Luhn checksum over the digits of `value`.
fn luhn_valid(value: &str) -> bool {
    let digits: Vec<u32> = value.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> PiiClassifier {
        PiiClassifier::new(&Config::test_config()).unwrap()
    }

    fn scan_one(name: &str, value: &str) -> Vec<PiiFinding> {
        classifier().scan(&[(name.to_string(), value.to_string())])
    }

    #[test]
    fn test_email_with_name_agreement() {
        let findings = scan_one("ContactEmail", "john.doe@example.com");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].pii_type, PiiType::Email);
        assert!(findings[0].confidence >= 0.8);
        assert_eq!(findings[0].masked_value, "***@example.com");
    }

    #[test]
    fn test_email_value_only() {
        let findings = scan_one("notes", "reach me at a.b@corp.io");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].pii_type, PiiType::Email);
        assert!(findings[0].confidence < 0.8);
    }

    #[test]
    fn test_ssn_detection_and_mask() {
        let findings = scan_one("ssn", "123-45-6789");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].pii_type, PiiType::Ssn);
        assert!(findings[0].confidence >= 0.85);
        assert_eq!(findings[0].masked_value, "***-**-6789");
        assert!(!findings[0].masked_value.contains("123-45"));
    }

    #[test]
    fn test_credit_card_requires_luhn() {
        // Valid test PAN
        let findings = scan_one("card_number", "4539 1488 0343 6467");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].pii_type, PiiType::CreditCard);
        assert_eq!(findings[0].masked_value, "**** **** **** 6467");

        // Same shape, bad checksum: only the name-only fallback remains
        let findings = scan_one("card_number", "4539 1488 0343 6468");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].confidence, NAME_ONLY_CONFIDENCE);
    }

    #[test]
    fn test_name_column_low_confidence() {
        let findings = scan_one("customer_name", "Jane Smith");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].pii_type, PiiType::Name);
        assert_eq!(findings[0].confidence, NAME_ONLY_CONFIDENCE);
        assert_eq!(findings[0].masked_value, "[REDACTED]");
    }

    #[test]
    fn test_username_not_treated_as_name() {
        assert!(scan_one("username", "jsmith42").is_empty());
    }

    #[test]
    fn test_below_floor_dropped() {
        // DOB value with no column hint: 0.45 passes the default 0.35
        // floor, but a raised floor drops it
        let mut config = Config::test_config();
        config.pii_confidence_floor = 0.5;
        let classifier = PiiClassifier::new(&config).unwrap();
        let findings =
            classifier.scan(&[("created".to_string(), "2001-07-14".to_string())]);
        assert!(findings.is_empty());
    }

    #[test]
    fn test_address_fragment() {
        let findings = scan_one("shipping_address", "742 Evergreen Terrace Ave");
        assert_eq!(findings[0].pii_type, PiiType::Address);
        assert_eq!(findings[0].masked_value, "[REDACTED]");
    }

    #[test]
    fn test_phone_mask_keeps_last_four() {
        let findings = scan_one("phone", "(415) 555-2671");
        assert!(!findings.is_empty());
        assert_eq!(findings[0].pii_type, PiiType::Phone);
        assert_eq!(findings[0].masked_value, "***-***-2671");
    }

    #[test]
    fn test_mask_is_deterministic() {
        assert_eq!(
            mask("123-45-6789", PiiType::Ssn),
            mask("123-45-6789", PiiType::Ssn)
        );
    }

    #[test]
    fn test_confidence_within_unit_interval() {
        let findings = scan_one("ssn", "123-45-6789");
        for f in findings {
            assert!((0.0..=1.0).contains(&f.confidence));
        }
    }
}
