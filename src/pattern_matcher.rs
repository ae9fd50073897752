use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ClassifyError;

/// A single classification rule: first regex to match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternRule {
    pub pattern: String,
    pub label: String,
}

/// Ordered regex rule set for the first classification stage.
///
/// Rules are compiled once at construction and never change afterwards, so a
/// matcher can be shared across concurrent requests without locking. A
/// malformed rule is rejected at load time, never at match time.
pub struct PatternMatcher {
    rules: Vec<(Regex, String)>,
}

impl PatternMatcher {
    /// Build a matcher from an ordered rule list.
    pub fn from_rules(rules: &[PatternRule]) -> Result<Self, ClassifyError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let regex = Regex::new(&rule.pattern).map_err(|e| ClassifyError::InvalidRule {
                pattern: rule.pattern.clone(),
                source: e,
            })?;
            compiled.push((regex, rule.label.clone()));
        }
        tracing::info!("Pattern matcher initialized with {} rules", compiled.len());
        Ok(Self { rules: compiled })
    }

    /// Build a matcher with the built-in rule set.
    pub fn with_default_rules() -> Self {
        // Default rules cover the common operational log shapes; anything
        // else falls through to the embedding classifier.
        Self::from_rules(&Self::default_rules()).expect("default rules must compile")
    }

    /// Load rules from a JSON file (`[{"pattern": ..., "label": ...}, ...]`).
    pub fn from_file(path: &str) -> Result<Self, ClassifyError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ClassifyError::Config(format!("cannot read rules file {path}: {e}")))?;
        let rules: Vec<PatternRule> = serde_json::from_str(&raw)
            .map_err(|e| ClassifyError::Config(format!("cannot parse rules file {path}: {e}")))?;
        Self::from_rules(&rules)
    }

    pub fn default_rules() -> Vec<PatternRule> {
        let rules = [
            (r"User User\d+ logged (in|out).", "User Action"),
            (r"Backup (started|ended) at .*", "System Notification"),
            (r"Backup completed successfully.", "System Notification"),
            (r"System updated to version .*", "System Notification"),
            (r"File .* uploaded successfully by user .*", "System Notification"),
            (r"Disk cleanup completed successfully.", "System Notification"),
            (r"System reboot initiated by user .*", "System Notification"),
            (r"Account with ID .* created by .*", "User Action"),
        ];
        rules
            .iter()
            .map(|(pattern, label)| PatternRule {
                pattern: pattern.to_string(),
                label: label.to_string(),
            })
            .collect()
    }

    /// Return the label of the first matching rule, or `None`.
    pub fn classify(&self, message: &str) -> Option<&str> {
        if message.trim().is_empty() {
            return None;
        }
        for (regex, label) in &self.rules {
            if regex.is_match(message) {
                tracing::debug!("Pattern match: {} -> {}", regex.as_str(), label);
                return Some(label);
            }
        }
        None
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules_match() {
        let matcher = PatternMatcher::with_default_rules();
        assert_eq!(
            matcher.classify("User User123 logged in."),
            Some("User Action")
        );
        assert_eq!(
            matcher.classify("Backup completed successfully."),
            Some("System Notification")
        );
        assert_eq!(
            matcher.classify("Account with ID 1234 created by User1."),
            Some("User Action")
        );
    }

    #[test]
    fn test_no_match() {
        let matcher = PatternMatcher::with_default_rules();
        assert_eq!(matcher.classify("Hey Bro, chill ya!"), None);
        assert_eq!(matcher.classify(""), None);
        assert_eq!(matcher.classify("   "), None);
    }

    #[test]
    fn test_first_match_wins() {
        let matcher = PatternMatcher::from_rules(&[
            PatternRule {
                pattern: r"error".to_string(),
                label: "First".to_string(),
            },
            PatternRule {
                pattern: r"error code \d+".to_string(),
                label: "Second".to_string(),
            },
        ])
        .unwrap();
        assert_eq!(matcher.classify("error code 42"), Some("First"));
    }

    #[test]
    fn test_malformed_rule_rejected_at_load() {
        let result = PatternMatcher::from_rules(&[PatternRule {
            pattern: r"unclosed (group".to_string(),
            label: "Broken".to_string(),
        }]);
        assert!(matches!(
            result,
            Err(ClassifyError::InvalidRule { .. })
        ));
    }

    #[test]
    fn test_deterministic() {
        let matcher = PatternMatcher::with_default_rules();
        let a = matcher.classify("System reboot initiated by user 12345.");
        let b = matcher.classify("System reboot initiated by user 12345.");
        assert_eq!(a, b);
    }
}
