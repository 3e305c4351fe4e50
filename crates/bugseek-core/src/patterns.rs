//! Rule-based error pattern recognition.
//!
//! A [`PatternRecognizer`] holds a fixed, ordered table of [`PatternRule`]s.
//! Each rule carries one or more case-insensitive regex triggers; the first
//! trigger that hits decides the rule and the remaining triggers are skipped.
//!
//! # Primary pattern
//!
//! When several rules match, the primary pattern, category and severity come
//! from the most severe one (`critical > high > medium > low`). Ties go to the
//! rule declared first. Text with no hits classifies as `general` with
//! [`Severity::Medium`].
//!
//! ```rust
//! use bugseek_core::models::Severity;
//! use bugseek_core::patterns::PatternRecognizer;
//!
//! let recognizer = PatternRecognizer::new().unwrap();
//! let r = recognizer.recognize("java.lang.OutOfMemoryError: Java heap space");
//! assert_eq!(r.primary_pattern.as_deref(), Some("out_of_memory"));
//! assert_eq!(r.primary_category, "memory");
//! assert_eq!(r.estimated_severity, Severity::High);
//! ```

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::models::{PatternMatch, Severity};

/// Category reported when nothing matched.
pub const GENERAL_CATEGORY: &str = "general";

/// A named, hand-authored trigger set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    pub name: String,
    pub category: String,
    pub severity: Severity,
    pub description: String,
    /// Regular expressions, matched case-insensitively.
    pub triggers: Vec<String>,
}

impl PatternRule {
    fn builtin(
        name: &str,
        category: &str,
        severity: Severity,
        description: &str,
        triggers: &[&str],
    ) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            severity,
            description: description.to_string(),
            triggers: triggers.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// The built-in rule table, in evaluation order.
pub fn builtin_rules() -> Vec<PatternRule> {
    use Severity::*;
    vec![
        PatternRule::builtin(
            "kernel_panic",
            "kernel",
            Critical,
            "Kernel panic or critical kernel error",
            &[r"kernel panic", r"oops:", r"unable to handle kernel"],
        ),
        PatternRule::builtin(
            "segmentation_fault",
            "memory",
            High,
            "Memory access violation",
            &[r"segmentation fault", r"sigsegv", r"signal 11\b"],
        ),
        PatternRule::builtin(
            "out_of_memory",
            "memory",
            High,
            "System or runtime out of memory",
            &[
                r"out of memory",
                r"outofmemoryerror",
                r"java heap space",
                r"oom[- ]?killer",
                r"memory allocation failed",
            ],
        ),
        PatternRule::builtin(
            "buffer_overflow",
            "security",
            Critical,
            "Buffer overflow vulnerability",
            &[r"buffer overflow", r"stack smashing", r"heap overflow"],
        ),
        PatternRule::builtin(
            "device_not_found",
            "hardware",
            Medium,
            "Hardware device access issue",
            &[
                r"device not found",
                r"no such device",
                r"device or resource busy",
            ],
        ),
        PatternRule::builtin(
            "io_error",
            "filesystem",
            High,
            "File system I/O error",
            &[r"i/o error", r"input/output error", r"read-only file system"],
        ),
        PatternRule::builtin(
            "permission_denied",
            "security",
            Medium,
            "File or resource access permission error",
            &[
                r"permission denied",
                r"access denied",
                r"operation not permitted",
            ],
        ),
        PatternRule::builtin(
            "network_error",
            "network",
            Medium,
            "Network connectivity issue",
            &[
                r"network is unreachable",
                r"connection refused",
                r"network down",
            ],
        ),
        PatternRule::builtin(
            "watchdog_timeout",
            "hardware",
            High,
            "Hardware watchdog timeout",
            &[r"watchdog timeout", r"watchdog bite", r"hardware watchdog"],
        ),
        PatternRule::builtin(
            "android_anr",
            "android",
            Medium,
            "Android Application Not Responding",
            &[
                r"\banr\b",
                r"application not responding",
                r"input dispatching timed out",
            ],
        ),
        PatternRule::builtin(
            "java_exception",
            "application",
            Medium,
            "Java application exception",
            &[r"exception in thread", r"java\.lang\.", r"caused by:"],
        ),
    ]
}

struct CompiledRule {
    rule: PatternRule,
    triggers: Vec<Regex>,
}

impl CompiledRule {
    fn compile(rule: PatternRule) -> Result<Self> {
        let triggers = rule
            .triggers
            .iter()
            .map(|t| {
                RegexBuilder::new(t)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("invalid trigger '{}' in rule '{}'", t, rule.name))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rule, triggers })
    }

    fn is_match(&self, text: &str) -> bool {
        self.triggers.iter().any(|re| re.is_match(text))
    }

    fn to_match(&self) -> PatternMatch {
        PatternMatch {
            name: self.rule.name.clone(),
            category: self.rule.category.clone(),
            severity: self.rule.severity,
            description: self.rule.description.clone(),
        }
    }
}

/// Outcome of classifying one piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    /// Matched rules in table order.
    pub matches: Vec<PatternMatch>,
    pub primary_pattern: Option<String>,
    pub primary_category: String,
    pub estimated_severity: Severity,
}

impl Recognition {
    /// The rule that determined the primary fields, if any.
    pub fn primary(&self) -> Option<&PatternMatch> {
        let name = self.primary_pattern.as_deref()?;
        self.matches.iter().find(|m| m.name == name)
    }
}

/// Stateless rule engine over a fixed table.
pub struct PatternRecognizer {
    rules: Vec<CompiledRule>,
}

impl PatternRecognizer {
    /// Recognizer over [`builtin_rules`].
    pub fn new() -> Result<Self> {
        Self::with_rules(builtin_rules())
    }

    /// Built-in rules followed by `extra`, which are evaluated last.
    pub fn with_extra_rules(extra: Vec<PatternRule>) -> Result<Self> {
        let mut rules = builtin_rules();
        rules.extend(extra);
        Self::with_rules(rules)
    }

    pub fn with_rules(rules: Vec<PatternRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(CompiledRule::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> impl Iterator<Item = &PatternRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    pub fn recognize(&self, text: &str) -> Recognition {
        let mut matches = Vec::new();
        let mut primary: Option<&CompiledRule> = None;

        for compiled in &self.rules {
            if !compiled.is_match(text) {
                continue;
            }
            matches.push(compiled.to_match());
            // Strict comparison keeps the earliest rule on ties.
            if primary.map_or(true, |p| compiled.rule.severity > p.rule.severity) {
                primary = Some(compiled);
            }
        }

        match primary {
            Some(p) => Recognition {
                matches,
                primary_pattern: Some(p.rule.name.clone()),
                primary_category: p.rule.category.clone(),
                estimated_severity: p.rule.severity,
            },
            None => Recognition {
                matches,
                primary_pattern: None,
                primary_category: GENERAL_CATEGORY.to_string(),
                estimated_severity: Severity::Medium,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recognizer() -> PatternRecognizer {
        PatternRecognizer::new().unwrap()
    }

    #[test]
    fn test_empty_text_has_no_matches() {
        let r = recognizer().recognize("");
        assert!(r.matches.is_empty());
        assert_eq!(r.primary_pattern, None);
        assert_eq!(r.primary_category, "general");
        assert_eq!(r.estimated_severity, Severity::Medium);
    }

    #[test]
    fn test_java_heap_space_is_memory() {
        let r = recognizer().recognize("ERROR [ETLPipeline] OutOfMemoryError: Java heap space");
        assert_eq!(r.primary_category, "memory");
        assert!(r.estimated_severity >= Severity::High);
        assert_eq!(r.primary_pattern.as_deref(), Some("out_of_memory"));
    }

    #[test]
    fn test_case_insensitive() {
        let r = recognizer().recognize("SEGMENTATION FAULT (core dumped)");
        assert_eq!(r.primary_pattern.as_deref(), Some("segmentation_fault"));
    }

    #[test]
    fn test_highest_severity_wins() {
        // medium network_error hit, then a critical rule declared earlier
        let text = "connection refused\n*** stack smashing detected ***";
        let r = recognizer().recognize(text);
        assert_eq!(r.matches.len(), 2);
        assert_eq!(r.primary_pattern.as_deref(), Some("buffer_overflow"));
        assert_eq!(r.primary_category, "security");
        assert_eq!(r.estimated_severity, Severity::Critical);
    }

    #[test]
    fn test_tie_broken_by_declaration_order() {
        // segmentation_fault and io_error are both high; segfault is declared first.
        let text = "Input/output error on /dev/sda\nSegmentation fault";
        let r = recognizer().recognize(text);
        assert_eq!(r.primary_pattern.as_deref(), Some("segmentation_fault"));
        assert_eq!(r.primary_category, "memory");
    }

    #[test]
    fn test_one_match_per_rule() {
        // Three triggers of the same rule still produce a single match.
        let text = "kernel panic - not syncing\nOops: 0000\nunable to handle kernel paging request";
        let r = recognizer().recognize(text);
        assert_eq!(r.matches.len(), 1);
        assert_eq!(r.matches[0].name, "kernel_panic");
    }

    #[test]
    fn test_matches_in_table_order() {
        let text = "Exception in thread main\npermission denied\nkernel panic";
        let names: Vec<String> = recognizer()
            .recognize(text)
            .matches
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(
            names,
            vec!["kernel_panic", "permission_denied", "java_exception"]
        );
    }

    #[test]
    fn test_anr_requires_word_boundary() {
        let r = recognizer().recognize("tanrix service warning");
        assert!(r.matches.is_empty());
        let r = recognizer().recognize("ANR in com.example.app");
        assert_eq!(r.primary_pattern.as_deref(), Some("android_anr"));
    }

    #[test]
    fn test_deterministic() {
        let rec = recognizer();
        let text = "watchdog bite\nconnection refused\njava.lang.NullPointerException";
        let first = rec.recognize(text);
        for _ in 0..10 {
            assert_eq!(rec.recognize(text), first);
        }
    }

    #[test]
    fn test_extra_rules_evaluated_after_builtins() {
        let extra = PatternRule {
            name: "disk_full".to_string(),
            category: "filesystem".to_string(),
            severity: Severity::High,
            description: "Disk is full".to_string(),
            triggers: vec![r"no space left on device".to_string()],
        };
        let rec = PatternRecognizer::with_extra_rules(vec![extra]).unwrap();
        let r = rec.recognize("write failed: No space left on device");
        assert_eq!(r.primary_pattern.as_deref(), Some("disk_full"));
        assert_eq!(rec.rules().count(), builtin_rules().len() + 1);
    }

    #[test]
    fn test_invalid_trigger_rejected() {
        let bad = PatternRule {
            name: "broken".to_string(),
            category: "x".to_string(),
            severity: Severity::Low,
            description: String::new(),
            triggers: vec!["(unclosed".to_string()],
        };
        let err = PatternRecognizer::with_rules(vec![bad]).err().unwrap();
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_primary_lookup() {
        let r = recognizer().recognize("Watchdog timeout on cpu2");
        let p = r.primary().unwrap();
        assert_eq!(p.description, "Hardware watchdog timeout");
    }
}
