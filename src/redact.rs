//! PII redaction for the audit/log path.
//!
//! Replaces recognizable PII substrings with fixed placeholder tokens
//! before any text reaches logs or the audit trail. Redaction is lossy
//! and one-way; it is never applied to text returned to the caller.
//!
//! Two call sites:
//! - query text and conversation history: all rules, unconditionally,
//!   before audit writes and before history reaches the generator;
//! - document bodies during ingestion: a configurable rule set keyed by
//!   the document's `sensitivity` front-matter field.

use regex::Regex;
use std::collections::BTreeMap;

pub const EMAIL_PLACEHOLDER: &str = "[EMAIL REDACTED]";
pub const PHONE_PLACEHOLDER: &str = "[PHONE REDACTED]";
pub const NATIONAL_ID_PLACEHOLDER: &str = "[ID REDACTED]";

/// A single redaction rule, named as in `[redaction.document_rules]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    Email,
    Phone,
    NationalId,
}

impl Rule {
    pub fn parse(name: &str) -> Option<Rule> {
        match name {
            "email" => Some(Rule::Email),
            "phone" => Some(Rule::Phone),
            "national_id" => Some(Rule::NationalId),
            _ => None,
        }
    }
}

/// Compiled PII patterns, built once and shared across requests.
#[derive(Debug, Clone)]
pub struct Redactor {
    email: Regex,
    phone: Regex,
    national_id: Regex,
    /// Document-side rules per sensitivity label.
    document_rules: BTreeMap<String, Vec<Rule>>,
}

impl Redactor {
    pub fn new(document_rules: &BTreeMap<String, Vec<String>>) -> Self {
        let rules = document_rules
            .iter()
            .map(|(sensitivity, names)| {
                let parsed = names.iter().filter_map(|n| Rule::parse(n)).collect();
                (sensitivity.clone(), parsed)
            })
            .collect();

        Self {
            email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .expect("email pattern is valid"),
            phone: Regex::new(r"\+?\d{0,3}[ .-]?\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b")
                .expect("phone pattern is valid"),
            national_id: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b")
                .expect("national id pattern is valid"),
            document_rules: rules,
        }
    }

    /// Redact with every rule. Used for query text and history.
    pub fn redact(&self, text: &str) -> String {
        self.apply(text, &[Rule::NationalId, Rule::Email, Rule::Phone])
    }

    /// Redact a document body according to its sensitivity label.
    /// Unknown labels get no document-side redaction.
    pub fn redact_document(&self, text: &str, sensitivity: &str) -> String {
        match self.document_rules.get(sensitivity) {
            Some(rules) => self.apply(text, rules),
            None => text.to_string(),
        }
    }

    fn apply(&self, text: &str, rules: &[Rule]) -> String {
        let mut out = text.to_string();
        // National IDs first: their digit shape is a subset of what the
        // phone pattern can match.
        for rule in rules {
            out = match rule {
                Rule::NationalId => self
                    .national_id
                    .replace_all(&out, NATIONAL_ID_PLACEHOLDER)
                    .into_owned(),
                Rule::Email => self.email.replace_all(&out, EMAIL_PLACEHOLDER).into_owned(),
                Rule::Phone => self.phone.replace_all(&out, PHONE_PLACEHOLDER).into_owned(),
            };
        }
        out
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(&BTreeMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_email_addresses() {
        let r = Redactor::default();
        let out = r.redact("contact jane.doe+hr@example.co.uk for details");
        assert!(!out.contains("jane.doe"));
        assert_eq!(out, format!("contact {} for details", EMAIL_PLACEHOLDER));
    }

    #[test]
    fn redacts_phone_numbers() {
        let r = Redactor::default();
        for phone in ["555-867-5309", "(555) 867 5309", "+1 555.867.5309"] {
            let out = r.redact(&format!("call {} today", phone));
            assert!(out.contains(PHONE_PLACEHOLDER), "missed: {}", phone);
            assert!(!out.contains("5309"), "leaked: {}", out);
        }
    }

    #[test]
    fn redacts_national_ids_before_phone_rule_can_mangle_them() {
        let r = Redactor::default();
        let out = r.redact("ssn on file: 123-45-6789");
        assert_eq!(out, format!("ssn on file: {}", NATIONAL_ID_PLACEHOLDER));
    }

    #[test]
    fn redaction_is_lossy_and_leaves_clean_text_alone() {
        let r = Redactor::default();
        let clean = "how do I request vacation days?";
        assert_eq!(r.redact(clean), clean);
    }

    #[test]
    fn multiple_hits_in_one_text() {
        let r = Redactor::default();
        let out = r.redact("a@b.io wrote to c@d.io about 555-123-4567");
        assert_eq!(out.matches(EMAIL_PLACEHOLDER).count(), 2);
        assert_eq!(out.matches(PHONE_PLACEHOLDER).count(), 1);
    }

    #[test]
    fn document_rules_are_keyed_by_sensitivity() {
        let mut rules = BTreeMap::new();
        rules.insert("confidential".to_string(), vec!["email".to_string()]);
        let r = Redactor::new(&rules);

        let text = "reach hr@corp.com or 555-867-5309";
        let confidential = r.redact_document(text, "confidential");
        assert!(confidential.contains(EMAIL_PLACEHOLDER));
        assert!(confidential.contains("555-867-5309")); // phone rule not selected

        // Unlabeled documents pass through untouched.
        assert_eq!(r.redact_document(text, "public"), text);
    }
}
