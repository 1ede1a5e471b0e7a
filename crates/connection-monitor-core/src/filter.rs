//! Subscription filters: single-key and field-predicate delivery.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::ConnectionKey;

/// Filter expression that could not be parsed.
#[derive(Debug, Error)]
#[error("unsupported predicate expression: {0}")]
pub struct PredicateParseError(String);

/// Equality test of one record field against a string literal, evaluated
/// against the value at the moment of mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub field: String,
    pub value: String,
}

impl Predicate {
    /// Build a field-equality predicate directly.
    pub fn field_equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Parse the sql-ish form `field = 'VALUE'`.
    ///
    /// # Errors
    /// Returns an error for anything other than a single quoted equality.
    pub fn parse(input: &str) -> Result<Self, PredicateParseError> {
        let unsupported = || PredicateParseError(input.to_owned());

        let (field, literal) = input.split_once('=').ok_or_else(unsupported)?;
        let field = field.trim();
        let literal = literal.trim();

        if field.is_empty() || field.contains(char::is_whitespace) {
            return Err(unsupported());
        }
        let value = literal
            .strip_prefix('\'')
            .and_then(|rest| rest.strip_suffix('\''))
            .ok_or_else(unsupported)?;

        Ok(Self::field_equals(field, value))
    }

    /// Whether a raw JSON value satisfies this predicate. A payload that
    /// does not parse, or that lacks the field, matches nothing.
    #[must_use]
    pub fn matches(&self, raw: &str) -> bool {
        serde_json::from_str::<serde_json::Value>(raw)
            .ok()
            .and_then(|value| value.get(&self.field).cloned())
            .is_some_and(|field| field.as_str() == Some(self.value.as_str()))
    }
}

/// What a subscriber wants delivered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SubscriptionFilter {
    /// Exactly one key; a constant-overhead point subscription.
    Key { key: ConnectionKey },
    /// Every entry whose value matches the predicate when it mutates.
    Predicate { predicate: Predicate },
}

impl SubscriptionFilter {
    /// Filter on a single key.
    pub fn key(key: impl Into<ConnectionKey>) -> Self {
        Self::Key { key: key.into() }
    }

    /// Filter on a field predicate.
    #[must_use]
    pub const fn predicate(predicate: Predicate) -> Self {
        Self::Predicate { predicate }
    }

    /// Whether a mutation of `key` to `value` should be delivered.
    #[must_use]
    pub fn matches(&self, key: &str, value: &str) -> bool {
        match self {
            Self::Key { key: wanted } => wanted == key,
            Self::Predicate { predicate } => predicate.matches(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quoted_equality() {
        let predicate = Predicate::parse("connection_status = 'AT RISK'").unwrap();
        assert_eq!(
            predicate,
            Predicate::field_equals("connection_status", "AT RISK")
        );
    }

    #[test]
    fn parse_rejects_unquoted_literal() {
        assert!(Predicate::parse("connection_status = AT RISK").is_err());
        assert!(Predicate::parse("no equality here").is_err());
        assert!(Predicate::parse("a b = 'c'").is_err());
    }

    #[test]
    fn predicate_matches_at_mutation_time() {
        let predicate = Predicate::field_equals("connection_status", "AT RISK");
        assert!(predicate.matches(r#"{"connection_status":"AT RISK"}"#));
        assert!(!predicate.matches(r#"{"connection_status":"OK"}"#));
        assert!(!predicate.matches(r#"{"other":"AT RISK"}"#));
        assert!(!predicate.matches("not json"));
    }

    #[test]
    fn key_filter_is_exclusive() {
        let filter = SubscriptionFilter::key("AA100BB200");
        assert!(filter.matches("AA100BB200", "{}"));
        assert!(!filter.matches("CC300DD400", "{}"));
    }

    #[test]
    fn predicate_filter_ignores_key() {
        let filter = SubscriptionFilter::predicate(Predicate::field_equals("s", "x"));
        assert!(filter.matches("anything", r#"{"s":"x"}"#));
        assert!(!filter.matches("anything", r#"{"s":"y"}"#));
    }
}
