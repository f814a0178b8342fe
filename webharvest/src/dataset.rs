//! In-memory dataset accumulation and deduplication.

use std::collections::HashMap;

use crate::config::DedupPolicy;
use crate::model::{ExtractionRule, FieldValue, NormalizedRecord};

/// Name of the built-in key backed by each record's source URL.
pub const URL_KEY: &str = "url";

/// An ordered sequence of normalized records sharing one column schema.
///
/// Insertion order is completion order; exports are pure and repeatable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    schema: Vec<String>,
    records: Vec<NormalizedRecord>,
}

impl Dataset {
    /// The column schema, in rule-declaration order.
    #[must_use]
    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    /// The records, in completion order.
    #[must_use]
    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the dataset is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Result of offering a record to the builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The record was appended.
    Appended,
    /// A record with the same key exists and the policy keeps the first.
    DuplicateIgnored,
    /// A record with the same key was replaced in place.
    Replaced,
}

/// Accumulates normalized records, deduplicating by a configurable key.
///
/// Key comparison is case-insensitive after trimming. Records whose key
/// field is missing or invalid have no key and are always appended.
#[derive(Debug)]
pub struct DatasetBuilder {
    schema: Vec<String>,
    dedup_key: String,
    policy: DedupPolicy,
    records: Vec<NormalizedRecord>,
    index: HashMap<String, usize>,
}

impl DatasetBuilder {
    /// Creates a builder whose schema is the rule fields in declaration
    /// order.
    #[must_use]
    pub fn new(rules: &[ExtractionRule], dedup_key: impl Into<String>, policy: DedupPolicy) -> Self {
        Self {
            schema: rules.iter().map(|rule| rule.field.clone()).collect(),
            dedup_key: dedup_key.into(),
            policy,
            records: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Whether a dedup key can be computed for records of this rule set:
    /// the literal `"url"` or a declared field name.
    #[must_use]
    pub fn key_resolvable(rules: &[ExtractionRule], key: &str) -> bool {
        key == URL_KEY || rules.iter().any(|rule| rule.field == key)
    }

    fn key_of(&self, record: &NormalizedRecord) -> Option<String> {
        let raw = if self.dedup_key == URL_KEY {
            record.url.clone()
        } else {
            match record.get(&self.dedup_key) {
                Some(FieldValue::Text(s) | FieldValue::Phone(s)) => s.clone(),
                Some(FieldValue::Number(n)) => n.to_string(),
                _ => return None,
            }
        };
        let key = raw.trim().to_lowercase();
        if key.is_empty() {
            None
        } else {
            Some(key)
        }
    }

    /// Offers a record to the dataset.
    ///
    /// Appends unless the record's dedup key already exists; then the
    /// policy decides. A replaced record keeps its original position.
    pub fn add(&mut self, record: NormalizedRecord) -> AddOutcome {
        let Some(key) = self.key_of(&record) else {
            self.records.push(record);
            return AddOutcome::Appended;
        };

        if let Some(&position) = self.index.get(&key) {
            match self.policy {
                DedupPolicy::KeepFirst => AddOutcome::DuplicateIgnored,
                DedupPolicy::KeepLast => {
                    self.records[position] = record;
                    AddOutcome::Replaced
                }
            }
        } else {
            self.index.insert(key, self.records.len());
            self.records.push(record);
            AddOutcome::Appended
        }
    }

    /// Number of records accumulated so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records have been accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Finishes accumulation, yielding the immutable dataset.
    #[must_use]
    pub fn finish(self) -> Dataset {
        Dataset {
            schema: self.schema,
            records: self.records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExtractionRule;

    fn rules() -> Vec<ExtractionRule> {
        vec![
            ExtractionRule::css("name", "h1"),
            ExtractionRule::css("phone", ".tel"),
        ]
    }

    fn record(url: &str, name: &str, phone: &str) -> NormalizedRecord {
        let mut rec = NormalizedRecord::new("t", url);
        rec.insert("name", FieldValue::Text(name.to_string()));
        rec.insert("phone", FieldValue::Phone(phone.to_string()));
        rec
    }

    #[test]
    fn test_schema_declaration_order() {
        let builder = DatasetBuilder::new(&rules(), "url", DedupPolicy::KeepFirst);
        let dataset = builder.finish();
        assert_eq!(dataset.schema(), &["name".to_string(), "phone".to_string()]);
    }

    #[test]
    fn test_key_resolvable() {
        assert!(DatasetBuilder::key_resolvable(&rules(), "url"));
        assert!(DatasetBuilder::key_resolvable(&rules(), "phone"));
        assert!(!DatasetBuilder::key_resolvable(&rules(), "email"));
    }

    #[test]
    fn test_keep_first_ignores_duplicate() {
        let mut builder = DatasetBuilder::new(&rules(), "url", DedupPolicy::KeepFirst);

        let first = record("https://example.com/a", "First", "+11111111111");
        let second = record("https://example.com/a", "Second", "+12222222222");

        assert_eq!(builder.add(first.clone()), AddOutcome::Appended);
        assert_eq!(builder.add(second), AddOutcome::DuplicateIgnored);

        let dataset = builder.finish();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.records()[0], first);
    }

    #[test]
    fn test_keep_last_replaces_in_place() {
        let mut builder = DatasetBuilder::new(&rules(), "url", DedupPolicy::KeepLast);

        builder.add(record("https://example.com/a", "First", "+11111111111"));
        builder.add(record("https://example.com/b", "Other", "+13333333333"));
        let replacement = record("https://example.com/a", "Second", "+12222222222");
        assert_eq!(builder.add(replacement.clone()), AddOutcome::Replaced);

        let dataset = builder.finish();
        assert_eq!(dataset.len(), 2);
        // Replacement kept the original position.
        assert_eq!(dataset.records()[0], replacement);
    }

    #[test]
    fn test_key_comparison_case_insensitive() {
        let mut builder = DatasetBuilder::new(&rules(), "url", DedupPolicy::KeepFirst);

        builder.add(record("https://Example.com/A", "First", "+11111111111"));
        let outcome = builder.add(record("  https://example.com/a ", "Second", "+12222222222"));

        assert_eq!(outcome, AddOutcome::DuplicateIgnored);
    }

    #[test]
    fn test_field_dedup_key() {
        let mut builder = DatasetBuilder::new(&rules(), "phone", DedupPolicy::KeepFirst);

        builder.add(record("https://example.com/a", "First", "+11111111111"));
        let outcome = builder.add(record("https://example.com/b", "Second", "+11111111111"));

        assert_eq!(outcome, AddOutcome::DuplicateIgnored);
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn test_missing_key_always_appends() {
        let mut builder = DatasetBuilder::new(&rules(), "phone", DedupPolicy::KeepFirst);

        let mut first = NormalizedRecord::new("1", "https://example.com/a");
        first.insert("name", FieldValue::Text("Acme".to_string()));
        first.insert("phone", FieldValue::Missing);
        let mut second = NormalizedRecord::new("2", "https://example.com/b");
        second.insert("name", FieldValue::Text("Bmce".to_string()));
        second.insert("phone", FieldValue::Missing);

        assert_eq!(builder.add(first), AddOutcome::Appended);
        assert_eq!(builder.add(second), AddOutcome::Appended);
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn test_invalid_key_value_appends() {
        let mut builder = DatasetBuilder::new(&rules(), "phone", DedupPolicy::KeepFirst);

        let mut rec = NormalizedRecord::new("1", "https://example.com/a");
        rec.insert("name", FieldValue::Text("Acme".to_string()));
        rec.insert(
            "phone",
            FieldValue::Invalid {
                raw: "bad".to_string(),
            },
        );

        assert_eq!(builder.add(rec.clone()), AddOutcome::Appended);
        assert_eq!(builder.add(rec), AddOutcome::Appended);
    }
}
