//! Field normalization: cleaning, coercion, and validation.

use crate::model::{ExtractionRule, FieldHint, FieldValue, NormalizedRecord, RawRecord};
use crate::phone;

/// Transforms raw extracted strings into typed, validated records.
///
/// The per-field transform is selected by the rule's hint. Invalidity is
/// data, never an error: a failed parse keeps the raw string in a
/// [`FieldValue::Invalid`] marker.
#[derive(Debug, Clone)]
pub struct Normalizer {
    rules: Vec<ExtractionRule>,
    default_region: String,
}

impl Normalizer {
    /// Creates a normalizer for a rule set.
    #[must_use]
    pub fn new(rules: Vec<ExtractionRule>, default_region: impl Into<String>) -> Self {
        Self {
            rules,
            default_region: default_region.into(),
        }
    }

    /// Normalizes a raw record.
    ///
    /// Every declared field is present in the result, with a value or an
    /// explicit missing/invalid marker.
    #[must_use]
    pub fn normalize(&self, raw: &RawRecord) -> NormalizedRecord {
        let mut record = NormalizedRecord::new(&raw.target_id, &raw.url);
        for rule in &self.rules {
            record.insert(&rule.field, self.normalize_field(rule.hint, raw.value(&rule.field)));
        }
        record
    }

    fn normalize_field(&self, hint: FieldHint, input: Option<&str>) -> FieldValue {
        let Some(text) = input else {
            return FieldValue::Missing;
        };
        let cleaned = collapse_whitespace(text);
        if cleaned.is_empty() {
            return FieldValue::Missing;
        }
        match hint {
            FieldHint::Default => FieldValue::Text(cleaned),
            FieldHint::Phone => match phone::canonicalize(&cleaned, &self.default_region) {
                Some(canonical) => FieldValue::Phone(canonical),
                None => FieldValue::Invalid { raw: cleaned },
            },
            FieldHint::Number | FieldHint::Currency => match parse_number(&cleaned) {
                Some(value) => FieldValue::Number(value),
                None => FieldValue::Invalid { raw: cleaned },
            },
        }
    }

    /// Names of required fields whose value failed validation.
    ///
    /// A required field that is merely missing does not count: only a value
    /// that was found and failed validation excludes the record.
    #[must_use]
    pub fn invalid_required_fields(&self, record: &NormalizedRecord) -> Vec<String> {
        self.rules
            .iter()
            .filter(|rule| rule.required)
            .filter(|rule| matches!(record.get(&rule.field), Some(FieldValue::Invalid { .. })))
            .map(|rule| rule.field.clone())
            .collect()
    }

    /// The skip reason when a record must be excluded, if any.
    #[must_use]
    pub fn skip_reason(&self, record: &NormalizedRecord) -> Option<String> {
        let invalid = self.invalid_required_fields(record);
        if invalid.is_empty() {
            None
        } else {
            Some(format!("invalid required field(s): {}", invalid.join(", ")))
        }
    }
}

/// Trims and collapses internal whitespace runs to single spaces.
#[must_use]
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Strips currency symbols, grouping separators, and surrounding junk,
/// then parses the remainder as a number.
fn parse_number(s: &str) -> Option<f64> {
    let filtered: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | '-'))
        .collect();
    if filtered.is_empty() {
        return None;
    }
    filtered.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExtractionRule;

    fn phone_rules() -> Vec<ExtractionRule> {
        vec![
            ExtractionRule::css("name", "h1"),
            ExtractionRule::css("phone", ".tel")
                .with_hint(FieldHint::Phone)
                .required(),
            ExtractionRule::css("price", ".price").with_hint(FieldHint::Currency),
        ]
    }

    fn raw(name: Option<&str>, phone: Option<&str>, price: Option<&str>) -> RawRecord {
        let mut record = RawRecord::new("1", "https://example.com/a");
        record.insert("name", name.map(String::from));
        record.insert("phone", phone.map(String::from));
        record.insert("price", price.map(String::from));
        record
    }

    #[test]
    fn test_every_declared_field_present() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let record = normalizer.normalize(&raw(None, None, None));

        assert_eq!(record.fields.len(), 3);
        assert_eq!(record.get("name"), Some(&FieldValue::Missing));
        assert_eq!(record.get("phone"), Some(&FieldValue::Missing));
        assert_eq!(record.get("price"), Some(&FieldValue::Missing));
    }

    #[test]
    fn test_default_hint_collapses_whitespace() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let record = normalizer.normalize(&raw(Some("  Acme \n  Stores  "), None, None));

        assert_eq!(
            record.get("name"),
            Some(&FieldValue::Text("Acme Stores".to_string()))
        );
    }

    #[test]
    fn test_empty_after_trim_is_missing() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let record = normalizer.normalize(&raw(Some("   \t "), None, None));

        assert_eq!(record.get("name"), Some(&FieldValue::Missing));
    }

    #[test]
    fn test_phone_canonicalized() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let record = normalizer.normalize(&raw(None, Some("+1 (415) 555-0100"), None));

        assert_eq!(
            record.get("phone"),
            Some(&FieldValue::Phone("+14155550100".to_string()))
        );
        assert!(normalizer.skip_reason(&record).is_none());
    }

    #[test]
    fn test_phone_normalization_idempotent() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let first = normalizer.normalize(&raw(None, Some("+1 (415) 555-0100"), None));
        let Some(FieldValue::Phone(canonical)) = first.get("phone").cloned() else {
            panic!("expected canonical phone");
        };

        let second = normalizer.normalize(&raw(None, Some(&canonical), None));
        assert_eq!(second.get("phone"), Some(&FieldValue::Phone(canonical)));
    }

    #[test]
    fn test_invalid_phone_retains_raw() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let record = normalizer.normalize(&raw(None, Some("not a number"), None));

        assert_eq!(
            record.get("phone"),
            Some(&FieldValue::Invalid {
                raw: "not a number".to_string()
            })
        );
        let reason = normalizer.skip_reason(&record).unwrap();
        assert!(reason.contains("phone"));
    }

    #[test]
    fn test_missing_required_does_not_skip() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let record = normalizer.normalize(&raw(Some("Acme"), None, None));

        assert!(normalizer.skip_reason(&record).is_none());
    }

    #[test]
    fn test_invalid_optional_does_not_skip() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let record = normalizer.normalize(&raw(None, None, Some("call us")));

        assert_eq!(
            record.get("price"),
            Some(&FieldValue::Invalid {
                raw: "call us".to_string()
            })
        );
        assert!(normalizer.skip_reason(&record).is_none());
    }

    #[test]
    fn test_currency_strips_symbols() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let record = normalizer.normalize(&raw(None, None, Some("$1,234.50")));

        assert_eq!(record.get("price"), Some(&FieldValue::Number(1234.50)));
    }

    #[test]
    fn test_number_with_units() {
        let normalizer = Normalizer::new(phone_rules(), "US");
        let record = normalizer.normalize(&raw(None, None, Some("42 USD")));

        assert_eq!(record.get("price"), Some(&FieldValue::Number(42.0)));
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a  b\t\nc "), "a b c");
        assert_eq!(collapse_whitespace(""), "");
    }
}
