//! Region-aware phone number grammar.
//!
//! Parses free-form phone strings into canonical international form
//! (`+<country code><national number>`). International input (leading `+`
//! or `00`) is validated by digit count alone; national input is resolved
//! through a fixed region table that supplies the country code, the trunk
//! prefix to strip, and the accepted national-number lengths.
//!
//! Canonicalization is idempotent: a canonical `+<digits>` string
//! re-normalizes to itself.

/// Minimum digits in an international number (country code included).
const E164_MIN_DIGITS: usize = 8;
/// Maximum digits in an international number (country code included).
const E164_MAX_DIGITS: usize = 15;

/// Dialing rules for one region.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    /// ISO 3166-1 alpha-2 region code.
    pub code: &'static str,
    /// Country calling code, without `+`.
    pub country_code: &'static str,
    /// Trunk prefix stripped from national numbers; empty when the region
    /// keeps it (or has none).
    pub trunk_prefix: &'static str,
    /// Minimum national-number digits.
    pub min_len: usize,
    /// Maximum national-number digits.
    pub max_len: usize,
}

const REGIONS: &[Region] = &[
    Region { code: "US", country_code: "1", trunk_prefix: "1", min_len: 10, max_len: 10 },
    Region { code: "CA", country_code: "1", trunk_prefix: "1", min_len: 10, max_len: 10 },
    Region { code: "GB", country_code: "44", trunk_prefix: "0", min_len: 9, max_len: 10 },
    Region { code: "IE", country_code: "353", trunk_prefix: "0", min_len: 7, max_len: 9 },
    Region { code: "DE", country_code: "49", trunk_prefix: "0", min_len: 7, max_len: 11 },
    Region { code: "FR", country_code: "33", trunk_prefix: "0", min_len: 9, max_len: 9 },
    Region { code: "ES", country_code: "34", trunk_prefix: "", min_len: 9, max_len: 9 },
    Region { code: "IT", country_code: "39", trunk_prefix: "", min_len: 8, max_len: 11 },
    Region { code: "NG", country_code: "234", trunk_prefix: "0", min_len: 8, max_len: 10 },
    Region { code: "GH", country_code: "233", trunk_prefix: "0", min_len: 9, max_len: 9 },
    Region { code: "KE", country_code: "254", trunk_prefix: "0", min_len: 9, max_len: 9 },
    Region { code: "ZA", country_code: "27", trunk_prefix: "0", min_len: 9, max_len: 9 },
    Region { code: "IN", country_code: "91", trunk_prefix: "0", min_len: 10, max_len: 10 },
    Region { code: "AU", country_code: "61", trunk_prefix: "0", min_len: 9, max_len: 9 },
    Region { code: "BR", country_code: "55", trunk_prefix: "0", min_len: 10, max_len: 11 },
];

/// Looks up a region by its alpha-2 code, case-insensitively.
#[must_use]
pub fn lookup_region(code: &str) -> Option<&'static Region> {
    REGIONS.iter().find(|r| r.code.eq_ignore_ascii_case(code))
}

/// Whether a region code is in the table.
#[must_use]
pub fn is_known_region(code: &str) -> bool {
    lookup_region(code).is_some()
}

/// Parses a raw phone string and canonicalizes it to international form.
///
/// Returns `None` when the input cannot be read as a plausible phone
/// number; the caller keeps the raw string for diagnostics.
#[must_use]
pub fn canonicalize(raw: &str, region: &str) -> Option<String> {
    // Formatting punctuation (spaces, dashes, dots, parentheses) is noise;
    // only digits and a leading '+' carry meaning.
    let compact: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect();

    let (international, digits) = match compact.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => match compact.strip_prefix("00") {
            Some(rest) => (true, rest),
            None => (false, compact.as_str()),
        },
    };

    // A '+' anywhere but the front is not a phone number.
    if digits.contains('+') || digits.is_empty() {
        return None;
    }

    if international {
        if (E164_MIN_DIGITS..=E164_MAX_DIGITS).contains(&digits.len()) {
            Some(format!("+{digits}"))
        } else {
            None
        }
    } else {
        let region = lookup_region(region)?;
        let national = if region.trunk_prefix.is_empty() {
            digits
        } else {
            digits.strip_prefix(region.trunk_prefix).unwrap_or(digits)
        };
        if (region.min_len..=region.max_len).contains(&national.len()) {
            Some(format!("+{}{national}", region.country_code))
        } else {
            None
        }
    }
}
