//! Rule-driven field extraction from fetched documents.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;

use crate::errors::{ConfigurationError, HarvestError};
use crate::model::{ExtractionRule, PageContent, RawRecord, SelectStrategy, LIST_SEPARATOR};

/// Applies a compiled rule set to fetched pages.
///
/// Selectors and regexes are compiled once at job start; an invalid rule is
/// a [`ConfigurationError`] there, never mid-run. A document that is empty
/// where markup was expected is a single extraction error for the whole
/// record.
#[derive(Debug)]
pub struct Extractor {
    rules: Vec<CompiledRule>,
}

#[derive(Debug)]
struct CompiledRule {
    field: String,
    collect_all: bool,
    matcher: Matcher,
}

#[derive(Debug)]
enum Matcher {
    Css {
        selector: Selector,
        attr: Option<String>,
    },
    Pattern(Regex),
}

impl Extractor {
    /// Compiles a rule set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for an invalid CSS selector or regex.
    pub fn compile(rules: &[ExtractionRule]) -> Result<Self, ConfigurationError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            let matcher = match &rule.strategy {
                SelectStrategy::Css { selector, attr } => {
                    let parsed = Selector::parse(selector).map_err(|e| {
                        ConfigurationError::new(format!(
                            "invalid selector {selector:?} for field {:?}: {e}",
                            rule.field
                        ))
                        .with_field(&rule.field)
                    })?;
                    Matcher::Css {
                        selector: parsed,
                        attr: attr.clone(),
                    }
                }
                SelectStrategy::Pattern { regex } => {
                    let parsed = Regex::new(regex).map_err(|e| {
                        ConfigurationError::new(format!(
                            "invalid pattern for field {:?}: {e}",
                            rule.field
                        ))
                        .with_field(&rule.field)
                    })?;
                    Matcher::Pattern(parsed)
                }
            };
            compiled.push(CompiledRule {
                field: rule.field.clone(),
                collect_all: rule.collect_all,
                matcher,
            });
        }
        Ok(Self { rules: compiled })
    }

    /// Extracts raw field values for one target.
    ///
    /// A strategy matching zero nodes records the field as missing, not an
    /// error. Multiple matches take the first in document order unless the
    /// rule collects all.
    ///
    /// # Errors
    ///
    /// Returns `HarvestError::Extraction` when the document is blank.
    pub fn extract(&self, target_id: &str, page: &PageContent) -> Result<RawRecord, HarvestError> {
        if page.is_blank() {
            return Err(HarvestError::Extraction {
                target_id: target_id.to_string(),
                message: "document is empty where markup was expected".to_string(),
            });
        }

        let document = Html::parse_document(&page.markup);

        let mut record = RawRecord::new(target_id, &page.final_url);
        for rule in &self.rules {
            let value = match &rule.matcher {
                Matcher::Css { selector, attr } => {
                    extract_css(&document, selector, attr.as_deref(), rule.collect_all)
                }
                // Patterns run over the raw markup so attribute-borne
                // values (hrefs, mailto links) are reachable.
                Matcher::Pattern(regex) => {
                    extract_pattern(&page.markup, regex, rule.collect_all)
                }
            };
            record.insert(&rule.field, value);
        }
        Ok(record)
    }
}

fn element_value(element: ElementRef<'_>, attr: Option<&str>) -> Option<String> {
    match attr {
        Some(name) => element
            .value()
            .attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(String::from),
        None => {
            let text = element
                .text()
                .map(str::trim)
                .filter(|fragment| !fragment.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                None
            } else {
                Some(text)
            }
        }
    }
}

fn extract_css(
    document: &Html,
    selector: &Selector,
    attr: Option<&str>,
    collect_all: bool,
) -> Option<String> {
    let mut values = document
        .select(selector)
        .filter_map(|element| element_value(element, attr));

    if collect_all {
        let all: Vec<String> = values.collect();
        if all.is_empty() {
            None
        } else {
            Some(all.join(LIST_SEPARATOR))
        }
    } else {
        values.next()
    }
}

fn extract_pattern(text: &str, regex: &Regex, collect_all: bool) -> Option<String> {
    let mut seen = HashSet::new();
    let mut matches = regex.captures_iter(text).filter_map(|caps| {
        let m = caps.get(1).or_else(|| caps.get(0))?;
        let value = m.as_str().trim();
        if value.is_empty() || !seen.insert(value.to_string()) {
            None
        } else {
            Some(value.to_string())
        }
    });

    if collect_all {
        let all: Vec<String> = matches.collect();
        if all.is_empty() {
            None
        } else {
            Some(all.join(LIST_SEPARATOR))
        }
    } else {
        matches.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExtractionRule;

    const SAMPLE: &str = r#"
        <html><body>
            <h1>Acme Stores</h1>
            <div class="contact">
                <span class="tel">+1 (415) 555-0100</span>
                <a class="site" href="https://acme.example">site</a>
                <a class="site" href="https://acme2.example">mirror</a>
            </div>
            <p>Email: sales@acme.example or support@acme.example or sales@acme.example</p>
        </body></html>
    "#;

    fn page(markup: &str) -> PageContent {
        PageContent::new(markup, "https://example.com/a")
    }

    #[test]
    fn test_css_text_extraction() {
        let extractor = Extractor::compile(&[ExtractionRule::css("name", "h1")]).unwrap();
        let record = extractor.extract("1", &page(SAMPLE)).unwrap();

        assert_eq!(record.value("name"), Some("Acme Stores"));
        assert_eq!(record.url, "https://example.com/a");
    }

    #[test]
    fn test_css_attr_extraction_first_match() {
        let extractor =
            Extractor::compile(&[ExtractionRule::css_attr("website", "a.site", "href")]).unwrap();
        let record = extractor.extract("1", &page(SAMPLE)).unwrap();

        assert_eq!(record.value("website"), Some("https://acme.example"));
    }

    #[test]
    fn test_css_collect_all() {
        let extractor = Extractor::compile(&[
            ExtractionRule::css_attr("websites", "a.site", "href").collect_all()
        ])
        .unwrap();
        let record = extractor.extract("1", &page(SAMPLE)).unwrap();

        assert_eq!(
            record.value("websites"),
            Some("https://acme.example; https://acme2.example")
        );
    }

    #[test]
    fn test_zero_matches_is_missing() {
        let extractor =
            Extractor::compile(&[ExtractionRule::css("fax", ".fax-number")]).unwrap();
        let record = extractor.extract("1", &page(SAMPLE)).unwrap();

        assert!(record.fields.contains_key("fax"));
        assert_eq!(record.value("fax"), None);
    }

    #[test]
    fn test_pattern_extraction() {
        let extractor = Extractor::compile(&[ExtractionRule::pattern(
            "email",
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        )])
        .unwrap();
        let record = extractor.extract("1", &page(SAMPLE)).unwrap();

        assert_eq!(record.value("email"), Some("sales@acme.example"));
    }

    #[test]
    fn test_pattern_collect_all_deduplicates() {
        let extractor = Extractor::compile(&[ExtractionRule::pattern(
            "emails",
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
        )
        .collect_all()])
        .unwrap();
        let record = extractor.extract("1", &page(SAMPLE)).unwrap();

        assert_eq!(
            record.value("emails"),
            Some("sales@acme.example; support@acme.example")
        );
    }

    #[test]
    fn test_pattern_capture_group() {
        let extractor = Extractor::compile(&[ExtractionRule::pattern(
            "instagram",
            r"instagram\.com/([A-Za-z0-9_.]+)",
        )])
        .unwrap();
        let record = extractor
            .extract(
                "1",
                &page(r#"<a href="https://instagram.com/acmestores">ig</a>"#),
            )
            .unwrap();

        assert_eq!(record.value("instagram"), Some("acmestores"));
    }

    #[test]
    fn test_blank_document_is_extraction_error() {
        let extractor = Extractor::compile(&[ExtractionRule::css("name", "h1")]).unwrap();
        let err = extractor.extract("7", &page("   ")).unwrap_err();

        assert!(matches!(err, HarvestError::Extraction { ref target_id, .. } if target_id == "7"));
    }

    #[test]
    fn test_invalid_selector_is_configuration_error() {
        let err = Extractor::compile(&[ExtractionRule::css("name", "h1[[")]).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("name"));
    }

    #[test]
    fn test_invalid_regex_is_configuration_error() {
        let err = Extractor::compile(&[ExtractionRule::pattern("email", "([")]).unwrap_err();
        assert_eq!(err.field.as_deref(), Some("email"));
    }
}
