//! Data model for targets, rules, records, and job outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Separator used when a collect-all rule joins multiple matches into one
/// field value.
pub const LIST_SEPARATOR: &str = "; ";

/// How a target's page should be acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Navigate a controlled browser and read the rendered markup.
    Browser,
    /// Fetch the raw document with a plain HTTP request.
    Static,
}

impl Default for RenderMode {
    fn default() -> Self {
        Self::Browser
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Browser => write!(f, "browser"),
            Self::Static => write!(f, "static"),
        }
    }
}

/// One unit of scraping work: a URL plus a caller-assigned identifier.
///
/// Targets are immutable once enqueued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Caller-assigned identifier, unique within a job.
    pub id: String,
    /// The URL to acquire.
    pub url: String,
    /// How the page should be acquired.
    #[serde(default)]
    pub mode: RenderMode,
}

impl Target {
    /// Creates a browser-rendered target.
    #[must_use]
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            mode: RenderMode::Browser,
        }
    }

    /// Creates a browser-rendered target with a generated identifier.
    #[must_use]
    pub fn from_url(url: impl Into<String>) -> Self {
        Self::new(crate::utils::generate_target_id(), url)
    }

    /// Creates a target fetched with a plain HTTP request.
    #[must_use]
    pub fn static_page(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            mode: RenderMode::Static,
        }
    }

    /// Sets the render mode.
    #[must_use]
    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A fetched document plus fetch metadata.
///
/// Owned by the fetch step that produced it; passed by value to the
/// extractor and discarded afterwards.
#[derive(Debug, Clone)]
pub struct PageContent {
    /// The raw markup.
    pub markup: String,
    /// Final URL after redirects.
    pub final_url: String,
    /// HTTP status code, if the page came from the static path.
    pub status_code: Option<u16>,
    /// When the fetch completed.
    pub fetched_at: DateTime<Utc>,
    /// Time taken to fetch, in milliseconds.
    pub duration_ms: f64,
}

impl PageContent {
    /// Creates new page content fetched now.
    #[must_use]
    pub fn new(markup: impl Into<String>, final_url: impl Into<String>) -> Self {
        Self {
            markup: markup.into(),
            final_url: final_url.into(),
            status_code: None,
            fetched_at: crate::utils::now_utc(),
            duration_ms: 0.0,
        }
    }

    /// Sets the HTTP status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Sets the fetch duration.
    #[must_use]
    pub fn with_duration_ms(mut self, ms: f64) -> Self {
        self.duration_ms = ms;
        self
    }

    /// Whether the document is empty or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.markup.trim().is_empty()
    }
}

/// How a rule locates its value in a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectStrategy {
    /// CSS selection; the value is the element's attribute when `attr` is
    /// set, otherwise its concatenated text.
    Css {
        /// The CSS selector.
        selector: String,
        /// Attribute to read instead of element text.
        #[serde(default)]
        attr: Option<String>,
    },
    /// Regex over the raw document markup. Capture group 1 is used when
    /// present, otherwise the whole match.
    Pattern {
        /// The regex pattern.
        regex: String,
    },
}

/// Post-extraction transform applied to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldHint {
    /// Trim and collapse whitespace only.
    Default,
    /// Region-aware phone parsing, canonicalized to international form.
    Phone,
    /// Numeric coercion.
    Number,
    /// Numeric coercion with currency symbols stripped.
    Currency,
}

impl Default for FieldHint {
    fn default() -> Self {
        Self::Default
    }
}

impl fmt::Display for FieldHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Phone => write!(f, "phone"),
            Self::Number => write!(f, "number"),
            Self::Currency => write!(f, "currency"),
        }
    }
}

/// A named mapping from a logical field to a selection strategy.
///
/// Rules are configuration: loaded once per job, immutable during it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRule {
    /// The logical field name (dataset column).
    pub field: String,
    /// How to locate the value.
    pub strategy: SelectStrategy,
    /// Post-extraction transform.
    #[serde(default)]
    pub hint: FieldHint,
    /// Whether an invalid value excludes the whole record.
    #[serde(default)]
    pub required: bool,
    /// Whether to gather all matches instead of the first.
    #[serde(default)]
    pub collect_all: bool,
}

impl ExtractionRule {
    /// Creates a CSS text rule.
    #[must_use]
    pub fn css(field: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            strategy: SelectStrategy::Css {
                selector: selector.into(),
                attr: None,
            },
            hint: FieldHint::Default,
            required: false,
            collect_all: false,
        }
    }

    /// Creates a CSS attribute rule.
    #[must_use]
    pub fn css_attr(
        field: impl Into<String>,
        selector: impl Into<String>,
        attr: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            strategy: SelectStrategy::Css {
                selector: selector.into(),
                attr: Some(attr.into()),
            },
            hint: FieldHint::Default,
            required: false,
            collect_all: false,
        }
    }

    /// Creates a regex pattern rule.
    #[must_use]
    pub fn pattern(field: impl Into<String>, regex: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            strategy: SelectStrategy::Pattern {
                regex: regex.into(),
            },
            hint: FieldHint::Default,
            required: false,
            collect_all: false,
        }
    }

    /// Sets the post-extraction hint.
    #[must_use]
    pub fn with_hint(mut self, hint: FieldHint) -> Self {
        self.hint = hint;
        self
    }

    /// Marks the field required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Gathers all matches, list-encoded into one value.
    #[must_use]
    pub fn collect_all(mut self) -> Self {
        self.collect_all = true;
        self
    }
}

/// Extracted field strings for one target, prior to normalization.
///
/// `None` marks a field whose strategy matched nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    /// The source target id.
    pub target_id: String,
    /// The source URL (final, after redirects).
    pub url: String,
    /// Extracted strings by field name.
    pub fields: HashMap<String, Option<String>>,
}

impl RawRecord {
    /// Creates an empty raw record.
    #[must_use]
    pub fn new(target_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            url: url.into(),
            fields: HashMap::new(),
        }
    }

    /// Records an extracted value (or its absence) for a field.
    pub fn insert(&mut self, field: impl Into<String>, value: Option<String>) {
        self.fields.insert(field.into(), value);
    }

    /// Returns the extracted string for a field, if one was found.
    #[must_use]
    pub fn value(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Option::as_deref)
    }
}

/// The typed result of normalizing one field.
///
/// `Missing` and `Invalid` are data, not errors: a record always carries
/// an entry for every declared field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// Cleaned free text.
    Text(String),
    /// Parsed numeric value.
    Number(f64),
    /// Canonical international phone number (`+<cc><digits>`).
    Phone(String),
    /// The strategy matched nothing, or the value was empty after trimming.
    Missing,
    /// The value failed validation; the original string is retained for
    /// diagnostics.
    Invalid {
        /// The raw extracted string.
        raw: String,
    },
}

impl FieldValue {
    /// Whether the field holds a validated value or an explicit absence.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid { .. })
    }

    /// Whether the field is absent.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// The tabular (CSV/Excel) encoding of this value.
    ///
    /// Missing encodes as the empty string; invalid values export their
    /// retained raw string; numbers use their shortest round-trip form.
    #[must_use]
    pub fn export_string(&self) -> String {
        match self {
            Self::Text(s) | Self::Phone(s) => s.clone(),
            Self::Number(n) => n.to_string(),
            Self::Missing => String::new(),
            Self::Invalid { raw } => raw.clone(),
        }
    }

    /// The JSON encoding of this value. Missing encodes as `null`.
    #[must_use]
    pub fn json_value(&self) -> serde_json::Value {
        match self {
            Self::Text(s) | Self::Phone(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => serde_json::json!(n),
            Self::Missing => serde_json::Value::Null,
            Self::Invalid { raw } => serde_json::Value::String(raw.clone()),
        }
    }
}

/// Typed, validated field values for one target.
///
/// Invariant: every field declared in the rule set is present, with a
/// value or an explicit missing/invalid marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    /// The source target id.
    pub target_id: String,
    /// The source URL.
    pub url: String,
    /// Normalized values by field name.
    pub fields: HashMap<String, FieldValue>,
}

impl NormalizedRecord {
    /// Creates an empty normalized record.
    #[must_use]
    pub fn new(target_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            url: url.into(),
            fields: HashMap::new(),
        }
    }

    /// Records a normalized value for a field.
    pub fn insert(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    /// Returns the value for a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    /// The tabular encoding of a field, empty string when undeclared.
    #[must_use]
    pub fn field_string(&self, field: &str) -> String {
        self.fields
            .get(field)
            .map_or_else(String::new, FieldValue::export_string)
    }
}

/// Terminal status of one processed target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The record was normalized and added to the dataset.
    Success,
    /// The target was not collected (invalid required field, cancellation).
    Skipped {
        /// Why the target was skipped.
        reason: String,
    },
    /// Fetch or extraction failed after any retries.
    Failed {
        /// The final error.
        error: String,
        /// Total fetch attempts made.
        attempts: usize,
    },
}

impl OutcomeStatus {
    /// Short machine-readable kind tag.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success => "succeeded",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Per-target status built incrementally by the collection job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    /// The target this outcome belongs to.
    pub target_id: String,
    /// The terminal status.
    pub status: OutcomeStatus,
}

impl JobOutcome {
    /// Creates a success outcome.
    #[must_use]
    pub fn success(target_id: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            status: OutcomeStatus::Success,
        }
    }

    /// Creates a skipped outcome.
    #[must_use]
    pub fn skipped(target_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            status: OutcomeStatus::Skipped {
                reason: reason.into(),
            },
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn failed(
        target_id: impl Into<String>,
        error: impl Into<String>,
        attempts: usize,
    ) -> Self {
        Self {
            target_id: target_id.into(),
            status: OutcomeStatus::Failed {
                error: error.into(),
                attempts,
            },
        }
    }

    /// Whether the target produced a dataset record.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Success)
    }

    /// One human-readable line describing this outcome.
    #[must_use]
    pub fn line(&self) -> String {
        match &self.status {
            OutcomeStatus::Success => format!("{}: ok", self.target_id),
            OutcomeStatus::Skipped { reason } => {
                format!("{}: skipped ({reason})", self.target_id)
            }
            OutcomeStatus::Failed { error, attempts } => {
                format!("{}: failed after {attempts} attempt(s): {error}", self.target_id)
            }
        }
    }
}

/// Lifecycle state of a collection job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Constructed, not yet started.
    Idle,
    /// Draining the target queue.
    Running,
    /// All targets processed.
    Completed,
    /// Stopped early by an external cancellation.
    Cancelled,
    /// Stopped by a non-recoverable infrastructure error.
    Failed,
}

impl Default for JobState {
    fn default() -> Self {
        Self::Idle
    }
}

impl JobState {
    /// Whether this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
