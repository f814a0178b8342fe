//! # Webharvest
//!
//! A concurrent web data-collection pipeline.
//!
//! Webharvest fetches a set of page targets, extracts fields with
//! declarative rules, normalizes the raw values, and aggregates them
//! into a deduplicated dataset ready for export:
//!
//! - **Dual fetch paths**: plain HTTP for static pages, a controlled
//!   browser session for JavaScript-rendered ones
//! - **Retry with backoff**: transient failures retried per policy, with
//!   per-host rate limiting and user-agent rotation
//! - **Rule-driven extraction**: CSS selectors and regex patterns mapped
//!   to named fields
//! - **Normalization**: whitespace collapse, numeric parsing, and phone
//!   canonicalization with required-field validation
//! - **Cooperative cancellation**: partial results are kept and every
//!   target still gets an outcome
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use webharvest::prelude::*;
//!
//! let rules = vec![
//!     ExtractionRule::css("name", "h1"),
//!     ExtractionRule::css("phone", ".tel")
//!         .with_hint(FieldHint::Phone)
//!         .required(),
//! ];
//! let job = CollectionJob::new(rules, JobOptions::new());
//! let report = job.run(targets).await?;
//! report.dataset.write_to_path(&path, ExportFormat::Csv)?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod events;
pub mod export;
pub mod extract;
pub mod fetch;
pub mod job;
pub mod model;
pub mod normalize;
pub mod phone;
pub mod session;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        DedupPolicy, ExportFormat, FetchConfig, JobOptions, RetryConfig, SessionConfig,
    };
    pub use crate::dataset::{Dataset, DatasetBuilder};
    pub use crate::errors::{ConfigurationError, HarvestError, SessionStartError};
    pub use crate::events::{
        ChannelEventSink, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink,
        ProgressEvent, TargetStatus,
    };
    pub use crate::export::timestamped_path;
    pub use crate::extract::Extractor;
    pub use crate::fetch::PageFetcher;
    pub use crate::job::{CollectionJob, JobHandle, JobReport, OutcomeCounts};
    pub use crate::model::{
        ExtractionRule, FieldHint, FieldValue, JobOutcome, JobState, NormalizedRecord,
        OutcomeStatus, PageContent, RawRecord, RenderMode, SelectStrategy, Target,
    };
    pub use crate::normalize::Normalizer;
    pub use crate::session::{BrowserSession, NoBrowserFactory, SessionFactory};

    #[cfg(feature = "browser")]
    pub use crate::session::ChromiumFactory;
}
