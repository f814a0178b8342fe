//! Collection job orchestration.
//!
//! [`CollectionJob`] drains a target queue with a bounded worker pool.
//! Workers fetch, extract, and normalize independently; results flow over
//! a channel to a single aggregator that owns the dataset, so insertion
//! order is completion order and no lock guards the records. A job ends
//! `Completed`, `Cancelled`, or `Failed`, always with one outcome per
//! submitted target.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::cancellation::CancellationToken;
use crate::config::{ExportFormat, JobOptions};
use crate::dataset::{Dataset, DatasetBuilder};
use crate::errors::{ConfigurationError, HarvestError, SessionStartError};
use crate::events::{EventSink, NoOpEventSink, ProgressEvent, TargetStatus};
use crate::extract::Extractor;
use crate::fetch::PageFetcher;
use crate::model::{
    ExtractionRule, JobOutcome, JobState, NormalizedRecord, OutcomeStatus, RenderMode, Target,
};
use crate::normalize::Normalizer;
use crate::phone::is_known_region;
use crate::session::{BrowserSession, NoBrowserFactory, SessionFactory};

/// Remote control for a running job.
///
/// Cheap to clone; usable from any task or thread.
#[derive(Clone)]
pub struct JobHandle {
    token: Arc<CancellationToken>,
    state: Arc<parking_lot::RwLock<JobState>>,
}

impl JobHandle {
    /// Requests cooperative cancellation with a reason.
    ///
    /// Idempotent; the first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.token.cancel(reason);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Current lifecycle state of the job.
    #[must_use]
    pub fn state(&self) -> JobState {
        *self.state.read()
    }
}

/// Outcome totals for a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts {
    /// Targets that produced a dataset record.
    pub succeeded: usize,
    /// Targets skipped (validation, cancellation).
    pub skipped: usize,
    /// Targets that failed after retries.
    pub failed: usize,
}

impl OutcomeCounts {
    /// Tallies a slice of outcomes.
    #[must_use]
    pub fn tally(outcomes: &[JobOutcome]) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            match outcome.status {
                OutcomeStatus::Success => counts.succeeded += 1,
                OutcomeStatus::Skipped { .. } => counts.skipped += 1,
                OutcomeStatus::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }
}

/// Everything a finished job produced.
#[derive(Debug)]
pub struct JobReport {
    /// Terminal state the job ended in.
    pub state: JobState,
    /// One outcome per submitted target, in completion order.
    pub outcomes: Vec<JobOutcome>,
    /// The deduplicated dataset, partial if the job ended early.
    pub dataset: Dataset,
    /// Outcome totals.
    pub counts: OutcomeCounts,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// The infrastructure error that failed the job, if any.
    pub error: Option<String>,
    /// Export format the job was configured with.
    pub export_format: ExportFormat,
}

impl JobReport {
    /// Writes the dataset to `path` in the configured export format.
    ///
    /// Available in every terminal state; a cancelled or failed job
    /// exports its partial dataset.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError`] on serialization or filesystem failure.
    pub fn write_dataset(&self, path: &std::path::Path) -> Result<(), HarvestError> {
        self.dataset.write_to_path(path, self.export_format)
    }

    /// One human-readable line per outcome.
    #[must_use]
    pub fn outcome_lines(&self) -> Vec<String> {
        self.outcomes.iter().map(JobOutcome::line).collect()
    }

    /// One-line summary of the whole run.
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "{}: {} succeeded, {} skipped, {} failed, {} record(s) in {}ms",
            self.state,
            self.counts.succeeded,
            self.counts.skipped,
            self.counts.failed,
            self.dataset.len(),
            self.duration_ms
        )
    }
}

enum WorkerMessage {
    Outcome {
        outcome: JobOutcome,
        url: String,
        record: Option<NormalizedRecord>,
    },
    SessionLost {
        worker: usize,
        error: String,
    },
}

struct WorkerContext {
    queue: Arc<parking_lot::Mutex<VecDeque<Target>>>,
    fetcher: PageFetcher,
    extractor: Extractor,
    normalizer: Normalizer,
    factory: Arc<dyn SessionFactory>,
    options: JobOptions,
    token: Arc<CancellationToken>,
    sink: Arc<dyn EventSink>,
    processed: Arc<AtomicUsize>,
    total: usize,
    tx: UnboundedSender<WorkerMessage>,
}

impl WorkerContext {
    async fn open_session(&self) -> Result<Box<dyn BrowserSession>, SessionStartError> {
        let attempts = self.options.session_restart_limit.max(1);
        let mut last = SessionStartError::new("no session open attempt was made");
        for attempt in 1..=attempts {
            match self.factory.open(&self.options.session).await {
                Ok(session) => return Ok(session),
                Err(error) => {
                    warn!(attempt, %error, "browser session start failed");
                    last = error;
                }
            }
        }
        Err(last)
    }

    async fn process_target(
        &self,
        target: &Target,
        session: &mut Option<Box<dyn BrowserSession>>,
    ) -> (JobOutcome, Option<NormalizedRecord>) {
        let page = match self.fetcher.fetch(target, session, &self.token).await {
            Ok(page) => page,
            Err(failure) => {
                return match failure.error {
                    HarvestError::Cancelled(reason) => {
                        (JobOutcome::skipped(&target.id, reason), None)
                    }
                    error => (
                        JobOutcome::failed(&target.id, error.to_string(), failure.attempts),
                        None,
                    ),
                };
            }
        };

        let raw = match self.extractor.extract(&target.id, &page) {
            Ok(raw) => raw,
            Err(error) => return (JobOutcome::failed(&target.id, error.to_string(), 1), None),
        };

        let record = self.normalizer.normalize(&raw);
        match self.normalizer.skip_reason(&record) {
            Some(reason) => (JobOutcome::skipped(&target.id, reason), None),
            None => (JobOutcome::success(&target.id), Some(record)),
        }
    }
}

/// A configured, runnable collection job.
///
/// Construct with rules and options, optionally attach a session factory
/// and event sink, grab a [`JobHandle`], then consume it with
/// [`run`](CollectionJob::run).
pub struct CollectionJob {
    rules: Vec<ExtractionRule>,
    options: JobOptions,
    factory: Arc<dyn SessionFactory>,
    sink: Arc<dyn EventSink>,
    token: Arc<CancellationToken>,
    state: Arc<parking_lot::RwLock<JobState>>,
}

impl CollectionJob {
    /// Creates a job with the given rules and options.
    ///
    /// Without [`with_factory`](Self::with_factory), browser-mode targets
    /// fail to open a session.
    #[must_use]
    pub fn new(rules: Vec<ExtractionRule>, options: JobOptions) -> Self {
        Self {
            rules,
            options,
            factory: Arc::new(NoBrowserFactory),
            sink: Arc::new(NoOpEventSink),
            token: Arc::new(CancellationToken::new()),
            state: Arc::new(parking_lot::RwLock::new(JobState::Idle)),
        }
    }

    /// Sets the browser session factory.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn SessionFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Sets the event sink observing this job.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns a handle for cancelling and observing the job.
    #[must_use]
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            token: Arc::clone(&self.token),
            state: Arc::clone(&self.state),
        }
    }

    /// Validates rules and options without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for empty rules, a worker count
    /// outside `1..=4`, an unresolvable dedup key, an unknown default
    /// region, or a rule that fails to compile.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.checked_extractor().map(|_| ())
    }

    /// Runs every validation check and returns the compiled extractor.
    fn checked_extractor(&self) -> Result<Extractor, ConfigurationError> {
        if self.rules.is_empty() {
            return Err(ConfigurationError::new("at least one extraction rule is required")
                .with_field("rules"));
        }
        if !(1..=4).contains(&self.options.worker_count) {
            return Err(ConfigurationError::new(format!(
                "worker_count must be between 1 and 4, got {}",
                self.options.worker_count
            ))
            .with_field("worker_count"));
        }
        if !DatasetBuilder::key_resolvable(&self.rules, &self.options.dedup_key) {
            return Err(ConfigurationError::new(format!(
                "dedup key {:?} is neither \"url\" nor a declared rule field",
                self.options.dedup_key
            ))
            .with_field("dedup_key"));
        }
        if !is_known_region(&self.options.default_region) {
            return Err(ConfigurationError::new(format!(
                "unknown default region {:?}",
                self.options.default_region
            ))
            .with_field("default_region"));
        }
        Extractor::compile(&self.rules)
    }

    /// Runs the job to completion over `targets`.
    ///
    /// Consumes the job; a job runs at most once. Returns a report with
    /// exactly one outcome per target regardless of how the job ended.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] if validation or fetcher setup fails
    /// before any target is processed.
    pub async fn run(self, targets: Vec<Target>) -> Result<JobReport, ConfigurationError> {
        let extractor = self.checked_extractor()?;
        let started = Instant::now();

        let fetcher = PageFetcher::new(self.options.fetch.clone(), Arc::clone(&self.sink))?;
        let normalizer =
            Normalizer::new(self.rules.clone(), self.options.default_region.clone());

        let total = targets.len();
        let worker_count = self.options.worker_count.min(total.max(1));
        let queue = Arc::new(parking_lot::Mutex::new(
            targets.into_iter().collect::<VecDeque<_>>(),
        ));
        let processed = Arc::new(AtomicUsize::new(0));
        let (tx, mut rx) = mpsc::unbounded_channel();

        *self.state.write() = JobState::Running;
        self.sink
            .emit(
                "job.started",
                Some(serde_json::json!({
                    "total": total,
                    "workers": worker_count,
                    "started_at": crate::utils::iso_timestamp(),
                })),
            )
            .await;
        info!(total, workers = worker_count, "collection job started");

        let ctx = Arc::new(WorkerContext {
            queue: Arc::clone(&queue),
            fetcher,
            extractor,
            normalizer,
            factory: Arc::clone(&self.factory),
            options: self.options.clone(),
            token: Arc::clone(&self.token),
            sink: Arc::clone(&self.sink),
            processed: Arc::clone(&processed),
            total,
            tx,
        });

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let ctx = Arc::clone(&ctx);
            workers.spawn(run_worker(ctx, worker));
        }
        // All senders live in worker tasks; the channel closes when they
        // finish.
        drop(ctx);

        let mut builder = DatasetBuilder::new(
            &self.rules,
            &self.options.dedup_key,
            self.options.dedup_policy,
        );
        let mut outcomes: Vec<JobOutcome> = Vec::with_capacity(total);
        let mut infra_error: Option<String> = None;

        while let Some(message) = rx.recv().await {
            match message {
                WorkerMessage::Outcome {
                    outcome,
                    url,
                    record,
                } => {
                    let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(record) = record {
                        builder.add(record);
                    }
                    let (status, message) = match &outcome.status {
                        OutcomeStatus::Success => (TargetStatus::Succeeded, url),
                        OutcomeStatus::Skipped { reason } => {
                            (TargetStatus::Skipped, reason.clone())
                        }
                        OutcomeStatus::Failed { error, .. } => {
                            (TargetStatus::Failed, error.clone())
                        }
                    };
                    self.sink
                        .emit_progress(&ProgressEvent::new(
                            &outcome.target_id,
                            status,
                            message,
                            done,
                            total,
                        ))
                        .await;
                    outcomes.push(outcome);
                }
                WorkerMessage::SessionLost { worker, error } => {
                    warn!(worker, %error, "worker lost its browser session");
                    if infra_error.is_none() {
                        infra_error = Some(error);
                    }
                }
            }
        }
        while workers.join_next().await.is_some() {}

        // Targets never picked up still get an outcome.
        let leftovers: Vec<Target> = queue.lock().drain(..).collect();
        for target in leftovers {
            let reason = self.token.reason_or_default();
            let done = processed.fetch_add(1, Ordering::SeqCst) + 1;
            self.sink
                .emit_progress(&ProgressEvent::new(
                    &target.id,
                    TargetStatus::Skipped,
                    reason.clone(),
                    done,
                    total,
                ))
                .await;
            outcomes.push(JobOutcome::skipped(target.id, reason));
        }

        let state = if infra_error.is_some() {
            JobState::Failed
        } else if self.token.is_cancelled() {
            JobState::Cancelled
        } else {
            JobState::Completed
        };
        *self.state.write() = state;

        let counts = OutcomeCounts::tally(&outcomes);
        let dataset = builder.finish();
        let duration_ms =
            u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        self.sink
            .emit(
                "job.finished",
                Some(serde_json::json!({
                    "state": state.to_string(),
                    "succeeded": counts.succeeded,
                    "skipped": counts.skipped,
                    "failed": counts.failed,
                    "records": dataset.len(),
                    "duration_ms": duration_ms,
                    "finished_at": crate::utils::iso_timestamp(),
                })),
            )
            .await;
        info!(%state, succeeded = counts.succeeded, skipped = counts.skipped,
            failed = counts.failed, "collection job finished");

        Ok(JobReport {
            state,
            outcomes,
            dataset,
            counts,
            duration_ms,
            error: infra_error,
            export_format: self.options.export_format,
        })
    }
}

async fn run_worker(ctx: Arc<WorkerContext>, worker: usize) {
    let mut session: Option<Box<dyn BrowserSession>> = None;
    worker_loop(&ctx, worker, &mut session).await;
    if let Some(mut session) = session.take() {
        session.close().await;
    }
}

async fn worker_loop(
    ctx: &WorkerContext,
    worker: usize,
    session: &mut Option<Box<dyn BrowserSession>>,
) {
    loop {
        if ctx.token.is_cancelled() {
            return;
        }
        let Some(target) = ctx.queue.lock().pop_front() else {
            return;
        };

        ctx.sink
            .emit_progress(&ProgressEvent::new(
                &target.id,
                TargetStatus::Started,
                &target.url,
                ctx.processed.load(Ordering::SeqCst),
                ctx.total,
            ))
            .await;

        // Sessions open lazily; static-only workers never touch the factory.
        if target.mode == RenderMode::Browser && session.is_none() {
            match ctx.open_session().await {
                Ok(opened) => *session = Some(opened),
                Err(error) => {
                    let _ = ctx.tx.send(WorkerMessage::Outcome {
                        outcome: JobOutcome::failed(&target.id, error.to_string(), 0),
                        url: target.url.clone(),
                        record: None,
                    });
                    let _ = ctx.tx.send(WorkerMessage::SessionLost {
                        worker,
                        error: error.to_string(),
                    });
                    ctx.token
                        .cancel(format!("browser session could not be started: {error}"));
                    return;
                }
            }
        }

        let (outcome, record) = ctx.process_target(&target, session).await;
        let _ = ctx.tx.send(WorkerMessage::Outcome {
            outcome,
            url: target.url,
            record,
        });
    }
}
