//! Concurrent fetch/validate over date windows, folded by a single consumer
//! into the aggregation store.

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::{collections::BTreeMap, convert::TryFrom, fmt, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    CanonicalRecord, Config,
    error::{ExportError, FetchError},
    source::{EmptyReason, FetchOutcome, QuakeSource},
    store::{AggregationStore, PartitionKey, ResumePoint, WriteMode},
    validate::{RecordValidator, Rejections, ValidationReport},
    window::{DateWindow, windows_between, windows_from_year},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ExportMode {
    /// Resume after the latest persisted record and append.
    #[default]
    Incremental,
    /// Fetch everything from the start year and rewrite every partition.
    Full,
}

impl ExportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportMode::Incremental => "incremental",
            ExportMode::Full => "full",
        }
    }

    pub const fn all() -> &'static [ExportMode] {
        &[ExportMode::Incremental, ExportMode::Full]
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ExportMode {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "incremental" => Ok(ExportMode::Incremental),
            "full" => Ok(ExportMode::Full),
            _ => Err(anyhow::anyhow!(
                "Unknown export mode '{value}'. Supported modes: incremental, full."
            )),
        }
    }
}

/// The windows a run will fetch and why.
#[derive(Debug, Clone)]
pub struct ExportPlan {
    pub mode: ExportMode,
    /// Exclusive.
    pub cutoff: NaiveDate,
    /// Only consulted in incremental mode.
    pub resume: Option<ResumePoint>,
    /// `Append` only when resuming after readable persisted records; every
    /// run that starts over from the start year rebuilds the partitions.
    pub write_mode: WriteMode,
    pub windows: Vec<DateWindow>,
}

impl ExportPlan {
    pub fn build(
        mode: ExportMode,
        store: &AggregationStore,
        start_year: i32,
        cutoff: NaiveDate,
    ) -> Self {
        match mode {
            ExportMode::Full => Self {
                mode,
                cutoff,
                resume: None,
                write_mode: WriteMode::Rewrite,
                windows: windows_from_year(start_year, cutoff),
            },
            ExportMode::Incremental => {
                let resume = store.resume_point();
                match &resume {
                    ResumePoint::Fresh => {
                        info!(start_year, "no combined dataset yet, starting from the beginning")
                    }
                    ResumePoint::Resume { last_record } => {
                        info!(%last_record, "resuming after latest persisted record")
                    }
                    ResumePoint::Recovered { reason } => warn!(
                        start_year,
                        %reason,
                        "combined dataset unreadable, rebuilding every partition from the start year"
                    ),
                }

                let write_mode = match resume {
                    ResumePoint::Resume { .. } => WriteMode::Append,
                    ResumePoint::Fresh | ResumePoint::Recovered { .. } => WriteMode::Rewrite,
                };

                let windows = resume
                    .last_known_date(start_year)
                    .map(|last_known| windows_between(last_known, cutoff))
                    .unwrap_or_default();

                Self {
                    mode,
                    cutoff,
                    resume: Some(resume),
                    write_mode,
                    windows,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, at least 1.
    pub max_attempts: u32,
    /// Multiplied by the attempt number before each retry.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExportOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            workers: config.export.workers.max(1),
            retry: RetryPolicy {
                max_attempts: config.source.max_attempts.max(1),
                backoff: config.source.retry_backoff(),
            },
        }
    }
}

#[derive(Debug)]
pub enum WindowStatus {
    Fetched,
    Empty(EmptyReason),
    Failed(FetchError),
}

impl WindowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            WindowStatus::Fetched => "ok",
            WindowStatus::Empty(reason) => reason.as_str(),
            WindowStatus::Failed(_) => "failed",
        }
    }
}

/// What one worker produced for one window.
#[derive(Debug)]
pub struct WindowReport {
    pub window: DateWindow,
    pub status: WindowStatus,
    pub attempts: u32,
    pub fetched: usize,
    pub validation: ValidationReport,
}

impl WindowReport {
    fn aborted(window: DateWindow, reason: String) -> Self {
        Self {
            window,
            status: WindowStatus::Failed(FetchError::Aborted(reason)),
            attempts: 0,
            fetched: 0,
            validation: ValidationReport::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedWindow {
    pub window: DateWindow,
    pub cause: String,
}

#[derive(Debug, Clone, Default)]
pub struct ExportSummary {
    pub windows_planned: usize,
    pub windows_completed: usize,
    pub empty_windows: usize,
    pub failed_windows: Vec<FailedWindow>,
    pub records_fetched: usize,
    pub records_valid: usize,
    pub rejections: Rejections,
    pub monthly_written: usize,
    /// Windows without new records whose existing monthly partition was kept
    /// and folded into the rebuilt yearly and combined partitions.
    pub carried_windows: Vec<DateWindow>,
    pub years_written: Vec<i32>,
    pub combined_written: usize,
}

impl ExportSummary {
    fn absorb(&mut self, report: &WindowReport) {
        self.windows_completed += 1;
        self.records_fetched += report.fetched;
        self.records_valid += report.validation.records.len();

        let r = &report.validation.rejections;
        self.rejections.bad_timestamp += r.bad_timestamp;
        self.rejections.non_numeric += r.non_numeric;
        self.rejections.out_of_time_range += r.out_of_time_range;
        self.rejections.out_of_bounds += r.out_of_bounds;
        self.rejections.duplicate += r.duplicate;

        match &report.status {
            WindowStatus::Fetched => {}
            WindowStatus::Empty(_) => self.empty_windows += 1,
            WindowStatus::Failed(err) => self.failed_windows.push(FailedWindow {
                window: report.window,
                cause: err.to_string(),
            }),
        }
    }
}

/// Validated records of the run, keyed by window so yearly and combined
/// output is chronological whatever order workers finished in.
#[derive(Debug, Default)]
struct RunBuffers {
    by_window: BTreeMap<DateWindow, Vec<CanonicalRecord>>,
}

impl RunBuffers {
    fn absorb(&mut self, window: DateWindow, records: Vec<CanonicalRecord>) {
        if !records.is_empty() {
            self.by_window.entry(window).or_default().extend(records);
        }
    }

    fn into_yearly(self) -> BTreeMap<i32, Vec<CanonicalRecord>> {
        let mut yearly: BTreeMap<i32, Vec<CanonicalRecord>> = BTreeMap::new();
        for (window, records) in self.by_window {
            yearly.entry(window.year()).or_default().extend(records);
        }
        yearly
    }
}

/// Fetches windows concurrently and persists their records at every level.
#[derive(Debug, Clone)]
pub struct Exporter {
    source: Arc<dyn QuakeSource>,
    validator: Arc<RecordValidator>,
    store: AggregationStore,
    options: ExportOptions,
}

impl Exporter {
    pub fn new(
        source: Arc<dyn QuakeSource>,
        validator: RecordValidator,
        store: AggregationStore,
        options: ExportOptions,
    ) -> Self {
        Self {
            source,
            validator: Arc::new(validator),
            store,
            options,
        }
    }

    /// Exporter for a run ending at `cutoff`, writing under `config.export.dir`.
    pub fn from_config(
        config: &Config,
        source: Arc<dyn QuakeSource>,
        cutoff: NaiveDate,
    ) -> Result<Self, ExportError> {
        let validator = RecordValidator::from_config(config, cutoff).ok_or_else(|| {
            ExportError::Configuration(format!(
                "cannot build time range from start year {} to {cutoff} with offset {} minutes",
                config.export.start_year, config.local_time.offset_minutes
            ))
        })?;

        Ok(Self::new(
            source,
            validator,
            AggregationStore::new(&config.export.dir),
            ExportOptions::from_config(config),
        ))
    }

    pub fn store(&self) -> &AggregationStore {
        &self.store
    }

    /// Existing monthly content of `window`, read back for a rebuild. An
    /// unreadable partition is logged and contributes nothing.
    fn carried_records(&self, window: DateWindow) -> Vec<CanonicalRecord> {
        let key = PartitionKey::Month(window);
        match self
            .store
            .read_partition(&key)
            .or_else(|_| self.store.read_json_partition(&key))
        {
            Ok(records) => records,
            Err(err) => {
                warn!(window = %window, error = %err, "existing monthly partition unreadable, not carried");
                Vec::new()
            }
        }
    }

    /// Run every window in `plan` once. Window failures are recorded in the
    /// summary; only persistence failures end the run early.
    pub async fn run(&self, plan: &ExportPlan) -> Result<ExportSummary, ExportError> {
        let total = plan.windows.len();
        let write_mode = plan.write_mode;
        let mut summary = ExportSummary {
            windows_planned: total,
            ..ExportSummary::default()
        };

        if total == 0 {
            info!(mode = %plan.mode, cutoff = %plan.cutoff, "dataset is up to date, nothing to fetch");
            return Ok(summary);
        }

        self.store.ensure_layout()?;
        info!(
            mode = %plan.mode,
            write_mode = ?write_mode,
            windows = total,
            workers = self.options.workers,
            first = %plan.windows[0],
            last = %plan.windows[total - 1],
            "fetching and validating windows"
        );

        let retry = self.options.retry;
        let mut results = stream::iter(plan.windows.iter().copied())
            .map(|window| {
                let source = Arc::clone(&self.source);
                let validator = Arc::clone(&self.validator);
                let handle = tokio::spawn(async move {
                    process_window(source.as_ref(), &validator, window, retry).await
                });
                async move { (window, handle.await) }
            })
            .buffer_unordered(self.options.workers.max(1));

        let mut buffers = RunBuffers::default();

        while let Some((window, joined)) = results.next().await {
            let report = joined.unwrap_or_else(|err| {
                warn!(window = %window, error = %err, "window task did not complete");
                WindowReport::aborted(window, err.to_string())
            });
            summary.absorb(&report);

            let valid = report.validation.records.len();
            info!(
                fetched = report.fetched,
                valid,
                attempts = report.attempts,
                status = report.status.label(),
                "[{}/{total}] {window}",
                summary.windows_completed
            );

            let records = report.validation.records;
            if self
                .store
                .write(write_mode, &PartitionKey::Month(window), &records)?
            {
                summary.monthly_written += 1;
            }

            // A rebuild leaves an unfetched month's partition in place, so its
            // records must stay in the year and combined partitions too.
            if records.is_empty() && write_mode == WriteMode::Rewrite {
                let kept = self.carried_records(window);
                if !kept.is_empty() {
                    info!(window = %window, records = kept.len(), "keeping existing monthly partition");
                    summary.carried_windows.push(window);
                    buffers.absorb(window, kept);
                }
            } else {
                buffers.absorb(window, records);
            }
        }

        let mut combined = Vec::new();
        for (year, records) in buffers.into_yearly() {
            info!(year, records = records.len(), "saving yearly partition");
            self.store.write(write_mode, &PartitionKey::Year(year), &records)?;
            summary.years_written.push(year);
            combined.extend(records);
        }

        info!(records = combined.len(), "saving combined partition");
        self.store.write(write_mode, &PartitionKey::Combined, &combined)?;
        summary.combined_written = combined.len();

        for failed in &summary.failed_windows {
            warn!(
                window = %failed.window,
                cause = %failed.cause,
                "window failed and was recorded with no records"
            );
        }
        info!(
            windows = summary.windows_completed,
            empty = summary.empty_windows,
            failed = summary.failed_windows.len(),
            carried = summary.carried_windows.len(),
            fetched = summary.records_fetched,
            valid = summary.records_valid,
            rejected = summary.rejections.total(),
            "export finished"
        );

        Ok(summary)
    }
}

async fn process_window(
    source: &dyn QuakeSource,
    validator: &RecordValidator,
    window: DateWindow,
    retry: RetryPolicy,
) -> WindowReport {
    let (outcome, attempts) = fetch_with_retry(source, window, retry).await;

    let (status, raw) = match outcome {
        FetchOutcome::Records(raw) => (WindowStatus::Fetched, raw),
        FetchOutcome::Empty(reason) => (WindowStatus::Empty(reason), Vec::new()),
        FetchOutcome::Failed(err) => (WindowStatus::Failed(err), Vec::new()),
    };

    WindowReport {
        window,
        status,
        attempts,
        fetched: raw.len(),
        validation: validator.validate(&raw),
    }
}

async fn fetch_with_retry(
    source: &dyn QuakeSource,
    window: DateWindow,
    retry: RetryPolicy,
) -> (FetchOutcome, u32) {
    let mut attempt = 1;
    loop {
        let outcome = source.fetch(&window).await;
        if !outcome.is_failed() || attempt >= retry.max_attempts {
            return (outcome, attempt);
        }
        debug!(window = %window, attempt, "retrying failed window");
        tokio::time::sleep(retry.backoff * attempt).await;
        attempt += 1;
    }
}
