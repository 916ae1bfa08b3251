//! Pipeline orchestrator for the `score` command.
//!
//! Ties together: input → fetcher → scorer → dispatcher → sink.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use leadscore_fetcher::{FetchProgress, ProfileSource};
use leadscore_shared::{AppConfig, Batch, GradingResult, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::dispatch::{self, DispatchProgress};
use crate::input;
use crate::scorer::Scorer;
use crate::sink;

/// Configuration for one scoring run.
#[derive(Debug, Clone)]
pub struct ScoreConfig {
    /// CSV file holding the identifiers.
    pub input: PathBuf,
    /// Where to write the kept results. `None` only returns them.
    pub output: Option<PathBuf>,
    /// Identifier column in the input.
    pub column: String,
    /// Development cap on the number of identifiers.
    pub max_identifiers: Option<usize>,
    pub min_score: u8,
    pub workers: usize,
    pub chunk_size: usize,
}

impl ScoreConfig {
    /// Defaults from the application config for the given input file.
    pub fn from_app(config: &AppConfig, input: PathBuf) -> Self {
        Self {
            input,
            output: None,
            column: config.scoring.identifier_column.clone(),
            max_identifiers: None,
            min_score: config.scoring.min_score,
            workers: config.scoring.workers,
            chunk_size: config.apify.chunk_size,
        }
    }
}

/// Result of a scoring run.
#[derive(Debug, Clone)]
pub struct ScoreRun {
    /// Unique identifiers read from the input.
    pub identifiers: usize,
    /// Chunks the fetcher ran, and how many of them failed.
    pub chunks: usize,
    pub failed_chunks: usize,
    /// Records fetched, before the empty-record filter.
    pub records: usize,
    /// Records dropped for having no free text.
    pub empty_records: usize,
    pub scored: usize,
    pub failed: usize,
    /// Results that reached the minimum score, in completion order.
    pub kept: Vec<GradingResult>,
    pub output: Option<PathBuf>,
    /// Ctrl-C arrived before every record was scored.
    pub interrupted: bool,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each fetch chunk, successful or not.
    fn chunk_done(&self, current: usize, total: usize, records: Option<usize>);
    /// Called after each scored record, failed ones included.
    fn item_scored(&self, current: usize, total: usize, identifier: &str);
    /// Called when the pipeline completes.
    fn done(&self, run: &ScoreRun);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn chunk_done(&self, _current: usize, _total: usize, _records: Option<usize>) {}
    fn item_scored(&self, _current: usize, _total: usize, _identifier: &str) {}
    fn done(&self, _run: &ScoreRun) {}
}

/// Run the full `score` pipeline.
///
/// 1. Load and normalize identifiers
/// 2. Fetch profile records chunk by chunk
/// 3. Drop records without free text
/// 4. Grade every record in parallel
/// 5. Filter by score and write the output
///
/// Only input validation fails the run. Cancellation stops fetching and
/// scoring early; whatever was scored is still filtered and written.
#[instrument(skip_all, fields(input = %config.input.display()))]
pub async fn score_leads(
    config: &ScoreConfig,
    source: &dyn ProfileSource,
    scorer: Arc<dyn Scorer>,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<ScoreRun> {
    let start = Instant::now();

    // --- Phase 1: Input ---
    progress.phase("Reading identifiers");
    let identifiers = input::load_identifiers(&config.input, &config.column, config.max_identifiers)?;
    info!(count = identifiers.len(), "processing identifiers");

    // --- Phase 2: Fetch ---
    progress.phase("Fetching profiles");
    let fetch_progress = PipelineFetchProgress { inner: progress };
    let report = source
        .fetch(&identifiers, config.chunk_size, &fetch_progress, cancel)
        .await;

    // --- Phase 3: Drop records without text ---
    let fetched = report.records.len();
    let records: Vec<_> = report
        .records
        .into_iter()
        .filter(|r| {
            let keep = r.has_free_text();
            if !keep {
                info!(identifier = %r.identifier, "no free text, skipping");
            }
            keep
        })
        .collect();
    let empty_records = fetched - records.len();

    // --- Phase 4: Score ---
    progress.phase("Scoring profiles");
    let dispatch_progress = PipelineDispatchProgress { inner: progress };
    let outcome = if report.interrupted {
        dispatch::DispatchOutcome {
            interrupted: true,
            ..Default::default()
        }
    } else {
        dispatch::dispatch(records, scorer, config.workers, &dispatch_progress, cancel).await
    };

    // --- Phase 5: Filter and write ---
    progress.phase("Writing results");
    let scored = outcome.results.len();
    let kept = sink::filter_and_write(outcome.results, config.min_score, config.output.as_deref())?;

    let run = ScoreRun {
        identifiers: identifiers.len(),
        chunks: report.chunks,
        failed_chunks: report.failed_chunks.len(),
        records: fetched,
        empty_records,
        scored,
        failed: outcome.failed.len(),
        kept,
        output: config.output.clone(),
        interrupted: outcome.interrupted,
        elapsed: start.elapsed(),
    };

    if run.interrupted {
        warn!(scored = run.scored, "run interrupted, partial results kept");
    }
    info!(
        identifiers = run.identifiers,
        records = run.records,
        scored = run.scored,
        failed = run.failed,
        kept = run.kept.len(),
        elapsed_ms = run.elapsed.as_millis() as u64,
        "scoring run complete"
    );

    progress.done(&run);
    Ok(run)
}

/// Adapts a `ProgressReporter` to the `FetchProgress` interface.
struct PipelineFetchProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl FetchProgress for PipelineFetchProgress<'_> {
    fn chunk_started(&self, _batch: &Batch, _total: usize) {}

    fn chunk_finished(&self, batch: &Batch, total: usize, records: usize) {
        self.inner.chunk_done(batch.index + 1, total, Some(records));
    }

    fn chunk_failed(&self, batch: &Batch, total: usize, _error: &str) {
        self.inner.chunk_done(batch.index + 1, total, None);
    }
}

/// Adapts a `ProgressReporter` to the `DispatchProgress` interface.
struct PipelineDispatchProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl DispatchProgress for PipelineDispatchProgress<'_> {
    fn item_done(&self, completed: usize, total: usize, identifier: &str) {
        self.inner.item_scored(completed, total, identifier);
    }
}
