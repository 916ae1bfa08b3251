//! leadscore-fetcher: bulk profile retrieval through a scraper job API.
//!
//! Identifiers are split into [`Batch`]es and fetched one job at a time. A
//! failed batch is logged and skipped; the run continues with the next one.

pub mod apify;
pub mod item;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use leadscore_shared::{Batch, Identifier, Record, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub use apify::{ApifyFetcher, ApifyFetcherConfig};
pub use item::{ExternalUrl, ProfileItem};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Per-chunk progress callbacks.
pub trait FetchProgress: Send + Sync {
    fn chunk_started(&self, batch: &Batch, total: usize);
    fn chunk_finished(&self, batch: &Batch, total: usize, records: usize);
    fn chunk_failed(&self, batch: &Batch, total: usize, error: &str);
}

/// No-op fetch progress.
pub struct SilentFetchProgress;

impl FetchProgress for SilentFetchProgress {
    fn chunk_started(&self, _batch: &Batch, _total: usize) {}
    fn chunk_finished(&self, _batch: &Batch, _total: usize, _records: usize) {}
    fn chunk_failed(&self, _batch: &Batch, _total: usize, _error: &str) {}
}

// ---------------------------------------------------------------------------
// FetchReport
// ---------------------------------------------------------------------------

/// Outcome of fetching every chunk of a run.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    /// Records of all successful chunks, in chunk order.
    pub records: Vec<Record>,
    /// Number of chunks the identifiers were split into.
    pub chunks: usize,
    /// `(chunk index, error)` for each skipped chunk.
    pub failed_chunks: Vec<(usize, String)>,
    /// The cancellation token fired before every chunk ran.
    pub interrupted: bool,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// ProfileSource
// ---------------------------------------------------------------------------

/// Something that can turn identifiers into profile records.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    /// Fetch one chunk. Records come back in provider order.
    async fn fetch_chunk(&self, batch: &Batch) -> Result<Vec<Record>>;

    /// Fetch every identifier, `chunk_size` at a time, sequentially.
    ///
    /// Chunk failures are logged and skipped. Once `cancel` fires no new
    /// chunk is started and the in-flight one is abandoned.
    #[instrument(skip_all, fields(identifiers = identifiers.len(), chunk_size = chunk_size))]
    async fn fetch(
        &self,
        identifiers: &[Identifier],
        chunk_size: usize,
        progress: &dyn FetchProgress,
        cancel: &CancellationToken,
    ) -> FetchReport {
        let start = Instant::now();
        let batches = Batch::chunk(identifiers, chunk_size);
        let total = batches.len();
        let mut report = FetchReport {
            chunks: total,
            ..Default::default()
        };

        for batch in &batches {
            if cancel.is_cancelled() {
                report.interrupted = true;
                break;
            }

            progress.chunk_started(batch, total);
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                result = self.fetch_chunk(batch) => Some(result),
            };

            match outcome {
                None => {
                    warn!(chunk = batch.index, "fetch cancelled, abandoning in-flight chunk");
                    report.interrupted = true;
                    break;
                }
                Some(Ok(records)) => {
                    info!(
                        chunk = batch.index + 1,
                        total,
                        requested = batch.len(),
                        fetched = records.len(),
                        "chunk fetched"
                    );
                    progress.chunk_finished(batch, total, records.len());
                    report.records.extend(records);
                }
                Some(Err(e)) => {
                    let error = e.to_string();
                    warn!(
                        chunk = batch.index + 1,
                        total,
                        identifiers = %batch.preview(),
                        error = %error,
                        "chunk failed, skipping"
                    );
                    progress.chunk_failed(batch, total, &error);
                    report.failed_chunks.push((batch.index, error));
                }
            }
        }

        report.elapsed = start.elapsed();
        report
    }
}
