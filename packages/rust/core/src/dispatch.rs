//! Bounded parallel fan-out of the scorer over a set of records.

use std::collections::HashMap;
use std::sync::Arc;

use leadscore_shared::{GradingResult, LeadScoreError, Record};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::scorer::Scorer;

/// Per-task progress callbacks.
pub trait DispatchProgress: Send + Sync {
    /// Called once per finished task, failed ones included.
    fn item_done(&self, completed: usize, total: usize, identifier: &str);
}

/// No-op dispatch progress.
pub struct SilentDispatchProgress;

impl DispatchProgress for SilentDispatchProgress {
    fn item_done(&self, _completed: usize, _total: usize, _identifier: &str) {}
}

/// A record whose scorer task returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub identifier: String,
    pub error: String,
}

/// Everything the dispatcher collected.
#[derive(Debug, Clone, Default)]
pub struct DispatchOutcome {
    /// Results in completion order.
    pub results: Vec<GradingResult>,
    pub failed: Vec<FailedItem>,
    /// The run was cancelled; unfinished tasks were aborted.
    pub interrupted: bool,
}

/// Score every record with at most `workers` tasks in flight.
///
/// A task that fails or panics is logged and left out of the results; its
/// siblings keep running. When `cancel` fires, unfinished tasks are aborted
/// and whatever completed so far is returned.
#[instrument(skip_all, fields(records = records.len(), workers = workers))]
pub async fn dispatch(
    records: Vec<Record>,
    scorer: Arc<dyn Scorer>,
    workers: usize,
    progress: &dyn DispatchProgress,
    cancel: &CancellationToken,
) -> DispatchOutcome {
    let total = records.len();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut identifiers = HashMap::with_capacity(total);

    for record in records {
        let scorer = Arc::clone(&scorer);
        let semaphore = Arc::clone(&semaphore);
        let identifier = record.identifier.to_string();

        let handle = tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| LeadScoreError::Cancelled("worker pool closed".into()))?;
            scorer.score(&record).await
        });
        identifiers.insert(handle.id(), identifier);
    }

    let mut outcome = DispatchOutcome::default();
    let mut completed = 0;

    loop {
        let joined = tokio::select! {
            biased;
            () = cancel.cancelled(), if !outcome.interrupted => {
                warn!(
                    completed,
                    remaining = total - completed,
                    "dispatch cancelled, aborting in-flight tasks"
                );
                tasks.abort_all();
                outcome.interrupted = true;
                continue;
            }
            joined = tasks.join_next_with_id() => joined,
        };
        let Some(joined) = joined else { break };

        let (id, result) = match joined {
            Ok((id, result)) => (id, result.map_err(|e| e.to_string())),
            Err(e) if e.is_cancelled() => {
                identifiers.remove(&e.id());
                continue;
            }
            Err(e) => (e.id(), Err(format!("scorer task panicked: {e}"))),
        };

        completed += 1;
        let identifier = identifiers
            .remove(&id)
            .unwrap_or_else(|| "unknown".to_string());

        match result {
            Ok(result) => outcome.results.push(result),
            Err(message) => {
                error!(%identifier, error = %message, "scoring task failed, dropping item");
                outcome.failed.push(FailedItem {
                    identifier: identifier.clone(),
                    error: message,
                });
            }
        }
        progress.item_done(completed, total, &identifier);
    }

    info!(
        total,
        scored = outcome.results.len(),
        failed = outcome.failed.len(),
        interrupted = outcome.interrupted,
        "dispatch finished"
    );
    outcome
}
