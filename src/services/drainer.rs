//! Periodic batch puller feeding due deliveries to the worker.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinSet;

use crate::services::delivery_worker::{AttemptOutcome, DeliveryWorker};
use crate::store::DeliveryStore;

/// Counts from one drain cycle, for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    /// Deliveries this cycle actually attempted.
    pub processed: usize,
    /// Attempts that ended in `delivered`.
    pub succeeded: usize,
    /// Attempts that ended in `retrying` or `failed`.
    pub failed: usize,
}

/// Pulls due deliveries in batches and runs them through the worker.
///
/// The schedule itself is external (a cron-like trigger calls
/// [`QueueDrainer::drain_once`]); this type only owns one cycle.
#[derive(Clone)]
pub struct QueueDrainer {
    store: Arc<dyn DeliveryStore>,
    worker: DeliveryWorker,
    batch_size: usize,
    concurrency: usize,
}

impl QueueDrainer {
    #[must_use]
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        worker: DeliveryWorker,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            worker,
            batch_size,
            concurrency: concurrency.max(1),
        }
    }

    /// Run one drain cycle.
    ///
    /// Selects up to `batch_size` due rows oldest-first and attempts them
    /// with bounded parallelism. A cycle that finds nothing due is a no-op.
    /// Rows another drain claimed between selection and claim are skipped
    /// and not counted as processed.
    pub async fn drain_once(&self) -> DrainStats {
        let due = match self.store.due_deliveries(Utc::now(), self.batch_size).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!(
                    target: "webhook_delivery",
                    error = %e,
                    "Failed to select due deliveries"
                );
                return DrainStats::default();
            }
        };

        if due.is_empty() {
            tracing::debug!(target: "webhook_delivery", "No deliveries due");
            return DrainStats::default();
        }

        let mut stats = DrainStats::default();
        let mut tasks: JoinSet<Option<AttemptOutcome>> = JoinSet::new();
        let mut pending = due.into_iter();

        loop {
            // Keep up to `concurrency` attempts in flight; spawn order
            // follows the oldest-first selection.
            while tasks.len() < self.concurrency {
                let Some(delivery_id) = pending.next() else {
                    break;
                };
                let worker = self.worker.clone();
                tasks.spawn(async move {
                    match worker.deliver(delivery_id).await {
                        Ok(outcome) => Some(outcome),
                        Err(e) => {
                            tracing::error!(
                                target: "webhook_delivery",
                                delivery_id = %delivery_id,
                                error = %e,
                                "Delivery attempt errored"
                            );
                            None
                        }
                    }
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok(Some(AttemptOutcome::Delivered)) => {
                    stats.processed += 1;
                    stats.succeeded += 1;
                }
                Ok(Some(AttemptOutcome::Retrying | AttemptOutcome::Failed)) => {
                    stats.processed += 1;
                    stats.failed += 1;
                }
                Ok(Some(AttemptOutcome::Skipped)) => {}
                Ok(None) => {
                    stats.processed += 1;
                    stats.failed += 1;
                }
                Err(e) => {
                    tracing::error!(
                        target: "webhook_delivery",
                        error = %e,
                        "Delivery task panicked"
                    );
                    stats.processed += 1;
                    stats.failed += 1;
                }
            }
        }

        tracing::info!(
            target: "webhook_delivery",
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Drain cycle complete"
        );

        stats
    }
}
