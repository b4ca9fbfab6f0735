//! One poll cycle over the audit log

use crate::AuditLog;
use anyhow::Result;
use relay_core::{Cancelled, EventQueue, QueueFull};
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Maximum audit rows read per cycle.
pub const POLL_BATCH_SIZE: usize = 100;

/// What a single [`poll_once`] call did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollReport {
    /// Unprocessed rows read from the audit log
    pub fetched: usize,
    /// Rows whose event was accepted by the queue and marked processed
    pub enqueued: usize,
    /// Rows left unprocessed because the queue was full
    pub deferred: usize,
    /// Rows dropped because they could not be decoded; they are marked
    /// processed with the accepted ones
    pub malformed: usize,
}

/// Read up to [`POLL_BATCH_SIZE`] unprocessed records, push their events
/// into `queue` oldest first, then mark the accepted and the malformed
/// records as processed in one batch.
///
/// Rows that could not be queued stay unprocessed and are picked up again
/// by the next cycle. Malformed rows are dropped so they never hold back
/// newer rows. A failure to mark rows is logged, not returned, so those
/// rows may be delivered twice.
pub async fn poll_once<L>(log: &mut L, queue: &EventQueue) -> Result<PollReport>
where
    L: AuditLog + ?Sized,
{
    let records = log.fetch_unprocessed(POLL_BATCH_SIZE).await?;
    let mut report = PollReport {
        fetched: records.len(),
        ..PollReport::default()
    };
    let mut settled = Vec::with_capacity(records.len());

    for record in &records {
        let event = match record.to_event() {
            Ok(event) => event,
            Err(e) => {
                error!("Dropping malformed audit row {}: {e:#}", record.id);
                report.malformed += 1;
                settled.push(record.id);
                continue;
            }
        };

        match queue.try_push(event) {
            Ok(()) => {
                report.enqueued += 1;
                settled.push(record.id);
            }
            Err(QueueFull(_)) => {
                warn!("Event queue full, audit row {} left for the next poll", record.id);
                report.deferred += 1;
            }
        }
    }

    if !settled.is_empty() {
        if let Err(e) = log.mark_processed(&settled).await {
            error!("Failed to mark audit rows processed: {e:#}");
        }
    }

    if report.fetched > 0 {
        debug!("Poll cycle: {report:?}");
    }
    Ok(report)
}

/// Run [`poll_once`] every `interval`, starting one interval from now,
/// until `cancel` fires. Poll failures are logged and the loop keeps going.
/// A cycle still waiting on the database is abandoned on cancellation.
/// Always ends with [`Cancelled`].
pub async fn poll_until_cancelled<L>(
    log: &mut L,
    queue: &EventQueue,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<()>
where
    L: AuditLog + ?Sized,
{
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Stopping audit log polling");
                return Err(Cancelled.into());
            }
            _ = ticker.tick() => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Stopping audit log polling during a poll cycle");
                return Err(Cancelled.into());
            }
            result = poll_once(&mut *log, queue) => {
                if let Err(e) = result {
                    error!("Polling failed: {e:#}");
                }
            }
        }
    }
}
