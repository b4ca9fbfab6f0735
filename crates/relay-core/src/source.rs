use crate::EventQueue;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// An engine-specific change capture strategy.
///
/// Implementations install their database-side objects (triggers, audit
/// table, notification function) while being constructed, so a value of
/// this trait always refers to an instrumented table. The strategy is
/// chosen once at startup and never swapped.
#[async_trait]
pub trait CaptureSource: Send {
    /// Source database type identifier, e.g. `"postgres"`.
    fn source_type(&self) -> &'static str;

    /// Acquire whatever the capture loop needs before workers start, such
    /// as a notification session. The default does nothing.
    async fn prepare(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Run the capture loop, pushing events into `queue` without ever
    /// blocking on it, until `cancel` fires or an unrecoverable error
    /// occurs. A graceful stop returns [`Cancelled`](crate::Cancelled).
    async fn capture(&mut self, queue: &EventQueue, cancel: &CancellationToken)
        -> anyhow::Result<()>;

    /// Release database connections and sessions. Must be idempotent.
    async fn close(&mut self) -> anyhow::Result<()>;
}
