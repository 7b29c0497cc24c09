use async_trait::async_trait;

/// A unit of work run by exactly one worker.
///
/// An `Err` ends the job; the dispatcher never requeues it. Recovery belongs to the job itself
/// (for example by submitting a follow-up) or to whoever observes the persisted failure.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Short, stable name used in logs and per-job statistics.
    fn name(&self) -> &'static str;

    /// Entity key. While a job with this key sits in the queue, further submissions with the
    /// same key are coalesced into it.
    fn key(&self) -> Option<String> {
        None
    }

    async fn run(&self) -> anyhow::Result<()>;
}
