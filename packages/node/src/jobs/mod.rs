//! One job type per lifecycle transition. Jobs are submitted to the shared [`Dispatcher`] and
//! hold an `Arc<ProcessorContext>`.
//!
//! [`Dispatcher`]: dispatcher::Dispatcher

mod auto_retry;
mod commitment;
mod deal_maker;
mod repair;
mod status_check;
mod transfer_restart;

pub use auto_retry::{run_auto_retry, sweep_auto_retry};
pub use commitment::CommitmentJob;
pub use deal_maker::DealMakingJob;
pub use repair::{
    PieceRepairJob, RepairError, RepairJob, RepairRequest, RetryJob, prepare_piece_repair,
    prepare_repair, prepare_retry,
};
pub use status_check::StatusCheckJob;
pub use transfer_restart::TransferRestartJob;

use tracing::warn;

use crate::lifecycle::TransitionError;

/// Contended transitions mean another actor owns the row; the job logs and finishes.
pub(crate) fn contended(
    job: &'static str,
    content_id: i32,
    err: TransitionError,
) -> anyhow::Result<()> {
    if err.is_contended() {
        warn!(job, content_id, error = %err, "Skipping, content owned elsewhere");
        Ok(())
    } else {
        Err(err.into())
    }
}
