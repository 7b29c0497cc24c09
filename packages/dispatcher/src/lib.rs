//! Generic worker pool. Holds no domain state, only a queue and the counters needed to tell
//! when all submitted work has drained.

mod dispatcher;
mod error;
mod job;

pub use dispatcher::{Dispatcher, DispatcherStats, Submission};
pub use error::DispatchError;
pub use job::Job;
