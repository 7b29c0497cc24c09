pub mod config;
pub mod content_status;
pub mod epoch;
pub mod piece_status;
pub mod retry;
pub mod storage;
pub mod transfer;

pub use config::{CommpConfig, DispatcherConfig};
pub use content_status::{ContentStatus, ParseStatusError, TransitionKind};
pub use piece_status::{CommitmentStatus, ConnectionMode};
pub use transfer::{TransferEvent, TransferPhase, TransferStatus};
