//! Chain-epoch arithmetic. One epoch is 30 seconds since network genesis.

use chrono::{DateTime, NaiveTime, Utc};

pub const EPOCH_DURATION_SECS: i64 = 30;
pub const EPOCH_PER_HOUR: i64 = 120;
pub const EPOCH_PER_DAY: i64 = 2880;
pub const EPOCH_540_DAYS: i64 = 1_555_200;
/// Deal duration used when a content has no proposal parameters.
pub const DEFAULT_DURATION: i64 = EPOCH_540_DAYS - EPOCH_PER_DAY * 21;
pub const FILECOIN_GENESIS_UNIX_EPOCH: i64 = 1_598_306_400;

/// Longest deal duration an operator may request.
pub const MAX_DURATION_DAYS: i64 = 540;
/// Furthest out a deal may start.
pub const MAX_START_DAYS: i64 = 14;

pub fn unix_to_height(unix_secs: i64) -> i64 {
    (unix_secs - FILECOIN_GENESIS_UNIX_EPOCH).div_euclid(EPOCH_DURATION_SECS)
}

pub fn height_to_unix(height: i64) -> i64 {
    height * EPOCH_DURATION_SECS + FILECOIN_GENESIS_UNIX_EPOCH
}

/// Height at midnight UTC of the given day.
pub fn date_to_height(at: DateTime<Utc>) -> i64 {
    let midnight = at.date_naive().and_time(NaiveTime::MIN).and_utc();
    unix_to_height(midnight.timestamp())
}

pub fn current_height() -> i64 {
    unix_to_height(Utc::now().timestamp())
}

pub fn days_to_epochs(days: i64) -> i64 {
    days * EPOCH_PER_DAY
}
