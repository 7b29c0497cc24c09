//! Deal windows requested in days, converted to chain epochs.

use chrono::{DateTime, Duration, Utc};
use common::epoch::{
    DEFAULT_DURATION, EPOCH_PER_DAY, MAX_DURATION_DAYS, MAX_START_DAYS, date_to_height,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DealWindow {
    pub start_days: i64,
    pub duration_days: i64,
}

/// Epoch bounds of a window anchored at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EpochWindow {
    pub start_epoch: i64,
    pub end_epoch: i64,
    pub duration: i64,
}

impl DealWindow {
    /// `None` when neither bound was requested. A missing start means "now", a missing duration the
    /// default deal length.
    pub fn from_days(start_days: Option<i64>, duration_days: Option<i64>) -> Option<Self> {
        if start_days.is_none() && duration_days.is_none() {
            return None;
        }
        Some(Self {
            start_days: start_days.unwrap_or(0),
            duration_days: duration_days.unwrap_or(DEFAULT_DURATION / EPOCH_PER_DAY),
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.start_days < 0 || self.duration_days < 0 {
            return Err("day counts must not be negative".into());
        }
        if self.start_days > MAX_START_DAYS {
            return Err(format!("start_epoch_in_days must be at most {MAX_START_DAYS}"));
        }
        if self.duration_days > MAX_DURATION_DAYS {
            return Err(format!("duration_in_days must be at most {MAX_DURATION_DAYS}"));
        }
        if self.start_days > self.duration_days {
            return Err("start_epoch_in_days must not exceed duration_in_days".into());
        }
        Ok(())
    }

    pub fn epochs_from(&self, now: DateTime<Utc>) -> EpochWindow {
        let start_epoch = date_to_height(now + Duration::days(self.start_days));
        let end_epoch = start_epoch + EPOCH_PER_DAY * (self.duration_days - self.start_days);
        EpochWindow {
            start_epoch,
            end_epoch,
            duration: end_epoch - start_epoch,
        }
    }
}
