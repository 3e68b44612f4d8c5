//! Monitor configuration: refresh cadence, fetch size and trend thresholds.

use std::time::Duration;

use crate::error::{PulseError, Result};
use crate::insights::Trend;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_FETCH_TOP: usize = 200;

/// Thresholds for the trend labels. These are policy, not contract; the
/// defaults are a starting point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrendPolicy {
    /// Week-over-week success rate change, in percentage points, needed
    /// before the success trend leaves `stable`.
    pub success_delta_points: u8,
    /// Relative change in average duration, in percent, needed before the
    /// duration trend leaves `stable`.
    pub duration_change_percent: u8,
}

impl Default for TrendPolicy {
    fn default() -> Self {
        Self {
            success_delta_points: 5,
            duration_change_percent: 10,
        }
    }
}

impl TrendPolicy {
    pub fn success_trend(&self, delta_points: i32) -> Trend {
        let threshold = i32::from(self.success_delta_points);
        if delta_points >= threshold && delta_points != 0 {
            Trend::Improving
        } else if delta_points <= -threshold && delta_points != 0 {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }

    /// Shorter runs are an improvement. Stable when either side is unknown.
    pub fn duration_trend(&self, current_ms: Option<i64>, previous_ms: Option<i64>) -> Trend {
        let (Some(current), Some(previous)) = (current_ms, previous_ms) else {
            return Trend::Stable;
        };
        if previous <= 0 {
            return Trend::Stable;
        }

        let change = (current - previous) * 100;
        let threshold = previous * i64::from(self.duration_change_percent);
        if change == 0 {
            Trend::Stable
        } else if change <= -threshold {
            Trend::Improving
        } else if change >= threshold {
            Trend::Degrading
        } else {
            Trend::Stable
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Number of most recent builds requested per refresh.
    pub fetch_top: usize,
    pub trend: TrendPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            fetch_top: DEFAULT_FETCH_TOP,
            trend: TrendPolicy::default(),
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(PulseError::Config(
                "Poll interval must be greater than zero".to_string(),
            ));
        }
        if self.fetch_top == 0 {
            return Err(PulseError::Config(
                "Number of builds to fetch must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MonitorConfig::default();

        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.fetch_top, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_or_fetch_size_is_rejected() {
        let zero_interval = MonitorConfig {
            poll_interval: Duration::ZERO,
            ..MonitorConfig::default()
        };
        let zero_top = MonitorConfig {
            fetch_top: 0,
            ..MonitorConfig::default()
        };

        assert!(matches!(zero_interval.validate(), Err(PulseError::Config(_))));
        assert!(matches!(zero_top.validate(), Err(PulseError::Config(_))));
    }

    #[test]
    fn test_success_trend_thresholds() {
        let policy = TrendPolicy::default();

        assert_eq!(policy.success_trend(5), Trend::Improving);
        assert_eq!(policy.success_trend(4), Trend::Stable);
        assert_eq!(policy.success_trend(0), Trend::Stable);
        assert_eq!(policy.success_trend(-4), Trend::Stable);
        assert_eq!(policy.success_trend(-5), Trend::Degrading);
    }

    #[test]
    fn test_zero_threshold_still_needs_a_change() {
        let policy = TrendPolicy {
            success_delta_points: 0,
            duration_change_percent: 0,
        };

        assert_eq!(policy.success_trend(0), Trend::Stable);
        assert_eq!(policy.success_trend(1), Trend::Improving);
        assert_eq!(policy.duration_trend(Some(100), Some(100)), Trend::Stable);
        assert_eq!(policy.duration_trend(Some(101), Some(100)), Trend::Degrading);
    }

    #[test]
    fn test_duration_trend_thresholds() {
        let policy = TrendPolicy::default();

        assert_eq!(policy.duration_trend(Some(90_000), Some(100_000)), Trend::Improving);
        assert_eq!(policy.duration_trend(Some(95_000), Some(100_000)), Trend::Stable);
        assert_eq!(policy.duration_trend(Some(110_000), Some(100_000)), Trend::Degrading);
    }

    #[test]
    fn test_duration_trend_is_stable_without_history() {
        let policy = TrendPolicy::default();

        assert_eq!(policy.duration_trend(None, Some(100_000)), Trend::Stable);
        assert_eq!(policy.duration_trend(Some(100_000), None), Trend::Stable);
        assert_eq!(policy.duration_trend(Some(100_000), Some(0)), Trend::Stable);
    }
}
