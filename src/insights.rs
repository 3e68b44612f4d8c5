use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;

use crate::models::RunRecord;

/// Every derived figure for one refresh. Rebuilt from scratch on each
/// refresh and replaced as a whole.
#[derive(Debug, Clone, Serialize)]
pub struct InsightSnapshot {
    /// Reference time the snapshot was computed against; `None` before the
    /// first refresh.
    pub computed_at: Option<DateTime<FixedOffset>>,
    pub total_runs: usize,
    pub success_rate: u8,
    pub avg_duration: String,
    pub active_builds: usize,
    pub daily_buckets: Vec<DailyBucket>,
    pub week_over_week_delta: i32,
    pub performance: PerformanceMetrics,
    pub recent_activity: Vec<RunRecord>,
    pub top_failing_pipelines: Vec<FailingPipeline>,
    pub branch_activity: Vec<BranchActivity>,
}

impl Default for InsightSnapshot {
    fn default() -> Self {
        Self {
            computed_at: None,
            total_runs: 0,
            success_rate: 0,
            avg_duration: "0m 0s".to_string(),
            active_builds: 0,
            daily_buckets: Vec::new(),
            week_over_week_delta: 0,
            performance: PerformanceMetrics::default(),
            recent_activity: Vec::new(),
            top_failing_pipelines: Vec::new(),
            branch_activity: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub succeeded_count: usize,
    pub failed_count: usize,
    pub total_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    #[default]
    Stable,
    Degrading,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct PerformanceMetrics {
    /// Success rate over the whole 30-day window.
    pub reliability: u8,
    pub success_trend: Trend,
    pub avg_duration_trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailingPipeline {
    pub pipeline_name: String,
    pub failure_rate_percent: u8,
    /// Creation time of the most recent failed run, `None` if it never failed.
    pub last_failed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchActivity {
    pub branch: String,
    pub run_count: usize,
    pub success_rate_percent: u8,
}
