//! Windowed statistics over one fetched batch of runs.
//!
//! Everything here is a pure function of the batch and the reference time,
//! so the same input always yields the same snapshot.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use indexmap::IndexMap;

use crate::config::TrendPolicy;
use crate::insights::{
    BranchActivity, DailyBucket, FailingPipeline, InsightSnapshot, PerformanceMetrics,
};
use crate::metrics::{average_duration, average_duration_ms, percent, success_rate};
use crate::models::{RunRecord, RunStatus};

pub const WINDOW_DAYS: i64 = 30;
pub const WEEK_DAYS: i64 = 7;
pub const DAILY_BUCKETS: i64 = 7;
pub const TOP_FAILING_LIMIT: usize = 5;
pub const BRANCH_ACTIVITY_LIMIT: usize = 10;
pub const RECENT_ACTIVITY_LIMIT: usize = 10;

/// Builds a snapshot against `now`. Calendar days are taken in the time zone
/// of `now`.
pub fn compute_insights<Tz: TimeZone>(
    records: &[RunRecord],
    now: &DateTime<Tz>,
    policy: &TrendPolicy,
) -> InsightSnapshot {
    let now_utc = now.with_timezone(&Utc);
    let window_start = now_utc - Duration::days(WINDOW_DAYS);
    let window: Vec<&RunRecord> = records
        .iter()
        .filter(|r| r.created_at >= window_start)
        .collect();

    let success = success_rate(window.iter().copied());
    let week_start = now_utc - Duration::days(WEEK_DAYS);
    let (current_week, previous_week) = split_weeks(&window, week_start);
    let week_over_week_delta = i32::from(success_rate(current_week.iter().copied()))
        - i32::from(success_rate(previous_week.iter().copied()));

    let performance = PerformanceMetrics {
        reliability: success,
        success_trend: policy.success_trend(week_over_week_delta),
        avg_duration_trend: policy.duration_trend(
            average_duration_ms(current_week.iter().copied()),
            average_duration_ms(previous_week.iter().copied()),
        ),
    };

    InsightSnapshot {
        computed_at: Some(now.fixed_offset()),
        total_runs: window.len(),
        success_rate: success,
        avg_duration: average_duration(window.iter().copied()),
        active_builds: window
            .iter()
            .filter(|r| r.status == RunStatus::InProgress)
            .count(),
        daily_buckets: daily_buckets(&window, now),
        week_over_week_delta,
        performance,
        recent_activity: recent_activity(&window),
        top_failing_pipelines: top_failing_pipelines(&window),
        branch_activity: branch_activity(&window),
    }
}

/// Runs since `week_start`, and runs in the seven days before it.
fn split_weeks<'a>(
    window: &[&'a RunRecord],
    week_start: DateTime<Utc>,
) -> (Vec<&'a RunRecord>, Vec<&'a RunRecord>) {
    let previous_start = week_start - Duration::days(WEEK_DAYS);

    let current = window
        .iter()
        .filter(|r| r.created_at >= week_start)
        .copied()
        .collect();
    let previous = window
        .iter()
        .filter(|r| r.created_at >= previous_start && r.created_at < week_start)
        .copied()
        .collect();

    (current, previous)
}

/// One bucket per calendar day, oldest first, ending with the day of `now`.
/// Each run is placed by its own local date, so a daylight saving change
/// inside the week still splits days at local midnight.
fn daily_buckets<Tz: TimeZone>(window: &[&RunRecord], now: &DateTime<Tz>) -> Vec<DailyBucket> {
    let zone = now.timezone();
    let today = now.date_naive();

    let mut buckets: IndexMap<NaiveDate, DailyBucket> = (0..DAILY_BUCKETS)
        .rev()
        .map(|days_ago| {
            let date = today - Duration::days(days_ago);
            (
                date,
                DailyBucket {
                    date,
                    succeeded_count: 0,
                    failed_count: 0,
                    total_count: 0,
                },
            )
        })
        .collect();

    for record in window {
        let local_date = record.created_at.with_timezone(&zone).date_naive();
        if let Some(bucket) = buckets.get_mut(&local_date) {
            bucket.total_count += 1;
            match record.status {
                RunStatus::Succeeded => bucket.succeeded_count += 1,
                RunStatus::Failed => bucket.failed_count += 1,
                RunStatus::InProgress | RunStatus::Canceled => {}
            }
        }
    }

    buckets.into_values().collect()
}

fn recent_activity(window: &[&RunRecord]) -> Vec<RunRecord> {
    let mut recent = window.to_vec();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    recent
        .into_iter()
        .take(RECENT_ACTIVITY_LIMIT)
        .cloned()
        .collect()
}

#[derive(Default)]
struct PipelineStats {
    total: usize,
    failed: usize,
    last_failed_at: Option<DateTime<Utc>>,
}

fn top_failing_pipelines(window: &[&RunRecord]) -> Vec<FailingPipeline> {
    let stats = window.iter().fold(
        IndexMap::<&str, PipelineStats>::new(),
        |mut stats, record| {
            let entry = stats.entry(record.pipeline_name.as_str()).or_default();
            entry.total += 1;
            if record.status == RunStatus::Failed {
                entry.failed += 1;
                entry.last_failed_at = entry.last_failed_at.max(Some(record.created_at));
            }
            stats
        },
    );

    let mut failing: Vec<FailingPipeline> = stats
        .into_iter()
        .map(|(name, stats)| FailingPipeline {
            pipeline_name: name.to_string(),
            failure_rate_percent: percent(stats.failed, stats.total),
            last_failed_at: stats.last_failed_at,
        })
        .filter(|p| p.failure_rate_percent > 0)
        .collect();

    // Stable sort keeps encounter order among equal rates.
    failing.sort_by(|a, b| b.failure_rate_percent.cmp(&a.failure_rate_percent));
    failing.truncate(TOP_FAILING_LIMIT);
    failing
}

fn branch_activity(window: &[&RunRecord]) -> Vec<BranchActivity> {
    let groups = window.iter().fold(
        IndexMap::<&str, Vec<&RunRecord>>::new(),
        |mut groups, record| {
            groups
                .entry(record.source_branch.as_str())
                .or_default()
                .push(*record);
            groups
        },
    );

    let mut branches: Vec<BranchActivity> = groups
        .into_iter()
        .map(|(branch, runs)| BranchActivity {
            branch: branch.to_string(),
            run_count: runs.len(),
            success_rate_percent: success_rate(runs.iter().copied()),
        })
        .collect();

    branches.sort_by(|a, b| b.run_count.cmp(&a.run_count));
    branches.truncate(BRANCH_ACTIVITY_LIMIT);
    branches
}
