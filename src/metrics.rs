//! Success rate and duration figures over a set of runs.

use crate::models::{RunRecord, RunStatus};

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;

/// `part / whole` as a whole percentage, rounded half-up. Zero when `whole`
/// is zero.
pub fn percent(part: usize, whole: usize) -> u8 {
    if whole == 0 {
        return 0;
    }

    let rounded = (part.min(whole) * 200 + whole) / (whole * 2);
    u8::try_from(rounded).unwrap_or(100)
}

/// Share of succeeded runs among runs that reached an outcome. In-progress
/// and canceled runs are left out of the denominator.
pub fn success_rate<'a, I>(records: I) -> u8
where
    I: IntoIterator<Item = &'a RunRecord>,
{
    let (succeeded, completed) = records
        .into_iter()
        .filter(|r| r.status.is_outcome())
        .fold((0, 0), |(succeeded, completed), r| {
            let succeeded = succeeded + usize::from(r.status == RunStatus::Succeeded);
            (succeeded, completed + 1)
        });

    percent(succeeded, completed)
}

/// Mean duration in milliseconds over runs that have a finish time, floored.
pub fn average_duration_ms<'a, I>(records: I) -> Option<i64>
where
    I: IntoIterator<Item = &'a RunRecord>,
{
    let (total, count) = records
        .into_iter()
        .filter_map(RunRecord::duration_ms)
        .fold((0_i64, 0_i64), |(total, count), ms| (total + ms, count + 1));

    (count > 0).then(|| total.div_euclid(count))
}

/// Mean duration formatted as `"{m}m {s}s"`, `"0m 0s"` when nothing finished.
pub fn average_duration<'a, I>(records: I) -> String
where
    I: IntoIterator<Item = &'a RunRecord>,
{
    format_duration(average_duration_ms(records).unwrap_or(0))
}

/// Whole minutes, then whole seconds of the remainder. Each part is floored
/// once; negative input formats as zero.
pub fn format_duration(ms: i64) -> String {
    let ms = ms.max(0);
    let minutes = ms / MS_PER_MINUTE;
    let seconds = (ms % MS_PER_MINUTE) / MS_PER_SECOND;

    format!("{minutes}m {seconds}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn run(id: u64, status: RunStatus) -> RunRecord {
        RunRecord {
            id,
            pipeline_name: "build".to_string(),
            status,
            source_branch: "main".to_string(),
            created_at: base_time(),
            finished_at: None,
            repository_name: "web".to_string(),
        }
    }

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn finished(id: u64, duration_ms: i64) -> RunRecord {
        RunRecord {
            finished_at: Some(base_time() + Duration::milliseconds(duration_ms)),
            ..run(id, RunStatus::Succeeded)
        }
    }

    fn parse_duration_label(label: &str) -> Option<i64> {
        let (minutes, seconds) = label.split_once("m ")?;
        let minutes: i64 = minutes.parse().ok()?;
        let seconds: i64 = seconds.strip_suffix('s')?.parse().ok()?;
        (seconds < 60).then_some(minutes * MS_PER_MINUTE + seconds * MS_PER_SECOND)
    }

    #[test]
    fn test_percent_rounds_half_up() {
        assert_eq!(percent(7, 9), 78);
        assert_eq!(percent(1, 8), 13);
        assert_eq!(percent(1, 3), 33);
        assert_eq!(percent(2, 3), 67);
        assert_eq!(percent(0, 5), 0);
        assert_eq!(percent(5, 5), 100);
        assert_eq!(percent(3, 0), 0);
    }

    #[test]
    fn test_success_rate_ignores_in_progress_and_canceled() {
        let mut records: Vec<RunRecord> = (0..7).map(|i| run(i, RunStatus::Succeeded)).collect();
        records.push(run(7, RunStatus::Failed));
        records.push(run(8, RunStatus::Failed));
        records.push(run(9, RunStatus::InProgress));
        records.push(run(10, RunStatus::Canceled));

        assert_eq!(success_rate(&records), 78);
    }

    #[test]
    fn test_success_rate_is_zero_without_outcomes() {
        let empty: Vec<RunRecord> = Vec::new();
        let pending = vec![run(1, RunStatus::InProgress), run(2, RunStatus::Canceled)];

        assert_eq!(success_rate(&empty), 0);
        assert_eq!(success_rate(&pending), 0);
    }

    #[test]
    fn test_success_rate_stays_within_bounds() {
        let statuses = [
            RunStatus::Succeeded,
            RunStatus::Failed,
            RunStatus::InProgress,
            RunStatus::Canceled,
        ];

        for mask in 0_u32..256 {
            let records: Vec<RunRecord> = (0_u32..4)
                .map(|i| run(u64::from(i), statuses[((mask >> (i * 2)) & 3) as usize]))
                .collect();
            let rate = success_rate(&records);

            assert!(rate <= 100, "rate {rate} out of range for mask {mask}");
        }
    }

    #[test]
    fn test_average_duration_formats_minutes_and_seconds() {
        let records = vec![finished(1, 754_000)];

        assert_eq!(average_duration(&records), "12m 34s");
    }

    #[test]
    fn test_average_duration_floors_each_component_once() {
        // Mean is 59_999.5ms: 0 whole minutes and 59 whole seconds.
        let records = vec![finished(1, 59_999), finished(2, 60_000)];

        assert_eq!(average_duration_ms(&records), Some(59_999));
        assert_eq!(average_duration(&records), "0m 59s");
    }

    #[test]
    fn test_average_duration_skips_unfinished_runs() {
        let records = vec![
            finished(1, 120_000),
            run(2, RunStatus::InProgress),
            finished(3, 60_000),
        ];

        assert_eq!(average_duration(&records), "1m 30s");
    }

    #[test]
    fn test_average_duration_defaults_to_zero() {
        let records = vec![run(1, RunStatus::InProgress)];

        assert_eq!(average_duration(&records), "0m 0s");
        assert_eq!(average_duration_ms(&records), None);
    }

    #[test]
    fn test_average_duration_label_parses_back() {
        for ms in [0, 999, 1_000, 59_999, 60_000, 754_000, 3_600_000, 86_399_999] {
            let label = format_duration(ms);
            let parsed = parse_duration_label(&label).unwrap();

            assert!(parsed >= 0);
            assert!(ms - parsed < MS_PER_SECOND, "{label} drifted from {ms}");
        }
    }

    #[test]
    fn test_format_duration_clamps_negative() {
        assert_eq!(format_duration(-5_000), "0m 0s");
    }
}
