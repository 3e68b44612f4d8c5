use chrono::{DateTime, Utc};
use serde::Serialize;

/// Outcome of a pipeline run, closed over the four states the dashboard
/// understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Succeeded,
    Failed,
    InProgress,
    Canceled,
}

impl RunStatus {
    /// Succeeded or failed; the only states counted by success rates.
    pub fn is_outcome(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One pipeline run as fetched from the provider. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub id: u64,
    pub pipeline_name: String,
    pub status: RunStatus,
    pub source_branch: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub repository_name: String,
}

impl RunRecord {
    /// Wall-clock duration in milliseconds, when the run has finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.created_at).num_milliseconds())
    }
}

/// A build definition, the thing runs are instances of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineDefinition {
    pub id: u64,
    pub name: String,
    pub path: String,
    pub queue_status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_serializes_camel_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::InProgress).unwrap(),
            "\"inProgress\""
        );
        assert_eq!(
            serde_json::to_string(&RunStatus::Canceled).unwrap(),
            "\"canceled\""
        );
    }

    #[test]
    fn test_only_succeeded_and_failed_are_outcomes() {
        assert!(RunStatus::Succeeded.is_outcome());
        assert!(RunStatus::Failed.is_outcome());
        assert!(!RunStatus::InProgress.is_outcome());
        assert!(!RunStatus::Canceled.is_outcome());
    }

    #[test]
    fn test_duration_requires_finish_time() {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut record = RunRecord {
            id: 1,
            pipeline_name: "ci".to_string(),
            status: RunStatus::InProgress,
            source_branch: "main".to_string(),
            created_at,
            finished_at: None,
            repository_name: "web".to_string(),
        };

        assert_eq!(record.duration_ms(), None);

        record.finished_at = Some(created_at + chrono::Duration::milliseconds(754_000));
        assert_eq!(record.duration_ms(), Some(754_000));
    }
}
