use chrono::{DateTime, NaiveDateTime, Utc};
use log::warn;

use super::types::BuildDto;
use crate::error::{PulseError, Result};
use crate::models::{RunRecord, RunStatus};

const BRANCH_REF_PREFIX: &str = "refs/heads/";
const UNKNOWN: &str = "unknown";

/// Closes the provider's open `(status, result)` vocabulary over
/// [`RunStatus`]. Anything unrecognized counts as a failure so it can never
/// inflate the success rate.
pub fn map_status(status: &str, result: Option<&str>) -> RunStatus {
    match (status, result) {
        ("inProgress" | "notStarted", _) => RunStatus::InProgress,
        ("completed", Some("succeeded")) => RunStatus::Succeeded,
        ("completed", Some("canceled")) => RunStatus::Canceled,
        _ => RunStatus::Failed,
    }
}

/// `refs/heads/main` becomes `main`; a missing or blank branch becomes
/// `unknown`.
pub fn branch_name(source_branch: Option<&str>) -> String {
    match source_branch.map(str::trim) {
        Some(branch) if !branch.is_empty() => branch
            .strip_prefix(BRANCH_REF_PREFIX)
            .unwrap_or(branch)
            .to_string(),
        _ => UNKNOWN.to_string(),
    }
}

fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").map(|t| t.and_utc())
        })
        .map_err(|e| PulseError::MalformedRecord(format!("invalid {field} '{value}': {e}")))
}

pub fn normalize_build(build: BuildDto) -> Result<RunRecord> {
    let id = build
        .id
        .ok_or_else(|| PulseError::MalformedRecord("missing id".to_string()))?;

    let pipeline_name = build
        .definition
        .and_then(|d| d.name)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| PulseError::MalformedRecord(format!("build {id}: missing definition name")))?;

    let provider_status = build
        .status
        .ok_or_else(|| PulseError::MalformedRecord(format!("build {id}: missing status")))?;
    let status = map_status(&provider_status, build.result.as_deref());

    let created_at = match build.start_time.or(build.queue_time) {
        Some(raw) => parse_timestamp("start time", &raw)?,
        None => {
            return Err(PulseError::MalformedRecord(format!(
                "build {id}: missing start and queue time"
            )))
        }
    };

    let finished_at = match build.finish_time {
        Some(_) if status == RunStatus::InProgress => None,
        Some(raw) => Some(parse_timestamp("finish time", &raw)?),
        None => None,
    };
    if finished_at.is_some_and(|finished| finished < created_at) {
        return Err(PulseError::MalformedRecord(format!(
            "build {id}: finished before it started"
        )));
    }

    Ok(RunRecord {
        id,
        pipeline_name,
        status,
        source_branch: branch_name(build.source_branch.as_deref()),
        created_at,
        finished_at,
        repository_name: build
            .repository
            .and_then(|r| r.name)
            .unwrap_or_else(|| UNKNOWN.to_string()),
    })
}

/// Normalizes a raw `value` array. Bad entries are logged and skipped.
pub fn normalize_batch(values: Vec<serde_json::Value>) -> Vec<RunRecord> {
    let total = values.len();
    let records: Vec<RunRecord> = values
        .into_iter()
        .filter_map(|value| {
            serde_json::from_value::<BuildDto>(value)
                .map_err(|e| PulseError::MalformedRecord(e.to_string()))
                .and_then(normalize_build)
                .map_err(|e| warn!("Skipping build: {e}"))
                .ok()
        })
        .collect();

    if records.len() < total {
        warn!("Skipped {} of {total} builds", total - records.len());
    }

    records
}
