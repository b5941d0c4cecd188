//! Persisted crawl job state.
//!
//! One job directory holds one `search_config.json`. It is the only thing a
//! resumed job reads back, so writes go through a temp file in the same
//! directory and a rename.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;

use fedicrawl_common::{Cursor, Predicate};

pub const STATE_FILE: &str = "search_config.json";

#[derive(Debug, Error)]
pub enum StateError {
    /// The state file exists but cannot be used to resume.
    #[error("job state {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("failed to write job state {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, StateError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub predicate: Predicate,
    pub sources: Vec<String>,
    #[serde(default)]
    pub local_only: bool,
    /// Per-source watermark.
    pub cursors: BTreeMap<String, Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_boundary: Option<Cursor>,
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl JobState {
    /// A new job: every source starts at the same calendar boundary.
    pub fn new(predicate: Predicate, sources: Vec<String>, start: Cursor, local_only: bool) -> Self {
        let cursors = sources.iter().map(|s| (s.clone(), start)).collect();
        Self {
            predicate,
            sources,
            local_only,
            cursors,
            end_boundary: None,
            last_checked_at: None,
        }
    }

    pub fn with_end_boundary(mut self, end: Option<Cursor>) -> Self {
        self.end_boundary = end;
        self
    }

    /// Watermark for a source. Sources added to the list by hand after the
    /// job started pick up the earliest watermark in the job.
    pub fn cursor_for(&self, source: &str) -> Option<Cursor> {
        self.cursors.get(source).copied().or_else(|| {
            self.cursors
                .values()
                .min_by_key(|c| c.to_snowflake())
                .copied()
        })
    }
}

pub fn state_path(job_dir: &Path) -> PathBuf {
    job_dir.join(STATE_FILE)
}

/// Load a job's state. `Ok(None)` when the job has never been saved.
pub fn load(job_dir: &Path) -> Result<Option<JobState>> {
    let path = state_path(job_dir);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StateError::Corrupt {
                path,
                reason: e.to_string(),
            })
        }
    };

    let state: JobState = serde_json::from_str(&content).map_err(|e| StateError::Corrupt {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    let missing = if state.sources.is_empty() {
        Some("no sources")
    } else if state.cursors.is_empty() {
        Some("no watermarks")
    } else {
        None
    };
    if let Some(reason) = missing {
        return Err(StateError::Corrupt {
            path,
            reason: reason.to_string(),
        });
    }
    Ok(Some(state))
}

/// Atomically replace a job's state.
pub fn save(job_dir: &Path, state: &JobState) -> Result<()> {
    let path = state_path(job_dir);
    let write_err = |source: std::io::Error| StateError::Write {
        path: path.clone(),
        source,
    };

    let body = serde_json::to_vec_pretty(state).map_err(|e| write_err(e.into()))?;
    let mut tmp = NamedTempFile::new_in(job_dir).map_err(write_err)?;
    tmp.write_all(&body).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_state() -> JobState {
        let start = Cursor::from_day(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap());
        let mut state = JobState::new(
            Predicate::hashtag("rust"),
            vec!["a.example".into(), "b.example".into()],
            start,
            false,
        );
        state.cursors.insert("b.example".into(), Cursor::Snowflake(109_600_000_000_000_000));
        state
    }

    #[test]
    fn missing_state_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn round_trip_keeps_cursor_forms() {
        let dir = tempfile::tempdir().unwrap();
        let state = sample_state().with_end_boundary(Some(Cursor::Snowflake(42)));
        save(dir.path(), &state).unwrap();

        let back = load(dir.path()).unwrap().unwrap();
        assert_eq!(back, state);
        assert!(back.cursors["a.example"].is_date());
        assert!(!back.cursors["b.example"].is_date());
    }

    #[test]
    fn save_replaces_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = sample_state();
        save(dir.path(), &state).unwrap();
        state.cursors.insert("a.example".into(), Cursor::Snowflake(7));
        save(dir.path(), &state).unwrap();

        assert_eq!(load(dir.path()).unwrap().unwrap().cursors["a.example"], Cursor::Snowflake(7));
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn garbage_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(state_path(dir.path()), "{ not json").unwrap();
        assert!(matches!(load(dir.path()), Err(StateError::Corrupt { .. })));
    }

    #[test]
    fn state_without_watermarks_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = sample_state();
        state.cursors.clear();
        save(dir.path(), &state).unwrap();

        let err = load(dir.path()).unwrap_err();
        assert!(matches!(&err, StateError::Corrupt { reason, .. } if reason == "no watermarks"));
    }

    #[test]
    fn unknown_sources_fall_back_to_earliest_cursor() {
        let state = sample_state();
        assert_eq!(state.cursor_for("c.example"), state.cursor_for("a.example"));
    }
}
