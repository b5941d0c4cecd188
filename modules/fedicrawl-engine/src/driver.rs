//! Incremental multi-source crawl.
//!
//! One driver serves every predicate kind. Each source pages forward from its
//! watermark, oldest first, until a short page, the record cap or the end
//! boundary. Sources run concurrently; pages within a source never do.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};
use typed_builder::TypedBuilder;

use fedicrawl_common::{ConfigError, Cursor, Predicate, RawStatus, Timelines};

use crate::filter::{RecordFilter, OPT_OUT_TAGS};
use crate::state::{self, JobState};
use crate::traits::{Page, SourceClient, SourceFailure, Timeline};

/// Records requested per page; the API maximum.
pub const DEFAULT_PAGE_LIMIT: u32 = 40;

pub const DEFAULT_CONCURRENCY: usize = 8;

// --- Options ---

#[derive(Debug, Clone, TypedBuilder)]
pub struct CrawlOptions {
    #[builder(default = DEFAULT_PAGE_LIMIT)]
    pub limit: u32,
    /// Stop a source once this many records were fetched from it in a cycle.
    #[builder(default)]
    pub max_records: Option<usize>,
    #[builder(default = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
    #[builder(default = OPT_OUT_TAGS.iter().map(|t| t.to_string()).collect())]
    pub opt_out_tags: Vec<String>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

// --- Per-source state machine ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// Only a calendar boundary is known.
    Unstarted,
    /// A numeric watermark is known and more pages may exist.
    Paging,
    Exhausted,
    /// A fetch failed this cycle.
    Error,
    /// Stopped between pages by a cancellation request.
    Cancelled,
}

impl SourceState {
    fn initial(cursor: &Cursor) -> Self {
        if cursor.is_date() {
            SourceState::Unstarted
        } else {
            SourceState::Paging
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SourceState::Unstarted => "unstarted",
            SourceState::Paging => "paging",
            SourceState::Exhausted => "exhausted",
            SourceState::Error => "error",
            SourceState::Cancelled => "cancelled",
        };
        f.pad(label)
    }
}

/// How one source's cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceOutcome {
    pub source: String,
    pub state: SourceState,
    pub pages: usize,
    /// Records inside the end boundary, before filtering.
    pub fetched: usize,
    pub kept: usize,
    pub cursor_before: Cursor,
    pub cursor_after: Cursor,
    pub failure: Option<SourceFailure>,
}

/// Everything one source produced in a cycle.
#[derive(Debug)]
pub struct SourceCycle {
    pub outcome: SourceOutcome,
    pub records: Vec<RawStatus>,
}

/// Inputs for crawling one source.
#[derive(Debug, Clone)]
pub struct SourceRequest<'a> {
    pub source: &'a str,
    pub timeline: &'a Timeline,
    pub cursor: Cursor,
    pub end_boundary: Option<Cursor>,
    pub local_only: bool,
}

/// Watermark after a successful cycle: the highest identifier fetched, never
/// lower than before. With nothing fetched a calendar watermark still becomes
/// numeric.
pub fn advance_watermark(cursor: Cursor, max_seen: Option<u64>) -> Cursor {
    let floor = cursor.to_snowflake();
    Cursor::Snowflake(max_seen.map_or(floor, |id| id.max(floor)))
}

/// Page one source forward from its watermark.
pub async fn crawl_source(
    client: &dyn SourceClient,
    request: SourceRequest<'_>,
    filter: &RecordFilter,
    options: &CrawlOptions,
    cancel: &AtomicBool,
) -> SourceCycle {
    let SourceRequest {
        source,
        timeline,
        cursor,
        end_boundary,
        local_only,
    } = request;
    let boundary = end_boundary.map(|c| c.to_snowflake());

    let mut outcome = SourceOutcome {
        source: source.to_string(),
        state: SourceState::initial(&cursor),
        pages: 0,
        fetched: 0,
        kept: 0,
        cursor_before: cursor,
        cursor_after: cursor,
        failure: None,
    };
    let mut records = Vec::new();
    let mut max_seen: Option<u64> = None;

    if cancel.load(Ordering::Relaxed) {
        outcome.state = SourceState::Cancelled;
        return SourceCycle { outcome, records };
    }

    info!(source, cursor = %cursor, timeline = ?timeline, "Crawling source");
    let mut next = client
        .fetch_page_forward(source, timeline, &cursor, options.limit, local_only)
        .await;

    loop {
        let mut page: Page = match next {
            Ok(page) => page,
            Err(failure) => {
                warn!(source, error = %failure, pages = outcome.pages, "Fetch failed, source skipped this cycle");
                outcome.state = SourceState::Error;
                outcome.failure = Some(failure);
                outcome.kept = 0;
                outcome.cursor_after = cursor;
                return SourceCycle {
                    outcome,
                    records: Vec::new(),
                };
            }
        };
        outcome.pages += 1;

        let full = page.len() >= options.limit as usize;
        let mut crossed = false;
        let queried_at = Utc::now();

        for mut record in std::mem::take(&mut page.records) {
            let id = record.snowflake();
            if let (Some(end), Some(id)) = (boundary, id) {
                if id > end {
                    crossed = true;
                    continue;
                }
            }
            outcome.fetched += 1;
            max_seen = max_seen.max(id);
            record.stamp_queried_at(queried_at);
            if filter.accepts(&record) {
                records.push(record);
            }
        }

        let capped = options
            .max_records
            .is_some_and(|cap| outcome.fetched >= cap);
        if !full || capped || crossed || page.prev.is_none() {
            outcome.state = SourceState::Exhausted;
            break;
        }
        outcome.state = SourceState::Paging;

        if cancel.load(Ordering::Relaxed) {
            info!(source, pages = outcome.pages, "Cancelled between pages");
            outcome.state = SourceState::Cancelled;
            break;
        }
        next = client.fetch_page_backward(source, &page).await;
    }

    outcome.kept = records.len();
    outcome.cursor_after = advance_watermark(cursor, max_seen);
    info!(
        source,
        state = %outcome.state,
        pages = outcome.pages,
        fetched = outcome.fetched,
        kept = outcome.kept,
        cursor = %outcome.cursor_after,
        "Source done"
    );
    SourceCycle { outcome, records }
}

// --- Cycle ---

#[derive(Debug, Default)]
pub struct CycleReport {
    /// Sorted by source name.
    pub outcomes: Vec<SourceOutcome>,
}

impl CycleReport {
    pub fn fetched(&self) -> usize {
        self.outcomes.iter().map(|o| o.fetched).sum()
    }

    pub fn kept(&self) -> usize {
        self.outcomes.iter().map(|o| o.kept).sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.state == SourceState::Error)
            .count()
    }

    pub fn outcome(&self, source: &str) -> Option<&SourceOutcome> {
        self.outcomes.iter().find(|o| o.source == source)
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Crawl Cycle ===")?;
        writeln!(f, "Sources:        {}", self.outcomes.len())?;
        writeln!(f, "Failed:         {}", self.failed())?;
        writeln!(f, "Fetched:        {}", self.fetched())?;
        writeln!(f, "Kept:           {}", self.kept())?;
        for o in &self.outcomes {
            match &o.failure {
                Some(failure) => writeln!(f, "  {:<30} {:<10} {}", o.source, o.state, failure)?,
                None => writeln!(
                    f,
                    "  {:<30} {:<10} pages={} fetched={} kept={} cursor={} -> {}",
                    o.source, o.state, o.pages, o.fetched, o.kept, o.cursor_before, o.cursor_after
                )?,
            }
        }
        Ok(())
    }
}

/// Output of one cycle over every source of a job.
#[derive(Debug, Default)]
pub struct CycleResult {
    pub report: CycleReport,
    /// Kept records per source; sources without records are absent.
    pub timelines: Timelines,
    /// Watermarks to persist. Failed and never-started sources are absent.
    pub cursors: BTreeMap<String, Cursor>,
}

/// Crawl every source of `state` once.
pub async fn run_cycle(
    client: &dyn SourceClient,
    state: &JobState,
    filter: &RecordFilter,
    options: &CrawlOptions,
    cancel: &AtomicBool,
) -> CycleResult {
    let timeline = Timeline::for_predicate(&state.predicate);

    let requests: Vec<SourceRequest<'_>> = state
        .sources
        .iter()
        .filter_map(|source| {
            let Some(cursor) = state.cursor_for(source) else {
                warn!(source = %source, "No watermark, source skipped");
                return None;
            };
            Some(SourceRequest {
                source,
                timeline: &timeline,
                cursor,
                end_boundary: state.end_boundary,
                local_only: state.local_only,
            })
        })
        .collect();

    let cycles: Vec<SourceCycle> = stream::iter(
        requests
            .into_iter()
            .map(|request| crawl_source(client, request, filter, options, cancel)),
    )
    .buffer_unordered(options.concurrency.max(1))
    .collect()
    .await;

    let mut result = CycleResult::default();
    for cycle in cycles {
        let outcome = cycle.outcome;
        match outcome.state {
            SourceState::Error => {}
            SourceState::Cancelled if outcome.pages == 0 => {}
            _ => {
                result
                    .cursors
                    .insert(outcome.source.clone(), outcome.cursor_after);
            }
        }
        if !cycle.records.is_empty() {
            result
                .timelines
                .insert(outcome.source.clone(), cycle.records);
        }
        result.report.outcomes.push(outcome);
    }
    result.report.outcomes.sort_by(|a, b| a.source.cmp(&b.source));
    result
}

// --- Jobs ---

/// What the caller asks for. Only used when the job directory holds no state.
#[derive(Debug, Clone, TypedBuilder)]
pub struct JobRequest {
    pub predicate: Predicate,
    #[builder(default)]
    pub sources: Vec<String>,
    /// Calendar boundary a new job starts from.
    #[builder(default)]
    pub start: Option<Cursor>,
    #[builder(default)]
    pub end_boundary: Option<Cursor>,
    #[builder(default)]
    pub local_only: bool,
}

#[derive(Debug)]
pub struct JobRun {
    pub report: CycleReport,
    /// Timelines file written by this cycle, if anything was kept.
    pub output: Option<PathBuf>,
    pub state: JobState,
    pub resumed: bool,
}

/// Start or resume the job in `job_dir`, run one cycle and persist progress.
pub async fn run_job(
    job_dir: &Path,
    request: JobRequest,
    client: &dyn SourceClient,
    options: &CrawlOptions,
    cancel: &AtomicBool,
) -> Result<JobRun> {
    let (mut job, resumed) = match state::load(job_dir)? {
        Some(job) => {
            if job.predicate != request.predicate {
                info!(
                    persisted = %job.predicate,
                    requested = %request.predicate,
                    "Resuming job with its persisted predicate"
                );
            }
            (job, true)
        }
        None => (new_job(job_dir, request)?, false),
    };

    info!(
        job_dir = %job_dir.display(),
        predicate = %job.predicate,
        sources = job.sources.len(),
        resumed,
        "Starting crawl cycle"
    );

    let filter = RecordFilter::new(job.predicate.content_filter())
        .with_opt_out_tags(&options.opt_out_tags);
    let cycle = run_cycle(client, &job, &filter, options, cancel).await;

    let output = if cycle.timelines.is_empty() {
        None
    } else {
        Some(write_timelines(job_dir, &cycle.timelines)?)
    };

    job.cursors.extend(cycle.cursors);
    job.last_checked_at = Some(Utc::now());
    state::save(job_dir, &job)?;

    info!("{}", cycle.report);
    Ok(JobRun {
        report: cycle.report,
        output,
        state: job,
        resumed,
    })
}

fn new_job(job_dir: &Path, request: JobRequest) -> Result<JobState> {
    if request.sources.is_empty() {
        return Err(ConfigError::Missing("source list").into());
    }
    let start = request
        .start
        .ok_or(ConfigError::Missing("start date (required for a new job)"))?;
    if let Predicate::Hashtag(tag) = &request.predicate {
        if tag.is_empty() {
            return Err(ConfigError::Missing("hashtag").into());
        }
    }

    std::fs::create_dir_all(job_dir)
        .with_context(|| format!("Failed to create job directory {}", job_dir.display()))?;
    Ok(
        JobState::new(request.predicate, request.sources, start, request.local_only)
            .with_end_boundary(request.end_boundary),
    )
}

/// Write `<unix millis>_timelines.json` into `dir`. Never overwrites an
/// earlier cycle's file.
pub fn write_timelines(dir: &Path, timelines: &Timelines) -> Result<PathBuf> {
    let mut stamp = Utc::now().timestamp_millis();
    let mut path = dir.join(format!("{stamp}_timelines.json"));
    while path.exists() {
        stamp += 1;
        path = dir.join(format!("{stamp}_timelines.json"));
    }
    let body = serde_json::to_vec(timelines).context("Failed to serialize timelines")?;
    std::fs::write(&path, body)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), sources = timelines.len(), "Wrote timelines");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watermark_never_moves_backwards() {
        assert_eq!(advance_watermark(Cursor::Snowflake(100), Some(250)), Cursor::Snowflake(250));
        assert_eq!(advance_watermark(Cursor::Snowflake(300), Some(250)), Cursor::Snowflake(300));
        assert_eq!(advance_watermark(Cursor::Snowflake(300), None), Cursor::Snowflake(300));
    }

    #[test]
    fn empty_cycle_converts_calendar_watermark() {
        let day = chrono::NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let cursor = Cursor::from_day(day);
        let after = advance_watermark(cursor, None);
        assert!(!after.is_date());
        assert_eq!(after.to_snowflake(), cursor.to_snowflake());
    }

    #[test]
    fn report_summarizes_counts() {
        let outcome = |source: &str, state, fetched, kept| SourceOutcome {
            source: source.to_string(),
            state,
            pages: 1,
            fetched,
            kept,
            cursor_before: Cursor::Snowflake(1),
            cursor_after: Cursor::Snowflake(2),
            failure: None,
        };
        let report = CycleReport {
            outcomes: vec![
                outcome("a.example", SourceState::Exhausted, 10, 8),
                outcome("b.example", SourceState::Error, 0, 0),
            ],
        };
        assert_eq!(report.fetched(), 10);
        assert_eq!(report.kept(), 8);
        assert_eq!(report.failed(), 1);
        let text = report.to_string();
        assert!(text.contains("a.example"));
        assert!(text.contains("Kept:           8"));
        assert!(text.contains(&format!("cursor={} -> {}", Cursor::Snowflake(1), Cursor::Snowflake(2))));
    }

    #[test]
    fn default_options() {
        let options = CrawlOptions::default();
        assert_eq!(options.limit, 40);
        assert_eq!(options.max_records, None);
        assert_eq!(options.opt_out_tags.len(), OPT_OUT_TAGS.len());
    }
}
