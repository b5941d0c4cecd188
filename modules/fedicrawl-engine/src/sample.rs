//! Sampling crawl: fixed-size chunks of the public timeline at regular points
//! in a date range, paging backwards from each point.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use fedicrawl_common::cursor::{date_to_snowflake, start_of_day};
use fedicrawl_common::{ConfigError, RawStatus, Timelines};

use crate::driver::{write_timelines, CrawlOptions};
use crate::filter::RecordFilter;
use crate::traits::{SourceClient, SourceFailure, Timeline};

/// One sampling window, `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Split `[start, end)` into windows of `days` days; the last one may be
/// shorter. Empty when the range is empty or `days` is 0.
pub fn date_windows(start: NaiveDate, end: NaiveDate, days: u32) -> Vec<DateWindow> {
    let (start, end) = (start_of_day(start), start_of_day(end));
    if days == 0 || start >= end {
        return Vec::new();
    }
    let step = Duration::days(i64::from(days));
    let mut windows = Vec::new();
    let mut from = start;
    while from < end {
        let to = (from + step).min(end);
        windows.push(DateWindow { from, to });
        from = to;
    }
    windows
}

#[derive(Debug, Clone)]
pub struct SampleRequest {
    pub sources: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub days_between: u32,
    /// Records kept per source per window.
    pub chunk_size: usize,
    pub filter: Option<String>,
    pub local_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub source: String,
    pub windows: usize,
    pub fetched: usize,
    pub kept: usize,
    pub failure: Option<SourceFailure>,
}

#[derive(Debug, Default)]
pub struct SampleReport {
    pub outcomes: Vec<SampleOutcome>,
    pub output: Option<PathBuf>,
}

impl fmt::Display for SampleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Sample ===")?;
        for o in &self.outcomes {
            write!(f, "  {:<30} windows={} fetched={} kept={}", o.source, o.windows, o.fetched, o.kept)?;
            match &o.failure {
                Some(failure) => writeln!(f, " (stopped: {failure})")?,
                None => writeln!(f)?,
            }
        }
        Ok(())
    }
}

/// Page backwards from the end of `window` until `chunk_size` records were
/// fetched or paging passes the window start.
async fn sample_window(
    client: &dyn SourceClient,
    source: &str,
    window: DateWindow,
    chunk_size: usize,
    options: &CrawlOptions,
    local_only: bool,
) -> Result<Vec<RawStatus>, SourceFailure> {
    let floor = date_to_snowflake(window.from);
    let limit = options.limit.min(chunk_size.max(1) as u32);
    let mut page = client
        .fetch_page_before(source, &Timeline::Public, date_to_snowflake(window.to), limit, local_only)
        .await?;
    let mut chunk = Vec::new();

    loop {
        let full = page.len() >= limit as usize;
        let mut reached_start = false;
        let queried_at = Utc::now();
        for mut record in std::mem::take(&mut page.records) {
            if record.snowflake().is_some_and(|id| id < floor) {
                reached_start = true;
                continue;
            }
            if chunk.len() >= chunk_size {
                break;
            }
            record.stamp_queried_at(queried_at);
            chunk.push(record);
        }
        if !full || reached_start || chunk.len() >= chunk_size || page.next.is_none() {
            return Ok(chunk);
        }
        page = client.fetch_page_next(source, &page).await?;
    }
}

async fn sample_source(
    client: &dyn SourceClient,
    source: &str,
    windows: &[DateWindow],
    request: &SampleRequest,
    filter: &RecordFilter,
    options: &CrawlOptions,
    cancel: &AtomicBool,
) -> (SampleOutcome, Vec<RawStatus>) {
    let mut outcome = SampleOutcome {
        source: source.to_string(),
        windows: 0,
        fetched: 0,
        kept: 0,
        failure: None,
    };
    let mut kept = Vec::new();

    for window in windows {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        match sample_window(client, source, *window, request.chunk_size, options, request.local_only).await {
            Ok(chunk) => {
                outcome.windows += 1;
                outcome.fetched += chunk.len();
                kept.extend(chunk.into_iter().filter(|r| filter.accepts(r)));
                info!(
                    source,
                    from = %window.from.format("%Y-%m-%d"),
                    to = %window.to.format("%Y-%m-%d"),
                    total = kept.len(),
                    "Sampled window"
                );
            }
            Err(failure) => {
                warn!(source, error = %failure, "Sampling failed, skipping remaining windows");
                outcome.failure = Some(failure);
                break;
            }
        }
    }
    outcome.kept = kept.len();
    (outcome, kept)
}

/// Sample every source over the requested range and write one timelines file
/// into `data_dir`.
pub async fn run_sample(
    data_dir: &Path,
    request: &SampleRequest,
    client: &dyn SourceClient,
    options: &CrawlOptions,
    cancel: &AtomicBool,
) -> Result<SampleReport> {
    if request.sources.is_empty() {
        return Err(ConfigError::Missing("source list").into());
    }
    if request.chunk_size == 0 {
        return Err(ConfigError::Invalid {
            key: "chunk size",
            value: "0".to_string(),
        }
        .into());
    }
    let windows = date_windows(request.start, request.end, request.days_between);
    if windows.is_empty() {
        return Err(ConfigError::Invalid {
            key: "date range",
            value: format!("{}..{} every {} days", request.start, request.end, request.days_between),
        }
        .into());
    }
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create {}", data_dir.display()))?;

    let filter = RecordFilter::new(request.filter.as_deref()).with_opt_out_tags(&options.opt_out_tags);
    let results: Vec<(SampleOutcome, Vec<RawStatus>)> = stream::iter(request.sources.iter().map(|source| {
        sample_source(client, source, &windows, request, &filter, options, cancel)
    }))
    .buffer_unordered(options.concurrency.max(1))
    .collect()
    .await;

    let mut report = SampleReport::default();
    let mut timelines = Timelines::new();
    for (outcome, records) in results {
        if !records.is_empty() {
            timelines.insert(outcome.source.clone(), records);
        }
        report.outcomes.push(outcome);
    }
    report.outcomes.sort_by(|a, b| a.source.cmp(&b.source));

    if !timelines.is_empty() {
        report.output = Some(write_timelines(data_dir, &timelines)?);
    }
    info!("{report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn windows_cover_the_range_and_clip_the_last() {
        let w = date_windows(day(2023, 1, 1), day(2023, 1, 8), 3);
        assert_eq!(w.len(), 3);
        assert_eq!(w[0].from, start_of_day(day(2023, 1, 1)));
        assert_eq!(w[0].to, start_of_day(day(2023, 1, 4)));
        assert_eq!(w[2].from, start_of_day(day(2023, 1, 7)));
        assert_eq!(w[2].to, start_of_day(day(2023, 1, 8)));
    }

    #[test]
    fn degenerate_ranges_are_empty() {
        assert!(date_windows(day(2023, 1, 8), day(2023, 1, 1), 1).is_empty());
        assert!(date_windows(day(2023, 1, 1), day(2023, 1, 1), 1).is_empty());
        assert!(date_windows(day(2023, 1, 1), day(2023, 2, 1), 0).is_empty());
    }
}
