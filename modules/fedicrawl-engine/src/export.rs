//! CSV and JSON writers.
//!
//! CSV output quotes every field and ends rows with `\n`. The header is the
//! fixed column list of the row type.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use fedicrawl_common::{
    normalize_batch, normalize_status, Account, Instance, Record, Timelines, ACCOUNT_COLUMNS,
    INSTANCE_COLUMNS, RECORD_COLUMNS,
};

use crate::aggregate::{aggregate, AggregatedRecord};
use crate::interactions::{interaction_rows, StatusInteractions, INTERACTION_COLUMNS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => bail!("unknown export format {other:?} (expected csv or json)"),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportFormat::Csv => f.write_str("csv"),
            ExportFormat::Json => f.write_str("json"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub format: ExportFormat,
    pub aggregate: bool,
    pub parse_html: bool,
    /// CSV only: add rows to an existing file instead of replacing it.
    pub append: bool,
}

#[derive(Debug, Default, PartialEq)]
pub struct ExportStats {
    pub rows: usize,
    /// Statuses dropped as malformed.
    pub skipped: usize,
}

impl fmt::Display for ExportStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rows written, {} skipped", self.rows, self.skipped)
    }
}

// --- CSV plumbing ---

fn csv_writer<W: Write>(sink: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(sink)
}

fn write_csv_rows<W: Write, T: Serialize>(
    sink: W,
    columns: &[&str],
    rows: &[T],
    header: bool,
) -> Result<()> {
    let mut writer = csv_writer(sink);
    if header {
        writer.write_record(columns)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Open `path` for appending and report whether it still needs a header
/// (it is new or empty).
fn open_for_append(path: &Path) -> Result<(File, bool)> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let empty = file.metadata()?.len() == 0;
    Ok((file, empty))
}

fn create(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}

pub fn write_records_csv<W: Write>(sink: W, records: &[Record]) -> Result<()> {
    write_csv_rows(sink, &RECORD_COLUMNS, records, true)
}

/// Append rows to `path`; the header is written only when the file is new or
/// empty.
pub fn append_records_csv(path: &Path, records: &[Record]) -> Result<()> {
    let (file, needs_header) = open_for_append(path)?;
    write_csv_rows(file, &RECORD_COLUMNS, records, needs_header)
        .with_context(|| format!("Failed to append to {}", path.display()))
}

pub fn write_instances_csv(path: &Path, instances: &[Instance], append: bool) -> Result<()> {
    let (file, header) = if append {
        open_for_append(path)?
    } else {
        (create(path)?, true)
    };
    write_csv_rows(file, &INSTANCE_COLUMNS, instances, header)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Account rows followed by `extra_columns`; each row carries its extra
/// cells in the same order.
pub fn write_accounts_csv(
    path: &Path,
    extra_columns: &[&str],
    rows: &[(Account, Vec<String>)],
) -> Result<()> {
    let mut writer = csv_writer(create(path)?);
    let mut header: Vec<&str> = ACCOUNT_COLUMNS.to_vec();
    header.extend_from_slice(extra_columns);
    writer.write_record(&header)?;

    for (account, extra) in rows {
        let mut cells = row_cells(account, &ACCOUNT_COLUMNS)?;
        cells.extend(extra.iter().cloned());
        writer.write_record(&cells)?;
    }
    writer.flush()?;
    Ok(())
}

/// Follower rows: the account columns plus the profile URL of the account
/// they follow.
pub fn write_followers_csv(path: &Path, followers: &[(Account, String)]) -> Result<()> {
    let rows: Vec<(Account, Vec<String>)> = followers
        .iter()
        .map(|(account, followed)| (account.clone(), vec![followed.clone()]))
        .collect();
    write_accounts_csv(path, &["followed_account"], &rows)
}

/// A row's cells in column order, as text.
fn row_cells<T: Serialize>(row: &T, columns: &[&str]) -> Result<Vec<String>> {
    let Value::Object(map) = serde_json::to_value(row)? else {
        bail!("row did not serialize to an object");
    };
    Ok(columns
        .iter()
        .map(|col| match map.get(*col) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
        .collect())
}

// --- Record export ---

/// Normalize merged timelines into rows. With `aggregate`, one row per `uri`
/// whose `source` cell lists every observing source.
pub fn timelines_to_records(
    timelines: &Timelines,
    aggregated: bool,
    parse_html: bool,
) -> (Vec<Record>, usize) {
    if aggregated {
        return aggregated_to_records(&aggregate(timelines), parse_html);
    }

    let mut records = Vec::new();
    let mut skipped = 0;
    for (source, raws) in timelines {
        let batch = normalize_batch(raws, Some(source), parse_html);
        records.extend(batch.records);
        skipped += batch.skipped;
    }
    (records, skipped)
}

fn aggregated_to_records(aggregated: &[AggregatedRecord], parse_html: bool) -> (Vec<Record>, usize) {
    let mut records = Vec::with_capacity(aggregated.len());
    let mut skipped = 0;
    for agg in aggregated {
        match normalize_status(&agg.record, None, parse_html) {
            Ok(mut record) => {
                record.source = agg.sources_json();
                records.push(record);
            }
            Err(e) => {
                let uri = agg.record.uri().unwrap_or_default();
                tracing::warn!(uri, error = %e, "Skipping malformed status");
                skipped += 1;
            }
        }
    }
    (records, skipped)
}

/// The structured export document.
pub fn timelines_to_json(timelines: &Timelines, aggregated: bool) -> Result<Value> {
    if !aggregated {
        return Ok(serde_json::to_value(timelines)?);
    }
    let docs = aggregate(timelines)
        .into_iter()
        .map(|agg| {
            let mut value = agg.record.into_value();
            if let Value::Object(map) = &mut value {
                map.insert("sources".to_string(), Value::from(agg.sources));
            }
            value
        })
        .collect();
    Ok(Value::Array(docs))
}

/// Export merged timelines to `out`.
pub fn export_timelines(timelines: &Timelines, out: &Path, options: &ExportOptions) -> Result<ExportStats> {
    let stats = match options.format {
        ExportFormat::Csv => {
            let (records, skipped) =
                timelines_to_records(timelines, options.aggregate, options.parse_html);
            if options.append {
                append_records_csv(out, &records)?;
            } else {
                write_records_csv(create(out)?, &records)
                    .with_context(|| format!("Failed to write {}", out.display()))?;
            }
            ExportStats {
                rows: records.len(),
                skipped,
            }
        }
        ExportFormat::Json => {
            let doc = timelines_to_json(timelines, options.aggregate)?;
            let rows = match &doc {
                Value::Array(items) => items.len(),
                _ => timelines.values().map(Vec::len).sum(),
            };
            let file = create(out)?;
            serde_json::to_writer(file, &doc)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            ExportStats { rows, skipped: 0 }
        }
    };

    info!(
        path = %out.display(),
        format = %options.format,
        aggregate = options.aggregate,
        rows = stats.rows,
        skipped = stats.skipped,
        "Export complete"
    );
    Ok(stats)
}

// --- Interaction export ---

/// Write gathered interactions: one edge per row as CSV, or the full
/// per-status documents as JSON.
pub fn export_interactions(
    found: &[StatusInteractions],
    out: &Path,
    format: ExportFormat,
    parse_html: bool,
) -> Result<ExportStats> {
    let stats = match format {
        ExportFormat::Csv => {
            let rows = interaction_rows(found, parse_html);
            write_csv_rows(create(out)?, &INTERACTION_COLUMNS, &rows, true)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            ExportStats {
                rows: rows.len(),
                skipped: found.iter().filter(|f| f.status.is_none()).count(),
            }
        }
        ExportFormat::Json => {
            serde_json::to_writer(create(out)?, found)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            ExportStats {
                rows: found.len(),
                skipped: 0,
            }
        }
    };

    info!(
        path = %out.display(),
        format = %format,
        rows = stats.rows,
        skipped = stats.skipped,
        "Interaction export complete"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedicrawl_common::RawStatus;
    use serde_json::json;

    fn raw(id: &str, uri: &str, favourites: u64) -> RawStatus {
        RawStatus::new(json!({
            "id": id,
            "uri": uri,
            "content": "<p>hi</p>",
            "favourites_count": favourites,
            "account": {"id": "1", "acct": "alice"}
        }))
    }

    fn timelines() -> Timelines {
        let mut t = Timelines::new();
        t.insert("a.example".into(), vec![raw("1", "X", 1), raw("2", "Y", 0)]);
        t.insert("b.example".into(), vec![raw("9", "X", 5)]);
        t
    }

    #[test]
    fn csv_header_is_the_column_list_fully_quoted() {
        let mut buf = Vec::new();
        write_records_csv(&mut buf, &[]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let expected: Vec<String> = RECORD_COLUMNS.iter().map(|c| format!("\"{c}\"")).collect();
        assert_eq!(text, format!("{}\n", expected.join(",")));
    }

    #[test]
    fn csv_rows_follow_column_order() {
        let record = Record {
            id: "1".into(),
            replies_count: 3,
            uri: "X".into(),
            ..Default::default()
        };
        let mut buf = Vec::new();
        write_records_csv(&mut buf, &[record]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let row = text.lines().nth(1).unwrap();
        let cells: Vec<&str> = row.split(',').collect();
        assert_eq!(cells.len(), RECORD_COLUMNS.len());
        assert_eq!(cells[0], "\"1\"");
        let replies = RECORD_COLUMNS.iter().position(|c| *c == "replies_count").unwrap();
        assert_eq!(cells[replies], "\"3\"");
        let uri = RECORD_COLUMNS.iter().position(|c| *c == "uri").unwrap();
        assert_eq!(cells[uri], "\"X\"");
    }

    #[test]
    fn append_writes_header_only_into_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        std::fs::write(&path, "").unwrap();

        let record = Record {
            id: "1".into(),
            ..Default::default()
        };
        append_records_csv(&path, &[record.clone()]).unwrap();
        append_records_csv(&path, &[record]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(text.matches("\"created_at\"").count(), 1);
    }

    #[test]
    fn append_to_missing_file_creates_it_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("new.csv");
        append_records_csv(&path, &[Record::default()]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("\"id\",\"created_at\""));
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn aggregated_rows_carry_source_lists() {
        let (records, skipped) = timelines_to_records(&timelines(), true, true);
        assert_eq!(skipped, 0);
        assert_eq!(records.len(), 2);
        let x = records.iter().find(|r| r.uri == "X").unwrap();
        assert_eq!(x.id, "X");
        assert_eq!(x.favourites_count, 5);
        assert_eq!(x.source, r#"["a.example","b.example"]"#);
        assert_eq!(x.content, "hi\n");
    }

    #[test]
    fn plain_rows_carry_their_source_name() {
        let (records, _) = timelines_to_records(&timelines(), false, false);
        assert_eq!(records.len(), 3);
        assert!(records.iter().any(|r| r.source == "b.example" && r.id == "9"));
    }

    #[test]
    fn json_export_shapes() {
        let grouped = timelines_to_json(&timelines(), false).unwrap();
        assert_eq!(grouped["a.example"].as_array().unwrap().len(), 2);

        let aggregated = timelines_to_json(&timelines(), true).unwrap();
        let items = aggregated.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["sources"], json!(["a.example", "b.example"]));
        assert_eq!(items[0]["id"], json!("X"));
    }

    #[test]
    fn followers_csv_has_extra_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("followers.csv");
        let account = Account {
            id: "5".into(),
            acct: "bob@b.example".into(),
            ..Default::default()
        };
        write_followers_csv(&path, &[(account, "https://a.example/@alice".into())]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().ends_with("\"followed_account\""));
        let row = lines.next().unwrap();
        assert!(row.starts_with("\"5\""));
        assert!(row.ends_with("\"https://a.example/@alice\""));
    }

    #[test]
    fn accounts_csv_appends_extra_columns_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts.csv");
        let account = Account {
            id: "5".into(),
            ..Default::default()
        };
        let extra = vec!["reblog".to_string(), "https://a.example/1".to_string()];
        write_accounts_csv(&path, &["interaction", "status_uri"], &[(account, extra)]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().ends_with("\"interaction\",\"status_uri\""));
        assert!(lines.next().unwrap().ends_with("\"reblog\",\"https://a.example/1\""));
    }

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("CSV".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert!("xml".parse::<ExportFormat>().is_err());
    }
}
