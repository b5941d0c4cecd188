//! Cross-source deduplication.
//!
//! The same post federates to many sources, each with its own local `id` but
//! the same origin `uri`. Aggregation keeps one canonical observation per
//! `uri` and remembers every source that served it.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use fedicrawl_common::{RawStatus, Timelines};

use crate::state::STATE_FILE;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecord {
    /// Most-engaged observation, re-keyed so that `id == uri`.
    pub record: RawStatus,
    /// Distinct observing sources, in first-observation order.
    pub sources: Vec<String>,
}

impl AggregatedRecord {
    /// The source list as a JSON array, the form used in flat exports.
    pub fn sources_json(&self) -> String {
        serde_json::Value::from(self.sources.clone()).to_string()
    }
}

struct Group<'a> {
    canonical: &'a RawStatus,
    engagement: u64,
    sources: Vec<&'a str>,
}

/// Aggregate per-source record sets, visiting sources in key order.
pub fn aggregate(timelines: &Timelines) -> Vec<AggregatedRecord> {
    aggregate_observations(
        timelines
            .iter()
            .flat_map(|(source, records)| records.iter().map(move |r| (source.as_str(), r))),
    )
}

/// Aggregate `(source, record)` observations in the order given.
///
/// The canonical record for a `uri` is the one with the highest
/// replies + reblogs + favourites. Equal sums keep whichever was seen first.
pub fn aggregate_observations<'a>(
    observations: impl IntoIterator<Item = (&'a str, &'a RawStatus)>,
) -> Vec<AggregatedRecord> {
    let mut index: HashMap<&'a str, usize> = HashMap::new();
    let mut groups: Vec<Group<'a>> = Vec::new();

    for (source, record) in observations {
        let Some(uri) = record.uri() else {
            let status = record.id().unwrap_or_default();
            warn!(source, status = status.as_str(), "Skipping status without uri");
            continue;
        };
        let engagement = record.engagement();

        match index.get(uri) {
            Some(&i) => {
                let group = &mut groups[i];
                if engagement > group.engagement {
                    group.canonical = record;
                    group.engagement = engagement;
                }
                if !group.sources.contains(&source) {
                    group.sources.push(source);
                }
            }
            None => {
                index.insert(uri, groups.len());
                groups.push(Group {
                    canonical: record,
                    engagement,
                    sources: vec![source],
                });
            }
        }
    }

    debug!(unique = groups.len(), "Aggregated statuses");
    groups
        .into_iter()
        .map(|group| {
            let mut record = group.canonical.clone();
            if let Some(uri) = group.canonical.uri() {
                record.set_id(uri);
            }
            AggregatedRecord {
                record,
                sources: group.sources.into_iter().map(str::to_string).collect(),
            }
        })
        .collect()
}

// --- Merging timelines files ---

/// A timelines document as written to disk. Sources that failed may map to
/// `null` in files produced by older runs.
type TimelinesDocument = BTreeMap<String, Option<Vec<RawStatus>>>;

/// Merge documents by source key, concatenating in document order.
pub fn merge_timelines(docs: impl IntoIterator<Item = Timelines>) -> Timelines {
    let mut merged = Timelines::new();
    for doc in docs {
        for (source, records) in doc {
            merged.entry(source).or_default().extend(records);
        }
    }
    merged
}

/// Parse one timelines document, dropping `null` lists.
pub fn parse_timelines(content: &str) -> serde_json::Result<Timelines> {
    let doc: TimelinesDocument = serde_json::from_str(content)?;
    Ok(doc
        .into_iter()
        .filter_map(|(source, records)| records.map(|r| (source, r)))
        .collect())
}

/// Merge every timelines file in a job directory, oldest file first.
/// The state file and dotfiles are ignored; unparseable files are logged and
/// skipped.
pub fn merge_timeline_files(dir: &Path) -> Result<Timelines> {
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            path.is_file()
                && name.ends_with(".json")
                && name != STATE_FILE
                && !name.starts_with('.')
        })
        .collect();
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in &paths {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match parse_timelines(&content) {
            Ok(doc) => docs.push(doc),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable timelines file"),
        }
    }
    debug!(files = docs.len(), dir = %dir.display(), "Merging timelines files");
    Ok(merge_timelines(docs))
}
