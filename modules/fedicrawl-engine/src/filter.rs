//! Post-fetch record filters.
//!
//! Timelines have no server-side support for either check, so both run on
//! records after they are fetched.

use regex::Regex;

use fedicrawl_common::RawStatus;

/// Profile hashtags by which an author opts out of being collected.
pub const OPT_OUT_TAGS: [&str; 4] = ["nosearch", "nobots", "noindex", "nobot"];

#[derive(Debug, Clone)]
pub struct RecordFilter {
    content: Option<String>,
    opt_out: Option<Regex>,
}

impl Default for RecordFilter {
    fn default() -> Self {
        Self::new(None)
    }
}

impl RecordFilter {
    /// Filter with the default opt-out tags and an optional literal
    /// `content` substring.
    pub fn new(content: Option<&str>) -> Self {
        Self {
            content: content.filter(|c| !c.is_empty()).map(str::to_string),
            opt_out: opt_out_pattern(&OPT_OUT_TAGS),
        }
    }

    pub fn with_opt_out_tags<S: AsRef<str>>(mut self, tags: &[S]) -> Self {
        self.opt_out = opt_out_pattern(tags);
        self
    }

    pub fn accepts(&self, record: &RawStatus) -> bool {
        self.matches_content(record) && !self.opted_out(record)
    }

    pub fn matches_content(&self, record: &RawStatus) -> bool {
        match &self.content {
            Some(needle) => record.content().contains(needle.as_str()),
            None => true,
        }
    }

    /// True when the author's profile note carries an opt-out hashtag, either
    /// as rendered markup (`#<span>nobot</span>`) or as plain text.
    pub fn opted_out(&self, record: &RawStatus) -> bool {
        let note = record.author_note();
        match &self.opt_out {
            Some(re) if !note.is_empty() => re.is_match(note),
            _ => false,
        }
    }
}

fn opt_out_pattern<S: AsRef<str>>(tags: &[S]) -> Option<Regex> {
    let alternatives: Vec<String> = tags
        .iter()
        .map(|t| t.as_ref().trim().trim_start_matches('#'))
        .filter(|t| !t.is_empty())
        .map(regex::escape)
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    let pattern = format!(r"(?i)#(?:<span>)?(?:{})(?:</span>|\b)", alternatives.join("|"));
    Regex::new(&pattern).ok()
}
