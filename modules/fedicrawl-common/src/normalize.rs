//! Raw status / account / instance JSON → flat rows.
//!
//! Every accessor here goes through [`text_at`] and friends, which resolve a
//! JSON pointer and fall back to a fixed default when the attribute is absent.
//! Normalization of a single status only fails when the attributes that give
//! it an identity (`id`, `uri`, `account`) are missing.

use chrono::{DateTime, NaiveDateTime, Utc};
use scraper::{ElementRef, Html};
use serde_json::Value;
use tracing::warn;

use crate::error::NormalizeError;
use crate::record::{Account, Instance, Record};
use crate::types::RawStatus;

const OUTPUT_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

// --- Field access ---

/// Render a JSON scalar as text. Strings are unquoted, null is empty, and
/// nested values are serialized.
pub fn scalar(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Value at a JSON pointer (`"/account/note"`), treating null as absent.
pub fn field<'a>(value: &'a Value, pointer: &str) -> Option<&'a Value> {
    value.pointer(pointer).filter(|v| !v.is_null())
}

/// Text at a pointer, `""` when absent.
pub fn text_at(value: &Value, pointer: &str) -> String {
    field(value, pointer).map(scalar).unwrap_or_default()
}

/// Non-negative counter at a pointer, 0 when absent or malformed.
pub fn count_at(value: &Value, pointer: &str) -> u64 {
    field(value, pointer).and_then(as_count).unwrap_or(0)
}

/// Timestamp at a pointer in canonical form, `""` when absent.
pub fn timestamp_at(value: &Value, pointer: &str) -> String {
    match field(value, pointer) {
        Some(Value::String(raw)) => format_timestamp(raw),
        Some(other) => scalar(other),
        None => String::new(),
    }
}

/// JSON serialization of the value at a pointer, or `default` when absent.
pub fn json_at(value: &Value, pointer: &str, default: &str) -> String {
    field(value, pointer)
        .map(Value::to_string)
        .unwrap_or_else(|| default.to_string())
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn items<'a>(value: &'a Value, pointer: &str) -> &'a [Value] {
    field(value, pointer)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// One attribute across a collection, as a JSON array aligned with the source
/// order. Items missing the attribute contribute `""`.
fn column(items: &[Value], key: &str) -> String {
    let values: Vec<Value> = items
        .iter()
        .map(|item| {
            item.get(key)
                .cloned()
                .unwrap_or_else(|| Value::String(String::new()))
        })
        .collect();
    Value::Array(values).to_string()
}

// --- Scalar conversions ---

/// Reformat a timestamp as `YYYY-MM-DDTHH:MM:SS` (UTC). Anything that does
/// not parse is returned unchanged.
pub fn format_timestamp(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.with_timezone(&Utc).format(OUTPUT_TIME_FORMAT).to_string();
    }
    if let Ok(dt) = DateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return dt.with_timezone(&Utc).format(OUTPUT_TIME_FORMAT).to_string();
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, format) {
            return dt.format(OUTPUT_TIME_FORMAT).to_string();
        }
    }
    raw.to_string()
}

/// Plain text from status markup. `<p>` and `<br>` keep their content and are
/// followed by a newline; every other tag is dropped and entities decoded.
pub fn html_to_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::with_capacity(html.len());
    push_text(fragment.root_element(), &mut out);
    out
}

fn push_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            push_text(child_element, out);
            if matches!(child_element.value().name(), "p" | "br") {
                out.push('\n');
            }
        } else if let Some(text) = child.value().as_text() {
            out.push_str(text);
        }
    }
}

fn rich_text(raw: &str, parse_html: bool) -> String {
    if parse_html {
        html_to_text(raw)
    } else {
        raw.to_string()
    }
}

// --- Statuses ---

/// Normalize one raw status into a [`Record`].
pub fn normalize_status(
    raw: &RawStatus,
    source: Option<&str>,
    parse_html: bool,
) -> Result<Record, NormalizeError> {
    let v = raw.as_value();
    let id = raw.id().ok_or(NormalizeError::MissingField("id"))?;
    let uri = raw.uri().ok_or(NormalizeError::MissingField("uri"))?;
    let account = raw
        .account()
        .ok_or(NormalizeError::MissingField("account"))?;

    let media = items(v, "/media_attachments");
    let mentions = items(v, "/mentions");
    let tags = items(v, "/tags");
    let card = field(v, "/card").filter(|c| c.is_object());
    let poll = field(v, "/poll").filter(|p| p.is_object());

    let card_text = |key: &str| card.map(|c| text_at(c, key)).unwrap_or_default();
    let poll_text = |key: &str| poll.map(|p| text_at(p, key)).unwrap_or_default();
    let poll_options = items(poll.unwrap_or(&Value::Null), "/options");

    Ok(Record {
        id,
        created_at: timestamp_at(v, "/created_at"),
        edited_at: timestamp_at(v, "/edited_at"),
        content: rich_text(raw.content(), parse_html),
        reblog: text_at(v, "/reblog/uri"),
        sensitive: text_at(v, "/sensitive"),
        spoiler_text: text_at(v, "/spoiler_text"),
        visibility: text_at(v, "/visibility"),
        replies_count: count_at(v, "/replies_count"),
        reblogs_count: count_at(v, "/reblogs_count"),
        favourites_count: count_at(v, "/favourites_count"),
        language: text_at(v, "/language"),
        in_reply_to_id: text_at(v, "/in_reply_to_id"),
        in_reply_to_account_id: text_at(v, "/in_reply_to_account_id"),

        author_id: text_at(account, "/id"),
        author_name: text_at(account, "/display_name"),
        author_acct: text_at(account, "/acct"),
        author_locked: text_at(account, "/locked"),
        author_bot: text_at(account, "/bot"),
        author_discoverable: text_at(account, "/discoverable"),
        author_group: text_at(account, "/group"),
        author_created_at: timestamp_at(account, "/created_at"),
        author_note: text_at(account, "/note"),
        author_url: text_at(account, "/url"),
        author_avatar: text_at(account, "/avatar"),
        author_header: text_at(account, "/header"),
        author_followers_count: text_at(account, "/followers_count"),
        author_following_count: text_at(account, "/following_count"),
        author_statuses_count: text_at(account, "/statuses_count"),
        author_last_status_at: timestamp_at(account, "/last_status_at"),
        author_emojis: json_at(account, "/emojis", "[]"),
        author_fields: json_at(account, "/fields", "[]"),

        media_id: column(media, "id"),
        media_type: column(media, "type"),
        media_url: column(media, "url"),
        media_preview_url: column(media, "preview_url"),
        media_remote_url: column(media, "remote_url"),
        media_preview_remote_url: column(media, "preview_remote_url"),
        media_text_url: column(media, "text_url"),
        media_meta: column(media, "meta"),
        media_description: column(media, "description"),
        media_blurhash: column(media, "blurhash"),

        mentions_id: column(mentions, "id"),
        mentions_username: column(mentions, "username"),
        mentions_url: column(mentions, "url"),
        mentions_acct: column(mentions, "acct"),
        hashtags: column(tags, "name"),

        card_url: card_text("/url"),
        card_title: card_text("/title"),
        card_description: card_text("/description"),
        card_type: card_text("/type"),
        card_author_name: card_text("/author_name"),
        card_author_url: card_text("/author_url"),
        card_provider_name: card_text("/provider_name"),
        card_provider_url: card_text("/provider_url"),
        card_html: card_text("/html"),
        card_width: card_text("/width"),
        card_height: card_text("/height"),
        card_image: card_text("/image"),
        card_embed_url: card_text("/embed_url"),
        card_blurhash: card_text("/blurhash"),

        poll_id: poll_text("/id"),
        poll_expires_at: poll.map(|p| timestamp_at(p, "/expires_at")).unwrap_or_default(),
        poll_expired: poll_text("/expired"),
        poll_multiple: poll_text("/multiple"),
        poll_votes_count: poll_text("/votes_count"),
        poll_voters_count: poll_text("/voters_count"),
        poll_options: poll.map(|_| column(poll_options, "title")).unwrap_or_default(),
        poll_votes: poll
            .map(|_| column(poll_options, "votes_count"))
            .unwrap_or_default(),

        uri: uri.to_string(),
        url: text_at(v, "/url"),
        source: source.unwrap_or_default().to_string(),
        queried_at: timestamp_at(v, "/queried_at"),
    })
}

/// Result of normalizing a batch: the records that made it plus how many were
/// skipped as malformed.
#[derive(Debug, Default)]
pub struct NormalizedBatch {
    pub records: Vec<Record>,
    pub skipped: usize,
}

/// Normalize a batch, skipping (and logging) statuses that fail.
pub fn normalize_batch(
    raws: &[RawStatus],
    source: Option<&str>,
    parse_html: bool,
) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for raw in raws {
        match normalize_status(raw, source, parse_html) {
            Ok(record) => batch.records.push(record),
            Err(e) => {
                let status = raw.id().unwrap_or_else(|| "<no id>".to_string());
                warn!(
                    source = source.unwrap_or(""),
                    status = status.as_str(),
                    error = %e,
                    "Skipping malformed status"
                );
                batch.skipped += 1;
            }
        }
    }
    batch
}

// --- Accounts ---

pub fn normalize_account(raw: &Value, parse_html: bool) -> Result<Account, NormalizeError> {
    if field(raw, "/id").is_none() {
        return Err(NormalizeError::MissingField("id"));
    }
    let note = text_at(raw, "/note");

    Ok(Account {
        id: text_at(raw, "/id"),
        username: text_at(raw, "/username"),
        acct: text_at(raw, "/acct"),
        display_name: text_at(raw, "/display_name"),
        locked: text_at(raw, "/locked"),
        bot: text_at(raw, "/bot"),
        discoverable: text_at(raw, "/discoverable"),
        group: text_at(raw, "/group"),
        created_at: timestamp_at(raw, "/created_at"),
        note: rich_text(&note, parse_html),
        url: text_at(raw, "/url"),
        avatar: text_at(raw, "/avatar"),
        avatar_static: text_at(raw, "/avatar_static"),
        header: text_at(raw, "/header"),
        header_static: text_at(raw, "/header_static"),
        followers_count: text_at(raw, "/followers_count"),
        following_count: text_at(raw, "/following_count"),
        statuses_count: text_at(raw, "/statuses_count"),
        last_status_at: timestamp_at(raw, "/last_status_at"),
        emojis: json_at(raw, "/emojis", "[]"),
        fields: json_at(raw, "/fields", "[]"),
        queried_at: timestamp_at(raw, "/queried_at"),
    })
}

// --- Instances ---

/// Integer mean of one activity metric over every bucket but the first
/// (the current, still incomplete week). `""` without at least two buckets.
fn weekly_average(activity: &[Value], key: &str) -> String {
    let complete = activity.get(1..).unwrap_or(&[]);
    if complete.is_empty() {
        return String::new();
    }
    let sum: u64 = complete
        .iter()
        .map(|week| week.get(key).and_then(as_count).unwrap_or(0))
        .sum();
    (sum / complete.len() as u64).to_string()
}

/// Flatten an instance's self-description and weekly activity.
///
/// `info` and `activity` are independently optional: servers that hide their
/// activity endpoint still yield a row, and so do servers that could not be
/// reached at all (with `uri` falling back to the queried name).
pub fn normalize_instance(
    name: &str,
    info: Option<&Value>,
    activity: Option<&[Value]>,
    queried_at: DateTime<Utc>,
    parse_html: bool,
) -> Instance {
    let info = info.unwrap_or(&Value::Null);
    let activity = activity.unwrap_or(&[]);

    let uri = match text_at(info, "/uri") {
        uri if uri.is_empty() => name.to_string(),
        uri => uri,
    };

    Instance {
        uri,
        title: text_at(info, "/title"),
        short_description: rich_text(&text_at(info, "/short_description"), parse_html),
        description: rich_text(&text_at(info, "/description"), parse_html),
        email: text_at(info, "/email"),
        version: text_at(info, "/version"),
        user_count: text_at(info, "/stats/user_count"),
        status_count: text_at(info, "/stats/status_count"),
        domain_count: text_at(info, "/stats/domain_count"),
        weekly_statuses: weekly_average(activity, "statuses"),
        weekly_logins: weekly_average(activity, "logins"),
        weekly_registrations: weekly_average(activity, "registrations"),
        thumbnail: text_at(info, "/thumbnail"),
        languages: json_at(info, "/languages", ""),
        registrations: text_at(info, "/registrations"),
        approval_required: text_at(info, "/approval_required"),
        invites_enabled: text_at(info, "/invites_enabled"),
        max_characters: text_at(info, "/configuration/statuses/max_characters"),
        max_media_attachments: text_at(info, "/configuration/statuses/max_media_attachments"),
        max_poll_options: text_at(info, "/configuration/polls/max_options"),
        max_poll_characters_per_option: text_at(
            info,
            "/configuration/polls/max_characters_per_option",
        ),
        contact_account_url: text_at(info, "/contact_account/url"),
        rules: json_at(info, "/rules", ""),
        queried_at: queried_at.format(OUTPUT_TIME_FORMAT).to_string(),
    }
}
