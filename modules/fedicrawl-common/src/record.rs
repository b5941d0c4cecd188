//! Flat output shapes. Field order is column order.

use serde::{Deserialize, Serialize};

/// Bumped whenever `RECORD_COLUMNS` changes shape or order.
pub const RECORD_COLUMNS_VERSION: u32 = 1;

pub const RECORD_COLUMNS: [&str; 73] = [
    "id",
    "created_at",
    "edited_at",
    "content",
    "reblog",
    "sensitive",
    "spoiler_text",
    "visibility",
    "replies_count",
    "reblogs_count",
    "favourites_count",
    "language",
    "in_reply_to_id",
    "in_reply_to_account_id",
    "author_id",
    "author_name",
    "author_acct",
    "author_locked",
    "author_bot",
    "author_discoverable",
    "author_group",
    "author_created_at",
    "author_note",
    "author_url",
    "author_avatar",
    "author_header",
    "author_followers_count",
    "author_following_count",
    "author_statuses_count",
    "author_last_status_at",
    "author_emojis",
    "author_fields",
    "media_id",
    "media_type",
    "media_url",
    "media_preview_url",
    "media_remote_url",
    "media_preview_remote_url",
    "media_text_url",
    "media_meta",
    "media_description",
    "media_blurhash",
    "mentions_id",
    "mentions_username",
    "mentions_url",
    "mentions_acct",
    "hashtags",
    "card_url",
    "card_title",
    "card_description",
    "card_type",
    "card_author_name",
    "card_author_url",
    "card_provider_name",
    "card_provider_url",
    "card_html",
    "card_width",
    "card_height",
    "card_image",
    "card_embed_url",
    "card_blurhash",
    "poll_id",
    "poll_expires_at",
    "poll_expired",
    "poll_multiple",
    "poll_votes_count",
    "poll_voters_count",
    "poll_options",
    "poll_votes",
    "uri",
    "url",
    "source",
    "queried_at",
];

/// One normalized status. Every column is always present: scalars are
/// rendered to text, absent optional values are `""`, and nested collections
/// are JSON arrays (`[]` when empty).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub created_at: String,
    pub edited_at: String,
    pub content: String,
    /// URI of the reblogged status, `""` for original posts.
    pub reblog: String,
    pub sensitive: String,
    pub spoiler_text: String,
    pub visibility: String,
    pub replies_count: u64,
    pub reblogs_count: u64,
    pub favourites_count: u64,
    pub language: String,
    pub in_reply_to_id: String,
    pub in_reply_to_account_id: String,

    pub author_id: String,
    pub author_name: String,
    pub author_acct: String,
    pub author_locked: String,
    pub author_bot: String,
    pub author_discoverable: String,
    pub author_group: String,
    pub author_created_at: String,
    pub author_note: String,
    pub author_url: String,
    pub author_avatar: String,
    pub author_header: String,
    pub author_followers_count: String,
    pub author_following_count: String,
    pub author_statuses_count: String,
    pub author_last_status_at: String,
    pub author_emojis: String,
    pub author_fields: String,

    pub media_id: String,
    pub media_type: String,
    pub media_url: String,
    pub media_preview_url: String,
    pub media_remote_url: String,
    pub media_preview_remote_url: String,
    pub media_text_url: String,
    pub media_meta: String,
    pub media_description: String,
    pub media_blurhash: String,

    pub mentions_id: String,
    pub mentions_username: String,
    pub mentions_url: String,
    pub mentions_acct: String,
    pub hashtags: String,

    pub card_url: String,
    pub card_title: String,
    pub card_description: String,
    pub card_type: String,
    pub card_author_name: String,
    pub card_author_url: String,
    pub card_provider_name: String,
    pub card_provider_url: String,
    pub card_html: String,
    pub card_width: String,
    pub card_height: String,
    pub card_image: String,
    pub card_embed_url: String,
    pub card_blurhash: String,

    pub poll_id: String,
    pub poll_expires_at: String,
    pub poll_expired: String,
    pub poll_multiple: String,
    pub poll_votes_count: String,
    pub poll_voters_count: String,
    pub poll_options: String,
    pub poll_votes: String,

    pub uri: String,
    pub url: String,
    /// Serving source, or a JSON array of sources for aggregated output.
    pub source: String,
    pub queried_at: String,
}

pub const ACCOUNT_COLUMNS: [&str; 22] = [
    "id",
    "username",
    "acct",
    "display_name",
    "locked",
    "bot",
    "discoverable",
    "group",
    "created_at",
    "note",
    "url",
    "avatar",
    "avatar_static",
    "header",
    "header_static",
    "followers_count",
    "following_count",
    "statuses_count",
    "last_status_at",
    "emojis",
    "fields",
    "queried_at",
];

/// A profile snapshot. Repeated fetches of the same account are separate rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub username: String,
    pub acct: String,
    pub display_name: String,
    pub locked: String,
    pub bot: String,
    pub discoverable: String,
    pub group: String,
    pub created_at: String,
    pub note: String,
    pub url: String,
    pub avatar: String,
    pub avatar_static: String,
    pub header: String,
    pub header_static: String,
    pub followers_count: String,
    pub following_count: String,
    pub statuses_count: String,
    pub last_status_at: String,
    pub emojis: String,
    pub fields: String,
    pub queried_at: String,
}

pub const INSTANCE_COLUMNS: [&str; 24] = [
    "uri",
    "title",
    "short_description",
    "description",
    "email",
    "version",
    "user_count",
    "status_count",
    "domain_count",
    "weekly_statuses",
    "weekly_logins",
    "weekly_registrations",
    "thumbnail",
    "languages",
    "registrations",
    "approval_required",
    "invites_enabled",
    "max_characters",
    "max_media_attachments",
    "max_poll_options",
    "max_poll_characters_per_option",
    "contact_account_url",
    "rules",
    "queried_at",
];

/// A source's self-reported metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub uri: String,
    pub title: String,
    pub short_description: String,
    pub description: String,
    pub email: String,
    pub version: String,
    pub user_count: String,
    pub status_count: String,
    pub domain_count: String,
    /// Mean over all complete weeks of activity, excluding the current one.
    pub weekly_statuses: String,
    pub weekly_logins: String,
    pub weekly_registrations: String,
    pub thumbnail: String,
    pub languages: String,
    pub registrations: String,
    pub approval_required: String,
    pub invites_enabled: String,
    pub max_characters: String,
    pub max_media_attachments: String,
    pub max_poll_options: String,
    pub max_poll_characters_per_option: String,
    pub contact_account_url: String,
    pub rules: String,
    pub queried_at: String,
}
