use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, ConfigResult};

const DEFAULT_USER_AGENT: &str = concat!("fedicrawl/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONCURRENCY: usize = 8;

// --- Credentials ---

/// Access tokens keyed by instance domain.
///
/// Passed explicitly to whatever builds source clients; nothing reads tokens
/// from ambient state. Instances without a token are queried anonymously.
#[derive(Clone, Default)]
pub struct Credentials {
    tokens: HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CredentialsFile {
    #[serde(default)]
    tokens: HashMap<String, String>,
}

impl Credentials {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a credentials document:
    ///
    /// ```toml
    /// [tokens]
    /// "mastodon.social" = "..."
    /// ```
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let file: CredentialsFile = toml::from_str(content)?;
        Ok(file
            .tokens
            .into_iter()
            .fold(Self::empty(), |creds, (instance, token)| {
                creds.with_token(&instance, &token)
            }))
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn with_token(mut self, instance: &str, token: &str) -> Self {
        self.tokens
            .insert(instance.trim().to_lowercase(), token.trim().to_string());
        self
    }

    pub fn token_for(&self, instance: &str) -> Option<&str> {
        self.tokens
            .get(&instance.trim().to_lowercase())
            .map(String::as_str)
            .filter(|t| !t.is_empty())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut instances: Vec<&str> = self.tokens.keys().map(String::as_str).collect();
        instances.sort_unstable();
        f.debug_struct("Credentials")
            .field("instances", &instances)
            .finish()
    }
}

// --- Process settings ---

/// Settings read from the environment (and `.env`, when present).
#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub user_agent: String,
    pub request_timeout: Duration,
    /// Sources crawled at the same time.
    pub concurrency: usize,
    pub credentials_path: Option<PathBuf>,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            concurrency: DEFAULT_CONCURRENCY,
            credentials_path: None,
        }
    }
}

impl CrawlSettings {
    pub fn from_env() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<Self> {
        let defaults = Self::default();

        let request_timeout = match lookup("FEDICRAWL_REQUEST_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("FEDICRAWL_REQUEST_TIMEOUT_SECS", &raw)?),
            None => defaults.request_timeout,
        };
        let concurrency = match lookup("FEDICRAWL_CONCURRENCY") {
            Some(raw) => parse_positive("FEDICRAWL_CONCURRENCY", &raw)? as usize,
            None => defaults.concurrency,
        };

        let settings = Self {
            user_agent: lookup("FEDICRAWL_USER_AGENT")
                .filter(|ua| !ua.trim().is_empty())
                .unwrap_or(defaults.user_agent),
            request_timeout,
            concurrency,
            credentials_path: lookup("FEDICRAWL_CREDENTIALS")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        };
        settings.log_settings();
        Ok(settings)
    }

    /// Credentials from `FEDICRAWL_CREDENTIALS`, or none when unset.
    pub fn load_credentials(&self) -> ConfigResult<Credentials> {
        match &self.credentials_path {
            Some(path) => Credentials::load(path),
            None => Ok(Credentials::empty()),
        }
    }

    fn log_settings(&self) {
        tracing::debug!(
            user_agent = %self.user_agent,
            timeout_secs = self.request_timeout.as_secs(),
            concurrency = self.concurrency,
            credentials = %self
                .credentials_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<not set>".to_string()),
            "Crawl settings loaded"
        );
    }
}

fn parse_positive(key: &'static str, raw: &str) -> ConfigResult<u64> {
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn tokens_are_keyed_case_insensitively() {
        let creds = Credentials::from_toml_str(
            r#"
            [tokens]
            "Mastodon.Social" = "abc"
            "empty.example" = ""
            "#,
        )
        .unwrap();
        assert_eq!(creds.token_for("mastodon.social"), Some("abc"));
        assert_eq!(creds.token_for("empty.example"), None);
        assert_eq!(creds.token_for("other.example"), None);
    }

    #[test]
    fn debug_output_never_shows_tokens() {
        let creds = Credentials::empty().with_token("a.example", "s3cret");
        let shown = format!("{creds:?}");
        assert!(shown.contains("a.example"));
        assert!(!shown.contains("s3cret"));
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        assert!(Credentials::from_toml_str("[token]\nx = \"y\"").is_err());
    }

    #[test]
    fn settings_default_when_unset() {
        let s = CrawlSettings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(s.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(s.request_timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(s.user_agent.starts_with("fedicrawl/"));
        assert!(s.load_credentials().unwrap().is_empty());
    }

    #[test]
    fn settings_read_overrides_and_reject_garbage() {
        let s = CrawlSettings::from_lookup(lookup(&[
            ("FEDICRAWL_CONCURRENCY", "3"),
            ("FEDICRAWL_USER_AGENT", "research-bot/1.0"),
        ]))
        .unwrap();
        assert_eq!(s.concurrency, 3);
        assert_eq!(s.user_agent, "research-bot/1.0");

        let err = CrawlSettings::from_lookup(lookup(&[("FEDICRAWL_CONCURRENCY", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "FEDICRAWL_CONCURRENCY", .. }));
    }

    #[test]
    fn credentials_file_is_loaded_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.toml");
        std::fs::write(&path, "[tokens]\n\"a.example\" = \"t\"\n").unwrap();

        let s = CrawlSettings::from_lookup(lookup(&[(
            "FEDICRAWL_CREDENTIALS",
            path.to_str().unwrap(),
        )]))
        .unwrap();
        assert_eq!(s.load_credentials().unwrap().token_for("a.example"), Some("t"));
    }
}
