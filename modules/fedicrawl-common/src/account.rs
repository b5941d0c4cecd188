use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static PROFILE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://([^/]+)/@([^/?#]+)").expect("valid regex"));

/// Canonical `name@domain` handle for an account object.
///
/// Remote accounts already carry `acct = "name@domain"`; local ones only have
/// `acct = "name"`, so the domain is recovered from the profile URL. When the
/// URL is not a `https://<domain>/@<name>` profile link the raw URL is returned.
/// Never fails.
pub fn acct_to_string(account: &Value) -> String {
    let acct = account.get("acct").and_then(Value::as_str);
    if let Some(acct) = acct.filter(|a| a.contains('@')) {
        return acct.to_string();
    }

    match account.get("url").and_then(Value::as_str) {
        Some(url) => match PROFILE_URL_RE.captures(url) {
            Some(caps) => format!("{}@{}", &caps[2], &caps[1]),
            None => url.to_string(),
        },
        None => acct.unwrap_or_default().to_string(),
    }
}

/// Home domain of an account, when its canonical handle has one.
pub fn acct_domain(account: &Value) -> Option<String> {
    let handle = acct_to_string(account);
    let (_, domain) = handle.rsplit_once('@')?;
    (!domain.is_empty() && !domain.contains('/')).then(|| domain.to_lowercase())
}
