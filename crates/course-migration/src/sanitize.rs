//! Helpers for sanitizing data before it enters logs, events, or stored
//! error messages.
//!
//! The notifier URL carries the web-service token as a query parameter; it
//! must never be written anywhere in clear text.

use std::sync::LazyLock;

use regex::Regex;

/// Placeholder substituted for redacted values.
pub const REDACTED: &str = "XXX";

/// Query parameter carrying the web-service token.
pub const TOKEN_PARAM: &str = "wstoken";

static RE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([?&]wstoken=)[^&#\s]*").unwrap());

/// Replaces the value of every `wstoken=` query parameter with [`REDACTED`].
///
/// - `https://h/ws?wstoken=abc&x=1` → `https://h/ws?wstoken=XXX&x=1`
/// - `https://h/ws?x=1&wstoken=abc` → `https://h/ws?x=1&wstoken=XXX`
/// - URLs without the parameter are returned unchanged.
pub fn redact_token(text: &str) -> String {
    RE_TOKEN
        .replace_all(text, format!("${{1}}{}", REDACTED).as_str())
        .into_owned()
}
