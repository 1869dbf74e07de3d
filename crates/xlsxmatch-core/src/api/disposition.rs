//! Suggested filename extraction from `Content-Disposition` headers.

use std::sync::OnceLock;

use regex::Regex;

/// Filename used when the server does not suggest one
pub const DEFAULT_RESULT_FILENAME: &str = "resultado.zip";

fn filename_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)filename\*?=(?:UTF-8''|")?([^;"']+)"#).expect("filename pattern is valid")
    })
}

/// Suggested filename for a download, or `resultado.zip`.
pub fn result_filename(header: Option<&str>) -> String {
    header
        .and_then(parse_filename)
        .unwrap_or_else(|| DEFAULT_RESULT_FILENAME.to_string())
}

/// First `filename`/`filename*` value, unquoted and percent-decoded.
pub fn parse_filename(header: &str) -> Option<String> {
    let raw = filename_pattern()
        .captures(header)?
        .get(1)?
        .as_str()
        .replace('"', "");
    let decoded = urlencoding::decode(&raw).ok()?;
    let name = decoded.trim();
    (!name.is_empty()).then(|| name.to_string())
}
