//! Small string helpers shared by config parsing and connectivity logging.

/// Longest error text carried into a log line.
const LOG_TEXT_LIMIT: usize = 180;

/// Trimmed copy of `value`, or `None` when it is missing or blank.
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|trimmed| !trimmed.is_empty())
        .map(ToString::to_string)
}

/// Whether `url` uses an `http` or `https` scheme (case-insensitive).
pub fn has_http_scheme(url: &str) -> bool {
    url.split_once("://").is_some_and(|(scheme, rest)| {
        !rest.is_empty()
            && (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
    })
}

/// Single-line, length-capped rendering of an error for logs.
pub fn log_excerpt(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(LOG_TEXT_LIMIT)
        .collect()
}
