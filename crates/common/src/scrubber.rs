use once_cell::sync::Lazy;
use regex::Regex;

/// Log scrubber for segment query text.
///
/// ### WARNING
/// This utility uses regex-based patterns which is a **best-effort** approach.
/// It does not guarantee complete sanitization of every literal a segment
/// author might embed. Variable values are therefore never logged at all;
/// this scrubber only handles the query text itself.
static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}").unwrap());

static PHONE_REGEX: Lazy<Regex> = Lazy::new(|| {
    // Matches common phone formats like (XXX) XXX-XXXX or XXX-XXX-XXXX
    Regex::new(r"(?:\+?1[-. ]?)?\(?\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}").unwrap()
});

/// Maximum query length appearing in a log line.
pub const LOG_QUERY_MAX_LENGTH: usize = 200;

pub fn scrub(input: &str) -> String {
    let mut scrubbed = input.to_string();

    scrubbed = EMAIL_REGEX.replace_all(&scrubbed, "[EMAIL]").to_string();
    scrubbed = PHONE_REGEX.replace_all(&scrubbed, "[PHONE]").to_string();

    scrubbed
}

/// Prepare query text for a log line: scrub PII literals, then truncate.
pub fn redact_query(query: &str) -> String {
    let scrubbed = scrub(query);
    if scrubbed.chars().count() <= LOG_QUERY_MAX_LENGTH {
        return scrubbed;
    }
    let truncated: String = scrubbed.chars().take(LOG_QUERY_MAX_LENGTH).collect();
    format!("{}... [truncated]", truncated)
}
