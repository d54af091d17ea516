//! Error sanitization (spec §4.5): provider response bodies are redacted
//! before surfacing in logs or error responses.

use std::sync::OnceLock;

use regex_lite::Regex;

const REDACTED: &str = "<redacted>";

struct Patterns {
    api_key: Regex,
    email: Regex,
    bearer: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        api_key: Regex::new(r"sk-[A-Za-z0-9_-]{10,}").expect("valid regex"),
        email: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex"),
        bearer: Regex::new(r"(?i)bearer\s+[A-Za-z0-9._~+/=-]+").expect("valid regex"),
    })
}

/// Redact API keys, email addresses, and bearer tokens from `text` before
/// it can leave the process in a log line or error body.
#[must_use]
pub fn sanitize_text(text: &str) -> String {
    let patterns = patterns();
    let redacted = patterns.api_key.replace_all(text, REDACTED);
    let redacted = patterns.email.replace_all(&redacted, REDACTED);
    let redacted = patterns.bearer.replace_all(&redacted, REDACTED);
    redacted.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_api_key() {
        let text = "upstream rejected key sk-abcdefghij1234567890";
        assert_eq!(sanitize_text(text), "upstream rejected key <redacted>");
    }

    #[test]
    fn redacts_email() {
        let text = "contact admin@example.com for help";
        assert_eq!(sanitize_text(text), "contact <redacted> for help");
    }

    #[test]
    fn redacts_bearer_token() {
        let text = "Authorization: Bearer abc123.def456-xyz";
        assert_eq!(sanitize_text(text), "Authorization: <redacted>");
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        assert_eq!(sanitize_text("model not found"), "model not found");
    }
}
