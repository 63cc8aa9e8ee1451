use std::sync::OnceLock;

use regex::Regex;

/// A pattern and what its matches are replaced with.
struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

static RULES: OnceLock<Vec<Rule>> = OnceLock::new();

fn rules() -> &'static [Rule] {
    RULES.get_or_init(|| {
        let rule = |pattern: &str, replacement: &'static str| Rule {
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid sanitization pattern {pattern}: {e}")),
            replacement,
        };

        vec![
            // emails keep their domain
            rule(r"\b([a-zA-Z0-9._%+-]+)@([a-zA-Z0-9.-]+\.[a-zA-Z]{2,})\b", "***@$2"),
            // card numbers
            rule(r"\b\d{13,19}\b", "[REDACTED]"),
            rule(r"\b(sk_|pk_|api_|key_)[a-zA-Z0-9_]{15,}\b", "[REDACTED]"),
            rule(r"Bearer\s+[a-zA-Z0-9\-_\.]+", "Bearer [REDACTED]"),
            rule(r"(?i)(password|passwd|pwd)\s*[:=]\s*\S+", "$1=[REDACTED]"),
            // IPv4 keeps the /16
            rule(r"\b(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})\b", "$1.$2.x.x"),
            rule(r"/(?:home|Users)/([^/]+)", "/[USER]"),
        ]
    })
}

/// Mask sensitive values in a payload before it is attached to a span or logged.
pub fn sanitize_payload(payload: &str) -> String {
    rules().iter().fold(payload.to_string(), |acc, rule| {
        rule.pattern.replace_all(&acc, rule.replacement).into_owned()
    })
}

/// Headers whose values never leave the process.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
];

/// Value to report for a captured header.
pub fn sanitize_header(name: &str, value: &str) -> String {
    if SENSITIVE_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
        "[REDACTED]".to_string()
    } else {
        sanitize_payload(value)
    }
}
