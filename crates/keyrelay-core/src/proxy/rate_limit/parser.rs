use regex::Regex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::sync::OnceLock;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
pub const RESET_HEADER: &str = "x-ratelimit-reset";

static RETRY_S_REGEX: OnceLock<Regex> = OnceLock::new();
static RETRY_AFTER_REGEX: OnceLock<Regex> = OnceLock::new();
static WAIT_PAREN_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_retry_s_regex() -> &'static Regex {
    RETRY_S_REGEX.get_or_init(|| {
        Regex::new(r"(?i)(?:try again in|backoff for|wait)\s*(\d+)\s*s").expect("Retry s regex is valid")
    })
}

fn get_retry_after_regex() -> &'static Regex {
    RETRY_AFTER_REGEX.get_or_init(|| {
        Regex::new(r"(?i)retry after (\d+) second").expect("Retry after regex is valid")
    })
}

fn get_wait_paren_regex() -> &'static Regex {
    WAIT_PAREN_REGEX
        .get_or_init(|| Regex::new(r"\(wait (\d+)s\)").expect("Wait paren regex is valid"))
}

/// Rate-limit metadata reported by the upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Seconds until the window resets
    pub reset_secs: Option<i64>,
}

impl RateLimitHeaders {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit: header_number(headers, LIMIT_HEADER),
            remaining: header_number(headers, REMAINING_HEADER),
            reset_secs: header_number::<f64>(headers, RESET_HEADER).map(|s| s.ceil() as i64),
        }
    }

    /// True when the upstream told us anything about the window.
    pub fn is_authoritative(&self) -> bool {
        self.limit.is_some() || self.remaining.is_some()
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }

    /// Remaining capacity at or under 10% of the limit.
    pub fn is_nearly_exhausted(&self) -> bool {
        match (self.limit, self.remaining) {
            (_, Some(0)) => true,
            (Some(limit), Some(remaining)) if limit > 0 => {
                u64::from(remaining) * 10 <= u64::from(limit)
            },
            _ => false,
        }
    }
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// `Retry-After` header in seconds, else a hint in the error body.
pub fn parse_retry_after(headers: &HeaderMap, body: Option<&str>) -> Option<u64> {
    if let Some(secs) = header_number::<u64>(headers, RETRY_AFTER.as_str()) {
        return Some(secs);
    }
    body.and_then(parse_retry_time_from_body)
}

pub fn parse_retry_time_from_body(body: &str) -> Option<u64> {
    [get_retry_s_regex(), get_retry_after_regex(), get_wait_paren_regex()]
        .iter()
        .find_map(|re| re.captures(body))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
}
