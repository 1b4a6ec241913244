// src/ingest/normalize.rs
//! Raw feed entry → `FeedItem`.
//!
//! Timestamp resolution order:
//! 1) structured `published` time from the source parser
//! 2) structured `updated` time
//! 3) loose parse of the `published` / `updated` / `pubDate` strings
//!
//! Anything unparsable ends up as "no timestamp".

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

use crate::ingest::types::{FeedItem, RawEntry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("entry has neither guid nor link (title: {0:?})")]
    MissingIdentity(String),
}

pub fn normalize_entry(entry: RawEntry) -> Result<FeedItem, NormalizeError> {
    let guid = entry.id.as_deref().unwrap_or_default().trim();
    let link = entry.link.as_deref().unwrap_or_default().trim();
    let title = entry.title.as_deref().unwrap_or_default();
    if guid.is_empty() && link.is_empty() {
        return Err(NormalizeError::MissingIdentity(title.to_string()));
    }

    // Prefer summary, then description, then full content.
    let body = [&entry.summary, &entry.description, &entry.content]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .map(String::as_str)
        .unwrap_or_default();

    let published_at = resolve_timestamp(&entry);
    Ok(FeedItem::new(guid, title, link, body, published_at))
}

/// Normalize a whole batch; failing entries are logged and skipped.
pub fn normalize_entries(entries: Vec<RawEntry>) -> Vec<FeedItem> {
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        match normalize_entry(entry) {
            Ok(item) => out.push(item),
            Err(e) => tracing::warn!(target: "ingest", error = %e, "skipping feed entry"),
        }
    }
    out
}

pub fn resolve_timestamp(entry: &RawEntry) -> Option<DateTime<Utc>> {
    entry
        .published_parsed
        .or(entry.updated_parsed)
        .or_else(|| {
            [&entry.published, &entry.updated, &entry.pub_date]
                .into_iter()
                .flatten()
                .find_map(|s| parse_date_loose(s))
        })
}

const ZONED_FORMATS: &[&str] = &[
    "%a, %d %b %Y %H:%M:%S %z",
    "%a, %d %b %Y %H:%M %z",
    "%d %b %Y %H:%M:%S %z",
    "%Y-%m-%d %H:%M:%S %z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%a, %d %b %Y %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%B %d, %Y %H:%M",
    "%Y年%m月%d日 %H:%M",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%Y年%m月%d日",
];

/// Best-effort parse of a human-ish date string. Naive values are read as UTC.
pub fn parse_date_loose(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // "GMT"/"UTC"/"Z" suffixes confuse %z; rewrite them as +0000.
    let zoned = rewrite_utc_suffix(s);
    for fmt in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&zoned, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }

    let bare = strip_utc_suffix(s);
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(bare, fmt) {
            return Some(Utc.from_utc_datetime(&ndt));
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(bare, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|ndt| Utc.from_utc_datetime(&ndt));
        }
    }

    tracing::debug!(target: "ingest", raw = s, "unparsable date string");
    None
}

fn strip_utc_suffix(s: &str) -> &str {
    for suffix in [" GMT", " UTC", "Z"] {
        if let Some(rest) = s.strip_suffix(suffix) {
            return rest.trim_end();
        }
    }
    s
}

fn rewrite_utc_suffix(s: &str) -> String {
    let bare = strip_utc_suffix(s);
    if bare.len() == s.len() {
        s.to_string()
    } else if bare.contains('T') {
        format!("{bare}+0000")
    } else {
        format!("{bare} +0000")
    }
}
