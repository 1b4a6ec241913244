// src/ingest/types.rs
use std::hash::{Hash, Hasher};

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Utc};

/// Default cap for the stored plain-text excerpt.
pub const DEFAULT_EXCERPT_CHARS: usize = 300;

/// One entry as yielded by a feed source, before normalization.
/// Field names follow the feed vocabulary; every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    /// Structured times, filled by the source when its own parser understood them.
    pub published_parsed: Option<DateTime<Utc>>,
    pub updated_parsed: Option<DateTime<Utc>>,
    /// Raw date strings, kept for the loose fallback parse.
    pub published: Option<String>,
    pub updated: Option<String>,
    pub pub_date: Option<String>,
}

/// One discovered content unit. Equality and hashing use `identity` only.
#[derive(Debug, Clone)]
pub struct FeedItem {
    pub identity: String,
    pub title: String,
    pub link: String,
    pub excerpt_source: String,
    pub excerpt: String,
    pub published_at: Option<DateTime<Utc>>,
    full_text: Option<String>,
}

impl FeedItem {
    pub fn new(
        guid: &str,
        title: &str,
        link: &str,
        excerpt_source: &str,
        published_at: Option<DateTime<Utc>>,
    ) -> Self {
        let link = link.trim().to_string();
        let guid = guid.trim();
        let identity = if guid.is_empty() {
            link.clone()
        } else {
            guid.to_string()
        };
        Self {
            identity,
            title: title.trim().to_string(),
            excerpt: crate::ingest::excerpt(excerpt_source, DEFAULT_EXCERPT_CHARS),
            excerpt_source: excerpt_source.trim().to_string(),
            link,
            published_at,
            full_text: None,
        }
    }

    /// Attach retrieved article text, capped at `budget` characters.
    pub fn with_full_text(mut self, text: &str, budget: usize) -> Self {
        let capped: String = text.chars().take(budget).collect();
        self.full_text = if capped.trim().is_empty() {
            None
        } else {
            Some(capped)
        };
        self
    }

    pub fn full_text(&self) -> Option<&str> {
        self.full_text.as_deref()
    }

    /// Excerpt with a caller-chosen cap (the stored one uses `DEFAULT_EXCERPT_CHARS`).
    pub fn excerpt_with_limit(&self, max_chars: usize) -> String {
        crate::ingest::excerpt(&self.excerpt_source, max_chars)
    }

    /// Text handed to the deep-analysis stage: full text when enriched, else the excerpt.
    pub fn analysis_body(&self) -> &str {
        self.full_text.as_deref().unwrap_or(&self.excerpt)
    }

    /// Undated items count as "today" only when `default_if_no_date` says so.
    pub fn is_today(&self, offset: FixedOffset, default_if_no_date: bool) -> bool {
        self.is_on_day_of(Utc::now(), offset, default_if_no_date)
    }

    pub fn is_on_day_of(
        &self,
        now: DateTime<Utc>,
        offset: FixedOffset,
        default_if_no_date: bool,
    ) -> bool {
        match self.published_at {
            None => default_if_no_date,
            Some(ts) => ts.with_timezone(&offset).date_naive() == now.with_timezone(&offset).date_naive(),
        }
    }

    /// First `<img src=...>` inside the raw description, if any.
    pub fn first_image(&self) -> Option<String> {
        static RE_IMG: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
        let re = RE_IMG.get_or_init(|| {
            regex::Regex::new(r#"(?i)<img[^>]+src=["']([^"']+)["']"#).expect("img regex")
        });
        re.captures(&self.excerpt_source)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

impl PartialEq for FeedItem {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for FeedItem {}

impl Hash for FeedItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

/// Anything that can produce raw feed entries (HTTP feed, fixture, test double).
#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_entries(&self) -> Result<Vec<RawEntry>>;
    fn name(&self) -> &str;
}

/// Fixed list of entries; handy for tests and dry runs.
pub struct StaticFeedSource {
    pub entries: Vec<RawEntry>,
}

#[async_trait::async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch_entries(&self) -> Result<Vec<RawEntry>> {
        Ok(self.entries.clone())
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn identity_prefers_guid_and_falls_back_to_link() {
        let a = FeedItem::new("guid-1", "T", "https://x/1", "", None);
        assert_eq!(a.identity, "guid-1");
        let b = FeedItem::new("   ", "T", " https://x/2 ", "", None);
        assert_eq!(b.identity, "https://x/2");
    }

    #[test]
    fn equality_ignores_everything_but_identity() {
        let a = FeedItem::new("same", "Old title", "https://x/a", "one", None);
        let b = FeedItem::new("same", "New title", "https://x/b", "two", None);
        assert_eq!(a, b);
        let set: HashSet<FeedItem> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn full_text_is_capped_when_attached() {
        let item = FeedItem::new("g", "T", "https://x", "short", None)
            .with_full_text(&"y".repeat(5_000), 3_000);
        assert_eq!(item.full_text().map(|t| t.chars().count()), Some(3_000));
        assert_eq!(item.identity, "g");
    }

    #[test]
    fn undated_items_are_not_today_by_default() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 2, 0, 0).unwrap();
        let undated = FeedItem::new("g", "T", "https://x", "", None);
        assert!(!undated.is_on_day_of(now, offset, false));

        // 2025-01-09 20:00 UTC is already 2025-01-10 in UTC+8
        let dated = FeedItem::new(
            "h",
            "T",
            "https://x",
            "",
            Some(Utc.with_ymd_and_hms(2025, 1, 9, 20, 0, 0).unwrap()),
        );
        assert!(dated.is_on_day_of(now, offset, false));
    }

    #[test]
    fn first_image_is_extracted() {
        let item = FeedItem::new(
            "g",
            "T",
            "https://x",
            r#"<p>hi</p><img class="a" src="https://img/1.png"><img src="https://img/2.png">"#,
            None,
        );
        assert_eq!(item.first_image().as_deref(), Some("https://img/1.png"));
    }
}
