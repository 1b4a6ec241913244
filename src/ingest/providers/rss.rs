// src/ingest/providers/rss.rs
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

use crate::ingest::types::{FeedSource, RawEntry};

// ---- RSS 2.0 ----

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<Text>,
    link: Option<Text>,
    guid: Option<Text>,
    description: Option<Text>,
    #[serde(rename = "content:encoded")]
    content_encoded: Option<Text>,
    #[serde(rename = "pubDate")]
    pub_date: Option<Text>,
    #[serde(rename = "dc:date")]
    dc_date: Option<Text>,
}

// ---- Atom ----

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<Text>,
    title: Option<Text>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    summary: Option<Text>,
    content: Option<Text>,
    published: Option<Text>,
    updated: Option<Text>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

/// Element text with any attributes (`isPermaLink`, `type`, ...) ignored.
#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

fn text(t: Option<Text>) -> Option<String> {
    t.map(|t| t.value.trim().to_string()).filter(|s| !s.is_empty())
}

fn to_chrono(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822).ok().and_then(to_chrono)
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc3339).ok().and_then(to_chrono)
}

/// RSS 2.0 or Atom feed, from a fixture string or over HTTP.
pub struct RssFeedSource {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http { url: String, client: reqwest::Client },
}

impl RssFeedSource {
    pub fn from_fixture_str(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_url(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rss-digest/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building feed http client")?;
        Ok(Self {
            mode: Mode::Http {
                url: url.to_string(),
                client,
            },
        })
    }

    pub fn parse_entries_from_str(s: &str) -> Result<Vec<RawEntry>> {
        let t0 = std::time::Instant::now();
        let xml_clean = scrub_html_entities_for_xml(s);

        let out = if looks_like_atom(&xml_clean) {
            let feed: AtomFeed = from_str(&xml_clean).context("parsing atom xml")?;
            feed.entry.into_iter().map(atom_entry).collect::<Vec<_>>()
        } else {
            let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;
            rss.channel.item.into_iter().map(rss_item).collect::<Vec<_>>()
        };

        histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        Ok(out)
    }
}

fn rss_item(it: Item) -> RawEntry {
    let pub_date = text(it.pub_date);
    let dc_date = text(it.dc_date);
    RawEntry {
        id: text(it.guid),
        title: text(it.title),
        link: text(it.link),
        summary: None,
        description: text(it.description),
        content: text(it.content_encoded),
        published_parsed: pub_date.as_deref().and_then(parse_rfc2822),
        updated_parsed: dc_date.as_deref().and_then(parse_rfc3339),
        published: None,
        updated: dc_date,
        pub_date,
    }
}

fn atom_entry(e: AtomEntry) -> RawEntry {
    // rel="alternate" (or no rel) is the article itself
    let link = e
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| e.links.first())
        .and_then(|l| l.href.clone());
    let published = text(e.published);
    let updated = text(e.updated);
    RawEntry {
        id: text(e.id),
        title: text(e.title),
        link,
        summary: text(e.summary),
        description: None,
        content: text(e.content),
        published_parsed: published.as_deref().and_then(parse_rfc3339),
        updated_parsed: updated.as_deref().and_then(parse_rfc3339),
        published,
        updated,
        pub_date: None,
    }
}

fn looks_like_atom(s: &str) -> bool {
    match (s.find("<feed"), s.find("<rss")) {
        (Some(_), None) => true,
        (Some(f), Some(r)) => f < r,
        _ => false,
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch_entries(&self) -> Result<Vec<RawEntry>> {
        match &self.mode {
            Mode::Fixture(s) => Self::parse_entries_from_str(s),
            Mode::Http { url, client } => {
                let resp = match client.get(url.as_str()).send().await {
                    Ok(resp) => resp,
                    Err(e) => {
                        tracing::warn!(target: "ingest", error = ?e, url = %url, "feed http error");
                        counter!("ingest_source_errors_total").increment(1);
                        return Err(e).context("feed http get()");
                    }
                };
                let body = resp
                    .error_for_status()
                    .context("feed http status")?
                    .text()
                    .await
                    .context("feed http .text()")?;
                Self::parse_entries_from_str(&body)
            }
        }
    }

    fn name(&self) -> &str {
        match &self.mode {
            Mode::Fixture(_) => "rss-fixture",
            Mode::Http { .. } => "rss",
        }
    }
}

/// HTML entities that XML does not define; feeds use them anyway.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_detection() {
        assert!(looks_like_atom(r#"<?xml version="1.0"?><feed xmlns="http://www.w3.org/2005/Atom">"#));
        assert!(!looks_like_atom("<rss><channel></channel></rss>"));
    }

    #[test]
    fn empty_channel_is_not_an_error() {
        let xml = "<rss version=\"2.0\"><channel><title>t</title></channel></rss>";
        assert!(RssFeedSource::parse_entries_from_str(xml).unwrap().is_empty());
    }

    #[test]
    fn rfc2822_pub_date_is_structured() {
        let xml = r#"<rss version="2.0"><channel>
            <item><title>A &mdash; B</title><link>https://x/a</link>
            <guid isPermaLink="false">g-1</guid>
            <pubDate>Fri, 10 Jan 2025 08:00:00 +0000</pubDate></item>
        </channel></rss>"#;
        let items = RssFeedSource::parse_entries_from_str(xml).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id.as_deref(), Some("g-1"));
        assert_eq!(items[0].title.as_deref(), Some("A - B"));
        assert_eq!(
            items[0].published_parsed.map(|d| d.timestamp()),
            Some(1_736_496_000)
        );
    }
}
