// src/ingest/mod.rs
pub mod dedup;
pub mod normalize;
pub mod providers;
pub mod types;

use crate::ingest::types::{FeedItem, FeedSource};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;

/// Marker appended to excerpts that were cut short.
pub const ELLIPSIS: &str = "...";

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_entries_total", "Raw entries returned by the feed source.");
        describe_counter!(
            "ingest_items_total",
            "Entries successfully normalized into feed items."
        );
        describe_counter!(
            "ingest_skipped_total",
            "Entries skipped because they had no usable identity."
        );
        describe_counter!("ingest_source_errors_total", "Feed fetch/parse errors.");
        describe_histogram!("ingest_fetch_ms", "Feed fetch + parse time in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Feed XML parse time in milliseconds.");
    });
}

/// Markup-free text: decode entities, strip tags, fold quotes, collapse whitespace.
pub fn plain_text(s: &str) -> String {
    // 1) Strip HTML tags (before decoding, so `&lt;b&gt;` stays literal text)
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)<[^>]+>").expect("tag regex"));
    let out = re_tags.replace_all(s, " ");

    // 2) HTML entity decode
    let mut out = html_escape::decode_html_entities(&out).to_string();

    // 3) Normalize “ ” ‘ ’ to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace (NBSP included)
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[\s\u{00A0}]+").expect("ws regex"));
    re_ws.replace_all(&out, " ").trim().to_string()
}

/// Plain-text excerpt capped at `max_chars`; the ellipsis is added only when something was cut.
pub fn excerpt(source: &str, max_chars: usize) -> String {
    let text = plain_text(source);
    if text.chars().count() <= max_chars {
        return text;
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.truncate(cut.trim_end().len());
    cut.push_str(ELLIPSIS);
    cut
}

/// Fetch once from `source` and normalize every entry.
/// A failing source yields an empty list; the error is logged, never raised.
pub async fn collect_items(source: &dyn FeedSource) -> Vec<FeedItem> {
    ensure_metrics_described();

    let t0 = std::time::Instant::now();
    let raw = match source.fetch_entries().await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(target: "ingest", error = ?e, source = source.name(), "feed source error");
            counter!("ingest_source_errors_total").increment(1);
            return Vec::new();
        }
    };
    histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("ingest_entries_total").increment(raw.len() as u64);

    if raw.is_empty() {
        tracing::warn!(target: "ingest", source = source.name(), "feed returned no entries");
        return Vec::new();
    }

    let total = raw.len();
    let items = normalize::normalize_entries(raw);
    counter!("ingest_items_total").increment(items.len() as u64);
    counter!("ingest_skipped_total").increment((total - items.len()) as u64);

    tracing::info!(
        target: "ingest",
        source = source.name(),
        entries = total,
        items = items.len(),
        "feed collected"
    );
    items
}
