// src/analyze/enrich.rs
use metrics::counter;

use crate::analyze::ensure_metrics_described;
use crate::extract::PageTextExtractor;
use crate::ingest::types::FeedItem;

pub const DEFAULT_FULL_TEXT_CHARS: usize = 3_000;

/// Attach full article text to each item, capped at `max_chars`.
/// Items whose page cannot be read keep their excerpt; none are dropped.
pub async fn enrich_items(
    extractor: Option<&dyn PageTextExtractor>,
    items: Vec<FeedItem>,
    max_chars: usize,
) -> Vec<FeedItem> {
    ensure_metrics_described();
    let Some(extractor) = extractor else {
        tracing::debug!(target: "analysis", "no page extractor configured; skipping enrichment");
        return items;
    };

    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match extractor.fetch_text(&item.link).await {
            Some(text) if !text.trim().is_empty() => {
                counter!("enrich_ok_total").increment(1);
                tracing::debug!(target: "analysis", link = %item.link, chars = text.chars().count(), "full text attached");
                out.push(item.with_full_text(&text, max_chars));
            }
            _ => {
                counter!("enrich_fallback_total").increment(1);
                tracing::warn!(target: "analysis", link = %item.link, title = %item.title, "full text unavailable; using excerpt");
                out.push(item);
            }
        }
    }
    out
}
