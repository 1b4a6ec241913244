// src/ingest/dedup.rs
use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, Utc};

use crate::ingest::types::FeedItem;

/// First occurrence of each identity wins; survivors keep their input order.
pub fn deduplicate(items: Vec<FeedItem>) -> Vec<FeedItem> {
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if seen.insert(item.identity.clone()) {
            out.push(item);
        } else {
            tracing::debug!(target: "ingest", identity = %item.identity, "duplicate skipped");
        }
    }
    out
}

/// Dated items ordered by time; undated ones follow in their original order,
/// whichever direction is requested.
pub fn sort_by_time(items: Vec<FeedItem>, descending: bool) -> Vec<FeedItem> {
    let (mut dated, undated): (Vec<FeedItem>, Vec<FeedItem>) =
        items.into_iter().partition(|it| it.published_at.is_some());

    // sort_by is stable, so equal timestamps keep input order
    dated.sort_by(|a, b| {
        let ord = a.published_at.cmp(&b.published_at);
        if descending {
            ord.reverse()
        } else {
            ord
        }
    });

    tracing::debug!(
        target: "ingest",
        dated = dated.len(),
        undated = undated.len(),
        "sorted by publish time"
    );
    dated.extend(undated);
    dated
}

/// Keep items published on the same calendar day as `now` in `offset`.
pub fn filter_today(items: Vec<FeedItem>, now: DateTime<Utc>, offset: FixedOffset) -> Vec<FeedItem> {
    let before = items.len();
    let out: Vec<FeedItem> = items
        .into_iter()
        .filter(|it| it.is_on_day_of(now, offset, false))
        .collect();
    tracing::info!(target: "ingest", before, after = out.len(), "today-only filter");
    out
}

/// Keep at most `max` items (0 disables the cap).
pub fn limit_items(mut items: Vec<FeedItem>, max: usize) -> Vec<FeedItem> {
    if max > 0 && items.len() > max {
        tracing::info!(target: "ingest", total = items.len(), max, "item cap applied");
        items.truncate(max);
    }
    items
}
