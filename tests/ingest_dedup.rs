// tests/ingest_dedup.rs
use std::collections::HashSet;

use chrono::{FixedOffset, TimeZone, Utc};
use rss_digest::ingest::dedup::{deduplicate, filter_today, limit_items, sort_by_time};
use rss_digest::ingest::normalize::normalize_entries;
use rss_digest::ingest::types::{FeedItem, RawEntry};

/// Deterministic pseudo-random sequence: ids drawn from a small pool so
/// duplicates are frequent, timestamps missing for roughly one in four.
fn scrambled(n: usize, seed: u64) -> Vec<FeedItem> {
    let mut x = seed;
    let mut next = move || {
        x = x.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        x >> 33
    };
    (0..n)
        .map(|i| {
            let id = format!("id-{}", next() % 12);
            let ts = if next() % 4 == 0 {
                None
            } else {
                Utc.timestamp_opt(1_736_000_000 + (next() % 100_000) as i64, 0).single()
            };
            FeedItem::new(&id, &format!("title {i}"), &format!("https://x/{i}"), "", ts)
        })
        .collect()
}

#[test]
fn identity_is_guid_else_link() {
    let entries = vec![
        RawEntry {
            id: Some("  guid-1 ".into()),
            link: Some("https://x/1".into()),
            ..Default::default()
        },
        RawEntry {
            id: Some("   ".into()),
            link: Some(" https://x/2 ".into()),
            ..Default::default()
        },
        RawEntry {
            link: Some("https://x/3".into()),
            ..Default::default()
        },
    ];
    let items = normalize_entries(entries);
    let ids: Vec<&str> = items.iter().map(|i| i.identity.as_str()).collect();
    assert_eq!(ids, vec!["guid-1", "https://x/2", "https://x/3"]);
}

#[test]
fn dedup_output_is_unique_and_keeps_first_seen_order() {
    for seed in 1..20u64 {
        let input = scrambled(40, seed);
        let out = deduplicate(input.clone());

        let mut seen = HashSet::new();
        assert!(out.iter().all(|i| seen.insert(i.identity.clone())), "seed {seed}");

        // first occurrences, in input order
        let mut firsts = Vec::new();
        let mut s = HashSet::new();
        for it in &input {
            if s.insert(it.identity.clone()) {
                firsts.push(it.title.clone());
            }
        }
        let got: Vec<String> = out.iter().map(|i| i.title.clone()).collect();
        assert_eq!(got, firsts, "seed {seed}");
    }
}

#[test]
fn descending_sort_puts_dated_items_first_in_non_increasing_order() {
    for seed in 1..20u64 {
        let out = sort_by_time(scrambled(30, seed), true);
        let first_undated = out.iter().position(|i| i.published_at.is_none()).unwrap_or(out.len());
        assert!(out[first_undated..].iter().all(|i| i.published_at.is_none()), "seed {seed}");
        assert!(
            out[..first_undated]
                .windows(2)
                .all(|w| w[0].published_at >= w[1].published_at),
            "seed {seed}"
        );
    }
}

#[test]
fn today_filter_uses_the_configured_offset() {
    let offset = FixedOffset::east_opt(8 * 3600).unwrap();
    // 2025-01-10 09:00 local
    let now = Utc.with_ymd_and_hms(2025, 1, 10, 1, 0, 0).unwrap();
    let items = vec![
        // 2025-01-10 00:30 local: today
        FeedItem::new("a", "a", "https://x/a", "", Some(Utc.with_ymd_and_hms(2025, 1, 9, 16, 30, 0).unwrap())),
        // 2025-01-09 23:30 local: yesterday, although same UTC day as `now` minus a bit
        FeedItem::new("b", "b", "https://x/b", "", Some(Utc.with_ymd_and_hms(2025, 1, 9, 15, 30, 0).unwrap())),
        FeedItem::new("c", "c", "https://x/c", "", None),
    ];
    let out = filter_today(items, now, offset);
    let ids: Vec<&str> = out.iter().map(|i| i.identity.as_str()).collect();
    assert_eq!(ids, vec!["a"]);
}

#[test]
fn dedup_sort_limit_chain() {
    let items = vec![
        FeedItem::new("x", "old", "https://x/x", "", Utc.timestamp_opt(100, 0).single()),
        FeedItem::new("y", "new", "https://x/y", "", Utc.timestamp_opt(300, 0).single()),
        FeedItem::new("x", "dup", "https://x/x2", "", Utc.timestamp_opt(500, 0).single()),
        FeedItem::new("z", "undated", "https://x/z", "", None),
    ];
    let out = limit_items(sort_by_time(deduplicate(items), true), 2);
    let titles: Vec<&str> = out.iter().map(|i| i.title.as_str()).collect();
    assert_eq!(titles, vec!["new", "old"]);
}
