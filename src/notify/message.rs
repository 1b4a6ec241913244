// src/notify/message.rs
//! Plain item-list messages, used whenever no analyzed report is available.

use chrono::{FixedOffset, Offset, Utc};

use crate::ingest::types::FeedItem;
use crate::notify::MessageFormat;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FOOTER: &str = "📬 RSS digest | automatic delivery";

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub include_description: bool,
    pub include_image: bool,
    pub utc_offset: FixedOffset,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            include_description: true,
            include_image: false,
            utc_offset: Utc.fix(),
        }
    }
}

pub fn list_title(count: usize) -> String {
    format!("📰 RSS digest ({count} items)")
}

/// `(title, body)` for `items` in the requested format.
pub fn format_items(items: &[FeedItem], format: MessageFormat, opts: &ListOptions) -> (String, String) {
    let title = list_title(items.len());
    let body = match format {
        MessageFormat::Html => format_html(&title, items, opts),
        MessageFormat::Markdown => format_markdown(&title, items, opts),
        MessageFormat::Text => format_text(&title, items, opts),
    };
    (title, body)
}

fn published(item: &FeedItem, opts: &ListOptions) -> Option<String> {
    item.published_at
        .map(|ts| ts.with_timezone(&opts.utc_offset).format(TIME_FORMAT).to_string())
}

pub fn format_html(title: &str, items: &[FeedItem], opts: &ListOptions) -> String {
    use html_escape::{encode_double_quoted_attribute as attr, encode_text as text};

    let mut out = String::from(
        r#"<html><head><meta charset="utf-8"></head><body style="font-family: Arial, sans-serif; line-height: 1.6;">"#,
    );
    out.push_str(&format!(r#"<h2 style="color: #333;">{}</h2><hr style="border: 1px solid #ddd;">"#, text(title)));

    for (i, it) in items.iter().enumerate() {
        out.push_str(r#"<div style="margin-bottom: 30px; padding: 15px; background: #f9f9f9; border-radius: 5px;">"#);
        out.push_str(&format!(
            r#"<h3 style="margin-top: 0; color: #2c3e50;">{}. {}</h3>"#,
            i + 1,
            text(&it.title)
        ));
        if opts.include_description {
            let ex = it.excerpt_with_limit(200);
            if !ex.is_empty() {
                out.push_str(&format!(r#"<p style="color: #555; margin: 10px 0;">{}</p>"#, text(&ex)));
            }
        }
        out.push_str(&format!(
            r#"<p><a href="{}" style="color: #3498db; text-decoration: none;">🔗 Read more</a></p>"#,
            attr(&it.link)
        ));
        if opts.include_image {
            if let Some(src) = it.first_image() {
                out.push_str(&format!(
                    r#"<img src="{}" alt="" style="max-width: 100%; height: auto; border-radius: 5px;">"#,
                    attr(&src)
                ));
            }
        }
        if let Some(ts) = published(it, opts) {
            out.push_str(&format!(r#"<p style="color: #999; font-size: 0.9em;">📅 {ts}</p>"#));
        }
        out.push_str("</div>");
    }

    out.push_str(&format!(
        r#"<hr style="border: 1px solid #ddd; margin-top: 30px;"><p style="text-align: center; color: #999; font-size: 0.9em;">{FOOTER}</p></body></html>"#
    ));
    out
}

pub fn format_markdown(title: &str, items: &[FeedItem], opts: &ListOptions) -> String {
    let mut out = format!("# {title}\n");
    for (i, it) in items.iter().enumerate() {
        out.push_str(&format!("\n## {}. {}\n", i + 1, it.title));
        if opts.include_description {
            let ex = it.excerpt_with_limit(200);
            if !ex.is_empty() {
                out.push_str(&format!("\n{ex}\n"));
            }
        }
        out.push_str(&format!("\n[🔗 Read more]({})\n", it.link));
        if opts.include_image {
            if let Some(src) = it.first_image() {
                out.push_str(&format!("\n![]({src})\n"));
            }
        }
        if let Some(ts) = published(it, opts) {
            out.push_str(&format!("\n📅 {ts}\n"));
        }
        out.push_str("\n---\n");
    }
    out.push_str(&format!("\n{FOOTER}\n"));
    out
}

pub fn format_text(title: &str, items: &[FeedItem], opts: &ListOptions) -> String {
    let rule = "-".repeat(50);
    let mut out = format!("{title}\n{}\n", "=".repeat(50));
    for (i, it) in items.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n", i + 1, it.title));
        if opts.include_description {
            let ex = it.excerpt_with_limit(150);
            if !ex.is_empty() {
                out.push_str(&format!("📝 {ex}\n"));
            }
        }
        out.push_str(&format!("🔗 {}\n", it.link));
        if let Some(ts) = published(it, opts) {
            out.push_str(&format!("📅 {ts}\n"));
        }
        out.push_str(&rule);
        out.push('\n');
    }
    out.push_str(&format!("\n{FOOTER}\n"));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn items() -> Vec<FeedItem> {
        vec![
            FeedItem::new(
                "a",
                "Tom & Jerry <live>",
                "https://x/a?b=1&c=2",
                r#"<p>Intro text</p><img src="https://img/a.png">"#,
                Some(Utc.with_ymd_and_hms(2025, 1, 10, 2, 30, 0).unwrap()),
            ),
            FeedItem::new("b", "Second", "https://x/b", "", None),
        ]
    }

    #[test]
    fn html_escapes_titles_and_links() {
        let opts = ListOptions {
            include_image: true,
            ..Default::default()
        };
        let (title, body) = format_items(&items(), MessageFormat::Html, &opts);
        assert_eq!(title, "📰 RSS digest (2 items)");
        assert!(body.contains("1. Tom &amp; Jerry &lt;live&gt;"));
        assert!(body.contains(r#"href="https://x/a?b=1&amp;c=2""#));
        assert!(body.contains(r#"<img src="https://img/a.png""#));
        assert!(body.contains("📅 2025-01-10 02:30:00"));
    }

    #[test]
    fn text_respects_offset_and_description_switch() {
        let opts = ListOptions {
            include_description: false,
            utc_offset: FixedOffset::east_opt(8 * 3600).unwrap(),
            ..Default::default()
        };
        let body = format_text("T", &items(), &opts);
        assert!(body.contains("📅 2025-01-10 10:30:00"));
        assert!(!body.contains("Intro text"));
        assert!(body.contains("2. Second\n🔗 https://x/b\n"));
    }

    #[test]
    fn markdown_lists_every_item() {
        let body = format_markdown("T", &items(), &ListOptions::default());
        assert!(body.contains("## 1. Tom & Jerry <live>"));
        assert!(body.contains("[🔗 Read more](https://x/b)"));
        assert!(body.contains("Intro text"));
        assert!(!body.contains("![]"));
    }
}
