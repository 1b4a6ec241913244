// src/analyze/report.rs
//! Markdown report from a stage-2 result.
//!
//! Two layouts, picked from the data alone: *digest* when the summary
//! section carries an insight or trends, *legacy* (one bold summary line)
//! otherwise. Category sections follow in both.

use chrono::{FixedOffset, Offset, Utc};

use crate::analyze::deep_analysis::{AnalysisResult, Category};
use crate::ingest::types::FeedItem;

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub title: String,
    /// Digest heading used when the summary section has no title.
    pub insight_heading: String,
    pub trends_label: String,
    pub reason_label: String,
    pub default_reason: String,
    /// Legacy-mode line when the reply had no `summary`.
    pub default_summary: String,
    pub footer: Vec<String>,
    pub utc_offset: FixedOffset,
    pub time_format: String,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            title: "📚 Daily Digest".into(),
            insight_heading: "Today's insight".into(),
            trends_label: "**📉 Key trends:**".into(),
            reason_label: "💡 **Why read**:".into(),
            default_reason: "Recommended reading".into(),
            default_summary: "Hand-picked articles for you".into(),
            footer: vec![
                "💡 **Tip**: click a title to open the original article".into(),
                "📌 **Source**: RSS digest | automatically analyzed".into(),
            ],
            utc_offset: Utc.fix(),
            time_format: "%Y-%m-%d %H:%M".into(),
        }
    }
}

/// Render `analysis` against `items`, the exact list stage 2 was given.
/// References that do not resolve are skipped; empty categories are omitted.
pub fn render_report(analysis: &AnalysisResult, items: &[FeedItem], opts: &ReportOptions) -> String {
    let mut lines: Vec<String> = Vec::new();
    lines.push(format!("# {}\n", opts.title));

    match analysis.summary_section.as_ref().filter(|s| s.has_narrative()) {
        Some(section) => {
            let heading = if section.title.is_empty() {
                opts.insight_heading.as_str()
            } else {
                section.title.as_str()
            };
            lines.push(format!("## 🧐 {heading}\n"));
            if !section.insight.is_empty() {
                lines.push(format!("{}\n", section.insight));
            }
            if !section.trends.is_empty() {
                lines.push(opts.trends_label.clone());
                for t in &section.trends {
                    lines.push(format!("- {t}"));
                }
                lines.push(String::new());
            }
        }
        None => {
            let summary = analysis
                .summary
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(&opts.default_summary);
            lines.push(format!("**{summary}**\n"));
        }
    }
    lines.push("---\n".into());

    for cat in &analysis.categories {
        render_category(&mut lines, cat, items, opts);
    }

    lines.push(String::new());
    for f in &opts.footer {
        lines.push(format!("{f}\n"));
    }
    lines.join("\n")
}

fn stars(level: u8) -> String {
    let l = usize::from(level.clamp(1, 5));
    format!("{}{}", "★".repeat(l), "☆".repeat(5 - l))
}

fn render_category(lines: &mut Vec<String>, cat: &Category, items: &[FeedItem], opts: &ReportOptions) {
    let resolved: Vec<_> = cat
        .articles
        .iter()
        .filter_map(|a| {
            let item = a.article_id.checked_sub(1).and_then(|i| items.get(i));
            if item.is_none() {
                tracing::warn!(target: "analysis", article_id = a.article_id, "unresolvable article reference skipped");
            }
            item.map(|it| (a, it))
        })
        .collect();
    if resolved.is_empty() {
        return;
    }

    lines.push(format!("## {} {} ({})\n", cat.icon, cat.name, stars(cat.level)));
    if !cat.description.is_empty() {
        lines.push(format!("*{}*\n", cat.description));
    }

    for (a, item) in resolved {
        lines.push(format!("### [{}]({})", item.title, item.link));
        let reason = if a.reason.is_empty() {
            opts.default_reason.as_str()
        } else {
            a.reason.as_str()
        };
        lines.push(format!("{} {reason}\n", opts.reason_label));
        if !a.tags.is_empty() {
            let chips: Vec<String> = a.tags.iter().map(|t| format!("`{t}`")).collect();
            lines.push(format!("🏷️ {}\n", chips.join(" ")));
        }
        if let Some(ts) = item.published_at {
            let local = ts.with_timezone(&opts.utc_offset);
            lines.push(format!("📅 {}\n", local.format(&opts.time_format)));
        }
        lines.push(String::new());
    }
    lines.push("---\n".into());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::deep_analysis::{ArticleRef, SummarySection};
    use chrono::TimeZone;

    fn cat(name: &str, ids: &[usize]) -> Category {
        Category {
            key: name.into(),
            name: name.into(),
            icon: "⭐".into(),
            level: 4,
            description: String::new(),
            articles: ids
                .iter()
                .map(|&id| ArticleRef {
                    article_id: id,
                    reason: format!("reason {id}"),
                    tags: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn stars_are_clamped_to_five() {
        assert_eq!(stars(4), "★★★★☆");
        assert_eq!(stars(0), "★☆☆☆☆");
        assert_eq!(stars(9), "★★★★★");
    }

    #[test]
    fn publish_time_uses_configured_offset() {
        let item = FeedItem::new(
            "g",
            "T",
            "https://x",
            "",
            Some(Utc.with_ymd_and_hms(2025, 1, 10, 2, 30, 0).unwrap()),
        );
        let analysis = AnalysisResult {
            categories: vec![cat("A", &[1])],
            summary_section: Some(SummarySection::default()),
            summary: None,
        };
        let opts = ReportOptions {
            utc_offset: FixedOffset::east_opt(8 * 3600).unwrap(),
            ..Default::default()
        };
        let md = render_report(&analysis, &[item], &opts);
        assert!(md.contains("📅 2025-01-10 10:30"));
        // empty summary section falls back to the legacy line
        assert!(md.contains("**Hand-picked articles for you**"));
    }
}
