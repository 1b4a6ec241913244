// src/extract.rs
//! Article text retrieval: URL → readable plain text.
//!
//! The HTTP extractor is the only collaborator that retries within a run
//! (bounded attempts, `base * 2^attempt` backoff). Everything else in the
//! pipeline tries once and leaves retries to the next scheduled run.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use scraper::{ElementRef, Html, Selector};

#[async_trait]
pub trait PageTextExtractor: Send + Sync {
    /// Plain text of the page's main content, or `None` on any failure.
    async fn fetch_text(&self, url: &str) -> Option<String>;
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("extract_attempts_total", "Page fetch attempts (retries included).");
        describe_counter!("extract_failures_total", "Pages that yielded no text after all attempts.");
        describe_histogram!("extract_fetch_ms", "Page fetch time in milliseconds, retries included.");
    });
}

pub struct HttpPageExtractor {
    client: reqwest::Client,
    max_attempts: u32,
    backoff_base: Duration,
}

impl HttpPageExtractor {
    pub fn new(timeout: Duration, max_attempts: u32, backoff_base: Duration) -> Result<Self> {
        ensure_metrics_described();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
            )
            .build()
            .context("building page http client")?;
        Ok(Self {
            client,
            max_attempts: max_attempts.max(1),
            backoff_base,
        })
    }

    async fn fetch_html(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("page http get()")?
            .error_for_status()
            .context("page http status")?;
        resp.text().await.context("page http .text()")
    }
}

#[async_trait]
impl PageTextExtractor for HttpPageExtractor {
    async fn fetch_text(&self, url: &str) -> Option<String> {
        let t0 = std::time::Instant::now();
        for attempt in 0..self.max_attempts {
            counter!("extract_attempts_total").increment(1);
            match self.fetch_html(url).await {
                Ok(html) => {
                    histogram!("extract_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                    let text = extract_main_text(&html);
                    if text.is_none() {
                        // a parsed page with no readable text will not improve on retry
                        tracing::warn!(target: "extract", url, "page has no readable main content");
                        counter!("extract_failures_total").increment(1);
                    } else {
                        tracing::debug!(target: "extract", url, attempt, "page text extracted");
                    }
                    return text;
                }
                Err(e) => {
                    tracing::warn!(
                        target: "extract",
                        url,
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        error = ?e,
                        "page fetch failed"
                    );
                    if attempt + 1 < self.max_attempts {
                        tokio::time::sleep(self.backoff_base * 2u32.pow(attempt)).await;
                    }
                }
            }
        }
        counter!("extract_failures_total").increment(1);
        None
    }
}

/// Canned pages keyed by URL; unknown URLs fail.
#[derive(Debug, Default, Clone)]
pub struct StaticExtractor {
    pub pages: HashMap<String, String>,
}

impl StaticExtractor {
    pub fn with_page(mut self, url: &str, text: &str) -> Self {
        self.pages.insert(url.to_string(), text.to_string());
        self
    }
}

#[async_trait]
impl PageTextExtractor for StaticExtractor {
    async fn fetch_text(&self, url: &str) -> Option<String> {
        self.pages.get(url).cloned()
    }
}

// ---- HTML → main text ----

/// Main-content containers, most specific first. `body` is the last resort.
const CONTENT_SELECTORS: &[&str] = &[
    "#js_content",
    ".rich_media_content",
    "article",
    ".article-content",
    ".post-content",
    ".entry-content",
    "#article-content",
    "main",
    ".content",
    ".main-content",
    "#content",
    "#main-content",
    "body",
];

/// Elements dropped wholesale, together with everything inside them.
const NOISE_SELECTOR: &str = "script, style, iframe, noscript, template, nav, header, footer, aside, form, button";

/// A class token equal to one of these, or starting with `word-` or ending in
/// `-word`, marks a page-chrome block.
const NOISE_CLASS_WORDS: &[&str] = &[
    "nav", "menu", "sidebar", "side-bar", "footer", "copyright", "ad", "advertisement", "promo",
    "sponsor", "comment", "share", "social", "related", "qr-code", "recommend",
];

/// WeChat official-account article chrome. These strings sit inside the
/// `#js_content` container as ordinary text, so lines containing them are
/// dropped after extraction.
pub mod wechat_chrome {
    /// "Scan with WeChat"
    pub const SCAN_PROMPT: &str = "微信扫一扫";
    /// "Follow this official account"
    pub const FOLLOW_PROMPT: &str = "关注该公众号";
    /// "Keep scrolling for the next one"
    pub const NEXT_ARTICLE: &str = "继续滑动看下一个";
    /// "Tap to read the original"
    pub const READ_ORIGINAL: &str = "轻触阅读原文";
    /// "Tags are not clickable in preview"
    pub const PREVIEW_TAGS: &str = "预览时标签不可点";

    pub const ALL: &[&str] = &[SCAN_PROMPT, FOLLOW_PROMPT, NEXT_ARTICLE, READ_ORIGINAL, PREVIEW_TAGS];
}

/// Elements that end a line of extracted text.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "h1", "h2", "h3", "h4", "h5", "h6", "li", "tr",
    "blockquote", "pre", "ul", "ol", "table", "figure", "figcaption",
];

fn is_noise_class(el: ElementRef<'_>) -> bool {
    el.value().classes().any(|tok| {
        let tok = tok.to_ascii_lowercase();
        NOISE_CLASS_WORDS.iter().any(|w| {
            tok == *w || tok.starts_with(&format!("{w}-")) || tok.ends_with(&format!("-{w}"))
        })
    })
}

fn find_container<'a>(document: &'a Html) -> Option<ElementRef<'a>> {
    CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|sel| document.select(&sel).next())
}

/// Depth-first text walk that skips noise subtrees and breaks lines at
/// block boundaries. Whitespace inside text nodes collapses to single spaces.
fn collect_text(el: ElementRef<'_>, noise: &Selector, out: &mut String) {
    for child in el.children() {
        if let Some(child_el) = ElementRef::wrap(child) {
            if noise.matches(&child_el) || is_noise_class(child_el) {
                continue;
            }
            let name = child_el.value().name();
            if name.eq_ignore_ascii_case("br") {
                out.push('\n');
                continue;
            }
            collect_text(child_el, noise, out);
            if BLOCK_TAGS.iter().any(|t| name.eq_ignore_ascii_case(t)) {
                out.push('\n');
            }
        } else if let Some(text) = child.value().as_text() {
            for c in text.chars() {
                out.push(if c.is_whitespace() { ' ' } else { c });
            }
        }
    }
}

fn keep_line(line: &str) -> bool {
    line.chars().count() >= 3
        && line.chars().any(char::is_alphanumeric)
        && !wechat_chrome::ALL.iter().any(|m| line.contains(m))
}

/// Readable text of the main content area, one paragraph per line.
/// `None` when nothing readable is left.
pub fn extract_main_text(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let container = find_container(&document)?;
    let noise = Selector::parse(NOISE_SELECTOR).ok()?;

    let mut raw = String::new();
    collect_text(container, &noise, &mut raw);
    let text = raw
        .lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|l| keep_line(l))
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}
