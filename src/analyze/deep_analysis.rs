// src/analyze/deep_analysis.rs
//! Stage 2: one expensive completion call that sorts the surviving items
//! into rated categories with per-article reasons and tags.
//!
//! Article references are 1-based positions in the list handed to this
//! stage. References outside `1..=N` are dropped with a warning; a category
//! left with no references disappears.

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::analyze::ai_adapter::CompletionClient;
use crate::analyze::json_recovery::recover_object;
use crate::analyze::{ensure_metrics_described, snippet, AnalysisError, StageProfile};
use crate::ingest::types::FeedItem;

pub const DEFAULT_ICON: &str = "📌";
pub const DEFAULT_NAME: &str = "Uncategorized";
pub const DEFAULT_LEVEL: u8 = 3;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleRef {
    pub article_id: usize,
    pub reason: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Category {
    pub key: String,
    pub name: String,
    pub icon: String,
    /// 1..=5
    pub level: u8,
    pub description: String,
    pub articles: Vec<ArticleRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummarySection {
    pub title: String,
    pub insight: String,
    pub trends: Vec<String>,
}

impl SummarySection {
    pub fn has_narrative(&self) -> bool {
        !self.insight.trim().is_empty() || !self.trends.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub categories: Vec<Category>,
    pub summary_section: Option<SummarySection>,
    /// Older single-line summary shape.
    pub summary: Option<String>,
}

impl AnalysisResult {
    /// Lenient read of the model's JSON object.
    pub fn from_json(obj: &Map<String, Value>) -> Result<Self, AnalysisError> {
        let categories = match obj.get("categories") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(list)) => list
                .iter()
                .enumerate()
                .filter_map(|(i, v)| {
                    v.as_object()
                        .map(|o| parse_category(&i.to_string(), o, DEFAULT_NAME))
                })
                .collect(),
            Some(Value::Object(map)) => {
                let mut cats: Vec<Category> = map
                    .iter()
                    .filter_map(|(k, v)| v.as_object().map(|o| parse_category(k, o, k)))
                    .collect();
                // keyed shape: most important first, then by key
                cats.sort_by(|a, b| b.level.cmp(&a.level).then_with(|| a.key.cmp(&b.key)));
                cats
            }
            Some(other) => {
                return Err(AnalysisError::Malformed(format!(
                    "`categories` must be an array or object, got {}",
                    kind(other)
                )))
            }
        };

        let summary_section = obj
            .get("summary_section")
            .and_then(Value::as_object)
            .map(|o| SummarySection {
                title: str_field(o, "title").unwrap_or_default(),
                insight: str_field(o, "insight").unwrap_or_default(),
                trends: string_list(o.get("trends")),
            });
        let summary = str_field(obj, "summary").filter(|s| !s.is_empty());

        Ok(Self {
            categories,
            summary_section,
            summary,
        })
    }

    /// Drop references outside `1..=n` and then empty categories.
    /// Returns how many references were dropped.
    pub fn retain_valid_refs(&mut self, n: usize) -> usize {
        let mut dropped = 0usize;
        for cat in &mut self.categories {
            cat.articles.retain(|a| {
                let ok = (1..=n).contains(&a.article_id);
                if !ok {
                    tracing::warn!(
                        target: "analysis",
                        article_id = a.article_id,
                        n,
                        category = %cat.name,
                        "article reference out of range; dropped"
                    );
                    dropped += 1;
                }
                ok
            });
        }
        self.categories.retain(|c| !c.articles.is_empty());
        dropped
    }

    pub fn is_digest(&self) -> bool {
        self.summary_section
            .as_ref()
            .is_some_and(SummarySection::has_narrative)
    }

    pub fn article_count(&self) -> usize {
        self.categories.iter().map(|c| c.articles.len()).sum()
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn str_field(o: &Map<String, Value>, key: &str) -> Option<String> {
    match o.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Non-negative integer from a number or numeric string.
fn uint_field(o: &Map<String, Value>, key: &str) -> Option<u64> {
    match o.get(key)? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Array of strings, or one comma-separated string.
fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(a)) => a
            .iter()
            .filter_map(|x| match x {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split([',', '，'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        _ => Vec::new(),
    }
}

fn parse_category(key: &str, o: &Map<String, Value>, fallback_name: &str) -> Category {
    let level = uint_field(o, "level")
        .map(|l| l.clamp(1, 5) as u8)
        .unwrap_or(DEFAULT_LEVEL);
    let articles = o
        .get("articles")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_object)
                .map(|a| ArticleRef {
                    // unusable ids become 0 and are dropped by range validation
                    article_id: uint_field(a, "article_id")
                        .or_else(|| uint_field(a, "id"))
                        .and_then(|v| usize::try_from(v).ok())
                        .unwrap_or(0),
                    reason: str_field(a, "reason").unwrap_or_default(),
                    tags: string_list(a.get("tags")),
                })
                .collect()
        })
        .unwrap_or_default();

    Category {
        key: key.to_string(),
        name: str_field(o, "name")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| fallback_name.to_string()),
        icon: str_field(o, "icon")
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_ICON.to_string()),
        level,
        description: str_field(o, "description").unwrap_or_default(),
        articles,
    }
}

#[derive(Debug, Clone)]
pub struct DeepAnalyzer {
    pub profile: StageProfile,
}

const RESPONSE_SHAPE: &str = r#"Reply with one JSON object only, shaped like:
{
  "summary_section": {"title": "...", "insight": "...", "trends": ["...", "..."]},
  "categories": [
    {"name": "...", "icon": "...", "level": 1-5, "description": "...",
     "articles": [{"article_id": <number from the list above>, "reason": "...", "tags": ["..."]}]}
  ]
}"#;

impl DeepAnalyzer {
    pub fn new(profile: StageProfile) -> Self {
        Self { profile }
    }

    pub fn build_prompt(&self, items: &[FeedItem]) -> String {
        let mut out = format!("{} articles follow.\n\n", items.len());
        for (i, it) in items.iter().enumerate() {
            out.push_str(&format!(
                "[Article {}]\nTitle: {}\nLink: {}\nContent: {}\n\n",
                i + 1,
                it.title,
                it.link,
                it.analysis_body()
            ));
        }
        out.push_str(RESPONSE_SHAPE);
        out
    }

    /// Analyze `items`; references in the result index into this same slice.
    pub async fn analyze(
        &self,
        client: &dyn CompletionClient,
        items: &[FeedItem],
    ) -> Result<AnalysisResult, AnalysisError> {
        ensure_metrics_described();
        if items.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }

        let req = self.profile.request(self.build_prompt(items));
        counter!("analysis_calls_total", "stage" => "stage2").increment(1);
        let t0 = std::time::Instant::now();
        let reply = client.complete(&req).await;
        histogram!("analysis_call_ms", "stage" => "stage2").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let res = reply
            .map_err(AnalysisError::from)
            .and_then(|text| parse_analysis(&text, items.len()));

        match &res {
            Ok(r) => tracing::info!(
                target: "analysis",
                categories = r.categories.len(),
                articles = r.article_count(),
                digest = r.is_digest(),
                "stage-2 done"
            ),
            Err(e) => {
                counter!("analysis_failures_total", "stage" => "stage2").increment(1);
                tracing::warn!(target: "analysis", error = %e, items = items.len(), "stage-2 analysis failed");
            }
        }
        res
    }
}

/// Recover, read and validate a stage-2 reply against `n` analyzed items.
/// A reply with no valid reference left counts as malformed.
pub fn parse_analysis(text: &str, n: usize) -> Result<AnalysisResult, AnalysisError> {
    let (obj, _) = recover_object(text).ok_or_else(|| AnalysisError::Unparseable {
        snippet: snippet(text),
    })?;
    let mut result = AnalysisResult::from_json(&obj)?;
    let dropped = result.retain_valid_refs(n);
    if dropped > 0 {
        counter!("stage2_dropped_refs_total").increment(dropped as u64);
    }
    if result.categories.is_empty() {
        return Err(AnalysisError::Malformed(
            "no category references a valid article".into(),
        ));
    }
    Ok(result)
}
