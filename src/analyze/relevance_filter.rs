// src/analyze/relevance_filter.rs
//! Stage 1: one cheap completion call over titles + short excerpts.
//!
//! The model answers with parallel arrays, `relevant` and `reason`, one
//! entry per input item. Anything but exactly N entries in each fails the
//! whole call; verdicts are never applied partially.
//!
//! Without a completion service, [`KeywordRules`] fills the same role from
//! include/exclude keyword lists.

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::analyze::ai_adapter::CompletionClient;
use crate::analyze::json_recovery::recover_object;
use crate::analyze::{ensure_metrics_described, snippet, AnalysisError, StageProfile};
use crate::ingest::types::FeedItem;

pub const DEFAULT_THRESHOLD: f64 = 0.5;
pub const DEFAULT_EXCERPT_CHARS: usize = 200;

pub const RULE_BASE_SCORE: f64 = 5.0;
pub const RULE_INCLUDE_BONUS: f64 = 1.0;
pub const RULE_EXCLUDE_PENALTY: f64 = 2.0;
pub const RULE_MAX_SCORE: f64 = 10.0;
pub const DEFAULT_RULE_MIN_SCORE: f64 = 6.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage1Verdict {
    pub identity: String,
    pub keep: bool,
    pub reason: String,
    /// 0.0..=1.0; binary answers map to the ends.
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    pub profile: StageProfile,
    pub interests: Vec<String>,
    pub threshold: f64,
    pub excerpt_chars: usize,
}

impl RelevanceFilter {
    pub fn new(profile: StageProfile, interests: Vec<String>) -> Self {
        Self {
            profile,
            interests,
            threshold: DEFAULT_THRESHOLD,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }

    pub fn build_prompt(&self, items: &[FeedItem]) -> String {
        let mut out = String::new();
        if !self.interests.is_empty() {
            out.push_str("Reader interests:\n");
            for i in &self.interests {
                out.push_str(&format!("- {i}\n"));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "Judge each of the {n} articles below. Reply with one JSON object only:\n\
             {{\"relevant\": [1 or 0 for each article, in order], \"reason\": [\"short reason\" for each article, in order]}}\n\
             Both arrays must have exactly {n} entries.\n\n",
            n = items.len()
        ));
        for (i, it) in items.iter().enumerate() {
            out.push_str(&format!("[{}] {}\n", i + 1, it.title));
            let ex = it.excerpt_with_limit(self.excerpt_chars);
            if !ex.is_empty() {
                out.push_str(&format!("Excerpt: {ex}\n"));
            }
            out.push('\n');
        }
        out
    }

    /// One verdict per input item, in input order.
    pub async fn score(
        &self,
        client: &dyn CompletionClient,
        items: &[FeedItem],
    ) -> Result<Vec<Stage1Verdict>, AnalysisError> {
        ensure_metrics_described();
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let req = self.profile.request(self.build_prompt(items));
        counter!("analysis_calls_total", "stage" => "stage1").increment(1);
        let t0 = std::time::Instant::now();
        let reply = client.complete(&req).await;
        histogram!("analysis_call_ms", "stage" => "stage1").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let res = reply
            .map_err(AnalysisError::from)
            .and_then(|text| {
                recover_object(&text)
                    .map(|(obj, _)| obj)
                    .ok_or_else(|| AnalysisError::Unparseable {
                        snippet: snippet(&text),
                    })
            })
            .and_then(|obj| parse_verdicts(&obj, items, self.threshold));

        if let Err(e) = &res {
            counter!("analysis_failures_total", "stage" => "stage1").increment(1);
            tracing::warn!(target: "analysis", error = %e, items = items.len(), "stage-1 relevance call failed");
        }
        res
    }

    /// Survivors in input order. Errors are returned as-is; the caller picks the default.
    pub async fn filter(
        &self,
        client: &dyn CompletionClient,
        items: Vec<FeedItem>,
    ) -> Result<Vec<FeedItem>, AnalysisError> {
        let verdicts = self.score(client, &items).await?;
        let total = items.len();
        let kept: Vec<FeedItem> = items
            .into_iter()
            .zip(verdicts.iter())
            .filter(|(_, v)| v.keep)
            .map(|(it, v)| {
                tracing::debug!(target: "analysis", title = %it.title, score = v.score, reason = %v.reason, "stage-1 keep");
                it
            })
            .collect();

        counter!("stage1_kept_total").increment(kept.len() as u64);
        counter!("stage1_rejected_total").increment((total - kept.len()) as u64);
        tracing::info!(target: "analysis", total, kept = kept.len(), threshold = self.threshold, "stage-1 done");
        Ok(kept)
    }
}

/// Keyword scoring on a 0-10 scale: every item starts at 5, gains 1 per
/// matching include keyword and loses 2 per matching exclude keyword.
/// Matching is case-insensitive substring search over title and excerpt.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordRules {
    include: Vec<String>,
    exclude: Vec<String>,
    /// Keep iff the 0-10 score reaches this.
    pub min_score: f64,
}

impl KeywordRules {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        let clean = |words: &[String]| {
            words
                .iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect::<Vec<_>>()
        };
        Self {
            include: clean(include),
            exclude: clean(exclude),
            min_score: DEFAULT_RULE_MIN_SCORE,
        }
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Raw score, clamped to `0.0..=10.0`.
    pub fn raw_score(&self, item: &FeedItem) -> f64 {
        let text = format!("{} {}", item.title, item.excerpt).to_lowercase();
        let hits = |words: &[String]| words.iter().filter(|w| text.contains(w.as_str())).count() as f64;
        let score = RULE_BASE_SCORE + hits(&self.include) * RULE_INCLUDE_BONUS
            - hits(&self.exclude) * RULE_EXCLUDE_PENALTY;
        score.clamp(0.0, RULE_MAX_SCORE)
    }

    /// The 0-10 score lands in `Stage1Verdict::score` divided by ten.
    pub fn verdict(&self, item: &FeedItem) -> Stage1Verdict {
        let raw = self.raw_score(item);
        let text = format!("{} {}", item.title, item.excerpt).to_lowercase();
        let matched = |words: &[String]| {
            words
                .iter()
                .filter(|w| text.contains(w.as_str()))
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        };
        let (inc, exc) = (matched(&self.include), matched(&self.exclude));
        let reason = match (inc.is_empty(), exc.is_empty()) {
            (true, true) => "no keyword matched".to_string(),
            (false, true) => format!("matched {inc}"),
            (true, false) => format!("excluded by {exc}"),
            (false, false) => format!("matched {inc}; excluded by {exc}"),
        };
        Stage1Verdict {
            identity: item.identity.clone(),
            keep: raw >= self.min_score,
            reason,
            score: raw / RULE_MAX_SCORE,
        }
    }

    /// Survivors in input order.
    pub fn filter(&self, items: Vec<FeedItem>) -> Vec<FeedItem> {
        ensure_metrics_described();
        let total = items.len();
        let kept: Vec<FeedItem> = items
            .into_iter()
            .filter(|it| {
                let v = self.verdict(it);
                tracing::debug!(target: "analysis", title = %it.title, score = v.score, reason = %v.reason, keep = v.keep, "keyword rules");
                v.keep
            })
            .collect();

        counter!("stage1_kept_total").increment(kept.len() as u64);
        counter!("stage1_rejected_total").increment((total - kept.len()) as u64);
        tracing::info!(target: "analysis", total, kept = kept.len(), min_score = self.min_score, "keyword rules done");
        kept
    }
}

/// Validate the parallel arrays and turn them into verdicts.
pub fn parse_verdicts(
    obj: &Map<String, Value>,
    items: &[FeedItem],
    threshold: f64,
) -> Result<Vec<Stage1Verdict>, AnalysisError> {
    let relevant = obj
        .get("relevant")
        .and_then(Value::as_array)
        .ok_or_else(|| AnalysisError::Malformed("missing `relevant` array".into()))?;
    let reasons = obj
        .get("reason")
        .or_else(|| obj.get("reasons"))
        .and_then(Value::as_array)
        .ok_or_else(|| AnalysisError::Malformed("missing `reason` array".into()))?;

    if relevant.len() != items.len() || reasons.len() != items.len() {
        return Err(AnalysisError::LengthMismatch {
            expected: items.len(),
            relevant: relevant.len(),
            reasons: reasons.len(),
        });
    }

    items
        .iter()
        .zip(relevant.iter().zip(reasons.iter()))
        .enumerate()
        .map(|(i, (it, (flag, reason)))| {
            let score = relevance_score(flag).ok_or_else(|| {
                AnalysisError::Malformed(format!("relevant[{i}] is not a flag or score: {flag}"))
            })?;
            Ok(Stage1Verdict {
                identity: it.identity.clone(),
                keep: score >= threshold,
                reason: match reason {
                    Value::String(s) => s.trim().to_string(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
                score,
            })
        })
        .collect()
}

/// `1`/`0`, booleans, numbers in [0,1] and their string spellings, clamped.
fn relevance_score(v: &Value) -> Option<f64> {
    let raw = match v {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let s = s.trim();
            match s.to_ascii_lowercase().as_str() {
                "true" | "yes" => Some(1.0),
                "false" | "no" => Some(0.0),
                _ => s.parse::<f64>().ok(),
            }
        }
        _ => None,
    }?;
    raw.is_finite().then(|| raw.clamp(0.0, 1.0))
}
