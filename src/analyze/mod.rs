// src/analyze/mod.rs
//! AI-backed analysis stages: cheap relevance pass, full-text enrichment,
//! deep structuring pass and the Markdown report built from its result.

pub mod ai_adapter;
pub mod deep_analysis;
pub mod enrich;
pub mod json_recovery;
pub mod relevance_filter;
pub mod report;

use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyze::ai_adapter::{CompletionError, CompletionRequest};

// Re-export convenient types.
pub use crate::analyze::deep_analysis::{AnalysisResult, DeepAnalyzer};
pub use crate::analyze::relevance_filter::{KeywordRules, RelevanceFilter, Stage1Verdict};
pub use crate::analyze::report::{render_report, ReportOptions};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("completion call failed: {0}")]
    Completion(#[from] CompletionError),
    #[error("no JSON object could be recovered from the response (starts with {snippet:?})")]
    Unparseable { snippet: String },
    #[error("response JSON has an unexpected shape: {0}")]
    Malformed(String),
    #[error("expected {expected} verdicts, got {relevant} relevance flags and {reasons} reasons")]
    LengthMismatch {
        expected: usize,
        relevant: usize,
        reasons: usize,
    },
    #[error("nothing to analyze")]
    EmptyInput,
    #[error("analysis stage is disabled")]
    Disabled,
}

/// Instruction profile for one completion stage. Stage 1 and stage 2 each
/// carry their own, so model and prompt can be tuned independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProfile {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl StageProfile {
    pub fn request(&self, user: String) -> CompletionRequest {
        CompletionRequest {
            system: self.system_prompt.clone(),
            user,
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("analysis_calls_total", "Completion calls issued, by stage.");
        describe_counter!("analysis_failures_total", "Stage failures, by stage and kind.");
        describe_counter!("stage1_kept_total", "Items promoted by the relevance filter.");
        describe_counter!("stage1_rejected_total", "Items rejected by the relevance filter.");
        describe_counter!("enrich_ok_total", "Items enriched with full text.");
        describe_counter!("enrich_fallback_total", "Items left excerpt-only after enrichment failed.");
        describe_counter!("stage2_dropped_refs_total", "Out-of-range article references dropped.");
        describe_histogram!("analysis_call_ms", "Completion call latency in milliseconds, by stage.");
    });
}

/// Short prefix of a response, for log lines and error messages.
pub(crate) fn snippet(s: &str) -> String {
    s.chars().take(200).collect()
}
