// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod delivery;
pub mod extract;
pub mod ingest;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;

// Stage 1 / enrichment / stage 2 / report
pub mod analyze;

// Push channels
pub mod notify;

// ---- Re-exports for stable public API ----
pub use analyze::ai_adapter;
pub use crate::config::AppConfig;
pub use crate::delivery::{DeliveryCoordinator, DeliveryReport, Document};
pub use crate::ingest::types::{FeedItem, FeedSource, RawEntry};
pub use crate::ledger::{DeliveryLedger, LedgerStats};
pub use crate::notify::{DeliveryOutcome, MessageFormat, Notifier};
pub use crate::pipeline::{Pipeline, RunStatus, RunSummary};

use crate::analyze::ai_adapter::{CompletionClient, CompletionRequest};

/// One tiny completion call to check the AI settings. Never panics; the
/// outcome is logged and returned.
pub async fn run_ai_quick_probe(client: &dyn CompletionClient, model: &str) -> anyhow::Result<()> {
    let req = CompletionRequest {
        system: "Reply with the single word: ok".into(),
        user: "ping".into(),
        model: model.to_string(),
        max_tokens: 5,
        temperature: 0.0,
    };
    let reply = client.complete(&req).await?;
    tracing::info!(target: "analysis", provider = client.provider_name(), reply = %reply.trim(), "AI quick probe finished");
    Ok(())
}
