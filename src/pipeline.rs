// src/pipeline.rs
//! One pipeline run, start to finish:
//! fetch → normalize → dedup/sort → ledger filter → stage 1 → enrichment →
//! stage 2 → report → batched delivery → ledger marks.
//!
//! Nothing escapes a run: every failure is logged, counted and folded into
//! the returned [`RunSummary`]. A shutdown flag is honoured between stages.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset, NaiveTime, Offset, Utc};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::analyze::ai_adapter::{build_completion_client, DynCompletionClient};
use crate::analyze::enrich::{enrich_items, DEFAULT_FULL_TEXT_CHARS};
use crate::analyze::{render_report, DeepAnalyzer, KeywordRules, RelevanceFilter, ReportOptions};
use crate::config::AppConfig;
use crate::delivery::{DeliveryCoordinator, DeliveryReport, Document};
use crate::extract::{HttpPageExtractor, PageTextExtractor};
use crate::ingest::dedup::{deduplicate, filter_today, limit_items, sort_by_time};
use crate::ingest::providers::RssFeedSource;
use crate::ingest::types::FeedSource;
use crate::ledger::DeliveryLedger;
use crate::notify::{build_notifiers, MessageFormat, Notifier};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("pipeline_runs_total", "Pipeline runs, by final status.");
        describe_histogram!("pipeline_run_ms", "Wall time of one pipeline run in milliseconds.");
    });
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Completed,
    OutsideWindow,
    NoItems,
    NothingNew,
    NothingRelevant,
    Interrupted,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Completed => "completed",
            RunStatus::OutsideWindow => "outside_window",
            RunStatus::NoItems => "no_items",
            RunStatus::NothingNew => "nothing_new",
            RunStatus::NothingRelevant => "nothing_relevant",
            RunStatus::Interrupted => "interrupted",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub status: RunStatus,
    pub fetched: usize,
    /// After dedup, sort and the optional today/limit stages.
    pub candidates: usize,
    pub undelivered: usize,
    pub relevant: usize,
    pub enriched: usize,
    /// Whether stage 2 produced a report for this run.
    pub report: bool,
    pub delivery: DeliveryReport,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub utc_offset: FixedOffset,
    pub sort_descending: bool,
    pub today_only: bool,
    pub max_items: usize,
    /// Local `(start, end)`; `start > end` wraps past midnight.
    pub time_window: Option<(NaiveTime, NaiveTime)>,
    pub full_text_chars: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            sort_descending: true,
            today_only: false,
            max_items: 0,
            time_window: None,
            full_text_chars: DEFAULT_FULL_TEXT_CHARS,
        }
    }
}

impl PipelineOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            utc_offset: cfg.utc_offset(),
            sort_descending: cfg.pipeline.sort_descending,
            today_only: cfg.pipeline.today_only,
            max_items: cfg.pipeline.max_items,
            time_window: cfg.pipeline.time_window.bounds(),
            full_text_chars: cfg.enrichment.max_chars,
        }
    }
}

/// Inclusive at both ends.
pub fn within_window(now: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start <= end {
        start <= now && now <= end
    } else {
        now >= start || now <= end
    }
}

pub struct Pipeline {
    source: Box<dyn FeedSource>,
    ledger: DeliveryLedger,
    notifiers: Vec<Box<dyn Notifier>>,
    coordinator: DeliveryCoordinator,
    extractor: Option<Box<dyn PageTextExtractor>>,
    client: Option<DynCompletionClient>,
    relevance: Option<RelevanceFilter>,
    rules: Option<KeywordRules>,
    deep: Option<DeepAnalyzer>,
    report: ReportOptions,
    opts: PipelineOptions,
    shutdown: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn FeedSource>,
        ledger: DeliveryLedger,
        notifiers: Vec<Box<dyn Notifier>>,
        coordinator: DeliveryCoordinator,
    ) -> Self {
        Self {
            source,
            ledger,
            notifiers,
            coordinator,
            extractor: None,
            client: None,
            relevance: None,
            rules: None,
            deep: None,
            report: ReportOptions::default(),
            opts: PipelineOptions::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Everything from `config/app.toml`: RSS over HTTP, the enabled channels,
    /// and the AI stages when switched on.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let source = RssFeedSource::from_url(&cfg.feed.url, Duration::from_secs(cfg.feed.timeout_secs))?;
        let coordinator = DeliveryCoordinator::new(
            cfg.delivery.max_items_per_message,
            Duration::from_millis(cfg.delivery.pacing_ms),
        );
        let mut p = Pipeline::new(
            Box::new(source),
            DeliveryLedger::new(&cfg.ledger.path),
            build_notifiers(cfg)?,
            coordinator,
        )
        .with_options(PipelineOptions::from_config(cfg))
        .with_report_options(cfg.report_options());

        if cfg.ai_enabled() {
            p = p.with_completion(build_completion_client(&cfg.ai)?);
        }
        let s1 = &cfg.analysis.stage1;
        if s1.enabled {
            let mut f = RelevanceFilter::new(cfg.stage1_profile(), s1.interests.clone());
            f.threshold = s1.threshold;
            f.excerpt_chars = s1.excerpt_chars;
            p = p.with_relevance_filter(f);
        }
        if let Some(rules) = cfg.keyword_rules() {
            p = p.with_keyword_rules(rules);
        }
        if cfg.analysis.stage2.enabled {
            p = p.with_deep_analysis(DeepAnalyzer::new(cfg.stage2_profile()));
        }
        if cfg.enrichment.enabled {
            let e = &cfg.enrichment;
            p = p.with_extractor(Box::new(HttpPageExtractor::new(
                Duration::from_secs(e.timeout_secs.max(1)),
                e.max_attempts,
                Duration::from_millis(e.backoff_ms),
            )?));
        }
        Ok(p)
    }

    pub fn with_options(mut self, opts: PipelineOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn with_report_options(mut self, report: ReportOptions) -> Self {
        self.report = report;
        self
    }

    pub fn with_completion(mut self, client: DynCompletionClient) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_relevance_filter(mut self, f: RelevanceFilter) -> Self {
        self.relevance = Some(f);
        self
    }

    /// Stage 1 for runs without an AI relevance pass.
    pub fn with_keyword_rules(mut self, rules: KeywordRules) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_deep_analysis(mut self, d: DeepAnalyzer) -> Self {
        self.deep = Some(d);
        self
    }

    pub fn with_extractor(mut self, e: Box<dyn PageTextExtractor>) -> Self {
        self.extractor = Some(e);
        self
    }

    /// Setting the flag stops the current run at the next stage boundary.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn ledger_mut(&mut self) -> &mut DeliveryLedger {
        &mut self.ledger
    }

    pub fn notifiers(&self) -> &[Box<dyn Notifier>] {
        &self.notifiers
    }

    pub async fn run_once(&mut self) -> RunSummary {
        self.run_once_at(Utc::now()).await
    }

    /// `now` drives the delivery window and the today-only filter.
    pub async fn run_once_at(&mut self, now: DateTime<Utc>) -> RunSummary {
        ensure_metrics_described();
        let t0 = Instant::now();
        let summary = self.run_stages(now).await;
        histogram!("pipeline_run_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("pipeline_runs_total", "status" => summary.status.as_str()).increment(1);
        tracing::info!(
            target: "pipeline",
            status = summary.status.as_str(),
            fetched = summary.fetched,
            undelivered = summary.undelivered,
            relevant = summary.relevant,
            report = summary.report,
            sent = summary.delivery.succeeded,
            failed = summary.delivery.failed,
            marked = summary.delivery.marked,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "run finished"
        );
        summary
    }

    fn interrupted(&self, before: &str) -> bool {
        let stop = self.shutdown.load(Ordering::SeqCst);
        if stop {
            tracing::warn!(target: "pipeline", before, "shutdown requested; stopping run");
        }
        stop
    }

    async fn run_stages(&mut self, now: DateTime<Utc>) -> RunSummary {
        let mut s = RunSummary::default();

        if let Some((start, end)) = self.opts.time_window {
            let local = now.with_timezone(&self.opts.utc_offset).time();
            if !within_window(local, start, end) {
                tracing::info!(target: "pipeline", %local, %start, %end, "outside delivery window; skipping run");
                s.status = RunStatus::OutsideWindow;
                return s;
            }
        }

        let items = crate::ingest::collect_items(self.source.as_ref()).await;
        s.fetched = items.len();
        if items.is_empty() {
            s.status = RunStatus::NoItems;
            return s;
        }

        let mut items = sort_by_time(deduplicate(items), self.opts.sort_descending);
        if self.opts.today_only {
            items = filter_today(items, now, self.opts.utc_offset);
        }
        let items = limit_items(items, self.opts.max_items);
        s.candidates = items.len();
        if items.is_empty() {
            s.status = RunStatus::NoItems;
            return s;
        }
        if self.interrupted("ledger filter") {
            s.status = RunStatus::Interrupted;
            return s;
        }

        let items = self.ledger.filter_undelivered(items);
        s.undelivered = items.len();
        if items.is_empty() {
            tracing::info!(target: "pipeline", "everything was delivered already");
            s.status = RunStatus::NothingNew;
            return s;
        }
        if self.interrupted("relevance filter") {
            s.status = RunStatus::Interrupted;
            return s;
        }

        let items = match (&self.relevance, self.client.as_deref()) {
            (Some(filter), Some(client)) => match filter.filter(client, items).await {
                Ok(kept) => kept,
                Err(e) => {
                    tracing::warn!(target: "pipeline", error = %e, "relevance filter failed; nothing passes this run");
                    Vec::new()
                }
            },
            _ => match &self.rules {
                Some(rules) => rules.filter(items),
                None => items,
            },
        };
        s.relevant = items.len();
        if items.is_empty() {
            s.status = RunStatus::NothingRelevant;
            return s;
        }

        let mut document = None;
        let mut items = items;
        if let (Some(deep), Some(client)) = (&self.deep, self.client.as_deref()) {
            if self.interrupted("enrichment") {
                s.status = RunStatus::Interrupted;
                return s;
            }
            items = enrich_items(self.extractor.as_deref(), items, self.opts.full_text_chars).await;
            s.enriched = items.iter().filter(|i| i.full_text().is_some()).count();

            if self.interrupted("deep analysis") {
                s.status = RunStatus::Interrupted;
                return s;
            }
            match deep.analyze(client, &items).await {
                Ok(analysis) => {
                    document = Some(Document {
                        title: self.report.title.clone(),
                        body: render_report(&analysis, &items, &self.report),
                        format: MessageFormat::Markdown,
                    });
                    s.report = true;
                }
                Err(e) => {
                    tracing::warn!(target: "pipeline", error = %e, "deep analysis failed; delivering the plain item list");
                }
            }
        }

        if self.interrupted("delivery") {
            s.status = RunStatus::Interrupted;
            return s;
        }
        s.delivery = self
            .coordinator
            .deliver_all(&self.notifiers, &mut self.ledger, &items, document.as_ref())
            .await;

        let stats = self.ledger.statistics();
        tracing::info!(
            target: "pipeline",
            total = stats.total,
            today = stats.delivered_today,
            week = stats.delivered_this_week,
            "ledger totals"
        );
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn plain_window() {
        assert!(within_window(t(9, 0), t(8, 0), t(22, 0)));
        assert!(within_window(t(22, 0), t(8, 0), t(22, 0)));
        assert!(!within_window(t(7, 59), t(8, 0), t(22, 0)));
    }

    #[test]
    fn window_across_midnight() {
        assert!(within_window(t(23, 30), t(22, 0), t(6, 0)));
        assert!(within_window(t(1, 0), t(22, 0), t(6, 0)));
        assert!(!within_window(t(12, 0), t(22, 0), t(6, 0)));
    }
}
