// tests/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use rss_digest::delivery::DeliveryCoordinator;
use rss_digest::ingest::types::{FeedItem, RawEntry, StaticFeedSource};
use rss_digest::ledger::DeliveryLedger;
use rss_digest::notify::{DeliveryOutcome, MessageFormat, Notifier, RecordingNotifier};
use rss_digest::pipeline::Pipeline;
use rss_digest::scheduler::{run_scheduler, Trigger};

struct Shared(Arc<RecordingNotifier>);

#[async_trait::async_trait]
impl Notifier for Shared {
    fn name(&self) -> &str {
        self.0.name()
    }
    async fn deliver(&self, items: &[FeedItem]) -> DeliveryOutcome {
        self.0.deliver(items).await
    }
    async fn deliver_custom(&self, title: &str, body: &str, format: MessageFormat) -> DeliveryOutcome {
        self.0.deliver_custom(title, body, format).await
    }
    async fn test_connection(&self) -> DeliveryOutcome {
        self.0.test_connection().await
    }
}

fn entries(n: usize) -> Vec<RawEntry> {
    (1..=n)
        .map(|i| RawEntry {
            id: Some(format!("g{i}")),
            title: Some(format!("T{i}")),
            link: Some(format!("https://x/{i}")),
            ..Default::default()
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn interval_runs_at_start_then_every_tick_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(RecordingNotifier::new("rec"));
    let mut pipeline = Pipeline::new(
        Box::new(StaticFeedSource { entries: entries(2) }),
        DeliveryLedger::new(dir.path().join("ledger.db")),
        vec![Box::new(Shared(notifier.clone()))],
        DeliveryCoordinator::new(10, Duration::ZERO),
    );

    // ticks at 0s, 60s and 120s; shutdown lands at 150s while idle
    let runs = run_scheduler(
        &mut pipeline,
        Trigger::Interval(Duration::from_secs(60)),
        tokio::time::sleep(Duration::from_secs(150)),
    )
    .await;
    assert_eq!(runs, 3);

    // only the first run had anything new to send
    assert_eq!(notifier.sent().len(), 1);

    // the scheduler closes the ledger on the way out; reads now fail open
    assert!(!pipeline.ledger_mut().is_delivered("g1"));
    let mut reopened = DeliveryLedger::new(dir.path().join("ledger.db"));
    assert!(reopened.is_delivered("g1"));
}

#[tokio::test(start_paused = true)]
async fn immediate_shutdown_still_closes_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(
        Box::new(StaticFeedSource { entries: Vec::new() }),
        DeliveryLedger::new(dir.path().join("ledger.db")),
        Vec::new(),
        DeliveryCoordinator::new(10, Duration::ZERO),
    );

    let runs = run_scheduler(
        &mut pipeline,
        Trigger::Interval(Duration::from_secs(60)),
        std::future::ready(()),
    )
    .await;
    assert!(runs <= 1);
}
