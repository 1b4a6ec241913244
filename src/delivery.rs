// src/delivery.rs
//! Sends the run's output through each notifier and records what landed.
//!
//! An item is marked in the ledger only after the message carrying it was
//! confirmed by the channel *and* the ledger write itself succeeded.

use std::time::Duration;

use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::ingest::types::FeedItem;
use crate::ledger::DeliveryLedger;
use crate::notify::{MessageFormat, Notifier};

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("delivery_messages_total", "Messages handed to a notifier, by channel and outcome.");
        describe_counter!("delivery_unmarked_total", "Items sent successfully but not recorded in the ledger.");
    });
}

/// A pre-formatted report covering every item of the run.
#[derive(Debug, Clone)]
pub struct Document {
    pub title: String,
    pub body: String,
    pub format: MessageFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Messages attempted.
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Ledger rows written.
    pub marked: usize,
}

impl DeliveryReport {
    fn absorb(&mut self, other: &DeliveryReport) {
        self.batches += other.batches;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.marked += other.marked;
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryCoordinator {
    max_items_per_message: usize,
    pacing: Duration,
}

impl DeliveryCoordinator {
    pub fn new(max_items_per_message: usize, pacing: Duration) -> Self {
        Self {
            max_items_per_message: max_items_per_message.max(1),
            pacing,
        }
    }

    pub fn max_items_per_message(&self) -> usize {
        self.max_items_per_message
    }

    /// Each notifier in order, each marking under its own channel name.
    pub async fn deliver_all(
        &self,
        notifiers: &[Box<dyn Notifier>],
        ledger: &mut DeliveryLedger,
        items: &[FeedItem],
        document: Option<&Document>,
    ) -> DeliveryReport {
        let mut total = DeliveryReport::default();
        for n in notifiers {
            let r = self.deliver(n.as_ref(), ledger, items, document).await;
            tracing::info!(
                target: "delivery",
                channel = n.name(),
                batches = r.batches,
                succeeded = r.succeeded,
                failed = r.failed,
                marked = r.marked,
                "channel done"
            );
            total.absorb(&r);
        }
        total
    }

    pub async fn deliver(
        &self,
        notifier: &dyn Notifier,
        ledger: &mut DeliveryLedger,
        items: &[FeedItem],
        document: Option<&Document>,
    ) -> DeliveryReport {
        ensure_metrics_described();
        let mut report = DeliveryReport::default();
        if items.is_empty() {
            return report;
        }

        if let Some(doc) = document {
            if notifier.supports_custom() {
                let outcome = notifier.deliver_custom(&doc.title, &doc.body, doc.format).await;
                self.settle(notifier.name(), ledger, items, outcome.success, &outcome.message, &mut report);
                return report;
            }
            tracing::warn!(
                target: "delivery",
                channel = notifier.name(),
                "channel takes no custom messages; sending the plain item list"
            );
        }

        let batches: Vec<&[FeedItem]> = items.chunks(self.max_items_per_message).collect();
        let n = batches.len();
        tracing::info!(target: "delivery", channel = notifier.name(), items = items.len(), batches = n, "sending in batches");
        for (i, batch) in batches.into_iter().enumerate() {
            let outcome = notifier.deliver(batch).await;
            self.settle(notifier.name(), ledger, batch, outcome.success, &outcome.message, &mut report);
            if i + 1 < n && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
        }
        report
    }

    fn settle(
        &self,
        channel: &str,
        ledger: &mut DeliveryLedger,
        items: &[FeedItem],
        success: bool,
        message: &str,
        report: &mut DeliveryReport,
    ) {
        report.batches += 1;
        if !success {
            report.failed += 1;
            counter!("delivery_messages_total", "channel" => channel.to_string(), "outcome" => "failed").increment(1);
            tracing::error!(target: "delivery", channel, items = items.len(), reply = message, "delivery failed; items stay eligible");
            return;
        }

        report.succeeded += 1;
        counter!("delivery_messages_total", "channel" => channel.to_string(), "outcome" => "ok").increment(1);
        match ledger.mark_delivered(items, channel, true) {
            Ok(rows) => report.marked += rows,
            Err(e) => {
                counter!("delivery_unmarked_total").increment(items.len() as u64);
                tracing::error!(
                    target: "delivery",
                    channel,
                    error = %e,
                    items = items.len(),
                    "sent but not recorded; these items may be delivered again"
                );
            }
        }
    }
}
