// src/notify/slack.rs
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

use super::message::{format_text, list_title, ListOptions};
use super::{DeliveryOutcome, MessageFormat, Notifier};
use crate::config::app::WebhookConfig;
use crate::ingest::types::FeedItem;

/// Incoming-webhook channel. Reports go out as the `text` of one message;
/// Slack renders most of the Markdown it understands and shows the rest verbatim.
pub struct SlackNotifier {
    webhook_url: String,
    client: Client,
    list: ListOptions,
}

impl SlackNotifier {
    pub fn new(cfg: &WebhookConfig, list: ListOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("slack http client")?;
        Ok(Self {
            webhook_url: cfg.webhook_url.trim().to_string(),
            client,
            list,
        })
    }

    async fn post_text(&self, text: &str) -> DeliveryOutcome {
        let body = serde_json::json!({ "text": text });
        let res = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .context("slack post")
            .and_then(|rsp| rsp.error_for_status().context("slack non-2xx"));
        match res {
            Ok(_) => DeliveryOutcome::ok("slack webhook accepted"),
            Err(e) => {
                tracing::error!(target: "notify", channel = "slack", error = ?e, "slack webhook failed");
                DeliveryOutcome::failed(format!("slack webhook failed: {e:#}"))
            }
        }
    }
}

#[async_trait::async_trait]
impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    async fn deliver(&self, items: &[FeedItem]) -> DeliveryOutcome {
        if items.is_empty() {
            return DeliveryOutcome::failed("nothing to deliver");
        }
        let text = format_text(&list_title(items.len()), items, &self.list);
        self.post_text(&text).await
    }

    fn supports_custom(&self) -> bool {
        true
    }

    async fn deliver_custom(&self, title: &str, body: &str, _format: MessageFormat) -> DeliveryOutcome {
        self.post_text(&format!("*{title}*\n\n{body}")).await
    }

    async fn test_connection(&self) -> DeliveryOutcome {
        self.post_text("RSS digest: connection test").await
    }
}
