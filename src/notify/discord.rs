// src/notify/discord.rs
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;

use super::message::{format_markdown, list_title, ListOptions};
use super::{DeliveryOutcome, Notifier};
use crate::config::app::WebhookConfig;
use crate::ingest::types::FeedItem;

/// Discord caps an embed description at 4096 characters.
const MAX_DESCRIPTION: usize = 4_096;

/// Item lists as one embed. Full reports do not fit an embed, so this
/// channel only takes plain batches.
#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    list: ListOptions,
}

impl DiscordNotifier {
    pub fn new(cfg: &WebhookConfig, list: ListOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("discord http client")?;
        Ok(Self {
            webhook: cfg.webhook_url.trim().to_string(),
            client,
            list,
        })
    }

    async fn post(&self, payload: &DiscordWebhookPayload) -> DeliveryOutcome {
        let res = self
            .client
            .post(&self.webhook)
            .json(payload)
            .send()
            .await
            .context("discord post")
            .and_then(|rsp| rsp.error_for_status().context("discord non-2xx"));
        match res {
            Ok(_) => DeliveryOutcome::ok("discord webhook accepted"),
            Err(e) => {
                tracing::error!(target: "notify", channel = "discord", error = ?e, "discord webhook failed");
                DeliveryOutcome::failed(format!("discord webhook failed: {e:#}"))
            }
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &str {
        "discord"
    }

    async fn deliver(&self, items: &[FeedItem]) -> DeliveryOutcome {
        if items.is_empty() {
            return DeliveryOutcome::failed("nothing to deliver");
        }
        let title = list_title(items.len());
        // The embed carries the title; skip the Markdown header line.
        let body = format_markdown(&title, items, &self.list);
        let description = body.split_once('\n').map(|(_, rest)| rest).unwrap_or(&body);
        self.post(&DiscordWebhookPayload::embed(&title, description)).await
    }

    async fn test_connection(&self) -> DeliveryOutcome {
        self.post(&DiscordWebhookPayload::embed(
            "RSS digest",
            "Connection test: this webhook is configured correctly.",
        ))
        .await
    }
}

#[derive(Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
}

#[derive(Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn embed(title: &str, description: &str) -> Self {
        let mut description: String = description.trim().chars().take(MAX_DESCRIPTION).collect();
        if description.is_empty() {
            description.push('-');
        }
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: title.to_string(),
                description,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_description_is_capped() {
        let p = DiscordWebhookPayload::embed("t", &"x".repeat(5_000));
        assert_eq!(p.embeds[0].description.chars().count(), MAX_DESCRIPTION);
        let v = serde_json::to_value(&p).unwrap();
        assert!(v["content"].is_null());
        assert_eq!(v["embeds"][0]["title"], "t");
    }
}
