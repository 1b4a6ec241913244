// src/notify/pushplus.rs
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::message::{format_items, ListOptions};
use super::{DeliveryOutcome, MessageFormat, Notifier};
use crate::config::app::PushPlusConfig;
use crate::ingest::types::FeedItem;

/// PushPlus "send" endpoint. A reply is a success only when its JSON `code` is 200.
pub struct PushPlusNotifier {
    token: String,
    topic: String,
    template: MessageFormat,
    api_url: String,
    client: Client,
    list: ListOptions,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    token: &'a str,
    title: &'a str,
    content: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    topic: &'a str,
    template: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    code: i64,
    #[serde(default)]
    msg: String,
}

impl PushPlusNotifier {
    pub fn new(cfg: &PushPlusConfig, list: ListOptions) -> Result<Self> {
        let template = MessageFormat::parse(&cfg.template)
            .with_context(|| format!("unknown pushplus template {:?}", cfg.template))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()
            .context("pushplus http client")?;
        Ok(Self {
            token: cfg.token.trim().to_string(),
            topic: cfg.topic.trim().to_string(),
            template,
            api_url: cfg.api_url.clone(),
            client,
            list,
        })
    }

    async fn send(&self, title: &str, content: &str, template: MessageFormat) -> DeliveryOutcome {
        let req = SendRequest {
            token: &self.token,
            title,
            content,
            topic: &self.topic,
            template: template.as_str(),
        };
        match self.post(&req).await {
            Ok(rsp) if rsp.code == 200 => {
                tracing::info!(target: "notify", channel = "pushplus", title, msg = %rsp.msg, "pushplus accepted message");
                DeliveryOutcome::ok(format!("pushplus accepted: {}", rsp.msg))
            }
            Ok(rsp) => {
                tracing::error!(target: "notify", channel = "pushplus", code = rsp.code, msg = %rsp.msg, "pushplus rejected message");
                DeliveryOutcome::failed(format!("pushplus code {}: {}", rsp.code, rsp.msg))
            }
            Err(e) => {
                tracing::error!(target: "notify", channel = "pushplus", error = ?e, "pushplus request failed");
                DeliveryOutcome::failed(format!("pushplus request failed: {e:#}"))
            }
        }
    }

    async fn post(&self, req: &SendRequest<'_>) -> Result<SendResponse> {
        self.client
            .post(&self.api_url)
            .json(req)
            .send()
            .await
            .context("pushplus post")?
            .error_for_status()
            .context("pushplus non-2xx")?
            .json::<SendResponse>()
            .await
            .context("pushplus reply is not JSON")
    }
}

#[async_trait::async_trait]
impl Notifier for PushPlusNotifier {
    fn name(&self) -> &str {
        "pushplus"
    }

    async fn deliver(&self, items: &[FeedItem]) -> DeliveryOutcome {
        if items.is_empty() {
            return DeliveryOutcome::failed("nothing to deliver");
        }
        let (title, body) = format_items(items, self.template, &self.list);
        self.send(&title, &body, self.template).await
    }

    fn supports_custom(&self) -> bool {
        true
    }

    async fn deliver_custom(&self, title: &str, body: &str, format: MessageFormat) -> DeliveryOutcome {
        self.send(title, body, format).await
    }

    async fn test_connection(&self) -> DeliveryOutcome {
        self.send(
            "RSS digest - connection test",
            "Test message to check the PushPlus settings.",
            MessageFormat::Text,
        )
        .await
    }
}
