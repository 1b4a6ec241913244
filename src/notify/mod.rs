// src/notify/mod.rs
//! Outbound push channels.
//!
//! A notifier either sends a plain list of items or, when it supports it,
//! one pre-formatted document. Every call yields a [`DeliveryOutcome`];
//! transport errors are folded into a failed outcome rather than raised.

pub mod discord;
pub mod email;
pub mod message;
pub mod pushplus;
pub mod slack;

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::Result;
use serde::Serialize;

use crate::config::AppConfig;
use crate::ingest::types::FeedItem;
use crate::notify::message::ListOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageFormat {
    Html,
    Markdown,
    Text,
}

impl MessageFormat {
    /// Wire name used by PushPlus-style templates.
    pub fn as_str(self) -> &'static str {
        match self {
            MessageFormat::Html => "html",
            MessageFormat::Markdown => "markdown",
            MessageFormat::Text => "txt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Some(MessageFormat::Html),
            "markdown" | "md" => Some(MessageFormat::Markdown),
            "txt" | "text" => Some(MessageFormat::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub success: bool,
    pub message: String,
}

impl DeliveryOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name recorded in the ledger.
    fn name(&self) -> &str;

    async fn deliver(&self, items: &[FeedItem]) -> DeliveryOutcome;

    fn supports_custom(&self) -> bool {
        false
    }

    async fn deliver_custom(&self, title: &str, _body: &str, _format: MessageFormat) -> DeliveryOutcome {
        DeliveryOutcome::failed(format!(
            "{} does not take custom messages (title {title:?})",
            self.name()
        ))
    }

    async fn test_connection(&self) -> DeliveryOutcome;
}

/// Enabled channels in a fixed order: pushplus, discord, slack, email.
pub fn build_notifiers(cfg: &AppConfig) -> Result<Vec<Box<dyn Notifier>>> {
    let list = ListOptions {
        include_description: cfg.notify.include_description,
        include_image: cfg.notify.include_image,
        utc_offset: cfg.utc_offset(),
    };
    let mut out: Vec<Box<dyn Notifier>> = Vec::new();
    let n = &cfg.notify;
    if n.pushplus.enabled {
        out.push(Box::new(pushplus::PushPlusNotifier::new(&n.pushplus, list.clone())?));
    }
    if n.discord.enabled {
        out.push(Box::new(discord::DiscordNotifier::new(&n.discord, list.clone())?));
    }
    if n.slack.enabled {
        out.push(Box::new(slack::SlackNotifier::new(&n.slack, list.clone())?));
    }
    if n.email.enabled {
        out.push(Box::new(email::EmailNotifier::new(&n.email, list)?));
    }
    for x in &out {
        tracing::info!(target: "notify", channel = x.name(), custom = x.supports_custom(), "notifier ready");
    }
    Ok(out)
}

/// What a [`RecordingNotifier`] was asked to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Items(Vec<String>),
    Custom { title: String, body: String },
}

/// In-memory notifier for tests and dry runs. Outcomes are scripted in
/// order; once the script runs out every send succeeds.
pub struct RecordingNotifier {
    name: String,
    custom: bool,
    script: Mutex<VecDeque<bool>>,
    sent: Mutex<Vec<SentMessage>>,
}

impl RecordingNotifier {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            custom: false,
            script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_custom(mut self) -> Self {
        self.custom = true;
        self
    }

    /// Queue the outcomes of the next sends.
    pub fn outcomes(self, outcomes: &[bool]) -> Self {
        if let Ok(mut q) = self.script.lock() {
            q.extend(outcomes.iter().copied());
        }
        self
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }

    fn record(&self, msg: SentMessage) -> DeliveryOutcome {
        if let Ok(mut v) = self.sent.lock() {
            v.push(msg);
        }
        let ok = self
            .script
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or(true);
        if ok {
            DeliveryOutcome::ok("recorded")
        } else {
            DeliveryOutcome::failed("scripted failure")
        }
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, items: &[FeedItem]) -> DeliveryOutcome {
        self.record(SentMessage::Items(
            items.iter().map(|i| i.identity.clone()).collect(),
        ))
    }

    fn supports_custom(&self) -> bool {
        self.custom
    }

    async fn deliver_custom(&self, title: &str, body: &str, _format: MessageFormat) -> DeliveryOutcome {
        if !self.custom {
            return DeliveryOutcome::failed("custom messages not supported");
        }
        self.record(SentMessage::Custom {
            title: title.to_string(),
            body: body.to_string(),
        })
    }

    async fn test_connection(&self) -> DeliveryOutcome {
        DeliveryOutcome::ok(format!("{} ready", self.name))
    }
}
