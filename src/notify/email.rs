// src/notify/email.rs
use anyhow::{Context, Result};
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::message::{format_html, list_title, ListOptions};
use super::{DeliveryOutcome, MessageFormat, Notifier};
use crate::config::app::EmailConfig;
use crate::ingest::types::FeedItem;

pub struct EmailNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    list: ListOptions,
}

impl EmailNotifier {
    pub fn new(cfg: &EmailConfig, list: ListOptions) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(cfg.smtp_host.trim())
            .with_context(|| format!("invalid smtp host {:?}", cfg.smtp_host))?;
        if !cfg.smtp_user.trim().is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.smtp_user.trim().to_string(),
                cfg.smtp_pass.clone(),
            ));
        }
        let from = cfg
            .from
            .parse()
            .with_context(|| format!("invalid sender address {:?}", cfg.from))?;
        let to = cfg
            .to
            .parse()
            .with_context(|| format!("invalid recipient address {:?}", cfg.to))?;
        Ok(Self {
            mailer: builder.build(),
            from,
            to,
            list,
        })
    }

    async fn send(&self, subject: &str, body: String, content_type: header::ContentType) -> DeliveryOutcome {
        let res = async {
            let msg = Message::builder()
                .from(self.from.clone())
                .to(self.to.clone())
                .subject(subject)
                .header(content_type)
                .body(body)
                .context("build email")?;
            self.mailer.send(msg).await.context("send email")?;
            anyhow::Ok(())
        }
        .await;
        match res {
            Ok(()) => DeliveryOutcome::ok(format!("mail sent to {}", self.to)),
            Err(e) => {
                tracing::error!(target: "notify", channel = "email", error = ?e, "email delivery failed");
                DeliveryOutcome::failed(format!("{e:#}"))
            }
        }
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    fn name(&self) -> &str {
        "email"
    }

    async fn deliver(&self, items: &[FeedItem]) -> DeliveryOutcome {
        if items.is_empty() {
            return DeliveryOutcome::failed("nothing to deliver");
        }
        let title = list_title(items.len());
        let body = format_html(&title, items, &self.list);
        self.send(&title, body, header::ContentType::TEXT_HTML).await
    }

    fn supports_custom(&self) -> bool {
        true
    }

    /// Markdown reads fine as plain text, so only HTML changes the content type.
    async fn deliver_custom(&self, title: &str, body: &str, format: MessageFormat) -> DeliveryOutcome {
        let ct = match format {
            MessageFormat::Html => header::ContentType::TEXT_HTML,
            MessageFormat::Markdown | MessageFormat::Text => header::ContentType::TEXT_PLAIN,
        };
        self.send(title, body.to_string(), ct).await
    }

    async fn test_connection(&self) -> DeliveryOutcome {
        match self.mailer.test_connection().await {
            Ok(true) => DeliveryOutcome::ok("smtp server reachable"),
            Ok(false) => DeliveryOutcome::failed("smtp server did not accept the connection"),
            Err(e) => DeliveryOutcome::failed(format!("smtp connection failed: {e}")),
        }
    }
}
