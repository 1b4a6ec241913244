// tests/notify_http.rs
//
// HTTP notifiers against a local axum stand-in that records every JSON body.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use rss_digest::config::app::{PushPlusConfig, WebhookConfig};
use rss_digest::ingest::types::FeedItem;
use rss_digest::notify::discord::DiscordNotifier;
use rss_digest::notify::message::ListOptions;
use rss_digest::notify::pushplus::PushPlusNotifier;
use rss_digest::notify::slack::SlackNotifier;
use rss_digest::notify::{MessageFormat, Notifier};

type Seen = Arc<Mutex<Vec<Value>>>;

/// PushPlus-like: HTTP 200 always, `code` 200 unless the token is "bad".
async fn pushplus_send(State(seen): State<Seen>, Json(body): Json<Value>) -> Json<Value> {
    let code = if body["token"] == "bad" { 903 } else { 200 };
    seen.lock().unwrap().push(body);
    Json(json!({"code": code, "msg": if code == 200 { "ok" } else { "invalid token" }, "data": null}))
}

/// Webhook-like: 204 on success, 500 when the text mentions "boom".
async fn webhook(State(seen): State<Seen>, Json(body): Json<Value>) -> StatusCode {
    let failing = body.to_string().contains("boom");
    seen.lock().unwrap().push(body);
    if failing {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::NO_CONTENT
    }
}

async fn spawn() -> (SocketAddr, Seen) {
    let seen: Seen = Arc::default();
    let app = Router::new()
        .route("/send", post(pushplus_send))
        .route("/hook", post(webhook))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, seen)
}

fn items() -> Vec<FeedItem> {
    vec![
        FeedItem::new("g1", "Fish & <Chips>", "https://x/1", "<p>Crispy</p>", None),
        FeedItem::new("g2", "Second", "https://x/2", "", None),
    ]
}

fn pushplus(addr: SocketAddr, token: &str, template: &str) -> PushPlusNotifier {
    let cfg = PushPlusConfig {
        enabled: true,
        token: token.into(),
        topic: String::new(),
        template: template.into(),
        api_url: format!("http://{addr}/send"),
        timeout_secs: 5,
    };
    PushPlusNotifier::new(&cfg, ListOptions::default()).unwrap()
}

fn hook(addr: SocketAddr) -> WebhookConfig {
    WebhookConfig {
        enabled: true,
        webhook_url: format!("http://{addr}/hook"),
        timeout_secs: 5,
    }
}

#[tokio::test]
async fn pushplus_item_list_uses_the_configured_template() {
    let (addr, seen) = spawn().await;
    let out = pushplus(addr, "tok", "html").deliver(&items()).await;
    assert!(out.success, "{}", out.message);

    let sent = seen.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["token"], "tok");
    assert_eq!(sent[0]["template"], "html");
    assert_eq!(sent[0]["title"], "📰 RSS digest (2 items)");
    // empty topic is left out entirely
    assert!(sent[0].get("topic").is_none());
    let content = sent[0]["content"].as_str().unwrap();
    assert!(content.contains("Fish &amp; &lt;Chips&gt;"));
    assert!(content.contains(r#"href="https://x/2""#));
}

#[tokio::test]
async fn pushplus_custom_report_keeps_its_format() {
    let (addr, seen) = spawn().await;
    let n = pushplus(addr, "tok", "html");
    assert!(n.supports_custom());
    let out = n
        .deliver_custom("Daily Digest", "# Daily Digest\n\n**bold**", MessageFormat::Markdown)
        .await;
    assert!(out.success);

    let sent = seen.lock().unwrap().clone();
    assert_eq!(sent[0]["template"], "markdown");
    assert_eq!(sent[0]["content"], "# Daily Digest\n\n**bold**");
}

#[tokio::test]
async fn pushplus_non_200_code_is_a_failure_despite_http_200() {
    let (addr, _) = spawn().await;
    let out = pushplus(addr, "bad", "txt").deliver(&items()).await;
    assert!(!out.success);
    assert!(out.message.contains("903"), "{}", out.message);
}

#[tokio::test]
async fn pushplus_rejects_unknown_template_at_construction() {
    let cfg = PushPlusConfig {
        template: "pdf".into(),
        ..PushPlusConfig::default()
    };
    assert!(PushPlusNotifier::new(&cfg, ListOptions::default()).is_err());
}

#[tokio::test]
async fn slack_custom_message_is_title_then_body() {
    let (addr, seen) = spawn().await;
    let n = SlackNotifier::new(&hook(addr), ListOptions::default()).unwrap();
    assert!(n.deliver_custom("Digest", "body text", MessageFormat::Markdown).await.success);
    assert!(!n.deliver_custom("Digest", "boom", MessageFormat::Markdown).await.success);

    let sent = seen.lock().unwrap().clone();
    assert_eq!(sent[0], json!({"text": "*Digest*\n\nbody text"}));
}

#[tokio::test]
async fn discord_sends_one_embed_and_takes_no_reports() {
    let (addr, seen) = spawn().await;
    let n = DiscordNotifier::new(&hook(addr), ListOptions::default()).unwrap();
    assert!(!n.supports_custom());
    assert!(n.deliver(&items()).await.success);

    let sent = seen.lock().unwrap().clone();
    let embeds = sent[0]["embeds"].as_array().unwrap();
    assert_eq!(embeds.len(), 1);
    assert!(embeds[0]["description"].as_str().unwrap().contains("Second"));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_failed_outcome() {
    let n = pushplus("127.0.0.1:9".parse().unwrap(), "tok", "txt");
    let out = n.deliver(&items()).await;
    assert!(!out.success);
}
