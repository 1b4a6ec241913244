//! AI adapter: completion-service abstraction, concrete providers, response
//! shape reduction and an optional response cache with a daily call budget.
//!
//! Whatever a provider sends back (plain text, a chat-completions object,
//! Anthropic content blocks, an SSE stream or an array of stream chunks) is
//! flattened to one string by [`reduce_response_body`] before anything else
//! sees it.

use std::collections::VecDeque;
use std::fs;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::ai::AiSettings;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion service is disabled")]
    Disabled,
    #[error("http transport error: {0}")]
    Transport(String),
    #[error("provider answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider response contained no text")]
    EmptyResponse,
    #[error("daily completion budget of {0} calls is used up")]
    BudgetExhausted(u32),
}

/// Trait object used by the analysis stages.
pub trait CompletionClient: Send + Sync {
    fn complete<'a>(
        &'a self,
        req: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynCompletionClient = Arc<dyn CompletionClient>;

/// Factory: build a client from the `[ai]` settings.
///
/// * No API key → a disabled client (every call fails with `Disabled`).
/// * `provider = "openai"` (any OpenAI-compatible endpoint) or `"claude"`.
/// * Wrapped in [`CachingClient`] when a daily limit or cache dir is configured.
pub fn build_completion_client(settings: &AiSettings) -> anyhow::Result<DynCompletionClient> {
    if settings.api_key.trim().is_empty() {
        tracing::warn!(target: "analysis", provider = %settings.provider, "no AI API key; completion disabled");
        return Ok(Arc::new(DisabledClient));
    }
    let timeout = Duration::from_secs(settings.timeout_secs);
    let base = settings.api_base.as_deref();
    match settings.provider.to_ascii_lowercase().as_str() {
        "openai" => Ok(with_cache(
            OpenAiProvider::new(&settings.api_key, base, timeout)?,
            settings,
        )),
        "claude" | "anthropic" => Ok(with_cache(
            ClaudeProvider::new(&settings.api_key, base, timeout)?,
            settings,
        )),
        other => anyhow::bail!("unsupported AI provider: {other}"),
    }
}

fn with_cache<C: CompletionClient + 'static>(provider: C, settings: &AiSettings) -> DynCompletionClient {
    if settings.daily_limit == 0 && settings.cache_dir.is_none() {
        return Arc::new(provider);
    }
    let dir = settings
        .cache_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("data/ai-cache"));
    Arc::new(CachingClient::new(
        provider,
        dir,
        settings.daily_limit,
        settings.cache_dir.is_some(),
    ))
}

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("rss-digest/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .context("building completion http client")
}

async fn read_reply(resp: reqwest::Response) -> Result<String, CompletionError> {
    let status = resp.status();
    let body = resp
        .text()
        .await
        .map_err(|e| CompletionError::Transport(e.to_string()))?;
    if !status.is_success() {
        return Err(CompletionError::Status {
            status: status.as_u16(),
            body: body.chars().take(300).collect(),
        });
    }
    reduce_response_body(&body).ok_or(CompletionError::EmptyResponse)
}

// ------------------------------------------------------------
// Concrete providers
// ------------------------------------------------------------

/// Any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl OpenAiProvider {
    pub const DEFAULT_BASE: &'static str = "https://api.openai.com/v1";

    pub fn new(api_key: &str, api_base: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let base = api_base.unwrap_or(Self::DEFAULT_BASE).trim_end_matches('/');
        Ok(Self {
            http: http_client(timeout)?,
            api_key: api_key.to_string(),
            endpoint: format!("{base}/chat/completions"),
        })
    }
}

impl CompletionClient for OpenAiProvider {
    fn complete<'a>(
        &'a self,
        req: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }

            let mut messages = Vec::with_capacity(2);
            if !req.system.is_empty() {
                messages.push(Msg {
                    role: "system",
                    content: &req.system,
                });
            }
            messages.push(Msg {
                role: "user",
                content: &req.user,
            });
            let body = Req {
                model: &req.model,
                messages,
                temperature: req.temperature,
                max_tokens: req.max_tokens,
            };

            let resp = self
                .http
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| CompletionError::Transport(e.to_string()))?;
            read_reply(resp).await
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

/// Anthropic messages API.
pub struct ClaudeProvider {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl ClaudeProvider {
    pub const DEFAULT_BASE: &'static str = "https://api.anthropic.com/v1";

    pub fn new(api_key: &str, api_base: Option<&str>, timeout: Duration) -> anyhow::Result<Self> {
        let base = api_base.unwrap_or(Self::DEFAULT_BASE).trim_end_matches('/');
        Ok(Self {
            http: http_client(timeout)?,
            api_key: api_key.to_string(),
            endpoint: format!("{base}/messages"),
        })
    }
}

impl CompletionClient for ClaudeProvider {
    fn complete<'a>(
        &'a self,
        req: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "model": req.model,
                "max_tokens": req.max_tokens,
                "temperature": req.temperature,
                "system": req.system,
                "messages": [{ "role": "user", "content": req.user }],
            });
            let resp = self
                .http
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01")
                .json(&body)
                .send()
                .await
                .map_err(|e| CompletionError::Transport(e.to_string()))?;
            read_reply(resp).await
        })
    }

    fn provider_name(&self) -> &'static str {
        "claude"
    }
}

/// Always fails with `Disabled`; used when no key is configured.
pub struct DisabledClient;

impl CompletionClient for DisabledClient {
    fn complete<'a>(
        &'a self,
        _req: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>> {
        Box::pin(async { Err(CompletionError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Scripted client for tests and dry runs: answers pop off the front of the
/// script, and every request is recorded.
#[derive(Default)]
pub struct MockCompletionClient {
    script: Mutex<VecDeque<Result<String, CompletionError>>>,
    seen: Mutex<Vec<CompletionRequest>>,
}

impl MockCompletionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Ok(text.into()));
        self
    }

    pub fn fail(self, err: CompletionError) -> Self {
        self.push(Err(err));
        self
    }

    fn push(&self, r: Result<String, CompletionError>) {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(r);
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.seen.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl CompletionClient for MockCompletionClient {
    fn complete<'a>(
        &'a self,
        req: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>> {
        self.seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(req.clone());
        let next = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::Transport("mock script exhausted".into())));
        Box::pin(async move { next })
    }
    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching client wrapper (file cache + daily limit)
// ------------------------------------------------------------

/// Response cache keyed by a hash of the request, plus a per-day budget of
/// real calls persisted next to it. Cache hits do not count against the budget.
pub struct CachingClient<C: CompletionClient> {
    inner: C,
    dir: PathBuf,
    daily_limit: u32,
    cache_responses: bool,
    counter: Mutex<DailyCounter>,
}

impl<C: CompletionClient> CachingClient<C> {
    /// `daily_limit == 0` means no budget.
    pub fn new(inner: C, dir: PathBuf, daily_limit: u32, cache_responses: bool) -> Self {
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!(target: "analysis", error = %e, dir = %dir.display(), "cannot create AI cache dir");
        }
        let counter = Mutex::new(load_daily_counter(&dir).unwrap_or_default());
        Self {
            inner,
            dir,
            daily_limit,
            cache_responses,
            counter,
        }
    }

    /// Real calls made today.
    pub fn calls_today(&self) -> u32 {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        g.roll_over();
        g.count
    }

    async fn complete_impl(&self, req: &CompletionRequest) -> Result<String, CompletionError> {
        // 1) Cache lookup.
        let key = cache_key(req);
        if self.cache_responses {
            if let Some(hit) = read_cache_file(&self.dir, &key) {
                tracing::debug!(target: "analysis", key = %key, "completion cache hit");
                return Ok(hit.text);
            }
        }

        // 2) Budget check (real calls only).
        if self.daily_limit > 0 {
            let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
            if g.roll_over() {
                if let Err(e) = save_daily_counter(&self.dir, &g) {
                    tracing::warn!(target: "analysis", error = %e, "cannot persist daily AI counter reset");
                }
            }
            if g.count >= self.daily_limit {
                return Err(CompletionError::BudgetExhausted(self.daily_limit));
            }
        }

        // 3) Real call; count it whatever the outcome.
        let out = self.inner.complete(req).await;
        {
            let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
            g.roll_over();
            g.count = g.count.saturating_add(1);
            if let Err(e) = save_daily_counter(&self.dir, &g) {
                tracing::warn!(target: "analysis", error = %e, "cannot persist daily AI counter");
            }
        }
        if let (true, Ok(text)) = (self.cache_responses, &out) {
            if let Err(e) = write_cache_file(&self.dir, &key, &CachedReply { text: text.clone() }) {
                tracing::warn!(target: "analysis", error = %e, "cannot write AI cache entry");
            }
        }
        out
    }
}

impl<C: CompletionClient> CompletionClient for CachingClient<C> {
    fn complete<'a>(
        &'a self,
        req: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, CompletionError>> + Send + 'a>> {
        Box::pin(self.complete_impl(req))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedReply {
    text: String,
}

fn cache_key(req: &CompletionRequest) -> String {
    let mut h = Sha256::new();
    for part in [&req.model, &req.system, &req.user] {
        h.update(part.as_bytes());
        h.update([0u8]);
    }
    h.update(req.max_tokens.to_le_bytes());
    h.finalize()
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

fn read_cache_file(dir: &Path, key: &str) -> Option<CachedReply> {
    let s = fs::read_to_string(cache_path(dir, key)).ok()?;
    serde_json::from_str(&s).ok()
}

fn write_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(tmp, path)
}

fn write_cache_file(dir: &Path, key: &str, value: &CachedReply) -> io::Result<()> {
    let json = serde_json::to_string(value).map_err(io::Error::other)?;
    write_atomic(&cache_path(dir, key), &json)
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}

impl DailyCounter {
    /// Reset on a new UTC day; true when a reset happened.
    fn roll_over(&mut self) -> bool {
        let t = today();
        if self.date != t {
            self.date = t;
            self.count = 0;
            return true;
        }
        false
    }
}

fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let s = serde_json::to_string(dc).map_err(io::Error::other)?;
    write_atomic(&counter_path(dir), &s)
}

// ------------------------------------------------------------
// Response shape reduction
// ------------------------------------------------------------

/// Flatten a provider response body to its text. `None` when no text is found.
pub fn reduce_response_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.starts_with("data:") {
        return non_empty(reduce_sse(trimmed));
    }
    match serde_json::from_str::<Value>(trimmed) {
        // an object in no known envelope is itself the answer
        Ok(v) if v.is_object() && !has_envelope(&v) => Some(trimmed.to_string()),
        Ok(v) => non_empty(value_text(&v)),
        // not JSON at all: the body is the text
        Err(_) => Some(trimmed.to_string()),
    }
}

fn has_envelope(v: &Value) -> bool {
    const KEYS: &[&str] = &[
        "choices", "content", "delta", "output_text", "output", "text", "response", "type",
    ];
    v.as_object()
        .is_some_and(|o| KEYS.iter().any(|k| o.contains_key(*k)))
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    (!t.is_empty()).then(|| t.to_string())
}

fn reduce_sse(body: &str) -> String {
    body.lines()
        .filter_map(|l| l.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|p| !p.is_empty() && *p != "[DONE]")
        .filter_map(|p| serde_json::from_str::<Value>(p).ok())
        .map(|v| value_text(&v))
        .collect()
}

/// Text of a string, a parts array or an object carrying one.
fn content_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().map(content_text).collect(),
        Value::Object(o) => ["text", "content", "value"]
            .iter()
            .find_map(|k| o.get(*k))
            .map(content_text)
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn value_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        // array of stream chunks (or of content blocks)
        Value::Array(items) => items.iter().map(value_text).collect(),
        Value::Object(o) => {
            if let Some(choices) = o.get("choices").and_then(Value::as_array) {
                let first = choices.first();
                return first
                    .and_then(|c| {
                        c.pointer("/message/content")
                            .or_else(|| c.pointer("/delta/content"))
                            .or_else(|| c.get("text"))
                    })
                    .map(content_text)
                    .unwrap_or_default();
            }
            // Anthropic message / content_block_delta
            if let Some(content) = o.get("content") {
                return content_text(content);
            }
            if let Some(delta) = o.get("delta") {
                return content_text(delta);
            }
            if let Some(output) = o.get("output_text") {
                return content_text(output);
            }
            if let Some(output) = o.get("output") {
                return content_text(output);
            }
            o.get("text")
                .or_else(|| o.get("response"))
                .map(content_text)
                .unwrap_or_default()
        }
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(reduce_response_body("  hello  ").as_deref(), Some("hello"));
        assert_eq!(reduce_response_body("   "), None);
    }

    #[test]
    fn openai_chat_object() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"{\"a\":1}"}}]}"#;
        assert_eq!(reduce_response_body(body).as_deref(), Some(r#"{"a":1}"#));
    }

    #[test]
    fn openai_content_parts_and_legacy_text() {
        let parts = r#"{"choices":[{"message":{"content":[{"type":"text","text":"ab"},{"type":"text","text":"cd"}]}}]}"#;
        assert_eq!(reduce_response_body(parts).as_deref(), Some("abcd"));
        let legacy = r#"{"choices":[{"text":"old style"}]}"#;
        assert_eq!(reduce_response_body(legacy).as_deref(), Some("old style"));
    }

    #[test]
    fn anthropic_content_blocks() {
        let body = r#"{"type":"message","content":[{"type":"text","text":"part 1 "},{"type":"text","text":"part 2"}]}"#;
        assert_eq!(reduce_response_body(body).as_deref(), Some("part 1 part 2"));
    }

    #[test]
    fn sse_stream_is_concatenated() {
        let body = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n\
                    data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n\
                    data: [DONE]\n";
        assert_eq!(reduce_response_body(body).as_deref(), Some("Hello"));
    }

    #[test]
    fn chunk_array_is_concatenated() {
        let body = r#"[{"choices":[{"delta":{"content":"a"}}]},{"choices":[{"delta":{"content":"b"}}]},{"choices":[{"delta":{}}]}]"#;
        assert_eq!(reduce_response_body(body).as_deref(), Some("ab"));
    }

    #[test]
    fn bare_json_object_is_kept_verbatim() {
        let body = r#"{"relevant":[1,0],"reason":["a","b"]}"#;
        assert_eq!(reduce_response_body(body).as_deref(), Some(body));
    }

    #[test]
    fn empty_choice_is_none() {
        assert_eq!(reduce_response_body(r#"{"choices":[]}"#), None);
    }

    #[tokio::test]
    async fn budget_counts_real_calls_and_cache_hits_are_free() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockCompletionClient::new().reply("one").reply("two");
        let client = CachingClient::new(mock, dir.path().to_path_buf(), 2, true);
        let req = |u: &str| CompletionRequest {
            system: "s".into(),
            user: u.into(),
            model: "m".into(),
            max_tokens: 10,
            temperature: 0.0,
        };

        assert_eq!(client.complete(&req("a")).await.unwrap(), "one");
        assert_eq!(client.complete(&req("a")).await.unwrap(), "one");
        assert_eq!(client.calls_today(), 1);
        assert_eq!(client.complete(&req("b")).await.unwrap(), "two");
        assert!(matches!(
            client.complete(&req("c")).await,
            Err(CompletionError::BudgetExhausted(2))
        ));
    }

    #[tokio::test]
    async fn budget_holds_in_memory_when_the_cache_dir_is_unusable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();
        let mock = MockCompletionClient::new().reply("one").reply("two");
        let client = CachingClient::new(mock, blocker.join("ai"), 1, true);
        let req = CompletionRequest {
            system: "s".into(),
            user: "u".into(),
            model: "m".into(),
            max_tokens: 10,
            temperature: 0.0,
        };

        assert_eq!(client.complete(&req).await.unwrap(), "one");
        assert_eq!(client.calls_today(), 1);
        assert!(matches!(
            client.complete(&req).await,
            Err(CompletionError::BudgetExhausted(1))
        ));
    }

    #[tokio::test]
    async fn disabled_client_fails() {
        let req = CompletionRequest {
            system: String::new(),
            user: "x".into(),
            model: "m".into(),
            max_tokens: 1,
            temperature: 0.0,
        };
        assert!(matches!(DisabledClient.complete(&req).await, Err(CompletionError::Disabled)));
    }
}
