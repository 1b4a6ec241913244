// src/config/app.rs
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{FixedOffset, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::analyze::enrich::DEFAULT_FULL_TEXT_CHARS;
use crate::analyze::relevance_filter::{DEFAULT_EXCERPT_CHARS, DEFAULT_RULE_MIN_SCORE, DEFAULT_THRESHOLD};
use crate::analyze::{KeywordRules, ReportOptions, StageProfile};
use crate::config::ai::AiSettings;
use crate::config::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";
pub const ENV_CONFIG_PATH: &str = "APP_CONFIG_PATH";

pub const DEFAULT_STAGE1_PROMPT: &str = "You screen RSS articles for a busy reader. \
Given the reader's interests and a numbered list of titles with short excerpts, decide for each \
article whether it is worth a closer read. Be strict: generic news, adverts and reposts are not relevant. \
Answer with JSON only.";

pub const DEFAULT_STAGE2_PROMPT: &str = "You are an editor preparing a daily reading digest. \
Group the numbered articles into a few categories by importance (level 5 = must read, 1 = optional), \
give every article a one-sentence reason to read it and a few short tags, and write a brief overall \
insight with the key trends. Refer to articles only by their number. Answer with JSON only.";

/// Root of `config/app.toml`. Every section is optional and falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub pipeline: PipelineConfig,
    pub ledger: LedgerConfig,
    pub ai: AiSettings,
    pub analysis: AnalysisConfig,
    pub enrichment: EnrichmentConfig,
    pub report: ReportConfig,
    pub delivery: DeliveryConfig,
    pub notify: NotifyConfig,
    pub scheduler: SchedulerConfig,
    pub status: StatusConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Offset used for "today", the delivery window, report times and daily triggers.
    pub utc_offset: String,
    pub sort_descending: bool,
    pub today_only: bool,
    /// Newest N after sorting; 0 = no cap.
    pub max_items: usize,
    pub time_window: TimeWindowConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            utc_offset: "+00:00".into(),
            sort_descending: true,
            today_only: false,
            max_items: 0,
            time_window: TimeWindowConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeWindowConfig {
    pub enabled: bool,
    pub start: String,
    pub end: String,
}

impl Default for TimeWindowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "00:00".into(),
            end: "23:59".into(),
        }
    }
}

impl TimeWindowConfig {
    /// `(start, end)` when enabled and both ends parse.
    pub fn bounds(&self) -> Option<(NaiveTime, NaiveTime)> {
        if !self.enabled {
            return None;
        }
        Some((parse_hhmm(&self.start)?, parse_hhmm(&self.end)?))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub path: PathBuf,
    pub retention_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/delivered.db"),
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub stage1: Stage1Config,
    pub stage2: Stage2Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage1Config {
    pub enabled: bool,
    pub model: String,
    pub system_prompt: String,
    /// Replaces `system_prompt` with the file's contents at load time.
    pub system_prompt_file: Option<PathBuf>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub interests: Vec<String>,
    pub threshold: f64,
    pub excerpt_chars: usize,
    /// Keyword rules used in place of the AI pass when it is not running.
    pub keywords_include: Vec<String>,
    pub keywords_exclude: Vec<String>,
    /// 0-10 cutoff for the keyword rules.
    pub min_score: f64,
}

impl Default for Stage1Config {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4o-mini".into(),
            system_prompt: DEFAULT_STAGE1_PROMPT.into(),
            system_prompt_file: None,
            max_tokens: 1_000,
            temperature: 0.0,
            interests: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
            keywords_include: Vec::new(),
            keywords_exclude: Vec::new(),
            min_score: DEFAULT_RULE_MIN_SCORE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Stage2Config {
    pub enabled: bool,
    pub model: String,
    pub system_prompt: String,
    pub system_prompt_file: Option<PathBuf>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for Stage2Config {
    fn default() -> Self {
        Self {
            enabled: false,
            model: "gpt-4o".into(),
            system_prompt: DEFAULT_STAGE2_PROMPT.into(),
            system_prompt_file: None,
            max_tokens: 8_000,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub enabled: bool,
    pub max_chars: usize,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_chars: DEFAULT_FULL_TEXT_CHARS,
            timeout_secs: 15,
            max_attempts: 3,
            backoff_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
    pub footer: Option<Vec<String>>,
    pub time_format: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let d = ReportOptions::default();
        Self {
            title: d.title,
            footer: None,
            time_format: d.time_format,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_items_per_message: usize,
    pub pacing_ms: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_items_per_message: 20,
            pacing_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Plain item-list messages: include the excerpt under each title.
    pub include_description: bool,
    /// HTML/Markdown item lists: include the first image of each entry.
    pub include_image: bool,
    pub pushplus: PushPlusConfig,
    pub discord: WebhookConfig,
    pub slack: WebhookConfig,
    pub email: EmailConfig,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            include_description: true,
            include_image: false,
            pushplus: PushPlusConfig::default(),
            discord: WebhookConfig::default(),
            slack: WebhookConfig::default(),
            email: EmailConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PushPlusConfig {
    pub enabled: bool,
    /// "ENV" means: read from PUSHPLUS_TOKEN.
    pub token: String,
    /// Group code; empty sends to the token owner only.
    pub topic: String,
    /// "html" | "markdown" | "txt" for item-list messages.
    pub template: String,
    pub api_url: String,
    pub timeout_secs: u64,
}

impl Default for PushPlusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            topic: String::new(),
            template: "html".into(),
            api_url: "http://www.pushplus.plus/send".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub webhook_url: String,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: String::new(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_host: String,
    pub smtp_user: String,
    /// "ENV" means: read from SMTP_PASS.
    pub smtp_pass: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleMode {
    Interval,
    Daily,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// `false`: `run` performs a single pass and exits.
    pub enabled: bool,
    pub mode: ScheduleMode,
    pub interval_minutes: u64,
    /// `HH:MM` in `pipeline.utc_offset`.
    pub daily_times: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: ScheduleMode::Interval,
            interval_minutes: 60,
            daily_times: vec!["07:30".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub bind: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:9100".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// EnvFilter directive used when RUST_LOG is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Compact,
        }
    }
}

impl AppConfig {
    /// `--config` wins, then APP_CONFIG_PATH, then `config/app.toml`.
    pub fn resolve_path(cli: Option<PathBuf>) -> PathBuf {
        cli.or_else(|| std::env::var(ENV_CONFIG_PATH).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Read, apply process env overrides, resolve `ENV` secrets and prompt files, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut cfg = Self::from_toml_str(&content)?;
        cfg.apply_overrides(|k| std::env::var(k).ok());
        cfg.resolve_placeholders()?;
        cfg.load_prompt_files()?;
        cfg.validate()?;

        tracing::info!(
            target: "config",
            path = %path.display(),
            provider = %cfg.ai.provider,
            key_len = cfg.ai.api_key.len(),
            stage1 = cfg.analysis.stage1.enabled,
            stage2 = cfg.analysis.stage2.enabled,
            notifiers = ?cfg.enabled_notifiers(),
            "config loaded"
        );
        Ok(cfg)
    }

    /// Parse only; no env, no validation.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut cfg: AppConfig = toml::from_str(s)?;
        cfg.ai.normalize();
        Ok(cfg)
    }

    /// Non-empty variables from `lookup` replace the file's values.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |k: &str| lookup(k).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("AI_API_KEY") {
            self.ai.api_key = v;
        }
        if let Some(v) = get("AI_API_BASE") {
            self.ai.api_base = Some(v);
        }
        if let Some(v) = get("AI_MODEL") {
            self.analysis.stage1.model = v.clone();
            self.analysis.stage2.model = v;
        }
        if let Some(v) = get("FEED_URL") {
            self.feed.url = v;
        }
        if let Some(v) = get("DAILY_PUSH_TIME") {
            self.scheduler.daily_times = v
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
        }
        if let Some(v) = get("PUSHPLUS_TOKEN") {
            self.notify.pushplus.token = v;
        }
        if let Some(v) = get("DISCORD_WEBHOOK_URL") {
            self.notify.discord.webhook_url = v;
        }
        if let Some(v) = get("SLACK_WEBHOOK_URL") {
            self.notify.slack.webhook_url = v;
        }
        if let Some(v) = get("SMTP_PASS") {
            self.notify.email.smtp_pass = v;
        }
    }

    /// Secrets still reading `ENV` had no variable to take their value from.
    /// That is an error only where the secret is actually needed.
    pub fn resolve_placeholders(&mut self) -> Result<(), ConfigError> {
        fn check(
            value: &mut String,
            needed: bool,
            field: &'static str,
            var: &'static str,
        ) -> Result<(), ConfigError> {
            if !value.trim().eq_ignore_ascii_case("env") {
                return Ok(());
            }
            if needed {
                return Err(ConfigError::MissingEnv { field, var });
            }
            value.clear();
            Ok(())
        }

        let ai_needed = self.ai_enabled();
        check(&mut self.ai.api_key, ai_needed, "ai.api_key", "AI_API_KEY")?;
        let n = &mut self.notify;
        check(&mut n.pushplus.token, n.pushplus.enabled, "notify.pushplus.token", "PUSHPLUS_TOKEN")?;
        check(
            &mut n.discord.webhook_url,
            n.discord.enabled,
            "notify.discord.webhook_url",
            "DISCORD_WEBHOOK_URL",
        )?;
        check(
            &mut n.slack.webhook_url,
            n.slack.enabled,
            "notify.slack.webhook_url",
            "SLACK_WEBHOOK_URL",
        )?;
        check(&mut n.email.smtp_pass, n.email.enabled, "notify.email.smtp_pass", "SMTP_PASS")?;
        Ok(())
    }

    pub fn load_prompt_files(&mut self) -> Result<(), ConfigError> {
        fn read(path: &Path) -> Result<String, ConfigError> {
            fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
        }
        if let Some(p) = &self.analysis.stage1.system_prompt_file {
            self.analysis.stage1.system_prompt = read(p)?;
        }
        if let Some(p) = &self.analysis.stage2.system_prompt_file {
            self.analysis.stage2.system_prompt = read(p)?;
        }
        Ok(())
    }

    /// Startup checks. Anything returned here aborts the process before the first run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.url.trim().is_empty() {
            return Err(ConfigError::invalid("feed.url", "a feed URL is required"));
        }

        if self.enabled_notifiers().is_empty() {
            return Err(ConfigError::invalid("notify", "enable at least one notifier"));
        }
        let n = &self.notify;
        if n.pushplus.enabled && n.pushplus.token.trim().is_empty() {
            return Err(ConfigError::invalid("notify.pushplus.token", "required when pushplus is enabled"));
        }
        if n.pushplus.enabled && !matches!(n.pushplus.template.as_str(), "html" | "markdown" | "txt") {
            return Err(ConfigError::invalid(
                "notify.pushplus.template",
                format!("expected html, markdown or txt, got {:?}", n.pushplus.template),
            ));
        }
        if n.discord.enabled && n.discord.webhook_url.trim().is_empty() {
            return Err(ConfigError::invalid("notify.discord.webhook_url", "required when discord is enabled"));
        }
        if n.slack.enabled && n.slack.webhook_url.trim().is_empty() {
            return Err(ConfigError::invalid("notify.slack.webhook_url", "required when slack is enabled"));
        }
        if n.email.enabled {
            for (field, v) in [
                ("notify.email.smtp_host", &n.email.smtp_host),
                ("notify.email.from", &n.email.from),
                ("notify.email.to", &n.email.to),
            ] {
                if v.trim().is_empty() {
                    return Err(ConfigError::invalid(field, "required when email is enabled"));
                }
            }
        }

        if self.ai_enabled() {
            if !self.ai.has_key() {
                return Err(ConfigError::invalid("ai.api_key", "required when an analysis stage is enabled"));
            }
            if !self.ai.is_supported_provider() {
                return Err(ConfigError::invalid(
                    "ai.provider",
                    format!("unsupported provider {:?}", self.ai.provider),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.analysis.stage1.threshold) {
            return Err(ConfigError::invalid("analysis.stage1.threshold", "must be within 0.0..=1.0"));
        }
        if !(0.0..=10.0).contains(&self.analysis.stage1.min_score) {
            return Err(ConfigError::invalid("analysis.stage1.min_score", "must be within 0.0..=10.0"));
        }

        if self.delivery.max_items_per_message < 1 {
            return Err(ConfigError::invalid("delivery.max_items_per_message", "must be at least 1"));
        }

        if parse_utc_offset(&self.pipeline.utc_offset).is_none() {
            return Err(ConfigError::invalid(
                "pipeline.utc_offset",
                format!("expected something like +08:00, got {:?}", self.pipeline.utc_offset),
            ));
        }
        let tw = &self.pipeline.time_window;
        if tw.enabled && tw.bounds().is_none() {
            return Err(ConfigError::invalid("pipeline.time_window", "start and end must be HH:MM"));
        }

        if self.scheduler.enabled {
            match self.scheduler.mode {
                ScheduleMode::Interval if self.scheduler.interval_minutes == 0 => {
                    return Err(ConfigError::invalid("scheduler.interval_minutes", "must be at least 1"));
                }
                ScheduleMode::Daily => {
                    if self.scheduler.daily_times.is_empty() {
                        return Err(ConfigError::invalid("scheduler.daily_times", "at least one time is required"));
                    }
                    if let Some(bad) = self.scheduler.daily_times.iter().find(|t| parse_hhmm(t).is_none()) {
                        return Err(ConfigError::invalid(
                            "scheduler.daily_times",
                            format!("{bad:?} is not HH:MM"),
                        ));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn ai_enabled(&self) -> bool {
        self.analysis.stage1.enabled || self.analysis.stage2.enabled
    }

    pub fn enabled_notifiers(&self) -> Vec<&'static str> {
        let n = &self.notify;
        [
            ("pushplus", n.pushplus.enabled),
            ("discord", n.discord.enabled),
            ("slack", n.slack.enabled),
            ("email", n.email.enabled),
        ]
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect()
    }

    /// Validated offset; UTC when the string does not parse.
    pub fn utc_offset(&self) -> FixedOffset {
        parse_utc_offset(&self.pipeline.utc_offset).unwrap_or_else(|| Utc.fix())
    }

    /// `None` when no keyword is configured.
    pub fn keyword_rules(&self) -> Option<KeywordRules> {
        let s = &self.analysis.stage1;
        let rules = KeywordRules::new(&s.keywords_include, &s.keywords_exclude).with_min_score(s.min_score);
        (!rules.is_empty()).then_some(rules)
    }

    pub fn stage1_profile(&self) -> StageProfile {
        let s = &self.analysis.stage1;
        StageProfile {
            model: s.model.clone(),
            system_prompt: s.system_prompt.clone(),
            max_tokens: s.max_tokens,
            temperature: s.temperature,
        }
    }

    pub fn stage2_profile(&self) -> StageProfile {
        let s = &self.analysis.stage2;
        StageProfile {
            model: s.model.clone(),
            system_prompt: s.system_prompt.clone(),
            max_tokens: s.max_tokens,
            temperature: s.temperature,
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        let mut opts = ReportOptions {
            title: self.report.title.clone(),
            time_format: self.report.time_format.clone(),
            utc_offset: self.utc_offset(),
            ..ReportOptions::default()
        };
        if let Some(footer) = &self.report.footer {
            opts.footer = footer.clone();
        }
        opts
    }
}

pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// `Z`, `UTC`, `+08:00`, `+0800`, `-5`.
pub fn parse_utc_offset(s: &str) -> Option<FixedOffset> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("z") || s.eq_ignore_ascii_case("utc") {
        return Some(Utc.fix());
    }
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1, &s[1..]),
        b'-' => (-1, &s[1..]),
        _ => return None,
    };
    let (h, m) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 && rest.is_ascii() => rest.split_at(2),
        None => (rest, "0"),
    };
    let h: i32 = h.parse().ok()?;
    let m: i32 = m.parse().ok()?;
    if !(0..=14).contains(&h) || !(0..60).contains(&m) {
        return None;
    }
    FixedOffset::east_opt(sign * (h * 3_600 + m * 60))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[feed]
url = "https://example.com/feed.xml"

[notify.pushplus]
enabled = true
token = "tok"
"#;

    #[test]
    fn minimal_file_fills_defaults() {
        let cfg = AppConfig::from_toml_str(MINIMAL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.delivery.max_items_per_message, 20);
        assert_eq!(cfg.ledger.path, PathBuf::from("data/delivered.db"));
        assert_eq!(cfg.scheduler.mode, ScheduleMode::Interval);
        assert_eq!(cfg.enabled_notifiers(), vec!["pushplus"]);
        assert_eq!(cfg.stage1_profile().system_prompt, DEFAULT_STAGE1_PROMPT);
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut cfg = AppConfig::from_toml_str(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            ("FEED_URL", "https://other/feed"),
            ("AI_MODEL", "m-1"),
            ("DAILY_PUSH_TIME", "08:00, 18:30"),
            ("PUSHPLUS_TOKEN", "  "),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.feed.url, "https://other/feed");
        assert_eq!(cfg.stage1_profile().model, "m-1");
        assert_eq!(cfg.stage2_profile().model, "m-1");
        assert_eq!(cfg.scheduler.daily_times, vec!["08:00", "18:30"]);
        // blank variables are ignored
        assert_eq!(cfg.notify.pushplus.token, "tok");
    }

    #[test]
    fn env_placeholder_errors_only_where_needed() {
        let mut cfg = AppConfig::from_toml_str(&format!("{MINIMAL}\n[ai]\napi_key = \"ENV\"\n")).unwrap();
        cfg.resolve_placeholders().unwrap();
        assert_eq!(cfg.ai.api_key, "");

        let mut cfg = AppConfig::from_toml_str(&format!(
            "{MINIMAL}\n[ai]\napi_key = \"ENV\"\n[analysis.stage2]\nenabled = true\n"
        ))
        .unwrap();
        assert!(matches!(
            cfg.resolve_placeholders(),
            Err(ConfigError::MissingEnv { var: "AI_API_KEY", .. })
        ));
    }

    #[test]
    fn validation_failures() {
        let no_notifier = AppConfig::from_toml_str("[feed]\nurl = \"https://x\"\n").unwrap();
        assert!(matches!(no_notifier.validate(), Err(ConfigError::InvalidValue { field, .. }) if field == "notify"));

        let mut cfg = AppConfig::from_toml_str(MINIMAL).unwrap();
        cfg.delivery.max_items_per_message = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::from_toml_str(MINIMAL).unwrap();
        cfg.scheduler.mode = ScheduleMode::Daily;
        cfg.scheduler.daily_times = vec!["7.30".into()];
        assert!(cfg.validate().is_err());

        let mut cfg = AppConfig::from_toml_str(MINIMAL).unwrap();
        cfg.analysis.stage1.enabled = true;
        assert!(cfg.validate().is_err(), "stage 1 without a key");
    }

    #[test]
    fn keyword_rules_come_from_stage1() {
        let cfg = AppConfig::from_toml_str(MINIMAL).unwrap();
        assert!(cfg.keyword_rules().is_none());

        let cfg = AppConfig::from_toml_str(&format!(
            "{MINIMAL}\n[analysis.stage1]\nkeywords_include = [\"Rust\"]\nkeywords_exclude = [\"ads\"]\nmin_score = 7.0\n"
        ))
        .unwrap();
        cfg.validate().unwrap();
        let rules = cfg.keyword_rules().unwrap();
        assert_eq!(rules.min_score, 7.0);
        assert!(!cfg.ai_enabled(), "keyword rules need no key");

        let mut cfg = cfg;
        cfg.analysis.stage1.min_score = 11.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn offsets_parse_in_common_spellings() {
        assert_eq!(parse_utc_offset("+08:00").map(|o| o.local_minus_utc()), Some(8 * 3600));
        assert_eq!(parse_utc_offset("+0530").map(|o| o.local_minus_utc()), Some(5 * 3600 + 1800));
        assert_eq!(parse_utc_offset("-5").map(|o| o.local_minus_utc()), Some(-5 * 3600));
        assert_eq!(parse_utc_offset("UTC").map(|o| o.local_minus_utc()), Some(0));
        assert!(parse_utc_offset("08:00").is_none());
        assert!(parse_utc_offset("+25:00").is_none());
    }
}
