// tests/config.rs
//
// Loading goes through the real process environment, so every test that
// touches it runs serially.

use std::path::{Path, PathBuf};

use rss_digest::config::app::ScheduleMode;
use rss_digest::config::{AppConfig, ConfigError};
use serial_test::serial;

const SECRET_VARS: &[&str] = &[
    "AI_API_KEY",
    "AI_API_BASE",
    "AI_MODEL",
    "FEED_URL",
    "DAILY_PUSH_TIME",
    "PUSHPLUS_TOKEN",
    "DISCORD_WEBHOOK_URL",
    "SLACK_WEBHOOK_URL",
    "SMTP_PASS",
];

fn clear_env() {
    for v in SECRET_VARS {
        std::env::remove_var(v);
    }
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, body).unwrap();
    p
}

fn sample_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config/app.toml")
}

#[test]
#[serial]
fn shipped_sample_loads_once_secrets_are_in_the_env() {
    clear_env();
    std::env::set_var("AI_API_KEY", "sk-test");
    std::env::set_var("PUSHPLUS_TOKEN", "pp-test");

    let cfg = AppConfig::load(&sample_path()).expect("sample config loads");
    assert_eq!(cfg.ai.api_key, "sk-test");
    assert_eq!(cfg.notify.pushplus.token, "pp-test");
    assert_eq!(cfg.enabled_notifiers(), vec!["pushplus"]);
    assert_eq!(cfg.scheduler.mode, ScheduleMode::Daily);
    // disabled channels keep no placeholder around
    assert_eq!(cfg.notify.discord.webhook_url, "");
    assert_eq!(cfg.utc_offset().local_minus_utc(), 8 * 3600);
    clear_env();
}

#[test]
#[serial]
fn missing_needed_secret_names_the_variable() {
    clear_env();
    std::env::set_var("PUSHPLUS_TOKEN", "pp-test");

    let err = AppConfig::load(&sample_path()).unwrap_err();
    assert!(
        matches!(err, ConfigError::MissingEnv { var: "AI_API_KEY", .. }),
        "got {err:?}"
    );
    clear_env();
}

#[test]
#[serial]
fn env_overrides_win_over_the_file() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        dir.path(),
        "app.toml",
        r#"
[feed]
url = "https://file.example.com/feed.xml"

[notify.slack]
enabled = true
webhook_url = "https://hooks.example.com/from-file"

[scheduler]
mode = "daily"
daily_times = ["06:00"]
"#,
    );
    std::env::set_var("FEED_URL", "https://env.example.com/rss");
    std::env::set_var("DAILY_PUSH_TIME", "07:00, 19:30");
    std::env::set_var("SLACK_WEBHOOK_URL", "  ");

    let cfg = AppConfig::load(&path).unwrap();
    assert_eq!(cfg.feed.url, "https://env.example.com/rss");
    assert_eq!(cfg.scheduler.daily_times, vec!["07:00", "19:30"]);
    // blank variables are ignored
    assert_eq!(cfg.notify.slack.webhook_url, "https://hooks.example.com/from-file");
    clear_env();
}

#[test]
#[serial]
fn prompt_files_replace_inline_prompts() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let prompt = write(dir.path(), "stage2.txt", "  Be terse.\n");
    let path = write(
        dir.path(),
        "app.toml",
        &format!(
            r#"
[feed]
url = "https://x/feed"
[ai]
api_key = "sk-inline"
[analysis.stage2]
enabled = true
system_prompt_file = {:?}
[notify.pushplus]
enabled = true
token = "t"
"#,
            prompt.display().to_string()
        ),
    );

    let cfg = AppConfig::load(&path).unwrap();
    assert_eq!(cfg.stage2_profile().system_prompt, "Be terse.");
    assert!(!cfg.analysis.stage1.enabled);
    assert!(cfg.ai_enabled());
}

#[test]
#[serial]
fn unreadable_and_unparsable_files_are_distinct_errors() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        AppConfig::load(&dir.path().join("nope.toml")),
        Err(ConfigError::Read { .. })
    ));
    let bad = write(dir.path(), "bad.toml", "[feed\nurl = ");
    assert!(matches!(AppConfig::load(&bad), Err(ConfigError::Parse(_))));
}

#[test]
#[serial]
fn config_path_resolution_order() {
    std::env::remove_var("APP_CONFIG_PATH");
    assert_eq!(AppConfig::resolve_path(None), PathBuf::from("config/app.toml"));

    std::env::set_var("APP_CONFIG_PATH", "/etc/rss-digest.toml");
    assert_eq!(AppConfig::resolve_path(None), PathBuf::from("/etc/rss-digest.toml"));
    assert_eq!(
        AppConfig::resolve_path(Some(PathBuf::from("cli.toml"))),
        PathBuf::from("cli.toml")
    );
    std::env::remove_var("APP_CONFIG_PATH");
}
