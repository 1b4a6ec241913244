// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_provider() -> String {
    "openai".into()
}
fn default_timeout_secs() -> u64 {
    60
}

/// `[ai]` section: which completion service both stages talk to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiSettings {
    /// "openai" | "claude" (case-insensitive). OpenAI-compatible gateways use "openai".
    #[serde(default = "default_provider")]
    pub provider: String,
    /// "ENV" means: read from AI_API_KEY.
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Max completion calls per UTC day; 0 = unlimited.
    #[serde(default)]
    pub daily_limit: u32,
    /// Where the call counter (and cached replies) live.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: String::new(),
            api_base: None,
            timeout_secs: default_timeout_secs(),
            daily_limit: 0,
            cache_dir: None,
        }
    }
}

impl AiSettings {
    pub fn normalize(&mut self) {
        self.provider = self.provider.trim().to_ascii_lowercase();
        if self.api_base.as_deref().is_some_and(|b| b.trim().is_empty()) {
            self.api_base = None;
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
    }

    pub fn has_key(&self) -> bool {
        let k = self.api_key.trim();
        !k.is_empty() && !k.eq_ignore_ascii_case("env")
    }

    pub fn is_supported_provider(&self) -> bool {
        matches!(self.provider.as_str(), "openai" | "claude" | "anthropic")
    }
}
