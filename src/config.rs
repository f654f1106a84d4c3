use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default model (optional)
    pub model: Option<String>,

    /// Backend identifier: "ollama", "openrouter" or "stub".
    pub provider: Option<String>,

    /// How long a model listing is reused before it is fetched again.
    pub model_cache_ttl_secs: Option<u64>,

    /// Write logs here instead of stderr.
    pub log_file: Option<PathBuf>,

    #[serde(default)]
    pub ollama: OllamaConfig,

    #[serde(default)]
    pub openrouter: OpenRouterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OllamaConfig {
    pub base_url: Option<String>,
}

#[derive(Clone, Serialize, Deserialize, Default)]
pub struct OpenRouterConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
}

impl fmt::Debug for OpenRouterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRouterConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Config {
    /// Load config if the file exists, otherwise return Ok(None).
    pub fn load_optional(path: impl AsRef<Path>) -> anyhow::Result<Option<Self>> {
        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(anyhow::Error::new(e))
                    .with_context(|| format!("failed to read config: {}", path.display()))
            }
        };

        let s = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        let cfg: Config = toml::from_str(&s)
            .with_context(|| format!("failed to parse TOML: {}", path.display()))?;
        Ok(Some(cfg))
    }

    pub fn model_cache_ttl(&self) -> Duration {
        self.model_cache_ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(crate::provider::DEFAULT_MODEL_CACHE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_none() {
        let path = std::env::temp_dir().join("termchat-config-does-not-exist.toml");
        assert!(Config::load_optional(path).unwrap().is_none());
    }

    #[test]
    fn parses_backend_sections() {
        let cfg: Config = toml::from_str(
            r#"
            provider = "openrouter"
            model = "x-ai/grok-4-fast:free"
            model_cache_ttl_secs = 120

            [openrouter]
            api_key = "sk-test"

            [ollama]
            base_url = "http://gpu-box:11434"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.provider.as_deref(), Some("openrouter"));
        assert_eq!(cfg.openrouter.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.openrouter.base_url, None);
        assert_eq!(cfg.ollama.base_url.as_deref(), Some("http://gpu-box:11434"));
        assert_eq!(cfg.model_cache_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn debug_output_hides_the_api_key() {
        let cfg: Config = toml::from_str("[openrouter]\napi_key = \"sk-or-SECRET\"").unwrap();
        let printed = format!("{cfg:?}");
        assert!(!printed.contains("sk-or-SECRET"), "{printed}");
        assert!(printed.contains("<redacted>"));
        assert_eq!(cfg.openrouter.api_key.as_deref(), Some("sk-or-SECRET"));
    }

    #[test]
    fn empty_config_uses_default_ttl() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.model_cache_ttl(), crate::provider::DEFAULT_MODEL_CACHE_TTL);
    }
}
