//! Provider router — builds and selects chat backends by name.
//!
//! Owns the name → provider registry, resolves the default, and constructs
//! the whole set from configuration. Every constructed backend is wrapped
//! in [`RetryingProvider`] so transient failures are retried uniformly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use wardclaw_core::error::ProviderError;
use wardclaw_core::provider::Provider;

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::process::ProcessProvider;
use crate::retry::{RetryPolicy, RetryingProvider};

/// Routes completion requests to the correct backend.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider under a name.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Look up a provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// The configured default provider, if registered.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Resolve a provider: explicit name if given, otherwise the default.
    /// Unknown names are a typed failure listing what is registered.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<dyn Provider>, ProviderError> {
        let target = name.unwrap_or(&self.default_provider);
        self.providers.get(target).cloned().ok_or_else(|| {
            let mut known = self.names();
            known.sort_unstable();
            ProviderError::UnknownProvider(format!(
                "'{target}' (registered: {})",
                known.join(", ")
            ))
        })
    }

    /// All registered provider names.
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Build the full provider set from configuration.
///
/// Each configured entry becomes one backend: entries with a `command` use
/// the process backend, `anthropic` uses the native Messages API, and
/// everything else is treated as OpenAI-compatible. The default provider
/// is always registered even when not explicitly configured.
pub fn build_from_config(
    config: &wardclaw_config::AppConfig,
) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new(&config.default_provider);
    let timeout = Duration::from_secs(config.retry.request_timeout_secs);
    let policy = RetryPolicy::new(
        config.retry.max_attempts,
        Duration::from_millis(config.retry.base_delay_ms),
    );

    for (name, provider_config) in &config.providers {
        let inner: Arc<dyn Provider> = if let Some(command) = &provider_config.command {
            Arc::new(ProcessProvider::new(
                name.clone(),
                command.clone(),
                provider_config.args.clone(),
                timeout,
            ))
        } else if name == "anthropic" {
            let api_key = config.provider_api_key(name).unwrap_or_default();
            let mut provider = AnthropicProvider::new(api_key, timeout)?;
            if let Some(url) = &provider_config.api_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        } else {
            let api_key = config.provider_api_key(name).unwrap_or_default();
            let Some(base_url) = provider_config
                .api_url
                .clone()
                .or_else(|| default_base_url(name))
            else {
                warn!(provider = %name, "No api_url and no known default, skipping");
                continue;
            };
            Arc::new(OpenAiCompatProvider::new(name, base_url, api_key, timeout)?)
        };

        router.register(name.clone(), Arc::new(RetryingProvider::new(inner, policy)));
    }

    // The default must always resolve, configured or not.
    if router.get(&config.default_provider).is_none() {
        let name = config.default_provider.clone();
        let api_key = config.provider_api_key(&name).unwrap_or_default();

        let inner: Arc<dyn Provider> = if name == "anthropic" {
            Arc::new(AnthropicProvider::new(api_key, timeout)?)
        } else {
            let base_url = default_base_url(&name).ok_or_else(|| {
                ProviderError::UnknownProvider(format!(
                    "'{name}' has no configuration and no known default URL"
                ))
            })?;
            Arc::new(OpenAiCompatProvider::new(&name, base_url, api_key, timeout)?)
        };

        router.register(name, Arc::new(RetryingProvider::new(inner, policy)));
    }

    Ok(router)
}

/// Default base URLs for well-known OpenAI-compatible services.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openai" => "https://api.openai.com/v1",
        "openrouter" => "https://openrouter.ai/api/v1",
        "ollama" => "http://localhost:11434/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        _ => return None,
    };
    Some(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wardclaw_config::{AppConfig, ProviderConfig};

    fn timeout() -> Duration {
        Duration::from_secs(30)
    }

    #[test]
    fn register_and_lookup() {
        let mut router = ProviderRouter::new("openai");
        let provider = Arc::new(OpenAiCompatProvider::openai("sk-test", timeout()).unwrap());
        router.register("openai", provider);

        assert!(router.get("openai").is_some());
        assert!(router.get("nonexistent").is_none());
        assert!(router.default().is_some());
        assert_eq!(router.len(), 1);
    }

    #[test]
    fn resolve_falls_back_to_default() {
        let mut router = ProviderRouter::new("ollama");
        router.register(
            "ollama",
            Arc::new(OpenAiCompatProvider::ollama(None, timeout()).unwrap()),
        );

        assert_eq!(router.resolve(None).unwrap().name(), "ollama");
        assert_eq!(router.resolve(Some("ollama")).unwrap().name(), "ollama");
    }

    #[test]
    fn resolve_unknown_lists_registered() {
        let mut router = ProviderRouter::new("openai");
        router.register(
            "openai",
            Arc::new(OpenAiCompatProvider::openai("sk-test", timeout()).unwrap()),
        );

        let err = router.resolve(Some("bedrock")).unwrap_err();
        match err {
            ProviderError::UnknownProvider(msg) => {
                assert!(msg.contains("bedrock"));
                assert!(msg.contains("openai"));
            }
            other => panic!("expected UnknownProvider, got {other:?}"),
        }
    }

    #[test]
    fn build_from_default_config() {
        let config = AppConfig::default();
        let router = build_from_config(&config).unwrap();
        // default_provider is "anthropic"; must exist even unconfigured
        assert!(router.default().is_some());
        assert_eq!(router.resolve(None).unwrap().name(), "anthropic");
    }

    #[test]
    fn build_registers_process_backed_entry() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "local".into(),
            ProviderConfig {
                command: Some("/usr/local/bin/llm-cli".into()),
                args: vec!["--quiet".into()],
                ..ProviderConfig::default()
            },
        );

        let router = build_from_config(&config).unwrap();
        assert!(router.get("local").is_some());
        assert_eq!(router.resolve(Some("local")).unwrap().name(), "local");
    }

    #[test]
    fn build_skips_unknown_name_without_url() {
        let mut config = AppConfig::default();
        config
            .providers
            .insert("mystery".into(), ProviderConfig::default());

        let router = build_from_config(&config).unwrap();
        assert!(router.get("mystery").is_none());
        // default still registered
        assert!(router.default().is_some());
    }

    #[test]
    fn known_default_urls() {
        assert!(default_base_url("openai").unwrap().contains("api.openai.com"));
        assert!(default_base_url("ollama").unwrap().contains("localhost:11434"));
        assert!(default_base_url("openrouter").unwrap().contains("openrouter.ai"));
        assert!(default_base_url("mystery").is_none());
    }
}
