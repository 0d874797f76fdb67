//! Embedder-facing configuration.

use std::env;

use cdp_adapter::CdpConfig;

/// Tunables for a webpilot context. `Default` resolves the `WEBPILOT_*`
/// environment the same way the adapter config does.
#[derive(Clone, Debug)]
pub struct AutomationConfig {
    /// Model name handed to the LLM provider.
    pub model_name: String,
    pub headless: bool,
    /// Extra browser switches appended to the launch args.
    pub browser_args: Vec<String>,
    /// Bound on a single dispatcher step.
    pub act_timeout_ms: u64,
    /// Bound on the DOM-settle waiter.
    pub dom_settle_timeout_ms: u64,
    /// Retry failed acts with an error-informed re-observation.
    pub self_heal: bool,
    pub max_retries: u32,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            model_name: env::var("WEBPILOT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            headless: resolve_headless(),
            browser_args: Vec::new(),
            act_timeout_ms: 30_000,
            dom_settle_timeout_ms: 30_000,
            self_heal: true,
            max_retries: 3,
        }
    }
}

impl AutomationConfig {
    pub fn cdp_config(&self) -> CdpConfig {
        CdpConfig {
            headless: self.headless,
            extra_args: self.browser_args.clone(),
            ..CdpConfig::default()
        }
    }

    pub fn with_model(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    pub fn with_self_heal(mut self, enabled: bool) -> Self {
        self.self_heal = enabled;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }
}

fn resolve_headless() -> bool {
    match env::var("WEBPILOT_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AutomationConfig::default();
        assert_eq!(config.act_timeout_ms, 30_000);
        assert_eq!(config.dom_settle_timeout_ms, 30_000);
        assert!(config.self_heal);
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn builders_override_fields() {
        let config = AutomationConfig::default()
            .with_model("test-model")
            .with_self_heal(false)
            .with_max_retries(1);
        assert_eq!(config.model_name, "test-model");
        assert!(!config.self_heal);
        assert_eq!(config.max_retries, 1);
    }
}
