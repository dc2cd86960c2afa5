// file: settings.rs

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use config::{Config, Environment, FileFormat};
use log::{debug, info};
use serde::Deserialize;
use crate::error::BatchError;
use crate::llm::Provider;
use crate::processor::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "batchprompt.toml";
pub const ENV_PREFIX: &str = "BATCHPROMPT";

/// Settings of the batch loop, read from the `[processor]` table.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProcessorSettings {
    pub input_csv: PathBuf,
    pub inter_request_delay_secs: u64,
    pub rotation_delay_secs: u64,
    pub cooldown_secs: u64,
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        ProcessorSettings {
            input_csv: PathBuf::from("generated_prompts.csv"),
            inter_request_delay_secs: 1,
            rotation_delay_secs: 1,
            cooldown_secs: 60,
            max_rate_limit_retries: None,
        }
    }
}

impl ProcessorSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            inter_request_delay: Duration::from_secs(self.inter_request_delay_secs),
            rotation_delay: Duration::from_secs(self.rotation_delay_secs),
            cooldown: Duration::from_secs(self.cooldown_secs),
            max_rate_limit_retries: self.max_rate_limit_retries,
        }
    }
}

/// Values given under `[llm_apis."<service>"]`. Anything left out falls back to
/// the service defaults in `ProviderSettings::defaults_for`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ProviderOverrides {
    pub model_name: Option<String>,
    pub api_url: Option<String>,
    pub max_gen_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub model_api_timeout: Option<u64>,
    pub output_csv: Option<PathBuf>,
    pub proxy_server: Option<String>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
}

/// Fully resolved settings for one LLM service.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    pub model_name: String,
    pub api_url: String,
    pub max_gen_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub model_api_timeout: u64,
    pub output_csv: PathBuf,
    pub proxy_server: Option<String>,
    pub reasoning_effort: Option<String>,
    pub verbosity: Option<String>,
}

impl ProviderSettings {
    pub fn defaults_for(provider: Provider) -> ProviderSettings {
        match provider {
            Provider::Claude => ProviderSettings {
                model_name: "claude-sonnet-4-20250514".to_string(),
                api_url: "https://api.anthropic.com/v1/messages".to_string(),
                max_gen_tokens: Some(512),
                temperature: Some(0.7),
                model_api_timeout: 200,
                output_csv: PathBuf::from("generated_responses_claude.csv"),
                proxy_server: None,
                reasoning_effort: None,
                verbosity: None,
            },
            Provider::Gemini => ProviderSettings {
                model_name: "gemini-2.5-pro".to_string(),
                api_url: "https://generativelanguage.googleapis.com/v1beta/models".to_string(),
                max_gen_tokens: None,
                temperature: None,
                model_api_timeout: 200,
                output_csv: PathBuf::from("generated_responses_gemini.csv"),
                proxy_server: None,
                reasoning_effort: None,
                verbosity: None,
            },
            Provider::OpenAi => ProviderSettings {
                model_name: "gpt-5".to_string(),
                api_url: "https://api.openai.com/v1/responses".to_string(),
                max_gen_tokens: None,
                temperature: None,
                model_api_timeout: 200,
                output_csv: PathBuf::from("generated_responses_openai.csv"),
                proxy_server: None,
                reasoning_effort: Some("medium".to_string()),
                verbosity: Some("medium".to_string()),
            },
        }
    }

    pub fn apply(mut self, overrides: &ProviderOverrides) -> ProviderSettings {
        if let Some(model_name) = &overrides.model_name {
            self.model_name = model_name.clone();
        }
        if let Some(api_url) = &overrides.api_url {
            self.api_url = api_url.clone();
        }
        if overrides.max_gen_tokens.is_some() {
            self.max_gen_tokens = overrides.max_gen_tokens;
        }
        if overrides.temperature.is_some() {
            self.temperature = overrides.temperature;
        }
        if let Some(timeout) = overrides.model_api_timeout {
            self.model_api_timeout = timeout;
        }
        if let Some(output_csv) = &overrides.output_csv {
            self.output_csv = output_csv.clone();
        }
        if overrides.proxy_server.is_some() {
            self.proxy_server = overrides.proxy_server.clone();
        }
        if overrides.reasoning_effort.is_some() {
            self.reasoning_effort = overrides.reasoning_effort.clone();
        }
        if overrides.verbosity.is_some() {
            self.verbosity = overrides.verbosity.clone();
        }
        self
    }
}

/// Application configuration: the `[processor]` table plus one `[llm_apis."<service>"]`
/// table per service.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub processor: ProcessorSettings,
    pub llm_apis: HashMap<String, ProviderOverrides>,
}

impl AppConfig {
    /// Reads the configuration file (if any) and the BATCHPROMPT__* environment variables.
    ///
    /// When `config_file` is None the default file is used if it exists. An explicitly
    /// given file must exist.
    pub fn load(config_file: Option<&Path>) -> Result<AppConfig, BatchError> {
        let (filename, required) = match config_file {
            Some(path) => (path.to_string_lossy().to_string(), true),
            None => (DEFAULT_CONFIG_FILE.to_string(), false),
        };
        info!("Reading configuration from: {}", filename);

        let app_config = Config::builder()
            .add_source(config::File::new(&filename, FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let parsed: AppConfig = app_config.try_deserialize()?;
        debug!("Loaded configuration: {:?}", parsed);
        Ok(parsed)
    }

    /// Parses configuration from TOML text, without consulting the environment.
    pub fn from_toml_str(toml_text: &str) -> Result<AppConfig, BatchError> {
        let app_config = Config::builder()
            .add_source(config::File::from_str(toml_text, FileFormat::Toml))
            .build()?;
        Ok(app_config.try_deserialize()?)
    }

    /// Resolves the settings of one service: defaults, then the config file table.
    pub fn provider_settings(&self, provider: Provider) -> ProviderSettings {
        let defaults = ProviderSettings::defaults_for(provider);
        match self.llm_apis.get(provider.config_key()) {
            Some(overrides) => defaults.apply(overrides),
            None => defaults,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_the_file_conventions() {
        let app_config = AppConfig::default();
        assert_eq!(app_config.processor.input_csv, PathBuf::from("generated_prompts.csv"));
        assert_eq!(app_config.processor.cooldown_secs, 60);

        let claude = app_config.provider_settings(Provider::Claude);
        assert_eq!(claude.output_csv, PathBuf::from("generated_responses_claude.csv"));
        assert_eq!(claude.max_gen_tokens, Some(512));

        let openai = app_config.provider_settings(Provider::OpenAi);
        assert_eq!(openai.model_name, "gpt-5");
        assert_eq!(openai.reasoning_effort.as_deref(), Some("medium"));
    }

    #[test]
    fn toml_tables_override_defaults() {
        let app_config = AppConfig::from_toml_str(
            r#"
            [processor]
            cooldown_secs = 5
            max_rate_limit_retries = 10

            [llm_apis."gemini"]
            model_name = "gemini-1.5-flash"
            temperature = 0.0
            output_csv = "out/gemini.csv"
            "#,
        )
        .unwrap();

        assert_eq!(app_config.processor.input_csv, PathBuf::from("generated_prompts.csv"));

        let policy = app_config.processor.retry_policy();
        assert_eq!(policy.cooldown, Duration::from_secs(5));
        assert_eq!(policy.inter_request_delay, Duration::from_secs(1));
        assert_eq!(policy.max_rate_limit_retries, Some(10));

        let gemini = app_config.provider_settings(Provider::Gemini);
        assert_eq!(gemini.model_name, "gemini-1.5-flash");
        assert_eq!(gemini.temperature, Some(0.0));
        assert_eq!(gemini.output_csv, PathBuf::from("out/gemini.csv"));
        assert_eq!(gemini.api_url, "https://generativelanguage.googleapis.com/v1beta/models");

        let claude = app_config.provider_settings(Provider::Claude);
        assert_eq!(claude, ProviderSettings::defaults_for(Provider::Claude));
    }

    #[test]
    fn prompt_column_cannot_be_configured() {
        let app_config = AppConfig::from_toml_str("[processor]\nprompt_column = \"question\"\n").unwrap();
        assert_eq!(app_config.processor, ProcessorSettings::default());
    }

    #[test]
    fn environment_overrides_the_config_file() {
        let _env = crate::ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().unwrap();
        let config_file = dir.path().join("settings.toml");
        std::fs::write(
            &config_file,
            "[processor]\ninput_csv = \"x.csv\"\ncooldown_secs = 5\n\n[llm_apis.\"claude\"]\nmodel_name = \"m1\"\n",
        )
        .unwrap();

        std::env::set_var("BATCHPROMPT__PROCESSOR__COOLDOWN_SECS", "30");
        let result = AppConfig::load(Some(&config_file));
        std::env::remove_var("BATCHPROMPT__PROCESSOR__COOLDOWN_SECS");

        let app_config = result.unwrap();
        assert_eq!(app_config.processor.cooldown_secs, 30);
        assert_eq!(app_config.processor.input_csv, PathBuf::from("x.csv"));
        assert_eq!(app_config.provider_settings(Provider::Claude).model_name, "m1");
    }

    #[test]
    fn explicit_config_file_must_exist() {
        let _env = crate::ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let dir = TempDir::new().unwrap();
        let result = AppConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(BatchError::Config(_))));
    }

    #[test]
    fn malformed_config_is_an_error() {
        let result = AppConfig::from_toml_str("[processor]\ncooldown_secs = \"soon\"\n");
        assert!(matches!(result, Err(BatchError::Config(_))));
    }
}
