// file: llm.rs

use std::error::Error;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use log::{debug, error};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use crate::error::{BatchError, ProviderError};
use crate::providers::anthropic::ClaudeGenerator;
use crate::providers::google::GeminiGenerator;
use crate::providers::openai::OpenAiGenerator;
use crate::settings::ProviderSettings;

/// The one outbound call the batch loop makes per row.
///
/// Implementations own the transport, authentication and response parsing of a
/// service. The API key is handed in on every call so that rotating keys does not
/// require rebuilding the HTTP client.
pub trait TextGenerator {
    /// Human readable service name used in log messages.
    fn service_name(&self) -> &str;

    /// Name of the column appended to the output file.
    fn response_column(&self) -> &str;

    fn generate(&self, api_key: &str, prompt: &str) -> Result<String, ProviderError>;
}

/// The LLM services a batch can be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    Claude,
    Gemini,
    OpenAi,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Claude, Provider::Gemini, Provider::OpenAi];

    /// Key of the `[llm_apis."<key>"]` table in the configuration file.
    pub fn config_key(&self) -> &'static str {
        match self {
            Provider::Claude => "claude",
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        }
    }

    pub fn service_name(&self) -> &'static str {
        match self {
            Provider::Claude => "Claude",
            Provider::Gemini => "Gemini",
            Provider::OpenAi => "OpenAI",
        }
    }

    pub fn response_column(&self) -> &'static str {
        match self {
            Provider::Claude => "claude_response",
            Provider::Gemini => "gemini_response",
            Provider::OpenAi => "openai_response",
        }
    }

    /// Environment variables holding the keys: (comma separated list, single key fallback).
    pub fn key_env_vars(&self) -> (&'static str, &'static str) {
        match self {
            Provider::Claude => ("ANTHROPIC_API_KEYS", "ANTHROPIC_API_KEY"),
            Provider::Gemini => ("GOOGLE_API_KEYS", "GOOGLE_API_KEY"),
            Provider::OpenAi => ("OPENAI_API_KEYS", "OPENAI_API_KEY"),
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

impl FromStr for Provider {
    type Err = BatchError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(Provider::Claude),
            "gemini" | "google" => Ok(Provider::Gemini),
            "openai" | "chatgpt" => Ok(Provider::OpenAi),
            other => Err(BatchError::UnknownProvider(other.to_string())),
        }
    }
}

pub struct LLMTextGenBuilder;

impl LLMTextGenBuilder {
    /// Builds the text generator for a service.
    ///
    /// # Arguments
    ///
    /// * `provider`: which service to call
    /// * `settings`: model name, endpoint, timeout and generation parameters
    ///
    /// returns: Result<Box<dyn TextGenerator>, BatchError>
    pub fn build(provider: Provider, settings: &ProviderSettings) -> Result<Box<dyn TextGenerator>, BatchError> {
        let client = build_llm_api_client(
            settings.model_api_timeout,
            settings.model_api_timeout,
            settings.proxy_server.clone(),
        )?;
        let generator: Box<dyn TextGenerator> = match provider {
            Provider::Claude => Box::new(ClaudeGenerator::new(client, settings.clone())),
            Provider::Gemini => Box::new(GeminiGenerator::new(client, settings.clone())),
            Provider::OpenAi => Box::new(OpenAiGenerator::new(client, settings.clone())),
        };
        Ok(generator)
    }
}

pub fn build_llm_api_client(connect_timeout: u64, fetch_timeout: u64, proxy_url: Option<String>) -> Result<Client, BatchError> {

    let pool_idle_timeout: u64 = (connect_timeout + fetch_timeout) * 5;
    let pool_max_idle_connections: usize = 1;

    let mut headers = HeaderMap::new();
    headers.insert(reqwest::header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(reqwest::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let mut client_builder = Client::builder()
        .timeout(Duration::from_secs(fetch_timeout))
        .connect_timeout(Duration::from_secs(connect_timeout))
        .default_headers(headers)
        .gzip(true)
        .pool_idle_timeout(Duration::from_secs(pool_idle_timeout))
        .pool_max_idle_per_host(pool_max_idle_connections);

    if let Some(proxy_url_str) = proxy_url {
        // if proxy is configured, then add proxy with https rule:
        let proxy_obj = reqwest::Proxy::https(proxy_url_str.as_str()).map_err(|e| {
            error!("Unable to use proxy, Error when setting the proxy server: {}", e);
            e
        })?;
        client_builder = client_builder.proxy(proxy_obj);
    }
    Ok(client_builder.build()?)
}

/// Turns an API key into a header value. Keys with characters that are not
/// allowed in an HTTP header are rejected instead of being left out of the request.
pub(crate) fn api_key_header(value: &str) -> Result<HeaderValue, ProviderError> {
    let mut header_val = HeaderValue::from_str(value).map_err(|_| ProviderError::InvalidApiKey)?;
    header_val.set_sensitive(true);
    Ok(header_val)
}

/// Sends a prepared request and returns the parsed JSON body of a successful response.
///
/// HTTP 429, and error bodies that report a 429 or RESOURCE_EXHAUSTED, become
/// `ProviderError::RateLimited`; every other failure is a non-retryable error.
pub(crate) fn send_json_request(service: &str, request: RequestBuilder) -> Result<Value, ProviderError> {
    let resp = request.send().map_err(|e| {
        error!("{} API: When posting json payload to service: {}", service, e);
        ProviderError::Transport(format!("{} API: {}", service, describe_error(&e)))
    })?;

    let status = resp.status();
    let body = resp.text().map_err(|e| {
        error!("{} API: When reading response body: {}", service, e);
        ProviderError::Transport(format!("{} API: {}", service, describe_error(&e)))
    })?;

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited(format!(
            "{} API: Too many requests. {}",
            service,
            api_error_message(&body).unwrap_or_default()
        )));
    }

    if !status.is_success() {
        let message = api_error_message(&body).unwrap_or_else(|| body.trim().to_string());
        if is_rate_limit_message(&message) {
            return Err(ProviderError::RateLimited(format!("{} API: {}", service, message)));
        }
        return Err(ProviderError::Status {
            service: service.to_string(),
            status,
            message,
        });
    }

    let json: Value = serde_json::from_str(&body).map_err(|e| {
        ProviderError::InvalidResponse(format!("{} API: When retrieving json from response: {}", service, e))
    })?;
    debug!("{} API response:\n{:?}", service, json);

    // some services report failures inside a 200 response
    if let Some(message) = json.get("error").and_then(extract_message) {
        if is_rate_limit_message(&message) {
            return Err(ProviderError::RateLimited(format!("{} API: {}", service, message)));
        }
        return Err(ProviderError::InvalidResponse(format!("{} API error: {}", service, message)));
    }
    Ok(json)
}

/// Pulls `error.message` (or a bare string `error`) out of an error body.
fn api_error_message(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    json.get("error").and_then(extract_message)
}

fn extract_message(error_val: &Value) -> Option<String> {
    if let Some(message) = error_val.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    error_val.as_str().map(String::from)
}

fn is_rate_limit_message(message: &str) -> bool {
    message.contains("429") || message.contains("RESOURCE_EXHAUSTED")
}

fn describe_error(e: &reqwest::Error) -> String {
    match e.source() {
        Some(err_source) => format!("{}, caused by: {}", e, err_source),
        None => e.to_string(),
    }
}
