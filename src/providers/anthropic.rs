use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::ProviderError;
use crate::llm::{api_key_header, send_json_request, Provider, TextGenerator};
use crate::settings::ProviderSettings;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 512;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ClaudeMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ClaudeRequestPayload {
    pub model: String,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    pub messages: Vec<ClaudeMessage>,
}

/// Prepare custom headers for Anthropic's messages API:
/// "x-api-key: $ANTHROPIC_API_KEY"
/// "anthropic-version: 2023-06-01"
///
/// # Arguments
///
/// * `api_key`: The API key for the service
///
/// returns: Result<HeaderMap<HeaderValue>, ProviderError>
pub fn prepare_claude_headers(api_key: &str) -> Result<HeaderMap, ProviderError> {
    const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
    const VERSION_HEADER: HeaderName = HeaderName::from_static("anthropic-version");

    let mut custom_headers = HeaderMap::new();
    custom_headers.insert(API_KEY_HEADER, api_key_header(api_key)?);
    custom_headers.insert(VERSION_HEADER, HeaderValue::from_static(ANTHROPIC_VERSION));
    Ok(custom_headers)
}

/// Generate payload of the format:
///     {
//           "model": "claude-sonnet-4-20250514",
//           "max_tokens": 512,
//           "temperature": 0.7,
//           "messages": [{"role": "user", "content": "Say this is a test!"}]
//         }
pub fn prepare_claude_payload(prompt: &str, settings: &ProviderSettings) -> ClaudeRequestPayload {
    ClaudeRequestPayload {
        model: settings.model_name.clone(),
        max_tokens: settings.max_gen_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: settings.temperature,
        messages: vec![ClaudeMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        }],
    }
}

/// The reply is a list of content blocks; the answer is the first text block.
pub fn extract_claude_text(json: &Value) -> Option<String> {
    let blocks = json.get("content")?.as_array()?;
    blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str).unwrap_or("text") == "text")
        .find_map(|block| block.get("text").and_then(Value::as_str))
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

pub struct ClaudeGenerator {
    client: Client,
    settings: ProviderSettings,
}

impl ClaudeGenerator {
    pub fn new(client: Client, settings: ProviderSettings) -> ClaudeGenerator {
        ClaudeGenerator { client, settings }
    }
}

impl TextGenerator for ClaudeGenerator {
    fn service_name(&self) -> &str {
        Provider::Claude.service_name()
    }

    fn response_column(&self) -> &str {
        Provider::Claude.response_column()
    }

    fn generate(&self, api_key: &str, prompt: &str) -> Result<String, ProviderError> {
        let json_payload = prepare_claude_payload(prompt, &self.settings);
        let request = self.client
            .post(self.settings.api_url.as_str())
            .headers(prepare_claude_headers(api_key)?)
            .json(&json_payload);

        let json = send_json_request(self.service_name(), request)?;
        if let Some(usage) = json.get("usage") {
            debug!("Claude API usage: {}", usage);
        }
        match extract_claude_text(&json) {
            Some(text) => Ok(text),
            None => {
                info!("Claude API: response had no text content: {}", json);
                Err(ProviderError::EmptyResponse(self.service_name().to_string()))
            }
        }
    }
}
