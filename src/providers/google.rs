use std::collections::HashMap;
use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::ProviderError;
use crate::llm::{api_key_header, send_json_request, Provider, TextGenerator};
use crate::settings::ProviderSettings;

/// Harm categories whose blocking is switched off, the prompts are assumed safe.
pub const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Parts {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct Contents {
    pub role: String,
    pub parts: Vec<Parts>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct GeminiRequestPayload {
    pub contents: Vec<Contents>,
    #[serde(rename = "safetySettings")]
    pub safety_settings: Vec<HashMap<String, String>>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
}

/// Add headers for google gen ai api:
/// "x-goog-api-key: PUT-YOUR-API-KEY-HERE"
///
/// # Arguments
///
/// * `api_key`: The API key for the service
///
/// returns: Result<HeaderMap<HeaderValue>, ProviderError>
pub fn prepare_gemini_headers(api_key: &str) -> Result<HeaderMap, ProviderError> {
    const GOOG_API_HEADER: HeaderName = HeaderName::from_static("x-goog-api-key");

    let mut custom_headers = HeaderMap::new();
    custom_headers.insert(GOOG_API_HEADER, api_key_header(api_key)?);
    Ok(custom_headers)
}

/// Prepare the JSON payload for sending to the Gemini LLM API service.
///
/// # Arguments
///
/// * `prompt`: The prompt to the model.
/// * `settings`: temperature and max output tokens, both optional
///
/// returns: GeminiRequestPayload
pub fn prepare_gemini_api_payload(prompt: &str, settings: &ProviderSettings) -> GeminiRequestPayload {
    let generation_config = if settings.temperature.is_some() || settings.max_gen_tokens.is_some() {
        Some(GenerationConfig {
            temperature: settings.temperature,
            max_output_tokens: settings.max_gen_tokens,
        })
    } else {
        None
    };

    GeminiRequestPayload {
        contents: vec![Contents {
            role: "user".to_string(),
            parts: vec![Parts { text: prompt.to_string() }],
        }],
        safety_settings: HARM_CATEGORIES
            .iter()
            .map(|category| {
                HashMap::from([
                    ("category".to_string(), category.to_string()),
                    ("threshold".to_string(), "BLOCK_NONE".to_string()),
                ])
            })
            .collect(),
        generation_config,
    }
}

/// Joins the text parts of the first candidate.
pub fn extract_gemini_text(json: &Value) -> Option<String> {
    let parts = json
        .get("candidates")?
        .get(0)?
        .get("content")?
        .get("parts")?
        .as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

pub struct GeminiGenerator {
    client: Client,
    settings: ProviderSettings,
}

impl GeminiGenerator {
    pub fn new(client: Client, settings: ProviderSettings) -> GeminiGenerator {
        GeminiGenerator { client, settings }
    }

    /// e.g. https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:generateContent
    pub fn api_url(&self) -> String {
        format!(
            "{}/{}:generateContent",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.model_name
        )
    }
}

impl TextGenerator for GeminiGenerator {
    fn service_name(&self) -> &str {
        Provider::Gemini.service_name()
    }

    fn response_column(&self) -> &str {
        Provider::Gemini.response_column()
    }

    fn generate(&self, api_key: &str, prompt: &str) -> Result<String, ProviderError> {
        let json_payload = prepare_gemini_api_payload(prompt, &self.settings);
        let request = self.client
            .post(self.api_url())
            .headers(prepare_gemini_headers(api_key)?)
            .json(&json_payload);

        let json = send_json_request(self.service_name(), request)?;
        if let Some(usage) = json.get("usageMetadata") {
            debug!("Gemini API usage: {}", usage);
        }
        match extract_gemini_text(&json) {
            Some(text) => Ok(text),
            None => {
                // a blocked prompt comes back without candidates
                if let Some(feedback) = json.get("promptFeedback") {
                    info!("Gemini API: prompt feedback: {}", feedback);
                }
                Err(ProviderError::EmptyResponse(self.service_name().to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::llm::build_llm_api_client;

    fn generator_for(base_url: String) -> GeminiGenerator {
        let mut settings = ProviderSettings::defaults_for(Provider::Gemini);
        settings.api_url = base_url;
        settings.model_name = "gemini-test".to_string();
        GeminiGenerator::new(build_llm_api_client(5, 5, None).unwrap(), settings)
    }

    #[test]
    fn key_header_rejects_non_header_characters() {
        assert!(matches!(prepare_gemini_headers("AIza\n"), Err(ProviderError::InvalidApiKey)));
        assert_eq!(prepare_gemini_headers("AIza-1").unwrap()["x-goog-api-key"], "AIza-1");
    }

    #[test]
    fn payload_disables_all_safety_filters() {
        let settings = ProviderSettings::defaults_for(Provider::Gemini);
        let payload = prepare_gemini_api_payload("Hello", &settings);
        assert_eq!(payload.safety_settings.len(), 4);
        assert!(payload.safety_settings.iter().all(|s| s["threshold"] == "BLOCK_NONE"));
        assert_eq!(payload.contents[0].parts[0].text, "Hello");

        let as_json = serde_json::to_value(&payload).unwrap();
        assert!(as_json.get("generationConfig").is_none());
    }

    #[test]
    fn configured_generation_params_are_sent() {
        let mut settings = ProviderSettings::defaults_for(Provider::Gemini);
        settings.max_gen_tokens = Some(1024);
        let as_json = serde_json::to_value(prepare_gemini_api_payload("Hello", &settings)).unwrap();
        assert_eq!(as_json["generationConfig"], json!({"maxOutputTokens": 1024}));
    }

    #[test]
    fn candidate_parts_are_joined_and_trimmed() {
        let json = json!({"candidates": [{"content": {"parts": [{"text": " A rainbow "}, {"text": "forms.\n"}]}}]});
        assert_eq!(extract_gemini_text(&json).as_deref(), Some("A rainbow forms."));
        assert_eq!(extract_gemini_text(&json!({"promptFeedback": {"blockReason": "OTHER"}})), None);
    }

    #[test]
    fn generate_posts_to_model_endpoint_with_key_header() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .match_header("x-goog-api-key", "goog-1")
            .with_status(200)
            .with_body(r#"{"candidates":[{"content":{"parts":[{"text":"Refraction."}],"role":"model"}}],"usageMetadata":{"promptTokenCount":4}}"#)
            .create();

        let generator = generator_for(format!("{}/models", server.url()));
        assert_eq!(generator.generate("goog-1", "rainbow?").unwrap(), "Refraction.");
        mock.assert();
    }

    #[test]
    fn resource_exhausted_is_rate_limited() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .with_status(429)
            .with_body(r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#)
            .create();

        let generator = generator_for(format!("{}/models", server.url()));
        assert!(generator.generate("goog-1", "rainbow?").unwrap_err().is_rate_limited());
    }

    #[test]
    fn blocked_prompt_is_an_empty_response() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/models/gemini-test:generateContent")
            .with_status(200)
            .with_body(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#)
            .create();

        let generator = generator_for(format!("{}/models", server.url()));
        assert!(matches!(generator.generate("goog-1", "x"), Err(ProviderError::EmptyResponse(_))));
    }
}
