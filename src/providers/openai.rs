use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::ProviderError;
use crate::llm::{api_key_header, send_json_request, Provider, TextGenerator};
use crate::settings::ProviderSettings;

/// Environment variable that overrides the configured model name.
pub const OPENAI_MODEL_ENV: &str = "OPENAI_MODEL";

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ReasoningOptions {
    pub effort: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct TextOptions {
    pub verbosity: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ResponsesRequestPayload {
    pub model: String,
    pub input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

/// Prepare custom headers for OpenAI's API
///
/// # Arguments
///
/// * `api_key`: The API key for the service
///
/// returns: Result<HeaderMap<HeaderValue>, ProviderError>
pub fn prepare_openai_headers(api_key: &str) -> Result<HeaderMap, ProviderError> {

    let mut custom_headers = HeaderMap::new();

    // set header "Authorization: Bearer $OPENAI_API_KEY"
    let api_key = format!("Bearer {}", api_key);
    custom_headers.insert(reqwest::header::AUTHORIZATION, api_key_header(api_key.as_str())?);

    return Ok(custom_headers);
}

/// Generate payload of the format:
///     {
//           "model": "gpt-5",
//           "input": "Say this is a test!",
//           "reasoning": {"effort": "medium"},
//           "text": {"verbosity": "medium"}
//         }
pub fn prepare_openai_payload(prompt: &str, settings: &ProviderSettings) -> ResponsesRequestPayload {
    ResponsesRequestPayload {
        model: settings.model_name.clone(),
        input: prompt.to_string(),
        reasoning: settings.reasoning_effort.clone().map(|effort| ReasoningOptions { effort }),
        text: settings.verbosity.clone().map(|verbosity| TextOptions { verbosity }),
        temperature: settings.temperature,
        max_output_tokens: settings.max_gen_tokens,
    }
}

/// Returns `output_text` when the service provides it, otherwise joins the
/// `output_text` items of all message outputs.
pub fn extract_openai_text(json: &Value) -> Option<String> {
    let text = match json.get("output_text").and_then(Value::as_str) {
        Some(output_text) => output_text.to_string(),
        None => {
            let outputs = json.get("output")?.as_array()?;
            outputs
                .iter()
                .filter_map(|item| item.get("content").and_then(Value::as_array))
                .flatten()
                .filter(|content| content.get("type").and_then(Value::as_str) == Some("output_text"))
                .filter_map(|content| content.get("text").and_then(Value::as_str))
                .collect::<String>()
        }
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.to_string())
}

pub struct OpenAiGenerator {
    client: Client,
    settings: ProviderSettings,
}

impl OpenAiGenerator {
    pub fn new(client: Client, settings: ProviderSettings) -> OpenAiGenerator {
        OpenAiGenerator { client, settings }
    }
}

impl TextGenerator for OpenAiGenerator {
    fn service_name(&self) -> &str {
        Provider::OpenAi.service_name()
    }

    fn response_column(&self) -> &str {
        Provider::OpenAi.response_column()
    }

    fn generate(&self, api_key: &str, prompt: &str) -> Result<String, ProviderError> {
        let json_payload = prepare_openai_payload(prompt, &self.settings);
        let request = self.client
            .post(self.settings.api_url.as_str())
            .headers(prepare_openai_headers(api_key)?)
            .json(&json_payload);

        let json = send_json_request(self.service_name(), request)?;
        if let Some(usage) = json.get("usage") {
            debug!("OpenAI API usage: {}", usage);
        }
        match extract_openai_text(&json) {
            Some(text) => {
                info!("OpenAI response received ({} chars)", text.chars().count());
                Ok(text)
            }
            None => {
                debug!("OpenAI API: full response structure: {}", json);
                Err(ProviderError::EmptyResponse(self.service_name().to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;
    use crate::llm::build_llm_api_client;

    #[test]
    fn default_payload_requests_medium_reasoning_and_verbosity() {
        let settings = ProviderSettings::defaults_for(Provider::OpenAi);
        let payload = serde_json::to_value(prepare_openai_payload("Hi", &settings)).unwrap();
        assert_eq!(
            payload,
            json!({
                "model": "gpt-5",
                "input": "Hi",
                "reasoning": {"effort": "medium"},
                "text": {"verbosity": "medium"}
            })
        );
    }

    #[test]
    fn text_is_read_from_output_items() {
        let json = json!({
            "output": [
                {"type": "reasoning", "summary": []},
                {"type": "message", "content": [
                    {"type": "output_text", "text": "Hello "},
                    {"type": "output_text", "text": "there. "}
                ]}
            ]
        });
        assert_eq!(extract_openai_text(&json).as_deref(), Some("Hello there."));
        assert_eq!(extract_openai_text(&json!({"output_text": "  direct "})).as_deref(), Some("direct"));
        assert_eq!(extract_openai_text(&json!({"output": []})), None);
    }

    #[test]
    fn generate_uses_bearer_auth() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/v1/responses")
            .match_header("authorization", "Bearer sk-2")
            .match_body(Matcher::PartialJson(json!({"input": "ping"})))
            .with_status(200)
            .with_body(r#"{"output":[{"type":"message","content":[{"type":"output_text","text":"pong"}]}]}"#)
            .create();

        let mut settings = ProviderSettings::defaults_for(Provider::OpenAi);
        settings.api_url = format!("{}/v1/responses", server.url());
        let generator = OpenAiGenerator::new(build_llm_api_client(5, 5, None).unwrap(), settings);
        assert_eq!(generator.generate("sk-2", "ping").unwrap(), "pong");
        mock.assert();
    }

    #[test]
    fn bearer_header_rejects_keys_with_line_breaks() {
        assert!(matches!(prepare_openai_headers("sk-1\n"), Err(ProviderError::InvalidApiKey)));
        assert_eq!(prepare_openai_headers("sk-1").unwrap()["authorization"], "Bearer sk-1");
    }

    #[test]
    fn server_error_is_not_rate_limited() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/v1/responses")
            .with_status(500)
            .with_body(r#"{"error":{"message":"The server had an error"}}"#)
            .create();

        let mut settings = ProviderSettings::defaults_for(Provider::OpenAi);
        settings.api_url = format!("{}/v1/responses", server.url());
        let generator = OpenAiGenerator::new(build_llm_api_client(5, 5, None).unwrap(), settings);
        let err = generator.generate("sk", "ping").unwrap_err();
        assert!(!err.is_rate_limited());
        assert!(err.to_string().contains("The server had an error"));
    }
}
