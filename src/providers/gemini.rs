use std::{env, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    config,
    error::LLMError,
    providers::LLMProvider,
    types::{ChatMessage, CompletionRequest, CompletionResponse, MessageRole, TokenUsage},
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub base_url: String,
    /// `None` leaves the request unbounded.
    pub request_timeout: Option<Duration>,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = Some(request_timeout);
        self
    }

    /// Applies `GEMINI_BASE_URL` and `GEMINI_REQUEST_TIMEOUT_MS` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(base_url) = env::var(config::BASE_URL_ENV) {
            if !base_url.trim().is_empty() {
                self.base_url = base_url;
            }
        }
        if let Ok(timeout_ms) = env::var(config::REQUEST_TIMEOUT_ENV) {
            match timeout_from_millis(&timeout_ms) {
                Ok(timeout) => self.request_timeout = timeout,
                Err(_) => tracing::warn!(
                    value = %timeout_ms,
                    "ignoring {} that is not a number of milliseconds",
                    config::REQUEST_TIMEOUT_ENV
                ),
            }
        }
        self
    }
}

/// `0` disables the timeout.
fn timeout_from_millis(value: &str) -> Result<Option<Duration>, std::num::ParseIntError> {
    let ms = value.trim().parse::<u64>()?;
    Ok((ms > 0).then(|| Duration::from_millis(ms)))
}

#[derive(Debug, Clone)]
pub struct Gemini {
    client: Client,
    config: GeminiConfig,
}

impl Gemini {
    pub fn from_config(config: GeminiConfig) -> Result<Self, LLMError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        Ok(Self { client, config })
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model.trim_start_matches("models/")
        )
    }

    fn with_default_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("x-goog-api-key", &self.config.api_key)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing)]
    thought: bool,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            thought: false,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

fn build_body(
    messages: Vec<ChatMessage>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    top_p: Option<f32>,
) -> Result<GenerateContentBody, LLMError> {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in messages {
        let Some(text) = message.content else {
            continue;
        };
        match message.role {
            MessageRole::System => system_parts.push(Part::text(text)),
            MessageRole::User => contents.push(Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(text)],
            }),
            MessageRole::Assistant => contents.push(Content {
                role: Some("model".to_string()),
                parts: vec![Part::text(text)],
            }),
        }
    }

    if contents.is_empty() {
        return Err(LLMError::Unsupported(
            "generation request without any user or assistant turns",
        ));
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(Content {
            role: None,
            parts: system_parts,
        })
    };

    let generation_config = if max_tokens.is_none() && temperature.is_none() && top_p.is_none() {
        None
    } else {
        Some(GenerationConfig {
            max_output_tokens: max_tokens,
            temperature,
            top_p,
        })
    };

    Ok(GenerateContentBody {
        contents,
        system_instruction,
        generation_config,
    })
}

fn into_completion(parsed: GenerateContentResponse) -> Result<CompletionResponse, LLMError> {
    let usage = parsed.usage_metadata.map(|usage| TokenUsage {
        prompt_tokens: usage.prompt_token_count,
        completion_tokens: usage.candidates_token_count,
        total_tokens: usage.total_token_count,
    });

    let Some(candidate) = parsed.candidates.into_iter().next() else {
        if let Some(reason) = parsed.prompt_feedback.and_then(|feedback| feedback.block_reason) {
            return Err(LLMError::Blocked(reason));
        }
        return Err(LLMError::InvalidResponse("response did not contain any candidates"));
    };

    let texts: Vec<String> = candidate
        .content
        .map(|content| content.parts)
        .unwrap_or_default()
        .into_iter()
        .filter(|part| !part.thought)
        .filter_map(|part| part.text)
        .collect();

    if texts.is_empty() {
        return match candidate.finish_reason {
            Some(reason) if reason != "STOP" => Err(LLMError::Blocked(reason)),
            _ => Err(LLMError::InvalidResponse("candidate did not contain any text parts")),
        };
    }

    Ok(CompletionResponse {
        message: ChatMessage::assistant(texts.concat()),
        usage,
        finish_reason: candidate.finish_reason,
    })
}

fn provider_error(status: reqwest::StatusCode, text: &str) -> LLMError {
    if let Ok(envelope) = serde_json::from_str::<GeminiErrorEnvelope>(text) {
        let GeminiError { message, status } = envelope.error;
        return match status {
            Some(status) => LLMError::Provider(format!("{status}: {message}")),
            None => LLMError::Provider(message),
        };
    }

    LLMError::Provider(format!("unexpected status {status}: {text}"))
}

#[async_trait]
impl LLMProvider for Gemini {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LLMError> {
        let CompletionRequest {
            model,
            messages,
            max_tokens,
            temperature,
            top_p,
        } = request;

        let body = build_body(messages, max_tokens, temperature, top_p)?;
        let url = self.endpoint(&model);
        tracing::debug!(%model, %url, "sending generateContent request");

        let builder = self
            .with_default_headers(self.client.post(url))
            .json(&body);

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            let text = response.text().await?;
            tracing::warn!(%status, %model, "generateContent request failed");
            return Err(provider_error(status, &text));
        }

        let text = response.text().await?;
        let parsed: GenerateContentResponse = serde_json::from_str(&text)?;
        let completion = into_completion(parsed)?;

        if let Some(usage) = &completion.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                total_tokens = usage.total_tokens,
                "generateContent usage"
            );
        }

        Ok(completion)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(value: serde_json::Value) -> Result<CompletionResponse, LLMError> {
        into_completion(serde_json::from_value(value).expect("response json"))
    }

    #[test]
    fn endpoint_joins_base_and_model() {
        let gemini = Gemini::from_config(
            GeminiConfig::new("key").with_base_url("http://localhost:9000/v1beta/"),
        )
        .expect("client");

        assert_eq!(
            gemini.endpoint("gemini-1.5-flash"),
            "http://localhost:9000/v1beta/models/gemini-1.5-flash:generateContent"
        );
        assert_eq!(
            gemini.endpoint("models/gemini-1.5-flash"),
            "http://localhost:9000/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        assert_eq!(timeout_from_millis("0").unwrap(), None);
        assert_eq!(
            timeout_from_millis("1500").unwrap(),
            Some(Duration::from_millis(1500))
        );
        assert!(timeout_from_millis("soon").is_err());
    }

    #[test]
    fn single_prompt_body_has_one_user_turn() {
        let body = build_body(vec![ChatMessage::user("Hello, are you working?")], None, None, None)
            .expect("body");

        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "contents": [
                    { "role": "user", "parts": [{ "text": "Hello, are you working?" }] }
                ]
            })
        );
    }

    #[test]
    fn system_and_assistant_messages_are_mapped() {
        let body = build_body(
            vec![
                ChatMessage::system("Be brief."),
                ChatMessage::user("Hi"),
                ChatMessage::assistant("Hello."),
                ChatMessage::user("Still there?"),
            ],
            Some(64),
            Some(0.5),
            None,
        )
        .expect("body");

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["systemInstruction"], json!({ "parts": [{ "text": "Be brief." }] }));
        assert_eq!(value["contents"][1]["role"], "model");
        assert_eq!(value["contents"].as_array().unwrap().len(), 3);
        assert_eq!(
            value["generationConfig"],
            json!({ "maxOutputTokens": 64, "temperature": 0.5 })
        );
    }

    #[test]
    fn body_without_turns_is_rejected() {
        let err = build_body(vec![ChatMessage::system("alone")], None, None, None).unwrap_err();
        assert!(matches!(err, LLMError::Unsupported(_)));
    }

    #[test]
    fn response_text_concatenates_parts_and_skips_thoughts() {
        let completion = parse(json!({
            "candidates": [{
                "content": {
                    "role": "model",
                    "parts": [
                        { "text": "thinking...", "thought": true },
                        { "text": "Yes, " },
                        { "text": "I am working." }
                    ]
                },
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 6,
                "candidatesTokenCount": 5,
                "totalTokenCount": 11
            }
        }))
        .expect("completion");

        assert_eq!(completion.text(), "Yes, I am working.");
        assert_eq!(completion.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                prompt_tokens: 6,
                completion_tokens: 5,
                total_tokens: 11
            })
        );
    }

    #[test]
    fn blocked_prompt_is_reported() {
        let err = parse(json!({ "promptFeedback": { "blockReason": "SAFETY" } })).unwrap_err();
        assert!(matches!(err, LLMError::Blocked(ref reason) if reason == "SAFETY"));
    }

    #[test]
    fn empty_candidate_list_is_invalid() {
        let err = parse(json!({ "candidates": [] })).unwrap_err();
        assert!(matches!(err, LLMError::InvalidResponse(_)));
    }

    #[test]
    fn candidate_without_text_reports_finish_reason() {
        let err = parse(json!({ "candidates": [{ "finishReason": "RECITATION" }] })).unwrap_err();
        assert!(matches!(err, LLMError::Blocked(ref reason) if reason == "RECITATION"));

        let err = parse(json!({ "candidates": [{ "content": { "parts": [] }, "finishReason": "STOP" }] }))
            .unwrap_err();
        assert!(matches!(err, LLMError::InvalidResponse(_)));
    }

    #[test]
    fn error_envelope_is_decoded() {
        let body = r#"{"error":{"code":400,"message":"API key not valid.","status":"INVALID_ARGUMENT"}}"#;
        let err = provider_error(reqwest::StatusCode::BAD_REQUEST, body);
        assert_eq!(
            err.to_string(),
            "provider error: INVALID_ARGUMENT: API key not valid."
        );

        let err = provider_error(reqwest::StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(
            err.to_string(),
            "provider error: unexpected status 502 Bad Gateway: upstream down"
        );
    }
}
