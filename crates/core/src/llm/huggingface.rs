use crate::config::Settings;
use crate::llm::error::LlmDiagnosticsError;
use crate::llm::{LlmClient, Provider};
use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co";
const DEFAULT_MODEL: &str = "mistralai/Mistral-7B-Instruct-v0.2";
const DEFAULT_TEMPERATURE: f32 = 0.1;
const DEFAULT_MAX_NEW_TOKENS: u32 = 512;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Authenticated JSON calls against the Hugging Face Inference API. Shared by
/// text generation and feature extraction.
#[derive(Debug, Clone)]
pub struct InferenceHttp {
    http: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl InferenceHttp {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_token = settings.require_huggingface_api_token()?.to_string();
        let base_url = settings
            .huggingface_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let timeout_secs = std::env::var("HF_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Self::new(base_url, api_token, Duration::from_secs(timeout_secs))
    }

    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_token: api_token.into(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        stage: &'static str,
    ) -> anyhow::Result<Value> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_token))?,
        );

        let res = self
            .http
            .post(self.url(path))
            .headers(headers)
            .json(body)
            .send()
            .await
            .context("Hugging Face request failed")?;

        let status = res.status();
        let text = res
            .text()
            .await
            .context("failed to read Hugging Face response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str::<Value>(&text).ok();
            return Err(LlmDiagnosticsError {
                provider: Provider::HuggingFace,
                stage,
                detail: format!("status={status}"),
                raw_output: Some(text),
                raw_response_json,
            }
            .into());
        }

        serde_json::from_str::<Value>(&text)
            .with_context(|| format!("failed to parse Hugging Face response JSON: {text}"))
    }
}

#[derive(Debug, Clone)]
pub struct HuggingFaceClient {
    inference: InferenceHttp,
    model: String,
    temperature: f32,
    max_new_tokens: u32,
}

impl HuggingFaceClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let inference = InferenceHttp::from_settings(settings)?;
        let model = std::env::var("HF_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let temperature = std::env::var("LLM_TEMPERATURE")
            .ok()
            .and_then(|s| s.parse::<f32>().ok())
            .unwrap_or(DEFAULT_TEMPERATURE);
        // The endpoint rejects a zero temperature.
        anyhow::ensure!(
            temperature > 0.0 && temperature <= 2.0,
            "LLM_TEMPERATURE must be in (0, 2] (got {temperature})"
        );

        let max_new_tokens = std::env::var("LLM_MAX_NEW_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_NEW_TOKENS);

        Ok(Self {
            inference,
            model,
            temperature,
            max_new_tokens,
        })
    }

    pub fn new(inference: InferenceHttp, model: impl Into<String>) -> Self {
        Self {
            inference,
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
        }
    }

    fn request<'a>(&self, prompt: &'a str) -> TextGenerationRequest<'a> {
        TextGenerationRequest {
            inputs: prompt,
            parameters: GenerationParameters {
                temperature: self.temperature,
                max_new_tokens: self.max_new_tokens,
                return_full_text: false,
            },
            options: InferenceOptions {
                wait_for_model: true,
            },
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for HuggingFaceClient {
    fn provider(&self) -> Provider {
        Provider::HuggingFace
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let t0 = Instant::now();
        let path = format!("models/{}", self.model);
        let raw = self
            .inference
            .post_json(&path, &self.request(prompt), "generate_http")
            .await?;

        let text = parse_generated_text(&raw)?;
        // Some deployments ignore return_full_text and echo the prompt.
        let text = text
            .strip_prefix(prompt)
            .map(|rest| rest.trim().to_string())
            .unwrap_or(text);

        tracing::info!(
            model = %self.model,
            prompt_chars = prompt.len(),
            output_chars = text.len(),
            elapsed_ms = t0.elapsed().as_millis(),
            "text generated"
        );
        Ok(text)
    }
}

#[derive(Debug, Clone, Serialize)]
struct TextGenerationRequest<'a> {
    inputs: &'a str,
    parameters: GenerationParameters,
    options: InferenceOptions,
}

#[derive(Debug, Clone, Copy, Serialize)]
struct GenerationParameters {
    temperature: f32,
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub(crate) struct InferenceOptions {
    pub(crate) wait_for_model: bool,
}

/// Reads `generated_text` from either `[{"generated_text": ..}]` or a bare object.
fn parse_generated_text(raw: &Value) -> anyhow::Result<String> {
    let first = match raw {
        Value::Array(items) => items.first(),
        other => Some(other),
    };

    if let Some(text) = first
        .and_then(|v| v.get("generated_text"))
        .and_then(Value::as_str)
    {
        return Ok(text.trim().to_string());
    }

    let detail = raw
        .get("error")
        .and_then(Value::as_str)
        .map(|e| format!("provider error: {e}"))
        .unwrap_or_else(|| "response has no generated_text".to_string());

    Err(LlmDiagnosticsError {
        provider: Provider::HuggingFace,
        stage: "generate_parse",
        detail,
        raw_output: None,
        raw_response_json: Some(raw.clone()),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_server(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn request_carries_low_temperature_and_no_prompt_echo() {
        let inference =
            InferenceHttp::new("https://example.test", "hf_x", Duration::from_secs(1)).unwrap();
        let client = HuggingFaceClient::new(inference, DEFAULT_MODEL);
        let v = serde_json::to_value(client.request("hello")).unwrap();
        assert_eq!(v["inputs"], "hello");
        assert_eq!(v["parameters"]["return_full_text"], false);
        assert_eq!(v["parameters"]["max_new_tokens"], 512);
        assert!((v["parameters"]["temperature"].as_f64().unwrap() - 0.1).abs() < 1e-6);
        assert_eq!(v["options"]["wait_for_model"], true);
    }

    #[test]
    fn parses_list_and_object_responses() {
        let list = json!([{"generated_text": "  AAPL trades at 189.84. "}]);
        assert_eq!(parse_generated_text(&list).unwrap(), "AAPL trades at 189.84.");

        let obj = json!({"generated_text": "ok"});
        assert_eq!(parse_generated_text(&obj).unwrap(), "ok");
    }

    #[test]
    fn provider_error_is_reported_with_raw_json() {
        let raw = json!({"error": "Model is currently loading"});
        let err = parse_generated_text(&raw).unwrap_err();
        let diag = err.downcast_ref::<LlmDiagnosticsError>().unwrap();
        assert_eq!(diag.stage, "generate_parse");
        assert!(diag.detail.contains("currently loading"));
        assert_eq!(diag.raw_response_json.as_ref(), Some(&raw));
    }

    #[tokio::test]
    async fn generate_posts_bearer_token_to_model_path() {
        let router = Router::new().route(
            "/models/*model",
            post(|headers: AxumHeaders, Json(body): Json<Value>| async move {
                let auth = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                if auth != "Bearer hf_test" {
                    return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad token"})));
                }
                let prompt = body["inputs"].as_str().unwrap_or_default();
                (
                    StatusCode::OK,
                    Json(json!([{"generated_text": format!("{prompt} The answer.")}])),
                )
            }),
        );
        let base = spawn_server(router).await;

        let inference = InferenceHttp::new(&base, "hf_test", Duration::from_secs(5)).unwrap();
        let client = HuggingFaceClient::new(inference, "org/model");
        let out = client.generate("Question?").await.unwrap();
        assert_eq!(out, "The answer.");

        let inference = InferenceHttp::new(&base, "hf_wrong", Duration::from_secs(5)).unwrap();
        let client = HuggingFaceClient::new(inference, "org/model");
        let err = client.generate("Question?").await.unwrap_err();
        let diag = err.downcast_ref::<LlmDiagnosticsError>().unwrap();
        assert_eq!(diag.stage, "generate_http");
        assert_eq!(diag.raw_response_json, Some(json!({"error": "bad token"})));
    }
}
