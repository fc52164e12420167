use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
}

/// Text generation transport. Timeouts and retries are the implementor's concern.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, model: &str, prompt: &str) -> Result<Generation>;

    /// Generation conditioned on base64-encoded `images` and a `system` message.
    /// Text-only transports reject the request.
    fn generate_with_images(
        &self,
        model: &str,
        _prompt: &str,
        _system: &str,
        images: &[String],
    ) -> Result<Generation> {
        anyhow::bail!(
            "model {model} transport does not accept images ({} given)",
            images.len()
        )
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    images: &'a [String],
    stream: bool,
}

impl<'a> GenerateRequest<'a> {
    const fn text(model: &'a str, prompt: &'a str) -> Self {
        Self {
            model,
            prompt,
            system: None,
            images: &[],
            stream: false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

impl From<GenerateResponse> for Generation {
    fn from(raw: GenerateResponse) -> Self {
        Self {
            text: raw.response,
            usage: TokenUsage {
                prompt_tokens: raw.prompt_eval_count,
                completion_tokens: raw.eval_count,
            },
        }
    }
}

/// Client for a local Ollama server's non-streaming `/api/generate` endpoint.
pub struct OllamaClient {
    endpoint: String,
    http: reqwest::blocking::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("failed building HTTP client")?;
        Ok(Self {
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn post(&self, request: &GenerateRequest<'_>) -> Result<Generation> {
        let started = std::time::Instant::now();
        let model = request.model;
        let response = self
            .http
            .post(&self.endpoint)
            .json(request)
            .send()
            .with_context(|| format!("request to {} failed", self.endpoint))?
            .error_for_status()
            .with_context(|| format!("model {model} returned an error status"))?;
        let raw = response
            .json::<GenerateResponse>()
            .context("failed decoding generate response")?;
        let generation = Generation::from(raw);
        tracing::debug!(
            model,
            images = request.images.len(),
            prompt_tokens = generation.usage.prompt_tokens,
            completion_tokens = generation.usage.completion_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation_complete"
        );
        Ok(generation)
    }
}

impl TextGenerator for OllamaClient {
    fn generate(&self, model: &str, prompt: &str) -> Result<Generation> {
        self.post(&GenerateRequest::text(model, prompt))
    }

    fn generate_with_images(
        &self,
        model: &str,
        prompt: &str,
        system: &str,
        images: &[String],
    ) -> Result<Generation> {
        self.post(&GenerateRequest {
            system: Some(system),
            images,
            ..GenerateRequest::text(model, prompt)
        })
    }
}
