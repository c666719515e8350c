//! Ollama HTTP backend for embeddings and chat completions

use super::{CompletionProvider, CompletionRequest, EmbeddingProvider};
use crate::config::OllamaConfig;
use crate::error::MagError;
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub struct OllamaBackend {
    host: String,
    embedding_model: String,
    llm_model: String,
    client: Client,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaBackend {
    pub fn new(config: &OllamaConfig) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MagError::BackendUnavailable(format!("http client build: {}", e)))?;

        Ok(Self {
            host: config.host.trim_end_matches('/').to_string(),
            embedding_model: config.embedding_model.clone(),
            llm_model: config.llm_model.clone(),
            client,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Names of the models the server has pulled
    pub fn list_models(&self) -> crate::Result<Vec<String>> {
        let url = format!("{}/api/tags", self.host);
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| MagError::BackendUnavailable(format!("GET {}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(MagError::BackendUnavailable(format!(
                "GET {}: status {}",
                url,
                resp.status()
            )));
        }

        let tags: TagsResponse = resp
            .json()
            .map_err(|e| MagError::BackendUnavailable(format!("parse tags json: {}", e)))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Whether `model` is pulled; `name` matches `name:latest` too
    pub fn has_model(&self, model: &str) -> crate::Result<bool> {
        let models = self.list_models()?;
        Ok(models
            .iter()
            .any(|m| m == model || m.split(':').next() == Some(model)))
    }
}

impl EmbeddingProvider for OllamaBackend {
    fn id(&self) -> String {
        format!("ollama/{}", self.embedding_model)
    }

    fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f32>>> {
        let url = format!("{}/api/embed", self.host);
        let req = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };

        let resp = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .map_err(|e| send_error(&url, e))?;
        let resp = check_status(&url, resp)?;

        let parsed: EmbedResponse = resp
            .json()
            .map_err(|e| MagError::embedding(format!("parse embed json: {}", e), false))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(MagError::embedding(
                format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    parsed.embeddings.len()
                ),
                false,
            ));
        }
        Ok(parsed.embeddings)
    }

    fn health_check(&self) -> crate::Result<()> {
        self.list_models().map(|_| ())
    }
}

impl CompletionProvider for OllamaBackend {
    fn id(&self) -> String {
        format!("ollama/{}", self.llm_model)
    }

    fn complete(&self, request: &CompletionRequest) -> crate::Result<String> {
        let url = format!("{}/api/chat", self.host);

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.prompt,
        });

        let req = ChatRequest {
            model: &self.llm_model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let resp = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .map_err(|e| MagError::Completion(format!("POST {}: {}", url, e)))?;

        if !resp.status().is_success() {
            let code = resp.status();
            let body = resp
                .text()
                .unwrap_or_else(|_| "<failed to read body>".into());
            return Err(MagError::Completion(format!(
                "ollama chat non-200: {}; body: {}",
                code, body
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .map_err(|e| MagError::Completion(format!("parse chat json: {}", e)))?;
        Ok(parsed.message.content)
    }
}

/// Timeouts and refused connections are worth retrying
fn send_error(url: &str, e: reqwest::Error) -> MagError {
    let transient = e.is_timeout() || e.is_connect();
    MagError::embedding(format!("POST {}: {}", url, e), transient)
}

fn check_status(url: &str, resp: Response) -> crate::Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .unwrap_or_else(|_| "<failed to read body>".into());
    Err(MagError::embedding(
        format!("POST {}: status {}; body: {}", url, status, body),
        is_transient_status(status),
    ))
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}
