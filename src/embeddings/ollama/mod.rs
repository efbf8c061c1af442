
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::OllamaConfig;
use crate::embeddings::{Completer, Embedder};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const BACKOFF_FACTOR: u32 = 2;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    chat_model: String,
    batch_size: u32,
    agent: ureq::Agent,
    chat_agent: ureq::Agent,
    retry_attempts: u32,
    retry_base_delay: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
    pub details: Option<ModelDetails>,
}

#[derive(Debug, Deserialize)]
pub struct ModelDetails {
    pub format: Option<String>,
    pub family: Option<String>,
    pub parameter_size: Option<String>,
    pub quantization_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        if config.embedding_model.trim().is_empty() || config.chat_model.trim().is_empty() {
            anyhow::bail!("Both an embedding model and a chat model must be configured");
        }

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            batch_size: config.batch_size.max(1),
            agent: build_agent(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            chat_agent: build_agent(Duration::from_secs(config.request_timeout_secs)),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay: Duration::from_millis(1000),
        })
    }

    /// Timeout applied to embedding and listing requests
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// First retry delay; later retries double it
    #[inline]
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    #[inline]
    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    #[inline]
    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    /// Test connection to Ollama server and verify both models are pulled
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Server ping failed")?;
        for model in [&self.embedding_model, &self.chat_model] {
            ensure_model_listed(&models, model).context("Model validation failed")?;
        }

        info!(
            "Health check passed for Ollama server at {} (embedding: {}, chat: {})",
            self.base_url, self.embedding_model, self.chat_model
        );
        Ok(())
    }

    /// Ping the Ollama server to check if it's responsive
    #[inline]
    pub fn ping(&self) -> Result<()> {
        self.list_models().context("Failed to ping Ollama server")?;
        debug!("Server ping successful");
        Ok(())
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response: ModelsResponse = self
            .get_json("/api/tags")
            .context("Failed to fetch models")?;
        debug!("Ollama lists {} models", response.models.len());
        Ok(response.models)
    }

    /// Generate the embedding of a single text
    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Embedding {} bytes of text", text.len());

        let mut embeddings = self.request_embeddings(&[text.to_string()])?;
        embeddings
            .pop()
            .context("Ollama returned no embedding for the input")
    }

    /// Generate embeddings for many texts, `batch_size` per request
    #[inline]
    pub fn generate_embeddings_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size as usize) {
            let embeddings = self
                .request_embeddings(batch)
                .with_context(|| format!("Failed to process batch of {} texts", batch.len()))?;
            results.extend(embeddings);
        }
        debug!("Embedded {} texts", results.len());
        Ok(results)
    }

    /// Ask the chat model to answer `question` from `context`
    #[inline]
    pub fn chat(&self, question: &str, context: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.chat_model,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: render_prompt(question, context),
            }],
            stream: false,
        };
        debug!(
            "Sending chat request to {} ({} context bytes)",
            self.chat_model,
            context.len()
        );

        let response: ChatResponse = self
            .post_json(&self.chat_agent, "/api/chat", &request)
            .context("Failed to get chat completion")?;
        Ok(response.message.content.trim().to_string())
    }

    fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response: EmbedResponse = self
            .post_json(&self.agent, "/api/embed", &request)
            .context("Failed to generate embeddings")?;

        if response.embeddings.len() != texts.len() {
            anyhow::bail!(
                "Ollama returned {} embeddings for {} inputs",
                response.embeddings.len(),
                texts.len()
            );
        }
        Ok(response.embeddings)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {path}"))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.endpoint(path)?;
        let body = self.with_retry(&url, || {
            self.agent
                .get(url.as_str())
                .call()
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;
        serde_json::from_str(&body).with_context(|| format!("Unexpected response from {path}"))
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        agent: &ureq::Agent,
        path: &str,
        request: &B,
    ) -> Result<T> {
        let url = self.endpoint(path)?;
        let payload = serde_json::to_string(request)
            .with_context(|| format!("Failed to serialize request for {path}"))?;
        let body = self.with_retry(&url, || {
            agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(&payload)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })?;
        serde_json::from_str(&body).with_context(|| format!("Unexpected response from {path}"))
    }

    /// Transport failures and 5xx responses are retried with exponential
    /// backoff; anything else fails immediately
    fn with_retry<F>(&self, url: &Url, mut send: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut delay = self.retry_base_delay;
        let mut attempt = 1;
        loop {
            let error = match send() {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            if !is_transient(&error) {
                warn!("Request to {} failed permanently: {}", url, error);
                return Err(anyhow::anyhow!("Request to {url} failed: {error}"));
            }
            if attempt >= self.retry_attempts {
                error!(
                    "Request to {} failed after {} attempts: {}",
                    url, attempt, error
                );
                return Err(anyhow::anyhow!(
                    "Request to {url} failed after {attempt} attempts: {error}"
                ));
            }

            warn!(
                "Request to {} failed ({}), retry {}/{} in {:?}",
                url,
                error,
                attempt,
                self.retry_attempts - 1,
                delay
            );
            std::thread::sleep(delay);
            delay *= BACKOFF_FACTOR;
            attempt += 1;
        }
    }
}

fn is_transient(error: &ureq::Error) -> bool {
    match error {
        ureq::Error::StatusCode(status) => *status >= 500,
        ureq::Error::ConnectionFailed
        | ureq::Error::HostNotFound
        | ureq::Error::Timeout(_)
        | ureq::Error::Io(_) => true,
        _ => false,
    }
}

impl Embedder for OllamaClient {
    #[inline]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.generate_embedding(text)
    }

    #[inline]
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.generate_embeddings_batch(texts)
    }

    #[inline]
    fn is_ready(&self) -> bool {
        !self.embedding_model.is_empty()
    }
}

impl Completer for OllamaClient {
    #[inline]
    fn complete(&self, prompt: &str, context: &str) -> Result<String> {
        self.chat(prompt, context)
    }

    #[inline]
    fn is_ready(&self) -> bool {
        !self.chat_model.is_empty()
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

fn ensure_model_listed(models: &[ModelInfo], model: &str) -> Result<()> {
    if models.iter().any(|m| m.name == model) {
        debug!("Model {} is available", model);
        return Ok(());
    }

    let available_models: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
    warn!(
        "Model {} not found. Available models: {:?}",
        model, available_models
    );
    Err(anyhow::anyhow!(
        "Model '{}' is not available. Available models: {:?}",
        model,
        available_models
    ))
}

/// Question-answering prompt sent to the chat model
pub(crate) fn render_prompt(question: &str, context: &str) -> String {
    format!(
        "Context information from multiple sources is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the information from multiple sources and not prior knowledge, \
         answer the query.\n\
         Query: {question}\n\
         Answer: "
    )
}
