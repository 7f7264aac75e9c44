use base64::{engine::general_purpose, Engine};
use serde::{Deserialize, Serialize};
use std::fs;

use crate::config::PipelineConfig;
use crate::error::InferenceError;

const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ContentPart {
    Text {
        #[serde(rename = "type")]
        content_type: String,
        text: String,
    },
    ImageUrl {
        #[serde(rename = "type")]
        content_type: String,
        image_url: ImageData,
    },
}

#[derive(Debug, Serialize)]
struct ImageData {
    url: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

/// One completion request as the orchestrator sees it: a prompt, an
/// optional system message and an optional image data URL.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub image_data_url: Option<String>,
}

impl CompletionRequest {
    pub fn text(system: &str, prompt: &str) -> Self {
        Self {
            system: Some(system.to_string()),
            prompt: prompt.to_string(),
            image_data_url: None,
        }
    }

    pub fn with_image(system: &str, prompt: &str, image_data_url: String) -> Self {
        Self {
            system: Some(system.to_string()),
            prompt: prompt.to_string(),
            image_data_url: Some(image_data_url),
        }
    }
}

/// The only component allowed to talk to the hosted LLM.
#[async_trait::async_trait]
pub trait ModelGateway: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, InferenceError>;
}

pub struct OpenRouterClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
    config: PipelineConfig,
}

impl OpenRouterClient {
    pub fn new(api_key: String, model: String, config: PipelineConfig) -> Self {
        Self {
            api_key,
            model,
            client: reqwest::Client::new(),
            config,
        }
    }

    fn build_request(&self, request: &CompletionRequest) -> ChatRequest {
        let mut messages = Vec::new();

        if let Some(system) = &request.system {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: vec![ContentPart::Text {
                    content_type: "text".to_string(),
                    text: system.clone(),
                }],
            });
        }

        let mut content = vec![ContentPart::Text {
            content_type: "text".to_string(),
            text: request.prompt.clone(),
        }];

        if let Some(data_url) = &request.image_data_url {
            content.push(ContentPart::ImageUrl {
                content_type: "image_url".to_string(),
                image_url: ImageData {
                    url: data_url.clone(),
                },
            });
        }

        messages.push(ChatMessage {
            role: "user".to_string(),
            content,
        });

        ChatRequest {
            model: self.model.clone(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        }
    }

    /// One attempt against the completion endpoint, bounded by the gateway
    /// timeout. Classifies the outcome into the pipeline error taxonomy.
    async fn send_once(&self, chat: &ChatRequest) -> Result<String, InferenceError> {
        let send = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/meal-nutrition-inference")
            .header("X-Title", "Meal Nutrition Inference")
            .json(chat)
            .send();

        let response = tokio::time::timeout(self.config.gateway_timeout, send)
            .await
            .map_err(|_| {
                InferenceError::Transport(format!(
                    "completion call exceeded {}s",
                    self.config.gateway_timeout.as_secs()
                ))
            })??;

        let status = response.status();
        log::debug!("📥 OpenRouter response status: {}", status);

        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::RateLimited(body));
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Transport(format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            // Malformed media, bad request, permanent rejection: not retryable
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::ValidationFailure(format!(
                "OpenRouter rejected the request ({}): {}",
                status, body
            )));
        }

        let body = response.text().await?;
        let chat_response: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            InferenceError::MalformedResponse(format!("completion envelope: {}", e))
        })?;

        let choice = chat_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| InferenceError::MalformedResponse("no choices returned".to_string()))?;

        Ok(choice.message.content)
    }
}

#[async_trait::async_trait]
impl ModelGateway for OpenRouterClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, InferenceError> {
        let chat = self.build_request(request);
        log::info!(
            "🤖 Sending request to OpenRouter with model: {} (image: {})",
            self.model,
            request.image_data_url.is_some()
        );

        let mut delay = self.config.retry_base_delay;
        let mut attempt: u32 = 0;

        loop {
            match self.send_once(&chat).await {
                Ok(content) => {
                    log::debug!("📄 OpenRouter reply size: {} bytes", content.len());
                    return Ok(content);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "⚠️ OpenRouter call failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.config.max_retries,
                        delay,
                        e
                    );
                    // Bekleme bu isteğin task'ına bağlı; diğer istekleri bloklamaz
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.config.retry_max_delay);
                }
                Err(e) => {
                    log::error!("❌ OpenRouter call failed permanently: {}", e);
                    return Err(e);
                }
            }
        }
    }
}

/// Encode stored image bytes as the data URL the completion API expects.
pub fn encode_image_data_url(image_path: &str) -> Result<String, InferenceError> {
    let image_data = fs::read(image_path).map_err(|e| {
        InferenceError::ValidationFailure(format!("cannot read image {}: {}", image_path, e))
    })?;
    let base64_image = general_purpose::STANDARD.encode(&image_data);

    log::debug!("📊 Image file size: {} bytes", image_data.len());

    Ok(format!(
        "data:{};base64,{}",
        mime_type_for(image_path),
        base64_image
    ))
}

fn mime_type_for(image_path: &str) -> &'static str {
    if image_path.ends_with(".png") {
        "image/png"
    } else if image_path.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg" // varsayılan
    }
}
