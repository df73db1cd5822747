use async_trait::async_trait;
use log::{ debug, info, warn };
use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

use crate::config::prompt::{ get_image_prompt, get_relevance_prompt, PromptConfig, PromptHandle };
use crate::llm::chat::ChatClient;
use crate::llm::image::ImageClient;
use crate::models::chat::ImagePayload;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("all {attempts} text providers failed")]
    ProviderUnavailable {
        attempts: usize,
    },
    #[error("all image providers failed")]
    ImageUnavailable,
    #[error("relevance check failed: {0}")]
    ClassificationFailed(String),
    #[error("{provider} timed out after {after:?}")]
    Timeout {
        provider: String,
        after: Duration,
    },
    #[error("{provider} failed: {message}")]
    Provider {
        provider: String,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub description: String,
    pub image: Option<ImagePayload>,
}

/// Source of assistant replies for the conversation controller.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn reply(&self, user_text: &str) -> Result<Reply, GatewayError>;

    /// Opening line for a conversation with no usable history.
    async fn greeting(&self) -> Result<String, GatewayError>;
}

pub struct AiGateway {
    chat_clients: Vec<Arc<dyn ChatClient>>,
    image_clients: Vec<Arc<dyn ImageClient>>,
    prompts: PromptHandle,
    call_timeout: Duration,
}

impl AiGateway {
    pub fn new(
        chat_clients: Vec<Arc<dyn ChatClient>>,
        image_clients: Vec<Arc<dyn ImageClient>>,
        prompts: PromptHandle,
        call_timeout: Duration
    ) -> Self {
        Self {
            chat_clients,
            image_clients,
            prompts,
            call_timeout,
        }
    }

    async fn call<T, F>(&self, provider: String, request: F) -> Result<T, GatewayError>
        where F: Future<Output = Result<T, Box<dyn StdError + Send + Sync>>> + Send
    {
        match timeout(self.call_timeout, request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) =>
                Err(GatewayError::Provider {
                    provider,
                    message: e.to_string(),
                }),
            Err(_) =>
                Err(GatewayError::Timeout {
                    provider,
                    after: self.call_timeout,
                }),
        }
    }

    /// Tries the text providers in order. Returns the index of the provider
    /// that answered together with its text.
    async fn complete_with_fallback(
        &self,
        system: &str,
        prompt: &str
    ) -> Result<(usize, String), GatewayError> {
        for (idx, client) in self.chat_clients.iter().enumerate() {
            match self.call(client.name(), client.complete(system, prompt)).await {
                Ok(resp) => {
                    debug!("Text provider {} answered", client.name());
                    return Ok((idx, resp.response));
                }
                Err(e) => warn!("Text provider failed, trying next: {}", e),
            }
        }
        Err(GatewayError::ProviderUnavailable {
            attempts: self.chat_clients.len(),
        })
    }

    async fn is_image_relevant(
        &self,
        client: &Arc<dyn ChatClient>,
        prompts: &PromptConfig,
        question: &str,
        answer: &str
    ) -> Result<bool, GatewayError> {
        let prompt = get_relevance_prompt(prompts, question, answer);
        let verdict = self
            .call(client.name(), client.complete(&prompts.persona, &prompt)).await
            .map_err(|e| GatewayError::ClassificationFailed(e.to_string()))?;
        Ok(verdict.response.trim_start().starts_with('1'))
    }

    async fn generate_image(&self, prompt: &str) -> Result<ImagePayload, GatewayError> {
        for client in &self.image_clients {
            match self.call(client.name(), client.generate(prompt)).await {
                Ok(image) => {
                    info!("Image generated by {}", client.name());
                    return Ok(image);
                }
                Err(e) => warn!("Image provider failed, trying next: {}", e),
            }
        }
        Err(GatewayError::ImageUnavailable)
    }
}

#[async_trait]
impl Gateway for AiGateway {
    async fn reply(&self, user_text: &str) -> Result<Reply, GatewayError> {
        let prompts = self.prompts.current().await;
        let (idx, description) = self.complete_with_fallback(&prompts.persona, user_text).await?;

        if self.image_clients.is_empty() {
            return Ok(Reply { description, image: None });
        }

        let client = &self.chat_clients[idx];
        let relevant = match self.is_image_relevant(client, &prompts, user_text, &description).await {
            Ok(relevant) => relevant,
            Err(e) => {
                warn!("{}; replying without image", e);
                false
            }
        };
        if !relevant {
            return Ok(Reply { description, image: None });
        }

        let image_prompt = get_image_prompt(&prompts, user_text, &description);
        let image = match self.generate_image(&image_prompt).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!("{}; replying without image", e);
                None
            }
        };
        Ok(Reply { description, image })
    }

    async fn greeting(&self) -> Result<String, GatewayError> {
        let prompts = self.prompts.current().await;
        let (_, text) = self.complete_with_fallback(&prompts.persona, &prompts.greeting_prompt).await?;
        Ok(text)
    }
}
