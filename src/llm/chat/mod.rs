pub mod ollama;
pub mod openai;
pub mod gemini;

use async_trait::async_trait;
use serde::Deserialize;
use std::error::Error as StdError;
use std::sync::Arc;
use log::info;
use super::{ LlmConfig, LlmType };
use self::ollama::OllamaClient;
use self::openai::OpenAIChatClient;
use self::gemini::GeminiChatClient;
use crate::cli::Args;

/// Upper bound on generated tokens for every text provider.
pub const MAX_COMPLETION_TOKENS: u32 = 2048;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub response: String,
}

/// A text provider: answers `prompt` under the persona given by `system`.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>>;

    fn get_llm_type(&self) -> LlmType;
    fn get_model(&self) -> String;
    fn get_base_url(&self) -> Option<String>;

    fn name(&self) -> String {
        format!("{}:{}", self.get_llm_type(), self.get_model())
    }
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Ollama => {
            let specific_client = OllamaClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::Gemini => {
            let specific_client = GeminiChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

/// Builds the ordered text-provider chain named by `--chat-providers`.
pub fn new_chain(args: &Args) -> Result<Vec<Arc<dyn ChatClient>>, Box<dyn StdError + Send + Sync>> {
    let types = super::parse_provider_chain(&args.chat_providers)?;
    if types.is_empty() {
        return Err("At least one chat provider must be configured".into());
    }
    let mut chain = Vec::with_capacity(types.len());
    for llm_type in types {
        let config = LlmConfig::from_args(llm_type, args);
        let client = new_client(&config)?;
        info!(
            "Chat provider #{} configured: {} (base_url={:?})",
            chain.len() + 1,
            client.name(),
            client.get_base_url().as_deref().unwrap_or("adapter default")
        );
        chain.push(client);
    }
    Ok(chain)
}

/// Replaces an empty provider answer with the provider's placeholder text.
pub(crate) fn non_empty_or(text: Option<String>, placeholder: &str) -> String {
    match text {
        Some(t) if !t.trim().is_empty() => t,
        _ => placeholder.to_string(),
    }
}
