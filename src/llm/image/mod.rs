pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use log::info;
use std::error::Error as StdError;
use std::sync::Arc;

use super::{ LlmConfig, LlmType };
use self::gemini::GeminiImageClient;
use self::openai::OpenAIImageClient;
use crate::cli::Args;
use crate::models::chat::ImagePayload;

/// An image provider: turns a plain-text prompt into an image.
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<ImagePayload, Box<dyn StdError + Send + Sync>>;

    fn name(&self) -> String;
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ImageClient>, Box<dyn StdError + Send + Sync>> {
    let client: Arc<dyn ImageClient> = match config.llm_type {
        LlmType::OpenAI => Arc::new(OpenAIImageClient::from_config(config)?),
        LlmType::Gemini => Arc::new(GeminiImageClient::from_config(config)?),
        LlmType::Ollama => {
            return Err("Ollama does not provide image generation".into());
        }
    };
    Ok(client)
}

/// Builds the ordered image-provider chain named by `--image-providers`.
/// An empty chain disables images.
pub fn new_chain(args: &Args) -> Result<Vec<Arc<dyn ImageClient>>, Box<dyn StdError + Send + Sync>> {
    let types = super::parse_provider_chain(&args.image_providers)?;
    let mut chain = Vec::with_capacity(types.len());
    for llm_type in types {
        let client = new_client(&LlmConfig::from_args(llm_type, args))?;
        info!("Image provider #{} configured: {}", chain.len() + 1, client.name());
        chain.push(client);
    }
    if chain.is_empty() {
        info!("No image providers configured; replies will be text only.");
    }
    Ok(chain)
}
