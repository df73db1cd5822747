use async_trait::async_trait;
use std::error::Error as StdError;
use log::debug;

use super::{ChatClient, CompletionResponse, MAX_COMPLETION_TOKENS, non_empty_or};
use crate::llm::{LlmConfig, LlmType};
use rllm::chat::{ChatMessage, ChatRole, MessageType};
use rllm::builder::{LLMBackend, LLMBuilder};
use rllm::LLMProvider;

const NO_RESPONSE: &str = "No response provided by Gemini.";

pub struct GeminiChatClient {
    llm: Box<dyn LLMProvider + Send + Sync>,
    model: String,
    base_url: Option<String>,
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let chat_model = model.unwrap_or_else(|| "gemini-2.0-flash".to_string());

        let mut builder = LLMBuilder::new()
            .backend(LLMBackend::Google)
            .api_key(api_key)
            .model(&chat_model)
            .max_tokens(MAX_COMPLETION_TOKENS)
            .stream(false);

        if let Some(url) = &base_url {
            builder = builder.base_url(url);
        }

        let llm_provider = builder.build()?;

        Ok(Self {
            llm: llm_provider,
            model: chat_model,
            base_url
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "Google API key is required for GeminiChatClient".to_string())?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }
}

/// Gemini gets the persona inline, ahead of the user's text.
fn persona_prompt(system: &str, prompt: &str) -> String {
    if system.trim().is_empty() {
        prompt.to_string()
    } else {
        format!("{}\n\n{}", system.trim_end(), prompt)
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(
        &self,
        system: &str,
        prompt: &str
    ) -> Result<CompletionResponse, Box<dyn StdError + Send + Sync>> {
        let messages = vec![ChatMessage {
            role: ChatRole::User,
            content: persona_prompt(system, prompt),
            message_type: MessageType::Text,
        }];
        debug!(
            "GeminiChatClient::complete() → model={} base_url={:?}",
            self.model,
            self.base_url
        );
        let resp = self.llm.chat(&messages).await?;
        Ok(CompletionResponse { response: non_empty_or(resp.text().map(|s| s.to_string()), NO_RESPONSE) })
    }

    fn get_llm_type(&self) -> LlmType {
        LlmType::Gemini
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }

    fn get_base_url(&self) -> Option<String> {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::persona_prompt;

    #[test]
    fn persona_is_prepended_with_blank_line() {
        assert_eq!(persona_prompt("You are Cloudy.\n", "Hi"), "You are Cloudy.\n\nHi");
        assert_eq!(persona_prompt("", "Hi"), "Hi");
    }
}
