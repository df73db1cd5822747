pub mod chat;
pub mod image;
pub mod speech;
use serde::{ Deserialize, Serialize };
use std::str::FromStr;
use std::fmt;

use crate::cli::Args;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    Ollama,
    OpenAI,
    Gemini,
}

impl fmt::Display for LlmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmType::Ollama => write!(f, "ollama"),
            LlmType::OpenAI => write!(f, "openai"),
            LlmType::Gemini => write!(f, "gemini"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseLlmTypeError {
    message: String,
}

impl fmt::Display for ParseLlmTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseLlmTypeError {}
impl FromStr for LlmType {
    type Err = ParseLlmTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" => Ok(LlmType::Ollama),
            "openai" => Ok(LlmType::OpenAI),
            "gemini" => Ok(LlmType::Gemini),
            _ =>
                Err(ParseLlmTypeError {
                    message: format!("Invalid LLM type: '{}'", s),
                }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    pub api_key: Option<String>,
    pub completion_model: Option<String>,
    pub image_model: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            llm_type: LlmType::Ollama,
            api_key: None,
            completion_model: None,
            image_model: None,
            base_url: None,
        }
    }
}

impl LlmConfig {
    /// Builds the provider settings for `llm_type` out of the per-provider CLI arguments.
    pub fn from_args(llm_type: LlmType, args: &Args) -> Self {
        let non_empty = |s: &str| Some(s.to_string()).filter(|k| !k.is_empty());
        match llm_type {
            LlmType::OpenAI =>
                Self {
                    llm_type,
                    api_key: non_empty(&args.openai_api_key),
                    completion_model: args.openai_model.clone(),
                    image_model: args.openai_image_model.clone(),
                    base_url: args.openai_base_url.clone(),
                },
            LlmType::Gemini =>
                Self {
                    llm_type,
                    api_key: non_empty(&args.gemini_api_key),
                    completion_model: args.gemini_model.clone(),
                    image_model: args.gemini_image_model.clone(),
                    base_url: args.gemini_base_url.clone(),
                },
            LlmType::Ollama =>
                Self {
                    llm_type,
                    api_key: None,
                    completion_model: args.ollama_model.clone(),
                    image_model: None,
                    base_url: args.ollama_base_url.clone(),
                },
        }
    }
}

pub fn parse_llm_type(type_str: &str) -> Result<LlmType, String> {
    type_str.parse::<LlmType>().map_err(|_| format!("Unsupported LLM type: {}", type_str))
}

/// Parses an ordered provider list, skipping blank entries.
pub fn parse_provider_chain(names: &[String]) -> Result<Vec<LlmType>, String> {
    names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| parse_llm_type(n))
        .collect()
}
