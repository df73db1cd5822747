use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;

use super::ImageClient;
use crate::llm::LlmConfig;
use crate::models::chat::ImagePayload;

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiImageClient {
    http: HttpClient,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<RequestContent>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidatePart {
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    #[allow(dead_code)]
    mime_type: Option<String>,
    data: String,
}

impl GeminiImageClient {
    pub fn new(api_key: String, model: Option<String>, base_url: Option<String>) -> Self {
        Self {
            http: HttpClient::new(),
            api_key,
            model: model.unwrap_or_else(|| "gemini-2.0-flash-preview-image-generation".to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "Google API key is required for GeminiImageClient".to_string())?;
        Ok(Self::new(api_key, config.image_model.clone(), config.base_url.clone()))
    }
}

fn first_inline_image(resp: GenerateContentResponse) -> Option<String> {
    resp.candidates
        .into_iter()
        .filter_map(|c| c.content)
        .flat_map(|c| c.parts)
        .find_map(|p| p.inline_data.map(|d| d.data))
}

#[async_trait]
impl ImageClient for GeminiImageClient {
    async fn generate(&self, prompt: &str) -> Result<ImagePayload, Box<dyn StdError + Send + Sync>> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        );
        let req = GenerateContentRequest {
            contents: vec![RequestContent {
                parts: vec![RequestPart { text: prompt.to_string() }],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            },
        };

        let resp = self.http
            .post(&url)
            .query(&[("key", self.api_key.as_str())])
            .json(&req)
            .send().await?
            .error_for_status()?
            .json::<GenerateContentResponse>().await?;

        let data = first_inline_image(resp).ok_or_else(||
            "Gemini response contained no inline image".to_string()
        )?;
        Ok(ImagePayload::checked_base64(data)?)
    }

    fn name(&self) -> String {
        format!("gemini:{}", self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_first_inline_image_part() {
        let resp: GenerateContentResponse = serde_json::from_value(
            serde_json::json!({
                "candidates": [{
                    "content": {
                        "parts": [
                            { "text": "Here is a diagram" },
                            { "inlineData": { "mimeType": "image/png", "data": "iVBORw0KGgo=" } }
                        ]
                    }
                }]
            })
        ).unwrap();
        assert_eq!(first_inline_image(resp), Some("iVBORw0KGgo=".to_string()));
    }

    #[test]
    fn text_only_response_has_no_image() {
        let resp: GenerateContentResponse = serde_json::from_value(
            serde_json::json!({ "candidates": [{ "content": { "parts": [{ "text": "no" }] } }] })
        ).unwrap();
        assert_eq!(first_inline_image(resp), None);
    }
}
