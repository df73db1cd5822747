use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;

use super::ImageClient;
use crate::llm::chat::openai::{ bearer_client, DEFAULT_OPENAI_BASE_URL };
use crate::llm::LlmConfig;
use crate::models::chat::ImagePayload;

pub struct OpenAIImageClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: Option<String>,
    b64_json: Option<String>,
}

impl OpenAIImageClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        Ok(Self {
            http: bearer_client(&api_key)?,
            model: model.unwrap_or_else(|| "dall-e-3".to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_key = config.api_key
            .clone()
            .ok_or_else(|| "OpenAI API key is required for image generation".to_string())?;
        Self::new(api_key, config.image_model.clone(), config.base_url.clone())
    }
}

#[async_trait]
impl ImageClient for OpenAIImageClient {
    async fn generate(&self, prompt: &str) -> Result<ImagePayload, Box<dyn StdError + Send + Sync>> {
        let url = format!("{}/v1/images/generations", self.base_url.trim_end_matches('/'));
        let req = ImageRequest {
            model: &self.model,
            prompt,
            n: 1,
            size: "1024x1024",
        };

        let resp = self.http
            .post(&url)
            .json(&req)
            .send().await?
            .error_for_status()?
            .json::<ImageResponse>().await?;

        let datum = resp.data
            .into_iter()
            .next()
            .ok_or_else(|| "OpenAI returned no image".to_string())?;

        match (datum.url, datum.b64_json) {
            (Some(url), _) if !url.is_empty() => Ok(ImagePayload::url(url)),
            (_, Some(b64)) if !b64.is_empty() => Ok(ImagePayload::checked_base64(b64)?),
            _ => Err("OpenAI image response carried neither url nor b64_json".into()),
        }
    }

    fn name(&self) -> String {
        format!("openai:{}", self.model)
    }
}
