use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use std::error::Error as StdError;
use std::process::Stdio;
use tokio::process::Command;
use uuid::Uuid;

use super::{ split_command, Playback, SpeechBackend, SpeechError };
use crate::llm::chat::openai::{ bearer_client, DEFAULT_OPENAI_BASE_URL };

/// Network synthesizer: fetches WAV audio from the OpenAI speech endpoint and
/// hands it to a local player.
pub struct OpenAISpeechClient {
    http: HttpClient,
    model: String,
    voice: String,
    base_url: String,
    player: String,
    player_args: Vec<String>,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

impl OpenAISpeechClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        voice: Option<String>,
        base_url: Option<String>,
        player: &str
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let (player, player_args) = split_command(player)?;
        Ok(Self {
            http: bearer_client(&api_key)?,
            model: model.unwrap_or_else(|| "gpt-4o-mini-tts".to_string()),
            voice: voice.unwrap_or_else(|| "alloy".to_string()),
            base_url: base_url.unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            player,
            player_args,
        })
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, reqwest::Error> {
        let url = format!("{}/v1/audio/speech", self.base_url.trim_end_matches('/'));
        let req = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "wav",
        };
        let bytes = self.http
            .post(&url)
            .json(&req)
            .send().await?
            .error_for_status()?
            .bytes().await?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl SpeechBackend for OpenAISpeechClient {
    async fn start(&self, text: &str) -> Result<Playback, SpeechError> {
        let audio = self.synthesize(text).await.map_err(|e| SpeechError::Provider(e.to_string()))?;
        if audio.is_empty() {
            return Err(SpeechError::Provider("empty audio response".to_string()));
        }

        let path = std::env::temp_dir().join(format!("cloudy-speech-{}.wav", Uuid::new_v4()));
        tokio::fs::write(&path, &audio).await?;

        let child = Command::new(&self.player)
            .args(&self.player_args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match child {
            Ok(child) => Ok(Playback::new(child, Some(path))),
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                Err(SpeechError::Io(e))
            }
        }
    }

    fn name(&self) -> String {
        format!("openai:{}", self.model)
    }
}
