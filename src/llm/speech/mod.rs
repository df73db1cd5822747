//! Speech synthesis for chat messages.
//!
//! Audio plays on the host running the server. One [`Speaker`] is shared by
//! every connection, so at most one utterance plays on the device at a time.
//! Backends are tried in order; the on-device synthesizer is the usual first
//! choice and the network synthesizer an optional extra.

pub mod local;
pub mod openai;

use async_trait::async_trait;
use lazy_static::lazy_static;
use log::{ debug, info, warn };
use regex::Regex;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Child;
use tokio::sync::{ oneshot, Mutex };
use tokio::task::JoinHandle;

use self::local::LocalSynthesizer;
use self::openai::OpenAISpeechClient;
use crate::cli::Args;
use crate::models::chat::{ Message, Role };

#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("speech backend unavailable: {0}")]
    Unavailable(String),
    #[error("speech io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("speech provider failed: {0}")]
    Provider(String),
    #[error("all speech backends failed")]
    SpeechFailed,
}

/// A running utterance, watched by a background task that removes the
/// temporary audio file once the player exits. Dropping it stops playback.
pub struct Playback {
    stop: oneshot::Sender<()>,
    watcher: JoinHandle<()>,
}

impl Playback {
    /// Must be called from within a tokio runtime.
    pub fn new(mut child: Child, audio_file: Option<PathBuf>) -> Self {
        let (stop, stop_rx) = oneshot::channel::<()>();
        let watcher = tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => {
                    debug!("Utterance finished: {:?}", status);
                }
                _ = stop_rx => {
                    if let Err(e) = child.kill().await {
                        debug!("Utterance already finished: {}", e);
                    }
                }
            }
            if let Some(path) = audio_file {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!("Could not remove {}: {}", path.display(), e);
                }
            }
        });
        Self { stop, watcher }
    }

    fn is_running(&self) -> bool {
        !self.watcher.is_finished()
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.watcher.await {
            debug!("Playback watcher ended abnormally: {}", e);
        }
    }
}

#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Starts speaking `text` and returns without waiting for playback to finish.
    async fn start(&self, text: &str) -> Result<Playback, SpeechError>;

    fn name(&self) -> String;
}

lazy_static! {
    static ref IMAGE: Regex = Regex::new(r"!\[([^\]]*)\]\([^)]*\)").unwrap();
    static ref LINK: Regex = Regex::new(r"\[([^\]]*)\]\([^)]*\)").unwrap();
    static ref HTML_TAG: Regex = Regex::new(r"</?[^>]+(>|$)").unwrap();
    static ref HEADING: Regex = Regex::new(r"(?m)^[ \t]*#+[ \t]?").unwrap();
    static ref LIST_MARKER: Regex = Regex::new(r"(?m)^[ \t]*(?:\d+\.|[-+*])[ \t]+").unwrap();
    static ref MARKUP: Regex = Regex::new(r"[*_`>#]").unwrap();
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Plain text a synthesizer should read for `message`, with a role prefix
/// and Markdown/HTML stripped.
pub fn speech_text(message: &Message) -> String {
    let prefix = match message.role {
        Role::Assistant => "Cloudy replied: ",
        Role::User => "You said: ",
        Role::Error => "",
    };

    let text = IMAGE.replace_all(&message.content, "");
    let text = LINK.replace_all(&text, "$1");
    let text = HTML_TAG.replace_all(&text, "");
    let text = HEADING.replace_all(&text, "");
    let text = LIST_MARKER.replace_all(&text, "");
    let text = MARKUP.replace_all(&text, "");
    let text = WHITESPACE.replace_all(&text, " ");
    let text = text.replace('₱', "PHP ");
    let text = text.trim();

    if text.is_empty() {
        String::new()
    } else {
        format!("{}{}", prefix, text)
    }
}

struct Utterance {
    owner: String,
    playback: Playback,
}

pub struct Speaker {
    backends: Vec<Arc<dyn SpeechBackend>>,
    current: Mutex<Option<Utterance>>,
}

impl Speaker {
    pub fn new(backends: Vec<Arc<dyn SpeechBackend>>) -> Self {
        Self {
            backends,
            current: Mutex::new(None),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Vec::new())
    }

    pub fn is_enabled(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Speaks `message` on behalf of `owner`, cutting off whatever was
    /// playing. Failures are logged and otherwise ignored.
    pub async fn speak(&self, owner: &str, message: &Message) {
        if let Err(e) = self.try_speak(owner, message).await {
            warn!("Speech for message {} dropped: {}", message.id, e);
        }
    }

    pub async fn try_speak(&self, owner: &str, message: &Message) -> Result<(), SpeechError> {
        if !self.is_enabled() {
            return Err(SpeechError::Unavailable("no speech backends configured".to_string()));
        }
        let text = speech_text(message);
        let mut current = self.current.lock().await;
        if let Some(previous) = current.take() {
            previous.playback.stop().await;
        }
        if text.is_empty() {
            return Ok(());
        }

        for backend in &self.backends {
            match backend.start(&text).await {
                Ok(playback) => {
                    debug!("Speaking message {} for {} via {}", message.id, owner, backend.name());
                    *current = Some(Utterance { owner: owner.to_string(), playback });
                    return Ok(());
                }
                Err(e) => warn!("Speech backend {} failed: {}", backend.name(), e),
            }
        }
        Err(SpeechError::SpeechFailed)
    }

    /// Stops the current utterance, whoever started it.
    pub async fn cancel(&self) {
        if let Some(utterance) = self.current.lock().await.take() {
            utterance.playback.stop().await;
        }
    }

    /// Stops the current utterance only if `owner` started it.
    pub async fn cancel_for(&self, owner: &str) {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|u| u.owner == owner) {
            if let Some(utterance) = current.take() {
                utterance.playback.stop().await;
            }
        }
    }

    pub async fn is_speaking(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(utterance) => utterance.playback.is_running(),
            None => false,
        }
    }
}

pub fn new_backend(
    name: &str,
    args: &Args
) -> Result<Arc<dyn SpeechBackend>, Box<dyn StdError + Send + Sync>> {
    match name.trim().to_lowercase().as_str() {
        "local" => Ok(Arc::new(LocalSynthesizer::from_command_line(&args.speech_command)?)),
        "openai" => {
            let api_key = args.speech_api_key();
            if api_key.is_empty() {
                return Err("SPEECH_API_KEY or OPENAI_API_KEY is required for openai speech".into());
            }
            Ok(
                Arc::new(
                    OpenAISpeechClient::new(
                        api_key.to_string(),
                        args.speech_model.clone(),
                        args.speech_voice.clone(),
                        args.speech_base_url(),
                        &args.speech_player
                    )?
                )
            )
        }
        other => Err(format!("Unsupported speech backend: {}", other).into()),
    }
}

pub fn new_speaker_backends(
    args: &Args
) -> Result<Vec<Arc<dyn SpeechBackend>>, Box<dyn StdError + Send + Sync>> {
    let mut backends = Vec::new();
    for name in args.speech_backends.iter().filter(|n| !n.trim().is_empty()) {
        let backend = new_backend(name, args)?;
        info!("Speech backend #{} configured: {}", backends.len() + 1, backend.name());
        backends.push(backend);
    }
    if backends.is_empty() {
        info!("Speech disabled.");
    }
    Ok(backends)
}

/// Splits a configured command line into program and leading arguments.
pub(crate) fn split_command(command_line: &str) -> Result<(String, Vec<String>), SpeechError> {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let program = parts
        .next()
        .ok_or_else(|| SpeechError::Unavailable("empty speech command".to_string()))?;
    Ok((program, parts.collect()))
}
