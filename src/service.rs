use log::info;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Args;
use crate::config::prompt::{ load_prompts_or_default, PromptHandle };
use crate::controller::ConversationController;
use crate::gateway::{ AiGateway, Gateway };
use crate::history::{ initialize_history_store, ConversationStore };
use crate::llm::chat::new_chain as new_chat_chain;
use crate::llm::image::new_chain as new_image_chain;
use crate::llm::speech::{ new_speaker_backends, SpeechBackend, Speaker };

/// Everything a connection needs to run its own conversation: the shared
/// gateway, store and prompts, plus the one speaker every session shares.
pub struct ChatService {
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn ConversationStore>,
    prompts: PromptHandle,
    prompts_path: String,
    speaker: Arc<Speaker>,
    auto_speak: bool,
}

impl ChatService {
    pub fn new(
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn ConversationStore>,
        prompts: PromptHandle,
        prompts_path: String,
        speech_backends: Vec<Arc<dyn SpeechBackend>>,
        auto_speak: bool
    ) -> Self {
        Self {
            gateway,
            store,
            prompts,
            prompts_path,
            speaker: Arc::new(Speaker::new(speech_backends)),
            auto_speak,
        }
    }

    pub fn from_args(args: &Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let prompts = PromptHandle::new(load_prompts_or_default(&args.prompts_path)?);
        let chat_clients = new_chat_chain(args)?;
        let image_clients = new_image_chain(args)?;
        let call_timeout = Duration::from_secs(args.provider_timeout_secs);
        info!("Provider call deadline: {:?}", call_timeout);

        let gateway = AiGateway::new(chat_clients, image_clients, prompts.clone(), call_timeout);
        let store = initialize_history_store(args)?;
        let speech_backends = new_speaker_backends(args)?;

        Ok(
            Self::new(
                Arc::new(gateway),
                store,
                prompts,
                args.prompts_path.clone(),
                speech_backends,
                args.auto_speak
            )
        )
    }

    pub fn new_controller(&self, conversation_id: &str) -> ConversationController {
        ConversationController::new(
            conversation_id,
            Arc::clone(&self.gateway),
            Arc::clone(&self.store),
            self.prompts.clone()
        )
    }

    pub fn speaker(&self) -> Arc<Speaker> {
        Arc::clone(&self.speaker)
    }

    pub fn auto_speak(&self) -> bool {
        self.auto_speak
    }

    pub async fn reload_prompts_if_changed(&self) {
        self.prompts.reload_if_changed(&self.prompts_path).await;
    }
}
