use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- History Store Args ---
    /// History chat store type (file, redis, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "file")]
    pub history_type: String,

    /// History chat store host endpoint for the redis backend (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Directory holding the snapshot file for the file backend.
    #[arg(long, env = "HISTORY_DIR", default_value = ".cloudy")]
    pub history_dir: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "history:")]
    pub history_redis_prefix: String,

    /// Name prefix for saved conversations; each client session is stored under its own key.
    #[arg(long, env = "HISTORY_KEY", default_value = "cloudy_chat_history")]
    pub history_key: String,

    /// Seconds after which a saved conversation is discarded instead of restored.
    #[arg(long, env = "HISTORY_TTL_SECS", default_value = "60")]
    pub history_ttl_secs: u64,

    // --- Chat LLM Provider Args ---
    /// Ordered list of text providers, tried in turn until one answers (openai, gemini, ollama)
    #[arg(long, env = "CHAT_PROVIDERS", default_value = "openai,gemini", value_delimiter = ',')]
    pub chat_providers: Vec<String>,

    /// Ordered list of image providers (openai, gemini). Empty disables image generation.
    #[arg(long, env = "IMAGE_PROVIDERS", value_delimiter = ',')]
    pub image_providers: Vec<String>,

    /// Per-call deadline for any provider request, in seconds.
    #[arg(long, env = "PROVIDER_TIMEOUT_SECS", default_value = "30")]
    pub provider_timeout_secs: u64,

    /// API Key for OpenAI
    #[arg(long, env = "OPENAI_API_KEY", default_value = "")]
    pub openai_api_key: String,

    /// OpenAI chat model (e.g., gpt-4o)
    #[arg(long, env = "OPENAI_MODEL")] // No default, rely on adapter defaults if None
    pub openai_model: Option<String>,

    /// OpenAI image model (e.g., dall-e-3)
    #[arg(long, env = "OPENAI_IMAGE_MODEL")]
    pub openai_image_model: Option<String>,

    /// Base URL for the OpenAI API (e.g., https://api.openai.com)
    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_base_url: Option<String>,

    /// API Key for Google Gemini
    #[arg(long, env = "GEMINI_API_KEY", default_value = "")]
    pub gemini_api_key: String,

    /// Gemini chat model (e.g., gemini-2.0-flash)
    #[arg(long, env = "GEMINI_MODEL")]
    pub gemini_model: Option<String>,

    /// Gemini image model (e.g., gemini-2.0-flash-preview-image-generation)
    #[arg(long, env = "GEMINI_IMAGE_MODEL")]
    pub gemini_image_model: Option<String>,

    /// Base URL for the Gemini API
    #[arg(long, env = "GEMINI_BASE_URL")]
    pub gemini_base_url: Option<String>,

    /// Ollama model (e.g., llama3)
    #[arg(long, env = "OLLAMA_MODEL")]
    pub ollama_model: Option<String>,

    /// Base URL for Ollama (e.g., http://localhost:11434)
    #[arg(long, env = "OLLAMA_BASE_URL")]
    pub ollama_base_url: Option<String>,

    // --- Speech Args ---
    /// Ordered list of speech backends (local, openai). Empty disables speech.
    #[arg(long, env = "SPEECH_BACKENDS", default_value = "local", value_delimiter = ',')]
    pub speech_backends: Vec<String>,

    /// On-device synthesizer command; the text is passed as its last argument.
    #[arg(long, env = "SPEECH_COMMAND", default_value = "espeak-ng")]
    pub speech_command: String,

    /// Audio player used for network-synthesized speech; the WAV path is passed as its last argument.
    #[arg(long, env = "SPEECH_PLAYER", default_value = "aplay")]
    pub speech_player: String,

    /// API Key for the network speech provider. Defaults to OPENAI_API_KEY if not set.
    #[arg(long, env = "SPEECH_API_KEY")]
    pub speech_api_key: Option<String>,

    /// Network speech model (e.g., gpt-4o-mini-tts)
    #[arg(long, env = "SPEECH_MODEL")]
    pub speech_model: Option<String>,

    /// Network speech voice (e.g., alloy)
    #[arg(long, env = "SPEECH_VOICE")]
    pub speech_voice: Option<String>,

    /// Base URL for the network speech provider. Defaults to OPENAI_BASE_URL if not set.
    #[arg(long, env = "SPEECH_BASE_URL")]
    pub speech_base_url: Option<String>,

    /// Speak every assistant reply as it arrives.
    #[arg(long, env = "AUTO_SPEAK", default_value = "false")]
    pub auto_speak: bool,

    // --- General App Args ---
    /// Path to the prompt configuration file. Built-in prompts are used when it does not exist.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json")]
    pub prompts_path: String,

    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional API Key required for clients to connect to the WebSocket server. If set, clients must provide this key.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Optional path to the TLS certificate file (PEM format) for enabling WSS. Requires --tls-key.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format) for enabling WSS. Requires --tls-cert.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,
}

impl Args {
    pub fn speech_api_key(&self) -> &str {
        self.speech_api_key.as_deref().unwrap_or(&self.openai_api_key)
    }

    pub fn speech_base_url(&self) -> Option<String> {
        self.speech_base_url.clone().or_else(|| self.openai_base_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_lists_split_on_commas() {
        let args = Args::parse_from([
            "cloudy",
            "--chat-providers",
            "gemini,ollama",
            "--image-providers",
            "openai",
        ]);
        assert_eq!(args.chat_providers, vec!["gemini", "ollama"]);
        assert_eq!(args.image_providers, vec!["openai"]);
        assert_eq!(args.history_ttl_secs, 60);
    }
}
