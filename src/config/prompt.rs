use serde::Deserialize;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use log::{ info, error };

pub const DEFAULT_PERSONA: &str = "\
You are Cloudy, the support bot for HostingCloud, a cloud hosting website. Only answer questions about HostingCloud, its pricing, features, and cloud hosting topics. Do not answer unrelated questions.

Here is what you know about HostingCloud:

Features:
- Secure: We strictly only deal with vendors that provide top notch security infrastructure.
- 24/7 Support: Our expert team is available around the clock to assist you with any issues or questions.
- Customizable: Easily tailor your hosting environment to fit your unique business needs and preferences.
- Reliable: Enjoy industry-leading uptime and dependable performance for your critical applications.
- Fast: Experience lightning-fast load times and optimized server performance for your websites.
- Easy: Get started quickly with our intuitive setup and user-friendly management tools.

Pricing:
- Flexible plans for every need. Whether you're just starting out or scaling up, HostingCloud has you covered.

Reliability:
- Highly redundant servers with backup: automatic failover and daily backups keep your data safe and your site online.

Security:
- State of the art computer security: advanced security protocols, regular audits, and real-time monitoring.

FAQ:
- What is cloud hosting? Cloud hosting uses a network of virtual servers to host websites and applications, offering greater reliability and scalability compared to traditional hosting.
- How secure is my data? We implement advanced security protocols, regular audits, and real-time monitoring to ensure your data is always protected.
- Can I upgrade my plan later? Yes, you can easily upgrade or downgrade your hosting plan at any time to fit your needs.
- Do you offer 24/7 support? Absolutely! Our expert support team is available around the clock to assist you.
- Is there a money-back guarantee? Yes, we offer a 30-day money-back guarantee if you're not satisfied with our service.

If you don't know the answer, say you don't know. Never answer questions unrelated to HostingCloud.
";

const DEFAULT_RELEVANCE_TEMPLATE: &str = "\
Would an image help illustrate the answer below? Only consider images about hosting, cloud, or technology topics. Reply with exactly 1 for yes or 0 for no, and nothing else.

Question: {question}
Answer: {answer}";

const DEFAULT_IMAGE_TEMPLATE: &str = "\
A clean, modern illustration for a cloud hosting support chat. Topic: {question}. Key points: {answer}";

const DEFAULT_GREETING_PROMPT: &str =
    "Greet a visitor who just opened the HostingCloud support chat in one or two friendly sentences and offer help.";

#[derive(Debug)]
pub enum PromptError {
    MissingPlaceholder(String, &'static str),
    IoError(std::io::Error),
    JsonError(serde_json::Error),
}

impl fmt::Display for PromptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PromptError::MissingPlaceholder(key, placeholder) =>
                write!(f, "Prompt template '{}' is missing placeholder {}", key, placeholder),
            PromptError::IoError(e) => write!(f, "Prompt file IO error: {}", e),
            PromptError::JsonError(e) => write!(f, "Prompt JSON parsing error: {}", e),
        }
    }
}

impl Error for PromptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PromptError::IoError(e) => Some(e),
            PromptError::JsonError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PromptError {
    fn from(err: std::io::Error) -> Self {
        PromptError::IoError(err)
    }
}

impl From<serde_json::Error> for PromptError {
    fn from(err: serde_json::Error) -> Self {
        PromptError::JsonError(err)
    }
}

/// Prompt texts used by the gateway and controller. Any field left out of
/// the JSON file keeps its built-in value.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct PromptConfig {
    pub persona: String,
    pub relevance_template: String,
    pub image_template: String,
    pub greeting_prompt: String,
    pub apology: String,
    pub fallback_greeting: String,
    #[serde(skip)]
    pub last_loaded: Option<SystemTime>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            relevance_template: DEFAULT_RELEVANCE_TEMPLATE.to_string(),
            image_template: DEFAULT_IMAGE_TEMPLATE.to_string(),
            greeting_prompt: DEFAULT_GREETING_PROMPT.to_string(),
            apology: "Sorry, AI is unavailable.".to_string(),
            fallback_greeting: "Hello! How can I help you?".to_string(),
            last_loaded: None,
        }
    }
}

impl PromptConfig {
    fn validate(&self) -> Result<(), PromptError> {
        for (key, template) in [
            ("relevance_template", &self.relevance_template),
            ("image_template", &self.image_template),
        ] {
            if !template.contains("{question}") {
                return Err(PromptError::MissingPlaceholder(key.to_string(), "{question}"));
            }
        }
        if !self.relevance_template.contains("{answer}") {
            return Err(
                PromptError::MissingPlaceholder("relevance_template".to_string(), "{answer}")
            );
        }
        Ok(())
    }
}

pub fn load_prompts_from_str(json: &str) -> Result<PromptConfig, PromptError> {
    let config: PromptConfig = serde_json::from_str(json)?;
    config.validate()?;
    Ok(config)
}

pub fn load_prompts<P: AsRef<Path>>(path: P) -> Result<Arc<PromptConfig>, PromptError> {
    let file_content = fs::read_to_string(path.as_ref())?;
    let mut config = load_prompts_from_str(&file_content)?;
    config.last_loaded = Some(SystemTime::now());
    Ok(Arc::new(config))
}

/// Loads the prompt file, or the built-in prompts when the file does not exist.
pub fn load_prompts_or_default<P: AsRef<Path>>(path: P) -> Result<Arc<PromptConfig>, PromptError> {
    match load_prompts(path.as_ref()) {
        Ok(config) => {
            info!("Loaded prompts from {}", path.as_ref().display());
            Ok(config)
        }
        Err(PromptError::IoError(e)) if e.kind() == ErrorKind::NotFound => {
            info!("No prompts file at {}, using built-in prompts", path.as_ref().display());
            Ok(Arc::new(PromptConfig::default()))
        }
        Err(e) => Err(e),
    }
}

pub fn reload_prompts_if_changed<P: AsRef<Path>>(
    path: P,
    current_config: &Arc<PromptConfig>
) -> Result<Option<Arc<PromptConfig>>, PromptError> {
    let metadata = match fs::metadata(&path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(None);
        }
        Err(e) => {
            return Err(e.into());
        }
    };

    if let Ok(modified) = metadata.modified() {
        let stale = match current_config.last_loaded {
            Some(last_loaded) => modified > last_loaded,
            None => true,
        };
        if stale {
            info!("Prompts file changed, reloading...");
            return Ok(Some(load_prompts(path)?));
        }
    }
    Ok(None)
}

pub fn get_relevance_prompt(config: &PromptConfig, question: &str, answer: &str) -> String {
    config.relevance_template.replace("{question}", question).replace("{answer}", answer)
}

pub fn get_image_prompt(config: &PromptConfig, question: &str, answer: &str) -> String {
    config.image_template.replace("{question}", question).replace("{answer}", answer)
}

/// Shared, reloadable prompt configuration.
#[derive(Clone)]
pub struct PromptHandle {
    inner: Arc<RwLock<Arc<PromptConfig>>>,
}

impl PromptHandle {
    pub fn new(config: Arc<PromptConfig>) -> Self {
        Self { inner: Arc::new(RwLock::new(config)) }
    }

    pub async fn current(&self) -> Arc<PromptConfig> {
        Arc::clone(&*self.inner.read().await)
    }

    /// Swaps in the prompt file's contents if it changed since the last load.
    /// A broken file is logged and the current prompts stay in place.
    pub async fn reload_if_changed<P: AsRef<Path>>(&self, path: P) {
        let current = self.current().await;
        match reload_prompts_if_changed(path, &current) {
            Ok(Some(updated)) => {
                *self.inner.write().await = updated;
            }
            Ok(None) => {}
            Err(e) => error!("Failed to reload prompts: {}", e),
        }
    }
}
