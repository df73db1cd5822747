pub mod cli;
pub mod config;
pub mod controller;
pub mod gateway;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;
pub mod service;
pub mod websocket;

use cli::Args;
use log::info;
use server::Server;
use service::ChatService;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("Chat Providers: {}", args.chat_providers.join(", "));
    if args.image_providers.is_empty() {
        info!("Image Providers: none (image generation disabled)");
    } else {
        info!("Image Providers: {}", args.image_providers.join(", "));
    }
    info!("Provider Timeout: {}s", args.provider_timeout_secs);
    info!("History Store Type: {}", args.history_type);
    info!("History TTL: {}s", args.history_ttl_secs);
    info!("Speech Backends: {}", args.speech_backends.join(", "));
    info!("Auto Speak: {}", args.auto_speak);
    info!("Prompts Path: {}", args.prompts_path);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let service = Arc::new(ChatService::from_args(&args)?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, service, args.server_api_key.clone(), args.clone());
    server.run().await?;

    Ok(())
}
