use crate::controller::{ ConversationController, Rejection, SendOutcome };
use crate::llm::speech::Speaker;
use crate::models::websocket::{ ClientMessage, ServerMessage };
use crate::service::ChatService;
use futures::stream::SplitSink;
use futures::{ SinkExt, StreamExt };
use log::{ info, warn, error };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{ AsyncRead, AsyncWrite };
use tokio::sync::mpsc;
use tokio_tungstenite::{ tungstenite::protocol::Message, WebSocketStream };
const MAX_MESSAGE_SIZE: usize = 1 * 1024 * 1024;

type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;

async fn send_json<S>(
    tx: &mut WsSink<S>,
    msg: &ServerMessage
) -> Result<(), Box<dyn Error + Send + Sync>>
    where S: AsyncRead + AsyncWrite + Unpin
{
    let json = serde_json::to_string(msg)?;
    tx.send(Message::Text(json)).await?;
    Ok(())
}

/// Runs one send on its own task so the connection keeps reading while the
/// reply is produced. The user's message goes out as soon as it is accepted.
fn spawn_send(
    controller: Arc<ConversationController>,
    speaker: Arc<Speaker>,
    auto_speak: bool,
    content: String,
    out: mpsc::UnboundedSender<ServerMessage>
) {
    tokio::spawn(async move {
        let outcome = controller.send_with(&content, |user| {
            let _ = out.send(ServerMessage::Message { message: user.clone() });
        }).await;
        match outcome {
            SendOutcome::Replied { reply, .. } => {
                let _ = out.send(ServerMessage::Message { message: reply.clone() });
                if auto_speak {
                    speaker.speak(controller.conversation_id(), &reply).await;
                }
            }
            SendOutcome::Rejected(Rejection::Busy) => {
                let _ = out.send(ServerMessage::Busy);
            }
            SendOutcome::Rejected(Rejection::Empty) => {
                let _ = out.send(ServerMessage::Error {
                    message: "Message is empty".to_string(),
                });
            }
        }
    });
}

async fn handle_client_message(
    msg: ClientMessage,
    controller: &Arc<ConversationController>,
    speaker: &Arc<Speaker>,
    service: &ChatService,
    out: &mpsc::UnboundedSender<ServerMessage>
) {
    match msg {
        ClientMessage::Chat { content } => {
            if controller.is_awaiting() {
                let _ = out.send(ServerMessage::Busy);
                return;
            }
            let _ = out.send(ServerMessage::Processing);
            spawn_send(
                Arc::clone(controller),
                Arc::clone(speaker),
                service.auto_speak(),
                content,
                out.clone()
            );
        }
        ClientMessage::Speak { id } => {
            match controller.find(&id).await {
                Some(message) => {
                    let speaker = Arc::clone(speaker);
                    let owner = controller.conversation_id().to_string();
                    tokio::spawn(async move {
                        speaker.speak(&owner, &message).await;
                    });
                }
                None => {
                    let _ = out.send(ServerMessage::Error {
                        message: format!("Unknown message id: {}", id),
                    });
                }
            }
        }
        ClientMessage::StopSpeaking => speaker.cancel_for(controller.conversation_id()).await,
        ClientMessage::History => {
            let _ = out.send(ServerMessage::History { messages: controller.messages().await });
        }
        ClientMessage::Reset => {
            speaker.cancel_for(controller.conversation_id()).await;
            let reply = match controller.reset().await {
                Ok(messages) => ServerMessage::History { messages },
                Err(_) => ServerMessage::Busy,
            };
            let _ = out.send(reply);
        }
    }
}

/// Serves one client. `conversation_id` selects the saved conversation the
/// client continues; it is announced in the first frame.
pub async fn handle_connection<S>(
    peer: SocketAddr,
    websocket: WebSocketStream<S>,
    service: Arc<ChatService>,
    conversation_id: String
)
    where S: AsyncRead + AsyncWrite + Unpin
{
    info!("New WebSocket connection: {} (session {})", peer, conversation_id);
    service.reload_prompts_if_changed().await;

    let controller = Arc::new(service.new_controller(&conversation_id));
    let speaker = service.speaker();
    let (mut tx, mut rx) = websocket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();

    if let Err(e) = send_json(&mut tx, &ServerMessage::Session { id: conversation_id.clone() }).await {
        error!("Error sending session id to {}: {}", peer, e);
        return;
    }

    let history = controller.mount().await;
    info!("Conversation {} for {} starts with {} messages", conversation_id, peer, history.len());
    if let Err(e) = send_json(&mut tx, &ServerMessage::History { messages: history }).await {
        error!("Error sending history to {}: {}", peer, e);
        return;
    }

    loop {
        tokio::select! {
            Some(outgoing) = out_rx.recv() => {
                if let Err(e) = send_json(&mut tx, &outgoing).await {
                    error!("Error sending message to {}: {}", peer, e);
                    break;
                }
            }
            incoming = rx.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        match e {
                            | tokio_tungstenite::tungstenite::Error::ConnectionClosed
                            | tokio_tungstenite::tungstenite::Error::Protocol(_)
                            | tokio_tungstenite::tungstenite::Error::Utf8 => {
                                info!("WebSocket connection closed or protocol error for {}: {}", peer, e);
                            }
                            tokio_tungstenite::tungstenite::Error::Io(ref io_err) if
                                io_err.kind() == std::io::ErrorKind::ConnectionReset
                            => {
                                info!("WebSocket connection reset by peer {}", peer);
                            }
                            _ => {
                                error!("Error receiving message from {}: {}", peer, e);
                            }
                        }
                        break;
                    }
                    None => break,
                };

                if message.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        "Message from {} exceeds size limit ({} > {})",
                        peer,
                        message.len(),
                        MAX_MESSAGE_SIZE
                    );
                    let error_msg = ServerMessage::Error {
                        message: "Message too large".to_string(),
                    };
                    if send_json(&mut tx, &error_msg).await.is_err() {
                        error!("Failed to send size limit error to {}", peer);
                    }
                    break;
                }

                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                handle_client_message(
                                    client_msg,
                                    &controller,
                                    &speaker,
                                    &service,
                                    &out_tx
                                ).await;
                            }
                            Err(e) => {
                                warn!("Failed to parse message from {}: {}", peer, e);
                                let _ = out_tx.send(ServerMessage::Error {
                                    message: format!("Failed to parse message: {}", e),
                                });
                            }
                        }
                    }
                    Message::Close(_) => {
                        info!("Received close frame from {}", peer);
                        break;
                    }
                    Message::Ping(ping_data) => {
                        if tx.send(Message::Pong(ping_data)).await.is_err() {
                            error!("Failed to send pong to {}", peer);
                            break;
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Binary(_) => {
                        warn!("Ignoring binary message from {}", peer);
                    }
                    Message::Frame(_) => {}
                }
            }
        }
    }

    speaker.cancel_for(&conversation_id).await;
    info!("WebSocket connection closed for {}", peer);
}
