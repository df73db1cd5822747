use serde::{ Serialize, Deserialize };

use super::chat::Message;

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "chat")] Chat {
        content: String,
    },
    #[serde(rename = "speak")] Speak {
        id: String,
    },
    #[serde(rename = "stop_speaking")]
    StopSpeaking,
    #[serde(rename = "history")]
    History,
    #[serde(rename = "reset")]
    Reset,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// First frame on every connection: the id to reconnect with via `?session=`.
    #[serde(rename = "session")] Session {
        id: String,
    },
    #[serde(rename = "history")] History {
        messages: Vec<Message>,
    },
    #[serde(rename = "message")] Message {
        message: Message,
    },
    #[serde(rename = "error")] Error {
        message: String,
    },
    #[serde(rename = "processing")]
    Processing,
    #[serde(rename = "busy")]
    Busy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_client_messages() {
        let chat: ClientMessage = serde_json::from_str(r#"{"type":"chat","content":"hi"}"#).unwrap();
        assert!(matches!(chat, ClientMessage::Chat { content } if content == "hi"));

        let stop: ClientMessage = serde_json::from_str(r#"{"type":"stop_speaking"}"#).unwrap();
        assert!(matches!(stop, ClientMessage::StopSpeaking));
    }

    #[test]
    fn unit_server_messages_carry_only_the_tag() {
        let json = serde_json::to_string(&ServerMessage::Busy).unwrap();
        assert_eq!(json, r#"{"type":"busy"}"#);
    }

    #[test]
    fn session_frame_carries_the_id() {
        let json = serde_json::to_string(&ServerMessage::Session { id: "abc".to_string() }).unwrap();
        assert_eq!(json, r#"{"type":"session","id":"abc"}"#);
    }
}
