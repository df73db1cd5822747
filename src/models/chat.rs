use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Url,
    Base64,
}

/// Image attached to an assistant reply. `data` is either a URL or a
/// base64-encoded image body, depending on `kind`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    #[serde(rename = "type")]
    pub kind: ImageKind,
    pub data: String,
}

impl ImagePayload {
    pub fn url(data: impl Into<String>) -> Self {
        Self { kind: ImageKind::Url, data: data.into() }
    }

    pub fn base64(data: impl Into<String>) -> Self {
        Self { kind: ImageKind::Base64, data: data.into() }
    }

    /// Like [`ImagePayload::base64`], but rejects bodies that do not decode.
    pub fn checked_base64(data: impl Into<String>) -> Result<Self, base64::DecodeError> {
        let data = data.into();
        STANDARD.decode(data.trim())?;
        Ok(Self::base64(data))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImagePayload>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            role,
            created_at,
            image: None,
        }
    }

    pub fn with_image(mut self, image: Option<ImagePayload>) -> Self {
        if self.role == Role::Assistant {
            self.image = image;
        }
        self
    }
}

/// Persisted unit: the whole conversation plus the Unix-millisecond time it was written.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_with_camel_case_and_tagged_image() {
        let msg = Message::new(Role::Assistant, "Our plans", Utc::now()).with_image(
            Some(ImagePayload::url("https://img.example/plan.png"))
        );
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["role"], "assistant");
        assert!(value.get("createdAt").is_some());
        assert_eq!(value["image"]["type"], "url");
        assert_eq!(value["image"]["data"], "https://img.example/plan.png");
    }

    #[test]
    fn image_is_omitted_when_absent_and_ignored_for_user_messages() {
        let msg = Message::new(Role::User, "hi", Utc::now()).with_image(
            Some(ImagePayload::base64("aGVsbG8="))
        );
        assert!(msg.image.is_none());

        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("image").is_none());
    }

    #[test]
    fn checked_base64_rejects_garbage() {
        assert!(ImagePayload::checked_base64("iVBORw0KGgo=").is_ok());
        assert!(ImagePayload::checked_base64("not base64!").is_err());
    }

    #[test]
    fn ids_are_unique() {
        let now = Utc::now();
        let a = Message::new(Role::User, "a", now);
        let b = Message::new(Role::User, "a", now);
        assert_ne!(a.id, b.id);
    }
}
