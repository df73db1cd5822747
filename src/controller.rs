//! Per-conversation state: the ordered message list and the Idle/Awaiting
//! gate that keeps at most one send in flight.

use chrono::{ DateTime, Utc };
use log::{ info, warn };
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::prompt::PromptHandle;
use crate::gateway::Gateway;
use crate::history::ConversationStore;
use crate::models::chat::{ ImagePayload, Message, Role };

/// Longest user message accepted; longer input is cut at this many characters.
pub const MAX_INPUT_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    Busy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Replied {
        user: Message,
        reply: Message,
    },
    Rejected(Rejection),
}

/// Clears the awaiting flag when dropped, so an abandoned send cannot wedge
/// the controller.
struct AwaitingGuard<'a>(&'a AtomicBool);

impl Drop for AwaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ConversationController {
    conversation_id: String,
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn ConversationStore>,
    prompts: PromptHandle,
    messages: Mutex<Vec<Message>>,
    awaiting: AtomicBool,
}

impl ConversationController {
    pub fn new(
        conversation_id: impl Into<String>,
        gateway: Arc<dyn Gateway>,
        store: Arc<dyn ConversationStore>,
        prompts: PromptHandle
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            gateway,
            store,
            prompts,
            messages: Mutex::new(Vec::new()),
            awaiting: AtomicBool::new(false),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn is_awaiting(&self) -> bool {
        self.awaiting.load(Ordering::SeqCst)
    }

    fn try_begin(&self) -> Option<AwaitingGuard<'_>> {
        self.awaiting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| AwaitingGuard(&self.awaiting))
    }

    /// Restores the saved conversation, or starts a new one with a greeting.
    pub async fn mount(&self) -> Vec<Message> {
        if let Some(history) = self.store.load(&self.conversation_id).await {
            let mut messages = self.messages.lock().await;
            *messages = history;
            return messages.clone();
        }
        self.seed_greeting().await
    }

    async fn seed_greeting(&self) -> Vec<Message> {
        let greeting = match self.gateway.greeting().await {
            Ok(text) => text,
            Err(e) => {
                warn!("Greeting unavailable ({}), using the built-in one", e);
                self.prompts.current().await.fallback_greeting.clone()
            }
        };
        let mut messages = self.messages.lock().await;
        append(&mut messages, Role::Assistant, greeting, None);
        self.persist(&messages).await;
        messages.clone()
    }

    async fn persist(&self, messages: &[Message]) {
        if let Err(e) = self.store.save(&self.conversation_id, messages).await {
            warn!("Failed to save conversation: {}", e);
        }
    }

    pub async fn send(&self, text: &str) -> SendOutcome {
        self.send_with(text, |_| {}).await
    }

    /// Like [`send`](Self::send), but hands the appended user message to
    /// `on_accepted` before the gateway is asked for a reply.
    pub async fn send_with<F>(&self, text: &str, on_accepted: F) -> SendOutcome
        where F: FnOnce(&Message) + Send
    {
        let text = text.trim();
        if text.is_empty() {
            return SendOutcome::Rejected(Rejection::Empty);
        }
        let _guard = match self.try_begin() {
            Some(guard) => guard,
            None => {
                return SendOutcome::Rejected(Rejection::Busy);
            }
        };

        let text = truncate_chars(text, MAX_INPUT_CHARS);
        let user = {
            let mut messages = self.messages.lock().await;
            let user = append(&mut messages, Role::User, text.to_string(), None);
            self.persist(&messages).await;
            user
        };
        on_accepted(&user);

        let (role, content, image) = match self.gateway.reply(text).await {
            Ok(reply) => (Role::Assistant, reply.description, reply.image),
            Err(e) => {
                warn!("Reply failed: {}", e);
                (Role::Error, self.prompts.current().await.apology.clone(), None)
            }
        };

        let mut messages = self.messages.lock().await;
        let reply = append(&mut messages, role, content, image);
        self.persist(&messages).await;
        SendOutcome::Replied { user, reply }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.lock().await.clone()
    }

    pub async fn find(&self, id: &str) -> Option<Message> {
        self.messages
            .lock().await
            .iter()
            .find(|m| m.id == id)
            .cloned()
    }

    /// Drops the whole conversation, saved copy included, and greets again.
    pub async fn reset(&self) -> Result<Vec<Message>, Rejection> {
        let _guard = self.try_begin().ok_or(Rejection::Busy)?;
        if let Err(e) = self.store.clear(&self.conversation_id).await {
            warn!("Failed to clear saved conversation: {}", e);
        }
        self.messages.lock().await.clear();
        info!("Conversation {} reset", self.conversation_id);
        Ok(self.seed_greeting().await)
    }
}

/// Appends a new message, never stamping it earlier than the one before.
fn append(
    messages: &mut Vec<Message>,
    role: Role,
    content: String,
    image: Option<ImagePayload>
) -> Message {
    let message = Message::new(role, content, next_timestamp(messages)).with_image(image);
    messages.push(message.clone());
    message
}

fn next_timestamp(messages: &[Message]) -> DateTime<Utc> {
    let now = Utc::now();
    match messages.last() {
        Some(last) if last.created_at > now => last.created_at,
        _ => now,
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::prompt::PromptConfig;
    use crate::gateway::{ GatewayError, Reply };
    use crate::history::{ encode_snapshot, MemoryHistoryStore, RawStorage, SnapshotStore };
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    struct FakeGateway {
        reply: Option<Reply>,
        greeting: Option<String>,
        replies: AtomicUsize,
        greetings: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeGateway {
        fn answering(text: &str) -> Self {
            Self {
                reply: Some(Reply { description: text.to_string(), image: None }),
                greeting: Some("Hi, I'm Cloudy!".to_string()),
                replies: AtomicUsize::new(0),
                greetings: AtomicUsize::new(0),
                gate: None,
            }
        }

        fn down() -> Self {
            Self { reply: None, greeting: None, ..Self::answering("") }
        }
    }

    #[async_trait]
    impl Gateway for FakeGateway {
        async fn reply(&self, _user_text: &str) -> Result<Reply, GatewayError> {
            self.replies.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.reply.clone().ok_or(GatewayError::ProviderUnavailable { attempts: 2 })
        }

        async fn greeting(&self) -> Result<String, GatewayError> {
            self.greetings.fetch_add(1, Ordering::SeqCst);
            self.greeting.clone().ok_or(GatewayError::ProviderUnavailable { attempts: 2 })
        }
    }

    type MemoryStore = SnapshotStore<MemoryHistoryStore>;

    fn memory_store() -> Arc<MemoryStore> {
        Arc::new(SnapshotStore::new(MemoryHistoryStore::default(), Duration::from_secs(60)))
    }

    const WIDGET: &str = "widget";

    fn controller(gateway: Arc<FakeGateway>, store: Arc<MemoryStore>) -> ConversationController {
        ConversationController::new(
            WIDGET,
            gateway,
            store,
            PromptHandle::new(Arc::new(PromptConfig::default()))
        )
    }

    #[tokio::test]
    async fn mount_without_history_seeds_and_saves_greeting() {
        let gateway = Arc::new(FakeGateway::answering("unused"));
        let store = memory_store();
        let ctl = controller(gateway.clone(), store.clone());

        let messages = ctl.mount().await;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::Assistant);
        assert_eq!(messages[0].content, "Hi, I'm Cloudy!");
        assert_eq!(store.load(WIDGET).await, Some(messages));
    }

    #[tokio::test]
    async fn mount_hydrates_saved_history_verbatim() {
        let store = memory_store();
        let saved = vec![
            Message::new(Role::Assistant, "Hello!", Utc::now()),
            Message::new(Role::User, "Any discounts?", Utc::now())
        ];
        store.save(WIDGET, &saved).await.unwrap();

        let gateway = Arc::new(FakeGateway::answering("unused"));
        let ctl = controller(gateway.clone(), store);
        assert_eq!(ctl.mount().await, saved);
        assert_eq!(gateway.greetings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_history_is_replaced_by_fresh_greeting() {
        let storage = MemoryHistoryStore::default();
        let old = vec![Message::new(Role::User, "old question", Utc::now())];
        let stale = encode_snapshot(&old, Utc::now().timestamp_millis() - 120_000).unwrap();
        storage.write(WIDGET, &stale).await.unwrap();
        let store = Arc::new(SnapshotStore::new(storage, Duration::from_millis(60_000)));

        let gateway = Arc::new(FakeGateway::answering("unused"));
        let ctl = controller(gateway.clone(), store);
        let messages = ctl.mount().await;

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Hi, I'm Cloudy!");
        assert_eq!(gateway.greetings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_greeting_falls_back_to_builtin_text() {
        let ctl = controller(Arc::new(FakeGateway::down()), memory_store());
        let messages = ctl.mount().await;
        assert_eq!(messages[0].content, "Hello! How can I help you?");
        assert_eq!(messages[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn send_appends_user_and_reply_and_persists() {
        let store = memory_store();
        let ctl = controller(Arc::new(FakeGateway::answering("Plans start small.")), store.clone());
        ctl.mount().await;

        let outcome = ctl.send("  What plans do you offer?  ").await;
        let (user, reply) = match outcome {
            SendOutcome::Replied { user, reply } => (user, reply),
            other => panic!("unexpected outcome {:?}", other),
        };
        assert_eq!(user.content, "What plans do you offer?");
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(reply.content, "Plans start small.");
        assert!(reply.image.is_none());

        let messages = ctl.messages().await;
        assert_eq!(messages.len(), 3);
        assert_eq!(store.load(WIDGET).await, Some(messages));
        assert!(!ctl.is_awaiting());
    }

    #[tokio::test]
    async fn gateway_failure_appends_apology_as_error() {
        let ctl = controller(Arc::new(FakeGateway::down()), memory_store());
        ctl.mount().await;

        match ctl.send("Hello?").await {
            SendOutcome::Replied { reply, .. } => {
                assert_eq!(reply.role, Role::Error);
                assert_eq!(reply.content, "Sorry, AI is unavailable.");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn blank_input_is_rejected() {
        let gateway = Arc::new(FakeGateway::answering("unused"));
        let ctl = controller(gateway.clone(), memory_store());
        assert_eq!(ctl.send("   \n").await, SendOutcome::Rejected(Rejection::Empty));
        assert!(ctl.messages().await.is_empty());
        assert_eq!(gateway.replies.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_while_awaiting_is_a_no_op() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(FakeGateway {
            gate: Some(gate.clone()),
            ..FakeGateway::answering("Done.")
        });
        let ctl = Arc::new(controller(gateway.clone(), memory_store()));
        ctl.mount().await;

        let first = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move { ctl.send("first").await })
        };
        while gateway.replies.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(ctl.is_awaiting());

        let before = ctl.messages().await.len();
        assert_eq!(ctl.send("second").await, SendOutcome::Rejected(Rejection::Busy));
        assert_eq!(ctl.messages().await.len(), before);
        assert_eq!(gateway.replies.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.reset().await, Err(Rejection::Busy));

        gate.notify_one();
        assert!(matches!(first.await.unwrap(), SendOutcome::Replied { .. }));
        assert_eq!(ctl.messages().await.len(), before + 1);
        assert!(!ctl.is_awaiting());
    }

    #[tokio::test]
    async fn dropped_send_releases_the_gate() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(FakeGateway {
            gate: Some(gate),
            ..FakeGateway::answering("never")
        });
        let ctl = controller(gateway, memory_store());

        let pending = tokio::time::timeout(Duration::from_millis(20), ctl.send("hello")).await;
        assert!(pending.is_err());
        assert!(!ctl.is_awaiting());
    }

    #[tokio::test]
    async fn long_input_is_truncated() {
        let ctl = controller(Arc::new(FakeGateway::answering("ok")), memory_store());
        let long = "é".repeat(MAX_INPUT_CHARS + 50);
        match ctl.send(&long).await {
            SendOutcome::Replied { user, .. } => {
                assert_eq!(user.content.chars().count(), MAX_INPUT_CHARS);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn history_stays_ordered_and_append_only() {
        let ctl = controller(Arc::new(FakeGateway::answering("Sure.")), memory_store());
        ctl.mount().await;
        let mut seen: Vec<Message> = ctl.messages().await;

        for question in ["One?", "Two?", "Three?"] {
            ctl.send(question).await;
            let now = ctl.messages().await;
            assert_eq!(&now[..seen.len()], &seen[..]);
            seen = now;
        }

        assert_eq!(seen.len(), 7);
        assert!(seen.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let future = Utc::now() + ChronoDuration::seconds(30);
        let messages = vec![Message::new(Role::User, "from the future", future)];
        assert_eq!(next_timestamp(&messages), future);
        assert!(next_timestamp(&[]) <= Utc::now());
    }

    #[tokio::test]
    async fn reset_clears_store_and_greets_again() {
        let store = memory_store();
        let ctl = controller(Arc::new(FakeGateway::answering("ok")), store.clone());
        ctl.mount().await;
        ctl.send("question").await;

        let messages = ctl.reset().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(store.load(WIDGET).await, Some(messages));
    }

    #[tokio::test]
    async fn controllers_with_different_ids_do_not_share_history() {
        let store = memory_store();
        let gateway = Arc::new(FakeGateway::answering("ok"));
        let prompts = PromptHandle::new(Arc::new(PromptConfig::default()));
        let alice = ConversationController::new("alice", gateway.clone(), store.clone(), prompts.clone());
        let bob = ConversationController::new("bob", gateway.clone(), store.clone(), prompts);

        alice.mount().await;
        alice.send("my card is 4111").await;
        assert_eq!(bob.mount().await.len(), 1);

        bob.reset().await.unwrap();
        let restored = ConversationController::new(
            "alice",
            gateway,
            store.clone(),
            PromptHandle::new(Arc::new(PromptConfig::default()))
        );
        let history = restored.mount().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].content, "my card is 4111");
    }

    #[tokio::test]
    async fn accepted_user_message_is_reported_before_the_reply() {
        let gate = Arc::new(Notify::new());
        let gateway = Arc::new(FakeGateway {
            gate: Some(gate.clone()),
            ..FakeGateway::answering("Later.")
        });
        let ctl = Arc::new(controller(gateway, memory_store()));
        let (accepted_tx, accepted_rx) = tokio::sync::oneshot::channel();

        let pending = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move {
                ctl.send_with("Is anyone there?", move |user| {
                    let _ = accepted_tx.send(user.clone());
                }).await
            })
        };

        let user = accepted_rx.await.unwrap();
        assert_eq!(user.content, "Is anyone there?");
        assert!(ctl.is_awaiting());

        gate.notify_one();
        match pending.await.unwrap() {
            SendOutcome::Replied { user: replied_user, reply } => {
                assert_eq!(replied_user, user);
                assert_eq!(reply.content, "Later.");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn rejected_send_never_reports_acceptance() {
        let ctl = controller(Arc::new(FakeGateway::answering("unused")), memory_store());
        let mut called = false;
        assert_eq!(
            ctl.send_with("  ", |_| called = true).await,
            SendOutcome::Rejected(Rejection::Empty)
        );
        assert!(!called);
    }

    #[tokio::test]
    async fn find_looks_up_by_id() {
        let ctl = controller(Arc::new(FakeGateway::answering("ok")), memory_store());
        let greeting = ctl.mount().await.remove(0);
        assert_eq!(ctl.find(&greeting.id).await, Some(greeting));
        assert_eq!(ctl.find("missing").await, None);
    }
}
