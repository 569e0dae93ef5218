//! Chat session orchestration
//!
//! The ChatSession owns everything the chat view shows. It:
//! 1. Loads history and subscribes to inserts for the active conversation
//! 2. Appends the user's message optimistically and fires the webhook
//! 3. Feeds history results and inserted rows through the reconciler
//! 4. Persists the active conversation and additional instructions
//!
//! All mutation happens on the task that owns the session. Network results
//! come back as [`SessionEvent`]s tagged with the conversation they belong
//! to, so late results for an abandoned conversation are dropped.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::{ChangeListener, DispatchRequest, Dispatcher, HistoryLoader, Subscription};
use crate::config::{ChatModel, ModelSelection, PromptShortcut};
use crate::conversation::{ConversationPreview, Message, SessionId};

use super::context::SessionContext;
use super::reconciler::Reconciler;
use super::store::StorageError;

/// Results delivered back to the owning task
#[derive(Debug)]
pub enum SessionEvent {
    HistoryLoaded {
        session_id: SessionId,
        result: Result<Vec<Message>, String>,
    },
    Inserted(Message),
}

/// User-visible failure notices
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    HistoryLoadFailed(String),
    DispatchFailed,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::HistoryLoadFailed(_) => f.write_str("Failed to load messages"),
            Notice::DispatchFailed => f.write_str("Failed to send message. Please try again."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Empty input, or a send is still outstanding
    Ignored,
    /// The webhook accepted the message; the reply arrives later
    Accepted,
    /// The webhook rejected the message; it stays in the transcript
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub struct ChatSession {
    context: SessionContext,
    reconciler: Reconciler,
    history: Arc<dyn HistoryLoader>,
    listener: Arc<dyn ChangeListener>,
    dispatcher: Arc<dyn Dispatcher>,
    model: ModelSelection,
    instructions: String,
    subscription: Option<Subscription>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    notices: Vec<Notice>,
}

impl ChatSession {
    /// Open the persisted (or a fresh) conversation and start loading it
    pub async fn open(
        context: SessionContext,
        history: Arc<dyn HistoryLoader>,
        listener: Arc<dyn ChangeListener>,
        dispatcher: Arc<dyn Dispatcher>,
        model: ModelSelection,
    ) -> Result<Self, ChatError> {
        let active = context.current_or_new_session().await?;
        let instructions = context.instructions().await?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut session = Self {
            context,
            reconciler: Reconciler::new(active),
            history,
            listener,
            dispatcher,
            model,
            instructions,
            subscription: None,
            events_tx,
            events_rx,
            notices: Vec::new(),
        };
        session.attach();
        Ok(session)
    }

    pub fn active(&self) -> &SessionId {
        self.reconciler.active()
    }

    pub fn messages(&self) -> &[Message] {
        self.reconciler.messages()
    }

    pub fn is_pending(&self) -> bool {
        self.reconciler.is_pending()
    }

    pub fn is_loading_history(&self) -> bool {
        self.reconciler.is_loading_history()
    }

    /// Whether the view should scroll to the newest entry
    pub fn take_scroll_request(&mut self) -> bool {
        self.reconciler.take_scroll_request()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn model(&self) -> &ModelSelection {
        &self.model
    }

    pub fn set_provider(&mut self, provider: ChatModel) {
        self.model.set_provider(provider);
    }

    pub fn set_model_version(&mut self, version: &str) {
        self.model.set_version(version);
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub async fn set_instructions(&mut self, instructions: &str) -> Result<(), ChatError> {
        self.context.set_instructions(instructions).await?;
        self.instructions = instructions.to_string();
        Ok(())
    }

    /// Template to prefill the input with, unless a send is outstanding
    pub fn apply_shortcut<'a>(&self, shortcut: &'a PromptShortcut) -> Option<&'a str> {
        if self.is_pending() {
            None
        } else {
            Some(&shortcut.template)
        }
    }

    pub async fn conversations(&self) -> Vec<ConversationPreview> {
        self.history.conversations().await
    }

    /// Start a brand-new conversation
    pub async fn new_conversation(&mut self) -> Result<(), ChatError> {
        self.switch_to(SessionId::generate()).await
    }

    /// Switch to a stored conversation; selecting the active one is a no-op
    pub async fn select_conversation(&mut self, session_id: SessionId) -> Result<(), ChatError> {
        if session_id == *self.active() {
            return Ok(());
        }
        self.switch_to(session_id).await
    }

    /// Re-read the active conversation without switching
    pub fn refresh(&self) {
        self.spawn_history_fetch(self.active().clone());
    }

    async fn switch_to(&mut self, session_id: SessionId) -> Result<(), ChatError> {
        tracing::info!(session = %session_id, "Switching conversation");
        self.detach();
        self.reconciler.switch_to(session_id.clone());
        self.context.set_current_session(&session_id).await?;
        self.attach();
        Ok(())
    }

    /// Fetch history and subscribe for the active conversation
    fn attach(&mut self) {
        let active = self.active().clone();
        self.spawn_history_fetch(active.clone());

        let tx = self.events_tx.clone();
        let subscription = self.listener.subscribe(
            &active,
            Box::new(move |message| {
                let _ = tx.send(SessionEvent::Inserted(message));
            }),
        );
        self.subscription = Some(subscription);
    }

    fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }

    fn spawn_history_fetch(&self, session_id: SessionId) {
        let history = self.history.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = history.load(&session_id).await.map_err(|e| {
                tracing::error!(session = %session_id, "Error loading messages: {}", e);
                e.to_string()
            });
            let _ = tx.send(SessionEvent::HistoryLoaded { session_id, result });
        });
    }

    /// Submit user input.
    ///
    /// The message is shown immediately and stays in the transcript even if
    /// the webhook rejects it.
    pub async fn send(&mut self, input: &str) -> SendOutcome {
        if input.trim().is_empty() || self.is_pending() {
            return SendOutcome::Ignored;
        }

        let message = Message::human(self.active().clone(), input);
        self.reconciler.append_local(message);
        self.reconciler.begin_send();

        let request = DispatchRequest {
            session_id: self.active().clone(),
            chat_input: input.to_string(),
            chat_model: self.model.provider(),
            params: self.model.params(&self.instructions),
        };

        if self.dispatcher.dispatch(&request).await {
            SendOutcome::Accepted
        } else {
            self.reconciler.dispatch_failed();
            self.notices.push(Notice::DispatchFailed);
            SendOutcome::Failed
        }
    }

    /// Wait for the next network result
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    /// Apply every result that is already waiting
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::HistoryLoaded { session_id, result } => {
                if session_id != *self.active() {
                    tracing::debug!(session = %session_id, "Dropping history for abandoned conversation");
                    return;
                }
                let messages = match result {
                    Ok(messages) => messages,
                    Err(reason) => {
                        self.notices.push(Notice::HistoryLoadFailed(reason));
                        Vec::new()
                    }
                };
                self.reconciler.replace(&session_id, messages);
            }
            SessionEvent::Inserted(message) => {
                self.reconciler.append_remote(message);
            }
        }
    }

    /// Tear down the subscription (unmount)
    pub fn close(&mut self) {
        self.detach();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.detach();
    }
}
