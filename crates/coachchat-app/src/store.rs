//! Chat state store.
//!
//! [`ChatStore`] is a pure reducer over the realtime [`ChatEvent`] stream and
//! REST results. It holds everything the chat UI renders: the conversation
//! list, the open conversation's messages, typing indicators, connectivity
//! and error fields. Intent methods (`load_conversation`, `send_message`, ...)
//! never perform I/O; they return [`AppAction`]s for the runtime.
//!
//! # Deduplication
//!
//! A message sent through REST comes back twice: once as the REST response
//! and once as the broker echo. Either may arrive first. For the open
//! conversation a message is a repeat when its id is already in the message
//! list. For any other conversation it is a repeat when it matches the
//! summary's last message or was already delivered since the conversation
//! was last opened or read. Either way a message lands once and counts as
//! unread at most once.

use std::collections::{HashMap, HashSet};

use coachchat_core::{
    ChannelCommand, ChatEvent, ConnectionError, Conversation, ConversationId, Message, MessageId,
    TypingIndicator, User, UserId,
};

use crate::{
    AppAction, AppEvent,
    api::{
        ConversationDetail, ConversationPage, CreateConversationRequest, PageMeta,
        SendMessageRequest,
    },
};

/// Content of a send that failed, kept so the compose box can be refilled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedDraft {
    /// Conversation the message was meant for.
    pub conversation_id: ConversationId,
    /// The unsent content.
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Broker,
    Local,
}

/// Chat state store.
#[derive(Debug, Clone, Default)]
pub struct ChatStore {
    /// Broker connectivity as last reported.
    connected: bool,
    /// Last connection error. Cleared on connect.
    connection_error: Option<ConnectionError>,
    /// Authorization failure of the conversation subscription. Never retried.
    subscription_error: Option<String>,
    /// Last REST error.
    error: Option<String>,
    /// Conversation list, most recent activity first.
    conversations: Vec<Conversation>,
    /// Pagination of the conversation list. `None` before the first load.
    conversation_page: Option<PageMeta>,
    /// Currently open conversation.
    current_conversation: Option<ConversationId>,
    /// Messages of the open conversation, oldest first.
    messages: Vec<Message>,
    /// Pagination of the open conversation's history.
    message_page: Option<PageMeta>,
    /// Typing indicators keyed by `(conversation, user)`.
    typing: HashMap<(ConversationId, UserId), TypingIndicator>,
    /// Ids delivered to conversations that are not open, per conversation.
    /// Cleared when the conversation is opened or marked read.
    background_ids: HashMap<ConversationId, HashSet<MessageId>>,
    /// Last failed send.
    failed_draft: Option<FailedDraft>,
    /// A list or conversation load is in flight.
    loading: bool,
    /// A send is in flight.
    sending: bool,
}

impl ChatStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process an event and return actions.
    pub fn handle(&mut self, event: AppEvent) -> Vec<AppAction> {
        match event {
            AppEvent::Chat(event) => {
                self.apply_chat_event(event);
                vec![]
            },
            AppEvent::ConversationsLoaded { page } => {
                self.apply_conversation_page(page);
                vec![]
            },
            AppEvent::ConversationLoaded { detail } => self.apply_conversation_detail(detail),
            AppEvent::ConversationCreated { conversation } => {
                let conversation_id = conversation.id;
                self.replace_conversation(conversation);
                if let Some(pos) = self.position(conversation_id) {
                    let created = self.conversations.remove(pos);
                    self.conversations.insert(0, created);
                }
                self.load_conversation(conversation_id)
            },
            AppEvent::MessageSent { message } => {
                self.sending = false;
                if self
                    .failed_draft
                    .as_ref()
                    .is_some_and(|draft| draft.conversation_id == message.conversation_id)
                {
                    self.failed_draft = None;
                }
                self.accept_message(message, Origin::Local);
                vec![]
            },
            AppEvent::SendFailed { conversation_id, content, error } => {
                tracing::warn!(conversation_id, %error, "failed to send message");
                self.sending = false;
                self.error = Some(error.to_string());
                self.failed_draft = Some(FailedDraft { conversation_id, content });
                vec![]
            },
            AppEvent::MarkedRead { conversation_id } => {
                self.background_ids.remove(&conversation_id);
                if let Some(conversation) = self.conversation_mut(conversation_id) {
                    conversation.unread_count = 0;
                }
                vec![]
            },
            AppEvent::RequestFailed { error } => {
                tracing::warn!(%error, "chat request failed");
                self.loading = false;
                self.error = Some(error.to_string());
                vec![]
            },
        }
    }

    fn apply_chat_event(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::Connected => {
                self.connected = true;
                self.connection_error = None;
            },
            ChatEvent::Disconnected => self.connected = false,
            ChatEvent::ConnectionError(error) => {
                self.connected = false;
                self.connection_error = Some(error);
            },
            ChatEvent::NewMessage(message) => {
                self.accept_message(message, Origin::Broker);
            },
            ChatEvent::Typing { user, timestamp } => {
                let Some(conversation_id) = self.current_conversation else {
                    tracing::trace!(user_id = user.id, "typing with no open conversation");
                    return;
                };
                let indicator = TypingIndicator { conversation_id, user, timestamp };
                self.typing.insert(indicator.key(), indicator);
            },
            ChatEvent::StopTyping { user, .. } => {
                if let Some(conversation_id) = self.current_conversation {
                    self.typing.remove(&(conversation_id, user.id));
                }
            },
            ChatEvent::SubscriptionRejected { conversation_id } => {
                self.subscription_error =
                    Some(format!("not allowed to join conversation {conversation_id}"));
            },
        }
    }

    fn apply_conversation_page(&mut self, page: ConversationPage) {
        let ConversationPage { conversations, meta } = page;
        self.loading = false;

        if meta.current_page <= 1 {
            self.conversations.clear();
        }
        for conversation in conversations {
            if self.position(conversation.id).is_none() {
                self.conversations.push(conversation);
            }
        }
        self.conversation_page = Some(meta);
    }

    fn apply_conversation_detail(&mut self, detail: ConversationDetail) -> Vec<AppAction> {
        let ConversationDetail { conversation, messages, meta } = detail;
        let conversation_id = conversation.id;

        if meta.current_page > 1 {
            if self.current_conversation != Some(conversation_id) {
                tracing::debug!(conversation_id, "dropping history page for closed conversation");
                return vec![];
            }
            self.loading = false;
            let mut known: HashSet<MessageId> = self.messages.iter().map(|m| m.id).collect();
            let older: Vec<Message> = messages.into_iter().filter(|m| known.insert(m.id)).collect();
            self.messages.splice(0..0, older);
            self.message_page = Some(meta);
            return vec![];
        }

        self.loading = false;
        if self.current_conversation != Some(conversation_id) {
            self.typing.retain(|(typing_in, _), _| *typing_in == conversation_id);
        }
        self.current_conversation = Some(conversation_id);
        self.background_ids.remove(&conversation_id);

        let mut ids = HashSet::new();
        self.messages = messages.into_iter().filter(|m| ids.insert(m.id)).collect();
        self.message_page = Some(meta);
        self.replace_conversation(conversation);

        vec![
            AppAction::Subscribe { conversation_id },
            AppAction::MarkAsRead { conversation_id },
        ]
    }

    /// Merge a message into the store. Returns `false` for a duplicate.
    fn accept_message(&mut self, message: Message, origin: Origin) -> bool {
        let conversation_id = message.conversation_id;
        let is_open = self.current_conversation == Some(conversation_id);
        if self.is_duplicate(&message, is_open) {
            tracing::trace!(message_id = message.id, ?origin, "duplicate message");
            return false;
        }

        self.typing.remove(&(conversation_id, message.sender_id));

        let conversation = self.bump_conversation(conversation_id);
        conversation.record_message(&message);
        if origin == Origin::Broker && !is_open {
            conversation.unread_count = conversation.unread_count.saturating_add(1);
        }

        if is_open {
            self.messages.push(message);
        } else {
            self.background_ids.entry(conversation_id).or_default().insert(message.id);
        }
        true
    }

    fn is_duplicate(&self, message: &Message, is_open: bool) -> bool {
        if is_open {
            return self.messages.iter().any(|m| m.id == message.id);
        }

        let conversation_id = message.conversation_id;
        let delivered = self
            .background_ids
            .get(&conversation_id)
            .is_some_and(|ids| ids.contains(&message.id));
        let is_last = self
            .conversation(conversation_id)
            .and_then(|c| c.last_message.as_ref())
            .is_some_and(|last| last.id == message.id);
        delivered || is_last
    }

    /// Move a conversation to the head of the list, creating it if unknown.
    fn bump_conversation(&mut self, conversation_id: ConversationId) -> &mut Conversation {
        let conversation = match self.position(conversation_id) {
            Some(pos) => self.conversations.remove(pos),
            None => Conversation::new(conversation_id),
        };
        self.conversations.insert(0, conversation);
        &mut self.conversations[0]
    }

    /// Replace a conversation summary in place, or insert it at the head.
    fn replace_conversation(&mut self, conversation: Conversation) {
        match self.position(conversation.id) {
            Some(pos) => self.conversations[pos] = conversation,
            None => self.conversations.insert(0, conversation),
        }
    }

    fn position(&self, conversation_id: ConversationId) -> Option<usize> {
        self.conversations.iter().position(|c| c.id == conversation_id)
    }

    fn conversation_mut(&mut self, conversation_id: ConversationId) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.id == conversation_id)
    }

    /// Load a page of the conversation list. Page 1 replaces the list.
    pub fn load_conversations(&mut self, page: u32) -> Vec<AppAction> {
        self.loading = true;
        vec![AppAction::FetchConversations { page: page.max(1) }]
    }

    /// Load the next page of the conversation list, if any.
    pub fn load_more_conversations(&mut self) -> Vec<AppAction> {
        match self.conversation_page {
            Some(meta) if meta.has_more() => self.load_conversations(meta.current_page + 1),
            _ => vec![],
        }
    }

    /// Open a conversation.
    ///
    /// Once the snapshot arrives the store subscribes to the conversation's
    /// channel and marks it as read.
    pub fn load_conversation(&mut self, conversation_id: ConversationId) -> Vec<AppAction> {
        self.loading = true;
        vec![AppAction::FetchConversation { conversation_id, page: 1 }]
    }

    /// Load the next page of older messages of the open conversation.
    pub fn load_older_messages(&mut self) -> Vec<AppAction> {
        match (self.current_conversation, self.message_page) {
            (Some(conversation_id), Some(meta)) if meta.has_more() => {
                self.loading = true;
                vec![AppAction::FetchConversation { conversation_id, page: meta.current_page + 1 }]
            },
            _ => vec![],
        }
    }

    /// Send a text message. Blank content is rejected locally.
    pub fn send_message(
        &mut self,
        conversation_id: ConversationId,
        content: &str,
    ) -> Vec<AppAction> {
        let content = content.trim();
        if content.is_empty() {
            tracing::debug!(conversation_id, "ignoring empty message");
            return vec![];
        }

        self.sending = true;
        vec![AppAction::SendMessage { conversation_id, request: SendMessageRequest::text(content) }]
    }

    /// Start a conversation and open it.
    pub fn create_conversation(&mut self, request: CreateConversationRequest) -> Vec<AppAction> {
        self.loading = true;
        vec![AppAction::CreateConversation { request }]
    }

    /// Tell the other side the user is typing. No-op without an open
    /// conversation.
    pub fn start_typing(&self) -> Vec<AppAction> {
        self.typing_command(ChannelCommand::Typing)
    }

    /// Tell the other side the user stopped typing. No-op without an open
    /// conversation.
    pub fn stop_typing(&self) -> Vec<AppAction> {
        self.typing_command(ChannelCommand::StopTyping)
    }

    fn typing_command(&self, command: ChannelCommand) -> Vec<AppAction> {
        if self.current_conversation.is_none() {
            return vec![];
        }
        vec![AppAction::Perform { command }]
    }

    /// Dismiss the REST error.
    pub fn clear_error(&mut self) {
        self.error = None;
    }

    /// Take the last failed send back, e.g. to refill the compose box.
    pub fn take_failed_draft(&mut self) -> Option<FailedDraft> {
        self.failed_draft.take()
    }

    /// Broker connectivity as last reported.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Last connection error.
    pub fn connection_error(&self) -> Option<&ConnectionError> {
        self.connection_error.as_ref()
    }

    /// Subscription authorization failure.
    pub fn subscription_error(&self) -> Option<&str> {
        self.subscription_error.as_deref()
    }

    /// Last REST error.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Conversation list, most recent activity first.
    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Conversation summary by id.
    pub fn conversation(&self, conversation_id: ConversationId) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == conversation_id)
    }

    /// Check if another page of conversations exists.
    pub fn has_more_conversations(&self) -> bool {
        self.conversation_page.is_some_and(|meta| meta.has_more())
    }

    /// Currently open conversation.
    pub fn current_conversation_id(&self) -> Option<ConversationId> {
        self.current_conversation
    }

    /// Messages of the open conversation, oldest first.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Check if older messages can be loaded.
    pub fn has_more_messages(&self) -> bool {
        self.message_page.is_some_and(|meta| meta.has_more())
    }

    /// Users typing in a conversation, ordered by user id.
    pub fn typing_users(&self, conversation_id: ConversationId) -> Vec<&User> {
        let mut users: Vec<&User> = self
            .typing
            .values()
            .filter(|indicator| indicator.conversation_id == conversation_id)
            .map(|indicator| &indicator.user)
            .collect();
        users.sort_by_key(|user| user.id);
        users
    }

    /// All typing indicators.
    pub fn typing_indicators(&self) -> impl Iterator<Item = &TypingIndicator> {
        self.typing.values()
    }

    /// Last failed send.
    pub fn failed_draft(&self) -> Option<&FailedDraft> {
        self.failed_draft.as_ref()
    }

    /// A load is in flight.
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// A send is in flight.
    pub fn is_sending(&self) -> bool {
        self.sending
    }
}
