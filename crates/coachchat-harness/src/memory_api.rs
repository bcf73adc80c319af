//! In-memory REST API and credential store.
//!
//! [`MemoryApi`] keeps conversations and messages in memory, assigns ids and
//! paginates like the server (page 1 holds the newest messages). Each
//! endpoint can be scripted to fail with [`MemoryApi::fail_next`].

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use coachchat_app::{
    ApiError, ChatApi, ConversationDetail, ConversationPage, CreateConversationRequest,
    CredentialError, CredentialStore, PageMeta, SendMessageRequest,
};
use coachchat_core::{
    Conversation, ConversationId, Message, MessageId, User, UserId, config::TOKEN_KEY,
};

use crate::fixtures;

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// REST endpoints of the chat API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// `get_conversations`
    GetConversations,
    /// `get_conversation`
    GetConversation,
    /// `create_conversation`
    CreateConversation,
    /// `send_message`
    SendMessage,
    /// `mark_conversation_as_read`
    MarkAsRead,
}

struct ApiState {
    user_id: UserId,
    page_size: usize,
    conversations: Vec<Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    next_message_id: MessageId,
    next_conversation_id: ConversationId,
    failures: HashMap<Endpoint, VecDeque<ApiError>>,
    calls: Vec<Endpoint>,
}

impl ApiState {
    fn begin(&mut self, endpoint: Endpoint) -> Result<(), ApiError> {
        self.calls.push(endpoint);
        match self.failures.get_mut(&endpoint).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn conversation_mut(&mut self, id: ConversationId) -> Result<&mut Conversation, ApiError> {
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| ApiError::Http { status: 404, message: "conversation not found".into() })
    }

    fn store_message(
        &mut self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> Message {
        self.next_message_id += 1;
        let message =
            fixtures::message(self.next_message_id, conversation_id, sender_id, content);
        self.messages.entry(conversation_id).or_default().push(message.clone());

        if let Some(pos) = self.conversations.iter().position(|c| c.id == conversation_id) {
            let mut conversation = self.conversations.remove(pos);
            conversation.record_message(&message);
            if sender_id != self.user_id {
                conversation.unread_count += 1;
            }
            self.conversations.insert(0, conversation);
        }
        message
    }
}

fn total_pages(len: usize, page_size: usize) -> u32 {
    len.div_ceil(page_size.max(1)).max(1) as u32
}

/// In-memory chat API.
pub struct MemoryApi {
    state: Mutex<ApiState>,
}

impl MemoryApi {
    /// Create an empty API acting as user `user_id`.
    pub fn new(user_id: UserId) -> Self {
        Self {
            state: Mutex::new(ApiState {
                user_id,
                page_size: DEFAULT_PAGE_SIZE,
                conversations: Vec::new(),
                messages: HashMap::new(),
                next_message_id: 0,
                next_conversation_id: 0,
                failures: HashMap::new(),
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ApiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the page size for both list endpoints.
    pub fn set_page_size(&self, page_size: usize) {
        self.lock().page_size = page_size.max(1);
    }

    /// Add an empty conversation with `participant`.
    pub fn add_conversation(&self, id: ConversationId, participant: User) {
        let mut state = self.lock();
        let mut conversation = Conversation::new(id);
        conversation.participants.push(participant);
        state.conversations.insert(0, conversation);
        state.next_conversation_id = state.next_conversation_id.max(id);
    }

    /// Store a message as if another client had sent it. Returns it with its
    /// assigned id, ready to be echoed through the broker.
    pub fn add_message(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: &str,
    ) -> Message {
        self.lock().store_message(conversation_id, sender_id, content)
    }

    /// Make the next call to `endpoint` fail with `error`.
    pub fn fail_next(&self, endpoint: Endpoint, error: ApiError) {
        self.lock().failures.entry(endpoint).or_default().push_back(error);
    }

    /// Endpoints called so far, in order.
    pub fn calls(&self) -> Vec<Endpoint> {
        self.lock().calls.clone()
    }

    /// Number of calls to `endpoint`.
    pub fn call_count(&self, endpoint: Endpoint) -> usize {
        self.lock().calls.iter().filter(|called| **called == endpoint).count()
    }

    /// Server-side unread count of a conversation.
    pub fn unread_count(&self, conversation_id: ConversationId) -> Option<u32> {
        self.lock().conversations.iter().find(|c| c.id == conversation_id).map(|c| c.unread_count)
    }
}

#[async_trait]
impl ChatApi for MemoryApi {
    async fn get_conversations(&self, page: u32) -> Result<ConversationPage, ApiError> {
        let mut state = self.lock();
        state.begin(Endpoint::GetConversations)?;

        let size = state.page_size;
        let skip = (page.max(1) as usize - 1) * size;
        let conversations = state.conversations.iter().skip(skip).take(size).cloned().collect();
        let meta = PageMeta {
            current_page: page.max(1),
            total_pages: total_pages(state.conversations.len(), size),
        };
        Ok(ConversationPage { conversations, meta })
    }

    async fn get_conversation(
        &self,
        conversation_id: ConversationId,
        page: u32,
    ) -> Result<ConversationDetail, ApiError> {
        let mut state = self.lock();
        state.begin(Endpoint::GetConversation)?;

        let conversation = state.conversation_mut(conversation_id)?.clone();
        let size = state.page_size;
        let all = state.messages.get(&conversation_id).map(Vec::as_slice).unwrap_or_default();

        let end = all.len().saturating_sub((page.max(1) as usize - 1) * size);
        let start = end.saturating_sub(size);
        let messages = all[start..end].to_vec();
        let meta =
            PageMeta { current_page: page.max(1), total_pages: total_pages(all.len(), size) };

        Ok(ConversationDetail { conversation, messages, meta })
    }

    async fn create_conversation(
        &self,
        request: CreateConversationRequest,
    ) -> Result<Conversation, ApiError> {
        let mut state = self.lock();
        state.begin(Endpoint::CreateConversation)?;

        state.next_conversation_id += 1;
        let id = state.next_conversation_id;
        let mut conversation = Conversation::new(id);
        conversation.participants.push(fixtures::user(request.participant_id, "Client", ""));
        state.conversations.insert(0, conversation);

        if let Some(content) = request.initial_message.filter(|c| !c.trim().is_empty()) {
            let sender = state.user_id;
            state.store_message(id, sender, &content);
        }

        Ok(state.conversation_mut(id)?.clone())
    }

    async fn send_message(
        &self,
        conversation_id: ConversationId,
        request: SendMessageRequest,
    ) -> Result<Message, ApiError> {
        let mut state = self.lock();
        state.begin(Endpoint::SendMessage)?;

        state.conversation_mut(conversation_id)?;
        let sender = state.user_id;
        let mut message = state.store_message(conversation_id, sender, &request.content);
        message.message_type = request.message_type;
        Ok(message)
    }

    async fn mark_conversation_as_read(
        &self,
        conversation_id: ConversationId,
    ) -> Result<(), ApiError> {
        let mut state = self.lock();
        state.begin(Endpoint::MarkAsRead)?;

        state.conversation_mut(conversation_id)?.unread_count = 0;
        Ok(())
    }
}

/// In-memory credential store.
#[derive(Default)]
pub struct MemoryCredentials {
    items: Mutex<HashMap<String, String>>,
    failure: Mutex<Option<String>>,
}

impl MemoryCredentials {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding an auth token.
    pub fn with_token(token: &str) -> Self {
        let store = Self::new();
        store.set(TOKEN_KEY, token);
        store
    }

    /// Store `value` under `key`.
    pub fn set(&self, key: &str, value: &str) {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    /// Remove every item.
    pub fn clear(&self) {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Make every lookup fail with `reason`, or succeed again with `None`.
    pub fn set_failure(&self, reason: Option<&str>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = reason.map(str::to_string);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn get_item(&self, key: &str) -> Result<Option<String>, CredentialError> {
        if let Some(reason) = self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone() {
            return Err(CredentialError(reason));
        }
        Ok(self.items.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_with_messages(count: usize) -> MemoryApi {
        let api = MemoryApi::new(1);
        api.set_page_size(2);
        api.add_conversation(10, fixtures::user(2, "Jo", "Client"));
        for i in 0..count {
            api.add_message(10, 2, &format!("hi {i}"));
        }
        api
    }

    #[tokio::test]
    async fn first_page_holds_newest_messages() {
        let api = api_with_messages(5);

        let page1 = api.get_conversation(10, 1).await.unwrap();
        let ids: Vec<_> = page1.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![4, 5]);
        assert_eq!(page1.meta, PageMeta { current_page: 1, total_pages: 3 });

        let page3 = api.get_conversation(10, 3).await.unwrap();
        let ids: Vec<_> = page3.messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[tokio::test]
    async fn scripted_failure_applies_once() {
        let api = api_with_messages(0);
        api.fail_next(Endpoint::MarkAsRead, ApiError::Network("offline".into()));

        assert!(api.mark_conversation_as_read(10).await.is_err());
        assert!(api.mark_conversation_as_read(10).await.is_ok());
        assert_eq!(api.call_count(Endpoint::MarkAsRead), 2);
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let api = MemoryApi::new(1);
        let err = api.get_conversation(99, 1).await.unwrap_err();
        assert_eq!(err, ApiError::Http { status: 404, message: "conversation not found".into() });
    }

    #[tokio::test]
    async fn credentials_lookup_and_failure() {
        let store = MemoryCredentials::with_token("abc");
        assert_eq!(store.get_item(TOKEN_KEY).await, Ok(Some("abc".into())));

        store.set_failure(Some("keychain locked"));
        assert!(store.get_item(TOKEN_KEY).await.is_err());
    }
}
