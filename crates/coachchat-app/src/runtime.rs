//! Runtime for chat orchestration.
//!
//! The Runtime drives the chat event loop, coordinating between:
//! - [`ConnectionManager`] and [`ChannelSubscription`]: broker state machines
//! - [`EventDispatcher`]: listener fan-out
//! - [`ChatStore`]: UI state
//! - [`Broker`], [`ChatApi`], [`CredentialStore`]: the outside world
//!
//! Every entry point handles its own failures. Nothing here returns an error
//! to the caller; failures become [`ChatEvent`]s or store error fields.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use coachchat_core::{
    CallbackOutcome, ChannelCommand, ChannelSubscription, ChatConfig, ChatEvent, ConnectionAction,
    ConnectionManager, ConnectionState, ConversationId, Environment, EventDispatcher,
    ListenerError, ListenerId, SubscriptionAction, config::TOKEN_KEY,
};

use crate::{
    AppAction, AppEvent, Broker, BrokerEvent, ChatApi, ChatStore, CreateConversationRequest,
    CredentialStore,
};

/// Retry timer armed after an unexpected disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReconnect<I> {
    /// Attempt the timer belongs to.
    pub attempt: u32,
    /// Backoff delay it was armed with.
    pub delay: Duration,
    /// When it fires.
    pub deadline: I,
}

enum Wake {
    Broker(Option<BrokerEvent>),
    Timer,
}

/// Runtime that owns the chat state machines and executes their actions.
///
/// # Type Parameters
///
/// - `B`: Broker client
/// - `E`: Environment providing time for the retry timer
pub struct Runtime<B, E>
where
    B: Broker,
    E: Environment,
{
    broker: B,
    env: E,
    api: Arc<dyn ChatApi>,
    credentials: Arc<dyn CredentialStore>,
    connection: ConnectionManager,
    subscription: ChannelSubscription,
    dispatcher: EventDispatcher<ChatEvent>,
    store: ChatStore,
    pending_reconnect: Option<PendingReconnect<E::Instant>>,
}

impl<B, E> Runtime<B, E>
where
    B: Broker,
    E: Environment,
{
    /// Create a disconnected runtime.
    pub fn new(
        config: ChatConfig,
        broker: B,
        env: E,
        api: Arc<dyn ChatApi>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            broker,
            env,
            api,
            credentials,
            connection: ConnectionManager::new(config),
            subscription: ChannelSubscription::new(),
            dispatcher: EventDispatcher::new(),
            store: ChatStore::new(),
            pending_reconnect: None,
        }
    }

    /// Connect, then run the event loop until the broker shuts down.
    pub async fn run(&mut self) {
        self.connect().await;
        while self.step().await {}
        tracing::info!("broker client shut down");
    }

    /// Process one broker event or one fired retry timer.
    ///
    /// Returns `false` once the broker shut down for good.
    pub async fn step(&mut self) -> bool {
        let wake = match self.pending_reconnect {
            Some(pending) => {
                let now = self.env.now();
                let wait =
                    if pending.deadline > now { pending.deadline - now } else { Duration::ZERO };
                tokio::select! {
                    biased;
                    event = self.broker.next_event() => Wake::Broker(event),
                    () = self.env.sleep(wait) => Wake::Timer,
                }
            },
            None => Wake::Broker(self.broker.next_event().await),
        };

        match wake {
            Wake::Broker(Some(event)) => {
                self.handle_broker_event(event).await;
                true
            },
            Wake::Broker(None) => false,
            Wake::Timer => {
                self.fire_pending_reconnect().await;
                true
            },
        }
    }

    /// Connect to the broker.
    ///
    /// No-op while a connect is in flight, when already connected, or when
    /// no auth token is stored.
    pub async fn connect(&mut self) {
        let actions = self.connection.connect();
        self.execute_connection(actions).await;
    }

    /// Unsubscribe, tear down the transport and reset the backoff.
    ///
    /// Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        let actions = self.subscription.unsubscribe_from_conversation();
        self.apply_subscription_actions(actions);

        let actions = self.connection.disconnect();
        self.execute_connection_sync(actions);
    }

    /// Check if the broker transport is open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected(self.broker.is_open())
    }

    /// Subscribe to a conversation's channel, replacing any active one.
    ///
    /// No-op with a logged diagnostic while disconnected.
    pub fn subscribe_to_conversation(&mut self, conversation_id: ConversationId) {
        let connected = self.is_connected();
        let actions = self.subscription.subscribe_to_conversation(conversation_id, connected);
        self.apply_subscription_actions(actions);
    }

    /// Close the active subscription. No-op if none.
    pub fn unsubscribe_from_conversation(&mut self) {
        let actions = self.subscription.unsubscribe_from_conversation();
        self.apply_subscription_actions(actions);
    }

    /// Conversation of the active subscription.
    pub fn current_conversation_id(&self) -> Option<ConversationId> {
        self.subscription.current_conversation_id()
    }

    /// Perform a command on the active subscription. No-op if none.
    pub fn perform(&mut self, command: ChannelCommand) {
        match self.subscription.perform(command) {
            Some(action) => self.apply_subscription_actions(vec![action]),
            None => tracing::debug!(?command, "no active subscription"),
        }
    }

    /// Handle a notification from the broker.
    pub async fn handle_broker_event(&mut self, event: BrokerEvent) {
        let outcome = match event {
            BrokerEvent::Channel { key, callback } => {
                self.subscription.handle_callback(key, callback)
            },
            BrokerEvent::Closed { reason } => {
                if self.connection.state() != ConnectionState::Connected {
                    tracing::debug!(%reason, state = ?self.connection.state(), "transport closed while not connected");
                    return;
                }
                tracing::warn!(%reason, "broker transport closed");
                self.subscription.handle_transport_closed()
            },
        };
        self.apply_callback_outcome(outcome).await;
    }

    /// Fire the armed retry timer now, if any.
    pub async fn fire_pending_reconnect(&mut self) {
        let Some(pending) = self.pending_reconnect.take() else {
            return;
        };
        tracing::debug!(attempt = pending.attempt, "reconnect timer fired");
        let actions = self.connection.handle_reconnect_timer(pending.attempt);
        self.execute_connection(actions).await;
    }

    /// Load a page of the conversation list.
    pub async fn load_conversations(&mut self, page: u32) {
        let actions = self.store.load_conversations(page);
        self.execute_app_actions(actions).await;
    }

    /// Load the next page of the conversation list.
    pub async fn load_more_conversations(&mut self) {
        let actions = self.store.load_more_conversations();
        self.execute_app_actions(actions).await;
    }

    /// Open a conversation: fetch it, subscribe to it and mark it read.
    pub async fn load_conversation(&mut self, conversation_id: ConversationId) {
        let actions = self.store.load_conversation(conversation_id);
        self.execute_app_actions(actions).await;
    }

    /// Load older messages of the open conversation.
    pub async fn load_older_messages(&mut self) {
        let actions = self.store.load_older_messages();
        self.execute_app_actions(actions).await;
    }

    /// Send a text message.
    pub async fn send_message(&mut self, conversation_id: ConversationId, content: &str) {
        let actions = self.store.send_message(conversation_id, content);
        self.execute_app_actions(actions).await;
    }

    /// Start a conversation and open it.
    pub async fn create_conversation(&mut self, request: CreateConversationRequest) {
        let actions = self.store.create_conversation(request);
        self.execute_app_actions(actions).await;
    }

    /// Signal that the user is typing.
    pub async fn start_typing(&mut self) {
        let actions = self.store.start_typing();
        self.execute_app_actions(actions).await;
    }

    /// Signal that the user stopped typing.
    pub async fn stop_typing(&mut self) {
        let actions = self.store.stop_typing();
        self.execute_app_actions(actions).await;
    }

    /// Register a listener for every [`ChatEvent`].
    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&ChatEvent) -> Result<(), ListenerError> + Send + 'static,
    {
        self.dispatcher.add_listener(listener)
    }

    /// Remove a listener. Returns `false` if `id` was not registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.dispatcher.remove_listener(id)
    }

    /// Get a reference to the chat store
    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    /// Get a mutable reference to the chat store
    pub fn store_mut(&mut self) -> &mut ChatStore {
        &mut self.store
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Reconnect attempts since the last successful connect.
    pub fn reconnect_attempt(&self) -> u32 {
        self.connection.reconnect_attempt()
    }

    /// The armed retry timer, if any.
    pub fn pending_reconnect(&self) -> Option<PendingReconnect<E::Instant>> {
        self.pending_reconnect
    }

    /// Get a reference to the broker
    pub fn broker(&self) -> &B {
        &self.broker
    }

    async fn apply_callback_outcome(&mut self, outcome: CallbackOutcome) {
        let mut app_actions = Vec::new();
        for event in outcome.events {
            app_actions.extend(self.emit(event));
        }

        if outcome.reconnect {
            let actions = self.connection.handle_unexpected_disconnect();
            self.execute_connection(actions).await;
        }

        self.execute_app_actions(app_actions).await;
    }

    /// Execute connection actions, feeding results back to the manager.
    async fn execute_connection(&mut self, actions: Vec<ConnectionAction>) {
        let mut pending: VecDeque<ConnectionAction> = actions.into();
        let mut app_actions = Vec::new();

        while let Some(action) = pending.pop_front() {
            match action {
                ConnectionAction::FetchToken => {
                    let token = self.lookup_token().await;
                    pending.extend(self.connection.handle_token(token.as_deref()));
                },
                ConnectionAction::Open { url } => match self.broker.open(&url).await {
                    Ok(()) => {
                        pending.extend(self.connection.handle_opened());
                        if self.connection.state() == ConnectionState::Connected {
                            let actions = self.subscription.resubscribe();
                            self.apply_subscription_actions(actions);
                        }
                    },
                    Err(e) => pending.extend(self.connection.handle_open_failed(e.to_string())),
                },
                ConnectionAction::Close => self.broker.close(),
                ConnectionAction::ScheduleReconnect { attempt, delay } => {
                    let deadline = self.env.now() + delay;
                    self.pending_reconnect = Some(PendingReconnect { attempt, delay, deadline });
                },
                ConnectionAction::Emit(event) => app_actions.extend(self.emit(event)),
            }
        }

        self.execute_app_actions(app_actions).await;
    }

    /// Execute connection actions synchronously (for use in sync contexts).
    fn execute_connection_sync(&mut self, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Close => self.broker.close(),
                ConnectionAction::Emit(event) => {
                    let app_actions = self.emit(event);
                    if !app_actions.is_empty() {
                        tracing::warn!(?app_actions, "unexpected store actions in sync context");
                    }
                },
                action @ (ConnectionAction::FetchToken
                | ConnectionAction::Open { .. }
                | ConnectionAction::ScheduleReconnect { .. }) => {
                    tracing::warn!(?action, "unexpected connection action in sync context");
                },
            }
        }
    }

    /// Execute store actions, feeding results back to the store.
    async fn execute_app_actions(&mut self, actions: Vec<AppAction>) {
        let mut pending: VecDeque<AppAction> = actions.into();

        while let Some(action) = pending.pop_front() {
            let event = match action {
                AppAction::Subscribe { conversation_id } => {
                    self.subscribe_to_conversation(conversation_id);
                    continue;
                },
                AppAction::Perform { command } => {
                    self.perform(command);
                    continue;
                },
                AppAction::FetchConversations { page } => {
                    match self.api.get_conversations(page).await {
                        Ok(page) => AppEvent::ConversationsLoaded { page },
                        Err(error) => AppEvent::RequestFailed { error },
                    }
                },
                AppAction::FetchConversation { conversation_id, page } => {
                    match self.api.get_conversation(conversation_id, page).await {
                        Ok(detail) => AppEvent::ConversationLoaded { detail },
                        Err(error) => AppEvent::RequestFailed { error },
                    }
                },
                AppAction::CreateConversation { request } => {
                    match self.api.create_conversation(request).await {
                        Ok(conversation) => AppEvent::ConversationCreated { conversation },
                        Err(error) => AppEvent::RequestFailed { error },
                    }
                },
                AppAction::SendMessage { conversation_id, request } => {
                    let content = request.content.clone();
                    match self.api.send_message(conversation_id, request).await {
                        Ok(message) => AppEvent::MessageSent { message },
                        Err(error) => AppEvent::SendFailed { conversation_id, content, error },
                    }
                },
                AppAction::MarkAsRead { conversation_id } => {
                    match self.api.mark_conversation_as_read(conversation_id).await {
                        Ok(()) => AppEvent::MarkedRead { conversation_id },
                        Err(error) => AppEvent::RequestFailed { error },
                    }
                },
            };
            pending.extend(self.store.handle(event));
        }
    }

    fn apply_subscription_actions(&mut self, actions: Vec<SubscriptionAction>) {
        for action in actions {
            match action {
                SubscriptionAction::Subscribe { key, params } => {
                    if let Err(e) = self.broker.subscribe(key, &params) {
                        tracing::warn!(%key, error = %e, "failed to create subscription");
                    }
                },
                SubscriptionAction::Unsubscribe { key } => self.broker.unsubscribe(key),
                SubscriptionAction::Perform { key, action, data } => {
                    if let Err(e) = self.broker.perform(key, action, data) {
                        tracing::warn!(%key, action, error = %e, "failed to perform channel action");
                    }
                },
            }
        }
    }

    /// Dispatch to listeners, then reduce into the store.
    fn emit(&mut self, event: ChatEvent) -> Vec<AppAction> {
        tracing::debug!(kind = event.kind(), "chat event");
        self.dispatcher.dispatch(&event);
        self.store.handle(AppEvent::Chat(event))
    }

    async fn lookup_token(&self) -> Option<String> {
        match self.credentials.get_item(TOKEN_KEY).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(error = %e, "credential lookup failed");
                None
            },
        }
    }
}
