//! A runtime wired to the simulated collaborators.
//!
//! [`SimSession`] owns a [`Runtime`] over [`SimBroker`] and keeps handles to
//! the in-memory API and credential store so tests can script them.
//! Retry timers run on tokio's clock; tests use `start_paused` so
//! [`SimSession::fire_reconnect`] completes without real waiting.

use std::sync::{Arc, Mutex, PoisonError};

use coachchat_app::{ChatApi, CredentialStore, Runtime};
use coachchat_core::{ChatConfig, ChatEvent, ListenerId, SystemEnv, User, UserId};

use crate::{
    fixtures,
    invariants::{InvariantRegistry, StoreSnapshot},
    memory_api::{MemoryApi, MemoryCredentials},
    sim_broker::SimBroker,
};

/// Token stored by [`SimSession::new`].
pub const SIM_TOKEN: &str = "sim-token";

/// Runtime type driven by the harness.
pub type SimRuntime = Runtime<SimBroker, SystemEnv>;

/// Every [`ChatEvent`] dispatched to a recording listener.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<ChatEvent>>>);

impl EventLog {
    /// Events recorded so far.
    pub fn events(&self) -> Vec<ChatEvent> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Recorded event kinds, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ChatEvent::kind).collect()
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn push(&self, event: &ChatEvent) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(event.clone());
    }
}

/// Runtime plus scriptable collaborators.
pub struct SimSession {
    /// The runtime under test.
    pub runtime: SimRuntime,
    /// REST double.
    pub api: Arc<MemoryApi>,
    /// Credential store double.
    pub credentials: Arc<MemoryCredentials>,
    /// The signed-in user.
    pub me: User,
    invariants: Option<InvariantRegistry>,
}

impl SimSession {
    /// Session for user 1 with a stored token.
    pub fn new(config: ChatConfig) -> Self {
        Self::with_credentials(config, MemoryCredentials::with_token(SIM_TOKEN))
    }

    /// Session for user 1 with the given credential store.
    pub fn with_credentials(config: ChatConfig, credentials: MemoryCredentials) -> Self {
        let me_id: UserId = 1;
        let api = Arc::new(MemoryApi::new(me_id));
        let credentials = Arc::new(credentials);
        let chat_api: Arc<dyn ChatApi> = Arc::clone(&api) as Arc<dyn ChatApi>;
        let store: Arc<dyn CredentialStore> = Arc::clone(&credentials) as Arc<dyn CredentialStore>;
        let runtime = Runtime::new(config, SimBroker::new(), SystemEnv, chat_api, store);

        Self {
            runtime,
            api,
            credentials,
            me: fixtures::user(me_id, "Casey", "Coach"),
            invariants: None,
        }
    }

    /// Check store invariants after every [`SimSession::settle`].
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// The simulated broker.
    pub fn broker(&self) -> &SimBroker {
        self.runtime.broker()
    }

    /// Register a listener recording every event.
    pub fn record_events(&mut self) -> (EventLog, ListenerId) {
        let log = EventLog::default();
        let sink = log.clone();
        let id = self.runtime.add_listener(move |event| {
            sink.push(event);
            Ok(())
        });
        (log, id)
    }

    /// Connect and wait for the broker.
    pub async fn connect(&mut self) {
        self.runtime.connect().await;
        self.check_invariants("after connect");
    }

    /// Process every queued broker event. Armed retry timers are left alone.
    pub async fn settle(&mut self) {
        while self.broker().has_pending() {
            self.runtime.step().await;
        }
        self.check_invariants("after settle");
    }

    /// Wait for the armed retry timer and fire it. Returns `false` if none
    /// was armed.
    pub async fn fire_reconnect(&mut self) -> bool {
        if self.runtime.pending_reconnect().is_none() || self.broker().has_pending() {
            return false;
        }
        self.runtime.step().await;
        self.check_invariants("after reconnect timer");
        true
    }

    /// Check invariants against the current store, if enabled.
    pub fn check_invariants(&self, context: &str) {
        if let Some(registry) = &self.invariants {
            registry.assert_all(&StoreSnapshot::from_store(self.runtime.store()), context);
        }
    }
}
