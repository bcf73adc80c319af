//! Simulated broker implementing the Broker trait.
//!
//! `SimBroker` stands in for the WebSocket pub/sub client. It records every
//! operation the runtime performs on it and lets tests inject channel
//! callbacks, payloads and transport drops. Opens succeed unless a failure
//! was scripted with [`SimBroker::fail_next_opens`].
//!
//! Clones share state, so a test can keep a handle while the runtime owns
//! the broker (e.g. to call [`SimBroker::finish`] during `Runtime::run`).

use std::{
    collections::{BTreeSet, VecDeque},
    future::{self, Future},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use coachchat_app::{Broker, BrokerEvent};
use coachchat_core::{ChannelCallback, ConversationId, SubscriptionKey, SubscriptionParams};
use serde_json::Value;
use tokio::sync::Notify;

/// Error type for the simulated broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimBrokerError(pub String);

impl std::fmt::Display for SimBrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sim broker: {}", self.0)
    }
}

impl std::error::Error for SimBrokerError {}

/// Operation performed on the broker, in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerCall {
    /// Transport creation.
    Open {
        /// Requested URL.
        url: String,
    },
    /// Transport teardown.
    Close,
    /// Channel subscription creation.
    Subscribe {
        /// Subscription key.
        key: SubscriptionKey,
        /// Channel parameters.
        params: SubscriptionParams,
    },
    /// Channel subscription teardown.
    Unsubscribe {
        /// Subscription key.
        key: SubscriptionKey,
    },
    /// Channel action.
    Perform {
        /// Subscription key.
        key: SubscriptionKey,
        /// Action name.
        action: String,
        /// Action data.
        data: Value,
    },
}

#[derive(Default)]
struct SharedState {
    open: bool,
    probe_error: bool,
    finished: bool,
    open_failures: VecDeque<String>,
    live: BTreeSet<SubscriptionKey>,
    calls: Vec<BrokerCall>,
    events: VecDeque<BrokerEvent>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<SharedState>,
    wake: Notify,
}

/// Simulated broker client.
#[derive(Clone, Default)]
pub struct SimBroker {
    shared: Arc<Shared>,
}

impl SimBroker {
    /// Create a closed broker with no scripted failures.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SharedState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an event for the runtime.
    pub fn inject(&self, event: BrokerEvent) {
        self.lock().events.push_back(event);
        self.shared.wake.notify_one();
    }

    /// Queue a lifecycle callback for a subscription.
    pub fn inject_callback(&self, key: SubscriptionKey, callback: ChannelCallback) {
        self.inject(BrokerEvent::Channel { key, callback });
    }

    /// Queue a payload received on a subscription.
    pub fn inject_payload(&self, key: SubscriptionKey, payload: Value) {
        self.inject_callback(key, ChannelCallback::Received(payload));
    }

    /// Drop the transport: closes it, kills every subscription and queues
    /// the close notification.
    pub fn inject_close(&self, reason: &str) {
        tracing::debug!(reason, "injecting transport close");
        {
            let mut state = self.lock();
            state.open = false;
            state.live.clear();
        }
        self.inject(BrokerEvent::Closed { reason: reason.to_string() });
    }

    /// Make the next `count` opens fail with `reason`.
    pub fn fail_next_opens(&self, count: usize, reason: &str) {
        let mut state = self.lock();
        state.open_failures.extend(std::iter::repeat_n(reason.to_string(), count));
    }

    /// Make the open/closed probe fail.
    pub fn set_probe_error(&self, failing: bool) {
        self.lock().probe_error = failing;
    }

    /// Shut the broker down. `next_event` returns `None` once the queue
    /// drains.
    pub fn finish(&self) {
        self.lock().finished = true;
        self.shared.wake.notify_one();
    }

    /// Check if events are queued.
    pub fn has_pending(&self) -> bool {
        !self.lock().events.is_empty()
    }

    /// Every operation performed so far.
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.lock().calls.clone()
    }

    /// Forget recorded operations.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// URLs of every transport creation.
    pub fn opened_urls(&self) -> Vec<String> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Open { url } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of transport creations.
    pub fn open_count(&self) -> usize {
        self.opened_urls().len()
    }

    /// Keys and conversations of every subscription creation.
    pub fn subscribes(&self) -> Vec<(SubscriptionKey, ConversationId)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Subscribe { key, params } => Some((*key, params.conversation_id)),
                _ => None,
            })
            .collect()
    }

    /// Keys of every subscription teardown.
    pub fn unsubscribes(&self) -> Vec<SubscriptionKey> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Unsubscribe { key } => Some(*key),
                _ => None,
            })
            .collect()
    }

    /// Action names and data of every channel action.
    pub fn performs(&self) -> Vec<(String, Value)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                BrokerCall::Perform { action, data, .. } => Some((action.clone(), data.clone())),
                _ => None,
            })
            .collect()
    }

    /// Subscriptions the broker currently considers live.
    pub fn live_subscriptions(&self) -> Vec<SubscriptionKey> {
        self.lock().live.iter().copied().collect()
    }

    /// Most recently created subscription, if still live.
    pub fn active_key(&self) -> Option<SubscriptionKey> {
        let state = self.lock();
        state.live.iter().next_back().copied()
    }
}

impl Broker for SimBroker {
    type Error = SimBrokerError;

    fn open(&mut self, url: &str) -> impl Future<Output = Result<(), Self::Error>> + Send {
        let mut state = self.lock();
        state.calls.push(BrokerCall::Open { url: url.to_string() });
        state.live.clear();

        let result = match state.open_failures.pop_front() {
            Some(reason) => {
                tracing::debug!(url, %reason, "scripted open failure");
                state.open = false;
                Err(SimBrokerError(reason))
            },
            None => {
                state.open = true;
                Ok(())
            },
        };
        future::ready(result)
    }

    fn is_open(&self) -> Result<bool, Self::Error> {
        let state = self.lock();
        if state.probe_error {
            return Err(SimBrokerError("probe failed".into()));
        }
        Ok(state.open)
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.calls.push(BrokerCall::Close);
        state.open = false;
        state.live.clear();
    }

    fn subscribe(
        &mut self,
        key: SubscriptionKey,
        params: &SubscriptionParams,
    ) -> Result<(), Self::Error> {
        let mut state = self.lock();
        state.calls.push(BrokerCall::Subscribe { key, params: params.clone() });
        if !state.open {
            return Err(SimBrokerError("transport closed".into()));
        }
        state.live.insert(key);
        Ok(())
    }

    fn unsubscribe(&mut self, key: SubscriptionKey) {
        let mut state = self.lock();
        state.calls.push(BrokerCall::Unsubscribe { key });
        state.live.remove(&key);
    }

    fn perform(
        &mut self,
        key: SubscriptionKey,
        action: &str,
        data: Value,
    ) -> Result<(), Self::Error> {
        let mut state = self.lock();
        state.calls.push(BrokerCall::Perform { key, action: action.to_string(), data });
        if !state.live.contains(&key) {
            return Err(SimBrokerError(format!("no live subscription {key}")));
        }
        Ok(())
    }

    fn next_event(&mut self) -> impl Future<Output = Option<BrokerEvent>> + Send {
        async move {
            loop {
                {
                    let mut state = self.lock();
                    if let Some(event) = state.events.pop_front() {
                        return Some(event);
                    }
                    if state.finished {
                        return None;
                    }
                }
                self.shared.wake.notified().await;
            }
        }
    }
}
