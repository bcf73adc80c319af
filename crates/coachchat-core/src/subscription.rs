//! Conversation channel subscription state machine.
//!
//! Tracks the single active [`Subscription`]. Switching conversations tears
//! down the old subscription before the new one is created. Broker callbacks
//! are tagged with the [`SubscriptionKey`] they belong to, so callbacks from a
//! subscription that is no longer current (unsubscribed, rejected, or lost in
//! a transport drop) are recognized and treated as expected teardown.
//!
//! Like [`crate::ConnectionManager`], this is Sans-IO: methods return
//! [`SubscriptionAction`]s for the runtime to execute against the broker.

use std::fmt;

use serde_json::Value;

use crate::{
    event::ChatEvent,
    model::ConversationId,
    payload::{self, ChannelCommand, SubscriptionParams},
};

/// Identifies one subscription instance. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey(u64);

impl SubscriptionKey {
    /// Raw key value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A conversation channel subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    /// Instance key.
    pub key: SubscriptionKey,
    /// Subscribed conversation.
    pub conversation_id: ConversationId,
    /// Torn down on purpose; its `disconnected` callback must not reconnect.
    pub manually_closed: bool,
    /// Lost in an unexpected drop; awaiting re-subscription.
    pub dropped: bool,
}

impl Subscription {
    fn new(key: SubscriptionKey, conversation_id: ConversationId) -> Self {
        Self { key, conversation_id, manually_closed: false, dropped: false }
    }
}

/// Lifecycle callbacks the broker delivers for a subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCallback {
    /// Subscription confirmed.
    Connected,
    /// Subscription lost.
    Disconnected,
    /// Payload received on the channel.
    Received(Value),
    /// Server denied the subscription.
    Rejected,
}

/// Broker operations requested by the subscription state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionAction {
    /// Create a channel subscription.
    Subscribe {
        /// Key to tag callbacks with.
        key: SubscriptionKey,
        /// Channel parameters.
        params: SubscriptionParams,
    },
    /// Close a channel subscription.
    Unsubscribe {
        /// Subscription to close.
        key: SubscriptionKey,
    },
    /// Perform a server action on a subscription.
    Perform {
        /// Target subscription.
        key: SubscriptionKey,
        /// Server action name.
        action: &'static str,
        /// Action data.
        data: Value,
    },
}

/// Result of handling a callback.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallbackOutcome {
    /// Events to dispatch, in order.
    pub events: Vec<ChatEvent>,
    /// The connection dropped unexpectedly; run the reconnection algorithm.
    pub reconnect: bool,
}

/// Single-conversation subscription state machine.
#[derive(Debug, Clone, Default)]
pub struct ChannelSubscription {
    /// The live subscription, if any.
    current: Option<Subscription>,
    /// Most recently retired subscription.
    last_closed: Option<Subscription>,
    /// Next key to hand out.
    next_key: u64,
}

impl ChannelSubscription {
    /// Create with no active subscription.
    pub fn new() -> Self {
        Self::default()
    }

    /// Conversation of the active subscription. `None` if not subscribed.
    pub fn current_conversation_id(&self) -> Option<ConversationId> {
        self.current.as_ref().map(|sub| sub.conversation_id)
    }

    /// The active subscription. `None` if not subscribed.
    pub fn current(&self) -> Option<&Subscription> {
        self.current.as_ref()
    }

    /// Subscribe to `conversation_id`, replacing any active subscription.
    ///
    /// `connected` is the connection manager's view of the transport; when
    /// false this is a no-op with a logged diagnostic. Re-subscribing to the
    /// conversation that is already live is a no-op.
    pub fn subscribe_to_conversation(
        &mut self,
        conversation_id: ConversationId,
        connected: bool,
    ) -> Vec<SubscriptionAction> {
        if !connected {
            tracing::warn!(conversation_id, "cannot subscribe, broker not connected");
            return vec![];
        }

        if let Some(sub) = &self.current
            && sub.conversation_id == conversation_id
            && !sub.dropped
        {
            tracing::debug!(conversation_id, "already subscribed");
            return vec![];
        }

        let mut actions = self.unsubscribe_from_conversation();
        let key = self.allocate_key();
        self.current = Some(Subscription::new(key, conversation_id));
        tracing::debug!(conversation_id, %key, "subscribing to conversation");

        actions.push(SubscriptionAction::Subscribe {
            key,
            params: SubscriptionParams::new(conversation_id),
        });
        actions
    }

    /// Close the active subscription on purpose. No-op if none.
    pub fn unsubscribe_from_conversation(&mut self) -> Vec<SubscriptionAction> {
        let Some(mut sub) = self.current.take() else {
            return vec![];
        };

        sub.manually_closed = true;
        let key = sub.key;
        tracing::debug!(conversation_id = sub.conversation_id, %key, "unsubscribing");
        self.last_closed = Some(sub);

        vec![SubscriptionAction::Unsubscribe { key }]
    }

    /// Re-create a subscription lost in a transport drop.
    ///
    /// Called once the connection is back. No-op unless the active
    /// subscription was dropped.
    pub fn resubscribe(&mut self) -> Vec<SubscriptionAction> {
        let conversation_id = match &self.current {
            Some(sub) if sub.dropped => sub.conversation_id,
            _ => return vec![],
        };

        // The old instance died with the transport; nothing to unsubscribe.
        if let Some(mut old) = self.current.take() {
            old.manually_closed = true;
            self.last_closed = Some(old);
        }

        let key = self.allocate_key();
        self.current = Some(Subscription::new(key, conversation_id));
        tracing::info!(conversation_id, %key, "re-subscribing after reconnect");

        vec![SubscriptionAction::Subscribe { key, params: SubscriptionParams::new(conversation_id) }]
    }

    /// Build a typing command for the active subscription. `None` if not
    /// subscribed.
    pub fn perform(&self, command: ChannelCommand) -> Option<SubscriptionAction> {
        let sub = self.current.as_ref()?;
        Some(SubscriptionAction::Perform {
            key: sub.key,
            action: command.action(),
            data: command.data(sub.conversation_id),
        })
    }

    /// Handle a lifecycle callback from the broker.
    pub fn handle_callback(
        &mut self,
        key: SubscriptionKey,
        callback: ChannelCallback,
    ) -> CallbackOutcome {
        let Some(sub) = self.current.as_mut().filter(|sub| sub.key == key) else {
            self.handle_retired_callback(key, &callback);
            return CallbackOutcome::default();
        };

        match callback {
            ChannelCallback::Connected => {
                sub.dropped = false;
                CallbackOutcome { events: vec![ChatEvent::Connected], reconnect: false }
            },
            ChannelCallback::Disconnected => {
                if sub.manually_closed || sub.dropped {
                    return CallbackOutcome::default();
                }
                sub.dropped = true;
                tracing::warn!(conversation_id = sub.conversation_id, %key, "subscription dropped");
                CallbackOutcome { events: vec![ChatEvent::Disconnected], reconnect: true }
            },
            ChannelCallback::Received(value) => match payload::decode_payload(&value) {
                Ok(event) => CallbackOutcome { events: vec![event], reconnect: false },
                Err(e) if e.is_malformed() => {
                    tracing::debug!(error = %e, "dropping malformed payload");
                    CallbackOutcome::default()
                },
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring payload");
                    CallbackOutcome::default()
                },
            },
            ChannelCallback::Rejected => {
                let conversation_id = sub.conversation_id;
                tracing::warn!(conversation_id, %key, "subscription rejected by server");
                if let Some(mut rejected) = self.current.take() {
                    rejected.manually_closed = true;
                    self.last_closed = Some(rejected);
                }
                CallbackOutcome {
                    events: vec![ChatEvent::SubscriptionRejected { conversation_id }],
                    reconnect: false,
                }
            },
        }
    }

    /// The whole transport dropped.
    ///
    /// With a live subscription, this counts as that subscription dropping.
    /// Without one, the connection itself dropped. Either way one drop
    /// reconnects once: a later `Disconnected` callback for the same
    /// subscription is ignored.
    pub fn handle_transport_closed(&mut self) -> CallbackOutcome {
        match self.current.as_mut() {
            Some(sub) if sub.dropped || sub.manually_closed => CallbackOutcome::default(),
            Some(sub) => {
                sub.dropped = true;
                CallbackOutcome { events: vec![ChatEvent::Disconnected], reconnect: true }
            },
            None => CallbackOutcome { events: vec![ChatEvent::Disconnected], reconnect: true },
        }
    }

    fn handle_retired_callback(&self, key: SubscriptionKey, callback: &ChannelCallback) {
        let known = self.last_closed.as_ref().is_some_and(|sub| sub.key == key);
        match callback {
            ChannelCallback::Disconnected if known => {
                tracing::debug!(%key, "expected teardown of closed subscription");
            },
            ChannelCallback::Received(_) => {
                tracing::trace!(%key, "dropping payload for closed subscription");
            },
            _ => tracing::debug!(%key, ?callback, known, "callback for inactive subscription"),
        }
    }

    fn allocate_key(&mut self) -> SubscriptionKey {
        let key = SubscriptionKey(self.next_key);
        self.next_key += 1;
        key
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn subscribed(conversation_id: ConversationId) -> (ChannelSubscription, SubscriptionKey) {
        let mut subs = ChannelSubscription::new();
        let actions = subs.subscribe_to_conversation(conversation_id, true);
        match actions.as_slice() {
            [SubscriptionAction::Subscribe { key, .. }] => (subs, *key),
            other => panic!("expected Subscribe, got {other:?}"),
        }
    }

    #[test]
    fn subscribe_requires_connection() {
        let mut subs = ChannelSubscription::new();
        assert!(subs.subscribe_to_conversation(1, false).is_empty());
        assert_eq!(subs.current_conversation_id(), None);
    }

    #[test]
    fn switching_unsubscribes_old_first() {
        let (mut subs, first) = subscribed(1);

        let actions = subs.subscribe_to_conversation(2, true);
        match actions.as_slice() {
            [
                SubscriptionAction::Unsubscribe { key },
                SubscriptionAction::Subscribe { key: new_key, params },
            ] => {
                assert_eq!(*key, first);
                assert_ne!(*new_key, first);
                assert_eq!(params.conversation_id, 2);
            },
            other => panic!("unexpected actions {other:?}"),
        }
        assert_eq!(subs.current_conversation_id(), Some(2));
    }

    #[test]
    fn resubscribing_same_conversation_is_noop() {
        let (mut subs, _) = subscribed(1);
        assert!(subs.subscribe_to_conversation(1, true).is_empty());
    }

    #[test]
    fn unsubscribe_when_idle_is_noop() {
        let mut subs = ChannelSubscription::new();
        assert!(subs.unsubscribe_from_conversation().is_empty());
    }

    #[test]
    fn manual_unsubscribe_suppresses_reconnect() {
        let (mut subs, key) = subscribed(1);
        subs.unsubscribe_from_conversation();

        let outcome = subs.handle_callback(key, ChannelCallback::Disconnected);
        assert_eq!(outcome, CallbackOutcome::default());
        assert_eq!(subs.current_conversation_id(), None);
    }

    #[test]
    fn unexpected_drop_requests_reconnect_once() {
        let (mut subs, key) = subscribed(1);

        let outcome = subs.handle_callback(key, ChannelCallback::Disconnected);
        assert_eq!(outcome.events, vec![ChatEvent::Disconnected]);
        assert!(outcome.reconnect);

        // Same drop reported again by the transport
        assert!(!subs.handle_transport_closed().reconnect);
        assert!(!subs.handle_callback(key, ChannelCallback::Disconnected).reconnect);
    }

    #[test]
    fn transport_drop_without_subscription_reconnects() {
        let mut subs = ChannelSubscription::new();
        let outcome = subs.handle_transport_closed();
        assert!(outcome.reconnect);
        assert_eq!(outcome.events, vec![ChatEvent::Disconnected]);
    }

    #[test]
    fn rejection_clears_without_reconnect() {
        let (mut subs, key) = subscribed(9);

        let outcome = subs.handle_callback(key, ChannelCallback::Rejected);
        assert_eq!(outcome.events, vec![ChatEvent::SubscriptionRejected { conversation_id: 9 }]);
        assert!(!outcome.reconnect);
        assert_eq!(subs.current_conversation_id(), None);

        // Rejected subscription never reconnects
        assert!(!subs.handle_callback(key, ChannelCallback::Disconnected).reconnect);
    }

    #[test]
    fn received_payload_becomes_event() {
        let (mut subs, key) = subscribed(1);
        let payload = json!({ "type": "typing", "user": { "id": 4 } });

        let outcome = subs.handle_callback(key, ChannelCallback::Received(payload));
        assert!(matches!(outcome.events.as_slice(), [ChatEvent::Typing { user, .. }] if user.id == 4));
    }

    #[test]
    fn malformed_and_unknown_payloads_are_dropped() {
        let (mut subs, key) = subscribed(1);

        for payload in [json!({ "type": "new_message" }), json!({ "type": "presence" }), json!(42)] {
            let outcome = subs.handle_callback(key, ChannelCallback::Received(payload));
            assert!(outcome.events.is_empty());
        }
    }

    #[test]
    fn stale_subscription_payloads_are_dropped() {
        let (mut subs, old) = subscribed(1);
        subs.subscribe_to_conversation(2, true);

        let payload = json!({ "type": "typing", "user": { "id": 4 } });
        let outcome = subs.handle_callback(old, ChannelCallback::Received(payload));
        assert!(outcome.events.is_empty());
    }

    #[test]
    fn resubscribe_after_drop_uses_fresh_key() {
        let (mut subs, key) = subscribed(5);
        subs.handle_callback(key, ChannelCallback::Disconnected);

        let actions = subs.resubscribe();
        match actions.as_slice() {
            [SubscriptionAction::Subscribe { key: new_key, params }] => {
                assert_ne!(*new_key, key);
                assert_eq!(params.conversation_id, 5);
            },
            other => panic!("expected Subscribe, got {other:?}"),
        }

        // Nothing left to resubscribe
        assert!(subs.resubscribe().is_empty());
    }

    #[test]
    fn perform_targets_active_subscription() {
        let mut subs = ChannelSubscription::new();
        assert!(subs.perform(ChannelCommand::Typing).is_none());

        subs.subscribe_to_conversation(3, true);
        let action = subs.perform(ChannelCommand::StopTyping);
        assert!(matches!(
            action,
            Some(SubscriptionAction::Perform { action: "stop_typing", ref data, .. })
                if *data == json!({ "conversation_id": 3 })
        ));
    }
}
