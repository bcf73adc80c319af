//! Broker trait for abstracting the external pub/sub client.
//!
//! The [`Broker`] trait decouples the runtime from a concrete pub/sub
//! library. The wire protocol lives behind it; the runtime only opens and
//! closes the transport, manages channel subscriptions by
//! [`SubscriptionKey`], performs channel actions and consumes
//! [`BrokerEvent`]s.
//!
//! # Implementations
//!
//! - **Production**: a WebSocket pub/sub client
//! - **Simulation**: `coachchat_harness::SimBroker`, scripted and recording

use std::future::Future;

use coachchat_core::{ChannelCallback, SubscriptionKey, SubscriptionParams};
use serde_json::Value;

/// Notifications from the broker.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// Lifecycle callback for one channel subscription.
    Channel {
        /// Subscription the callback belongs to.
        key: SubscriptionKey,
        /// The callback.
        callback: ChannelCallback,
    },

    /// The transport itself closed.
    Closed {
        /// Close reason reported by the transport.
        reason: String,
    },
}

/// Abstracts the pub/sub client.
pub trait Broker: Send {
    /// Client-specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open the transport at `url`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake fails.
    fn open(&mut self, url: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Open/closed flag of the transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot report its state.
    fn is_open(&self) -> Result<bool, Self::Error>;

    /// Close the transport. Safe to call when already closed.
    fn close(&mut self);

    /// Create a channel subscription whose callbacks carry `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the subscription cannot be created locally.
    fn subscribe(
        &mut self,
        key: SubscriptionKey,
        params: &SubscriptionParams,
    ) -> Result<(), Self::Error>;

    /// Close a channel subscription. Unknown keys are ignored.
    fn unsubscribe(&mut self, key: SubscriptionKey);

    /// Perform a server action on a channel subscription.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be sent.
    fn perform(&mut self, key: SubscriptionKey, action: &str, data: Value)
    -> Result<(), Self::Error>;

    /// Next notification. `None` once the client shut down for good.
    fn next_event(&mut self) -> impl Future<Output = Option<BrokerEvent>> + Send;
}
