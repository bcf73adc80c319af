//! Core realtime chat state machines for coachchat.
//!
//! Everything in this crate is Sans-IO: the state machines never touch the
//! network, the credential store or the clock. Methods take inputs (callbacks,
//! probe results, timer expiries) and return actions for the caller to
//! execute. This keeps reconnection, subscription and dispatch logic fully
//! deterministic under test.
//!
//! # Components
//!
//! - [`EventDispatcher`]: fan-out of [`ChatEvent`]s to registered listeners
//! - [`ChannelSubscription`]: lifecycle of the single conversation subscription
//! - [`ConnectionManager`]: broker connection state and reconnection backoff
//! - [`ReconnectPolicy`]: exponential backoff bookkeeping
//! - [`payload`]: broker payload codec and outbound channel commands

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod env;
pub mod error;
pub mod event;
pub mod model;
pub mod payload;
pub mod reconnect;
pub mod subscription;

pub use config::ChatConfig;
pub use connection::{ConnectionAction, ConnectionManager, ConnectionState};
pub use dispatcher::{DispatchOutcome, EventDispatcher, ListenerId};
pub use env::{Environment, SystemEnv};
pub use error::{ConnectionError, ListenerError, PayloadError};
pub use event::ChatEvent;
pub use model::{
    Conversation, ConversationId, Message, MessageId, MessageType, TypingIndicator, User, UserId,
};
pub use payload::{ChannelCommand, SubscriptionParams};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use subscription::{
    CallbackOutcome, ChannelCallback, ChannelSubscription, Subscription, SubscriptionAction,
    SubscriptionKey,
};
