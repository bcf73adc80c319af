//! Chat application layer for coachchat.
//!
//! Wires the sans-IO state machines from `coachchat-core` to the outside
//! world: the broker client, the REST chat API and the credential store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                   Runtime                    │
//! │  ┌────────────┐  ┌─────────────────────────┐ │
//! │  │ ChatStore  │  │ ConnectionManager       │ │
//! │  │ (reducer)  │  │ ChannelSubscription     │ │
//! │  │            │  │ EventDispatcher         │ │
//! │  └────────────┘  └─────────────────────────┘ │
//! └──────────────────────────────────────────────┘
//!        │ AppAction               │ broker ops
//!        ▼                         ▼
//!   ChatApi / CredentialStore    Broker
//! ```
//!
//! [`ChatStore`] consumes [`AppEvent`]s and returns [`AppAction`]s. The
//! [`Runtime`] executes those actions, drives the connection and subscription
//! state machines, and fans every [`coachchat_core::ChatEvent`] out to
//! registered listeners before feeding it to the store.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod action;
pub mod api;
pub mod broker;
pub mod error;
pub mod event;
pub mod runtime;
pub mod store;

pub use action::AppAction;
pub use api::{
    ChatApi, ConversationDetail, ConversationPage, CreateConversationRequest, CredentialStore,
    PageMeta, SendMessageRequest,
};
pub use broker::{Broker, BrokerEvent};
pub use error::{ApiError, CredentialError};
pub use event::AppEvent;
pub use runtime::{PendingReconnect, Runtime};
pub use store::{ChatStore, FailedDraft};
