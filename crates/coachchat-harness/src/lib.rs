//! Deterministic simulation harness for coachchat.
//!
//! In-memory implementations of the broker, REST API and credential store,
//! so the same [`coachchat_app::Runtime`] that runs in production runs in
//! tests with scripted failures and injected broker traffic.
//!
//! # Invariant Testing
//!
//! The `invariants` module provides behavioral testing through invariant
//! checks over store snapshots. Use [`InvariantRegistry::standard()`] for the
//! common store invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod invariants;
pub mod memory_api;
pub mod session;
pub mod sim_broker;

pub use invariants::{
    Invariant, InvariantRegistry, InvariantResult, OpenConversationMessagesOnly, StoreSnapshot,
    TypingScopedToOpenConversation, UniqueConversationIds, UniqueMessageIds, Violation,
};
pub use memory_api::{Endpoint, MemoryApi, MemoryCredentials};
pub use session::{EventLog, SIM_TOKEN, SimRuntime, SimSession};
pub use sim_broker::{BrokerCall, SimBroker, SimBrokerError};
