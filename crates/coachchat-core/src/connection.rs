//! Broker connection state machine.
//!
//! Owns [`ConnectionState`] and the reconnect counter. Uses the action
//! pattern: methods take inputs (token lookup results, open results, timer
//! expiries, drops) and return [`ConnectionAction`]s for the runtime to
//! execute. No I/O happens here.
//!
//! # State Machine
//!
//! ```text
//!                   connect()                 token + open ok
//! ┌──────────────┐ ─────────> ┌────────────┐ ───────────────> ┌───────────┐
//! │ Disconnected │            │ Connecting │                  │ Connected │
//! └──────────────┘ <───────── └────────────┘                  └───────────┘
//!        ↑        no token /         ↑                               │
//!        │        open failed        │ timer fired                   │ unexpected
//!        │                           │                               │ disconnect
//!        │  exhausted        ┌──────────────┐                        │
//!        └────────────────── │ Reconnecting │ <──────────────────────┘
//!                            └──────────────┘
//! ```
//!
//! `disconnect()` moves every state to `Disconnected`.

use std::{fmt, time::Duration};

use crate::{
    config::ChatConfig,
    error::ConnectionError,
    event::ChatEvent,
    reconnect::{Backoff, ReconnectPolicy},
};

/// Connectivity as observed by the chat feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no retry pending.
    Disconnected,
    /// Token lookup or transport handshake in flight.
    Connecting,
    /// Transport is open.
    Connected,
    /// Connection dropped; a retry timer is armed.
    Reconnecting,
}

/// Actions returned by the connection state machine.
///
/// The runtime executes these:
/// - `FetchToken`: look up the bearer token, then call
///   [`ConnectionManager::handle_token`]
/// - `Open`: open the broker transport, then call
///   [`ConnectionManager::handle_opened`] or
///   [`ConnectionManager::handle_open_failed`]
/// - `Close`: tear down the transport
/// - `ScheduleReconnect`: arm a one-shot timer, then call
///   [`ConnectionManager::handle_reconnect_timer`]
/// - `Emit`: dispatch the event to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Look up the bearer token in the credential store.
    FetchToken,

    /// Open the broker transport.
    Open {
        /// Broker URL including the encoded token.
        url: String,
    },

    /// Tear down the broker transport.
    Close,

    /// Arm a single retry timer.
    ScheduleReconnect {
        /// Attempt number the timer belongs to.
        attempt: u32,
        /// Delay before the timer fires.
        delay: Duration,
    },

    /// Dispatch an event to listeners.
    Emit(ChatEvent),
}

/// Broker connection state machine.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    /// Current state.
    state: ConnectionState,
    /// Endpoint settings.
    config: ChatConfig,
    /// Backoff counter.
    policy: ReconnectPolicy,
    /// A transport object exists (open or not).
    has_transport: bool,
    /// The in-flight connect was started by the retry timer.
    automatic: bool,
}

impl ConnectionManager {
    /// Create a manager in [`ConnectionState::Disconnected`].
    pub fn new(config: ChatConfig) -> Self {
        let policy = config.reconnect_policy();
        Self {
            state: ConnectionState::Disconnected,
            config,
            policy,
            has_transport: false,
            automatic: false,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Endpoint settings.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Reconnect attempts since the last successful connect.
    #[must_use]
    pub fn reconnect_attempt(&self) -> u32 {
        self.policy.attempt()
    }

    /// Backoff state.
    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Check if a transport object exists, regardless of whether it is open.
    #[must_use]
    pub fn has_transport(&self) -> bool {
        self.has_transport
    }

    /// Resolve connectivity from a probe of the transport's open flag.
    ///
    /// If the probe itself failed, fall back to "a transport object exists".
    pub fn is_connected<E: fmt::Display>(&self, probe: Result<bool, E>) -> bool {
        match probe {
            Ok(open) => open,
            Err(e) => {
                tracing::debug!(error = %e, "transport probe failed, assuming transport state");
                self.has_transport
            },
        }
    }

    /// Start a manual connect.
    ///
    /// No-op while a connect is in flight or the transport is open.
    pub fn connect(&mut self) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                tracing::debug!(state = ?self.state, "connect ignored");
                vec![]
            },
            ConnectionState::Disconnected | ConnectionState::Reconnecting => self.begin(false),
        }
    }

    fn begin(&mut self, automatic: bool) -> Vec<ConnectionAction> {
        self.state = ConnectionState::Connecting;
        self.automatic = automatic;
        vec![ConnectionAction::FetchToken]
    }

    /// Continue a connect with the credential lookup result.
    ///
    /// A missing token aborts the connect silently.
    pub fn handle_token(&mut self, token: Option<&str>) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            return vec![];
        }

        let Some(token) = token.filter(|t| !t.is_empty()) else {
            tracing::debug!("no auth token, skipping broker connect");
            self.state = ConnectionState::Disconnected;
            self.automatic = false;
            return vec![];
        };

        let mut actions = Vec::with_capacity(2);
        if self.has_transport {
            self.has_transport = false;
            actions.push(ConnectionAction::Close);
        }
        actions.push(ConnectionAction::Open { url: self.config.broker_url(token) });
        actions
    }

    /// Transport handshake succeeded.
    pub fn handle_opened(&mut self) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            // disconnect() ran while the handshake was in flight
            tracing::debug!(state = ?self.state, "discarding transport opened after disconnect");
            return vec![ConnectionAction::Close];
        }

        self.state = ConnectionState::Connected;
        self.has_transport = true;
        self.automatic = false;
        self.policy.reset();
        tracing::info!(host = %self.config.host, "broker connected");

        vec![ConnectionAction::Emit(ChatEvent::Connected)]
    }

    /// Transport handshake failed.
    ///
    /// A failed automatic attempt counts as another unexpected disconnect and
    /// drives the backoff; a failed manual connect does not.
    pub fn handle_open_failed(&mut self, reason: impl Into<String>) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Connecting {
            return vec![];
        }

        let reason = reason.into();
        tracing::warn!(%reason, "broker connect failed");
        self.state = ConnectionState::Disconnected;

        let mut actions =
            vec![ConnectionAction::Emit(ChatEvent::ConnectionError(ConnectionError::Transport(
                reason,
            )))];
        if std::mem::take(&mut self.automatic) {
            actions.extend(self.handle_unexpected_disconnect());
        }
        actions
    }

    /// The connection dropped without the client asking for it.
    ///
    /// Advances the backoff and either schedules one retry or reports
    /// exhaustion. After exhaustion, further drops are ignored until a
    /// connect succeeds.
    pub fn handle_unexpected_disconnect(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Connecting {
            tracing::debug!("drop reported while connecting, in-flight connect decides");
            return vec![];
        }
        if self.policy.is_exhausted() {
            tracing::debug!("reconnection already exhausted, ignoring drop");
            return vec![];
        }

        match self.policy.next_attempt() {
            Backoff::Retry { attempt, delay } => {
                self.state = ConnectionState::Reconnecting;
                tracing::info!(attempt, ?delay, "scheduling broker reconnect");
                vec![ConnectionAction::ScheduleReconnect { attempt, delay }]
            },
            Backoff::Exhausted { attempts } => {
                self.state = ConnectionState::Disconnected;
                tracing::error!(attempts, "giving up on broker reconnect");
                vec![ConnectionAction::Emit(ChatEvent::ConnectionError(
                    ConnectionError::ReconnectExhausted { attempts },
                ))]
            },
        }
    }

    /// A retry timer fired.
    ///
    /// Stale timers (a manual connect or disconnect happened meanwhile, or a
    /// newer attempt superseded this one) are ignored.
    pub fn handle_reconnect_timer(&mut self, attempt: u32) -> Vec<ConnectionAction> {
        if self.state != ConnectionState::Reconnecting || self.policy.attempt() != attempt {
            tracing::debug!(attempt, state = ?self.state, "stale reconnect timer");
            return vec![];
        }
        self.begin(true)
    }

    /// Tear down the connection on request.
    ///
    /// Resets the backoff. No-op if there is nothing to tear down.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        self.policy.reset();
        self.automatic = false;

        if self.state == ConnectionState::Disconnected && !self.has_transport {
            return vec![];
        }

        self.state = ConnectionState::Disconnected;
        self.has_transport = false;
        tracing::info!("broker disconnected");

        vec![ConnectionAction::Close, ConnectionAction::Emit(ChatEvent::Disconnected)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(ChatConfig::new("chat.example"))
    }

    fn connected() -> ConnectionManager {
        let mut conn = manager();
        conn.connect();
        conn.handle_token(Some("secret"));
        conn.handle_opened();
        conn
    }

    #[test]
    fn connection_lifecycle() {
        let mut conn = manager();
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        assert_eq!(conn.connect(), vec![ConnectionAction::FetchToken]);
        assert_eq!(conn.state(), ConnectionState::Connecting);

        let actions = conn.handle_token(Some("secret"));
        assert_eq!(actions, vec![ConnectionAction::Open {
            url: "wss://chat.example/cable?token=secret".into()
        }]);

        let actions = conn.handle_opened();
        assert_eq!(actions, vec![ConnectionAction::Emit(ChatEvent::Connected)]);
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.has_transport());

        let actions = conn.disconnect();
        assert_eq!(actions, vec![
            ConnectionAction::Close,
            ConnectionAction::Emit(ChatEvent::Disconnected)
        ]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_is_idempotent() {
        let mut conn = manager();
        assert_eq!(conn.connect().len(), 1);
        assert!(conn.connect().is_empty());

        conn.handle_token(Some("secret"));
        conn.handle_opened();
        assert!(conn.connect().is_empty());
    }

    #[test]
    fn missing_token_is_silent() {
        let mut conn = manager();
        conn.connect();

        assert!(conn.handle_token(None).is_empty());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        conn.connect();
        assert!(conn.handle_token(Some("")).is_empty());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn manual_connect_failure_does_not_retry() {
        let mut conn = manager();
        conn.connect();
        conn.handle_token(Some("secret"));

        let actions = conn.handle_open_failed("connection refused");
        assert_eq!(actions, vec![ConnectionAction::Emit(ChatEvent::ConnectionError(
            ConnectionError::Transport("connection refused".into())
        ))]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert_eq!(conn.reconnect_attempt(), 0);
    }

    #[test]
    fn unexpected_disconnect_schedules_backoff() {
        let mut conn = connected();

        let actions = conn.handle_unexpected_disconnect();
        assert_eq!(actions, vec![ConnectionAction::ScheduleReconnect {
            attempt: 1,
            delay: Duration::from_millis(1000)
        }]);
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn backoff_doubles_until_exhausted() {
        let mut conn = connected();
        let mut delays = Vec::new();

        for _ in 0..5 {
            match conn.handle_unexpected_disconnect().as_slice() {
                [ConnectionAction::ScheduleReconnect { delay, .. }] => delays.push(delay.as_millis()),
                other => panic!("expected ScheduleReconnect, got {other:?}"),
            }
        }
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);

        let actions = conn.handle_unexpected_disconnect();
        assert_eq!(actions, vec![ConnectionAction::Emit(ChatEvent::ConnectionError(
            ConnectionError::ReconnectExhausted { attempts: 5 }
        ))]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        // Terminal: no further scheduling
        assert!(conn.handle_unexpected_disconnect().is_empty());
    }

    #[test]
    fn timer_reconnects_and_success_resets_counter() {
        let mut conn = connected();
        conn.handle_unexpected_disconnect();

        assert_eq!(conn.handle_reconnect_timer(1), vec![ConnectionAction::FetchToken]);

        // Existing transport object is replaced
        let actions = conn.handle_token(Some("secret"));
        assert!(matches!(actions.as_slice(), [
            ConnectionAction::Close,
            ConnectionAction::Open { .. }
        ]));

        conn.handle_opened();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.reconnect_attempt(), 0);
    }

    #[test]
    fn failed_automatic_attempt_continues_backoff() {
        let mut conn = connected();
        conn.handle_unexpected_disconnect();
        conn.handle_reconnect_timer(1);
        conn.handle_token(Some("secret"));

        let actions = conn.handle_open_failed("timeout");
        assert!(matches!(actions.as_slice(), [
            ConnectionAction::Emit(ChatEvent::ConnectionError(ConnectionError::Transport(_))),
            ConnectionAction::ScheduleReconnect { attempt: 2, .. }
        ]));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn stale_timer_is_ignored() {
        let mut conn = connected();
        conn.handle_unexpected_disconnect();
        conn.handle_unexpected_disconnect();

        // Timer for attempt 1 was superseded by attempt 2
        assert!(conn.handle_reconnect_timer(1).is_empty());

        // Manual connect wins the race against the timer
        conn.connect();
        conn.handle_token(Some("secret"));
        conn.handle_opened();
        assert!(conn.handle_reconnect_timer(2).is_empty());
    }

    #[test]
    fn disconnect_cancels_pending_retry() {
        let mut conn = connected();
        conn.handle_unexpected_disconnect();

        conn.disconnect();
        assert_eq!(conn.reconnect_attempt(), 0);
        assert!(conn.handle_reconnect_timer(1).is_empty());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn disconnect_when_disconnected_is_noop() {
        let mut conn = manager();
        assert!(conn.disconnect().is_empty());
        assert!(conn.disconnect().is_empty());
    }

    #[test]
    fn opened_after_disconnect_is_closed() {
        let mut conn = manager();
        conn.connect();
        conn.handle_token(Some("secret"));
        conn.disconnect();

        assert_eq!(conn.handle_opened(), vec![ConnectionAction::Close]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn is_connected_probe_fallback() {
        let conn = connected();
        assert!(conn.is_connected::<String>(Ok(true)));
        assert!(!conn.is_connected::<String>(Ok(false)));
        assert!(conn.is_connected(Err("probe threw")));

        let fresh = manager();
        assert!(!fresh.is_connected(Err("probe threw")));
    }

    #[test]
    fn manual_connect_after_exhaustion_resets() {
        let mut conn = connected();
        for _ in 0..6 {
            conn.handle_unexpected_disconnect();
        }
        assert!(conn.policy().is_exhausted());

        conn.connect();
        conn.handle_token(Some("secret"));
        conn.handle_opened();
        assert_eq!(conn.reconnect_attempt(), 0);
        assert!(!conn.handle_unexpected_disconnect().is_empty());
    }
}
