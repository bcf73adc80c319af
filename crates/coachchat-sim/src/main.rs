//! Coachchat simulation binary.
//!
//! Runs a scripted coaching chat session against the simulated broker and
//! the in-memory API: open a conversation, exchange messages and typing
//! signals, survive transport drops and switch conversations.
//!
//! # Usage
//!
//! ```bash
//! # Default session with one transport drop
//! coachchat-sim
//!
//! # Three drops, the first two reconnects failing twice each
//! coachchat-sim --drops 3 --failing-opens 2 --log-level debug
//! ```

use std::time::Duration;

use clap::Parser;
use coachchat_core::{ChatConfig, ConnectionState};
use coachchat_harness::{InvariantRegistry, SimSession, fixtures};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Scripted coachchat session
#[derive(Parser, Debug)]
#[command(name = "coachchat-sim")]
#[command(about = "Drive a scripted chat session against a simulated broker")]
#[command(version)]
struct Args {
    /// Broker host
    #[arg(long, default_value = "chat.coach.test")]
    host: String,

    /// WebSocket scheme
    #[arg(long, default_value = "wss")]
    scheme: String,

    /// Conversations seeded in the in-memory API
    #[arg(long, default_value = "3", value_parser = clap::value_parser!(u64).range(1..))]
    conversations: u64,

    /// Transport drops to inject
    #[arg(long, default_value = "1")]
    drops: u32,

    /// Reconnect attempts that fail after each drop
    #[arg(long, default_value = "0")]
    failing_opens: usize,

    /// Automatic reconnect attempts before giving up
    #[arg(long, default_value = "5")]
    max_reconnect_attempts: u32,

    /// Base reconnect delay in milliseconds
    #[arg(long, default_value = "100")]
    reconnect_delay_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ChatConfig::new(&args.host)
        .with_scheme(&args.scheme)
        .with_max_reconnect_attempts(args.max_reconnect_attempts)
        .with_reconnect_base_delay(Duration::from_millis(args.reconnect_delay_ms));

    tracing::info!(url = %config.broker_url("<token>"), "coachchat simulation starting");

    let mut session = SimSession::new(config).with_invariants(InvariantRegistry::standard());
    seed(&session, args.conversations);

    session.runtime.add_listener(|event| {
        tracing::info!(kind = event.kind(), "chat event");
        Ok(())
    });

    session.connect().await;
    session.runtime.load_conversations(1).await;
    session.runtime.load_conversation(1).await;
    log_store(&session);

    coach_replies(&mut session, 1, "How did the tempo run feel?").await?;
    session.runtime.start_typing().await;
    session.runtime.send_message(1, "Legs were heavy but I finished it").await;
    session.runtime.stop_typing().await;
    log_store(&session);

    for drop in 1..=args.drops {
        tracing::info!(drop, "dropping transport");
        session.broker().fail_next_opens(args.failing_opens, "broker unavailable");
        session.broker().inject_close("simulated network loss");
        session.settle().await;

        while session.fire_reconnect().await {
            tracing::info!(
                state = ?session.runtime.connection_state(),
                attempt = session.runtime.reconnect_attempt(),
                "reconnect timer handled"
            );
        }

        if session.runtime.connection_state() != ConnectionState::Connected {
            tracing::warn!(drop, "gave up reconnecting, connecting manually");
            session.connect().await;
        }
    }

    if args.conversations > 1 {
        session.runtime.load_conversation(2).await;
        coach_replies(&mut session, 2, "Remember to log your sleep").await?;
        log_store(&session);
    }

    session.runtime.disconnect();
    tracing::info!(
        opens = session.broker().open_count(),
        subscribes = session.broker().subscribes().len(),
        "coachchat simulation finished"
    );

    Ok(())
}

/// Seed the API with conversations, each holding a greeting from its coach.
fn seed(session: &SimSession, conversations: u64) {
    for id in 1..=conversations {
        let coach_id = 100 + id;
        session.api.add_conversation(id, fixtures::user(coach_id, "Coach", &id.to_string()));
        session.api.add_message(id, coach_id, "Welcome to your plan!");
    }
}

/// Deliver a coach message through the broker, preceded by a typing signal.
async fn coach_replies(
    session: &mut SimSession,
    conversation_id: u64,
    content: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = session.broker().active_key().ok_or("no active subscription")?;
    let coach_id = 100 + conversation_id;
    let coach = fixtures::user(coach_id, "Coach", &conversation_id.to_string());
    let message = session.api.add_message(conversation_id, coach_id, content);

    session.broker().inject_payload(key, fixtures::typing_payload(&coach));
    session.broker().inject_payload(key, fixtures::new_message_payload(&message));
    session.settle().await;
    Ok(())
}

fn log_store(session: &SimSession) {
    let store = session.runtime.store();
    tracing::info!(
        open = ?store.current_conversation_id(),
        messages = store.messages().len(),
        conversations = store.conversations().len(),
        unread = store.conversations().iter().map(|c| c.unread_count).sum::<u32>(),
        connected = store.is_connected(),
        "store"
    );
}
