//! Loopback Chat - two devices, one process
//!
//! Attaches two radios to an in-memory medium, gives each its own session,
//! lets one dial the other, and plays a short scripted conversation.
//!
//! ## Usage
//!
//! ```bash
//! # Scripted conversation, history kept in memory
//! loopback-chat
//!
//! # Keep history on disk and show a dropped link being recovered
//! loopback-chat --history-dir ./chat-history --drop-link
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use clap::Parser;
use tokio::time::timeout;
use tracing::info;

use tether_core::{
    ConnectionState, FileMessageStore, MemoryMessageStore, Message, MessageStore, MockAir,
    PeerInfo, RadioAdapter,
};
use tether_logging::{ConsoleConfig, LogConfig, TetherSubscriberBuilder};
use tether_session::{SessionConfig, SessionRepository};

const ALICE: &str = "AA:AA:AA:AA:AA:AA";
const BOB: &str = "BB:BB:BB:BB:BB:BB";

/// Two in-memory devices chatting over Tether sessions
#[derive(Parser)]
#[command(name = "loopback-chat")]
#[command(version)]
struct Cli {
    /// Directory for JSONL chat history (in memory when omitted)
    #[arg(long)]
    history_dir: Option<PathBuf>,

    /// Close the link halfway and let auto-reconnect recover it
    #[arg(long)]
    drop_link: bool,

    /// Verbose, human-readable logs
    #[arg(short, long)]
    verbose: bool,
}

struct Device {
    name: &'static str,
    session: SessionRepository,
}

async fn open_store(dir: Option<&Path>, name: &str) -> Result<Arc<dyn MessageStore>> {
    Ok(match dir {
        Some(dir) => {
            let path = dir.join(format!("{}.jsonl", name.to_lowercase()));
            Arc::new(
                FileMessageStore::open(&path)
                    .await
                    .with_context(|| format!("Failed to open {}", path.display()))?,
            )
        }
        None => Arc::new(MemoryMessageStore::new()),
    })
}

async fn device(
    air: &Arc<MockAir>,
    address: &str,
    name: &'static str,
    history_dir: Option<&Path>,
) -> Result<Device> {
    let radio: Arc<dyn RadioAdapter> = air.radio(PeerInfo::named(address, name));
    let store = open_store(history_dir, name).await?;
    let session = SessionRepository::new(radio, store, SessionConfig::default());
    session.start_supervisor();
    Ok(Device { name, session })
}

async fn wait_for_state(device: &Device, state: ConnectionState, within: Duration) -> Result<()> {
    let mut rx = device.session.subscribe_state();
    match timeout(within, rx.wait_for(|s| *s == state)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => bail!("{} session closed", device.name),
        Err(_) => bail!(
            "{} did not reach {} within {:?} (last error: {:?})",
            device.name,
            state,
            within,
            device.session.last_error()
        ),
    }
}

async fn say(from: &Device, to: &Device, text: &str) -> Result<()> {
    if !from.session.send_message(text).await {
        bail!(
            "{} could not send: {}",
            from.name,
            from.session.last_error().unwrap_or_default()
        );
    }
    let mut rx = to.session.subscribe_messages();
    timeout(
        Duration::from_secs(5),
        rx.wait_for(|log| log.iter().any(|m| !m.is_local && m.text == text)),
    )
    .await
    .context("message not delivered in time")?
    .context("session closed")?;
    Ok(())
}

fn print_transcript(device: &Device) {
    println!("\n--- {} ---", device.name);
    for message in device.session.messages() {
        println!("{}", format_line(&message));
    }
}

fn format_line(message: &Message) -> String {
    let time = DateTime::from_timestamp_millis(message.timestamp_millis)
        .map(|t| t.with_timezone(&Local).format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    if message.is_system() {
        format!("[{time}] * {}", message.text)
    } else {
        format!("[{time}] {}: {}", message.sender, message.text)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _log_guard = if cli.verbose {
        tether_logging::init_development()
    } else {
        TetherSubscriberBuilder::new()
            .with_config(LogConfig {
                console: ConsoleConfig::pretty(),
                ..LogConfig::default()
            })
            .init()
    };

    let air = MockAir::new();
    let history_dir = cli.history_dir.as_deref();
    let alice = device(&air, ALICE, "Alice", history_dir).await?;
    let bob = device(&air, BOB, "Bob", history_dir).await?;

    info!("Bob dials Alice");
    bob.session.connect(ALICE.into()).await;
    wait_for_state(&bob, ConnectionState::Connected, Duration::from_secs(30)).await?;
    wait_for_state(&alice, ConnectionState::Connected, Duration::from_secs(5)).await?;

    say(&bob, &alice, "hi Alice").await?;
    say(&alice, &bob, "hey Bob, got you loud and clear").await?;

    if cli.drop_link {
        info!("Alice hangs up; Bob should find his way back");
        alice.session.disconnect().await;
        wait_for_state(&bob, ConnectionState::Disconnected, Duration::from_secs(5)).await?;
        wait_for_state(&bob, ConnectionState::Connected, Duration::from_secs(60)).await?;
        wait_for_state(&alice, ConnectionState::Connected, Duration::from_secs(5)).await?;
        say(&bob, &alice, "back again").await?;
    }

    say(&alice, &bob, "bye for now").await?;

    print_transcript(&alice);
    print_transcript(&bob);

    println!("\nConversations on Bob's side:");
    for conversation in bob.session.conversations().await? {
        let last = conversation
            .last_message
            .map(|m| m.text)
            .unwrap_or_default();
        println!("  {} - {}", conversation.peer.display_name(), last);
    }

    bob.session.disconnect().await;
    alice.session.disconnect().await;
    Ok(())
}
