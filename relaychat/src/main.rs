//! `RelayChat`: line-oriented chat client.
//!
//! Reads lines from stdin and submits each one for delivery; prints every
//! timeline addition and delivery signal to stdout. Configuration via CLI
//! flags, environment variables, or config file
//! (`~/.config/relaychat/config.toml`).
//!
//! ```bash
//! cargo run --bin relaychat -- --relay-url ws://127.0.0.1:9000/ws
//!
//! # Or via environment variables
//! RELAYCHAT_RELAY_URL=ws://127.0.0.1:9000/ws cargo run --bin relaychat
//! ```
//!
//! Type `/quit` (or close stdin) to exit.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use relaychat::config::{CliArgs, ClientConfig};
use relaychat::identity::Identity;
use relaychat::session::{DeliveryEvent, Origin, SendError, spawn_session};
use relaychat::transport::ws::WsTransport;
use relaychat_proto::message::{Message, ParticipantId};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file so stdout stays clean for the timeline.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(relay_url = %config.relay_url, "relaychat starting");

    let identity = config.participant_id.clone().map_or_else(Identity::generate, |id| {
        Identity::with_participant(ParticipantId::new(id))
    });
    println!("* you are {}", identity.participant());

    let (transport, transport_events) = WsTransport::spawn(
        &config.relay_url,
        config.connect_timeout,
        config.reconnect,
        config.event_buffer,
    );
    let (handle, mut events) = spawn_session(
        identity.clone(),
        config.session_config(),
        transport,
        transport_events,
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let text = line.trim();
                    if text == "/quit" {
                        break;
                    }
                    if text.is_empty() {
                        continue;
                    }
                    match handle.send(text).await {
                        Ok(_) => {}
                        Err(SendError::NotConnected) => {
                            println!("! not connected ({}), message not sent", handle.connection_state());
                        }
                        Err(SendError::Validation(e)) => println!("! {e}"),
                        Err(SendError::SessionClosed) => break,
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read stdin");
                    break;
                }
            },
            event = events.recv() => match event {
                Some(event) => print_event(&event, identity.participant()),
                None => break,
            },
        }
    }

    handle.shutdown().await;
    tracing::info!("relaychat exiting");
    ExitCode::SUCCESS
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("relaychat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

fn print_event(event: &DeliveryEvent, me: &ParticipantId) {
    match event {
        DeliveryEvent::Appended { message, origin } => {
            let marker = if *origin == Origin::Local { " (you)" } else { "" };
            print_message(message, marker);
        }
        DeliveryEvent::HistorySynced { admitted, .. } => {
            for message in admitted {
                let marker = if &message.sender_id == me { " (you)" } else { "" };
                print_message(message, marker);
            }
        }
        DeliveryEvent::Delivered { .. } => {}
        DeliveryEvent::DeliveryFailed { message, attempts } => {
            println!(
                "! could not deliver \"{}\" after {attempts} attempts",
                message.text
            );
        }
        DeliveryEvent::ConnectionChanged(state) => println!("* {state}"),
        DeliveryEvent::ParticipantCount(count) => println!("* {count} online"),
    }
}

fn print_message(message: &Message, marker: &str) {
    println!(
        "[{}] {}{marker}: {}",
        format_time(message),
        message.sender_id,
        message.text
    );
}

/// `HH:MM` in local time; locally composed messages have no relay
/// timestamp yet and show the current time.
fn format_time(message: &Message) -> String {
    message
        .timestamp
        .and_then(|ts| i64::try_from(ts.as_millis()).ok())
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map_or_else(chrono::Local::now, |utc| utc.with_timezone(&chrono::Local))
        .format("%H:%M")
        .to_string()
}
