//! Headless companion client.
//!
//! Connects to the agent, mirrors the conversation to disk and lets a
//! terminal (or a script) drive it over stdin.

mod commands;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use confidant_core::config::DEFAULT_ENDPOINT;
use confidant_core::connection::FixedDelay;
use confidant_core::persistence::MessageDraft;
use confidant_core::{CompanionContext, ConnectionConfig, Endpoint};

use commands::{execute, Command, Flow};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Agent endpoint: `host:port` or a full ws:// / wss:// URL
    #[arg(long, env = "CONFIDANT_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: Endpoint,

    /// Directory for persisted collections (default: ~/.config/confidant)
    #[arg(long, env = "CONFIDANT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Delay between reconnect attempts, in milliseconds
    #[arg(long, env = "CONFIDANT_RECONNECT_MS", default_value_t = 2000)]
    reconnect_ms: u64,

    /// Write a wire log of all payloads to this directory
    #[arg(long, env = "CONFIDANT_WIRE_LOG_DIR")]
    wire_log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ConnectionConfig::new(args.endpoint)
        .with_reconnect(FixedDelay(Duration::from_millis(args.reconnect_ms)));
    if let Some(dir) = args.wire_log_dir {
        config = config.with_wire_log_dir(dir);
    }

    let mut builder = CompanionContext::builder().connection(config);
    if let Some(dir) = args.data_dir {
        builder = builder.data_dir(dir);
    }
    let ctx = builder.build()?;

    tokio::spawn(log_events(ctx.clone()));
    tokio::spawn(forward_inbound(ctx.clone()));

    info!("Connecting to {}", ctx.connection.endpoint());
    ctx.connect();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                None
            }
        };
        let Some(line) = line else { break };

        match execute(&ctx, Command::parse(&line)) {
            Flow::Continue(reply) if reply.is_empty() => {}
            Flow::Continue(reply) => println!("{reply}"),
            Flow::Quit => break,
        }
    }

    ctx.teardown();
    info!("Shutting down");
    Ok(())
}

async fn log_events(ctx: CompanionContext) {
    let mut events = ctx.subscribe();
    loop {
        match events.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => info!("event {json}"),
                Err(e) => warn!("Unserializable event {event:?}: {e}"),
            },
            Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {skipped} events"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Print inbound payloads and keep them in the session as assistant turns.
async fn forward_inbound(ctx: CompanionContext) {
    let mut state = ctx.watch_connection();
    loop {
        let handle = state.borrow_and_update().handle.clone();
        let Some(handle) = handle else {
            if state.changed().await.is_err() {
                return;
            }
            continue;
        };

        let mut inbound = handle.subscribe();
        loop {
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                payload = inbound.recv() => match payload {
                    Ok(payload) => {
                        println!("< {payload}");
                        ctx.append_message(MessageDraft::new("assistant", payload));
                    }
                    Err(RecvError::Lagged(skipped)) => warn!("Dropped {skipped} inbound payloads"),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }
}
