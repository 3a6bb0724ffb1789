//! peerchat demo
//!
//! A terminal chat peer over the TCP radio. Run one process as the server
//! and one as the client, then type lines to send them. `/quit` exits.
//!
//! Environment variables:
//! - PEERCHAT_MODE: "server" (default) or "client"
//! - PEERCHAT_BIND_ADDR: Listen address (server only, default 127.0.0.1:7878)
//! - PEERCHAT_PEER_ADDR: Server address (client only)
//! - PEERCHAT_NAME: Name sent with each message
//! - PEERCHAT_LOG: Log filter, e.g. debug|info|warn (default info)

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use peerchat::prelude::*;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use crate::config::{DemoConfig, Mode};

#[derive(Debug, Error)]
enum DemoError {
    #[error(transparent)]
    Peerchat(#[from] PeerchatError),

    #[error("invalid log filter: {0}")]
    Logging(String),
}

impl From<std::io::Error> for DemoError {
    fn from(err: std::io::Error) -> Self {
        Self::Peerchat(err.into())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("peerchat-demo: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), DemoError> {
    let config = DemoConfig::from_env()?;

    let filter = EnvFilter::try_new(&config.log).map_err(|e| DemoError::Logging(e.to_string()))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut radio = TcpRadioConfig::builder()
        .bind_addr(config.bind_addr)
        .local_name(config.name.clone());
    let peer = config
        .peer_addr
        .map(|addr| Peer::new("peer", addr.to_string()));
    if let Some(peer) = &peer {
        radio = radio.bonded_peer(peer.clone());
    }

    let radio = Arc::new(TcpRadio::new(radio.build()));
    let controller = ChatController::new(radio, ControllerConfig::default(), &Handle::current());
    let state = ChatState::new(controller, &Handle::current());

    match (config.mode, &peer) {
        (Mode::Client, Some(peer)) => {
            tracing::info!("connecting to {}", peer.address);
            state.connect(peer);
        }
        _ => {
            tracing::info!("waiting for a peer on {}", config.bind_addr);
            state.wait_for_incoming();
        }
    }

    let mut snapshots = state.subscribe();
    let mut screen = Screen::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                screen.render(&snapshot);
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let text = line.trim();
                if text == "/quit" {
                    break;
                }
                if text.is_empty() {
                    continue;
                }
                if state.send_message(text).await.is_none() {
                    tracing::warn!("not connected, message dropped");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    state.disconnect();
    state.release();
    Ok(())
}

/// Prints what changed between snapshots.
#[derive(Debug, Default)]
struct Screen {
    connected: bool,
    error: Option<String>,
    shown: usize,
}

impl Screen {
    fn render(&mut self, snapshot: &ChatSnapshot) {
        if snapshot.is_connection_established != self.connected {
            self.connected = snapshot.is_connection_established;
            println!("-- {} --", if self.connected { "connected" } else { "disconnected" });
        }
        if snapshot.error_message != self.error {
            self.error = snapshot.error_message.clone();
            if let Some(error) = &self.error {
                println!("!! {}", error);
            }
        }

        // Hidden while disconnected.
        if snapshot.messages.len() < self.shown {
            self.shown = 0;
        }
        for message in &snapshot.messages[self.shown..] {
            if !message.from_local {
                println!("{}: {}", message.sender, message.body);
            }
        }
        self.shown = snapshot.messages.len();
    }
}
