//! Environment configuration.

use std::env;
use std::net::SocketAddr;

use peerchat::PeerchatError;

/// Default listen address in server mode.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7878";

/// Which side of the link this process takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Wait for one incoming connection.
    Server,
    /// Connect to `PEERCHAT_PEER_ADDR`.
    Client,
}

/// Demo settings read from `PEERCHAT_*` variables.
#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub mode: Mode,
    pub bind_addr: SocketAddr,
    pub peer_addr: Option<SocketAddr>,
    pub name: String,
    pub log: String,
}

impl DemoConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, PeerchatError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PeerchatError> {
        let mode = match lookup("PEERCHAT_MODE").as_deref() {
            None | Some("server") => Mode::Server,
            Some("client") => Mode::Client,
            Some(other) => {
                return Err(PeerchatError::Config(format!(
                    "PEERCHAT_MODE must be \"server\" or \"client\", got {:?}",
                    other
                )));
            }
        };

        let bind_addr = parse_addr(
            "PEERCHAT_BIND_ADDR",
            &lookup("PEERCHAT_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
        )?;

        let peer_addr = lookup("PEERCHAT_PEER_ADDR")
            .map(|value| parse_addr("PEERCHAT_PEER_ADDR", &value))
            .transpose()?;
        if mode == Mode::Client && peer_addr.is_none() {
            return Err(PeerchatError::Config(
                "PEERCHAT_PEER_ADDR is required in client mode".to_string(),
            ));
        }

        let name = lookup("PEERCHAT_NAME").unwrap_or_else(|| match mode {
            Mode::Server => "server".to_string(),
            Mode::Client => "client".to_string(),
        });
        let log = lookup("PEERCHAT_LOG").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            mode,
            bind_addr,
            peer_addr,
            name,
            log,
        })
    }
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr, PeerchatError> {
    value
        .parse()
        .map_err(|e| PeerchatError::Config(format!("{} {:?}: {}", key, value, e)))
}
