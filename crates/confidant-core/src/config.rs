//! Connection configuration.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::connection::policy::{FixedDelay, ReconnectPolicy};

/// Agent address used when none is configured.
pub const DEFAULT_ENDPOINT: &str = "127.0.0.1:8765";

/// Path appended to bare `host:port` endpoints.
const DEFAULT_PATH: &str = "/ws";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Invalid endpoint '{input}': {reason}")]
    Invalid { input: String, reason: String },

    #[error("Unsupported scheme '{0}' (expected ws or wss)")]
    UnsupportedScheme(String),
}

/// Where the remote agent listens.
///
/// Accepts either a full `ws://` / `wss://` URL or a bare `host:port`,
/// which is taken to mean `ws://host:port/ws`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint(Url);

impl Endpoint {
    pub fn parse(input: &str) -> Result<Self, EndpointError> {
        let trimmed = input.trim();
        let candidate = if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("ws://{trimmed}{DEFAULT_PATH}")
        };

        let url = Url::parse(&candidate).map_err(|e| EndpointError::Invalid {
            input: input.to_string(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(EndpointError::Invalid {
                input: input.to_string(),
                reason: "missing host".into(),
            });
        }

        Ok(Self(url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self(Url::parse(&format!("ws://{DEFAULT_ENDPOINT}{DEFAULT_PATH}")).expect("default endpoint is a valid URL"))
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Everything the connection manager needs besides a transport.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub endpoint: Endpoint,
    pub reconnect: Arc<dyn ReconnectPolicy>,
    /// Directory for the wire log; `None` disables it.
    pub wire_log_dir: Option<PathBuf>,
}

impl ConnectionConfig {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            reconnect: Arc::new(FixedDelay::default()),
            wire_log_dir: None,
        }
    }

    pub fn with_reconnect(mut self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.reconnect = Arc::new(policy);
        self
    }

    pub fn with_wire_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.wire_log_dir = Some(dir.into());
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new(Endpoint::default())
    }
}
