//! Wire logging.
//!
//! Optionally records every payload crossing the connection, one
//! timestamped line each, in `{dir}/{log_id}.log`. Disabled unless a
//! directory is configured. An unusable directory is logged and disables
//! the wire log; write failures are ignored.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use log::warn;

/// Direction of a logged line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
    /// Connection lifecycle notes (open, close, errors).
    Link,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::Send => "SEND",
            Direction::Recv => "RECV",
            Direction::Link => "LINK",
        }
    }
}

/// Shared append-only wire log. Cloning shares the file.
#[derive(Debug, Clone, Default)]
pub struct WireLog {
    file: Arc<Mutex<Option<File>>>,
}

impl WireLog {
    /// A log that writes nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Open (or create) `{dir}/{log_id}.log`. `None` gives a disabled log;
    /// so does an unusable directory, after a warning.
    pub fn open(dir: Option<&Path>, log_id: &str) -> Self {
        let file = dir.and_then(|dir| {
            let path = dir.join(format!("{log_id}.log"));
            let opened = std::fs::create_dir_all(dir)
                .and_then(|()| OpenOptions::new().create(true).append(true).open(&path));
            match opened {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!("Wire log disabled, cannot open {}: {e}", path.display());
                    None
                }
            }
        });
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    pub fn record(&self, direction: Direction, data: &str) {
        if let Ok(mut guard) = self.file.lock() {
            if let Some(file) = guard.as_mut() {
                let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
                let _ = writeln!(file, "[{ts}] {}: {data}", direction.label());
                let _ = file.flush();
            }
        }
    }
}
