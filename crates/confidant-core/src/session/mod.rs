//! Active session lifecycle.
//!
//! One session is always active. Clearing or loading replaces it, and a
//! non-empty outgoing session is archived into the conversation list
//! (newest first, capped at [`ARCHIVE_CAP`]).

mod archive;
mod manager;

pub use archive::ARCHIVE_CAP;
pub use manager::SessionManager;
