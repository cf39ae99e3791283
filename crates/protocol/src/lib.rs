//! Docket Protocol
//!
//! Shared types for communication between the docket server and its sync
//! clients. These types are serialized as JSON over WebSocket.

use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use client::ClientCommand;
pub use server::{topics, Envelope};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time as a wire timestamp (unix seconds, `Z`-suffixed)
pub fn wire_now() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format!("{}Z", secs)
}

/// Parse a wire timestamp back into unix seconds. The `Z` suffix is
/// optional; anything non-numeric beyond that returns `None`.
pub fn parse_wire_ts(value: &str) -> Option<u64> {
    let stripped = value.strip_suffix('Z').unwrap_or(value);
    stripped.parse::<u64>().ok()
}
