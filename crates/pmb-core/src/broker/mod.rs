//! WebSocket broker hub
//!
//! Realm-partitioned fan-out switch for the WebSocket backend. The hub never
//! looks inside envelopes; it only moves text frames between sockets that
//! share a realm path.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────┐   attach    ┌──────────────┐
//!  TCP accept ──► │   BrokerServer   │ ──────────► │   Registry   │ (one task)
//!                 └──────────────────┘             └──────┬───────┘
//!                                                         │ lazily spawns
//!                     ┌───────────────────────────────────┼──────────────┐
//!                     ▼                                   ▼              ▼
//!              ┌─────────────┐                     ┌─────────────┐
//!              │ Realm actor │  /pmb/home/         │ Realm actor │  /pmb/work/
//!              └──────┬──────┘                     └─────────────┘
//!           broadcast │ try_send
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//!   client write task       client write task      (one read task each)
//! ```
//!
//! Every piece of mutable state lives inside exactly one task: the realm map
//! in the registry, each client set in its realm actor.
//!
//! ## Lifecycle
//!
//! - A realm actor is spawned on the first attach for its path.
//! - A client leaves its realm when its socket read fails or times out, or
//!   when its send buffer overflows.
//! - Every sweep interval the registry retires realms with no clients.

pub mod client;
pub mod realm;
pub mod registry;
pub mod server;

use std::time::Duration;

pub use registry::{RealmStats, RegistryHandle};
pub use server::BrokerServer;

/// Broker timings and limits
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Listen address
    pub address: String,
    /// Deadline for a single socket write
    pub write_wait: Duration,
    /// Read deadline, refreshed by any inbound frame including pongs
    pub pong_wait: Duration,
    /// Ping interval, shorter than `pong_wait`
    pub ping_period: Duration,
    /// Largest accepted frame/message in bytes
    pub max_message_size: usize,
    /// Per-client send buffer; overflowing it disconnects the client
    pub send_buffer: usize,
    /// How often idle realms are reaped
    pub sweep_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        let pong_wait = Duration::from_secs(60);
        Self {
            address: "0.0.0.0:3000".to_string(),
            write_wait: Duration::from_secs(10),
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            max_message_size: 2048,
            send_buffer: 256,
            sweep_interval: Duration::from_secs(6),
        }
    }
}

/// Realm name for a request path, if it is a valid `/pmb/<category>/` route
pub fn realm_from_path(path: &str) -> Option<&str> {
    let category = path.strip_prefix("/pmb/")?.strip_suffix('/')?;
    if category.is_empty() || category.contains('/') {
        return None;
    }
    Some(path)
}

/// Collapse a frame to a single line the way every client expects
pub(crate) fn normalize_frame(text: &str) -> String {
    text.replace('\n', " ").trim().to_string()
}
