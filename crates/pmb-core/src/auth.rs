//! Key distribution handshake
//!
//! A client without keys broadcasts `RequestAuth`. The active introducer
//! answers out-of-band by putting its keys on the clipboard, and a human
//! pastes them into the client through a [`KeySource`]. The client may then
//! prove the key with `TestAuth` and wait for a matching `AuthValid`.
//!
//! ```text
//!   client                         introducer
//!     │ ── RequestAuth ──────────────► │  keys → clipboard
//!     │ ◄─ (human pastes key) ─────────┤
//!     │ ── TestAuth (encrypted) ─────► │
//!     │ ◄─ AuthValid{origin=client} ── │
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::connection::Connection;
use crate::crypto::KeySet;
use crate::error::{BusError, BusResult};
use crate::message::Message;

/// Pause after `RequestAuth` so the introducer can act before we prompt
pub const REQUEST_SETTLE: Duration = Duration::from_millis(200);

/// Pause after a standalone `RequestAuth` so it reaches the wire
pub const COPY_KEY_SETTLE: Duration = Duration::from_secs(1);

/// Supplies a key string once the introducer has been asked for it
#[async_trait]
pub trait KeySource: Send {
    async fn read_key(&mut self) -> BusResult<String>;
}

/// Role of the connection going through the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Introducer,
}

/// Ask the introducer for keys and read the answer from `source`
pub async fn request_key(conn: &Connection, source: &mut dyn KeySource) -> BusResult<String> {
    conn.send(&Message::RequestAuth).await?;
    tokio::time::sleep(REQUEST_SETTLE).await;
    let key = source.read_key().await?;
    Ok(key.trim().to_string())
}

/// Send `TestAuth` and wait for the introducer's `AuthValid` for us
pub async fn test_auth(conn: &mut Connection, limit: Duration) -> BusResult<()> {
    conn.send(&Message::TestAuth).await?;
    let id = conn.id().to_string();
    conn.wait_for(limit, "AuthValid", |m| {
        matches!(m, Message::AuthValid { origin } if *origin == id)
    })
    .await
    .map(|_| ())
    .map_err(|e| match e {
        BusError::Timeout(_) => BusError::AuthTimeout,
        other => other,
    })
}

/// Install keys on a fresh connection.
///
/// With a configured key: parse it, then verify it unless this is the
/// introducer or `trust_key` is set.
///
/// Without one: request, parse and (unless `trust_key`) verify in a loop
/// that only ends with a working key. A malformed key aborts.
pub async fn establish_keys(
    conn: &mut Connection,
    config: &BusConfig,
    role: Role,
    source: &mut dyn KeySource,
) -> BusResult<()> {
    if let Some(key) = config.key.as_deref().filter(|k| !k.is_empty()) {
        conn.set_keys(KeySet::parse(key)?);
        if role == Role::Client && !config.trust_key {
            test_auth(conn, config.auth_timeout).await?;
        }
        debug!(id = %conn.id(), "Using configured key");
        return Ok(());
    }

    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        conn.set_keys(KeySet::empty());
        let raw = request_key(conn, source).await?;
        conn.set_keys(KeySet::parse(&raw)?);

        if config.trust_key {
            return Ok(());
        }
        match test_auth(conn, config.auth_timeout).await {
            Ok(()) => {
                info!(id = %conn.id(), attempt, "Key accepted");
                return Ok(());
            }
            Err(BusError::AuthTimeout) => {
                warn!(id = %conn.id(), attempt, "Error with key: Auth key was invalid.")
            }
            Err(e) => return Err(e),
        }
    }
}

/// Broadcast a bare `RequestAuth` so the introducer copies its keys
pub async fn copy_key(conn: &Connection) -> BusResult<()> {
    conn.send(&Message::RequestAuth).await?;
    tokio::time::sleep(COPY_KEY_SETTLE).await;
    Ok(())
}
