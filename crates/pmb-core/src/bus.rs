//! Entry point tying configuration, transports and the auth handshake
//! together

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::auth::{self, KeySource, Role};
use crate::config::BusConfig;
use crate::connection::Connection;
use crate::crypto::KeySet;
use crate::error::BusResult;
use crate::transport::transport_for;

/// Factory for connections sharing one configuration
#[derive(Debug, Clone)]
pub struct Bus {
    config: BusConfig,
    cancel: CancellationToken,
}

impl Bus {
    pub fn new(config: BusConfig) -> Self {
        Self::with_cancel(config, CancellationToken::new())
    }

    /// Connections opened by this bus stop when `cancel` fires
    pub fn with_cancel(config: BusConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    async fn open(&self, id: &str, sub: Option<&str>, keys: KeySet) -> BusResult<Connection> {
        let transport = transport_for(&self.config, id, sub)?;
        let cancel = self.cancel.child_token();
        Connection::open_with_cancel(transport, id, &self.config, keys, cancel).await
    }

    /// Connect as a client, obtaining keys through the handshake if none are
    /// configured
    pub async fn connect_client(
        &self,
        id: &str,
        source: &mut dyn KeySource,
    ) -> BusResult<Connection> {
        let mut conn = self.open(id, None, KeySet::empty()).await?;
        auth::establish_keys(&mut conn, &self.config, Role::Client, source).await?;
        Ok(conn)
    }

    /// Connect as an introducer. Without a configured key a fresh one is
    /// generated so clients have something to request.
    pub async fn connect_introducer(&self, id: &str) -> BusResult<Connection> {
        let keys = match self.config.key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => KeySet::parse(key)?,
            None => {
                let keys = KeySet::from_keys(vec![KeySet::generate_key()]);
                warn!(
                    ?keys,
                    "No key configured, generated a new one; run copy-key to fetch it"
                );
                keys
            }
        };
        self.open(id, None, keys).await
    }

    /// Connect with whatever keys are configured, without verifying them
    pub async fn connect_passive(&self, id: &str) -> BusResult<Connection> {
        let keys = match self.config.key.as_deref().filter(|k| !k.is_empty()) {
            Some(key) => KeySet::parse(key)?,
            None => KeySet::empty(),
        };
        self.open(id, None, keys).await
    }

    /// Open a named sub-channel carrying the parent's keys
    pub async fn connect_sub(&self, parent: &Connection, sub: &str) -> BusResult<Connection> {
        let id = format!("{}-{}", parent.id(), sub);
        debug!(%id, sub, "Opening sub connection");
        self.open(&id, Some(sub), parent.keys()).await
    }

    /// Ask the active introducer to copy its keys to the clipboard
    pub async fn copy_key(&self, id: &str) -> BusResult<Connection> {
        let conn = self.open(id, None, KeySet::empty()).await?;
        auth::copy_key(&conn).await?;
        Ok(conn)
    }
}
