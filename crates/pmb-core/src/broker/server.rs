//! TCP accept loop and WebSocket upgrade for the broker hub

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::client::serve_client;
use super::registry::{spawn_registry, RegistryHandle};
use super::{realm_from_path, BrokerConfig};
use crate::error::BusResult;

/// A bound broker, ready to [`run`](BrokerServer::run)
pub struct BrokerServer {
    listener: TcpListener,
    config: Arc<BrokerConfig>,
    registry: RegistryHandle,
    cancel: CancellationToken,
}

impl BrokerServer {
    /// Bind `config.address` and start the registry
    pub async fn bind(config: BrokerConfig, cancel: CancellationToken) -> BusResult<Self> {
        let listener = TcpListener::bind(&config.address).await?;
        let registry = spawn_registry(config.sweep_interval, cancel.child_token());
        Ok(Self {
            listener,
            config: Arc::new(config),
            registry,
            cancel,
        })
    }

    pub fn local_addr(&self) -> BusResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Handle for inspecting live realms
    pub fn registry(&self) -> RegistryHandle {
        self.registry.clone()
    }

    /// Accept connections until cancelled
    pub async fn run(self) -> BusResult<()> {
        info!(addr = %self.local_addr()?, "Broker listening");
        let next_client = Arc::new(AtomicU64::new(1));

        loop {
            let (stream, addr) = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let client = next_client.fetch_add(1, Ordering::SeqCst);
            let registry = self.registry.clone();
            let config = self.config.clone();
            let cancel = self.cancel.child_token();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = handle_connection(stream, addr, client, registry, config) => {}
                }
            });
        }

        info!("Broker stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    client: u64,
    registry: RegistryHandle,
    config: Arc<BrokerConfig>,
) {
    let realm_cell = Arc::new(Mutex::new(None::<String>));
    let realm_slot = realm_cell.clone();

    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let path = req.uri().path();
        match realm_from_path(path) {
            Some(realm) => {
                *realm_slot.lock() = Some(realm.to_string());
                Ok(resp)
            }
            None => {
                let mut err = ErrorResponse::new(Some(format!("no realm at {}", path)));
                *err.status_mut() = StatusCode::NOT_FOUND;
                Err(err)
            }
        }
    };

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);

    let socket = match accept_hdr_async_with_config(stream, callback, Some(ws_config)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(%addr, error = %e, "Upgrade failed");
            return;
        }
    };

    let Some(realm_name) = realm_cell.lock().take() else {
        return;
    };

    let (tx, outbox) = mpsc::channel(config.send_buffer);
    let realm = match registry.attach(&realm_name, client, tx).await {
        Ok(realm) => realm,
        Err(e) => {
            warn!(%addr, error = %e, "Registry unavailable");
            return;
        }
    };
    debug!(%addr, client, realm = %realm_name, "Client attached");

    serve_client(socket, client, realm, outbox, config).await;
}
