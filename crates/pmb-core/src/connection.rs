//! Connection supervisor
//!
//! A [`Connection`] is one participant's duplex channel to the bus. Callers
//! push messages into a bounded outbound queue and pull [`Envelope`]s from a
//! bounded inbound queue; a background task keeps a [`Transport`] link alive
//! behind them.
//!
//! ```text
//!              ┌──────────── supervisor task ────────────┐
//!  send() ──►  out queue ──► prepare ──► LinkSender ──►  │ bus
//!  recv() ◄──  in queue  ◄── parse   ◄── LinkReceiver ◄──│
//!              └─────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//!
//! - The first `open()` runs inline; its error is returned to the caller.
//! - Afterwards any link failure moves to reconnecting: `open()` is retried
//!   with a fixed delay until it succeeds or the connection is cancelled.
//!   A link that fails within that delay of being opened waits out the delay
//!   before the first retry.
//! - After every successful reconnect exactly one internal `Reconnected`
//!   envelope is queued for the caller.
//! - A message whose bodies were only partly written when the link died
//!   resumes from the first unsent body on the new link.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::codec::Codec;
use crate::config::BusConfig;
use crate::crypto::KeySet;
use crate::error::{BusError, BusResult};
use crate::identity::LocalNetInfo;
use crate::message::{Envelope, Message};
use crate::transport::{Link, LinkReceiver, LinkSender, Transport};

struct Outgoing {
    contents: Map<String, Value>,
    done: Option<oneshot::Sender<()>>,
}

/// Prepared bodies of one message and how many are already on the wire
struct InFlight {
    bodies: Vec<String>,
    sent: usize,
    done: Option<oneshot::Sender<()>>,
}

/// One participant's handle on the bus.
///
/// Dropping the connection stops its supervisor.
pub struct Connection {
    id: String,
    out_tx: mpsc::Sender<Outgoing>,
    in_rx: mpsc::Receiver<Envelope>,
    keys: Arc<RwLock<KeySet>>,
    cancel: CancellationToken,
}

impl Connection {
    /// Open a connection for `id`. Fails if the first link cannot be set up.
    pub async fn open(
        transport: Arc<dyn Transport>,
        id: impl Into<String>,
        config: &BusConfig,
        keys: KeySet,
    ) -> BusResult<Self> {
        Self::open_with_cancel(transport, id, config, keys, CancellationToken::new()).await
    }

    /// Like [`Connection::open`], stopping when `cancel` fires
    pub async fn open_with_cancel(
        transport: Arc<dyn Transport>,
        id: impl Into<String>,
        config: &BusConfig,
        keys: KeySet,
        cancel: CancellationToken,
    ) -> BusResult<Self> {
        let id = id.into();
        let net = tokio::task::spawn_blocking(LocalNetInfo::lookup)
            .await
            .unwrap_or_default();
        let codec = Codec::with_net_info(id.clone(), net);

        debug!(%id, backend = %transport.describe(), "Opening connection");
        let link = transport.open().await.map_err(|e| {
            error!(%id, error = %e, "Initial connection failed");
            e
        })?;

        let (out_tx, out_rx) = mpsc::channel(config.queue_capacity);
        let (in_tx, in_rx) = mpsc::channel(config.queue_capacity);
        let keys = Arc::new(RwLock::new(keys));

        let supervisor = Supervisor {
            transport,
            codec,
            keys: keys.clone(),
            out_rx,
            in_tx,
            in_flight: None,
            reconnect_delay: config.reconnect_delay,
            cancel: cancel.clone(),
        };
        tokio::spawn(supervisor.run(link));

        Ok(Self {
            id,
            out_tx,
            in_rx,
            keys,
            cancel,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Snapshot of the current key set
    pub fn keys(&self) -> KeySet {
        self.keys.read().clone()
    }

    /// Replace the key set; applies to every message sent or received after
    /// this call
    pub fn set_keys(&self, keys: KeySet) {
        *self.keys.write() = keys;
    }

    /// Queue a typed message
    pub async fn send(&self, message: &Message) -> BusResult<()> {
        self.send_raw(message.to_contents()?).await
    }

    /// Queue an arbitrary JSON object
    pub async fn send_raw(&self, contents: Map<String, Value>) -> BusResult<()> {
        self.out_tx
            .send(Outgoing { contents, done: None })
            .await
            .map_err(|_| BusError::Closed)
    }

    /// Queue a message and wait until every body of it has been written
    pub async fn send_and_flush(&self, message: &Message) -> BusResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.out_tx
            .send(Outgoing {
                contents: message.to_contents()?,
                done: Some(done_tx),
            })
            .await
            .map_err(|_| BusError::Closed)?;
        done_rx.await.map_err(|_| BusError::Closed)
    }

    /// Next envelope, or `None` once the connection has shut down
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.in_rx.recv().await
    }

    /// Wait without limit for a message matching `pred`.
    ///
    /// Envelopes that fail to decode are skipped.
    pub async fn wait_until<F>(&mut self, mut pred: F) -> BusResult<Message>
    where
        F: FnMut(&Message) -> bool,
    {
        loop {
            let envelope = self.recv().await.ok_or(BusError::Closed)?;
            match envelope.message() {
                Ok(message) if pred(&message) => return Ok(message),
                Ok(_) => {}
                Err(e) => debug!(id = %self.id, error = %e, "Skipping undecodable message"),
            }
        }
    }

    /// Wait up to `limit` for a message matching `pred`; `what` names the
    /// awaited reply in the timeout error
    pub async fn wait_for<F>(&mut self, limit: Duration, what: &str, pred: F) -> BusResult<Message>
    where
        F: FnMut(&Message) -> bool,
    {
        tokio::time::timeout(limit, self.wait_until(pred))
            .await
            .map_err(|_| BusError::Timeout(format!("no {} within {:?}", what, limit)))?
    }

    /// Stop the supervisor; queued messages may be lost
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum Exit {
    Shutdown,
    LinkFailed(BusError),
}

struct Supervisor {
    transport: Arc<dyn Transport>,
    codec: Codec,
    keys: Arc<RwLock<KeySet>>,
    out_rx: mpsc::Receiver<Outgoing>,
    in_tx: mpsc::Sender<Envelope>,
    in_flight: Option<InFlight>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(mut self, mut link: Link) {
        let id = self.codec.id().to_string();
        loop {
            let opened = Instant::now();
            match self.serve(link).await {
                Exit::Shutdown => break,
                Exit::LinkFailed(e) => {
                    warn!(%id, error = %e, "Connection failed, reconnecting...");
                }
            }

            let short_lived = opened.elapsed() < self.reconnect_delay;
            link = match self.reconnect(short_lived).await {
                Some(link) => link,
                None => break,
            };
            info!(%id, "Reconnected.");

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = self.in_tx.send(Envelope::reconnected()) => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        debug!(%id, "Connection supervisor stopped");
    }

    async fn serve(&mut self, link: Link) -> Exit {
        let Link {
            mut sender,
            mut receiver,
        } = link;
        let Self {
            codec,
            keys,
            out_rx,
            in_tx,
            in_flight,
            cancel,
            ..
        } = self;
        let codec: &Codec = codec;
        let keys: &RwLock<KeySet> = keys;
        let in_tx: &mpsc::Sender<Envelope> = in_tx;

        tokio::select! {
            _ = cancel.cancelled() => Exit::Shutdown,
            exit = send_loop(sender.as_mut(), codec, keys, out_rx, in_flight) => exit,
            exit = recv_loop(receiver.as_mut(), codec, keys, in_tx) => exit,
        }
    }

    /// Reopen the link, sleeping `reconnect_delay` between attempts and also
    /// before the first one when `pause_first` is set
    async fn reconnect(&self, pause_first: bool) -> Option<Link> {
        let id = self.codec.id();
        let mut pause = pause_first;
        let mut attempt: u64 = 0;
        loop {
            if pause {
                tokio::select! {
                    _ = self.cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.reconnect_delay) => {}
                }
            }
            pause = true;

            attempt += 1;
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                res = self.transport.open() => match res {
                    Ok(link) => return Some(link),
                    Err(e) => {
                        warn!(%id, attempt, error = %e, "Setup failed, sleeping and then re-trying")
                    }
                },
            }
        }
    }
}

async fn send_loop(
    sender: &mut dyn LinkSender,
    codec: &Codec,
    keys: &RwLock<KeySet>,
    out_rx: &mut mpsc::Receiver<Outgoing>,
    in_flight: &mut Option<InFlight>,
) -> Exit {
    loop {
        if in_flight.is_none() {
            let Some(outgoing) = out_rx.recv().await else {
                return Exit::Shutdown;
            };
            let key_set = keys.read().clone();
            match codec.prepare(outgoing.contents, &key_set) {
                Ok(bodies) => {
                    *in_flight = Some(InFlight {
                        bodies,
                        sent: 0,
                        done: outgoing.done,
                    })
                }
                Err(e) => {
                    error!(id = %codec.id(), error = %e, "Unable to prepare message, dropping it");
                    continue;
                }
            }
        }

        if let Some(flight) = in_flight.as_mut() {
            while flight.sent < flight.bodies.len() {
                if let Err(e) = sender.send(&flight.bodies[flight.sent]).await {
                    return Exit::LinkFailed(e);
                }
                flight.sent += 1;
            }
        }

        if let Some(InFlight { done: Some(done), .. }) = in_flight.take() {
            let _ = done.send(());
        }
    }
}

async fn recv_loop(
    receiver: &mut dyn LinkReceiver,
    codec: &Codec,
    keys: &RwLock<KeySet>,
    in_tx: &mpsc::Sender<Envelope>,
) -> Exit {
    loop {
        let body = match receiver.recv().await {
            Ok(body) => body,
            Err(e) => return Exit::LinkFailed(e),
        };

        let key_set = keys.read().clone();
        if let Some(envelope) = codec.parse(&body, &key_set) {
            if in_tx.send(envelope).await.is_err() {
                return Exit::Shutdown;
            }
        }
    }
}
