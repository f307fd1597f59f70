//! In-process loopback bus
//!
//! Every link attached to a [`MemoryBus`] receives every body sent by any
//! link, including its own, exactly like a broker realm. Failures can be
//! scripted, which makes this the backend of choice for exercising the
//! reconnect path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Link, LinkReceiver, LinkSender, Transport};
use crate::error::{BusError, BusResult};

const LINK_BUFFER: usize = 256;

#[derive(Default)]
struct Hub {
    links: Mutex<HashMap<u64, mpsc::Sender<Vec<u8>>>>,
    next_link: AtomicU64,
    failing_opens: AtomicUsize,
    opens: AtomicUsize,
}

/// Shared in-process topic. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    name: String,
    hub: Arc<Hub>,
}

impl MemoryBus {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hub: Arc::default(),
        }
    }

    /// Process-wide bus registered under `name`, created on first use.
    ///
    /// The registry only holds weak references: once every handle to a bus
    /// is dropped, the next lookup of that name starts a fresh bus.
    pub fn named(name: &str) -> Self {
        static REGISTRY: OnceLock<Mutex<HashMap<String, Weak<Hub>>>> = OnceLock::new();
        let mut registry = REGISTRY.get_or_init(Default::default).lock();
        registry.retain(|_, hub| hub.strong_count() > 0);

        if let Some(hub) = registry.get(name).and_then(Weak::upgrade) {
            return Self {
                name: name.to_string(),
                hub,
            };
        }
        let bus = MemoryBus::new(name);
        registry.insert(name.to_string(), Arc::downgrade(&bus.hub));
        bus
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make the next `n` calls to `open` fail
    pub fn fail_next_opens(&self, n: usize) {
        self.hub.failing_opens.store(n, Ordering::SeqCst);
    }

    /// Total `open` attempts so far, failed ones included
    pub fn open_count(&self) -> usize {
        self.hub.opens.load(Ordering::SeqCst)
    }

    /// Number of currently attached links
    pub fn link_count(&self) -> usize {
        self.hub.links.lock().len()
    }

    /// Sever every attached link, as if the server went away
    pub fn disconnect_all(&self) {
        let dropped = self.hub.links.lock().drain().count();
        debug!(bus = %self.name, dropped, "Disconnected all memory links");
    }

    /// Sever only the longest-lived link
    pub fn disconnect_oldest(&self) {
        let mut links = self.hub.links.lock();
        if let Some(oldest) = links.keys().min().copied() {
            links.remove(&oldest);
        }
    }

    fn attach(&self) -> BusResult<Link> {
        self.hub.opens.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .hub
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(BusError::Transport(format!("memory bus {} refused link", self.name)));
        }

        let (tx, rx) = mpsc::channel(LINK_BUFFER);
        let link_id = self.hub.next_link.fetch_add(1, Ordering::SeqCst);
        self.hub.links.lock().insert(link_id, tx);

        Ok(Link::new(
            MemorySender {
                hub: self.hub.clone(),
                link_id,
            },
            MemoryReceiver { rx },
        ))
    }
}

struct MemorySender {
    hub: Arc<Hub>,
    link_id: u64,
}

#[async_trait]
impl LinkSender for MemorySender {
    async fn send(&mut self, body: &str) -> BusResult<()> {
        let mut links = self.hub.links.lock();
        if !links.contains_key(&self.link_id) {
            return Err(BusError::Transport("memory link severed".into()));
        }
        // same backpressure policy as a broker realm: slow readers are cut off
        links.retain(|_, tx| tx.try_send(body.as_bytes().to_vec()).is_ok());
        Ok(())
    }
}

struct MemoryReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

#[async_trait]
impl LinkReceiver for MemoryReceiver {
    async fn recv(&mut self) -> BusResult<Vec<u8>> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| BusError::Transport("memory link severed".into()))
    }
}

/// [`Transport`] over a [`MemoryBus`]
#[derive(Clone)]
pub struct MemoryTransport {
    bus: MemoryBus,
}

impl MemoryTransport {
    pub fn new(bus: MemoryBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(&self) -> BusResult<Link> {
        self.bus.attach()
    }

    fn describe(&self) -> String {
        format!("mem://{}", self.bus.name())
    }
}
