//! Realm actor: owns one realm's client set and fans out its traffic

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MAILBOX: usize = 64;

pub type ClientId = u64;

pub(crate) enum RealmCommand {
    Add {
        client: ClientId,
        tx: mpsc::Sender<String>,
    },
    /// Drops the client's sender, which ends its write task
    Remove { client: ClientId },
    Broadcast(String),
    Count { reply: oneshot::Sender<usize> },
    /// Exit and answer `true` if no clients are attached
    RetireIfEmpty { reply: oneshot::Sender<bool> },
}

/// Cloneable mailbox of a running realm actor
#[derive(Clone)]
pub struct RealmHandle {
    name: String,
    instance: u64,
    tx: mpsc::Sender<RealmCommand>,
}

impl RealmHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distinguishes successive actors created for the same realm name
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// Hand a frame to every attached client, the sender included
    pub async fn broadcast(&self, text: String) {
        let _ = self.tx.send(RealmCommand::Broadcast(text)).await;
    }

    pub async fn remove(&self, client: ClientId) {
        let _ = self.tx.send(RealmCommand::Remove { client }).await;
    }

    pub(crate) async fn add(&self, client: ClientId, tx: mpsc::Sender<String>) -> bool {
        self.tx.send(RealmCommand::Add { client, tx }).await.is_ok()
    }

    /// Attached clients, or `None` if the actor is gone
    pub async fn count(&self) -> Option<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(RealmCommand::Count { reply }).await.ok()?;
        rx.await.ok()
    }

    /// True if the actor exited (now or earlier) because it was empty
    pub(crate) async fn retire_if_empty(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(RealmCommand::RetireIfEmpty { reply }).await.is_err() {
            return true;
        }
        rx.await.unwrap_or(true)
    }
}

struct Realm {
    name: String,
    clients: HashMap<ClientId, mpsc::Sender<String>>,
}

impl Realm {
    fn broadcast(&mut self, text: &str) {
        let name = &self.name;
        self.clients.retain(|client, tx| match tx.try_send(text.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(realm = %name, client, "Send buffer full, disconnecting client");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

/// Start a realm actor
pub(crate) fn spawn_realm(name: String, instance: u64, cancel: CancellationToken) -> RealmHandle {
    let (tx, mut rx) = mpsc::channel(MAILBOX);
    let handle = RealmHandle {
        name: name.clone(),
        instance,
        tx,
    };

    tokio::spawn(async move {
        let mut realm = Realm {
            name,
            clients: HashMap::new(),
        };
        debug!(realm = %realm.name, instance, "Realm started");

        loop {
            let command = tokio::select! {
                _ = cancel.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            match command {
                RealmCommand::Add { client, tx } => {
                    realm.clients.insert(client, tx);
                }
                RealmCommand::Remove { client } => {
                    realm.clients.remove(&client);
                }
                RealmCommand::Broadcast(text) => realm.broadcast(&text),
                RealmCommand::Count { reply } => {
                    let _ = reply.send(realm.clients.len());
                }
                RealmCommand::RetireIfEmpty { reply } => {
                    let empty = realm.clients.is_empty();
                    let _ = reply.send(empty);
                    if empty {
                        debug!(realm = %realm.name, "Realm has no clients, retiring");
                        break;
                    }
                }
            }
        }
    });

    handle
}
