//! Registry actor: realm name → realm actor, plus idle-realm reaping

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::realm::{spawn_realm, ClientId, RealmHandle};
use crate::error::{BusError, BusResult};

enum RegistryCommand {
    Attach {
        realm: String,
        client: ClientId,
        tx: mpsc::Sender<String>,
        reply: oneshot::Sender<RealmHandle>,
    },
    Stats {
        reply: oneshot::Sender<Vec<RealmStats>>,
    },
}

/// Snapshot of one live realm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmStats {
    pub name: String,
    /// Changes whenever the realm is reaped and later recreated
    pub instance: u64,
    pub clients: usize,
}

/// Mailbox of the registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    /// Join `client` to `realm`, creating the realm if needed
    pub async fn attach(
        &self,
        realm: &str,
        client: ClientId,
        tx: mpsc::Sender<String>,
    ) -> BusResult<RealmHandle> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Attach {
                realm: realm.to_string(),
                client,
                tx,
                reply,
            })
            .await
            .map_err(|_| BusError::Closed)?;
        rx.await.map_err(|_| BusError::Closed)
    }

    /// Every live realm, sorted by name
    pub async fn realms(&self) -> BusResult<Vec<RealmStats>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Stats { reply })
            .await
            .map_err(|_| BusError::Closed)?;
        rx.await.map_err(|_| BusError::Closed)
    }
}

struct Registry {
    realms: HashMap<String, RealmHandle>,
    next_instance: u64,
    cancel: CancellationToken,
}

impl Registry {
    async fn attach(
        &mut self,
        name: String,
        client: ClientId,
        tx: mpsc::Sender<String>,
    ) -> RealmHandle {
        let existing = self.realms.get(&name).cloned();
        let realm = match existing {
            Some(realm) => realm,
            None => self.create(name.clone()),
        };

        if realm.add(client, tx.clone()).await {
            return realm;
        }

        // actor vanished between sweeps; start over with a fresh one
        let realm = self.create(name);
        realm.add(client, tx).await;
        realm
    }

    fn create(&mut self, name: String) -> RealmHandle {
        self.next_instance += 1;
        debug!(realm = %name, instance = self.next_instance, "Creating realm");
        let realm = spawn_realm(name.clone(), self.next_instance, self.cancel.child_token());
        self.realms.insert(name, realm.clone());
        realm
    }

    async fn sweep(&mut self) {
        debug!(realms = self.realms.len(), "Checking for expired realms");
        let mut retired = Vec::new();
        for (name, realm) in &self.realms {
            if realm.retire_if_empty().await {
                retired.push(name.clone());
            }
        }
        for name in retired {
            debug!(realm = %name, "Realm removed");
            self.realms.remove(&name);
        }
    }

    async fn stats(&self) -> Vec<RealmStats> {
        let mut stats = Vec::with_capacity(self.realms.len());
        for (name, realm) in &self.realms {
            stats.push(RealmStats {
                name: name.clone(),
                instance: realm.instance(),
                clients: realm.count().await.unwrap_or(0),
            });
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

/// Start the registry actor
pub fn spawn_registry(sweep_interval: Duration, cancel: CancellationToken) -> RegistryHandle {
    let (tx, mut rx) = mpsc::channel(64);

    tokio::spawn(async move {
        let mut registry = Registry {
            realms: HashMap::new(),
            next_instance: 0,
            cancel: cancel.clone(),
        };
        let mut ticker = interval_at(Instant::now() + sweep_interval, sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => registry.sweep().await,
                command = rx.recv() => match command {
                    Some(RegistryCommand::Attach { realm, client, tx, reply }) => {
                        let handle = registry.attach(realm, client, tx).await;
                        let _ = reply.send(handle);
                    }
                    Some(RegistryCommand::Stats { reply }) => {
                        let _ = reply.send(registry.stats().await);
                    }
                    None => break,
                },
            }
        }
        debug!("Registry stopped");
    });

    RegistryHandle { tx }
}
