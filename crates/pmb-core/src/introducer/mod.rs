//! Introducer runtime
//!
//! Runs the election over a live [`Connection`] and, while active, performs
//! the user-facing side effects requested by clients through
//! [`IntroducerActions`], acknowledging each one back to its sender.

pub mod election;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use election::{Election, ElectionEvent, ElectionOutput};

use crate::connection::Connection;
use crate::error::{BusError, BusResult};
use crate::message::{Envelope, Message};

/// Silence after which a standby introducer takes over
pub const SILENCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Desktop side effects an active introducer performs
#[async_trait]
pub trait IntroducerActions: Send {
    async fn copy_to_clipboard(&mut self, data: &str) -> BusResult<()>;

    async fn open_url(&mut self, url: &str) -> BusResult<()>;

    async fn display_notification(&mut self, message: &str, url: &str, level: f64) -> BusResult<()>;
}

pub struct Introducer<A> {
    conn: Connection,
    election: Election,
    actions: A,
    silence: Duration,
    active_tx: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl<A: IntroducerActions> Introducer<A> {
    pub fn new(conn: Connection, level: f64, actions: A, cancel: CancellationToken) -> Self {
        let (active_tx, _) = watch::channel(true);
        Self {
            conn,
            election: Election::new(level),
            actions,
            silence: SILENCE_TIMEOUT,
            active_tx,
            cancel,
        }
    }

    /// Override the silence timeout
    pub fn with_silence_timeout(mut self, silence: Duration) -> Self {
        self.silence = silence;
        self
    }

    /// Follow the active/standby state
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.active_tx.subscribe()
    }

    /// Run until cancelled or the connection shuts down
    pub async fn run(mut self) -> BusResult<()> {
        info!(id = %self.conn.id(), level = self.election.level(), "Introducer starting");
        self.step(ElectionEvent::Startup).await?;

        loop {
            let received = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                received = tokio::time::timeout(self.silence, self.conn.recv()) => received,
            };

            match received {
                Err(_) => self.step(ElectionEvent::Silence).await?,
                Ok(Some(envelope)) => self.handle(envelope).await?,
                Ok(None) => return Err(BusError::Closed),
            }
        }
    }

    async fn step(&mut self, event: ElectionEvent) -> BusResult<()> {
        let was_active = self.election.is_active();
        let outputs = self.election.handle(event);
        let active = self.election.is_active();

        if was_active != active {
            info!(id = %self.conn.id(), active, ?event, "Election state changed");
        }
        self.active_tx.send_replace(active);

        for output in outputs {
            let message = match output {
                ElectionOutput::AnnouncePresence { level } => Message::IntroducerPresent { level },
                ElectionOutput::CallRoll => Message::IntroducerRollCall,
            };
            self.conn.send(&message).await?;
        }
        Ok(())
    }

    async fn handle(&mut self, envelope: Envelope) -> BusResult<()> {
        if envelope.is_reconnected() {
            return self.step(ElectionEvent::Reconnected).await;
        }

        let message = match envelope.message() {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed message");
                return Ok(());
            }
        };

        match message {
            Message::IntroducerPresent { level } => {
                return self.step(ElectionEvent::PresenceAnnounced { level }).await;
            }
            Message::IntroducerRollCall => return self.step(ElectionEvent::RollCall).await,
            _ if !self.election.is_active() => {
                debug!(kind = message.type_name(), "Standby, ignoring message");
                return Ok(());
            }
            _ => {}
        }

        let Some(origin) = envelope.sender_id().map(str::to_string) else {
            debug!(kind = message.type_name(), "Message without sender id, ignoring");
            return Ok(());
        };

        let reply = match message {
            Message::CopyData { data } => {
                let result = self.actions.copy_to_clipboard(&data).await;
                self.perform("copy", result)
                    .then(|| Message::DataCopied { origin })
            }
            Message::OpenUrl { data } => {
                let result = self.actions.open_url(&data).await;
                self.perform("open url", result)
                    .then(|| Message::UrlOpened { origin })
            }
            Message::Notification {
                notification_id,
                message,
                level,
                url,
            } => {
                let result = self.actions.display_notification(&message, &url, level).await;
                self.perform("notify", result).then(|| Message::NotificationDisplayed {
                    origin,
                    notification_id,
                    level,
                })
            }
            Message::TestAuth => Some(Message::AuthValid { origin }),
            Message::RequestAuth => {
                let keys = self.conn.keys();
                if keys.is_empty() {
                    warn!(%origin, "Key requested but this introducer has no key");
                } else {
                    let result = self.actions.copy_to_clipboard(&keys.joined()).await;
                    if self.perform("copy key", result) {
                        info!(%origin, "Key copied to clipboard");
                    }
                }
                None
            }
            other => {
                debug!(kind = other.type_name(), "Ignoring message");
                None
            }
        };

        if let Some(reply) = reply {
            self.conn.send(&reply).await?;
        }
        Ok(())
    }

    fn perform(&self, what: &str, result: BusResult<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(id = %self.conn.id(), error = %e, "Unable to {}", what);
                false
            }
        }
    }
}
