//! Personal Message Bus Core Library
//!
//! Typed JSON envelopes over a shared topic, so small tools on different
//! machines (clipboard sync, notifications, remote triggers, log streaming)
//! can talk without a central server holding business logic.
//!
//! ## Overview
//!
//! - **Envelope codec**: provenance tagging, multi-key AES-CFB encryption,
//!   self-echo suppression
//! - **Transports**: AMQP topic exchange, WebSocket realm, HTTP long-poll,
//!   in-process memory bus
//! - **Connection supervisor**: bounded queues in front of a link that is
//!   re-established forever, with a local `Reconnected` signal
//! - **Broker hub**: realm-partitioned WebSocket fan-out with idle-realm
//!   reaping
//! - **Auth and election**: key distribution handshake and active/standby
//!   introducer election
//!
//! ## Quick Start
//!
//! ```ignore
//! use pmb_core::{ops, Bus, BusConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = Bus::new(BusConfig::from_env());
//!     let id = pmb_core::generate_random_id("remoteCopy");
//!     let mut conn = bus.connect_client(&id, &mut prompt).await?;
//!
//!     // Put text on the clipboard of whichever machine runs the introducer
//!     ops::remote_copy(&mut conn, "hello").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod broker;
pub mod bus;
pub mod codec;
pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod introducer;
pub mod logging;
pub mod message;
pub mod ops;
pub mod transport;

// Re-exports
pub use auth::{KeySource, Role};
pub use broker::{BrokerConfig, BrokerServer};
pub use bus::Bus;
pub use codec::Codec;
pub use config::{BusConfig, ConfigStore};
pub use connection::Connection;
pub use crypto::KeySet;
pub use error::{BusError, BusResult};
pub use identity::{generate_random_id, generate_random_string, LocalNetInfo};
pub use introducer::{Introducer, IntroducerActions};
pub use logging::{init_logging, LogOptions};
pub use message::{Envelope, Message};
pub use transport::{transport_for, Transport};
