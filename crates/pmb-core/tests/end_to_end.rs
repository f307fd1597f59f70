//! Full round trips through a live broker
//!
//! A broker hub on a loopback port, an introducer with a recording desktop,
//! and clients that come up with or without a configured key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pmb_core::ops::{self, Notification};
use pmb_core::{
    BrokerConfig, BrokerServer, Bus, BusConfig, BusError, BusResult, Introducer,
    IntroducerActions, KeySet, KeySource,
};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Default)]
struct Desktop {
    clipboard: Arc<Mutex<Vec<String>>>,
    urls: Arc<Mutex<Vec<String>>>,
    notes: Arc<Mutex<Vec<(String, f64)>>>,
}

#[async_trait]
impl IntroducerActions for Desktop {
    async fn copy_to_clipboard(&mut self, data: &str) -> BusResult<()> {
        self.clipboard.lock().push(data.to_string());
        Ok(())
    }

    async fn open_url(&mut self, url: &str) -> BusResult<()> {
        self.urls.lock().push(url.to_string());
        Ok(())
    }

    async fn display_notification(
        &mut self,
        message: &str,
        _url: &str,
        level: f64,
    ) -> BusResult<()> {
        self.notes.lock().push((message.to_string(), level));
        Ok(())
    }
}

/// Pastes whatever the introducer last put on the clipboard
struct PasteFromDesktop(Desktop);

#[async_trait]
impl KeySource for PasteFromDesktop {
    async fn read_key(&mut self) -> BusResult<String> {
        for _ in 0..100 {
            if let Some(key) = self.0.clipboard.lock().last().cloned() {
                return Ok(key);
            }
            sleep(Duration::from_millis(20)).await;
        }
        Err(BusError::Transport("clipboard stayed empty".into()))
    }
}

struct Harness {
    url: String,
    desktop: Desktop,
    key: String,
    cancel: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Harness {
    async fn start() -> Self {
        let cancel = CancellationToken::new();
        let server = BrokerServer::bind(
            BrokerConfig {
                address: "127.0.0.1:0".into(),
                ..Default::default()
            },
            cancel.clone(),
        )
        .await
        .unwrap();
        let url = format!("ws://{}", server.local_addr().unwrap());
        let registry = server.registry();
        tokio::spawn(server.run());

        let key = KeySet::generate_key();
        let desktop = Desktop::default();
        let bus = Bus::with_cancel(
            BusConfig {
                primary_uri: Some(url.clone()),
                key: Some(key.clone()),
                ..Default::default()
            },
            cancel.clone(),
        );
        let conn = bus.connect_introducer("introducer-e2e").await.unwrap();
        let intro = Introducer::new(conn, 1.0, desktop.clone(), cancel.clone());
        tokio::spawn(intro.run());

        // the hub attaches a socket to its realm just after the upgrade
        for _ in 0..100 {
            let realms = registry.realms().await.unwrap();
            if realms.iter().any(|r| r.clients == 1) {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }

        Self {
            url,
            desktop,
            key,
            cancel,
        }
    }

    fn client_bus(&self, key: Option<String>) -> Bus {
        Bus::with_cancel(
            BusConfig {
                primary_uri: Some(self.url.clone()),
                key,
                auth_timeout: Duration::from_secs(5),
                ..Default::default()
            },
            self.cancel.clone(),
        )
    }
}

// ============================================================================
// Remote Operations
// ============================================================================

#[tokio::test]
async fn test_remote_copy_over_broker() {
    let harness = Harness::start().await;
    let bus = harness.client_bus(Some(harness.key.clone()));
    let mut source = PasteFromDesktop(harness.desktop.clone());

    let mut conn = bus.connect_client("remoteCopy-e2e", &mut source).await.unwrap();
    timeout(Duration::from_secs(5), ops::remote_copy(&mut conn, "from afar"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(harness.desktop.clipboard.lock().as_slice(), ["from afar".to_string()]);
}

#[tokio::test]
async fn test_open_url_and_notify_over_broker() {
    let harness = Harness::start().await;
    let bus = harness.client_bus(Some(harness.key.clone()));
    let mut source = PasteFromDesktop(harness.desktop.clone());
    let mut conn = bus.connect_client("notify-e2e", &mut source).await.unwrap();

    ops::open_url(&mut conn, "https://example.org/").await.unwrap();
    let id = ops::send_notification(
        &mut conn,
        &Notification {
            message: "build finished".into(),
            url: String::new(),
            level: 2.0,
        },
    )
    .await
    .unwrap();

    assert!(!id.is_empty());
    assert_eq!(harness.desktop.urls.lock().as_slice(), ["https://example.org/".to_string()]);
    assert_eq!(harness.desktop.notes.lock().as_slice(), [("build finished".to_string(), 2.0)]);
}

// ============================================================================
// Key Handshake
// ============================================================================

#[tokio::test]
async fn test_keyless_client_learns_key_from_introducer() {
    let harness = Harness::start().await;
    let bus = harness.client_bus(None);
    let mut source = PasteFromDesktop(harness.desktop.clone());

    let mut conn = timeout(Duration::from_secs(10), bus.connect_client("keyless-e2e", &mut source))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(conn.keys().joined(), harness.key);
    ops::remote_copy(&mut conn, "now encrypted").await.unwrap();
    assert_eq!(harness.desktop.clipboard.lock().last().map(String::as_str), Some("now encrypted"));
}

#[tokio::test]
async fn test_wrong_key_times_out() {
    let harness = Harness::start().await;
    let bus = Bus::with_cancel(
        BusConfig {
            primary_uri: Some(harness.url.clone()),
            key: Some(KeySet::generate_key()),
            auth_timeout: Duration::from_millis(500),
            ..Default::default()
        },
        harness.cancel.clone(),
    );
    let mut source = PasteFromDesktop(harness.desktop.clone());

    let result = bus.connect_client("wrongkey-e2e", &mut source).await;
    assert!(matches!(result, Err(BusError::AuthTimeout)));
}

// ============================================================================
// Triggers
// ============================================================================

#[tokio::test]
async fn test_trigger_between_clients() {
    let harness = Harness::start().await;
    let bus = harness.client_bus(Some(harness.key.clone()));
    let mut source = PasteFromDesktop(harness.desktop.clone());
    let mut waiter = bus.connect_client("waiter-e2e", &mut source).await.unwrap();
    let runner = bus.connect_client("runner-e2e", &mut source).await.unwrap();

    let wait = tokio::spawn(async move { ops::wait_for_trigger(&mut waiter, "deploy").await });
    sleep(Duration::from_millis(100)).await;
    ops::send_trigger(&runner, "deploy", false).await.unwrap();

    let success = timeout(Duration::from_secs(5), wait).await.unwrap().unwrap().unwrap();
    assert!(!success);
}
