//! Broker-side client: one read task and one write task per socket

use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use super::realm::{ClientId, RealmHandle};
use super::{normalize_frame, BrokerConfig};

/// Pump frames between `socket` and `realm` until either side goes away.
///
/// `outbox` is the receiving end of the send buffer registered with the
/// realm; the realm closes it when it drops this client.
pub async fn serve_client<S>(
    socket: WebSocketStream<S>,
    client: ClientId,
    realm: RealmHandle,
    outbox: mpsc::Receiver<String>,
    config: Arc<BrokerConfig>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(process_writes(sink, outbox, config.clone(), client));
    process_reads(stream, &realm, &config, client).await;

    realm.remove(client).await;
    if let Err(e) = writer.await {
        warn!(client, error = %e, "Client write task failed");
    }
    debug!(client, realm = %realm.name(), "Client detached");
}

async fn process_reads<S>(
    mut stream: SplitStream<WebSocketStream<S>>,
    realm: &RealmHandle,
    config: &BrokerConfig,
    client: ClientId,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let frame = match timeout(config.pong_wait, stream.next()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                warn!(client, error = %e, "Read failed");
                return;
            }
            Ok(None) => return,
            Err(_) => {
                debug!(client, "Read deadline exceeded");
                return;
            }
        };

        match frame {
            WsMessage::Text(text) => realm.broadcast(normalize_frame(&text)).await,
            WsMessage::Close(_) => return,
            // pongs only refresh the deadline; pings are answered by tungstenite
            _ => {}
        }
    }
}

async fn process_writes<S>(
    mut sink: SplitSink<WebSocketStream<S>, WsMessage>,
    mut outbox: mpsc::Receiver<String>,
    config: Arc<BrokerConfig>,
    client: ClientId,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut ping = interval_at(Instant::now() + config.ping_period, config.ping_period);

    loop {
        let frame = tokio::select! {
            message = outbox.recv() => match message {
                Some(text) => WsMessage::Text(text),
                None => {
                    let _ = timeout(config.write_wait, sink.send(WsMessage::Close(None))).await;
                    return;
                }
            },
            _ = ping.tick() => WsMessage::Ping(Vec::new()),
        };

        match timeout(config.write_wait, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(client, error = %e, "Write failed");
                return;
            }
            Err(_) => {
                debug!(client, "Write deadline exceeded");
                return;
            }
        }
    }
}
