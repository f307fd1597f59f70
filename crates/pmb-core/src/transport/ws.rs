//! WebSocket client backend
//!
//! One duplex socket per realm at `<base>/pmb/<realm>/`. The broker hub
//! rebroadcasts every text frame to all sockets of the realm, the sender's
//! own included.

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

use super::{Link, LinkReceiver, LinkSender, Transport};
use crate::error::{BusError, BusResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Realm URL for a base endpoint, category and optional sub-channel
pub fn realm_url(base: &Url, realm: &str, sub: Option<&str>) -> Url {
    let category = match sub {
        Some(sub) => format!("{}-{}", realm, sub),
        None => realm.to_string(),
    };
    let mut url = base.clone();
    let path = format!("{}/pmb/{}/", base.path().trim_end_matches('/'), category);
    url.set_path(&path);
    url
}

pub struct WsTransport {
    url: Url,
}

impl WsTransport {
    pub fn new(base: &Url, realm: &str, sub: Option<&str>) -> Self {
        Self {
            url: realm_url(base, realm, sub),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> BusResult<Link> {
        debug!(url = %self.url, "Connecting socket");
        let (stream, _) = connect_async(self.url.as_str()).await?;
        let (sink, stream) = stream.split();
        Ok(Link::new(WsSender { sink }, WsReceiver { stream }))
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

struct WsSender {
    sink: SplitSink<WsStream, WsMessage>,
}

#[async_trait]
impl LinkSender for WsSender {
    async fn send(&mut self, body: &str) -> BusResult<()> {
        self.sink.send(WsMessage::Text(body.to_string())).await?;
        Ok(())
    }
}

struct WsReceiver {
    stream: SplitStream<WsStream>,
}

#[async_trait]
impl LinkReceiver for WsReceiver {
    async fn recv(&mut self) -> BusResult<Vec<u8>> {
        loop {
            match self.stream.next().await {
                Some(Ok(WsMessage::Text(text))) => return Ok(text.into_bytes()),
                Some(Ok(WsMessage::Close(frame))) => {
                    return Err(BusError::Transport(format!("socket closed: {:?}", frame)));
                }
                // pings are answered by tungstenite itself
                Some(Ok(other)) => trace!(kind = ?other, "Ignoring non-text frame"),
                Some(Err(e)) => return Err(e.into()),
                None => return Err(BusError::Transport("socket closed".into())),
            }
        }
    }
}
