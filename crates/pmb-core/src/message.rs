//! Envelopes and the typed message vocabulary carried inside them
//!
//! On the wire every message is a flat JSON object with a `type` field plus
//! whatever keys the producer set. [`Envelope`] keeps that object as-is so
//! passthrough consumers can forward it, while [`Message`] is the typed view
//! the protocol layers match on.
//!
//! ```text
//! {"type":"CopyData","data":"hello","id":"remoteCopy-1a2b3c4d5e6f",
//!  "hostname":"laptop","ip":"192.168.1.20","sent":"2026-10-19T10:04:05+02:00"}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{BusError, BusResult};

/// Known message kinds exchanged on the bus.
///
/// Unrecognized `type` values decode to [`Message::Unknown`] so that newer
/// peers never break older ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Ask the active introducer to place `data` on its clipboard
    CopyData { data: String },

    /// Acknowledges a `CopyData` sent by `origin`
    DataCopied { origin: String },

    /// Ask the active introducer to open a URL
    #[serde(rename = "OpenURL")]
    OpenUrl { data: String },

    /// Acknowledges an `OpenURL` sent by `origin`
    #[serde(rename = "URLOpened")]
    UrlOpened { origin: String },

    /// User-facing notification
    Notification {
        #[serde(rename = "notification-id")]
        notification_id: String,
        message: String,
        level: f64,
        #[serde(default)]
        url: String,
    },

    /// Acknowledges a displayed notification
    NotificationDisplayed {
        origin: String,
        #[serde(rename = "notification-id")]
        notification_id: String,
        #[serde(default)]
        level: f64,
    },

    /// A key-less client asks for the shared key(s)
    RequestAuth,

    /// A client checks that its freshly obtained key works
    TestAuth,

    /// Introducer answer to `TestAuth` from `origin`
    AuthValid { origin: String },

    /// An introducer announces its election level
    IntroducerPresent { level: f64 },

    /// Every introducer must answer with `IntroducerPresent`
    IntroducerRollCall,

    /// Named trigger fired by a finished command
    Trigger {
        trigger: String,
        from: String,
        success: bool,
    },

    /// One line of a streamed log
    Stream { identifier: String, data: String },

    /// Synthetic, local-only signal that the transport was re-established
    Reconnected,

    /// Any `type` this build does not know
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Wire name of this message's `type`
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::CopyData { .. } => "CopyData",
            Message::DataCopied { .. } => "DataCopied",
            Message::OpenUrl { .. } => "OpenURL",
            Message::UrlOpened { .. } => "URLOpened",
            Message::Notification { .. } => "Notification",
            Message::NotificationDisplayed { .. } => "NotificationDisplayed",
            Message::RequestAuth => "RequestAuth",
            Message::TestAuth => "TestAuth",
            Message::AuthValid { .. } => "AuthValid",
            Message::IntroducerPresent { .. } => "IntroducerPresent",
            Message::IntroducerRollCall => "IntroducerRollCall",
            Message::Trigger { .. } => "Trigger",
            Message::Stream { .. } => "Stream",
            Message::Reconnected => "Reconnected",
            Message::Unknown => "Unknown",
        }
    }

    /// The `origin` a reply refers to, if this is a reply type
    pub fn origin(&self) -> Option<&str> {
        match self {
            Message::DataCopied { origin }
            | Message::UrlOpened { origin }
            | Message::NotificationDisplayed { origin, .. }
            | Message::AuthValid { origin } => Some(origin),
            _ => None,
        }
    }

    /// Convert to the flat JSON object used as envelope contents
    pub fn to_contents(&self) -> BusResult<Map<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(BusError::MalformedMessage(format!(
                "message did not serialize to an object: {}",
                other
            ))),
        }
    }
}

/// One application-level message as seen by a receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    contents: Map<String, Value>,
    raw: String,
    internal: bool,
}

impl Envelope {
    /// Wrap decoded wire contents together with their exact JSON text
    pub fn new(contents: Map<String, Value>, raw: String) -> Self {
        Self {
            contents,
            raw,
            internal: false,
        }
    }

    /// Local-only envelope announcing a transport reconnect
    pub(crate) fn reconnected() -> Self {
        let mut contents = Map::new();
        contents.insert("type".into(), Value::String("Reconnected".into()));
        Self {
            raw: Value::Object(contents.clone()).to_string(),
            contents,
            internal: true,
        }
    }

    pub fn contents(&self) -> &Map<String, Value> {
        &self.contents
    }

    pub fn into_contents(self) -> Map<String, Value> {
        self.contents
    }

    /// The decrypted JSON text exactly as received
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// True only for envelopes synthesized by the local connection
    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.contents.get(key).and_then(Value::as_str)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.get_str("type")
    }

    /// Identity of the connection that sent this envelope
    pub fn sender_id(&self) -> Option<&str> {
        self.get_str("id")
    }

    /// Decode the typed view of this envelope.
    ///
    /// A known `type` with missing or mistyped fields is
    /// [`BusError::MalformedMessage`]; an unknown `type` is [`Message::Unknown`].
    pub fn message(&self) -> BusResult<Message> {
        if self.message_type().is_none() {
            return Err(BusError::MalformedMessage("missing string field `type`".into()));
        }
        serde_json::from_value(Value::Object(self.contents.clone()))
            .map_err(|e| BusError::MalformedMessage(e.to_string()))
    }

    /// True if this is the local reconnect signal (never a wire message)
    pub fn is_reconnected(&self) -> bool {
        self.internal && self.message_type() == Some("Reconnected")
    }
}
