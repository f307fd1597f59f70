//! Envelope codec: provenance tagging, multi-key encryption and self-echo
//! suppression
//!
//! ## Outbound ([`Codec::prepare`])
//!
//! 1. Tag the payload with `id`, `hostname`, `ip` and `sent`
//! 2. Serialize to JSON
//! 3. With keys: one base64url AES-CFB body per key. Without: the JSON itself
//!
//! Each returned body is sent as an independent wire message.
//!
//! ## Inbound ([`Codec::parse`])
//!
//! 1. Bodies not starting with `{` are ciphertext: try every key until one
//!    yields a JSON object
//! 2. Plain bodies are parsed directly
//! 3. Drop anything whose `id` equals our own
//!
//! Undecodable input is expected on a shared exchange and is only logged at
//! debug level.

use chrono::{Local, SecondsFormat};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::crypto::{self, KeySet};
use crate::error::{BusError, BusResult};
use crate::identity::LocalNetInfo;
use crate::message::Envelope;

/// Stateless per-connection codec
#[derive(Debug, Clone)]
pub struct Codec {
    id: String,
    net: LocalNetInfo,
}

impl Codec {
    /// Codec for the participant `id`, resolving local host info once
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_net_info(id, LocalNetInfo::lookup())
    }

    pub fn with_net_info(id: impl Into<String>, net: LocalNetInfo) -> Self {
        Self { id: id.into(), net }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tag, serialize and (optionally) encrypt a payload.
    ///
    /// Returns one wire body per key, or a single plaintext body when `keys`
    /// is empty. A key that fails to encrypt is skipped with a warning.
    pub fn prepare(
        &self,
        mut contents: Map<String, Value>,
        keys: &KeySet,
    ) -> BusResult<Vec<String>> {
        contents.insert("id".into(), Value::String(self.id.clone()));
        if let Some(hostname) = &self.net.hostname {
            contents.insert("hostname".into(), Value::String(hostname.clone()));
        }
        if let Some(ip) = &self.net.ip {
            contents.insert("ip".into(), Value::String(ip.clone()));
        }
        contents.insert(
            "sent".into(),
            Value::String(Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)),
        );

        debug!(id = %self.id, contents = ?contents, "Sending message");
        let json = serde_json::to_string(&contents)?;

        if keys.is_empty() {
            return Ok(vec![json]);
        }

        debug!(id = %self.id, keys = keys.len(), "Encrypting message");
        let mut bodies = Vec::with_capacity(keys.len());
        for key in keys.iter() {
            match crypto::encrypt(key.as_bytes(), json.as_bytes()) {
                Ok(body) => bodies.push(body),
                Err(e) => warn!(error = %e, "Unable to encrypt message"),
            }
        }

        if bodies.is_empty() {
            return Err(BusError::Crypto("no key could encrypt the message".into()));
        }
        Ok(bodies)
    }

    /// Decode one wire body, returning `None` for anything that should not be
    /// surfaced (undecryptable, not JSON, not an object, or our own echo).
    pub fn parse(&self, body: &[u8], keys: &KeySet) -> Option<Envelope> {
        let first = body.iter().find(|b| !b.is_ascii_whitespace())?;

        let (raw, contents) = if *first == b'{' {
            match decode_object(body) {
                Ok(decoded) => decoded,
                Err(e) => {
                    debug!(error = %e, "Unable to unmarshal JSON data, skipping");
                    return None;
                }
            }
        } else {
            self.decrypt_any(body, keys)?
        };

        match contents.get("id").and_then(Value::as_str) {
            Some(sender) if sender == self.id => {
                debug!(id = %self.id, "Message received but ignored (own echo)");
                None
            }
            _ => {
                debug!(id = %self.id, contents = ?contents, "Message received");
                Some(Envelope::new(contents, raw))
            }
        }
    }

    fn decrypt_any(&self, body: &[u8], keys: &KeySet) -> Option<(String, Map<String, Value>)> {
        if keys.is_empty() {
            debug!("Encrypted message and no key");
            return None;
        }

        debug!(keys = keys.len(), "Attempting to decrypt");
        for key in keys.iter() {
            let plaintext = match crypto::decrypt(key.as_bytes(), body) {
                Ok(p) => p,
                Err(e) => {
                    debug!(error = %e, "Unable to decrypt message");
                    continue;
                }
            };
            match decode_object(&plaintext) {
                Ok(decoded) => {
                    debug!(key = &key[..key.len().min(4)], "Decrypted message");
                    return Some(decoded);
                }
                Err(_) => debug!("Unable to decrypt message (bad key)"),
            }
        }
        None
    }
}

fn decode_object(bytes: &[u8]) -> BusResult<(String, Map<String, Value>)> {
    let raw = std::str::from_utf8(bytes)
        .map_err(|e| BusError::MalformedMessage(format!("not utf-8: {}", e)))?;
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok((raw.to_string(), map)),
        _ => Err(BusError::MalformedMessage("not a JSON object".into())),
    }
}
