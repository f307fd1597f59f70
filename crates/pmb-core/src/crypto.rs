//! Shared-secret key sets and AES-CFB envelope encryption
//!
//! Keys are 32-character lowercase alphanumeric tokens whose bytes are used
//! directly as the AES key, so a standard key selects AES-256.
//!
//! # Wire Format
//!
//! Encrypted bodies are `base64url([iv (16 bytes)] + [AES-CFB ciphertext])`.
//! CFB carries no authentication tag, so a receiver only learns that it holds
//! the right key when the plaintext parses as JSON.

use std::fmt;
use std::sync::OnceLock;

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::RngCore;
use regex::Regex;

use crate::error::{BusError, BusResult};
use crate::identity::generate_random_string;

/// AES block size, also the IV length prefixed to every ciphertext
pub const IV_SIZE: usize = 16;

/// Length of a generated key
pub const KEY_LENGTH: usize = 32;

/// Ordered collection of shared secrets held by one connection.
///
/// A sender encrypts once per key; a receiver tries each key in order and
/// keeps the first that yields valid JSON.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct KeySet {
    keys: Vec<String>,
}

impl KeySet {
    /// An empty key set, meaning messages travel in the clear
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a key set from already-validated keys
    pub fn from_keys(keys: Vec<String>) -> Self {
        Self { keys }
    }

    /// Extract every key from a free-form string.
    ///
    /// Keys may be separated by anything (commas, whitespace, newlines).
    /// Returns [`BusError::InvalidKey`] if no key is found.
    pub fn parse(input: &str) -> BusResult<Self> {
        static KEY_RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = KEY_RE
            .get_or_init(|| Regex::new("[a-z0-9]{32}").ok())
            .as_ref()
            .ok_or_else(|| BusError::Crypto("key pattern failed to compile".into()))?;

        let keys: Vec<String> = re.find_iter(input).map(|m| m.as_str().to_string()).collect();
        if keys.is_empty() {
            return Err(BusError::InvalidKey);
        }
        Ok(Self { keys })
    }

    /// Generate a fresh random key
    pub fn generate_key() -> String {
        generate_random_string(KEY_LENGTH)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Comma-joined form, as handed to humans for out-of-band transfer
    pub fn joined(&self) -> String {
        self.keys.join(",")
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print secrets, only a short fingerprint
        let prefixes: Vec<&str> = self.keys.iter().map(|k| &k[..k.len().min(4)]).collect();
        f.debug_struct("KeySet").field("keys", &prefixes).finish()
    }
}

/// Encrypt `plaintext` with `key`, returning the base64url wire string.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> BusResult<String> {
    let mut iv = [0u8; IV_SIZE];
    rand::rng().fill_bytes(&mut iv);

    let mut buf = plaintext.to_vec();
    match key.len() {
        16 => cipher_init::<cfb_mode::Encryptor<aes::Aes128>>(key, &iv)?.encrypt(&mut buf),
        24 => cipher_init::<cfb_mode::Encryptor<aes::Aes192>>(key, &iv)?.encrypt(&mut buf),
        32 => cipher_init::<cfb_mode::Encryptor<aes::Aes256>>(key, &iv)?.encrypt(&mut buf),
        n => return Err(BusError::Crypto(format!("invalid key size {}", n))),
    }

    let mut out = Vec::with_capacity(IV_SIZE + buf.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&buf);
    Ok(URL_SAFE.encode(out))
}

/// Decrypt a base64url wire string with `key`.
///
/// Success only means the bytes were transformed; callers must validate the
/// plaintext since CFB has no integrity check.
pub fn decrypt(key: &[u8], wire: &[u8]) -> BusResult<Vec<u8>> {
    let data = URL_SAFE
        .decode(trim_ascii(wire))
        .map_err(|e| BusError::DecryptionFailed(format!("bad base64: {}", e)))?;

    if data.len() < IV_SIZE {
        return Err(BusError::DecryptionFailed("ciphertext too short".to_string()));
    }
    let (iv, ciphertext) = data.split_at(IV_SIZE);

    let mut buf = ciphertext.to_vec();
    match key.len() {
        16 => cipher_init::<cfb_mode::Decryptor<aes::Aes128>>(key, iv)?.decrypt(&mut buf),
        24 => cipher_init::<cfb_mode::Decryptor<aes::Aes192>>(key, iv)?.decrypt(&mut buf),
        32 => cipher_init::<cfb_mode::Decryptor<aes::Aes256>>(key, iv)?.decrypt(&mut buf),
        n => return Err(BusError::Crypto(format!("invalid key size {}", n))),
    }
    Ok(buf)
}

fn cipher_init<C: KeyIvInit>(key: &[u8], iv: &[u8]) -> BusResult<C> {
    C::new_from_slices(key, iv).map_err(|e| BusError::Crypto(format!("cipher init: {}", e)))
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_key() {
        let key1 = KeySet::generate_key();
        let key2 = KeySet::generate_key();

        assert_ne!(key1, key2);
        assert_eq!(key1.len(), KEY_LENGTH);
        assert!(KeySet::parse(&key1).is_ok());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = KeySet::generate_key();
        let plaintext = br#"{"type":"CopyData","data":"hello"}"#;

        let wire = encrypt(key.as_bytes(), plaintext).unwrap();
        let decrypted = decrypt(key.as_bytes(), wire.as_bytes()).unwrap();

        assert_eq!(plaintext.as_slice(), decrypted.as_slice());
    }

    #[test]
    fn test_encrypt_uses_fresh_iv() {
        let key = KeySet::generate_key();
        let a = encrypt(key.as_bytes(), b"same").unwrap();
        let b = encrypt(key.as_bytes(), b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wire_is_base64url() {
        let key = KeySet::generate_key();
        let wire = encrypt(key.as_bytes(), &[0xffu8; 64]).unwrap();
        assert!(!wire.starts_with('{'));
        assert!(!wire.contains('+') && !wire.contains('/'));
    }

    #[test]
    fn test_wrong_key_yields_garbage() {
        let key = KeySet::generate_key();
        let other = KeySet::generate_key();
        let wire = encrypt(key.as_bytes(), br#"{"a":1}"#).unwrap();

        let decrypted = decrypt(other.as_bytes(), wire.as_bytes()).unwrap();
        assert_ne!(decrypted.as_slice(), br#"{"a":1}"#.as_slice());
    }

    #[test]
    fn test_decrypt_too_short() {
        let key = KeySet::generate_key();
        let wire = URL_SAFE.encode([1u8; 8]);
        assert!(matches!(
            decrypt(key.as_bytes(), wire.as_bytes()),
            Err(BusError::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_invalid_key_size() {
        assert!(matches!(encrypt(b"short", b"x"), Err(BusError::Crypto(_))));
    }

    #[test]
    fn test_parse_multiple_keys() {
        let k1 = "a".repeat(32);
        let k2 = "0123456789abcdefghijklmnopqrstuv";
        let keys = KeySet::parse(&format!("{}, {}\n", k1, k2)).unwrap();

        assert_eq!(keys.len(), 2);
        assert_eq!(keys.iter().collect::<Vec<_>>(), vec![k1.as_str(), k2]);
        assert_eq!(keys.joined(), format!("{},{}", k1, k2));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(KeySet::parse("too-short"), Err(BusError::InvalidKey)));
        assert!(matches!(KeySet::parse(&"A".repeat(32)), Err(BusError::InvalidKey)));
        assert!(matches!(KeySet::parse(""), Err(BusError::InvalidKey)));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let key = KeySet::generate_key();
        let keys = KeySet::parse(&key).unwrap();
        let printed = format!("{:?}", keys);
        assert!(!printed.contains(&key));
    }
}
