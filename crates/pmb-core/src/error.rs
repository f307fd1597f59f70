//! Error types for the personal message bus

use thiserror::Error;

/// Main error type for message bus operations
#[derive(Error, Debug)]
pub enum BusError {
    /// The bus URI could not be parsed
    #[error("Invalid bus URI: {0}")]
    InvalidUri(String),

    /// The bus URI uses a scheme no backend understands
    #[error("Unsupported URI scheme: {0}")]
    UnsupportedScheme(String),

    /// No bus URI was configured
    #[error("No URI found, use '-p' to specify one")]
    MissingUri,

    /// A participant with the same identity is already attached
    #[error("Another connection with the same id ({0}) already exists.")]
    DuplicateIdentity(String),

    /// Generic transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// AMQP broker error
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Message decoded but did not match its declared type
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Cryptographic operation failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Decryption failed with every key in the key set
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Key string did not contain any valid key
    #[error("Auth key(s) invalid.")]
    InvalidKey,

    /// No AuthValid reply arrived in time
    #[error("Auth key was invalid.")]
    AuthTimeout,

    /// An application round trip did not complete in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The connection or actor has shut down
    #[error("Connection closed")]
    Closed,

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Config file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Config file could not be written
    #[error("Config write error: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BusError {
    /// True for errors that must abort connection construction rather than
    /// trigger a reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BusError::InvalidUri(_)
                | BusError::UnsupportedScheme(_)
                | BusError::MissingUri
                | BusError::DuplicateIdentity(_)
        )
    }
}

/// Result type alias using BusError
pub type BusResult<T> = Result<T, BusError>;
