//! Participant identities and local provenance info

use std::net::ToSocketAddrs;

use rand::Rng;
use tracing::debug;

const RANDOM_CHARSET: &[u8] = b"1234567890abcdefghijklmnopqrstuvwxyz";

/// Length of the random suffix in generated ids
pub const ID_SUFFIX_LENGTH: usize = 12;

/// Random lowercase alphanumeric string of the given length
pub fn generate_random_string(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| RANDOM_CHARSET[rng.random_range(0..RANDOM_CHARSET.len())] as char)
        .collect()
}

/// Process-unique participant id of the form `<prefix>-<random12>`
pub fn generate_random_id(prefix: &str) -> String {
    format!("{}-{}", prefix, generate_random_string(ID_SUFFIX_LENGTH))
}

/// Hostname and first resolved address of the local machine.
///
/// Both fields are best-effort; lookup failures leave them empty and the
/// codec omits them from outgoing envelopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalNetInfo {
    pub hostname: Option<String>,
    pub ip: Option<String>,
}

impl LocalNetInfo {
    /// Resolve the local hostname and its first address
    pub fn lookup() -> Self {
        let hostname = gethostname::gethostname().to_string_lossy().to_string();
        if hostname.is_empty() {
            return Self::default();
        }

        let ip = match (hostname.as_str(), 0).to_socket_addrs() {
            Ok(mut addrs) => addrs.next().map(|a| a.ip().to_string()),
            Err(e) => {
                debug!(%hostname, error = %e, "Unable to resolve local hostname");
                None
            }
        };

        Self {
            hostname: Some(hostname),
            ip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string_charset() {
        let s = generate_random_string(64);
        assert_eq!(s.len(), 64);
        assert!(s.bytes().all(|b| RANDOM_CHARSET.contains(&b)));
    }

    #[test]
    fn test_random_id_shape() {
        let id = generate_random_id("remoteCopy");
        let (prefix, suffix) = id.rsplit_once('-').unwrap();
        assert_eq!(prefix, "remoteCopy");
        assert_eq!(suffix.len(), ID_SUFFIX_LENGTH);
        assert_ne!(id, generate_random_id("remoteCopy"));
    }

    #[test]
    fn test_lookup_never_panics() {
        let info = LocalNetInfo::lookup();
        if let Some(host) = info.hostname {
            assert!(!host.is_empty());
        }
    }
}
