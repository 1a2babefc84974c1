//! Pre-shared key lookup.
//!
//! Maps the identity a client presents during the handshake to the key both
//! sides share. The resolver is immutable once built, so a single instance
//! can be moved into the TLS context and consulted from every worker.

use crate::config::{get_namespaced_bytes, get_namespaced_string};
use crate::error::Error;
use ::config::Config;
use tracing::{debug, warn};

/// Identity a client must present when none is configured.
pub const DEFAULT_IDENTITY: &str = "Client_identity";

/// Key handed out for [`DEFAULT_IDENTITY`] when none is configured.
pub const DEFAULT_KEY: [u8; 4] = [26, 43, 60, 77];

/// Resolves client PSK identities to key bytes.
///
/// Identities are compared for full equality. A return length of 0 from
/// [`resolve()`](Self::resolve) always means rejection, never an empty key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PskResolver {
    identity: Vec<u8>,
    key: Vec<u8>,
}

impl PskResolver {
    /// Creates a resolver accepting exactly one identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPskKey`] if `key` is empty.
    pub fn new(identity: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Result<Self, Error> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::InvalidPskKey("key must not be empty".to_string()));
        }
        Ok(Self {
            identity: identity.into(),
            key,
        })
    }

    /// Creates a resolver from the `psk_identity` and `psk_key` configuration
    /// keys, falling back to [`DEFAULT_IDENTITY`] and [`DEFAULT_KEY`].
    pub fn from_config(config: &Config, name: &str) -> Result<Self, Error> {
        let identity = get_namespaced_string(config, name, "psk_identity")
            .unwrap_or_else(|_| DEFAULT_IDENTITY.to_string());
        let key = match get_namespaced_bytes(config, name, "psk_key") {
            Ok(key) => key,
            Err(config::ConfigError::NotFound(_)) => DEFAULT_KEY.to_vec(),
            Err(err) => return Err(err.into()),
        };
        Self::new(identity, key)
    }

    /// The identity this resolver accepts.
    pub fn identity(&self) -> &[u8] {
        &self.identity
    }

    /// Looks up the key for `identity` and copies it into `key_out`.
    ///
    /// `key_out.len()` is the maximum key length the caller can take. Returns
    /// the number of key bytes written, or 0 if the identity is missing,
    /// unknown, or the key does not fit.
    pub fn resolve(&self, identity: Option<&[u8]>, key_out: &mut [u8]) -> usize {
        let Some(identity) = identity else {
            warn!("Client presented no PSK identity");
            return 0;
        };

        if identity != self.identity.as_slice() {
            warn!(identity = %String::from_utf8_lossy(identity), "Unknown PSK identity");
            return 0;
        }

        if self.key.len() > key_out.len() {
            warn!(
                key_len = self.key.len(),
                max_len = key_out.len(),
                "PSK key does not fit the key buffer"
            );
            return 0;
        }

        key_out[..self.key.len()].copy_from_slice(&self.key);
        debug!(identity = %String::from_utf8_lossy(identity), "Resolved PSK identity");
        self.key.len()
    }
}

impl Default for PskResolver {
    fn default() -> Self {
        Self {
            identity: DEFAULT_IDENTITY.as_bytes().to_vec(),
            key: DEFAULT_KEY.to_vec(),
        }
    }
}
