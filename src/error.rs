use std::time::Duration;
use thiserror::Error;

/// The error type for psk-server operations.
///
/// Would-block conditions and stream poll timeouts are never reported
/// through this type. They are states inside the handshake and exchange
/// loops, retried until those loops reach their bounds.
///
/// Use [`Error::is_connection_scoped()`] to tell errors that only end the
/// current connection apart from errors that are fatal to the server.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================

    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The provided socket address could not be parsed or resolved.
    #[error("Invalid socket address")]
    InvalidAddress,

    /// `run()` was called before `listen()`.
    #[error("Server is not listening - call listen() before run()")]
    NotListening,

    /// Accepting a connection failed for a reason other than interruption.
    #[error("Accept error: {0}")]
    Accept(std::io::Error),

    /// The readiness wait itself failed (not a timeout).
    #[error("Readiness poll failed: {0}")]
    PollFailed(std::io::Error),

    /// Closing a connection's descriptor failed.
    #[error("Close error: {0}")]
    Close(std::io::Error),

    // ============================================================================
    // TLS Setup Errors
    // ============================================================================

    /// OpenSSL refused to create or configure the server context.
    #[error("Failed to build TLS context: {0}")]
    TlsContextBuild(#[from] openssl::error::ErrorStack),

    /// None of the configured ciphers are available.
    #[error("Server can't set cipher list '{list}': {source}")]
    TlsCipherList {
        list: String,
        source: openssl::error::ErrorStack,
    },

    /// The PSK identity hint could not be installed.
    #[error("Invalid PSK identity hint '{0}'")]
    TlsIdentityHint(String),

    /// Failed to load the optional certificate chain.
    #[error("Failed to load certificate from {path}: {source}")]
    TlsCertificateLoad {
        path: String,
        source: openssl::error::ErrorStack,
    },

    /// Failed to load the optional private key.
    #[error("Failed to load private key from {path}: {source}")]
    TlsKeyLoad {
        path: String,
        source: openssl::error::ErrorStack,
    },

    /// The configured pre-shared key is unusable.
    #[error("Invalid PSK key: {0}")]
    InvalidPskKey(String),

    /// A session object could not be created for an accepted connection.
    #[error("TLS session setup failed: {0}")]
    SessionSetup(String),

    // ============================================================================
    // Connection Errors
    // ============================================================================

    /// TLS handshake failed for a reason other than would-block, including
    /// an unknown PSK identity.
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),

    /// The reply was not transferred in a single write.
    #[error("Write error: wrote {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    /// Writing the reply failed.
    #[error("Write error: {0}")]
    Write(String),

    /// Reading the request failed with something other than would-block.
    #[error("Read error: {0}")]
    Read(String),

    /// No request arrived within the response budget.
    #[error("Timeout reached before read response (waited {waited:?})")]
    ReadTimeout { waited: Duration },

    // ============================================================================
    // Configuration Errors
    // ============================================================================

    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invalid value for the `server_model` configuration key.
    #[error("Invalid server model '{got}', expected one of: {}", .valid.join(", "))]
    InvalidServerModel { got: String, valid: Vec<String> },

    /// Invalid value for the `reply_order` configuration key.
    #[error("Invalid reply order '{got}', expected one of: {}", .valid.join(", "))]
    InvalidReplyOrder { got: String, valid: Vec<String> },
}

impl Error {
    /// Returns true if this error only ends the connection it occurred on.
    ///
    /// Everything else (setup, accept, close and plain I/O failures) is fatal
    /// to the whole server.
    pub fn is_connection_scoped(&self) -> bool {
        matches!(
            self,
            Error::TlsHandshake(_)
                | Error::ShortWrite { .. }
                | Error::Write(_)
                | Error::Read(_)
                | Error::ReadTimeout { .. }
                | Error::PollFailed(_)
        )
    }
}
