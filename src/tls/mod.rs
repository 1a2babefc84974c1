//! Secure sessions over accepted TCP connections.
//!
//! [`SecureSession`] is the narrow interface the handshake driver and the
//! response exchange need from a TLS library: handshake, read, write,
//! shutdown and release, plus a classification of every failure. The
//! OpenSSL-backed [`OpenSslSession`] is the production implementation.

mod context;
mod session;

pub use context::{
    build_server_context, load_psk_server_context, DEFAULT_CIPHER_LIST, DEFAULT_IDENTITY_HINT,
};
pub use session::{OpenSslSession, Socket};

use crate::error::Error;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Classification of a failed session operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The operation needs more data from the peer before it can continue.
    WantRead,
    /// The operation needs the socket to accept more data.
    WantWrite,
    /// The peer closed the TLS session cleanly.
    ZeroReturn,
    /// Anything else. The session cannot continue.
    Fatal,
}

/// A failed session operation together with its classification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SessionError {
    class: ErrorClass,
    message: String,
}

impl SessionError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn want_read() -> Self {
        Self::new(ErrorClass::WantRead, "operation would block on read")
    }

    pub fn want_write() -> Self {
        Self::new(ErrorClass::WantWrite, "operation would block on write")
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Fatal, message)
    }

    pub fn class(&self) -> ErrorClass {
        self.class
    }

    /// True for [`ErrorClass::WantRead`] and [`ErrorClass::WantWrite`].
    pub fn is_would_block(&self) -> bool {
        matches!(self.class, ErrorClass::WantRead | ErrorClass::WantWrite)
    }
}

/// Server side of a TLS session bound to exactly one socket.
///
/// A session has exactly one owner at a time and is never shared between
/// threads. Release it with [`teardown()`].
pub trait SecureSession {
    /// Starts or continues the server handshake.
    fn accept(&mut self) -> Result<(), SessionError>;

    /// Reads decrypted application data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SessionError>;

    /// Writes application data, returning how many bytes were taken.
    fn write(&mut self, buf: &[u8]) -> Result<usize, SessionError>;

    /// Sends the close notification.
    fn shutdown(&mut self) -> Result<(), SessionError>;

    /// Closes the underlying descriptor.
    fn release(&mut self) -> std::io::Result<()>;

    /// True if the session runs over a connectionless transport.
    fn is_datagram(&self) -> bool;
}

/// Shuts down and releases a session.
///
/// A failed close notification is only logged, but a failed descriptor close
/// is returned as [`Error::Close`] so the leak is never silently swallowed.
pub fn teardown<S: SecureSession>(session: &mut S) -> Result<(), Error> {
    if let Err(err) = session.shutdown() {
        debug!(?err, "TLS shutdown did not complete");
    }
    release(session)
}

/// Tears down a served session and folds the close result into `outcome`.
///
/// After a failed handshake the close notification is skipped and the
/// descriptor is only released. A failed close is returned even when
/// `outcome` is itself an error; that error is then only logged.
pub fn finish_session<S, T>(session: &mut S, outcome: Result<T, Error>) -> Result<T, Error>
where
    S: SecureSession,
{
    let closed = match &outcome {
        Err(Error::TlsHandshake(_)) => release(session),
        _ => teardown(session),
    };

    match closed {
        Ok(()) => outcome,
        Err(close_err) => {
            if let Err(err) = &outcome {
                warn!(%err, "Connection failed before close");
            }
            Err(close_err)
        }
    }
}

fn release<S: SecureSession>(session: &mut S) -> Result<(), Error> {
    session.release().map_err(|err| {
        error!(?err, "Failed to close connection");
        Error::Close(err)
    })
}
