//! psk-server - A minimal TLS server authenticating clients with pre-shared keys
//!
//! The server accepts TCP connections, completes a TLS 1.2 handshake using a
//! PSK cipher suite, reads one request and sends one fixed reply. Two
//! concurrency models are provided: a single-threaded loop that drives each
//! handshake with non-blocking I/O and bounded readiness waits, and a
//! thread-per-connection loop using blocking calls.
//!
//! The building blocks are public so they can be driven and tested
//! independently: [`PskResolver`], [`Poller`], [`HandshakeDriver`] and the
//! [`respond()`] exchange, all working against the [`SecureSession`] and
//! [`ReadinessPoll`] traits.

// Internal-only modules
pub(crate) mod config;
pub(crate) mod error;
pub(crate) mod exchange;
pub(crate) mod handshake;
pub(crate) mod poller;
pub(crate) mod psk;
pub(crate) mod server;
pub(crate) mod tls;

// These are the intended public API
pub use error::Error;
pub use exchange::{
    respond, respond_once, ExchangeOptions, ReplyOrder, DEFAULT_MAX_READ_SIZE, DEFAULT_REPLY,
    DEFAULT_RESPONSE_TIMEOUT,
};
pub use handshake::{HandshakeDriver, HandshakeOptions, HandshakeState, DEFAULT_POLL_TIMEOUT};
pub use poller::{Poller, Readiness, ReadinessPoll};
pub use psk::{PskResolver, DEFAULT_IDENTITY, DEFAULT_KEY};
pub use server::{Server, ServerHandle, ServerModel};
pub use tls::{
    build_server_context, finish_session, load_psk_server_context, teardown, ErrorClass,
    OpenSslSession, SecureSession, SessionError, Socket, DEFAULT_CIPHER_LIST,
    DEFAULT_IDENTITY_HINT,
};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::error::Error;
    pub use crate::server::{Server, ServerHandle, ServerModel};
    pub use crate::tls::{ErrorClass, SecureSession, SessionError};
}
