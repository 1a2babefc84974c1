//! Connection acceptor loop.
//!
//! This module provides the [`Server`] struct, which owns the listening
//! socket and hands every accepted connection to one of two concurrency
//! models selected by configuration.

mod handle;
mod nonblocking;
mod threaded;

pub use handle::ServerHandle;

use crate::config::{get_namespaced_bool, get_namespaced_string};
use crate::error::Error;
use crate::exchange::ExchangeOptions;
use crate::handshake::HandshakeOptions;
use crate::tls::build_server_context;
use ::config::Config;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use openssl::ssl::SslContext;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

// Internal constants for the accept loop
const LISTENER_ID: usize = 1;
const WAKE_ID: usize = 2;
const CONNECTION_ID_RANGE_START: usize = 1000;
const POLL_CAPACITY: usize = 16;

/// How accepted connections are served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerModel {
    /// One thread, one client at a time, non-blocking I/O driven to
    /// completion inline.
    #[default]
    NonBlocking,
    /// A detached worker thread per connection with blocking I/O.
    Threaded,
}

impl ServerModel {
    /// Parses a `server_model` value: "nonblocking" or "threaded".
    pub fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "nonblocking" => Ok(ServerModel::NonBlocking),
            "threaded" => Ok(ServerModel::Threaded),
            _ => Err(Error::InvalidServerModel {
                got: value.to_string(),
                valid: vec!["nonblocking".to_string(), "threaded".to_string()],
            }),
        }
    }
}

/// Read-only state shared by every connection handler.
///
/// Built once at startup and never mutated afterwards, so workers can share
/// it without locking.
pub(crate) struct ServerContext {
    pub(crate) ssl: SslContext,
    pub(crate) handshake: HandshakeOptions,
    pub(crate) exchange: ExchangeOptions,
}

/// TLS-PSK server.
///
/// Not thread-safe - use [`ServerHandle`] to stop it from another thread.
///
/// # Configuration Keys
///
/// - `server_model`: Either "nonblocking" or "threaded" (defaults to
///   "nonblocking")
/// - `stop_on_connection_error`: Non-blocking model only. Stop serving and
///   return the error when a connection fails (defaults to false)
/// - TLS keys, see [`build_server_context()`]
/// - `handshake_poll_timeout_ms`, see [`HandshakeOptions`]
/// - `max_read_size`, `reply`, `response_timeout_ms`, `reply_order`, see
///   [`ExchangeOptions`]
///
/// # Example
///
/// ```toml
/// server_model = "threaded"
/// psk_identity = "Client_identity"
/// psk_key = [26, 43, 60, 77]
/// ```
pub struct Server {
    context: Arc<ServerContext>,
    model: ServerModel,
    stop_on_connection_error: bool,
    listener: Option<TcpListener>,
    poll: Poll,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    next_id: usize,
}

// ============================================================================
// Constructors
// ============================================================================

impl Server {
    /// Creates a new Server based on configuration.
    pub fn new(config: &Config) -> Result<Self, Error> {
        Self::new_named(config, "")
    }

    /// Creates a new named Server with configuration namespacing.
    ///
    /// Configuration lookup follows this priority:
    /// 1. `{name}.{key}` (e.g., `lab.server_model`)
    /// 2. `{key}` (e.g., `server_model`)
    /// 3. Hard-coded default
    pub fn new_named(config: &Config, name: &str) -> Result<Self, Error> {
        let model = match get_namespaced_string(config, name, "server_model") {
            Ok(value) => ServerModel::parse(&value)?,
            Err(_) => ServerModel::default(),
        };
        let stop_on_connection_error =
            get_namespaced_bool(config, name, "stop_on_connection_error").unwrap_or(false);

        let context = ServerContext {
            ssl: build_server_context(config, name)?,
            handshake: HandshakeOptions::from_config(config, name),
            exchange: ExchangeOptions::from_config(config, name)?,
        };

        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), Token(WAKE_ID))?);

        Ok(Self {
            context: Arc::new(context),
            model,
            stop_on_connection_error,
            listener: None,
            poll,
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
            next_id: CONNECTION_ID_RANGE_START,
        })
    }

    /// Overrides the configured concurrency model.
    pub fn with_model(mut self, model: ServerModel) -> Self {
        self.model = model;
        self
    }
}

// ============================================================================
// Listener Management
// ============================================================================

impl Server {
    /// Starts listening on the specified address and returns the bound
    /// address (useful when binding to port 0).
    ///
    /// Replaces any previous listener.
    #[instrument(skip(self, addr))]
    pub fn listen<A: ToSocketAddrs>(&mut self, addr: A) -> Result<SocketAddr, Error> {
        let requested_addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or(Error::InvalidAddress)?;

        let listener = TcpListener::bind(requested_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        if let Some(old) = self.listener.take() {
            self.poll
                .registry()
                .deregister(&mut SourceFd(&old.as_raw_fd()))?;
        }
        self.poll.registry().register(
            &mut SourceFd(&listener.as_raw_fd()),
            Token(LISTENER_ID),
            Interest::READABLE,
        )?;
        self.listener = Some(listener);

        info!(%local_addr, model = ?self.model, "Listening for connections");
        Ok(local_addr)
    }

    /// The address of the active listener, if any.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// The concurrency model in use.
    pub fn model(&self) -> ServerModel {
        self.model
    }

    /// Gets a thread-safe handle for stopping the server.
    pub fn get_server_handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: self.shutdown.clone(),
            waker: self.waker.clone(),
        }
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

impl Server {
    /// Accepts and serves connections until shut down.
    ///
    /// Returns `Ok(())` after [`ServerHandle::shutdown()`]. Returns an error
    /// for anything fatal to the server: a failed poll or accept, a failed
    /// descriptor close in the non-blocking model, or, with
    /// `stop_on_connection_error`, the first failed connection.
    #[instrument(skip(self))]
    pub fn run(&mut self) -> Result<(), Error> {
        if self.listener.is_none() {
            return Err(Error::NotListening);
        }

        let mut events = Events::with_capacity(POLL_CAPACITY);
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                info!("Server shut down");
                return Ok(());
            }

            if let Err(err) = self.poll.poll(&mut events, None) {
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                error!(?err, "Error polling listener");
                return Err(err.into());
            }

            for event in events.iter() {
                let Token(id) = event.token();
                if id == LISTENER_ID {
                    self.accept_connections()?;
                }
                // Wake events only interrupt the poll; the flag is checked
                // at the top of the loop.
            }
        }
    }

    fn accept_connections(&mut self) -> Result<(), Error> {
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }

            let Some(listener) = self.listener.as_ref() else {
                return Err(Error::NotListening);
            };
            let (stream, peer_addr) = match listener.accept() {
                Ok(accepted) => accepted,
                Err(err) => match err.kind() {
                    ErrorKind::WouldBlock => {
                        // Further accepting would block, so we are done
                        return Ok(());
                    }
                    ErrorKind::Interrupted => continue,
                    ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
                        warn!(?err, "Transient accept error");
                        continue;
                    }
                    _ => {
                        error!(?err, "Error accepting connection");
                        return Err(Error::Accept(err));
                    }
                },
            };

            let id = self.next_id;
            self.next_id = self
                .next_id
                .checked_add(1)
                .unwrap_or(CONNECTION_ID_RANGE_START);
            info!(id, %peer_addr, "Connection from client");

            self.dispatch(id, peer_addr, stream)?;
        }
    }

    fn dispatch(&mut self, id: usize, peer_addr: SocketAddr, stream: TcpStream) -> Result<(), Error> {
        match self.model {
            ServerModel::NonBlocking => {
                match nonblocking::serve_connection(&self.context, id, peer_addr, stream) {
                    Ok(()) => Ok(()),
                    Err(err) if err.is_connection_scoped() && !self.stop_on_connection_error => {
                        warn!(id, %peer_addr, %err, "Connection failed");
                        Ok(())
                    }
                    Err(err) => {
                        error!(id, %peer_addr, %err, "Fatal error");
                        Err(err)
                    }
                }
            }
            ServerModel::Threaded => {
                debug!(id, "Spawning worker");
                threaded::spawn_worker(Arc::clone(&self.context), id, peer_addr, stream)
            }
        }
    }
}
