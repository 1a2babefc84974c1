//! Thread-per-connection handling.
//!
//! Each accepted connection is handed to a detached worker thread that owns
//! its session exclusively and uses plain blocking calls. Workers share only
//! the immutable [`ServerContext`].

use super::ServerContext;
use crate::error::Error;
use crate::exchange::respond_once;
use crate::tls::{finish_session, OpenSslSession, SecureSession};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use tracing::{info, instrument, warn};

/// Spawns a detached worker for one accepted connection.
///
/// Only a failure to spawn is returned. Errors inside the worker end that
/// worker and are logged.
pub(crate) fn spawn_worker(
    context: Arc<ServerContext>,
    id: usize,
    peer_addr: SocketAddr,
    stream: TcpStream,
) -> Result<(), Error> {
    thread::Builder::new()
        .name(format!("psk-worker-{id}"))
        .spawn(move || {
            if let Err(err) = serve_connection(&context, id, peer_addr, stream) {
                warn!(id, %peer_addr, %err, "Connection failed");
            }
        })?;
    Ok(())
}

#[instrument(skip(context, stream))]
fn serve_connection(
    context: &ServerContext,
    id: usize,
    peer_addr: SocketAddr,
    stream: TcpStream,
) -> Result<(), Error> {
    // Accepted sockets may inherit non-blocking mode from the listener.
    stream.set_nonblocking(false)?;
    // Bounds both the blocking handshake and the blocking request read.
    stream.set_read_timeout(Some(context.exchange.response_timeout))?;
    let mut session = OpenSslSession::new(&context.ssl, stream)?;

    let outcome = session
        .accept()
        .map_err(|err| Error::TlsHandshake(err.to_string()))
        .and_then(|()| {
            info!(cipher = session.cipher_name().unwrap_or("unknown"), "Session established");
            respond_once(&mut session, &context.exchange)
        });

    finish_session(&mut session, outcome)?;
    info!("Closed connection");
    Ok(())
}
