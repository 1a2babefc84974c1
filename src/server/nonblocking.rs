//! Single-threaded, non-blocking connection handling.
//!
//! The accept loop calls [`serve_connection()`] inline, so one client is
//! served from handshake to teardown before the next one is accepted. Every
//! wait is bounded by the readiness poller's timeout.

use super::ServerContext;
use crate::error::Error;
use crate::exchange::respond;
use crate::handshake::HandshakeDriver;
use crate::poller::Poller;
use crate::tls::{finish_session, OpenSslSession};
use std::net::{SocketAddr, TcpStream};
use tracing::{info, instrument};

/// Serves one accepted connection to completion.
#[instrument(skip(context, stream))]
pub(crate) fn serve_connection(
    context: &ServerContext,
    id: usize,
    peer_addr: SocketAddr,
    stream: TcpStream,
) -> Result<(), Error> {
    stream.set_nonblocking(true)?;
    let mut session = OpenSslSession::new(&context.ssl, stream)?;

    let outcome = Poller::new(session.fd()).and_then(|mut poller| {
        HandshakeDriver::new(context.handshake).drive(&mut session, &mut poller)?;
        info!(cipher = session.cipher_name().unwrap_or("unknown"), "Session established");
        respond(&mut session, &mut poller, &context.exchange)
    });

    finish_session(&mut session, outcome)?;
    info!("Closed connection");
    Ok(())
}
