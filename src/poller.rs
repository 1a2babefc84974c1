//! Bounded readiness waits on a single descriptor.
//!
//! The handshake driver and the response exchange never block on I/O
//! directly. When an operation would block they wait here, for at most a
//! given timeout, until the descriptor is readable or has an error pending.

use crate::error::Error;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::os::fd::RawFd;
use std::time::Duration;
use tracing::trace;

const SESSION_TOKEN: Token = Token(0);
const EVENTS_CAPACITY: usize = 4;

/// Outcome of a successful readiness wait.
///
/// A failed wait is reported as [`Error::PollFailed`] instead, so callers
/// cannot mistake it for a timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The timeout elapsed without any event.
    TimedOut,
    /// Data (or an orderly close) is readable.
    Readable,
    /// An error condition is pending on the descriptor.
    ErrorPending,
}

/// A bounded wait for read or error readiness.
///
/// This is the seam between the I/O loops and the operating system; tests
/// substitute scripted implementations.
pub trait ReadinessPoll {
    /// Blocks until the descriptor is readable, has an error pending, or
    /// `timeout` elapses.
    fn wait(&mut self, timeout: Duration) -> Result<Readiness, Error>;
}

/// [`ReadinessPoll`] over one socket descriptor, backed by a private
/// `mio::Poll`.
///
/// The descriptor is registered for READABLE interest only; mio reports error
/// conditions alongside without asking. The poller does not own the
/// descriptor and must not outlive it.
pub struct Poller {
    poll: Poll,
    events: Events,
    fd: RawFd,
}

impl Poller {
    /// Creates a poller watching `fd`.
    pub fn new(fd: RawFd) -> Result<Self, Error> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut SourceFd(&fd), SESSION_TOKEN, Interest::READABLE)?;
        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            fd,
        })
    }

    /// The watched descriptor.
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl ReadinessPoll for Poller {
    fn wait(&mut self, timeout: Duration) -> Result<Readiness, Error> {
        self.poll
            .poll(&mut self.events, Some(timeout))
            .map_err(Error::PollFailed)?;

        let mut readiness = Readiness::TimedOut;
        for event in self.events.iter() {
            if event.token() != SESSION_TOKEN {
                continue;
            }
            // A reset peer is also readable; report the error first.
            if event.is_error() {
                readiness = Readiness::ErrorPending;
                break;
            }
            if event.is_readable() || event.is_read_closed() {
                readiness = Readiness::Readable;
            }
        }

        trace!(fd = self.fd, ?readiness, "Readiness wait finished");
        Ok(readiness)
    }
}
