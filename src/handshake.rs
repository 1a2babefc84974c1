//! Non-blocking TLS handshake driver.
//!
//! Drives a [`SecureSession`] on a non-blocking socket through the server
//! handshake. Would-block results park the driver in a waiting state, where
//! it sleeps on the [`ReadinessPoll`] for a short, fixed timeout before
//! attempting the handshake again. The driver only stops once the session is
//! established or has failed, never while it is still waiting.

use crate::config::get_namespaced_u64;
use crate::error::Error;
use crate::poller::{Readiness, ReadinessPoll};
use crate::tls::{ErrorClass, SecureSession};
use ::config::Config;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Default timeout for each readiness wait during the handshake.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// State of a handshake in progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeState {
    /// Ready to attempt the handshake.
    Handshaking,
    /// The last attempt needs more data from the peer.
    WaitingRead,
    /// The last attempt needs the socket to drain.
    WaitingWrite,
    /// The handshake completed.
    Established,
    /// The handshake cannot complete.
    Failed(String),
}

impl HandshakeState {
    /// True for [`Established`](Self::Established) and
    /// [`Failed`](Self::Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Failed(_))
    }
}

/// Handshake driver settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeOptions {
    /// How long each readiness wait may block.
    pub poll_timeout: Duration,
}

impl Default for HandshakeOptions {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl HandshakeOptions {
    /// Reads `handshake_poll_timeout_ms` (defaults to 1000).
    pub fn from_config(config: &Config, name: &str) -> Self {
        let poll_timeout = get_namespaced_u64(config, name, "handshake_poll_timeout_ms")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_POLL_TIMEOUT);
        Self { poll_timeout }
    }
}

/// Drives one session's handshake to completion.
#[derive(Debug)]
pub struct HandshakeDriver {
    options: HandshakeOptions,
    state: HandshakeState,
    attempts: usize,
}

impl HandshakeDriver {
    pub fn new(options: HandshakeOptions) -> Self {
        Self {
            options,
            state: HandshakeState::Handshaking,
            attempts: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    /// Number of handshake attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Runs [`step()`](Self::step) until the handshake is established or has
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TlsHandshake`] if the session failed the handshake or
    /// a readiness wait failed. The session must then be torn down without
    /// exchanging any data.
    #[instrument(skip_all)]
    pub fn drive<S, P>(&mut self, session: &mut S, poller: &mut P) -> Result<(), Error>
    where
        S: SecureSession,
        P: ReadinessPoll,
    {
        loop {
            match &self.state {
                HandshakeState::Established => {
                    info!(attempts = self.attempts, "TLS handshake completed");
                    return Ok(());
                }
                HandshakeState::Failed(reason) => {
                    warn!(attempts = self.attempts, %reason, "SSL_accept failed");
                    return Err(Error::TlsHandshake(reason.clone()));
                }
                _ => {
                    self.step(session, poller);
                }
            }
        }
    }

    /// Performs a single transition and returns the new state.
    ///
    /// From `Handshaking` this attempts the handshake once. From a waiting
    /// state it waits for readiness once: readable or error-pending leads
    /// back to `Handshaking`, a timeout keeps a stream session in
    /// `WaitingRead`, and a failed wait is fatal. Terminal states are left
    /// unchanged.
    pub fn step<S, P>(&mut self, session: &mut S, poller: &mut P) -> &HandshakeState
    where
        S: SecureSession,
        P: ReadinessPoll,
    {
        let next = match &self.state {
            HandshakeState::Handshaking => {
                self.attempts += 1;
                match session.accept() {
                    Ok(()) => HandshakeState::Established,
                    Err(err) => match err.class() {
                        ErrorClass::WantRead => HandshakeState::WaitingRead,
                        ErrorClass::WantWrite => HandshakeState::WaitingWrite,
                        ErrorClass::ZeroReturn | ErrorClass::Fatal => {
                            HandshakeState::Failed(err.to_string())
                        }
                    },
                }
            }
            HandshakeState::WaitingRead | HandshakeState::WaitingWrite => {
                if self.state == HandshakeState::WaitingRead {
                    debug!("... server would read block");
                } else {
                    debug!("... server would write block");
                }

                match poller.wait(self.options.poll_timeout) {
                    Ok(Readiness::Readable) | Ok(Readiness::ErrorPending) => {
                        HandshakeState::Handshaking
                    }
                    Ok(Readiness::TimedOut) if !session.is_datagram() => {
                        HandshakeState::WaitingRead
                    }
                    Ok(Readiness::TimedOut) => {
                        HandshakeState::Failed("readiness wait timed out".to_string())
                    }
                    Err(err) => HandshakeState::Failed(err.to_string()),
                }
            }
            HandshakeState::Established | HandshakeState::Failed(_) => self.state.clone(),
        };

        self.state = next;
        &self.state
    }
}
