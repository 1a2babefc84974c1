//! Application data exchange after the handshake.
//!
//! Each connection gets exactly one reply. [`respond()`] is the non-blocking
//! form: it reads whatever is available, replies, and then keeps trying to
//! read the request until a fixed time budget runs out. [`respond_once()`]
//! is the blocking single turn used by the threaded server.

use crate::config::{get_namespaced_string, get_namespaced_u64, get_namespaced_usize};
use crate::error::Error;
use crate::poller::ReadinessPoll;
use crate::tls::{ErrorClass, SecureSession};
use ::config::Config;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, trace};

/// Reply sent on every connection unless configured otherwise.
pub const DEFAULT_REPLY: &str = "I hear ya for shizzle";

/// Default time budget for the request to arrive.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default size of the request buffer.
pub const DEFAULT_MAX_READ_SIZE: usize = 4096;

/// When the reply is written relative to reading the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplyOrder {
    /// Reply right after the first read attempt, whether or not it produced
    /// data, then keep waiting for the request. This is what existing
    /// clients of the protocol expect.
    #[default]
    BeforeRequest,
    /// Wait for the request first and only reply once it has arrived.
    AfterRequest,
}

impl ReplyOrder {
    fn parse(value: &str) -> Result<Self, Error> {
        match value {
            "before_request" => Ok(ReplyOrder::BeforeRequest),
            "after_request" => Ok(ReplyOrder::AfterRequest),
            _ => Err(Error::InvalidReplyOrder {
                got: value.to_string(),
                valid: vec!["before_request".to_string(), "after_request".to_string()],
            }),
        }
    }
}

/// Response exchange settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeOptions {
    /// Size of the request buffer.
    pub max_read_size: usize,
    /// Bytes sent back to the client.
    pub reply: Vec<u8>,
    /// How long to keep trying to read the request. The threaded server
    /// uses it as the socket read timeout.
    pub response_timeout: Duration,
    pub reply_order: ReplyOrder,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            max_read_size: DEFAULT_MAX_READ_SIZE,
            reply: DEFAULT_REPLY.as_bytes().to_vec(),
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            reply_order: ReplyOrder::default(),
        }
    }
}

impl ExchangeOptions {
    /// Reads `max_read_size`, `reply`, `response_timeout_ms` and
    /// `reply_order`, using the defaults for missing keys.
    pub fn from_config(config: &Config, name: &str) -> Result<Self, Error> {
        let max_read_size = get_namespaced_usize(config, name, "max_read_size")
            .unwrap_or(DEFAULT_MAX_READ_SIZE);
        let reply = get_namespaced_string(config, name, "reply")
            .unwrap_or_else(|_| DEFAULT_REPLY.to_string());
        let response_timeout = get_namespaced_u64(config, name, "response_timeout_ms")
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RESPONSE_TIMEOUT);
        let reply_order = match get_namespaced_string(config, name, "reply_order") {
            Ok(value) => ReplyOrder::parse(&value)?,
            Err(_) => ReplyOrder::default(),
        };

        Ok(Self {
            max_read_size,
            reply: reply.into_bytes(),
            response_timeout,
            reply_order,
        })
    }
}

/// Performs the single request/reply turn on an established non-blocking
/// session and returns the request bytes.
///
/// The first read is issued and the clock started. With
/// [`ReplyOrder::BeforeRequest`] the reply is then written at once. While the
/// request has not arrived and the budget is not spent, the read is retried,
/// sleeping on `poller` for at most the remaining budget in between.
///
/// # Errors
///
/// - [`Error::ShortWrite`] / [`Error::Write`] if the reply was not written
///   in one call. The write is never retried.
/// - [`Error::Read`] if a read failed with anything but would-block on read.
/// - [`Error::PollFailed`] if a readiness wait failed.
/// - [`Error::ReadTimeout`] if no data arrived within the budget.
#[instrument(skip_all)]
pub fn respond<S, P>(
    session: &mut S,
    poller: &mut P,
    options: &ExchangeOptions,
) -> Result<Vec<u8>, Error>
where
    S: SecureSession,
    P: ReadinessPoll,
{
    let mut buf = vec![0; options.max_read_size];
    let first = session.read(&mut buf);
    let start = Instant::now();

    if options.reply_order == ReplyOrder::BeforeRequest {
        write_reply(session, &options.reply)?;
    }

    let mut outcome = first;
    let len = loop {
        match outcome {
            Ok(0) => return Err(Error::Read("connection closed before request".to_string())),
            Ok(len) => break len,
            Err(err) if err.class() == ErrorClass::WantRead => {
                let elapsed = start.elapsed();
                if elapsed >= options.response_timeout {
                    return Err(Error::ReadTimeout { waited: elapsed });
                }
                let readiness = poller.wait(options.response_timeout - elapsed)?;
                trace!(?readiness, "Retrying read");
                outcome = session.read(&mut buf);
            }
            Err(err) => return Err(Error::Read(err.to_string())),
        }
    };

    buf.truncate(len);
    info!(len, request = %String::from_utf8_lossy(&buf), "Received request");

    if options.reply_order == ReplyOrder::AfterRequest {
        write_reply(session, &options.reply)?;
    }

    Ok(buf)
}

/// Blocking single turn: one read, then one reply.
///
/// Returns the request bytes, or an empty buffer if the peer closed the
/// session before sending anything, in which case no reply is written. A
/// read that would block means the socket's read timeout expired and is
/// reported as [`Error::ReadTimeout`].
#[instrument(skip_all)]
pub fn respond_once<S: SecureSession>(
    session: &mut S,
    options: &ExchangeOptions,
) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0; options.max_read_size];
    let len = match session.read(&mut buf) {
        Ok(len) => len,
        Err(err) if err.class() == ErrorClass::ZeroReturn => 0,
        Err(err) if err.is_would_block() => {
            return Err(Error::ReadTimeout {
                waited: options.response_timeout,
            })
        }
        Err(err) => return Err(Error::Read(err.to_string())),
    };

    buf.truncate(len);
    if buf.is_empty() {
        debug!("Peer closed before sending a request");
        return Ok(buf);
    }

    info!(len, request = %String::from_utf8_lossy(&buf), "Received request");
    write_reply(session, &options.reply)?;
    Ok(buf)
}

fn write_reply<S: SecureSession>(session: &mut S, reply: &[u8]) -> Result<(), Error> {
    match session.write(reply) {
        Ok(written) if written == reply.len() => {
            debug!(len = written, "Sent reply");
            Ok(())
        }
        Ok(written) => Err(Error::ShortWrite {
            written,
            expected: reply.len(),
        }),
        Err(err) => Err(Error::Write(err.to_string())),
    }
}
