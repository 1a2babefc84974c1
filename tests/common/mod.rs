#![allow(dead_code)]

use openssl::ssl::{Ssl, SslContext, SslMethod, SslStream, SslVersion};
use psk_server::{
    Error, ErrorClass, Readiness, ReadinessPoll, SecureSession, Server, ServerHandle, SessionError,
};
use std::collections::VecDeque;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

// ============================================================================
// Scripted Doubles
// ============================================================================

/// Session whose operations replay scripted results.
///
/// An exhausted accept script succeeds, an exhausted read script keeps
/// returning would-block on read, and writes take `write_limit` bytes at most.
#[derive(Default)]
pub struct ScriptedSession {
    pub accept_results: VecDeque<Result<(), SessionError>>,
    pub read_results: VecDeque<Result<Vec<u8>, SessionError>>,
    pub write_limit: Option<usize>,
    pub write_error: Option<SessionError>,
    pub datagram: bool,
    pub release_error: Option<io::ErrorKind>,
    pub read_delay: Duration,

    pub accept_calls: usize,
    pub read_calls: usize,
    pub writes: Vec<Vec<u8>>,
    pub shutdown_calls: usize,
    pub released: bool,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` would-block results of the given class, then success.
    pub fn blocking_handshake(count: usize, class: ErrorClass) -> Self {
        let mut session = Self::new();
        for _ in 0..count {
            session
                .accept_results
                .push_back(Err(SessionError::new(class, "would block")));
        }
        session.accept_results.push_back(Ok(()));
        session
    }

    pub fn with_reads(mut self, reads: Vec<Result<Vec<u8>, SessionError>>) -> Self {
        self.read_results = reads.into();
        self
    }
}

impl SecureSession for ScriptedSession {
    fn accept(&mut self) -> Result<(), SessionError> {
        self.accept_calls += 1;
        self.accept_results.pop_front().unwrap_or(Ok(()))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SessionError> {
        self.read_calls += 1;
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }
        match self.read_results.pop_front() {
            Some(Ok(data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            Some(Err(err)) => Err(err),
            None => Err(SessionError::want_read()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, SessionError> {
        self.writes.push(buf.to_vec());
        if let Some(err) = self.write_error.clone() {
            return Err(err);
        }
        Ok(self.write_limit.map_or(buf.len(), |limit| limit.min(buf.len())))
    }

    fn shutdown(&mut self) -> Result<(), SessionError> {
        self.shutdown_calls += 1;
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        self.released = true;
        match self.release_error {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(()),
        }
    }

    fn is_datagram(&self) -> bool {
        self.datagram
    }
}

/// What a [`ScriptedPoller`] wait returns.
#[derive(Debug, Clone, Copy)]
pub enum PollStep {
    Ready(Readiness),
    Fail,
}

/// Poller that replays scripted readiness results.
///
/// Once the script is exhausted it sleeps for the requested timeout (capped
/// by `max_sleep`) and reports a timeout.
pub struct ScriptedPoller {
    pub steps: VecDeque<PollStep>,
    pub max_sleep: Duration,
    pub timeouts: Vec<Duration>,
}

impl ScriptedPoller {
    pub fn new(steps: Vec<PollStep>) -> Self {
        Self {
            steps: steps.into(),
            max_sleep: Duration::from_millis(5),
            timeouts: Vec::new(),
        }
    }

    pub fn with_default_sleep(mut self, max_sleep: Duration) -> Self {
        self.max_sleep = max_sleep;
        self
    }

    pub fn waits(&self) -> usize {
        self.timeouts.len()
    }
}

impl ReadinessPoll for ScriptedPoller {
    fn wait(&mut self, timeout: Duration) -> Result<Readiness, Error> {
        self.timeouts.push(timeout);
        match self.steps.pop_front() {
            Some(PollStep::Ready(readiness)) => Ok(readiness),
            Some(PollStep::Fail) => Err(Error::PollFailed(io::Error::from(io::ErrorKind::Other))),
            None => {
                thread::sleep(timeout.min(self.max_sleep));
                Ok(Readiness::TimedOut)
            }
        }
    }
}

// ============================================================================
// PSK Client
// ============================================================================

/// Key the server hands out for the default identity.
pub const CLIENT_KEY: [u8; 4] = [26, 43, 60, 77];

/// Opens a TLS 1.2 PSK session to `addr` presenting `identity`.
pub fn connect_psk(
    addr: SocketAddr,
    identity: &str,
    key: &[u8],
) -> Result<SslStream<TcpStream>, Box<dyn std::error::Error>> {
    connect_psk_with_hint(addr, identity, key).map(|(tls, _hint)| tls)
}

/// Like [`connect_psk`], also returning the identity hint the server sent.
pub fn connect_psk_with_hint(
    addr: SocketAddr,
    identity: &str,
    key: &[u8],
) -> Result<(SslStream<TcpStream>, Option<String>), Box<dyn std::error::Error>> {
    let mut builder = SslContext::builder(SslMethod::tls_client())?;
    builder.set_max_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_cipher_list("PSK-AES128-CBC-SHA256")?;

    let seen_hint = Arc::new(Mutex::new(None));
    let hint_slot = Arc::clone(&seen_hint);
    let identity = identity.as_bytes().to_vec();
    let key = key.to_vec();
    builder.set_psk_client_callback(move |_ssl, hint, identity_out, psk_out| {
        *hint_slot.lock().unwrap() = hint.map(|h| String::from_utf8_lossy(h).into_owned());
        identity_out[..identity.len()].copy_from_slice(&identity);
        identity_out[identity.len()] = 0;
        psk_out[..key.len()].copy_from_slice(&key);
        Ok(key.len())
    });
    let context = builder.build();

    let stream = TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(Duration::from_secs(15)))?;
    let mut tls = SslStream::new(Ssl::new(&context)?, stream)?;
    tls.connect()?;

    let hint = seen_hint.lock().unwrap().take();
    Ok((tls, hint))
}

/// Reads until `expected.len()` bytes arrived or the stream ends.
pub fn read_reply(tls: &mut SslStream<TcpStream>, expected: &[u8]) -> Vec<u8> {
    let mut reply = Vec::new();
    let mut buf = [0u8; 256];
    while reply.len() < expected.len() {
        match tls.ssl_read(&mut buf) {
            Ok(len) => reply.extend_from_slice(&buf[..len]),
            Err(_) => break,
        }
    }
    reply
}

// ============================================================================
// Server Helpers
// ============================================================================

/// Builds a configuration from key/value pairs.
pub fn test_config(pairs: &[(&str, &str)]) -> config::Config {
    let mut builder = config::Config::builder();
    for (key, value) in pairs {
        builder = builder.set_override(*key, *value).unwrap();
    }
    builder.build().unwrap()
}

/// Starts a server on an ephemeral port in a background thread.
pub fn spawn_server(
    config: &config::Config,
) -> (SocketAddr, ServerHandle, JoinHandle<Result<(), Error>>) {
    let mut server = Server::new(config).expect("Failed to create server");
    let addr = server.listen("127.0.0.1:0").expect("Failed to listen");
    let handle = server.get_server_handle();
    let join = thread::spawn(move || server.run());
    (addr, handle, join)
}
