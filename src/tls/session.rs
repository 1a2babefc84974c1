use super::{ErrorClass, SecureSession, SessionError};
use crate::error::Error;
use openssl::ssl::{self, ErrorCode, Ssl, SslContext, SslStream};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};

/// Owned TCP stream that can be closed explicitly.
///
/// Dropping a `TcpStream` discards any close error. [`Socket::close()`]
/// closes the descriptor itself and reports the failure instead. After a
/// close, reads and writes fail with `NotConnected`.
#[derive(Debug)]
pub struct Socket {
    stream: Option<TcpStream>,
    fd: RawFd,
}

impl Socket {
    pub fn new(stream: TcpStream) -> Self {
        let fd = stream.as_raw_fd();
        Self {
            stream: Some(stream),
            fd,
        }
    }

    /// The descriptor this socket was created with.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Closes the descriptor. Closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        let Some(stream) = self.stream.take() else {
            return Ok(());
        };
        let fd = stream.into_raw_fd();
        // SAFETY: into_raw_fd() transferred ownership of fd to us and nothing
        // else refers to it any more.
        if unsafe { libc::close(fd) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn stream(&mut self) -> io::Result<&mut TcpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| io::Error::from(io::ErrorKind::NotConnected))
    }
}

impl Read for Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream()?.read(buf)
    }
}

impl Write for Socket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream()?.flush()
    }
}

impl From<ssl::Error> for SessionError {
    fn from(err: ssl::Error) -> Self {
        let code = err.code();
        let class = if code == ErrorCode::WANT_READ {
            ErrorClass::WantRead
        } else if code == ErrorCode::WANT_WRITE {
            ErrorClass::WantWrite
        } else if code == ErrorCode::ZERO_RETURN {
            ErrorClass::ZeroReturn
        } else {
            ErrorClass::Fatal
        };
        SessionError::new(class, err.to_string())
    }
}

/// [`SecureSession`] backed by OpenSSL over a TCP socket.
///
/// Whether the session blocks follows the socket: switch the stream to
/// non-blocking mode before creating the session to get would-block
/// classifications instead of blocking calls.
pub struct OpenSslSession {
    stream: SslStream<Socket>,
}

impl OpenSslSession {
    /// Creates a server session for `stream` from the shared context.
    pub fn new(context: &SslContext, stream: TcpStream) -> Result<Self, Error> {
        let ssl = Ssl::new(context).map_err(|e| Error::SessionSetup(e.to_string()))?;
        let stream =
            SslStream::new(ssl, Socket::new(stream)).map_err(|e| Error::SessionSetup(e.to_string()))?;
        Ok(Self { stream })
    }

    /// The descriptor the session is bound to.
    pub fn fd(&self) -> RawFd {
        self.stream.get_ref().fd()
    }

    /// Name of the negotiated cipher, once the handshake is done.
    pub fn cipher_name(&self) -> Option<&'static str> {
        self.stream.ssl().current_cipher().map(|cipher| cipher.name())
    }
}

impl SecureSession for OpenSslSession {
    fn accept(&mut self) -> Result<(), SessionError> {
        self.stream.accept().map_err(SessionError::from)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, SessionError> {
        self.stream.ssl_read(buf).map_err(SessionError::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, SessionError> {
        self.stream.ssl_write(buf).map_err(SessionError::from)
    }

    fn shutdown(&mut self) -> Result<(), SessionError> {
        self.stream
            .shutdown()
            .map(|_| ())
            .map_err(SessionError::from)
    }

    fn release(&mut self) -> io::Result<()> {
        self.stream.get_mut().close()
    }

    fn is_datagram(&self) -> bool {
        // Sessions are only ever created over TCP streams.
        false
    }
}
