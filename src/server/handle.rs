use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Thread-safe handle for stopping a running [`Server`](super::Server).
///
/// Obtain an instance by calling
/// [`Server::get_server_handle()`](super::Server::get_server_handle). Clones
/// share the same shutdown flag.
#[derive(Debug, Clone)]
pub struct ServerHandle {
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) waker: Arc<Waker>,
}

impl ServerHandle {
    /// Asks the accept loop to stop and wakes it up.
    ///
    /// The loop finishes the connection it is currently serving (non-blocking
    /// model) before it returns. Threaded workers that are already running
    /// are not interrupted.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            warn!(?err, "Failed to wake accept loop");
        }
    }

    /// True once [`shutdown()`](Self::shutdown) has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
