use crate::{AcceptorCore, DEFAULT_MAX_THREAD_COUNT, SERVICE_UNAVAILABLE};
use std::{
    io::Write,
    net::{Shutdown, TcpStream},
    sync::{Arc, Condvar, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

/// The concurrency policy of a server: where the accept loop runs and
/// where each accepted connection is served.
///
/// A taskmaster that takes responsibility for a socket must eventually
/// either run [`AcceptorCore::process_connection`] on it or reject it
/// with [`send_service_unavailable_response`].
pub trait Taskmaster: Send + Sync + 'static {
    /// Arrange for [`AcceptorCore::accept_loop`] to run: on the caller,
    /// a dedicated thread, or a pool thread.
    fn execute_acceptor(&self, acceptor: Arc<AcceptorCore>);

    /// Take responsibility for a freshly accepted socket.
    fn handle_incoming_connection(&self, acceptor: Arc<AcceptorCore>, socket: TcpStream);

    /// Stop scheduling new work. Existing workers may continue until
    /// their current request finishes.
    fn shutdown(&self, acceptor: &AcceptorCore);
}

/// Write the pre-rendered 503 response to `socket` and hang up.
pub fn send_service_unavailable_response(socket: &mut TcpStream) {
    socket.write_all(SERVICE_UNAVAILABLE).ok();
    socket.shutdown(Shutdown::Both).ok();
}

/// Runs the accept loop on the caller and serves every connection
/// inline, one at a time. [`Acceptor::start`](crate::Acceptor::start)
/// does not return until the server stops. No drain is needed on
/// shutdown because stopping happens between connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleThreaded;

impl Taskmaster for SingleThreaded {
    fn execute_acceptor(&self, acceptor: Arc<AcceptorCore>) {
        acceptor.accept_loop();
    }

    fn handle_incoming_connection(&self, acceptor: Arc<AcceptorCore>, socket: TcpStream) {
        acceptor.process_connection(socket);
    }

    fn shutdown(&self, _acceptor: &AcceptorCore) {}
}

/// One worker thread per connection, with a cap.
///
/// When the live worker count reaches `max_thread_count`, a new
/// connection either waits for a slot (while the optional
/// `max_accept_count` allows) or is turned away with the pre-rendered
/// 503. The accept loop itself runs on a dedicated thread.
#[derive(Debug)]
pub struct ThreadPerConnection {
    max_thread_count: usize,
    max_accept_count: Option<usize>,
    inner: Arc<Workers>,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Debug, Default)]
struct Workers {
    live: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the live-worker count when dropped, so a panicking
/// worker still frees its slot.
#[derive(Debug)]
struct ReleaseSlot(Arc<Workers>);

impl Drop for ReleaseSlot {
    fn drop(&mut self) {
        let mut live = self.0.live.lock().unwrap_or_else(PoisonError::into_inner);
        *live -= 1;
        self.0.idle.notify_all();
    }
}

impl Default for ThreadPerConnection {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_THREAD_COUNT)
    }
}

impl ThreadPerConnection {
    /// A taskmaster allowing up to `max_thread_count` simultaneous
    /// workers.
    pub fn new(max_thread_count: usize) -> Self {
        Self {
            max_thread_count,
            max_accept_count: None,
            inner: Arc::default(),
            accept_thread: Mutex::new(None),
        }
    }

    /// Allow up to `max_accept_count` connections to be accepted and
    /// held waiting for a worker slot before 503s are served.
    #[must_use]
    pub fn with_max_accept_count(mut self, max_accept_count: usize) -> Self {
        self.max_accept_count = Some(max_accept_count);
        self
    }

    /// The number of connections currently being served.
    pub fn live_workers(&self) -> usize {
        *self.inner.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Taskmaster for ThreadPerConnection {
    fn execute_acceptor(&self, acceptor: Arc<AcceptorCore>) {
        let handle = thread::Builder::new()
            .name("hearth-acceptor".into())
            .spawn(move || acceptor.accept_loop());
        match handle {
            Ok(handle) => {
                *self
                    .accept_thread
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            }
            Err(error) => log::error!("failed spawning accept thread: {error}"),
        }
    }

    fn handle_incoming_connection(&self, acceptor: Arc<AcceptorCore>, mut socket: TcpStream) {
        {
            let mut live = self.inner.live.lock().unwrap_or_else(PoisonError::into_inner);
            while *live >= self.max_thread_count {
                let may_wait = self.max_accept_count.is_some_and(|cap| *live < cap)
                    && !acceptor.stopper().is_stopped();
                if !may_wait {
                    drop(live);
                    log::warn!("worker cap reached, rejecting connection with 503");
                    send_service_unavailable_response(&mut socket);
                    return;
                }
                live = self
                    .inner
                    .idle
                    .wait(live)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            *live += 1;
        }

        let release = ReleaseSlot(Arc::clone(&self.inner));
        let spawned = thread::Builder::new()
            .name("hearth-worker".into())
            .spawn(move || {
                let _release = release;
                acceptor.process_connection(socket);
            });

        if let Err(error) = spawned {
            // the closure, and with it the slot guard and socket, were
            // dropped by the failed spawn
            log::error!("failed spawning worker thread: {error}");
        }
    }

    fn shutdown(&self, _acceptor: &AcceptorCore) {
        // wake anything parked waiting for a worker slot so it can
        // observe the stop flag
        self.inner.idle.notify_all();
        let handle = self
            .accept_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.join().ok();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let taskmaster = ThreadPerConnection::default();
        assert_eq!(taskmaster.max_thread_count, DEFAULT_MAX_THREAD_COUNT);
        assert_eq!(taskmaster.max_accept_count, None);
        assert_eq!(taskmaster.live_workers(), 0);

        let capped = ThreadPerConnection::new(2).with_max_accept_count(4);
        assert_eq!(capped.max_thread_count, 2);
        assert_eq!(capped.max_accept_count, Some(4));
    }
}
