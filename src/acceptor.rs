use crate::{
    taskmaster::ThreadPerConnection, ErrorGenerator, Handler, Logger, MinimalErrorGenerator,
    Result, ServerOptions, StderrLogger, Stopper, Taskmaster, TlsConfig, TlsWrapper,
    DEFAULT_CONNECTION_TIMEOUT, SERVER,
};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io::ErrorKind,
    net::{IpAddr, SocketAddr, TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};

/// How long the accept loop waits for the listener to become readable
/// before re-checking the shutdown flag.
pub const NEW_CONNECTION_WAIT_TIME: Duration = Duration::from_millis(50);

/// The shared core of a running acceptor: configuration, plug-ins, the
/// listen socket and the shutdown coordinator. Taskmasters receive this
/// and feed it back into [`AcceptorCore::accept_loop`] and
/// [`AcceptorCore::process_connection`].
pub struct AcceptorCore {
    pub(crate) name: String,
    pub(crate) address: Option<IpAddr>,
    pub(crate) port: u16,
    pub(crate) listen_backlog: i32,
    pub(crate) persistent_connections: bool,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
    pub(crate) tls_config: Option<TlsConfig>,
    pub(crate) tls_wrapper: Option<Box<dyn TlsWrapper>>,
    pub(crate) handler: Box<dyn Handler>,
    pub(crate) error_generator: Box<dyn ErrorGenerator>,
    pub(crate) access_logger: Box<dyn Logger>,
    pub(crate) message_logger: Box<dyn Logger>,
    pub(crate) taskmaster: Arc<dyn Taskmaster>,
    pub(crate) options: ServerOptions,
    pub(crate) stopper: Stopper,
    pub(crate) listener: Mutex<Option<TcpListener>>,
}

impl std::fmt::Debug for AcceptorCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptorCore")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .field("persistent_connections", &self.persistent_connections)
            .field("options", &self.options)
            .finish()
    }
}

impl AcceptorCore {
    /// The shutdown coordinator for this server.
    pub fn stopper(&self) -> &Stopper {
        &self.stopper
    }

    /// The server's tunables.
    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// The server's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn log_error(&self, message: &str) {
        log::log!(self.options.error_log_level, "{message}");
        if self.options.log_errors {
            self.message_logger.log(&format!("ERROR: {message}"));
        }
    }

    pub(crate) fn log_warning(&self, message: &str) {
        log::log!(self.options.warning_log_level, "{message}");
        if self.options.log_warnings {
            self.message_logger.log(&format!("WARNING: {message}"));
        }
    }

    fn listener_slot(&self) -> MutexGuard<'_, Option<TcpListener>> {
        self.listener.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the accept loop until shutdown: wait up to
    /// [`NEW_CONNECTION_WAIT_TIME`] for the listener, accept one
    /// connection, apply the socket timeouts, and hand it to the
    /// taskmaster. `ECONNABORTED` is swallowed; other accept errors are
    /// logged and survived.
    pub fn accept_loop(self: &Arc<Self>) {
        log::debug!("running accept loop for {}", self.name);
        loop {
            if self.stopper.is_stopped() {
                break;
            }

            let accepted = match &*self.listener_slot() {
                Some(listener) => listener.accept(),
                None => break,
            };

            match accepted {
                Ok((socket, _)) => match self.configure_socket(socket) {
                    Ok(socket) => {
                        let taskmaster = Arc::clone(&self.taskmaster);
                        taskmaster.handle_incoming_connection(Arc::clone(self), socket);
                    }
                    Err(error) => {
                        self.log_warning(&format!("failed configuring accepted socket: {error}"));
                    }
                },
                Err(error) if error.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(NEW_CONNECTION_WAIT_TIME);
                }
                Err(error) if error.kind() == ErrorKind::ConnectionAborted => {}
                Err(error) => {
                    self.log_error(&format!("error accepting connection: {error}"));
                }
            }
        }
        log::debug!("terminating accept loop for {}", self.name);
    }

    fn configure_socket(&self, socket: TcpStream) -> std::io::Result<TcpStream> {
        // the listener is non-blocking for the timed accept wait, but
        // connection io must block under the socket timeouts
        socket.set_nonblocking(false)?;
        socket.set_read_timeout(self.read_timeout)?;
        socket.set_write_timeout(self.write_timeout)?;
        Ok(socket)
    }

    /// Serve one connection to completion on the calling thread.
    pub fn process_connection(self: &Arc<Self>, socket: TcpStream) {
        crate::connection::process_connection(self, socket);
    }

    #[cfg(test)]
    pub(crate) fn test_instance() -> Self {
        use crate::{Conn, Outcome};
        fn not_handled(_: &mut Conn<'_>) -> Result<Outcome> {
            Ok(Outcome::NotHandled)
        }
        Self {
            name: SERVER.into(),
            address: None,
            port: 0,
            listen_backlog: 50,
            persistent_connections: true,
            read_timeout: Some(DEFAULT_CONNECTION_TIMEOUT),
            write_timeout: Some(DEFAULT_CONNECTION_TIMEOUT),
            tls_config: None,
            tls_wrapper: None,
            handler: Box::new(not_handled),
            error_generator: Box::new(MinimalErrorGenerator),
            access_logger: Box::new(StderrLogger),
            message_logger: Box::new(StderrLogger),
            taskmaster: Arc::new(crate::taskmaster::SingleThreaded),
            options: ServerOptions::default(),
            stopper: Stopper::new(),
            listener: Mutex::new(None),
        }
    }
}

/** A hearth server instance.

An acceptor owns a listen socket and the policy around it: the handler,
the taskmaster that decides where connections run, the error generator,
the loggers, timeouts and TLS. It is created inert with
[`Acceptor::builder`], transitions to listening with
[`Acceptor::start`], and back with [`Acceptor::stop`].

```no_run
use hearth_http::{Acceptor, Conn, Outcome, Result};

fn hello(_conn: &mut Conn<'_>) -> Result<Outcome> {
    Ok(Outcome::Body("hello".into()))
}

fn main() -> Result<()> {
    let acceptor = Acceptor::builder(hello).with_port(8080).build();
    acceptor.start()?;
    // ... later
    acceptor.stop(true)?;
    Ok(())
}
```
*/
pub struct Acceptor {
    shared: Arc<AcceptorCore>,
    has_started: AtomicBool,
}

impl std::fmt::Debug for Acceptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acceptor")
            .field("core", &self.shared)
            .field("has_started", &self.has_started)
            .finish()
    }
}

impl Acceptor {
    /// Start configuring an acceptor around `handler`.
    pub fn builder(handler: impl Handler) -> AcceptorBuilder {
        AcceptorBuilder {
            name: SERVER.into(),
            address: None,
            port: 80,
            listen_backlog: 50,
            persistent_connections: true,
            read_timeout: Some(DEFAULT_CONNECTION_TIMEOUT),
            write_timeout: Some(DEFAULT_CONNECTION_TIMEOUT),
            tls: None,
            handler: Box::new(handler),
            error_generator: Box::new(MinimalErrorGenerator),
            access_logger: Box::new(StderrLogger),
            message_logger: Box::new(StderrLogger),
            taskmaster: Arc::new(ThreadPerConnection::default()),
            options: ServerOptions::default(),
        }
    }

    /// An acceptor with all-default configuration around `handler`.
    pub fn new(handler: impl Handler) -> Self {
        Self::builder(handler).build()
    }

    /// The shared core, as handed to taskmasters.
    pub fn core(&self) -> &Arc<AcceptorCore> {
        &self.shared
    }

    /// This server's shutdown coordinator.
    pub fn stopper(&self) -> Stopper {
        self.shared.stopper.clone()
    }

    /// The bound address while listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.shared
            .listener_slot()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Bind the listen socket and hand the accept loop to the
    /// taskmaster.
    ///
    /// # Errors
    ///
    /// [`crate::Error::AlreadyListening`] if already started, or any io
    /// error binding the socket.
    pub fn start(&self) -> Result<&Self> {
        {
            let mut slot = self.shared.listener_slot();
            if slot.is_some() {
                return Err(crate::Error::AlreadyListening);
            }

            let address = SocketAddr::new(
                self.shared
                    .address
                    .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)),
                self.shared.port,
            );
            let socket = Socket::new(
                Domain::for_address(address),
                Type::STREAM,
                Some(Protocol::TCP),
            )?;
            socket.set_reuse_address(true)?;
            socket.bind(&address.into())?;
            socket.listen(self.shared.listen_backlog)?;

            let listener: TcpListener = socket.into();
            listener.set_nonblocking(true)?;
            log::info!("{} listening on {address}", self.shared.name);

            *slot = Some(listener);
            self.shared.stopper.reset();
        }

        self.has_started.store(true, Ordering::SeqCst);
        let taskmaster = Arc::clone(&self.shared.taskmaster);
        taskmaster.execute_acceptor(Arc::clone(&self.shared));
        Ok(self)
    }

    /// Stop the server: set the shutdown flag, tell the taskmaster to
    /// stop scheduling, optionally wait for in-flight requests to
    /// drain, and close the listen socket.
    ///
    /// Idempotent after the first successful stop.
    ///
    /// # Errors
    ///
    /// [`crate::Error::NotListening`] if the acceptor was never
    /// started.
    pub fn stop(&self, soft: bool) -> Result<()> {
        if !self.has_started.load(Ordering::SeqCst) {
            return Err(crate::Error::NotListening);
        }

        self.shared.stopper.stop();
        self.shared.taskmaster.shutdown(&self.shared);
        if soft {
            self.shared.stopper.wait_idle();
        }
        self.shared.listener_slot().take();
        Ok(())
    }
}

/// Configuration surface for an [`Acceptor`], with the defaults of
/// [`Acceptor::builder`].
pub struct AcceptorBuilder {
    name: String,
    address: Option<IpAddr>,
    port: u16,
    listen_backlog: i32,
    persistent_connections: bool,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    tls: Option<(TlsConfig, Box<dyn TlsWrapper>)>,
    handler: Box<dyn Handler>,
    error_generator: Box<dyn ErrorGenerator>,
    access_logger: Box<dyn Logger>,
    message_logger: Box<dyn Logger>,
    taskmaster: Arc<dyn Taskmaster>,
    options: ServerOptions,
}

impl std::fmt::Debug for AcceptorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptorBuilder")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("port", &self.port)
            .finish()
    }
}

impl AcceptorBuilder {
    /// The display name, used for the `Server` header.
    /// **Default**: `hearth/<version>`
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The address to bind. **Default**: wildcard
    #[must_use]
    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    /// The port to bind. **Default**: 80
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// The listen backlog. **Default**: 50
    #[must_use]
    pub fn with_listen_backlog(mut self, listen_backlog: i32) -> Self {
        self.listen_backlog = listen_backlog;
        self
    }

    /// Whether connections may be reused across requests.
    /// **Default**: `true`
    #[must_use]
    pub fn with_persistent_connections(mut self, persistent_connections: bool) -> Self {
        self.persistent_connections = persistent_connections;
        self
    }

    /// The socket read timeout. **Default**:
    /// [`DEFAULT_CONNECTION_TIMEOUT`]
    #[must_use]
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// The socket write timeout. **Default**:
    /// [`DEFAULT_CONNECTION_TIMEOUT`]
    #[must_use]
    pub fn with_write_timeout(mut self, write_timeout: Option<Duration>) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Serve TLS with the given credentials through `wrapper`.
    /// **Default**: plain tcp
    #[must_use]
    pub fn with_tls(mut self, config: TlsConfig, wrapper: impl TlsWrapper) -> Self {
        self.tls = Some((config, Box::new(wrapper)));
        self
    }

    /// The error-page generator. **Default**:
    /// [`MinimalErrorGenerator`]
    #[must_use]
    pub fn with_error_generator(mut self, error_generator: impl ErrorGenerator) -> Self {
        self.error_generator = Box::new(error_generator);
        self
    }

    /// The access-log sink. **Default**: standard error
    #[must_use]
    pub fn with_access_logger(mut self, access_logger: impl Logger) -> Self {
        self.access_logger = Box::new(access_logger);
        self
    }

    /// The message-log sink. **Default**: standard error
    #[must_use]
    pub fn with_message_logger(mut self, message_logger: impl Logger) -> Self {
        self.message_logger = Box::new(message_logger);
        self
    }

    /// The concurrency strategy. **Default**:
    /// [`ThreadPerConnection::default`]
    #[must_use]
    pub fn with_taskmaster(mut self, taskmaster: impl Taskmaster) -> Self {
        self.taskmaster = Arc::new(taskmaster);
        self
    }

    /// The server tunables. **Default**: [`ServerOptions::default`]
    #[must_use]
    pub fn with_options(mut self, options: ServerOptions) -> Self {
        self.options = options;
        self
    }

    /// Seal the configuration into an inert [`Acceptor`].
    pub fn build(self) -> Acceptor {
        let (tls_config, tls_wrapper) = match self.tls {
            Some((config, wrapper)) => (Some(config), Some(wrapper)),
            None => (None, None),
        };
        Acceptor {
            shared: Arc::new(AcceptorCore {
                name: self.name,
                address: self.address,
                port: self.port,
                listen_backlog: self.listen_backlog,
                persistent_connections: self.persistent_connections,
                read_timeout: self.read_timeout,
                write_timeout: self.write_timeout,
                tls_config,
                tls_wrapper,
                handler: self.handler,
                error_generator: self.error_generator,
                access_logger: self.access_logger,
                message_logger: self.message_logger,
                taskmaster: self.taskmaster,
                options: self.options,
                stopper: Stopper::new(),
                listener: Mutex::new(None),
            }),
            has_started: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Conn, Outcome};

    fn hello(_: &mut Conn<'_>) -> Result<Outcome> {
        Ok(Outcome::Body("hello".into()))
    }

    #[test]
    fn lifecycle_transitions() {
        let acceptor = Acceptor::builder(hello).with_port(0).build();

        assert!(matches!(acceptor.stop(false), Err(crate::Error::NotListening)));
        assert!(acceptor.local_addr().is_none());
        assert!(acceptor.stopper().is_stopped());

        acceptor.start().unwrap();
        assert!(!acceptor.stopper().is_stopped());
        let addr = acceptor.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        assert!(matches!(
            acceptor.start(),
            Err(crate::Error::AlreadyListening)
        ));

        acceptor.stop(true).unwrap();
        assert!(acceptor.stopper().is_stopped());
        assert!(acceptor.local_addr().is_none());

        // idempotent after the first successful stop
        acceptor.stop(false).unwrap();
    }

    #[test]
    fn stopped_listener_port_can_be_rebound() {
        let acceptor = Acceptor::builder(hello).with_port(0).build();
        acceptor.start().unwrap();
        let port = acceptor.local_addr().unwrap().port();
        acceptor.stop(true).unwrap();

        let second = Acceptor::builder(hello).with_port(port).build();
        second.start().unwrap();
        assert_eq!(second.local_addr().unwrap().port(), port);
        second.stop(true).unwrap();
    }
}
