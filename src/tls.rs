use crate::BoxedTransport;
use std::{
    io::Result,
    net::TcpStream,
    path::{Path, PathBuf},
};

/// TLS credentials for an acceptor.
///
/// Paths are canonicalized at construction so that misconfiguration
/// surfaces when the acceptor is built rather than on the first
/// handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    certificate_file: PathBuf,
    private_key_file: PathBuf,
    private_key_password: Option<String>,
}

impl TlsConfig {
    /// Build a config from a certificate file and a private key file.
    ///
    /// # Errors
    ///
    /// Returns an io error if either path does not exist or cannot be
    /// canonicalized.
    pub fn new(certificate_file: impl AsRef<Path>, private_key_file: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            certificate_file: certificate_file.as_ref().canonicalize()?,
            private_key_file: private_key_file.as_ref().canonicalize()?,
            private_key_password: None,
        })
    }

    /// Attach a password for an encrypted private key.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.private_key_password = Some(password.into());
        self
    }

    /// The canonicalized certificate path.
    pub fn certificate_file(&self) -> &Path {
        &self.certificate_file
    }

    /// The canonicalized private key path.
    pub fn private_key_file(&self) -> &Path {
        &self.private_key_file
    }

    /// The private key password, if any.
    pub fn private_key_password(&self) -> Option<&str> {
        self.private_key_password.as_deref()
    }
}

/// Upgrades an accepted tcp stream to a secured byte stream.
///
/// hearth does not link a TLS library; an integration crate implements
/// this trait over its own stream type and hands the acceptor a wrapper
/// at configuration time. The connection engine calls [`TlsWrapper::wrap`]
/// once per accepted connection, before any bytes are read.
pub trait TlsWrapper: Send + Sync + 'static {
    /// Perform the server-side handshake over `stream` and return the
    /// secured transport.
    ///
    /// # Errors
    ///
    /// Return an io error if the handshake fails; the connection is
    /// dropped and the failure is logged.
    fn wrap(&self, stream: TcpStream, config: &TlsConfig) -> Result<BoxedTransport>;
}
