use std::{
    io::{Read, Result, Write},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

/// # The interface that the http protocol is communicated over.
///
/// Implemented for [`TcpStream`] out of the box; TLS integrations
/// implement this for their wrapped stream type (see
/// [`TlsWrapper`](crate::TlsWrapper)). All trait functions beyond the
/// [`Read`]/[`Write`] supertraits are optional.
#[allow(unused_variables)]
pub trait Transport: Read + Write + Send {
    /// # Returns the socket address of the remote peer of this transport.
    ///
    /// # Errors
    ///
    /// Return an error if this transport supports retrieving the remote
    /// peer but attempting to do so is unsuccessful.
    fn peer_addr(&self) -> Result<Option<SocketAddr>> {
        Ok(None)
    }

    /// # Sets the read timeout for this transport.
    ///
    /// See [`std::net::TcpStream::set_read_timeout`].
    /// Optional to implement.
    ///
    /// # Errors
    ///
    /// Return an error if this transport supports setting a read timeout
    /// and attempting to do so is unsuccessful.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }

    /// # Sets the write timeout for this transport.
    ///
    /// See [`std::net::TcpStream::set_write_timeout`].
    /// Optional to implement.
    ///
    /// # Errors
    ///
    /// Return an error if this transport supports setting a write
    /// timeout and attempting to do so is unsuccessful.
    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        Ok(())
    }
}

/// A type-erased transport, as handed to the connection engine.
pub type BoxedTransport = Box<dyn Transport>;

impl Transport for TcpStream {
    fn peer_addr(&self) -> Result<Option<SocketAddr>> {
        TcpStream::peer_addr(self).map(Some)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        TcpStream::set_write_timeout(self, timeout)
    }
}

impl Transport for Box<dyn Transport> {
    fn peer_addr(&self) -> Result<Option<SocketAddr>> {
        (**self).peer_addr()
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_read_timeout(timeout)
    }

    fn set_write_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        (**self).set_write_timeout(timeout)
    }
}
