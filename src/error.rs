use crate::Status;
use std::borrow::Cow;
use thiserror::Error;

/// Concrete errors that occur within hearth's http implementation
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// [`std::io::Error`]
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// connection was closed before the first byte of a request line
    #[error("connection closed by client")]
    Closed,

    /// the request line or a header line was malformed
    #[error("malformed request head")]
    InvalidHead,

    /// the head exceeded the configured maximum length
    #[error("headers were malformed or longer than allowed")]
    HeadersTooLong,

    /// we were unable to parse this http method
    #[error("unrecognized http method {0}")]
    UnrecognizedMethod(String),

    /// the protocol token was present but not a version this server speaks
    #[error("unsupported protocol {0}")]
    UnsupportedVersion(String),

    /// a header carried a value we could not make sense of
    #[error("invalid {0} header")]
    InvalidHeaderValue(&'static str),

    /// the request body could not be decoded as the declared content type
    #[error("malformed request body: {0}")]
    MalformedBody(Cow<'static, str>),

    /// a second body-access mode was requested on a request whose body
    /// was already claimed through another mode
    #[error("request body already accessed through a different mode")]
    BodyAccessConflict,

    /// `start` was called on an acceptor that is already listening
    #[error("acceptor is already listening")]
    AlreadyListening,

    /// `stop` was called on an acceptor that was never started
    #[error("acceptor was never started")]
    NotListening,

    /// an error signalled by a handler
    #[error("handler error: {0}")]
    Handler(Cow<'static, str>),
}

impl Error {
    /// Construct a handler-signalled error from any displayable message.
    pub fn handler(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Handler(message.into())
    }

    /// The response status this error maps to when it surfaces before
    /// headers have been sent.
    pub(crate) fn status(&self) -> Status {
        match self {
            Error::InvalidHead
            | Error::HeadersTooLong
            | Error::UnrecognizedMethod(_)
            | Error::UnsupportedVersion(_)
            | Error::InvalidHeaderValue(_)
            | Error::MalformedBody(_) => Status::BadRequest,
            _ => Status::InternalServerError,
        }
    }
}

/// this crate's result type
pub type Result<T> = std::result::Result<T, Error>;
