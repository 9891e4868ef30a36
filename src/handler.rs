use crate::{Conn, Result, Status};
use std::borrow::Cow;

/// What a handler decided to do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum Outcome {
    /// Respond with this string as the body, encoded with the response
    /// charset; the engine sets `Content-Length` to the encoded length.
    Body(String),

    /// The handler already called [`Conn::send_headers`] and wrote the
    /// body itself (or intends an empty error-page body).
    Done,

    /// The handler declines this request; the engine responds 404
    /// through the error generator.
    NotHandled,

    /// Stop handling immediately with the given status and optional
    /// body. This is the non-local "abort request" exit, expressed as a
    /// value.
    Abort {
        /// the response status to set
        status: Status,
        /// an optional body; when absent the error generator supplies one
        body: Option<String>,
    },
}

impl Outcome {
    /// Abort the request with `status` and let the error generator
    /// produce the body.
    pub fn abort(status: Status) -> Self {
        Outcome::Abort {
            status,
            body: None,
        }
    }

    /// Abort the request with `status` and an explicit body.
    pub fn abort_with_body(status: Status, body: impl Into<String>) -> Self {
        Outcome::Abort {
            status,
            body: Some(body.into()),
        }
    }
}

impl From<String> for Outcome {
    fn from(body: String) -> Self {
        Outcome::Body(body)
    }
}

impl From<&str> for Outcome {
    fn from(body: &str) -> Self {
        Outcome::Body(body.into())
    }
}

/**
# The building block for hearth applications.

A handler is any object that accepts a [`Conn`] and produces an
[`Outcome`]. The engine installs the only error trap: a handler that
cannot produce a response lets its error escape with `?` and the engine
turns it into a 500 (or a 400 for body-parse failures) through the
error generator.

The simplest handler is a closure:

```
use hearth_http::{Conn, Outcome};

fn greeter(conn: &mut Conn<'_>) -> hearth_http::Result<Outcome> {
    Ok(Outcome::Body(format!("hello from {}", conn.target())))
}
```

Handlers run concurrently across connections; any state they share must
be thread-safe.
*/
pub trait Handler: Send + Sync + 'static {
    /// Handle one request, reading from and writing to `conn`.
    ///
    /// # Errors
    ///
    /// Any error returned here is caught by the connection engine and
    /// reported per the server's error policy.
    fn handle(&self, conn: &mut Conn<'_>) -> Result<Outcome>;

    /// The name of this handler, used in debug output. Defaults to the
    /// type name.
    fn name(&self) -> Cow<'static, str> {
        std::any::type_name::<Self>().into()
    }
}

impl<F> Handler for F
where
    F: Fn(&mut Conn<'_>) -> Result<Outcome> + Send + Sync + 'static,
{
    fn handle(&self, conn: &mut Conn<'_>) -> Result<Outcome> {
        self(conn)
    }
}

impl Handler for Box<dyn Handler> {
    fn handle(&self, conn: &mut Conn<'_>) -> Result<Outcome> {
        self.as_ref().handle(conn)
    }

    fn name(&self) -> Cow<'static, str> {
        self.as_ref().name()
    }
}
