#![forbid(unsafe_code)]
#![deny(
    clippy::dbg_macro,
    missing_copy_implementations,
    rustdoc::missing_crate_level_docs,
    missing_debug_implementations,
    nonstandard_style,
    unused_qualifications
)]
#![warn(missing_docs, clippy::pedantic, clippy::perf)]
#![allow(
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]
/*!
A small, embeddable, blocking http/1.x origin server core.

hearth accepts tcp (optionally TLS-wrapped) connections, reads one or
more requests per connection, invokes a user-supplied [`Handler`], and
writes a syntactically valid reply, honoring persistent connections,
chunked transfer coding, request-body streaming, `Expect: 100-continue`
and orderly shutdown. It deliberately stops there: routing, static
files, caching and the rest are the business of whatever embeds it.

Concurrency is plain OS threads. A [`Taskmaster`] decides where each
connection runs; the default spawns one worker thread per connection
with a cap, and a [`SingleThreaded`] strategy serves everything inline
for embedding and tests.

## Example

```no_run
use hearth_http::{Acceptor, Conn, Outcome, Result, Status};

fn handler(conn: &mut Conn<'_>) -> Result<Outcome> {
    match conn.path() {
        "/hello" => {
            let name = conn.query_parameter("name").unwrap_or("world").to_string();
            conn.set_content_type("text/plain");
            Ok(Outcome::Body(format!("hello, {name}\n")))
        }
        "/private" => Ok(Outcome::abort(Status::Forbidden)),
        _ => Ok(Outcome::NotHandled), // becomes a 404
    }
}

fn main() -> Result<()> {
    let acceptor = Acceptor::builder(handler).with_port(8080).build();
    acceptor.start()?;
    std::thread::park();
    Ok(())
}
```
*/

mod acceptor;
pub use acceptor::{Acceptor, AcceptorBuilder, AcceptorCore, NEW_CONNECTION_WAIT_TIME};

mod body;
pub use body::BodyReader;

mod conn;
pub use conn::Conn;

mod connection;

mod content_stream;
pub use content_stream::ContentStream;

mod error;
pub use error::{Error, Result};

mod error_page;
pub use error_page::{ErrorGenerator, MinimalErrorGenerator};

mod forms;
pub use forms::{
    parse_urlencoded, percent_decode_bytes, percent_encode_bytes, url_decode, url_encode,
};

mod handler;
pub use handler::{Handler, Outcome};

mod head;
pub use head::RequestHead;

mod headers;
pub use headers::Headers;

mod logger;
pub use logger::{Logger, StderrLogger};

mod method;
pub use method::Method;

mod multipart;
pub use multipart::{FileUpload, Param};

mod options;
pub use options::{
    HeaderTap, ServerOptions, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_CONTENT_TYPE,
    DEFAULT_HEAD_MAX_LEN, DEFAULT_MAX_THREAD_COUNT,
};

mod status;
pub use status::Status;

mod stopper;
pub use stopper::{Guard, Stopper};

mod synthetic;
pub use synthetic::{Synthetic, SyntheticOutput};

mod taskmaster;
pub use taskmaster::{
    send_service_unavailable_response, SingleThreaded, Taskmaster, ThreadPerConnection,
};

mod tls;
pub use tls::{TlsConfig, TlsWrapper};

mod transport;
pub use transport::{BoxedTransport, Transport};

mod util;

mod version;
pub use version::Version;

pub use cookie::Cookie;

/// The default server display name, advertised in the `Server` header.
pub const SERVER: &str = concat!("hearth/", env!("CARGO_PKG_VERSION"));

/// A pre-rendered http response to send when the server is at capacity.
pub const SERVICE_UNAVAILABLE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r
Connection: close\r
Content-Length: 0\r
Retry-After: 60\r
\r\n";
