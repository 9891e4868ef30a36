use crate::{
    acceptor::AcceptorCore, forms, head, multipart, util, BodyReader, ContentStream, Error,
    Headers, Method, Param, RequestHead, Result, Status, Version,
};
use cookie::Cookie;
use encoding_rs::Encoding;
use mime::Mime;
use std::{
    io::Write,
    net::SocketAddr,
    path::PathBuf,
    str::FromStr,
    time::SystemTime,
};

/** One http request/response exchange.

Unlike most rust http implementations, this struct represents both the
request and the response, and it borrows the connection's content
stream for the exchange's duration. Handlers read the request through
it and write the response back through it.

The request body is accessed through exactly one of three modes,
chosen by first use: [`post_parameters`](Conn::post_parameters) (parsed
form data), [`body_stream`](Conn::body_stream) (an incremental reader),
or [`body_octets`](Conn::body_octets) (a buffered byte vector). Asking
for a second mode after one has been initialized is a request
programming error.
*/
pub struct Conn<'conn> {
    stream: &'conn mut ContentStream,
    shared: &'conn AcceptorCore,
    peer: Option<SocketAddr>,

    method: Method,
    target: String,
    version: Version,
    request_headers: Headers,
    query: Vec<(String, String)>,
    request_cookies: Vec<Cookie<'static>>,

    request_chunked: bool,
    request_content_length: Option<u64>,
    expects_continue: bool,
    continue_sent: bool,
    body_remaining: Option<u64>,
    body_mode: BodyMode,

    status: Status,
    content_length: Option<u64>,
    content_type: Option<String>,
    charset: &'static Encoding,
    response_headers: Headers,
    response_cookies: Vec<Cookie<'static>>,
    headers_sent: bool,
    close_stream: bool,
    force_close: bool,
    response_chunked: bool,
    keep_alive_requested: bool,
    close_requested: bool,
    bytes_sent: u64,

    temp_files: Vec<PathBuf>,
}

#[derive(Debug)]
enum BodyMode {
    Unclaimed,
    Params(Vec<(String, Param)>),
    Stream,
    Octets(Vec<u8>),
}

impl std::fmt::Debug for Conn<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("method", &self.method)
            .field("target", &self.target)
            .field("version", &self.version)
            .field("request_headers", &self.request_headers)
            .field("status", &self.status)
            .field("response_headers", &self.response_headers)
            .field("headers_sent", &self.headers_sent)
            .field("close_stream", &self.close_stream)
            .finish()
    }
}

impl<'conn> Conn<'conn> {
    pub(crate) fn new(
        stream: &'conn mut ContentStream,
        head: RequestHead,
        peer: Option<SocketAddr>,
        shared: &'conn AcceptorCore,
    ) -> Result<Self> {
        let RequestHead {
            method,
            target,
            version,
            headers: request_headers,
        } = head;

        let request_chunked = request_headers.contains_token("Transfer-Encoding", "chunked");
        let request_content_length = match request_headers.get_str("Content-Length") {
            Some(value) => Some(
                value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| Error::InvalidHeaderValue("Content-Length"))?,
            ),
            None => None,
        };
        if request_chunked && request_content_length.is_some() {
            return Err(Error::InvalidHeaderValue("Content-Length"));
        }

        let body_remaining = if request_chunked {
            None
        } else {
            Some(request_content_length.unwrap_or(0))
        };

        let query = forms::parse_query(&target, shared.options.external_format);
        let request_cookies = parse_cookie_header(request_headers.get_str("Cookie"));

        let keep_alive_requested = request_headers.contains_token("Connection", "keep-alive");
        let close_requested = request_headers.contains_token("Connection", "close");
        let expects_continue = request_headers.contains_token("Expect", "100-continue");

        Ok(Self {
            stream,
            peer,
            method,
            target,
            version,
            request_headers,
            query,
            request_cookies,
            request_chunked,
            request_content_length,
            expects_continue,
            continue_sent: false,
            body_remaining,
            body_mode: BodyMode::Unclaimed,
            status: Status::Ok,
            content_length: None,
            content_type: None,
            charset: shared.options.default_charset,
            response_headers: Headers::new(),
            response_cookies: Vec::new(),
            headers_sent: false,
            close_stream: true,
            force_close: false,
            response_chunked: false,
            keep_alive_requested,
            close_requested,
            bytes_sent: 0,
            temp_files: Vec::new(),
            shared,
        })
    }

    // ------------------------------------------------------------------
    // incoming
    // ------------------------------------------------------------------

    /// the request method
    pub fn method(&self) -> Method {
        self.method
    }

    /// the raw request-URI, exactly as it appeared on the request line
    pub fn target(&self) -> &str {
        &self.target
    }

    /// the path part of the request target, up to and excluding any
    /// query component
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    /// the protocol named on the request line
    pub fn version(&self) -> Version {
        self.version
    }

    /// the remote peer, when the transport knows it
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// the remote port, when the transport knows it
    pub fn peer_port(&self) -> Option<u16> {
        self.peer.map(|addr| addr.port())
    }

    /// the request headers
    pub fn request_headers(&self) -> &Headers {
        &self.request_headers
    }

    /// one request header by name, case-insensitively
    pub fn request_header(&self, name: &str) -> Option<&str> {
        self.request_headers.get_str(name)
    }

    /// the decoded query parameters, in request order
    pub fn query_parameters(&self) -> &[(String, String)] {
        &self.query
    }

    /// the first query parameter named `name`
    pub fn query_parameter(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| &**value)
    }

    /// the cookies presented by the client
    pub fn request_cookies(&self) -> &[Cookie<'static>] {
        &self.request_cookies
    }

    /// the first request cookie named `name`
    pub fn request_cookie(&self, name: &str) -> Option<&Cookie<'static>> {
        self.request_cookies.iter().find(|c| c.name() == name)
    }

    /// the character encoding of the request body, from the
    /// `Content-Type` charset when declared
    pub fn request_encoding(&self) -> &'static Encoding {
        util::encoding(&self.request_headers, self.shared.options.external_format)
    }

    // ------------------------------------------------------------------
    // body access
    // ------------------------------------------------------------------

    fn send_100_continue(&mut self) -> Result<()> {
        if self.expects_continue && !self.continue_sent {
            log::trace!("sending 100-continue");
            self.stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n")?;
            self.stream.flush()?;
            self.continue_sent = true;
        }
        Ok(())
    }

    fn read_body_bytes(&mut self) -> Result<Vec<u8>> {
        self.send_100_continue()?;
        Ok(BodyReader::new(self.stream, &mut self.body_remaining).read_bytes()?)
    }

    /// The request body parsed as form fields.
    ///
    /// Supports `application/x-www-form-urlencoded` and
    /// `multipart/form-data`. Multipart file uploads are spooled to
    /// temp files that live until the end of this request. A request
    /// with neither `Content-Length` nor chunked framing yields no
    /// fields and logs a warning.
    ///
    /// # Errors
    ///
    /// [`Error::BodyAccessConflict`] if the body was already claimed
    /// through another mode; [`Error::MalformedBody`] if the body does
    /// not decode as its declared content type (the engine answers 400
    /// and closes).
    pub fn post_parameters(&mut self) -> Result<&[(String, Param)]> {
        if matches!(self.body_mode, BodyMode::Unclaimed) {
            let entries = self.read_post_parameters()?;
            self.body_mode = BodyMode::Params(entries);
        }
        match &self.body_mode {
            BodyMode::Params(entries) => Ok(entries),
            _ => Err(Error::BodyAccessConflict),
        }
    }

    fn read_post_parameters(&mut self) -> Result<Vec<(String, Param)>> {
        if !self.request_chunked && self.request_content_length.is_none() {
            self.shared
                .log_warning("post parameters requested without content-length or chunked framing");
            return Ok(Vec::new());
        }

        let bytes = match self.read_body_bytes() {
            Ok(bytes) => bytes,
            Err(error) => {
                self.shared
                    .log_warning(&format!("failed reading request body: {error}"));
                self.set_close_stream(true);
                return Err(Error::MalformedBody("failed reading request body".into()));
            }
        };

        let content_type = self.request_headers.get_str("Content-Type").unwrap_or("");
        let media_type = Mime::from_str(content_type).ok();

        let parsed = match &media_type {
            Some(m) if m.essence_str() == "application/x-www-form-urlencoded" => {
                let encoding = m
                    .get_param(mime::CHARSET)
                    .and_then(|v| Encoding::for_label(v.as_str().as_bytes()))
                    .unwrap_or(self.shared.options.external_format);
                Ok(forms::parse_urlencoded(&bytes, encoding)
                    .into_iter()
                    .map(|(name, value)| (name, Param::Text(value)))
                    .collect())
            }
            Some(m) if m.essence_str() == "multipart/form-data" => {
                match m.get_param(mime::BOUNDARY) {
                    Some(boundary) => multipart::parse_multipart(
                        &bytes,
                        boundary.as_str(),
                        &self.shared.options.tmp_dir,
                        self.shared.options.external_format,
                        &mut self.temp_files,
                    ),
                    None => Err(Error::MalformedBody("multipart body without boundary".into())),
                }
            }
            _ => {
                self.shared.log_warning(&format!(
                    "post parameters requested for unsupported content type {content_type:?}"
                ));
                Ok(Vec::new())
            }
        };

        match parsed {
            Ok(entries) => Ok(entries),
            Err(error) => {
                self.shared.log_warning(&error.to_string());
                self.set_close_stream(true);
                Err(error)
            }
        }
    }

    /// The request body as an incremental reader, bounded by
    /// `Content-Length` or reading through the chunked decoder to its
    /// terminating frame.
    ///
    /// # Errors
    ///
    /// [`Error::BodyAccessConflict`] if the body was already claimed
    /// through another mode.
    pub fn body_stream(&mut self) -> Result<BodyReader<'_>> {
        match self.body_mode {
            BodyMode::Unclaimed => self.body_mode = BodyMode::Stream,
            BodyMode::Stream => {}
            _ => return Err(Error::BodyAccessConflict),
        }
        self.send_100_continue()?;
        Ok(BodyReader::new(self.stream, &mut self.body_remaining))
    }

    /// The request body fully buffered, with the same framing rules as
    /// [`body_stream`](Conn::body_stream).
    ///
    /// # Errors
    ///
    /// [`Error::BodyAccessConflict`] if the body was already claimed
    /// through another mode.
    pub fn body_octets(&mut self) -> Result<&[u8]> {
        if matches!(self.body_mode, BodyMode::Unclaimed) {
            let bytes = self.read_body_bytes()?;
            self.body_mode = BodyMode::Octets(bytes);
        }
        match &self.body_mode {
            BodyMode::Octets(bytes) => Ok(bytes),
            _ => Err(Error::BodyAccessConflict),
        }
    }

    // ------------------------------------------------------------------
    // outgoing
    // ------------------------------------------------------------------

    /// the current response status, 200 unless set
    pub fn status(&self) -> Status {
        self.status
    }

    /// Set the response status. Takes effect only while
    /// [`headers_sent`](Conn::headers_sent) is false.
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Declare the response body length, which selects fixed-length
    /// framing over chunked.
    pub fn set_content_length(&mut self, length: u64) {
        self.content_length = Some(length);
    }

    /// the declared response body length, if any
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Set the response content type. When it matches `text/*` the
    /// response charset is appended at header-finalization time.
    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.content_type = Some(content_type.into());
    }

    /// Set the response charset, used to encode string bodies and
    /// advertised on `text/*` content types.
    pub fn set_charset(&mut self, charset: &'static Encoding) {
        self.charset = charset;
    }

    /// the response charset
    pub fn response_charset(&self) -> &'static Encoding {
        self.charset
    }

    /// the response headers
    pub fn response_headers(&self) -> &Headers {
        &self.response_headers
    }

    /// mutable access to the response headers
    pub fn response_headers_mut(&mut self) -> &mut Headers {
        &mut self.response_headers
    }

    /// Queue a cookie for emission as its own `Set-Cookie` line.
    pub fn add_cookie(&mut self, cookie: Cookie<'static>) {
        self.response_cookies.push(cookie);
    }

    /// Have the response headers been written to the wire? Once true,
    /// header, status and cookie mutation no longer take effect.
    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Will the connection close after this response?
    pub fn close_stream(&self) -> bool {
        self.close_stream
    }

    /// Force the connection to close (or not) after this response.
    /// A forced close survives header finalization; clearing hands the
    /// decision back to the keep-alive policy.
    pub fn set_close_stream(&mut self, close: bool) {
        self.close_stream = close;
        self.force_close = close;
    }

    /// bytes of response body written so far
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// temp files spooled for this request, deleted when it ends
    pub fn temp_files(&self) -> &[PathBuf] {
        &self.temp_files
    }

    /// Encode a string body with the response charset.
    pub(crate) fn encode_body(&self, body: &str) -> Vec<u8> {
        let (bytes, _, _) = self.charset.encode(body);
        bytes.into_owned()
    }

    /// Finalize and write the response head.
    ///
    /// The first call materializes `Date`, `Server`, `Content-Type`,
    /// the framing headers and the connection policy, writes the head,
    /// and enables output chunking when negotiated; subsequent calls do
    /// nothing.
    ///
    /// # Errors
    ///
    /// Any io error writing to the transport.
    pub fn send_headers(&mut self) -> Result<()> {
        if self.headers_sent {
            return Ok(());
        }
        self.finalize_headers();
        let mut out = Vec::with_capacity(512);
        head::write_response_head(
            &mut out,
            self.status,
            &self.response_headers,
            &self.response_cookies,
            &self.shared.options,
        )?;
        self.stream.write_all(&out)?;
        self.headers_sent = true;
        if self.response_chunked {
            self.stream.enable_output_chunking();
        }
        Ok(())
    }

    /// Write response body bytes, sending the headers first if they
    /// have not gone out. For a HEAD request the headers are computed
    /// and emitted but the body bytes are discarded.
    ///
    /// # Errors
    ///
    /// Any io error writing to the transport.
    pub fn write_body(&mut self, body: &[u8]) -> Result<()> {
        self.send_headers()?;
        if self.method == Method::Head {
            return Ok(());
        }
        self.stream.write_all(body)?;
        self.bytes_sent += body.len() as u64;
        Ok(())
    }

    fn finalize_headers(&mut self) {
        let options = &self.shared.options;

        if !self.response_headers.has_header("Date") {
            self.response_headers
                .insert("Date", httpdate::fmt_http_date(SystemTime::now()));
        }
        if !self.response_headers.has_header("Server") {
            self.response_headers
                .insert("Server", self.shared.name.clone());
        }
        if !self.response_headers.has_header("Content-Type") {
            let mut content_type = self
                .content_type
                .clone()
                .unwrap_or_else(|| options.default_content_type.clone());
            if content_type.starts_with("text/")
                && !content_type.to_ascii_lowercase().contains("charset=")
            {
                content_type.push_str("; charset=");
                content_type.push_str(self.charset.name());
            }
            self.response_headers.insert("Content-Type", content_type);
        }

        if self.content_length.is_none() {
            self.content_length = self
                .response_headers
                .get_str("Content-Length")
                .and_then(|value| value.trim().parse().ok());
        }

        let head_request = self.method == Method::Head;
        let no_body_status = matches!(self.status, Status::NoContent | Status::NotModified);
        let length_known = head_request || no_body_status || self.content_length.is_some();

        let chunked = self.version == Version::Http1_1 && !length_known;
        if chunked {
            self.response_headers.insert("Transfer-Encoding", "chunked");
        } else if let Some(length) = self.content_length {
            if !no_body_status && !self.response_headers.has_header("Content-Length") {
                self.response_headers
                    .insert("Content-Length", length.to_string());
            }
        }
        self.response_chunked = chunked;

        if self.response_headers.contains_token("Connection", "close") {
            // the handler forced a close
            self.close_stream = true;
            return;
        }

        let client_permits = match self.version {
            Version::Http1_1 => !self.close_requested,
            Version::Http1_0 => self.keep_alive_requested,
            Version::Http0_9 => false,
        };

        if self.shared.persistent_connections
            && (chunked || length_known)
            && client_permits
            && !self.force_close
            && !self.shared.stopper.is_stopped()
        {
            self.close_stream = false;
            if self.keep_alive_requested {
                self.response_headers.insert("Connection", "Keep-Alive");
                if let Some(timeout) = self.shared.read_timeout {
                    self.response_headers
                        .insert("Keep-Alive", format!("timeout={}", timeout.as_secs()));
                }
            }
        } else {
            self.response_headers.insert("Connection", "Close");
            self.close_stream = true;
        }
    }

    /// Consume whatever the handler left of the request body so the
    /// next request starts at a frame boundary. Skipped when the client
    /// was told to expect a 100 that was never sent, since it will not
    /// be sending the body.
    pub(crate) fn drain_body(&mut self) -> Result<u64> {
        if self.expects_continue && !self.continue_sent {
            return Ok(0);
        }
        Ok(BodyReader::new(self.stream, &mut self.body_remaining).drain()?)
    }

    /// Delete this request's multipart spool files, swallowing errors.
    pub(crate) fn delete_temp_files(&mut self) {
        for path in self.temp_files.drain(..) {
            if let Err(error) = std::fs::remove_file(&path) {
                log::debug!("failed deleting {}: {error}", path.display());
            }
        }
    }
}

impl Drop for Conn<'_> {
    /// Temp files must not outlive the request, whatever the exit
    /// path; the engine also deletes them explicitly on the normal
    /// path, leaving nothing for this to do.
    fn drop(&mut self) {
        self.delete_temp_files();
    }
}

/// Incoming `Cookie` headers are split on both `;` and `,` (the join
/// character for repeated headers) and each pair is decoded with the
/// same url-decoding applied to outgoing values.
fn parse_cookie_header(value: Option<&str>) -> Vec<Cookie<'static>> {
    let Some(value) = value else {
        return Vec::new();
    };
    value
        .split([';', ','])
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            Cookie::parse_encoded(pair.to_string()).ok()
        })
        .collect()
}
