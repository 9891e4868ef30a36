use crate::{
    head, logger, AcceptorCore, BoxedTransport, Conn, ContentStream, Error, Headers, Outcome,
    Status,
};
use std::{io::Write, net::TcpStream, sync::Arc, time::SystemTime};

/// Serve one connection: wrap it in TLS when configured, then loop
/// reading requests and writing replies until the connection closes,
/// a request asks to close, or the server shuts down.
pub(crate) fn process_connection(acceptor: &Arc<AcceptorCore>, socket: TcpStream) {
    let peer = socket.peer_addr().ok();

    let transport: BoxedTransport = match (&acceptor.tls_config, &acceptor.tls_wrapper) {
        (Some(config), Some(wrapper)) => match wrapper.wrap(socket, config) {
            Ok(transport) => transport,
            Err(error) => {
                acceptor.log_warning(&format!("tls handshake failed: {error}"));
                return;
            }
        },
        _ => Box::new(socket),
    };

    let mut stream = ContentStream::new(transport);

    loop {
        if acceptor.stopper.is_stopped() {
            break;
        }

        let request_head = match head::read_request_head(&mut stream, &acceptor.options) {
            Ok(request_head) => request_head,
            Err(Error::Closed) => break,
            Err(Error::Io(error)) => {
                // a timeout or connection loss mid-head; nobody is
                // listening for a reply
                log::debug!("connection lost reading request head: {error}");
                break;
            }
            Err(error) => {
                send_simple_error(&mut stream, acceptor, &error);
                break;
            }
        };

        if request_head
            .headers
            .contains_token("Transfer-Encoding", "chunked")
        {
            stream.enable_input_chunking();
        }

        let close = {
            let _guard = acceptor.stopper.guard();
            // `Conn` holds `&mut stream` and implements `Drop`; matching the
            // `Result` directly keeps that borrow alive (for the destructor)
            // across the whole match, including the `Err` arm's own use of
            // `&mut stream`. Wrapping in `ManuallyDrop` sidesteps that by
            // giving the local no destructor of its own; the inner `Conn` is
            // dropped explicitly below, at the same point it would have
            // dropped implicitly.
            let conn_result =
                Conn::new(&mut stream, request_head, peer, acceptor).map(std::mem::ManuallyDrop::new);
            let mut conn = match conn_result {
                Ok(conn) => conn,
                Err(error) => {
                    send_simple_error(&mut stream, acceptor, &error);
                    break;
                }
            };
            process_request(&mut conn, acceptor);
            acceptor.access_logger.log(&logger::access_line(
                conn.peer_addr(),
                conn.method(),
                conn.target(),
                conn.version(),
                conn.status(),
                conn.bytes_sent(),
            ));
            let close = conn.close_stream();
            std::mem::ManuallyDrop::into_inner(conn);
            close
        };

        if stream.flush().is_err() {
            break;
        }
        if let Err(error) = stream.finish_output() {
            log::debug!("failed finishing chunked output: {error}");
            break;
        }
        if let Err(error) = stream.finish_input() {
            acceptor.log_warning(&format!("failed unwrapping chunked input: {error}"));
            break;
        }
        if close {
            break;
        }
    }

    // best-effort teardown whatever the exit path; dropping the stream
    // closes the transport
    stream.finish_output().ok();
    stream.flush().ok();
}

/// Run one request through the handler and write the reply.
pub(crate) fn process_request(conn: &mut Conn<'_>, acceptor: &AcceptorCore) {
    let outcome = acceptor.handler.handle(conn);

    let mut error = None;
    let body = match outcome {
        Ok(Outcome::Body(body)) => Some(body),
        Ok(Outcome::Done) => None,
        Ok(Outcome::NotHandled) => {
            conn.set_status(Status::NotFound);
            None
        }
        Ok(Outcome::Abort { status, body }) => {
            conn.set_status(status);
            body
        }
        Err(handler_error) => {
            if !conn.headers_sent() {
                conn.set_status(handler_error.status());
            }
            error = Some(handler_error);
            None
        }
    };

    let mut backtrace = None;
    if let Some(error) = &error {
        if acceptor.options.log_backtraces || acceptor.options.show_backtraces {
            backtrace = Some(std::backtrace::Backtrace::force_capture().to_string());
        }
        if conn.headers_sent() {
            // the status line is already on the wire; all we can do is
            // refuse to reuse the connection
            conn.set_close_stream(true);
            acceptor.log_error(&format!("handler failed after headers were sent: {error}"));
        } else {
            acceptor.log_error(&format!("handler failed: {error}"));
        }
        if acceptor.options.log_backtraces {
            if let Some(backtrace) = &backtrace {
                acceptor.message_logger.log(backtrace);
            }
        }
    }

    if !conn.headers_sent() {
        let body_string = match body {
            Some(body) => body,
            None => acceptor.error_generator.generate(
                conn.status(),
                error.as_ref(),
                backtrace.as_deref(),
                &acceptor.options,
            ),
        };
        let payload = conn.encode_body(&body_string);
        if conn.content_length().is_none() {
            conn.set_content_length(payload.len() as u64);
        }
        if let Err(write_error) = conn
            .send_headers()
            .and_then(|()| conn.write_body(&payload))
        {
            // one failure report; if even that cannot be written the
            // connection is simply closed
            acceptor.log_warning(&format!("failed writing response: {write_error}"));
            conn.set_close_stream(true);
        }
    } else if let Some(body) = body {
        let payload = conn.encode_body(&body);
        if let Err(write_error) = conn.write_body(&payload) {
            acceptor.log_warning(&format!("failed writing response body: {write_error}"));
            conn.set_close_stream(true);
        }
    }

    if let Err(drain_error) = conn.drain_body() {
        log::debug!("failed draining request body: {drain_error}");
        conn.set_close_stream(true);
    }

    conn.delete_temp_files();
}

/// Reply to a request that never produced a [`Conn`] (a malformed head
/// or contradictory framing headers) and leave the connection to be
/// closed.
fn send_simple_error(stream: &mut ContentStream, acceptor: &AcceptorCore, error: &Error) {
    let status = error.status();
    acceptor.log_warning(&format!("rejecting request: {error}"));

    let page = acceptor
        .error_generator
        .generate(status, Some(error), None, &acceptor.options);
    let (body, _, _) = acceptor.options.default_charset.encode(&page);

    let mut content_type = acceptor.options.default_content_type.clone();
    if content_type.starts_with("text/") {
        content_type.push_str("; charset=");
        content_type.push_str(acceptor.options.default_charset.name());
    }

    let mut headers = Headers::new();
    headers.insert("Date", httpdate::fmt_http_date(SystemTime::now()));
    headers.insert("Server", acceptor.name.clone());
    headers.insert("Content-Type", content_type);
    headers.insert("Content-Length", body.len().to_string());
    headers.insert("Connection", "Close");

    let mut out = Vec::new();
    if head::write_response_head(&mut out, status, &headers, &[], &acceptor.options).is_ok() {
        stream.write_all(&out).ok();
        stream.write_all(&body).ok();
        stream.flush().ok();
    }
}
