use hearth_http::{
    Acceptor, Conn, Handler, Outcome, Result, Status, ThreadPerConnection,
};
use pretty_assertions::assert_eq;
use std::{
    io::{Read, Write},
    net::TcpStream,
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

fn start(handler: impl Handler) -> Acceptor {
    let acceptor = Acceptor::builder(handler).with_port(0).build();
    acceptor.start().unwrap();
    acceptor
}

fn connect(acceptor: &Acceptor) -> TcpStream {
    let stream = TcpStream::connect(acceptor.local_addr().unwrap()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Read one full response: the head, then a content-length body or
/// chunked frames through the terminator.
fn read_response(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let read = stream.read(&mut byte).unwrap();
        assert!(
            read > 0,
            "eof during response head: {:?}",
            String::from_utf8_lossy(&buf)
        );
        buf.push(byte[0]);
    }

    let head = String::from_utf8_lossy(&buf).to_ascii_lowercase();
    if let Some(index) = head.find("content-length:") {
        let length: usize = head[index + "content-length:".len()..]
            .lines()
            .next()
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut body = vec![0; length];
        stream.read_exact(&mut body).unwrap();
        buf.extend(body);
    } else if head.contains("transfer-encoding: chunked") {
        while !buf.ends_with(b"0\r\n\r\n") {
            let read = stream.read(&mut byte).unwrap();
            assert!(read > 0, "eof during chunked body");
            buf.push(byte[0]);
        }
    }

    String::from_utf8_lossy(&buf).into_owned()
}

fn hi(_: &mut Conn<'_>) -> Result<Outcome> {
    Ok(Outcome::Body("hi".into()))
}

// spec scenario: simple GET over HTTP/1.0 gets a content-length reply
// and a closed connection
#[test]
fn simple_get_http_1_0() {
    let acceptor = start(hi);
    let mut client = connect(&acceptor);

    client.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Content-Length: 2\r\n"), "{response}");
    assert!(response.contains("Connection: Close\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\nhi"), "{response}");

    acceptor.stop(true).unwrap();
}

// spec scenario: two requests ride one HTTP/1.1 connection
#[test]
fn persistent_http_1_1() {
    let acceptor = start(hi);
    let mut client = connect(&acceptor);

    for _ in 0..2 {
        client
            .write_all(b"GET /a HTTP/1.1\r\nHost: x\r\n\r\n")
            .unwrap();
        let response = read_response(&mut client);
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
        assert!(response.contains("Content-Length: 2\r\n"), "{response}");
        assert!(
            !response.to_ascii_lowercase().contains("connection: close"),
            "{response}"
        );
        assert!(response.ends_with("hi"), "{response}");
    }

    acceptor.stop(true).unwrap();
}

fn streaming(conn: &mut Conn<'_>) -> Result<Outcome> {
    conn.send_headers()?;
    conn.write_body(b"abc")?;
    conn.write_body(b"de")?;
    Ok(Outcome::Done)
}

// spec scenario: send_headers without a content length negotiates
// chunked output, one frame per write
#[test]
fn chunked_response() {
    let acceptor = start(streaming);
    let mut client = connect(&acceptor);

    client
        .write_all(b"GET /stream HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut client);

    assert!(
        response.contains("Transfer-Encoding: chunked\r\n"),
        "{response}"
    );
    assert!(
        response.ends_with("\r\n\r\n3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n"),
        "{response}"
    );

    acceptor.stop(true).unwrap();
}

fn echo_body(conn: &mut Conn<'_>) -> Result<Outcome> {
    let body = String::from_utf8_lossy(conn.body_octets()?).into_owned();
    Ok(Outcome::Body(format!("got {body}")))
}

// spec scenario: Expect: 100-continue is answered before the body is
// read, then the exchange completes normally
#[test]
fn expect_100_continue() {
    let acceptor = start(echo_body);
    let mut client = connect(&acceptor);

    client
        .write_all(
            b"POST /p HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\nExpect: 100-continue\r\n\r\n",
        )
        .unwrap();

    let mut interim = [0u8; 25];
    client.read_exact(&mut interim).unwrap();
    assert_eq!(&interim, b"HTTP/1.1 100 Continue\r\n\r\n");

    client.write_all(b"data").unwrap();
    let response = read_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.ends_with("got data"), "{response}");

    acceptor.stop(true).unwrap();
}

struct MultipartProbe {
    upload_path: Arc<Mutex<Option<PathBuf>>>,
}

impl Handler for MultipartProbe {
    fn handle(&self, conn: &mut Conn<'_>) -> Result<Outcome> {
        let entries = conn.post_parameters()?.to_vec();
        let text = entries[0].1.as_text().unwrap_or("?").to_string();
        let upload = entries[1].1.as_file().cloned();

        let Some(upload) = upload else {
            return Ok(Outcome::Body("no upload".into()));
        };
        *self.upload_path.lock().unwrap() = Some(upload.path.clone());
        let spooled = std::fs::read_to_string(&upload.path).unwrap_or_default();

        Ok(Outcome::Body(format!(
            "{}={text}; {}={}:{}:{spooled}",
            entries[0].0, entries[1].0, upload.filename, upload.content_type,
        )))
    }
}

// spec scenario: a multipart POST yields a decoded text field and a
// spooled file upload whose temp file dies with the request
#[test]
fn multipart_upload() {
    let upload_path = Arc::new(Mutex::new(None));
    let acceptor = start(MultipartProbe {
        upload_path: Arc::clone(&upload_path),
    });
    let mut client = connect(&acceptor);

    let body = "--XYZ\r\n\
        Content-Disposition: form-data; name=\"name\"\r\n\
        \r\n\
        Alice\r\n\
        --XYZ\r\n\
        Content-Disposition: form-data; name=\"photo\"; filename=\"photo.jpg\"\r\n\
        Content-Type: image/jpeg\r\n\
        \r\n\
        jpeg bytes\r\n\
        --XYZ--\r\n";

    client
        .write_all(
            format!(
                "POST /upload HTTP/1.1\r\nHost: x\r\n\
                 Content-Type: multipart/form-data; boundary=XYZ\r\n\
                 Content-Length: {}\r\n\r\n{body}",
                body.len()
            )
            .as_bytes(),
        )
        .unwrap();

    let response = read_response(&mut client);
    assert!(
        response.ends_with("name=Alice; photo=photo.jpg:image/jpeg:jpeg bytes"),
        "{response}"
    );

    // the spool file existed during the handler (it read it back) and
    // is deleted once the request ends
    let path = upload_path.lock().unwrap().clone().expect("handler saw an upload");
    let deadline = Instant::now() + Duration::from_secs(2);
    while path.exists() {
        assert!(Instant::now() < deadline, "temp file survived the request");
        thread::sleep(Duration::from_millis(10));
    }

    acceptor.stop(true).unwrap();
}

struct Slow {
    started: Arc<AtomicUsize>,
    delay: Duration,
}

impl Handler for Slow {
    fn handle(&self, _conn: &mut Conn<'_>) -> Result<Outcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        Ok(Outcome::Body("done".into()))
    }
}

// spec scenario: stop(soft) blocks until the in-flight requests finish,
// then the listen socket closes
#[test]
fn soft_shutdown_waits_for_in_flight_requests() {
    let started = Arc::new(AtomicUsize::new(0));
    let acceptor = start(Slow {
        started: Arc::clone(&started),
        delay: Duration::from_millis(300),
    });

    let mut clients: Vec<TcpStream> = (0..3).map(|_| connect(&acceptor)).collect();
    for client in &mut clients {
        client.write_all(b"GET /slow HTTP/1.0\r\n\r\n").unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(2);
    while started.load(Ordering::SeqCst) < 3 {
        assert!(Instant::now() < deadline, "handlers never started");
        thread::sleep(Duration::from_millis(5));
    }

    acceptor.stop(true).unwrap();
    assert_eq!(acceptor.stopper().in_flight(), 0);
    assert!(acceptor.local_addr().is_none());

    // every request that was in flight completed
    for client in &mut clients {
        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.ends_with("done"), "{response}");
    }
}

fn not_handled(_: &mut Conn<'_>) -> Result<Outcome> {
    Ok(Outcome::NotHandled)
}

#[test]
fn not_handled_becomes_404_via_the_error_generator() {
    let acceptor = start(not_handled);
    let mut client = connect(&acceptor);

    client
        .write_all(b"GET /nope HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{response}");
    assert!(response.contains("404 Not Found"), "{response}");

    acceptor.stop(true).unwrap();
}

fn aborting(conn: &mut Conn<'_>) -> Result<Outcome> {
    conn.set_content_type("text/plain");
    Ok(Outcome::abort_with_body(Status::Forbidden, "go away"))
}

#[test]
fn handler_abort_sets_status_and_body() {
    let acceptor = start(aborting);
    let mut client = connect(&acceptor);

    client
        .write_all(b"GET /private HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut client);
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{response}");
    assert!(response.ends_with("go away"), "{response}");

    acceptor.stop(true).unwrap();
}

fn failing(_: &mut Conn<'_>) -> Result<Outcome> {
    Err(hearth_http::Error::handler("the database is on fire"))
}

#[test]
fn handler_errors_become_500s_without_leaking_details() {
    let acceptor = start(failing);
    let mut client = connect(&acceptor);

    client
        .write_all(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")
        .unwrap();
    let response = read_response(&mut client);
    assert!(
        response.starts_with("HTTP/1.1 500 Internal Server Error\r\n"),
        "{response}"
    );
    // show-errors defaults to off
    assert!(!response.contains("database"), "{response}");

    acceptor.stop(true).unwrap();
}

#[test]
fn malformed_request_line_gets_400_and_a_closed_connection() {
    let acceptor = start(hi);
    let mut client = connect(&acceptor);

    client.write_all(b"GET /\x01bad HTTP/1.1\r\n\r\n").unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).unwrap();
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"), "{response}");

    acceptor.stop(true).unwrap();
}

#[test]
fn head_requests_omit_the_body() {
    let acceptor = start(hi);
    let mut client = connect(&acceptor);

    client.write_all(b"HEAD / HTTP/1.0\r\n\r\n").unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{response}");
    assert!(response.contains("Content-Length: 2\r\n"), "{response}");
    assert!(response.ends_with("\r\n\r\n"), "{response}");

    acceptor.stop(true).unwrap();
}

#[test]
fn chunked_request_bodies_are_decoded_and_drained() {
    let acceptor = start(echo_body);
    let mut client = connect(&acceptor);

    for _ in 0..2 {
        client
            .write_all(
                b"POST /p HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n\
                  3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n",
            )
            .unwrap();
        let response = read_response(&mut client);
        assert!(response.ends_with("got abcde"), "{response}");
    }

    acceptor.stop(true).unwrap();
}

#[test]
fn worker_cap_rejects_with_503() {
    let started = Arc::new(AtomicUsize::new(0));
    let acceptor = Acceptor::builder(Slow {
        started: Arc::clone(&started),
        delay: Duration::from_millis(500),
    })
    .with_port(0)
    .with_taskmaster(ThreadPerConnection::new(1))
    .build();
    acceptor.start().unwrap();

    let mut busy = connect(&acceptor);
    busy.write_all(b"GET /slow HTTP/1.0\r\n\r\n").unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while started.load(Ordering::SeqCst) < 1 {
        assert!(Instant::now() < deadline, "first request never started");
        thread::sleep(Duration::from_millis(5));
    }

    let mut rejected = connect(&acceptor);
    rejected.write_all(b"GET / HTTP/1.0\r\n\r\n").unwrap();
    let mut response = String::new();
    rejected.read_to_string(&mut response).unwrap();
    assert!(
        response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"),
        "{response}"
    );

    let mut served = String::new();
    busy.read_to_string(&mut served).unwrap();
    assert!(served.ends_with("done"), "{served}");

    acceptor.stop(true).unwrap();
}
