use crate::{Method, Status, Version};
use std::{
    io::Write,
    net::SocketAddr,
    time::SystemTime,
};

/// A sink for server log lines.
///
/// Two loggers hang off an acceptor: the access logger receives one
/// line per completed request, and the message logger receives error
/// and warning reports. The server serializes nothing on behalf of a
/// logger; implementations must be thread-safe.
pub trait Logger: Send + Sync + 'static {
    /// Record one line.
    fn log(&self, line: &str);
}

/// The default logger: writes each line to standard error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrLogger;

impl Logger for StderrLogger {
    fn log(&self, line: &str) {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "{line}").ok();
    }
}

impl Logger for Box<dyn Logger> {
    fn log(&self, line: &str) {
        self.as_ref().log(line);
    }
}

impl<F> Logger for F
where
    F: Fn(&str) + Send + Sync + 'static,
{
    fn log(&self, line: &str) {
        self(line);
    }
}

/// One access-log line in common log format, with an http-date
/// timestamp.
pub(crate) fn access_line(
    peer: Option<SocketAddr>,
    method: Method,
    target: &str,
    version: Version,
    status: Status,
    bytes_sent: u64,
) -> String {
    let ip = peer.map_or_else(|| "-".to_string(), |addr| addr.ip().to_string());
    format!(
        "{ip} - - [{}] \"{method} {target} {version}\" {} {bytes_sent}",
        httpdate::fmt_http_date(SystemTime::now()),
        status as u16,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn access_line_shape() {
        let line = access_line(
            Some(([127, 0, 0, 1], 9000).into()),
            Method::Get,
            "/index.html",
            Version::Http1_1,
            Status::Ok,
            42,
        );
        assert!(line.starts_with("127.0.0.1 - - ["), "{line}");
        assert!(line.ends_with("\"GET /index.html HTTP/1.1\" 200 42"), "{line}");

        let anonymous = access_line(None, Method::Get, "/", Version::Http1_0, Status::NotFound, 0);
        assert!(anonymous.starts_with("- - - ["), "{anonymous}");
    }
}
