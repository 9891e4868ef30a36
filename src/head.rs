use crate::{ContentStream, Error, Headers, Method, Result, ServerOptions, Status, Version};
use cookie::Cookie;
use std::{
    io::Write,
    sync::PoisonError,
};

/// The parsed head of one request: everything before the body.
#[derive(Debug, Clone)]
pub struct RequestHead {
    /// the request method
    pub method: Method,
    /// the raw request-URI, exactly as sent
    pub target: String,
    /// the protocol named on the request line, or HTTP/0.9 when absent
    pub version: Version,
    /// the header map, empty for HTTP/0.9
    pub headers: Headers,
}

fn is_tchar(c: u8) -> bool {
    matches!(
        c,
        b'a'..=b'z'
        | b'A'..=b'Z'
        | b'0'..=b'9'
        | b'!'
        | b'#'
        | b'$'
        | b'%'
        | b'&'
        | b'\''
        | b'*'
        | b'+'
        | b'-'
        | b'.'
        | b'^'
        | b'_'
        | b'`'
        | b'|'
        | b'~'
    )
}

/// Header bytes are ISO-8859-1, which maps each byte to the code point
/// of the same value.
fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}

fn mirror_to_tap(options: &ServerOptions, text: &str) {
    if let Some(tap) = &options.header_tap {
        let mut tap = tap.lock().unwrap_or_else(PoisonError::into_inner);
        tap.write_all(text.as_bytes()).ok();
    }
}

/// Read and parse one request head from the stream.
///
/// Returns [`Error::Closed`] when the connection reached end-of-file
/// before the first byte of a request line, which the connection loop
/// treats as a clean exit. Any other failure maps to a 400 response and
/// connection abort.
pub(crate) fn read_request_head(
    stream: &mut ContentStream,
    options: &ServerOptions,
) -> Result<RequestHead> {
    let request_line = stream.read_crlf_line(options.head_max_len)?;

    if !request_line.iter().all(|&b| (0x20..=0x7e).contains(&b)) {
        return Err(Error::InvalidHead);
    }
    let request_line = std::str::from_utf8(&request_line).map_err(|_| Error::InvalidHead)?;

    let tokens: Vec<&str> = request_line.split_ascii_whitespace().collect();
    let (method, target, version) = match tokens[..] {
        [method, target] => (method.parse()?, target.to_string(), Version::Http0_9),
        [method, target, protocol] => (method.parse()?, target.to_string(), protocol.parse()?),
        _ => return Err(Error::InvalidHead),
    };

    let headers = if version == Version::Http0_9 {
        // an http/0.9 request is the request line alone
        Headers::new()
    } else {
        read_header_lines(stream, options, request_line.len() + 2)?
    };

    log::trace!("received:\n{method} {target} {version}\n{headers}");
    mirror_to_tap(
        options,
        &format!("{method} {target} {version}\r\n{headers}\r\n"),
    );

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}

fn read_header_lines(
    stream: &mut ContentStream,
    options: &ServerOptions,
    mut head_len: usize,
) -> Result<Headers> {
    let mut headers = Headers::new();
    loop {
        let line = match stream.read_crlf_line(options.head_max_len) {
            // end-of-file mid-head is not a clean close
            Err(Error::Closed) => Err(Error::InvalidHead),
            other => other,
        }?;

        head_len += line.len() + 2;
        if head_len > options.head_max_len {
            return Err(Error::HeadersTooLong);
        }

        if line.is_empty() {
            return Ok(headers);
        }

        if line[0] == b' ' || line[0] == b'\t' {
            // obsolete line folding: the continuation joins the prior
            // header's value with a single space
            let continuation = latin1(&line);
            if !headers.extend_last(continuation.trim()) {
                return Err(Error::InvalidHead);
            }
            continue;
        }

        let colon = memchr::memchr(b':', &line).ok_or(Error::InvalidHead)?;
        let name = &line[..colon];
        if name.is_empty() || !name.iter().copied().all(is_tchar) {
            return Err(Error::InvalidHead);
        }
        let name = latin1(name);
        let value = latin1(&line[colon + 1..]);
        headers.append(name, value.trim());
    }
}

/// Serialize a response head into `out`.
///
/// The status line is always `HTTP/1.1` regardless of the request
/// protocol. Multi-line header values continue on tab-prefixed lines
/// with empty inner lines skipped; each outgoing cookie becomes its own
/// `Set-Cookie` line.
pub(crate) fn write_response_head(
    out: &mut Vec<u8>,
    status: Status,
    headers: &Headers,
    cookies: &[Cookie<'static>],
    options: &ServerOptions,
) -> Result<()> {
    write!(
        out,
        "HTTP/1.1 {} {}\r\n",
        status as u16,
        status.canonical_reason()
    )?;

    for (name, value) in headers.iter() {
        let mut first = true;
        for piece in value.split('\n') {
            let piece = piece.trim_end_matches('\r');
            if piece.is_empty() {
                continue;
            }
            if first {
                write!(out, "{name}: {piece}\r\n")?;
                first = false;
            } else {
                write!(out, "\t{piece}\r\n")?;
            }
        }
    }

    for cookie in cookies {
        write!(out, "Set-Cookie: {}\r\n", cookie.encoded())?;
    }

    write!(out, "\r\n")?;

    log::trace!("sending:\n{}", String::from_utf8_lossy(out));
    mirror_to_tap(options, &String::from_utf8_lossy(out));

    Ok(())
}
