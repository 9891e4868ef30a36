use crate::{util, Error, Headers, Result};
use encoding_rs::Encoding;
use memchr::memmem::Finder;
use std::{
    fs::OpenOptions,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

/// RFC 2046 limits multipart boundaries to 70 characters.
const MAX_BOUNDARY_LEN: usize = 70;

static UPLOAD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One decoded form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    /// An inline value, decoded per the part's (or request's) charset.
    Text(String),
    /// A file upload, spooled to a temp file for the request's lifetime.
    File(FileUpload),
}

impl Param {
    /// The inline value, if this parameter is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Param::Text(text) => Some(text),
            Param::File(_) => None,
        }
    }

    /// The file upload, if this parameter is one.
    pub fn as_file(&self) -> Option<&FileUpload> {
        match self {
            Param::Text(_) => None,
            Param::File(upload) => Some(upload),
        }
    }
}

/// A file uploaded through a `multipart/form-data` part.
///
/// The temp file exists for the duration of the request and is deleted
/// when the request ends; a handler that wants to keep the content must
/// move or copy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    /// where the content was spooled
    pub path: PathBuf,
    /// the client-supplied file name
    pub filename: String,
    /// the part's declared content type
    pub content_type: String,
}

fn malformed(reason: &'static str) -> Error {
    Error::MalformedBody(reason.into())
}

/// Create a uniquely-named spool file under `dir`.
fn create_temp_file(dir: &Path) -> std::io::Result<(std::fs::File, PathBuf)> {
    loop {
        let serial = UPLOAD_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("hearth-upload-{}-{serial}", std::process::id()));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((file, path)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Parse the headers of one part. Returns the headers and the number of
/// bytes consumed through the blank line.
fn parse_part_headers(bytes: &[u8]) -> Result<(Headers, usize)> {
    let finder = Finder::new(b"\r\n");
    let mut headers = Headers::new();
    let mut cursor = 0;
    loop {
        let line_end = finder
            .find(&bytes[cursor..])
            .ok_or_else(|| malformed("part headers not terminated"))?;
        let line = &bytes[cursor..cursor + line_end];
        cursor += line_end + 2;

        if line.is_empty() {
            return Ok((headers, cursor));
        }

        if line[0] == b' ' || line[0] == b'\t' {
            let continuation = String::from_utf8_lossy(line);
            if !headers.extend_last(continuation.trim()) {
                return Err(malformed("folded line before any part header"));
            }
            continue;
        }

        let colon =
            memchr::memchr(b':', line).ok_or_else(|| malformed("part header without colon"))?;
        let name = String::from_utf8_lossy(&line[..colon]).into_owned();
        let value = String::from_utf8_lossy(&line[colon + 1..]);
        headers.append(name, value.trim());
    }
}

/// Pull a quoted-or-bare parameter out of a `Content-Disposition` value.
fn disposition_param(disposition: &str, param: &str) -> Option<String> {
    for piece in disposition.split(';').skip(1) {
        let (key, value) = piece.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case(param) {
            continue;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        return Some(value.replace("\\\"", "\""));
    }
    None
}

/// Tokenize a `multipart/form-data` body.
///
/// Every part carrying `Content-Disposition: form-data; name=...`
/// produces an entry: inline parts decode to text per their declared
/// charset (falling back to `default_encoding`), and parts with a
/// `filename` spool to a temp file under `tmp_dir`. Spool paths are
/// pushed onto `temp_files` so the request can delete them when it
/// ends, whatever the exit path.
pub(crate) fn parse_multipart(
    body: &[u8],
    boundary: &str,
    tmp_dir: &Path,
    default_encoding: &'static Encoding,
    temp_files: &mut Vec<PathBuf>,
) -> Result<Vec<(String, Param)>> {
    if boundary.is_empty() || boundary.len() > MAX_BOUNDARY_LEN {
        return Err(malformed("invalid multipart boundary"));
    }

    let delimiter = format!("--{boundary}");
    let mut cursor = Finder::new(delimiter.as_bytes())
        .find(body)
        .ok_or_else(|| malformed("opening boundary not found"))?
        + delimiter.len();

    let close_delimiter = format!("\r\n--{boundary}");
    let close_finder = Finder::new(close_delimiter.as_bytes());

    let mut entries = Vec::new();
    loop {
        if body[cursor..].starts_with(b"--") {
            // closing delimiter; anything after is epilogue
            return Ok(entries);
        }

        // transport padding is permitted between the boundary and its crlf
        while matches!(body.get(cursor), Some(b' ' | b'\t')) {
            cursor += 1;
        }
        if !body[cursor..].starts_with(b"\r\n") {
            return Err(malformed("malformed boundary line"));
        }
        cursor += 2;

        let (headers, consumed) = parse_part_headers(&body[cursor..])?;
        cursor += consumed;

        let content_end = close_finder
            .find(&body[cursor..])
            .ok_or_else(|| malformed("part not terminated by a boundary"))?;
        let content = &body[cursor..cursor + content_end];
        cursor += content_end + close_delimiter.len();

        let disposition = headers.get_str("Content-Disposition").unwrap_or("");
        if !disposition
            .trim_start()
            .to_ascii_lowercase()
            .starts_with("form-data")
        {
            continue;
        }
        let Some(name) = disposition_param(disposition, "name") else {
            continue;
        };

        match disposition_param(disposition, "filename") {
            Some(filename) => {
                let content_type = headers
                    .get_str("Content-Type")
                    .unwrap_or("text/plain")
                    .to_string();
                let (mut file, path) = create_temp_file(tmp_dir)?;
                file.write_all(content)?;
                temp_files.push(path.clone());
                entries.push((
                    name,
                    Param::File(FileUpload {
                        path,
                        filename,
                        content_type,
                    }),
                ));
            }
            None => {
                let encoding = util::encoding(&headers, default_encoding);
                let (text, _, _) = encoding.decode(content);
                entries.push((name, Param::Text(text.into_owned())));
            }
        }
    }
}
