use crate::{BoxedTransport, Error};
use memchr::memmem::Finder;
use std::io::{self, ErrorKind, Read, Write};

const FILL_LEN: usize = 4 * 1024;
const MAX_CHUNK_SIZE_LINE: usize = 128;
const MAX_TRAILER_LINE: usize = 8 * 1024;

/// The byte-level content stream of one connection.
///
/// Owns the transport for the connection's whole life, together with a
/// read-ahead buffer of bytes that have been pulled off the wire but
/// not yet consumed. All reads go through the buffer first, which is
/// what keeps request N+1's first byte exactly where request N's
/// framing ended.
///
/// The stream doubles as the chunked transfer-coding codec: input and
/// output chunking toggle independently. With input chunking enabled,
/// reads decode RFC 7230 §4.1 frames and report end-of-file at the
/// terminating chunk; with output chunking enabled, every write is
/// emitted as one frame and [`ContentStream::finish_output`] writes the
/// terminator.
pub struct ContentStream {
    transport: BoxedTransport,
    buffer: Vec<u8>,
    input_chunking: bool,
    chunk: ChunkState,
    chunk_started: bool,
    output_chunking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    /// expecting a chunk-size line
    Size,
    /// mid-chunk, this many content bytes left before the frame's crlf
    Data { remaining: u64 },
    /// the terminating chunk and its trailers have been consumed
    End,
}

impl std::fmt::Debug for ContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStream")
            .field("buffered", &self.buffer.len())
            .field("input_chunking", &self.input_chunking)
            .field("chunk", &self.chunk)
            .field("output_chunking", &self.output_chunking)
            .finish()
    }
}

impl ContentStream {
    /// Wrap a transport. The stream starts as a plain passthrough with
    /// both chunking directions disabled.
    pub fn new(transport: BoxedTransport) -> Self {
        Self {
            transport,
            buffer: Vec::new(),
            input_chunking: false,
            chunk: ChunkState::Size,
            chunk_started: false,
            output_chunking: false,
        }
    }

    /// Are any read-ahead bytes waiting to be consumed?
    pub fn has_buffered_input(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Is chunked decoding enabled on the read side?
    pub fn input_chunking(&self) -> bool {
        self.input_chunking
    }

    /// Is chunked framing enabled on the write side?
    pub fn output_chunking(&self) -> bool {
        self.output_chunking
    }

    /// Begin decoding the read side as chunked frames.
    pub fn enable_input_chunking(&mut self) {
        self.input_chunking = true;
        self.chunk = ChunkState::Size;
        self.chunk_started = false;
    }

    /// Begin framing the write side as chunks.
    pub fn enable_output_chunking(&mut self) {
        self.output_chunking = true;
    }

    /// Disable output chunking, emitting the terminating `0\r\n\r\n`
    /// frame if it was enabled.
    pub fn finish_output(&mut self) -> io::Result<()> {
        if self.output_chunking {
            self.transport.write_all(b"0\r\n\r\n")?;
            self.output_chunking = false;
        }
        Ok(())
    }

    /// Disable input chunking.
    ///
    /// # Errors
    ///
    /// Returns an error if chunk decoding had begun but the terminating
    /// chunk was never reached; unwrapping mid-body would desynchronize
    /// the connection.
    pub fn finish_input(&mut self) -> io::Result<()> {
        if self.input_chunking {
            if self.chunk_started && self.chunk != ChunkState::End {
                return Err(io::Error::new(
                    ErrorKind::InvalidData,
                    "chunked request body was not fully consumed",
                ));
            }
            self.input_chunking = false;
            self.chunk = ChunkState::Size;
            self.chunk_started = false;
        }
        Ok(())
    }

    fn fill(&mut self) -> io::Result<usize> {
        let start = self.buffer.len();
        self.buffer.resize(start + FILL_LEN, 0);
        match self.transport.read(&mut self.buffer[start..]) {
            Ok(bytes) => {
                self.buffer.truncate(start + bytes);
                Ok(bytes)
            }
            Err(e) => {
                self.buffer.truncate(start);
                Err(e)
            }
        }
    }

    fn raw_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffer.is_empty() {
            self.transport.read(buf)
        } else {
            let len = self.buffer.len().min(buf.len());
            buf[..len].copy_from_slice(&self.buffer[..len]);
            self.buffer.drain(..len);
            Ok(len)
        }
    }

    /// Read one CRLF-terminated line, consuming the terminator.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] on end-of-file before any byte,
    /// [`Error::InvalidHead`] on end-of-file mid-line, and
    /// [`Error::HeadersTooLong`] when the line exceeds `max_len`.
    pub(crate) fn read_crlf_line(&mut self, max_len: usize) -> crate::Result<Vec<u8>> {
        let finder = Finder::new(b"\r\n");
        let mut search_from = 0;
        loop {
            if let Some(index) = finder.find(&self.buffer[search_from..]) {
                let end = search_from + index;
                let line = self.buffer[..end].to_vec();
                self.buffer.drain(..end + 2);
                return Ok(line);
            }

            if self.buffer.len() > max_len {
                return Err(Error::HeadersTooLong);
            }

            search_from = self.buffer.len().saturating_sub(1);
            if self.fill()? == 0 {
                return if self.buffer.is_empty() {
                    Err(Error::Closed)
                } else {
                    Err(Error::InvalidHead)
                };
            }
        }
    }

    fn read_line_io(&mut self, max_len: usize) -> io::Result<Vec<u8>> {
        self.read_crlf_line(max_len).map_err(|e| match e {
            Error::Io(io) => io,
            Error::Closed => ErrorKind::ConnectionAborted.into(),
            _ => io::Error::new(ErrorKind::InvalidData, e.to_string()),
        })
    }

    fn consume_crlf(&mut self) -> io::Result<()> {
        let mut crlf = [0u8; 2];
        let mut read = 0;
        while read < 2 {
            let bytes = self.raw_read(&mut crlf[read..])?;
            if bytes == 0 {
                return Err(ErrorKind::ConnectionAborted.into());
            }
            read += bytes;
        }
        if &crlf == b"\r\n" {
            Ok(())
        } else {
            Err(io::Error::new(
                ErrorKind::InvalidData,
                "chunk data not followed by crlf",
            ))
        }
    }

    fn read_chunked(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.chunk {
                ChunkState::End => return Ok(0),

                ChunkState::Size => {
                    self.chunk_started = true;
                    let line = self.read_line_io(MAX_CHUNK_SIZE_LINE)?;
                    let size = parse_chunk_size(&line)?;
                    if size == 0 {
                        // consume trailer lines through the blank line
                        loop {
                            let trailer = self.read_line_io(MAX_TRAILER_LINE)?;
                            if trailer.is_empty() {
                                break;
                            }
                        }
                        self.chunk = ChunkState::End;
                        return Ok(0);
                    }
                    self.chunk = ChunkState::Data { remaining: size };
                }

                ChunkState::Data { remaining } => {
                    let len = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
                    if len == 0 {
                        return Ok(0);
                    }
                    let bytes = self.raw_read(&mut buf[..len])?;
                    if bytes == 0 {
                        return Err(ErrorKind::ConnectionAborted.into());
                    }
                    let remaining = remaining - bytes as u64;
                    if remaining == 0 {
                        self.consume_crlf()?;
                        self.chunk = ChunkState::Size;
                    } else {
                        self.chunk = ChunkState::Data { remaining };
                    }
                    return Ok(bytes);
                }
            }
        }
    }
}

fn parse_chunk_size(line: &[u8]) -> io::Result<u64> {
    let end = memchr::memchr(b';', line).unwrap_or(line.len());
    std::str::from_utf8(&line[..end])
        .ok()
        .and_then(|src| u64::from_str_radix(src.trim(), 16).ok())
        .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "invalid chunk size"))
}

impl Read for ContentStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.input_chunking {
            self.read_chunked(buf)
        } else {
            self.raw_read(buf)
        }
    }
}

impl Write for ContentStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.output_chunking {
            // a zero-length frame would be the terminator, which only
            // finish_output may emit
            if buf.is_empty() {
                return Ok(0);
            }
            let head = format!("{:X}\r\n", buf.len());
            self.transport.write_all(head.as_bytes())?;
            self.transport.write_all(buf)?;
            self.transport.write_all(b"\r\n")?;
            Ok(buf.len())
        } else {
            self.transport.write(buf)
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.transport.flush()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Synthetic;
    use pretty_assertions::assert_eq;

    fn stream(input: &str) -> ContentStream {
        ContentStream::new(Box::new(Synthetic::from(input)))
    }

    fn read_with_buffers_of_size(reader: &mut impl Read, size: usize) -> io::Result<String> {
        let mut out = Vec::new();
        loop {
            let mut buf = vec![0; size];
            match reader.read(&mut buf)? {
                0 => break Ok(String::from_utf8_lossy(&out).into_owned()),
                bytes => out.extend_from_slice(&buf[..bytes]),
            }
        }
    }

    #[test]
    fn full_chunked_decode() {
        for size in 1..50 {
            let mut cs = stream("5\r\n12345\r\n1\r\na\r\n2\r\nbc\r\n3\r\ndef\r\n0\r\n\r\n");
            cs.enable_input_chunking();
            let output = read_with_buffers_of_size(&mut cs, size).unwrap();
            assert_eq!(output, "12345abcdef", "size: {size}");

            let mut cs = stream("7\r\nMozilla\r\n9\r\nDeveloper\r\n7\r\nNetwork\r\n0\r\n\r\n");
            cs.enable_input_chunking();
            let output = read_with_buffers_of_size(&mut cs, size).unwrap();
            assert_eq!(output, "MozillaDeveloperNetwork", "size: {size}");
        }
    }

    #[test]
    fn chunk_extensions_are_ignored() {
        let mut cs = stream("5;abcdefg\r\n12345\r\n2;a=b\"\" \r\nbc\r\n0;00\r\n\r\n");
        cs.enable_input_chunking();
        assert_eq!(read_with_buffers_of_size(&mut cs, 8).unwrap(), "12345bc");
    }

    #[test]
    fn trailers_are_consumed() {
        let mut cs = stream("1\r\n_\r\n0\r\nExpires: never\r\n\r\nnext request");
        cs.enable_input_chunking();
        assert_eq!(read_with_buffers_of_size(&mut cs, 8).unwrap(), "_");

        // the bytes after the terminator belong to the next request
        cs.finish_input().unwrap();
        let mut rest = String::new();
        cs.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "next request");
    }

    #[test]
    fn invalid_chunk_sizes_error() {
        for input in ["xyz\r\nabc\r\n", "\r\n\r\n"] {
            let mut cs = stream(input);
            cs.enable_input_chunking();
            assert!(read_with_buffers_of_size(&mut cs, 8).is_err(), "{input:?}");
        }
    }

    #[test]
    fn truncated_chunked_body_errors() {
        let mut cs = stream("5\r\n123");
        cs.enable_input_chunking();
        assert!(read_with_buffers_of_size(&mut cs, 8).is_err());
    }

    #[test]
    fn output_chunking_frames_each_write() {
        let synthetic = Synthetic::default();
        let output = synthetic.output_handle();
        let mut cs = ContentStream::new(Box::new(synthetic));

        cs.enable_output_chunking();
        cs.write_all(b"abc").unwrap();
        cs.write_all(b"de").unwrap();
        cs.finish_output().unwrap();

        assert_eq!(output.string(), "3\r\nabc\r\n2\r\nde\r\n0\r\n\r\n");
    }

    #[test]
    fn writes_pass_through_when_not_chunking() {
        let synthetic = Synthetic::default();
        let output = synthetic.output_handle();
        let mut cs = ContentStream::new(Box::new(synthetic));

        cs.write_all(b"plain bytes").unwrap();
        cs.finish_output().unwrap();
        assert_eq!(output.string(), "plain bytes");
    }

    #[test]
    fn read_crlf_line_consumes_terminators() {
        let mut cs = stream("GET / HTTP/1.1\r\nHost: x\r\n\r\n");
        assert_eq!(cs.read_crlf_line(1024).unwrap(), b"GET / HTTP/1.1");
        assert_eq!(cs.read_crlf_line(1024).unwrap(), b"Host: x");
        assert_eq!(cs.read_crlf_line(1024).unwrap(), b"");
        assert!(matches!(cs.read_crlf_line(1024), Err(Error::Closed)));
    }

    #[test]
    fn partial_line_at_eof_is_invalid() {
        let mut cs = stream("GET / HTTP");
        assert!(matches!(cs.read_crlf_line(1024), Err(Error::InvalidHead)));
    }

    #[test]
    fn overlong_line_is_rejected() {
        let long = format!("{}\r\n", "x".repeat(9000));
        let mut cs = stream(&long);
        assert!(matches!(
            cs.read_crlf_line(8192),
            Err(Error::HeadersTooLong)
        ));
    }

    #[test]
    fn finish_input_rejects_unread_chunked_body() {
        let mut cs = stream("5\r\n12345\r\n0\r\n\r\n");
        cs.enable_input_chunking();
        let mut buf = [0u8; 3];
        cs.read(&mut buf).unwrap();
        assert!(cs.finish_input().is_err());
    }

    #[test]
    fn finish_input_allows_an_untouched_body() {
        let mut cs = stream("5\r\n12345\r\n0\r\n\r\n");
        cs.enable_input_chunking();
        cs.finish_input().unwrap();
        assert!(!cs.input_chunking());
    }
}
