use crate::ContentStream;
use encoding_rs::Encoding;
use std::io::{self, ErrorKind, Read};

/// A received request body.
///
/// This is a read-only view over the connection's content stream,
/// bounded by the request's framing: a `Content-Length` request yields
/// exactly that many bytes, and a chunked request reads through the
/// chunked decoder until its terminating frame. Requests with neither
/// framing read as empty.
///
/// Reading the body to completion is what allows the next request on a
/// persistent connection to start at a clean frame boundary; the
/// connection engine [`drain`](BodyReader::drain)s whatever the handler
/// leaves unread.
#[derive(Debug)]
pub struct BodyReader<'conn> {
    stream: &'conn mut ContentStream,
    remaining: &'conn mut Option<u64>,
}

impl<'conn> BodyReader<'conn> {
    pub(crate) fn new(stream: &'conn mut ContentStream, remaining: &'conn mut Option<u64>) -> Self {
        Self { stream, remaining }
    }

    /// The number of unread fixed-length bytes, or `None` for a chunked
    /// body whose length is unknown until the terminating frame.
    pub fn remaining(&self) -> Option<u64> {
        *self.remaining
    }

    /// Consume the remainder of this body, discarding the contents, and
    /// return the number of bytes discarded.
    pub fn drain(mut self) -> io::Result<u64> {
        io::copy(&mut self, &mut io::sink())
    }

    /// Read the entire remaining body to a byte vector.
    pub fn read_bytes(mut self) -> io::Result<Vec<u8>> {
        let mut vec = match *self.remaining {
            Some(len) => Vec::with_capacity(usize::try_from(len).unwrap_or(usize::MAX)),
            None => Vec::new(),
        };
        self.read_to_end(&mut vec)?;
        Ok(vec)
    }

    /// Read the entire remaining body and decode it with `encoding`.
    /// Undecodable sequences become replacement characters.
    pub fn read_string(self, encoding: &'static Encoding) -> io::Result<String> {
        let bytes = self.read_bytes()?;
        let (decoded, _, _) = encoding.decode(&bytes);
        Ok(decoded.into_owned())
    }
}

impl Read for BodyReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match *self.remaining {
            Some(0) => Ok(0),
            Some(unread) => {
                let len = buf
                    .len()
                    .min(usize::try_from(unread).unwrap_or(usize::MAX));
                let bytes = self.stream.read(&mut buf[..len])?;
                if bytes == 0 && len > 0 {
                    // the peer promised content-length bytes and hung up early
                    return Err(ErrorKind::UnexpectedEof.into());
                }
                *self.remaining = Some(unread - bytes as u64);
                Ok(bytes)
            }
            None => self.stream.read(buf),
        }
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

    #[test]
    fn bounded_by_content_length() {
        let mut cs = stream("hello worldGET /next");
        let mut remaining = Some(11);
        let body = BodyReader::new(&mut cs, &mut remaining);
        assert_eq!(body.read_string(encoding_rs::UTF_8).unwrap(), "hello world");
        assert_eq!(remaining, Some(0));

        // the rest of the stream is untouched
        let mut rest = String::new();
        Read::read_to_string(&mut cs, &mut rest).unwrap();
        assert_eq!(rest, "GET /next");
    }

    #[test]
    fn empty_framing_reads_nothing() {
        let mut cs = stream("these bytes belong to nobody");
        let mut remaining = Some(0);
        let body = BodyReader::new(&mut cs, &mut remaining);
        assert_eq!(body.read_bytes().unwrap(), b"");
    }

    #[test]
    fn chunked_body_reads_to_the_terminator() {
        let mut cs = stream("3\r\nabc\r\n2\r\nde\r\n0\r\n\r\nleftover");
        cs.enable_input_chunking();
        let mut remaining = None;
        let body = BodyReader::new(&mut cs, &mut remaining);
        assert_eq!(body.read_string(encoding_rs::UTF_8).unwrap(), "abcde");
        cs.finish_input().unwrap();
        assert!(cs.has_buffered_input());
    }

    #[test]
    fn drain_reports_discarded_bytes() {
        let mut cs = stream("0123456789tail");
        let mut remaining = Some(10);
        let body = BodyReader::new(&mut cs, &mut remaining);
        assert_eq!(body.drain().unwrap(), 10);
        assert_eq!(remaining, Some(0));
    }

    #[test]
    fn short_fixed_length_body_errors() {
        let mut cs = stream("abc");
        let mut remaining = Some(10);
        let body = BodyReader::new(&mut cs, &mut remaining);
        assert!(body.read_bytes().is_err());
    }

    #[test]
    fn decodes_per_charset() {
        // 0xe9 is é in latin-1
        let mut cs = ContentStream::new(Box::new(Synthetic::new(vec![b'c', b'a', b'f', 0xe9])));
        let mut remaining = Some(4);
        let body = BodyReader::new(&mut cs, &mut remaining);
        assert_eq!(
            body.read_string(encoding_rs::WINDOWS_1252).unwrap(),
            "café"
        );
    }
}
