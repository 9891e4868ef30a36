use encoding_rs::Encoding;

const HEX: &[u8; 16] = b"0123456789ABCDEF";

fn is_unreserved(byte: u8) -> bool {
    matches!(byte, b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~')
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Percent-encode a byte sequence. Unreserved characters pass through;
/// everything else, including space, becomes `%XX`.
pub fn percent_encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &byte in bytes {
        if is_unreserved(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0xf) as usize] as char);
        }
    }
    out
}

/// Decode a percent-encoded byte sequence. `+` decodes to space (the
/// form/query convention) and a `%` not followed by two hex digits
/// passes through literally.
pub fn percent_decode_bytes(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut index = 0;
    while index < input.len() {
        match input[index] {
            b'+' => {
                out.push(b' ');
                index += 1;
            }
            b'%' => {
                match (
                    input.get(index + 1).copied().and_then(hex_value),
                    input.get(index + 2).copied().and_then(hex_value),
                ) {
                    (Some(hi), Some(lo)) => {
                        out.push((hi << 4) | lo);
                        index += 3;
                    }
                    _ => {
                        out.push(b'%');
                        index += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                index += 1;
            }
        }
    }
    out
}

/// URL-encode a string: the string is encoded to bytes with `encoding`
/// and the bytes are percent-encoded.
pub fn url_encode(input: &str, encoding: &'static Encoding) -> String {
    let (bytes, _, _) = encoding.encode(input);
    percent_encode_bytes(&bytes)
}

/// URL-decode a string: percent sequences become bytes, and the bytes
/// are decoded with `encoding`. Undecodable sequences become
/// replacement characters.
pub fn url_decode(input: &str, encoding: &'static Encoding) -> String {
    let bytes = percent_decode_bytes(input.as_bytes());
    let (decoded, _, _) = encoding.decode(&bytes);
    decoded.into_owned()
}

/// Parse an `application/x-www-form-urlencoded` body (or a query
/// string) into an order-preserving list of key/value pairs. A field
/// with no `=` yields an empty value.
pub fn parse_urlencoded(body: &[u8], encoding: &'static Encoding) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for field in body.split(|&b| b == b'&') {
        if field.is_empty() {
            continue;
        }
        let (key, value) = match memchr::memchr(b'=', field) {
            Some(eq) => (&field[..eq], &field[eq + 1..]),
            None => (field, &[][..]),
        };
        let key = decode_component(key, encoding);
        let value = decode_component(value, encoding);
        pairs.push((key, value));
    }
    pairs
}

fn decode_component(bytes: &[u8], encoding: &'static Encoding) -> String {
    let bytes = percent_decode_bytes(bytes);
    let (decoded, _, _) = encoding.decode(&bytes);
    decoded.into_owned()
}

/// Parse the query component of a request target, if any.
pub(crate) fn parse_query(target: &str, encoding: &'static Encoding) -> Vec<(String, String)> {
    match target.split_once('?') {
        Some((_, query)) => parse_urlencoded(query.as_bytes(), encoding),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn percent_round_trips_arbitrary_bytes() {
        let inputs: &[&[u8]] = &[
            b"",
            b"plain",
            b"two words",
            b"a+b=c&d",
            b"100%",
            &[0x00, 0x01, 0xfe, 0xff],
            "héllo wörld".as_bytes(),
        ];
        for input in inputs {
            let encoded = percent_encode_bytes(input);
            assert_eq!(
                percent_decode_bytes(encoded.as_bytes()),
                input.to_vec(),
                "{encoded}"
            );
        }
    }

    #[test]
    fn url_encode_decode_round_trips_per_charset() {
        for encoding in [encoding_rs::UTF_8, encoding_rs::WINDOWS_1252] {
            for input in ["hello", "héllo wörld", "a=b&c"] {
                assert_eq!(url_decode(&url_encode(input, encoding), encoding), input);
            }
        }
    }

    #[test]
    fn plus_decodes_to_space() {
        assert_eq!(url_decode("a+b", encoding_rs::UTF_8), "a b");
    }

    #[test]
    fn stray_percent_passes_through() {
        assert_eq!(url_decode("100%", encoding_rs::UTF_8), "100%");
        assert_eq!(url_decode("%zz", encoding_rs::UTF_8), "%zz");
    }

    #[test]
    fn urlencoded_pairs_preserve_order_and_duplicates() {
        let pairs = parse_urlencoded(b"b=2&a=1&b=3&flag&=empty", encoding_rs::UTF_8);
        assert_eq!(
            pairs,
            vec![
                ("b".into(), "2".into()),
                ("a".into(), "1".into()),
                ("b".into(), "3".into()),
                ("flag".into(), String::new()),
                (String::new(), "empty".into()),
            ]
        );
    }

    #[test]
    fn urlencoded_decodes_the_declared_charset() {
        // caf%E9 is latin-1 for café
        let pairs = parse_urlencoded(b"drink=caf%E9", encoding_rs::WINDOWS_1252);
        assert_eq!(pairs, vec![("drink".into(), "café".into())]);
    }

    #[test]
    fn query_extraction() {
        let pairs = parse_query("/search?q=two+words&page=2", encoding_rs::UTF_8);
        assert_eq!(
            pairs,
            vec![("q".into(), "two words".into()), ("page".into(), "2".into())]
        );
        assert!(parse_query("/search", encoding_rs::UTF_8).is_empty());
    }
}
