use crate::Headers;
use encoding_rs::Encoding;
use mime::Mime;
use std::str::FromStr;

/// Extracts the character encoding declared by a `Content-Type` header,
/// falling back to `default` when the header or its charset parameter
/// is absent or unrecognized.
pub fn encoding(headers: &Headers, default: &'static Encoding) -> &'static Encoding {
    headers
        .get_str("Content-Type")
        .and_then(|c| Mime::from_str(c).ok())
        .and_then(|m| {
            m.get_param(mime::CHARSET)
                .and_then(|v| Encoding::for_label(v.as_str().as_bytes()))
        })
        .unwrap_or(default)
}
