use std::{
    fmt::{self, Display},
    str::FromStr,
};

/// HTTP request methods.
///
/// See [RFC7231, Section 4](https://tools.ietf.org/html/rfc7231#section-4)
/// and [RFC5789](https://tools.ietf.org/html/rfc5789) for PATCH.
///
/// The wire token is uppercased before interning, so `get` and `GET`
/// parse to the same method.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Method {
    /// The CONNECT method requests a tunnel to the target origin.
    Connect,

    /// The DELETE method requests removal of the target resource.
    Delete,

    /// The GET method requests transfer of a current selected
    /// representation for the target resource.
    Get,

    /// The HEAD method is identical to GET except that the server MUST
    /// NOT send a message body in the response.
    Head,

    /// The OPTIONS method requests information about the communication
    /// options available for the target resource.
    Options,

    /// The PATCH method requests that a set of changes described in the
    /// request entity be applied to the target resource.
    Patch,

    /// The POST method requests that the target resource process the
    /// representation enclosed in the request.
    Post,

    /// The PUT method requests that the state of the target resource be
    /// replaced with the enclosed representation.
    Put,

    /// The TRACE method requests a remote, application-level loop-back
    /// of the request message.
    Trace,
}

impl Method {
    /// the method as an uppercase static str
    pub const fn as_str(&self) -> &'static str {
        match self {
            Method::Connect => "CONNECT",
            Method::Delete => "DELETE",
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Trace => "TRACE",
        }
    }
}

impl FromStr for Method {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CONNECT" => Ok(Self::Connect),
            "DELETE" => Ok(Self::Delete),
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH" => Ok(Self::Patch),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "TRACE" => Ok(Self::Trace),
            _ => Err(crate::Error::UnrecognizedMethod(s.to_string())),
        }
    }
}

impl AsRef<str> for Method {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
