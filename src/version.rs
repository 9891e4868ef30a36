use std::{fmt::Display, str::FromStr};

/// The version of the HTTP protocol in use.
///
/// This server only ever speaks the 0.9 and 1.x family; requests for
/// anything newer are rejected during head parsing.
#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum Version {
    /// HTTP/0.9
    Http0_9,

    /// HTTP/1.0
    Http1_0,

    /// HTTP/1.1
    Http1_1,
}

impl Version {
    /// returns the http version as a static str, such as "HTTP/1.1"
    pub const fn as_str(&self) -> &'static str {
        match self {
            Version::Http0_9 => "HTTP/0.9",
            Version::Http1_0 => "HTTP/1.0",
            Version::Http1_1 => "HTTP/1.1",
        }
    }
}

impl FromStr for Version {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HTTP/0.9" | "http/0.9" => Ok(Self::Http0_9),
            "HTTP/1.0" | "http/1.0" => Ok(Self::Http1_0),
            "HTTP/1.1" | "http/1.1" => Ok(Self::Http1_1),
            _ => Err(crate::Error::UnsupportedVersion(s.to_string())),
        }
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_str() {
        let versions = [Version::Http0_9, Version::Http1_0, Version::Http1_1];

        for version in versions {
            assert_eq!(version.as_str().parse::<Version>().unwrap(), version);
            assert_eq!(version.to_string().parse::<Version>().unwrap(), version);
        }

        assert!("HTTP/2".parse::<Version>().is_err());
        assert!("not a version".parse::<Version>().is_err());
    }

    #[test]
    fn ord() {
        use Version::{Http0_9, Http1_0, Http1_1};
        assert!(Http1_1 > Http1_0);
        assert!(Http1_0 > Http0_9);
    }
}
