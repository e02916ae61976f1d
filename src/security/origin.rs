//! Caller origin parsing and comparison

use std::fmt;

use url::Url;

/// A caller origin as presented in the `Origin` header or request field
///
/// Web origins compare on scheme, host and port with the scheme's default
/// port filled in, so `https://h` and `https://h:443` are the same origin.
/// Anything that does not parse as a URL with a host is kept verbatim and
/// compared by exact string equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Opaque identifier such as an application package name
    Literal(String),
    /// Scheme/host/port triple
    Web {
        scheme: String,
        host: String,
        port: Option<u16>,
    },
}

impl Origin {
    /// Parse an origin string
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match Url::parse(raw) {
            Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => {
                let scheme = url.scheme().to_ascii_lowercase();
                let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
                let port = url.port().or_else(|| default_port(&scheme));
                Self::Web { scheme, host, port }
            }
            _ => Self::Literal(raw.to_string()),
        }
    }

    /// Whether this origin matches a whitelist pattern
    #[must_use]
    pub fn matches(&self, pattern: &Self) -> bool {
        self == pattern
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{s}"),
            Self::Web {
                scheme,
                host,
                port: Some(port),
            } => write!(f, "{scheme}://{host}:{port}"),
            Self::Web {
                scheme,
                host,
                port: None,
            } => write!(f, "{scheme}://{host}"),
        }
    }
}

/// Default port for the schemes origins are commonly served from
fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" | "ws" => Some(80),
        "https" | "wss" => Some(443),
        "ftp" => Some(21),
        _ => None,
    }
}
