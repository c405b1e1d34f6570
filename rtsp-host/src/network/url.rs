//! Stream URL resolution
//!
//! `scheme://[user:pass@]host[:port]/path`. Credentials are split off so the
//! session only ever sees the stripped URL.

use crate::core::DEFAULT_RTSP_PORT;
use thiserror::Error;
use url::{Host, Url};

#[derive(Debug, Error)]
pub enum UrlError {
    #[error("invalid stream url: {0}")]
    Parse(#[from] url::ParseError),
    #[error("stream url has no host: {0}")]
    MissingHost(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Where and how to connect for a stream URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTarget {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// TLS transport (`rtsps`)
    pub secure: bool,
    /// URL with credentials removed
    pub url: String,
    pub credentials: Option<Credentials>,
}

impl StreamTarget {
    pub fn parse(input: &str) -> Result<Self, UrlError> {
        let mut url = Url::parse(input.trim())?;
        let host = match url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            None => return Err(UrlError::MissingHost(input.to_string())),
        };
        let scheme = url.scheme().to_ascii_lowercase();
        let port = url.port().unwrap_or(DEFAULT_RTSP_PORT);

        let credentials = if url.username().is_empty() {
            None
        } else {
            Some(Credentials {
                username: url.username().to_string(),
                password: url.password().unwrap_or_default().to_string(),
            })
        };
        if credentials.is_some() {
            // Only fails for URLs that cannot carry a host, ruled out above
            url.set_username("")
                .and_then(|_| url.set_password(None))
                .map_err(|_| UrlError::MissingHost(input.to_string()))?;
        }

        Ok(Self {
            secure: scheme == "rtsps",
            scheme,
            host,
            port,
            url: url.to_string(),
            credentials,
        })
    }

    /// `host:port` for logging
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}
