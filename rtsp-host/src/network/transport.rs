//! Transport connection and fault classification

use super::StreamTarget;
use crate::core::PlayerConfig;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, OnceLock};

/// Byte stream the session runs over
pub trait Transport: Read + Write + Send {}

impl<T: Read + Write + Send> Transport for T {}

/// An open transport plus an optional raw socket handle used to unblock
/// reads from another thread
pub struct Connection {
    pub stream: Box<dyn Transport>,
    pub closer: Option<TcpStream>,
}

pub trait Connector: Send + Sync {
    fn connect(&self, target: &StreamTarget, config: &PlayerConfig) -> io::Result<Connection>;
}

/// How the controller reacts to a transport error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Counted; the session is retried until the error ceiling
    Transient,
    /// The peer actively refused or aborted; restart right away
    Hard,
}

pub fn classify(error: &io::Error) -> FaultClass {
    match error.kind() {
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionAborted => FaultClass::Hard,
        _ => FaultClass::Transient,
    }
}

pub fn is_read_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

/// Plain TCP, or TLS over TCP for `rtsps`
#[derive(Default)]
pub struct TcpConnector {
    tls: OnceLock<Arc<ClientConfig>>,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn tls_config(&self) -> io::Result<Arc<ClientConfig>> {
        if let Some(config) = self.tls.get() {
            return Ok(config.clone());
        }
        let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(io::Error::other)?
        .with_root_certificates(roots)
        .with_no_client_auth();
        Ok(self.tls.get_or_init(|| Arc::new(config)).clone())
    }

    fn connect_tcp(&self, target: &StreamTarget, config: &PlayerConfig) -> io::Result<TcpStream> {
        let mut last_error = None;
        for addr in (target.host.as_str(), target.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, config.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(config.read_timeout))?;
                    stream.set_write_timeout(Some(config.read_timeout))?;
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => {
                    log_verbose!("NET", "Connect {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve", target.host),
            )
        }))
    }
}

impl Connector for TcpConnector {
    fn connect(&self, target: &StreamTarget, config: &PlayerConfig) -> io::Result<Connection> {
        log_verbose!(
            "NET",
            "Connecting to {} scheme = {}",
            target.address(),
            target.scheme
        );
        let tcp = self.connect_tcp(target, config)?;
        let closer = tcp.try_clone().ok();

        let stream: Box<dyn Transport> = if target.secure {
            let name = ServerName::try_from(target.host.clone())
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let tls = ClientConnection::new(self.tls_config()?, name).map_err(io::Error::other)?;
            Box::new(StreamOwned::new(tls, tcp))
        } else {
            Box::new(tcp)
        };
        log_verbose!("NET", "Connected to {}", target.address());

        Ok(Connection { stream, closer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    #[test]
    fn refused_and_aborted_are_hard_faults() {
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert_eq!(classify(&refused), FaultClass::Hard);
        assert_eq!(classify(&aborted), FaultClass::Hard);

        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::TimedOut,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::Other,
        ] {
            assert_eq!(classify(&io::Error::from(kind)), FaultClass::Transient);
        }
        assert!(is_read_timeout(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_read_timeout(&refused));
    }

    #[test]
    fn connects_plain_tcp_with_closer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let target = StreamTarget::parse(&format!("rtsp://127.0.0.1:{}/live", port)).unwrap();
        let config = PlayerConfig {
            connect_timeout: Duration::from_secs(2),
            ..PlayerConfig::default()
        };

        let connection = TcpConnector::new().connect(&target, &config).unwrap();
        assert!(connection.closer.is_some());
        let (_peer, _) = listener.accept().unwrap();
    }
}
