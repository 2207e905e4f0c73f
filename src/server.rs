/// Wyoming server
///
/// Listens on a `tcp://`, `unix://` or `stdio://` URI and runs one session per
/// connection on its own task.

use crate::config::ConfigProvider;
use crate::info::CapabilityResponder;
use crate::protocol::{read_event, write_event, InboundEvent, ProtocolError};
use crate::registry::DetectorRegistry;
use crate::session::{Session, SessionError};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, error, info, trace, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid server URI: {0}")]
    InvalidUri(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

/// Where the server listens
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerUri {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
    Stdio,
}

impl ServerUri {
    pub fn parse(uri: &str) -> Result<Self, ServerError> {
        let invalid = || ServerError::InvalidUri(uri.to_string());

        let (scheme, rest) = uri.split_once("://").ok_or_else(invalid)?;

        match scheme {
            "tcp" => {
                let (host, port) = rest.rsplit_once(':').ok_or_else(invalid)?;
                let port = port.parse::<u16>().map_err(|_| invalid())?;
                let host = host.trim_start_matches('[').trim_end_matches(']');
                if host.is_empty() {
                    return Err(invalid());
                }
                Ok(Self::Tcp {
                    host: host.to_string(),
                    port,
                })
            }
            "unix" if !rest.is_empty() => Ok(Self::Unix(PathBuf::from(rest))),
            "stdio" if rest.is_empty() => Ok(Self::Stdio),
            _ => Err(invalid()),
        }
    }
}

/// Shared, read-only state handed to every connection
#[derive(Clone)]
pub struct WakeWordServer {
    registry: Arc<DetectorRegistry>,
    responder: Arc<CapabilityResponder>,
    next_client: Arc<AtomicU64>,
}

impl WakeWordServer {
    pub fn new(config: Arc<dyn ConfigProvider>) -> Self {
        Self::with_registry(
            Arc::new(DetectorRegistry::new(config.clone())),
            Arc::new(CapabilityResponder::new(config)),
        )
    }

    pub fn with_registry(
        registry: Arc<DetectorRegistry>,
        responder: Arc<CapabilityResponder>,
    ) -> Self {
        Self {
            registry,
            responder,
            next_client: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Fresh session with the next client id
    pub fn new_session(&self) -> Session {
        let client_id = self.next_client.fetch_add(1, Ordering::Relaxed);
        Session::new(
            client_id.to_string(),
            self.registry.clone(),
            self.responder.clone(),
        )
    }

    /// Serve until the listener fails
    pub async fn run(&self, uri: &ServerUri) -> Result<(), ServerError> {
        match uri {
            ServerUri::Tcp { host, port } => {
                let listener = TcpListener::bind((host.as_str(), *port)).await?;
                info!("Listening on tcp://{}", listener.local_addr()?);
                self.serve_tcp(listener).await
            }
            ServerUri::Unix(path) => self.serve_unix(path).await,
            ServerUri::Stdio => {
                info!("Serving on stdio");
                handle_connection(tokio::io::stdin(), tokio::io::stdout(), self.new_session())
                    .await
            }
        }
    }

    /// Accept TCP connections forever
    pub async fn serve_tcp(&self, listener: TcpListener) -> Result<(), ServerError> {
        loop {
            let (stream, peer) = listener.accept().await?;
            let session = self.new_session();
            debug!("Accepted {} as client {}", peer, session.client_id());

            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                if let Err(e) = handle_connection(reader, writer, session).await {
                    warn!("Connection from {} closed: {}", peer, e);
                }
            });
        }
    }

    #[cfg(unix)]
    async fn serve_unix(&self, path: &std::path::Path) -> Result<(), ServerError> {
        use tokio::net::UnixListener;

        if path.exists() {
            debug!("Removing stale socket {}", path.display());
            std::fs::remove_file(path)?;
        }

        let listener = UnixListener::bind(path)?;
        info!("Listening on unix://{}", path.display());

        loop {
            let (stream, _) = listener.accept().await?;
            let session = self.new_session();
            debug!("Accepted unix client {}", session.client_id());

            tokio::spawn(async move {
                let (reader, writer) = stream.into_split();
                if let Err(e) = handle_connection(reader, writer, session).await {
                    warn!("Unix connection closed: {}", e);
                }
            });
        }
    }

    #[cfg(not(unix))]
    async fn serve_unix(&self, path: &std::path::Path) -> Result<(), ServerError> {
        Err(ServerError::InvalidUri(format!(
            "unix://{} is not supported on this platform",
            path.display()
        )))
    }
}

/// Drive one session over a byte stream until the peer disconnects
///
/// Malformed events and unconvertible audio are logged and skipped. A frame that cannot
/// be read whole, or a detector that cannot be loaded, ends the connection.
pub async fn handle_connection<R, W>(
    reader: R,
    mut writer: W,
    mut session: Session,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);

    loop {
        let event = match read_event(&mut reader).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(e @ (ProtocolError::InvalidHeader(_) | ProtocolError::InvalidData(_))) => {
                warn!("Client {}: skipping frame: {}", session.client_id(), e);
                continue;
            }
            Err(e) => {
                warn!("Client {}: {}", session.client_id(), e);
                return Err(e.into());
            }
        };

        let inbound = match InboundEvent::try_from(event) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("Client {}: {}", session.client_id(), e);
                continue;
            }
        };
        trace!("Client {}: {}", session.client_id(), inbound.event_type());

        let replies = match session.handle_event(inbound) {
            Ok(replies) => replies,
            Err(SessionError::Audio(e)) => {
                warn!("Client {}: skipping audio chunk: {}", session.client_id(), e);
                continue;
            }
            Err(e) => {
                error!("Client {}: {}", session.client_id(), e);
                return Err(e.into());
            }
        };

        for reply in replies {
            write_event(&mut writer, &reply.into_event()?).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use test_case::test_case;

    #[test_case("tcp://0.0.0.0:10400", ServerUri::Tcp { host: "0.0.0.0".to_string(), port: 10400 } ; "tcp")]
    #[test_case("tcp://[::1]:10400", ServerUri::Tcp { host: "::1".to_string(), port: 10400 } ; "tcp ipv6")]
    #[test_case("unix:///tmp/wake.sock", ServerUri::Unix(PathBuf::from("/tmp/wake.sock")) ; "unix")]
    #[test_case("stdio://", ServerUri::Stdio ; "stdio")]
    fn test_parse_uri(uri: &str, expected: ServerUri) {
        assert_eq!(ServerUri::parse(uri).unwrap(), expected);
    }

    #[test_case("http://localhost:80" ; "unknown scheme")]
    #[test_case("tcp://localhost" ; "missing port")]
    #[test_case("tcp://localhost:99999" ; "port out of range")]
    #[test_case("tcp://:10400" ; "missing host")]
    #[test_case("unix://" ; "missing path")]
    #[test_case("localhost:10400" ; "no scheme")]
    fn test_parse_invalid_uri(uri: &str) {
        assert!(matches!(
            ServerUri::parse(uri),
            Err(ServerError::InvalidUri(_))
        ));
    }

    #[test]
    fn test_client_ids_are_unique() {
        let server = WakeWordServer::new(Arc::new(ServiceConfig::default()));

        let first = server.new_session();
        let second = server.new_session();
        assert_ne!(first.client_id(), second.client_id());
    }
}
