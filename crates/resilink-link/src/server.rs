use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::MAX_IDENTITY;
use crate::config::LinkConfig;
use crate::connection::Connection;
use crate::error::{LinkError, Result};
use crate::registry::Registry;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on. Port 0 picks a free one.
    pub port: u16,
    /// Identities the application expects. Unlisted clients are still
    /// admitted, with a warning; the list exists so typos show up in the
    /// log instead of as a silently absent client.
    pub expected: Option<HashSet<String>>,
    pub link: LinkConfig,
}

impl ServerConfig {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            expected: None,
            link: LinkConfig::default(),
        }
    }

    pub fn with_expected<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected = Some(identities.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }
}

/// Always-on server endpoint.
///
/// Listens for client transports, reads each one's identity line and
/// binds it to the registry. The application talks to clients through
/// [`Connection`] handles obtained from the registry; those handles stay
/// valid across any number of client reconnects.
pub struct Server {
    registry: Registry,
    local_addr: SocketAddr,
}

impl Server {
    pub async fn bind(cfg: ServerConfig) -> Result<Server> {
        cfg.link.validate()?;
        let listener = TcpListener::bind(("0.0.0.0", cfg.port)).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let registry = Registry::new(cfg.link.clone(), shutdown.clone());
        info!(%local_addr, "listening");

        tokio::spawn(accept_loop(listener, registry.clone(), Arc::new(cfg), shutdown));
        Ok(Server {
            registry,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The connection for one identity, once its link is up.
    pub async fn get_connection(&self, identity: &str) -> Result<Connection> {
        self.registry.get_connection(identity).await
    }

    /// Startup barrier: wait until every listed identity is live.
    pub async fn wait_for_all<I, S>(&self, identities: I) -> Result<Vec<Connection>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.registry.wait_for_all(identities).await
    }

    /// Stop accepting transports and close every connection.
    pub fn close_all(&self) {
        self.registry.close_all();
    }
}

async fn accept_loop(
    listener: TcpListener,
    registry: Registry,
    cfg: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "accept failed");
                    continue;
                }
            },
        };
        debug!(%peer, "inbound transport");
        let registry = registry.clone();
        let cfg = Arc::clone(&cfg);
        let token = shutdown.clone();
        tokio::spawn(async move { admit(stream, registry, cfg, token).await });
    }
}

/// Read the identity line off a fresh transport and hand it to the
/// registry. A transport that fails to identify itself within one timeout
/// is dropped; the client will redial.
async fn admit(
    mut stream: TcpStream,
    registry: Registry,
    cfg: Arc<ServerConfig>,
    shutdown: CancellationToken,
) {
    let identity = tokio::select! {
        _ = shutdown.cancelled() => return,
        read = timeout(cfg.link.timeout, read_identity(&mut stream)) => match read {
            Ok(Ok(identity)) => identity,
            Ok(Err(err)) => {
                debug!(%err, "identity read failed");
                return;
            }
            Err(_) => {
                debug!("identity read timed out");
                return;
            }
        },
    };
    if let Some(expected) = &cfg.expected {
        if !expected.contains(&identity) {
            warn!(%identity, "unexpected client identity, binding anyway");
        }
    }
    registry.bind(&identity, stream).await;
}

/// Byte-at-a-time read of the identity line, skipping leading keepalives.
///
/// Byte-wise on purpose: a buffered read could swallow frames the client
/// sent right after its identity, and those belong to the session codec.
async fn read_identity(stream: &mut TcpStream) -> Result<String> {
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == resilink_frame::DELIMITER {
            if line.is_empty() {
                continue;
            }
            return String::from_utf8(line).map_err(|_| LinkError::InvalidUtf8);
        }
        if line.len() >= MAX_IDENTITY {
            return Err(LinkError::Config(format!(
                "identity longer than {MAX_IDENTITY} bytes"
            )));
        }
        line.push(byte);
    }
}
