use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use crate::config::LinkConfig;
use crate::connection::Connection;
use crate::error::{LinkError, Result};

/// Longest identity the server will accept, delimiter excluded.
pub const MAX_IDENTITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Identity presented to the server. Stable across reboots, unique
    /// per client.
    pub identity: String,
    pub link: LinkConfig,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16, identity: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            identity: identity.into(),
            link: LinkConfig::default(),
        }
    }

    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client endpoint of a link.
///
/// Dials the server, presents its identity, then keeps the connection
/// alive: every outage after the first successful connect is repaired by
/// a background supervisor with unbounded retries.
pub struct Client {
    conn: Connection,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

impl Client {
    /// Connect and wait for the link to come up.
    ///
    /// "Up" requires an inbound frame, not just an accepted socket: a
    /// server process that accepts but never speaks is still a failed
    /// start. The first session gets a double keepalive window before
    /// giving up.
    pub async fn connect(cfg: ClientConfig) -> Result<Client> {
        cfg.link.validate()?;
        validate_identity(&cfg.identity)?;

        let conn = Connection::new(&cfg.identity, cfg.link.clone());
        let addr = cfg.addr();

        if let Err(err) = open_session(&conn, &addr, &cfg.identity).await {
            conn.close();
            return Err(LinkError::InitialConnect { addr, source: err });
        }

        let grace = 2 * cfg.link.timeout;
        match tokio::time::timeout(grace, conn.wait_up()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                conn.close();
                return Err(err);
            }
            Err(_) => {
                conn.close();
                return Err(LinkError::InitialConnect {
                    addr,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "no frame received from server",
                    ),
                });
            }
        }
        info!(identity = %cfg.identity, %addr, "connected");

        let supervisor = conn.clone();
        tokio::spawn(async move { supervise(supervisor, addr, cfg).await });
        Ok(Client { conn })
    }

    /// The underlying connection, for callers that want to share it
    /// across tasks.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub async fn write(&self, payload: impl AsRef<[u8]>, qos: bool, wait: bool) -> Result<()> {
        self.conn.write(payload, qos, wait).await
    }

    pub async fn readline(&self) -> Result<String> {
        self.conn.readline().await
    }

    pub fn status(&self) -> bool {
        self.conn.status()
    }

    pub async fn wait_up(&self) -> Result<()> {
        self.conn.wait_up().await
    }

    pub fn connects(&self) -> u32 {
        self.conn.connects()
    }

    pub fn identity(&self) -> &str {
        self.conn.identity()
    }

    pub fn close(&self) {
        self.conn.close();
    }
}

fn validate_identity(identity: &str) -> Result<()> {
    if identity.is_empty() {
        return Err(LinkError::Config("identity must not be empty".into()));
    }
    if identity.len() > MAX_IDENTITY {
        return Err(LinkError::Config(format!(
            "identity longer than {MAX_IDENTITY} bytes"
        )));
    }
    if identity.contains('\n') {
        return Err(LinkError::Config(
            "identity must not contain a newline".into(),
        ));
    }
    Ok(())
}

/// Dial, announce the identity, bind the socket to the connection.
/// The identity line goes out raw, before the session codec takes over.
async fn open_session(conn: &Connection, addr: &str, identity: &str) -> std::io::Result<()> {
    let mut stream = TcpStream::connect(addr).await?;
    stream.write_all(identity.as_bytes()).await?;
    stream.write_all(b"\n").await?;
    conn.attach_transport(stream).await;
    Ok(())
}

/// Runs for the life of the client: whenever the current session dies,
/// redial until a new transport is bound. Retries forever; only closing
/// the connection stops it.
async fn supervise(conn: Connection, addr: String, cfg: ClientConfig) {
    loop {
        tokio::select! {
            _ = conn.inner.shutdown.cancelled() => return,
            _ = conn.inner.session_down.notified() => {}
        }
        debug!(identity = %cfg.identity, "session lost, redialing");
        loop {
            tokio::select! {
                _ = conn.inner.shutdown.cancelled() => return,
                _ = tokio::time::sleep(cfg.link.retry_delay) => {}
            }
            match open_session(&conn, &addr, &cfg.identity).await {
                Ok(()) => break,
                Err(err) => {
                    debug!(identity = %cfg.identity, %err, "reconnect attempt failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_validation() {
        assert!(validate_identity("sensor-7").is_ok());
        assert!(validate_identity("").is_err());
        assert!(validate_identity("two\nlines").is_err());
        assert!(validate_identity(&"x".repeat(MAX_IDENTITY + 1)).is_err());
    }
}
