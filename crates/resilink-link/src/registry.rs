use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::warn;

use crate::config::LinkConfig;
use crate::connection::{Connection, Transport};
use crate::error::{LinkError, Result};

/// Server-side map of client identity to connection.
///
/// A connection is created the first time an identity is mentioned, by a
/// lookup or by an inbound transport, and lives until the server shuts
/// down. Reconnecting clients are rebound to their existing entry, so
/// queued messages and in-flight QoS state survive the outage.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    cfg: LinkConfig,
    conns: Mutex<HashMap<String, Connection>>,
    shutdown: tokio_util::sync::CancellationToken,
}

impl Registry {
    pub(crate) fn new(cfg: LinkConfig, shutdown: tokio_util::sync::CancellationToken) -> Self {
        Registry {
            inner: Arc::new(RegistryInner {
                cfg,
                conns: Mutex::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    /// The connection for an identity, waiting until its link is up.
    pub async fn get_connection(&self, identity: &str) -> Result<Connection> {
        let conn = self.get_or_create(identity);
        conn.wait_up().await?;
        Ok(conn)
    }

    /// Wait until every listed identity has a live link. The usual server
    /// startup barrier: applications call this once, then start talking.
    pub async fn wait_for_all<I, S>(&self, identities: I) -> Result<Vec<Connection>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pending: Vec<_> = identities
            .into_iter()
            .map(|identity| {
                let registry = self.clone();
                async move { registry.get_connection(identity.as_ref()).await }
            })
            .collect();
        futures_util::future::try_join_all(pending).await
    }

    /// Identities currently known, live or not.
    pub fn identities(&self) -> Vec<String> {
        self.conns().keys().cloned().collect()
    }

    /// Close every connection and stop accepting transports.
    pub fn close_all(&self) {
        self.inner.shutdown.cancel();
        for conn in self.conns().values() {
            conn.close();
        }
    }

    /// Bind an admitted transport to the identity's connection, creating
    /// it on first contact. A newer transport always wins: if the old one
    /// is still live, the client has reconnected before the server noticed
    /// the outage.
    pub(crate) async fn bind(&self, identity: &str, transport: impl Transport) {
        let conn = self.get_or_create(identity);
        if conn.status() {
            let conflict = LinkError::IdentityConflict(identity.to_string());
            warn!(%conflict, "replacing a live transport, newer connection wins");
        }
        conn.attach_transport(transport).await;
    }

    fn get_or_create(&self, identity: &str) -> Connection {
        let mut conns = self.conns();
        conns
            .entry(identity.to_string())
            .or_insert_with(|| {
                Connection::with_shutdown(
                    identity,
                    self.inner.cfg.clone(),
                    self.inner.shutdown.child_token(),
                )
            })
            .clone()
    }

    fn conns(&self) -> MutexGuard<'_, HashMap<String, Connection>> {
        self.inner.conns.lock().unwrap_or_else(|err| err.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_stable_per_identity() {
        let registry = Registry::new(
            LinkConfig::default(),
            tokio_util::sync::CancellationToken::new(),
        );
        let a = registry.get_or_create("alpha");
        let b = registry.get_or_create("alpha");
        let c = registry.get_or_create("beta");
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
        assert!(!Arc::ptr_eq(&a.inner, &c.inner));
        assert_eq!(registry.identities().len(), 2);
    }
}
