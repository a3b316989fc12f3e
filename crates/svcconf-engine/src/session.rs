//! Lazily connected repository session

use tracing::info;

use svcconf_core::client::Connector;
use svcconf_core::errors::{ExError, ExErrorKind, Result};

/// A connector plus the client it produced, if any
///
/// The first call to [`Session::client`] connects; later calls reuse the
/// client until [`Session::disconnect`].
pub struct Session<K: Connector> {
    connector: K,
    client: Option<K::Client>,
}

impl<K: Connector> Session<K> {
    pub fn new(connector: K) -> Self {
        Self {
            connector,
            client: None,
        }
    }

    pub fn connector(&self) -> &K {
        &self.connector
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// The live client, connecting first if needed
    ///
    /// # Errors
    ///
    /// Whatever the connector reports; the session stays disconnected.
    pub fn client(&mut self) -> Result<&K::Client> {
        if self.client.is_none() {
            let client = self.connector.connect().map_err(|e| e.or_op("connect"))?;
            info!("repository session connected");
            self.client = Some(client);
        }
        self.client.as_ref().ok_or_else(|| {
            ExError::new(ExErrorKind::Internal)
                .with_op("connect")
                .with_message("session has no client after connecting")
        })
    }

    /// Drop the client; returns whether one was connected
    pub fn disconnect(&mut self) -> bool {
        let was_connected = self.client.take().is_some();
        if was_connected {
            info!("repository session disconnected");
        }
        was_connected
    }
}
