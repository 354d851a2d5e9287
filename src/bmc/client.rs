use crate::error::CapmcResult;

use log::{info, warn};
use reqwest::{Certificate, Client};
use std::time::Duration;
use tokio::sync::{RwLock, RwLockReadGuard};

pub const DEFAULT_CLIENT_TIMEOUT_SECS: u64 = 180;

/// Owns the outbound Redfish HTTP client.
///
/// Every BMC call holds the read guard for the whole round trip. Rotation
/// takes the write guard, so it waits for in-flight calls to drain before the
/// handle is replaced.
pub struct ClientProvider {
    client: RwLock<Client>,
    timeout: Duration,
}

impl ClientProvider {
    pub fn new(timeout: Duration, ca_pem: Option<&[u8]>) -> CapmcResult<Self> {
        let client = Self::build(timeout, ca_pem)?;
        Ok(Self {
            client: RwLock::new(client),
            timeout,
        })
    }

    fn build(timeout: Duration, ca_pem: Option<&[u8]>) -> CapmcResult<Client> {
        let builder = Client::builder().timeout(timeout);
        let builder = match ca_pem {
            Some(pem) => builder.add_root_certificate(Certificate::from_pem(pem)?),
            None => {
                warn!("No CA bundle configured, BMC certificates will not be verified");
                builder.danger_accept_invalid_certs(true)
            }
        };
        Ok(builder.build()?)
    }

    /// Wraps a prebuilt client, e.g. one with pinned name resolution.
    #[cfg(test)]
    pub(crate) fn from_client(client: Client, timeout: Duration) -> Self {
        Self {
            client: RwLock::new(client),
            timeout,
        }
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Client> {
        self.client.read().await
    }

    /// Replaces the client with one trusting `ca_pem`. On failure the
    /// current client stays in service.
    pub async fn rotate(&self, ca_pem: Option<&[u8]>) -> CapmcResult<()> {
        let mut guard = self.client.write().await;
        match Self::build(self.timeout, ca_pem) {
            Ok(client) => {
                *guard = client;
                info!("Redfish HTTP client rotated");
                Ok(())
            }
            Err(e) => {
                warn!("Keeping current Redfish HTTP client, rotation failed: {e}");
                Err(e)
            }
        }
    }
}
