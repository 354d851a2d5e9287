use crate::dispatch::Dispatcher;
use crate::error::{CapmcError, CapmcResult};
use crate::route::create_router;

use log::info;
use std::fmt;
use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

/// Shared by every request handler.
pub struct AppState {
    pub dispatcher: Dispatcher,
}

pub struct Server {
    pub listen_address: SocketAddr,
    state: Arc<AppState>,
}

impl Server {
    pub fn new(listen_address: &str, state: AppState) -> CapmcResult<Self> {
        let listen_address = listen_address
            .to_socket_addrs()
            .map_err(|e| {
                CapmcError::Config(format!("Failed to parse listen address {listen_address}: {e}"))
            })?
            .next()
            .ok_or_else(|| CapmcError::Config(format!("No socket address for {listen_address}")))?;
        Ok(Self {
            listen_address,
            state: Arc::new(state),
        })
    }

    /// Serves until `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> CapmcResult<()> {
        info!("🚀 Server starting on {self}");
        axum::Server::try_bind(&self.listen_address)
            .map_err(|e| CapmcError::Config(format!("Failed to bind {self}: {e}")))?
            .serve(create_router(Arc::clone(&self.state)).into_make_service())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| CapmcError::Config(format!("Server error: {e}")))
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.listen_address)
    }
}
