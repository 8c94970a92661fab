//! Scoped connection lifecycle.

use crate::channel::RpcChannel;
use crate::error::RpcResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Establishes and tears down the engine connection.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Human-readable name of the endpoint, for logging.
    fn endpoint(&self) -> &str;

    /// Opens the connection and returns the channel to issue calls on.
    async fn connect(&self) -> RpcResult<Arc<dyn RpcChannel>>;

    /// Closes the connection. Must not block.
    fn disconnect(&self) -> RpcResult<()>;
}

/// Holds an open connection and disconnects exactly once.
///
/// The connection is released by [`close`](Self::close) or, failing that,
/// when the guard is dropped (early return on a startup error, signal
/// handling, panics unwinding through the owner).
pub struct ConnectionGuard {
    connector: Arc<dyn Connector>,
    channel: Arc<dyn RpcChannel>,
    closed: bool,
}

impl ConnectionGuard {
    /// Connects and returns the guard owning the connection.
    pub async fn acquire(connector: Arc<dyn Connector>) -> RpcResult<Self> {
        let channel = connector.connect().await?;
        log::info!("connected to forwarding engine at {}", connector.endpoint());
        Ok(Self {
            connector,
            channel,
            closed: false,
        })
    }

    /// Returns the channel of the open connection.
    pub fn channel(&self) -> Arc<dyn RpcChannel> {
        Arc::clone(&self.channel)
    }

    /// Disconnects, reporting any error.
    pub fn close(mut self) -> RpcResult<()> {
        self.release()
    }

    fn release(&mut self) -> RpcResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        log::info!("disconnecting from forwarding engine at {}", self.connector.endpoint());
        self.connector.disconnect()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::error!("failed to disconnect from forwarding engine: {}", e);
        }
    }
}
