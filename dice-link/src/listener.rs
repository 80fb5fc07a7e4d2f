//! Passive side: advertise the dice service and accept exactly one peer.

use std::net::SocketAddr;

use dice_core::{SERVICE_NAME, SERVICE_UUID};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::connection::{Connection, ConnectionError};

/// Single-accept listener. The endpoint is bound for the duration of one `listen` call.
pub struct Listener {
    bind_addr: SocketAddr,
    cancelled: watch::Sender<bool>,
}

impl Listener {
    pub fn new(bind_addr: SocketAddr) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            bind_addr,
            cancelled,
        }
    }

    /// Bind, wait for one peer, release the endpoint and return the connection.
    /// Returns `Aborted` if `cancel` is called first (or already was).
    pub async fn listen(&self) -> Result<Connection, ConnectionError> {
        let mut cancelled = self.cancelled.subscribe();
        tokio::select! {
            _ = cancelled.wait_for(|c| *c) => {
                debug!(addr = %self.bind_addr, "listen cancelled");
                Err(ConnectionError::Aborted)
            }
            res = self.accept_one() => res,
        }
    }

    /// Abort a pending `listen`, closing the endpoint.
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    async fn accept_one(&self) -> Result<Connection, ConnectionError> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(ConnectionError::ConnectFailed)?;
        info!(
            addr = %self.bind_addr,
            service = SERVICE_NAME,
            uuid = %SERVICE_UUID,
            "waiting for peer"
        );
        let (stream, remote) = listener
            .accept()
            .await
            .map_err(ConnectionError::ConnectFailed)?;
        // Single accept: stop advertising as soon as one peer is in.
        drop(listener);
        info!(peer = %remote, "connection accepted");
        Connection::new(stream).map_err(ConnectionError::ConnectFailed)
    }
}
