//! Active side: open a stream to the paired peer's dice service and announce our role.

use std::io::ErrorKind;
use std::time::Duration;

use dice_core::{Message, PeerAddress, Role, SERVICE_UUID};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{Connection, ConnectionError};

/// Pause between refused attempts inside one connect window.
const RETRY_INTERVAL: Duration = Duration::from_millis(200);

/// One outbound connect attempt to a fixed peer.
pub struct Initiator {
    peer: PeerAddress,
    window: Duration,
    cancelled: watch::Sender<bool>,
}

impl Initiator {
    /// `window` bounds how long a peer that is not yet listening is waited for.
    pub fn new(peer: PeerAddress, window: Duration) -> Self {
        let (cancelled, _) = watch::channel(false);
        Self {
            peer,
            window,
            cancelled,
        }
    }

    /// Connect, then write `RoleAnnounce { role: announce }` before returning.
    pub async fn connect(&self, announce: Role) -> Result<Connection, ConnectionError> {
        let mut cancelled = self.cancelled.subscribe();
        tokio::select! {
            _ = cancelled.wait_for(|c| *c) => {
                debug!(peer = %self.peer, "connect cancelled");
                Err(ConnectionError::Aborted)
            }
            res = self.open(announce) => res,
        }
    }

    /// Abort an in-flight `connect`. A half-open stream is dropped with it.
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    async fn open(&self, announce: Role) -> Result<Connection, ConnectionError> {
        info!(peer = %self.peer, uuid = %SERVICE_UUID, "connecting");
        let deadline = Instant::now() + self.window;
        let stream = loop {
            match TcpStream::connect(self.peer.addr).await {
                Ok(s) => break s,
                Err(e) if is_not_listening_yet(&e) && Instant::now() + RETRY_INTERVAL < deadline => {
                    debug!(peer = %self.peer, error = %e, "peer not listening yet");
                    tokio::time::sleep(RETRY_INTERVAL).await;
                }
                Err(e) => {
                    warn!(peer = %self.peer, error = %e, "connection failed");
                    return Err(ConnectionError::ConnectFailed(e));
                }
            }
        };
        let conn = Connection::new(stream).map_err(ConnectionError::ConnectFailed)?;
        info!(peer = %self.peer, "connection successful");
        conn.write_message(&Message::RoleAnnounce { role: announce })
            .await;
        Ok(conn)
    }
}

fn is_not_listening_yet(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
    )
}
