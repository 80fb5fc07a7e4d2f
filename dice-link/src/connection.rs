//! One established duplex stream to the paired peer.

use std::net::SocketAddr;

use dice_core::wire::{decode, encode, MAX_MESSAGE_LEN};
use dice_core::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

/// Establishment and read failures. None of these leave the session controller.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),
    #[error("peer closed the connection")]
    PeerClosed,
    #[error("aborted")]
    Aborted,
}

/// Open stream to a single peer. Never reused after `close`.
pub struct Connection {
    remote: SocketAddr,
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> std::io::Result<Self> {
        let remote = stream.peer_addr()?;
        // Each write should leave as its own segment; reads assume one message each.
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Ok(Self {
            remote,
            reader: Mutex::new(reader),
            writer: Mutex::new(Some(writer)),
            closed,
        })
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait for the peer's next write and decode it.
    /// End of stream, I/O errors and undecodable bytes all yield `PeerClosed`.
    pub async fn read_message(&self) -> Result<Message, ConnectionError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(ConnectionError::Aborted);
        }
        let mut reader = self.reader.lock().await;
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let n = tokio::select! {
            _ = closed.wait_for(|c| *c) => return Err(ConnectionError::Aborted),
            r = reader.read(&mut buf) => match r {
                Ok(0) => {
                    debug!(peer = %self.remote, "end of stream");
                    return Err(ConnectionError::PeerClosed);
                }
                Ok(n) => n,
                Err(e) => {
                    warn!(peer = %self.remote, error = %e, "read failed");
                    return Err(ConnectionError::PeerClosed);
                }
            },
        };
        match decode(&buf[..n]) {
            Ok(msg) => {
                debug!(peer = %self.remote, ?msg, "received");
                Ok(msg)
            }
            Err(e) => {
                warn!(
                    peer = %self.remote,
                    bytes = %String::from_utf8_lossy(&buf[..n]),
                    error = %e,
                    "dropping link on undecodable read"
                );
                Err(ConnectionError::PeerClosed)
            }
        }
    }

    /// Encode and write. Best effort: failures and a closed stream are logged, never returned.
    /// A write stuck on a full send buffer gives up as soon as the connection is closed.
    pub async fn write_message(&self, msg: &Message) {
        let mut closed = self.closed.subscribe();
        let mut writer = tokio::select! {
            _ = closed.wait_for(|c| *c) => {
                debug!(peer = %self.remote, ?msg, "write skipped: link closed");
                return;
            }
            w = self.writer.lock() => w,
        };
        let Some(w) = writer.as_mut() else {
            warn!(peer = %self.remote, ?msg, "write skipped: output stream closed");
            return;
        };
        let bytes = encode(msg);
        let res: std::io::Result<()> = tokio::select! {
            _ = closed.wait_for(|c| *c) => {
                debug!(peer = %self.remote, ?msg, "write abandoned: link closed");
                return;
            }
            r = async {
                w.write_all(&bytes).await?;
                w.flush().await
            } => r,
        };
        match res {
            Ok(()) => debug!(peer = %self.remote, ?msg, "sent"),
            Err(e) => warn!(peer = %self.remote, ?msg, error = %e, "write failed"),
        }
    }

    /// Mark the connection closed without waiting on anything. Pending reads and writes return.
    pub fn abort(&self) {
        self.closed.send_replace(true);
    }

    /// Release the stream. Idempotent; an in-flight `read_message` returns `Aborted`.
    pub async fn close(&self) {
        self.abort();
        let writer = self.writer.lock().await.take();
        if let Some(mut w) = writer {
            if let Err(e) = w.shutdown().await {
                debug!(peer = %self.remote, error = %e, "shutdown on close failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    /// Loopback address nothing is listening on right now.
    pub(crate) fn free_addr() -> SocketAddr {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap()
    }

    /// Connected loopback pair: (accepted side, dialing side).
    pub(crate) async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (dialed, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (accepted.unwrap().0, dialed.unwrap())
    }

    #[tokio::test]
    async fn message_crosses_the_link() {
        let (a, b) = loopback_pair().await;
        let a = Connection::new(a).unwrap();
        let b = Connection::new(b).unwrap();
        b.write_message(&Message::DiceRoll { value: 4 }).await;
        assert_eq!(a.read_message().await.unwrap(), Message::DiceRoll { value: 4 });
    }

    #[tokio::test]
    async fn peer_close_reads_as_peer_closed() {
        let (a, b) = loopback_pair().await;
        let a = Connection::new(a).unwrap();
        let b = Connection::new(b).unwrap();
        b.close().await;
        drop(b);
        assert!(matches!(
            a.read_message().await,
            Err(ConnectionError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn garbage_reads_as_peer_closed() {
        let (a, mut b) = loopback_pair().await;
        let a = Connection::new(a).unwrap();
        b.write_all(b"HELLO").await.unwrap();
        assert!(matches!(
            a.read_message().await,
            Err(ConnectionError::PeerClosed)
        ));
    }

    #[tokio::test]
    async fn close_unblocks_pending_read() {
        let (a, _b) = loopback_pair().await;
        let a = std::sync::Arc::new(Connection::new(a).unwrap());
        let reader = a.clone();
        let pending = tokio::spawn(async move { reader.read_message().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        a.close().await;
        let res = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("read should observe close")
            .unwrap();
        assert!(matches!(res, Err(ConnectionError::Aborted)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_writes_become_noops() {
        let (a, _b) = loopback_pair().await;
        let a = Connection::new(a).unwrap();
        a.close().await;
        a.close().await;
        assert!(a.is_closed());
        a.write_message(&Message::SwitchAck).await;
        assert!(matches!(a.read_message().await, Err(ConnectionError::Aborted)));
    }

    #[tokio::test]
    async fn close_unblocks_write_to_a_stalled_peer() {
        let (a, _stalled) = loopback_pair().await;
        let a = std::sync::Arc::new(Connection::new(a).unwrap());
        {
            // Fill the send buffer: the peer never reads.
            let mut guard = a.writer.lock().await;
            let w = guard.as_mut().unwrap();
            let chunk = vec![0u8; 64 * 1024];
            while tokio::time::timeout(Duration::from_millis(200), w.write_all(&chunk))
                .await
                .is_ok()
            {}
        }
        let writer = a.clone();
        let pending =
            tokio::spawn(async move { writer.write_message(&Message::DiceRoll { value: 2 }).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());
        tokio::time::timeout(Duration::from_secs(5), a.close())
            .await
            .expect("close should not wait on the stalled write");
        tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("write should observe close")
            .unwrap();
    }

    #[tokio::test]
    async fn abort_unblocks_pending_read() {
        let (a, _b) = loopback_pair().await;
        let a = std::sync::Arc::new(Connection::new(a).unwrap());
        let reader = a.clone();
        let pending = tokio::spawn(async move { reader.read_message().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        a.abort();
        let res = tokio::time::timeout(Duration::from_secs(5), pending)
            .await
            .expect("read should observe abort")
            .unwrap();
        assert!(matches!(res, Err(ConnectionError::Aborted)));
        assert!(a.is_closed());
    }
}
