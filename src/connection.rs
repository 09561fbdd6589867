use std::{
    net::SocketAddr,
    sync::{Arc, Mutex as StateLock, MutexGuard},
    time::Duration,
};

use tokio::{
    io::{self, AsyncWriteExt},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, Notify},
    time::timeout,
};
use tracing::debug;

use crate::registry::ConnectionRegistry;

pub type ConnectionId = u64;

/// How long one outbound write may stall before the recipient is dropped.
///
/// This is the write policy: bounded patience, then teardown. The runtime
/// already absorbs transient backpressure by suspending the write, so a
/// write that exceeds this bound is treated as a dead or hopelessly slow
/// peer rather than retried indefinitely.
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a connection.
///
/// `Connecting` on accept, `Open` once registered, `Closing` while being
/// torn down, `Closed` after the registry entry is gone and the transport
/// released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// The shared, writable side of one client connection.
///
/// The read half and framing state stay with the handling task; everything a
/// broadcast needs (identity, peer address, serialized write access) lives
/// here behind an `Arc` so the registry can hand it out safely.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    state: StateLock<ConnectionState>,
    close_signal: Notify,
}

impl Connection {
    /// Splits an accepted stream into the shared connection handle and the
    /// read half for the handling task.
    pub fn accept(
        stream: TcpStream,
        id: ConnectionId,
        peer: SocketAddr,
    ) -> (Arc<Self>, OwnedReadHalf) {
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Self {
            id,
            peer,
            writer: Mutex::new(writer),
            state: StateLock::new(ConnectionState::Connecting),
            close_signal: Notify::new(),
        });
        (connection, reader)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_guard()
    }

    pub(crate) fn mark_open(&self) {
        let mut state = self.state_guard();
        if *state == ConnectionState::Connecting {
            *state = ConnectionState::Open;
        }
    }

    /// Writes one already-framed message, bounded by [`WRITE_TIMEOUT`].
    ///
    /// A write that stalls past the bound yields `TimedOut`; callers treat
    /// any error here as fatal for this connection and tear it down.
    pub async fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        let write = async {
            writer.write_all(frame).await?;
            writer.flush().await
        };
        match timeout(WRITE_TIMEOUT, write).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "outbound write stalled past the write bound",
            )),
        }
    }

    /// Tears the connection down. Idempotent: the first caller wins and
    /// later calls are no-ops.
    ///
    /// Ordering matters: the registry entry is removed before the transport
    /// is released, so a concurrent broadcast snapshot can never address a
    /// dead handle, and the handling task is woken so the registry invariant
    /// (registered iff the handler is active) is restored promptly.
    pub async fn close(&self, registry: &ConnectionRegistry) {
        if !self.begin_close() {
            return;
        }

        registry.remove(self.id);

        let mut writer = self.writer.lock().await;
        if let Err(error) = writer.shutdown().await {
            debug!(peer = %self.peer, ?error, "transport shutdown failed");
        }
        drop(writer);

        *self.state_guard() = ConnectionState::Closed;
        self.close_signal.notify_one();
    }

    /// Resolves once the connection has left the open states. Used by the
    /// handling task to notice a teardown initiated by the broadcaster.
    pub async fn closed(&self) {
        if matches!(
            self.state(),
            ConnectionState::Closing | ConnectionState::Closed
        ) {
            return;
        }
        // notify_one stores a permit, so a close racing this await is not lost
        self.close_signal.notified().await;
    }

    fn begin_close(&self) -> bool {
        let mut state = self.state_guard();
        match *state {
            ConnectionState::Connecting | ConnectionState::Open => {
                *state = ConnectionState::Closing;
                true
            }
            ConnectionState::Closing | ConnectionState::Closed => false,
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, ConnectionState> {
        // no code path panics while holding the guard; recover rather than poison-propagate
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use tokio::{
        net::{TcpListener, TcpStream},
        time::timeout,
    };

    use super::*;

    async fn socket_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (accepted, peer) = listener.accept().await.expect("accept");
        (accepted, client, peer)
    }

    #[tokio::test]
    async fn lifecycle_runs_connecting_to_closed() {
        let (accepted, _client, peer) = socket_pair().await;
        let registry = ConnectionRegistry::new();
        let (connection, _reader) = Connection::accept(accepted, 1, peer);

        assert_eq!(connection.state(), ConnectionState::Connecting);

        registry.add(Arc::clone(&connection));
        assert_eq!(connection.state(), ConnectionState::Open);
        assert_eq!(registry.len(), 1);

        connection.close(&registry).await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(registry.len(), 0);

        // second close is a no-op
        connection.close(&registry).await;
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn closed_wakes_a_waiting_task() {
        let (accepted, _client, peer) = socket_pair().await;
        let registry = ConnectionRegistry::new();
        let (connection, _reader) = Connection::accept(accepted, 7, peer);
        registry.add(Arc::clone(&connection));

        let waiter = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move { connection.closed().await })
        };

        connection.close(&registry).await;
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake after close")
            .expect("waiter task should not panic");
    }

    #[tokio::test]
    async fn send_frame_reaches_the_peer() {
        let (accepted, mut client, peer) = socket_pair().await;
        let (connection, _reader) = Connection::accept(accepted, 3, peer);

        connection.send_frame(b"ping<EOF>").await.expect("send");

        use tokio::io::AsyncReadExt;
        let mut buffer = [0u8; 16];
        let bytes_read = client.read(&mut buffer).await.expect("read");
        assert_eq!(&buffer[..bytes_read], b"ping<EOF>");
    }
}
