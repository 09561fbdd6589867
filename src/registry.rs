use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::connection::{Connection, ConnectionId};

/// The shared set of live connections, the only state shared across
/// handling tasks.
///
/// All access goes through `add` / `remove` / `snapshot`; nothing iterates
/// the live map directly. The guard is a std mutex because it is never held
/// across an await — every operation copies in or out and releases it.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<BTreeMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection and marks it open. A connection belongs here
    /// exactly while its handling task is alive.
    pub fn add(&self, connection: Arc<Connection>) {
        connection.mark_open();
        self.guard().insert(connection.id(), connection);
    }

    /// Removes a connection by id. Removing an absent id is a no-op, so a
    /// teardown racing another teardown is harmless.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.guard().remove(&id)
    }

    /// Point-in-time copy of the live set, ordered by connection id. Safe to
    /// iterate while the registry mutates underneath; a torn-down member of
    /// the snapshot simply fails its send and is skipped by the caller.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.guard().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, Arc<Connection>>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    struct TestConnection {
        connection: Arc<Connection>,
        _reader: tokio::net::tcp::OwnedReadHalf,
        _client: TcpStream,
    }

    async fn test_connection(id: ConnectionId) -> TestConnection {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (accepted, peer) = listener.accept().await.expect("accept");
        let (connection, reader) = Connection::accept(accepted, id, peer);
        TestConnection {
            connection,
            _reader: reader,
            _client: client,
        }
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let member = test_connection(1).await;
        registry.add(Arc::clone(&member.connection));

        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(registry.remove(42).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn snapshot_is_ordered_by_id_regardless_of_insertion() {
        let registry = ConnectionRegistry::new();
        let third = test_connection(3).await;
        let first = test_connection(1).await;
        let second = test_connection(2).await;

        registry.add(Arc::clone(&third.connection));
        registry.add(Arc::clone(&first.connection));
        registry.add(Arc::clone(&second.connection));

        let ids: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|connection| connection.id())
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn snapshot_is_unaffected_by_later_removal() {
        let registry = ConnectionRegistry::new();
        let first = test_connection(1).await;
        let second = test_connection(2).await;
        registry.add(Arc::clone(&first.connection));
        registry.add(Arc::clone(&second.connection));

        let snapshot = registry.snapshot();
        registry.remove(2);

        assert_eq!(snapshot.len(), 2);
        assert_eq!(registry.len(), 1);
    }
}
