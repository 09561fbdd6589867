use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::Result;
use tokio::{
    io::{self, AsyncReadExt},
    net::{TcpListener, TcpStream, tcp::OwnedReadHalf},
    select,
    sync::watch,
};
use tracing::{info, warn};

use crate::{
    broadcast::Broadcaster,
    connection::Connection,
    frame::Framer,
    registry::ConnectionRegistry,
};

const READ_BUFFER_SIZE: usize = 1024;

/// The accept/dispatch loop: accepts TCP connections and spawns one
/// handling task per client. Each task reads, feeds the framer, and hands
/// complete messages to the broadcaster until its connection closes.
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            listener,
            state: Arc::new(ServerState {
                broadcaster: Broadcaster::new(Arc::clone(&registry)),
                registry,
                next_id: AtomicU64::new(1),
                shutdown_rx,
            }),
            shutdown_tx,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Handle on the live connection set, for observing membership from
    /// outside the serve loop.
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.state.registry)
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            state,
            shutdown_tx,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    handle_shutdown(&state, &shutdown_tx).await;
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &state);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

struct ServerState {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    next_id: AtomicU64,
    shutdown_rx: watch::Receiver<bool>,
}

async fn handle_shutdown(state: &Arc<ServerState>, shutdown_tx: &watch::Sender<bool>) {
    info!("server shutting down");
    // wake every handling task, then close what is still registered
    let _ = shutdown_tx.send(true);
    for connection in state.registry.snapshot() {
        connection.close(&state.registry).await;
    }
}

fn handle_accept_result(
    result: io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<ServerState>,
) {
    match result {
        Ok((stream, peer)) => spawn_connection_handler(stream, peer, state),
        // accept failures never terminate the server
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, state: &Arc<ServerState>) {
    let state = Arc::clone(state);
    tokio::spawn(async move {
        if let Err(err) = handle_connection(stream, peer, state).await {
            warn!(peer = %peer, error = ?err, "client connection closed with error");
        }
    });
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<()> {
    let id = state.next_id.fetch_add(1, Ordering::Relaxed);
    let (connection, mut reader) = Connection::accept(stream, id, peer);
    state.registry.add(Arc::clone(&connection));
    info!(peer = %peer, id, "client connected");

    let result = run_session(&state, &connection, &mut reader).await;

    connection.close(&state.registry).await;
    info!(peer = %peer, id, "client disconnected");
    result
}

/// One connection's read → frame → broadcast loop.
///
/// Messages from this sender are broadcast in extraction order because each
/// broadcast completes before the next read. The loop ends on peer EOF,
/// reset, server shutdown, or a teardown initiated by a failed broadcast to
/// this connection.
async fn run_session(
    state: &ServerState,
    connection: &Arc<Connection>,
    reader: &mut OwnedReadHalf,
) -> Result<()> {
    let mut framer = Framer::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut shutdown_rx = state.shutdown_rx.clone();
    // a session spawned while shutdown is already in flight must not linger
    if *shutdown_rx.borrow_and_update() {
        return Ok(());
    }

    loop {
        select! {
            read_result = reader.read(&mut buffer) => {
                match read_result {
                    // orderly peer close
                    Ok(0) => break,
                    Ok(bytes_read) => {
                        for payload in framer.push(&buffer[..bytes_read]) {
                            state.broadcaster.broadcast(&payload, connection).await;
                        }
                    }
                    // an abrupt peer termination is the same as a disconnect
                    Err(error) if is_disconnect(&error) => break,
                    Err(error) => return Err(error.into()),
                }
            }
            _ = connection.closed() => break,
            _ = shutdown_rx.changed() => break,
        }
    }

    Ok(())
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
