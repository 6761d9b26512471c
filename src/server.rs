//! Tokio adapter for driving connections over async streams
//!
//! Inbound messages are delivered on a channel (one `Bytes` per decoded data
//! frame) and outbound messages are taken from another, so all of a
//! connection's state stays on the task that owns it.
//!
//! # Example
//!
//! ```ignore
//! use ws_upgrade::{Config, WebSocketServer};
//! use tokio::net::TcpListener;
//!
//! let listener = TcpListener::bind("127.0.0.1:9000").await?;
//! let server = WebSocketServer::new(Config::default());
//!
//! loop {
//!     let (stream, _) = listener.accept().await?;
//!     let mut conn = server.accept(stream);
//!     tokio::spawn(async move {
//!         while let Some(msg) = conn.recv().await {
//!             conn.send(msg);
//!         }
//!     });
//! }
//! ```

use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::Config;
use crate::connection::{Connection, Phase, Transport};
use crate::error::{Error, Result};

/// Receive buffer size for socket reads (64KB)
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Transport that queues writes until the driver flushes them to the stream
#[derive(Debug, Default)]
struct Outbox {
    pending: BytesMut,
    closed: bool,
}

impl Transport for Outbox {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionClosed);
        }
        self.pending.extend_from_slice(data);
        Ok(())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Drive one connection over `stream` until either side closes it.
///
/// Every decoded data frame is sent on `inbound`; every payload received on
/// `outbound` is written as a text frame once the handshake is done.
/// Payloads queued before that are held back until the connection opens.
/// Dropping the `outbound` sender after the handshake closes the connection.
pub async fn serve_stream<S>(
    mut stream: S,
    config: Config,
    inbound: UnboundedSender<Bytes>,
    mut outbound: UnboundedReceiver<Bytes>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = Connection::new(Outbox::default(), config);
    conn.on_message(move |payload| {
        if inbound.send(payload).is_err() {
            trace!("inbound receiver dropped, payload discarded");
        }
    });

    let mut buf = BytesMut::with_capacity(RECV_BUFFER_SIZE);

    loop {
        tokio::select! {
            read = stream.read_buf(&mut buf) => {
                if read? == 0 {
                    debug!(phase = ?conn.phase(), "peer closed stream");
                    conn.close();
                    return Ok(());
                }

                let chunk = buf.split();
                let result = conn.on_data(&chunk);
                let flushed = flush(&mut stream, &mut conn).await;

                if let Err(e) = result.and(flushed) {
                    return Err(abort(&mut stream, &mut conn, e).await);
                }
            }
            msg = outbound.recv(), if conn.is_open() => {
                match msg {
                    Some(payload) => {
                        let result = match conn.send(&payload) {
                            Ok(()) => flush(&mut stream, &mut conn).await,
                            Err(e) => Err(e),
                        };
                        if let Err(e) = result {
                            return Err(abort(&mut stream, &mut conn, e).await);
                        }
                    }
                    None => {
                        debug!("handle dropped, closing connection");
                        conn.close();
                        let _ = stream.shutdown().await;
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Close the connection and its stream after a failure, handing back `err`
async fn abort<S>(stream: &mut S, conn: &mut Connection<Outbox>, err: Error) -> Error
where
    S: AsyncWrite + Unpin,
{
    // a connection that failed on its own has already logged and closed
    if conn.phase() != Phase::Closed {
        warn!(error = %err, phase = ?conn.phase(), "closing connection after stream error");
        conn.close();
    }
    let _ = stream.shutdown().await;
    err
}

async fn flush<S>(stream: &mut S, conn: &mut Connection<Outbox>) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let Some(outbox) = conn.transport_mut() else {
        return Ok(());
    };
    if outbox.pending.is_empty() {
        return Ok(());
    }

    let data = outbox.pending.split();
    stream.write_all(&data).await?;
    stream.flush().await?;
    Ok(())
}

/// Accepts streams and spawns a driver task for each
#[derive(Debug, Clone, Default)]
pub struct WebSocketServer {
    config: Config,
}

impl WebSocketServer {
    /// Create a new server with the given configuration
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Get the server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Take ownership of an accepted stream and start serving it
    ///
    /// Must be called from within a Tokio runtime.
    pub fn accept<S>(&self, stream: S) -> ConnectionHandle
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let result = serve_stream(stream, config, inbound_tx, outbound_rx).await;
            if let Err(e) = &result {
                warn!(error = %e, "connection ended with error");
            }
            result
        });

        ConnectionHandle {
            outbound: outbound_tx,
            inbound: inbound_rx,
            task,
        }
    }
}

/// Application side of a served connection
#[derive(Debug)]
pub struct ConnectionHandle {
    outbound: UnboundedSender<Bytes>,
    inbound: UnboundedReceiver<Bytes>,
    task: JoinHandle<Result<()>>,
}

impl ConnectionHandle {
    /// Queue a text message
    ///
    /// Returns `false` if the connection has already ended.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        self.outbound.send(payload.into()).is_ok()
    }

    /// Next inbound message, or `None` once the connection has ended
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    /// Whether the driver task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Close the connection (if open) and wait for the driver to exit
    pub async fn join(self) -> Result<()> {
        let ConnectionHandle {
            outbound,
            inbound,
            task,
        } = self;
        drop(outbound);
        drop(inbound);

        match task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Io(io::Error::other(e))),
        }
    }
}
