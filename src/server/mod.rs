//! Async TCP server using Tokio.
//!
//! Accepts TCP connections and dispatches HTTP/1.1 requests to a handler
//! function, with keep-alive and pipelining. [`Server::run_until`] stops
//! accepting when its shutdown future resolves, asks open connections to close
//! after their current request, and waits for them up to a grace period.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::http::request::{Request, RequestError};
use crate::http::{Response, StatusCode};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Largest request (headers plus body) buffered before answering 413.
const MAX_REQUEST_SIZE: usize = 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// The HTTP listener fronting the task API.
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_grace: Duration,
}

impl Server {
    /// Binds the server to the given TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = listener.local_addr()?;
        Ok(Self {
            listener,
            local_addr,
            shutdown_grace: Duration::from_secs(30),
        })
    }

    /// How long [`run_until`](Self::run_until) waits for open connections
    /// after shutdown before dropping them.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until `shutdown` resolves, then drains open connections.
    ///
    /// Accept errors are logged and do not stop the server.
    pub async fn run_until<H, F, S>(self, handler: H, shutdown: S) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
        S: Future<Output = ()>,
    {
        let handler = Arc::new(handler);
        let (closing_tx, closing_rx) = watch::channel(false);
        let mut connections = JoinSet::new();
        tokio::pin!(shutdown);

        info!(address = %self.local_addr, "listening");

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                            continue;
                        }
                    };
                    debug!(peer = %peer_addr, "connection accepted");
                    let handler = Arc::clone(&handler);
                    let closing = closing_rx.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, peer_addr, handler, closing).await {
                            warn!(peer = %peer_addr, error = %e, "connection closed with error");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        info!(open = connections.len(), "listener closed, draining connections");
        closing_tx.send_replace(true);

        let drained = tokio::time::timeout(self.shutdown_grace, async {
            while connections.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                open = connections.len(),
                grace = ?self.shutdown_grace,
                "grace period elapsed, dropping connections"
            );
            connections.shutdown().await;
        }
        Ok(())
    }
}

/// Serves one connection: answers every complete buffered request, then
/// reads more. Exits on peer close, `Connection: close`, a protocol error,
/// or server shutdown while idle.
async fn handle_connection<H, F>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    handler: Arc<H>,
    mut closing: watch::Receiver<bool>,
) -> Result<(), std::io::Error>
where
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        loop {
            let request = match Request::parse(&buf) {
                Ok(request) => request,
                Err(RequestError::Incomplete) => break,
                Err(e) => {
                    warn!(peer = %peer_addr, error = %e, "bad request, sending 400");
                    let response =
                        Response::text(StatusCode::BadRequest, format!("Bad Request: {e}"))
                            .keep_alive(false);
                    stream.write_all(&response.into_bytes()).await?;
                    return Ok(());
                }
            };

            let consumed = request.encoded_len();
            let shutting_down = *closing.borrow();
            let keep_alive = request.is_keep_alive() && !shutting_down;

            let response = handler(request).await.keep_alive(keep_alive);
            stream.write_all(&response.into_bytes()).await?;
            stream.flush().await?;
            buf.advance(consumed);

            if !keep_alive {
                debug!(peer = %peer_addr, "closing connection");
                return Ok(());
            }
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer = %peer_addr, "request too large, sending 413");
            let response =
                Response::text(StatusCode::PayloadTooLarge, "Request entity too large")
                    .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            return Ok(());
        }

        let idle = buf.is_empty();
        let bytes_read = tokio::select! {
            read = stream.read_buf(&mut buf) => read?,
            _ = async { let _ = closing.wait_for(|c| *c).await; }, if idle => {
                debug!(peer = %peer_addr, "server shutting down, closing idle connection");
                return Ok(());
            }
        };

        if bytes_read == 0 {
            debug!(peer = %peer_addr, "connection closed by peer");
            return Ok(());
        }
    }
}
