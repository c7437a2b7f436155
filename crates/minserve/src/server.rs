// Copyright 2024-2026 Piping Relay Developers
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`Server`]-related things

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};

use crate::response::GenericResponse;

/// Errors that can occur while serving a connection
#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    /// Indicates the server was unable to accept a connection.
    #[error("could not accept connection: {0}")]
    Accept(#[from] std::io::Error),
    /// Indicates the server shed a connection because too many were already open.
    #[error("too overloaded to serve {peer_addr}")]
    Overloaded {
        /// Connection's peer IP address and port
        peer_addr: SocketAddr,
    },
    /// Indicates the server encountered an error while serving HTTP on a connection.
    #[error("error serving {peer_addr} connection: {source}")]
    Http {
        /// Connection's peer IP address and port
        peer_addr: SocketAddr,
        /// Underlying cause
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Serves HTTP/1.1 and HTTP/2 connections while allowing for graceful shutdowns.
pub struct Server {
    open_connections: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Create a new [`Server`].
    ///
    /// `max_connections` is the maximum number of simultaneous connections that may be
    /// handled across all [`serve`](Self::serve) calls before new arrivals are shed
    /// with a minimal 503.
    pub fn new(max_connections: usize) -> Self {
        let open_connections = Arc::new(Semaphore::new(max_connections));
        let (shutdown, _) = watch::channel(false);
        Self {
            open_connections,
            shutdown,
        }
    }

    /// Serve incoming `connections` with `responder`.
    ///
    /// `connections` is a stream of connection-like objects, and `responder` maps HTTP
    /// requests to responses. Each connection is handled in its own asynchronous task;
    /// [`serve`](Self::serve) resolves after [`graceful_shutdown`](Self::graceful_shutdown)
    /// has been called (or `connections` is exhausted) and all of its connections have
    /// finished.
    pub async fn serve<P, C, R, F>(&self, connections: P, responder: R)
    where
        P: Stream<Item = std::io::Result<(C, SocketAddr)>>,
        C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        R: Fn(Request<Incoming>, SocketAddr) -> F + Clone + Send + Sync + 'static,
        F: Future<Output = GenericResponse> + Send,
    {
        // This subscription is what keeps graceful_shutdown from returning, so it must
        // be created before anything else and dropped last.
        let mut shutdown_receiver = self.shutdown.subscribe();
        let mut was_shutdown = pin!(shutdown_receiver.wait_for(|&done| done).map(|_| None));

        let tasks = TaskSet::new();

        info!("Started serving");

        // scope is only to force `connections` to be dropped
        {
            let mut connections = pin!(connections);
            loop {
                let accepted = select! {
                    // biased so no new connection is handled once shut down
                    biased;
                    x = &mut was_shutdown => x,
                    x = connections.next() => x,
                };
                let Some(accepted) = accepted else { break };
                let (connection, peer_addr) = match accepted {
                    Ok(a) => a,
                    Err(err) => {
                        let err = ConnectionError::from(err);
                        error!("Couldn't accept connection: {err}");
                        continue;
                    }
                };

                let span = info_span!("connection", addr = %peer_addr);
                let permit = match self.open_connections.clone().try_acquire_owned() {
                    Ok(p) => p,
                    Err(_) => {
                        let err = ConnectionError::Overloaded { peer_addr };
                        warn!(parent: &span, "{err}; shedding with a minimal 503.");
                        tokio::task::spawn(
                            tasks
                                .track(async move {
                                    let _ = shed_connection(connection).await;
                                })
                                .instrument(span),
                        );
                        continue;
                    }
                };

                let responder = responder.clone();
                let mut shutdown_receiver = self.shutdown.subscribe();
                let connection_task = async move {
                    info!("Connected.");
                    let _permit = permit;

                    let respond = move |request: Request<Incoming>| {
                        let responder = responder.clone();
                        async move {
                            info!("Request: {} {}", request.method(), request.uri());
                            let response = responder(request, peer_addr).await;
                            info!("Response: {}", response.status());
                            Ok::<_, Infallible>(response)
                        }
                    };

                    let mut http = auto::Builder::new(TokioExecutor::new());
                    // A FIN is the only signal a vanished client ever sends. Treating
                    // half-closed connections as gone is what lets pending handlers be
                    // dropped (and their state cleaned up) the moment a client leaves.
                    http.http1().half_close(false);
                    let connection =
                        http.serve_connection(TokioIo::new(connection), service_fn(respond));

                    // Polling the connection and shutting it down both need exclusive
                    // access, so the two have to share a poll_fn.
                    let mut connection = pin!(connection);
                    let mut want_shutdown =
                        pin!(shutdown_receiver.wait_for(|&done| done).map(|_| ()).fuse());
                    let result = std::future::poll_fn(|cx| {
                        if want_shutdown.as_mut().poll(cx).is_ready() {
                            connection.as_mut().graceful_shutdown();
                        }
                        connection.as_mut().poll(cx)
                    })
                    .await;

                    if let Err(source) = result {
                        let err = ConnectionError::Http { peer_addr, source };
                        error!("Error serving: {err}");
                    }
                    info!("Disconnected.");
                };
                tokio::task::spawn(tasks.track(connection_task).instrument(span));
            }
        }

        tasks.drain().await;
        info!("Stopped serving");
    }

    /// Gracefully shuts down the server.
    ///
    /// New calls to [`serve`](Self::serve) resolve immediately without handling
    /// connections. Existing calls drop their stream of connections, then wait for
    /// their ongoing connections to finish before resolving; each connection
    /// terminates as soon as its current request finishes (idle connections terminate
    /// immediately).
    ///
    /// # Cancel Safety
    ///
    /// After this has been polled, canceling does not stop the shutdown.
    pub async fn graceful_shutdown(&self) {
        self.shutdown.send_replace(true);
        // Ensures all serve() calls have exited, not just finished their requests.
        self.shutdown.closed().await;
    }
}

/// Cheaply responds to a connection with a minimal 503.
///
/// Skips request parsing entirely so a slow or hostile client cannot tie up
/// resources while the server is already overloaded.
async fn shed_connection(mut connection: impl AsyncWriteExt + Unpin) -> std::io::Result<()> {
    let write_response = async {
        let msg = b"HTTP/1.1 503 Service Unavailable\r\n\
                    Content-Type: text/plain; charset=utf-8\r\n\
                    Content-Length: 21\r\n\
                    \r\n\
                    Too many connections\n";
        connection.write_all(msg).await?;
        connection.shutdown().await
    };
    select! {
        result = write_response => result,
        _ = sleep(Duration::from_secs(1)) => Err(std::io::ErrorKind::TimedOut.into()),
    }
}

/// Tracks connection tasks so [`Server::serve`] can wait for all of them to finish.
///
/// Each tracked task holds a clone of an mpsc sender and never sends on it; once the
/// [`TaskSet`]'s own clone is dropped, the receiver resolves exactly when no tracked
/// task remains. Blocking on a closing mpsc channel avoids collecting `JoinHandle`s.
struct TaskSet {
    alive: Option<mpsc::Sender<()>>,
    drained: mpsc::Receiver<()>,
}

impl TaskSet {
    fn new() -> Self {
        let (alive, drained) = mpsc::channel(1);
        Self {
            alive: Some(alive),
            drained,
        }
    }

    /// Wrap `task` so that [`drain`](Self::drain) waits for it.
    fn track<T: Send>(
        &self,
        task: impl Future<Output = T> + Send + 'static,
    ) -> impl Future<Output = T> + Send + 'static {
        let alive = self
            .alive
            .clone()
            .expect("TaskSet must not track tasks while draining");
        async move {
            let _alive = alive;
            task.await
        }
    }

    /// Resolve once every tracked task has finished.
    async fn drain(mut self) {
        self.alive = None;
        assert!(self.drained.recv().await.is_none());
    }
}
