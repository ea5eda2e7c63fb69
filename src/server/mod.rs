//! Tokio-based WebSocket server for a [`Dispatch`] implementation.
//!
//! [`WsRouteServer`] accepts TCP connections, upgrades them to WebSockets
//! against the shared [`ConnectionManager`] and drives each one through
//! [`run_connection`](crate::connection::run_connection). Shutting down
//! stops the accept loop, cancels every connection's lifetime and waits for
//! the connection tasks to finish.

mod accept;
mod backoff;
mod config;
mod error;
mod handshake;

use std::{future::Future, io, net::SocketAddr, sync::Arc, time::Duration};

use accept::{AcceptLoopOptions, accept_loop};
pub use backoff::BackoffConfig;
pub use config::ServerConfig;
pub use error::ServerError;
use log::{debug, info};
use tokio::{net::TcpListener, select, signal, time::interval};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    connection::ConnectionDeps,
    dispatcher::Dispatch,
    reassembler::buffer_pool,
    session::ConnectionManager,
};

const MIN_PRUNE_INTERVAL: Duration = Duration::from_secs(1);

/// WebSocket server routing every inbound message through `D`.
pub struct WsRouteServer<D> {
    listener: Arc<TcpListener>,
    config: ServerConfig,
    deps: ConnectionDeps<D>,
    shutdown: CancellationToken,
}

impl<D> std::fmt::Debug for WsRouteServer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsRouteServer")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<D: Dispatch> WsRouteServer<D> {
    /// Validate `config` and bind its listener.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for invalid settings and
    /// [`ServerError::Bind`] if the address cannot be bound.
    pub async fn bind(config: ServerConfig, dispatcher: Arc<D>) -> Result<Self, ServerError> {
        let config = config.validate()?;
        let listener = TcpListener::bind(config.bind)
            .await
            .map_err(ServerError::Bind)?;
        let shutdown = CancellationToken::new();
        let deps = ConnectionDeps {
            manager: Arc::new(ConnectionManager::with_shutdown(
                config.token_ttl,
                shutdown.clone(),
            )),
            dispatcher,
            pool: buffer_pool(
                config.pool_capacity.get(),
                config.processing.buffer_baseline(),
            ),
            config: config.processing,
        };
        Ok(Self {
            listener: Arc::new(listener),
            config,
            deps,
            shutdown,
        })
    }

    /// Address the listener is bound to.
    ///
    /// # Errors
    ///
    /// Propagates the socket's error.
    pub fn local_addr(&self) -> io::Result<SocketAddr> { self.listener.local_addr() }

    /// Manager issuing handshake tokens for this server.
    ///
    /// Calling [`ConnectionManager::shutdown`] on it stops the server.
    #[must_use]
    pub fn manager(&self) -> &Arc<ConnectionManager> { &self.deps.manager }

    #[must_use]
    pub fn config(&self) -> &ServerConfig { &self.config }

    /// Run the server until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept failures are retried.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_with_shutdown(async {
            let _ = signal::ctrl_c().await;
        })
        .await
    }

    /// Run the server until `signal` resolves or the manager shuts down.
    ///
    /// ```no_run
    /// use std::sync::Arc;
    ///
    /// use tokio::sync::oneshot;
    /// use wsroute::{
    ///     Router,
    ///     server::{ServerConfig, WsRouteServer},
    /// };
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let dispatcher = Arc::new(Router::builder().build());
    /// let server = WsRouteServer::bind(ServerConfig::default(), dispatcher).await?;
    ///
    /// let (tx, rx) = oneshot::channel::<()>();
    /// let handle = tokio::spawn(server.run_with_shutdown(async {
    ///     let _ = rx.await;
    /// }));
    /// let _ = tx.send(());
    /// handle.await??;
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Currently infallible once bound; accept failures are retried.
    pub async fn run_with_shutdown<S>(self, signal: S) -> Result<(), ServerError>
    where
        S: Future<Output = ()> + Send,
    {
        let Self {
            listener,
            config,
            deps,
            shutdown,
        } = self;
        let tracker = TaskTracker::new();
        let local_addr = listener.local_addr().ok();

        tracker.spawn(accept_loop(
            listener,
            deps.clone(),
            AcceptLoopOptions {
                shutdown: shutdown.clone(),
                tracker: tracker.clone(),
                backoff: config.backoff,
                require_token: config.require_token,
            },
        ));
        tracker.spawn(prune_tokens(
            Arc::clone(&deps.manager),
            config.token_ttl.max(MIN_PRUNE_INTERVAL),
            shutdown.clone(),
        ));
        info!("server listening: local_addr={local_addr:?}");

        select! {
            () = signal => {},
            () = shutdown.cancelled() => {},
        }
        deps.manager.shutdown();

        tracker.close();
        tracker.wait().await;
        deps.pool.dispose();
        info!("server stopped: local_addr={local_addr:?}");
        Ok(())
    }
}

async fn prune_tokens(manager: Arc<ConnectionManager>, every: Duration, shutdown: CancellationToken) {
    let mut ticks = interval(every);
    loop {
        select! {
            biased;

            () = shutdown.cancelled() => break,
            _ = ticks.tick() => {
                let pruned = manager.prune_expired();
                if pruned > 0 {
                    debug!("expired handshake tokens pruned: count={pruned}");
                }
            }
        }
    }
}
