//! Accept loop and per-connection task spawning.

use std::{io, net::SocketAddr, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use log::{error, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    time::sleep,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{BackoffConfig, handshake};
use crate::{
    connection::{ConnectionDeps, run_connection},
    dispatcher::Dispatch,
    transport::TungsteniteSource,
};

/// Source of incoming TCP connections.
///
/// Dropping a pending `accept()` future must not leak resources.
#[async_trait]
pub(super) trait AcceptListener: Send + Sync {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

#[async_trait]
impl AcceptListener for TcpListener {
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }

    fn local_addr(&self) -> io::Result<SocketAddr> { TcpListener::local_addr(self) }
}

#[derive(Clone, Debug)]
pub(super) struct AcceptLoopOptions {
    pub shutdown: CancellationToken,
    pub tracker: TaskTracker,
    pub backoff: BackoffConfig,
    pub require_token: bool,
}

/// Accept connections until `shutdown` fires.
///
/// Each accepted stream is upgraded and driven on its own task registered
/// with the tracker. Failed accepts are retried after an exponentially
/// growing delay.
pub(super) async fn accept_loop<L, D>(
    listener: Arc<L>,
    deps: ConnectionDeps<D>,
    options: AcceptLoopOptions,
) where
    L: AcceptListener + 'static,
    D: Dispatch,
{
    let backoff = options.backoff.normalized();
    let mut delay = backoff.initial_delay;
    loop {
        select! {
            biased;

            () = options.shutdown.cancelled() => break,
            res = listener.accept() => match res {
                Ok((stream, peer_addr)) => {
                    spawn_connection_task(stream, Some(peer_addr), deps.clone(), &options);
                    delay = backoff.initial_delay;
                }
                Err(e) => {
                    let local_addr = listener.local_addr().ok();
                    warn!("accept error: error={e:?}, local_addr={local_addr:?}");
                    sleep(delay).await;
                    delay = backoff.next_delay(delay);
                }
            },
        }
    }
}

/// Spawn a task serving one TCP stream, logging and discarding any panic.
fn spawn_connection_task<D: Dispatch>(
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    deps: ConnectionDeps<D>,
    options: &AcceptLoopOptions,
) {
    let shutdown = options.shutdown.clone();
    let require_token = options.require_token;
    options.tracker.spawn(async move {
        let fut = AssertUnwindSafe(serve_stream(stream, peer_addr, deps, require_token, shutdown))
            .catch_unwind();

        if let Err(panic) = fut.await {
            crate::metrics::inc_connection_panics();
            let panic_msg = crate::panic::format_panic(panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("connection task panicked: panic={panic_msg}, peer_addr={peer_addr:?}");
            tracing::error!(panic = %panic_msg, ?peer_addr, "connection task panicked");
        }
    });
}

async fn serve_stream<D: Dispatch>(
    stream: TcpStream,
    peer_addr: Option<SocketAddr>,
    deps: ConnectionDeps<D>,
    require_token: bool,
    shutdown: CancellationToken,
) {
    let Some((ws, info)) =
        handshake::upgrade(stream, peer_addr, &deps.manager, require_token).await
    else {
        return;
    };
    let (mut sink, stream) = ws.split();

    // Errors are logged by `run_connection`.
    let _ = run_connection(TungsteniteSource::new(stream), info, &deps, &shutdown).await;

    if let Err(e) = sink.close().await {
        warn!("websocket close failed: peer_addr={peer_addr:?}, error={e}");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        net::SocketAddr,
        sync::{
            Arc,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use tokio::net::TcpStream;
    use tokio_util::{sync::CancellationToken, task::TaskTracker};

    use super::{AcceptListener, AcceptLoopOptions, accept_loop};
    use crate::{
        connection::ConnectionDeps,
        reassembler::buffer_pool,
        server::BackoffConfig,
        session::ConnectionManager,
        test_helpers::RecordingDispatch,
    };

    #[derive(Default)]
    struct FailingListener {
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl AcceptListener for FailingListener {
        async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(io::Error::other("accept failed"))
        }

        fn local_addr(&self) -> io::Result<SocketAddr> { Ok(SocketAddr::from(([127, 0, 0, 1], 0))) }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_accepts_back_off_until_shutdown() {
        let listener = Arc::new(FailingListener::default());
        let shutdown = CancellationToken::new();
        let deps = ConnectionDeps {
            manager: Arc::new(ConnectionManager::default()),
            dispatcher: Arc::new(RecordingDispatch::default()),
            pool: buffer_pool(1, 8),
            config: crate::config::ProcessingConfig::default(),
        };
        let options = AcceptLoopOptions {
            shutdown: shutdown.clone(),
            tracker: TaskTracker::new(),
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(40),
            },
            require_token: false,
        };
        let handle = tokio::spawn(accept_loop(Arc::clone(&listener), deps, options));

        // Retries land at 0, 10, 30, 70 and 110 ms.
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop stops")
            .expect("join");

        let attempts = listener.attempts.load(Ordering::SeqCst);
        assert!((4..=5).contains(&attempts), "attempts={attempts}");
    }
}
