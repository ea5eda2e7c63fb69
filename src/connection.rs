//! Per-connection pipeline driver.
//!
//! [`run_connection`] wires an upgraded connection's transport into a
//! [`FrameReassembler`] and the configured [`Processor`], runs it to
//! completion and tears the connection down again.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    config::ProcessingConfig,
    dispatcher::Dispatch,
    processor::{ProcessError, Processor},
    reassembler::{BufferPool, FrameReassembler},
    session::{ConnectionInfo, ConnectionManager},
    transport::FrameSource,
};

/// Process-wide count of connections currently being driven.
static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);

/// Return the current number of active connections.
#[must_use]
pub fn active_connection_count() -> u64 { ACTIVE_CONNECTIONS.load(Ordering::Relaxed) }

/// RAII guard counting the connection as active and deregistering it from
/// the manager on drop.
struct ActiveConnection<'a> {
    info: &'a ConnectionInfo,
    manager: &'a ConnectionManager,
}

impl<'a> ActiveConnection<'a> {
    fn new(info: &'a ConnectionInfo, manager: &'a ConnectionManager) -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_connections();
        Self { info, manager }
    }
}

impl Drop for ActiveConnection<'_> {
    fn drop(&mut self) {
        self.manager.remove(self.info.id());
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::dec_connections();
    }
}

/// Shared pieces every connection is driven with.
pub struct ConnectionDeps<D> {
    pub manager: Arc<ConnectionManager>,
    pub dispatcher: Arc<D>,
    pub pool: BufferPool,
    pub config: ProcessingConfig,
}

impl<D> Clone for ConnectionDeps<D> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            dispatcher: Arc::clone(&self.dispatcher),
            pool: self.pool.clone(),
            config: self.config,
        }
    }
}

/// Drive one upgraded connection until it ends.
///
/// The connection is removed from the manager, and its lifetime token
/// cancelled, on every exit path.
///
/// # Errors
///
/// Returns the processor's failure. A peer close or the end of the
/// connection lifetime is a normal exit.
pub async fn run_connection<S, D>(
    source: S,
    info: Arc<ConnectionInfo>,
    deps: &ConnectionDeps<D>,
    cancel: &CancellationToken,
) -> Result<(), ProcessError>
where
    S: FrameSource + 'static,
    D: Dispatch,
{
    let _active = ActiveConnection::new(&info, &deps.manager);
    info!(
        "connection opened: id={}, protocol={}, active={}",
        info.id(),
        info.format().protocol_name(),
        active_connection_count()
    );

    let reassembler =
        FrameReassembler::new(source, deps.pool.clone(), &deps.config, info.lifetime().clone());
    let processor = Processor::from_config(
        &deps.config,
        reassembler,
        Arc::clone(&deps.dispatcher),
        Arc::clone(&info),
    );
    let outcome = processor.run(cancel).await;

    match &outcome {
        Ok(()) | Err(ProcessError::Cancelled) => info!("connection closed: id={}", info.id()),
        Err(err) => warn!("connection closed with error: id={}, error={err}", info.id()),
    }
    outcome
}
