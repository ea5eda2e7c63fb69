//! Run the processing pipeline over an in-memory transport.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wsroute::{
    BufferPool,
    ConnectionId,
    ConnectionInfo,
    Dispatch,
    FrameReassembler,
    FrameSource,
    ProcessError,
    ProcessingConfig,
    Processor,
    SerializationFormat,
};

/// A JSON connection detached from any manager.
#[must_use]
pub fn test_connection(id: u64) -> Arc<ConnectionInfo> {
    Arc::new(ConnectionInfo::new(
        ConnectionId::new(id),
        SerializationFormat::Json,
        CancellationToken::new(),
    ))
}

/// Feed `source` through the processor `config` selects until the sequence
/// ends.
///
/// # Errors
///
/// Returns whatever the processor reports.
pub async fn drive<S, D>(
    source: S,
    dispatcher: Arc<D>,
    pool: &BufferPool,
    config: &ProcessingConfig,
) -> Result<(), ProcessError>
where
    S: FrameSource + 'static,
    D: Dispatch,
{
    drive_with_cancel(source, dispatcher, pool, config, &CancellationToken::new()).await
}

/// As [`drive`], with a caller-supplied cancellation token.
///
/// # Errors
///
/// Returns whatever the processor reports.
pub async fn drive_with_cancel<S, D>(
    source: S,
    dispatcher: Arc<D>,
    pool: &BufferPool,
    config: &ProcessingConfig,
    cancel: &CancellationToken,
) -> Result<(), ProcessError>
where
    S: FrameSource + 'static,
    D: Dispatch,
{
    let connection = test_connection(1);
    let reassembler = FrameReassembler::new(
        source,
        pool.clone(),
        config,
        connection.lifetime().clone(),
    );
    Processor::from_config(config, reassembler, dispatcher, connection)
        .run(cancel)
        .await
}
