#![doc(html_root_url = "https://docs.rs/wsroute/latest")]
//! Public API for the `wsroute` library.
//!
//! This crate provides the receive path of a WebSocket message router:
//! pooled reassembly buffers, route-key interning, typed endpoint dispatch
//! and sequential or bounded-parallel message processing per connection.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod endpoint;
pub mod interner;
pub mod metrics;
pub mod panic;
pub mod pool;
pub mod processor;
pub mod reassembler;
pub mod serializer;
#[cfg(feature = "tungstenite")]
pub mod server;
pub mod services;
pub mod session;
#[cfg(test)]
mod test_helpers;
pub mod transport;

pub use buffer::{BufferError, MessageBuffer};
pub use config::{ConfigError, ProcessingConfig};
pub use connection::{ConnectionDeps, run_connection};
pub use dispatcher::{Dispatch, DispatchError, MessageDispatcher, Router, RouterError};
pub use endpoint::{Endpoint, FromPayload, HandlerError, Json, MessageContext};
pub use interner::{InternMode, RouteKeyInterner};
pub use pool::{BoundedPool, PoolError, Pooled};
pub use processor::{ParallelProcessor, ProcessError, Processor, SequentialProcessor};
pub use reassembler::{BufferPool, FrameReassembler, ReceiveError};
pub use serializer::{SerializationFormat, SerializerError};
pub use services::{Lifetime, Scope, ServiceError, ServiceProvider};
pub use session::{ConnectionId, ConnectionInfo, ConnectionManager, HandshakeError, Negotiation};
pub use transport::{FrameKind, FrameSource, Received};
