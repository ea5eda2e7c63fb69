//! Test doubles and drivers for `wsroute`.
//!
//! [`ScriptedSource`] stands in for a WebSocket transport,
//! [`RecordingDispatcher`] for a router, and [`drive`] runs the processing
//! pipeline over them:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use wsroute::{ProcessingConfig, reassembler::buffer_pool};
//! use wsroute_testing::{RecordingDispatcher, ScriptedSource, drive};
//!
//! # async fn example() {
//! let dispatcher = Arc::new(RecordingDispatcher::new());
//! let pool = buffer_pool(2, 64);
//! drive(
//!     ScriptedSource::messages([br#"{"key":"ping"}"#]),
//!     Arc::clone(&dispatcher),
//!     &pool,
//!     &ProcessingConfig::default(),
//! )
//! .await
//! .unwrap();
//! assert_eq!(dispatcher.payloads().len(), 1);
//! # }
//! ```

pub mod client;
mod dispatch;
mod drive;
mod source;

pub use dispatch::RecordingDispatcher;
pub use drive::{drive, drive_with_cancel, test_connection};
use rstest::fixture;
pub use source::{ScriptedSource, Step};
use wsroute::{BufferPool, reassembler::buffer_pool};

/// Small shared pool of 64-byte buffers.
#[fixture]
pub fn pool() -> BufferPool { buffer_pool(4, 64) }
