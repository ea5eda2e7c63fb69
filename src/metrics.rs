//! Metric helpers for `wsroute`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "wsroute_connections_active";
/// Name of the counter tracking successfully dispatched messages.
pub const MESSAGES_DISPATCHED: &str = "wsroute_messages_dispatched_total";
/// Name of the counter tracking failed dispatches.
pub const DISPATCH_ERRORS: &str = "wsroute_dispatch_errors_total";
/// Name of the counter tracking panicking connection tasks.
pub const CONNECTION_PANICS: &str = "wsroute_connection_panics_total";

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a dispatched message for `route`.
pub fn inc_dispatched(route: &str) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_DISPATCHED, "route" => route.to_owned()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = route;
}

/// Record a failed dispatch, labelled by error kind.
pub fn inc_dispatch_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(DISPATCH_ERRORS, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a connection task that panicked.
pub fn inc_connection_panics() {
    #[cfg(feature = "metrics")]
    counter!(CONNECTION_PANICS).increment(1);
}
