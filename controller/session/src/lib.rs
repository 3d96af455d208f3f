//! Core-side session layer.
//!
//! Terminates one duplex stream per cluster: the connection registry tracks
//! the live outbound handle for each cluster identity, the dispatcher routes
//! inbound requests to handlers, the lifecycle manager runs the
//! register/heartbeat transitions, and the liveness monitor expires clusters
//! whose heartbeat lapsed.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod dispatch;
mod lifecycle;
mod liveness;
mod metrics;
mod registry;
mod transport;

pub use self::{
    dispatch::{Handlers, Session},
    lifecycle::LifecycleManager,
    liveness::LivenessMonitor,
    metrics::SessionMetrics,
    registry::{ClosedError, ConnectionHandle, ConnectionRegistry},
    transport::serve,
};
