//! Fleetlink cluster agent.
//!
//! The per-cluster process embedded in a managed cluster: generic watch
//! controllers observe cluster-local resources through injected kind
//! descriptors, the matching engine filters them by policy, and matched
//! objects are rendered and streamed to the core as aggregate contributions
//! over the same duplex connection that carries register and heartbeat
//! traffic.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod policies;
pub mod queue;
pub mod render;
pub mod session;
pub mod watch;

pub use self::{
    policies::{PolicyIndex, PolicyManager},
    queue::WorkQueue,
    render::{FieldRender, Render},
    session::{Agent, AgentConfig, StaticStatus, StatusReporter},
    watch::{ControllerContext, ResourceWatcher, WatchController, WatchEvent},
};
