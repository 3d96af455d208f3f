//! Fleetlink controller runtime.
//!
//! Wires the process-scoped state (store handle, connection registry, policy
//! handlers, liveness monitor) together, binds the cluster stream listener
//! and the admin server, and drains everything on shutdown.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod admin;
mod args;

pub use self::args::Args;
