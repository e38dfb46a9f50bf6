//! # Server composition
//!
//! Builds a tonic gRPC server out of contributed services, interceptors,
//! options and collectors. See [`ServerComposer`] for the lifecycle and
//! [`middleware`] for the fixed chain order.

mod composer;
pub mod middleware;
mod service;
mod transport;

pub use composer::{
    AssembledServer, RunningServer, ServerComposer, ServerContributions, ServerOption,
    ServerState, StoppedServer,
};
pub use service::{
    HEALTH_CHECK_PATH, HEALTH_WATCH_PATH, MethodDescriptor, MethodKind, MethodTable,
    REFLECTION_PATH, ServiceDescriptor, ServiceRegistry,
};
pub use transport::{InProcessDialer, InProcessListener, Listener, normalize_address};
