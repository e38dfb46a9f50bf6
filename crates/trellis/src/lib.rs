#![doc = include_str!("../README.md")]

pub mod assembly;
pub mod config;
mod error;
pub mod health;
pub mod identity;
pub mod metrics;
pub mod registry;
pub mod server;

pub use crate::assembly::{Assembly, Components, Module};
pub use crate::config::ServerConfig;
pub use crate::error::*;
pub use crate::health::{HealthChecker, Probe, ProbeKind, ProbeKinds, ProbeStatus};
pub use crate::identity::TypeIdentity;
pub use crate::registry::{Contribution, Definition, Registration, Registry};
pub use crate::server::{ServerComposer, ServiceDescriptor};
