//! Components of the `trellis-server` binary.
//!
//! ## Submodules
//!
//! - [`config`] - CLI and environment configuration.
//! - [`service`] - the orders feature module installed into the assembly.
//! - [`telemetry`] - structured logging and optional OpenTelemetry export.
//!
//! These components are wired together in the binary's `main.rs`.

pub mod config;
pub mod service;
pub mod telemetry;
