//! # Health checker composition
//!
//! Probes are contributed and defined exactly like services: a probe
//! contribution carries the implementation, a probe definition names it and
//! the [`ProbeKind`]s it answers. [`HealthChecker::compose`] resolves both
//! streams and [`HealthChecker::check`] runs the probes bound to one kind.

mod checker;
mod probe;

pub use checker::{CheckReport, HealthChecker};
pub use probe::{
    Probe, ProbeKind, ProbeKinds, ProbeRegistry, ProbeStatus, probe_contribution,
    probe_contribution_as, probe_definition,
};
