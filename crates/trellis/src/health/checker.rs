use super::probe::{Probe, ProbeKind, ProbeRegistry, ProbeStatus};
use crate::{Error, Result, identity::TypeIdentity, server::middleware::panic_message};
use core::fmt;
use core::panic::AssertUnwindSafe;
use std::collections::BTreeMap;
use std::sync::Arc;

struct ProbeBinding {
    name: TypeIdentity,
    probe: Arc<dyn Probe>,
}

/// Runs the probes bound to each [`ProbeKind`].
///
/// Cheap to clone; clones share the same bindings and may check concurrently.
#[derive(Clone)]
pub struct HealthChecker {
    bindings: Arc<BTreeMap<ProbeKind, Vec<ProbeBinding>>>,
}

impl HealthChecker {
    /// Resolves the probe registry into per-kind bindings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedDefinition`] if a probe definition has no
    /// contribution, or [`Error::ContributionMismatch`] if the contribution is
    /// not a probe.
    pub fn compose(registry: ProbeRegistry) -> Result<Self> {
        let mut bindings: BTreeMap<ProbeKind, Vec<ProbeBinding>> = BTreeMap::new();

        for registration in registry.resolve()? {
            let identity = registration.identity().clone();
            let probe = registration
                .contribution()
                .downcast::<Arc<dyn Probe>>()
                .ok_or_else(|| Error::ContributionMismatch {
                    identity: identity.clone(),
                    expected: "dyn Probe",
                })?;

            for kind in registration.metadata().iter() {
                tracing::debug!(probe = %identity, %kind, "bound probe");
                bindings.entry(kind).or_default().push(ProbeBinding {
                    name: identity.clone(),
                    probe: Arc::clone(&probe),
                });
            }
        }

        Ok(Self {
            bindings: Arc::new(bindings),
        })
    }

    /// Names of the probes bound to `kind`, in registration order.
    pub fn probes(&self, kind: ProbeKind) -> Vec<&TypeIdentity> {
        self.bindings
            .get(&kind)
            .into_iter()
            .flatten()
            .map(|binding| &binding.name)
            .collect()
    }

    /// Runs every probe bound to `kind`, in registration order.
    ///
    /// All probes run even after a failure. The report succeeds only if every
    /// probe did; a kind with no probes succeeds. A panicking probe counts as
    /// a failure.
    pub fn check(&self, kind: ProbeKind) -> CheckReport {
        let mut report = CheckReport {
            kind,
            success: true,
            probes: BTreeMap::new(),
        };

        for binding in self.bindings.get(&kind).into_iter().flatten() {
            let status = run(binding);
            if !status.success {
                tracing::warn!(probe = %binding.name, %kind, message = %status.message, "probe failed");
            }
            report.success &= status.success;

            let mut key = binding.name.to_string();
            let mut n = 1;
            while report.probes.contains_key(&key) {
                n += 1;
                key = format!("{}#{n}", binding.name);
            }
            report.probes.insert(key, status);
        }

        report
    }
}

fn run(binding: &ProbeBinding) -> ProbeStatus {
    std::panic::catch_unwind(AssertUnwindSafe(|| binding.probe.check())).unwrap_or_else(|payload| {
        ProbeStatus::unhealthy(format!("probe panicked: {}", panic_message(payload.as_ref())))
    })
}

impl fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (kind, bindings) in self.bindings.iter() {
            let names: Vec<_> = bindings.iter().map(|b| b.name.as_str()).collect();
            map.entry(kind, &names);
        }
        map.finish()
    }
}

/// Aggregated result of one [`HealthChecker::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub kind: ProbeKind,
    pub success: bool,
    /// Per-probe status, keyed by probe name.
    pub probes: BTreeMap<String, ProbeStatus>,
}

impl CheckReport {
    /// `probe name -> message` for every probe that ran.
    pub fn messages(&self) -> impl Iterator<Item = (&str, &str)> {
        self.probes
            .iter()
            .map(|(name, status)| (name.as_str(), status.message.as_str()))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &ProbeStatus)> {
        self.probes
            .iter()
            .filter(|(_, status)| !status.success)
            .map(|(name, status)| (name.as_str(), status))
    }
}
