use crate::identity::TypeIdentity;
use crate::registry::{Contribution, Definition, Registry};
use core::fmt;
use core::str::FromStr;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The question a probe answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProbeKind {
    /// Has the application finished initialising?
    Startup,
    /// Is the process alive, or should it be restarted?
    Liveness,
    /// Can the application take traffic right now?
    Readiness,
}

impl ProbeKind {
    pub const ALL: [Self; 3] = [Self::Startup, Self::Liveness, Self::Readiness];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Liveness => "liveness",
            Self::Readiness => "readiness",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "startup" => Ok(Self::Startup),
            "liveness" => Ok(Self::Liveness),
            "readiness" => Ok(Self::Readiness),
            other => Err(format!("unknown probe kind `{other}`")),
        }
    }
}

/// The kinds a probe is bound to. Iterates in [`ProbeKind`] order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeKinds(BTreeSet<ProbeKind>);

impl ProbeKinds {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        ProbeKind::ALL.into_iter().collect()
    }

    pub fn with(mut self, kind: ProbeKind) -> Self {
        self.0.insert(kind);
        self
    }

    pub fn contains(&self, kind: ProbeKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = ProbeKind> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<ProbeKind> for ProbeKinds {
    fn from_iter<I: IntoIterator<Item = ProbeKind>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[ProbeKind; N]> for ProbeKinds {
    fn from(kinds: [ProbeKind; N]) -> Self {
        kinds.into_iter().collect()
    }
}

impl From<ProbeKind> for ProbeKinds {
    fn from(kind: ProbeKind) -> Self {
        Self::none().with(kind)
    }
}

/// The result of a single probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeStatus {
    pub success: bool,
    pub message: String,
}

impl ProbeStatus {
    pub fn healthy(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A synchronous health check.
pub trait Probe: Send + Sync + 'static {
    fn check(&self) -> ProbeStatus;
}

impl<F> Probe for F
where
    F: Fn() -> ProbeStatus + Send + Sync + 'static,
{
    fn check(&self) -> ProbeStatus {
        self()
    }
}

/// Registry binding probe contributions to the kinds they answer.
pub type ProbeRegistry = Registry<ProbeKinds>;

/// Wraps `probe` as a contribution keyed by its type identity.
///
/// The instance is stored as an `Arc<dyn Probe>` so the checker can call it
/// without knowing its concrete type.
pub fn probe_contribution<P: Probe>(probe: P) -> Contribution {
    probe_contribution_as(TypeIdentity::of::<P>(), probe)
}

/// Wraps `probe` as a contribution keyed by an explicit token.
pub fn probe_contribution_as<P: Probe>(identity: TypeIdentity, probe: P) -> Contribution {
    let probe: Arc<dyn Probe> = Arc::new(probe);
    Contribution::with_identity(identity, probe)
}

/// A probe definition for the type `P`.
pub fn probe_definition<P: Probe>(kinds: impl Into<ProbeKinds>) -> Definition<ProbeKinds> {
    Definition::of::<P>(kinds.into())
}
