//! Error types for application composition.
//!
//! Every variant here is a *composition* error: it is produced while the
//! application is being assembled, before any request traffic is accepted,
//! and it is expected to abort startup. `Bind` is the exception: a started
//! server keeps it as the reason it is not serving. Failures of individual calls never
//! surface as [`Error`]; they travel to the caller as [`tonic::Status`].
//!
//! ## Error Cases
//! - `UnresolvedDefinition`: a declared binding found no matching
//!   contribution.
//! - `ContributionMismatch`: identities matched but the contribution is not
//!   the concrete type the binding expects.
//! - `DuplicateCollector`: a metric name was registered twice.
//! - `InvalidConfig`: configuration failed validation.
//! - `Bind`: the network listener could not be bound.
//! - `Reflection`: the reflection service could not be built.
//! - `Transport`: the serve loop terminated with a transport error.
//! - `Join`: the serve task panicked or was aborted.
//! - `Module`: a feature module failed to register its contributions.

use crate::identity::TypeIdentity;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for composition failures.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// No contribution carries the identity a definition asked for.
    #[error("no contribution registered for definition `{identity}`")]
    UnresolvedDefinition { identity: TypeIdentity },

    /// The contribution bound to a definition is not of the expected type.
    #[error("contribution `{identity}` cannot be bound as `{expected}`")]
    ContributionMismatch {
        identity: TypeIdentity,
        expected: &'static str,
    },

    /// A metrics collector tried to claim a name that is already owned.
    #[error("metric `{name}` is already registered")]
    DuplicateCollector { name: String },

    /// Configuration failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The network listener could not be bound.
    #[error("failed to bind listener on `{address}`: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The reflection service could not be built from the registered
    /// descriptor sets.
    #[error("reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),

    /// The serve loop terminated abnormally.
    #[error("transport: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The serve task did not run to completion.
    #[error("serve task: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// A feature module failed while registering its contributions.
    #[error("module `{module}` failed to register: {reason}")]
    Module {
        module: &'static str,
        reason: String,
    },
}
