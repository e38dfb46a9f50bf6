//! Contribution registry and resolution engine.
//!
//! Feature code contributes two independent streams into a [`Registry`]:
//!
//! - [`Contribution`]s: implementation instances, keyed by their
//!   [`TypeIdentity`].
//! - [`Definition`]s: an identity plus classification metadata `M` describing
//!   how a future contribution should be bound.
//!
//! Neither side knows about the other. [`Registry::resolve`] pairs them,
//! producing one [`Registration`] per definition. The algorithm is agnostic of
//! `M`; the crate instantiates it for RPC services
//! ([`ServiceDescriptor`](crate::server::ServiceDescriptor)) and for health
//! probes ([`ProbeKinds`](crate::health::ProbeKinds)).
//!
//! ## Resolution rules
//!
//! - Definitions are resolved in the order they were supplied.
//! - For each definition the *first* contribution, in supply order, whose
//!   identity matches is selected. Duplicate identities among contributions
//!   therefore resolve deterministically.
//! - A definition without a match fails the whole resolution. No partial
//!   result is ever returned.
//! - One contribution may satisfy several definitions.

use crate::{
    Error, Result,
    identity::{TypeIdentity, identity_of},
};
use core::any::Any;
use core::fmt;
use std::sync::Arc;


/// A type-erased implementation instance.
///
/// Contributions are shared (`Arc`) so the same instance can back several
/// registrations and outlive the registry that paired them.
#[derive(Clone)]
pub struct Contribution {
    identity: TypeIdentity,
    instance: Arc<dyn Any + Send + Sync>,
}

impl Contribution {
    /// Wraps `instance`, keyed by the fully qualified name of `T`.
    pub fn new<T: Any + Send + Sync>(instance: T) -> Self {
        let identity = identity_of(&instance);
        Self {
            identity,
            instance: Arc::new(instance),
        }
    }

    /// Wraps `instance` under an explicit identity token.
    pub fn with_identity<T: Any + Send + Sync>(identity: TypeIdentity, instance: T) -> Self {
        Self {
            identity,
            instance: Arc::new(instance),
        }
    }

    /// Wraps an already shared instance, keyed by the fully qualified name of
    /// `T`.
    pub fn from_arc<T: Any + Send + Sync>(instance: Arc<T>) -> Self {
        Self {
            identity: TypeIdentity::of::<T>(),
            instance,
        }
    }

    pub fn identity(&self) -> &TypeIdentity {
        &self.identity
    }

    /// Returns the instance as `T`, or `None` if it is some other type.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.instance).downcast::<T>().ok()
    }
}

impl fmt::Debug for Contribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contribution")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Declared binding metadata awaiting a matching [`Contribution`].
#[derive(Debug, Clone)]
pub struct Definition<M> {
    identity: TypeIdentity,
    metadata: M,
}

impl<M> Definition<M> {
    pub fn new(identity: impl Into<TypeIdentity>, metadata: M) -> Self {
        Self {
            identity: identity.into(),
            metadata,
        }
    }

    /// A definition bound to the fully qualified name of `T`.
    pub fn of<T: ?Sized>(metadata: M) -> Self {
        Self::new(TypeIdentity::of::<T>(), metadata)
    }

    /// A definition bound to whatever `constructor` returns.
    pub fn for_constructor<F, Args>(constructor: &F, metadata: M) -> Self
    where
        F: crate::identity::Constructor<Args>,
    {
        Self::new(
            crate::identity::constructor_return_identity_of(constructor),
            metadata,
        )
    }

    /// A definition bound to the success value of a fallible `constructor`.
    pub fn for_fallible_constructor<F, Args, T, E>(constructor: &F, metadata: M) -> Self
    where
        F: crate::identity::Constructor<Args, Output = core::result::Result<T, E>>,
    {
        Self::new(
            crate::identity::fallible_constructor_return_identity_of(constructor),
            metadata,
        )
    }

    pub fn identity(&self) -> &TypeIdentity {
        &self.identity
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }
}

/// A resolved `(contribution, metadata)` pair. Immutable once created.
#[derive(Debug, Clone)]
pub struct Registration<M> {
    contribution: Contribution,
    metadata: M,
}

impl<M> Registration<M> {
    pub fn contribution(&self) -> &Contribution {
        &self.contribution
    }

    pub fn identity(&self) -> &TypeIdentity {
        self.contribution.identity()
    }

    pub fn metadata(&self) -> &M {
        &self.metadata
    }

    pub fn into_parts(self) -> (Contribution, M) {
        (self.contribution, self.metadata)
    }
}

/// Contributions and definitions for one binding domain.
///
/// Built once during assembly, consumed by [`Registry::resolve`].
pub struct Registry<M> {
    contributions: Vec<Contribution>,
    definitions: Vec<Definition<M>>,
}

impl<M> Default for Registry<M> {
    fn default() -> Self {
        Self {
            contributions: Vec::new(),
            definitions: Vec::new(),
        }
    }
}

impl<M> Registry<M> {
    pub fn new(contributions: Vec<Contribution>, definitions: Vec<Definition<M>>) -> Self {
        Self {
            contributions,
            definitions,
        }
    }

    pub fn contribute(&mut self, contribution: Contribution) -> &mut Self {
        self.contributions.push(contribution);
        self
    }

    pub fn define(&mut self, definition: Definition<M>) -> &mut Self {
        self.definitions.push(definition);
        self
    }

    pub fn contributions(&self) -> &[Contribution] {
        &self.contributions
    }

    pub fn definitions(&self) -> &[Definition<M>] {
        &self.definitions
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty() && self.definitions.is_empty()
    }

    /// Pairs every definition with its contribution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedDefinition`] naming the first definition
    /// that has no matching contribution. Nothing is returned in that case.
    pub fn resolve(self) -> Result<Vec<Registration<M>>> {
        let Self {
            contributions,
            definitions,
        } = self;

        let mut registrations = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let Some(contribution) = contributions
                .iter()
                .find(|contribution| definition.identity.matches(contribution.identity()))
            else {
                tracing::error!(
                    identity = %definition.identity,
                    contributions = contributions.len(),
                    "definition has no matching contribution"
                );
                return Err(Error::UnresolvedDefinition {
                    identity: definition.identity,
                });
            };

            tracing::debug!(identity = %definition.identity, "bound definition");
            registrations.push(Registration {
                contribution: contribution.clone(),
                metadata: definition.metadata,
            });
        }

        tracing::debug!(
            registrations = registrations.len(),
            contributions = contributions.len(),
            "resolved registry"
        );
        Ok(registrations)
    }
}

impl<M> fmt::Debug for Registry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("contributions", &self.contributions)
            .field(
                "definitions",
                &self
                    .definitions
                    .iter()
                    .map(Definition::identity)
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
