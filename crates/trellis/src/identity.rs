//! Type identities used as binding keys.
//!
//! A [`TypeIdentity`] is the string that pairs a [`Definition`] with a
//! [`Contribution`]. Two bindings refer to the same target if and only if
//! their identities are equal: exact, case-sensitive string comparison with no
//! structural or trait-based matching.
//!
//! Identities come from two sources that share one representation:
//!
//! - **Reflected**: the fully qualified type name of a value or of a
//!   constructor's return type, via [`identity_of`] and
//!   [`constructor_return_identity_of`]. Derived from the type alone, without
//!   running any code.
//! - **Tokens**: an explicit, namespaced key chosen by the registering module
//!   via [`TypeIdentity::token`]. Tokens survive renames and refactors, so they
//!   are the preferred key for bindings that cross crate boundaries.
//!
//! The empty identity is what malformed input resolves to. It never matches
//! anything, so such bindings fail uniformly at resolution time.
//!
//! [`Definition`]: crate::registry::Definition
//! [`Contribution`]: crate::registry::Contribution

use core::any::type_name;
use core::fmt;
use std::borrow::Cow;

/// The key used to match a definition to a contribution.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeIdentity(Cow<'static, str>);

impl TypeIdentity {
    /// An explicit capability token, e.g. `"orders.v1.OrderService"`.
    pub const fn token(token: &'static str) -> Self {
        Self(Cow::Borrowed(token))
    }

    /// The empty identity. Never matches during resolution.
    pub const fn empty() -> Self {
        Self(Cow::Borrowed(""))
    }

    /// The fully qualified name of `T`.
    pub fn of<T: ?Sized>() -> Self {
        Self(Cow::Borrowed(type_name::<T>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` binds to `other`.
    ///
    /// Equal, non-empty identities match; everything else does not.
    pub fn matches(&self, other: &Self) -> bool {
        !self.is_empty() && self == other
    }
}

impl From<&'static str> for TypeIdentity {
    fn from(value: &'static str) -> Self {
        Self(Cow::Borrowed(value))
    }
}

impl From<String> for TypeIdentity {
    fn from(value: String) -> Self {
        Self(Cow::Owned(value))
    }
}

impl AsRef<str> for TypeIdentity {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeIdentity({:?})", self.0)
    }
}

/// Returns the identity of the static type of `value`.
///
/// For trait objects this is the name of the trait object type
/// (`dyn Trait`), not of the erased concrete type, so register concrete values.
pub fn identity_of<T: ?Sized>(value: &T) -> TypeIdentity {
    TypeIdentity(Cow::Borrowed(core::any::type_name_of_val(value)))
}

/// Like [`identity_of`], but an absent value yields the empty identity.
pub fn identity_of_option<T: ?Sized>(value: Option<&T>) -> TypeIdentity {
    value.map_or_else(TypeIdentity::empty, identity_of)
}

/// A callable that constructs a value, described by its argument tuple.
///
/// Implemented for every `Fn` taking up to four arguments. Only the signature
/// is inspected; the callable is never invoked.
pub trait Constructor<Args> {
    type Output;
}

macro_rules! impl_constructor {
    ($($arg:ident),*) => {
        impl<F, R, $($arg,)*> Constructor<($($arg,)*)> for F
        where
            F: Fn($($arg),*) -> R,
        {
            type Output = R;
        }
    };
}

impl_constructor!();
impl_constructor!(A1);
impl_constructor!(A1, A2);
impl_constructor!(A1, A2, A3);
impl_constructor!(A1, A2, A3, A4);

/// Returns the identity of the value produced by `constructor`.
pub fn constructor_return_identity_of<F, Args>(_constructor: &F) -> TypeIdentity
where
    F: Constructor<Args>,
{
    TypeIdentity::of::<F::Output>()
}

/// Returns the identity of the success value produced by a fallible
/// `constructor`. The error type does not take part in the identity.
pub fn fallible_constructor_return_identity_of<F, Args, T, E>(_constructor: &F) -> TypeIdentity
where
    F: Constructor<Args, Output = Result<T, E>>,
{
    TypeIdentity::of::<T>()
}
