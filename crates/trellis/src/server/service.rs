//! Binding metadata for RPC services.
//!
//! A [`ServiceDescriptor`] is the classification metadata of a service
//! [`Definition`](crate::registry::Definition): the tonic service name, its
//! method table, an optional encoded file descriptor set for reflection, and a
//! type-erased function that mounts a resolved contribution onto the router.

use crate::{
    Error, Result,
    registry::{Contribution, Registry},
};
use core::any::type_name;
use core::convert::Infallible;
use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;
use tonic::body::Body;
use tonic::codegen::http;
use tonic::server::NamedService;
use tonic::service::RoutesBuilder;
use tower::Service;

/// Path of the built-in health `Check` method.
pub const HEALTH_CHECK_PATH: &str = "/grpc.health.v1.Health/Check";
/// Path of the built-in health `Watch` method.
pub const HEALTH_WATCH_PATH: &str = "/grpc.health.v1.Health/Watch";
/// Path of the reflection stream method.
pub const REFLECTION_PATH: &str = "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo";

/// Registry binding service contributions to their descriptors.
pub type ServiceRegistry = Registry<ServiceDescriptor>;

/// The streaming shape of an RPC method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Unary,
    ClientStreaming,
    ServerStreaming,
    BidiStreaming,
}

impl MethodKind {
    pub const fn is_streaming(self) -> bool {
        !matches!(self, Self::Unary)
    }

    /// Label used in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unary => "unary",
            Self::ClientStreaming => "client_stream",
            Self::ServerStreaming => "server_stream",
            Self::BidiStreaming => "bidi_stream",
        }
    }
}

impl fmt::Display for MethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub kind: MethodKind,
}

type MountFn = dyn Fn(&Contribution, &mut RoutesBuilder) -> Result<()> + Send + Sync;

/// How a resolved contribution becomes a mounted gRPC service.
#[derive(Clone)]
pub struct ServiceDescriptor {
    name: &'static str,
    methods: Vec<MethodDescriptor>,
    file_descriptor_set: Option<&'static [u8]>,
    mount: Arc<MountFn>,
}

impl ServiceDescriptor {
    /// Describes a service whose implementation is a `T`, wrapped into the
    /// tonic server `S` by `build`.
    ///
    /// ```ignore
    /// let descriptor = ServiceDescriptor::new(OrderServiceServer::<Orders>::from_arc)
    ///     .unary("GetOrder")
    ///     .server_streaming("WatchOrders")
    ///     .with_file_descriptor_set(FILE_DESCRIPTOR_SET);
    /// ```
    pub fn new<T, S, F>(build: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(Arc<T>) -> S + Send + Sync + 'static,
        S: Service<http::Request<Body>, Response = http::Response<Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let mount = move |contribution: &Contribution, routes: &mut RoutesBuilder| {
            let instance =
                contribution
                    .downcast::<T>()
                    .ok_or_else(|| Error::ContributionMismatch {
                        identity: contribution.identity().clone(),
                        expected: type_name::<T>(),
                    })?;
            routes.add_service(build(instance));
            Ok(())
        };

        Self {
            name: S::NAME,
            methods: Vec::new(),
            file_descriptor_set: None,
            mount: Arc::new(mount),
        }
    }

    pub fn with_method(mut self, name: &'static str, kind: MethodKind) -> Self {
        self.methods.push(MethodDescriptor { name, kind });
        self
    }

    pub fn unary(self, name: &'static str) -> Self {
        self.with_method(name, MethodKind::Unary)
    }

    pub fn client_streaming(self, name: &'static str) -> Self {
        self.with_method(name, MethodKind::ClientStreaming)
    }

    pub fn server_streaming(self, name: &'static str) -> Self {
        self.with_method(name, MethodKind::ServerStreaming)
    }

    pub fn bidi_streaming(self, name: &'static str) -> Self {
        self.with_method(name, MethodKind::BidiStreaming)
    }

    /// Encoded `FileDescriptorSet` exposed through reflection.
    pub fn with_file_descriptor_set(mut self, encoded: &'static [u8]) -> Self {
        self.file_descriptor_set = Some(encoded);
        self
    }

    /// Fully qualified service name, e.g. `trellis.orders.v1.OrderService`.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn file_descriptor_set(&self) -> Option<&'static [u8]> {
        self.file_descriptor_set
    }

    /// `/service/method`, the HTTP/2 path a call to `method` arrives on.
    pub fn path(&self, method: &str) -> String {
        format!("/{}/{}", self.name, method)
    }

    pub(crate) fn mount(&self, contribution: &Contribution, routes: &mut RoutesBuilder) -> Result<()> {
        (self.mount)(contribution, routes)
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceDescriptor")
            .field("name", &self.name)
            .field("methods", &self.methods)
            .field("reflection", &self.file_descriptor_set.is_some())
            .finish_non_exhaustive()
    }
}

/// Method path to [`MethodKind`] lookup for every mounted method.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    kinds: HashMap<String, MethodKind>,
}

impl MethodTable {
    pub fn insert(&mut self, path: impl Into<String>, kind: MethodKind) {
        self.kinds.insert(path.into(), kind);
    }

    pub fn insert_service(&mut self, descriptor: &ServiceDescriptor) {
        for method in descriptor.methods() {
            self.insert(descriptor.path(method.name), method.kind);
        }
    }

    pub fn kind(&self, path: &str) -> Option<MethodKind> {
        self.kinds.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
