//! # Assembly
//!
//! The collection points feature modules register into. An [`Assembly`] is
//! threaded explicitly through every [`Module`], collecting service and probe
//! contributions and definitions, interceptors, server options and metrics
//! collectors. [`Assembly::build`] hands the collected pieces to the server
//! and health checker composers.
//!
//! ```ignore
//! let mut assembly = Assembly::new();
//! assembly.install(&OrdersModule::default())?;
//! let Components { server, probes } = assembly.build();
//!
//! let health = HealthChecker::compose(probes)?;
//! let running = ServerComposer::new(config, server).assemble()?.start().await;
//! ```

use crate::health::{
    Probe, ProbeKinds, ProbeRegistry, probe_contribution, probe_contribution_as,
    probe_definition,
};
use crate::identity::TypeIdentity;
use crate::metrics::Collector;
use crate::registry::{Contribution, Definition};
use crate::server::middleware::Interceptor;
use crate::server::{ServerContributions, ServiceDescriptor};
use crate::Result;
use core::any::Any;
use std::sync::Arc;
use tonic::transport::Server;

/// A unit of features that contributes to the application.
pub trait Module {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Registers this module's contributions.
    fn register(&self, assembly: &mut Assembly) -> Result<()>;
}

/// Everything collected from the installed modules.
#[derive(Debug, Default)]
pub struct Components {
    pub server: ServerContributions,
    pub probes: ProbeRegistry,
}

/// Collection points for feature modules.
#[derive(Debug, Default)]
pub struct Assembly {
    server: ServerContributions,
    probes: ProbeRegistry,
    modules: Vec<&'static str>,
}

impl Assembly {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lets `module` register its contributions.
    pub fn install<M: Module + ?Sized>(&mut self, module: &M) -> Result<&mut Self> {
        let name = module.name();
        tracing::debug!(module = name, "installing module");
        module.register(self).inspect_err(|err| {
            tracing::error!(module = name, error = %err, "module registration failed");
        })?;
        self.modules.push(name);
        Ok(self)
    }

    /// Names of the installed modules, in installation order.
    pub fn modules(&self) -> &[&'static str] {
        &self.modules
    }

    /// Contributes a service implementation keyed by its type.
    pub fn provide_service<T: Any + Send + Sync>(&mut self, service: T) -> &mut Self {
        self.server.services.contribute(Contribution::new(service));
        self
    }

    /// Contributes a service implementation under an explicit token.
    pub fn provide_service_as<T: Any + Send + Sync>(
        &mut self,
        identity: TypeIdentity,
        service: T,
    ) -> &mut Self {
        self.server
            .services
            .contribute(Contribution::with_identity(identity, service));
        self
    }

    /// Declares how a future service contribution is mounted.
    pub fn define_service(&mut self, definition: Definition<ServiceDescriptor>) -> &mut Self {
        self.server.services.define(definition);
        self
    }

    /// Contributes `service` and defines it with `descriptor` in one step.
    pub fn register_service<T: Any + Send + Sync>(
        &mut self,
        service: T,
        descriptor: ServiceDescriptor,
    ) -> &mut Self {
        self.provide_service(service)
            .define_service(Definition::of::<T>(descriptor))
    }

    pub fn provide_probe<P: Probe>(&mut self, probe: P) -> &mut Self {
        self.probes.contribute(probe_contribution(probe));
        self
    }

    pub fn provide_probe_as<P: Probe>(&mut self, identity: TypeIdentity, probe: P) -> &mut Self {
        self.probes.contribute(probe_contribution_as(identity, probe));
        self
    }

    pub fn define_probe(&mut self, definition: Definition<ProbeKinds>) -> &mut Self {
        self.probes.define(definition);
        self
    }

    /// Contributes `probe` and binds it to `kinds` in one step.
    pub fn register_probe<P: Probe>(&mut self, probe: P, kinds: impl Into<ProbeKinds>) -> &mut Self {
        self.provide_probe(probe)
            .define_probe(probe_definition::<P>(kinds))
    }

    /// Appends to the unary chain.
    pub fn register_unary_interceptor<I: Interceptor>(&mut self, interceptor: I) -> &mut Self {
        self.server.interceptors.push_unary(Arc::new(interceptor));
        self
    }

    /// Appends to the streaming chain.
    pub fn register_stream_interceptor<I: Interceptor>(&mut self, interceptor: I) -> &mut Self {
        self.server.interceptors.push_stream(Arc::new(interceptor));
        self
    }

    /// Appends one shared instance to both chains.
    pub fn register_interceptor<I: Interceptor>(&mut self, interceptor: I) -> &mut Self {
        let interceptor: Arc<dyn Interceptor> = Arc::new(interceptor);
        self.server.interceptors.push_unary(Arc::clone(&interceptor));
        self.server.interceptors.push_stream(interceptor);
        self
    }

    /// Applied to the transport server after the configured base options.
    pub fn register_server_option<F>(&mut self, option: F) -> &mut Self
    where
        F: FnOnce(Server) -> Server + Send + 'static,
    {
        self.server.options.push(Box::new(option));
        self
    }

    pub fn register_collector(&mut self, collector: Arc<dyn Collector>) -> &mut Self {
        self.server.collectors.push(collector);
        self
    }

    pub fn build(self) -> Components {
        tracing::debug!(modules = ?self.modules, "assembly complete");
        Components {
            server: self.server,
            probes: self.probes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::health::{HealthChecker, ProbeKind, ProbeStatus};

    struct Store;

    impl Probe for Store {
        fn check(&self) -> ProbeStatus {
            ProbeStatus::healthy("ok")
        }
    }

    struct Probes;

    impl Module for Probes {
        fn name(&self) -> &'static str {
            "probes"
        }

        fn register(&self, assembly: &mut Assembly) -> Result<()> {
            assembly.register_probe(Store, [ProbeKind::Liveness, ProbeKind::Readiness]);
            Ok(())
        }
    }

    struct Broken;

    impl Module for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn register(&self, _assembly: &mut Assembly) -> Result<()> {
            Err(Error::Module {
                module: "broken",
                reason: "missing settings".into(),
            })
        }
    }

    #[test]
    fn modules_register_into_collection_points() {
        let mut assembly = Assembly::new();
        assembly.install(&Probes).unwrap();
        assert_eq!(assembly.modules(), ["probes"]);

        let Components { server, probes } = assembly.build();
        assert!(server.services.is_empty());
        let checker = HealthChecker::compose(probes).unwrap();
        assert!(checker.check(ProbeKind::Readiness).success);
        assert_eq!(checker.probes(ProbeKind::Startup).len(), 0);
    }

    #[test]
    fn failing_module_is_not_recorded() {
        let mut assembly = Assembly::new();
        let err = assembly.install(&Broken).unwrap_err();
        assert!(err.to_string().contains("missing settings"));
        assert!(assembly.modules().is_empty());
    }

    #[test]
    fn shared_interceptor_joins_both_chains() {
        let mut assembly = Assembly::new();
        assembly.register_interceptor(crate::server::middleware::RecoveryInterceptor::new(false));
        assembly.register_unary_interceptor(crate::server::middleware::RecoveryInterceptor::new(true));
        assembly.register_server_option(|server| server.tcp_nodelay(false));

        let Components { server, .. } = assembly.build();
        assert_eq!(server.interceptors.unary.len(), 2);
        assert_eq!(server.interceptors.stream.len(), 1);
        assert!(Arc::ptr_eq(
            &server.interceptors.unary[0],
            &server.interceptors.stream[0]
        ));
        assert_eq!(server.options.len(), 1);
    }
}
