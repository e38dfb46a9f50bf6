//! Server lifecycle as a typestate.
//!
//! ```text
//! ServerComposer ──assemble()──▶ AssembledServer ──start()──▶ RunningServer ──stop()──▶ StoppedServer
//! ```
//!
//! Each transition consumes the previous state, so a server can be assembled
//! and started at most once.

use super::middleware::{ChainLayer, ContributedInterceptors, MiddlewareChain};
use super::service::{
    HEALTH_CHECK_PATH, HEALTH_WATCH_PATH, MethodKind, MethodTable, REFLECTION_PATH,
    ServiceRegistry,
};
use super::transport::{InProcessDialer, Listener};
use crate::{
    Error, Result,
    config::ServerConfig,
    metrics::{Collector, MetricsRegistry},
};
use core::fmt;
use opentelemetry::metrics::Meter;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tonic::transport::Server;
use tonic::transport::server::Router;
use tonic_health::ServingStatus;
use tonic_health::server::HealthReporter;
use tower::layer::util::{Identity, Stack};

/// A deferred adjustment of the transport server, applied after the base
/// options derived from configuration.
pub type ServerOption = Box<dyn FnOnce(Server) -> Server + Send>;

type ComposedRouter = Router<Stack<ChainLayer, Identity>>;
type ServeResult = core::result::Result<(), tonic::transport::Error>;

/// The lifecycle states, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unbuilt,
    Assembled,
    Started,
    Stopped,
}

/// Everything feature modules contributed towards the server.
#[derive(Default)]
pub struct ServerContributions {
    pub services: ServiceRegistry,
    pub interceptors: ContributedInterceptors,
    pub options: Vec<ServerOption>,
    pub collectors: Vec<Arc<dyn Collector>>,
}

impl fmt::Debug for ServerContributions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerContributions")
            .field("services", &self.services)
            .field("interceptors", &self.interceptors)
            .field("options", &self.options.len())
            .field("collectors", &self.collectors.len())
            .finish()
    }
}

/// An unbuilt server.
pub struct ServerComposer {
    config: ServerConfig,
    contributions: ServerContributions,
    meter: Option<Meter>,
}

impl ServerComposer {
    pub fn new(config: ServerConfig, contributions: ServerContributions) -> Self {
        Self {
            config,
            contributions,
            meter: None,
        }
    }

    /// Meter for server metrics and collectors. Defaults to the global meter
    /// provider.
    pub fn with_meter(mut self, meter: Meter) -> Self {
        self.meter = Some(meter);
        self
    }

    pub fn state(&self) -> ServerState {
        ServerState::Unbuilt
    }

    /// Resolves contributions and builds the router.
    ///
    /// # Errors
    ///
    /// Any composition error aborts assembly and nothing is built:
    /// - invalid configuration
    /// - a service definition without a matching contribution
    /// - a contribution of the wrong concrete type
    /// - a duplicate metrics collector
    /// - a reflection service that cannot be built
    pub fn assemble(self) -> Result<AssembledServer> {
        let Self {
            config,
            contributions,
            meter,
        } = self;
        config.validate()?;

        let registrations = contributions.services.resolve()?;

        let mut metrics = meter.map_or_else(MetricsRegistry::global, MetricsRegistry::new);
        for collector in contributions.collectors {
            metrics.register(collector)?;
        }
        let chain = MiddlewareChain::build(&config, &mut metrics, contributions.interceptors)?;

        let mut server = Server::builder().accept_http1(true).tcp_nodelay(true);
        if let Some(timeout) = config.timeout() {
            server = server.timeout(timeout);
        }
        if let Some(limit) = config.concurrency_limit {
            server = server.concurrency_limit_per_connection(limit);
        }
        for option in contributions.options {
            server = option(server);
        }

        let mut methods = MethodTable::default();
        let mut routes = RoutesBuilder::default();
        let mut descriptor_sets = Vec::new();
        let mut services = Vec::with_capacity(registrations.len());

        let health = config.health_service.then(|| {
            let (reporter, service) = tonic_health::server::health_reporter();
            routes.add_service(service);
            methods.insert(HEALTH_CHECK_PATH, MethodKind::Unary);
            methods.insert(HEALTH_WATCH_PATH, MethodKind::ServerStreaming);
            descriptor_sets.push(tonic_health::pb::FILE_DESCRIPTOR_SET);
            reporter
        });

        for registration in &registrations {
            let descriptor = registration.metadata();
            descriptor.mount(registration.contribution(), &mut routes)?;
            methods.insert_service(descriptor);
            descriptor_sets.extend(descriptor.file_descriptor_set());
            services.push(descriptor.name());
            tracing::info!(
                service = descriptor.name(),
                identity = %registration.identity(),
                methods = descriptor.methods().len(),
                "mounted service"
            );
        }

        if config.reflection {
            let reflection = descriptor_sets
                .iter()
                .copied()
                .fold(
                    tonic_reflection::server::Builder::configure(),
                    |builder, encoded| builder.register_encoded_file_descriptor_set(encoded),
                )
                .build_v1()?;
            routes.add_service(reflection);
            methods.insert(REFLECTION_PATH, MethodKind::BidiStreaming);
        }

        let router = server
            .layer(ChainLayer::new(chain, methods))
            .add_routes(routes.routes());

        tracing::debug!(services = ?services, "assembled server");
        Ok(AssembledServer {
            config,
            router,
            health,
            services,
        })
    }
}

impl fmt::Debug for ServerComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerComposer")
            .field("config", &self.config)
            .field("contributions", &self.contributions)
            .finish_non_exhaustive()
    }
}

/// A fully built server that has not bound a listener yet.
pub struct AssembledServer {
    config: ServerConfig,
    router: ComposedRouter,
    health: Option<HealthReporter>,
    services: Vec<&'static str>,
}

impl AssembledServer {
    pub fn state(&self) -> ServerState {
        ServerState::Assembled
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Names of the mounted application services.
    pub fn services(&self) -> &[&'static str] {
        &self.services
    }

    /// Binds the listener and spawns the serve loop.
    ///
    /// A listener that cannot be bound is logged and leaves the server
    /// started but not serving: no serve loop runs, every mounted service
    /// reports NOT_SERVING and [`RunningServer::bind_error`] holds the
    /// [`Error::Bind`](crate::Error::Bind). The process stays up.
    pub async fn start(self) -> RunningServer {
        let Self {
            config,
            router,
            health,
            services,
        } = self;

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone().cancelled_owned();
        let (task, transport) = match Listener::bind(&config).await {
            Ok(Listener::Tcp(listener)) => {
                let local_addr = listener.local_addr().ok();
                let incoming = TcpListenerStream::new(listener);
                tracing::info!(address = ?local_addr, "serving on network listener");
                (
                    Some(tokio::spawn(router.serve_with_incoming_shutdown(incoming, signal))),
                    ActiveTransport::Network { local_addr },
                )
            }
            Ok(Listener::InProcess(listener)) => {
                let dialer = listener.dialer();
                tracing::info!(buffer_size = dialer.buffer_size(), "serving in-process");
                (
                    Some(tokio::spawn(router.serve_with_incoming_shutdown(listener.into_stream(), signal))),
                    ActiveTransport::InProcess { dialer },
                )
            }
            Err(error) => {
                tracing::error!(%error, "failed to bind listener, server is not serving");
                (None, ActiveTransport::Unbound { error })
            }
        };

        if let Some(reporter) = &health {
            let status = if task.is_some() {
                ServingStatus::Serving
            } else {
                ServingStatus::NotServing
            };
            for service in &services {
                reporter.set_service_status(service, status).await;
            }
        }

        RunningServer {
            shutdown,
            task,
            transport,
            health,
            services,
        }
    }
}

impl fmt::Debug for AssembledServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssembledServer")
            .field("config", &self.config)
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
enum ActiveTransport {
    Network { local_addr: Option<SocketAddr> },
    InProcess { dialer: InProcessDialer },
    Unbound { error: Error },
}

/// A started server. Its serve loop runs on its own task unless the listener
/// could not be bound.
pub struct RunningServer {
    shutdown: CancellationToken,
    task: Option<JoinHandle<ServeResult>>,
    transport: ActiveTransport,
    health: Option<HealthReporter>,
    services: Vec<&'static str>,
}

impl RunningServer {
    pub fn state(&self) -> ServerState {
        ServerState::Started
    }

    /// The bound socket address in network mode.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.transport {
            ActiveTransport::Network { local_addr } => *local_addr,
            _ => None,
        }
    }

    /// The dialer in in-process mode.
    pub fn dialer(&self) -> Option<&InProcessDialer> {
        match &self.transport {
            ActiveTransport::InProcess { dialer } => Some(dialer),
            _ => None,
        }
    }

    pub fn is_in_process(&self) -> bool {
        matches!(self.transport, ActiveTransport::InProcess { .. })
    }

    /// Whether a serve loop was spawned.
    pub fn is_serving(&self) -> bool {
        self.task.is_some()
    }

    /// Why the server is not serving, if its listener could not be bound.
    pub fn bind_error(&self) -> Option<&Error> {
        match &self.transport {
            ActiveTransport::Unbound { error } => Some(error),
            _ => None,
        }
    }

    pub fn health_reporter(&self) -> Option<&HealthReporter> {
        self.health.as_ref()
    }

    /// Serves until `signal` resolves, then stops.
    ///
    /// Returns early if the serve loop exits on its own. A server that is not
    /// serving just waits for `signal`.
    ///
    /// # Errors
    ///
    /// Returns the serve loop's transport error, or
    /// [`Error::Join`](crate::Error::Join) if its task panicked.
    pub async fn run_until<F>(mut self, signal: F) -> Result<StoppedServer>
    where
        F: Future<Output = ()>,
    {
        let exited = match self.task.as_mut() {
            Some(task) => tokio::select! {
                joined = task => Some(joined),
                () = signal => None,
            },
            None => {
                signal.await;
                None
            }
        };

        match exited {
            Some(joined) => {
                joined??;
                tracing::warn!("serve loop exited before shutdown was requested");
                Ok(StoppedServer { _private: () })
            }
            None => self.stop().await,
        }
    }

    /// Marks services NOT_SERVING and shuts the serve loop down.
    ///
    /// In network mode in-flight calls are drained before this returns. The
    /// in-process transport holds no sockets, so it returns immediately.
    ///
    /// # Errors
    ///
    /// Network mode only: the serve loop's transport error, or
    /// [`Error::Join`](crate::Error::Join) if its task panicked.
    pub async fn stop(self) -> Result<StoppedServer> {
        if let Some(reporter) = &self.health {
            for service in &self.services {
                reporter
                    .set_service_status(service, ServingStatus::NotServing)
                    .await;
            }
        }

        self.shutdown.cancel();
        match (self.transport, self.task) {
            (ActiveTransport::Network { .. }, Some(task)) => {
                task.await??;
                tracing::info!("server drained and stopped");
            }
            (ActiveTransport::InProcess { .. }, _) => {
                tracing::info!("in-process server stopped");
            }
            _ => tracing::info!("stopped server that was not serving"),
        }
        Ok(StoppedServer { _private: () })
    }
}

impl fmt::Debug for RunningServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunningServer")
            .field("transport", &self.transport)
            .field("serving", &self.is_serving())
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}

/// Terminal state. A stopped server cannot be restarted.
#[derive(Debug)]
pub struct StoppedServer {
    _private: (),
}

impl StoppedServer {
    pub fn state(&self) -> ServerState {
        ServerState::Stopped
    }
}
