mod common;

use common::{ORDER_SERVICE, TestOrders, order_descriptor};
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::{HealthCheckRequest, health_client::HealthClient};
use trellis::server::ServerComposer;
use trellis::{Assembly, HealthChecker, Module, ProbeKind, ProbeStatus, Result, ServerConfig};

struct Cache;

impl trellis::Probe for Cache {
    fn check(&self) -> ProbeStatus {
        ProbeStatus::healthy("cache warm")
    }
}

struct Queue;

impl trellis::Probe for Queue {
    fn check(&self) -> ProbeStatus {
        ProbeStatus::unhealthy("queue backlog")
    }
}

struct OrdersModule;

impl Module for OrdersModule {
    fn name(&self) -> &'static str {
        "orders"
    }

    fn register(&self, assembly: &mut Assembly) -> Result<()> {
        assembly
            .register_service(TestOrders::default(), order_descriptor())
            .register_probe(Cache, [ProbeKind::Liveness, ProbeKind::Readiness])
            .register_probe(Queue, ProbeKind::Liveness);
        Ok(())
    }
}

#[tokio::test]
async fn one_module_feeds_the_server_and_the_checker() {
    let mut assembly = Assembly::new();
    assembly.install(&OrdersModule).unwrap();
    let components = assembly.build();

    let checker = HealthChecker::compose(components.probes).unwrap();

    let liveness = checker.check(ProbeKind::Liveness);
    assert!(!liveness.success);
    let messages: Vec<_> = liveness.messages().map(|(_, message)| message).collect();
    assert_eq!(messages.len(), 2);
    assert!(messages.contains(&"cache warm"));
    assert!(messages.contains(&"queue backlog"));
    assert_eq!(liveness.failures().count(), 1);

    assert!(checker.check(ProbeKind::Readiness).success);

    let startup = checker.check(ProbeKind::Startup);
    assert!(startup.success);
    assert!(startup.probes.is_empty());

    let server = ServerComposer::new(ServerConfig::in_process(), components.server)
        .assemble()
        .unwrap()
        .start()
        .await;
    let channel = server.dialer().unwrap().channel().await.unwrap();
    let mut health = HealthClient::new(channel);

    let response = health
        .check(HealthCheckRequest {
            service: ORDER_SERVICE.to_string(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.status(), ServingStatus::Serving);

    drop(health);
    server.stop().await.unwrap();
}

#[test]
fn checker_runs_outside_any_runtime() {
    let mut assembly = Assembly::new();
    assembly.register_probe(|| ProbeStatus::healthy("ok"), ProbeKind::Startup);

    let checker = HealthChecker::compose(assembly.build().probes).unwrap();
    let report = checker.check(ProbeKind::Startup);
    assert!(report.success);
    assert_eq!(report.probes.len(), 1);
}
