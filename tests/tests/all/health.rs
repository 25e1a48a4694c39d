use grpc_helper::{
    Address, CircuitBreaker, GrpcHelper, HealthCheck, HealthCheckConfig, HealthProbe, HelperError,
    ManualBreaker,
};
use parking_lot::Mutex;
use shared_proto::pb::{HelloReply, HelloRequest};
use std::sync::Arc;
use std::time::Duration;
use tests::greeter::{start_greeter, GreeterOptions, Health};
use tests::greeter_definition;
use tokio::net::TcpListener;
use tonic::transport::{Channel, Endpoint};

fn channel(address: &str) -> Channel {
    Endpoint::from_shared(format!("http://{address}"))
        .expect("invalid address")
        .connect_lazy()
}

async fn probe(health: Health) -> Result<(), HelperError> {
    let server = start_greeter(
        0,
        GreeterOptions {
            health,
            ..GreeterOptions::default()
        },
    )
    .await;

    HealthProbe::new(
        "helloworld.Greeter",
        Address::from(server.address()),
        channel(server.address()),
        Duration::from_secs(1),
    )
    .check()
    .await
}

#[tokio::test]
async fn serving_passes() {
    probe(Health::Serving).await.expect("health check failed");
}

#[tokio::test]
async fn not_serving_fails() {
    match probe(Health::NotServing).await {
        Err(HelperError::HealthCheckFailure(reason)) => assert!(reason.contains("NOT_SERVING")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn a_failing_call_fails() {
    assert!(matches!(
        probe(Health::Absent).await,
        Err(HelperError::HealthCheckFailure(_))
    ));
}

#[tokio::test]
async fn a_silent_server_times_out() {
    // Arrange
    // Accepts connections and never speaks http2.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let _silent = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let probe = HealthProbe::new(
        "helloworld.Greeter",
        Address::from(address.as_str()),
        channel(&address),
        Duration::from_millis(200),
    );

    // Act
    let result = probe.check().await;

    // Assert
    match result {
        Err(HelperError::HealthCheckFailure(reason)) => assert!(reason.contains("timed out")),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn breakers_get_a_probe_over_the_client_channel() {
    // Steps:
    //  1. Build a helper with health checks and a breaker factory keeping its breakers.
    //  2. Trip the breaker of the only server.
    //  3. Probe it.
    // What we want to test:
    //  An open breaker refuses calls, and a passing health check closes it again.

    // Arrange
    let server = start_greeter(0, GreeterOptions::default()).await;
    let breakers: Arc<Mutex<Vec<Arc<ManualBreaker>>>> = Arc::default();
    let created = Arc::clone(&breakers);

    let helper = GrpcHelper::builder(
        format!("static://{}", server.address()),
        greeter_definition(),
    )
    .health_check(HealthCheckConfig::enabled().timeout(Duration::from_secs(1)))
    .breaker_factory(
        move |name: String, check: Option<HealthCheck>| -> Arc<dyn CircuitBreaker> {
            let breaker = Arc::new(ManualBreaker::new(name, check));
            created.lock().push(Arc::clone(&breaker));
            breaker
        },
    )
    .build()
    .await
    .expect("failed to build helper");
    helper.wait_for_ready().await;

    let breaker = breakers.lock()[0].clone();
    assert_eq!(
        breaker.name(),
        format!("helloworld.Greeter-{}-brake", server.address())
    );

    // Act
    breaker.trip();
    let while_open: Result<HelloReply, _> = helper
        .call(
            "SayHello",
            HelloRequest {
                name: "world".to_string(),
            },
        )
        .await;
    breaker.probe().await.expect("health check failed");

    // Assert
    assert!(matches!(while_open, Err(HelperError::NoClientAvailable)));
    assert!(!breaker.is_open());
    assert!(helper.get_client().is_ok());
}

#[tokio::test]
async fn a_tripped_breaker_closes_after_a_passing_health_check() {
    // Steps:
    //  1. Build a helper with health checks, breakers checking every 20ms.
    //  2. Trip the breaker of the only server.
    //  3. Wait, without checking by hand.
    // What we want to test:
    //  The breaker runs the health check over the client channel on its own
    //  and the server comes back into rotation.

    // Arrange
    let server = start_greeter(0, GreeterOptions::default()).await;
    let breakers: Arc<Mutex<Vec<Arc<ManualBreaker>>>> = Arc::default();
    let created = Arc::clone(&breakers);

    let helper = GrpcHelper::builder(
        format!("static://{}", server.address()),
        greeter_definition(),
    )
    .health_check(HealthCheckConfig::enabled().timeout(Duration::from_secs(1)))
    .breaker_factory(
        move |name: String, check: Option<HealthCheck>| -> Arc<dyn CircuitBreaker> {
            let breaker = Arc::new(
                ManualBreaker::new(name, check).check_interval(Duration::from_millis(20)),
            );
            created.lock().push(Arc::clone(&breaker));
            breaker
        },
    )
    .build()
    .await
    .expect("failed to build helper");
    helper.wait_for_ready().await;
    let breaker = breakers.lock()[0].clone();

    // Act
    breaker.trip();
    let while_open = helper.get_client();
    for _ in 0..100 {
        if !breaker.is_open() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Assert
    assert!(matches!(while_open, Err(HelperError::NoClientAvailable)));
    assert!(!breaker.is_open());
    let reply: HelloReply = helper
        .call(
            "SayHello",
            HelloRequest {
                name: "world".to_string(),
            },
        )
        .await
        .expect("failed to call server");
    assert_eq!(reply.server_id, 0);
}
