use grpc_helper::{
    CallRecord, GrpcHelper, HelperError, PrometheusObserver, ResolutionStrategy, RetryPolicy,
};
use parking_lot::Mutex;
use shared_proto::pb::{HelloReply, HelloRequest};
use std::sync::Arc;
use std::time::Duration;
use tests::discovery::FakeLookup;
use tests::greeter::{start_greeter, start_greeters, GreeterOptions};
use tests::{greeter_definition, static_target};
use tonic::metadata::MetadataMap;

fn hello(name: &str) -> HelloRequest {
    HelloRequest {
        name: name.to_string(),
    }
}

#[tokio::test]
async fn retries_until_a_healthy_backend_answers() {
    // Steps:
    //  1. Start two servers that always fail and one that works.
    //  2. Call with retries enabled.
    // What we want to test:
    //  Every call ends on the working server, and each failed attempt is
    //  reported to the retry callback with the server's error.

    // Arrange
    let failing = GreeterOptions {
        always_error: true,
        ..GreeterOptions::default()
    };
    let servers = vec![
        start_greeter(0, failing.clone()).await,
        start_greeter(1, failing).await,
        start_greeter(2, GreeterOptions::default()).await,
    ];

    let retried: Arc<Mutex<Vec<(String, u32)>>> = Arc::default();
    let seen = Arc::clone(&retried);
    let policy = RetryPolicy::default()
        .retries(5)
        .min_delay(Duration::from_millis(1))
        .jitter(false)
        .on_retry(move |err, attempt| {
            let message = err.status().map(|status| status.message().to_string());
            seen.lock().push((message.unwrap_or_default(), attempt));
        });

    let helper = GrpcHelper::builder(static_target(&servers), greeter_definition())
        .retry(policy)
        .build()
        .await
        .expect("failed to build helper");
    helper.wait_for_ready().await;

    // Act
    let mut ids = Vec::new();
    for _ in 0..3 {
        let reply: HelloReply = helper
            .call("SayHello", hello("world"))
            .await
            .expect("retries did not reach the healthy server");
        ids.push(reply.server_id);
    }

    // Assert
    assert_eq!(ids, vec![2, 2, 2]);
    let retried = retried.lock();
    assert!(!retried.is_empty());
    assert!(retried
        .iter()
        .all(|(message, attempt)| message == "server_error" && *attempt <= 2));
}

#[tokio::test]
async fn bail_returns_the_error_of_that_attempt() {
    // Arrange
    let servers = start_greeters(
        2,
        GreeterOptions {
            always_error: true,
            ..GreeterOptions::default()
        },
    )
    .await;

    let attempts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&attempts);
    let policy = RetryPolicy::default()
        .retries(5)
        .min_delay(Duration::from_millis(1))
        .bail(move |_, attempt| {
            seen.lock().push(attempt);
            attempt == 2
        });

    let helper = GrpcHelper::builder(static_target(&servers), greeter_definition())
        .retry(policy)
        .build()
        .await
        .expect("failed to build helper");
    helper.wait_for_ready().await;

    // Act
    let result: Result<HelloReply, _> = helper.call("SayHello", hello("world")).await;

    // Assert
    let err = result.unwrap_err();
    assert_eq!(err.status().map(|status| status.code()), Some(tonic::Code::Internal));
    assert_eq!(*attempts.lock(), vec![1, 2]);
}

#[tokio::test]
async fn unknown_scheme_is_rejected() {
    let result = GrpcHelper::builder("unknown://target", greeter_definition())
        .build()
        .await;

    match result {
        Err(err @ HelperError::ResolverNotImplemented(_)) => {
            assert_eq!(err.to_string(), "resolver not implemented: unknown")
        }
        Err(err) => panic!("unexpected error: {err}"),
        Ok(_) => panic!("unknown scheme must not resolve"),
    }
}

#[tokio::test]
async fn full_responses_carry_metadata_and_peer() {
    // Arrange
    let server = start_greeter(7, GreeterOptions::default()).await;
    let helper = GrpcHelper::builder(
        format!("static://{}", server.address()),
        greeter_definition(),
    )
    .build()
    .await
    .expect("failed to build helper");
    helper.wait_for_ready().await;

    let mut metadata = MetadataMap::new();
    metadata.insert("x-request-id", "42".parse().unwrap());

    // Act
    let response = helper
        .call_full::<_, HelloReply>("say_hello", hello("metadata"), metadata)
        .await
        .expect("failed to call server");

    // Assert
    assert_eq!(response.message.message, "hello metadata");
    assert_eq!(response.message.server_id, 7);
    assert_eq!(response.status, tonic::Code::Ok);
    assert_eq!(response.peer.as_str(), server.address());
    assert_eq!(response.metadata.get("x-request-id").unwrap(), "42");
}

#[tokio::test]
async fn interceptors_decorate_every_request() {
    // Arrange
    let server = start_greeter(0, GreeterOptions::default()).await;
    let helper = GrpcHelper::builder(
        format!("static://{}", server.address()),
        greeter_definition(),
    )
    .interceptor(|mut request| {
        request
            .metadata_mut()
            .insert("x-caller", "integration".parse().unwrap());
        Ok(request)
    })
    .build()
    .await
    .expect("failed to build helper");
    helper.wait_for_ready().await;

    // Act
    let response = helper
        .call_full::<_, HelloReply>("SayHello", hello("world"), MetadataMap::new())
        .await
        .expect("failed to call server");

    // Assert
    assert_eq!(response.metadata.get("x-caller").unwrap(), "integration");
}

#[tokio::test]
async fn eager_resolution_times_out_without_addresses() {
    // Arrange
    let lookup = FakeLookup::default();
    lookup.fail(true);

    // Act
    let result = GrpcHelper::builder("dns://_grpc._tcp.greeter?intervalMs=10", greeter_definition())
        .lookup_service(lookup.clone())
        .resolution_strategy(ResolutionStrategy::Eager {
            timeout: Duration::from_millis(100),
        })
        .build()
        .await;

    // Assert
    assert!(matches!(result, Err(HelperError::Timeout(_))));
    assert!(lookup.calls() > 0);
}

#[tokio::test]
async fn client_streaming_calls_reach_one_server() {
    // Arrange
    let servers = start_greeters(2, GreeterOptions::default()).await;
    let helper = GrpcHelper::builder(static_target(&servers), greeter_definition())
        .build()
        .await
        .expect("failed to build helper");
    helper.wait_for_ready().await;

    // Act
    let names = futures::stream::iter(vec![hello("a"), hello("b"), hello("c")]);
    let reply: HelloReply = helper
        .client_streaming("SayMultiHello", names)
        .await
        .expect("failed to stream to server");

    // Assert
    assert_eq!(reply.message, "hello a,b,c");
    assert_eq!(reply.count, 3);
}

#[tokio::test]
async fn call_outcomes_are_observed() {
    // Steps:
    //  1. Start a working server and a failing one.
    //  2. Build a helper with a prometheus observer and a recording one.
    //  3. Call once per server.
    // What we want to test:
    //  Every call is reported with its peer, method and outcome, and lands
    //  in the response duration histogram under the matching state.

    // Arrange
    let servers = vec![
        start_greeter(0, GreeterOptions::default()).await,
        start_greeter(
            1,
            GreeterOptions {
                always_error: true,
                ..GreeterOptions::default()
            },
        )
        .await,
    ];
    let registry = prometheus::Registry::new();
    let durations = PrometheusObserver::register(&registry).expect("failed to register");
    let recorded: Arc<Mutex<Vec<(String, String, tonic::Code)>>> = Arc::default();
    let seen = Arc::clone(&recorded);

    let helper = GrpcHelper::builder(static_target(&servers), greeter_definition())
        .observer(durations.clone())
        .observer(move |call: &CallRecord<'_>| {
            seen.lock()
                .push((call.peer.to_string(), call.method.to_string(), call.code));
        })
        .build()
        .await
        .expect("failed to build helper");
    helper.wait_for_ready().await;

    // Act
    for _ in 0..2 {
        let _: Result<HelloReply, _> = helper.call("SayHello", hello("world")).await;
    }

    // Assert
    let mut recorded = recorded.lock().clone();
    recorded.sort_by(|a, b| a.0.cmp(&b.0));
    let mut expected = vec![
        (
            servers[0].address().to_string(),
            "/helloworld.Greeter/SayHello".to_string(),
            tonic::Code::Ok,
        ),
        (
            servers[1].address().to_string(),
            "/helloworld.Greeter/SayHello".to_string(),
            tonic::Code::Internal,
        ),
    ];
    expected.sort_by(|a, b| a.0.cmp(&b.0));
    assert_eq!(recorded, expected);

    let count = |peer: &str, state: &str| {
        durations
            .histogram()
            .with_label_values(&[
                "helloworld",
                "Greeter",
                peer,
                "/helloworld.Greeter/SayHello",
                state,
            ])
            .get_sample_count()
    };
    assert_eq!(count(servers[0].address(), "success"), 1);
    assert_eq!(count(servers[1].address(), "fail"), 1);
}
