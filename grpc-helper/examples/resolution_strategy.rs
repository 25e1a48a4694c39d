use std::time::Duration;

use anyhow::Context;
use grpc_helper::{GrpcHelper, ResolutionStrategy, RetryPolicy, ServiceDefinition};
use shared_proto::pb::{greeter_client::GreeterClient, HelloRequest};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let definition = ServiceDefinition::new("helloworld", "Greeter")?.unary("SayHello")?;

    // By setting the resolution strategy to `Eager` the SRV records are resolved
    // before the helper is returned, which ensures that it will have a
    // non-empty set of backends to contact before the program starts.
    let helper = GrpcHelper::builder("dns://_grpc._tcp.greeter?intervalMs=10000", definition)
        .resolution_strategy(ResolutionStrategy::Eager {
            timeout: Duration::from_secs(20),
        })
        .retry(RetryPolicy::default().retries(3))
        .build()
        .await
        .context("failed to build GrpcHelper")?;

    // A generated client can drive the channel of the next backend directly.
    let mut client = GreeterClient::new(helper.get_client()?.channel());

    let request = tonic::Request::new(HelloRequest {
        name: "hello".into(),
    });

    let response = client.say_hello(request).await?;

    println!("RESPONSE={response:?}");

    Ok(())
}
