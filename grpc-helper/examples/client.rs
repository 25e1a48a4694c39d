use anyhow::Context;
use grpc_helper::{GrpcHelper, ServiceDefinition};
use shared_proto::pb::{HelloReply, HelloRequest};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let definition = ServiceDefinition::new("helloworld", "Greeter")?.unary("SayHello")?;

    // Calls alternate between the two servers.
    let helper = GrpcHelper::builder("static://localhost:50051,localhost:50052", definition)
        .timeout(std::time::Duration::from_secs(5))
        .build()
        .await
        .context("failed to build GrpcHelper")?;
    helper.wait_for_ready().await;

    for _ in 0..4 {
        let reply: HelloReply = helper
            .call(
                "SayHello",
                HelloRequest {
                    name: "hello".into(),
                },
            )
            .await?;

        println!("RESPONSE={reply:?}");
    }

    helper.close().await;

    Ok(())
}
