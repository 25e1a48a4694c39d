//! A `test.TestService` with one method of every streaming shape.

use std::pin::Pin;

use futures::{Stream, StreamExt};
use shared_proto::pb::test_service_server::{TestService, TestServiceServer};
use shared_proto::pb::Chunk;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};

use crate::greeter::echo;
use crate::test_server::TestServer;

type ChunkStream = Pin<Box<dyn Stream<Item = Result<Chunk, Status>> + Send>>;

#[derive(Debug, Clone, Default)]
pub struct EchoTestService;

#[tonic::async_trait]
impl TestService for EchoTestService {
    async fn unary(&self, request: Request<Chunk>) -> Result<Response<Chunk>, Status> {
        let echoed = echo(request.metadata());
        let mut response = Response::new(request.into_inner());
        *response.metadata_mut() = echoed;
        Ok(response)
    }

    /// Joins every body with `,`.
    async fn client_stream(
        &self,
        request: Request<Streaming<Chunk>>,
    ) -> Result<Response<Chunk>, Status> {
        let echoed = echo(request.metadata());
        let mut stream = request.into_inner();

        let mut bodies = Vec::new();
        while let Some(chunk) = stream.message().await? {
            bodies.push(chunk.body);
        }

        let mut response = Response::new(Chunk {
            body: bodies.join(","),
        });
        *response.metadata_mut() = echoed;
        Ok(response)
    }

    type ServerStreamStream = ChunkStream;

    /// Splits the body at `,` and sends every part on its own.
    async fn server_stream(
        &self,
        request: Request<Chunk>,
    ) -> Result<Response<Self::ServerStreamStream>, Status> {
        let echoed = echo(request.metadata());
        let parts: Vec<Result<Chunk, Status>> = request
            .into_inner()
            .body
            .split(',')
            .map(|part| {
                Ok(Chunk {
                    body: part.to_string(),
                })
            })
            .collect();

        let mut response = Response::new(Box::pin(futures::stream::iter(parts)) as ChunkStream);
        *response.metadata_mut() = echoed;
        Ok(response)
    }

    type BidiStreamStream = ChunkStream;

    /// Sends every chunk back upper-cased.
    async fn bidi_stream(
        &self,
        request: Request<Streaming<Chunk>>,
    ) -> Result<Response<Self::BidiStreamStream>, Status> {
        let echoed = echo(request.metadata());
        let replies = request.into_inner().map(|chunk| {
            chunk.map(|chunk| Chunk {
                body: chunk.body.to_uppercase(),
            })
        });

        let mut response = Response::new(Box::pin(replies) as ChunkStream);
        *response.metadata_mut() = echoed;
        Ok(response)
    }
}

pub async fn start_test_service() -> TestServer {
    let router = Server::builder().add_service(TestServiceServer::new(EchoTestService));
    TestServer::start_with_router(router, None::<String>).await
}
