//! Compile the grpc service definitions exposed and used
//! for testing in this crate and others that want to test
//! tonic functionality.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/hello.proto", "proto/test.proto"], &["proto/"])?;
    Ok(())
}
