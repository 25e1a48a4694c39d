//! Protobuf messages and tonic services shared by the tests.

pub mod pb {
    tonic::include_proto!("helloworld");
    tonic::include_proto!("test");
}
