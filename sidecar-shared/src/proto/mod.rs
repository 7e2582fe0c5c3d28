//! Generated Protocol Buffer types and service stubs.
//!
//! Code is generated by `build.rs` via `tonic-prost-build` from the files in
//! `proto/durable/v1/` and included here. The file descriptor set is exposed
//! for gRPC server reflection.

#[allow(clippy::all)]
pub mod v1 {
    include!(concat!(env!("OUT_DIR"), "/durable.v1.rs"));

    /// File descriptor set for gRPC server reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/durable_descriptor.bin"));
}
