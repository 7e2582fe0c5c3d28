//! Build script for the sidecar-shared crate
//!
//! Compiles Protocol Buffer definitions for the worker-facing and management
//! gRPC services. Generated code is output to `$OUT_DIR/durable.v1.rs` and
//! included via `include!` macro in `src/proto/mod.rs`.
//!
//! Proto files are located in `proto/durable/v1/` relative to this crate.
//!
//! # Protocol Buffer Compiler
//!
//! This build script requires the `protoc` compiler to be installed on the
//! system. On macOS, install via: `brew install protobuf`

fn main() -> Result<(), Box<dyn std::error::Error>> {
    use std::path::PathBuf;

    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?);
    let proto_root = manifest_dir.join("proto");

    let proto_files = [
        "durable/v1/common.proto",
        "durable/v1/history.proto",
        "durable/v1/worker.proto",
        "durable/v1/management.proto",
    ];

    // Convert to full paths and verify each exists
    let proto_paths: Vec<PathBuf> = proto_files
        .iter()
        .map(|f| {
            let path = proto_root.join(f);
            if !path.exists() {
                panic!("Proto file not found: {:?}", path);
            }
            path
        })
        .collect();

    // Configure tonic-prost-build (tonic 0.14 API)
    tonic_prost_build::configure()
        // Generate server code
        .build_server(true)
        // Generate client code (used by SDK workers and the test harness)
        .build_client(true)
        // Generate transport implementations
        .build_transport(true)
        // Include file descriptor set for reflection
        .file_descriptor_set_path(
            PathBuf::from(std::env::var("OUT_DIR")?).join("durable_descriptor.bin"),
        )
        // Emit rerun-if-changed directives
        .emit_rerun_if_changed(true)
        .compile_protos(&proto_paths, std::slice::from_ref(&proto_root))?;

    println!("cargo:rerun-if-changed={}", proto_root.display());
    for proto in &proto_files {
        println!(
            "cargo:rerun-if-changed={}",
            proto_root.join(proto).display()
        );
    }

    Ok(())
}
