/// Builds the gRPC client and server code for the `orders.proto` definition
/// using `tonic-prost-build`.
///
/// This code generation step processes the Protocol Buffer definitions located
/// in the `proto` directory and emits Rust modules with gRPC bindings into the
/// crate's `OUT_DIR`. It also writes an encoded `FileDescriptorSet` next to the
/// bindings so the server can expose the service through gRPC reflection.
///
/// # Files and Paths
///
/// - Proto file: `proto/trellis/orders/v1/orders.proto`
/// - Includes: `proto/`
/// - Descriptor set: `$OUT_DIR/orders_descriptor.bin`
///
/// # Panics
///
/// This function will `panic!` if code generation fails.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("orders_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(
            config,
            &["proto/trellis/orders/v1/orders.proto"],
            &["proto"],
        )
        .unwrap();
}
