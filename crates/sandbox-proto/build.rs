use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR")?);

    // crates/sandbox-proto -> workspace root
    let proto_dir = manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .map(|p| p.join("proto"))
        .ok_or("failed to locate the workspace proto directory")?;

    println!("cargo:rerun-if-changed={}", proto_dir.display());

    let sandbox_io_proto = proto_dir.join("sandbox_io/v1/sandbox_io.proto");

    let mut config = prost_build::Config::new();
    config.protoc_executable(protoc_bin_vendored::protoc_bin_path()?);

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos_with_config(config, &[sandbox_io_proto], &[proto_dir])?;
    Ok(())
}
