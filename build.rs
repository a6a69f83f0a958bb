use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tell Cargo to rerun this build script if the proto file changes
    let proto_file = "shared/proto/wallet.proto";
    println!("cargo:rerun-if-changed={}", proto_file);

    // Tell Cargo to rerun if migrations directory changes
    println!("cargo:rerun-if-changed=migrations");

    // Build gRPC code from proto file
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("wallet_descriptor.bin"))
        .compile(&[proto_file], &["shared/proto"])?;

    // Note: Database migrations are handled at runtime by sqlx::migrate
    // No compile-time code generation needed for migrations

    Ok(())
}
