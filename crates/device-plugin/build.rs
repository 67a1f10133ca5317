fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/deviceplugin/v1beta1/api.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .format(false)
        .compile(
            &["proto/deviceplugin/v1beta1/api.proto"],
            &["proto/deviceplugin/v1beta1"],
        )?;
    Ok(())
}
