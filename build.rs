use std::env;

fn main() {
    // The build script runs on the host, so the target has to come from cargo.
    let arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();
    let file = match arch.as_str() {
        "x86_64" => "src/registers/x64.S",
        "aarch64" => "src/registers/aarch64.S",
        _ => return,
    };
    println!("cargo:rerun-if-changed={}", file);
    cc::Build::new().file(file).compile("capture");
}
