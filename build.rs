// Build script: decide whether the mimalloc allocator is usable for the
// target. mimalloc's C sources do not build cleanly everywhere (32-bit,
// arm, musl, android, freebsd, mingw), so those targets fall back to the
// system allocator via the `disable_mimalloc` cfg consumed by src/main.rs.

use std::env;

fn main() {
    let target = env::var("TARGET").unwrap_or_default();
    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();
    let target_arch = env::var("CARGO_CFG_TARGET_ARCH").unwrap_or_default();

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=TARGET");

    // Register the custom cfg condition to avoid warnings
    println!("cargo:rustc-check-cfg=cfg(disable_mimalloc)");

    let disable_mimalloc = target.contains("gnu")
        || target_env == "musl"
        || target_arch == "arm"
        || target_arch == "armv7"
        || target.contains("i686")
        || target.contains("android")
        || target.contains("freebsd");

    if disable_mimalloc {
        println!("cargo:rustc-cfg=disable_mimalloc");
        println!("cargo:warning=Disabling mimalloc for target: {}", target);
    }

    // Static runtime linkage for targets that ship without one
    match target_os.as_str() {
        "windows" => {
            if target_env == "gnu" {
                println!("cargo:rustc-link-arg=-static-libgcc");
                println!("cargo:rustc-link-arg=-static-libstdc++");
            }
        }
        "linux" => {
            if target_env == "musl" {
                println!("cargo:rustc-link-arg=-static");
            }
        }
        _ => {}
    }
}
