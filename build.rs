// Build script to map backend features onto the target platform
//
// `vulkan` works everywhere ash can load a loader at runtime.
// `metal` only makes sense on macOS; elsewhere it is ignored with a warning.

use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rustc-check-cfg=cfg(backend_vulkan)");
    println!("cargo:rustc-check-cfg=cfg(backend_metal)");

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();

    if feature_enabled("VULKAN") {
        println!("cargo:rustc-cfg=backend_vulkan");
    }

    if feature_enabled("METAL") {
        if target_os == "macos" {
            println!("cargo:rustc-cfg=backend_metal");
        } else {
            println!(
                "cargo:warning=feature `metal` has no effect on target os `{}`",
                target_os
            );
        }
    }
}

fn feature_enabled(name: &str) -> bool {
    env::var_os(format!("CARGO_FEATURE_{}", name)).is_some()
}
