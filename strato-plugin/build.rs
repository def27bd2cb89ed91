use std::process::Command;

/// Embed the building toolchain's semantic version so plugins compiled
/// against this crate carry a comparable ABI marker.
fn main() {
    let rustc = std::env::var("RUSTC").unwrap_or_else(|_| "rustc".to_string());
    let version = Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .and_then(|line| {
            // "rustc 1.85.0 (abcdef 2025-01-01)" -> "1.85.0"
            line.split_whitespace().nth(1).map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=STRATO_RUSTC_VERSION={version}");
}
