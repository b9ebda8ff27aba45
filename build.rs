//! Build script: embeds the git hash and sanity-checks GPU toolkits before
//! whisper-rs-sys starts compiling, so missing toolkits fail with a clear
//! message instead of a wall of cmake errors.

use std::process::Command;

fn main() {
    // Embed git short hash for the version string
    if let Ok(output) = Command::new("git")
        .args(["rev-parse", "--short=7", "HEAD"])
        .output()
        && output.status.success()
    {
        let hash = String::from_utf8_lossy(&output.stdout).trim().to_string();
        println!("cargo:rustc-env=GIT_HASH={}", hash);
    }
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads/");

    if cfg!(feature = "cuda") {
        require_tool("nvcc", "CUDA toolkit", "https://developer.nvidia.com/cuda-downloads");
    }
    if cfg!(feature = "vulkan") {
        require_tool("vulkaninfo", "Vulkan SDK", "https://vulkan.lunarg.com/");
    }
    if cfg!(feature = "hipblas") {
        require_tool("rocminfo", "ROCm", "https://rocm.docs.amd.com/");
    }
}

fn require_tool(tool: &str, toolkit: &str, url: &str) {
    if Command::new(tool).arg("--version").output().is_err() {
        panic!(
            "\n\n`{tool}` not found — {toolkit} is not installed.\n\
             Install: {url}\n\
             Or build without this feature: cargo build --release\n",
        );
    }
    println!("cargo::warning={toolkit} detected");
}
