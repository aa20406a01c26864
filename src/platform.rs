//! Platform detection for selecting the correct archive.

use std::sync::OnceLock;

/// Map a raw OS token to its canonical form.
///
/// `darwin` becomes `macos`, `windows`/`win32` become `windows`, everything
/// else maps to `linux`.
pub fn canonical_os(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "darwin" | "macos" => "macos".to_string(),
        "windows" | "win32" => "windows".to_string(),
        _ => "linux".to_string(),
    }
}

/// Map a raw architecture token to its canonical form.
///
/// Unknown architectures pass through lowercased so future archives can be
/// matched without a code change.
pub fn canonical_arch(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "x86_64" | "amd64" => "x86_64".to_string(),
        "aarch64" | "arm64" => "aarch64".to_string(),
        other => other.to_string(),
    }
}

/// Detect the host platform as canonical `(os, arch)` tokens.
pub fn detect() -> (String, String) {
    (
        canonical_os(std::env::consts::OS),
        canonical_arch(std::env::consts::ARCH),
    )
}

/// Cached host platform, computed once per process.
pub fn current() -> &'static (String, String) {
    static PLATFORM: OnceLock<(String, String)> = OnceLock::new();
    PLATFORM.get_or_init(detect)
}
