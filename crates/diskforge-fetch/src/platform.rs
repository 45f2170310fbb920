//! Host platform facts used to pick a release asset and name the binary.

/// Platform description for the running host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    /// Human-readable name, e.g. `"Windows (x86_64)"`.
    pub name: String,
    pub os: String,
    pub arch: String,
    /// Archive suffix a matching release asset must end with.
    pub archive_extension: String,
    /// Substring a matching release asset name must contain.
    pub arch_marker: String,
    /// File name of the imaging tool binary.
    pub binary_name: String,
}

impl Platform {
    /// Detect the platform this binary was compiled for.
    pub fn current() -> Self {
        let os = if cfg!(target_os = "windows") {
            "windows"
        } else if cfg!(target_os = "macos") {
            "macos"
        } else if cfg!(target_os = "linux") {
            "linux"
        } else {
            "unknown"
        };

        let arch = if cfg!(target_arch = "x86_64") {
            "x86_64"
        } else if cfg!(target_arch = "aarch64") {
            "aarch64"
        } else {
            "unknown"
        };

        Self::for_target(os, arch)
    }

    /// Build the description for an explicit `(os, arch)` pair.
    pub fn for_target(os: &str, arch: &str) -> Self {
        let name = match (os, arch) {
            ("linux", "x86_64") => "Linux (x86_64)".to_string(),
            ("linux", "aarch64") => "Linux (ARM64)".to_string(),
            ("macos", "x86_64") => "macOS (Intel)".to_string(),
            ("macos", "aarch64") => "macOS (Apple Silicon)".to_string(),
            ("windows", "x86_64") => "Windows (x86_64)".to_string(),
            ("windows", "aarch64") => "Windows (ARM64)".to_string(),
            _ => format!("Unknown ({os}/{arch})"),
        };

        let archive_extension = if os == "windows" { ".zip" } else { ".tar.gz" };

        let arch_marker = match (os, arch) {
            ("windows", "x86_64") => "x64",
            ("windows", "aarch64") => "arm64",
            (_, "x86_64") => "x86_64",
            (_, "aarch64") => "aarch64",
            _ => arch,
        };

        let binary_name = if os == "windows" {
            "qemu-img.exe"
        } else {
            "qemu-img"
        };

        Self {
            name,
            os: os.to_string(),
            arch: arch.to_string(),
            archive_extension: archive_extension.to_string(),
            arch_marker: arch_marker.to_string(),
            binary_name: binary_name.to_string(),
        }
    }
}
