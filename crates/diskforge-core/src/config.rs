//! Runtime configuration, loaded from environment variables.

use std::env;
use std::path::PathBuf;

use diskforge_fetch::DEFAULT_API_BASE;

/// Release repository that publishes standalone qemu-img builds.
pub const DEFAULT_RELEASE_REPO: &str = "fdcastel/qemu-img-windows-x64";

/// Runtime configuration for diskforge.
///
/// Every field has a default so nothing needs to be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory shipped next to the program holding qemu-img and its
    /// libraries (default: `<exe dir>/tools/qemu`). Never written to.
    pub bundled_dir: PathBuf,

    /// Per-user directory acquisition installs into.
    pub install_dir: PathBuf,

    /// Explicit qemu-img path; skips the locator when set.
    pub tool_override: Option<PathBuf>,

    /// `owner/repo` the release metadata is queried from.
    pub release_repo: String,

    /// Base URL of the release metadata API.
    pub release_api_base: String,

    /// HTTP(S) proxy for acquisition.
    pub proxy: Option<String>,

    /// `tracing` filter string, e.g. `"warn"` or `"diskforge_core=debug"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bundled_dir: default_bundled_dir(),
            install_dir: default_install_dir(),
            tool_override: None,
            release_repo: DEFAULT_RELEASE_REPO.to_owned(),
            release_api_base: DEFAULT_API_BASE.to_owned(),
            proxy: None,
            log_level: "warn".to_owned(),
            log_json: false,
        }
    }
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bundled_dir: path_env("DISKFORGE_BUNDLED_DIR").unwrap_or_else(default_bundled_dir),
            install_dir: path_env("DISKFORGE_INSTALL_DIR").unwrap_or_else(default_install_dir),
            tool_override: path_env("DISKFORGE_QEMU_IMG"),
            release_repo: env_or("DISKFORGE_RELEASE_REPO", DEFAULT_RELEASE_REPO),
            release_api_base: env_or("DISKFORGE_RELEASE_API", DEFAULT_API_BASE),
            proxy: non_empty_env("HTTP_PROXY").or_else(|| non_empty_env("HTTPS_PROXY")),
            log_level: env_or("DISKFORGE_LOG", "warn"),
            log_json: parse_bool_env("DISKFORGE_LOG_JSON", false),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    non_empty_env(key).unwrap_or_else(|| default.to_owned())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn path_env(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_bool_env(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

fn default_bundled_dir() -> PathBuf {
    let exe_dir = env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|d| d.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));
    exe_dir.join("tools").join("qemu")
}

fn default_install_dir() -> PathBuf {
    let base = if cfg!(windows) {
        path_env("LOCALAPPDATA")
    } else {
        path_env("XDG_DATA_HOME")
            .or_else(|| path_env("HOME").map(|h| h.join(".local").join("share")))
    };
    base.unwrap_or_else(env::temp_dir)
        .join("diskforge")
        .join("qemu")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let cfg = Config::default();
        assert!(cfg.bundled_dir.ends_with("tools/qemu"));
        assert!(cfg.install_dir.ends_with("diskforge/qemu"));
        assert_eq!(cfg.release_repo, DEFAULT_RELEASE_REPO);
        assert_eq!(cfg.release_api_base, "https://api.github.com");
        assert_eq!(cfg.log_level, "warn");
        assert!(!cfg.log_json);
        assert!(cfg.tool_override.is_none());
    }
}
