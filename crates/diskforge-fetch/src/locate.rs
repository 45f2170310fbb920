//! Resolve the qemu-img binary from the bundled directory, `PATH`, or the
//! per-user install directory, in that order.

use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::platform::Platform;

/// Where a located tool was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    /// Shipped next to the program.
    Bundled,
    /// Found on the system executable search path.
    SystemPath,
    /// Installed by a previous acquisition.
    UserInstall,
    /// Configured explicitly, bypassing the search.
    Explicit,
}

/// A resolved tool path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolLocation {
    pub path: PathBuf,
    pub kind: LocationKind,
}

/// Looks the tool up in the three known places. First match wins.
#[derive(Debug, Clone)]
pub struct ToolLocator {
    bundled_dir: PathBuf,
    install_dir: PathBuf,
    binary_name: String,
    search_path: Option<std::ffi::OsString>,
}

impl ToolLocator {
    pub fn new(bundled_dir: impl Into<PathBuf>, install_dir: impl Into<PathBuf>) -> Self {
        Self {
            bundled_dir: bundled_dir.into(),
            install_dir: install_dir.into(),
            binary_name: Platform::current().binary_name,
            search_path: env::var_os("PATH"),
        }
    }

    /// Replace the `PATH` value that is searched (default: the process environment).
    pub fn with_search_path(mut self, path: Option<std::ffi::OsString>) -> Self {
        self.search_path = path;
        self
    }

    /// Override the binary file name (default: the platform's `qemu-img` name).
    pub fn with_binary_name(mut self, name: impl Into<String>) -> Self {
        self.binary_name = name.into();
        self
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    pub fn locate(&self) -> Option<ToolLocation> {
        let bundled = self.bundled_dir.join(&self.binary_name);
        if bundled.is_file() {
            debug!(path = %bundled.display(), "tool found in bundled directory");
            return Some(ToolLocation {
                path: bundled,
                kind: LocationKind::Bundled,
            });
        }

        if let Some(found) = self.search_system_path() {
            debug!(path = %found.display(), "tool found on PATH");
            return Some(ToolLocation {
                path: found,
                kind: LocationKind::SystemPath,
            });
        }

        let installed = self.install_dir.join(&self.binary_name);
        if installed.is_file() {
            debug!(path = %installed.display(), "tool found in user install directory");
            return Some(ToolLocation {
                path: installed,
                kind: LocationKind::UserInstall,
            });
        }

        None
    }

    fn search_system_path(&self) -> Option<PathBuf> {
        let paths = self.search_path.as_ref()?;
        env::split_paths(paths)
            .map(|dir| dir.join(&self.binary_name))
            .find(|candidate| candidate.is_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn bundled_wins_over_everything() {
        let root = tempfile::tempdir().unwrap();
        let bundled = root.path().join("tools");
        let sys = root.path().join("sys");
        let user = root.path().join("user");
        touch(&bundled.join("qemu-img"));
        touch(&sys.join("qemu-img"));
        touch(&user.join("qemu-img"));

        let loc = ToolLocator::new(&bundled, &user)
            .with_binary_name("qemu-img")
            .with_search_path(Some(sys.clone().into_os_string()))
            .locate()
            .unwrap();
        assert_eq!(loc.kind, LocationKind::Bundled);
        assert_eq!(loc.path, bundled.join("qemu-img"));
    }

    #[test]
    fn system_path_beats_user_install() {
        let root = tempfile::tempdir().unwrap();
        let sys = root.path().join("sys");
        let user = root.path().join("user");
        touch(&sys.join("qemu-img"));
        touch(&user.join("qemu-img"));

        let loc = ToolLocator::new(root.path().join("missing"), &user)
            .with_binary_name("qemu-img")
            .with_search_path(Some(sys.into_os_string()))
            .locate()
            .unwrap();
        assert_eq!(loc.kind, LocationKind::SystemPath);
    }

    #[test]
    fn falls_back_to_user_install_then_none() {
        let root = tempfile::tempdir().unwrap();
        let user = root.path().join("user");
        let locator = ToolLocator::new(root.path().join("missing"), &user)
            .with_binary_name("qemu-img")
            .with_search_path(None);
        assert!(locator.locate().is_none());

        touch(&user.join("qemu-img"));
        let loc = locator.locate().unwrap();
        assert_eq!(loc.kind, LocationKind::UserInstall);
    }
}
