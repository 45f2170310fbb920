use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::FetchError;

const VERSION_FILE: &str = "version.json";
const STAGING_SUFFIX: &str = ".staging";
const BACKUP_SUFFIX: &str = ".old";

/// Version information stored in `version.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub tag_name: String,
    pub repo: String,
}

/// Installation state for one release repository.
///
/// New releases are unpacked into a sibling staging directory and only
/// replace the install directory once they have been verified, so a failed
/// acquisition never leaves a half-installed tool behind.
#[derive(Debug, Clone)]
pub struct Install {
    repo: String,
    install_path: PathBuf,
}

impl Install {
    pub fn new<P: AsRef<Path>>(repo: &str, install_path: P) -> Self {
        let path = install_path.as_ref().components().collect();
        Self {
            repo: repo.to_string(),
            install_path: path,
        }
    }

    pub fn install_path(&self) -> &Path {
        &self.install_path
    }

    fn version_file(&self) -> PathBuf {
        self.install_path.join(VERSION_FILE)
    }

    pub fn already_installed(&self) -> bool {
        self.version_file().exists()
    }

    /// Read the stored `version.json`.
    pub fn installed_version(&self) -> Result<VersionInfo, FetchError> {
        let data = fs::read_to_string(self.version_file())?;
        Ok(serde_json::from_str(&data)?)
    }

    /// `<install dir name><suffix>` next to the install directory.
    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name: OsString = self
            .install_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("install"));
        name.push(suffix);
        self.install_path.with_file_name(name)
    }

    /// The directory a new release is unpacked into before it is committed.
    pub fn staging_dir(&self) -> PathBuf {
        self.sibling(STAGING_SUFFIX)
    }

    /// Where the previous installation waits while a new one is swapped in.
    pub fn backup_dir(&self) -> PathBuf {
        self.sibling(BACKUP_SUFFIX)
    }

    /// Create an empty staging directory, discarding leftovers of an earlier
    /// interrupted attempt.
    pub fn begin_staging(&self) -> Result<PathBuf, FetchError> {
        self.recover_backup()?;
        let staging = self.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        debug!(path = %staging.display(), "staging directory created");
        Ok(staging)
    }

    /// Record `tag` in the staging directory and swap it into place.
    ///
    /// The previous installation is moved aside first and put back if the
    /// new one cannot take its place.
    pub fn commit(&self, staging: &Path, tag: &str) -> Result<PathBuf, FetchError> {
        let info = VersionInfo {
            tag_name: tag.to_string(),
            repo: self.repo.clone(),
        };
        fs::write(staging.join(VERSION_FILE), serde_json::to_string(&info)?)?;

        self.swap_in(staging)?;
        debug!(path = %self.install_path.display(), tag, "install committed");
        Ok(self.install_path.clone())
    }

    fn swap_in(&self, staging: &Path) -> Result<(), FetchError> {
        let backup = self.backup_dir();
        if backup.exists() {
            fs::remove_dir_all(&backup)?;
        }

        let had_previous = self.install_path.exists();
        if had_previous {
            fs::rename(&self.install_path, &backup)?;
        } else if let Some(parent) = self.install_path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Err(e) = fs::rename(staging, &self.install_path) {
            if had_previous {
                if let Err(restore) = fs::rename(&backup, &self.install_path) {
                    warn!(
                        path = %backup.display(),
                        error = %restore,
                        "failed to restore previous installation"
                    );
                }
            }
            return Err(e.into());
        }

        if had_previous {
            if let Err(e) = fs::remove_dir_all(&backup) {
                warn!(path = %backup.display(), error = %e, "failed to remove previous installation");
            }
        }
        Ok(())
    }

    /// Put back a previous installation left aside by an interrupted commit.
    fn recover_backup(&self) -> Result<(), FetchError> {
        let backup = self.backup_dir();
        if !backup.exists() {
            return Ok(());
        }
        if self.install_path.exists() {
            fs::remove_dir_all(&backup)?;
        } else {
            warn!(path = %backup.display(), "restoring installation left aside by an interrupted commit");
            fs::rename(&backup, &self.install_path)?;
        }
        Ok(())
    }

    /// Remove the staging directory. Failures are only logged.
    pub fn discard(&self, staging: &Path) {
        if let Err(e) = fs::remove_dir_all(staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
}

/// Run `<binary> --version` and return the first line it printed.
pub async fn verify_tool(binary: &Path) -> Result<String, FetchError> {
    if !binary.is_file() {
        let name = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(FetchError::BinaryMissing { binary: name });
    }

    let output = Command::new(binary)
        .arg("--version")
        .output()
        .await
        .map_err(|e| FetchError::VerifyFailed {
            message: format!("cannot execute {}: {e}", binary.display()),
        })?;

    if !output.status.success() {
        return Err(FetchError::VerifyFailed {
            message: format!("{} --version exited with {}", binary.display(), output.status),
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
}
