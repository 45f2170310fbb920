use std::env;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::downloader::{Downloader, extract_archive};
use crate::error::FetchError;
use crate::install::{Install, VersionInfo, verify_tool};
use crate::platform::Platform;
use crate::progress::{DownloadProgress, LogLevel};

/// Default release metadata endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Top-level builder for acquiring the imaging tool.
///
/// # Example
/// ```rust,no_run
/// # async fn demo() -> Result<(), diskforge_fetch::FetchError> {
/// use diskforge_fetch::Api;
/// let binary = Api::new()
///     .set_install_dir("./qemu")
///     .repo("fdcastel/qemu-img-windows-x64")
///     .latest()
///     .install(|_progress| {}, |_level, msg| println!("{msg}"))
///     .await?;
/// # let _ = binary;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Api {
    pub(crate) install_dir: PathBuf,
    pub(crate) api_base: String,
    pub(crate) proxy: Option<String>,
    pub(crate) platform: Platform,
}

/// Builder stage after `.repo()` has been called.
#[derive(Debug, Clone)]
pub struct RepoApi {
    api: Api,
    repo: String,
}

/// Builder stage after `.latest()` or `.version()` has been called.
#[derive(Debug, Clone)]
pub struct VersionApi {
    api: Api,
    repo: String,
    tag: Option<String>,
}

impl Default for Api {
    fn default() -> Self {
        Self::new()
    }
}

impl Api {
    /// Create a new `Api` instance.
    ///
    /// Proxy is automatically read from `HTTP_PROXY` / `HTTPS_PROXY` environment variables.
    pub fn new() -> Self {
        let proxy = env::var("HTTP_PROXY")
            .ok()
            .or_else(|| env::var("HTTPS_PROXY").ok());

        Self {
            install_dir: PathBuf::from("."),
            api_base: DEFAULT_API_BASE.to_string(),
            proxy,
            platform: Platform::current(),
        }
    }

    /// Set the directory the tool is installed into (default: `"."`).
    pub fn set_install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    /// Override the release metadata endpoint.
    pub fn set_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    /// Override the HTTP/HTTPS proxy URL.
    pub fn set_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Select assets for a platform other than the running one.
    pub fn set_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Specify the release repository (`"owner/repo"`).
    pub fn repo(self, repo: impl Into<String>) -> RepoApi {
        RepoApi {
            api: self,
            repo: repo.into(),
        }
    }
}

impl RepoApi {
    /// Target the latest release.
    pub fn latest(self) -> VersionApi {
        VersionApi {
            api: self.api,
            repo: self.repo,
            tag: None,
        }
    }

    /// Target a specific release tag (e.g. `"v9.1.0"`).
    pub fn version(self, tag: impl Into<String>) -> VersionApi {
        VersionApi {
            api: self.api,
            repo: self.repo,
            tag: Some(tag.into()),
        }
    }

    /// Return the installed version information from `version.json`.
    pub fn installed_version(&self) -> Result<VersionInfo, FetchError> {
        Install::new(&self.repo, &self.api.install_dir).installed_version()
    }
}

impl VersionApi {
    /// Discover, download, unpack and verify the release asset for the
    /// configured platform. Returns the path of the installed binary.
    ///
    /// Makes a single attempt. Every failure is reported through `on_log`
    /// with [`LogLevel::Error`] before it is returned, and the previous
    /// installation (if any) is left untouched.
    pub async fn install<P, L>(self, on_progress: P, on_log: L) -> Result<PathBuf, FetchError>
    where
        P: Fn(DownloadProgress) + Send + Sync,
        L: Fn(LogLevel, &str) + Send + Sync,
    {
        match self.try_install(&on_progress, &on_log).await {
            Ok(path) => Ok(path),
            Err(e) => {
                warn!(repo = %self.repo, error = %e, "tool acquisition failed");
                on_log(LogLevel::Error, &e.to_string());
                Err(e)
            }
        }
    }

    async fn try_install<P, L>(&self, on_progress: &P, on_log: &L) -> Result<PathBuf, FetchError>
    where
        P: Fn(DownloadProgress) + Send + Sync,
        L: Fn(LogLevel, &str) + Send + Sync,
    {
        let platform = &self.api.platform;
        let downloader =
            Downloader::new(&self.repo, &self.api.api_base, self.api.proxy.as_deref());

        on_log(
            LogLevel::Info,
            &format!("Querying releases of {} for {}", self.repo, platform.name),
        );
        let release = downloader.release(self.tag.as_deref()).await?;
        let asset = release.select_asset(platform)?;
        on_log(
            LogLevel::Info,
            &format!("Downloading {} ({})", asset.name, release.tag_name),
        );

        let bytes = downloader.download_asset(asset, on_progress).await?;
        on_log(LogLevel::Ok, &format!("Downloaded {} bytes", bytes.len()));

        let install = Install::new(&self.repo, &self.api.install_dir);
        let staging = install.begin_staging()?;

        let staged = self
            .unpack_and_verify(&asset.name, &bytes, &staging, on_log)
            .await;
        let version_line = match staged {
            Ok(line) => line,
            Err(e) => {
                install.discard(&staging);
                return Err(e);
            }
        };

        let dir = match install.commit(&staging, &release.tag_name) {
            Ok(dir) => dir,
            Err(e) => {
                install.discard(&staging);
                return Err(e);
            }
        };

        let binary = dir.join(&platform.binary_name);
        info!(path = %binary.display(), tag = %release.tag_name, "tool installed");
        on_log(
            LogLevel::Ok,
            &format!("Installed {version_line} to {}", dir.display()),
        );
        Ok(binary)
    }

    async fn unpack_and_verify<L>(
        &self,
        asset_name: &str,
        bytes: &[u8],
        staging: &Path,
        on_log: &L,
    ) -> Result<String, FetchError>
    where
        L: Fn(LogLevel, &str) + Send + Sync,
    {
        let files = extract_archive(asset_name, bytes, staging).map_err(|e| match e {
            FetchError::Io(io) => FetchError::Archive {
                message: io.to_string(),
            },
            other => other,
        })?;
        on_log(LogLevel::Info, &format!("Extracted {files} files"));

        let binary = staging.join(&self.api.platform.binary_name);
        if !binary.is_file() {
            return Err(FetchError::BinaryMissing {
                binary: self.api.platform.binary_name.clone(),
            });
        }

        let version_line = verify_tool(&binary).await?;
        on_log(LogLevel::Ok, &format!("Verified: {version_line}"));
        Ok(version_line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn api_builder_methods() {
        let api = Api::new()
            .set_install_dir("./mydir")
            .set_api_base("http://127.0.0.1:9")
            .set_proxy(Some("http://proxy:8080".to_string()));

        assert_eq!(api.install_dir, PathBuf::from("./mydir"));
        assert_eq!(api.api_base, "http://127.0.0.1:9");
        assert_eq!(api.proxy, Some("http://proxy:8080".to_string()));
    }

    #[test]
    fn repo_and_version_stages() {
        let latest = Api::new().repo("owner/repo").latest();
        assert_eq!(latest.repo, "owner/repo");
        assert_eq!(latest.tag, None);

        let pinned = Api::new().repo("owner/repo").version("v1.2.3");
        assert_eq!(pinned.tag.as_deref(), Some("v1.2.3"));
    }

    #[tokio::test]
    async fn unreachable_endpoint_reports_through_log_and_leaves_nothing_installed() {
        let root = tempfile::tempdir().unwrap();
        let install_dir = root.path().join("qemu");
        let logs = Mutex::new(Vec::new());

        let err = Api::new()
            .set_install_dir(&install_dir)
            // Port 9 (discard) on loopback refuses connections.
            .set_api_base("http://127.0.0.1:9")
            .set_proxy(None)
            .repo("owner/repo")
            .latest()
            .install(|_| {}, |level, msg| logs.lock().unwrap().push((level, msg.to_string())))
            .await
            .unwrap_err();

        assert!(err.is_network());
        let logs = logs.into_inner().unwrap();
        assert_eq!(logs.last().map(|(l, _)| *l), Some(LogLevel::Error));
        assert!(!install_dir.exists());
        assert!(!root.path().join("qemu.staging").exists());
    }

    #[tokio::test]
    async fn corrupt_archive_discards_staging() {
        let root = tempfile::tempdir().unwrap();
        let version = Api::new()
            .set_install_dir(root.path().join("qemu"))
            .repo("owner/repo")
            .latest();
        let install = Install::new("owner/repo", root.path().join("qemu"));
        let staging = install.begin_staging().unwrap();

        let err = version
            .unpack_and_verify("qemu-img-x64.zip", b"garbage", &staging, &|_: LogLevel, _: &str| {})
            .await
            .unwrap_err();
        assert!(err.is_archive());
        install.discard(&staging);
        assert!(!staging.exists());
    }
}
