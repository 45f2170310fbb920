use std::fs::File;
use std::io::Cursor;
use std::path::Path;
use std::time::{Duration, Instant};

use flate2::read::GzDecoder;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tar::Archive;
use tracing::{debug, warn};

use crate::error::FetchError;
use crate::platform::Platform;
use crate::progress::DownloadProgress;

/// Minimum spacing between two progress callbacks during a download.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound on the buffer reserved up front from a reported size.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// One entry of the release metadata `assets` array.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

/// The subset of the release metadata response diskforge reads.
#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl Release {
    /// Pick the asset for `platform`: its name must end with the platform's
    /// archive extension and contain its architecture marker.
    pub fn select_asset(&self, platform: &Platform) -> Result<&ReleaseAsset, FetchError> {
        self.assets
            .iter()
            .find(|a| {
                let name = a.name.to_ascii_lowercase();
                name.ends_with(&platform.archive_extension)
                    && name.contains(&platform.arch_marker.to_ascii_lowercase())
            })
            .ok_or_else(|| FetchError::NoMatchingAsset {
                tag: self.tag_name.clone(),
                extension: platform.archive_extension.clone(),
                marker: platform.arch_marker.clone(),
            })
    }
}

pub struct Downloader {
    pub repo: String,
    pub api_base: String,
    client: Client,
}

impl Downloader {
    pub fn new(repo: &str, api_base: &str, proxy: Option<&str>) -> Self {
        let mut builder =
            Client::builder().user_agent(concat!("diskforge-fetch/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy_url) = proxy {
            match reqwest::Proxy::all(proxy_url) {
                Ok(p) => {
                    builder = builder.proxy(p);
                }
                Err(e) => {
                    warn!(proxy = proxy_url, error = %e, "ignoring invalid proxy URL");
                }
            }
        }

        let client = builder.build().unwrap_or_default();

        Self {
            repo: repo.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Release metadata URL for `tag`, or for the latest release when `None`.
    pub fn release_url(&self, tag: Option<&str>) -> String {
        match tag {
            Some(t) => format!("{}/repos/{}/releases/tags/{}", self.api_base, self.repo, t),
            None => format!("{}/repos/{}/releases/latest", self.api_base, self.repo),
        }
    }

    /// Fetch release metadata. One attempt, no retry.
    pub async fn release(&self, tag: Option<&str>) -> Result<Release, FetchError> {
        let url = self.release_url(tag);
        debug!(%url, "querying release metadata");

        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await?
            .error_for_status()?;

        let body = resp.text().await?;
        let release: Release = serde_json::from_str(&body)?;
        if release.tag_name.is_empty() {
            return Err(FetchError::InvalidResponse {
                message: "tag_name is empty".into(),
            });
        }
        Ok(release)
    }

    /// Stream `asset` into memory, calling `on_progress` periodically and once
    /// at the end.
    pub async fn download_asset<F>(
        &self,
        asset: &ReleaseAsset,
        on_progress: F,
    ) -> Result<Vec<u8>, FetchError>
    where
        F: Fn(DownloadProgress),
    {
        let started = Instant::now();
        let resp = self
            .client
            .get(&asset.browser_download_url)
            .send()
            .await?
            .error_for_status()?;

        let total = resp
            .content_length()
            .or((asset.size > 0).then_some(asset.size));
        let mut buf = Vec::with_capacity(initial_capacity(total));
        let mut stream = resp.bytes_stream();
        let mut last_report: Option<Instant> = None;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buf.extend_from_slice(&chunk);

            if last_report.is_none_or(|t| t.elapsed() >= PROGRESS_INTERVAL) {
                last_report = Some(Instant::now());
                on_progress(DownloadProgress {
                    downloaded: buf.len() as u64,
                    total,
                    elapsed: started.elapsed(),
                });
            }
        }

        on_progress(DownloadProgress {
            downloaded: buf.len() as u64,
            total: total.or(Some(buf.len() as u64)),
            elapsed: started.elapsed(),
        });

        Ok(buf)
    }
}

/// Buffer to reserve for a download of `total` bytes. The size comes from
/// the server and is not trusted beyond [`MAX_PREALLOC`].
fn initial_capacity(total: Option<u64>) -> usize {
    usize::try_from(total.unwrap_or(0).min(MAX_PREALLOC)).unwrap_or(0)
}

/// Unpack `bytes` into `dest`, choosing the format from `asset_name`.
///
/// Directory structure is flattened: every regular file lands directly in
/// `dest` under its base name. Returns the number of files written.
pub fn extract_archive(asset_name: &str, bytes: &[u8], dest: &Path) -> Result<usize, FetchError> {
    std::fs::create_dir_all(dest)?;
    let lower = asset_name.to_ascii_lowercase();
    if lower.ends_with(".zip") {
        extract_zip_flat(bytes, dest)
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        extract_tar_gz_flat(bytes, dest)
    } else {
        std::fs::write(dest.join(asset_name), bytes)?;
        Ok(1)
    }
}

/// Extract a ZIP archive into `dest`, dropping all directory components.
pub(crate) fn extract_zip_flat(bytes: &[u8], dest: &Path) -> Result<usize, FetchError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let file_name = match file.enclosed_name().and_then(|p| p.file_name().map(|n| n.to_owned())) {
            Some(n) => n,
            None => continue,
        };

        let dest_path = dest.join(file_name);
        let mut out = File::create(&dest_path)?;
        std::io::copy(&mut file, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = file.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dest_path, std::fs::Permissions::from_mode(mode))?;
        }
        written += 1;
    }

    Ok(written)
}

/// Extract a `.tar.gz` archive into `dest`, dropping all directory components.
pub(crate) fn extract_tar_gz_flat(bytes: &[u8], dest: &Path) -> Result<usize, FetchError> {
    let tar_gz = GzDecoder::new(Cursor::new(bytes));
    let mut archive = Archive::new(tar_gz);
    let mut written = 0;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let full_path = entry.path()?.into_owned();
        let file_name = match full_path.file_name() {
            Some(n) => n.to_owned(),
            None => continue,
        };
        entry.unpack(dest.join(file_name))?;
        written += 1;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reported_size_only_bounds_the_reservation() {
        assert_eq!(initial_capacity(None), 0);
        assert_eq!(initial_capacity(Some(4096)), 4096);
        assert_eq!(initial_capacity(Some(u64::MAX)), MAX_PREALLOC as usize);
    }
    use std::io::Write;

    fn asset(name: &str) -> ReleaseAsset {
        ReleaseAsset {
            name: name.to_string(),
            browser_download_url: format!("https://example.invalid/{name}"),
            size: 0,
        }
    }

    #[test]
    fn release_metadata_parses_assets() {
        let json = r#"{
            "tag_name": "v9.1.0",
            "assets": [
                {"name": "qemu-img-v9.1.0-x64.zip", "browser_download_url": "https://x/a.zip", "size": 42},
                {"name": "checksums.txt", "browser_download_url": "https://x/c.txt"}
            ]
        }"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v9.1.0");
        assert_eq!(release.assets.len(), 2);
        assert_eq!(release.assets[0].size, 42);
        assert_eq!(release.assets[1].size, 0);
    }

    #[test]
    fn selects_asset_by_extension_and_marker() {
        let release = Release {
            tag_name: "v1".into(),
            assets: vec![
                asset("qemu-img-arm64.zip"),
                asset("qemu-img-x64.tar.gz"),
                asset("qemu-img-x64.zip"),
            ],
        };
        let win = Platform::for_target("windows", "x86_64");
        assert_eq!(release.select_asset(&win).unwrap().name, "qemu-img-x64.zip");

        let mac = Platform::for_target("macos", "aarch64");
        let err = release.select_asset(&mac).unwrap_err();
        assert!(matches!(err, FetchError::NoMatchingAsset { .. }));
        assert!(err.is_network());
    }

    #[test]
    fn release_url_latest_and_tagged() {
        let d = Downloader::new("owner/repo", "https://api.example.com/", None);
        assert_eq!(
            d.release_url(None),
            "https://api.example.com/repos/owner/repo/releases/latest"
        );
        assert_eq!(
            d.release_url(Some("v2")),
            "https://api.example.com/repos/owner/repo/releases/tags/v2"
        );
    }

    #[test]
    fn zip_extraction_flattens_directories() {
        let mut buf = Vec::new();
        {
            let mut zw = zip::ZipWriter::new(Cursor::new(&mut buf));
            let opts = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            zw.add_directory("qemu/", opts).unwrap();
            zw.start_file("qemu/bin/qemu-img.exe", opts).unwrap();
            zw.write_all(b"binary").unwrap();
            zw.start_file("qemu/lib/libglib-2.0-0.dll", opts).unwrap();
            zw.write_all(b"dll").unwrap();
            zw.finish().unwrap();
        }

        let dir = tempfile::tempdir().unwrap();
        let n = extract_archive("qemu-img-x64.zip", &buf, dir.path()).unwrap();
        assert_eq!(n, 2);
        assert_eq!(std::fs::read(dir.path().join("qemu-img.exe")).unwrap(), b"binary");
        assert!(dir.path().join("libglib-2.0-0.dll").is_file());
        assert!(!dir.path().join("qemu").exists());
    }

    #[test]
    fn tar_gz_extraction_flattens_directories() {
        let mut gz = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        {
            let mut tw = tar::Builder::new(&mut gz);
            let data = b"#!/bin/sh\n";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            header.set_cksum();
            tw.append_data(&mut header, "release/bin/qemu-img", &data[..])
                .unwrap();
            tw.finish().unwrap();
        }
        let bytes = gz.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let n = extract_archive("qemu-img-x86_64.tar.gz", &bytes, dir.path()).unwrap();
        assert_eq!(n, 1);
        assert!(dir.path().join("qemu-img").is_file());
    }

    #[test]
    fn corrupt_zip_is_an_archive_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_archive("broken.zip", b"not a zip", dir.path()).unwrap_err();
        assert!(err.is_archive());
    }
}
