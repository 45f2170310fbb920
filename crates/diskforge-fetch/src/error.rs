use thiserror::Error;

/// Errors that can be returned by diskforge-fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// An HTTP request failed (network error, non-2xx status, etc.).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A filesystem I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to extract a ZIP archive.
    #[error("ZIP extraction error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The release lists no asset for this platform.
    #[error("no release asset ending in '{extension}' containing '{marker}' in {tag}")]
    NoMatchingAsset {
        tag: String,
        extension: String,
        marker: String,
    },

    /// The unpacked archive did not contain the tool binary.
    #[error("archive does not contain {binary}")]
    BinaryMissing { binary: String },

    /// The release API response was missing an expected field or had an unexpected shape.
    #[error("Invalid release API response: {message}")]
    InvalidResponse { message: String },

    /// The installed binary could not be executed or reported a failure.
    #[error("installed tool failed verification: {message}")]
    VerifyFailed { message: String },

    /// The archive could not be unpacked (corrupt tarball, truncated stream).
    #[error("archive extraction failed: {message}")]
    Archive { message: String },
}

impl FetchError {
    /// `true` for failures that happened while talking to the network.
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            FetchError::Http(_) | FetchError::Json(_) | FetchError::InvalidResponse { .. }
                | FetchError::NoMatchingAsset { .. }
        )
    }

    /// `true` for failures that happened while unpacking the downloaded
    /// archive or moving it into the install directory.
    pub fn is_archive(&self) -> bool {
        matches!(
            self,
            FetchError::Zip(_)
                | FetchError::Io(_)
                | FetchError::Archive { .. }
                | FetchError::BinaryMissing { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classes(e: &FetchError) -> (bool, bool) {
        (e.is_network(), e.is_archive())
    }

    #[test]
    fn every_variant_has_one_class() {
        let json = serde_json::from_str::<u32>("nope").unwrap_err();
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");

        let network = [
            FetchError::Json(json),
            FetchError::InvalidResponse {
                message: "no tag".into(),
            },
            FetchError::NoMatchingAsset {
                tag: "v1".into(),
                extension: ".zip".into(),
                marker: "x64".into(),
            },
        ];
        let archive = [
            FetchError::Io(io),
            FetchError::Zip(zip::result::ZipError::FileNotFound),
            FetchError::Archive {
                message: "truncated".into(),
            },
            FetchError::BinaryMissing {
                binary: "qemu-img".into(),
            },
        ];

        for e in &network {
            assert_eq!(classes(e), (true, false), "{e}");
        }
        for e in &archive {
            assert_eq!(classes(e), (false, true), "{e}");
        }
        let verify = FetchError::VerifyFailed {
            message: "exit 3".into(),
        };
        assert_eq!(classes(&verify), (false, false));
    }
}
