use std::path::PathBuf;

use diskforge_fetch::FetchError;
use thiserror::Error;

/// Exit code reported on Windows when a required DLL cannot be loaded
/// (`STATUS_DLL_NOT_FOUND`, `0xC0000135`).
pub const WINDOWS_DLL_NOT_FOUND: i32 = -1_073_741_515;

/// Exit code the Unix dynamic loader (and shells) use when an executable or
/// one of its shared libraries cannot be loaded.
pub const UNIX_LOADER_FAILURE: i32 = 127;

/// Exit codes that mean "a shared runtime dependency of the tool is missing"
/// on the host platform.
#[cfg(windows)]
pub const MISSING_DEPENDENCY_CODES: &[i32] = &[WINDOWS_DLL_NOT_FOUND];
#[cfg(not(windows))]
pub const MISSING_DEPENDENCY_CODES: &[i32] = &[UNIX_LOADER_FAILURE];

/// Errors that terminate a conversion or acquisition run.
///
/// Every variant is surfaced to the consumer as one `Error` event followed by
/// `Done { success: false }`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("source file not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("source and destination formats are both {format}")]
    FormatsIdentical { format: String },

    /// The catalog has no pipeline for the requested intent.
    #[error("conversion not supported: {intent}")]
    NotSupported { intent: String },

    /// A catalog entry whose stages cannot be run as described.
    #[error("pipeline {name} is misconfigured: {reason}")]
    InvalidPipeline { name: String, reason: String },

    #[error("qemu-img could not be found")]
    ToolNotFound,

    /// The tool started but a shared library it needs is absent.
    #[error("qemu-img is missing a shared library (exit code {code})")]
    ToolMissingDependency { code: i32 },

    #[error("qemu-img failed with exit code {0}")]
    ToolFailure(i32),

    #[error("output file was not created: {}", path.display())]
    OutputVerificationFailed { path: PathBuf },

    #[error("download failed: {message}")]
    AcquisitionNetworkError { message: String },

    #[error("tool could not be unpacked or installed: {message}")]
    AcquisitionArchiveError { message: String },

    #[error("installed tool did not run: {message}")]
    AcquisitionVerifyError { message: String },

    /// Another conversion or acquisition is in flight.
    #[error("another operation is already running")]
    Busy,

    #[error("I/O error: {message}")]
    Io { message: String },
}

impl ConvertError {
    pub fn is_missing_dependency(&self) -> bool {
        matches!(self, ConvertError::ToolMissingDependency { .. })
    }

    /// A short suggestion for the user, when there is a specific one.
    pub fn remedy(&self) -> Option<&'static str> {
        match self {
            ConvertError::ToolMissingDependency { .. } => Some(
                "reinstall qemu-img together with its libraries (`diskforge install`)",
            ),
            ConvertError::ToolNotFound => Some("install qemu-img (`diskforge install`)"),
            ConvertError::FormatsIdentical { .. } => {
                Some("choose a destination format different from the source")
            }
            ConvertError::Busy => Some("wait for the running operation to finish"),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ConvertError {
    fn from(e: std::io::Error) -> Self {
        ConvertError::Io {
            message: e.to_string(),
        }
    }
}

impl From<FetchError> for ConvertError {
    fn from(e: FetchError) -> Self {
        let message = e.to_string();
        if e.is_network() {
            ConvertError::AcquisitionNetworkError { message }
        } else if e.is_archive() {
            ConvertError::AcquisitionArchiveError { message }
        } else {
            ConvertError::AcquisitionVerifyError { message }
        }
    }
}

/// How one invocation of the tool ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalStatus {
    Success,
    MissingDependency { code: i32 },
    /// Non-zero exit; `-1` when the process was killed by a signal.
    Failure { code: i32 },
    /// The executable does not exist.
    NotFound,
    /// The process could not be started or waited on for another reason.
    LaunchFailed { message: String },
}

impl FinalStatus {
    /// Map a process exit code (`None` when terminated by a signal).
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => FinalStatus::Success,
            Some(c) if MISSING_DEPENDENCY_CODES.contains(&c) => {
                FinalStatus::MissingDependency { code: c }
            }
            Some(c) => FinalStatus::Failure { code: c },
            None => FinalStatus::Failure { code: -1 },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FinalStatus::Success)
    }

    pub fn into_result(self) -> Result<(), ConvertError> {
        match self {
            FinalStatus::Success => Ok(()),
            FinalStatus::MissingDependency { code } => {
                Err(ConvertError::ToolMissingDependency { code })
            }
            FinalStatus::Failure { code } => Err(ConvertError::ToolFailure(code)),
            FinalStatus::NotFound => Err(ConvertError::ToolNotFound),
            FinalStatus::LaunchFailed { message } => Err(ConvertError::Io { message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_map_to_acquisition_kinds() {
        let cases = [
            (
                FetchError::InvalidResponse {
                    message: "empty tag".into(),
                },
                "network",
            ),
            (
                FetchError::NoMatchingAsset {
                    tag: "v9".into(),
                    extension: ".zip".into(),
                    marker: "x64".into(),
                },
                "network",
            ),
            (
                FetchError::Archive {
                    message: "truncated".into(),
                },
                "archive",
            ),
            (
                FetchError::BinaryMissing {
                    binary: "qemu-img".into(),
                },
                "archive",
            ),
            (
                // Staging or commit could not write the install directory.
                FetchError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only",
                )),
                "archive",
            ),
            (
                FetchError::VerifyFailed {
                    message: "exit 3".into(),
                },
                "verify",
            ),
        ];

        for (fetch, expected) in cases {
            let shown = fetch.to_string();
            let kind = match ConvertError::from(fetch) {
                ConvertError::AcquisitionNetworkError { message } => ("network", message),
                ConvertError::AcquisitionArchiveError { message } => ("archive", message),
                ConvertError::AcquisitionVerifyError { message } => ("verify", message),
                other => panic!("unexpected {other:?}"),
            };
            assert_eq!(kind, (expected, shown));
        }
    }

    #[test]
    fn exit_codes_map_to_status() {
        assert_eq!(FinalStatus::from_exit_code(Some(0)), FinalStatus::Success);
        assert_eq!(
            FinalStatus::from_exit_code(Some(MISSING_DEPENDENCY_CODES[0])),
            FinalStatus::MissingDependency {
                code: MISSING_DEPENDENCY_CODES[0]
            }
        );
        assert_eq!(
            FinalStatus::from_exit_code(None).into_result(),
            Err(ConvertError::ToolFailure(-1))
        );
    }
}
