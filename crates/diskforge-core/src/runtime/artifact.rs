use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::catalog::DiskFormat;

/// What a file means to the running pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactRole {
    /// Input image. Must pre-exist, never deleted.
    Source,
    /// Written by the final stage, never deleted.
    Destination,
    /// Passed from one stage to the next, owned by the run that created it.
    Intermediate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
    role: ArtifactRole,
}

impl Artifact {
    pub fn source(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: ArtifactRole::Source,
        }
    }

    pub fn destination(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: ArtifactRole::Destination,
        }
    }

    /// The intermediate written by stage `stage` (1-based) of a run targeting
    /// `destination`: `<destination>.stage<N>.<format>.part`.
    pub fn intermediate(destination: &Path, stage: usize, format: DiskFormat) -> Self {
        let mut name: OsString = destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| OsString::from("output"));
        name.push(format!(".stage{stage}.{format}.part"));
        Self {
            path: destination.with_file_name(name),
            role: ArtifactRole::Intermediate,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn role(&self) -> ArtifactRole {
        self.role
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Delete an intermediate file. Missing files count as removed.
    ///
    /// Refuses to touch source and destination artifacts.
    pub fn remove(&self) -> io::Result<()> {
        if self.role != ArtifactRole::Intermediate {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("refusing to delete {:?} artifact {}", self.role, self.path.display()),
            ));
        }
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
