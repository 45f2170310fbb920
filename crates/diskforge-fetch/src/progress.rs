use std::time::Duration;

/// Snapshot of a running download, reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub downloaded: u64,
    /// `None` when the server sent no `Content-Length`.
    pub total: Option<u64>,
    /// Wall-clock time since the first byte was requested.
    pub elapsed: Duration,
}

impl DownloadProgress {
    /// Completion in percent, or `None` when the total size is unknown.
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(100.0),
            Some(total) => Some((self.downloaded as f64 / total as f64 * 100.0).min(100.0)),
            None => None,
        }
    }

    /// Average throughput since the download began.
    pub fn bytes_per_sec(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64().max(0.001);
        (self.downloaded as f64 / secs) as u64
    }
}

/// Verbosity of a message sent through the acquisition log callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Ok,
    Warn,
    /// A step failed; the operation is about to return an error.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_and_throughput() {
        let p = DownloadProgress {
            downloaded: 512,
            total: Some(2048),
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(p.percent(), Some(25.0));
        assert_eq!(p.bytes_per_sec(), 256);
    }

    #[test]
    fn unknown_total_has_no_percent() {
        let p = DownloadProgress {
            downloaded: 10,
            total: None,
            elapsed: Duration::ZERO,
        };
        assert_eq!(p.percent(), None);
        assert_eq!(p.bytes_per_sec(), 10_000);
    }
}
