use std::ffi::OsString;
use std::path::Path;

use crate::catalog::DiskFormat;

/// Placeholder replaced by the stage's input path.
pub const SRC_PLACEHOLDER: &str = "{src}";
/// Placeholder replaced by the stage's output path.
pub const DST_PLACEHOLDER: &str = "{dst}";

/// One invocation of the imaging tool within a pipeline.
///
/// Stages are plain descriptions; [`PipelineRun`] resolves the placeholders
/// and runs them.
///
/// [`PipelineRun`]: crate::runtime::pipeline::PipelineRun
#[derive(Debug, Clone, PartialEq)]
pub struct StageSpec {
    pub label: String,
    /// Argument template containing `{src}` and `{dst}`.
    pub args: Vec<String>,
    /// Share of the pipeline's 0..100% this stage accounts for.
    pub weight: f64,
    /// Format of the file this stage writes, used to name intermediates.
    pub output_format: DiskFormat,
}

impl StageSpec {
    /// `convert -p [-f <from>] -O <to> {src} {dst}`. Without `from`,
    /// qemu-img detects the input format.
    pub fn convert(from: Option<DiskFormat>, to: DiskFormat, weight: f64) -> Self {
        let mut args = vec!["convert".to_string(), "-p".to_string()];
        if let Some(from) = from {
            args.push("-f".to_string());
            args.push(from.to_string());
        }
        args.push("-O".to_string());
        args.push(to.to_string());
        args.push(SRC_PLACEHOLDER.to_string());
        args.push(DST_PLACEHOLDER.to_string());

        let label = match from {
            Some(from) => format!("Convert {} → {}", from.label(), to.label()),
            None => format!("Convert → {}", to.label()),
        };

        Self {
            label,
            args,
            weight,
            output_format: to,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Insert extra options (e.g. `-c`) right after the subcommand.
    pub fn with_options<I, S>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let at = 1.min(self.args.len());
        let tail = self.args.split_off(at);
        self.args.extend(options.into_iter().map(Into::into));
        self.args.extend(tail);
        self
    }

    /// Substitute the placeholders with concrete paths.
    pub fn resolve_args(&self, src: &Path, dst: &Path) -> Vec<OsString> {
        self.args
            .iter()
            .map(|a| match a.as_str() {
                SRC_PLACEHOLDER => src.as_os_str().to_os_string(),
                DST_PLACEHOLDER => dst.as_os_str().to_os_string(),
                other => OsString::from(other),
            })
            .collect()
    }
}
