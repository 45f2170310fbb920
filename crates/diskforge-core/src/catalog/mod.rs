//! Conversion Catalog: the read-only table mapping a [`ConversionIntent`] to
//! the [`PipelineSpec`] that carries it out.

mod formats;
mod modes;

use std::fmt;
use std::path::{Path, PathBuf};

use strum::IntoEnumIterator;
use tracing::warn;

pub use formats::DiskFormat;
pub use modes::{NamedMode, builtin_modes};

use crate::runtime::pipeline::PipelineSpec;
use crate::runtime::stage::StageSpec;
use crate::runtime::types::ConvertError;

/// What the user asked for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversionIntent {
    /// Plain format pair, by qemu-img format tag.
    Formats { from: String, to: String },
    /// A named multi-stage mode, by key.
    Mode(String),
}

impl ConversionIntent {
    pub fn formats(from: impl Into<String>, to: impl Into<String>) -> Self {
        ConversionIntent::Formats {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn mode(key: impl Into<String>) -> Self {
        ConversionIntent::Mode(key.into())
    }
}

impl fmt::Display for ConversionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversionIntent::Formats { from, to } => write!(f, "{from} → {to}"),
            ConversionIntent::Mode(key) => write!(f, "mode {key}"),
        }
    }
}

/// Lookup table of formats and named modes. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct Catalog {
    modes: Vec<NamedMode>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new(builtin_modes())
    }
}

impl Catalog {
    pub fn new(modes: Vec<NamedMode>) -> Self {
        Self { modes }
    }

    pub fn formats(&self) -> impl Iterator<Item = DiskFormat> {
        DiskFormat::iter()
    }

    pub fn modes(&self) -> &[NamedMode] {
        &self.modes
    }

    pub fn mode(&self, key: &str) -> Option<&NamedMode> {
        self.modes.iter().find(|m| m.key.eq_ignore_ascii_case(key))
    }

    /// Look up the pipeline for `intent`.
    ///
    /// A format pair yields a single-stage pipeline; identical formats are
    /// rejected here, before anything is spawned. A mode whose stage weights
    /// do not cover the full range is refused.
    pub fn resolve(&self, intent: &ConversionIntent) -> Result<PipelineSpec, ConvertError> {
        match intent {
            ConversionIntent::Formats { from, to } => {
                if from.trim().eq_ignore_ascii_case(to.trim()) {
                    return Err(ConvertError::FormatsIdentical {
                        format: from.trim().to_ascii_lowercase(),
                    });
                }
                let from: DiskFormat = from.parse().map_err(|_| not_supported(intent))?;
                let to: DiskFormat = to.parse().map_err(|_| not_supported(intent))?;
                if from == to {
                    return Err(ConvertError::FormatsIdentical {
                        format: from.to_string(),
                    });
                }
                Ok(PipelineSpec::new(
                    format!("{from}-to-{to}"),
                    vec![StageSpec::convert(Some(from), to, 1.0)],
                ))
            }
            ConversionIntent::Mode(key) => {
                let mode = self.mode(key).ok_or_else(|| not_supported(intent))?;
                mode.pipeline.validate().inspect_err(|e| {
                    warn!(mode = %mode.key, error = %e, "refusing misconfigured mode");
                })?;
                Ok(mode.pipeline.clone())
            }
        }
    }
}

fn not_supported(intent: &ConversionIntent) -> ConvertError {
    ConvertError::NotSupported {
        intent: intent.to_string(),
    }
}

/// `<src dir>/<src stem>_converted<ext>` for the given output format.
pub fn default_destination(source: &Path, format: DiskFormat) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "disk".to_string());
    source.with_file_name(format!("{stem}_converted{}", format.extension()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pipeline_weights_sum_to_one() {
        let catalog = Catalog::default();
        for mode in catalog.modes() {
            assert!(
                (mode.pipeline.total_weight() - 1.0).abs() < 1e-6,
                "{} sums to {}",
                mode.key,
                mode.pipeline.total_weight()
            );
        }
        for from in DiskFormat::iter() {
            for to in DiskFormat::iter().filter(|t| *t != from) {
                let p = catalog
                    .resolve(&ConversionIntent::formats(from.to_string(), to.to_string()))
                    .unwrap();
                assert!(p.has_valid_weights());
                assert_eq!(p.stages.len(), 1);
            }
        }
    }

    #[test]
    fn resolve_is_deterministic() {
        let catalog = Catalog::default();
        for intent in [
            ConversionIntent::formats("vhdx", "qcow2"),
            ConversionIntent::mode("virtualpc-to-vmware"),
        ] {
            assert_eq!(catalog.resolve(&intent), catalog.resolve(&intent));
        }
    }

    #[test]
    fn identical_formats_are_rejected() {
        let err = Catalog::default()
            .resolve(&ConversionIntent::formats("qcow2", "QCOW2"))
            .unwrap_err();
        assert_eq!(
            err,
            ConvertError::FormatsIdentical {
                format: "qcow2".into()
            }
        );
    }

    #[test]
    fn identical_tags_are_rejected_even_when_unknown() {
        let err = Catalog::default()
            .resolve(&ConversionIntent::formats("foo", "FOO"))
            .unwrap_err();
        assert_eq!(
            err,
            ConvertError::FormatsIdentical {
                format: "foo".into()
            }
        );
    }

    #[test]
    fn mode_with_short_weights_is_refused() {
        let catalog = Catalog::new(vec![NamedMode::new(
            "half",
            "Half",
            "covers only half of the range",
            Some(DiskFormat::Vhdx),
            vec![StageSpec::convert(Some(DiskFormat::Vhdx), DiskFormat::Raw, 0.5)],
        )]);
        let err = catalog.resolve(&ConversionIntent::mode("half")).unwrap_err();
        assert!(
            matches!(&err, ConvertError::InvalidPipeline { name, .. } if name == "half"),
            "{err:?}"
        );
    }

    #[test]
    fn mode_with_zero_weight_stage_is_refused() {
        use DiskFormat::*;
        let catalog = Catalog::new(vec![NamedMode::new(
            "skewed",
            "Skewed",
            "second stage has no progress slice",
            Some(Vhdx),
            vec![
                StageSpec::convert(Some(Vhdx), Raw, 1.0),
                StageSpec::convert(Some(Raw), Vmdk, 0.0),
            ],
        )]);
        assert!(matches!(
            catalog.resolve(&ConversionIntent::mode("skewed")),
            Err(ConvertError::InvalidPipeline { .. })
        ));
    }

    #[test]
    fn unknown_tags_and_modes_are_not_supported() {
        let catalog = Catalog::default();
        assert!(matches!(
            catalog.resolve(&ConversionIntent::formats("ext4", "raw")),
            Err(ConvertError::NotSupported { .. })
        ));
        assert!(matches!(
            catalog.resolve(&ConversionIntent::mode("amiga-to-vmware")),
            Err(ConvertError::NotSupported { .. })
        ));
    }

    #[test]
    fn step_labels_wrap_stages() {
        let p = Catalog::default()
            .resolve(&ConversionIntent::mode("hyperv-to-vmware"))
            .unwrap();
        let labels = p.step_labels();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels[0], "Validate source");
        assert_eq!(labels[1], "Convert VHDX → RAW / IMG");
        assert_eq!(labels[3], "Verify output");
    }

    #[test]
    fn default_destination_uses_format_extension() {
        assert_eq!(
            default_destination(Path::new("/vm/win10.vhdx"), DiskFormat::Qcow2),
            PathBuf::from("/vm/win10_converted.qcow2")
        );
        assert_eq!(
            default_destination(Path::new("disk.img"), DiskFormat::Vpc),
            PathBuf::from("disk_converted.vhd")
        );
    }
}
