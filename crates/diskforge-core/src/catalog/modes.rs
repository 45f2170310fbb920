use tracing::error;

use crate::catalog::DiskFormat;
use crate::runtime::pipeline::PipelineSpec;
use crate::runtime::stage::StageSpec;
use crate::runtime::types::ConvertError;

/// A fixed multi-stage workflow selected by key.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedMode {
    pub key: String,
    pub label: String,
    pub description: String,
    /// Expected input format, `None` when qemu-img should detect it.
    pub input_format: Option<DiskFormat>,
    pub pipeline: PipelineSpec,
}

impl NamedMode {
    pub fn new(
        key: &str,
        label: &str,
        description: &str,
        input_format: Option<DiskFormat>,
        stages: Vec<StageSpec>,
    ) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            input_format,
            pipeline: PipelineSpec::new(key, stages),
        }
    }

    /// Build a chain `formats[0] → formats[1] → …` with one stage per hop.
    ///
    /// `weights` must hold exactly one entry per hop.
    pub fn chain(
        key: &str,
        label: &str,
        description: &str,
        formats: &[DiskFormat],
        weights: &[f64],
    ) -> Result<Self, ConvertError> {
        let hops = formats.len().saturating_sub(1);
        if hops == 0 || weights.len() != hops {
            return Err(ConvertError::InvalidPipeline {
                name: key.to_string(),
                reason: format!(
                    "{} formats need {hops} weights, got {}",
                    formats.len(),
                    weights.len()
                ),
            });
        }
        let stages = formats
            .windows(2)
            .zip(weights)
            .map(|(pair, &w)| StageSpec::convert(Some(pair[0]), pair[1], w))
            .collect();
        Ok(Self::new(key, label, description, formats.first().copied(), stages))
    }
}

/// The modes shipped with diskforge.
pub fn builtin_modes() -> Vec<NamedMode> {
    use DiskFormat::*;

    let chains = [
        NamedMode::chain(
            "hyperv-to-vmware",
            "Hyper-V → VMware",
            "VHDX to VMDK through a raw intermediate",
            &[Vhdx, Raw, Vmdk],
            &[0.5, 0.5],
        ),
        NamedMode::chain(
            "vmware-to-virtualbox",
            "VMware → VirtualBox",
            "VMDK to VDI through a raw intermediate",
            &[Vmdk, Raw, Vdi],
            &[0.5, 0.5],
        ),
        NamedMode::chain(
            "virtualpc-to-vmware",
            "Virtual PC → VMware",
            "Legacy VHD to VMDK through raw and qcow2",
            &[Vpc, Raw, Qcow2, Vmdk],
            &[0.4, 0.3, 0.3],
        ),
    ];

    let mut modes: Vec<NamedMode> = chains
        .into_iter()
        .filter_map(|m| m.inspect_err(|e| error!(error = %e, "skipping builtin mode")).ok())
        .collect();
    modes.push(NamedMode::new(
        "compress-qcow2",
        "Compress to QCOW2",
        "Any readable image to a compressed qcow2",
        None,
        vec![
            StageSpec::convert(None, Qcow2, 1.0)
                .with_options(["-c"])
                .with_label("Compress → QCOW2"),
        ],
    ));
    modes
}
