use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

/// A disk image format understood by qemu-img.
///
/// `Display`/`FromStr` use the qemu-img format tag (`-f`/`-O` argument).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter, AsRefStr)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum DiskFormat {
    Raw,
    Qcow2,
    Vmdk,
    Vdi,
    Vhdx,
    Vpc,
    Qcow,
    Qed,
    Parallels,
}

impl DiskFormat {
    pub fn label(self) -> &'static str {
        match self {
            DiskFormat::Raw => "RAW / IMG",
            DiskFormat::Qcow2 => "QCOW2",
            DiskFormat::Vmdk => "VMDK",
            DiskFormat::Vdi => "VDI",
            DiskFormat::Vhdx => "VHDX",
            DiskFormat::Vpc => "VHD / VPC",
            DiskFormat::Qcow => "QCOW",
            DiskFormat::Qed => "QED",
            DiskFormat::Parallels => "Parallels HDD",
        }
    }

    /// Conventional file extension, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            DiskFormat::Raw => ".img",
            DiskFormat::Qcow2 => ".qcow2",
            DiskFormat::Vmdk => ".vmdk",
            DiskFormat::Vdi => ".vdi",
            DiskFormat::Vhdx => ".vhdx",
            DiskFormat::Vpc => ".vhd",
            DiskFormat::Qcow => ".qcow",
            DiskFormat::Qed => ".qed",
            DiskFormat::Parallels => ".hdd",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            DiskFormat::Raw => "Sector-by-sector image, universal and bootable",
            DiskFormat::Qcow2 => "Native QEMU format with snapshots and compression",
            DiskFormat::Vmdk => "VMware / VirtualBox / QEMU",
            DiskFormat::Vdi => "VirtualBox Disk Image",
            DiskFormat::Vhdx => "Hyper-V (generation 2)",
            DiskFormat::Vpc => "Legacy Hyper-V / Virtual PC",
            DiskFormat::Qcow => "QEMU Copy-On-Write v1 (legacy)",
            DiskFormat::Qed => "QEMU Enhanced Disk (legacy)",
            DiskFormat::Parallels => "Parallels Desktop for Mac",
        }
    }

    pub fn recommended(self) -> bool {
        matches!(self, DiskFormat::Qcow2)
    }

    /// Guess the format from a file extension (with or without the dot).
    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.');
        match ext.to_ascii_lowercase().as_str() {
            "raw" => Some(DiskFormat::Raw),
            "vpc" => Some(DiskFormat::Vpc),
            other => DiskFormat::iter().find(|f| &f.extension()[1..] == other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_round_trip_through_strum() {
        for f in DiskFormat::iter() {
            assert_eq!(f.to_string().parse::<DiskFormat>().unwrap(), f);
        }
        assert_eq!("QCOW2".parse::<DiskFormat>().unwrap(), DiskFormat::Qcow2);
        assert_eq!(DiskFormat::Parallels.as_ref(), "parallels");
        assert!("ext4".parse::<DiskFormat>().is_err());
    }

    #[test]
    fn extensions_map_back_to_formats() {
        assert_eq!(DiskFormat::from_extension(".vhd"), Some(DiskFormat::Vpc));
        assert_eq!(DiskFormat::from_extension("IMG"), Some(DiskFormat::Raw));
        assert_eq!(DiskFormat::from_extension("hdd"), Some(DiskFormat::Parallels));
        assert_eq!(DiskFormat::from_extension("iso"), None);
    }

    #[test]
    fn only_qcow2_is_recommended() {
        let recommended: Vec<_> = DiskFormat::iter().filter(|f| f.recommended()).collect();
        assert_eq!(recommended, vec![DiskFormat::Qcow2]);
    }
}
