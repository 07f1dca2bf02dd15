// SPDX-License-Identifier: MIT

//! Alignment arithmetic, MBR partition type codes and the size-based
//! type inference used when new partitions are stamped.

/// Boot-sector magic at offset 0x1FE.
pub const MBR_MAGIC: u16 = 0xAA55;

/// CHS-addressable limit: an extended container starting below this many
/// sectors is stamped 0x05, at or above it 0x0F.
pub const CHS_LBA_BOUNDARY_SECTORS: u64 = 1_450_560;

/// First usable sector for the leading primary region.
pub const MIN_PARTITION_START_SECTOR: u64 = 2048;

#[inline]
pub fn align_down(value: u64, alignment: u64) -> u64 {
    (value / alignment) * alignment
}

#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    let result = align_down(value, alignment);
    if value % alignment != 0 {
        result + alignment
    } else {
        result
    }
}

#[inline]
pub fn sectors_to_bytes(sectors: u64, bytes_per_sector: u32) -> u64 {
    sectors * bytes_per_sector as u64
}

#[inline]
pub fn bytes_to_sectors(bytes: u64, bytes_per_sector: u32) -> u64 {
    bytes / bytes_per_sector as u64
}

#[macro_export]
/// Defines the set of MBR partition types along with associated constants,
/// predicates and an enum of known kinds.
///
/// For each `$name` this generates:
/// - `pub const PARTITION_<NAME>: u8`
/// - `pub fn is_<name>_partition(ty: u8) -> bool`
///
/// Also generates `MbrPartitionKind` with `from_type`, `as_type` and a
/// `Display` implementation mapping to `$desc`.
///
/// Requires the `paste` crate for identifier concatenation.
macro_rules! define_mbr_partition_types {
    (
        $(
            $name:ident => $desc:expr, $ty:expr
        ),+ $(,)?
    ) => {
        paste::paste! {
            $(
                #[doc = $desc]
                pub const [<PARTITION_ $name:upper>]: u8 = $ty;

                #[doc = concat!("Checks if an MBR partition type byte is: ", $desc)]
                #[inline]
                pub fn [<is_ $name:lower _partition>](ty: u8) -> bool {
                    ty == [<PARTITION_ $name:upper>]
                }
            )+

            #[allow(non_camel_case_types)]
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub enum MbrPartitionKind {
                $($name,)+
                Unknown(u8),
            }

            impl MbrPartitionKind {
                pub fn from_type(ty: u8) -> Self {
                    match ty {
                        $(t if t == [<PARTITION_ $name:upper>] => Self::$name,)+
                        other => Self::Unknown(other),
                    }
                }

                pub fn as_type(&self) -> u8 {
                    match self {
                        $(Self::$name => [<PARTITION_ $name:upper>],)+
                        Self::Unknown(ty) => *ty,
                    }
                }
            }

            impl core::fmt::Display for MbrPartitionKind {
                fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                    match self {
                        $(Self::$name => write!(f, $desc),)+
                        Self::Unknown(ty) => write!(f, "Unknown (0x{:02X})", ty),
                    }
                }
            }
        }
    };
}

define_mbr_partition_types! {
    ENTRY_UNUSED => "Unused entry", 0x00,
    FAT_12 => "FAT12", 0x01,
    FAT_16 => "FAT16", 0x04,
    EXTENDED => "Extended container (CHS)", 0x05,
    HUGE => "FAT16 (large CHS)", 0x06,
    IFS => "NTFS / installable file system", 0x07,
    FAT32 => "FAT32 (CHS)", 0x0B,
    FAT32_XINT13 => "FAT32 (LBA)", 0x0C,
    XINT13 => "FAT16 (LBA)", 0x0E,
    XINT13_EXTENDED => "Extended container (LBA)", 0x0F,
    EISA => "EISA", 0x12,
    LINUX => "Linux native", 0x83,
    HIBERNATION => "Hibernation", 0x84,
    DIAGNOSTIC => "Diagnostic", 0xA0,
    DELL => "Dell service", 0xDE,
    GPT_PROTECTIVE => "GPT protective", 0xEE,
    IBM_IML => "IBM IML", 0xFE,
}

/// Extended-container partition types (the payload holds a chain of
/// logical partition descriptors).
#[inline]
pub fn is_container_partition(ty: u8) -> bool {
    matches!(ty, PARTITION_EXTENDED | PARTITION_XINT13_EXTENDED)
}

/// Partition types the mounter recognizes and attaches a volume to.
#[inline]
pub fn is_recognized_partition(ty: u8) -> bool {
    matches!(
        ty,
        PARTITION_FAT_12
            | PARTITION_FAT_16
            | PARTITION_HUGE
            | PARTITION_IFS
            | PARTITION_FAT32
            | PARTITION_FAT32_XINT13
            | PARTITION_XINT13
            | PARTITION_LINUX
    )
}

/// OEM service partitions recognized but never offered for reuse.
#[inline]
pub fn is_oem_partition(ty: u8) -> bool {
    matches!(
        ty,
        PARTITION_EISA
            | PARTITION_HIBERNATION
            | PARTITION_DIAGNOSTIC
            | PARTITION_DELL
            | PARTITION_IBM_IML
    )
}

/// FAT-family types: a volume of one of these types mounted with RawFS
/// counts as unformatted rather than unknown.
#[inline]
pub fn is_fat_family(ty: u8) -> bool {
    matches!(
        ty,
        PARTITION_FAT_12
            | PARTITION_FAT_16
            | PARTITION_HUGE
            | PARTITION_XINT13
            | PARTITION_FAT32
            | PARTITION_FAT32_XINT13
    )
}

/// Picks the extended-container type from the 8.4 GB rule.
#[inline]
pub fn container_type_for_start(start_sector: u64) -> u8 {
    if start_sector < CHS_LBA_BOUNDARY_SECTORS {
        PARTITION_EXTENDED
    } else {
        PARTITION_XINT13_EXTENDED
    }
}

/// Infers a suitable MBR partition type for a freshly created partition.
///
/// Only `"RAW"` (not yet formatted) is meaningful here; the FAT family is
/// picked by size and position so that the resulting type stays mountable
/// by the firmware-facing FAT driver.
pub fn filesystem_to_mbr_type(filesystem: &str, start_sector: u64, sector_count: u64) -> u8 {
    let end = start_sector + sector_count;
    match filesystem {
        "FAT" => {
            if end <= 65_536 {
                PARTITION_FAT_16
            } else if end < CHS_LBA_BOUNDARY_SECTORS {
                PARTITION_HUGE
            } else {
                PARTITION_XINT13
            }
        }
        "FAT32" => {
            if end < CHS_LBA_BOUNDARY_SECTORS {
                PARTITION_FAT32
            } else {
                PARTITION_FAT32_XINT13
            }
        }
        "NTFS" | "BTRFS" => PARTITION_IFS,
        // "RAW" and anything unknown: FAT ladder by size.
        _ => {
            if sector_count < 8192 {
                PARTITION_FAT_12
            } else if end <= 65_536 {
                PARTITION_FAT_16
            } else if end < CHS_LBA_BOUNDARY_SECTORS {
                PARTITION_HUGE
            } else {
                PARTITION_FAT32_XINT13
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_down_basic() {
        assert_eq!(align_down(2049, 63), 2016);
        assert_eq!(align_down(2016, 63), 2016);
        assert_eq!(align_down(0, 63), 0);
    }

    #[test]
    fn align_up_basic() {
        assert_eq!(align_up(2017, 63), 2079);
        assert_eq!(align_up(2016, 63), 2016);
    }

    #[test]
    fn container_type_straddles_boundary() {
        assert_eq!(container_type_for_start(1_450_559), PARTITION_EXTENDED);
        assert_eq!(
            container_type_for_start(1_450_560),
            PARTITION_XINT13_EXTENDED
        );
    }

    #[test]
    fn raw_type_ladder() {
        // Tiny partition: FAT12
        assert_eq!(filesystem_to_mbr_type("RAW", 63, 4096), PARTITION_FAT_12);
        // Small partition within the first 32 MB: FAT16
        assert_eq!(filesystem_to_mbr_type("RAW", 63, 32_768), PARTITION_FAT_16);
        // Below the CHS boundary: large FAT16
        assert_eq!(filesystem_to_mbr_type("RAW", 2048, 500_000), PARTITION_HUGE);
        // A 4 GiB partition ends past the boundary: FAT32 LBA
        assert_eq!(
            filesystem_to_mbr_type("RAW", 2048, 8_388_608),
            PARTITION_FAT32_XINT13
        );
    }

    #[test]
    fn kind_display_roundtrip() {
        let kind = MbrPartitionKind::from_type(0x0C);
        assert_eq!(kind, MbrPartitionKind::FAT32_XINT13);
        assert_eq!(kind.as_type(), 0x0C);
        assert_eq!(MbrPartitionKind::from_type(0x42), MbrPartitionKind::Unknown(0x42));
    }

    #[test]
    fn predicates() {
        assert!(is_container_partition(0x05));
        assert!(is_container_partition(0x0F));
        assert!(!is_container_partition(0x0C));
        assert!(is_recognized_partition(0x07));
        assert!(!is_recognized_partition(0x05));
        assert!(is_fat_family(0x0E));
        assert!(!is_fat_family(0x07));
        assert!(is_oem_partition(0x12));
    }
}
