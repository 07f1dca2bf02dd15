// SPDX-License-Identifier: MIT

//! Filesystem inference over an opened volume: boot-record signature
//! sniffing and BPB label extraction. The engine only needs the name and
//! the label; everything deeper is out of scope here.

use crate::device::{DeviceError, DeviceResult};
use crate::region::MAX_LABEL_CHARS;
use mbrio::prelude::*;

const BTRFS_MAGIC_OFFSET: u64 = 0x10040;
const BTRFS_MAGIC: &[u8; 8] = b"_BHRfS_M";

/// FAT12/16 BPB volume label offset.
const FAT16_LABEL_OFFSET: usize = 0x2B;
/// FAT32 BPB volume label offset.
const FAT32_LABEL_OFFSET: usize = 0x47;
const BPB_LABEL_LEN: usize = 11;

fn read_vbr<IO: BlockIO + ?Sized>(io: &mut IO) -> DeviceResult<[u8; 512]> {
    let mut sector = [0u8; 512];
    io.read_at(0, &mut sector).map_err(DeviceError::Block)?;
    Ok(sector)
}

fn is_fat32_vbr(sector: &[u8]) -> bool {
    sector.get(0x52..0x5A).is_some_and(|tag| tag.starts_with(b"FAT32"))
}

fn is_fat_vbr(sector: &[u8]) -> bool {
    sector.get(0x36..0x3E).is_some_and(|tag| tag.starts_with(b"FAT"))
}

/// Infers the filesystem on an opened volume. Returns the recognized
/// name, or `"RAW"` when no signature matches (the volume may still be
/// formatted with something unknown, or not at all).
pub fn infer_filesystem<IO: BlockIO + ?Sized>(io: &mut IO) -> DeviceResult<String> {
    let sector = read_vbr(io)?;

    let name = if sector[3..11] == *b"NTFS    " {
        "NTFS"
    } else if sector[3..11] == *b"EXFAT   " {
        "EXFAT"
    } else if is_fat32_vbr(&sector) {
        "FAT32"
    } else if is_fat_vbr(&sector) {
        "FAT"
    } else {
        // BTRFS keeps its superblock 64 KiB in; small volumes cannot hold one.
        let mut magic = [0u8; 8];
        if io.read_at(BTRFS_MAGIC_OFFSET, &mut magic).is_ok() && magic == *BTRFS_MAGIC {
            "BTRFS"
        } else {
            "RAW"
        }
    };

    Ok(name.to_string())
}

/// Reads the volume label (up to 32 characters). Only the FAT family
/// keeps its label in the BPB; everything else reports an empty label.
pub fn volume_label<IO: BlockIO + ?Sized>(io: &mut IO) -> DeviceResult<String> {
    let sector = read_vbr(io)?;

    let raw = if is_fat32_vbr(&sector) {
        &sector[FAT32_LABEL_OFFSET..FAT32_LABEL_OFFSET + BPB_LABEL_LEN]
    } else if is_fat_vbr(&sector) {
        &sector[FAT16_LABEL_OFFSET..FAT16_LABEL_OFFSET + BPB_LABEL_LEN]
    } else {
        return Ok(String::new());
    };

    let label: String = raw
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect();
    let mut label = label.trim_end().to_string();
    label.truncate(MAX_LABEL_CHARS);
    Ok(label)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_with(patch: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut buf = vec![0u8; 0x11000];
        patch(&mut buf);
        buf
    }

    #[test]
    fn recognizes_ntfs() {
        let mut buf = volume_with(|b| b[3..11].copy_from_slice(b"NTFS    "));
        let mut io = MemBlockIO::new(&mut buf);
        assert_eq!(infer_filesystem(&mut io).unwrap(), "NTFS");
    }

    #[test]
    fn recognizes_fat32_and_label() {
        let mut buf = volume_with(|b| {
            b[0x52..0x57].copy_from_slice(b"FAT32");
            b[0x47..0x52].copy_from_slice(b"SYSTEM     ");
        });
        let mut io = MemBlockIO::new(&mut buf);
        assert_eq!(infer_filesystem(&mut io).unwrap(), "FAT32");
        assert_eq!(volume_label(&mut io).unwrap(), "SYSTEM");
    }

    #[test]
    fn recognizes_fat16() {
        let mut buf = volume_with(|b| b[0x36..0x3B].copy_from_slice(b"FAT16"));
        let mut io = MemBlockIO::new(&mut buf);
        assert_eq!(infer_filesystem(&mut io).unwrap(), "FAT");
    }

    #[test]
    fn recognizes_btrfs() {
        let mut buf = volume_with(|b| {
            b[0x10040..0x10048].copy_from_slice(b"_BHRfS_M");
        });
        let mut io = MemBlockIO::new(&mut buf);
        assert_eq!(infer_filesystem(&mut io).unwrap(), "BTRFS");
    }

    #[test]
    fn unknown_is_raw() {
        let mut buf = volume_with(|_| {});
        let mut io = MemBlockIO::new(&mut buf);
        assert_eq!(infer_filesystem(&mut io).unwrap(), "RAW");
    }

    #[test]
    fn tiny_volume_is_raw_not_error() {
        // Too small for a BTRFS superblock probe.
        let mut buf = vec![0u8; 4096];
        let mut io = MemBlockIO::new(&mut buf);
        assert_eq!(infer_filesystem(&mut io).unwrap(), "RAW");
    }
}
