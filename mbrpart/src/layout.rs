// SPDX-License-Identifier: MIT

//! The drive-layout buffer: the device-facing mirror of a disk's MBR
//! partition table, plus the codec that maps it to and from the on-disk
//! MBR + EBR chain.
//!
//! Layout shape: slots 0..=3 are the primary table. Every logical
//! partition occupies one group of four slots at stride 4 (indices 4, 8,
//! 12, ...): the logical entry itself, followed by the chain-link slot
//! describing where the next EBR sits; the remaining two slots of the
//! group stay empty.

use crate::device::DriveGeometry;
use crate::errors::*;
use crate::geometry::{
    container_type_for_start, is_container_partition, is_recognized_partition,
    PARTITION_ENTRY_UNUSED, PARTITION_FAT_16,
};
use crate::mbr::{self, BootSector, MbrEntry};
use mbrio::prelude::*;
use zerocopy::FromBytes;

/// Upper bound on EBR chain walks; a healthy chain is far shorter.
const MAX_EBR_CHAIN: usize = 128;

/// One slot of the drive layout buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutEntry {
    pub starting_offset: u64,
    pub partition_length: u64,
    pub hidden_sectors: u32,
    pub partition_number: u32,
    pub partition_type: u8,
    pub boot_indicator: bool,
    pub recognized: bool,
    pub rewrite: bool,
}

impl LayoutEntry {
    /// An empty slot carries neither an offset nor a length.
    #[inline]
    pub fn is_empty_slot(&self) -> bool {
        self.starting_offset == 0 && self.partition_length == 0
    }

    /// Clears the slot, marking it for rewrite.
    #[inline]
    pub fn wipe(&mut self) {
        *self = LayoutEntry {
            rewrite: true,
            ..LayoutEntry::default()
        };
    }
}

/// Device-facing partition layout of one disk.
#[derive(Debug, Clone, Default)]
pub struct DriveLayout {
    pub signature: u32,
    /// Entry count as the device reports it. Diverges from `entries.len()`
    /// only transiently, after a layout write folds it into a table count.
    pub partition_count: u32,
    pub entries: Vec<LayoutEntry>,
}

impl DriveLayout {
    pub fn with_entry_count(count: u32) -> Self {
        Self {
            signature: 0,
            partition_count: count,
            entries: vec![LayoutEntry::default(); count as usize],
        }
    }

    /// Resizes the buffer; slots gained by growth are marked for rewrite
    /// so the new (empty) entries reach the disk.
    pub fn resize(&mut self, count: u32) {
        let old = self.entries.len();
        self.entries
            .resize(count as usize, LayoutEntry::default());
        if count as usize > old {
            for entry in &mut self.entries[old..] {
                entry.rewrite = true;
            }
        }
        self.partition_count = count;
    }

    /// Slot indices holding logical partition entries (4, 8, 12, ...).
    pub fn logical_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (4..self.entries.len()).step_by(4)
    }
}

/// Assigns device partition numbers: non-container primaries first, then
/// the logicals, numbered from 1. Containers and empty slots get 0.
fn assign_partition_numbers(entries: &mut [LayoutEntry]) {
    let mut number = 1;
    for (index, entry) in entries.iter_mut().enumerate() {
        let is_logical_slot = index >= 4 && index % 4 == 0;
        let is_primary_slot = index < 4;

        entry.partition_number = 0;
        if entry.is_empty_slot() || entry.partition_type == PARTITION_ENTRY_UNUSED {
            continue;
        }
        if is_primary_slot && !is_container_partition(entry.partition_type) {
            entry.partition_number = number;
            number += 1;
        } else if is_logical_slot {
            entry.partition_number = number;
            number += 1;
        }
    }
}

fn layout_entry_from_mbr(e: &MbrEntry, base_sector: u64, bytes_per_sector: u64) -> LayoutEntry {
    LayoutEntry {
        starting_offset: (base_sector + e.start_lba as u64) * bytes_per_sector,
        partition_length: e.sectors as u64 * bytes_per_sector,
        hidden_sectors: e.start_lba,
        partition_number: 0,
        partition_type: e.part_type,
        boot_indicator: e.is_bootable(),
        recognized: is_recognized_partition(e.part_type),
        rewrite: false,
    }
}

fn read_sector_512<IO: BlockIO + ?Sized>(io: &mut IO, sector: u64, bps: u64) -> PartResult<[u8; 512]> {
    let mut buf = [0u8; 512];
    io.read_at(sector * bps, &mut buf)?;
    Ok(buf)
}

/// Parses the on-disk MBR and EBR chain into a drive layout, emulating
/// the platform's partition table reader:
/// - no boot magic: an empty layout with zero entries (uninitialized disk);
/// - a volume boot record in sector 0: the super-floppy default layout
///   (one full-disk FAT16 entry at offset zero, signature 1);
/// - otherwise the primary table plus one four-slot group per logical.
pub fn read_drive_layout<IO: BlockIO + ?Sized>(
    io: &mut IO,
    geom: &DriveGeometry,
) -> PartResult<DriveLayout> {
    let bps = geom.bytes_per_sector as u64;
    let sector = read_sector_512(io, 0, bps)?;

    let bs = BootSector::read_from_bytes(&sector[..])
        .map_err(|_| PartError::Invalid("boot sector decode failed"))?;

    if !bs.has_valid_magic() {
        return Ok(DriveLayout::default());
    }

    if mbr::looks_like_vbr(&sector) {
        let mut layout = DriveLayout::with_entry_count(1);
        layout.signature = 1;
        layout.entries[0] = LayoutEntry {
            starting_offset: 0,
            partition_length: geom.chs_sector_count() * bps,
            hidden_sectors: 0,
            partition_number: 1,
            partition_type: PARTITION_FAT_16,
            boot_indicator: false,
            recognized: true,
            rewrite: false,
        };
        return Ok(layout);
    }

    let mut layout = DriveLayout::with_entry_count(4);
    layout.signature = bs.disk_signature();

    let primaries = bs.aligned_entries();
    for (i, e) in primaries.iter().enumerate() {
        if !e.is_empty() {
            layout.entries[i] = layout_entry_from_mbr(e, 0, bps);
        }
    }

    // Walk the EBR chain of the (single) extended container, one
    // four-slot group per chain element.
    let container = primaries
        .iter()
        .find(|e| !e.is_empty() && is_container_partition(e.part_type));
    if let Some(container) = container {
        let container_start = container.start_lba as u64;
        let container_end = container_start + container.sectors as u64;

        let mut ebr_sector = container_start;
        for _ in 0..MAX_EBR_CHAIN {
            let Ok(raw) = read_sector_512(io, ebr_sector, bps) else {
                break;
            };
            let Ok(ebr) = BootSector::read_from_bytes(&raw[..]) else {
                break;
            };
            if !ebr.has_valid_magic() {
                break;
            }

            let chain = ebr.aligned_entries();
            let logical = chain[0];
            let link = chain[1];

            let mut group = [LayoutEntry::default(); 4];
            if !logical.is_empty() {
                group[0] = layout_entry_from_mbr(&logical, ebr_sector, bps);
            }
            if !link.is_empty() && is_container_partition(link.part_type) {
                group[1] = layout_entry_from_mbr(&link, container_start, bps);
                group[1].recognized = false;
            }
            layout.entries.extend_from_slice(&group);

            if link.is_empty() || !is_container_partition(link.part_type) {
                break;
            }
            let next = container_start + link.start_lba as u64;
            if next <= ebr_sector || next >= container_end {
                break;
            }
            ebr_sector = next;
        }
    }

    assign_partition_numbers(&mut layout.entries);
    layout.partition_count = layout.entries.len() as u32;
    Ok(layout)
}

fn mbr_entry_from_layout(
    slot: &LayoutEntry,
    base_sector: u64,
    geom: &DriveGeometry,
) -> MbrEntry {
    let bps = geom.bytes_per_sector as u64;
    let abs_start = slot.starting_offset / bps;
    let sectors = (slot.partition_length / bps) as u32;
    let last = abs_start + sectors.saturating_sub(1) as u64;
    MbrEntry::new(
        if slot.boot_indicator { 0x80 } else { 0x00 },
        mbr::lba_to_chs(abs_start, geom),
        slot.partition_type,
        mbr::lba_to_chs(last, geom),
        (abs_start - base_sector) as u32,
        sectors,
    )
}

/// Writes a drive layout back to the disk, emulating the platform's
/// partition table writer:
/// - rewrites the primary table (preserving boot code) and the signature;
/// - rebuilds the EBR chain for the logical groups;
/// - assigns device partition numbers into the buffer;
/// - folds `partition_count` into the partition *table* count, which the
///   caller must restore afterwards.
pub fn write_drive_layout<IO: BlockIO + ?Sized>(
    io: &mut IO,
    geom: &DriveGeometry,
    layout: &mut DriveLayout,
) -> PartResult<()> {
    let bps = geom.bytes_per_sector as u64;

    // Preserve whatever boot code is present; a fresh disk gets zeroes.
    let mut bs = match read_sector_512(io, 0, bps) {
        Ok(raw) => BootSector::read_from_bytes(&raw[..])
            .unwrap_or_else(|_| BootSector::new_empty()),
        Err(_) => BootSector::new_empty(),
    };

    let mut primaries = [MbrEntry::new_empty(); 4];
    let mut container_start = None;
    for i in 0..4.min(layout.entries.len()) {
        let slot = &layout.entries[i];
        if slot.is_empty_slot() || slot.partition_type == PARTITION_ENTRY_UNUSED {
            continue;
        }
        primaries[i] = mbr_entry_from_layout(slot, 0, geom);
        if is_container_partition(slot.partition_type) && container_start.is_none() {
            container_start = Some(slot.starting_offset / bps);
        }
    }

    bs.set_disk_signature(layout.signature);
    bs.set_entries(&primaries);
    bs.magic = mbr::MBR_SIGNATURE;
    mbr::write_boot_sector(io, 0, &bs)?;

    // Rebuild the EBR chain from the logical groups.
    let logical_slots: Vec<usize> = layout
        .logical_slots()
        .filter(|&i| !layout.entries[i].is_empty_slot())
        .collect();

    if !logical_slots.is_empty() && container_start.is_none() {
        return Err(PartError::Invalid(
            "logical partitions present without an extended container",
        ));
    }

    if let Some(container_start) = container_start {
        if logical_slots.is_empty() {
            // Terminate the chain cleanly so stale EBRs cannot resurrect.
            mbr::write_boot_sector(io, container_start * bps, &BootSector::new_empty())?;
        }

        // The chain always begins at the container start; every further
        // table sector comes from the preceding group's link slot.
        let mut ebr_sector = container_start;
        for (k, &li) in logical_slots.iter().enumerate() {
            let slot = layout.entries[li];
            let log_start = slot.starting_offset / bps;
            if log_start <= ebr_sector {
                return Err(PartError::Invalid(
                    "logical entry precedes its partition table sector",
                ));
            }

            let mut ebr = BootSector::new_empty();
            let mut chain = [MbrEntry::new_empty(); 4];
            chain[0] = mbr_entry_from_layout(&slot, ebr_sector, geom);

            // Chain link: prefer the recorded link slot, else derive it
            // from the next logical group.
            if let Some(&next_li) = logical_slots.get(k + 1) {
                let link_slot = &layout.entries[li + 1];
                let next_ebr;
                if !link_slot.is_empty_slot() {
                    chain[1] = mbr_entry_from_layout(link_slot, container_start, geom);
                    next_ebr = link_slot.starting_offset / bps;
                } else {
                    let next = layout.entries[next_li];
                    let next_start = next.starting_offset / bps;
                    next_ebr = next_start - next.hidden_sectors as u64;
                    chain[1] = MbrEntry::new(
                        0x00,
                        mbr::lba_to_chs(next_ebr, geom),
                        container_type_for_start(next_start),
                        mbr::lba_to_chs(next_start + next.partition_length / bps - 1, geom),
                        (next_ebr - container_start) as u32,
                        (next.hidden_sectors as u64 + next.partition_length / bps) as u32,
                    );
                }
                ebr.set_entries(&chain);
                mbr::write_boot_sector(io, ebr_sector * bps, &ebr)?;
                ebr_sector = next_ebr;
            } else {
                ebr.set_entries(&chain);
                mbr::write_boot_sector(io, ebr_sector * bps, &ebr)?;
            }
        }
    }

    assign_partition_numbers(&mut layout.entries);

    // The device folds the entry count into a count of four-slot tables.
    layout.partition_count = layout.partition_count.div_ceil(4);

    io.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DriveGeometry;

    fn geom(total_sectors: u64) -> DriveGeometry {
        DriveGeometry::synthesized(total_sectors, 512)
    }

    fn entry(start: u64, sectors: u64, ty: u8, boot: bool, hidden: u32) -> LayoutEntry {
        LayoutEntry {
            starting_offset: start * 512,
            partition_length: sectors * 512,
            hidden_sectors: hidden,
            partition_number: 0,
            partition_type: ty,
            boot_indicator: boot,
            recognized: is_recognized_partition(ty),
            rewrite: true,
        }
    }

    #[test]
    fn empty_disk_reads_as_zero_entries() {
        let mut buf = vec![0u8; 512 * 128];
        let mut io = MemBlockIO::new(&mut buf);
        let layout = read_drive_layout(&mut io, &geom(128)).unwrap();
        assert_eq!(layout.partition_count, 0);
        assert!(layout.entries.is_empty());
    }

    #[test]
    fn primary_table_roundtrip() {
        let g = geom(1_048_576);
        let mut buf = vec![0u8; 512 * 8192];
        let mut io = MemBlockIO::new(&mut buf);

        let mut layout = DriveLayout::with_entry_count(4);
        layout.signature = 0x1234_5678;
        layout.entries[0] = entry(2048, 40_960, 0x06, true, 2048);
        layout.entries[1] = entry(43_008, 20_480, 0x07, false, 43_008);

        let mut written = layout.clone();
        write_drive_layout(&mut io, &g, &mut written).unwrap();

        // The device folds the count into a table count.
        assert_eq!(written.partition_count, 1);
        assert_eq!(written.entries[0].partition_number, 1);
        assert_eq!(written.entries[1].partition_number, 2);

        let read = read_drive_layout(&mut io, &g).unwrap();
        assert_eq!(read.signature, 0x1234_5678);
        assert_eq!(read.partition_count, 4);
        assert_eq!(read.entries[0].starting_offset, 2048 * 512);
        assert_eq!(read.entries[0].partition_length, 40_960 * 512);
        assert!(read.entries[0].boot_indicator);
        assert_eq!(read.entries[1].partition_type, 0x07);
        assert_eq!(read.entries[1].partition_number, 2);
        assert!(read.entries[2].is_empty_slot());
    }

    #[test]
    fn logical_chain_roundtrip() {
        let g = geom(1_048_576);
        let align = 63u64;
        let mut buf = vec![0u8; 512 * 400_000];
        let mut io = MemBlockIO::new(&mut buf);

        // Primary FAT16 + extended container with two logicals.
        let cont_start = 43_008u64;
        let cont_len = 200_000u64;
        let log1_start = cont_start + align;
        let log1_len = 80_000u64;
        let ebr2 = log1_start + log1_len;
        let log2_start = ebr2 + align;
        let log2_len = 50_000u64;

        let mut layout = DriveLayout::with_entry_count(12);
        layout.signature = 0xAABBCCDD;
        layout.entries[0] = entry(2048, 40_000, 0x06, false, 2048);
        layout.entries[1] = entry(cont_start, cont_len, 0x05, false, cont_start as u32);
        layout.entries[4] = entry(log1_start, log1_len, 0x06, false, align as u32);
        // Link from the first logical's EBR to the second.
        layout.entries[5] = entry(ebr2, align + log2_len, 0x05, false, (ebr2 - cont_start) as u32);
        layout.entries[8] = entry(log2_start, log2_len, 0x07, false, align as u32);

        let mut written = layout.clone();
        write_drive_layout(&mut io, &g, &mut written).unwrap();
        assert_eq!(written.partition_count, 3);

        let read = read_drive_layout(&mut io, &g).unwrap();
        assert_eq!(read.partition_count, 12);
        assert_eq!(read.entries[4].starting_offset, log1_start * 512);
        assert_eq!(read.entries[4].partition_length, log1_len * 512);
        assert_eq!(read.entries[4].hidden_sectors, align as u32);
        assert_eq!(read.entries[8].starting_offset, log2_start * 512);
        assert_eq!(read.entries[8].partition_type, 0x07);
        // Numbers: primary FAT16 is 1, logicals 2 and 3; container is 0.
        assert_eq!(read.entries[0].partition_number, 1);
        assert_eq!(read.entries[1].partition_number, 0);
        assert_eq!(read.entries[4].partition_number, 2);
        assert_eq!(read.entries[8].partition_number, 3);
    }

    #[test]
    fn super_floppy_default_layout() {
        let g = geom(65_536);
        let mut buf = vec![0u8; 512 * 65_536];
        buf[0] = 0xEB;
        buf[11] = 0x00;
        buf[12] = 0x02;
        buf[13] = 4;
        buf[510] = 0x55;
        buf[511] = 0xAA;
        let mut io = MemBlockIO::new(&mut buf);

        let layout = read_drive_layout(&mut io, &g).unwrap();
        assert_eq!(layout.partition_count, 1);
        assert_eq!(layout.signature, 1);
        let e = &layout.entries[0];
        assert_eq!(e.starting_offset, 0);
        assert_eq!(e.hidden_sectors, 0);
        assert_eq!(e.partition_type, PARTITION_FAT_16);
        assert!(!e.boot_indicator);
        assert_eq!(e.partition_number, 1);
    }

    #[test]
    fn stale_chain_is_terminated_when_last_logical_goes() {
        let g = geom(1_048_576);
        let mut buf = vec![0u8; 512 * 400_000];
        let mut io = MemBlockIO::new(&mut buf);

        let cont_start = 43_008u64;
        let mut layout = DriveLayout::with_entry_count(8);
        layout.entries[1] = entry(cont_start, 200_000, 0x05, false, cont_start as u32);
        layout.entries[4] = entry(cont_start + 63, 80_000, 0x06, false, 63);
        let mut written = layout.clone();
        write_drive_layout(&mut io, &g, &mut written).unwrap();

        // Drop the logical, keep the container.
        let mut layout = DriveLayout::with_entry_count(4);
        layout.entries[1] = entry(cont_start, 200_000, 0x05, false, cont_start as u32);
        write_drive_layout(&mut io, &g, &mut layout).unwrap();

        let read = read_drive_layout(&mut io, &g).unwrap();
        assert_eq!(read.partition_count, 8);
        assert!(read.entries[4].is_empty_slot());
    }
}
