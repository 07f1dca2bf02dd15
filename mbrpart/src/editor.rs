// SPDX-License-Identifier: MIT

//! Partition editing on top of the region model: creation and deletion
//! under the MBR geometric constraints, active-partition selection,
//! drive-letter assignment and the layout-buffer rebuild.

use crate::device::DiskBus;
use crate::errors::*;
use crate::geometry::{
    align_down, container_type_for_start, filesystem_to_mbr_type, is_container_partition,
    is_recognized_partition, PARTITION_ENTRY_UNUSED, PARTITION_IFS,
};
use crate::layout::LayoutEntry;
use crate::region::{
    DiskStyle, EnumFlags, FormatState, PartitionList, Region, RegionId,
};
use crate::volume;

/// Checks whether a new primary or logical partition may be created in
/// the given region. Returns `Ok(())` or the typed refusal; nothing is
/// mutated either way.
pub fn partition_creation_checks(list: &PartitionList, region: RegionId) -> PartResult<()> {
    let part = list.region(region).ok_or(PartError::NotFound)?;
    let disk = list.disk(part.disk).ok_or(PartError::NotFound)?;

    if disk.style == DiskStyle::Gpt {
        return Err(PartError::WarnPartition);
    }

    // Only one partition is ever allowed on a super-floppy, and it
    // already covers the whole disk.
    if list.is_super_floppy(part.disk) {
        return Err(PartError::PartitionTableFull);
    }

    if part.is_partitioned {
        return Err(PartError::NewPartition);
    }

    if !part.logical && disk.primary_partition_count() >= 4 {
        return Err(PartError::PartitionTableFull);
    }

    Ok(())
}

/// Same checks for an extended container, which additionally must be the
/// only one on its disk.
pub fn extended_partition_creation_checks(
    list: &PartitionList,
    region: RegionId,
) -> PartResult<()> {
    let part = list.region(region).ok_or(PartError::NotFound)?;
    let disk = list.disk(part.disk).ok_or(PartError::NotFound)?;

    if disk.style == DiskStyle::Gpt {
        return Err(PartError::WarnPartition);
    }
    if list.is_super_floppy(part.disk) {
        return Err(PartError::PartitionTableFull);
    }
    if part.is_partitioned {
        return Err(PartError::NewPartition);
    }
    if disk.primary_partition_count() >= 4 {
        return Err(PartError::PartitionTableFull);
    }
    if disk.extended.is_some() {
        return Err(PartError::OnlyOneExtended);
    }

    Ok(())
}

/// Converts a requested byte size into sectors, clamped to the region.
/// Zero (or the exact region size) means the whole region.
fn requested_sector_count(list: &PartitionList, region: RegionId, size_bytes: u64) -> PartResult<u64> {
    let part = list.region(region).ok_or(PartError::NotFound)?;
    let disk = list.disk(part.disk).ok_or(PartError::NotFound)?;

    if size_bytes == 0 || size_bytes == disk.region_size_bytes(part) {
        return Ok(part.sector_count);
    }

    let sectors = size_bytes / disk.bytes_per_sector as u64;
    let sectors = sectors.min(part.sector_count);
    if sectors == 0 {
        return Err(PartError::Invalid("requested partition size too small"));
    }
    Ok(sectors)
}

/// Turns a free region into a partition of `sector_count` sectors,
/// splitting off a trailing blank region when the aligned end leaves
/// space behind.
fn initialize_partition_entry(
    list: &mut PartitionList,
    region: RegionId,
    sector_count: u64,
) -> PartResult<()> {
    let part = list.region(region).ok_or(PartError::NotFound)?;
    debug_assert!(!part.is_partitioned);
    if sector_count > part.sector_count {
        return Err(PartError::Invalid("region too small for requested size"));
    }

    let disk_index = part.disk;
    let (start, old_count, logical) = (part.start_sector, part.sector_count, part.logical);
    let alignment = list.disks[disk_index].sector_alignment;

    let aligned_end = align_down(start + sector_count, alignment);
    if aligned_end <= start {
        return Err(PartError::Invalid("requested size aligns to zero sectors"));
    }

    if aligned_end - start != old_count {
        // Split: the remainder becomes a new blank region after this one.
        let id = list.alloc_region_id();
        let remainder = Region::new_blank(
            id,
            disk_index,
            aligned_end,
            start + old_count - aligned_end,
            logical,
        );
        let part = list.region_mut(region).unwrap();
        part.sector_count = aligned_end - start;
        list.insert_disk_region(disk_index, remainder)?;
    }

    let part = list.region_mut(region).unwrap();
    part.new_region = true;
    part.is_partitioned = true;
    part.partition_type =
        filesystem_to_mbr_type("RAW", part.start_sector, part.sector_count);
    debug_assert_ne!(part.partition_type, PARTITION_ENTRY_UNUSED);
    part.volume.reset();
    part.volume.new_volume = true;
    part.boot_indicator = false;

    Ok(())
}

/// Creates a primary or logical partition in the given free region.
/// `size_bytes == 0` uses the whole region.
pub fn create_partition(
    list: &mut PartitionList,
    region: RegionId,
    size_bytes: u64,
) -> PartResult<()> {
    partition_creation_checks(list, region)?;

    let sector_count = requested_sector_count(list, region, size_bytes)?;
    initialize_partition_entry(list, region, sector_count)?;

    let disk_index = list.region(region).unwrap().disk;
    update_disk_layout(list, disk_index);
    assign_drive_letters(list);

    Ok(())
}

/// Inserts the single free region spanning the usable space of a fresh
/// extended container.
fn add_logical_disk_space(list: &mut PartitionList, disk_index: usize) -> PartResult<()> {
    let disk = list.disk(disk_index).ok_or(PartError::NotFound)?;
    let ext = disk
        .extended
        .and_then(|id| list.region(id))
        .ok_or(PartError::Invalid("disk has no extended container"))?;

    let alignment = disk.sector_alignment;
    if ext.sector_count <= alignment {
        return Err(PartError::Invalid("extended container too small"));
    }
    let start = ext.start_sector + alignment;
    let count = ext.sector_count - alignment;

    let id = list.alloc_region_id();
    let region = Region::new_blank(id, disk_index, start, count, true);
    list.insert_disk_region(disk_index, region)?;
    Ok(())
}

/// Creates the extended container in the given free region and seeds its
/// logical free space.
pub fn create_extended_partition(
    list: &mut PartitionList,
    region: RegionId,
    size_bytes: u64,
) -> PartResult<()> {
    extended_partition_creation_checks(list, region)?;

    let sector_count = requested_sector_count(list, region, size_bytes)?;
    initialize_partition_entry(list, region, sector_count)?;

    let disk_index = {
        let part = list.region_mut(region).unwrap();
        debug_assert!(!part.logical);
        part.partition_type = container_type_for_start(part.start_sector);
        part.disk
    };

    list.disks[disk_index].extended = Some(region);
    add_logical_disk_space(list, disk_index)?;

    update_disk_layout(list, disk_index);
    assign_drive_letters(list);

    Ok(())
}

/// Whether the volume of this region is one the system actually mounted
/// and that therefore needs a dismount before the region goes away.
fn needs_dismount(part: &Region) -> bool {
    part.is_partitioned
        && !is_container_partition(part.partition_type)
        && is_recognized_partition(part.partition_type)
        && part.volume.format_state != FormatState::UnknownFormat
        && !part.volume.filesystem.is_empty()
        && part.number != 0
}

/// Deletes a partition (or a whole extended container including its
/// logical partitions), merging the freed space with any neighboring
/// free regions. Returns the resulting free region.
pub fn delete_partition<B: DiskBus>(
    list: &mut PartitionList,
    bus: &mut B,
    region: RegionId,
) -> PartResult<RegionId> {
    let part = list.region(region).ok_or(PartError::NotFound)?;
    if !part.is_partitioned {
        return Err(PartError::Invalid("cannot delete unpartitioned space"));
    }
    debug_assert_ne!(part.partition_type, PARTITION_ENTRY_UNUSED);
    let disk_index = part.disk;

    if list.system_partition == Some(region) {
        list.system_partition = None;
    }

    if list.disks[disk_index].extended == Some(region) {
        // Deleting the container deletes every logical partition in it.
        let logicals = std::mem::take(&mut list.disks[disk_index].logical);
        for mut logical in logicals {
            if needs_dismount(&logical) {
                let _ = volume::dismount_volume(bus, &mut logical.volume);
            }
        }
        list.disks[disk_index].extended = None;
    } else {
        let part = list.region_mut(region).unwrap();
        if needs_dismount(part) {
            let _ = volume::dismount_volume(bus, &mut part.volume);
        }
    }

    // Merge with the adjacent free regions.
    let prev = adjacent_unpartitioned(list, region, false);
    let next = adjacent_unpartitioned(list, region, true);

    let freed = match (prev, next) {
        (Some(prev), Some(next)) => {
            let count = list.region(region).unwrap().sector_count;
            let next_count = list.region(next).unwrap().sector_count;
            list.take_region(region);
            list.take_region(next);
            let prev_region = list.region_mut(prev).unwrap();
            prev_region.sector_count += count + next_count;
            prev
        }
        (Some(prev), None) => {
            let count = list.region(region).unwrap().sector_count;
            list.take_region(region);
            let prev_region = list.region_mut(prev).unwrap();
            prev_region.sector_count += count;
            prev
        }
        (None, Some(next)) => {
            let taken = list.take_region(region).unwrap();
            let next_region = list.region_mut(next).unwrap();
            next_region.start_sector = taken.start_sector;
            next_region.sector_count += taken.sector_count;
            next
        }
        (None, None) => {
            // Nothing to merge: convert the region in place.
            let part = list.region_mut(region).unwrap();
            part.is_partitioned = false;
            part.on_disk_number = 0;
            part.number = 0;
            part.boot_indicator = false;
            part.partition_type = PARTITION_ENTRY_UNUSED;
            part.new_region = false;
            part.auto_create = false;
            part.volume.reset();
            region
        }
    };

    update_disk_layout(list, disk_index);
    assign_drive_letters(list);

    Ok(freed)
}

/// The neighboring region in the same list, if it is unpartitioned.
fn adjacent_unpartitioned(
    list: &PartitionList,
    region: RegionId,
    forward: bool,
) -> Option<RegionId> {
    let part = list.region(region)?;
    let flags = if part.logical {
        EnumFlags::MBR_LOGICAL_ONLY
    } else {
        EnumFlags::MBR_PRIMARY_ONLY
    };
    let flags = if forward { flags } else { flags | EnumFlags::PREV };

    let neighbor = list.adjacent_disk_region(None, Some(region), flags)?;
    (!list.region(neighbor)?.is_partitioned).then_some(neighbor)
}

/// Deterministic drive-letter pass, starting at `C`: first the primary
/// partitions of every disk in order, then the logical ones. Letters run
/// out at `Z`.
pub fn assign_drive_letters(list: &mut PartitionList) {
    let mut letter = b'C';

    for pass_logical in [false, true] {
        for disk_index in 0..list.disks.len() {
            let flags = if pass_logical {
                EnumFlags::MBR_LOGICAL_ONLY
            } else {
                EnumFlags::MBR_PRIMARY_ONLY
            };
            let regions: Vec<RegionId> = list.disk_regions(disk_index, flags).collect();
            for id in regions {
                let part = list.region_mut(id).unwrap();
                part.volume.drive_letter = None;

                let eligible = part.is_partitioned
                    && (pass_logical || !is_container_partition(part.partition_type))
                    && (is_recognized_partition(part.partition_type) || part.sector_count != 0);
                if eligible && letter <= b'Z' {
                    part.volume.drive_letter = Some(letter as char);
                    letter += 1;
                }
            }
        }
    }
}

fn is_same_primary_layout_entry(entry: &LayoutEntry, offset: u64, length: u64) -> bool {
    entry.starting_offset == offset && entry.partition_length == length
}

/// Rebuilds the layout buffer of a disk from its region model and marks
/// the disk dirty. The buffer is resized to `4 + 4 x logical count`;
/// every slot not owned by a partition is wiped for rewrite.
pub fn update_disk_layout(list: &mut PartitionList, disk_index: usize) {
    let Some(disk) = list.disk(disk_index) else {
        return;
    };
    if disk.style == DiskStyle::Gpt {
        return;
    }

    let bps = disk.bytes_per_sector as u64;
    let alignment = disk.sector_alignment;
    let ext_start = disk
        .extended
        .and_then(|id| list.region(id))
        .map(|r| r.start_sector);

    let new_count = 4 + 4 * disk.logical_partition_count() as u32;
    {
        let disk = list.disk_mut(disk_index).unwrap();
        let layout = disk.layout.get_or_insert_with(Default::default);
        if layout.partition_count != new_count {
            layout.resize(new_count);
        }
    }

    // Primary table.
    let primary_ids: Vec<RegionId> = list.disks[disk_index]
        .primary
        .iter()
        .filter(|r| r.is_partitioned)
        .map(|r| r.id)
        .collect();

    let mut partition_number = 1u32;
    let mut index = 0usize;
    for id in primary_ids {
        let part = list.region(id).unwrap();
        debug_assert_ne!(part.partition_type, PARTITION_ENTRY_UNUSED);
        let offset = part.start_sector * bps;
        let length = part.sector_count * bps;
        let hidden = part.start_sector as u32;
        let container = is_container_partition(part.partition_type);

        let on_disk_number = if container { 0 } else { partition_number };
        let (ty, boot, number) = {
            let part = list.region_mut(id).unwrap();
            part.layout_index = index;
            if part.new_region {
                part.number = 0;
            }
            part.on_disk_number = on_disk_number;
            (part.partition_type, part.boot_indicator, part.number)
        };

        let layout = list.disks[disk_index].layout.as_mut().unwrap();
        let entry = &mut layout.entries[index];
        if !is_same_primary_layout_entry(entry, offset, length) {
            *entry = LayoutEntry {
                starting_offset: offset,
                partition_length: length,
                hidden_sectors: hidden,
                partition_number: number,
                partition_type: ty,
                boot_indicator: boot,
                recognized: is_recognized_partition(ty),
                rewrite: true,
            };
        }

        if !container {
            partition_number += 1;
        }
        index += 1;
    }
    let primary_used = index;
    debug_assert!(primary_used <= 4);

    // Logical table, one four-slot group per partition; each group's
    // second slot links to the next group's EBR.
    let logical_ids: Vec<RegionId> = list.disks[disk_index]
        .logical
        .iter()
        .filter(|r| r.is_partitioned)
        .map(|r| r.id)
        .collect();

    let mut index = 4usize;
    let mut link_slot: Option<usize> = None;
    let mut filled: Vec<usize> = Vec::new();
    for id in logical_ids {
        let part = list.region(id).unwrap();
        debug_assert_ne!(part.partition_type, PARTITION_ENTRY_UNUSED);
        let start = part.start_sector;
        let offset = start * bps;
        let length = part.sector_count * bps;

        let (ty, number) = {
            let part = list.region_mut(id).unwrap();
            part.layout_index = index;
            if part.new_region {
                part.number = 0;
            }
            part.on_disk_number = partition_number;
            (part.partition_type, part.number)
        };

        let layout = list.disks[disk_index].layout.as_mut().unwrap();
        layout.entries[index] = LayoutEntry {
            starting_offset: offset,
            partition_length: length,
            hidden_sectors: alignment as u32,
            partition_number: number,
            partition_type: ty,
            boot_indicator: false,
            recognized: is_recognized_partition(ty),
            rewrite: true,
        };
        filled.push(index);

        // Fill the link slot of the previous logical entry.
        if let Some(slot) = link_slot {
            let hidden = start - alignment - ext_start.unwrap_or(0);
            layout.entries[slot] = LayoutEntry {
                starting_offset: (start - alignment) * bps,
                partition_length: (start + alignment) * bps,
                hidden_sectors: hidden as u32,
                partition_number: 0,
                partition_type: container_type_for_start(start),
                boot_indicator: false,
                recognized: false,
                rewrite: true,
            };
            filled.push(slot);
        }
        link_slot = Some(index + 1);

        partition_number += 1;
        index += 4;
    }

    // Wipe everything not owned by a partition entry.
    let layout = list.disks[disk_index].layout.as_mut().unwrap();
    for index in primary_used..4usize.min(layout.entries.len()) {
        if !layout.entries[index].is_empty_slot() {
            layout.entries[index].wipe();
        }
    }
    for index in 4..layout.entries.len() {
        if !filled.contains(&index) && !layout.entries[index].is_empty_slot() {
            layout.entries[index].wipe();
        }
    }

    let disk = list.disk_mut(disk_index).unwrap();
    // A raw disk that just received a table is an MBR disk from now on.
    disk.style = DiskStyle::Mbr;
    disk.dirty = true;
}

/// Changes the MBR partition type of a partition in place, both in the
/// model and in the layout buffer.
pub fn set_mbr_partition_type(
    list: &mut PartitionList,
    region: RegionId,
    partition_type: u8,
) -> PartResult<()> {
    let part = list.region_mut(region).ok_or(PartError::NotFound)?;
    let disk_index = part.disk;
    let layout_index = part.layout_index;
    part.partition_type = partition_type;

    let disk = list.disk_mut(disk_index).ok_or(PartError::NotFound)?;
    debug_assert_eq!(disk.style, DiskStyle::Mbr);
    disk.dirty = true;
    if let Some(entry) = disk
        .layout
        .as_mut()
        .and_then(|l| l.entries.get_mut(layout_index))
    {
        entry.partition_type = partition_type;
        entry.recognized = is_recognized_partition(partition_type);
        entry.rewrite = true;
    }
    Ok(())
}

/// Makes a partition the active (bootable) one on its disk, clearing the
/// previous active partition. Returns `false` when there is nothing to
/// do the operation on.
pub fn set_active_partition(
    list: &mut PartitionList,
    region: RegionId,
    old_active: Option<RegionId>,
) -> bool {
    if list.disks.is_empty() || list.region(region).is_none() {
        return false;
    }

    // Already the system partition, or already active and the caller
    // knew it: done.
    if list.system_partition == Some(region) {
        return true;
    }
    if old_active == Some(region) && list.is_partition_active(region) {
        return true;
    }

    let disk_index = list.region(region).unwrap().disk;

    // Use the caller's hint only if it is really the active partition of
    // the same disk; otherwise look it up.
    let old_active = old_active
        .filter(|&old| {
            list.is_partition_active(old)
                && list.region_disk_index(old) == Some(disk_index)
        })
        .or_else(|| list.active_disk_partition(disk_index));

    if let Some(old) = old_active {
        let old_part = list.region_mut(old).unwrap();
        old_part.boot_indicator = false;
        let (old_disk, old_index) = (old_part.disk, old_part.layout_index);
        let disk = &mut list.disks[old_disk];
        if let Some(entry) = disk.layout.as_mut().and_then(|l| l.entries.get_mut(old_index)) {
            entry.boot_indicator = false;
            entry.rewrite = true;
        }
        disk.dirty = true;
    }

    if list.system_disk() == Some(disk_index) {
        list.system_partition = Some(region);
    }

    let part = list.region_mut(region).unwrap();
    part.boot_indicator = true;
    let layout_index = part.layout_index;
    let disk = &mut list.disks[disk_index];
    if let Some(entry) = disk
        .layout
        .as_mut()
        .and_then(|l| l.entries.get_mut(layout_index))
    {
        entry.boot_indicator = true;
        entry.rewrite = true;
    }
    disk.dirty = true;

    true
}

/// A partition the boot manager can live on: not a container, its volume
/// either unformatted (RawFS) or formatted with a writable filesystem,
/// and not typed as an installable file system.
fn is_supported_active_partition(list: &PartitionList, region: RegionId) -> bool {
    let Some(part) = list.region(region) else {
        return false;
    };

    // Containers marked active, with code in their extended boot
    // records, are not supported.
    if is_container_partition(part.partition_type) {
        return false;
    }
    if part.partition_type == PARTITION_IFS {
        return false;
    }

    match part.volume.format_state {
        // Mounted with RawFS; the FAT stack can format it later.
        FormatState::Unformatted => true,
        FormatState::Formatted => {
            let fs = part.volume.filesystem.as_str();
            fs.eq_ignore_ascii_case("FAT")
                || fs.eq_ignore_ascii_case("FAT32")
                || fs.eq_ignore_ascii_case("BTRFS")
        }
        _ => false,
    }
}

/// Searches for a system partition the engine can write a boot loader
/// to: first the current one, then the system disk's candidates, then
/// the alternative disk and partition.
pub fn find_supported_system_partition(
    list: &PartitionList,
    force_select: bool,
    alternative_disk: Option<usize>,
    alternative_part: Option<RegionId>,
) -> Option<RegionId> {
    if list.disks.is_empty() {
        debug_assert!(list.system_partition.is_none());
        return None;
    }

    let alternative_disk =
        alternative_disk.or_else(|| alternative_part.and_then(|p| list.region_disk_index(p)));
    if let (Some(part), Some(disk)) = (alternative_part, alternative_disk) {
        debug_assert_eq!(list.region_disk_index(part), Some(disk));
    }

    let system_disk = list.system_disk();

    // Step 1: the system disk.
    'system_disk: {
        let Some(disk_index) = system_disk else {
            break 'system_disk;
        };
        if list.disks[disk_index].style == DiskStyle::Gpt {
            break 'system_disk;
        }

        let active = list.system_partition;
        if let Some(active) = active {
            if is_supported_active_partition(list, active) {
                return Some(active);
            }
        }

        if Some(disk_index) != alternative_disk {
            // Look for any other supported primary partition.
            for id in list.disk_regions(disk_index, EnumFlags::MBR_PRIMARY_ONLY) {
                if Some(id) == active {
                    continue;
                }
                let part = list.region(id).unwrap();
                if part.is_partitioned
                    && !is_container_partition(part.partition_type)
                    && is_supported_active_partition(list, id)
                {
                    return Some(id);
                }
            }

            // Or free primary space, while the table still has room.
            if list.disks[disk_index].primary_partition_count() < 4 {
                for id in list.disk_regions(disk_index, EnumFlags::MBR_PRIMARY_ONLY) {
                    if Some(id) == active {
                        continue;
                    }
                    if !list.region(id).unwrap().is_partitioned {
                        return Some(id);
                    }
                }
            }
        }
    }

    // Step 2: the alternative disk.
    let disk_index = alternative_disk?;
    if !force_select && system_disk != Some(disk_index) {
        return None;
    }
    if list.disks[disk_index].style == DiskStyle::Gpt {
        return None;
    }

    if system_disk != Some(disk_index) {
        if let Some(active) = list.active_disk_partition(disk_index) {
            if is_supported_active_partition(list, active) {
                return Some(active);
            }
        }
    }

    // First primary region of the alternative disk.
    let first = list.adjacent_disk_region(
        Some(disk_index),
        None,
        EnumFlags::MBR_PRIMARY_ONLY,
    )?;

    if list.disks[disk_index].new_disk {
        let candidate = list.region(first).unwrap();
        if !candidate.is_partitioned || !candidate.boot_indicator {
            return Some(first);
        }
    }

    // If no primary is initialized at all, the first region serves.
    let initialized = list
        .disk_regions(disk_index, EnumFlags::MBR_PRIMARY_ONLY)
        .any(|id| {
            let part = list.region(id).unwrap();
            part.partition_type != PARTITION_ENTRY_UNUSED || part.boot_indicator
        });
    if !initialized {
        return Some(first);
    }

    // Fall back to the explicitly given alternative partition.
    alternative_part
}
