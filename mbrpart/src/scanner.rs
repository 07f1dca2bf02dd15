// SPDX-License-Identifier: MIT

//! Builds the region model from the machine: enumerates the firmware
//! view, opens every disk, classifies it, loads its partition layout and
//! carves the unpartitioned space into free regions.

use crate::device::{Clock, DevicePath, DiskAccess, DiskBus, MediaType, PartEnv};
use crate::editor;
use crate::errors::*;
use crate::firmware;
use crate::geometry::{align_down, is_container_partition, is_recognized_partition, PARTITION_ENTRY_UNUSED};
use crate::mbr::{self, BootSector};
use crate::region::{Disk, DiskStyle, PartitionList, Region};
use crate::registry::{RegStore, SCSI_DEVICEMAP_ROOT};
use crate::volume;
use crate::writer;
use crate::device::DeviceError;
use mbrio::prelude::*;
use zerocopy::FromBytes;

/// Creates the partition list: firmware map, one disk entry per usable
/// block device, region model, signatures, firmware numbering, drive
/// letters and the initial system partition.
pub fn create_partition_list<B, R, C>(env: &mut PartEnv<B, R, C>) -> PartResult<PartitionList>
where
    B: DiskBus,
    R: RegStore,
    C: Clock,
{
    let mut list = PartitionList::new();

    // The firmware's view; used later to annotate the scanned disks.
    list.firmware_disks = firmware::enumerate_firmware_disks(&env.registry);

    let disk_count = env.bus.disk_count();
    for disk_number in 0..disk_count {
        // A disk that cannot be opened is simply not part of the model.
        add_disk_to_list(&mut list, env, disk_number);
    }

    writer::update_disk_signatures(&mut list, &mut env.clock);
    update_hw_disk_numbers(&mut list);
    editor::assign_drive_letters(&mut list);

    // The system partition is the active partition of the disk the
    // firmware boots from, when there is one.
    list.system_partition = list
        .system_disk()
        .and_then(|disk| list.active_disk_partition(disk));

    Ok(list)
}

/// Tears the list down. Ownership is arena-style, so dropping is enough;
/// this exists as the explicit counterpart of `create_partition_list`.
pub fn destroy_partition_list(list: PartitionList) {
    drop(list);
}

fn add_disk_to_list<B, R, C>(list: &mut PartitionList, env: &mut PartEnv<B, R, C>, disk_number: u32)
where
    B: DiskBus,
    R: RegStore,
    C: Clock,
{
    let path = DevicePath::whole_disk(disk_number);
    let Ok(mut handle) = env.bus.open(&path) else {
        return;
    };
    let Ok(geom) = handle.geometry() else {
        return;
    };
    if geom.media_type != MediaType::Fixed && geom.media_type != MediaType::Removable {
        return;
    }
    let Ok(scsi) = handle.scsi_address() else {
        return;
    };

    // Sector 0: disk signature, style classification and the identifier
    // checksum the firmware map keys on.
    let mut sector = vec![0u8; (geom.bytes_per_sector as usize).max(512)];
    if handle.read_at(0, &mut sector).is_err() {
        return;
    }
    let Ok(bs) = BootSector::read_from_bytes(&sector[..512]) else {
        return;
    };
    let signature = bs.disk_signature();
    let checksum = mbr::mbr_checksum(&sector[..512]);

    let mut disk = Disk::new(disk_number, &geom, scsi);
    disk.style = mbr::classify_boot_sector(&bs);

    disk.driver_name = env
        .registry
        .read_string(
            &format!("{SCSI_DEVICEMAP_ROOT}\\Scsi Port {}", scsi.port),
            "Driver",
        )
        .unwrap_or_default();

    let disk_index = list.add_disk(disk);
    correlate_firmware_disk(list, disk_index, signature, checksum);

    // GPT disks are detected but never mutated; no layout is loaded.
    if list.disks[disk_index].style == DiskStyle::Gpt {
        return;
    }

    // Retrieve the drive layout into a growing buffer.
    let mut capacity = 4u32;
    let layout = loop {
        match handle.drive_layout(capacity) {
            Ok(layout) => break layout,
            Err(DeviceError::BufferTooSmall) => capacity += 4,
            Err(_) => return,
        }
    };
    let partition_count = layout.partition_count;
    list.disks[disk_index].layout = Some(layout);

    if partition_count == 0 {
        // Nothing on the disk yet: a new disk gets a fresh 4-slot table.
        let disk = &mut list.disks[disk_index];
        disk.new_disk = true;
        if let Some(layout) = disk.layout.as_mut() {
            layout.resize(4);
        }
    } else {
        for index in 0..4usize {
            add_partition_to_disk(list, env, disk_index, index, false);
        }
        let mut index = 4usize;
        while index < partition_count as usize {
            add_partition_to_disk(list, env, disk_index, index, true);
            index += 4;
        }
    }

    scan_for_unpartitioned_space(list, disk_index);
}

fn correlate_firmware_disk(
    list: &mut PartitionList,
    disk_index: usize,
    signature: u32,
    checksum: u32,
) {
    let media_type = list.disks[disk_index].media_type;
    for fw in &mut list.firmware_disks {
        if fw.signature == signature && fw.checksum == checksum && fw.disk_index.is_none() {
            let disk = &mut list.disks[disk_index];
            disk.hw_adapter = fw.adapter;
            disk.hw_controller = fw.controller;
            disk.hw_disk = fw.disk;
            // Fixed-disk numbers are compressed once all disks are known.
            disk.hw_fixed_disk = if media_type == MediaType::Removable {
                0
            } else {
                fw.disk
            };
            disk.firmware_found = true;
            fw.disk_index = Some(disk_index);
            return;
        }
    }
}

fn add_partition_to_disk<B, R, C>(
    list: &mut PartitionList,
    env: &mut PartEnv<B, R, C>,
    disk_index: usize,
    layout_index: usize,
    logical: bool,
) where
    B: DiskBus,
    R: RegStore,
    C: Clock,
{
    let disk = &list.disks[disk_index];
    let Some(entry) = disk
        .layout
        .as_ref()
        .and_then(|l| l.entries.get(layout_index))
        .copied()
    else {
        return;
    };

    if entry.partition_type == PARTITION_ENTRY_UNUSED
        || (logical && is_container_partition(entry.partition_type))
    {
        return;
    }

    let bps = disk.bytes_per_sector as u64;
    let disk_number = disk.number;
    let id = list.alloc_region_id();

    let mut region = Region::new_blank(
        id,
        disk_index,
        entry.starting_offset / bps,
        entry.partition_length / bps,
        logical,
    );
    region.is_partitioned = true;
    region.partition_type = entry.partition_type;
    region.boot_indicator = entry.boot_indicator;
    region.on_disk_number = entry.partition_number;
    region.number = entry.partition_number;
    region.layout_index = layout_index;

    if is_container_partition(region.partition_type) {
        // Container bookkeeping happens after insertion.
    } else if is_recognized_partition(region.partition_type) {
        region.volume.device = Some(DevicePath::new(disk_number, region.number));
        // A failed mount leaves the volume in its unformatted default.
        let _ = volume::mount_volume(&mut env.bus, &mut region.volume, Some(region.partition_type));
    } else {
        // Unknown partition, hence unknown format (it may or may not
        // actually be formatted).
        region.volume.format_state = crate::region::FormatState::UnknownFormat;
    }

    let container = is_container_partition(region.partition_type);
    if list.insert_disk_region(disk_index, region).is_ok()
        && container
        && !logical
        && list.disks[disk_index].extended.is_none()
    {
        list.disks[disk_index].extended = Some(id);
    }
}

/// Walks both region lists and inserts a free region for every aligned
/// gap, including the leading and trailing ones.
fn scan_for_unpartitioned_space(list: &mut PartitionList, disk_index: usize) {
    let disk = &list.disks[disk_index];
    let alignment = disk.sector_alignment;
    let total = disk.sector_count;
    let lead = crate::geometry::MIN_PARTITION_START_SECTOR.max(alignment);

    // Primary side.
    let used: Vec<(u64, u64)> = disk
        .primary
        .iter()
        .filter(|r| r.partition_type != PARTITION_ENTRY_UNUSED || r.sector_count != 0)
        .map(|r| (r.start_sector, r.sector_count))
        .collect();

    let mut blanks: Vec<(u64, u64, bool)> = Vec::new();

    if used.is_empty() {
        let end = align_down(total, alignment);
        if end > lead {
            blanks.push((lead, end - lead, false));
        }
    } else {
        let mut last_start = lead;
        let mut last_count = 0u64;
        for &(start, count) in &used {
            if start > last_start + last_count {
                let unused = start - (last_start + last_count);
                if unused >= alignment {
                    let gap_start = last_start + last_count;
                    let gap_count = align_down(gap_start + unused, alignment) - gap_start;
                    blanks.push((gap_start, gap_count, false));
                }
            }
            last_start = start;
            last_count = count;
        }
        if last_start + last_count < total {
            let unused = align_down(total - (last_start + last_count), alignment);
            if unused >= alignment {
                let gap_start = last_start + last_count;
                let gap_count = align_down(gap_start + unused, alignment) - gap_start;
                blanks.push((gap_start, gap_count, false));
            }
        }
    }

    // Logical side, inside the extended container.
    if let Some(ext_id) = disk.extended {
        if let Some(ext) = list.region(ext_id) {
            let (ext_start, ext_count) = (ext.start_sector, ext.sector_count);
            let disk = &list.disks[disk_index];
            let used: Vec<(u64, u64)> = disk
                .logical
                .iter()
                .filter(|r| r.partition_type != PARTITION_ENTRY_UNUSED || r.sector_count != 0)
                .map(|r| (r.start_sector, r.sector_count))
                .collect();

            if used.is_empty() {
                if ext_count > alignment {
                    blanks.push((ext_start + alignment, ext_count - alignment, true));
                }
            } else {
                // Each logical sits one alignment unit past its EBR; the
                // gap test accounts for that reserved stretch.
                let mut last_start = ext_start + alignment;
                let mut last_count = 0u64;
                for &(start, count) in &used {
                    if start.saturating_sub(alignment) > last_start + last_count {
                        let unused = start - alignment - (last_start + last_count);
                        if unused >= alignment {
                            let gap_start = last_start + last_count;
                            let gap_count =
                                align_down(gap_start + unused, alignment) - gap_start;
                            blanks.push((gap_start, gap_count, true));
                        }
                    }
                    last_start = start;
                    last_count = count;
                }
                if last_start + last_count < ext_start + ext_count {
                    let unused =
                        align_down(ext_start + ext_count - (last_start + last_count), alignment);
                    if unused >= alignment {
                        let gap_start = last_start + last_count;
                        let gap_count = align_down(gap_start + unused, alignment) - gap_start;
                        blanks.push((gap_start, gap_count, true));
                    }
                }
            }
        }
    }

    for (start, count, logical) in blanks {
        let id = list.alloc_region_id();
        let region = Region::new_blank(id, disk_index, start, count, logical);
        let _ = list.insert_disk_region(disk_index, region);
    }
}

/// Recomputes the hardware disk numbers as if all removable disks were
/// disconnected: firmware disks are walked in enumeration order and the
/// fixed ones are renumbered past the removables seen so far.
pub fn update_hw_disk_numbers(list: &mut PartitionList) {
    let mut hw_adapter = 0u32;
    let mut hw_controller = 0u32;
    let mut removable_count = 0u32;

    for fw_index in 0..list.firmware_disks.len() {
        let fw = &list.firmware_disks[fw_index];
        if hw_adapter != fw.adapter || hw_controller != fw.controller {
            hw_adapter = fw.adapter;
            hw_controller = fw.controller;
            removable_count = 0;
        }

        let (fw_disk, disk_index) = (fw.disk, fw.disk_index);
        if let Some(disk_index) = disk_index {
            let disk = &mut list.disks[disk_index];
            if disk.media_type == MediaType::Removable {
                removable_count += 1;
                disk.hw_fixed_disk = 0;
            } else {
                disk.hw_fixed_disk = fw_disk - removable_count;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DriveGeometry;
    use crate::imgdev::{DiskImage, ImageBus};
    use crate::layout::DriveLayout;
    use crate::region::FormatState;
    use crate::registry::MemRegistry;
    use crate::testutil::{entry, image_with_layout, scan};

    #[test]
    fn blank_disk_yields_single_leading_free_region() {
        let mut bus = ImageBus::new();
        bus.push(DiskImage::new_blank(20_971_520, 512)); // 10 GiB

        let (list, _env) = scan(bus, MemRegistry::new());

        assert_eq!(list.disks.len(), 1);
        let disk = &list.disks[0];
        assert!(disk.new_disk);
        assert_eq!(disk.style, DiskStyle::Raw);
        assert_eq!(disk.sector_alignment, 63);

        assert_eq!(disk.primary.len(), 1);
        let free = &disk.primary[0];
        assert!(!free.is_partitioned);
        assert_eq!(free.start_sector, 2048);
        assert_eq!(free.end_sector(), align_down(disk.sector_count, 63));
    }

    #[test]
    fn mbr_disk_with_extended_builds_full_model() {
        let cont_start = 1_048_576u64;
        let mut layout = DriveLayout::with_entry_count(12);
        layout.signature = 0xD15C_0001;
        layout.entries[0] = entry(63, 1_048_513, 0x06, true, 63);
        layout.entries[1] = entry(cont_start, 4_000_000, 0x05, false, cont_start as u32);
        layout.entries[1].recognized = false;
        layout.entries[4] = entry(cont_start + 63, 1_000_000, 0x06, false, 63);
        layout.entries[8] = entry(cont_start + 63 + 1_000_000 + 63, 800_000, 0x07, false, 63);

        let image = image_with_layout(8_000_000, layout);
        let mut bus = ImageBus::new();
        bus.push(image);

        let (list, _env) = scan(bus, MemRegistry::new());
        let disk = &list.disks[0];

        assert_eq!(disk.style, DiskStyle::Mbr);
        assert!(!disk.new_disk);
        assert!(disk.extended.is_some());

        // Primary list: FAT16, container, trailing free space.
        let kinds: Vec<(bool, u8)> = disk
            .primary
            .iter()
            .map(|r| (r.is_partitioned, r.partition_type))
            .collect();
        assert_eq!(kinds[0], (true, 0x06));
        assert_eq!(kinds[1], (true, 0x05));
        assert!(!kinds[2].0);

        // Logical list: two partitions and the trailing free space of the
        // container.
        assert_eq!(disk.logical_partition_count(), 2);
        let last_logical = disk.logical.last().unwrap();
        assert!(!last_logical.is_partitioned);

        // Mounted volumes: the FAT16 primary carries a volume record.
        let p1 = &disk.primary[0];
        assert_eq!(p1.volume.device_name(), r"\Device\Harddisk0\Partition1");
        assert_eq!(p1.volume.format_state, FormatState::Unformatted);
        assert_eq!(p1.volume.filesystem, "RAW");

        // Drive letters: primaries first, then logicals.
        assert_eq!(p1.volume.drive_letter, Some('C'));
        assert_eq!(disk.logical[0].volume.drive_letter, Some('D'));
        assert_eq!(disk.logical[1].volume.drive_letter, Some('E'));

        // The boot-flagged primary becomes the system partition only if
        // the firmware found the disk; without firmware data there is
        // no system disk.
        assert_eq!(list.system_partition, None);
    }

    #[test]
    fn firmware_correlation_marks_disk() {
        let mut layout = DriveLayout::with_entry_count(4);
        layout.signature = 0xBEEF_0042;
        layout.entries[0] = entry(63, 500_000, 0x06, true, 63);
        let image = image_with_layout(1_000_000, layout);

        // Compute the checksum of the produced boot sector for the fixture.
        let checksum = {
            let data = image.data();
            let sector = &data.borrow()[..512];
            mbr::mbr_checksum(sector)
        };

        let mut bus = ImageBus::new();
        bus.push(image);
        let registry = firmware::fixture_registry(&[(checksum, 0xBEEF_0042)]);

        let (list, _env) = scan(bus, registry);
        let disk = &list.disks[0];

        assert!(disk.firmware_found);
        assert_eq!(disk.hw_adapter, 0);
        assert_eq!(disk.hw_controller, 0);
        assert_eq!(disk.hw_disk, 0);
        assert_eq!(list.firmware_disks[0].disk_index, Some(0));

        // Fixed disk, firmware-found, boot-flagged: system partition.
        let system = list.system_partition.expect("system partition");
        assert_eq!(list.region(system).unwrap().partition_type, 0x06);
    }

    #[test]
    fn super_floppy_detection() {
        let mut bytes = vec![0u8; 512 * 65_536];
        bytes[0] = 0xEB;
        bytes[11] = 0x00;
        bytes[12] = 0x02;
        bytes[13] = 4;
        bytes[54..59].copy_from_slice(b"FAT16");
        bytes[510] = 0x55;
        bytes[511] = 0xAA;
        let image = DiskImage::from_bytes(bytes, DriveGeometry::synthesized(65_536, 512));

        let mut bus = ImageBus::new();
        bus.push(image);
        let (list, _env) = scan(bus, MemRegistry::new());

        assert!(list.is_super_floppy(0));
        let disk = &list.disks[0];
        assert_eq!(disk.style, DiskStyle::Mbr);
        assert_eq!(disk.primary_partition_count(), 1);
        let region = &disk.primary[0];
        assert_eq!(region.start_sector, 0);
        assert_eq!(region.volume.filesystem, "FAT");
        assert_eq!(region.volume.format_state, FormatState::Formatted);
    }

    #[test]
    fn gpt_disk_is_detected_and_left_alone() {
        let mut layout = DriveLayout::with_entry_count(4);
        layout.entries[0] = entry(1, 999_999, 0xEE, false, 1);
        layout.entries[0].recognized = false;
        let image = image_with_layout(1_000_000, layout);

        let mut bus = ImageBus::new();
        bus.push(image);
        let (list, _env) = scan(bus, MemRegistry::new());

        let disk = &list.disks[0];
        assert_eq!(disk.style, DiskStyle::Gpt);
        assert!(disk.layout.is_none());
        assert!(disk.primary.is_empty());
    }

    #[test]
    fn removable_disks_compress_fixed_numbers() {
        let fixed = DiskImage::new_blank(100_000, 512);
        let removable = {
            let mut geom = DriveGeometry::synthesized(100_000, 512);
            geom.media_type = MediaType::Removable;
            DiskImage::new_blank(100_000, 512).with_geometry(geom)
        };
        let fixed2 = DiskImage::new_blank(100_000, 512);

        // Checksum of an all-zero sector is zero; signatures are all zero
        // too, so firmware matching binds in enumeration order.
        let registry = firmware::fixture_registry(&[(0, 0), (0, 0), (0, 0)]);

        let mut bus = ImageBus::new();
        bus.push(fixed);
        bus.push(removable);
        bus.push(fixed2);

        let (list, _env) = scan(bus, registry);

        assert_eq!(list.disks[0].hw_fixed_disk, 0);
        assert_eq!(list.disks[1].hw_fixed_disk, 0); // removable
        assert_eq!(list.disks[2].hw_fixed_disk, 1); // compressed past the removable
    }
}
