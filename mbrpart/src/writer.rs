// SPDX-License-Identifier: MIT

//! Writeback: pushes dirty layout buffers to the devices, refreshes
//! zero disk signatures and records the mount-point registry values.

use crate::device::{Clock, DevicePath, DiskAccess, DiskBus};
use crate::errors::*;
use crate::geometry::is_container_partition;
use crate::region::{DiskStyle, PartitionList};
use crate::registry::{RegStore, MOUNTED_DEVICES_KEY};

/// Binary payload of a `\DosDevices\<L>:` mount value: disk signature
/// and partition start, packed little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountInfo {
    pub signature: u32,
    pub starting_offset: i64,
}

impl MountInfo {
    pub fn to_bytes(self) -> [u8; 12] {
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&self.signature.to_le_bytes());
        bytes[4..].copy_from_slice(&self.starting_offset.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; 12]) -> Self {
        Self {
            signature: u32::from_le_bytes(bytes[..4].try_into().unwrap()),
            starting_offset: i64::from_le_bytes(bytes[4..].try_into().unwrap()),
        }
    }
}

/// Pushes one disk's layout buffer to the device.
///
/// The device folds the entry count into a table count during the call,
/// so the original count is restored afterwards; on success the
/// device-assigned partition numbers are copied back into the regions
/// and their `new` flags are cleared.
pub fn write_partitions<B: DiskBus>(
    list: &mut PartitionList,
    bus: &mut B,
    disk_index: usize,
) -> PartResult<()> {
    let disk = list.disk(disk_index).ok_or(PartError::NotFound)?;
    if !disk.dirty {
        return Ok(());
    }
    let disk_number = disk.number;

    let mut handle = bus
        .open(&DevicePath::whole_disk(disk_number))
        .map_err(PartError::Io)?;

    let disk = list.disk_mut(disk_index).unwrap();
    let layout = disk
        .layout
        .as_mut()
        .ok_or(PartError::Invalid("disk has no layout buffer"))?;

    let saved_count = layout.partition_count;
    let status = handle.set_drive_layout(layout);
    layout.partition_count = saved_count;
    status.map_err(PartError::Io)?;

    // Copy the assigned partition numbers back into the model.
    let numbers: Vec<u32> = layout.entries.iter().map(|e| e.partition_number).collect();
    for region in disk
        .primary
        .iter_mut()
        .chain(disk.logical.iter_mut())
        .filter(|r| r.is_partitioned)
    {
        region.new_region = false;
        if let Some(&number) = numbers.get(region.layout_index) {
            region.number = number;
        }
    }

    disk.style = DiskStyle::Mbr;
    disk.dirty = false;
    Ok(())
}

/// Writes every dirty disk back, in disk order. GPT disks are skipped
/// and a per-disk failure does not abort the rest; failed disks stay
/// dirty for a later retry.
pub fn write_partitions_to_disk<B: DiskBus>(list: &mut PartitionList, bus: &mut B) -> PartResult<()> {
    for disk_index in 0..list.disks.len() {
        if list.disks[disk_index].style == DiskStyle::Gpt {
            continue;
        }
        if list.disks[disk_index].dirty {
            let _ = write_partitions(list, bus, disk_index);
        }
    }
    Ok(())
}

/// Composes a fresh signature for one disk from the current time fields
/// and stamps it into the layout, regenerating until it is non-zero and
/// unique across all disks.
pub fn set_disk_signature<C: Clock>(list: &mut PartitionList, disk_index: usize, clock: &mut C) {
    if list.disks[disk_index].style == DiskStyle::Gpt {
        return;
    }

    loop {
        let t = clock.now();
        let bytes = [
            (t.year as u8).wrapping_add(t.hour),
            ((t.year >> 8) as u8).wrapping_add(t.minute),
            t.month.wrapping_add(t.second),
            t.day.wrapping_add(t.millisecond as u8),
        ];
        let signature = u32::from_le_bytes(bytes);
        if signature == 0 {
            continue;
        }

        let collides = list.disks.iter().enumerate().any(|(i, other)| {
            i != disk_index
                && other.style != DiskStyle::Gpt
                && other
                    .layout
                    .as_ref()
                    .is_some_and(|l| l.signature == signature)
        });
        if collides {
            continue;
        }

        if let Some(layout) = list.disks[disk_index].layout.as_mut() {
            layout.signature = signature;
        }
        return;
    }
}

/// Gives every disk with a zero signature a fresh unique one and marks
/// primary slot 0 for rewrite so it reaches the device. Runs once,
/// before any writeback.
pub fn update_disk_signatures<C: Clock>(list: &mut PartitionList, clock: &mut C) {
    for disk_index in 0..list.disks.len() {
        if list.disks[disk_index].style == DiskStyle::Gpt {
            continue;
        }
        let needs_signature = list.disks[disk_index]
            .layout
            .as_ref()
            .is_some_and(|l| l.signature == 0);
        if needs_signature {
            set_disk_signature(list, disk_index, clock);
            if let Some(entry) = list.disks[disk_index]
                .layout
                .as_mut()
                .and_then(|l| l.entries.first_mut())
            {
                entry.rewrite = true;
            }
        }
    }
}

/// Writes one `\DosDevices\<L>:` mount value.
pub fn set_mounted_device_value<R: RegStore>(
    registry: &mut R,
    letter: char,
    signature: u32,
    starting_offset: i64,
) -> PartResult<()> {
    let value_name = format!(r"\DosDevices\{letter}:");
    let info = MountInfo {
        signature,
        starting_offset,
    };
    registry
        .write_binary(MOUNTED_DEVICES_KEY, &value_name, &info.to_bytes())
        .map_err(PartError::Registry)
}

/// Records a mount value for every lettered partition of every MBR disk.
pub fn set_mounted_device_values<R: RegStore>(
    list: &PartitionList,
    registry: &mut R,
) -> PartResult<()> {
    for disk in &list.disks {
        if disk.style == DiskStyle::Gpt {
            continue;
        }
        let signature = disk.layout.as_ref().map(|l| l.signature).unwrap_or(0);

        for region in disk
            .primary
            .iter()
            .chain(disk.logical.iter())
            .filter(|r| r.is_partitioned && !is_container_partition(r.partition_type))
        {
            if let Some(letter) = region.volume.drive_letter {
                set_mounted_device_value(
                    registry,
                    letter,
                    signature,
                    disk.region_offset_bytes(region) as i64,
                )?;
            }
        }
    }
    Ok(())
}
