// SPDX-License-Identifier: MIT

//! Shared helpers for the unit and integration tests.

use crate::device::{DevicePath, DiskAccess, DiskBus, PartEnv, SteppingClock};
use crate::geometry::is_recognized_partition;
use crate::imgdev::{DiskImage, ImageBus};
use crate::layout::{DriveLayout, LayoutEntry};
use crate::region::PartitionList;
use crate::registry::MemRegistry;
use crate::scanner::create_partition_list;

pub fn entry(start: u64, sectors: u64, ty: u8, boot: bool, hidden: u32) -> LayoutEntry {
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

/// A blank image of `total_sectors` with the given layout already on disk.
pub fn image_with_layout(total_sectors: u64, layout: DriveLayout) -> DiskImage {
    let image = DiskImage::new_blank(total_sectors, 512);
    let mut bus = ImageBus::new();
    bus.push(image.clone());
    let mut handle = bus.open(&DevicePath::whole_disk(0)).unwrap();
    let mut layout = layout;
    handle.set_drive_layout(&mut layout).unwrap();
    image
}

pub type TestEnv = PartEnv<ImageBus, MemRegistry, SteppingClock>;

/// Scans a bus/registry pair with a deterministic clock.
pub fn scan(bus: ImageBus, registry: MemRegistry) -> (PartitionList, TestEnv) {
    let mut env = PartEnv::new(bus, registry, SteppingClock::starting_at(2024, 7, 1));
    let list = create_partition_list(&mut env).unwrap();
    (list, env)
}
