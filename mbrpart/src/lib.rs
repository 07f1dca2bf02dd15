// SPDX-License-Identifier: MIT

//! Offline MBR partition-list engine.
//!
//! The scanner builds a region model of every disk on the bus, the
//! editor mutates it under the MBR constraints, and the writer pushes
//! the rebuilt layout buffers back and records mount points. GPT disks
//! are detected and refused for mutation.

pub mod device;
pub mod editor;
pub mod errors;
pub mod firmware;
pub mod fsrec;
pub mod geometry;
pub mod imgdev;
pub mod layout;
pub mod mbr;
pub mod region;
pub mod registry;
pub mod scanner;
pub mod volume;
pub mod writer;

#[cfg(test)]
pub(crate) mod testutil;

#[allow(clippy::single_component_path_imports)]
use paste;

pub const DEFAULT_SECTOR_SIZE: u64 = 512;

pub mod prelude {
    pub use crate::device::{
        Clock, DevicePath, DiskAccess, DiskBus, DriveGeometry, MediaType, PartEnv, ScsiAddress,
        SystemClock,
    };
    pub use crate::editor::{
        assign_drive_letters, create_extended_partition, create_partition, delete_partition,
        extended_partition_creation_checks, find_supported_system_partition,
        partition_creation_checks, set_active_partition, set_mbr_partition_type,
    };
    pub use crate::errors::{PartError, PartResult};
    pub use crate::imgdev::{DiskImage, FileBus, ImageBus};
    pub use crate::region::{
        Disk, DiskStyle, EnumFlags, FormatState, PartitionList, Region, RegionId, VolumeInfo,
        ENUM_REGION_NEXT,
    };
    pub use crate::registry::{MemRegistry, RegStore};
    pub use crate::scanner::{create_partition_list, destroy_partition_list};
    pub use crate::volume::{dismount_volume, mount_volume};
    pub use crate::writer::{
        set_mounted_device_value, set_mounted_device_values, write_partitions,
        write_partitions_to_disk,
    };
}
