// SPDX-License-Identifier: MIT

//! Collaborator interfaces of the engine: block devices, the disk bus,
//! and the time source. Byte-level access goes through `mbrio::BlockIO`.

use core::fmt;

use crate::layout::DriveLayout;
use mbrio::prelude::*;

/// Error type for device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    Block(BlockIOError),
    /// The caller-supplied layout entry capacity is too small; retry larger.
    BufferTooSmall,
    NotFound,
    Unsupported,
    Other(&'static str),
}

impl DeviceError {
    pub fn msg(&self) -> &'static str {
        match self {
            DeviceError::Block(e) => e.msg(),
            DeviceError::BufferTooSmall => "Layout buffer too small",
            DeviceError::NotFound => "Device not found",
            DeviceError::Unsupported => "Unsupported device operation",
            DeviceError::Other(msg) => msg,
        }
    }
}

impl From<BlockIOError> for DeviceError {
    #[inline]
    fn from(e: BlockIOError) -> Self {
        DeviceError::Block(e)
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        Ok(())
    }
}

pub type DeviceResult<T = ()> = Result<T, DeviceError>;

/// NT-style device path: `\Device\Harddisk<n>\Partition<p>`.
/// Partition 0 addresses the whole disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePath {
    pub disk: u32,
    pub partition: u32,
}

impl DevicePath {
    #[inline]
    pub fn new(disk: u32, partition: u32) -> Self {
        Self { disk, partition }
    }

    #[inline]
    pub fn whole_disk(disk: u32) -> Self {
        Self::new(disk, 0)
    }

    #[inline]
    pub fn is_whole_disk(&self) -> bool {
        self.partition == 0
    }

    /// Parses `\Device\Harddisk<n>\Partition<p>`.
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(r"\Device\Harddisk")?;
        let (disk, rest) = rest.split_once('\\')?;
        let partition = rest.strip_prefix("Partition")?;
        Some(Self {
            disk: disk.parse().ok()?,
            partition: partition.parse().ok()?,
        })
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, r"\Device\Harddisk{}\Partition{}", self.disk, self.partition)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Fixed,
    Removable,
    Other,
}

/// Physical drive geometry as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveGeometry {
    pub cylinders: u64,
    pub tracks_per_cylinder: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
    pub media_type: MediaType,
}

impl DriveGeometry {
    /// Classic 255 heads x 63 sectors geometry derived from a raw size,
    /// the shape every translation layer reports for image files.
    pub fn synthesized(total_sectors: u64, bytes_per_sector: u32) -> Self {
        const HEADS: u64 = 255;
        const SPT: u64 = 63;
        Self {
            cylinders: (total_sectors / (HEADS * SPT)).max(1),
            tracks_per_cylinder: HEADS as u32,
            sectors_per_track: SPT as u32,
            bytes_per_sector,
            media_type: MediaType::Fixed,
        }
    }

    /// Sector count addressable through the CHS shape (cylinder-truncated).
    #[inline]
    pub fn chs_sector_count(&self) -> u64 {
        self.cylinders * self.tracks_per_cylinder as u64 * self.sectors_per_track as u64
    }
}

/// SCSI address of a disk: port, bus (path id) and target id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScsiAddress {
    pub port: u16,
    pub bus: u16,
    pub target: u16,
}

/// One open device handle. Every open is scoped: dropping the handle
/// closes it, on success and error paths alike.
pub trait DiskAccess: BlockIO {
    fn geometry(&mut self) -> DeviceResult<DriveGeometry>;
    fn scsi_address(&mut self) -> DeviceResult<ScsiAddress>;

    /// Reads the drive layout. Fails with `BufferTooSmall` when the table
    /// holds more than `entry_capacity` entries, so callers can grow and
    /// retry.
    fn drive_layout(&mut self, entry_capacity: u32) -> DeviceResult<DriveLayout>;

    /// Pushes a layout to the device. On return the entries carry the
    /// device-assigned partition numbers and `partition_count` has been
    /// folded into a partition *table* count; the caller is responsible
    /// for restoring the original count.
    fn set_drive_layout(&mut self, layout: &mut DriveLayout) -> DeviceResult<()>;

    fn lock_volume(&mut self) -> DeviceResult<()>;
    fn dismount_volume(&mut self) -> DeviceResult<()>;
    fn unlock_volume(&mut self) -> DeviceResult<()>;

    /// Volume label, NUL-terminated at the source, possibly truncated.
    fn volume_label(&mut self) -> DeviceResult<String>;
}

/// Enumerates the disks of the system and opens device paths.
pub trait DiskBus {
    type Handle: DiskAccess;

    fn disk_count(&mut self) -> u32;
    fn open(&mut self, path: &DevicePath) -> DeviceResult<Self::Handle>;

    /// Filesystem inference service for an opened volume. Returns the
    /// filesystem name (`"FAT"`, `"FAT32"`, `"NTFS"`, `"BTRFS"`, ...) or
    /// `"RAW"` when nothing is recognized.
    fn infer_filesystem(&mut self, volume: &mut Self::Handle) -> DeviceResult<String>;
}

/// Broken-down time used for disk signature generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeFields {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
}

/// Time source. Successive calls must not return a frozen value, since
/// signature generation retries until the derived value is unique.
pub trait Clock {
    fn now(&mut self) -> TimeFields;
}

/// Wall-clock time via the `time` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&mut self) -> TimeFields {
        let now = time::OffsetDateTime::now_utc();
        TimeFields {
            year: now.year() as u16,
            month: u8::from(now.month()),
            day: now.day(),
            hour: now.hour(),
            minute: now.minute(),
            second: now.second(),
            millisecond: now.millisecond(),
        }
    }
}

/// Deterministic clock for tests: advances one millisecond per call.
#[derive(Debug, Clone, Copy)]
pub struct SteppingClock {
    fields: TimeFields,
}

impl SteppingClock {
    pub fn new(fields: TimeFields) -> Self {
        Self { fields }
    }

    pub fn starting_at(year: u16, month: u8, day: u8) -> Self {
        Self::new(TimeFields {
            year,
            month,
            day,
            hour: 0,
            minute: 0,
            second: 0,
            millisecond: 0,
        })
    }
}

impl Clock for SteppingClock {
    fn now(&mut self) -> TimeFields {
        let fields = self.fields;
        self.fields.millisecond += 1;
        if self.fields.millisecond >= 1000 {
            self.fields.millisecond = 0;
            self.fields.second = (self.fields.second + 1) % 60;
        }
        fields
    }
}

/// The collaborator bundle every engine entry point works against.
#[derive(Debug)]
pub struct PartEnv<B, R, C> {
    pub bus: B,
    pub registry: R,
    pub clock: C,
}

impl<B, R, C> PartEnv<B, R, C> {
    pub fn new(bus: B, registry: R, clock: C) -> Self {
        Self {
            bus,
            registry,
            clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_path_format_and_parse() {
        let path = DevicePath::new(2, 1);
        assert_eq!(path.to_string(), r"\Device\Harddisk2\Partition1");
        assert_eq!(DevicePath::parse(r"\Device\Harddisk2\Partition1"), Some(path));
        assert_eq!(DevicePath::parse(r"\Device\Cdrom0"), None);
        assert!(DevicePath::whole_disk(0).is_whole_disk());
    }

    #[test]
    fn synthesized_geometry_shape() {
        let geom = DriveGeometry::synthesized(20_971_520, 512);
        assert_eq!(geom.tracks_per_cylinder, 255);
        assert_eq!(geom.sectors_per_track, 63);
        assert_eq!(geom.cylinders, 1305);
        assert_eq!(geom.chs_sector_count(), 20_964_825);
    }

    #[test]
    fn stepping_clock_advances() {
        let mut clock = SteppingClock::starting_at(2024, 7, 1);
        let a = clock.now();
        let b = clock.now();
        assert_ne!(a.millisecond, b.millisecond);
    }
}
