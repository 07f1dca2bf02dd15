// SPDX-License-Identifier: MIT

//! The in-memory region model: per-disk ordered primary and logical
//! region sequences, the owning partition list, and the flag-driven
//! traversal primitives.
//!
//! Ownership is arena-style: the list owns the disks by value, each disk
//! owns its regions by value, and every cross-reference is a stable
//! `RegionId` (list-wide monotonic counter) or a disk index.

use bitflags::bitflags;

use crate::device::{DevicePath, DriveGeometry, MediaType, ScsiAddress};
use crate::errors::*;
use crate::firmware::FirmwareDisk;
use crate::geometry::{is_container_partition, PARTITION_ENTRY_UNUSED};
use crate::layout::DriveLayout;

/// Format state of a volume as the mounter sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatState {
    #[default]
    Unformatted,
    UnformattedOrDamaged,
    UnknownFormat,
    Formatted,
}

/// Maximum volume label length kept in the model.
pub const MAX_LABEL_CHARS: usize = 32;

/// Filesystem view of a partitioned region.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeInfo {
    /// NT device path of the volume, if one is attached.
    pub device: Option<DevicePath>,
    pub drive_letter: Option<char>,
    pub label: String,
    pub filesystem: String,
    pub format_state: FormatState,
    /// Volume is new and has not yet been actually formatted and mounted.
    pub new_volume: bool,
    /// Volume must be checked.
    pub needs_check: bool,
}

impl VolumeInfo {
    pub fn device_name(&self) -> String {
        self.device.map(|d| d.to_string()).unwrap_or_default()
    }

    /// Whether the system currently has this volume mounted. A volume
    /// mounted with RawFS keeps `"RAW"` in `filesystem` and counts.
    pub fn is_mounted(&self) -> bool {
        self.device.is_some()
            && self.format_state != FormatState::UnknownFormat
            && !self.filesystem.is_empty()
    }

    pub fn reset(&mut self) {
        *self = VolumeInfo::default();
    }
}

/// Stable identity of a region within its partition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(pub(crate) u32);

/// One contiguous range of sectors on a disk: either a partition or a
/// stretch of unpartitioned space (`is_partitioned == false`).
#[derive(Debug, Clone)]
pub struct Region {
    pub id: RegionId,
    /// Index of the owning disk in the partition list.
    pub disk: usize,
    pub start_sector: u64,
    pub sector_count: u64,
    pub partition_type: u8,
    pub boot_indicator: bool,
    /// Enumerated partition number: primaries first (containers excluded),
    /// then the logicals.
    pub on_disk_number: u32,
    /// Current partition number; only valid once written back.
    pub number: u32,
    /// Index into the owning disk's layout buffer.
    pub layout_index: usize,
    pub logical: bool,
    pub is_partitioned: bool,
    /// Not in the on-disk table yet.
    pub new_region: bool,
    pub auto_create: bool,
    pub volume: VolumeInfo,
}

impl Region {
    /// A fresh blank (free-space) region.
    pub fn new_blank(id: RegionId, disk: usize, start_sector: u64, sector_count: u64, logical: bool) -> Self {
        Self {
            id,
            disk,
            start_sector,
            sector_count,
            partition_type: PARTITION_ENTRY_UNUSED,
            boot_indicator: false,
            on_disk_number: 0,
            number: 0,
            layout_index: 0,
            logical,
            is_partitioned: false,
            new_region: false,
            auto_create: false,
            volume: VolumeInfo::default(),
        }
    }

    /// Exclusive end sector.
    #[inline]
    pub fn end_sector(&self) -> u64 {
        self.start_sector + self.sector_count
    }

    /// Inclusive last sector.
    #[inline]
    pub fn last_sector(&self) -> u64 {
        self.start_sector + self.sector_count - 1
    }

    /// Empty sentinel entries are skipped in ordering comparisons.
    #[inline]
    fn is_sentinel(&self) -> bool {
        (self.partition_type == PARTITION_ENTRY_UNUSED && self.start_sector == 0)
            || self.sector_count == 0
    }
}

/// Partitioning style of a disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskStyle {
    Raw,
    Mbr,
    Gpt,
    Uninitialized,
}

/// One block device and its region model.
#[derive(Debug, Clone)]
pub struct Disk {
    /// Position in the partition list.
    pub index: usize,
    /// System disk number (`\Device\Harddisk<number>`).
    pub number: u32,
    pub media_type: MediaType,

    pub cylinders: u64,
    pub tracks_per_cylinder: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
    pub sector_count: u64,
    pub sector_alignment: u64,
    pub cylinder_alignment: u64,

    /// Firmware annotation, valid when `firmware_found`.
    pub firmware_found: bool,
    pub hw_adapter: u32,
    pub hw_controller: u32,
    pub hw_disk: u32,
    /// Disk number with all removable disks compressed out.
    pub hw_fixed_disk: u32,

    pub port: u16,
    pub bus: u16,
    pub target: u16,

    pub dirty: bool,
    pub new_disk: bool,
    pub style: DiskStyle,
    pub driver_name: String,

    pub layout: Option<DriveLayout>,

    pub primary: Vec<Region>,
    pub logical: Vec<Region>,
    /// The unique extended container region, if any.
    pub extended: Option<RegionId>,
}

impl Disk {
    pub fn new(number: u32, geom: &DriveGeometry, scsi: ScsiAddress) -> Self {
        Self {
            index: 0,
            number,
            media_type: geom.media_type,
            cylinders: geom.cylinders,
            tracks_per_cylinder: geom.tracks_per_cylinder,
            sectors_per_track: geom.sectors_per_track,
            bytes_per_sector: geom.bytes_per_sector,
            sector_count: geom.chs_sector_count(),
            sector_alignment: geom.sectors_per_track as u64,
            cylinder_alignment: geom.tracks_per_cylinder as u64 * geom.sectors_per_track as u64,
            firmware_found: false,
            hw_adapter: 0,
            hw_controller: 0,
            hw_disk: 0,
            hw_fixed_disk: 0,
            port: scsi.port,
            bus: scsi.bus,
            target: scsi.target,
            dirty: false,
            new_disk: false,
            style: DiskStyle::Uninitialized,
            driver_name: String::new(),
            layout: None,
            primary: Vec::new(),
            logical: Vec::new(),
            extended: None,
        }
    }

    #[inline]
    pub fn list(&self, logical: bool) -> &[Region] {
        if logical {
            &self.logical
        } else {
            &self.primary
        }
    }

    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.sector_count * self.bytes_per_sector as u64
    }

    #[inline]
    pub fn region_offset_bytes(&self, region: &Region) -> u64 {
        region.start_sector * self.bytes_per_sector as u64
    }

    #[inline]
    pub fn region_size_bytes(&self, region: &Region) -> u64 {
        region.sector_count * self.bytes_per_sector as u64
    }

    /// Number of partitioned regions in the primary list.
    pub fn primary_partition_count(&self) -> usize {
        self.primary.iter().filter(|r| r.is_partitioned).count()
    }

    /// Number of partitioned regions in the logical list (MBR disks only).
    pub fn logical_partition_count(&self) -> usize {
        if self.style == DiskStyle::Mbr {
            self.logical.iter().filter(|r| r.is_partitioned).count()
        } else {
            0
        }
    }
}

bitflags! {
    /// Region enumeration flags for `adjacent_disk_region` and
    /// `adjacent_partition`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnumFlags: u32 {
        /// Enumerate the previous region instead of the next one.
        const PREV = 0x01;
        /// Enumerate only partitioned regions.
        const PARTITIONED = 0x02;
        /// MBR disks only: traverse only the primary list.
        const MBR_PRIMARY_ONLY = 0x10;
        /// MBR disks only: traverse only the logical list.
        const MBR_LOGICAL_ONLY = 0x20;
        /// MBR disks only: enumerate in order of appearance on disk,
        /// descending into the extended container where the logical
        /// regions replace it in sequence.
        const MBR_BY_ORDER = 0x40;
    }
}

/// Default traversal: forward, all regions, primaries then logicals.
pub const ENUM_REGION_NEXT: EnumFlags = EnumFlags::empty();

/// Top-level aggregate: every disk of the system, the firmware view, and
/// the current system partition.
#[derive(Debug, Default)]
pub struct PartitionList {
    pub disks: Vec<Disk>,
    pub firmware_disks: Vec<FirmwareDisk>,
    pub system_partition: Option<RegionId>,
    next_region: u32,
}

fn pos_of(list: &[Region], id: RegionId) -> Option<usize> {
    list.iter().position(|r| r.id == id)
}

fn adj_in_list(list: &[Region], cur: Option<RegionId>, forward: bool) -> Option<RegionId> {
    match cur {
        None => {
            if forward {
                list.first().map(|r| r.id)
            } else {
                list.last().map(|r| r.id)
            }
        }
        Some(id) => {
            let pos = pos_of(list, id)?;
            if forward {
                list.get(pos + 1).map(|r| r.id)
            } else if pos > 0 {
                Some(list[pos - 1].id)
            } else {
                None
            }
        }
    }
}

impl PartitionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn alloc_region_id(&mut self) -> RegionId {
        let id = RegionId(self.next_region);
        self.next_region += 1;
        id
    }

    /// Inserts a disk keeping the list sorted by disk number, and fixes up
    /// the disk indices.
    pub fn add_disk(&mut self, disk: Disk) -> usize {
        let pos = self
            .disks
            .iter()
            .position(|d| d.number > disk.number)
            .unwrap_or(self.disks.len());
        self.disks.insert(pos, disk);
        for (i, d) in self.disks.iter_mut().enumerate() {
            d.index = i;
            for r in d.primary.iter_mut().chain(d.logical.iter_mut()) {
                r.disk = i;
            }
        }
        pos
    }

    #[inline]
    pub fn disk(&self, index: usize) -> Option<&Disk> {
        self.disks.get(index)
    }

    #[inline]
    pub fn disk_mut(&mut self, index: usize) -> Option<&mut Disk> {
        self.disks.get_mut(index)
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.disks.iter().find_map(|d| {
            d.primary
                .iter()
                .chain(d.logical.iter())
                .find(|r| r.id == id)
        })
    }

    pub fn region_mut(&mut self, id: RegionId) -> Option<&mut Region> {
        self.disks.iter_mut().find_map(|d| {
            d.primary
                .iter_mut()
                .chain(d.logical.iter_mut())
                .find(|r| r.id == id)
        })
    }

    pub fn region_disk_index(&self, id: RegionId) -> Option<usize> {
        self.region(id).map(|r| r.disk)
    }

    /// Inserts a region into the owning disk's primary or logical list at
    /// its sorted position. Rejects overlap with any non-sentinel region.
    pub fn insert_disk_region(&mut self, disk_index: usize, region: Region) -> PartResult<RegionId> {
        let id = region.id;
        let disk = self
            .disks
            .get_mut(disk_index)
            .ok_or(PartError::NotFound)?;
        let list = if region.logical {
            &mut disk.logical
        } else {
            &mut disk.primary
        };

        let mut insert_pos = list.len();
        for (i, other) in list.iter().enumerate() {
            if other.is_sentinel() {
                continue;
            }
            // The current region ends before the one to be inserted.
            if other.last_sector() < region.start_sector {
                continue;
            }
            if region.start_sector.max(other.start_sector)
                <= region.last_sector().min(other.last_sector())
            {
                return Err(PartError::Invalid("disk region overlap"));
            }
            insert_pos = i;
            break;
        }

        list.insert(insert_pos, region);
        Ok(id)
    }

    /// Removes a region from its disk's list and returns it.
    pub(crate) fn take_region(&mut self, id: RegionId) -> Option<Region> {
        for disk in &mut self.disks {
            if let Some(pos) = pos_of(&disk.primary, id) {
                return Some(disk.primary.remove(pos));
            }
            if let Some(pos) = pos_of(&disk.logical, id) {
                return Some(disk.logical.remove(pos));
            }
        }
        None
    }

    // ---------- Accessors ----------

    pub fn get_disk_by_bios_number(&self, hw_disk_number: u32) -> Option<usize> {
        self.disks
            .iter()
            .position(|d| d.hw_disk == hw_disk_number)
    }

    pub fn get_disk_by_number(&self, disk_number: u32) -> Option<usize> {
        self.disks.iter().position(|d| d.number == disk_number)
    }

    pub fn get_disk_by_scsi(&self, port: u16, bus: u16, target: u16) -> Option<usize> {
        self.disks
            .iter()
            .position(|d| d.port == port && d.bus == bus && d.target == target)
    }

    pub fn get_disk_by_signature(&self, signature: u32) -> Option<usize> {
        self.disks
            .iter()
            .position(|d| d.layout.as_ref().is_some_and(|l| l.signature == signature))
    }

    /// Finds a partition on a disk by its current partition number.
    /// GPT disks expose no MBR partitions.
    pub fn get_partition(&self, disk_index: usize, partition_number: u32) -> Option<RegionId> {
        let disk = self.disk(disk_index)?;
        if disk.style == DiskStyle::Gpt {
            return None;
        }
        disk.primary
            .iter()
            .chain(disk.logical.iter())
            .find(|r| r.is_partitioned && r.number == partition_number)
            .map(|r| r.id)
    }

    /// Resolves a disk (and, when `partition_number != 0`, a partition).
    pub fn get_disk_or_partition(
        &self,
        disk_number: u32,
        partition_number: u32,
    ) -> Option<(usize, Option<RegionId>)> {
        let disk_index = self.get_disk_by_number(disk_number)?;
        if partition_number == 0 {
            return Some((disk_index, None));
        }
        if self.disks[disk_index].style == DiskStyle::Gpt {
            return None;
        }
        let region = self.get_partition(disk_index, partition_number)?;
        Some((disk_index, Some(region)))
    }

    pub fn select_partition(&self, disk_number: u32, partition_number: u32) -> Option<RegionId> {
        let disk_index = self.get_disk_by_number(disk_number)?;
        self.get_partition(disk_index, partition_number)
    }

    // ---------- Queries ----------

    /// Super-floppy: the layout holds exactly one entry starting at the
    /// very beginning of the disk with no hidden sectors.
    pub fn is_super_floppy(&self, disk_index: usize) -> bool {
        let Some(layout) = self.disk(disk_index).and_then(|d| d.layout.as_ref()) else {
            return false;
        };
        if layout.partition_count != 1 || layout.entries.is_empty() {
            return false;
        }
        let entry = &layout.entries[0];
        entry.starting_offset == 0 && entry.hidden_sectors == 0
    }

    /// Active means partitioned, not a container, and boot-flagged.
    pub fn is_partition_active(&self, id: RegionId) -> bool {
        let Some(region) = self.region(id) else {
            return false;
        };
        if is_container_partition(region.partition_type) {
            return false;
        }
        region.is_partitioned && region.boot_indicator
    }

    /// The fixed, firmware-visible disk the platform boots from; the disk
    /// of the current system partition when one is already chosen.
    pub fn system_disk(&self) -> Option<usize> {
        if let Some(system) = self.system_partition {
            return self.region_disk_index(system);
        }
        self.disks
            .iter()
            .position(|d| d.media_type == MediaType::Fixed && d.firmware_found)
    }

    /// The boot-flagged primary of a disk, if any. GPT disks are skipped.
    pub fn active_disk_partition(&self, disk_index: usize) -> Option<RegionId> {
        let disk = self.disk(disk_index)?;
        if disk.primary.is_empty() || disk.style == DiskStyle::Gpt {
            return None;
        }
        disk.primary
            .iter()
            .find(|r| {
                r.is_partitioned && r.boot_indicator && !is_container_partition(r.partition_type)
            })
            .map(|r| r.id)
    }

    // ---------- Traversal ----------

    fn next_mbr_region_by_order(&self, disk: &Disk, cur: Option<RegionId>) -> Option<RegionId> {
        let mut cur = cur;
        if let Some(c) = cur {
            let creg = self.region(c)?;
            if disk.extended == Some(c) || creg.logical {
                // Descend into (or continue inside) the logical list.
                let from = if disk.extended == Some(c) { None } else { Some(c) };
                if let Some(next) = adj_in_list(&disk.logical, from, true) {
                    return Some(next);
                }
                // Logical list exhausted: resume after the container.
                cur = disk.extended;
            }
        }
        adj_in_list(&disk.primary, cur, true)
    }

    fn prev_mbr_region_by_order(&self, disk: &Disk, cur: Option<RegionId>) -> Option<RegionId> {
        if let Some(c) = cur {
            let creg = self.region(c)?;
            if creg.logical {
                if let Some(prev) = adj_in_list(&disk.logical, Some(c), false) {
                    return Some(prev);
                }
                // Start of the logical list: step back onto the container.
                return disk.extended;
            }
        }
        let prev = adj_in_list(&disk.primary, cur, false)?;
        if disk.extended == Some(prev) {
            if let Some(last) = adj_in_list(&disk.logical, None, false) {
                return Some(last);
            }
        }
        Some(prev)
    }

    fn next_mbr_region_by_type(&self, disk: &Disk, cur: Option<RegionId>) -> Option<RegionId> {
        let mut cur = cur;
        if cur.map_or(true, |c| self.region(c).map_or(true, |r| !r.logical)) {
            if let Some(next) = adj_in_list(&disk.primary, cur, true) {
                return Some(next);
            }
            cur = None;
        }
        adj_in_list(&disk.logical, cur, true)
    }

    fn prev_mbr_region_by_type(&self, disk: &Disk, cur: Option<RegionId>) -> Option<RegionId> {
        let mut cur = cur;
        if cur.map_or(true, |c| self.region(c).map_or(true, |r| r.logical)) {
            if let Some(prev) = adj_in_list(&disk.logical, cur, false) {
                return Some(prev);
            }
            cur = None;
        }
        adj_in_list(&disk.primary, cur, false)
    }

    /// Finds the adjacent (next or previous) region on one disk under the
    /// given flags. With `current == None` the search starts at the first
    /// (or last) region of `disk`; with both arguments `None` there is
    /// nothing to start from and the result is `None`.
    pub fn adjacent_disk_region(
        &self,
        disk: Option<usize>,
        current: Option<RegionId>,
        flags: EnumFlags,
    ) -> Option<RegionId> {
        let forward = !flags.contains(EnumFlags::PREV);

        let (disk_index, mut current) = match (disk, current) {
            (None, None) => return None,
            (Some(d), None) => (d, None),
            (Some(d), Some(c)) => {
                if self.region_disk_index(c) == Some(d) {
                    (d, Some(c))
                } else {
                    // Region on another disk: restart at this disk's edge.
                    (d, None)
                }
            }
            (None, Some(c)) => (self.region_disk_index(c)?, Some(c)),
        };

        let disk = self.disk(disk_index)?;
        debug_assert!(
            !(flags.contains(EnumFlags::MBR_PRIMARY_ONLY)
                && flags.contains(EnumFlags::MBR_LOGICAL_ONLY))
        );

        loop {
            let next = if disk.style == DiskStyle::Mbr {
                if flags.contains(EnumFlags::MBR_PRIMARY_ONLY) {
                    adj_in_list(&disk.primary, current, forward)
                } else if flags.contains(EnumFlags::MBR_LOGICAL_ONLY) {
                    adj_in_list(&disk.logical, current, forward)
                } else if flags.contains(EnumFlags::MBR_BY_ORDER) {
                    if forward {
                        self.next_mbr_region_by_order(disk, current)
                    } else {
                        self.prev_mbr_region_by_order(disk, current)
                    }
                } else if forward {
                    self.next_mbr_region_by_type(disk, current)
                } else {
                    self.prev_mbr_region_by_type(disk, current)
                }
            } else {
                adj_in_list(&disk.primary, current, forward)
            };

            match next {
                Some(id)
                    if flags.contains(EnumFlags::PARTITIONED)
                        && self.region(id).is_some_and(|r| !r.is_partitioned) =>
                {
                    current = Some(id);
                }
                other => return other,
            }
        }
    }

    /// Extends `adjacent_disk_region` across the whole list: when a disk
    /// is exhausted, the enumeration continues on the next (or previous)
    /// disk.
    pub fn adjacent_partition(
        &self,
        current: Option<RegionId>,
        flags: EnumFlags,
    ) -> Option<RegionId> {
        let forward = !flags.contains(EnumFlags::PREV);

        let mut disk_index = match current {
            Some(c) => {
                if let Some(found) = self.adjacent_disk_region(None, Some(c), flags) {
                    return Some(found);
                }
                Some(self.region_disk_index(c)?)
            }
            None => {
                if self.disks.is_empty() {
                    return None;
                }
                None
            }
        };

        loop {
            disk_index = match (disk_index, forward) {
                (None, true) => Some(0),
                (None, false) => Some(self.disks.len() - 1),
                (Some(i), true) if i + 1 < self.disks.len() => Some(i + 1),
                (Some(i), false) if i > 0 => Some(i - 1),
                _ => return None,
            };
            if let Some(found) = self.adjacent_disk_region(disk_index, None, flags) {
                return Some(found);
            }
        }
    }

    /// Cursor over the regions of one disk.
    pub fn disk_regions(&self, disk: usize, flags: EnumFlags) -> RegionCursor<'_> {
        RegionCursor {
            list: self,
            disk: Some(disk),
            current: None,
            flags,
        }
    }

    /// Cursor over the regions of every disk in the list.
    pub fn partitions(&self, flags: EnumFlags) -> RegionCursor<'_> {
        RegionCursor {
            list: self,
            disk: None,
            current: None,
            flags,
        }
    }
}

/// Flag-filtered region cursor; the iterator adapter over the
/// `adjacent_*` traversal primitives.
#[derive(Debug, Clone)]
pub struct RegionCursor<'a> {
    list: &'a PartitionList,
    disk: Option<usize>,
    current: Option<RegionId>,
    flags: EnumFlags,
}

impl<'a> RegionCursor<'a> {
    /// Restarts the cursor from the given region.
    pub fn starting_at(mut self, current: RegionId) -> Self {
        self.current = Some(current);
        self
    }
}

impl<'a> Iterator for RegionCursor<'a> {
    type Item = RegionId;

    fn next(&mut self) -> Option<RegionId> {
        let next = match self.disk {
            Some(d) => self
                .list
                .adjacent_disk_region(Some(d), self.current, self.flags),
            None => self.list.adjacent_partition(self.current, self.flags),
        };
        self.current = next;
        next
    }
}
