// SPDX-License-Identifier: MIT

//! Disk-image device backends: in-memory images for tests and
//! file-backed images for offline editing. Both present the same
//! `DiskBus`/`DiskAccess` surface the scanner and writer consume.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::rc::Rc;

use crate::device::{
    DeviceError, DeviceResult, DevicePath, DiskAccess, DiskBus, DriveGeometry, ScsiAddress,
};
use crate::fsrec;
use crate::layout::{self, DriveLayout};
use mbrio::prelude::*;

/// `BlockIO` over a shared, growable byte buffer. Multiple handles to
/// the same image stay coherent, the way multiple kernel handles to one
/// disk do.
#[derive(Debug, Clone)]
pub struct SharedMemIO {
    data: Rc<RefCell<Vec<u8>>>,
}

impl SharedMemIO {
    pub fn new(data: Rc<RefCell<Vec<u8>>>) -> Self {
        Self { data }
    }
}

impl BlockIO for SharedMemIO {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        let data = self.data.borrow();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(BlockIOError::OutOfBounds)?;
        let src = data.get(start..end).ok_or(BlockIOError::OutOfBounds)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        let mut bytes = self.data.borrow_mut();
        let start = offset as usize;
        let end = start.checked_add(data.len()).ok_or(BlockIOError::OutOfBounds)?;
        let dst = bytes.get_mut(start..end).ok_or(BlockIOError::OutOfBounds)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> BlockIOResult {
        Ok(())
    }
}

/// One in-memory disk image with its synthesized identity.
#[derive(Debug, Clone)]
pub struct DiskImage {
    data: Rc<RefCell<Vec<u8>>>,
    geometry: DriveGeometry,
    scsi: ScsiAddress,
    fail_layout_writes: bool,
}

impl DiskImage {
    /// A zero-filled image of `total_sectors`, classic 255x63 geometry.
    pub fn new_blank(total_sectors: u64, bytes_per_sector: u32) -> Self {
        Self::from_bytes(
            vec![0u8; (total_sectors * bytes_per_sector as u64) as usize],
            DriveGeometry::synthesized(total_sectors, bytes_per_sector),
        )
    }

    pub fn from_bytes(bytes: Vec<u8>, geometry: DriveGeometry) -> Self {
        Self {
            data: Rc::new(RefCell::new(bytes)),
            geometry,
            scsi: ScsiAddress::default(),
            fail_layout_writes: false,
        }
    }

    pub fn with_geometry(mut self, geometry: DriveGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_scsi(mut self, scsi: ScsiAddress) -> Self {
        self.scsi = scsi;
        self
    }

    /// Shared byte buffer of the image, for direct inspection.
    pub fn data(&self) -> Rc<RefCell<Vec<u8>>> {
        Rc::clone(&self.data)
    }
}

/// An open handle onto (a slice of) one disk image.
#[derive(Debug)]
pub struct ImageHandle<IO: BlockIO> {
    io: IO,
    /// First byte of the addressed partition within the image.
    base: u64,
    /// Addressable length in bytes.
    len: u64,
    geometry: DriveGeometry,
    scsi: ScsiAddress,
    fail_layout_writes: bool,
}

impl<IO: BlockIO> ImageHandle<IO> {
    fn whole(io: IO, len: u64, geometry: DriveGeometry, scsi: ScsiAddress) -> Self {
        Self {
            io,
            base: 0,
            len,
            geometry,
            scsi,
            fail_layout_writes: false,
        }
    }

    /// Re-scopes a whole-disk handle onto the partition with the given
    /// device partition number, resolved through the on-disk tables.
    fn narrow_to_partition(mut self, partition: u32) -> DeviceResult<Self> {
        let geometry = self.geometry;
        let layout = layout::read_drive_layout(&mut self, &geometry)
            .map_err(|e| DeviceError::Other(e.msg()))?;
        let entry = layout
            .entries
            .iter()
            .find(|e| !e.is_empty_slot() && e.partition_number == partition)
            .ok_or(DeviceError::NotFound)?;
        self.base = entry.starting_offset;
        self.len = entry.partition_length;
        Ok(self)
    }
}

impl<IO: BlockIO> BlockIO for ImageHandle<IO> {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> BlockIOResult {
        if offset + buf.len() as u64 > self.len {
            return Err(BlockIOError::OutOfBounds);
        }
        self.io.read_at(self.base + offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> BlockIOResult {
        if offset + data.len() as u64 > self.len {
            return Err(BlockIOError::OutOfBounds);
        }
        self.io.write_at(self.base + offset, data)
    }

    fn flush(&mut self) -> BlockIOResult {
        self.io.flush()
    }
}

impl<IO: BlockIO> DiskAccess for ImageHandle<IO> {
    fn geometry(&mut self) -> DeviceResult<DriveGeometry> {
        Ok(self.geometry)
    }

    fn scsi_address(&mut self) -> DeviceResult<ScsiAddress> {
        Ok(self.scsi)
    }

    fn drive_layout(&mut self, entry_capacity: u32) -> DeviceResult<DriveLayout> {
        let geometry = self.geometry;
        let layout = layout::read_drive_layout(self, &geometry)
            .map_err(|e| DeviceError::Other(e.msg()))?;
        if layout.partition_count > entry_capacity {
            return Err(DeviceError::BufferTooSmall);
        }
        Ok(layout)
    }

    fn set_drive_layout(&mut self, layout: &mut DriveLayout) -> DeviceResult<()> {
        if self.fail_layout_writes {
            return Err(DeviceError::Other("injected layout write failure"));
        }
        let geometry = self.geometry;
        layout::write_drive_layout(self, &geometry, layout)
            .map_err(|e| DeviceError::Other(e.msg()))
    }

    fn lock_volume(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    fn dismount_volume(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    fn unlock_volume(&mut self) -> DeviceResult<()> {
        Ok(())
    }

    fn volume_label(&mut self) -> DeviceResult<String> {
        fsrec::volume_label(self)
    }
}

/// Bus over a set of in-memory disk images.
#[derive(Debug, Default)]
pub struct ImageBus {
    disks: Vec<DiskImage>,
}

impl ImageBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, image: DiskImage) -> u32 {
        self.disks.push(image);
        self.disks.len() as u32 - 1
    }

    pub fn image(&self, disk: u32) -> Option<&DiskImage> {
        self.disks.get(disk as usize)
    }

    /// Makes every following layout write on `disk` fail, for exercising
    /// partial writeback.
    pub fn fail_layout_writes(&mut self, disk: u32, fail: bool) {
        if let Some(image) = self.disks.get_mut(disk as usize) {
            image.fail_layout_writes = fail;
        }
    }
}

impl DiskBus for ImageBus {
    type Handle = ImageHandle<SharedMemIO>;

    fn disk_count(&mut self) -> u32 {
        self.disks.len() as u32
    }

    fn open(&mut self, path: &DevicePath) -> DeviceResult<Self::Handle> {
        let image = self
            .disks
            .get(path.disk as usize)
            .ok_or(DeviceError::NotFound)?;
        let len = image.data.borrow().len() as u64;
        let mut handle = ImageHandle::whole(
            SharedMemIO::new(Rc::clone(&image.data)),
            len,
            image.geometry,
            image.scsi,
        );
        handle.fail_layout_writes = image.fail_layout_writes;
        if path.is_whole_disk() {
            Ok(handle)
        } else {
            handle.narrow_to_partition(path.partition)
        }
    }

    fn infer_filesystem(&mut self, volume: &mut Self::Handle) -> DeviceResult<String> {
        fsrec::infer_filesystem(volume)
    }
}

/// Bus over raw image files on disk; the CLI's backend.
#[derive(Debug, Default)]
pub struct FileBus {
    paths: Vec<PathBuf>,
}

impl FileBus {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl DiskBus for FileBus {
    type Handle = ImageHandle<StdBlockIO<File>>;

    fn disk_count(&mut self) -> u32 {
        self.paths.len() as u32
    }

    fn open(&mut self, path: &DevicePath) -> DeviceResult<Self::Handle> {
        let file_path = self
            .paths
            .get(path.disk as usize)
            .ok_or(DeviceError::NotFound)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(file_path)
            .map_err(|e| DeviceError::Block(e.into()))?;
        let len = file
            .metadata()
            .map_err(|e| DeviceError::Block(e.into()))?
            .len();

        let geometry = DriveGeometry::synthesized(len / 512, 512);
        let scsi = ScsiAddress {
            port: 0,
            bus: 0,
            target: path.disk as u16,
        };
        let handle = ImageHandle::whole(StdBlockIO::new(file), len, geometry, scsi);
        if path.is_whole_disk() {
            Ok(handle)
        } else {
            handle.narrow_to_partition(path.partition)
        }
    }

    fn infer_filesystem(&mut self, volume: &mut Self::Handle) -> DeviceResult<String> {
        fsrec::infer_filesystem(volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutEntry;

    fn fat_entry(start: u64, sectors: u64, ty: u8) -> LayoutEntry {
        LayoutEntry {
            starting_offset: start * 512,
            partition_length: sectors * 512,
            hidden_sectors: start as u32,
            partition_number: 0,
            partition_type: ty,
            boot_indicator: false,
            recognized: true,
            rewrite: true,
        }
    }

    #[test]
    fn shared_handles_stay_coherent() {
        let mut bus = ImageBus::new();
        bus.push(DiskImage::new_blank(2048, 512));

        let mut a = bus.open(&DevicePath::whole_disk(0)).unwrap();
        let mut b = bus.open(&DevicePath::whole_disk(0)).unwrap();

        a.write_at(512, &[0xAB; 16]).unwrap();
        let mut buf = [0u8; 16];
        b.read_at(512, &mut buf).unwrap();
        assert_eq!(buf, [0xAB; 16]);
    }

    #[test]
    fn partition_open_scopes_io() {
        let mut bus = ImageBus::new();
        let disk = bus.push(DiskImage::new_blank(200_000, 512));

        // Lay down one primary partition, then open it as Partition1.
        let mut whole = bus.open(&DevicePath::whole_disk(disk)).unwrap();
        let mut layout = DriveLayout::with_entry_count(4);
        layout.entries[0] = fat_entry(2048, 65_536, 0x06);
        whole.set_drive_layout(&mut layout).unwrap();
        assert_eq!(layout.entries[0].partition_number, 1);

        let mut part = bus.open(&DevicePath::new(disk, 1)).unwrap();
        part.write_at(0, &[0x5A; 8]).unwrap();

        let mut buf = [0u8; 8];
        whole.read_at(2048 * 512, &mut buf).unwrap();
        assert_eq!(buf, [0x5A; 8]);

        // Out-of-partition access is rejected.
        assert!(part.read_at(65_536 * 512, &mut buf).is_err());
    }

    #[test]
    fn layout_capacity_retry() {
        let mut bus = ImageBus::new();
        let disk = bus.push(DiskImage::new_blank(600_000, 512));
        let mut whole = bus.open(&DevicePath::whole_disk(disk)).unwrap();

        let cont_start = 100_000u64;
        let mut layout = DriveLayout::with_entry_count(12);
        layout.entries[0] = fat_entry(2048, 65_536, 0x06);
        layout.entries[1] = fat_entry(cont_start, 400_000, 0x05);
        layout.entries[1].recognized = false;
        layout.entries[4] = fat_entry(cont_start + 63, 150_000, 0x06);
        layout.entries[4].hidden_sectors = 63;
        layout.entries[8] = fat_entry(cont_start + 63 + 150_000 + 63, 100_000, 0x06);
        layout.entries[8].hidden_sectors = 63;
        whole.set_drive_layout(&mut layout).unwrap();

        assert_eq!(
            whole.drive_layout(4).unwrap_err(),
            DeviceError::BufferTooSmall
        );
        assert_eq!(
            whole.drive_layout(8).unwrap_err(),
            DeviceError::BufferTooSmall
        );
        let read = whole.drive_layout(12).unwrap();
        assert_eq!(read.partition_count, 12);
    }

    #[test]
    fn injected_layout_write_failure() {
        let mut bus = ImageBus::new();
        let disk = bus.push(DiskImage::new_blank(10_000, 512));
        bus.fail_layout_writes(disk, true);

        let mut whole = bus.open(&DevicePath::whole_disk(disk)).unwrap();
        let mut layout = DriveLayout::with_entry_count(4);
        layout.entries[0] = fat_entry(2048, 4096, 0x06);
        assert!(whole.set_drive_layout(&mut layout).is_err());
    }
}
