// SPDX-License-Identifier: MIT

//! Volume mount state: attaching a filesystem view to a partitioned
//! region and detaching it again on deletion.

use crate::device::{DiskAccess, DiskBus};
use crate::errors::*;
use crate::geometry::is_fat_family;
use crate::region::{FormatState, VolumeInfo, MAX_LABEL_CHARS};

/// Opens the volume's device, infers the filesystem and classifies the
/// format state.
///
/// A volume mounted with RawFS is either truly unformatted (when the
/// partition type is one of the FAT family, which is what freshly
/// created partitions get stamped with) or of unknown format, in which
/// case it is dismounted again.
pub fn mount_volume<B: DiskBus>(
    bus: &mut B,
    volume: &mut VolumeInfo,
    mbr_type: Option<u8>,
) -> PartResult<()> {
    volume.format_state = FormatState::Unformatted;
    volume.filesystem.clear();
    volume.label.clear();

    let Some(path) = volume.device else {
        // No volume attached.
        return Ok(());
    };

    let Ok(mut handle) = bus.open(&path) else {
        volume.format_state = FormatState::UnknownFormat;
        return Ok(());
    };

    match bus.infer_filesystem(&mut handle) {
        Ok(filesystem) if !filesystem.is_empty() => {
            volume.filesystem = filesystem;
            if volume.filesystem.eq_ignore_ascii_case("RAW") {
                if mbr_type.is_some_and(is_fat_family) {
                    volume.format_state = FormatState::Unformatted;
                } else {
                    // RawFS owns the volume but the partition type is not
                    // one a bare FAT driver would claim: dismount it and
                    // report an unknown format.
                    drop(handle);
                    let _ = dismount_volume(bus, volume);
                    volume.format_state = FormatState::UnknownFormat;
                    volume.filesystem.clear();
                    return Ok(());
                }
            } else {
                volume.format_state = FormatState::Formatted;
            }
        }
        _ => {
            volume.format_state = FormatState::UnknownFormat;
        }
    }

    if let Ok(mut label) = handle.volume_label() {
        label.truncate(MAX_LABEL_CHARS);
        volume.label = label;
    }

    Ok(())
}

/// Dismounts a mounted volume: lock, dismount, unlock, close. The volume
/// record is cleared regardless of the lock/dismount outcome.
pub fn dismount_volume<B: DiskBus>(bus: &mut B, volume: &mut VolumeInfo) -> PartResult<()> {
    if !volume.is_mounted() {
        // Not mounted by the system; nothing to do.
        return Ok(());
    }
    let Some(path) = volume.device else {
        return Ok(());
    };

    let mut handle = match bus.open(&path) {
        Ok(handle) => handle,
        Err(e) => return Err(PartError::Io(e)),
    };

    volume.drive_letter = None;
    volume.format_state = FormatState::Unformatted;
    volume.filesystem.clear();
    volume.label.clear();
    volume.needs_check = false;

    // A failed lock is tolerated; the dismount may still succeed.
    let _ = handle.lock_volume();
    let status = handle.dismount_volume();
    let _ = handle.unlock_volume();

    status.map_err(PartError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DevicePath, DiskBus};
    use crate::geometry::{PARTITION_FAT_16, PARTITION_IFS};
    use crate::imgdev::{DiskImage, ImageBus};

    fn volume_for(disk: u32, partition: u32) -> VolumeInfo {
        VolumeInfo {
            device: Some(DevicePath::new(disk, partition)),
            ..VolumeInfo::default()
        }
    }

    fn bus_with_partition(patch: impl FnOnce(&mut [u8])) -> ImageBus {
        use crate::layout::DriveLayout;
        use crate::testutil::entry;

        let image = DiskImage::new_blank(200_000, 512);
        let mut bus = ImageBus::new();
        bus.push(image.clone());
        let mut whole = bus.open(&DevicePath::whole_disk(0)).unwrap();
        let mut layout = DriveLayout::with_entry_count(4);
        layout.entries[0] = entry(2048, 100_000, PARTITION_FAT_16, false, 2048);
        crate::device::DiskAccess::set_drive_layout(&mut whole, &mut layout).unwrap();

        {
            let data = image.data();
            let mut bytes = data.borrow_mut();
            patch(&mut bytes[2048 * 512..]);
        }
        bus
    }

    #[test]
    fn raw_volume_with_fat_type_is_unformatted() {
        let mut bus = bus_with_partition(|_| {});
        let mut volume = volume_for(0, 1);

        mount_volume(&mut bus, &mut volume, Some(PARTITION_FAT_16)).unwrap();

        assert_eq!(volume.format_state, FormatState::Unformatted);
        assert_eq!(volume.filesystem, "RAW");
        assert!(volume.is_mounted());
    }

    #[test]
    fn raw_volume_with_foreign_type_is_unknown() {
        let mut bus = bus_with_partition(|_| {});
        let mut volume = volume_for(0, 1);

        mount_volume(&mut bus, &mut volume, Some(PARTITION_IFS)).unwrap();

        assert_eq!(volume.format_state, FormatState::UnknownFormat);
        assert!(volume.filesystem.is_empty());
        assert!(!volume.is_mounted());
    }

    #[test]
    fn formatted_volume_reads_label() {
        let mut bus = bus_with_partition(|vbr| {
            vbr[0x36..0x3B].copy_from_slice(b"FAT16");
            vbr[0x2B..0x36].copy_from_slice(b"INSTALL    ");
        });
        let mut volume = volume_for(0, 1);

        mount_volume(&mut bus, &mut volume, Some(PARTITION_FAT_16)).unwrap();

        assert_eq!(volume.format_state, FormatState::Formatted);
        assert_eq!(volume.filesystem, "FAT");
        assert_eq!(volume.label, "INSTALL");
    }

    #[test]
    fn missing_device_is_a_noop() {
        let mut bus = ImageBus::new();
        let mut volume = VolumeInfo::default();
        mount_volume(&mut bus, &mut volume, None).unwrap();
        assert_eq!(volume.format_state, FormatState::Unformatted);
    }

    #[test]
    fn dismount_clears_volume_state() {
        let mut bus = bus_with_partition(|vbr| {
            vbr[0x36..0x3B].copy_from_slice(b"FAT16");
        });
        let mut volume = volume_for(0, 1);
        mount_volume(&mut bus, &mut volume, Some(PARTITION_FAT_16)).unwrap();
        volume.drive_letter = Some('C');

        dismount_volume(&mut bus, &mut volume).unwrap();

        assert_eq!(volume.drive_letter, None);
        assert_eq!(volume.format_state, FormatState::Unformatted);
        assert!(volume.filesystem.is_empty());
        assert!(volume.label.is_empty());
        assert!(!volume.is_mounted());
    }

    #[test]
    fn dismount_unmounted_is_ok() {
        let mut bus = ImageBus::new();
        let mut volume = VolumeInfo::default();
        assert!(dismount_volume(&mut bus, &mut volume).is_ok());
    }
}
