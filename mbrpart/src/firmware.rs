// SPDX-License-Identifier: MIT

//! The platform firmware's view of the disks, read from the hierarchical
//! configuration store under
//! `HARDWARE\DESCRIPTION\System\MultifunctionAdapter\<a>\DiskController\<c>\DiskPeripheral\<d>`.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::registry::{
    RegStore, CONFIGURATION_DATA_VALUE, FIRMWARE_ADAPTER_ROOT, IDENTIFIER_VALUE,
    SYSTEM_CONFIG_KEY,
};

/// Device-specific resource descriptor kind.
pub const CM_RESOURCE_DEVICE_SPECIFIC: u8 = 5;

/// Header of a full resource descriptor blob: interface type, bus number
/// and the partial resource list header.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C, packed)]
pub struct CmResourceListHeader {
    pub interface_type: u32,
    pub bus_number: u32,
    pub version: u16,
    pub revision: u16,
    pub count: u32,
}

/// One partial resource descriptor. For device-specific data the payload
/// of `data_size` bytes follows the descriptor.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug)]
#[repr(C, packed)]
pub struct CmPartialDescriptor {
    pub kind: u8,
    pub share_disposition: u8,
    pub flags: u16,
    pub data_size: u32,
    pub reserved: [u32; 2],
}

/// Firmware-reported disk geometry device data.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C, packed)]
pub struct CmDiskGeometry {
    pub bytes_per_sector: u32,
    pub num_cylinders: u32,
    pub sectors_per_track: u32,
    pub num_heads: u32,
}

/// One Int13 drive parameter block from the root configuration data.
#[derive(IntoBytes, FromBytes, KnownLayout, Immutable, Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C, packed)]
pub struct CmInt13DriveParameter {
    pub drive_select: u16,
    pub max_cylinders: u32,
    pub sectors_per_track: u16,
    pub max_heads: u16,
    pub number_drives: u16,
}

/// A disk as the firmware enumerates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareDisk {
    pub adapter: u32,
    pub controller: u32,
    pub disk: u32,
    pub signature: u32,
    pub checksum: u32,
    /// Index of the matching scanned disk, once correlated.
    pub disk_index: Option<usize>,
    pub geometry: Option<CmDiskGeometry>,
    pub int13: Option<CmInt13DriveParameter>,
}

const DESCRIPTOR_SIZE: usize = core::mem::size_of::<CmPartialDescriptor>();
const HEADER_SIZE: usize = core::mem::size_of::<CmResourceListHeader>();

/// Walks a resource blob and returns the payload of the first
/// device-specific descriptor matching `want` (`None` = any size).
fn device_specific_payload(blob: &[u8], want: Option<usize>) -> Option<&[u8]> {
    let header = CmResourceListHeader::read_from_bytes(blob.get(..HEADER_SIZE)?).ok()?;
    let mut offset = HEADER_SIZE;

    for _ in 0..u32::from_le(header.count) {
        let descriptor =
            CmPartialDescriptor::read_from_bytes(blob.get(offset..offset + DESCRIPTOR_SIZE)?)
                .ok()?;
        let data_size = u32::from_le(descriptor.data_size) as usize;

        if descriptor.kind == CM_RESOURCE_DEVICE_SPECIFIC {
            if want.map_or(true, |w| data_size == w) {
                return blob.get(offset + DESCRIPTOR_SIZE..offset + DESCRIPTOR_SIZE + data_size);
            }
            offset += DESCRIPTOR_SIZE + data_size;
        } else {
            offset += DESCRIPTOR_SIZE;
        }
    }
    None
}

/// Extracts the disk geometry device data from a `Configuration Data` blob.
pub fn parse_disk_geometry_data(blob: &[u8]) -> Option<CmDiskGeometry> {
    let payload = device_specific_payload(blob, Some(core::mem::size_of::<CmDiskGeometry>()))?;
    CmDiskGeometry::read_from_bytes(payload).ok()
}

/// Extracts the Int13 drive parameter array from the root
/// `Configuration Data` blob.
pub fn parse_int13_parameters(blob: &[u8]) -> Vec<CmInt13DriveParameter> {
    const ENTRY: usize = core::mem::size_of::<CmInt13DriveParameter>();
    let Some(payload) = device_specific_payload(blob, None) else {
        return Vec::new();
    };
    if payload.len() % ENTRY != 0 {
        return Vec::new();
    }
    payload
        .chunks_exact(ENTRY)
        .filter_map(|chunk| CmInt13DriveParameter::read_from_bytes(chunk).ok())
        .collect()
}

/// Builds a `Configuration Data` blob holding one device-specific payload.
/// Used by fixtures and the store snapshot tooling.
pub fn encode_device_specific(payload: &[u8]) -> Vec<u8> {
    let header = CmResourceListHeader {
        interface_type: 0,
        bus_number: 0,
        version: 1u16.to_le(),
        revision: 1u16.to_le(),
        count: 1u32.to_le(),
    };
    let descriptor = CmPartialDescriptor {
        kind: CM_RESOURCE_DEVICE_SPECIFIC,
        share_disposition: 0,
        flags: 0,
        data_size: (payload.len() as u32).to_le(),
        reserved: [0; 2],
    };
    let mut blob = Vec::with_capacity(HEADER_SIZE + DESCRIPTOR_SIZE + payload.len());
    blob.extend_from_slice(header.as_bytes());
    blob.extend_from_slice(descriptor.as_bytes());
    blob.extend_from_slice(payload);
    blob
}

pub fn encode_disk_geometry_data(geometry: &CmDiskGeometry) -> Vec<u8> {
    encode_device_specific(geometry.as_bytes())
}

pub fn encode_int13_parameters(params: &[CmInt13DriveParameter]) -> Vec<u8> {
    let mut payload = Vec::new();
    for p in params {
        payload.extend_from_slice(p.as_bytes());
    }
    encode_device_specific(&payload)
}

/// Parses an `Identifier` value of the form `"CCCCCCCC-SSSSSSSS-?"`:
/// checksum and signature as 32-bit hex joined by a dash.
pub fn parse_disk_identifier(identifier: &str) -> Option<(u32, u32)> {
    let bytes = identifier.as_bytes();
    if bytes.len() < 18 || bytes[8] != b'-' {
        return None;
    }
    let checksum = u32::from_str_radix(&identifier[0..8], 16).ok()?;
    let signature = u32::from_str_radix(&identifier[9..17], 16).ok()?;
    Some((checksum, signature))
}

/// Enumerates the firmware-visible disks in adapter, controller, disk
/// order. The adapter number is forcibly stored as 0, matching the
/// historical firmware convention.
pub fn enumerate_firmware_disks<R: RegStore + ?Sized>(store: &R) -> Vec<FirmwareDisk> {
    let mut disks = Vec::new();

    let int13: Vec<CmInt13DriveParameter> = store
        .read_binary(SYSTEM_CONFIG_KEY, CONFIGURATION_DATA_VALUE)
        .map(|blob| parse_int13_parameters(&blob))
        .unwrap_or_default();

    let mut adapter = 0u32;
    loop {
        let adapter_key = format!("{FIRMWARE_ADAPTER_ROOT}\\{adapter}");
        if !store.key_exists(&adapter_key) {
            break;
        }

        let controller_root = format!("{adapter_key}\\DiskController");
        if store.key_exists(&controller_root) {
            let mut controller = 0u32;
            loop {
                let controller_key = format!("{controller_root}\\{controller}");
                if !store.key_exists(&controller_key) {
                    break;
                }

                let disk_root = format!("{controller_key}\\DiskPeripheral");
                if store.key_exists(&disk_root) {
                    let mut disk = 0u32;
                    loop {
                        let disk_key = format!("{disk_root}\\{disk}");
                        if !store.key_exists(&disk_key) {
                            break;
                        }

                        let Some((checksum, signature)) = store
                            .read_string(&disk_key, IDENTIFIER_VALUE)
                            .ok()
                            .as_deref()
                            .and_then(parse_disk_identifier)
                        else {
                            // Without an identifier the disk cannot be
                            // correlated; skip it.
                            disk += 1;
                            continue;
                        };

                        let geometry = store
                            .read_binary(&disk_key, CONFIGURATION_DATA_VALUE)
                            .ok()
                            .and_then(|blob| parse_disk_geometry_data(&blob));

                        disks.push(FirmwareDisk {
                            // Hardcoded to 0 for the firmware, not the
                            // enumeration index.
                            adapter: 0,
                            controller,
                            disk,
                            signature,
                            checksum,
                            disk_index: None,
                            geometry,
                            int13: int13.get(disk as usize).copied().filter(|_| {
                                int13
                                    .first()
                                    .is_some_and(|f| disk < u16::from_le(f.number_drives) as u32)
                            }),
                        });

                        disk += 1;
                    }
                }

                controller += 1;
            }
        }

        adapter += 1;
    }

    disks
}

/// Builds a registry snapshot describing `disks` as `(checksum, signature)`
/// pairs on adapter 0, controller 0. Test fixture.
#[cfg(test)]
pub(crate) fn fixture_registry(disks: &[(u32, u32)]) -> crate::registry::MemRegistry {
    use crate::registry::MemRegistry;

    let mut reg = MemRegistry::new();

    let int13: Vec<CmInt13DriveParameter> = disks
        .iter()
        .map(|_| CmInt13DriveParameter {
            drive_select: 0x80u16.to_le(),
            max_cylinders: 1024u32.to_le(),
            sectors_per_track: 63u16.to_le(),
            max_heads: 255u16.to_le(),
            number_drives: (disks.len() as u16).to_le(),
        })
        .collect();
    reg.set_binary(
        SYSTEM_CONFIG_KEY,
        CONFIGURATION_DATA_VALUE,
        encode_int13_parameters(&int13),
    );

    reg.create_key(&format!("{FIRMWARE_ADAPTER_ROOT}\\0"));
    reg.create_key(&format!("{FIRMWARE_ADAPTER_ROOT}\\0\\DiskController"));
    reg.create_key(&format!("{FIRMWARE_ADAPTER_ROOT}\\0\\DiskController\\0"));
    let disk_root = format!("{FIRMWARE_ADAPTER_ROOT}\\0\\DiskController\\0\\DiskPeripheral");
    reg.create_key(&disk_root);

    for (i, (checksum, signature)) in disks.iter().enumerate() {
        let key = format!("{disk_root}\\{i}");
        reg.create_key(&key);
        reg.set_string(
            &key,
            IDENTIFIER_VALUE,
            &crate::mbr::format_identifier(*checksum, *signature, true),
        );
        let geometry = CmDiskGeometry {
            bytes_per_sector: 512u32.to_le(),
            num_cylinders: 1024u32.to_le(),
            sectors_per_track: 63u32.to_le(),
            num_heads: 255u32.to_le(),
        };
        reg.set_binary(
            &key,
            CONFIGURATION_DATA_VALUE,
            encode_disk_geometry_data(&geometry),
        );
    }

    reg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_parse() {
        assert_eq!(
            parse_disk_identifier("00c0ffee-12345678-A"),
            Some((0x00C0FFEE, 0x12345678))
        );
        assert_eq!(parse_disk_identifier("bogus"), None);
        assert_eq!(parse_disk_identifier("00c0ffee+12345678-A"), None);
    }

    #[test]
    fn enumerate_fixture() {
        let reg = fixture_registry(&[(0xAAAA0001, 0x1111_1111), (0xAAAA0002, 0x2222_2222)]);
        let disks = enumerate_firmware_disks(&reg);

        assert_eq!(disks.len(), 2);
        assert_eq!(disks[0].adapter, 0);
        assert_eq!(disks[0].controller, 0);
        assert_eq!(disks[0].disk, 0);
        assert_eq!(disks[0].checksum, 0xAAAA0001);
        assert_eq!(disks[0].signature, 0x1111_1111);
        assert!(disks[0].geometry.is_some());
        assert!(disks[0].int13.is_some());
        assert_eq!(disks[1].disk, 1);
    }

    #[test]
    fn int13_array_roundtrip() {
        let params = [
            CmInt13DriveParameter {
                drive_select: 0x80u16.to_le(),
                max_cylinders: 500u32.to_le(),
                sectors_per_track: 63u16.to_le(),
                max_heads: 16u16.to_le(),
                number_drives: 2u16.to_le(),
            };
            2
        ];
        let blob = encode_int13_parameters(&params);
        let parsed = parse_int13_parameters(&blob);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0], params[0]);
    }

    #[test]
    fn geometry_blob_roundtrip() {
        let geometry = CmDiskGeometry {
            bytes_per_sector: 512u32.to_le(),
            num_cylinders: 2048u32.to_le(),
            sectors_per_track: 63u32.to_le(),
            num_heads: 128u32.to_le(),
        };
        let blob = encode_disk_geometry_data(&geometry);
        assert_eq!(parse_disk_geometry_data(&blob), Some(geometry));
    }
}
