// SPDX-License-Identifier: MIT

//! Table rendering for the inspect and apply reports.

use colored::Colorize;
use mbrpart::geometry::{is_container_partition, MbrPartitionKind};
use mbrpart::prelude::*;

pub fn pretty_bytes(n: u64) -> String {
    const UNITS: [&str; 7] = ["B", "KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];
    let mut val = n as f64;
    let mut idx = 0usize;
    while val >= 1024.0 && idx + 1 < UNITS.len() {
        val /= 1024.0;
        idx += 1;
    }
    if idx == 0 {
        format!("{} {}", sep_u64(n), UNITS[idx])
    } else {
        format!("{:.1} {}", val, UNITS[idx])
    }
}

pub fn sep_u64(mut n: u64) -> String {
    if n < 1_000 {
        return n.to_string();
    }
    let mut parts: Vec<String> = Vec::new();
    while n >= 1_000 {
        parts.push(format!("{:03}", n % 1_000));
        n /= 1_000;
    }
    parts.push(n.to_string());
    parts.reverse();
    parts.join(" ")
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    &s[..max]
}

fn style_name(style: DiskStyle) -> &'static str {
    match style {
        DiskStyle::Raw => "RAW",
        DiskStyle::Mbr => "MBR",
        DiskStyle::Gpt => "GPT",
        DiskStyle::Uninitialized => "uninitialized",
    }
}

fn region_kind(region: &Region) -> &'static str {
    if !region.is_partitioned {
        "free"
    } else if is_container_partition(region.partition_type) {
        "extended"
    } else if region.logical {
        "logical"
    } else {
        "primary"
    }
}

fn format_state(region: &Region) -> &'static str {
    if !region.is_partitioned {
        return "";
    }
    match region.volume.format_state {
        FormatState::Unformatted => "unformatted",
        FormatState::UnformattedOrDamaged => "damaged?",
        FormatState::UnknownFormat => "unknown",
        FormatState::Formatted => "formatted",
    }
}

pub fn print_disk(list: &PartitionList, disk_index: usize) {
    let disk = &list.disks[disk_index];

    let firmware = if disk.firmware_found {
        format!(
            "firmware {}/{}/{} (fixed #{})",
            disk.hw_adapter, disk.hw_controller, disk.hw_disk, disk.hw_fixed_disk
        )
    } else {
        "not seen by firmware".to_string()
    };

    println!(
        "Disk {} • {} • {} • {} • CHS {}x{}x{} • scsi {}:{}:{}{}",
        disk.number,
        pretty_bytes(disk.size_bytes()).bold(),
        style_name(disk.style),
        firmware,
        sep_u64(disk.cylinders),
        disk.tracks_per_cylinder,
        disk.sectors_per_track,
        disk.port,
        disk.bus,
        disk.target,
        if disk.driver_name.is_empty() {
            String::new()
        } else {
            format!(" • {}", disk.driver_name)
        },
    );

    if disk.style == DiskStyle::Gpt {
        println!("  GPT-partitioned disk; not editable by this tool.\n");
        return;
    }

    println!(
        "  ┌────┬──────────┬────────────┬────────────┬───────────┬──────────────────────────┬───────┬──────┬─────────────┐"
    );
    println!(
        "  | Nr | Kind     | Start LBA  | Sectors    | Size      | Type                     | FS    | Boot | Volume      |"
    );
    println!(
        "  ├────┼──────────┼────────────┼────────────┼───────────┼──────────────────────────┼───────┼──────┼─────────────┤"
    );

    for id in list.disk_regions(disk_index, EnumFlags::MBR_BY_ORDER) {
        let region = list.region(id).unwrap();
        let number = if region.is_partitioned && region.on_disk_number != 0 {
            region.on_disk_number.to_string()
        } else {
            "-".into()
        };
        let ty = if region.is_partitioned {
            MbrPartitionKind::from_type(region.partition_type).to_string()
        } else {
            String::new()
        };
        let volume = match region.volume.drive_letter {
            Some(letter) => {
                if region.volume.label.is_empty() {
                    format!("{letter}:")
                } else {
                    format!("{letter}: {}", region.volume.label)
                }
            }
            None => region.volume.label.clone(),
        };
        println!(
            "  | {:<2} | {:<8} | {:>10} | {:>10} | {:>9} | {:<24} | {:<5} | {:>4} | {:<11} |",
            number,
            region_kind(region),
            sep_u64(region.start_sector),
            sep_u64(region.sector_count),
            pretty_bytes(region.sector_count * disk.bytes_per_sector as u64),
            truncate(&ty, 24),
            truncate(&region.volume.filesystem, 5),
            if region.boot_indicator { "*" } else { "" },
            truncate(&format_state_with_volume(region, &volume), 11),
        );
    }

    println!(
        "  └────┴──────────┴────────────┴────────────┴───────────┴──────────────────────────┴───────┴──────┴─────────────┘"
    );
}

fn format_state_with_volume(region: &Region, volume: &str) -> String {
    if volume.is_empty() {
        format_state(region).to_string()
    } else {
        volume.to_string()
    }
}

pub fn print_report(list: &PartitionList) {
    for disk_index in 0..list.disks.len() {
        print_disk(list, disk_index);
    }

    for warning in warnings(list) {
        println!("{} {}", "warning:".yellow().bold(), warning);
    }
}

/// Conditions worth surfacing that the engine itself only tolerates.
pub fn warnings(list: &PartitionList) -> Vec<String> {
    use mbrpart::geometry::PARTITION_FAT_16;

    let mut warnings = Vec::new();

    for (i, disk) in list.disks.iter().enumerate() {
        let Some(layout) = disk.layout.as_ref() else {
            continue;
        };

        if list.is_super_floppy(i) {
            if layout.signature != 1 {
                warnings.push(format!(
                    "super-floppy disk {} has signature {:08x}, expected 1",
                    disk.number, layout.signature
                ));
            }
            // The reader defaults for a super-floppy: one recognized,
            // non-bootable FAT16 entry numbered 0 or 1.
            let entry = &layout.entries[0];
            if entry.partition_type != PARTITION_FAT_16
                || entry.boot_indicator
                || !entry.recognized
                || entry.partition_number > 1
            {
                warnings.push(format!(
                    "super-floppy disk {} does not report default settings \
                     (type {:02x}, boot {}, number {})",
                    disk.number, entry.partition_type, entry.boot_indicator, entry.partition_number
                ));
            }
        }

        // Alignment probe for the first partition: track- or MiB-aligned.
        if let Some(first) = layout.entries.first().filter(|e| {
            !e.is_empty_slot() && e.partition_type != 0 && e.starting_offset != 0
        }) {
            let start_sector = first.starting_offset / disk.bytes_per_sector as u64;
            let track_aligned = start_sector % disk.sectors_per_track as u64 == 0;
            let mib_aligned = first.starting_offset % (1024 * 1024) == 0;
            if !track_aligned && !mib_aligned {
                warnings.push(format!(
                    "disk {}: partition 1 at sector {} matches neither track nor MiB alignment",
                    disk.number, start_sector
                ));
            }
        }
    }

    for fw in &list.firmware_disks {
        if fw.disk_index.is_none() {
            warnings.push(format!(
                "firmware disk {}/{}/{} (signature {:08x}) matches no scanned disk",
                fw.adapter, fw.controller, fw.disk, fw.signature
            ));
        }
    }

    if let Some(system) = list.system_partition {
        if let Some(region) = list.region(system) {
            if region.volume.drive_letter.is_none() {
                warnings.push("system partition carries no drive letter".to_string());
            }
        }
    } else {
        warnings.push("no system partition has been determined".to_string());
    }

    warnings
}
