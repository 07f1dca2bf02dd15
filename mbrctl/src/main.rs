// SPDX-License-Identifier: MIT

mod plan;
mod report;
mod utils;

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use crate::plan::{Plan, PlanOp};
use crate::utils::LogLevel;
use mbrpart::prelude::*;
use mbrpart::registry::MOUNTED_DEVICES_KEY;
use mbrpart::{editor, scanner, writer};

#[derive(Parser)]
#[command(name = "mbrctl", version, about = "Offline MBR partition editor for disk images", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the partition layout of the given disk images
    Inspect {
        /// Disk image files, one per disk, in disk order
        #[arg(required = true)]
        images: Vec<PathBuf>,

        #[arg(long, short, action = clap::ArgAction::Count)]
        verbose: u8,
    },
    /// Apply a partition plan to the given disk images
    Apply {
        /// Plan path
        #[arg(short, long, default_value = "plan.toml")]
        plan: PathBuf,

        /// Disk image files, one per disk, in disk order
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Only run the plan against the model, don't write anything back
        #[arg(long)]
        dry_run: bool,

        #[arg(long, short, action = clap::ArgAction::Count)]
        verbose: u8,

        #[arg(long, short)]
        quiet: bool,
    },
}

type Env = PartEnv<FileBus, MemRegistry, SystemClock>;

fn scan_images(images: Vec<PathBuf>) -> anyhow::Result<(PartitionList, Env)> {
    for image in &images {
        anyhow::ensure!(image.is_file(), "No such image file: {}", image.display());
    }
    let mut env = PartEnv::new(FileBus::new(images), MemRegistry::new(), SystemClock);
    let list = scanner::create_partition_list(&mut env).context("scanning disks")?;
    Ok((list, env))
}

/// Finds the first free region of the requested kind on a disk.
fn first_free_region(
    list: &PartitionList,
    disk_number: u32,
    logical: bool,
) -> anyhow::Result<RegionId> {
    let disk_index = list
        .get_disk_by_number(disk_number)
        .with_context(|| format!("no disk {disk_number}"))?;
    let flags = if logical {
        EnumFlags::MBR_LOGICAL_ONLY
    } else {
        EnumFlags::MBR_PRIMARY_ONLY
    };
    list.disk_regions(disk_index, flags)
        .find(|&id| !list.region(id).unwrap().is_partitioned)
        .with_context(|| format!("no free region on disk {disk_number}"))
}

fn apply_op(list: &mut PartitionList, env: &mut Env, op: &PlanOp) -> anyhow::Result<()> {
    match op {
        PlanOp::Create {
            disk,
            size,
            logical,
        } => {
            let region = first_free_region(list, *disk, *logical)?;
            let bytes = size.map(|s| s.request_bytes()).unwrap_or(0);
            editor::create_partition(list, region, bytes)
                .with_context(|| format!("creating a partition on disk {disk}"))?;
            let part = list.region(region).unwrap();
            let bytes = part.sector_count * list.disks[part.disk].bytes_per_sector as u64;
            crate::progress!(
                "created {} partition at sector {} ({})",
                if *logical { "logical" } else { "primary" },
                part.start_sector,
                report::pretty_bytes(bytes)
            );
        }
        PlanOp::CreateExtended { disk, size } => {
            let region = first_free_region(list, *disk, false)?;
            let bytes = size.map(|s| s.request_bytes()).unwrap_or(0);
            editor::create_extended_partition(list, region, bytes)
                .with_context(|| format!("creating the extended partition on disk {disk}"))?;
            crate::progress!("created extended container on disk {disk}");
        }
        PlanOp::Delete { disk, partition } => {
            let region = list
                .select_partition(*disk, *partition)
                .with_context(|| format!("no partition {partition} on disk {disk}"))?;
            editor::delete_partition(list, &mut env.bus, region)
                .with_context(|| format!("deleting partition {partition} on disk {disk}"))?;
            crate::progress!("deleted partition {partition} on disk {disk}");
        }
        PlanOp::SetActive { disk, partition } => {
            let region = list
                .select_partition(*disk, *partition)
                .with_context(|| format!("no partition {partition} on disk {disk}"))?;
            anyhow::ensure!(
                editor::set_active_partition(list, region, None),
                "could not activate partition {partition} on disk {disk}"
            );
            crate::progress!("partition {partition} on disk {disk} is now active");
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { images, verbose } => {
            utils::init(LogLevel::from_flags(false, verbose > 0));
            let (list, _env) = scan_images(images)?;
            report::print_report(&list);
        }
        Commands::Apply {
            plan,
            images,
            dry_run,
            verbose,
            quiet,
        } => {
            utils::init(LogLevel::from_flags(
                quiet && !dry_run,
                verbose > 0 || dry_run,
            ));
            let t0 = Instant::now();

            let plan = Plan::from_file(&plan)
                .with_context(|| format!("reading plan {}", plan.display()))?;
            let (mut list, mut env) = scan_images(images)?;

            for op in &plan.ops {
                apply_op(&mut list, &mut env, op)?;
            }

            if dry_run {
                crate::progress!("dry run: no data was written");
            } else {
                writer::write_partitions_to_disk(&mut list, &mut env.bus)
                    .context("writing partition tables")?;
                writer::set_mounted_device_values(&list, &mut env.registry)
                    .context("recording mount points")?;

                for (name, _value) in env.registry.values(MOUNTED_DEVICES_KEY) {
                    crate::detail!("recorded mount value {name}");
                }
            }

            report::print_report(&list);
            crate::progress!(
                "{} operation(s) {} in {:.2}s",
                plan.ops.len(),
                if dry_run { "simulated" } else { "applied" },
                t0.elapsed().as_secs_f32()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_image(sectors: u64) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        file.as_file().set_len(sectors * 512).unwrap();
        file
    }

    #[test]
    fn apply_create_against_image_file() {
        let image = temp_image(200_000);
        let (mut list, mut env) = scan_images(vec![image.path().to_path_buf()]).unwrap();

        let op = PlanOp::Create {
            disk: 0,
            size: None,
            logical: false,
        };
        apply_op(&mut list, &mut env, &op).unwrap();
        writer::write_partitions_to_disk(&mut list, &mut env.bus).unwrap();

        let (rescanned, _env) = scan_images(vec![image.path().to_path_buf()]).unwrap();
        assert_eq!(rescanned.disks[0].primary_partition_count(), 1);
        assert_eq!(rescanned.disks[0].primary[0].start_sector, 2048);
    }

    #[test]
    fn apply_delete_errors_on_missing_partition() {
        let image = temp_image(100_000);
        let (mut list, mut env) = scan_images(vec![image.path().to_path_buf()]).unwrap();

        let op = PlanOp::Delete {
            disk: 0,
            partition: 1,
        };
        assert!(apply_op(&mut list, &mut env, &op).is_err());
    }
}
