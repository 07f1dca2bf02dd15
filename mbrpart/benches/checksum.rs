// cargo bench -p mbrpart
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use mbrpart::device::DriveGeometry;
use mbrpart::layout::{read_drive_layout, write_drive_layout, DriveLayout, LayoutEntry};
use mbrpart::mbr::mbr_checksum;
use mbrio::prelude::MemBlockIO;

criterion_group!(benches, bench_checksum, bench_layout_roundtrip);
criterion_main!(benches);

fn bench_checksum(c: &mut Criterion) {
    let mut sector = [0u8; 512];
    for (i, b) in sector.iter_mut().enumerate() {
        *b = i as u8;
    }
    sector[510] = 0x55;
    sector[511] = 0xAA;

    c.bench_function("mbr_checksum/512B", |b| {
        b.iter(|| mbr_checksum(std::hint::black_box(&sector)))
    });
}

fn entry(start: u64, sectors: u64, ty: u8) -> LayoutEntry {
    LayoutEntry {
        starting_offset: start * 512,
        partition_length: sectors * 512,
        hidden_sectors: 63,
        partition_number: 0,
        partition_type: ty,
        boot_indicator: false,
        recognized: true,
        rewrite: true,
    }
}

fn bench_layout_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout_roundtrip");

    for logicals in [0usize, 4, 16] {
        let total_sectors = 4_000_000u64;
        let geom = DriveGeometry::synthesized(total_sectors, 512);

        let cont_start = 500_000u64;
        let mut layout = DriveLayout::with_entry_count(4 + 4 * logicals as u32);
        layout.signature = 0x1234_5678;
        layout.entries[0] = entry(2048, 400_000, 0x06);
        layout.entries[0].hidden_sectors = 2048;
        if logicals > 0 {
            layout.entries[1] = entry(cont_start, 3_000_000, 0x05);
            layout.entries[1].hidden_sectors = cont_start as u32;
            layout.entries[1].recognized = false;
            let mut start = cont_start + 63;
            for k in 0..logicals {
                layout.entries[4 + 4 * k] = entry(start, 100_000, 0x06);
                start += 100_000 + 63;
            }
        }

        let mut image = vec![0u8; (total_sectors * 512) as usize];
        {
            let mut io = MemBlockIO::new(&mut image);
            let mut written = layout.clone();
            write_drive_layout(&mut io, &geom, &mut written).unwrap();
        }

        group.bench_with_input(
            BenchmarkId::new("read", logicals),
            &logicals,
            |b, _| {
                b.iter(|| {
                    let mut io = MemBlockIO::new(&mut image);
                    read_drive_layout(&mut io, &geom).unwrap()
                })
            },
        );
    }

    group.finish();
}
