//! Benchmarks for mapping merge and lookup on realistic mapping sizes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vmimport::mapping::{find_mapping, merge_configuration, merge_mappings};
use vmimport::resources::{MappingConfiguration, MappingItem, MappingSource};

fn items(prefix: &str, count: usize, overlap: usize) -> Vec<MappingItem> {
    (0..count)
        .map(|i| {
            // The first `overlap` items share their identity with the other side
            let key = if i < overlap {
                format!("shared-{}", i)
            } else {
                format!("{}-{}", prefix, i)
            };
            let source = if i % 3 == 0 {
                MappingSource::name(key)
            } else {
                MappingSource::both(format!("id-{}", key), key)
            };
            MappingItem::new(source, format!("{}-target-{}", prefix, i))
        })
        .collect()
}

fn bench_merge_mappings(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge_mappings");
    for size in [10usize, 100, 1000] {
        let primary = items("inline", size, size / 2);
        let secondary = items("external", size, size / 2);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                merge_mappings(
                    black_box(Some(primary.as_slice())),
                    black_box(Some(secondary.as_slice())),
                )
            });
        });
    }
    group.finish();
}

fn bench_merge_configuration(c: &mut Criterion) {
    let inline = MappingConfiguration {
        network_mappings: Some(items("net", 8, 4)),
        storage_mappings: Some(items("sd", 4, 2)),
        disk_mappings: Some(items("disk", 16, 0)),
    };
    let external = MappingConfiguration {
        network_mappings: Some(items("shared-net", 32, 4)),
        storage_mappings: Some(items("shared-sd", 16, 2)),
        disk_mappings: None,
    };

    c.bench_function("merge_configuration_typical", |b| {
        b.iter(|| merge_configuration(black_box(Some(&inline)), black_box(Some(&external))));
    });
}

fn bench_find_mapping(c: &mut Criterion) {
    let mappings = items("sd", 100, 0);

    c.bench_function("find_mapping_by_id_hit", |b| {
        b.iter(|| {
            find_mapping(
                black_box(Some(mappings.as_slice())),
                black_box(Some("id-sd-98")),
                black_box(None),
            )
        });
    });

    c.bench_function("find_mapping_name_fallback", |b| {
        b.iter(|| {
            find_mapping(
                black_box(Some(mappings.as_slice())),
                black_box(Some("id-missing")),
                black_box(Some("sd-99")),
            )
        });
    });
}

criterion_group!(
    benches,
    bench_merge_mappings,
    bench_merge_configuration,
    bench_find_mapping
);
criterion_main!(benches);
