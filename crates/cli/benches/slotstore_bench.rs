use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use schema::SlotValueType;
use slotstore::SlotStore;

const N_PARTITIONS: u64 = 10_000;
const VALUE_SIZE: usize = 100;

fn build_store() -> SlotStore {
    let mut store = SlotStore::new();
    for h in 0..N_PARTITIONS {
        store.get_or_create_partition(h, h.to_le_bytes().to_vec(), false);
        store.create_slot(h, b"", SlotValueType::SchemaInstance, &vec![b'x'; VALUE_SIZE]);
    }
    store
}

fn slotstore_write_benchmark(c: &mut Criterion) {
    c.bench_function("slotstore_write_10k_partitions", |b| {
        b.iter_batched(
            SlotStore::new,
            |mut store| {
                for h in 0..N_PARTITIONS {
                    store.get_or_create_partition(h, h.to_le_bytes().to_vec(), false);
                    store.create_slot(h, b"", SlotValueType::SchemaInstance, &vec![b'x'; VALUE_SIZE]);
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn slotstore_find_hit_benchmark(c: &mut Criterion) {
    c.bench_function("slotstore_find_hit_10k", |b| {
        b.iter_batched(
            build_store,
            |store| {
                for h in 0..N_PARTITIONS {
                    let slot = store.find_slot(h, b"");
                    assert!(slot.is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn slotstore_find_miss_benchmark(c: &mut Criterion) {
    c.bench_function("slotstore_find_miss_10k", |b| {
        b.iter_batched(
            build_store,
            |store| {
                for h in N_PARTITIONS..(2 * N_PARTITIONS) {
                    let slot = store.find_slot(h, b"");
                    assert!(slot.is_none());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(benches, slotstore_write_benchmark, slotstore_find_hit_benchmark, slotstore_find_miss_benchmark);
criterion_main!(benches);
