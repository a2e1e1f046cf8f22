#![forbid(unsafe_code)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use penumbra::storage::format::{PropertyRecord, Record, RecordLoad};
use penumbra::storage::values::short_string;
use penumbra::storage::{PropertyStore, StoreAggregate, StoreOptions, Value};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

const RECORD_COUNT: u64 = 8_192;

fn micro_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/records");
    group.sample_size(40);
    let mut harness = RecordHarness::new(RECORD_COUNT);

    group.throughput(Throughput::Elements(1));
    group.bench_function("property_get_record", |b| {
        b.iter(|| black_box(harness.random_read()));
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("long_string_decode", |b| {
        b.iter(|| black_box(harness.long_string()));
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("short_string_encode", |b| {
        b.iter(|| black_box(short_string::encode(1, black_box("hello_world"))));
    });

    group.finish();
}

struct RecordHarness {
    _tmpdir: TempDir,
    _stores: StoreAggregate,
    props: Arc<PropertyStore>,
    long_string_record: PropertyRecord,
    rng: ChaCha8Rng,
}

impl RecordHarness {
    fn new(count: u64) -> Self {
        let tmpdir = tempfile::tempdir().expect("tmpdir");
        let stores = StoreAggregate::open(tmpdir.path(), StoreOptions::default(), true).expect("stores");
        let props = stores.property_store().expect("property store");
        for i in 0..count {
            let mut record = PropertyRecord::new(props.store().next_id().expect("id"));
            record.set_created();
            props
                .set_property(&mut record, 1, &Value::Long(i as i64))
                .expect("set");
            props.update_record(&record).expect("write");
        }
        let mut long_string_record = PropertyRecord::new(props.store().next_id().expect("id"));
        long_string_record.set_created();
        let text = "penumbra ".repeat(64);
        props
            .set_property(&mut long_string_record, 2, &Value::from(text.as_str()))
            .expect("set");
        props.update_record(&long_string_record).expect("write");
        Self {
            _tmpdir: tmpdir,
            _stores: stores,
            props,
            long_string_record,
            rng: ChaCha8Rng::seed_from_u64(0xC0FFEE),
        }
    }

    fn random_read(&mut self) -> PropertyRecord {
        let id = self.rng.gen_range(0..RECORD_COUNT);
        self.props.get_record(id, RecordLoad::Normal).expect("read")
    }

    fn long_string(&self) -> Option<Value> {
        self.props
            .get_property(&self.long_string_record, 2)
            .expect("decode")
    }
}

criterion_group!(benches, micro_records);
criterion_main!(benches);
