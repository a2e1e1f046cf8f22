use std::sync::Arc;

use penumbra::storage::format::{PropertyRecord, Record, RecordLoad};
use penumbra::storage::values::property_type::{calculate_number_of_blocks_used, encode_primitive};
use penumbra::storage::values::short_string::{self, Encoding};
use penumbra::storage::values::{ArrayValue, Crs, PointValue, TemporalValue, TimeZone};
use penumbra::storage::{FormatCapabilities, PropertyStore, PropertyType, StoreAggregate, StoreOptions, Value};
use penumbra::PenumbraError;
use tempfile::{tempdir, TempDir};

fn property_store(options: StoreOptions) -> (TempDir, StoreAggregate, Arc<PropertyStore>) {
    let dir = tempdir().unwrap();
    let stores = StoreAggregate::open(dir.path(), options, true).unwrap();
    let props = stores.property_store().unwrap();
    (dir, stores, props)
}

/// Stores `value` alone in a fresh record and reads it back from disk.
fn store_and_reload(props: &PropertyStore, key: u32, value: &Value) -> PropertyRecord {
    let mut record = PropertyRecord::new(props.store().next_id().unwrap());
    record.set_created();
    props.set_property(&mut record, key, value).unwrap();
    props.update_record(&record).unwrap();
    props.get_record(record.id, RecordLoad::Normal).unwrap()
}

#[test]
fn hello_world_packs_into_the_lower_table() {
    let words = short_string::encode(3, "hello_world").unwrap();
    assert_eq!(short_string::encoding_id(words[0]), Encoding::Lower.id());
    assert_eq!(calculate_number_of_blocks_used(words[0]), words.len() as i32);
    assert_eq!(short_string::decode(&words).as_deref(), Some("hello_world"));

    let (_dir, _stores, props) = property_store(StoreOptions::default());
    let record = store_and_reload(&props, 3, &Value::from("hello_world"));
    let block = record.block(3).unwrap();
    assert_eq!(block.property_type(), Some(PropertyType::ShortString));
    assert_eq!(props.get_property(&record, 3).unwrap(), Some(Value::from("hello_world")));
}

#[test]
fn small_longs_stay_inline_large_ones_take_a_second_word() {
    let small = encode_primitive(1, &Value::Long(100)).unwrap();
    assert_eq!(small.len(), 1);
    assert_ne!(small[0] & (1 << 28), 0);

    let large = encode_primitive(1, &Value::Long(1 << 40)).unwrap();
    assert_eq!(large.len(), 2);
    assert_eq!(large[0] & (1 << 28), 0);
    assert_eq!(calculate_number_of_blocks_used(large[0]), 2);

    let negative = encode_primitive(1, &Value::Long(-1)).unwrap();
    assert_eq!(negative.len(), 2);
}

#[test]
fn every_kind_of_value_survives_the_disk() {
    let (_dir, _stores, props) = property_store(StoreOptions::default());
    let values = vec![
        Value::Bool(true),
        Value::Byte(-3),
        Value::Short(-30_000),
        Value::Char('ß'),
        Value::Int(i32::MIN),
        Value::Long(100),
        Value::Long(1 << 40),
        Value::Long(i64::MIN),
        Value::Float(1.5),
        Value::Double(-2.25e300),
        Value::from(""),
        Value::from("0123456789"),
        Value::from("a longer string that certainly will not fit in four words of a record"),
        Value::from("ünïcödé is stored as utf-8 when no table fits it at all, even spilled"),
        Value::Array(ArrayValue::Bool(vec![true, false, true])),
        Value::Array(ArrayValue::Int(vec![1, 2, 3, -4])),
        Value::Array(ArrayValue::Byte(vec![-1; 200])),
        Value::Array(ArrayValue::Long((0..100).map(|i| i * 1_000_000_007).collect())),
        Value::Array(ArrayValue::String(vec!["a".into(), "bb".into(), "ccc".into()])),
        Value::Point(PointValue::new(Crs::WGS84, [12.5, 56.25])),
        Value::Point(PointValue::new(Crs::CARTESIAN_3D, [1.0, -2.0, 3.5])),
        Value::Temporal(TemporalValue::Date { epoch_day: 19_000 }),
        Value::Temporal(TemporalValue::DateTime {
            epoch_second: 1_700_000_000,
            nano: 42,
            zone: TimeZone::Named(311),
        }),
        Value::Temporal(TemporalValue::Duration {
            months: 14,
            days: -3,
            seconds: 3_600,
            nanos: 5,
        }),
    ];
    for (key, value) in values.iter().enumerate() {
        let key = key as u32 + 1;
        let record = store_and_reload(&props, key, value);
        let block = record.block(key).unwrap();
        assert_eq!(
            calculate_number_of_blocks_used(block.value_blocks[0]),
            block.size_in_words() as i32,
            "{value:?}"
        );
        assert_eq!(props.get_property(&record, key).unwrap().as_ref(), Some(value));
    }
}

#[test]
fn long_strings_spill_into_the_string_store() {
    let (_dir, _stores, props) = property_store(StoreOptions::default());
    let text = "x".repeat(500);
    let mut record = store_and_reload(&props, 9, &Value::from(text.as_str()));
    assert_eq!(record.block(9).unwrap().property_type(), Some(PropertyType::String));
    assert!(record.block(9).unwrap().is_light());

    props.ensure_heavy(&mut record).unwrap();
    let chain = &record.block(9).unwrap().value_records;
    assert_eq!(chain.len(), 5);
    assert!(chain.iter().all(|r| r.kind == Some(PropertyType::String)));
    assert_eq!(props.get_property(&record, 9).unwrap(), Some(Value::String(text)));
}

#[test]
fn records_hold_several_small_values() {
    let (_dir, _stores, props) = property_store(StoreOptions::default());
    let mut record = PropertyRecord::new(props.store().next_id().unwrap());
    record.set_created();
    props.set_property(&mut record, 1, &Value::Int(7)).unwrap();
    props.set_property(&mut record, 2, &Value::Bool(false)).unwrap();
    props.set_property(&mut record, 3, &Value::Double(0.5)).unwrap();
    assert_eq!(record.used_words(), 4);
    assert!(matches!(
        props.set_property(&mut record, 4, &Value::Int(1)),
        Err(PenumbraError::Invalid(_))
    ));
    props.update_record(&record).unwrap();

    let read = props.get_record(record.id, RecordLoad::Normal).unwrap();
    assert_eq!(read.blocks.len(), 3);
    assert_eq!(props.get_property(&read, 3).unwrap(), Some(Value::Double(0.5)));
    assert_eq!(props.get_property(&read, 4).unwrap(), None);
}

#[test]
fn property_chains_are_followed() {
    let (_dir, _stores, props) = property_store(StoreOptions::default());
    let ids: Vec<u64> = (0..3).map(|_| props.store().next_id().unwrap()).collect();
    for (i, &id) in ids.iter().enumerate() {
        let mut record = PropertyRecord::new(id);
        record.set_created();
        record.prev_prop = i.checked_sub(1).map(|p| ids[p]);
        record.next_prop = ids.get(i + 1).copied();
        props.set_property(&mut record, i as u32, &Value::Int(i as i32)).unwrap();
        props.update_record(&record).unwrap();
    }
    let chain = props.get_property_chain(ids[0]).unwrap();
    let keys: Vec<u32> = chain.iter().map(|r| r.blocks[0].key_index_id()).collect();
    assert_eq!(keys, vec![0, 1, 2]);
}

#[test]
fn formats_without_points_or_temporal_refuse_them() {
    let options = StoreOptions::default().format(FormatCapabilities {
        points: false,
        temporal: false,
    });
    let (_dir, _stores, props) = property_store(options);
    let mut record = PropertyRecord::new(props.store().next_id().unwrap());
    let point = Value::Point(PointValue::new(Crs::CARTESIAN, [0.0, 1.0]));
    assert!(matches!(
        props.set_property(&mut record, 1, &point),
        Err(PenumbraError::UnsupportedFormatCapability(_))
    ));
    let date = Value::Temporal(TemporalValue::Date { epoch_day: 1 });
    assert!(matches!(
        props.set_property(&mut record, 1, &date),
        Err(PenumbraError::UnsupportedFormatCapability(_))
    ));
    assert!(matches!(
        props.set_property(&mut record, 1, &Value::Char('😀')),
        Err(PenumbraError::Invalid(_))
    ));
    assert!(record.blocks.is_empty());
}
