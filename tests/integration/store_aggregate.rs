use penumbra::storage::format::{NodeRecord, Record, RecordLoad};
use penumbra::storage::{StoreAggregate, StoreOptions, StoreState, StoreType, STORE_VERSION};
use penumbra::PenumbraError;
use tempfile::tempdir;

#[test]
fn stores_open_lazily_with_their_dependencies() {
    let dir = tempdir().unwrap();
    let stores = StoreAggregate::open(dir.path(), StoreOptions::default(), true).unwrap();
    assert!(stores.opened_stores().is_empty());

    stores.node_store().unwrap();
    assert_eq!(stores.opened_stores(), vec![StoreType::NodeLabels, StoreType::Node]);

    stores.label_token_store().unwrap();
    stores.node_store().unwrap();
    assert_eq!(
        stores.opened_stores(),
        vec![
            StoreType::NodeLabels,
            StoreType::Node,
            StoreType::LabelTokenName,
            StoreType::LabelToken,
        ]
    );

    stores.open_all().unwrap();
    let opened = stores.opened_stores();
    assert_eq!(opened.len(), StoreType::ALL.len());
    for ty in StoreType::ALL {
        assert!(dir.path().join(ty.file_name()).exists(), "{ty}");
        let pos = opened.iter().position(|t| *t == ty).unwrap();
        for dep in ty.dependencies() {
            assert!(opened.iter().position(|t| t == dep).unwrap() < pos);
        }
    }
    stores.verify_store_ok().unwrap();
    stores.close().unwrap();
    assert!(stores.opened_stores().is_empty());
}

#[test]
fn data_survives_close_and_reopen() {
    let dir = tempdir().unwrap();
    let (node_id, person) = {
        let stores = StoreAggregate::open(dir.path(), StoreOptions::default(), true).unwrap();
        let labels = stores.label_token_store().unwrap();
        let person = labels.create_token("Person").unwrap();
        labels.create_token("Employee").unwrap();

        let nodes = stores.node_store().unwrap();
        let mut node = NodeRecord::new(nodes.store().next_id().unwrap());
        node.set_created();
        nodes.set_labels(&mut node, &[person]).unwrap();
        nodes.update_record(&node).unwrap();

        let meta = stores.meta_data_store().unwrap();
        meta.set_last_committed_transaction_id(42).unwrap();
        stores.close().unwrap();
        (node.id, person)
    };

    let stores = StoreAggregate::open(dir.path(), StoreOptions::default(), false).unwrap();
    let labels = stores.label_token_store().unwrap();
    let names: Vec<String> = labels.all_tokens().unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["Person", "Employee"]);
    assert_eq!(labels.token_id("Employee").unwrap(), Some(person + 1));

    let nodes = stores.node_store().unwrap();
    let node = nodes.get_record(node_id, RecordLoad::Normal).unwrap();
    assert_eq!(nodes.labels(&node).unwrap(), vec![person]);

    let meta = stores.meta_data_store().unwrap();
    assert_eq!(meta.last_committed_transaction_id().unwrap(), 42);
    assert_eq!(meta.store_version().unwrap(), STORE_VERSION);
    stores.verify_store_ok().unwrap();
}

#[test]
fn make_store_ok_cascades_after_a_crash() {
    let dir = tempdir().unwrap();
    {
        let stores = StoreAggregate::open(dir.path(), StoreOptions::default(), true).unwrap();
        stores.open_all().unwrap();
        let keys = stores.property_key_token_store().unwrap();
        keys.create_token("name").unwrap();
        keys.create_token("age").unwrap();
        stores.flush().unwrap();
    }

    let stores = StoreAggregate::open(dir.path(), StoreOptions::default(), false).unwrap();
    stores.open_all().unwrap();
    assert_eq!(stores.not_ok_stores().len(), StoreType::ALL.len());
    assert!(matches!(
        stores.verify_store_ok(),
        Err(PenumbraError::UnderlyingStorage(_))
    ));
    let keys = stores.property_key_token_store().unwrap();
    assert_eq!(keys.store().state(), StoreState::OpenNotOk);
    assert!(matches!(keys.create_token("again"), Err(PenumbraError::IllegalState(_))));

    stores.make_store_ok().unwrap();
    assert!(stores.not_ok_stores().is_empty());
    stores.verify_store_ok().unwrap();
    assert_eq!(keys.create_token("again").unwrap(), 2);
    assert_eq!(keys.get_token(1).unwrap().name, "age");
    stores.close().unwrap();
}

#[test]
fn schema_store_uses_64_byte_blocks() {
    let dir = tempdir().unwrap();
    let stores = StoreAggregate::open(dir.path(), StoreOptions::default(), true).unwrap();
    let schema = stores.schema_store().unwrap();
    assert_eq!(schema.block_data_size(), 56);
    assert_eq!(schema.store().record_size(), 64);
    let rule: Vec<u8> = (0..150u8).collect();
    let chain = schema.store_bytes(&rule, Vec::new()).unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(schema.get_bytes(chain[0].id).unwrap(), rule);
}

#[test]
fn options_from_toml_shape_the_stores() {
    let options = StoreOptions::from_toml_str(
        "page_size = 4096\nstring_block_size = 56\ndense_node_threshold = 10\n",
    )
    .unwrap();
    let dir = tempdir().unwrap();
    let stores = StoreAggregate::open(dir.path(), options, true).unwrap();
    assert_eq!(stores.page_cache().page_size(), 4096);
    let props = stores.property_store().unwrap();
    assert_eq!(props.string_store().block_data_size(), 56);
    let groups = stores.relationship_group_store().unwrap();
    assert_eq!(groups.store_header_int(), Some(10));
}

#[test]
fn missing_directory_is_not_created_without_create() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("db");
    assert!(matches!(
        StoreAggregate::open(&missing, StoreOptions::default(), false),
        Err(PenumbraError::StoreNotFound(_))
    ));
    let stores = StoreAggregate::open(&missing, StoreOptions::default(), true).unwrap();
    assert_eq!(stores.directory(), missing.as_path());
    assert!(matches!(
        StoreAggregate::open(dir.path(), StoreOptions::default().page_size(16), true),
        Err(PenumbraError::Invalid(_))
    ));
}
