#![forbid(unsafe_code)]
//! Node records together with their dynamic label blocks.

use std::path::Path;
use std::sync::Arc;

use super::dynamic::DynamicStore;
use super::format::{NodeRecord, NodeRecordFormat, RecordLoad};
use super::labels;
use super::options::StoreOptions;
use super::store::RecordStore;
use crate::primitives::idgen::IdType;
use crate::primitives::pager::PageCache;
use crate::types::Result;

/// Node store backed by a label block store for nodes with many labels.
pub struct NodeStore {
    store: RecordStore<NodeRecordFormat>,
    labels: Arc<DynamicStore>,
}

impl NodeStore {
    /// Opens the node store at `path` on top of an opened label block store.
    pub fn open(
        cache: &Arc<PageCache>,
        path: impl AsRef<Path>,
        labels: Arc<DynamicStore>,
        options: &StoreOptions,
        create: bool,
    ) -> Result<Self> {
        let store = RecordStore::open(cache, path, IdType::Node, NodeRecordFormat, options, create)?;
        Ok(Self { store, labels })
    }

    /// Underlying record store.
    pub fn store(&self) -> &RecordStore<NodeRecordFormat> {
        &self.store
    }

    /// Block store holding label sets that do not fit inline.
    pub fn label_store(&self) -> &Arc<DynamicStore> {
        &self.labels
    }

    /// Loads node `id`.
    pub fn get_record(&self, id: u64, mode: RecordLoad) -> Result<NodeRecord> {
        self.store.get_record(id, mode)
    }

    /// Loads the dynamic label blocks of `node`, if its labels live there.
    pub fn ensure_heavy(&self, node: &mut NodeRecord) -> Result<()> {
        if labels::is_dynamic(node.label_field) && node.dynamic_label_records.is_empty() {
            node.dynamic_label_records = self
                .labels
                .get_records(labels::first_dynamic_record(node.label_field), true)?;
        }
        self.labels.ensure_heavy_all(&mut node.dynamic_label_records)
    }

    /// Writes the changed label blocks of `node`, then the node. Deleting a
    /// node releases its whole label chain, loaded or not.
    pub fn update_record(&self, node: &NodeRecord) -> Result<()> {
        if node.in_use {
            for record in node.dynamic_label_records.iter().filter(|r| !r.light || !r.in_use) {
                self.labels.store().update_record(record)?;
            }
        } else if !node.dynamic_label_records.is_empty() {
            for record in &node.dynamic_label_records {
                let mut unused = record.clone();
                unused.in_use = false;
                self.labels.store().update_record(&unused)?;
            }
        } else if labels::is_dynamic(node.label_field) {
            let chain = self
                .labels
                .get_records(labels::first_dynamic_record(node.label_field), false)?;
            self.labels.delete_chain(&chain)?;
        }
        self.store.update_record(node)
    }

    /// Labels of `node`.
    pub fn labels(&self, node: &NodeRecord) -> Result<Vec<u32>> {
        labels::parse_labels(node, &self.labels)
    }

    /// Replaces the labels of `node` in memory; see [`labels::put_labels`].
    pub fn set_labels(&self, node: &mut NodeRecord, new_labels: &[u32]) -> Result<()> {
        labels::put_labels(node, new_labels, &self.labels)
    }

    /// Adds `label` to `node` in memory.
    pub fn add_label(&self, node: &mut NodeRecord, label: u32) -> Result<bool> {
        labels::add_label(node, label, &self.labels)
    }

    /// Removes `label` from `node` in memory.
    pub fn remove_label(&self, node: &mut NodeRecord, label: u32) -> Result<bool> {
        labels::remove_label(node, label, &self.labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::format::Record;
    use tempfile::tempdir;

    fn open(dir: &Path) -> NodeStore {
        let options = StoreOptions::default().page_size(1024).label_block_size(16);
        let cache = Arc::new(PageCache::new(options.page_size));
        let labels = DynamicStore::open(
            &cache,
            dir.join("labels"),
            IdType::NodeLabels,
            "node labels",
            options.label_block_size,
            &options,
            true,
        )
        .unwrap();
        NodeStore::open(&cache, dir.join("nodes"), Arc::new(labels), &options, true).unwrap()
    }

    fn new_node(store: &NodeStore) -> NodeRecord {
        let mut node = NodeRecord::new(store.store().next_id().unwrap());
        node.set_created();
        node
    }

    #[test]
    fn labels_move_between_inline_and_dynamic() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let mut node = new_node(&store);
        store.set_labels(&mut node, &[3, 1, 2]).unwrap();
        assert!(!labels::is_dynamic(node.label_field));
        store.update_record(&node).unwrap();

        let many: Vec<u32> = (0..12).map(|i| i * 1000).collect();
        let mut node = store.get_record(node.id, RecordLoad::Normal).unwrap();
        store.set_labels(&mut node, &many).unwrap();
        assert!(labels::is_dynamic(node.label_field));
        store.update_record(&node).unwrap();

        let mut node = store.get_record(node.id, RecordLoad::Normal).unwrap();
        assert_eq!(store.labels(&node).unwrap(), many);
        let chain_start = labels::first_dynamic_record(node.label_field);

        store.set_labels(&mut node, &[5]).unwrap();
        assert!(node.dynamic_label_records.iter().all(|r| !r.in_use));
        store.update_record(&node).unwrap();
        assert!(!store.label_store().store().is_in_use(chain_start).unwrap());
        let node = store.get_record(node.id, RecordLoad::Normal).unwrap();
        assert_eq!(store.labels(&node).unwrap(), vec![5]);
    }

    #[test]
    fn deleting_a_node_releases_its_label_chain() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let many: Vec<u32> = (0..12).map(|i| i * 1000).collect();
        let mut ids = Vec::new();
        for _ in 0..2 {
            let mut node = new_node(&store);
            store.set_labels(&mut node, &many).unwrap();
            store.update_record(&node).unwrap();
            ids.push(node.id);
        }

        let mut heavy = store.get_record(ids[0], RecordLoad::Normal).unwrap();
        store.ensure_heavy(&mut heavy).unwrap();
        let heavy_chain: Vec<u64> = heavy.dynamic_label_records.iter().map(|r| r.id).collect();
        assert!(heavy_chain.len() > 1);
        heavy.in_use = false;
        store.update_record(&heavy).unwrap();

        let mut light = store.get_record(ids[1], RecordLoad::Normal).unwrap();
        let light_start = labels::first_dynamic_record(light.label_field);
        light.in_use = false;
        store.update_record(&light).unwrap();

        let label_store = store.label_store().store();
        for id in heavy_chain.iter().copied().chain([light_start]) {
            assert!(!label_store.is_in_use(id).unwrap(), "label block {id}");
        }
        for id in ids {
            assert!(!store.store().is_in_use(id).unwrap());
        }
    }

    #[test]
    fn add_and_remove_keep_labels_sorted() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let mut node = new_node(&store);
        assert!(store.add_label(&mut node, 9).unwrap());
        assert!(store.add_label(&mut node, 4).unwrap());
        assert!(!store.add_label(&mut node, 9).unwrap());
        assert_eq!(store.labels(&node).unwrap(), vec![4, 9]);
        assert!(store.remove_label(&mut node, 4).unwrap());
        assert!(!store.remove_label(&mut node, 4).unwrap());
        assert_eq!(store.labels(&node).unwrap(), vec![9]);
    }
}
