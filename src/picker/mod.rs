//! Storage-node picker: a periodically-refreshed, per-datacenter inventory
//! of storage nodes and the selection algorithm that carves out replica
//! tuples for new object writes. The inventory is a pointer-switched
//! snapshot — readers never see a partially-built map, and the refresh
//! task is the sole writer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::metadata::MetadataClient;
use crate::model::{SharkRef, StorageNode};

type Inventory = HashMap<String, Vec<StorageNode>>;

pub struct Picker {
    inventory: RwLock<Inventory>,
    cursor: AtomicUsize,
    utilization_ceiling: u32,
    staleness_secs: i64,
    ignore_size: bool,
    multi_dc: bool,
}

impl Picker {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            inventory: RwLock::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
            utilization_ceiling: config.picker_utilization_ceiling,
            staleness_secs: config.picker_staleness_secs,
            ignore_size: config.picker_ignore_size,
            multi_dc: config.picker_multi_dc,
        }
    }

    /// Spawns the periodic refresh loop. Never returns; intended to be run
    /// as a detached background task from `main`.
    pub async fn run_refresh_loop(
        self: std::sync::Arc<Self>,
        metadata: std::sync::Arc<dyn MetadataClient>,
        interval: Duration,
    ) {
        loop {
            if let Err(err) = self.refresh_once(&metadata).await {
                warn!(error = %err, "picker refresh failed; retaining previous inventory");
            }
            sleep(interval).await;
        }
    }

    async fn refresh_once(&self, metadata: &std::sync::Arc<dyn MetadataClient>) -> AppResult<()> {
        let nodes = fetch_storage_nodes(metadata, self.utilization_ceiling, self.staleness_secs).await?;

        if nodes.is_empty() {
            warn!("picker refresh returned zero eligible storage nodes; keeping previous topology");
            return Ok(());
        }

        let mut by_dc: Inventory = HashMap::new();
        for node in nodes {
            by_dc.entry(node.datacenter.clone()).or_default().push(node);
        }
        for list in by_dc.values_mut() {
            list.sort_by_key(|n| n.available_mb);
        }

        let dc_count = by_dc.len();
        *self.inventory.write().unwrap() = by_dc;
        info!(datacenters = dc_count, "picker topology refreshed");
        Ok(())
    }

    /// Seeds the inventory directly, bypassing the metadata service.
    /// Used by tests and by the initial startup refresh's error path.
    pub fn set_inventory_for_test(&self, inventory: Inventory) {
        *self.inventory.write().unwrap() = inventory;
    }

    /// Selects up to three replica tuples (primary + two backups), each of
    /// `replicas` shark references, satisfying the size and cross-DC
    /// diversity constraints.
    pub fn choose(&self, size_bytes: u64, replicas: u32) -> AppResult<Vec<Vec<SharkRef>>> {
        let inventory = self.inventory.read().unwrap();
        if inventory.is_empty() {
            return Err(AppError::NotEnoughSpace);
        }

        let size_mb = if self.ignore_size {
            1
        } else {
            (size_bytes + 1_048_575) / 1_048_576
        };

        let mut eligible: Vec<(&String, usize)> = inventory
            .iter()
            .filter_map(|(dc, nodes)| lower_bound_by_size(nodes, size_mb).map(|idx| (dc, idx)))
            .collect();

        if self.multi_dc && eligible.len() < 2 {
            return Err(AppError::NotEnoughSpace);
        }
        if replicas > 1 && eligible.iter().any(|(dc, _)| inventory[*dc].is_empty()) {
            return Err(AppError::NotEnoughSpace);
        }

        let mut rng = rand::thread_rng();
        eligible.shuffle(&mut rng);

        let mut tuples = Vec::new();
        for _ in 0..3 {
            let tuple = self.choose_one_tuple(&inventory, &eligible, replicas, &mut rng);
            match tuple {
                Some(t) => {
                    if self.multi_dc && replicas > 1 {
                        let distinct: std::collections::HashSet<&str> =
                            t.iter().map(|s| s.datacenter.as_str()).collect();
                        if distinct.len() < 2 {
                            return Err(AppError::NotEnoughSpace);
                        }
                    }
                    tuples.push(t);
                }
                None => continue,
            }
        }

        if tuples.is_empty() {
            return Err(AppError::NotEnoughSpace);
        }

        Ok(tuples)
    }

    fn choose_one_tuple(
        &self,
        inventory: &Inventory,
        eligible: &[(&String, usize)],
        replicas: u32,
        rng: &mut impl Rng,
    ) -> Option<Vec<SharkRef>> {
        if eligible.is_empty() {
            return None;
        }

        let mut seen = std::collections::HashSet::new();
        let mut picks = Vec::new();

        for i in 0..replicas {
            let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
            let (dc, lower_bound) = eligible[(cursor + i as usize) % eligible.len()];
            let nodes = &inventory[dc];
            if lower_bound >= nodes.len() {
                return None;
            }
            let candidate = pick_unseen(nodes, lower_bound, &seen, rng)?;
            seen.insert(candidate.manta_storage_id.clone());
            picks.push(SharkRef::from(candidate));
        }

        Some(picks)
    }
}

fn pick_unseen<'a>(
    nodes: &'a [StorageNode],
    lower_bound: usize,
    seen: &std::collections::HashSet<String>,
    rng: &mut impl Rng,
) -> Option<&'a StorageNode> {
    let range_len = nodes.len() - lower_bound;
    let start = lower_bound + rng.gen_range(0..range_len);
    for offset in 0..range_len {
        let idx = lower_bound + (start - lower_bound + offset) % range_len;
        if !seen.contains(&nodes[idx].manta_storage_id) {
            return Some(&nodes[idx]);
        }
    }
    None
}

/// Binary-search lower bound: the first index whose `available_mb` is
/// `>= size_mb`. `None` if no node in the datacenter qualifies.
fn lower_bound_by_size(nodes: &[StorageNode], size_mb: u64) -> Option<usize> {
    if nodes.is_empty() {
        return None;
    }
    let idx = nodes.partition_point(|n| n.available_mb < size_mb);
    if idx == nodes.len() {
        None
    } else {
        Some(idx)
    }
}

/// Drains the metadata service's storage-node listing: records with
/// `percentUsed <= utilization_ceiling` and `timestamp >= now - staleness_secs`,
/// paged by ascending `_id` cursor until the service reports no further page.
async fn fetch_storage_nodes(
    metadata: &std::sync::Arc<dyn MetadataClient>,
    utilization_ceiling: u32,
    staleness_secs: i64,
) -> AppResult<Vec<StorageNode>> {
    let min_timestamp = Utc::now().timestamp() - staleness_secs;
    let mut nodes = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = metadata
            .find_storage_nodes(utilization_ceiling, min_timestamp, cursor.as_deref())
            .await?;
        nodes.extend(page.nodes);
        cursor = page.next_id;
        if cursor.is_none() {
            break;
        }
    }

    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectMetadata, StorageNodePage};
    use crate::mpu::UploadRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// A `MetadataClient` whose `find_storage_nodes` replays pre-built pages
    /// in order, one per call, to exercise `fetch_storage_nodes`'s cursor loop.
    struct PagedStorageNodeMetadata {
        pages: Mutex<Vec<StorageNodePage>>,
    }

    #[async_trait]
    impl MetadataClient for PagedStorageNodeMetadata {
        async fn get_object(&self, _path: &str) -> AppResult<ObjectMetadata> {
            unimplemented!()
        }
        async fn put_object(&self, _path: &str, _metadata: ObjectMetadata) -> AppResult<()> {
            unimplemented!()
        }
        async fn delete_object(&self, _path: &str) -> AppResult<()> {
            unimplemented!()
        }
        async fn get_upload(&self, _id: uuid::Uuid) -> AppResult<UploadRecord> {
            unimplemented!()
        }
        async fn put_upload(&self, _record: &UploadRecord) -> AppResult<()> {
            unimplemented!()
        }
        async fn find_storage_nodes(
            &self,
            _max_percent_used: u32,
            _min_timestamp: i64,
            _cursor: Option<&str>,
        ) -> AppResult<StorageNodePage> {
            Ok(self.pages.lock().unwrap().remove(0))
        }
    }

    #[tokio::test]
    async fn fetch_storage_nodes_drains_every_page() {
        let metadata: std::sync::Arc<dyn MetadataClient> = std::sync::Arc::new(PagedStorageNodeMetadata {
            pages: Mutex::new(vec![
                StorageNodePage {
                    nodes: vec![node("dc1", "a", 100)],
                    next_id: Some("cursor-1".into()),
                },
                StorageNodePage {
                    nodes: vec![node("dc1", "b", 200)],
                    next_id: None,
                },
            ]),
        });

        let nodes = fetch_storage_nodes(&metadata, 90, 3600).await.unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].manta_storage_id, "a");
        assert_eq!(nodes[1].manta_storage_id, "b");
    }

    fn node(dc: &str, id: &str, available_mb: u64) -> StorageNode {
        StorageNode {
            datacenter: dc.to_string(),
            manta_storage_id: id.to_string(),
            available_mb,
            percent_used: 10,
            timestamp: 0,
        }
    }

    fn picker_with(inventory: Inventory, multi_dc: bool) -> Picker {
        let picker = Picker {
            inventory: RwLock::new(HashMap::new()),
            cursor: AtomicUsize::new(0),
            utilization_ceiling: 90,
            staleness_secs: 3600,
            ignore_size: false,
            multi_dc,
        };
        picker.set_inventory_for_test(inventory);
        picker
    }

    #[test]
    fn lower_bound_finds_first_node_at_or_above_size() {
        let nodes = vec![node("us-east", "a", 100), node("us-east", "b", 500), node("us-east", "c", 1000)];
        assert_eq!(lower_bound_by_size(&nodes, 400), Some(1));
        assert_eq!(lower_bound_by_size(&nodes, 1001), None);
        assert_eq!(lower_bound_by_size(&nodes, 0), Some(0));
    }

    #[test]
    fn choose_enforces_cross_dc_diversity_for_multi_replica() {
        let mut inventory = Inventory::new();
        inventory.insert("dc1".into(), vec![node("dc1", "dc1-a", 1000), node("dc1", "dc1-b", 1000)]);
        inventory.insert("dc2".into(), vec![node("dc2", "dc2-a", 1000), node("dc2", "dc2-b", 1000)]);
        let picker = picker_with(inventory, true);

        let tuples = picker.choose(1024 * 1024, 2).expect("should find tuples");
        for tuple in &tuples {
            let distinct: std::collections::HashSet<&str> =
                tuple.iter().map(|s| s.datacenter.as_str()).collect();
            assert!(distinct.len() >= 2, "tuple must span >=2 datacenters: {tuple:?}");
        }
    }

    #[test]
    fn choose_fails_with_not_enough_space_when_single_dc_and_multi_dc_required() {
        let mut inventory = Inventory::new();
        inventory.insert("dc1".into(), vec![node("dc1", "dc1-a", 1000)]);
        let picker = picker_with(inventory, true);
        let err = picker.choose(1024, 2).unwrap_err();
        assert!(matches!(err, AppError::NotEnoughSpace));
    }

    #[test]
    fn choose_rounds_size_up_to_the_next_whole_megabyte() {
        let mut inventory = Inventory::new();
        inventory.insert("dc1".into(), vec![node("dc1", "exactly-one", 1)]);
        let picker = picker_with(inventory, false);
        // One byte over a megabyte must round up to 2MB required, which the
        // single 1MB node cannot satisfy.
        let err = picker.choose(1_048_577, 1).unwrap_err();
        assert!(matches!(err, AppError::NotEnoughSpace));
    }

    #[test]
    fn ignore_size_treats_requirement_as_one_megabyte() {
        let mut inventory = Inventory::new();
        inventory.insert("dc1".into(), vec![node("dc1", "tiny", 1)]);
        let mut picker = picker_with(inventory, false);
        picker.ignore_size = true;
        // A huge request would ordinarily need far more than 1MB available;
        // ignore_size caps the requirement at 1MB regardless.
        let tuples = picker.choose(10 * 1024 * 1024 * 1024, 1).expect("should find tuples");
        assert_eq!(tuples[0][0].manta_storage_id, "tiny");
    }

    #[test]
    fn choose_respects_size_lower_bound() {
        let mut inventory = Inventory::new();
        inventory.insert("dc1".into(), vec![node("dc1", "small", 10), node("dc1", "big", 100_000)]);
        inventory.insert("dc2".into(), vec![node("dc2", "small2", 10), node("dc2", "big2", 100_000)]);
        let picker = picker_with(inventory, true);

        let too_big = 200_000 * 1024 * 1024;
        let err = picker.choose(too_big, 1).unwrap_err();
        assert!(matches!(err, AppError::NotEnoughSpace));
    }
}
