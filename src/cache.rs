//! Process-wide memoization of shard metadata.
//!
//! Shard tables and shard shapes are pure functions of `(global shape, grid, partition)`, and
//! real programs construct many arrays with the same layout. The [`LayoutCache`] memoizes both
//! under value identity of that triple, so repeated construction costs one lookup rather than a
//! full resolve. Entries are never evicted: the number of distinct layouts in a program is small
//! and bounded by its model code, not its data.
//!
//! Cached values are handed out as `Arc`s, so hits share one allocation across every array built
//! from the same layout.

use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::errors::ShardingError;
use crate::grid::{DeviceGrid, DeviceId};
use crate::layout::{shard_shape, ShardIndex};
use crate::partition::PartitionSpec;
use crate::replicas::{build_shard_table, DeviceShardTable};

/// Value-identity cache key: global shape, device grid, and partition assignment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct LayoutKey {
    global_shape: Vec<usize>,
    grid: DeviceGrid,
    spec: PartitionSpec,
}

impl LayoutKey {
    fn new(global_shape: &[usize], grid: &DeviceGrid, spec: &PartitionSpec) -> Self {
        Self { global_shape: global_shape.to_vec(), grid: grid.clone(), spec: spec.clone() }
    }
}

/// Concurrent, never-evicting cache of shard shapes and device shard tables.
///
/// Lookups that miss compute the value outside the map entry lock, so concurrent misses on the
/// same key may compute twice but only one result is kept.
#[derive(Debug, Default)]
pub struct LayoutCache {
    shard_shapes: DashMap<LayoutKey, Arc<Vec<usize>>>,
    shard_tables: DashMap<LayoutKey, Arc<DeviceShardTable>>,
}

impl LayoutCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the memoized shard shape for `(global_shape, grid, spec)`.
    pub fn shard_shape(
        &self,
        global_shape: &[usize],
        grid: &DeviceGrid,
        spec: &PartitionSpec,
    ) -> Result<Arc<Vec<usize>>, ShardingError> {
        let key = LayoutKey::new(global_shape, grid, spec);
        if let Some(shape) = self.shard_shapes.get(&key) {
            return Ok(Arc::clone(&shape));
        }
        tracing::debug!(?global_shape, "shard shape cache miss");
        let shape = Arc::new(shard_shape(global_shape, grid, spec)?);
        Ok(Arc::clone(self.shard_shapes.entry(key).or_insert(shape).value()))
    }

    /// Returns the memoized device shard table for `(global_shape, grid, spec)`.
    pub fn shard_table(
        &self,
        global_shape: &[usize],
        grid: &DeviceGrid,
        spec: &PartitionSpec,
    ) -> Result<Arc<DeviceShardTable>, ShardingError> {
        let key = LayoutKey::new(global_shape, grid, spec);
        if let Some(table) = self.shard_tables.get(&key) {
            return Ok(Arc::clone(&table));
        }
        tracing::debug!(?global_shape, "shard table cache miss");
        let table = Arc::new(build_shard_table(global_shape, grid, spec)?);
        Ok(Arc::clone(self.shard_tables.entry(key).or_insert(table).value()))
    }

    /// Returns the shard index for a single device, served from the memoized shard table.
    ///
    /// Returns `Ok(None)` if `device_id` is not in the grid.
    pub fn shard_index_for_device(
        &self,
        global_shape: &[usize],
        grid: &DeviceGrid,
        spec: &PartitionSpec,
        device_id: DeviceId,
    ) -> Result<Option<ShardIndex>, ShardingError> {
        let table = self.shard_table(global_shape, grid, spec)?;
        Ok(table.index_for_device(device_id).cloned())
    }

    /// Number of memoized shard tables. Exposed for diagnostics.
    pub fn table_count(&self) -> usize {
        self.shard_tables.len()
    }
}

/// Process-wide cache shared by all [`GlobalDeviceArray`][crate::array::GlobalDeviceArray]
/// construction paths.
pub fn global_layout_cache() -> &'static LayoutCache {
    static CACHE: OnceLock<LayoutCache> = OnceLock::new();
    CACHE.get_or_init(LayoutCache::new)
}
