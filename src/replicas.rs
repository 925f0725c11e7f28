//! Replica assignment over resolved shard indices.
//!
//! Several devices can own the same [`ShardIndex`] (replicas). Walking the resolved index
//! sequence in the grid's canonical flattened order, the first device holding a given index gets
//! replica id `0`, the next `1`, and so on, so replica ids for a shared index always form a
//! contiguous range starting at zero, identically on every process.
//!
//! The walk also counts distinct indices and cross-checks that count against the prediction
//! derived from the shard-shape calculator. A disagreement means the index resolver and the
//! shape calculator have diverged, which is a defect in this layer's collaborators rather than a
//! caller error, and is reported as the fatal
//! [`ShardingError::UniqueShardCountMismatch`][crate::errors::ShardingError::UniqueShardCountMismatch].

use std::collections::HashMap;

use crate::errors::ShardingError;
use crate::grid::{DeviceGrid, DeviceId, GridDevice};
use crate::layout::{resolve_shard_indices, shard_shape, ShardIndex};
use crate::partition::PartitionSpec;

/// Replica identifier. `0` marks the canonical (first) holder of a shard index.
pub type ReplicaId = usize;

/// One row of a [`DeviceShardTable`]: a device, the slice it owns, and its replica id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardTableEntry {
    device: GridDevice,
    index: ShardIndex,
    replica_id: ReplicaId,
}

impl ShardTableEntry {
    /// Device owning this table row.
    pub fn device(&self) -> GridDevice {
        self.device
    }

    /// Slice of the global array owned by this device.
    pub fn index(&self) -> &ShardIndex {
        &self.index
    }

    /// Replica id of this device among the holders of the same index.
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }
}

/// The full device-to-(index, replica id) table for one `(shape, grid, partition)` triple.
///
/// Covers every device in the grid, local and remote alike, in the grid's canonical flattened
/// order. This is the authoritative partition layout that every cooperating process computes
/// independently and identically.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceShardTable {
    entries: Vec<ShardTableEntry>,
    entry_index_by_device: HashMap<DeviceId, usize>,
    unique_shard_count: usize,
}

impl DeviceShardTable {
    /// Table rows in canonical flattened device order.
    pub fn entries(&self) -> &[ShardTableEntry] {
        self.entries.as_slice()
    }

    /// Returns the table row for `device_id`, if the device is in the grid.
    pub fn entry_for_device(&self, device_id: DeviceId) -> Option<&ShardTableEntry> {
        self.entry_index_by_device.get(&device_id).map(|entry_index| &self.entries[*entry_index])
    }

    /// Returns just the shard index for `device_id`, if the device is in the grid.
    pub fn index_for_device(&self, device_id: DeviceId) -> Option<&ShardIndex> {
        self.entry_for_device(device_id).map(ShardTableEntry::index)
    }

    /// Number of distinct shard indices across the whole grid.
    pub fn unique_shard_count(&self) -> usize {
        self.unique_shard_count
    }
}

/// Assigns replica ids to a resolved `(device, index)` sequence and validates the distinct-index
/// count against `expected_unique_shards`.
///
/// `devices` and `indices` must be equal-length and in the grid's canonical flattened order.
/// The resolved sequence is passed in explicitly so the consistency check can be exercised
/// independently of the resolver that produced it.
pub fn assign_replica_ids(
    devices: &[GridDevice],
    indices: &[ShardIndex],
    expected_unique_shards: usize,
) -> Result<DeviceShardTable, ShardingError> {
    if devices.len() != indices.len() {
        return Err(ShardingError::IndexSequenceLengthMismatch {
            expected_count: devices.len(),
            actual_count: indices.len(),
        });
    }

    let mut replica_counts: HashMap<&ShardIndex, ReplicaId> = HashMap::new();
    let mut entries = Vec::with_capacity(devices.len());
    let mut entry_index_by_device = HashMap::with_capacity(devices.len());

    for (entry_index, (device, index)) in devices.iter().copied().zip(indices.iter()).enumerate() {
        let replica_id = replica_counts.entry(index).or_insert(0);
        entry_index_by_device.insert(device.id(), entry_index);
        entries.push(ShardTableEntry { device, index: index.clone(), replica_id: *replica_id });
        *replica_id += 1;
    }

    let actual_unique_shards = replica_counts.len();
    if actual_unique_shards != expected_unique_shards {
        return Err(ShardingError::UniqueShardCountMismatch {
            expected_unique_shards,
            actual_unique_shards,
        });
    }

    Ok(DeviceShardTable { entries, entry_index_by_device, unique_shard_count: actual_unique_shards })
}

/// Builds the full [`DeviceShardTable`] for `(global_shape, grid, spec)`.
///
/// Resolves the per-device index sequence, derives the expected unique-shard count from the
/// shard-shape calculator, and runs replica assignment with the consistency check.
pub fn build_shard_table(
    global_shape: &[usize],
    grid: &DeviceGrid,
    spec: &PartitionSpec,
) -> Result<DeviceShardTable, ShardingError> {
    let indices = resolve_shard_indices(global_shape, grid, spec)?;
    let shape = shard_shape(global_shape, grid, spec)?;
    let expected = expected_unique_shards(global_shape, shape.as_slice());
    assign_replica_ids(grid.devices(), indices.as_slice(), expected)
}

/// Expected number of distinct shard indices: the product over axes of
/// `global_size / shard_size`, skipping axes where both are zero.
///
/// A zero-sized axis yields a zero-sized shard on every device and contributes no splitting
/// factor. Shard sizes are never zero for a non-zero global size because divisibility is
/// validated when shard shapes are computed.
pub(crate) fn expected_unique_shards(global_shape: &[usize], shard_shape: &[usize]) -> usize {
    global_shape
        .iter()
        .zip(shard_shape.iter())
        .filter(|(global, shard)| **global != 0 || **shard != 0)
        .map(|(global, shard)| global / shard)
        .product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridAxis;
    use crate::layout::ShardInterval;
    use crate::partition::AxisAssignment;

    fn grid_4x2() -> DeviceGrid {
        let axes = vec![GridAxis::new("x", 4).unwrap(), GridAxis::new("y", 2).unwrap()];
        let devices = (0..8).map(|id| GridDevice::new(id, 0)).collect();
        DeviceGrid::new(axes, devices).unwrap()
    }

    fn grid_2x4() -> DeviceGrid {
        let axes = vec![GridAxis::new("x", 2).unwrap(), GridAxis::new("y", 4).unwrap()];
        let devices = (0..8).map(|id| GridDevice::new(id, 0)).collect();
        DeviceGrid::new(axes, devices).unwrap()
    }

    #[test]
    fn test_fully_partitioned_table_has_no_replicas() {
        // (8, 2) on a 4x2 grid, both axes partitioned: 8 distinct shards of shape (2, 1).
        let grid = grid_4x2();
        let spec = PartitionSpec::new(vec![AxisAssignment::along("x"), AxisAssignment::along("y")]);
        let table = build_shard_table(&[8, 2], &grid, &spec).unwrap();

        assert_eq!(table.entries().len(), 8);
        assert_eq!(table.unique_shard_count(), 8);
        for entry in table.entries() {
            assert_eq!(entry.replica_id(), 0);
            assert_eq!(entry.index().shape(), vec![2, 1]);
        }
    }

    #[test]
    fn test_partially_partitioned_table_assigns_replica_ids_in_order() {
        // (8, 2) on a 4x2 grid, only axis 0 partitioned along "x": shard shape (2, 2), 4 distinct
        // shards, each replicated across the 2 devices that share an "x" coordinate.
        let grid = grid_4x2();
        let spec = PartitionSpec::new(vec![AxisAssignment::along("x")]);
        let table = build_shard_table(&[8, 2], &grid, &spec).unwrap();

        assert_eq!(table.unique_shard_count(), 4);
        for (flat_index, entry) in table.entries().iter().enumerate() {
            // Devices (2k, 2k+1) share an index; the second holder gets replica id 1.
            assert_eq!(entry.replica_id(), flat_index % 2);
            assert_eq!(entry.index().shape(), vec![2, 2]);
        }
        assert_eq!(table.entries()[0].index(), table.entries()[1].index());
        assert_ne!(table.entries()[1].index(), table.entries()[2].index());
    }

    #[test]
    fn test_fully_partitioned_2x4_scenario() {
        // (8, 8) on a 2x4 grid, both axes partitioned: 8 distinct shards, zero replicas.
        let grid = grid_2x4();
        let spec = PartitionSpec::new(vec![AxisAssignment::along("x"), AxisAssignment::along("y")]);
        let table = build_shard_table(&[8, 8], &grid, &spec).unwrap();

        assert_eq!(table.unique_shard_count(), 8);
        assert!(table.entries().iter().all(|entry| entry.replica_id() == 0));
        assert!(table.entries().iter().all(|entry| entry.index().shape() == vec![4, 2]));
    }

    #[test]
    fn test_fully_replicated_table_has_contiguous_replica_ids() {
        let grid = grid_4x2();
        let spec = PartitionSpec::replicated(2);
        let table = build_shard_table(&[8, 2], &grid, &spec).unwrap();

        assert_eq!(table.unique_shard_count(), 1);
        let replica_ids: Vec<ReplicaId> = table.entries().iter().map(ShardTableEntry::replica_id).collect();
        assert_eq!(replica_ids, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_table_lookup_by_device() {
        let grid = grid_4x2();
        let spec = PartitionSpec::new(vec![AxisAssignment::along("x"), AxisAssignment::along("y")]);
        let table = build_shard_table(&[8, 2], &grid, &spec).unwrap();

        let entry = table.entry_for_device(5).unwrap();
        assert_eq!(entry.device().id(), 5);
        // Device 5 sits at grid coordinate (2, 1).
        assert_eq!(entry.index().intervals(), &[ShardInterval::new(4, 6), ShardInterval::new(1, 2)]);
        assert_eq!(table.index_for_device(5), Some(entry.index()));
        assert!(table.entry_for_device(99).is_none());
    }

    #[test]
    fn test_inconsistent_resolver_output_is_fatal() {
        let grid = grid_4x2();
        let indices = (0..8)
            .map(|_| ShardIndex::new(vec![ShardInterval::new(0, 2), ShardInterval::new(0, 1)]))
            .collect::<Vec<_>>();

        // Every device claims the same index, but the caller expected 8 distinct shards.
        assert!(matches!(
            assign_replica_ids(grid.devices(), indices.as_slice(), 8),
            Err(ShardingError::UniqueShardCountMismatch { expected_unique_shards: 8, actual_unique_shards: 1 }),
        ));
    }

    #[test]
    fn test_short_index_sequence_is_rejected() {
        let grid = grid_4x2();
        // 7 indices for 8 devices must not truncate into a partial table.
        let indices = resolve_shard_indices(&[8, 2], &grid, &PartitionSpec::replicated(2)).unwrap();
        assert!(matches!(
            assign_replica_ids(grid.devices(), &indices[..7], 1),
            Err(ShardingError::IndexSequenceLengthMismatch { expected_count: 8, actual_count: 7 }),
        ));
    }

    #[test]
    fn test_expected_unique_shards_skips_zero_axes() {
        assert_eq!(expected_unique_shards(&[8, 2], &[2, 1]), 8);
        assert_eq!(expected_unique_shards(&[8, 2], &[2, 2]), 4);
        assert_eq!(expected_unique_shards(&[0, 4], &[0, 2]), 2);
        assert_eq!(expected_unique_shards(&[], &[]), 1);
    }
}
