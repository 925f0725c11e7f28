//! Shard-shape calculation and partition-index resolution.
//!
//! Both computations here are pure functions of `(global shape, grid, partition spec)` and must
//! be deterministic and identical across cooperating processes: agreement on the global
//! partition layout is reached without communication by every process running the same
//! computation on the same inputs.
//!
//! [`shard_shape`] predicts the per-device shard shape. [`resolve_shard_indices`] produces the
//! per-device [`ShardIndex`] sequence in the grid's canonical flattened device order; its `i`-th
//! element is the index owned by the grid's `i`-th flattened device. The replica assignment
//! engine in [`crate::replicas`] cross-checks the two.
//!
//! Non-dividing dimensions are rejected eagerly with
//! [`ShardingError::DimensionNotDivisible`] rather than silently truncated: a truncated shard
//! shape could only surface later as a confusing buffer-shape mismatch at aggregate construction.

use crate::errors::ShardingError;
use crate::grid::{coordinate_for_linear_index, DeviceGrid, GridAxis};
use crate::partition::{AxisAssignment, PartitionSpec};

/// Half-open range `[start, end)` along one axis of the global array.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardInterval {
    start: usize,
    end: usize,
}

impl ShardInterval {
    /// Creates a shard interval. `start` must not exceed `end`.
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end, "shard interval start must not exceed end");
        Self { start, end }
    }

    /// Inclusive start index.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Exclusive end index.
    pub fn end(&self) -> usize {
        self.end
    }

    /// Length of this interval.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Returns `true` iff this interval is empty.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The multi-dimensional slice of the global array owned by one device.
///
/// One [`ShardInterval`] per global-array axis. Equality and hashing are order-sensitive over
/// the `(start, end)` pairs; two devices hold replicas of the same data iff their indices are
/// equal under this structural identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShardIndex {
    intervals: Vec<ShardInterval>,
}

impl ShardIndex {
    /// Creates a shard index from per-axis intervals.
    pub fn new(intervals: Vec<ShardInterval>) -> Self {
        Self { intervals }
    }

    /// Per-axis intervals of this index.
    pub fn intervals(&self) -> &[ShardInterval] {
        self.intervals.as_slice()
    }

    /// Shape of the slice identified by this index.
    pub fn shape(&self) -> Vec<usize> {
        self.intervals.iter().map(ShardInterval::len).collect()
    }
}

/// Computes the per-device shard shape for `(global_shape, grid, spec)`.
///
/// For each axis: a replicated axis keeps its global size; an assigned axis is divided by the
/// product of its grid-axis sizes. Axes beyond the spec's length are copied unchanged from the
/// global shape. The result always has the same rank as `global_shape`.
pub fn shard_shape(
    global_shape: &[usize],
    grid: &DeviceGrid,
    spec: &PartitionSpec,
) -> Result<Vec<usize>, ShardingError> {
    spec.validate(grid, global_shape.len())?;

    let mut shape = Vec::with_capacity(global_shape.len());
    for (array_axis, dimension_size) in global_shape.iter().copied().enumerate() {
        let size = match spec.assignment(array_axis) {
            AxisAssignment::Replicated => dimension_size,
            AxisAssignment::Along(axis_names) => {
                let divisor = grid_divisor(grid, axis_names)?;
                if dimension_size % divisor != 0 {
                    return Err(ShardingError::DimensionNotDivisible { array_axis, dimension_size, divisor });
                }
                dimension_size / divisor
            }
        };
        shape.push(size);
    }
    Ok(shape)
}

/// Resolves the per-device [`ShardIndex`] sequence for `(global_shape, grid, spec)`.
///
/// The returned sequence has length equal to the grid's device count and follows the grid's
/// canonical flattened device order. Downstream consumers treat this sequence as authoritative.
pub fn resolve_shard_indices(
    global_shape: &[usize],
    grid: &DeviceGrid,
    spec: &PartitionSpec,
) -> Result<Vec<ShardIndex>, ShardingError> {
    spec.validate(grid, global_shape.len())?;

    let axis_sizes = grid.axes().iter().map(GridAxis::size).collect::<Vec<_>>();
    let mut indices = Vec::with_capacity(grid.device_count());
    for device_index in 0..grid.device_count() {
        let coordinate = coordinate_for_linear_index(device_index, axis_sizes.as_slice());

        let mut intervals = Vec::with_capacity(global_shape.len());
        for (array_axis, dimension_size) in global_shape.iter().copied().enumerate() {
            let interval = match spec.assignment(array_axis) {
                AxisAssignment::Replicated => ShardInterval::new(0, dimension_size),
                AxisAssignment::Along(axis_names) => {
                    let (partition_index, partition_count) =
                        partition_index_for_axes(grid, coordinate.as_slice(), axis_names.as_slice())?;
                    if dimension_size % partition_count != 0 {
                        return Err(ShardingError::DimensionNotDivisible {
                            array_axis,
                            dimension_size,
                            divisor: partition_count,
                        });
                    }
                    let shard_size = dimension_size / partition_count;
                    let start = partition_index * shard_size;
                    ShardInterval::new(start, start + shard_size)
                }
            };
            intervals.push(interval);
        }
        indices.push(ShardIndex::new(intervals));
    }
    Ok(indices)
}

/// Product of the grid-axis sizes an assignment splits along.
fn grid_divisor(grid: &DeviceGrid, axis_names: &[String]) -> Result<usize, ShardingError> {
    axis_names.iter().try_fold(1usize, |divisor, axis_name| {
        let axis_size = grid
            .axis_size(axis_name)
            .ok_or_else(|| ShardingError::UnknownGridAxis { axis_name: axis_name.clone() })?;
        divisor.checked_mul(axis_size).ok_or_else(|| ShardingError::Overflow {
            context: format!("computing grid divisor for axis '{axis_name}'"),
        })
    })
}

/// Linearizes a device's grid coordinate over `axis_names` (major to minor) into a partition
/// index and the total partition count along those axes.
fn partition_index_for_axes(
    grid: &DeviceGrid,
    coordinate: &[usize],
    axis_names: &[String],
) -> Result<(usize, usize), ShardingError> {
    let mut partition_index = 0usize;
    let mut partition_count = 1usize;

    for axis_name in axis_names {
        let axis_index = grid
            .axis_index(axis_name)
            .ok_or_else(|| ShardingError::UnknownGridAxis { axis_name: axis_name.clone() })?;
        let axis_size = grid.axes()[axis_index].size();
        let axis_coordinate = coordinate[axis_index];

        partition_index = partition_index
            .checked_mul(axis_size)
            .and_then(|value| value.checked_add(axis_coordinate))
            .ok_or_else(|| ShardingError::Overflow {
                context: format!("computing partition index for axis '{axis_name}'"),
            })?;
        partition_count = partition_count.checked_mul(axis_size).ok_or_else(|| ShardingError::Overflow {
            context: format!("computing partition count for axis '{axis_name}'"),
        })?;
    }

    Ok((partition_index, partition_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridAxis, GridDevice};

    fn grid(axis_sizes: &[(&str, usize)]) -> DeviceGrid {
        let axes = axis_sizes.iter().map(|(name, size)| GridAxis::new(*name, *size).unwrap()).collect::<Vec<_>>();
        let device_count: usize = axis_sizes.iter().map(|(_, size)| size).product();
        let devices = (0..device_count).map(|id| GridDevice::new(id, 0)).collect();
        DeviceGrid::new(axes, devices).unwrap()
    }

    #[test]
    fn test_shard_shape_rank_preserved_and_divisors_applied() {
        let grid = grid(&[("x", 4), ("y", 2)]);

        let spec = PartitionSpec::new(vec![AxisAssignment::along("x"), AxisAssignment::along("y")]);
        assert_eq!(shard_shape(&[8, 2], &grid, &spec).unwrap(), vec![2, 1]);

        let spec = PartitionSpec::new(vec![AxisAssignment::along("x")]);
        assert_eq!(shard_shape(&[8, 2], &grid, &spec).unwrap(), vec![2, 2]);

        let spec = PartitionSpec::new(vec![AxisAssignment::along_product(["x", "y"])]);
        assert_eq!(shard_shape(&[8, 2], &grid, &spec).unwrap(), vec![1, 2]);

        // A spec shorter than the rank copies trailing dimensions unchanged.
        let spec = PartitionSpec::new(vec![AxisAssignment::along("y")]);
        assert_eq!(shard_shape(&[4, 3, 5], &grid, &spec).unwrap(), vec![2, 3, 5]);

        let spec = PartitionSpec::replicated(2);
        assert_eq!(shard_shape(&[8, 2], &grid, &spec).unwrap(), vec![8, 2]);
    }

    #[test]
    fn test_shard_shape_divisibility_validation() {
        let grid = grid(&[("x", 4), ("y", 2)]);
        let spec = PartitionSpec::new(vec![AxisAssignment::along("x")]);
        assert!(matches!(
            shard_shape(&[10, 2], &grid, &spec),
            Err(ShardingError::DimensionNotDivisible { array_axis: 0, dimension_size: 10, divisor: 4 }),
        ));
    }

    #[test]
    fn test_resolved_indices_follow_flattened_device_order() {
        let grid = grid(&[("x", 2), ("y", 2)]);
        let spec = PartitionSpec::new(vec![AxisAssignment::along("x"), AxisAssignment::along("y")]);
        let indices = resolve_shard_indices(&[8, 6], &grid, &spec).unwrap();
        assert_eq!(indices.len(), 4);

        assert_eq!(indices[0].intervals(), &[ShardInterval::new(0, 4), ShardInterval::new(0, 3)]);
        assert_eq!(indices[1].intervals(), &[ShardInterval::new(0, 4), ShardInterval::new(3, 6)]);
        assert_eq!(indices[2].intervals(), &[ShardInterval::new(4, 8), ShardInterval::new(0, 3)]);
        assert_eq!(indices[3].intervals(), &[ShardInterval::new(4, 8), ShardInterval::new(3, 6)]);

        for index in &indices {
            assert_eq!(index.shape(), vec![4, 3]);
        }
    }

    #[test]
    fn test_resolved_indices_multi_axis_single_dimension() {
        let grid = grid(&[("x", 2), ("y", 2)]);
        let spec = PartitionSpec::new(vec![AxisAssignment::along_product(["x", "y"])]);
        let indices = resolve_shard_indices(&[8], &grid, &spec).unwrap();

        assert_eq!(indices[0].intervals(), &[ShardInterval::new(0, 2)]);
        assert_eq!(indices[1].intervals(), &[ShardInterval::new(2, 4)]);
        assert_eq!(indices[2].intervals(), &[ShardInterval::new(4, 6)]);
        assert_eq!(indices[3].intervals(), &[ShardInterval::new(6, 8)]);
    }

    #[test]
    fn test_resolved_indices_replicated_axes_span_full_extent() {
        let grid = grid(&[("x", 2)]);
        let spec = PartitionSpec::replicated(2);
        let indices = resolve_shard_indices(&[4, 6], &grid, &spec).unwrap();
        assert_eq!(indices.len(), 2);
        assert_eq!(indices[0], indices[1]);
        assert_eq!(indices[0].intervals(), &[ShardInterval::new(0, 4), ShardInterval::new(0, 6)]);
    }

    #[test]
    fn test_shard_shape_matches_resolved_index_shapes() {
        let grid = grid(&[("x", 2), ("y", 4)]);
        let spec = PartitionSpec::new(vec![AxisAssignment::along("y"), AxisAssignment::along("x")]);
        let global_shape = [16usize, 6];

        let expected = shard_shape(&global_shape, &grid, &spec).unwrap();
        for index in resolve_shard_indices(&global_shape, &grid, &spec).unwrap() {
            assert_eq!(index.shape(), expected);
        }
    }

    #[test]
    fn test_zero_sized_dimension() {
        let grid = grid(&[("x", 2)]);
        let spec = PartitionSpec::new(vec![AxisAssignment::along("x")]);
        // A zero-sized dimension divides evenly into zero-sized shards.
        assert_eq!(shard_shape(&[0], &grid, &spec).unwrap(), vec![0]);
        let indices = resolve_shard_indices(&[0], &grid, &spec).unwrap();
        assert!(indices.iter().all(|index| index.intervals()[0].is_empty()));
    }
}
