//! Shard metadata and global-array aggregation for arrays split across multi-process device
//! grids.
//!
//! A *global* array is a logically whole n-dimensional value partitioned over a named
//! [`DeviceGrid`] by a [`PartitionSpec`]. Every cooperating process computes the same partition
//! layout from the same `(global shape, grid, partition)` inputs, without communication, and
//! holds only the device buffers for its own slice of the grid.
//!
//! The [`grid`], [`partition`], and [`layout`] modules define the metadata model and the pure
//! layout computations; [`replicas`] derives the full device shard table with replica ids;
//! [`cache`] memoizes those tables process-wide; [`array`] aggregates local buffers into a
//! [`GlobalDeviceArray`]; and [`runtime`] provides the hooks an outer execution runtime uses to
//! consume and produce such arrays.

pub mod array;
pub mod buffer;
pub mod cache;
pub mod errors;
pub mod grid;
pub mod layout;
pub mod partition;
pub mod replicas;
pub mod runtime;

#[cfg(test)]
pub(crate) mod test_support;

pub use array::{GlobalDeviceArray, Shard};
pub use buffer::{BufferPlacement, DeviceBuffer, ElementType, HostValue};
pub use cache::{global_layout_cache, LayoutCache};
pub use errors::{ArrayError, ShardingError};
pub use grid::{DeviceGrid, DeviceId, GridAxis, GridDevice};
pub use layout::{resolve_shard_indices, shard_shape, ShardIndex, ShardInterval};
pub use partition::{AxisAssignment, PartitionSpec};
pub use replicas::{build_shard_table, DeviceShardTable, ReplicaId, ShardTableEntry};
pub use runtime::{
    global_handler_registry, result_handler, AbstractValue, HandlerRegistry, RuntimeHandlers,
};
