//! Error types for grid/partition validation, shard-layout construction, and array aggregation.
//!
//! The split mirrors the two failure domains of the crate:
//!
//! - [`ShardingError`] covers everything up to and including the device shard table: grid and
//!   partition-specification validation, shard-shape computation, index resolution, and the
//!   replica-assignment consistency check.
//! - [`ArrayError`] covers [`GlobalDeviceArray`][crate::array::GlobalDeviceArray] construction
//!   and access: buffer/device/shape/element-type validation, callback contract violations, and
//!   deliberately unsupported operations.

use thiserror::Error;

use crate::buffer::ElementType;
use crate::grid::DeviceId;

/// Error type for grid definitions, partition specifications, and shard-table construction.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ShardingError {
    /// Error returned when a grid axis name is empty.
    #[error("grid axis names must be non-empty")]
    EmptyAxisName,

    /// Error returned when a grid axis has size `0`.
    #[error("grid axis '{axis_name}' must have size > 0")]
    InvalidAxisSize { axis_name: String },

    /// Error returned when grid axis names are not unique.
    #[error("grid axis '{axis_name}' appears more than once")]
    DuplicateAxisName { axis_name: String },

    /// Error returned when device IDs in a grid are not unique.
    #[error("grid device id {device_id} appears more than once")]
    DuplicateDeviceId { device_id: DeviceId },

    /// Error returned when the number of grid devices does not match the product of axis sizes.
    #[error("grid has {actual_device_count} device(s), but axis sizes imply {expected_device_count} device(s)")]
    DeviceCountMismatch { expected_device_count: usize, actual_device_count: usize },

    /// Error returned when a partition assignment references a grid axis that does not exist.
    #[error("partition assignment references unknown grid axis '{axis_name}'")]
    UnknownGridAxis { axis_name: String },

    /// Error returned when an assigned array axis references no grid axes.
    #[error("partition assignment for array axis #{array_axis} has an empty grid-axis list")]
    EmptyAssignmentAxisList { array_axis: usize },

    /// Error returned when a grid axis appears more than once across the partition assignment.
    #[error("grid axis '{axis_name}' is used multiple times in the partition assignment")]
    DuplicateAssignmentAxis { axis_name: String },

    /// Error returned when a partition assignment is longer than the global shape's rank.
    #[error("partition assignment has {assignment_rank} axis assignment(s), but the global shape has rank {array_rank}")]
    AssignmentRankExceedsShape { assignment_rank: usize, array_rank: usize },

    /// Error returned when a global dimension does not divide evenly into its grid divisor.
    #[error(
        "global dimension #{array_axis}={dimension_size} is not divisible by its grid divisor {divisor}; \
         every partitioned dimension must split into equal shards"
    )]
    DimensionNotDivisible { array_axis: usize, dimension_size: usize, divisor: usize },

    /// Error returned when arithmetic overflows while building shard metadata.
    #[error("overflow while {context}")]
    Overflow { context: String },

    /// Error returned when a resolved index sequence does not cover every device.
    #[error("resolved index sequence has {actual_count} entry(ies), but {expected_count} device(s) need one")]
    IndexSequenceLengthMismatch { expected_count: usize, actual_count: usize },

    /// Error returned when the resolver and the shard-shape calculator disagree on the number of
    /// distinct shard indices.
    ///
    /// This is an internal-consistency failure: it can only be produced by a defect in the index
    /// resolver or the shape calculator, never by caller inputs that pass validation. It is
    /// always fatal for the operation that surfaced it and should be reported as a bug.
    #[error(
        "expected {expected_unique_shards} unique shard(s) but the resolved index sequence contains \
         {actual_unique_shards}; the index resolver and the shard-shape calculator disagree"
    )]
    UniqueShardCountMismatch { expected_unique_shards: usize, actual_unique_shards: usize },
}

/// Error type for [`GlobalDeviceArray`][crate::array::GlobalDeviceArray] construction and access.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum ArrayError {
    /// Underlying sharding/layout error.
    #[error("{0}")]
    Sharding(#[from] ShardingError),

    /// Error returned when the number of local buffers does not match the number of local devices.
    #[error("got {actual_count} local buffer(s), but the grid has {expected_count} local device(s)")]
    BufferCountMismatch { expected_count: usize, actual_count: usize },

    /// Error returned when a buffer is not placed on the local device at the same position.
    ///
    /// Local buffers must be supplied in the grid's local-device order; the correspondence is
    /// positional and is not re-derived from device identity.
    #[error(
        "local buffer #{position} is placed on device {actual_device_id}, but the grid's local device \
         at that position is {expected_device_id}"
    )]
    BufferDeviceOrderMismatch { position: usize, expected_device_id: DeviceId, actual_device_id: DeviceId },

    /// Error returned when one or more buffer shapes do not match the expected shard shape.
    ///
    /// `mismatches` lists every offending buffer position with its actual shape.
    #[error("expected shard shape {expected_shape:?}, but buffer(s) at {mismatches:?} have different shapes")]
    BufferShapeMismatch { expected_shape: Vec<usize>, mismatches: Vec<(usize, Vec<usize>)> },

    /// Error returned when one or more buffers disagree with the aggregate's element type.
    ///
    /// The element type of the first buffer is canonical; `mismatches` lists every buffer
    /// position whose element type differs, with the type it actually carries.
    #[error("expected element type {expected:?}, but buffer(s) at {mismatches:?} have different element types")]
    ElementTypeMismatch { expected: ElementType, mismatches: Vec<(usize, ElementType)> },

    /// Error returned when an aggregate is constructed with no local buffers.
    ///
    /// The aggregate's element type is defined by its first local buffer, so a process that owns
    /// no devices in the grid cannot hold the array.
    #[error("a global device array requires at least one local buffer")]
    EmptyLocalBuffers,

    /// Error returned when a buffer's device does not appear in the device shard table.
    #[error("local buffer is placed on device {device_id}, but that device is not in the grid")]
    BufferDeviceNotInGrid { device_id: DeviceId },

    /// Error returned when a batched ingestion callback returns the wrong number of values.
    #[error("ingestion callback returned {actual_count} value(s), but {expected_count} were expected")]
    CallbackValueCountMismatch { expected_count: usize, actual_count: usize },

    /// Error returned when a local buffer position is out of range.
    #[error("local buffer position {position} is out of range for {buffer_count} local buffer(s)")]
    LocalBufferOutOfRange { position: usize, buffer_count: usize },

    /// Error returned by the intentionally unsupported value-equality operation.
    ///
    /// Comparing two aggregates element-wise requires a grid-aware distributed comparison;
    /// structural comparison of local shards would silently ignore remote data. Callers must
    /// perform an explicit element-wise comparison through the surrounding execution runtime.
    #[error(
        "global device array equality is intentionally unsupported; perform an explicit grid-aware \
         element-wise comparison instead"
    )]
    UnsupportedEquality,

    /// Error returned when waiting for a local buffer's underlying computation fails.
    #[error("waiting for the buffer on device {device_id} failed: {message}")]
    BufferWaitFailed { device_id: DeviceId, message: String },
}
