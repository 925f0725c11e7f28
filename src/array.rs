//! Global arrays aggregated from per-device shard buffers.
//!
//! A [`GlobalDeviceArray`] pairs the device shard table for one `(global shape, grid,
//! partition)` layout with the local device buffers that hold this process's shards. The global
//! value is logically whole; each process holds only the buffers for its own devices and can see
//! metadata (but not data) for every other device's shard.
//!
//! Local buffers correspond to local devices *positionally*: the `i`-th buffer must live on the
//! `i`-th local device in the grid's canonical flattened order. Construction validates that
//! correspondence along with buffer count, shapes, and element types; the runtime integration in
//! [`crate::runtime`] builds arrays with validation disabled once it has established the layout
//! itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::buffer::{BufferPlacement, DeviceBuffer, ElementType};
use crate::cache::global_layout_cache;
use crate::errors::ArrayError;
use crate::grid::{DeviceGrid, GridDevice};
use crate::layout::ShardIndex;
use crate::partition::PartitionSpec;
use crate::replicas::{DeviceShardTable, ReplicaId};

/// One shard of a global array: the owning device, its slice of the global value, its replica
/// id, and the device buffer when the shard is addressable from this process.
pub struct Shard<B> {
    device: GridDevice,
    index: ShardIndex,
    replica_id: ReplicaId,
    data: Option<Arc<B>>,
}

impl<B> Shard<B> {
    /// Device owning this shard.
    pub fn device(&self) -> GridDevice {
        self.device
    }

    /// Slice of the global array held by this shard.
    pub fn index(&self) -> &ShardIndex {
        &self.index
    }

    /// Replica id of this shard among the holders of the same index.
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Device buffer holding this shard's data, if the shard is addressable from this process.
    pub fn data(&self) -> Option<&Arc<B>> {
        self.data.as_ref()
    }
}

impl<B: DeviceBuffer> fmt::Debug for Shard<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("device", &self.device)
            .field("index", &self.index)
            .field("replica_id", &self.replica_id)
            .field("addressable", &self.data.is_some())
            .finish()
    }
}

/// Precomputed layout handed to construction when the caller has already resolved it.
///
/// Skips the cache lookup and the local-device scan. Produced internally by the ingestion
/// constructors and by [`crate::runtime::result_handler`].
pub(crate) struct FastPathLayout {
    pub(crate) table: Arc<DeviceShardTable>,
    pub(crate) local_devices: Vec<GridDevice>,
}

/// A logically global array assembled from one device buffer per local device.
pub struct GlobalDeviceArray<B> {
    global_shape: Vec<usize>,
    grid: DeviceGrid,
    spec: PartitionSpec,
    process_index: usize,
    element_type: ElementType,
    shard_shape: Vec<usize>,
    buffers: Vec<Arc<B>>,
    table: Arc<DeviceShardTable>,
    local_devices: Vec<GridDevice>,
    local_shards: OnceLock<Vec<Shard<B>>>,
    global_shards: OnceLock<Vec<Shard<B>>>,
}

impl<B: DeviceBuffer> GlobalDeviceArray<B> {
    /// Creates a global array from local device buffers, with full validation.
    ///
    /// `buffers` must contain exactly one buffer per local device of `process_index`, in the
    /// grid's canonical flattened order, each with the layout's shard shape and a single common
    /// element type.
    pub fn new(
        global_shape: Vec<usize>,
        grid: DeviceGrid,
        spec: PartitionSpec,
        process_index: usize,
        buffers: Vec<Arc<B>>,
    ) -> Result<Self, ArrayError> {
        Self::with_layout(global_shape, grid, spec, process_index, buffers, None, true)
    }

    pub(crate) fn with_layout(
        global_shape: Vec<usize>,
        grid: DeviceGrid,
        spec: PartitionSpec,
        process_index: usize,
        buffers: Vec<Arc<B>>,
        fast_path: Option<FastPathLayout>,
        enable_checks: bool,
    ) -> Result<Self, ArrayError> {
        let (table, local_devices) = match fast_path {
            Some(layout) => (layout.table, layout.local_devices),
            None => (
                global_layout_cache().shard_table(global_shape.as_slice(), &grid, &spec)?,
                grid.local_devices(process_index),
            ),
        };

        // The element type of the whole aggregate is defined by its first local buffer.
        let element_type = buffers.first().ok_or(ArrayError::EmptyLocalBuffers)?.element_type();
        // Every axis size in the grid is positive, so the table is never empty.
        let shard_shape = table.entries()[0].index().shape();

        if enable_checks {
            Self::validate_buffers(
                buffers.as_slice(),
                local_devices.as_slice(),
                &grid,
                shard_shape.as_slice(),
                element_type,
            )?;
        }

        Ok(Self {
            global_shape,
            grid,
            spec,
            process_index,
            element_type,
            shard_shape,
            buffers,
            table,
            local_devices,
            local_shards: OnceLock::new(),
            global_shards: OnceLock::new(),
        })
    }

    fn validate_buffers(
        buffers: &[Arc<B>],
        local_devices: &[GridDevice],
        grid: &DeviceGrid,
        shard_shape: &[usize],
        element_type: ElementType,
    ) -> Result<(), ArrayError> {
        if buffers.len() != local_devices.len() {
            return Err(ArrayError::BufferCountMismatch {
                expected_count: local_devices.len(),
                actual_count: buffers.len(),
            });
        }

        for (position, (buffer, device)) in buffers.iter().zip(local_devices.iter()).enumerate() {
            let buffer_device_id = buffer.device_id();
            if grid.device_index(buffer_device_id).is_none() {
                return Err(ArrayError::BufferDeviceNotInGrid { device_id: buffer_device_id });
            }
            if buffer_device_id != device.id() {
                return Err(ArrayError::BufferDeviceOrderMismatch {
                    position,
                    expected_device_id: device.id(),
                    actual_device_id: buffer_device_id,
                });
            }
        }

        let shape_mismatches = buffers
            .iter()
            .enumerate()
            .filter(|(_, buffer)| buffer.shape() != shard_shape)
            .map(|(position, buffer)| (position, buffer.shape().to_vec()))
            .collect::<Vec<_>>();
        if !shape_mismatches.is_empty() {
            return Err(ArrayError::BufferShapeMismatch {
                expected_shape: shard_shape.to_vec(),
                mismatches: shape_mismatches,
            });
        }

        let element_type_mismatches = buffers
            .iter()
            .enumerate()
            .filter(|(_, buffer)| buffer.element_type() != element_type)
            .map(|(position, buffer)| (position, buffer.element_type()))
            .collect::<Vec<_>>();
        if !element_type_mismatches.is_empty() {
            return Err(ArrayError::ElementTypeMismatch {
                expected: element_type,
                mismatches: element_type_mismatches,
            });
        }

        Ok(())
    }

    /// Shape of the logical global value.
    pub fn global_shape(&self) -> &[usize] {
        self.global_shape.as_slice()
    }

    /// Device grid this array is laid out over.
    pub fn grid(&self) -> &DeviceGrid {
        &self.grid
    }

    /// Partition assignment of the global shape over the grid.
    pub fn partition(&self) -> &PartitionSpec {
        &self.spec
    }

    /// Index of the process observing this array.
    pub fn process_index(&self) -> usize {
        self.process_index
    }

    /// Rank of the global value.
    pub fn ndim(&self) -> usize {
        self.global_shape.len()
    }

    /// Total number of elements in the global value.
    pub fn size(&self) -> usize {
        self.global_shape.iter().product()
    }

    /// Element type of the global value.
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Shape of every shard of this array.
    pub fn shard_shape(&self) -> &[usize] {
        self.shard_shape.as_slice()
    }

    /// Local devices of this array's process, in canonical flattened order.
    pub fn local_devices(&self) -> &[GridDevice] {
        self.local_devices.as_slice()
    }

    /// Local device buffers, positionally corresponding to [`local_devices`][Self::local_devices].
    pub fn local_buffers(&self) -> &[Arc<B>] {
        self.buffers.as_slice()
    }

    /// Returns the local buffer at `position`.
    pub fn local_buffer(&self, position: usize) -> Result<&Arc<B>, ArrayError> {
        self.buffers.get(position).ok_or(ArrayError::LocalBufferOutOfRange {
            position,
            buffer_count: self.buffers.len(),
        })
    }

    /// Returns `true` if every device holds the entire global value.
    ///
    /// Defined from the first local buffer's actual shape, not the table's prediction, so it
    /// reflects what is really resident on the devices even when construction checks were
    /// skipped.
    pub fn is_fully_replicated(&self) -> bool {
        self.buffers[0].shape() == self.global_shape
    }

    /// Shards addressable from this process, in local-device order, each carrying its buffer.
    ///
    /// Built lazily on first access and memoized for the array's lifetime.
    pub fn local_shards(&self) -> &[Shard<B>] {
        self.local_shards
            .get_or_init(|| {
                self.local_devices
                    .iter()
                    .zip(self.buffers.iter())
                    .map(|(device, buffer)| {
                        let entry = self
                            .table
                            .entry_for_device(device.id())
                            .expect("shard table covers every device of the grid it was built for");
                        Shard {
                            device: *device,
                            index: entry.index().clone(),
                            replica_id: entry.replica_id(),
                            data: Some(Arc::clone(buffer)),
                        }
                    })
                    .collect()
            })
            .as_slice()
    }

    /// Shards of every device in the grid, in canonical flattened order.
    ///
    /// Remote shards carry full metadata but no data; only shards on this process's devices have
    /// their buffer attached. Built lazily on first access and memoized.
    pub fn global_shards(&self) -> &[Shard<B>] {
        self.global_shards
            .get_or_init(|| {
                let buffer_by_device: HashMap<_, _> = self
                    .local_devices
                    .iter()
                    .zip(self.buffers.iter())
                    .map(|(device, buffer)| (device.id(), buffer))
                    .collect();
                self.table
                    .entries()
                    .iter()
                    .map(|entry| {
                        let device = entry.device();
                        let data = (device.process_index() == self.process_index)
                            .then(|| buffer_by_device.get(&device.id()).map(|buffer| Arc::clone(*buffer)))
                            .flatten();
                        Shard {
                            device,
                            index: entry.index().clone(),
                            replica_id: entry.replica_id(),
                            data,
                        }
                    })
                    .collect()
            })
            .as_slice()
    }

    /// Blocks until every local buffer's producing computation has completed.
    pub fn block_until_ready(&self) -> Result<&Self, ArrayError> {
        for buffer in &self.buffers {
            buffer.block_until_ready()?;
        }
        Ok(self)
    }

    /// Value equality of global arrays is intentionally unsupported.
    ///
    /// Always returns [`ArrayError::UnsupportedEquality`]; see that variant for the rationale.
    pub fn equals(&self, _other: &Self) -> Result<bool, ArrayError> {
        Err(ArrayError::UnsupportedEquality)
    }

    /// Creates a global array by producing one host value per local shard.
    ///
    /// `callback` is invoked once per local device, in canonical order, with the shard index that
    /// device owns; the returned host value is placed on that device via `placement`.
    pub fn from_callback<P, F>(
        global_shape: Vec<usize>,
        grid: DeviceGrid,
        spec: PartitionSpec,
        process_index: usize,
        placement: &P,
        mut callback: F,
    ) -> Result<Self, ArrayError>
    where
        P: BufferPlacement<Buffer = B>,
        F: FnMut(&ShardIndex) -> P::Value,
    {
        let table = global_layout_cache().shard_table(global_shape.as_slice(), &grid, &spec)?;
        let local_devices = grid.local_devices(process_index);

        let mut buffers = Vec::with_capacity(local_devices.len());
        for device in &local_devices {
            let index = table
                .index_for_device(device.id())
                .ok_or(ArrayError::BufferDeviceNotInGrid { device_id: device.id() })?;
            let value = callback(index);
            buffers.push(Arc::new(placement.place(value, device)?));
        }

        Self::with_layout(
            global_shape,
            grid,
            spec,
            process_index,
            buffers,
            Some(FastPathLayout { table, local_devices }),
            true,
        )
    }

    /// Creates a global array by producing all local host values in one batched call.
    ///
    /// `callback` receives the local shard indices in canonical order and must return exactly one
    /// host value per index, in the same order.
    pub fn from_batched_callback<P, F>(
        global_shape: Vec<usize>,
        grid: DeviceGrid,
        spec: PartitionSpec,
        process_index: usize,
        placement: &P,
        callback: F,
    ) -> Result<Self, ArrayError>
    where
        P: BufferPlacement<Buffer = B>,
        F: FnOnce(&[ShardIndex]) -> Vec<P::Value>,
    {
        let table = global_layout_cache().shard_table(global_shape.as_slice(), &grid, &spec)?;
        let local_devices = grid.local_devices(process_index);

        let mut local_indices = Vec::with_capacity(local_devices.len());
        for device in &local_devices {
            let index = table
                .index_for_device(device.id())
                .ok_or(ArrayError::BufferDeviceNotInGrid { device_id: device.id() })?;
            local_indices.push(index.clone());
        }

        let values = callback(local_indices.as_slice());
        if values.len() != local_indices.len() {
            return Err(ArrayError::CallbackValueCountMismatch {
                expected_count: local_indices.len(),
                actual_count: values.len(),
            });
        }

        let pairs = values.into_iter().zip(local_devices.iter().copied()).collect();
        let buffers = placement.place_many(pairs)?.into_iter().map(Arc::new).collect();

        Self::with_layout(
            global_shape,
            grid,
            spec,
            process_index,
            buffers,
            Some(FastPathLayout { table, local_devices }),
            true,
        )
    }

    /// Creates a global array from a callback that places buffers on devices itself.
    ///
    /// Local devices are grouped by the shard index they own, in first-seen canonical order, so
    /// replicated data is produced once per distinct index. `callback` receives the
    /// `(index, devices)` groups and must return one already-placed buffer per local device, in
    /// canonical local-device order; construction validates the fan-out.
    pub fn from_batched_callback_with_devices<F>(
        global_shape: Vec<usize>,
        grid: DeviceGrid,
        spec: PartitionSpec,
        process_index: usize,
        callback: F,
    ) -> Result<Self, ArrayError>
    where
        F: FnOnce(&[(ShardIndex, Vec<GridDevice>)]) -> Vec<B>,
    {
        let table = global_layout_cache().shard_table(global_shape.as_slice(), &grid, &spec)?;
        let local_devices = grid.local_devices(process_index);

        let mut group_position_by_index: HashMap<ShardIndex, usize> = HashMap::new();
        let mut groups: Vec<(ShardIndex, Vec<GridDevice>)> = Vec::new();
        for device in &local_devices {
            let index = table
                .index_for_device(device.id())
                .ok_or(ArrayError::BufferDeviceNotInGrid { device_id: device.id() })?;
            match group_position_by_index.get(index) {
                Some(group_position) => groups[*group_position].1.push(*device),
                None => {
                    group_position_by_index.insert(index.clone(), groups.len());
                    groups.push((index.clone(), vec![*device]));
                }
            }
        }

        let buffers: Vec<Arc<B>> = callback(groups.as_slice()).into_iter().map(Arc::new).collect();

        Self::with_layout(
            global_shape,
            grid,
            spec,
            process_index,
            buffers,
            Some(FastPathLayout { table, local_devices }),
            true,
        )
    }
}

impl<B: DeviceBuffer> fmt::Debug for GlobalDeviceArray<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalDeviceArray")
            .field("global_shape", &self.global_shape)
            .field("partition", &self.spec)
            .field("element_type", &self.element_type)
            .field("shard_shape", &self.shard_shape)
            .field("device_count", &self.grid.device_count())
            .field("local_buffer_count", &self.buffers.len())
            .finish()
    }
}
