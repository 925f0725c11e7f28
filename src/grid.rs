//! Device-grid value objects.
//!
//! A [`DeviceGrid`] is a named n-dimensional arrangement of devices spanning every cooperating
//! process. Grids are externally supplied and treated as stable value objects: all processes must
//! construct an identical grid (same devices, same axis names and order) for the shard metadata
//! computed from it to agree across processes without communication. That cross-process invariant
//! is relied upon but cannot be enforced here.
//!
//! Devices are stored flattened in **row-major order** with respect to the axis list: for a grid
//! with axes `("x"=4, "y"=2)`, the device at coordinate `(i, j)` has linear index `i * 2 + j`.
//! This flattened order is the canonical device order used by the partition resolver and the
//! replica assignment engine.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::errors::ShardingError;

/// Globally unique device identifier assigned by the surrounding runtime.
pub type DeviceId = usize;

/// A named axis in a device grid.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct GridAxis {
    name: String,
    size: usize,
}

impl GridAxis {
    /// Creates a grid axis.
    pub fn new<N: Into<String>>(name: N, size: usize) -> Result<Self, ShardingError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ShardingError::EmptyAxisName);
        }
        if size == 0 {
            return Err(ShardingError::InvalidAxisSize { axis_name: name });
        }
        Ok(Self { name, size })
    }

    /// Name of this axis.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Number of devices along this axis.
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Device entry in a device grid.
///
/// Separates global device identity (`id`) from home-process ownership (`process_index`), so the
/// same grid describes both local and remote devices. A device is *local* to process `p` iff
/// `process_index == p`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GridDevice {
    id: DeviceId,
    process_index: usize,
}

impl GridDevice {
    /// Creates a grid-device entry.
    pub fn new(id: DeviceId, process_index: usize) -> Self {
        Self { id, process_index }
    }

    /// Global device ID.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Index of the process that owns this device.
    pub fn process_index(&self) -> usize {
        self.process_index
    }
}

/// Named n-dimensional grid of devices spanning all cooperating processes.
///
/// Equality and hashing are defined over the axis list and the flattened device list, making a
/// `DeviceGrid` usable as a value-identity key in the [`LayoutCache`][crate::cache::LayoutCache].
#[derive(Clone, Debug)]
pub struct DeviceGrid {
    axes: Vec<GridAxis>,
    devices: Vec<GridDevice>,
    axis_index_by_name: HashMap<String, usize>,
    device_index_by_id: HashMap<DeviceId, usize>,
}

impl DeviceGrid {
    /// Creates a grid from named axes and row-major flattened devices.
    ///
    /// The expected number of `devices` is the product of all `axes` sizes. For an empty axis
    /// list, the expected device count is `1`.
    pub fn new(axes: Vec<GridAxis>, devices: Vec<GridDevice>) -> Result<Self, ShardingError> {
        let mut axis_index_by_name = HashMap::with_capacity(axes.len());
        for (axis_index, axis) in axes.iter().enumerate() {
            if axis_index_by_name.insert(axis.name.clone(), axis_index).is_some() {
                return Err(ShardingError::DuplicateAxisName { axis_name: axis.name.clone() });
            }
        }

        let expected_device_count = axes.iter().try_fold(1usize, |count, axis| {
            count.checked_mul(axis.size).ok_or_else(|| ShardingError::Overflow {
                context: "computing grid device count from axis sizes".to_string(),
            })
        })?;
        if devices.len() != expected_device_count {
            return Err(ShardingError::DeviceCountMismatch {
                expected_device_count,
                actual_device_count: devices.len(),
            });
        }

        let mut device_index_by_id = HashMap::with_capacity(devices.len());
        for (device_index, device) in devices.iter().enumerate() {
            if device_index_by_id.insert(device.id, device_index).is_some() {
                return Err(ShardingError::DuplicateDeviceId { device_id: device.id });
            }
        }

        Ok(Self { axes, devices, axis_index_by_name, device_index_by_id })
    }

    /// Returns the axes of this grid.
    pub fn axes(&self) -> &[GridAxis] {
        self.axes.as_slice()
    }

    /// Returns grid devices in canonical row-major flattened order.
    pub fn devices(&self) -> &[GridDevice] {
        self.devices.as_slice()
    }

    /// Returns the total number of devices in this grid.
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Returns the index of `axis_name` in this grid, if present.
    pub fn axis_index<S: AsRef<str>>(&self, axis_name: S) -> Option<usize> {
        self.axis_index_by_name.get(axis_name.as_ref()).copied()
    }

    /// Returns the size of `axis_name` in this grid, if present.
    pub fn axis_size<S: AsRef<str>>(&self, axis_name: S) -> Option<usize> {
        self.axis_index(axis_name).map(|axis_index| self.axes[axis_index].size)
    }

    /// Returns the row-major flattened index of `device_id`, if present.
    pub fn device_index(&self, device_id: DeviceId) -> Option<usize> {
        self.device_index_by_id.get(&device_id).copied()
    }

    /// Returns the grid coordinate of the device at `device_index`, if valid.
    pub fn coordinate_for_device_index(&self, device_index: usize) -> Option<Vec<usize>> {
        (device_index < self.devices.len()).then(|| {
            let axis_sizes = self.axes.iter().map(GridAxis::size).collect::<Vec<_>>();
            coordinate_for_linear_index(device_index, axis_sizes.as_slice())
        })
    }

    /// Returns `true` if any two devices belong to different processes.
    pub fn is_multi_process(&self) -> bool {
        self.devices
            .first()
            .is_some_and(|first| self.devices.iter().any(|d| d.process_index != first.process_index))
    }

    /// Returns devices belonging to `process_index`, in canonical flattened order.
    ///
    /// This order defines the positional correspondence between local buffers and local devices
    /// used by [`GlobalDeviceArray`][crate::array::GlobalDeviceArray] construction.
    pub fn local_devices(&self, process_index: usize) -> Vec<GridDevice> {
        self.devices.iter().copied().filter(|d| d.process_index == process_index).collect()
    }
}

// Equality and hashing deliberately ignore the derived lookup maps.
impl PartialEq for DeviceGrid {
    fn eq(&self, other: &Self) -> bool {
        self.axes == other.axes && self.devices == other.devices
    }
}

impl Eq for DeviceGrid {}

impl Hash for DeviceGrid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.axes.hash(state);
        self.devices.hash(state);
    }
}

pub(crate) fn coordinate_for_linear_index(mut index: usize, axis_sizes: &[usize]) -> Vec<usize> {
    if axis_sizes.is_empty() {
        return Vec::new();
    }

    let mut coordinate = vec![0usize; axis_sizes.len()];
    for axis in (0..axis_sizes.len()).rev() {
        let axis_size = axis_sizes[axis];
        coordinate[axis] = index % axis_size;
        index /= axis_size;
    }
    coordinate
}
