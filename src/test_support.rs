//! In-memory buffer and placement fakes shared by the crate's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::buffer::{BufferPlacement, DeviceBuffer, ElementType, HostValue};
use crate::errors::ArrayError;
use crate::grid::{DeviceGrid, DeviceId, GridAxis, GridDevice};
use crate::layout::shard_shape;
use crate::partition::PartitionSpec;

/// Host-side stand-in carrying only shape and element-type metadata.
pub struct TestValue {
    shape: Vec<usize>,
    element_type: ElementType,
}

impl TestValue {
    pub fn new(shape: Vec<usize>, element_type: ElementType) -> Self {
        Self { shape, element_type }
    }
}

impl HostValue for TestValue {
    fn shape(&self) -> &[usize] {
        self.shape.as_slice()
    }

    fn element_type(&self) -> ElementType {
        self.element_type
    }
}

/// Device-buffer stand-in that records readiness waits and can be made to fail them.
pub struct TestBuffer {
    device_id: DeviceId,
    shape: Vec<usize>,
    element_type: ElementType,
    wait_count: AtomicUsize,
    wait_failure: Option<String>,
}

impl TestBuffer {
    pub fn new(device_id: DeviceId, shape: Vec<usize>, element_type: ElementType) -> Self {
        Self { device_id, shape, element_type, wait_count: AtomicUsize::new(0), wait_failure: None }
    }

    /// Makes `block_until_ready` fail with `message`.
    pub fn failing<M: Into<String>>(mut self, message: M) -> Self {
        self.wait_failure = Some(message.into());
        self
    }

    /// Number of times `block_until_ready` has been called on this buffer.
    pub fn wait_count(&self) -> usize {
        self.wait_count.load(Ordering::Relaxed)
    }
}

impl DeviceBuffer for TestBuffer {
    fn device_id(&self) -> DeviceId {
        self.device_id
    }

    fn shape(&self) -> &[usize] {
        self.shape.as_slice()
    }

    fn element_type(&self) -> ElementType {
        self.element_type
    }

    fn block_until_ready(&self) -> Result<(), ArrayError> {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        match &self.wait_failure {
            Some(message) => {
                Err(ArrayError::BufferWaitFailed { device_id: self.device_id, message: message.clone() })
            }
            None => Ok(()),
        }
    }
}

/// Placement fake that "transfers" a [`TestValue`] by stamping it with the target device id.
#[derive(Default)]
pub struct TestPlacement;

impl BufferPlacement for TestPlacement {
    type Value = TestValue;
    type Buffer = TestBuffer;

    fn place(&self, value: TestValue, device: &GridDevice) -> Result<TestBuffer, ArrayError> {
        Ok(TestBuffer::new(device.id(), value.shape, value.element_type))
    }
}

/// Builds a grid with the given `(name, size)` axes, splitting the devices evenly (by canonical
/// order) across `process_count` processes.
pub fn test_grid(axis_sizes: &[(&str, usize)], process_count: usize) -> DeviceGrid {
    let axes = axis_sizes
        .iter()
        .map(|(name, size)| GridAxis::new(*name, *size).unwrap())
        .collect::<Vec<_>>();
    let device_count: usize = axis_sizes.iter().map(|(_, size)| size).product();
    assert_eq!(device_count % process_count, 0, "devices must split evenly across processes");
    let devices_per_process = device_count / process_count;
    let devices = (0..device_count).map(|id| GridDevice::new(id, id / devices_per_process)).collect();
    DeviceGrid::new(axes, devices).unwrap()
}

/// Builds one correctly shaped `F32` buffer per local device of `process_index`, in canonical
/// order.
pub fn shard_buffers(
    global_shape: &[usize],
    grid: &DeviceGrid,
    spec: &PartitionSpec,
    process_index: usize,
) -> Vec<Arc<TestBuffer>> {
    let shape = shard_shape(global_shape, grid, spec).unwrap();
    grid.local_devices(process_index)
        .iter()
        .map(|device| Arc::new(TestBuffer::new(device.id(), shape.clone(), ElementType::F32)))
        .collect()
}
