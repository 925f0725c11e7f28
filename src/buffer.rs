//! Device-buffer abstraction.
//!
//! A [`GlobalDeviceArray`][crate::array::GlobalDeviceArray] is metadata wrapped around opaque
//! per-device buffers; it never looks at their bytes. These traits are the narrow seam between
//! the sharding layer and whatever runtime actually owns device memory: a PJRT-style client in
//! production, an in-memory stand-in in tests.

use crate::errors::ArrayError;
use crate::grid::{DeviceId, GridDevice};

/// Element type carried by a buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    Pred,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    BF16,
    F32,
    F64,
}

/// A single on-device buffer holding one shard of a global array.
pub trait DeviceBuffer {
    /// ID of the device this buffer lives on.
    fn device_id(&self) -> DeviceId;

    /// Shape of the data held by this buffer.
    fn shape(&self) -> &[usize];

    /// Element type of the data held by this buffer.
    fn element_type(&self) -> ElementType;

    /// Blocks until the computation producing this buffer has completed.
    fn block_until_ready(&self) -> Result<(), ArrayError>;
}

/// Host-side data that can be transferred onto a device.
pub trait HostValue {
    /// Shape of the host value.
    fn shape(&self) -> &[usize];

    /// Element type of the host value.
    fn element_type(&self) -> ElementType;
}

/// Transfers host values onto devices.
///
/// Implemented by the surrounding runtime; the ingestion constructors on
/// [`GlobalDeviceArray`][crate::array::GlobalDeviceArray] are generic over it.
pub trait BufferPlacement {
    type Value: HostValue;
    type Buffer: DeviceBuffer;

    /// Places `value` on `device`, returning the resulting device buffer.
    fn place(&self, value: Self::Value, device: &GridDevice) -> Result<Self::Buffer, ArrayError>;

    /// Places each `(value, device)` pair in order.
    fn place_many(
        &self,
        pairs: Vec<(Self::Value, GridDevice)>,
    ) -> Result<Vec<Self::Buffer>, ArrayError> {
        pairs.into_iter().map(|(value, device)| self.place(value, &device)).collect()
    }
}
