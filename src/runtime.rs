//! Integration hooks for an outer execution runtime.
//!
//! An execution runtime that consumes and produces [`GlobalDeviceArray`]s needs three things:
//! a way to summarize an array as an abstract value, a way to extract its per-device buffers for
//! dispatch, and a way to rebuild an array from the buffers a computation returns. The first two
//! are [`RuntimeHandlers`] registered per buffer type in a [`HandlerRegistry`]; the third is a
//! prebuilt closure from [`result_handler`].
//!
//! Result construction is on the hot path of every computation, so [`result_handler`] resolves
//! the layout once up front and the returned closure builds arrays with validation disabled: the
//! runtime produced the buffers itself against that same layout.

use std::any::{Any, TypeId};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::array::{FastPathLayout, GlobalDeviceArray};
use crate::buffer::{DeviceBuffer, ElementType};
use crate::cache::LayoutCache;
use crate::errors::{ArrayError, ShardingError};
use crate::grid::DeviceGrid;
use crate::partition::PartitionSpec;

/// Shape and element type of a value, independent of any concrete buffers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AbstractValue {
    shape: Vec<usize>,
    element_type: ElementType,
}

impl AbstractValue {
    /// Creates an abstract value.
    pub fn new(shape: Vec<usize>, element_type: ElementType) -> Self {
        Self { shape, element_type }
    }

    /// Shape of the described value.
    pub fn shape(&self) -> &[usize] {
        self.shape.as_slice()
    }

    /// Element type of the described value.
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }
}

/// Per-buffer-type hooks a runtime uses to consume global arrays as computation arguments.
pub struct RuntimeHandlers<B> {
    /// Summarizes an array as an [`AbstractValue`] for tracing and signature checks.
    pub abstract_value: fn(&GlobalDeviceArray<B>) -> AbstractValue,

    /// Extracts the per-device argument buffers for dispatch.
    ///
    /// The array's buffers are already placed on their devices, so the default returns them
    /// verbatim without any copy or re-placement.
    pub shard_argument: fn(&GlobalDeviceArray<B>) -> Vec<Arc<B>>,
}

impl<B> Clone for RuntimeHandlers<B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for RuntimeHandlers<B> {}

impl<B: DeviceBuffer> Default for RuntimeHandlers<B> {
    fn default() -> Self {
        Self {
            abstract_value: |array| {
                AbstractValue::new(array.global_shape().to_vec(), array.element_type())
            },
            shard_argument: |array| array.local_buffers().to_vec(),
        }
    }
}

/// Registry of [`RuntimeHandlers`], keyed by buffer type.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handlers` for buffer type `B`, replacing any previous registration.
    pub fn register<B: 'static>(&self, handlers: RuntimeHandlers<B>) {
        self.handlers.insert(TypeId::of::<B>(), Box::new(handlers));
    }

    /// Returns the handlers registered for buffer type `B`, if any.
    pub fn handlers<B: 'static>(&self) -> Option<RuntimeHandlers<B>> {
        self.handlers
            .get(&TypeId::of::<B>())
            .and_then(|entry| entry.value().downcast_ref::<RuntimeHandlers<B>>().copied())
    }
}

/// Process-wide handler registry.
pub fn global_handler_registry() -> &'static HandlerRegistry {
    static REGISTRY: OnceLock<HandlerRegistry> = OnceLock::new();
    REGISTRY.get_or_init(HandlerRegistry::new)
}

/// Prebuilds a constructor turning one computation result (one buffer per local device, in
/// canonical order) into a [`GlobalDeviceArray`].
///
/// The layout for `(aval.shape(), grid, spec)` is resolved once through `cache`; the returned
/// closure reuses it and skips buffer validation entirely.
pub fn result_handler<B: DeviceBuffer>(
    aval: &AbstractValue,
    grid: &DeviceGrid,
    spec: &PartitionSpec,
    process_index: usize,
    cache: &LayoutCache,
) -> Result<impl Fn(Vec<B>) -> Result<GlobalDeviceArray<B>, ArrayError>, ShardingError> {
    let table = cache.shard_table(aval.shape(), grid, spec)?;
    let local_devices = grid.local_devices(process_index);
    let global_shape = aval.shape().to_vec();
    let grid = grid.clone();
    let spec = spec.clone();

    Ok(move |buffers: Vec<B>| {
        let buffers = buffers.into_iter().map(Arc::new).collect();
        GlobalDeviceArray::with_layout(
            global_shape.clone(),
            grid.clone(),
            spec.clone(),
            process_index,
            buffers,
            Some(FastPathLayout { table: Arc::clone(&table), local_devices: local_devices.clone() }),
            false,
        )
    })
}
