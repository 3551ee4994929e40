//! Runtime tensor and operator metadata
//!
//! These are the records the coordinator materializes during model
//! allocation. They borrow shape and constant data straight from the
//! decoded model (the zero-copy path) and refer to planned storage by arena
//! offset, so nothing here owns payload memory.

use crate::error::{ForgeResult, MicroForgeError};
use crate::model::format::{Model, TensorDef, TensorType};
use crate::model::options::BuiltinData;

use crate::allocator::resolver::OpRegistration;

/// Where a tensor payload lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorData<'m> {
    /// Constant payload aliasing the decoded model
    Model(&'m [u8]),
    /// Byte offset into the arena, assigned at commit
    Arena(usize),
}

/// Minimal runtime tensor: element type, shape and payload location.
///
/// One of these exists per subgraph tensor for the lifetime of the model.
/// `data` is `None` until the memory plan is committed (or, for constants,
/// points into the model from the start).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvalTensor<'m> {
    pub dtype: TensorType,
    /// Dimension sizes borrowed from the model; empty for a scalar
    pub dims: &'m [i32],
    pub data: Option<TensorData<'m>>,
}

impl<'m> EvalTensor<'m> {
    /// Build the runtime record for one model tensor.
    ///
    /// Constant tensors (non-empty serialized buffer) get their payload
    /// alias immediately; everything else starts unset.
    pub fn from_def(def: &'m TensorDef, model: &'m Model) -> Self {
        Self {
            dtype: def.dtype,
            dims: &def.shape,
            data: model.buffer_data(def.buffer).map(TensorData::Model),
        }
    }

    /// Payload size in bytes: element count times element size.
    ///
    /// A scalar (empty shape) occupies one element.
    pub fn byte_length(&self) -> ForgeResult<usize> {
        let mut elements = 1usize;
        for &dim in self.dims {
            if dim < 0 {
                return Err(MicroForgeError::InconsistentModel(format!(
                    "negative dimension {} in tensor shape",
                    dim
                )));
            }
            elements = elements.saturating_mul(dim as usize);
        }
        Ok(elements.saturating_mul(self.dtype.byte_size()))
    }

    /// Committed arena offset, if the payload lives in the arena.
    pub fn arena_offset(&self) -> Option<usize> {
        match self.data {
            Some(TensorData::Arena(offset)) => Some(offset),
            _ => None,
        }
    }
}

/// Per-operator runtime state.
#[derive(Debug, Clone)]
pub struct OperatorNode<'m> {
    /// Subgraph tensor indices consumed by this operator
    pub inputs: &'m [i32],
    /// Subgraph tensor indices produced by this operator
    pub outputs: &'m [i32],
    /// Kernel registration resolved from the opcode table
    pub registration: OpRegistration,
    /// Parsed builtin options; `None` for custom operators
    pub builtin_data: Option<BuiltinData>,
    /// Opaque option bytes for custom operators
    pub custom_data: Option<&'m [u8]>,
}

/// Kernel-requested transient buffer record.
///
/// Created during the Prepare stage; `data_offset` is assigned when the
/// memory plan is committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchBufferHandle {
    /// Requested size in bytes
    pub bytes: usize,
    /// Operator node that owns the buffer
    pub node: usize,
    /// Committed arena offset of the buffer payload
    pub data_offset: Option<usize>,
}

/// How a [`FullTensor`]'s payload storage was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    /// Read-write storage inside the arena
    ArenaRw,
    /// Read-only constant aliasing the serialized model
    ModelRo,
}

/// Per-channel affine quantization parameters.
///
/// Scales alias the decoded model; zero points are converted from the
/// serialized 64-bit integers into a 32-bit array inside the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerChannelQuant<'m> {
    pub scales: &'m [f32],
    /// Arena offset of the `i32` zero-point array
    pub zero_points_offset: usize,
    pub channels: usize,
    pub quantized_dimension: i32,
}

/// Affine quantization attached to a rich tensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineQuantization<'m> {
    /// First-channel scale, always populated
    pub scale: f32,
    /// First-channel zero point, always populated
    pub zero_point: i32,
    pub per_channel: Option<PerChannelQuant<'m>>,
}

/// Rich tensor metadata, materialized on demand.
///
/// Persistent flavors live for the model lifetime; temp flavors are valid
/// until the next
/// [`reset_temp_allocations`](crate::allocator::ModelAllocator::reset_temp_allocations).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FullTensor<'m> {
    pub dtype: TensorType,
    /// Payload size in bytes
    pub bytes: usize,
    pub allocation: AllocationKind,
    pub is_variable: bool,
    pub dims: &'m [i32],
    pub data: Option<TensorData<'m>>,
    pub quantization: Option<AffineQuantization<'m>>,
}
