//! Model allocation: coordinator, lifetime derivation and operator resolution
//!
//! The coordinator orchestrates the two-phase allocation protocol
//! (begin / Prepare-stage scratch registration / finish) described in
//! [`coordinator`]; [`info`] derives buffer lifetimes from the operator
//! graph; [`resolver`] maps opcodes to kernel registrations; [`tensors`]
//! holds the runtime metadata records everything operates on.

pub mod coordinator;
pub mod info;
pub mod resolver;
pub mod tensors;

pub use coordinator::{ModelAllocation, ModelAllocator, ScratchBufferHandles};
pub use info::{offline_planned_offsets, AllocationInfo, AllocationInfoBuilder, SlotRef};
pub use resolver::{BuiltinOpResolver, BuiltinParser, OpRegistration, OpResolver};
pub use tensors::{
    AffineQuantization, AllocationKind, EvalTensor, FullTensor, OperatorNode, PerChannelQuant,
    ScratchBufferHandle, TensorData,
};
