//! MicroForge - Static memory planner for embedded inference
//!
//! A static memory allocator and planner for neural-network interpreters on
//! severely memory-constrained devices: tens to hundreds of kilobytes of
//! RAM, no heap. Given a decoded model and one caller-provided byte arena,
//! MicroForge materializes the runtime metadata, derives every buffer's
//! lifetime from the operator graph, packs lifetime-disjoint buffers into a
//! minimal activation block and commits stable offsets for the duration of
//! inference.
//!
//! The flow mirrors how an interpreter drives it:
//!
//! ```
//! use microforge::allocator::{BuiltinOpResolver, ModelAllocator};
//! use microforge::model::{BuiltinOperator, ModelBuilder, TensorType};
//!
//! // Normally decoded from serialized bytes with `Model::from_bytes`.
//! let mut builder = ModelBuilder::new();
//! let add = builder.add_opcode(BuiltinOperator::Add, None);
//! let a = builder.add_tensor(TensorType::Float32, &[16], 0);
//! let b = builder.add_tensor(TensorType::Float32, &[16], 0);
//! let sum = builder.add_tensor(TensorType::Float32, &[16], 0);
//! builder.add_operator(add, &[a, b], &[sum], vec![]);
//! builder.set_inputs(&[a, b]);
//! builder.set_outputs(&[sum]);
//! let model = builder.build();
//!
//! let mut arena = vec![0u8; 4 * 1024];
//! let mut allocator = ModelAllocator::new(&mut arena);
//! let resolver = BuiltinOpResolver::with_all_builtins();
//!
//! let mut allocation = allocator.begin_model_allocation(&model, &resolver)?;
//! // ... kernel Prepare stage runs here ...
//! allocator.finish_model_allocation(&model, &mut allocation)?;
//!
//! // Every tensor now has a committed payload location.
//! assert!(allocation.tensors.iter().all(|t| t.data.is_some()));
//! # Ok::<(), microforge::MicroForgeError>(())
//! ```

pub mod allocator;
pub mod error;
pub mod logging;
pub mod memory;
pub mod model;

pub use allocator::{BuiltinOpResolver, ModelAllocation, ModelAllocator, OpResolver};
pub use error::{ErrorCategory, ForgeResult, MicroForgeError};
pub use memory::{DualCursorArena, GreedyPlanner, BUFFER_ALIGNMENT};
pub use model::{Model, ModelBuilder};
