//! Allocation coordinator
//!
//! Drives the two-phase model-allocation protocol over one arena:
//!
//! 1. [`begin_model_allocation`](ModelAllocator::begin_model_allocation)
//!    materializes the eval-tensor and operator-node tables from the model.
//! 2. The driver runs each kernel's Prepare stage, during which kernels call
//!    [`request_scratch_buffer`](ModelAllocator::request_scratch_buffer).
//!    Handle records are staged in the arena's head region because their
//!    count is unknown until Prepare finishes.
//! 3. [`finish_model_allocation`](ModelAllocator::finish_model_allocation)
//!    moves the handle records to the tail, derives buffer lifetimes, runs
//!    the greedy planner, commits offsets, reclaims the head for the
//!    activation block and allocates variable-tensor storage.
//!
//! Exactly one model may be mid-allocation at a time; any other
//! interleaving is a protocol error.

use crate::allocator::info::{offline_planned_offsets, AllocationInfoBuilder, SlotRef};
use crate::allocator::resolver::OpResolver;
use crate::allocator::tensors::{
    AffineQuantization, AllocationKind, EvalTensor, FullTensor, OperatorNode, PerChannelQuant,
    ScratchBufferHandle, TensorData,
};
use crate::error::{ForgeResult, MicroForgeError};
use crate::memory::{align_up, ArenaUsage, BUFFER_ALIGNMENT, DualCursorArena, GreedyPlanner};
use crate::model::format::{BuiltinOperator, Model, SubGraph};

/// Bytes per scratch handle record in the arena: `bytes`, `node` and
/// `data_offset`, each a little `u32` slot.
const SCRATCH_RECORD_BYTES: usize = 12;

/// Sentinel stored in a record's `data_offset` slot before commit.
const SCRATCH_UNSET: u32 = u32::MAX;

/// Runtime tables produced by `begin_model_allocation`.
///
/// The driver owns these; kernels receive views of them during Prepare and
/// Invoke.
#[derive(Debug)]
pub struct ModelAllocation<'m> {
    /// One entry per subgraph tensor
    pub tensors: Vec<EvalTensor<'m>>,
    /// One entry per subgraph operator
    pub nodes: Vec<OperatorNode<'m>>,
}

/// Opaque handle to the committed scratch-buffer record table.
///
/// Returned by `finish_model_allocation`; resolve individual buffers with
/// [`ModelAllocator::scratch_buffer_offset`].
#[derive(Debug, Clone, Copy)]
pub struct ScratchBufferHandles {
    base: usize,
    count: usize,
}

impl ScratchBufferHandles {
    /// Number of scratch buffers registered during Prepare.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Static allocator for one model over one caller-provided arena.
///
/// # Example
///
/// ```
/// use microforge::allocator::{BuiltinOpResolver, ModelAllocator};
/// use microforge::model::{BuiltinOperator, ModelBuilder, TensorType};
///
/// let mut builder = ModelBuilder::new();
/// let opcode = builder.add_opcode(BuiltinOperator::Softmax, None);
/// let input = builder.add_tensor(TensorType::Float32, &[1, 10], 0);
/// let output = builder.add_tensor(TensorType::Float32, &[1, 10], 0);
/// builder.add_operator(opcode, &[input], &[output], vec![]);
/// builder.set_inputs(&[input]);
/// builder.set_outputs(&[output]);
/// let model = builder.build();
///
/// let mut arena = vec![0u8; 4096];
/// let mut allocator = ModelAllocator::new(&mut arena);
/// let resolver = BuiltinOpResolver::with_all_builtins();
///
/// let mut allocation = allocator.begin_model_allocation(&model, &resolver)?;
/// // ... kernels Prepare, possibly requesting scratch buffers ...
/// let scratch = allocator.finish_model_allocation(&model, &mut allocation)?;
///
/// assert!(allocation.tensors.iter().all(|t| t.data.is_some()));
/// assert!(scratch.is_empty());
/// # Ok::<(), microforge::MicroForgeError>(())
/// ```
#[derive(Debug)]
pub struct ModelAllocator<'a> {
    arena: DualCursorArena<'a>,
    allocating: bool,
    scratch_count: usize,
}

impl<'a> ModelAllocator<'a> {
    /// Create an allocator over a caller-provided arena.
    ///
    /// The arena should be 16-byte aligned; a misaligned base costs the
    /// leading bytes and logs a warning.
    pub fn new(arena: &'a mut [u8]) -> Self {
        let arena = DualCursorArena::new(arena);
        tracing::info!("model allocator created over {} byte arena", arena.capacity());
        Self {
            arena,
            allocating: false,
            scratch_count: 0,
        }
    }

    /// Start allocating a model: build the eval-tensor and operator-node
    /// tables.
    ///
    /// # Errors
    /// - A model allocation is already in progress
    /// - The model does not have exactly one subgraph
    /// - An opcode is missing from the resolver, a builtin operator carries
    ///   custom options, or an option blob fails to parse
    pub fn begin_model_allocation<'m>(
        &mut self,
        model: &'m Model,
        op_resolver: &dyn OpResolver,
    ) -> ForgeResult<ModelAllocation<'m>> {
        if self.allocating {
            return Err(MicroForgeError::ProtocolMisuse(
                "model allocation started before finishing the previous model".to_string(),
            ));
        }
        let subgraph = single_subgraph(model)?;

        self.allocating = true;
        self.scratch_count = 0;

        let tensors = build_eval_tensors(model, subgraph)?;
        let nodes = build_operator_nodes(model, subgraph, op_resolver)?;

        tracing::debug!(
            "model allocation started: {} tensors, {} operators",
            tensors.len(),
            nodes.len()
        );
        Ok(ModelAllocation { tensors, nodes })
    }

    /// Register a scratch buffer for the operator at `node_id`.
    ///
    /// Only valid between begin and finish, i.e. during the Prepare stage.
    /// Returns a small identifier to pass to
    /// [`scratch_buffer_offset`](Self::scratch_buffer_offset) after commit.
    pub fn request_scratch_buffer(&mut self, node_id: usize, bytes: usize) -> ForgeResult<usize> {
        if !self.allocating {
            return Err(MicroForgeError::ProtocolMisuse(
                "scratch buffers can only be requested during model allocation".to_string(),
            ));
        }
        if bytes > u32::MAX as usize {
            return Err(MicroForgeError::ArenaExhausted {
                needed: bytes,
                available: self.arena.available_memory(BUFFER_ALIGNMENT),
            });
        }
        if self.arena.has_live_temps() {
            return Err(MicroForgeError::ProtocolMisuse(
                "reset temp allocations before requesting scratch buffers".to_string(),
            ));
        }

        // Regrow the head region by one record. The handles stay here until
        // finish moves them to the tail and reclaims the head for the
        // activation block.
        let needed = (self.scratch_count + 1) * SCRATCH_RECORD_BYTES;
        let start = self.arena.ensure_head(needed, 4).ok_or_else(|| {
            MicroForgeError::ArenaExhausted {
                needed,
                available: self.arena.tail_offset() - self.arena.buffer_start(),
            }
        })?;

        let record = start + self.scratch_count * SCRATCH_RECORD_BYTES;
        self.arena.write_u32(record, bytes as u32);
        self.arena.write_u32(record + 4, node_id as u32);
        self.arena.write_u32(record + 8, SCRATCH_UNSET);

        let index = self.scratch_count;
        self.scratch_count += 1;
        tracing::trace!(
            "scratch buffer {} registered: {} bytes for node {}",
            index,
            bytes,
            node_id
        );
        Ok(index)
    }

    /// Finish allocating: plan, commit, and allocate variable storage.
    ///
    /// On success every planning-eligible tensor and scratch buffer has a
    /// committed arena offset, variable tensors have dedicated tail storage,
    /// and the allocator is idle again.
    ///
    /// # Errors
    /// - No model allocation is in progress
    /// - Offline-plan metadata is invalid
    /// - A derived lifetime is inconsistent
    /// - The packed footprint exceeds the remaining arena slack
    pub fn finish_model_allocation(
        &mut self,
        model: &Model,
        allocation: &mut ModelAllocation<'_>,
    ) -> ForgeResult<ScratchBufferHandles> {
        if !self.allocating {
            return Err(MicroForgeError::ProtocolMisuse(
                "model allocation finished before starting".to_string(),
            ));
        }
        if self.arena.has_live_temps() {
            return Err(MicroForgeError::ProtocolMisuse(
                "reset temp allocations before finishing model allocation".to_string(),
            ));
        }
        let subgraph = single_subgraph(model)?;
        if allocation.tensors.len() != subgraph.tensors.len() {
            return Err(MicroForgeError::ProtocolMisuse(
                "allocation tables do not match the model being finished".to_string(),
            ));
        }

        let handles = self.move_scratch_records_to_tail()?;
        self.commit_static_memory_plan(model, subgraph, allocation, handles)?;
        self.allocate_variables(subgraph, &mut allocation.tensors)?;

        self.allocating = false;
        tracing::info!(
            "model allocation finished: {} of {} arena bytes used",
            self.arena.used_bytes(),
            self.arena.capacity()
        );
        Ok(handles)
    }

    /// Committed payload offset of scratch buffer `index`.
    ///
    /// Constant-time record lookup; `None` for an out-of-range index or a
    /// buffer that was never committed.
    pub fn scratch_buffer_offset(
        &self,
        handles: &ScratchBufferHandles,
        index: usize,
    ) -> Option<usize> {
        if index >= handles.count {
            return None;
        }
        let slot = handles.base + index * SCRATCH_RECORD_BYTES + 8;
        match self.arena.read_u32(slot) {
            SCRATCH_UNSET => None,
            offset => Some(offset as usize),
        }
    }

    /// Materialize rich tensor metadata with model lifetime.
    ///
    /// Per-channel quantization arrays are allocated permanently from the
    /// tail.
    pub fn allocate_persistent_tensor<'m>(
        &mut self,
        model: &'m Model,
        tensors: &[EvalTensor<'m>],
        index: usize,
    ) -> ForgeResult<FullTensor<'m>> {
        self.build_full_tensor(model, tensors, index, QuantPlacement::Persistent)
    }

    /// Materialize rich tensor metadata valid until the next
    /// [`reset_temp_allocations`](Self::reset_temp_allocations).
    pub fn allocate_temp_tensor<'m>(
        &mut self,
        model: &'m Model,
        tensors: &[EvalTensor<'m>],
        index: usize,
    ) -> ForgeResult<FullTensor<'m>> {
        self.build_full_tensor(model, tensors, index, QuantPlacement::Temp)
    }

    /// Free every temp allocation made through this allocator.
    pub fn reset_temp_allocations(&mut self) {
        self.arena.reset_temp_allocations();
    }

    /// Total arena bytes consumed so far.
    pub fn used_bytes(&self) -> usize {
        self.arena.used_bytes()
    }

    /// Arena occupancy snapshot.
    pub fn arena_usage(&self) -> ArenaUsage {
        self.arena.usage()
    }

    /// The underlying arena, for payload access by kernels and drivers.
    pub fn arena(&self) -> &DualCursorArena<'a> {
        &self.arena
    }

    /// Mutable payload access.
    pub fn arena_mut(&mut self) -> &mut DualCursorArena<'a> {
        &mut self.arena
    }

    fn move_scratch_records_to_tail(&mut self) -> ForgeResult<ScratchBufferHandles> {
        if self.scratch_count == 0 {
            return Ok(ScratchBufferHandles { base: 0, count: 0 });
        }
        let bytes = self.scratch_count * SCRATCH_RECORD_BYTES;
        let records: Vec<u8> = self
            .arena
            .bytes(self.arena.buffer_start(), bytes)
            .to_vec();
        let base = self
            .arena
            .from_tail(bytes, 4)
            .ok_or_else(|| MicroForgeError::ArenaExhausted {
                needed: bytes,
                available: self.arena.available_memory(4),
            })?;
        self.arena.bytes_mut(base, bytes).copy_from_slice(&records);
        Ok(ScratchBufferHandles {
            base,
            count: self.scratch_count,
        })
    }

    fn read_scratch_handles(&self, handles: ScratchBufferHandles) -> Vec<ScratchBufferHandle> {
        (0..handles.count)
            .map(|i| {
                let record = handles.base + i * SCRATCH_RECORD_BYTES;
                let data = self.arena.read_u32(record + 8);
                ScratchBufferHandle {
                    bytes: self.arena.read_u32(record) as usize,
                    node: self.arena.read_u32(record + 4) as usize,
                    data_offset: if data == SCRATCH_UNSET {
                        None
                    } else {
                        Some(data as usize)
                    },
                }
            })
            .collect()
    }

    fn commit_static_memory_plan(
        &mut self,
        model: &Model,
        subgraph: &SubGraph,
        allocation: &mut ModelAllocation<'_>,
        handles: ScratchBufferHandles,
    ) -> ForgeResult<()> {
        // 1. Derive the lifetime of every tensor and scratch buffer.
        let offline = offline_planned_offsets(model, subgraph.tensors.len())?;
        let mut builder = AllocationInfoBuilder::new();
        builder.add_tensors(subgraph, offline.as_deref(), &allocation.tensors)?;
        builder.add_scratch_buffers(&self.read_scratch_handles(handles));
        let info = builder.finish();

        // 2. Hand the planning-eligible records to the planner.
        let mut planner = GreedyPlanner::new();
        for (record_index, entry) in info.iter().enumerate() {
            if !entry.needs_allocating {
                continue;
            }
            let (first, last) = match (entry.first_created, entry.last_used) {
                (Some(first), Some(last)) => (first, last),
                _ => {
                    return Err(MicroForgeError::InvalidLifetime {
                        tensor: record_index,
                        first: entry.first_created,
                        last: entry.last_used,
                    })
                }
            };
            let aligned = align_up(entry.bytes, BUFFER_ALIGNMENT);
            match entry.offline_offset {
                Some(offset) => planner.add_fixed_buffer(aligned, first, last, offset),
                None => planner.add_buffer(aligned, first, last),
            }
        }

        // 3. The packed footprint must fit the remaining slack.
        let needed = planner.required_bytes();
        let available = self.arena.available_memory(BUFFER_ALIGNMENT);
        if needed > available {
            return Err(MicroForgeError::PlannerOverflow { needed, available });
        }

        // 4. Commit offsets through the slot references.
        let block_base = self.arena.buffer_start();
        let mut planner_index = 0;
        for entry in &info {
            if !entry.needs_allocating {
                continue;
            }
            let offset = block_base + planner.offset_for(planner_index);
            planner_index += 1;
            match entry.slot {
                SlotRef::Tensor(tensor) => {
                    allocation.tensors[tensor].data = Some(TensorData::Arena(offset));
                }
                SlotRef::Scratch(scratch) => {
                    let slot = handles.base + scratch * SCRATCH_RECORD_BYTES + 8;
                    self.arena.write_u32(slot, offset as u32);
                }
            }
        }

        // 5. Reclaim the head (scratch records moved out already) and
        //    reserve the activation block.
        self.arena
            .ensure_head(needed, BUFFER_ALIGNMENT)
            .ok_or(MicroForgeError::PlannerOverflow { needed, available })?;

        tracing::debug!(
            "memory plan committed: {} buffers, {} byte activation block",
            planner.buffer_count(),
            needed
        );
        Ok(())
    }

    fn allocate_variables(
        &mut self,
        subgraph: &SubGraph,
        tensors: &mut [EvalTensor<'_>],
    ) -> ForgeResult<()> {
        for (index, def) in subgraph.tensors.iter().enumerate() {
            if !def.is_variable {
                continue;
            }
            let bytes = tensors[index].byte_length()?;
            let offset = self.arena.from_tail(bytes, BUFFER_ALIGNMENT).ok_or_else(|| {
                MicroForgeError::ArenaExhausted {
                    needed: bytes,
                    available: self.arena.available_memory(BUFFER_ALIGNMENT),
                }
            })?;
            tensors[index].data = Some(TensorData::Arena(offset));
            tracing::trace!("variable tensor {} allocated {} tail bytes", index, bytes);
        }
        Ok(())
    }

    fn build_full_tensor<'m>(
        &mut self,
        model: &'m Model,
        tensors: &[EvalTensor<'m>],
        index: usize,
        placement: QuantPlacement,
    ) -> ForgeResult<FullTensor<'m>> {
        let subgraph = single_subgraph(model)?;
        let def = subgraph.tensors.get(index).ok_or_else(|| {
            MicroForgeError::InconsistentModel(format!("tensor index {} out of range", index))
        })?;

        let eval = tensors.get(index).copied();
        let constant = model.buffer_data(def.buffer);
        // The eval-tensor table is the source of truth for planned buffers.
        let data = eval
            .and_then(|t| t.data)
            .or(constant.map(TensorData::Model));
        let bytes = match eval {
            Some(tensor) => tensor.byte_length()?,
            None => EvalTensor::from_def(def, model).byte_length()?,
        };

        let quantization = match &def.quantization {
            Some(quant) if !quant.scales.is_empty() && !quant.zero_points.is_empty() => {
                Some(self.build_quantization(quant, placement)?)
            }
            _ => None,
        };

        Ok(FullTensor {
            dtype: def.dtype,
            bytes,
            allocation: if constant.is_some() {
                AllocationKind::ModelRo
            } else {
                AllocationKind::ArenaRw
            },
            is_variable: def.is_variable,
            dims: &def.shape,
            data,
            quantization,
        })
    }

    fn build_quantization<'m>(
        &mut self,
        quant: &'m crate::model::format::QuantizationDef,
        placement: QuantPlacement,
    ) -> ForgeResult<AffineQuantization<'m>> {
        let channels = quant.scales.len();
        let zp_bytes = channels * 4;
        let zp_offset = match placement {
            QuantPlacement::Persistent => self.arena.from_tail(zp_bytes, 4),
            QuantPlacement::Temp => self.arena.allocate_temp(zp_bytes, 4),
        }
        .ok_or_else(|| MicroForgeError::ArenaExhausted {
            needed: zp_bytes,
            available: self.arena.available_memory(4),
        })?;

        // Zero points are serialized as 64-bit values and always copied.
        let zero_points: Vec<i32> = quant.zero_points.iter().map(|&zp| zp as i32).collect();
        self.arena.write_i32s(zp_offset, &zero_points);

        Ok(AffineQuantization {
            scale: quant.scales[0],
            zero_point: quant.zero_points[0] as i32,
            per_channel: Some(PerChannelQuant {
                scales: &quant.scales,
                zero_points_offset: zp_offset,
                channels,
                quantized_dimension: quant.quantized_dimension,
            }),
        })
    }
}

#[derive(Clone, Copy)]
enum QuantPlacement {
    Persistent,
    Temp,
}

fn single_subgraph(model: &Model) -> ForgeResult<&SubGraph> {
    match model.subgraphs.as_slice() {
        [subgraph] => Ok(subgraph),
        other => Err(MicroForgeError::UnsupportedModel(format!(
            "exactly one subgraph required, model has {}",
            other.len()
        ))),
    }
}

fn build_eval_tensors<'m>(
    model: &'m Model,
    subgraph: &'m SubGraph,
) -> ForgeResult<Vec<EvalTensor<'m>>> {
    let mut tensors = Vec::with_capacity(subgraph.tensors.len());
    for (index, def) in subgraph.tensors.iter().enumerate() {
        if def.buffer as usize >= model.buffers.len() {
            return Err(MicroForgeError::InconsistentModel(format!(
                "tensor {} references buffer {} beyond the buffer table",
                index, def.buffer
            )));
        }
        tensors.push(EvalTensor::from_def(def, model));
    }
    Ok(tensors)
}

fn build_operator_nodes<'m>(
    model: &'m Model,
    subgraph: &'m SubGraph,
    op_resolver: &dyn OpResolver,
) -> ForgeResult<Vec<OperatorNode<'m>>> {
    let mut nodes = Vec::with_capacity(subgraph.operators.len());
    for (index, op) in subgraph.operators.iter().enumerate() {
        let opcode = model
            .opcodes
            .get(op.opcode_index as usize)
            .ok_or_else(|| {
                MicroForgeError::InconsistentModel(format!(
                    "operator {} references opcode {} beyond the opcode table",
                    index, op.opcode_index
                ))
            })?;

        let (registration, builtin_data, custom_data) =
            if opcode.builtin == BuiltinOperator::Custom {
                let name = opcode.custom_name.as_deref().ok_or_else(|| {
                    MicroForgeError::InconsistentModel(format!(
                        "custom opcode {} has no name",
                        op.opcode_index
                    ))
                })?;
                let registration = op_resolver.find_custom_op(name).ok_or_else(|| {
                    MicroForgeError::InconsistentModel(format!(
                        "missing registration for custom operator '{}'",
                        name
                    ))
                })?;
                (registration.clone(), None, op.custom_options.as_deref())
            } else {
                if op.custom_options.is_some() {
                    return Err(MicroForgeError::InconsistentModel(format!(
                        "builtin operator {} carries custom options",
                        opcode.builtin.name()
                    )));
                }
                let registration = op_resolver.find_op(opcode.builtin).ok_or_else(|| {
                    MicroForgeError::InconsistentModel(format!(
                        "missing registration for {}",
                        opcode.builtin.name()
                    ))
                })?;
                let parser = op_resolver.builtin_parser(opcode.builtin).ok_or_else(|| {
                    MicroForgeError::InconsistentModel(format!(
                        "no option parser registered for {}",
                        opcode.builtin.name()
                    ))
                })?;
                let data = parser(&op.builtin_options)?;
                (registration.clone(), Some(data), None)
            };

        nodes.push(OperatorNode {
            inputs: &op.inputs,
            outputs: &op.outputs,
            registration,
            builtin_data,
            custom_data,
        });
    }
    Ok(nodes)
}
