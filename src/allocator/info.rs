//! Allocation-info construction
//!
//! Derives every buffer's live range from the operator graph before
//! planning. One record exists per subgraph tensor, followed by one per
//! scratch buffer; records for constants, variables and never-referenced
//! tensors are excluded from planning. The records only live for the
//! duration of `finish_model_allocation` and are discarded after the plan
//! is committed.

use std::borrow::Cow;

use crate::allocator::tensors::{EvalTensor, ScratchBufferHandle};
use crate::error::{ForgeResult, MicroForgeError};
use crate::model::decode::i32_array_from_bytes;
use crate::model::format::{Model, SubGraph, OFFLINE_ALLOC_METADATA_NAME};

/// Identifies where a committed offset must be written.
///
/// Replaces a type-erased pointer-to-pointer: the coordinator dispatches on
/// the tag and writes the offset into the eval-tensor table or the scratch
/// handle record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotRef {
    /// `data` field of the eval tensor at this subgraph index
    Tensor(usize),
    /// `data_offset` field of the scratch handle at this index
    Scratch(usize),
}

/// Per-buffer planning record.
#[derive(Debug, Clone, Copy)]
pub struct AllocationInfo {
    /// Payload size in bytes (unaligned)
    pub bytes: usize,
    /// Where the committed offset gets written
    pub slot: SlotRef,
    /// Operator index that first creates the buffer
    pub first_created: Option<usize>,
    /// Operator index that last reads the buffer
    pub last_used: Option<usize>,
    /// Fixed arena offset from the offline plan, when present
    pub offline_offset: Option<usize>,
    /// False for constants, variables and never-referenced tensors
    pub needs_allocating: bool,
}

/// Builds the allocation-info array for one subgraph plus its scratch
/// buffers. Call [`add_tensors`](Self::add_tensors) then
/// [`add_scratch_buffers`](Self::add_scratch_buffers), then take the records
/// with [`finish`](Self::finish).
#[derive(Debug, Default)]
pub struct AllocationInfoBuilder {
    info: Vec<AllocationInfo>,
    tensor_count: usize,
}

impl AllocationInfoBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive lifetimes for every subgraph tensor.
    ///
    /// The derivation walks operators in reverse: an operator input extends
    /// `last_used` backward-first, an operator output pulls `first_created`
    /// earlier. Subgraph inputs exist from operator 0; subgraph outputs
    /// survive to the final operator.
    ///
    /// # Errors
    /// - Tensor indices out of range
    /// - Offline offsets below `-1`
    /// - A tensor that is produced but never consumed (partial lifetime)
    pub fn add_tensors(
        &mut self,
        subgraph: &SubGraph,
        offline_offsets: Option<&[i32]>,
        eval_tensors: &[EvalTensor<'_>],
    ) -> ForgeResult<()> {
        self.tensor_count = eval_tensors.len();
        self.info.reserve(eval_tensors.len());

        for (i, tensor) in eval_tensors.iter().enumerate() {
            let offline_offset = match offline_offsets {
                Some(offsets) => decode_offline_offset(offsets[i], i)?,
                None => None,
            };
            self.info.push(AllocationInfo {
                bytes: tensor.byte_length()?,
                slot: SlotRef::Tensor(i),
                first_created: None,
                last_used: None,
                offline_offset,
                needs_allocating: tensor.data.is_none() && !subgraph.tensors[i].is_variable,
            });
        }

        for &tensor_index in &subgraph.inputs {
            self.entry_mut(tensor_index)?.first_created = Some(0);
        }

        // Subgraph outputs stay live through the final operator.
        let operator_count = subgraph.operators.len();
        if operator_count > 0 {
            for &tensor_index in &subgraph.outputs {
                self.entry_mut(tensor_index)?.last_used = Some(operator_count - 1);
            }
        }

        for i in (0..operator_count).rev() {
            let op = &subgraph.operators[i];
            for &tensor_index in &op.inputs {
                if tensor_index < 0 {
                    continue; // optional input
                }

                // An operator may consume tensors that are neither subgraph
                // inputs nor any operator's output. When one of its inputs
                // is a subgraph input, force creation of those siblings at
                // this operator so they get a usable lifetime. Known to be
                // imperfect for graphs where no input of the operator is a
                // subgraph input.
                if self.entry(tensor_index)?.first_created == Some(0) {
                    for &sibling in &op.inputs {
                        if sibling < 0 {
                            continue;
                        }
                        let entry = self.entry_mut(sibling)?;
                        if entry.needs_allocating && entry.first_created.is_none() {
                            entry.first_created = Some(i);
                        }
                    }
                }

                let entry = self.entry_mut(tensor_index)?;
                if entry.last_used.map_or(true, |last| last < i) {
                    entry.last_used = Some(i);
                }
            }
            for &tensor_index in &op.outputs {
                let entry = self.entry_mut(tensor_index)?;
                if entry.first_created.map_or(true, |first| first > i) {
                    entry.first_created = Some(i);
                }
            }
        }

        // Work out which tensors actually need storage.
        for (i, entry) in self.info.iter_mut().enumerate() {
            let is_read_only = entry.first_created.is_none() && entry.last_used.is_some();
            if is_read_only {
                entry.needs_allocating = false;
            }

            let never_referenced = entry.first_created.is_none() && entry.last_used.is_none();
            if never_referenced && entry.needs_allocating {
                tracing::trace!("tensor {} is never referenced, skipping allocation", i);
                entry.needs_allocating = false;
            }

            if entry.needs_allocating
                && (entry.first_created.is_none() != entry.last_used.is_none())
            {
                return Err(MicroForgeError::InvalidLifetime {
                    tensor: i,
                    first: entry.first_created,
                    last: entry.last_used,
                });
            }
        }
        Ok(())
    }

    /// Append one record per scratch buffer.
    ///
    /// A scratch buffer lives exactly as long as its owning operator runs.
    pub fn add_scratch_buffers(&mut self, handles: &[ScratchBufferHandle]) {
        for (i, handle) in handles.iter().enumerate() {
            self.info.push(AllocationInfo {
                bytes: handle.bytes,
                slot: SlotRef::Scratch(i),
                first_created: Some(handle.node),
                last_used: Some(handle.node),
                offline_offset: None,
                needs_allocating: true,
            });
        }
    }

    /// Total record count (tensors plus scratch buffers).
    pub fn len(&self) -> usize {
        self.info.len()
    }

    pub fn is_empty(&self) -> bool {
        self.info.is_empty()
    }

    /// Take the built records.
    pub fn finish(self) -> Vec<AllocationInfo> {
        self.info
    }

    fn entry(&self, tensor_index: i32) -> ForgeResult<&AllocationInfo> {
        usize::try_from(tensor_index)
            .ok()
            .and_then(|i| self.info.get(i))
            .ok_or_else(|| bad_tensor_index(tensor_index))
    }

    fn entry_mut(&mut self, tensor_index: i32) -> ForgeResult<&mut AllocationInfo> {
        usize::try_from(tensor_index)
            .ok()
            .and_then(|i| self.info.get_mut(i))
            .ok_or_else(|| bad_tensor_index(tensor_index))
    }
}

fn bad_tensor_index(tensor_index: i32) -> MicroForgeError {
    MicroForgeError::InconsistentModel(format!("tensor index {} out of range", tensor_index))
}

fn decode_offline_offset(raw: i32, tensor: usize) -> ForgeResult<Option<usize>> {
    match raw {
        -1 => Ok(None),
        offset if offset >= 0 => Ok(Some(offset as usize)),
        other => Err(MicroForgeError::InconsistentModel(format!(
            "offline offset {} for tensor {} is invalid",
            other, tensor
        ))),
    }
}

/// Look up the offline memory plan, if the model carries one.
///
/// Returns the per-tensor offset array (one `i32` per subgraph tensor,
/// `-1` meaning "let the planner decide"), borrowed from the model when the
/// metadata buffer allows the zero-copy view.
///
/// # Errors
/// - Plan version other than 1
/// - Plan targeting a subgraph other than 0
/// - Offset count differing from the subgraph tensor count
pub fn offline_planned_offsets(
    model: &Model,
    tensor_count: usize,
) -> ForgeResult<Option<Cow<'_, [i32]>>> {
    for entry in &model.metadata {
        if entry.name != OFFLINE_ALLOC_METADATA_NAME {
            continue;
        }
        let data = model.buffer_data(entry.buffer).ok_or_else(|| {
            MicroForgeError::InconsistentModel(
                "offline plan metadata references an empty buffer".to_string(),
            )
        })?;
        let array = i32_array_from_bytes(data)?;
        if array.len() < 3 {
            return Err(MicroForgeError::InconsistentModel(format!(
                "offline plan buffer holds {} values, expected at least 3",
                array.len()
            )));
        }

        let version = array[0];
        if version != 1 {
            return Err(MicroForgeError::UnsupportedModel(format!(
                "offline plan version {} not supported",
                version
            )));
        }
        let subgraph_index = array[1];
        if subgraph_index != 0 {
            return Err(MicroForgeError::UnsupportedModel(format!(
                "offline plan targets subgraph {}, only subgraph 0 is supported",
                subgraph_index
            )));
        }
        let count = array[2];
        if count < 0 || count as usize != tensor_count || array.len() - 3 != count as usize {
            return Err(MicroForgeError::InconsistentModel(format!(
                "offline plan carries {} offsets for {} tensors",
                count, tensor_count
            )));
        }

        tracing::debug!("offline memory plan found covering {} tensors", count);
        return Ok(Some(match array {
            Cow::Borrowed(values) => Cow::Borrowed(&values[3..]),
            Cow::Owned(values) => Cow::Owned(values[3..].to_vec()),
        }));
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::builder::ModelBuilder;
    use crate::model::format::{BuiltinOperator, TensorType};

    fn eval_tensors<'m>(model: &'m Model) -> Vec<EvalTensor<'m>> {
        model.subgraphs[0]
            .tensors
            .iter()
            .map(|def| EvalTensor::from_def(def, model))
            .collect()
    }

    fn chain_model() -> Model {
        // t0 -> op0 -> t1 -> op1 -> t2 -> op2 -> t3
        let mut builder = ModelBuilder::new();
        let opcode = builder.add_opcode(BuiltinOperator::Add, None);
        let t0 = builder.add_tensor(TensorType::Float32, &[25], 0);
        let t1 = builder.add_tensor(TensorType::Float32, &[50], 0);
        let t2 = builder.add_tensor(TensorType::Float32, &[37], 0);
        let t3 = builder.add_tensor(TensorType::Float32, &[25], 0);
        builder.add_operator(opcode, &[t0], &[t1], vec![]);
        builder.add_operator(opcode, &[t1], &[t2], vec![]);
        builder.add_operator(opcode, &[t2], &[t3], vec![]);
        builder.set_inputs(&[t0]);
        builder.set_outputs(&[t3]);
        builder.build()
    }

    #[test]
    fn test_chain_lifetimes() {
        let model = chain_model();
        let tensors = eval_tensors(&model);
        let mut builder = AllocationInfoBuilder::new();
        builder
            .add_tensors(&model.subgraphs[0], None, &tensors)
            .unwrap();
        let info = builder.finish();

        assert_eq!(info[0].first_created, Some(0)); // subgraph input
        assert_eq!(info[0].last_used, Some(0));
        assert_eq!(info[1].first_created, Some(0));
        assert_eq!(info[1].last_used, Some(1));
        assert_eq!(info[2].first_created, Some(1));
        assert_eq!(info[2].last_used, Some(2));
        assert_eq!(info[3].first_created, Some(2));
        assert_eq!(info[3].last_used, Some(2)); // subgraph output
        assert!(info.iter().all(|e| e.needs_allocating));
    }

    #[test]
    fn test_constant_inputs_are_read_only() {
        let mut builder = ModelBuilder::new();
        let opcode = builder.add_opcode(BuiltinOperator::Add, None);
        let weights = builder.add_buffer(vec![0u8; 16]);
        let t0 = builder.add_tensor(TensorType::Float32, &[4], 0);
        let w = builder.add_tensor(TensorType::Float32, &[4], weights);
        let t1 = builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_operator(opcode, &[t0, w], &[t1], vec![]);
        builder.set_inputs(&[t0]);
        builder.set_outputs(&[t1]);
        let model = builder.build();

        let tensors = eval_tensors(&model);
        let mut info_builder = AllocationInfoBuilder::new();
        info_builder
            .add_tensors(&model.subgraphs[0], None, &tensors)
            .unwrap();
        let info = info_builder.finish();

        assert!(!info[w as usize].needs_allocating);
        assert_eq!(info[w as usize].last_used, Some(0));
        assert!(info[t1 as usize].needs_allocating);
    }

    #[test]
    fn test_orphan_sibling_input_gets_created_at_first_use() {
        // t1 is consumed by op0 but never produced and is not a subgraph
        // input; the propagation rule forces its creation at op0 because a
        // sibling input (t0) is a subgraph input.
        let mut builder = ModelBuilder::new();
        let opcode = builder.add_opcode(BuiltinOperator::Add, None);
        let t0 = builder.add_tensor(TensorType::Float32, &[4], 0);
        let t1 = builder.add_tensor(TensorType::Float32, &[4], 0);
        let t2 = builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_operator(opcode, &[t0, t1], &[t2], vec![]);
        builder.set_inputs(&[t0]);
        builder.set_outputs(&[t2]);
        let model = builder.build();

        let tensors = eval_tensors(&model);
        let mut info_builder = AllocationInfoBuilder::new();
        info_builder
            .add_tensors(&model.subgraphs[0], None, &tensors)
            .unwrap();
        let info = info_builder.finish();

        assert_eq!(info[t1 as usize].first_created, Some(0));
        assert_eq!(info[t1 as usize].last_used, Some(0));
        assert!(info[t1 as usize].needs_allocating);
    }

    #[test]
    fn test_partial_lifetime_is_an_error() {
        // t1 is produced but never consumed and is not a subgraph output.
        let mut builder = ModelBuilder::new();
        let opcode = builder.add_opcode(BuiltinOperator::Add, None);
        let t0 = builder.add_tensor(TensorType::Float32, &[4], 0);
        let t1 = builder.add_tensor(TensorType::Float32, &[4], 0);
        let t2 = builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_operator(opcode, &[t0], &[t1, t2], vec![]);
        builder.set_inputs(&[t0]);
        builder.set_outputs(&[t2]);
        let model = builder.build();

        let tensors = eval_tensors(&model);
        let mut info_builder = AllocationInfoBuilder::new();
        let err = info_builder
            .add_tensors(&model.subgraphs[0], None, &tensors)
            .unwrap_err();
        assert!(matches!(
            err,
            MicroForgeError::InvalidLifetime { tensor, .. } if tensor == t1 as usize
        ));
    }

    #[test]
    fn test_never_referenced_tensor_is_excluded() {
        let mut builder = ModelBuilder::new();
        let opcode = builder.add_opcode(BuiltinOperator::Add, None);
        let t0 = builder.add_tensor(TensorType::Float32, &[4], 0);
        let t1 = builder.add_tensor(TensorType::Float32, &[4], 0);
        let dangling = builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_operator(opcode, &[t0], &[t1], vec![]);
        builder.set_inputs(&[t0]);
        builder.set_outputs(&[t1]);
        let model = builder.build();

        let tensors = eval_tensors(&model);
        let mut info_builder = AllocationInfoBuilder::new();
        info_builder
            .add_tensors(&model.subgraphs[0], None, &tensors)
            .unwrap();
        let info = info_builder.finish();
        assert!(!info[dangling as usize].needs_allocating);
    }

    #[test]
    fn test_scratch_records_pin_to_owning_node() {
        let mut builder = AllocationInfoBuilder::new();
        builder.add_scratch_buffers(&[
            ScratchBufferHandle {
                bytes: 64,
                node: 0,
                data_offset: None,
            },
            ScratchBufferHandle {
                bytes: 128,
                node: 1,
                data_offset: None,
            },
        ]);
        let info = builder.finish();

        assert_eq!(info.len(), 2);
        assert_eq!(info[0].slot, SlotRef::Scratch(0));
        assert_eq!(info[0].first_created, Some(0));
        assert_eq!(info[0].last_used, Some(0));
        assert_eq!(info[1].bytes, 128);
        assert_eq!(info[1].first_created, Some(1));
        assert!(info.iter().all(|e| e.needs_allocating));
    }

    #[test]
    fn test_offline_plan_is_found_and_sliced() {
        let mut builder = ModelBuilder::new();
        builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_offline_plan(&[-1, 96]);
        let model = builder.build();

        let offsets = offline_planned_offsets(&model, 2).unwrap().unwrap();
        assert_eq!(offsets.as_ref(), &[-1, 96]);
    }

    #[test]
    fn test_no_offline_plan() {
        let model = ModelBuilder::new().build();
        assert!(offline_planned_offsets(&model, 0).unwrap().is_none());
    }

    #[test]
    fn test_offline_plan_name_must_match_exactly() {
        let mut builder = ModelBuilder::new();
        builder.add_tensor(TensorType::Float32, &[4], 0);
        let buffer = builder.add_buffer(vec![0u8; 16]);
        builder.add_metadata("OfflineMemoryAllocationV2", buffer);
        let model = builder.build();
        assert!(offline_planned_offsets(&model, 1).unwrap().is_none());
    }

    #[test]
    fn test_offline_plan_version_check() {
        let mut builder = ModelBuilder::new();
        builder.add_tensor(TensorType::Float32, &[4], 0);
        let mut data = Vec::new();
        for v in [2i32, 0, 1, -1] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let buffer = builder.add_buffer(data);
        builder.add_metadata(OFFLINE_ALLOC_METADATA_NAME, buffer);
        let model = builder.build();

        let err = offline_planned_offsets(&model, 1).unwrap_err();
        assert!(matches!(err, MicroForgeError::UnsupportedModel(_)));
    }

    #[test]
    fn test_offline_plan_subgraph_check() {
        let mut builder = ModelBuilder::new();
        builder.add_tensor(TensorType::Float32, &[4], 0);
        let mut data = Vec::new();
        for v in [1i32, 3, 1, -1] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        let buffer = builder.add_buffer(data);
        builder.add_metadata(OFFLINE_ALLOC_METADATA_NAME, buffer);
        let model = builder.build();

        let err = offline_planned_offsets(&model, 1).unwrap_err();
        assert!(matches!(err, MicroForgeError::UnsupportedModel(_)));
    }

    #[test]
    fn test_offline_plan_count_mismatch() {
        let mut builder = ModelBuilder::new();
        builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_offline_plan(&[-1]); // one offset, two tensors
        let model = builder.build();

        let err = offline_planned_offsets(&model, 2).unwrap_err();
        assert!(matches!(err, MicroForgeError::InconsistentModel(_)));
    }

    #[test]
    fn test_offline_offset_below_minus_one_is_rejected() {
        let model = chain_model();
        let tensors = eval_tensors(&model);
        let mut info_builder = AllocationInfoBuilder::new();
        let err = info_builder
            .add_tensors(&model.subgraphs[0], Some(&[-1, -2, -1, -1]), &tensors)
            .unwrap_err();
        assert!(matches!(err, MicroForgeError::InconsistentModel(_)));
    }

    #[test]
    fn test_out_of_range_tensor_index_is_rejected() {
        let mut builder = ModelBuilder::new();
        let opcode = builder.add_opcode(BuiltinOperator::Add, None);
        let t0 = builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_operator(opcode, &[t0], &[17], vec![]);
        builder.set_inputs(&[t0]);
        builder.set_outputs(&[17]);
        let model = builder.build();

        let tensors = eval_tensors(&model);
        let mut info_builder = AllocationInfoBuilder::new();
        let err = info_builder
            .add_tensors(&model.subgraphs[0], None, &tensors)
            .unwrap_err();
        assert!(matches!(err, MicroForgeError::InconsistentModel(_)));
    }
}
