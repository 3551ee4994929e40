//! Fluent model construction
//!
//! `ModelBuilder` assembles a [`Model`] in memory: host-side tooling uses it
//! to emit test networks and calibration graphs, and the test suite uses it
//! to fabricate operator graphs for the allocator. A fresh builder starts
//! with one subgraph and the conventional empty buffer at index 0.

use crate::model::format::{
    BuiltinOperator, MetadataEntry, Model, OperatorCode, OperatorDef, QuantizationDef, SubGraph,
    TensorDef, TensorType, OFFLINE_ALLOC_METADATA_NAME,
};

/// Builder for [`Model`] values.
///
/// # Example
///
/// ```
/// use microforge::model::{BuiltinOperator, ModelBuilder, TensorType};
///
/// let mut builder = ModelBuilder::new();
/// let opcode = builder.add_opcode(BuiltinOperator::Softmax, None);
/// let input = builder.add_tensor(TensorType::Float32, &[1, 10], 0);
/// let output = builder.add_tensor(TensorType::Float32, &[1, 10], 0);
/// builder.add_operator(opcode, &[input], &[output], vec![]);
/// builder.set_inputs(&[input]);
/// builder.set_outputs(&[output]);
///
/// let model = builder.build();
/// assert_eq!(model.subgraphs[0].tensors.len(), 2);
/// ```
#[derive(Debug)]
pub struct ModelBuilder {
    model: Model,
}

impl ModelBuilder {
    /// Start a model with one empty subgraph and the empty sentinel buffer.
    pub fn new() -> Self {
        Self {
            model: Model {
                subgraphs: vec![SubGraph::default()],
                buffers: vec![Vec::new()],
                opcodes: Vec::new(),
                metadata: Vec::new(),
            },
        }
    }

    /// Add a constant payload buffer; returns its buffer index.
    pub fn add_buffer(&mut self, data: Vec<u8>) -> u32 {
        self.model.buffers.push(data);
        (self.model.buffers.len() - 1) as u32
    }

    /// Add an opcode table entry; returns its opcode index.
    pub fn add_opcode(&mut self, builtin: BuiltinOperator, custom_name: Option<&str>) -> u32 {
        self.model.opcodes.push(OperatorCode {
            builtin,
            custom_name: custom_name.map(str::to_string),
        });
        (self.model.opcodes.len() - 1) as u32
    }

    /// Add a named metadata entry referencing `buffer`.
    pub fn add_metadata(&mut self, name: &str, buffer: u32) {
        self.model.metadata.push(MetadataEntry {
            name: name.to_string(),
            buffer,
        });
    }

    /// Attach an offline memory plan covering the current subgraph's tensors.
    ///
    /// Serializes the plan buffer (version 1, subgraph 0, one 32-bit offset
    /// per tensor, `-1` meaning "let the planner decide") and registers the
    /// metadata entry pointing at it.
    pub fn add_offline_plan(&mut self, offsets: &[i32]) {
        let mut data = Vec::with_capacity(12 + offsets.len() * 4);
        data.extend_from_slice(&1i32.to_le_bytes());
        data.extend_from_slice(&0i32.to_le_bytes());
        data.extend_from_slice(&(offsets.len() as i32).to_le_bytes());
        for offset in offsets {
            data.extend_from_slice(&offset.to_le_bytes());
        }
        let buffer = self.add_buffer(data);
        self.add_metadata(OFFLINE_ALLOC_METADATA_NAME, buffer);
    }

    /// Add a tensor to the current subgraph; returns its tensor index.
    ///
    /// Pass buffer index 0 for an activation tensor with no constant data.
    pub fn add_tensor(&mut self, dtype: TensorType, shape: &[i32], buffer: u32) -> i32 {
        self.push_tensor(TensorDef {
            dtype,
            shape: shape.to_vec(),
            buffer,
            is_variable: false,
            quantization: None,
        })
    }

    /// Add a variable tensor (state persisting across inference calls).
    pub fn add_variable_tensor(&mut self, dtype: TensorType, shape: &[i32]) -> i32 {
        self.push_tensor(TensorDef {
            dtype,
            shape: shape.to_vec(),
            buffer: 0,
            is_variable: true,
            quantization: None,
        })
    }

    /// Add a tensor carrying quantization parameters.
    pub fn add_quantized_tensor(
        &mut self,
        dtype: TensorType,
        shape: &[i32],
        buffer: u32,
        quantization: QuantizationDef,
    ) -> i32 {
        self.push_tensor(TensorDef {
            dtype,
            shape: shape.to_vec(),
            buffer,
            is_variable: false,
            quantization: Some(quantization),
        })
    }

    fn push_tensor(&mut self, tensor: TensorDef) -> i32 {
        let subgraph = self.current_subgraph();
        subgraph.tensors.push(tensor);
        (subgraph.tensors.len() - 1) as i32
    }

    /// Add a builtin operator to the current subgraph; returns its index.
    pub fn add_operator(
        &mut self,
        opcode_index: u32,
        inputs: &[i32],
        outputs: &[i32],
        builtin_options: Vec<u8>,
    ) -> usize {
        let subgraph = self.current_subgraph();
        subgraph.operators.push(OperatorDef {
            opcode_index,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            builtin_options,
            custom_options: None,
        });
        subgraph.operators.len() - 1
    }

    /// Add a custom operator carrying opaque option bytes.
    pub fn add_custom_operator(
        &mut self,
        opcode_index: u32,
        inputs: &[i32],
        outputs: &[i32],
        custom_options: Vec<u8>,
    ) -> usize {
        let subgraph = self.current_subgraph();
        subgraph.operators.push(OperatorDef {
            opcode_index,
            inputs: inputs.to_vec(),
            outputs: outputs.to_vec(),
            builtin_options: Vec::new(),
            custom_options: Some(custom_options),
        });
        subgraph.operators.len() - 1
    }

    /// Attach custom option bytes to an already-added builtin operator.
    ///
    /// Only useful for fabricating the invalid builtin-with-custom-options
    /// case the allocator must reject.
    pub fn set_custom_options(&mut self, operator: usize, custom_options: Vec<u8>) {
        self.current_subgraph().operators[operator].custom_options = Some(custom_options);
    }

    /// Set the current subgraph's input tensor indices.
    pub fn set_inputs(&mut self, inputs: &[i32]) {
        self.current_subgraph().inputs = inputs.to_vec();
    }

    /// Set the current subgraph's output tensor indices.
    pub fn set_outputs(&mut self, outputs: &[i32]) {
        self.current_subgraph().outputs = outputs.to_vec();
    }

    /// Start another subgraph; later tensor and operator adds target it.
    pub fn add_subgraph(&mut self) {
        self.model.subgraphs.push(SubGraph::default());
    }

    /// Finish and return the model.
    pub fn build(self) -> Model {
        self.model
    }

    fn current_subgraph(&mut self) -> &mut SubGraph {
        self.model
            .subgraphs
            .last_mut()
            .expect("builder always holds at least one subgraph")
    }
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_empty_sentinel_buffer() {
        let model = ModelBuilder::new().build();
        assert_eq!(model.buffers.len(), 1);
        assert!(model.buffers[0].is_empty());
        assert_eq!(model.subgraphs.len(), 1);
    }

    #[test]
    fn test_indices_are_sequential() {
        let mut builder = ModelBuilder::new();
        let b1 = builder.add_buffer(vec![1]);
        let b2 = builder.add_buffer(vec![2]);
        assert_eq!((b1, b2), (1, 2));

        let t0 = builder.add_tensor(TensorType::Float32, &[4], 0);
        let t1 = builder.add_tensor(TensorType::Float32, &[4], b1);
        assert_eq!((t0, t1), (0, 1));
    }

    #[test]
    fn test_offline_plan_layout() {
        let mut builder = ModelBuilder::new();
        builder.add_tensor(TensorType::Float32, &[4], 0);
        builder.add_offline_plan(&[-1, 32]);

        let model = builder.build();
        let entry = &model.metadata[0];
        assert_eq!(entry.name, OFFLINE_ALLOC_METADATA_NAME);

        let data = &model.buffers[entry.buffer as usize];
        assert_eq!(data.len(), 20);
        assert_eq!(&data[0..4], &1i32.to_le_bytes()); // version
        assert_eq!(&data[4..8], &0i32.to_le_bytes()); // subgraph
        assert_eq!(&data[8..12], &2i32.to_le_bytes()); // count
        assert_eq!(&data[12..16], &(-1i32).to_le_bytes());
        assert_eq!(&data[16..20], &32i32.to_le_bytes());
    }

    #[test]
    fn test_serialized_builder_output_decodes() {
        let mut builder = ModelBuilder::new();
        let opcode = builder.add_opcode(BuiltinOperator::Add, None);
        let a = builder.add_tensor(TensorType::Float32, &[2, 2], 0);
        let b = builder.add_tensor(TensorType::Float32, &[2, 2], 0);
        let out = builder.add_tensor(TensorType::Float32, &[2, 2], 0);
        builder.add_operator(opcode, &[a, b], &[out], vec![]);
        builder.set_inputs(&[a, b]);
        builder.set_outputs(&[out]);

        let model = builder.build();
        let decoded = Model::from_bytes(&model.to_bytes()).unwrap();
        assert_eq!(decoded, model);
    }
}
