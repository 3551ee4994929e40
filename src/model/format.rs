//! Decoded model structures
//!
//! These types are the query surface the allocator core depends on: random
//! access to tensors, operators, buffers, opcodes and metadata. They are
//! produced by [`Model::from_bytes`](crate::model::Model::from_bytes) or a
//! [`ModelBuilder`](crate::model::ModelBuilder).

use crate::error::{ForgeResult, MicroForgeError};

/// Name of the metadata entry carrying an offline memory plan.
///
/// The referenced buffer is a sequence of 32-bit integers: version (must be
/// 1), subgraph index (must be 0), tensor count, then one arena byte offset
/// per tensor with `-1` meaning "let the planner decide".
pub const OFFLINE_ALLOC_METADATA_NAME: &str = "OfflineMemoryAllocation";

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
    Float32,
    Float16,
    Int8,
    UInt8,
    Int16,
    Int32,
    Int64,
    Bool,
}

impl TensorType {
    /// Decode from the serialized type tag.
    pub fn from_u32(value: u32) -> ForgeResult<Self> {
        match value {
            0 => Ok(TensorType::Float32),
            1 => Ok(TensorType::Float16),
            2 => Ok(TensorType::Int8),
            3 => Ok(TensorType::UInt8),
            4 => Ok(TensorType::Int16),
            5 => Ok(TensorType::Int32),
            6 => Ok(TensorType::Int64),
            7 => Ok(TensorType::Bool),
            other => Err(MicroForgeError::InvalidModelFile(format!(
                "unknown tensor type tag {}",
                other
            ))),
        }
    }

    /// Serialized type tag.
    pub fn as_u32(self) -> u32 {
        match self {
            TensorType::Float32 => 0,
            TensorType::Float16 => 1,
            TensorType::Int8 => 2,
            TensorType::UInt8 => 3,
            TensorType::Int16 => 4,
            TensorType::Int32 => 5,
            TensorType::Int64 => 6,
            TensorType::Bool => 7,
        }
    }

    /// Size of one element in bytes.
    pub fn byte_size(self) -> usize {
        match self {
            TensorType::Float32 | TensorType::Int32 => 4,
            TensorType::Float16 | TensorType::Int16 => 2,
            TensorType::Int8 | TensorType::UInt8 | TensorType::Bool => 1,
            TensorType::Int64 => 8,
        }
    }
}

/// Builtin operator identifiers the interpreter knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinOperator {
    Add,
    Conv2d,
    FullyConnected,
    Reshape,
    Softmax,
    /// Custom operator, identified by name in its [`OperatorCode`]
    Custom,
}

impl BuiltinOperator {
    /// Decode from the serialized opcode tag.
    pub fn from_u32(value: u32) -> ForgeResult<Self> {
        match value {
            0 => Ok(BuiltinOperator::Add),
            1 => Ok(BuiltinOperator::Conv2d),
            2 => Ok(BuiltinOperator::FullyConnected),
            3 => Ok(BuiltinOperator::Reshape),
            4 => Ok(BuiltinOperator::Softmax),
            5 => Ok(BuiltinOperator::Custom),
            other => Err(MicroForgeError::InvalidModelFile(format!(
                "unknown operator tag {}",
                other
            ))),
        }
    }

    /// Serialized opcode tag.
    pub fn as_u32(self) -> u32 {
        match self {
            BuiltinOperator::Add => 0,
            BuiltinOperator::Conv2d => 1,
            BuiltinOperator::FullyConnected => 2,
            BuiltinOperator::Reshape => 3,
            BuiltinOperator::Softmax => 4,
            BuiltinOperator::Custom => 5,
        }
    }

    /// Human-readable operator name for error messages.
    pub fn name(self) -> &'static str {
        match self {
            BuiltinOperator::Add => "ADD",
            BuiltinOperator::Conv2d => "CONV_2D",
            BuiltinOperator::FullyConnected => "FULLY_CONNECTED",
            BuiltinOperator::Reshape => "RESHAPE",
            BuiltinOperator::Softmax => "SOFTMAX",
            BuiltinOperator::Custom => "CUSTOM",
        }
    }
}

/// Affine quantization parameters attached to a tensor.
///
/// `scales`/`zero_points` hold one entry for per-tensor quantization and one
/// per channel otherwise. Zero points are serialized as 64-bit integers.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizationDef {
    pub scales: Vec<f32>,
    pub zero_points: Vec<i64>,
    pub quantized_dimension: i32,
}

/// One tensor definition inside a subgraph.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorDef {
    pub dtype: TensorType,
    /// Dimension sizes; empty for a scalar
    pub shape: Vec<i32>,
    /// Index into the model buffer table; buffer 0 is the empty sentinel
    pub buffer: u32,
    /// Variable tensors persist across inference calls and are never planned
    pub is_variable: bool,
    pub quantization: Option<QuantizationDef>,
}

/// One operator inside a subgraph.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDef {
    /// Index into the model opcode table
    pub opcode_index: u32,
    /// Subgraph tensor indices consumed by this operator
    pub inputs: Vec<i32>,
    /// Subgraph tensor indices produced by this operator
    pub outputs: Vec<i32>,
    /// Serialized builtin option blob; empty means defaults
    pub builtin_options: Vec<u8>,
    /// Opaque option bytes for custom operators
    pub custom_options: Option<Vec<u8>>,
}

/// Entry in the model opcode table.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorCode {
    pub builtin: BuiltinOperator,
    /// Set when `builtin` is [`BuiltinOperator::Custom`]
    pub custom_name: Option<String>,
}

/// Named metadata entry referencing a model buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataEntry {
    pub name: String,
    pub buffer: u32,
}

/// One operator graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubGraph {
    pub tensors: Vec<TensorDef>,
    pub operators: Vec<OperatorDef>,
    /// Subgraph input tensor indices
    pub inputs: Vec<i32>,
    /// Subgraph output tensor indices
    pub outputs: Vec<i32>,
}

/// A decoded model.
///
/// The allocator supports exactly one subgraph; the decoded form still
/// carries all of them so the rejection happens with a proper diagnostic
/// rather than at decode time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
    pub subgraphs: Vec<SubGraph>,
    /// Constant payloads; index 0 is conventionally the empty buffer
    pub buffers: Vec<Vec<u8>>,
    pub opcodes: Vec<OperatorCode>,
    pub metadata: Vec<MetadataEntry>,
}

impl Model {
    /// Payload bytes of buffer `index`, or `None` when the index is out of
    /// range or the buffer is empty.
    ///
    /// An existing-but-empty serialized buffer means "no data": the tensor
    /// falls through to planned allocation.
    pub fn buffer_data(&self, index: u32) -> Option<&[u8]> {
        let data = self.buffers.get(index as usize)?;
        if data.is_empty() {
            None
        } else {
            Some(data.as_slice())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_type_round_trip() {
        for tag in 0..8 {
            let ty = TensorType::from_u32(tag).unwrap();
            assert_eq!(ty.as_u32(), tag);
        }
        assert!(TensorType::from_u32(99).is_err());
    }

    #[test]
    fn test_tensor_type_sizes() {
        assert_eq!(TensorType::Float32.byte_size(), 4);
        assert_eq!(TensorType::Float16.byte_size(), 2);
        assert_eq!(TensorType::Int8.byte_size(), 1);
        assert_eq!(TensorType::Int64.byte_size(), 8);
        assert_eq!(TensorType::Bool.byte_size(), 1);
    }

    #[test]
    fn test_builtin_operator_round_trip() {
        for tag in 0..6 {
            let op = BuiltinOperator::from_u32(tag).unwrap();
            assert_eq!(op.as_u32(), tag);
        }
        assert!(BuiltinOperator::from_u32(42).is_err());
    }

    #[test]
    fn test_empty_buffer_means_no_data() {
        let model = Model {
            buffers: vec![vec![], vec![1, 2, 3]],
            ..Default::default()
        };
        assert!(model.buffer_data(0).is_none());
        assert_eq!(model.buffer_data(1), Some(&[1u8, 2, 3][..]));
        assert!(model.buffer_data(7).is_none());
    }
}
