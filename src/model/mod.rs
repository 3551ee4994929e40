//! Serialized model format and decoding
//!
//! The allocator core consumes a decoded model description: one subgraph of
//! tensors and operators, a buffer table for constant payloads, an opcode
//! table and named metadata entries. This module provides the decoded
//! structures, a little-endian binary reader and writer for them, a fluent
//! builder for constructing graphs in tooling and tests, the builtin
//! operator option parsers, and the structured-decoder adapter that turns
//! raw metadata bytes into integer arrays without copying when it can.

pub mod builder;
pub mod decode;
pub mod format;
pub mod options;
pub mod reader;
pub mod writer;

pub use builder::ModelBuilder;
pub use decode::i32_array_from_bytes;
pub use format::{
    BuiltinOperator, MetadataEntry, Model, OperatorCode, OperatorDef, QuantizationDef, SubGraph,
    TensorDef, TensorType, OFFLINE_ALLOC_METADATA_NAME,
};
pub use options::{
    Activation, AddOptions, BuiltinData, Conv2dOptions, FullyConnectedOptions, Padding,
    ReshapeOptions, SoftmaxOptions,
};
pub use reader::{MODEL_FORMAT_VERSION, MODEL_MAGIC};
