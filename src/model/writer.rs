//! Binary model writer
//!
//! Serializes a [`Model`] into the container format
//! [`Model::from_bytes`](crate::model::Model::from_bytes) decodes. Field
//! order mirrors the reader exactly.

use crate::model::format::{Model, OperatorDef, SubGraph, TensorDef};
use crate::model::reader::{MODEL_FORMAT_VERSION, MODEL_MAGIC};

impl Model {
    /// Serialize this model to container bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MODEL_MAGIC);
        write_u32(&mut out, MODEL_FORMAT_VERSION);

        write_u32(&mut out, self.buffers.len() as u32);
        for buffer in &self.buffers {
            out.extend_from_slice(&(buffer.len() as u64).to_le_bytes());
            out.extend_from_slice(buffer);
        }

        write_u32(&mut out, self.opcodes.len() as u32);
        for opcode in &self.opcodes {
            write_u32(&mut out, opcode.builtin.as_u32());
            write_optional_string(&mut out, opcode.custom_name.as_deref());
        }

        write_u32(&mut out, self.metadata.len() as u32);
        for entry in &self.metadata {
            write_string(&mut out, &entry.name);
            write_u32(&mut out, entry.buffer);
        }

        write_u32(&mut out, self.subgraphs.len() as u32);
        for subgraph in &self.subgraphs {
            write_subgraph(&mut out, subgraph);
        }

        out
    }
}

fn write_subgraph(out: &mut Vec<u8>, subgraph: &SubGraph) {
    write_u32(out, subgraph.tensors.len() as u32);
    for tensor in &subgraph.tensors {
        write_tensor(out, tensor);
    }

    write_u32(out, subgraph.operators.len() as u32);
    for operator in &subgraph.operators {
        write_operator(out, operator);
    }

    write_i32_vec(out, &subgraph.inputs);
    write_i32_vec(out, &subgraph.outputs);
}

fn write_tensor(out: &mut Vec<u8>, tensor: &TensorDef) {
    write_u32(out, tensor.dtype.as_u32());
    out.push(tensor.is_variable as u8);
    write_u32(out, tensor.buffer);
    write_i32_vec(out, &tensor.shape);

    match &tensor.quantization {
        Some(quant) => {
            out.push(1);
            write_u32(out, quant.scales.len() as u32);
            for scale in &quant.scales {
                out.extend_from_slice(&scale.to_le_bytes());
            }
            write_u32(out, quant.zero_points.len() as u32);
            for zp in &quant.zero_points {
                out.extend_from_slice(&zp.to_le_bytes());
            }
            out.extend_from_slice(&quant.quantized_dimension.to_le_bytes());
        }
        None => out.push(0),
    }
}

fn write_operator(out: &mut Vec<u8>, operator: &OperatorDef) {
    write_u32(out, operator.opcode_index);
    write_i32_vec(out, &operator.inputs);
    write_i32_vec(out, &operator.outputs);

    write_u32(out, operator.builtin_options.len() as u32);
    out.extend_from_slice(&operator.builtin_options);

    match &operator.custom_options {
        Some(data) => {
            out.push(1);
            write_u32(out, data.len() as u32);
            out.extend_from_slice(data);
        }
        None => out.push(0),
    }
}

fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn write_i32_vec(out: &mut Vec<u8>, values: &[i32]) {
    write_u32(out, values.len() as u32);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    write_u32(out, value.len() as u32);
    out.extend_from_slice(value.as_bytes());
}

fn write_optional_string(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(s) => {
            out.push(1);
            write_string(out, s);
        }
        None => out.push(0),
    }
}
