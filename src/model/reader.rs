//! Binary model reader
//!
//! Decodes the little-endian serialized model container into the structures
//! of [`format`](crate::model::format). The container is magic-tagged and
//! versioned; every count is read before its payload so a truncated file
//! fails with an I/O error instead of garbage.

use std::io::Cursor;
use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{ForgeResult, MicroForgeError};
use crate::model::format::{
    BuiltinOperator, MetadataEntry, Model, OperatorCode, OperatorDef, QuantizationDef, SubGraph,
    TensorDef, TensorType,
};

/// Model container magic number
pub const MODEL_MAGIC: &[u8; 4] = b"MFGE";

/// Model container format version this reader understands
pub const MODEL_FORMAT_VERSION: u32 = 1;

/// Upper bound on any single decoded count, to fail fast on corrupt files
/// instead of attempting enormous allocations.
const MAX_DECODE_COUNT: u32 = 1 << 24;

impl Model {
    /// Decode a model from its serialized bytes.
    ///
    /// # Errors
    /// - Magic or version mismatch
    /// - Truncated input
    /// - Unknown type or opcode tags
    /// - Non-UTF-8 strings
    pub fn from_bytes(bytes: &[u8]) -> ForgeResult<Model> {
        let mut cursor = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cursor.read_exact(&mut magic)?;
        if &magic != MODEL_MAGIC {
            return Err(MicroForgeError::InvalidModelFile(format!(
                "bad magic {:02x?}",
                magic
            )));
        }
        let version = cursor.read_u32::<LittleEndian>()?;
        if version != MODEL_FORMAT_VERSION {
            return Err(MicroForgeError::InvalidModelFile(format!(
                "unsupported container version {}",
                version
            )));
        }

        let buffer_count = read_count(&mut cursor)?;
        let mut buffers = Vec::with_capacity(buffer_count as usize);
        for _ in 0..buffer_count {
            let len = cursor.read_u64::<LittleEndian>()? as usize;
            let mut data = vec![0u8; len];
            cursor.read_exact(&mut data)?;
            buffers.push(data);
        }

        let opcode_count = read_count(&mut cursor)?;
        let mut opcodes = Vec::with_capacity(opcode_count as usize);
        for _ in 0..opcode_count {
            let builtin = BuiltinOperator::from_u32(cursor.read_u32::<LittleEndian>()?)?;
            let custom_name = read_optional_string(&mut cursor)?;
            opcodes.push(OperatorCode {
                builtin,
                custom_name,
            });
        }

        let metadata_count = read_count(&mut cursor)?;
        let mut metadata = Vec::with_capacity(metadata_count as usize);
        for _ in 0..metadata_count {
            let name = read_string(&mut cursor)?;
            let buffer = cursor.read_u32::<LittleEndian>()?;
            metadata.push(MetadataEntry { name, buffer });
        }

        let subgraph_count = read_count(&mut cursor)?;
        let mut subgraphs = Vec::with_capacity(subgraph_count as usize);
        for _ in 0..subgraph_count {
            subgraphs.push(read_subgraph(&mut cursor)?);
        }

        tracing::debug!(
            "decoded model: {} subgraph(s), {} buffers, {} opcodes, {} metadata entries",
            subgraphs.len(),
            buffers.len(),
            opcodes.len(),
            metadata.len()
        );

        Ok(Model {
            subgraphs,
            buffers,
            opcodes,
            metadata,
        })
    }
}

fn read_subgraph(cursor: &mut Cursor<&[u8]>) -> ForgeResult<SubGraph> {
    let tensor_count = read_count(cursor)?;
    let mut tensors = Vec::with_capacity(tensor_count as usize);
    for _ in 0..tensor_count {
        tensors.push(read_tensor(cursor)?);
    }

    let operator_count = read_count(cursor)?;
    let mut operators = Vec::with_capacity(operator_count as usize);
    for _ in 0..operator_count {
        operators.push(read_operator(cursor)?);
    }

    let inputs = read_i32_vec(cursor)?;
    let outputs = read_i32_vec(cursor)?;

    Ok(SubGraph {
        tensors,
        operators,
        inputs,
        outputs,
    })
}

fn read_tensor(cursor: &mut Cursor<&[u8]>) -> ForgeResult<TensorDef> {
    let dtype = TensorType::from_u32(cursor.read_u32::<LittleEndian>()?)?;
    let is_variable = cursor.read_u8()? != 0;
    let buffer = cursor.read_u32::<LittleEndian>()?;
    let shape = read_i32_vec(cursor)?;

    let quantization = if cursor.read_u8()? != 0 {
        let scale_count = read_count(cursor)?;
        let mut scales = Vec::with_capacity(scale_count as usize);
        for _ in 0..scale_count {
            scales.push(cursor.read_f32::<LittleEndian>()?);
        }
        let zp_count = read_count(cursor)?;
        let mut zero_points = Vec::with_capacity(zp_count as usize);
        for _ in 0..zp_count {
            zero_points.push(cursor.read_i64::<LittleEndian>()?);
        }
        let quantized_dimension = cursor.read_i32::<LittleEndian>()?;
        Some(QuantizationDef {
            scales,
            zero_points,
            quantized_dimension,
        })
    } else {
        None
    };

    Ok(TensorDef {
        dtype,
        shape,
        buffer,
        is_variable,
        quantization,
    })
}

fn read_operator(cursor: &mut Cursor<&[u8]>) -> ForgeResult<OperatorDef> {
    let opcode_index = cursor.read_u32::<LittleEndian>()?;
    let inputs = read_i32_vec(cursor)?;
    let outputs = read_i32_vec(cursor)?;

    let builtin_len = read_count(cursor)? as usize;
    let mut builtin_options = vec![0u8; builtin_len];
    cursor.read_exact(&mut builtin_options)?;

    let custom_options = if cursor.read_u8()? != 0 {
        let len = read_count(cursor)? as usize;
        let mut data = vec![0u8; len];
        cursor.read_exact(&mut data)?;
        Some(data)
    } else {
        None
    };

    Ok(OperatorDef {
        opcode_index,
        inputs,
        outputs,
        builtin_options,
        custom_options,
    })
}

fn read_count(cursor: &mut Cursor<&[u8]>) -> ForgeResult<u32> {
    let count = cursor.read_u32::<LittleEndian>()?;
    if count > MAX_DECODE_COUNT {
        return Err(MicroForgeError::InvalidModelFile(format!(
            "implausible element count {}",
            count
        )));
    }
    Ok(count)
}

fn read_i32_vec(cursor: &mut Cursor<&[u8]>) -> ForgeResult<Vec<i32>> {
    let count = read_count(cursor)?;
    let mut values = Vec::with_capacity(count as usize);
    for _ in 0..count {
        values.push(cursor.read_i32::<LittleEndian>()?);
    }
    Ok(values)
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> ForgeResult<String> {
    let len = read_count(cursor)? as usize;
    let mut raw = vec![0u8; len];
    cursor.read_exact(&mut raw)?;
    String::from_utf8(raw)
        .map_err(|e| MicroForgeError::InvalidModelFile(format!("non-UTF-8 string: {}", e)))
}

fn read_optional_string(cursor: &mut Cursor<&[u8]>) -> ForgeResult<Option<String>> {
    if cursor.read_u8()? != 0 {
        Ok(Some(read_string(cursor)?))
    } else {
        Ok(None)
    }
}
