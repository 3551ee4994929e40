//! Builtin operator options and their blob parsers
//!
//! Each builtin operator carries a serialized option blob in the model. The
//! parsers here turn those blobs into typed option structs during model
//! allocation; an empty blob means the operator's defaults. Encoders for
//! the same blobs are provided for tooling and tests.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{ForgeResult, MicroForgeError};

/// Fused activation applied by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    None,
    Relu,
    Relu6,
}

impl Activation {
    fn from_u32(value: u32) -> ForgeResult<Self> {
        match value {
            0 => Ok(Activation::None),
            1 => Ok(Activation::Relu),
            2 => Ok(Activation::Relu6),
            other => Err(MicroForgeError::OptionParseFailed(format!(
                "unknown activation tag {}",
                other
            ))),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Activation::None => 0,
            Activation::Relu => 1,
            Activation::Relu6 => 2,
        }
    }
}

/// Convolution padding scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    #[default]
    Same,
    Valid,
}

impl Padding {
    fn from_u32(value: u32) -> ForgeResult<Self> {
        match value {
            0 => Ok(Padding::Same),
            1 => Ok(Padding::Valid),
            other => Err(MicroForgeError::OptionParseFailed(format!(
                "unknown padding tag {}",
                other
            ))),
        }
    }

    fn as_u32(self) -> u32 {
        match self {
            Padding::Same => 0,
            Padding::Valid => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddOptions {
    pub activation: Activation,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Conv2dOptions {
    pub padding: Padding,
    pub stride_w: u32,
    pub stride_h: u32,
    pub activation: Activation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FullyConnectedOptions {
    pub activation: Activation,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReshapeOptions {
    pub new_shape: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SoftmaxOptions {
    pub beta: f32,
}

/// Parsed builtin option payload attached to an operator node.
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltinData {
    Add(AddOptions),
    Conv2d(Conv2dOptions),
    FullyConnected(FullyConnectedOptions),
    Reshape(ReshapeOptions),
    Softmax(SoftmaxOptions),
}

// ---- parsers ----

pub fn parse_add(blob: &[u8]) -> ForgeResult<BuiltinData> {
    if blob.is_empty() {
        return Ok(BuiltinData::Add(AddOptions::default()));
    }
    let mut cursor = Cursor::new(blob);
    let activation = Activation::from_u32(read_u32(&mut cursor, "ADD")?)?;
    expect_consumed(&cursor, blob, "ADD")?;
    Ok(BuiltinData::Add(AddOptions { activation }))
}

pub fn parse_conv2d(blob: &[u8]) -> ForgeResult<BuiltinData> {
    if blob.is_empty() {
        return Ok(BuiltinData::Conv2d(Conv2dOptions::default()));
    }
    let mut cursor = Cursor::new(blob);
    let padding = Padding::from_u32(read_u32(&mut cursor, "CONV_2D")?)?;
    let stride_w = read_u32(&mut cursor, "CONV_2D")?;
    let stride_h = read_u32(&mut cursor, "CONV_2D")?;
    let activation = Activation::from_u32(read_u32(&mut cursor, "CONV_2D")?)?;
    expect_consumed(&cursor, blob, "CONV_2D")?;
    Ok(BuiltinData::Conv2d(Conv2dOptions {
        padding,
        stride_w,
        stride_h,
        activation,
    }))
}

pub fn parse_fully_connected(blob: &[u8]) -> ForgeResult<BuiltinData> {
    if blob.is_empty() {
        return Ok(BuiltinData::FullyConnected(FullyConnectedOptions::default()));
    }
    let mut cursor = Cursor::new(blob);
    let activation = Activation::from_u32(read_u32(&mut cursor, "FULLY_CONNECTED")?)?;
    expect_consumed(&cursor, blob, "FULLY_CONNECTED")?;
    Ok(BuiltinData::FullyConnected(FullyConnectedOptions {
        activation,
    }))
}

pub fn parse_reshape(blob: &[u8]) -> ForgeResult<BuiltinData> {
    if blob.is_empty() {
        return Ok(BuiltinData::Reshape(ReshapeOptions::default()));
    }
    let mut cursor = Cursor::new(blob);
    let count = read_u32(&mut cursor, "RESHAPE")? as usize;
    if count > blob.len() / 4 {
        return Err(truncated("RESHAPE"));
    }
    let mut new_shape = Vec::with_capacity(count);
    for _ in 0..count {
        new_shape.push(
            cursor
                .read_i32::<LittleEndian>()
                .map_err(|_| truncated("RESHAPE"))?,
        );
    }
    expect_consumed(&cursor, blob, "RESHAPE")?;
    Ok(BuiltinData::Reshape(ReshapeOptions { new_shape }))
}

pub fn parse_softmax(blob: &[u8]) -> ForgeResult<BuiltinData> {
    if blob.is_empty() {
        return Ok(BuiltinData::Softmax(SoftmaxOptions { beta: 1.0 }));
    }
    let mut cursor = Cursor::new(blob);
    let beta = cursor
        .read_f32::<LittleEndian>()
        .map_err(|_| truncated("SOFTMAX"))?;
    expect_consumed(&cursor, blob, "SOFTMAX")?;
    Ok(BuiltinData::Softmax(SoftmaxOptions { beta }))
}

// ---- encoders (tooling / test fixtures) ----

pub fn encode_add(options: &AddOptions) -> Vec<u8> {
    options.activation.as_u32().to_le_bytes().to_vec()
}

pub fn encode_conv2d(options: &Conv2dOptions) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    out.extend_from_slice(&options.padding.as_u32().to_le_bytes());
    out.extend_from_slice(&options.stride_w.to_le_bytes());
    out.extend_from_slice(&options.stride_h.to_le_bytes());
    out.extend_from_slice(&options.activation.as_u32().to_le_bytes());
    out
}

pub fn encode_fully_connected(options: &FullyConnectedOptions) -> Vec<u8> {
    options.activation.as_u32().to_le_bytes().to_vec()
}

pub fn encode_reshape(options: &ReshapeOptions) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + options.new_shape.len() * 4);
    out.extend_from_slice(&(options.new_shape.len() as u32).to_le_bytes());
    for dim in &options.new_shape {
        out.extend_from_slice(&dim.to_le_bytes());
    }
    out
}

pub fn encode_softmax(options: &SoftmaxOptions) -> Vec<u8> {
    options.beta.to_le_bytes().to_vec()
}

fn read_u32(cursor: &mut Cursor<&[u8]>, op: &str) -> ForgeResult<u32> {
    cursor.read_u32::<LittleEndian>().map_err(|_| truncated(op))
}

fn truncated(op: &str) -> MicroForgeError {
    MicroForgeError::OptionParseFailed(format!("truncated {} option blob", op))
}

fn expect_consumed(cursor: &Cursor<&[u8]>, blob: &[u8], op: &str) -> ForgeResult<()> {
    if cursor.position() as usize != blob.len() {
        return Err(MicroForgeError::OptionParseFailed(format!(
            "{} option blob has {} trailing bytes",
            op,
            blob.len() - cursor.position() as usize
        )));
    }
    Ok(())
}
