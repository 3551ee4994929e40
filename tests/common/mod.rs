//! Shared fixtures for allocator integration tests
#![allow(dead_code)] // each test binary uses a subset of the fixtures

use microforge::allocator::{EvalTensor, TensorData};
use microforge::model::{BuiltinOperator, Model, ModelBuilder, TensorType};

/// Linear chain: t0 -> op0 -> t1 -> op1 -> t2 -> op2 -> t3
///
/// Byte sizes 100 / 200 / 150 / 100. When `constant_input` is set, t0
/// carries serialized data and is excluded from planning.
pub fn linear_chain_model(constant_input: bool) -> Model {
    let mut builder = ModelBuilder::new();
    let add = builder.add_opcode(BuiltinOperator::Add, None);

    let t0_buffer = if constant_input {
        builder.add_buffer(vec![7u8; 100])
    } else {
        0
    };
    let t0 = builder.add_tensor(TensorType::UInt8, &[100], t0_buffer);
    let t1 = builder.add_tensor(TensorType::UInt8, &[200], 0);
    let t2 = builder.add_tensor(TensorType::UInt8, &[150], 0);
    let t3 = builder.add_tensor(TensorType::UInt8, &[100], 0);

    builder.add_operator(add, &[t0], &[t1], vec![]);
    builder.add_operator(add, &[t1], &[t2], vec![]);
    builder.add_operator(add, &[t2], &[t3], vec![]);
    builder.set_inputs(&[t0]);
    builder.set_outputs(&[t3]);
    builder.build()
}

/// Diamond: t0 -> op0 -> {t1, t2} -> op1 -> t3, 100 bytes each.
pub fn diamond_model() -> Model {
    let mut builder = ModelBuilder::new();
    let add = builder.add_opcode(BuiltinOperator::Add, None);

    let t0 = builder.add_tensor(TensorType::UInt8, &[100], 0);
    let t1 = builder.add_tensor(TensorType::UInt8, &[100], 0);
    let t2 = builder.add_tensor(TensorType::UInt8, &[100], 0);
    let t3 = builder.add_tensor(TensorType::UInt8, &[100], 0);

    builder.add_operator(add, &[t0], &[t1, t2], vec![]);
    builder.add_operator(add, &[t1, t2], &[t3], vec![]);
    builder.set_inputs(&[t0]);
    builder.set_outputs(&[t3]);
    builder.build()
}

/// Committed arena offset of a tensor, panicking on constants or unset data.
pub fn arena_offset(tensor: &EvalTensor<'_>) -> usize {
    match tensor.data {
        Some(TensorData::Arena(offset)) => offset,
        other => panic!("expected a committed arena offset, got {:?}", other),
    }
}

/// Assert that buffers with overlapping lifetimes occupy disjoint byte
/// ranges. Each entry is `(offset, size, first_used, last_used)`.
pub fn assert_no_live_overlap(buffers: &[(usize, usize, usize, usize)]) {
    for (i, a) in buffers.iter().enumerate() {
        for b in buffers.iter().skip(i + 1) {
            let lifetimes_overlap = a.2 <= b.3 && b.2 <= a.3;
            if !lifetimes_overlap {
                continue;
            }
            let disjoint = a.0 + a.1 <= b.0 || b.0 + b.1 <= a.0;
            assert!(
                disjoint,
                "live buffers share bytes: [{}, {}) and [{}, {})",
                a.0,
                a.0 + a.1,
                b.0,
                b.0 + b.1
            );
        }
    }
}
