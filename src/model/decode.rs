//! Structured-decoder adapter for serialized integer arrays
//!
//! Offline-plan metadata and similar model payloads arrive as raw byte
//! buffers that are logically arrays of 32-bit integers. On a little-endian
//! host with a 4-aligned buffer the in-memory layout already matches, so
//! the array can alias the model bytes with no copy and no allocation. On a
//! big-endian host, or when the buffer happens to land misaligned, the
//! elements are converted one by one into an owned copy instead.

use std::borrow::Cow;

use crate::error::{ForgeResult, MicroForgeError};

/// View a byte buffer as an `i32` array, copying only when the zero-copy
/// alias would be unsound.
///
/// # Errors
/// The buffer length must be a multiple of four bytes.
pub fn i32_array_from_bytes(bytes: &[u8]) -> ForgeResult<Cow<'_, [i32]>> {
    if bytes.len() % 4 != 0 {
        return Err(MicroForgeError::InconsistentModel(format!(
            "integer array buffer of {} bytes is not a multiple of 4",
            bytes.len()
        )));
    }

    #[cfg(target_endian = "little")]
    {
        // SAFETY: every bit pattern is a valid i32; align_to only yields the
        // correctly aligned middle slice, and we reject any split.
        let (head, body, tail) = unsafe { bytes.align_to::<i32>() };
        if head.is_empty() && tail.is_empty() {
            return Ok(Cow::Borrowed(body));
        }
    }

    let values = bytes
        .chunks_exact(4)
        .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Cow::Owned(values))
}
