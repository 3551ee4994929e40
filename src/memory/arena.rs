//! Dual-cursor arena over a caller-provided byte region
//!
//! All runtime storage is suballocated from one contiguous buffer. Permanent
//! allocations come from the tail and grow downward; the head region holds
//! the planned activation block (and, during the Prepare stage, the scratch
//! handle records) and is resized explicitly; transient allocations sit
//! above the head cursor and are freed collectively.
//!
//! The arena never owns the buffer. It hands out byte offsets rather than
//! pointers, so committed placements stay valid however the caller moves the
//! borrow around between calls.

use serde::Serialize;

use crate::memory::{align_down, align_up, BUFFER_ALIGNMENT};

/// Snapshot of arena occupancy, for logging and diagnostics.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ArenaUsage {
    /// Usable capacity in bytes (after base alignment trim)
    pub capacity: usize,
    /// Bytes consumed by the head region plus live temp allocations
    pub head_bytes: usize,
    /// Bytes consumed by permanent tail allocations
    pub tail_bytes: usize,
    /// Unclaimed bytes between the two cursors
    pub free_bytes: usize,
}

/// Dual-ended bump allocator over a single borrowed byte region.
///
/// Three allocation classes are served from opposite ends:
///
/// - [`from_tail`](Self::from_tail): permanent allocations, never freed.
/// - [`ensure_head`](Self::ensure_head): the resizable head region, measured
///   from the aligned base of the buffer.
/// - [`allocate_temp`](Self::allocate_temp): transient allocations above the
///   head cursor, freed in bulk by
///   [`reset_temp_allocations`](Self::reset_temp_allocations).
///
/// The head cursor never crosses the tail cursor. Any request that cannot
/// be satisfied returns `None`; the caller translates that into a structured
/// error carrying the byte counts.
///
/// # Example
///
/// ```
/// use microforge::memory::DualCursorArena;
///
/// let mut backing = vec![0u8; 1024];
/// let mut arena = DualCursorArena::new(&mut backing);
///
/// let table = arena.from_tail(128, 16).unwrap();
/// assert_eq!(arena.tail_offset(), table);
///
/// let before = arena.used_bytes();
/// let scratch = arena.allocate_temp(64, 16).unwrap();
/// assert!(arena.used_bytes() > before);
/// arena.reset_temp_allocations();
/// assert_eq!(arena.used_bytes(), before);
/// # let _ = scratch;
/// ```
pub struct DualCursorArena<'a> {
    buf: &'a mut [u8],
    /// Aligned start of the usable region
    base: usize,
    /// One past the end of the head region
    head: usize,
    /// High-water mark of temp allocations, always >= head
    temp_high: usize,
    /// Start of the lowest permanent allocation
    tail: usize,
}

impl<'a> DualCursorArena<'a> {
    /// Wrap a caller-provided byte region.
    ///
    /// The base address is aligned up to [`BUFFER_ALIGNMENT`]; bytes lost to
    /// a misaligned caller buffer are reported as a warning and excluded
    /// from the usable capacity.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let pad = buf.as_ptr().align_offset(BUFFER_ALIGNMENT).min(buf.len());
        if pad > 0 {
            tracing::warn!(
                "{} bytes lost to alignment; provide a {}-byte aligned arena to avoid the loss",
                pad,
                BUFFER_ALIGNMENT
            );
        }
        let len = buf.len();
        Self {
            buf,
            base: pad,
            head: pad,
            temp_high: pad,
            tail: len,
        }
    }

    fn addr(&self) -> usize {
        self.buf.as_ptr() as usize
    }

    /// Permanently allocate `size` bytes from the tail.
    ///
    /// The tail cursor moves down and is rounded down to `align` (power of
    /// two). Returns the offset of the allocation, or `None` if it would
    /// cross the head cursor or any live temp allocation.
    pub fn from_tail(&mut self, size: usize, align: usize) -> Option<usize> {
        debug_assert!(align.is_power_of_two());
        let limit = self.tail.checked_sub(size)?;
        let new_tail = align_down(self.addr() + limit, align).checked_sub(self.addr())?;
        if new_tail < self.temp_high {
            return None;
        }
        self.tail = new_tail;
        tracing::trace!("arena tail allocation: {} bytes at offset {}", size, new_tail);
        Some(new_tail)
    }

    /// Resize the head region to exactly `size` bytes from the aligned base.
    ///
    /// Successive calls may grow or shrink the region without leaking; the
    /// region always starts at [`buffer_start`](Self::buffer_start). Returns
    /// the start offset, or `None` if the region would cross the tail cursor
    /// or if temp allocations are outstanding (resizing under a live temp
    /// would clobber it — callers must
    /// [`reset_temp_allocations`](Self::reset_temp_allocations) first).
    pub fn ensure_head(&mut self, size: usize, align: usize) -> Option<usize> {
        debug_assert!(align.is_power_of_two());
        if self.temp_high != self.head {
            return None;
        }
        let start = align_up(self.addr() + self.base, align) - self.addr();
        let end = start.checked_add(size)?;
        if end > self.tail {
            return None;
        }
        self.head = end;
        self.temp_high = end;
        Some(start)
    }

    /// Allocate transient bytes above the head cursor.
    ///
    /// Multiple temp allocations may coexist; they are freed collectively by
    /// [`reset_temp_allocations`](Self::reset_temp_allocations).
    pub fn allocate_temp(&mut self, size: usize, align: usize) -> Option<usize> {
        debug_assert!(align.is_power_of_two());
        let start = align_up(self.addr() + self.temp_high, align) - self.addr();
        let end = start.checked_add(size)?;
        if end > self.tail {
            return None;
        }
        self.temp_high = end;
        Some(start)
    }

    /// Free every temp allocation, returning the watermark to the head cursor.
    pub fn reset_temp_allocations(&mut self) {
        self.temp_high = self.head;
    }

    /// True when temp allocations are outstanding.
    pub fn has_live_temps(&self) -> bool {
        self.temp_high != self.head
    }

    /// Offset of the aligned base, where the head region starts.
    pub fn buffer_start(&self) -> usize {
        self.base
    }

    /// Offset one past the end of the head region.
    pub fn head_offset(&self) -> usize {
        self.head
    }

    /// Offset of the lowest permanent tail allocation.
    pub fn tail_offset(&self) -> usize {
        self.tail
    }

    /// Usable capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len() - self.base
    }

    /// Bytes consumed from both ends, including live temp allocations.
    pub fn used_bytes(&self) -> usize {
        (self.temp_high - self.base) + (self.buf.len() - self.tail)
    }

    /// Bytes a single allocation aligned to `align` could still get.
    pub fn available_memory(&self, align: usize) -> usize {
        debug_assert!(align.is_power_of_two());
        let start = align_up(self.addr() + self.temp_high, align) - self.addr();
        self.tail.saturating_sub(start)
    }

    /// Occupancy snapshot for diagnostics.
    pub fn usage(&self) -> ArenaUsage {
        ArenaUsage {
            capacity: self.capacity(),
            head_bytes: self.temp_high - self.base,
            tail_bytes: self.buf.len() - self.tail,
            free_bytes: self.tail - self.temp_high,
        }
    }

    // ---- typed access to allocated ranges ----
    //
    // Offsets must come from a prior allocation on this arena; slicing
    // panics on out-of-range access like any slice index.

    /// Borrow `len` bytes at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.buf[offset..offset + len]
    }

    /// Mutably borrow `len` bytes at `offset`.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.buf[offset..offset + len]
    }

    /// Read one `u32` at `offset` (native byte order).
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.buf[offset..offset + 4]);
        u32::from_ne_bytes(raw)
    }

    /// Write one `u32` at `offset` (native byte order).
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
    }

    /// Write a run of `i32` values starting at `offset`.
    pub fn write_i32s(&mut self, offset: usize, values: &[i32]) {
        for (i, v) in values.iter().enumerate() {
            self.buf[offset + i * 4..offset + i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
        }
    }

    /// Read `len` `i32` values starting at `offset`.
    pub fn read_i32s(&self, offset: usize, len: usize) -> Vec<i32> {
        self.buf[offset..offset + len * 4]
            .chunks_exact(4)
            .map(|c| i32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    /// Write a run of `f32` values starting at `offset`.
    pub fn write_f32s(&mut self, offset: usize, values: &[f32]) {
        for (i, v) in values.iter().enumerate() {
            self.buf[offset + i * 4..offset + i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
        }
    }

    /// Read `len` `f32` values starting at `offset`.
    pub fn read_f32s(&self, offset: usize, len: usize) -> Vec<f32> {
        self.buf[offset..offset + len * 4]
            .chunks_exact(4)
            .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }
}

impl std::fmt::Debug for DualCursorArena<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DualCursorArena")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("temp_high", &self.temp_high)
            .field("tail", &self.tail)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tail_allocation_is_aligned() {
        let mut backing = vec![0u8; 1024];
        let mut arena = DualCursorArena::new(&mut backing);

        let a = arena.from_tail(100, 16).unwrap();
        assert_eq!((arena.addr() + a) % 16, 0);

        let b = arena.from_tail(10, 16).unwrap();
        assert!(b < a);
        assert_eq!((arena.addr() + b) % 16, 0);
    }

    #[test]
    fn test_tail_grows_down() {
        let mut backing = vec![0u8; 512];
        let mut arena = DualCursorArena::new(&mut backing);

        let first = arena.from_tail(64, 16).unwrap();
        let second = arena.from_tail(64, 16).unwrap();
        assert_eq!(first - second, 64);
        assert_eq!(arena.tail_offset(), second);
    }

    #[test]
    fn test_tail_exhaustion() {
        let mut backing = vec![0u8; 256];
        let mut arena = DualCursorArena::new(&mut backing);

        assert!(arena.from_tail(200, 16).is_some());
        assert!(arena.from_tail(200, 16).is_none());
    }

    #[test]
    fn test_head_never_crosses_tail() {
        let mut backing = vec![0u8; 256];
        let mut arena = DualCursorArena::new(&mut backing);

        let tail = arena.from_tail(128, 16).unwrap();
        assert!(arena.ensure_head(tail - arena.buffer_start(), 16).is_some());
        assert!(arena.head_offset() <= arena.tail_offset());
        assert!(arena.ensure_head(tail - arena.buffer_start() + 1, 16).is_none());
    }

    #[test]
    fn test_ensure_head_grows_and_shrinks() {
        let mut backing = vec![0u8; 1024];
        let mut arena = DualCursorArena::new(&mut backing);

        let start = arena.ensure_head(256, 16).unwrap();
        assert_eq!(start, arena.buffer_start());
        assert_eq!(arena.head_offset(), start + 256);

        // Shrinking does not leak: the region is measured from the base.
        arena.ensure_head(64, 16).unwrap();
        assert_eq!(arena.head_offset(), start + 64);

        arena.ensure_head(512, 16).unwrap();
        assert_eq!(arena.head_offset(), start + 512);
    }

    #[test]
    fn test_ensure_head_rejects_live_temps() {
        let mut backing = vec![0u8; 1024];
        let mut arena = DualCursorArena::new(&mut backing);

        arena.allocate_temp(32, 16).unwrap();
        assert!(arena.has_live_temps());
        assert!(arena.ensure_head(64, 16).is_none());

        arena.reset_temp_allocations();
        assert!(arena.ensure_head(64, 16).is_some());
    }

    #[test]
    fn test_temp_reset_restores_used_bytes_exactly() {
        let mut backing = vec![0u8; 1024];
        let mut arena = DualCursorArena::new(&mut backing);

        arena.ensure_head(128, 16).unwrap();
        arena.from_tail(64, 16).unwrap();
        let before = arena.used_bytes();

        arena.allocate_temp(100, 16).unwrap();
        arena.allocate_temp(40, 4).unwrap();
        assert!(arena.used_bytes() > before);

        arena.reset_temp_allocations();
        assert_eq!(arena.used_bytes(), before);
    }

    #[test]
    fn test_temps_block_the_tail() {
        let mut backing = vec![0u8; 256];
        let mut arena = DualCursorArena::new(&mut backing);

        let cap = arena.capacity();
        arena.allocate_temp(cap - 32, 16).unwrap();
        // The orphan temp consumes the middle; the tail sees almost nothing.
        assert!(arena.from_tail(64, 16).is_none());
        assert!(arena.from_tail(16, 16).is_some());
    }

    #[test]
    fn test_available_memory_accounts_for_alignment() {
        let mut backing = vec![0u8; 1024];
        let mut arena = DualCursorArena::new(&mut backing);

        let total = arena.available_memory(16);
        assert_eq!(total, arena.capacity());

        arena.allocate_temp(10, 4).unwrap();
        let after = arena.available_memory(16);
        // The 10-byte temp costs a full aligned step of head-side capacity.
        assert!(after < total);
        assert!(after >= total - 32);
    }

    #[test]
    fn test_typed_round_trip() {
        let mut backing = vec![0u8; 512];
        let mut arena = DualCursorArena::new(&mut backing);

        let off = arena.from_tail(64, 16).unwrap();
        arena.write_i32s(off, &[1, -2, 3]);
        assert_eq!(arena.read_i32s(off, 3), vec![1, -2, 3]);

        arena.write_f32s(off + 16, &[0.5, -1.25]);
        assert_eq!(arena.read_f32s(off + 16, 2), vec![0.5, -1.25]);

        arena.write_u32(off + 32, 0xDEAD_BEEF);
        assert_eq!(arena.read_u32(off + 32), 0xDEAD_BEEF);
    }

    #[test]
    fn test_usage_snapshot() {
        let mut backing = vec![0u8; 1024];
        let mut arena = DualCursorArena::new(&mut backing);

        arena.ensure_head(96, 16).unwrap();
        arena.from_tail(160, 16).unwrap();

        let usage = arena.usage();
        assert_eq!(usage.head_bytes, 96);
        assert!(usage.tail_bytes >= 160);
        assert_eq!(
            usage.capacity,
            usage.head_bytes + usage.tail_bytes + usage.free_bytes
        );
    }

    #[test]
    fn test_zero_sized_requests() {
        let mut backing = vec![0u8; 128];
        let mut arena = DualCursorArena::new(&mut backing);

        let used = arena.used_bytes();
        assert!(arena.from_tail(0, 1).is_some());
        assert!(arena.allocate_temp(0, 1).is_some());
        assert_eq!(arena.used_bytes(), used);
    }
}
