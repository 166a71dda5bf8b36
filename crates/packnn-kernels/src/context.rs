//! Scratch-buffer boundary to the graph runtime
//!
//! Operators request scratch space during Prepare and receive an opaque
//! index. During Eval the index is exchanged for the buffer, whose size was
//! fixed at request time. Kernels never allocate scratch memory themselves.

use packnn_common::{KernelError, Result};

/// Opaque handle to a scratch region reserved during Prepare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScratchIndex(usize);

impl ScratchIndex {
    pub fn get(&self) -> usize {
        self.0
    }
}

/// Services the graph runtime provides to packed operators.
pub trait KernelContext {
    /// Reserve `bytes` of scratch memory. Only valid during Prepare.
    fn request_scratch_buffer(&mut self, bytes: usize) -> Result<ScratchIndex>;

    /// Borrow a region reserved during Prepare.
    fn scratch_buffer(&mut self, index: ScratchIndex) -> Result<&mut [u8]>;
}

const SCRATCH_ALIGN: usize = 16;

/// Fixed-capacity bump arena implementing [`KernelContext`].
///
/// Regions start on 16-byte boundaries, so any region can be viewed as
/// `i32` without copying.
#[derive(Debug)]
pub struct ScratchArena {
    storage: Vec<u128>,
    capacity: usize,
    regions: Vec<(usize, usize)>,
    used: usize,
}

impl ScratchArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u128; capacity.div_ceil(SCRATCH_ALIGN)],
            capacity,
            regions: Vec::new(),
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes reserved so far, including alignment padding.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.used
    }

    pub fn regions(&self) -> usize {
        self.regions.len()
    }

    /// Drop every reservation, e.g. before re-preparing a model.
    pub fn reset(&mut self) {
        self.regions.clear();
        self.used = 0;
    }
}

impl KernelContext for ScratchArena {
    fn request_scratch_buffer(&mut self, bytes: usize) -> Result<ScratchIndex> {
        let start = self.used.next_multiple_of(SCRATCH_ALIGN);
        let end = start.checked_add(bytes).filter(|&end| end <= self.capacity).ok_or(
            KernelError::ScratchExhausted {
                requested: bytes,
                available: self.capacity.saturating_sub(start),
            },
        )?;
        self.regions.push((start, end));
        self.used = end;
        tracing::trace!(bytes, start, index = self.regions.len() - 1, "reserved scratch region");
        Ok(ScratchIndex(self.regions.len() - 1))
    }

    fn scratch_buffer(&mut self, index: ScratchIndex) -> Result<&mut [u8]> {
        let &(start, end) = self
            .regions
            .get(index.0)
            .ok_or(KernelError::ScratchUnavailable { index: index.0 })?;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.storage);
        Ok(&mut bytes[start..end])
    }
}
