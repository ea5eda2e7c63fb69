//! Growable byte region backing reassembled messages.
//!
//! [`MessageBuffer`] owns a raw heap block obtained from the global allocator
//! and grows it by doubling as fragments are appended. Buffers are recycled
//! through [`BoundedPool`](crate::pool::BoundedPool), so a block usually
//! outlives the message it was filled for: [`MessageBuffer::shrink`] hands an
//! oversized block back to the allocator once a large message has been
//! handled, and [`MessageBuffer::dispose`] releases it for good.

use std::{
    alloc::{self, Layout},
    fmt,
    ptr::{self, NonNull},
    slice,
};

use thiserror::Error;

/// Largest block a single allocation may request.
pub const MAX_ALLOCATION: usize = isize::MAX as usize;

/// Capacity chosen when the first write lands in an empty buffer.
const MIN_GROWTH: usize = 4;

/// Errors produced by [`MessageBuffer`] operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum BufferError {
    /// The buffer has already released its memory.
    #[error("message buffer has been disposed")]
    Disposed,
    /// Growing the buffer would exceed the allocation limit.
    #[error("buffer capacity exceeded: requested={requested}, limit={limit}")]
    CapacityExceeded { requested: usize, limit: usize },
}

/// Owned, growable byte accumulator.
///
/// The logical length never exceeds the capacity, and after construction the
/// capacity never drops below the baseline except through
/// [`dispose`](Self::dispose).
pub struct MessageBuffer {
    ptr: NonNull<u8>,
    capacity: usize,
    len: usize,
    baseline: usize,
    limit: usize,
    disposed: bool,
}

// SAFETY: the buffer exclusively owns its block; no aliasing pointer escapes
// except through borrows tied to `&self`/`&mut self`.
unsafe impl Send for MessageBuffer {}
// SAFETY: shared access only reads through `&self`.
unsafe impl Sync for MessageBuffer {}

impl MessageBuffer {
    /// Allocate a buffer with `baseline` bytes of capacity.
    ///
    /// A baseline above [`MAX_ALLOCATION`] is clamped to it.
    #[must_use]
    pub fn new(baseline: usize) -> Self { Self::with_limit(baseline, MAX_ALLOCATION) }

    /// Allocate a buffer whose growth is capped at `limit` bytes.
    ///
    /// Both the limit and the baseline are clamped so that
    /// `baseline <= limit <= MAX_ALLOCATION`.
    #[must_use]
    pub fn with_limit(baseline: usize, limit: usize) -> Self {
        let limit = limit.min(MAX_ALLOCATION);
        let baseline = baseline.min(limit);
        let mut buffer = Self {
            ptr: NonNull::dangling(),
            capacity: 0,
            len: 0,
            baseline,
            limit,
            disposed: false,
        };
        buffer.reallocate(baseline);
        buffer
    }

    /// Number of valid bytes.
    #[must_use]
    pub fn len(&self) -> usize { self.len }

    /// Whether the buffer holds no valid bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// Size of the allocated block.
    #[must_use]
    pub fn capacity(&self) -> usize { self.capacity }

    /// Capacity the buffer was constructed with and shrinks back to.
    #[must_use]
    pub fn baseline(&self) -> usize { self.baseline }

    /// Whether [`dispose`](Self::dispose) has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool { self.disposed }

    /// Borrow the valid region.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Disposed`] after disposal.
    pub fn as_slice(&self) -> Result<&[u8], BufferError> {
        self.ensure_live()?;
        // SAFETY: `ptr` is valid for `capacity >= len` bytes, the first `len`
        // of which are initialised; a dangling pointer is fine for `len == 0`.
        Ok(unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) })
    }

    /// Mutably borrow the valid region.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Disposed`] after disposal.
    pub fn as_mut_slice(&mut self) -> Result<&mut [u8], BufferError> {
        self.ensure_live()?;
        // SAFETY: as in `as_slice`, and `&mut self` guarantees uniqueness.
        Ok(unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) })
    }

    /// Append `bytes`, growing the block as required.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Disposed`] after disposal, or
    /// [`BufferError::CapacityExceeded`] when the resulting length would pass
    /// the allocation limit.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        self.ensure_live()?;
        let required = self
            .len
            .checked_add(bytes.len())
            .ok_or(BufferError::CapacityExceeded {
                requested: usize::MAX,
                limit: self.limit,
            })?;
        self.ensure_capacity(required)?;
        // SAFETY: capacity >= required, so `[len, required)` lies inside the
        // block, and `bytes` cannot overlap memory we exclusively own.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.as_ptr().add(self.len), bytes.len());
        }
        self.len = required;
        Ok(())
    }

    /// Set the logical length to `new_len`.
    ///
    /// Growing zero-fills `[old_len, new_len)`; shrinking only truncates.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Disposed`] after disposal, or
    /// [`BufferError::CapacityExceeded`] when `new_len` passes the limit.
    pub fn set_length(&mut self, new_len: usize) -> Result<(), BufferError> {
        self.ensure_live()?;
        self.ensure_capacity(new_len)?;
        if new_len > self.len {
            // SAFETY: `[len, new_len)` lies inside the block.
            unsafe { ptr::write_bytes(self.ptr.as_ptr().add(self.len), 0, new_len - self.len) };
        }
        self.len = new_len;
        Ok(())
    }

    /// Zero the valid region and reset the length, keeping the capacity.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Disposed`] after disposal.
    pub fn clear(&mut self) -> Result<(), BufferError> {
        self.ensure_live()?;
        // SAFETY: `[0, len)` lies inside the block.
        unsafe { ptr::write_bytes(self.ptr.as_ptr(), 0, self.len) };
        self.len = 0;
        Ok(())
    }

    /// Return the block to its baseline size if it has grown past it.
    ///
    /// When the baseline is smaller than the current length the length is
    /// truncated to the new capacity.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Disposed`] after disposal.
    pub fn shrink(&mut self) -> Result<(), BufferError> {
        self.ensure_live()?;
        if self.capacity > self.baseline {
            self.reallocate(self.baseline);
            self.len = self.len.min(self.capacity);
        }
        Ok(())
    }

    /// Release the block. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.release();
        self.len = 0;
        self.disposed = true;
    }

    fn ensure_live(&self) -> Result<(), BufferError> {
        if self.disposed {
            Err(BufferError::Disposed)
        } else {
            Ok(())
        }
    }

    fn ensure_capacity(&mut self, required: usize) -> Result<(), BufferError> {
        if required <= self.capacity {
            return Ok(());
        }
        if required > self.limit {
            return Err(BufferError::CapacityExceeded {
                requested: required,
                limit: self.limit,
            });
        }
        let mut next = if self.capacity == 0 {
            MIN_GROWTH
        } else {
            self.capacity
        };
        while next < required {
            next = next.saturating_mul(2);
        }
        self.reallocate(next.min(self.limit));
        Ok(())
    }

    /// Move the block to `new_capacity` bytes, preserving the common prefix.
    ///
    /// Callers guarantee `new_capacity <= self.limit <= MAX_ALLOCATION`.
    fn reallocate(&mut self, new_capacity: usize) {
        if new_capacity == self.capacity {
            return;
        }
        if new_capacity == 0 {
            self.release();
            return;
        }
        let new_layout = byte_layout(new_capacity);
        let raw = if self.capacity == 0 {
            // SAFETY: `new_layout` has a non-zero size.
            unsafe { alloc::alloc(new_layout) }
        } else {
            // SAFETY: `ptr` was allocated by the global allocator with
            // `byte_layout(capacity)`, and `new_capacity` is non-zero and does
            // not exceed `isize::MAX`.
            unsafe { alloc::realloc(self.ptr.as_ptr(), byte_layout(self.capacity), new_capacity) }
        };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(new_layout)
        };
        self.ptr = ptr;
        self.capacity = new_capacity;
    }

    fn release(&mut self) {
        if self.capacity > 0 {
            // SAFETY: `ptr` was allocated with `byte_layout(capacity)` and is
            // released exactly once because `capacity` is reset below.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), byte_layout(self.capacity)) };
        }
        self.ptr = NonNull::dangling();
        self.capacity = 0;
    }
}

fn byte_layout(size: usize) -> Layout {
    // SAFETY: alignment 1 is a power of two and every caller keeps `size`
    // within `MAX_ALLOCATION`.
    unsafe { Layout::from_size_align_unchecked(size, 1) }
}

impl Drop for MessageBuffer {
    fn drop(&mut self) { self.release(); }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("baseline", &self.baseline)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
