//! # Aligned Scratch Buffers
//!
//! Growable byte buffers aligned to 16 bytes, for regions that feed the
//! Galois-field multiply/multiply-add kernels in [`crate::gf`]. Alignment is
//! a prerequisite for the wide loads a vectorized `region_mul` would use,
//! even though the portable fallback here processes one symbol at a time.
//!
//! Two flavors, mirroring the two allocation strategies a hot coding path
//! needs:
//!
//! - [`AlignedBuf`] never initializes bytes it doesn't have to. Growing it
//!   leaves the new tail uninitialized until the caller writes into it via
//!   [`AlignedBuf::spare_mut`] and then commits the length with
//!   [`AlignedBuf::set_len`]. Used for repair/source payloads that are about
//!   to be fully overwritten by a region operation anyway.
//! - [`ZeroedAlignedBuf`] zero-fills on growth, for accumulators that are
//!   XORed into incrementally and must start clean.

use std::alloc::{alloc, alloc_zeroed, dealloc, realloc, Layout};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

const ALIGN: usize = 16;

/// A 16-byte-aligned growable byte buffer that does not zero-initialize new
/// capacity.
///
/// # Safety invariant
///
/// `len <= cap`, and bytes `[0, len)` are always initialized; bytes in
/// `[len, cap)` may be garbage until written.
pub struct AlignedBuf {
    ptr: NonNull<u8>,
    len: usize,
    cap: usize,
}

// SAFETY: AlignedBuf owns its allocation exclusively, same as Vec<u8>.
unsafe impl Send for AlignedBuf {}
unsafe impl Sync for AlignedBuf {}

impl AlignedBuf {
    /// An empty buffer; allocates nothing until grown.
    pub fn new() -> Self {
        AlignedBuf {
            ptr: NonNull::dangling(),
            len: 0,
            cap: 0,
        }
    }

    /// A buffer with at least `cap` bytes of uninitialized capacity and a
    /// length of zero.
    pub fn with_capacity(cap: usize) -> Self {
        let mut buf = Self::new();
        buf.reserve(cap);
        buf
    }

    /// Number of initialized bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total allocated capacity.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Ensure at least `additional` bytes of spare capacity beyond `len`.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.len.checked_add(additional).expect("capacity overflow");
        if required <= self.cap {
            return;
        }
        let new_cap = required.max(self.cap.saturating_mul(2)).max(ALIGN);
        // SAFETY: new_cap > 0 and ALIGN is a valid power-of-two alignment.
        let new_layout = Layout::from_size_align(new_cap, ALIGN).expect("layout overflow");
        let new_ptr = if self.cap == 0 {
            // SAFETY: new_layout has nonzero size.
            unsafe { alloc(new_layout) }
        } else {
            let old_layout = Layout::from_size_align(self.cap, ALIGN).expect("layout overflow");
            // SAFETY: self.ptr was allocated with old_layout by this same allocator.
            unsafe { realloc(self.ptr.as_ptr(), old_layout, new_cap) }
        };
        self.ptr = NonNull::new(new_ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(new_layout));
        self.cap = new_cap;
    }

    /// The uninitialized tail of the buffer, from `len` to `capacity`.
    ///
    /// Callers must write valid bytes into (a prefix of) this slice and then
    /// call [`set_len`](Self::set_len) before reading them back.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        // SAFETY: [len, cap) is within the allocation; contents may be
        // uninitialized but `u8` has no validity invariant, so `&mut [u8]`
        // over raw bytes is sound to hand out.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(self.len), self.cap - self.len) }
    }

    /// Grow the buffer by `additional` uninitialized bytes and return a
    /// mutable slice over exactly those new bytes.
    pub fn grow_uninit(&mut self, additional: usize) -> &mut [u8] {
        self.reserve(additional);
        let start = self.len;
        self.len += additional;
        // SAFETY: [start, start+additional) was just reserved.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(start), additional) }
    }

    /// Set the initialized length. The caller must have written valid bytes
    /// into `[old_len, new_len)` first (e.g. via [`spare_mut`](Self::spare_mut)).
    ///
    /// # Safety
    ///
    /// `new_len <= capacity()` and bytes `[0, new_len)` must be initialized.
    pub unsafe fn set_len(&mut self, new_len: usize) {
        debug_assert!(new_len <= self.cap);
        self.len = new_len;
    }

    /// Truncate to zero length without freeing the allocation.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// Append `data`, growing the buffer if needed.
    pub fn extend_from_slice(&mut self, data: &[u8]) {
        let dst = self.grow_uninit(data.len());
        dst.copy_from_slice(data);
    }
}

impl Default for AlignedBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        if self.cap != 0 {
            let layout = Layout::from_size_align(self.cap, ALIGN).expect("layout overflow");
            // SAFETY: self.ptr was allocated with this layout.
            unsafe { dealloc(self.ptr.as_ptr(), layout) };
        }
    }
}

impl Clone for AlignedBuf {
    fn clone(&self) -> Self {
        let mut buf = Self::with_capacity(self.len);
        buf.extend_from_slice(self);
        buf
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        // SAFETY: [0, len) is always initialized per the struct invariant.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: [0, len) is always initialized per the struct invariant.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl std::fmt::Debug for AlignedBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBuf")
            .field("len", &self.len)
            .field("cap", &self.cap)
            .finish()
    }
}

/// A 16-byte-aligned growable byte buffer that zero-fills new capacity as it
/// grows. Suited to XOR accumulators built up across several
/// [`crate::gf::GaloisField::region_mul_add`] calls.
#[derive(Debug)]
pub struct ZeroedAlignedBuf {
    inner: AlignedBuf,
}

impl ZeroedAlignedBuf {
    pub fn new() -> Self {
        ZeroedAlignedBuf {
            inner: AlignedBuf::new(),
        }
    }

    /// A zero-filled buffer of exactly `len` bytes.
    pub fn zeroed(len: usize) -> Self {
        let mut buf = Self::new();
        buf.resize(len);
        buf
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Grow or shrink to exactly `new_len` bytes. New bytes introduced by
    /// growth are zeroed; this never shrinks the backing allocation.
    pub fn resize(&mut self, new_len: usize) {
        if new_len <= self.inner.len() {
            // SAFETY: new_len <= len <= cap, and [0, new_len) is already
            // initialized since it was initialized at the old, larger len.
            unsafe { self.inner.set_len(new_len) };
            return;
        }
        let additional = new_len - self.inner.len();
        self.inner.reserve(additional);
        let spare = &mut self.inner.spare_mut()[..additional];
        spare.fill(0);
        // SAFETY: just zeroed [old_len, new_len).
        unsafe { self.inner.set_len(new_len) };
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }
}

impl Default for ZeroedAlignedBuf {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for ZeroedAlignedBuf {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.inner
    }
}

impl DerefMut for ZeroedAlignedBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.inner
    }
}

impl Clone for ZeroedAlignedBuf {
    fn clone(&self) -> Self {
        ZeroedAlignedBuf {
            inner: self.inner.clone(),
        }
    }
}

// `alloc_zeroed` is used by the initial-construction fast path when the
// caller already knows the final length, avoiding the reserve-then-fill
// dance `resize` does for incremental growth.
impl ZeroedAlignedBuf {
    /// Construct a zero-filled buffer of `len` bytes in one allocation.
    pub fn zeroed_fast(len: usize) -> Self {
        if len == 0 {
            return Self::new();
        }
        let cap = len.max(ALIGN);
        let layout = Layout::from_size_align(cap, ALIGN).expect("layout overflow");
        // SAFETY: layout has nonzero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        ZeroedAlignedBuf {
            inner: AlignedBuf {
                ptr,
                len,
                cap,
            },
        }
    }
}
