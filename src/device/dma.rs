//! Page-locked DMA buffer allocator (C3, §4.2).
//!
//! Frame, audio, and ANC buffers handed to `AutoCirculateTransfer` must be
//! page-aligned and page-locked so the kernel driver can pin them for DMA.
//! This mirrors the teacher's own use of `nix::sys::mman` for `mmap`-backed
//! buffers, except here the allocator owns plain heap pages and locks them
//! with `mlock` rather than mapping a device file.

use std::alloc::{self, Layout};
use std::collections::HashMap;
use std::ptr::NonNull;
use std::sync::Arc;

use nix::sys::mman::{mlock, munlock};

use crate::{Error, Result};

fn page_size() -> usize {
    // SAFETY: `sysconf` with `_SC_PAGESIZE` is always valid to call.
    let n = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if n > 0 {
        n as usize
    } else {
        4096
    }
}

fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) / align * align
}

/// The page-locked allocation backing a [`DmaBlock`], reference-counted so
/// a [`DmaShare`] can reference the same pages without taking a second
/// `mlock` (§4.2 "share"). Unlocks and frees on the last drop.
#[derive(Debug)]
struct DmaAlloc {
    ptr: NonNull<u8>,
    page_len: usize,
    locked: bool,
}

// Exclusive mutation is gated through `Arc::get_mut` in `DmaBlock`; shared
// read-only access through `DmaShare` is safe for the same reason `&[u8]`
// behind an `Arc` always is.
unsafe impl Send for DmaAlloc {}
unsafe impl Sync for DmaAlloc {}

impl Drop for DmaAlloc {
    fn drop(&mut self) {
        if self.locked {
            // SAFETY: `ptr`/`page_len` describe the region previously
            // passed to `mlock`.
            let _ = unsafe { munlock(self.ptr.as_ptr() as *mut _, self.page_len) };
        }
        let layout = Layout::from_size_align(self.page_len, page_size()).unwrap();
        // SAFETY: allocated with the same layout in `Allocator::allocate`.
        unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) };
    }
}

/// One page-locked allocation. Frees and unlocks its pages once this block
/// and every [`DmaShare`] taken from it have dropped.
#[derive(Debug)]
pub struct DmaBlock {
    alloc: Arc<DmaAlloc>,
    len: usize,
}

impl DmaBlock {
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `ptr` is valid for `len` bytes for the allocation's lifetime.
        unsafe { std::slice::from_raw_parts(self.alloc.ptr.as_ptr(), self.len) }
    }

    /// Mutable access, available only while no [`DmaShare`] of this block is
    /// outstanding (checked via `Arc::get_mut`, so aliasing a `DmaShare`'s
    /// read-only view with a live `&mut [u8]` is never possible).
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let len = self.len;
        let alloc = Arc::get_mut(&mut self.alloc)
            .expect("DmaBlock::as_mut_slice called while a DmaShare of it is outstanding");
        // SAFETY: `Arc::get_mut` proved exclusive access to the allocation.
        unsafe { std::slice::from_raw_parts_mut(alloc.ptr.as_ptr(), len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_page_locked(&self) -> bool {
        self.alloc.locked
    }

    /// Returns a read-only sub-view `[offset, offset+len)` of this block
    /// without taking a second `mlock` (§4.2 "share"); the underlying pages
    /// stay locked as long as this share, or the owning block, is alive.
    pub fn share(&self, offset: usize, len: usize) -> Result<DmaShare> {
        if offset.checked_add(len).map_or(true, |end| end > self.len) {
            return Err(Error::FatalConfig(format!(
                "DMA share range {offset}..{} exceeds block length {}",
                offset + len,
                self.len
            )));
        }
        Ok(DmaShare {
            alloc: Arc::clone(&self.alloc),
            offset,
            len,
        })
    }
}

/// A read-only view into part of a [`DmaBlock`]'s pages (§4.2 "share").
/// Dropping it only decrements the shared allocation's reference count;
/// there is no separate page-lock to release.
#[derive(Debug, Clone)]
pub struct DmaShare {
    alloc: Arc<DmaAlloc>,
    offset: usize,
    len: usize,
}

impl DmaShare {
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `share` validated `offset + len <= alloc`'s region.
        unsafe { std::slice::from_raw_parts(self.alloc.ptr.as_ptr().add(self.offset), self.len) }
    }

    pub fn len(&self) -> usize {
        self.len
    }
}

/// Page-locked allocator with a small free-list cache keyed by size, so
/// repeated ring-fill allocations of the same frame geometry don't pay the
/// `mlock` cost every time (§4.2 "reuse before allocating").
#[derive(Debug)]
pub struct Allocator {
    cache: HashMap<usize, Vec<DmaBlock>>,
    cache_cap_per_size: usize,
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

impl Allocator {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
            cache_cap_per_size: 8,
        }
    }

    /// Returns a page-locked block of at least `len` bytes, reusing a
    /// cached block of the same size if one is free.
    pub fn allocate(&mut self, len: usize) -> Result<DmaBlock> {
        if let Some(blocks) = self.cache.get_mut(&len) {
            if let Some(block) = blocks.pop() {
                return Ok(block);
            }
        }

        let page = page_size();
        let page_len = round_up(len.max(1), page);
        let layout = Layout::from_size_align(page_len, page)
            .map_err(|e| Error::FatalConfig(format!("bad DMA buffer layout: {e}")))?;

        // SAFETY: `layout` has non-zero size (`len.max(1)` rounded up).
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(Error::AllocatorExhausted { pool: "dma" })?;

        // SAFETY: `ptr` is valid for `page_len` bytes, just allocated.
        let locked = match unsafe { mlock(ptr.as_ptr() as *const _, page_len) } {
            Ok(()) => true,
            Err(e) => {
                log::warn!(
                    "mlock failed ({e}); DMA buffer is not page-locked, transfers may stall under memory pressure"
                );
                false
            }
        };

        Ok(DmaBlock {
            alloc: Arc::new(DmaAlloc { ptr, page_len, locked }),
            len,
        })
    }

    /// Returns a block to the cache for reuse by a future [`Self::allocate`]
    /// call of the same size. Drops the block (unlocking/freeing it) if the
    /// per-size cache is already full.
    pub fn release(&mut self, block: DmaBlock) {
        let entry = self.cache.entry(block.len).or_default();
        if entry.len() < self.cache_cap_per_size {
            entry.push(block);
        }
        // else: `block` drops here, unlocking and freeing its pages.
    }

    /// Returns a `DmaShare` to the pool. There is no second page-lock to
    /// release, so this is a no-op beyond dropping the reference (§4.2
    /// "copy"/"share": "free is a no-op").
    pub fn release_share(&mut self, _share: DmaShare) {}

    /// Copies `block`'s contents into a freshly allocated block, for callers
    /// that need an independently owned buffer rather than a read-only
    /// `share` (§4.2 "copy").
    pub fn copy(&mut self, block: &DmaBlock) -> Result<DmaBlock> {
        let mut copy = self.allocate(block.len())?;
        copy.as_mut_slice().copy_from_slice(block.as_slice());
        Ok(copy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_gives_zeroed_buffer_of_requested_length() {
        let mut alloc = Allocator::new();
        let block = alloc.allocate(4096).unwrap();
        assert_eq!(block.len(), 4096);
        assert!(block.as_slice().iter().all(|&b| b == 0));
    }

    #[test]
    fn released_block_is_reused_before_allocating_new() {
        let mut alloc = Allocator::new();
        let block = alloc.allocate(8192).unwrap();
        let ptr = block.as_slice().as_ptr();
        alloc.release(block);

        let reused = alloc.allocate(8192).unwrap();
        assert_eq!(reused.as_slice().as_ptr(), ptr);
    }

    #[test]
    fn cache_does_not_grow_without_bound() {
        let mut alloc = Allocator::new();
        for _ in 0..20 {
            let block = alloc.allocate(4096).unwrap();
            alloc.release(block);
        }
        assert!(alloc.cache.get(&4096).unwrap().len() <= alloc.cache_cap_per_size);
    }

    #[test]
    fn share_reads_the_same_bytes_without_a_second_lock() {
        let mut alloc = Allocator::new();
        let mut block = alloc.allocate(64).unwrap();
        block.as_mut_slice()[0..4].copy_from_slice(&[1, 2, 3, 4]);

        let share = block.share(0, 4).unwrap();
        assert_eq!(share.as_slice(), &[1, 2, 3, 4]);
    }

    #[test]
    fn mutating_while_shared_panics() {
        let mut alloc = Allocator::new();
        let mut block = alloc.allocate(64).unwrap();
        let _share = block.share(0, 8).unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            block.as_mut_slice();
        }));
        assert!(result.is_err());
    }

    #[test]
    fn share_out_of_range_is_rejected() {
        let mut alloc = Allocator::new();
        let block = alloc.allocate(16).unwrap();
        assert!(block.share(10, 10).is_err());
    }

    #[test]
    fn copy_produces_an_independent_block_with_equal_contents() {
        let mut alloc = Allocator::new();
        let mut block = alloc.allocate(32).unwrap();
        block.as_mut_slice()[0] = 0xAB;

        let copied = alloc.copy(&block).unwrap();
        assert_eq!(copied.as_slice(), block.as_slice());
        assert_ne!(copied.as_slice().as_ptr(), block.as_slice().as_ptr());
    }
}
