/*!
 * Thread Stack Regions
 *
 * A stack region is the memory a worker thread runs on. Regions either come
 * from the anonymous-mapping allocator here (with a PROT_NONE guard page at
 * the low end) or are supplied by an external allocator, in which case this
 * crate never unmaps them.
 *
 * Nothing in this file allocates from the heap, so the bootstrap launcher can
 * use it before the runtime exists.
 */

use crate::core::errors::{SpawnError, SpawnResult};
use crate::core::limits::{FALLBACK_PAGE_SIZE, MIN_STACK_SIZE};
use nix::sys::mman::{mmap_anonymous, mprotect, munmap, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;

/// System page size
pub fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

fn check_size(size: usize) -> SpawnResult<()> {
    if size == 0 {
        return Err(SpawnError::EmptyStack);
    }
    if size < MIN_STACK_SIZE {
        return Err(SpawnError::StackTooSmall {
            size,
            min: MIN_STACK_SIZE,
        });
    }
    Ok(())
}

/// Memory a worker thread runs on
///
/// The launcher owns the region while the thread runs; `ThreadHandle::join`
/// hands it back once the kernel reports the thread gone.
#[derive(Debug)]
pub struct StackRegion {
    base: NonNull<u8>,
    len: usize,
    guard: usize,
    owned: bool,
}

// SAFETY: the region is plain memory with a single owner.
unsafe impl Send for StackRegion {}

impl StackRegion {
    /// Map a fresh stack of at least `size` usable bytes plus a guard page
    ///
    /// Rejects empty and undersized requests without touching the kernel.
    pub fn allocate(size: usize) -> SpawnResult<Self> {
        check_size(size)?;

        let page = page_size();
        let usable = size
            .checked_add(page - 1)
            .map(|n| n & !(page - 1))
            .ok_or(SpawnError::StackAllocation(libc::ENOMEM))?;
        let total = usable
            .checked_add(page)
            .and_then(NonZeroUsize::new)
            .ok_or(SpawnError::StackAllocation(libc::ENOMEM))?;

        // SAFETY: a fresh anonymous private mapping aliases nothing.
        let base = unsafe {
            mmap_anonymous(
                None,
                total,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS | MapFlags::MAP_STACK,
            )
        }
        .map_err(|e| SpawnError::StackAllocation(e as i32))?;

        // SAFETY: the first page lies inside the mapping created above.
        if let Err(e) = unsafe { mprotect(base, page, ProtFlags::PROT_NONE) } {
            // SAFETY: base/total describe the mapping created above.
            let _ = unsafe { munmap(base, total.get()) };
            return Err(SpawnError::StackAllocation(e as i32));
        }

        Ok(Self {
            base: base.cast(),
            len: total.get(),
            guard: page,
            owned: true,
        })
    }

    /// Wrap a region obtained from an external allocator
    ///
    /// The region is never unmapped by this crate; release it to its
    /// allocator after `ThreadHandle::join` returns it.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be writable memory that nothing else uses
    /// until the region is dropped or handed back by `join`.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> SpawnResult<Self> {
        check_size(len)?;
        Ok(Self {
            base,
            len,
            guard: 0,
            owned: false,
        })
    }

    /// Start of the whole region, guard page included
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Total length including the guard page
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false: empty regions cannot be constructed
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes the thread can actually use
    pub fn usable_len(&self) -> usize {
        self.len - self.guard
    }

    /// Whether dropping this region unmaps it
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// One past the highest usable byte (stacks grow down from here)
    pub fn top(&self) -> *mut u8 {
        // SAFETY: base + len is one past the end of the region.
        unsafe { self.base.as_ptr().add(self.len) }
    }

    /// Give up ownership for the life of the process
    pub fn leak(self) {
        std::mem::forget(self);
    }
}

impl Drop for StackRegion {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        let base: NonNull<c_void> = self.base.cast();
        // SAFETY: base/len describe a mapping this region created and no
        // thread runs on it any more (see ThreadHandle::join).
        if let Err(e) = unsafe { munmap(base, self.len) } {
            tracing::warn!(errno = e as i32, len = self.len, "Failed to unmap thread stack");
        }
    }
}
