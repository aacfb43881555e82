//! Executable code arena.
//!
//! One fixed-size mapping reserved up front and bump-allocated. Pages are
//! writable or executable, never both: [`CodeArena::begin_write`] opens
//! the pages from the current cursor onward for writing and
//! [`CodeArena::finish_write`] flips everything written since back to
//! read+execute.

use std::ptr::NonNull;

use crate::error::{JitError, Result};

/// Alignment of every function entry.
pub const CODE_ALIGN: usize = 16;

/// Bump-allocated executable memory.
pub struct CodeArena {
    base: NonNull<u8>,
    size: usize,
    top: usize,
    page: usize,
    writable_from: Option<usize>,
}

// SAFETY: the arena owns its mapping; all mutation goes through `&mut self`.
unsafe impl Send for CodeArena {}

impl CodeArena {
    /// Map `size` bytes (rounded up to whole pages).
    pub fn reserve(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(JitError::ArenaExhausted {
                requested: 0,
                remaining: 0,
            });
        }
        let page = page_size();
        let size = size.div_ceil(page) * page;
        let base = map(size)?;
        tracing::debug!(target: "opjit::arena", size, page, "code arena reserved");
        Ok(Self {
            base,
            size,
            top: 0,
            page,
            writable_from: Some(0),
        })
    }

    /// Make the unused tail writable. Idempotent.
    pub fn begin_write(&mut self) -> Result<()> {
        if self.writable_from.is_some() {
            return Ok(());
        }
        let start = self.top - self.top % self.page;
        if start < self.size {
            // SAFETY: the range lies inside the mapping.
            unsafe { protect(self.base.as_ptr().add(start), self.size - start, false)? };
        }
        self.writable_from = Some(start);
        tracing::trace!(target: "opjit::arena", from = start, "arena writable");
        Ok(())
    }

    /// Copy `code` into the arena and return its address.
    pub fn alloc(&mut self, code: &[u8]) -> Result<usize> {
        if self.writable_from.is_none() {
            return Err(JitError::BatchState("arena is not writable"));
        }
        let start = self.top.div_ceil(CODE_ALIGN) * CODE_ALIGN;
        let remaining = self.size.saturating_sub(start);
        if code.len() > remaining {
            tracing::warn!(
                target: "opjit::arena",
                requested = code.len(),
                remaining,
                "code arena exhausted"
            );
            return Err(JitError::ArenaExhausted {
                requested: code.len(),
                remaining,
            });
        }
        // SAFETY: `start + code.len() <= size` and the tail is writable.
        unsafe {
            let dst = self.base.as_ptr().add(start);
            std::ptr::copy_nonoverlapping(code.as_ptr(), dst, code.len());
        }
        self.top = start + code.len();
        Ok(self.base.as_ptr() as usize + start)
    }

    /// Flip everything written since [`Self::begin_write`] to read+execute.
    pub fn finish_write(&mut self) -> Result<()> {
        let Some(start) = self.writable_from else {
            return Ok(());
        };
        let end = self.top.div_ceil(self.page) * self.page;
        if end > start {
            // SAFETY: `start..end` lies inside the mapping and holds only
            // code this arena wrote.
            unsafe {
                let ptr = self.base.as_ptr().add(start);
                protect(ptr, end - start, true)?;
                flush_icache(ptr, end - start);
            }
        }
        self.writable_from = None;
        tracing::trace!(target: "opjit::arena", from = start, to = end, "arena executable");
        Ok(())
    }

    /// Bytes handed out so far (including alignment padding).
    pub fn used(&self) -> usize {
        self.top
    }

    /// Total capacity.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Bytes still available.
    pub fn remaining(&self) -> usize {
        self.size - self.top
    }

    /// `addr` points into this arena.
    pub fn contains(&self, addr: usize) -> bool {
        let base = self.base.as_ptr() as usize;
        (base..base + self.size).contains(&addr)
    }
}

impl std::fmt::Debug for CodeArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeArena")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("used", &self.top)
            .field("writable", &self.writable_from.is_some())
            .finish()
    }
}

impl Drop for CodeArena {
    fn drop(&mut self) {
        unmap(self.base, self.size);
        tracing::debug!(target: "opjit::arena", size = self.size, "code arena released");
    }
}

#[cfg(unix)]
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

#[cfg(unix)]
fn map(size: usize) -> Result<NonNull<u8>> {
    // SAFETY: anonymous private mapping, no file descriptor involved.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(JitError::ArenaReserve(std::io::Error::last_os_error()));
    }
    NonNull::new(ptr.cast::<u8>())
        .ok_or_else(|| JitError::ArenaReserve(std::io::Error::other("mmap returned null")))
}

#[cfg(unix)]
unsafe fn protect(ptr: *mut u8, len: usize, executable: bool) -> Result<()> {
    let prot = if executable {
        libc::PROT_READ | libc::PROT_EXEC
    } else {
        libc::PROT_READ | libc::PROT_WRITE
    };
    // SAFETY: the caller passes a page-aligned range inside the mapping.
    if unsafe { libc::mprotect(ptr.cast(), len, prot) } != 0 {
        return Err(JitError::ArenaReserve(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(unix)]
fn unmap(base: NonNull<u8>, size: usize) {
    // SAFETY: `base`/`size` describe a mapping created by `map`.
    unsafe {
        libc::munmap(base.as_ptr().cast(), size);
    }
}

#[cfg(not(unix))]
fn page_size() -> usize {
    4096
}

#[cfg(not(unix))]
fn map(_size: usize) -> Result<NonNull<u8>> {
    Err(JitError::ArenaReserve(std::io::Error::other(
        "executable memory is only supported on unix targets",
    )))
}

#[cfg(not(unix))]
unsafe fn protect(_ptr: *mut u8, _len: usize, _executable: bool) -> Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unmap(_base: NonNull<u8>, _size: usize) {}

/// Make freshly written code visible to instruction fetch.
#[cfg(target_arch = "aarch64")]
unsafe fn flush_icache(ptr: *mut u8, len: usize) {
    use std::arch::asm;

    let ctr: u64;
    // SAFETY: CTR_EL0 is readable from user space on every supported OS.
    unsafe { asm!("mrs {}, ctr_el0", out(reg) ctr, options(nomem, nostack)) };
    let dline = 4usize << ((ctr >> 16) & 0xf);
    let iline = 4usize << (ctr & 0xf);
    let start = ptr as usize;
    let end = start + len;

    let mut addr = start & !(dline - 1);
    while addr < end {
        // SAFETY: cache maintenance on addresses inside our mapping.
        unsafe { asm!("dc cvau, {}", in(reg) addr, options(nostack)) };
        addr += dline;
    }
    // SAFETY: barrier instructions have no operands.
    unsafe { asm!("dsb ish", options(nostack)) };
    let mut addr = start & !(iline - 1);
    while addr < end {
        // SAFETY: as above.
        unsafe { asm!("ic ivau, {}", in(reg) addr, options(nostack)) };
        addr += iline;
    }
    // SAFETY: barrier instructions have no operands.
    unsafe { asm!("dsb ish", "isb", options(nostack)) };
}

#[cfg(not(target_arch = "aarch64"))]
unsafe fn flush_icache(_ptr: *mut u8, _len: usize) {}
