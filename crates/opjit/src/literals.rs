//! Literal materialization.
//!
//! Generated code reads literals in place from a zval pool, the same way
//! the interpreter reads its constant table. String literals become
//! interned strings: immutable and never counted, so copying them never
//! touches a refcount.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use opjit_bytecode::{Literal, tag};

use crate::layout::{ZendString, Zval, gc, string_alloc_size, type_info};

/// Materialized literal table of one op array.
pub struct LiteralPool {
    zvals: Box<[Zval]>,
    strings: Vec<(NonNull<ZendString>, Layout)>,
}

// SAFETY: the pool exclusively owns its string allocations and never
// mutates them after construction.
unsafe impl Send for LiteralPool {}

impl LiteralPool {
    /// Materialize `literals`.
    pub fn new(literals: &[Literal]) -> Self {
        let mut strings = Vec::new();
        let zvals = literals
            .iter()
            .map(|lit| match lit {
                Literal::Null => Zval::null(),
                Literal::Bool(b) => Zval::bool(*b),
                Literal::Long(v) => Zval::long(*v),
                Literal::Double(d) => Zval::double(*d),
                Literal::String(s) => {
                    let (ptr, layout) = intern(s.as_bytes());
                    strings.push((ptr, layout));
                    Zval::ptr(ptr.as_ptr(), type_info::INTERNED_STRING)
                }
            })
            .collect();
        Self { zvals, strings }
    }

    /// Address of literal `index`.
    #[inline]
    pub fn addr(&self, index: u32) -> usize {
        &self.zvals[index as usize] as *const Zval as usize
    }

    /// Literal `index`.
    #[inline]
    pub fn zval(&self, index: u32) -> &Zval {
        &self.zvals[index as usize]
    }

    /// Base address of the pool.
    pub fn base(&self) -> usize {
        self.zvals.as_ptr() as usize
    }

    /// Number of literals.
    pub fn len(&self) -> usize {
        self.zvals.len()
    }

    /// Pool is empty.
    pub fn is_empty(&self) -> bool {
        self.zvals.is_empty()
    }
}

impl std::fmt::Debug for LiteralPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiteralPool")
            .field("len", &self.zvals.len())
            .field("strings", &self.strings.len())
            .finish()
    }
}

impl Drop for LiteralPool {
    fn drop(&mut self) {
        for (ptr, layout) in self.strings.drain(..) {
            // SAFETY: allocated in `intern` with exactly this layout.
            unsafe { alloc::dealloc(ptr.as_ptr().cast(), layout) };
        }
    }
}

fn intern(bytes: &[u8]) -> (NonNull<ZendString>, Layout) {
    let size = string_alloc_size(bytes.len());
    let layout = match Layout::from_size_align(size, 8) {
        Ok(layout) => layout,
        Err(_) => panic!("literal of {} bytes exceeds the address space", bytes.len()),
    };
    // SAFETY: layout has a non-zero size (the header alone is 24 bytes).
    let raw = unsafe { alloc::alloc_zeroed(layout) }.cast::<ZendString>();
    let Some(ptr) = NonNull::new(raw) else {
        alloc::handle_alloc_error(layout);
    };
    // SAFETY: `raw` points to `size` zeroed bytes, enough for the header,
    // the payload and its terminating NUL.
    unsafe {
        let s = ptr.as_ptr();
        (*s).gc.refcount = 1;
        (*s).gc.type_info = u32::from(tag::STRING) | gc::IMMUTABLE;
        (*s).len = bytes.len();
        let val = std::ptr::addr_of_mut!((*s).val).cast::<u8>();
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), val, bytes.len());
    }
    (ptr, layout)
}
