//! In-process stand-in for the host runtime.
//!
//! Owns the process-wide slots, a VM stack, counted strings, hash arrays
//! and an implementation of every runtime helper, so compiled bodies can
//! be run and their effects inspected from tests.

#![allow(dead_code)]

use std::alloc::{Layout, alloc, dealloc};
use std::cell::{Cell, RefCell};
use std::ptr::{self, NonNull};
use std::slice;

use opjit::layout::{
    Bucket, ClassEntry, CommonFunction, ExecuteData, FRAME_SLOT, ObjectHandlers, OpcodeHandler,
    UserFunction, ZendArray, ZendObject, ZendRefcounted, ZendReference, ZendString, Zval,
    call_info, func_kind, gc, hash_flags, status, string_alloc_size, type_info, var_offset,
};
use opjit::{
    CompiledFunction, HelperKind, JitCompiler, JitOptions, OptLevel, RuntimeContext,
    RuntimeHelpers,
};
use opjit_bytecode::{Instruction, OpArray, Opcode, SsaFacts, tag};

/// VM stack size in zval slots.
const STACK_SLOTS: usize = 16 * 1024;

/// Something a helper reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Diag {
    UndefinedCv(u32),
    UndefinedOffset(i64),
    UndefinedIndex(String),
    IllegalOffset,
    StringOffset(i64),
    DivByZero,
    ScalarAsArray,
    InvalidContainerRead(u8),
    Deprecated,
    Autovivify,
    PropertyOfNonObject,
    UndefinedProperty(String),
    /// An object's destructor ran
    Destructed,
    /// A constructor threw and its object was marked as never constructed
    CtorFailed,
    Thrown(&'static str),
    ArgVerified(u32),
    ExceptionDispatched,
    /// A helper the mock does not model was called
    Unexpected(&'static str),
}

/// Process-wide slots whose addresses generated code embeds.
#[repr(C)]
pub struct Globals {
    pub exception: *mut ZendObject,
    pub opline_before_exception: *const Instruction,
    pub current_execute_data: *mut ExecuteData,
    pub scope: *mut ClassEntry,
    pub vm_stack_top: *mut u8,
    pub vm_stack_end: *mut u8,
    pub uninitialized: Zval,
    pub error: Zval,
    pub empty_string: *mut ZendString,
    pub precision: i64,
    pub exception_op: Instruction,
}

thread_local! {
    static CURRENT: Cell<*mut Globals> = const { Cell::new(ptr::null_mut()) };
    static DIAGS: RefCell<Vec<Diag>> = const { RefCell::new(Vec::new()) };
    static REALLOCS: Cell<usize> = const { Cell::new(0) };
    static PROPERTY_READS: Cell<usize> = const { Cell::new(0) };
}

/// Object handle of an object whose constructor failed.
const CTOR_FAILED: u32 = u32::MAX;

fn globals() -> *mut Globals {
    let g = CURRENT.with(Cell::get);
    assert!(!g.is_null(), "no mock runtime on this thread");
    g
}

fn report(diag: Diag) {
    DIAGS.with(|d| d.borrow_mut().push(diag));
}

/// Raise an exception from a helper or a native function.
pub fn throw(message: &'static str) {
    report(Diag::Thrown(message));
    // SAFETY: the globals outlive every test thread that created them.
    unsafe { (*globals()).exception = NonNull::<ZendObject>::dangling().as_ptr() };
}

/// Drop the pending exception, as a matching `CATCH` does.
pub fn clear_exception() {
    // SAFETY: the globals outlive every test thread that created them.
    unsafe { (*globals()).exception = ptr::null_mut() };
}

/// Raise an exception from an interpreter handler: records the raising
/// opline and moves the frame onto the exception opline, as the host's
/// handlers do.
///
/// # Safety
///
/// `ex` must be a live frame and `opline` its current instruction.
pub unsafe fn throw_from_handler(ex: *mut ExecuteData, opline: *const Instruction, message: &'static str) {
    throw(message);
    // SAFETY: forwarded to the caller.
    unsafe {
        let g = globals();
        (*g).opline_before_exception = opline;
        (*ex).opline = &raw const (*g).exception_op;
    }
}

/// Open an argument-less call frame from an interpreter handler, the way
/// `NEW` opens the frame of a constructor: `this` with `flags` in its call
/// info, linked as the innermost open call of `ex`.
///
/// # Safety
///
/// `ex` must be the live frame running the handler.
pub unsafe fn open_call(ex: *mut ExecuteData, func: *mut CommonFunction, this: Zval, flags: u32) -> *mut ExecuteData {
    // SAFETY: forwarded to the caller; bounds checked against the stack end.
    unsafe {
        let g = globals();
        let size = FRAME_SLOT as usize * size_of::<Zval>();
        let frame = (*g).vm_stack_top;
        assert!(frame.add(size) <= (*g).vm_stack_end, "mock VM stack exhausted");
        ptr::write_bytes(frame, 0, size);
        (*g).vm_stack_top = frame.add(size);
        let call = frame.cast::<ExecuteData>();
        (*call).func = func;
        (*call).this = Zval::with(this.value, this.type_info | flags);
        (*call).prev_execute_data = (*ex).call;
        (*ex).call = call;
        call
    }
}

/// Strings grown in place since the runtime was created.
pub fn string_reallocs() -> usize {
    REALLOCS.with(Cell::get)
}

/// Calls of the `read_property` handler since the runtime was created.
pub fn property_reads() -> usize {
    PROPERTY_READS.with(Cell::get)
}

/// Result of running a status-returning body.
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub status: i32,
    pub ret: Zval,
    pub frame: *mut ExecuteData,
}

/// The mock runtime of the current test thread.
pub struct MockRuntime {
    g: *mut Globals,
}

impl MockRuntime {
    pub fn new() -> Self {
        let stack: &'static mut [Zval] = Vec::leak(vec![Zval::UNDEF; STACK_SLOTS]);
        let base = stack.as_mut_ptr().cast::<u8>();
        let g = Box::into_raw(Box::new(Globals {
            exception: ptr::null_mut(),
            opline_before_exception: ptr::null(),
            current_execute_data: ptr::null_mut(),
            scope: ptr::null_mut(),
            vm_stack_top: base,
            // SAFETY: one past the end of the leaked stack.
            vm_stack_end: unsafe { base.add(STACK_SLOTS * size_of::<Zval>()) },
            uninitialized: Zval::null(),
            error: Zval::UNDEF,
            empty_string: intern_str(""),
            precision: 14,
            exception_op: Instruction::new(Opcode::HandleException),
        }));
        CURRENT.with(|c| c.set(g));
        DIAGS.with(|d| d.borrow_mut().clear());
        REALLOCS.with(|c| c.set(0));
        PROPERTY_READS.with(|c| c.set(0));
        Self { g }
    }

    pub fn globals(&self) -> &mut Globals {
        // SAFETY: leaked in `new`, only touched from this thread.
        unsafe { &mut *self.g }
    }

    pub fn context(&self) -> RuntimeContext {
        let g = self.g;
        // SAFETY: field addresses of a live allocation.
        unsafe {
            RuntimeContext {
                exception: (&raw mut (*g).exception) as usize,
                exception_op: (&raw mut (*g).exception_op) as usize,
                opline_before_exception: (&raw mut (*g).opline_before_exception) as usize,
                current_execute_data: (&raw mut (*g).current_execute_data) as usize,
                scope: (&raw mut (*g).scope) as usize,
                vm_stack_top: (&raw mut (*g).vm_stack_top) as usize,
                vm_stack_end: (&raw mut (*g).vm_stack_end) as usize,
                uninitialized_zval: (&raw mut (*g).uninitialized) as usize,
                error_zval: (&raw mut (*g).error) as usize,
                empty_string: (*g).empty_string as usize,
                precision: (&raw mut (*g).precision) as usize,
                exception_handler: handle_exception as usize,
                std_object_handlers: None,
                helpers: helpers(),
            }
        }
    }

    pub fn compiler(&self) -> JitCompiler {
        let options = JitOptions {
            opt_level: OptLevel::Speed,
            verify: true,
            arena_size: 1 << 20,
        };
        JitCompiler::new(options, self.context()).expect("host ISA and arena")
    }

    /// Compile `op_array` with freshly created compiler state.
    pub fn compile(&self, op_array: &OpArray, facts: &SsaFacts) -> (JitCompiler, CompiledFunction) {
        let mut jit = self.compiler();
        let compiled = jit.compile(op_array, facts).expect("function compiles");
        (jit, compiled)
    }

    /// Push a top-level frame for `op_array` with `args` in its first slots.
    pub fn push_frame(&self, op_array: &OpArray, args: &[Zval], ret: *mut Zval) -> *mut ExecuteData {
        let g = self.globals();
        let slots = op_array.frame_size().max(args.len() as u32);
        let size = (FRAME_SLOT + slots) as usize * size_of::<Zval>();
        let frame = g.vm_stack_top;
        // SAFETY: bounds checked against the end of the stack page.
        unsafe {
            assert!(frame.add(size) <= g.vm_stack_end, "mock VM stack exhausted");
            ptr::write_bytes(frame, 0, size);
            g.vm_stack_top = frame.add(size);
            let ex = frame.cast::<ExecuteData>();
            (*ex).opline = op_array.opline_addr(0) as *const Instruction;
            (*ex).return_value = ret;
            (*ex).func = user_function(op_array).cast::<CommonFunction>();
            (*ex).this = Zval::with(0, call_info::TOP);
            (*ex).this.u2 = args.len() as u32;
            (*ex).prev_execute_data = g.current_execute_data;
            (*ex).run_time_cache = Vec::leak(vec![0usize; op_array.cache_size as usize / 8 + 1])
                .as_mut_ptr();
            for (i, arg) in args.iter().enumerate() {
                *frame.add(var_offset(i as u32) as usize).cast::<Zval>() = *arg;
            }
            g.current_execute_data = ex;
            ex
        }
    }

    fn pop_frame(&self, ex: *mut ExecuteData) {
        let g = self.globals();
        g.vm_stack_top = ex.cast::<u8>();
        // SAFETY: `ex` was pushed by `push_frame`.
        g.current_execute_data = unsafe { (*ex).prev_execute_data };
    }

    /// Run a status-returning body from its first instruction.
    pub fn run(&self, compiled: &CompiledFunction, op_array: &OpArray, args: &[Zval]) -> Outcome {
        assert!(compiled.is_handler());
        let ret = Box::into_raw(Box::new(Zval::UNDEF));
        let ex = self.push_frame(op_array, args, ret);
        // SAFETY: `entry` is a status body emitted for `op_array`.
        unsafe {
            let entry = std::mem::transmute::<usize, OpcodeHandler>(compiled.entry);
            let status = entry(ex, op_array.opline_addr(0) as *const Instruction);
            let out = Outcome {
                status,
                ret: *ret,
                frame: ex,
            };
            drop(Box::from_raw(ret));
            out
        }
    }

    /// Run a clone returning a long.
    pub fn run_long(&self, compiled: &CompiledFunction, op_array: &OpArray, args: &[Zval]) -> i64 {
        let ex = self.push_frame(op_array, args, ptr::null_mut());
        // SAFETY: `entry` is a long-returning clone.
        let v = unsafe {
            let entry =
                std::mem::transmute::<usize, unsafe extern "C" fn(*mut ExecuteData) -> i64>(
                    compiled.entry,
                );
            entry(ex)
        };
        self.pop_frame(ex);
        v
    }

    /// Run a clone returning a double.
    pub fn run_double(&self, compiled: &CompiledFunction, op_array: &OpArray, args: &[Zval]) -> f64 {
        let ex = self.push_frame(op_array, args, ptr::null_mut());
        // SAFETY: `entry` is a double-returning clone.
        let v = unsafe {
            let entry =
                std::mem::transmute::<usize, unsafe extern "C" fn(*mut ExecuteData) -> f64>(
                    compiled.entry,
                );
            entry(ex)
        };
        self.pop_frame(ex);
        v
    }

    pub fn exception_pending(&self) -> bool {
        !self.globals().exception.is_null()
    }

    pub fn clear_exception(&self) {
        self.globals().exception = ptr::null_mut();
    }

    pub fn diags(&self) -> Vec<Diag> {
        DIAGS.with(|d| d.borrow().clone())
    }

    /// Diagnostics other than calls into unmodelled helpers.
    pub fn assert_modelled(&self) {
        let unexpected: Vec<Diag> = self
            .diags()
            .into_iter()
            .filter(|d| matches!(d, Diag::Unexpected(_)))
            .collect();
        assert!(unexpected.is_empty(), "unmodelled helpers called: {unexpected:?}");
    }

    // ---- values ----

    /// Counted string, reference count 1.
    pub fn string(&self, s: &str) -> Zval {
        Zval::ptr(new_str(s.as_bytes()), type_info::STRING)
    }

    /// Hash array with integer keys, reference count 1. Values are moved in.
    pub fn array(&self, entries: &[(i64, Zval)]) -> Zval {
        let arr = new_array();
        for &(h, value) in entries {
            // SAFETY: `arr` is a fresh array.
            unsafe { push_bucket(arr, Bucket { val: value, h: h as u64, key: ptr::null_mut() }) };
        }
        Zval::ptr(arr, type_info::ARRAY)
    }

    /// Hash array with string keys, reference count 1.
    pub fn hash(&self, entries: &[(&str, Zval)]) -> Zval {
        let arr = new_array();
        for &(key, value) in entries {
            // SAFETY: `arr` is a fresh array; the bucket owns the new key.
            unsafe { push_bucket(arr, Bucket { val: value, h: 0, key: new_str(key.as_bytes()) }) };
        }
        Zval::ptr(arr, type_info::ARRAY)
    }

    /// Packed array `0 => values[0], ...`, reference count 1.
    pub fn packed(&self, values: &[Zval]) -> Zval {
        let arr = new_array();
        // SAFETY: `arr` is a fresh array; keys follow positions.
        unsafe {
            (*arr).flags |= hash_flags::PACKED;
            for (i, &value) in values.iter().enumerate() {
                push_bucket(arr, Bucket { val: value, h: i as u64, key: ptr::null_mut() });
            }
        }
        Zval::ptr(arr, type_info::ARRAY)
    }

    /// Reference cell holding `value`, reference count 1.
    pub fn reference(&self, value: Zval) -> Zval {
        let cell = Box::into_raw(Box::new(ZendReference {
            gc: ZendRefcounted {
                refcount: 1,
                type_info: u32::from(tag::REFERENCE),
            },
            val: value,
            sources: 0,
        }));
        Zval::ptr(cell, type_info::REFERENCE)
    }

    /// Object of `class` with its declared properties set to `declared`,
    /// reference count 1.
    pub fn object(&self, class: *mut ClassEntry, declared: &[Zval]) -> Zval {
        // SAFETY: `class` came from `class`; the allocation is sized for
        // its declared properties and every field is written below.
        unsafe {
            let count = (*class.cast::<MockClass>()).declared.len();
            assert_eq!(count, declared.len(), "one value per declared property");
            let obj = alloc(object_layout(count)).cast::<ZendObject>();
            assert!(!obj.is_null(), "out of memory");
            (*obj).gc = ZendRefcounted {
                refcount: 1,
                type_info: u32::from(tag::OBJECT),
            };
            (*obj).handle = 1;
            (*obj).ce = class;
            (*obj).handlers = &raw const HANDLERS;
            (*obj).properties = ptr::null_mut();
            for (i, value) in declared.iter().enumerate() {
                property_slot(obj, i).write(*value);
            }
            Zval::ptr(obj, type_info::OBJECT)
        }
    }
}

/// A class of mock objects.
#[repr(C)]
pub struct MockClass {
    pub ce: ClassEntry,
    /// Names of the declared property slots
    pub declared: Vec<&'static str>,
    /// The destructor throws
    pub throwing_destructor: bool,
}

/// Leak a class with `declared` property slots.
pub fn class(declared: &[&'static str], throwing_destructor: bool) -> *mut ClassEntry {
    let class = Box::into_raw(Box::new(MockClass {
        ce: ClassEntry {
            kind: 0,
            name: ptr::null_mut(),
            parent: ptr::null_mut(),
            default_properties_count: declared.len() as u32,
            ce_flags: 0,
        },
        declared: declared.to_vec(),
        throwing_destructor,
    }));
    class.cast::<ClassEntry>()
}

// ---- inspection ----

pub fn str_of(z: &Zval) -> String {
    assert_eq!(z.type_tag(), tag::STRING, "not a string: {z:?}");
    // SAFETY: string zvals point at a live string.
    unsafe { String::from_utf8_lossy(str_bytes(z.as_ptr())).into_owned() }
}

pub fn refcount(z: &Zval) -> u32 {
    assert!(z.is_refcounted(), "not counted: {z:?}");
    // SAFETY: counted zvals point at a live header.
    unsafe { (*z.as_ptr::<ZendRefcounted>()).refcount }
}

pub fn array_len(z: &Zval) -> u32 {
    assert_eq!(z.type_tag(), tag::ARRAY, "not an array: {z:?}");
    // SAFETY: array zvals point at a live array.
    unsafe { (*z.as_ptr::<ZendArray>()).count }
}

pub fn array_get(z: &Zval, h: i64) -> Option<Zval> {
    assert_eq!(z.type_tag(), tag::ARRAY, "not an array: {z:?}");
    // SAFETY: array zvals point at a live array.
    unsafe {
        let found = hash_index_find(z.as_ptr(), h);
        (!found.is_null()).then(|| *found)
    }
}

pub fn array_get_str(z: &Zval, key: &str) -> Option<Zval> {
    assert_eq!(z.type_tag(), tag::ARRAY, "not an array: {z:?}");
    // SAFETY: array zvals point at a live array.
    unsafe {
        buckets(z.as_ptr())
            .iter()
            .find(|b| !b.key.is_null() && str_bytes(b.key) == key.as_bytes())
            .map(|b| b.val)
    }
}

/// Value a reference cell points to.
pub fn deref(z: &Zval) -> Zval {
    assert_eq!(z.type_tag(), tag::REFERENCE, "not a reference: {z:?}");
    // SAFETY: reference zvals point at a live cell.
    unsafe { (*z.as_ptr::<ZendReference>()).val }
}

/// Declared property `name` of a mock object.
pub fn property(z: &Zval, name: &str) -> Option<Zval> {
    assert_eq!(z.type_tag(), tag::OBJECT, "not an object: {z:?}");
    let obj = z.as_ptr::<ZendObject>();
    // SAFETY: object zvals point at a live mock object.
    unsafe {
        if let Some(i) = (*(*obj).ce.cast::<MockClass>()).declared.iter().position(|d| *d == name) {
            return Some(*property_slot(obj, i));
        }
        let props = (*obj).properties;
        if props.is_null() {
            return None;
        }
        array_get_str(&Zval::ptr(props, type_info::ARRAY), name)
    }
}

/// The frame the runtime currently considers executing.
pub fn current_frame() -> *mut ExecuteData {
    // SAFETY: the globals of this thread's mock runtime.
    unsafe { (*globals()).current_execute_data }
}

/// Value of frame slot `slot` of a frame still on the mock stack.
pub fn slot(frame: *mut ExecuteData, slot: u32) -> Zval {
    // SAFETY: the caller passes a frame pushed by `push_frame`.
    unsafe { *frame.cast::<u8>().add(var_offset(slot) as usize).cast::<Zval>() }
}

/// Take one more reference, for a test that inspects a value after
/// handing it to a frame.
pub fn addref(z: &Zval) {
    // SAFETY: counted zvals point at a live header.
    unsafe { addref_zval(z) }
}

/// Drop one reference held by a test.
pub fn release(z: Zval) {
    // SAFETY: counted zvals point at a live header.
    unsafe { release_zval(&z) }
}

// ---- strings ----

fn string_layout(len: usize) -> Layout {
    Layout::from_size_align(string_alloc_size(len), 8).expect("string layout")
}

fn alloc_str(len: usize) -> *mut ZendString {
    // SAFETY: non-zero size; header fields written before use.
    unsafe {
        let s = alloc(string_layout(len)).cast::<ZendString>();
        assert!(!s.is_null(), "out of memory");
        (*s).gc = ZendRefcounted {
            refcount: 1,
            type_info: u32::from(tag::STRING),
        };
        (*s).h = 0;
        (*s).len = len;
        s
    }
}

fn new_str(bytes: &[u8]) -> *mut ZendString {
    let s = alloc_str(bytes.len());
    // SAFETY: the allocation holds `len + 1` bytes past the header.
    unsafe {
        let val = (&raw mut (*s).val).cast::<u8>();
        ptr::copy_nonoverlapping(bytes.as_ptr(), val, bytes.len());
        *val.add(bytes.len()) = 0;
    }
    s
}

fn intern_str(text: &str) -> *mut ZendString {
    let s = new_str(text.as_bytes());
    // SAFETY: fresh string.
    unsafe { (*s).gc.type_info |= gc::IMMUTABLE };
    s
}

unsafe fn str_bytes<'a>(s: *const ZendString) -> &'a [u8] {
    // SAFETY: forwarded to the caller.
    unsafe { slice::from_raw_parts((&raw const (*s).val).cast::<u8>(), (*s).len) }
}

unsafe fn free_str(s: *mut ZendString) {
    // SAFETY: `s` came from `alloc_str`.
    unsafe { dealloc(s.cast::<u8>(), string_layout((*s).len)) }
}

// ---- arrays ----

fn new_array() -> *mut ZendArray {
    Box::into_raw(Box::new(ZendArray {
        gc: ZendRefcounted {
            refcount: 1,
            type_info: u32::from(tag::ARRAY),
        },
        flags: 0,
        table_mask: 0,
        data: ptr::null_mut(),
        used: 0,
        count: 0,
        size: 0,
        internal_pointer: 0,
        next_free_element: 0,
        destructor: 0,
    }))
}

unsafe fn buckets<'a>(arr: *mut ZendArray) -> &'a mut [Bucket] {
    // SAFETY: `data` holds `used` initialized buckets.
    unsafe {
        if (*arr).data.is_null() {
            return &mut [];
        }
        slice::from_raw_parts_mut((*arr).data, (*arr).used as usize)
    }
}

unsafe fn push_bucket(arr: *mut ZendArray, bucket: Bucket) -> *mut Zval {
    // SAFETY: `arr` is a live mock array.
    unsafe {
        let a = &mut *arr;
        if a.flags & hash_flags::PACKED != 0 && (!bucket.key.is_null() || bucket.h != u64::from(a.used)) {
            a.flags &= !hash_flags::PACKED;
        }
        if a.used == a.size {
            let mut grown: Vec<Bucket> = Vec::with_capacity((a.size as usize * 2).max(8));
            if !a.data.is_null() {
                grown.extend_from_slice(slice::from_raw_parts(a.data, a.used as usize));
                drop(Vec::from_raw_parts(a.data, 0, a.size as usize));
            }
            a.size = grown.capacity() as u32;
            a.data = grown.as_mut_ptr();
            std::mem::forget(grown);
        }
        let slot = a.data.add(a.used as usize);
        slot.write(bucket);
        a.used += 1;
        a.count += 1;
        if bucket.key.is_null() {
            let h = bucket.h as i64;
            if h >= a.next_free_element {
                a.next_free_element = h.saturating_add(1);
            }
        }
        &raw mut (*slot).val
    }
}

unsafe fn free_array(arr: *mut ZendArray) {
    // SAFETY: the last reference is gone.
    unsafe {
        for bucket in buckets(arr) {
            release_zval(&bucket.val);
            if !bucket.key.is_null() {
                release_str_ptr(bucket.key);
            }
        }
        let a = Box::from_raw(arr);
        if !a.data.is_null() {
            drop(Vec::from_raw_parts(a.data, 0, a.size as usize));
        }
    }
}

unsafe fn addref_zval(z: &Zval) {
    if z.is_refcounted() {
        // SAFETY: counted payload.
        unsafe { (*z.as_ptr::<ZendRefcounted>()).refcount += 1 };
    }
}

unsafe fn release_zval(z: &Zval) {
    if !z.is_refcounted() {
        return;
    }
    // SAFETY: counted payload.
    unsafe {
        let counted = z.as_ptr::<ZendRefcounted>();
        (*counted).refcount -= 1;
        if (*counted).refcount == 0 {
            rc_dtor(counted);
        }
    }
}

unsafe fn release_str_ptr(s: *mut ZendString) {
    // SAFETY: live string.
    unsafe {
        if (*s).gc.type_info & gc::IMMUTABLE != 0 {
            return;
        }
        (*s).gc.refcount -= 1;
        if (*s).gc.refcount == 0 {
            free_str(s);
        }
    }
}

/// Leak a function record for `op_array`.
pub fn user_function(op_array: &OpArray) -> *mut UserFunction {
    Box::into_raw(Box::new(UserFunction {
        common: CommonFunction {
            kind: func_kind::USER,
            fn_flags: 0,
            function_name: ptr::null_mut(),
            scope: ptr::null_mut(),
            prototype: ptr::null_mut(),
            num_args: op_array.num_args,
            required_num_args: op_array.required_num_args,
            quick_arg_flags: 0,
        },
        last_var: op_array.last_var,
        temporaries: op_array.temporaries,
        opcodes: op_array.instructions.as_ptr(),
        run_time_cache: ptr::null_mut(),
        cache_size: op_array.cache_size,
        literals: ptr::null(),
    }))
}

// ---- objects ----

fn object_layout(declared: usize) -> Layout {
    let size = std::mem::offset_of!(ZendObject, properties_table) + declared.max(1) * size_of::<Zval>();
    Layout::from_size_align(size, 8).expect("object layout")
}

unsafe fn property_slot(obj: *mut ZendObject, i: usize) -> *mut Zval {
    // SAFETY: `i` is below the class's declared property count.
    unsafe { (&raw mut (*obj).properties_table).cast::<Zval>().add(i) }
}

unsafe fn member_name<'a>(member: *mut Zval) -> &'a [u8] {
    // SAFETY: property names are string zvals.
    unsafe { str_bytes((*member).as_ptr()) }
}

/// Declared slot of `name`, filling the inline cache at `cache_slot`.
unsafe fn declared_property(obj: *mut ZendObject, name: &[u8], cache_slot: *mut usize) -> Option<*mut Zval> {
    // SAFETY: live mock object; the cache slot holds two words.
    unsafe {
        let class = &*(*obj).ce.cast::<MockClass>();
        let i = class.declared.iter().position(|d| d.as_bytes() == name)?;
        let slot = property_slot(obj, i);
        if !cache_slot.is_null() {
            *cache_slot = (*obj).ce as usize;
            *cache_slot.add(1) = slot as usize - obj as usize;
        }
        Some(slot)
    }
}

unsafe fn dynamic_property(obj: *mut ZendObject, name: &[u8]) -> Option<*mut Zval> {
    // SAFETY: live mock object.
    unsafe {
        let props = (*obj).properties;
        if props.is_null() {
            return None;
        }
        buckets(props)
            .iter_mut()
            .find(|b| !b.key.is_null() && str_bytes(b.key) == name)
            .map(|b| &raw mut b.val)
    }
}

unsafe extern "C" fn read_property(
    obj: *mut ZendObject,
    member: *mut Zval,
    _kind: i32,
    cache_slot: *mut usize,
    _rv: *mut Zval,
) -> *mut Zval {
    PROPERTY_READS.with(|c| c.set(c.get() + 1));
    // SAFETY: called by generated code on a live mock object.
    unsafe {
        let name = member_name(member);
        let found = declared_property(obj, name, cache_slot).or_else(|| dynamic_property(obj, name));
        match found {
            Some(slot) if (*slot).type_tag() != tag::UNDEF => slot,
            _ => {
                report(Diag::UndefinedProperty(String::from_utf8_lossy(name).into_owned()));
                &raw mut (*globals()).uninitialized
            }
        }
    }
}

unsafe extern "C" fn write_property(
    obj: *mut ZendObject,
    member: *mut Zval,
    value: *mut Zval,
    cache_slot: *mut usize,
) -> *mut Zval {
    // SAFETY: called by generated code on a live mock object.
    unsafe {
        let name = member_name(member);
        let v = *value;
        addref_zval(&v);
        if let Some(slot) = declared_property(obj, name, cache_slot).or_else(|| dynamic_property(obj, name)) {
            let old = *slot;
            *slot = v;
            release_zval(&old);
            return slot;
        }
        if (*obj).properties.is_null() {
            (*obj).properties = new_array();
        }
        push_bucket((*obj).properties, Bucket { val: v, h: 0, key: new_str(name) })
    }
}

unsafe extern "C" fn has_property(
    obj: *mut ZendObject,
    member: *mut Zval,
    check_empty: i32,
    cache_slot: *mut usize,
) -> i32 {
    // SAFETY: called by generated code on a live mock object.
    unsafe {
        let name = member_name(member);
        match declared_property(obj, name, cache_slot).or_else(|| dynamic_property(obj, name)) {
            Some(slot) if check_empty != 0 => is_true(slot),
            Some(slot) => i32::from(!matches!((*slot).type_tag(), tag::UNDEF | tag::NULL)),
            None => 0,
        }
    }
}

unsafe extern "C" fn read_dimension(_o: *mut ZendObject, _d: *mut Zval, _k: i32, rv: *mut Zval) -> *mut Zval {
    report(Diag::Unexpected("read_dimension"));
    // SAFETY: the caller's result slot.
    unsafe { *rv = Zval::null() };
    rv
}

unsafe extern "C" fn write_dimension(_o: *mut ZendObject, _d: *mut Zval, _v: *mut Zval) {
    report(Diag::Unexpected("write_dimension"));
}

unsafe extern "C" fn has_dimension(_o: *mut ZendObject, _d: *mut Zval, _e: i32) -> i32 {
    report(Diag::Unexpected("has_dimension"));
    0
}

static HANDLERS: ObjectHandlers = ObjectHandlers {
    read_property,
    write_property,
    read_dimension,
    write_dimension,
    has_property,
    has_dimension,
    get: None,
    set: None,
};

unsafe fn free_object(obj: *mut ZendObject) {
    // SAFETY: the last reference is gone.
    unsafe {
        let class = &*(*obj).ce.cast::<MockClass>();
        if (*obj).handle != CTOR_FAILED {
            report(Diag::Destructed);
            if class.throwing_destructor {
                throw("destructor");
            }
        }
        for i in 0..class.declared.len() {
            release_zval(&*property_slot(obj, i));
        }
        if !(*obj).properties.is_null() {
            free_array((*obj).properties);
        }
        dealloc(obj.cast::<u8>(), object_layout(class.declared.len()));
    }
}

// ---- helpers ----

extern "C" fn handle_exception(_ex: *mut ExecuteData, _opline: *const Instruction) -> i32 {
    report(Diag::ExceptionDispatched);
    status::LEAVE
}

macro_rules! unmodelled {
    ($($name:ident($($arg:ident: $ty:ty),*) $(-> $ret:ty = $default:expr)?;)*) => {
        $(
            extern "C" fn $name($($arg: $ty),*) $(-> $ret)? {
                $(let _ = $arg;)*
                report(Diag::Unexpected(stringify!($name)));
                $($default)?
            }
        )*
    };
}

unmodelled! {
    create_default_object(c: usize);
    abstract_call(f: usize);
    invalid_this();
    sl(r: usize, a: usize, b: usize);
    sr(r: usize, a: usize, b: usize);
    bw_or(r: usize, a: usize, b: usize);
    bw_and(r: usize, a: usize, b: usize);
    bw_xor(r: usize, a: usize, b: usize);
    pow(r: usize, a: usize, b: usize);
    bw_not(r: usize, a: usize);
    is_identical(a: usize, b: usize) -> i32 = 0;
    increment(v: usize);
    decrement(v: usize);
    strlen_slow(r: usize, v: usize);
    fetch_dim_r_slow(r: usize, c: usize, d: usize);
    fetch_dim_is_slow(r: usize, c: usize, d: usize);
    fetch_dim_w_slow(r: usize, c: usize, d: usize, k: i32);
    isset_dim_slow(c: usize, d: usize, e: i32) -> i32 = 0;
    assign_dim_slow(c: usize, d: usize, v: usize, r: usize);
    assign_to_string_offset(c: usize, d: usize, v: usize, r: usize);
    fetch_obj_slow(r: usize, c: usize, m: usize, s: usize, k: i32);
    init_fcall_by_name(ex: usize, n: usize, s: usize, c: i32) -> usize = 0;
    init_method_call(ex: usize, o: usize, n: usize, s: usize, c: i32) -> usize = 0;
    copy_extra_args(call: usize);
    init_func_execute_data(call: usize, r: usize);
    execute_ex(call: usize);
    create_generator(call: usize, r: usize);
    do_fcall_generic(ex: usize, call: usize, r: usize);
    symtable_clean_cache(ex: usize);
    free_extra_args(ex: usize);
}

extern "C" fn rc_dtor(counted: *mut ZendRefcounted) {
    // SAFETY: the generated code hands over a payload whose count hit zero.
    unsafe {
        match ((*counted).type_info & gc::TYPE_MASK) as u8 {
            tag::STRING => free_str(counted.cast()),
            tag::ARRAY => free_array(counted.cast()),
            tag::OBJECT => free_object(counted.cast()),
            tag::REFERENCE => {
                let r = Box::from_raw(counted.cast::<ZendReference>());
                release_zval(&r.val);
            }
            _ => report(Diag::Unexpected("rc_dtor")),
        }
    }
}

extern "C" fn object_store_ctor_failed(obj: *mut ZendObject) {
    report(Diag::CtorFailed);
    // SAFETY: the object whose constructor threw.
    unsafe { (*obj).handle = CTOR_FAILED };
}

extern "C" fn gc_possible_root(_counted: *mut ZendRefcounted) {}

extern "C" fn array_dup(src: *mut ZendArray) -> *mut ZendArray {
    let arr = new_array();
    // SAFETY: `src` is a live array.
    unsafe {
        (*arr).flags = (*src).flags;
        for bucket in buckets(src) {
            addref_zval(&bucket.val);
            if !bucket.key.is_null() && (*bucket.key).gc.type_info & gc::IMMUTABLE == 0 {
                (*bucket.key).gc.refcount += 1;
            }
            push_bucket(arr, *bucket);
        }
        (*arr).next_free_element = (*src).next_free_element;
    }
    arr
}

extern "C" fn undefined_cv(_ex: *mut ExecuteData, slot: i32) {
    report(Diag::UndefinedCv(slot as u32));
}

extern "C" fn undefined_offset(h: i64) {
    report(Diag::UndefinedOffset(h));
}

extern "C" fn undefined_index(key: *mut ZendString) {
    // SAFETY: live key string.
    let key = unsafe { String::from_utf8_lossy(str_bytes(key)).into_owned() };
    report(Diag::UndefinedIndex(key));
}

extern "C" fn illegal_offset() {
    report(Diag::IllegalOffset);
}

extern "C" fn string_offset_notice(offset: i64) {
    report(Diag::StringOffset(offset));
}

extern "C" fn div_by_zero_warning() {
    report(Diag::DivByZero);
}

extern "C" fn scalar_as_array() {
    report(Diag::ScalarAsArray);
}

extern "C" fn invalid_container_read(container: *mut Zval) {
    // SAFETY: live zval.
    report(Diag::InvalidContainerRead(unsafe { (*container).type_tag() }));
}

extern "C" fn deprecated_call(_func: *mut CommonFunction) {
    report(Diag::Deprecated);
}

extern "C" fn autovivify_notice(_container: *mut Zval) {
    report(Diag::Autovivify);
}

extern "C" fn property_of_non_object(_c: *mut Zval, _m: *mut Zval, _k: i32) {
    report(Diag::PropertyOfNonObject);
}

extern "C" fn throw_mod_by_zero() {
    throw("Modulo by zero");
}

extern "C" fn string_size_overflow() {
    report(Diag::Unexpected("string_size_overflow"));
    std::process::abort();
}

extern "C" fn cannot_pass_by_ref(_arg_num: i32) {
    throw("Cannot pass parameter by reference");
}

extern "C" fn missing_arg_error(_ex: *mut ExecuteData) {
    throw("Too few arguments");
}

/// Numeric value of a long or double operand.
#[derive(Debug, Clone, Copy)]
enum Num {
    Long(i64),
    Double(f64),
}

unsafe fn number(z: *const Zval) -> Option<Num> {
    // SAFETY: live zval.
    let z = unsafe { *z };
    match z.type_tag() {
        tag::LONG => Some(Num::Long(z.lval())),
        tag::DOUBLE => Some(Num::Double(z.dval())),
        tag::NULL | tag::FALSE => Some(Num::Long(0)),
        tag::TRUE => Some(Num::Long(1)),
        _ => None,
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::Long(v) => v as f64,
        Num::Double(d) => d,
    }
}

unsafe fn arith(
    res: *mut Zval,
    a: *const Zval,
    b: *const Zval,
    name: &'static str,
    long: fn(i64, i64) -> Option<i64>,
    double: fn(f64, f64) -> f64,
) {
    // SAFETY: forwarded to the caller.
    unsafe {
        let (Some(x), Some(y)) = (number(a), number(b)) else {
            report(Diag::Unexpected(name));
            *res = Zval::null();
            return;
        };
        *res = match (x, y) {
            (Num::Long(x), Num::Long(y)) => match long(x, y) {
                Some(v) => Zval::long(v),
                None => Zval::double(double(x as f64, y as f64)),
            },
            _ => Zval::double(double(as_f64(x), as_f64(y))),
        };
    }
}

extern "C" fn add(res: *mut Zval, a: *const Zval, b: *const Zval) {
    // SAFETY: operand and result zvals of the calling instruction.
    unsafe { arith(res, a, b, "add", i64::checked_add, |x, y| x + y) }
}

extern "C" fn sub(res: *mut Zval, a: *const Zval, b: *const Zval) {
    // SAFETY: as above.
    unsafe { arith(res, a, b, "sub", i64::checked_sub, |x, y| x - y) }
}

extern "C" fn mul(res: *mut Zval, a: *const Zval, b: *const Zval) {
    // SAFETY: as above.
    unsafe { arith(res, a, b, "mul", i64::checked_mul, |x, y| x * y) }
}

extern "C" fn div(res: *mut Zval, a: *const Zval, b: *const Zval) {
    // SAFETY: as above.
    unsafe {
        if matches!(number(b), Some(n) if as_f64(n) == 0.0) {
            report(Diag::DivByZero);
        }
        arith(
            res,
            a,
            b,
            "div",
            |x, y| (y != 0 && x.checked_rem(y) == Some(0)).then(|| x / y),
            |x, y| x / y,
        )
    }
}

extern "C" fn modulo(res: *mut Zval, a: *const Zval, b: *const Zval) {
    // SAFETY: as above.
    unsafe {
        match (number(a), number(b)) {
            (Some(x), Some(y)) => {
                let x = match x {
                    Num::Long(v) => v,
                    Num::Double(d) => d as i64,
                };
                let y = match y {
                    Num::Long(v) => v,
                    Num::Double(d) => d as i64,
                };
                if y == 0 {
                    throw("Modulo by zero");
                    *res = Zval::UNDEF;
                } else {
                    *res = Zval::long(if y == -1 { 0 } else { x % y });
                }
            }
            _ => {
                report(Diag::Unexpected("mod"));
                *res = Zval::null();
            }
        }
    }
}

extern "C" fn concat(res: *mut Zval, a: *const Zval, b: *const Zval) {
    // SAFETY: as above; strings are converted to new references.
    unsafe {
        let x = zval_get_string(a.cast_mut());
        let y = zval_get_string(b.cast_mut());
        let mut bytes = str_bytes(x).to_vec();
        bytes.extend_from_slice(str_bytes(y));
        release_str_ptr(x);
        release_str_ptr(y);
        *res = Zval::ptr(new_str(&bytes), type_info::STRING);
    }
}

extern "C" fn compare(a: *const Zval, b: *const Zval) -> i64 {
    // SAFETY: operand zvals.
    unsafe {
        match (number(a), number(b)) {
            (Some(Num::Long(x)), Some(Num::Long(y))) => x.cmp(&y) as i64,
            (Some(x), Some(y)) => as_f64(x)
                .partial_cmp(&as_f64(y))
                .map_or(1, |o| o as i64),
            _ => {
                report(Diag::Unexpected("compare"));
                0
            }
        }
    }
}

extern "C" fn is_true(z: *const Zval) -> i32 {
    // SAFETY: operand zval.
    unsafe {
        let z = *z;
        i32::from(match z.type_tag() {
            tag::TRUE => true,
            tag::LONG => z.lval() != 0,
            tag::DOUBLE => z.dval() != 0.0,
            tag::STRING => {
                let b = str_bytes(z.as_ptr());
                !(b.is_empty() || b == b"0")
            }
            tag::ARRAY => (*z.as_ptr::<ZendArray>()).count != 0,
            tag::OBJECT => true,
            _ => false,
        })
    }
}

extern "C" fn long_to_str(v: i64) -> *mut ZendString {
    new_str(v.to_string().as_bytes())
}

extern "C" fn double_to_str(d: f64, _precision: i64) -> *mut ZendString {
    let text = if d.is_infinite() {
        if d > 0.0 { "INF".to_owned() } else { "-INF".to_owned() }
    } else if d.is_nan() {
        "NAN".to_owned()
    } else {
        format!("{d}")
    };
    new_str(text.as_bytes())
}

extern "C" fn zval_get_string(z: *mut Zval) -> *mut ZendString {
    // SAFETY: operand zval.
    unsafe {
        let z = *z;
        match z.type_tag() {
            tag::STRING => {
                let s = z.as_ptr::<ZendString>();
                if (*s).gc.type_info & gc::IMMUTABLE == 0 {
                    (*s).gc.refcount += 1;
                }
                s
            }
            tag::LONG => long_to_str(z.lval()),
            tag::DOUBLE => double_to_str(z.dval(), 14),
            tag::TRUE => new_str(b"1"),
            tag::UNDEF | tag::NULL | tag::FALSE => (*globals()).empty_string,
            _ => {
                report(Diag::Unexpected("zval_get_string"));
                (*globals()).empty_string
            }
        }
    }
}

extern "C" fn str_alloc(len: i64) -> *mut ZendString {
    alloc_str(len as usize)
}

extern "C" fn str_realloc(s: *mut ZendString, len: i64) -> *mut ZendString {
    REALLOCS.with(|c| c.set(c.get() + 1));
    let grown = alloc_str(len as usize);
    // SAFETY: `s` is an exclusively owned string.
    unsafe {
        let keep = (*s).len.min(len as usize);
        ptr::copy_nonoverlapping(
            (&raw const (*s).val).cast::<u8>(),
            (&raw mut (*grown).val).cast::<u8>(),
            keep,
        );
        free_str(s);
    }
    grown
}

extern "C" fn str_char(byte: i32) -> *mut ZendString {
    let s = new_str(&[byte as u8]);
    // SAFETY: fresh string.
    unsafe { (*s).gc.type_info |= gc::IMMUTABLE };
    s
}

extern "C" fn memcpy(dst: *mut u8, src: *const u8, len: i64) {
    // SAFETY: ranges computed by the generated code.
    unsafe { ptr::copy_nonoverlapping(src, dst, len as usize) }
}

extern "C" fn handle_numeric_str(s: *mut ZendString, out: *mut i64) -> i32 {
    // SAFETY: live key string.
    let bytes = unsafe { str_bytes(s) };
    let digits = bytes.strip_prefix(b"-").unwrap_or(bytes);
    let canonical = !digits.is_empty()
        && digits.iter().all(u8::is_ascii_digit)
        && (digits == b"0" || digits[0] != b'0')
        && bytes != b"-0";
    if !canonical {
        return 0;
    }
    match std::str::from_utf8(bytes).ok().and_then(|t| t.parse::<i64>().ok()) {
        Some(v) => {
            // SAFETY: the caller's out slot.
            unsafe { *out = v };
            1
        }
        None => 0,
    }
}

extern "C" fn dval_to_lval(d: f64) -> i64 {
    if d.is_finite() && d >= i64::MIN as f64 && d < i64::MAX as f64 {
        d as i64
    } else {
        0
    }
}

extern "C" fn hash_index_find(arr: *mut ZendArray, h: i64) -> *mut Zval {
    // SAFETY: live array.
    unsafe {
        buckets(arr)
            .iter_mut()
            .find(|b| b.key.is_null() && b.h == h as u64 && b.val.type_tag() != tag::UNDEF)
            .map_or(ptr::null_mut(), |b| &raw mut b.val)
    }
}

extern "C" fn hash_find(arr: *mut ZendArray, key: *mut ZendString) -> *mut Zval {
    // SAFETY: live array and key.
    unsafe {
        let wanted = str_bytes(key);
        buckets(arr)
            .iter_mut()
            .find(|b| !b.key.is_null() && str_bytes(b.key) == wanted && b.val.type_tag() != tag::UNDEF)
            .map_or(ptr::null_mut(), |b| &raw mut b.val)
    }
}

extern "C" fn hash_index_add_new(arr: *mut ZendArray, h: i64, value: *const Zval) -> *mut Zval {
    // SAFETY: live array and value.
    unsafe {
        push_bucket(arr, Bucket { val: *value, h: h as u64, key: ptr::null_mut() })
    }
}

extern "C" fn hash_next_index_insert(arr: *mut ZendArray, value: *const Zval) -> *mut Zval {
    // SAFETY: live array and value.
    unsafe {
        let h = (*arr).next_free_element;
        if h == i64::MAX {
            return ptr::null_mut();
        }
        push_bucket(arr, Bucket { val: *value, h: h as u64, key: ptr::null_mut() })
    }
}

extern "C" fn hash_add_new(arr: *mut ZendArray, key: *mut ZendString, value: *const Zval) -> *mut Zval {
    // SAFETY: live array, key and value.
    unsafe {
        if (*key).gc.type_info & gc::IMMUTABLE == 0 {
            (*key).gc.refcount += 1;
        }
        push_bucket(arr, Bucket { val: *value, h: 0, key })
    }
}

extern "C" fn array_init(z: *mut Zval) {
    // SAFETY: destination zval.
    unsafe { *z = Zval::ptr(new_array(), type_info::ARRAY) };
}

extern "C" fn vm_stack_extend(size: i64) -> *mut u8 {
    let page: &'static mut [Zval] = Vec::leak(vec![Zval::UNDEF; (size as usize).div_ceil(16)]);
    page.as_mut_ptr().cast()
}

extern "C" fn vm_stack_free_call_frame(_call: *mut ExecuteData) {}

extern "C" fn free_args(call: *mut ExecuteData) {
    // SAFETY: a finished call frame with `num_args` argument slots.
    unsafe {
        let n = (*call).this.u2;
        for arg in 0..n {
            let z = call.cast::<u8>().add(var_offset(arg) as usize).cast::<Zval>();
            release_zval(&*z);
        }
    }
}

extern "C" fn verify_arg_type(_func: *mut CommonFunction, arg_num: i32, arg: *mut Zval) -> i32 {
    report(Diag::ArgVerified(arg_num as u32));
    // parameters are declared `int` in the mock
    // SAFETY: live argument zval.
    if unsafe { (*arg).type_tag() } == tag::LONG {
        1
    } else {
        throw("TypeError");
        0
    }
}

extern "C" fn verify_internal_arg_types(_func: *mut CommonFunction, _call: *mut ExecuteData) -> i32 {
    1
}

extern "C" fn init_func_run_time_cache(_func: *mut CommonFunction) -> *mut usize {
    Vec::leak(vec![0usize; 64]).as_mut_ptr()
}

extern "C" fn make_ref(z: *mut Zval) -> *mut ZendReference {
    // SAFETY: the variable being boxed.
    unsafe {
        let cell = Box::into_raw(Box::new(ZendReference {
            gc: ZendRefcounted {
                refcount: 1,
                type_info: u32::from(tag::REFERENCE),
            },
            val: *z,
            sources: 0,
        }));
        *z = Zval::ptr(cell, type_info::REFERENCE);
        cell
    }
}

extern "C" fn arg_must_be_by_ref(func: *mut CommonFunction, arg_num: i32) -> i32 {
    // SAFETY: live function.
    let flags = unsafe { (*func).quick_arg_flags };
    i32::from((flags >> ((arg_num - 1) * 2)) & 1 != 0)
}

/// Address table covering every helper kind.
pub fn helpers() -> RuntimeHelpers {
    let mut h = RuntimeHelpers::new();
    macro_rules! set {
        ($($kind:ident => $f:expr,)*) => {
            // SAFETY: each function matches its kind's signature and lives
            // for the whole process.
            $(unsafe { h.set(HelperKind::$kind, $f as usize) };)*
        };
    }
    set! {
        RcDtor => rc_dtor,
        GcPossibleRoot => gc_possible_root,
        ArrayDup => array_dup,
        UndefinedCv => undefined_cv,
        UndefinedOffset => undefined_offset,
        UndefinedIndex => undefined_index,
        IllegalOffset => illegal_offset,
        StringOffsetNotice => string_offset_notice,
        DivByZeroWarning => div_by_zero_warning,
        ScalarAsArray => scalar_as_array,
        InvalidContainerRead => invalid_container_read,
        DeprecatedCall => deprecated_call,
        AutovivifyNotice => autovivify_notice,
        PropertyOfNonObject => property_of_non_object,
        CreateDefaultObject => create_default_object,
        ThrowModByZero => throw_mod_by_zero,
        StringSizeOverflow => string_size_overflow,
        AbstractCall => abstract_call,
        CannotPassByRef => cannot_pass_by_ref,
        MissingArgError => missing_arg_error,
        InvalidThis => invalid_this,
        Add => add,
        Sub => sub,
        Mul => mul,
        Div => div,
        Mod => modulo,
        Sl => sl,
        Sr => sr,
        BwOr => bw_or,
        BwAnd => bw_and,
        BwXor => bw_xor,
        Concat => concat,
        Pow => pow,
        BwNot => bw_not,
        Compare => compare,
        IsIdentical => is_identical,
        IsTrue => is_true,
        Increment => increment,
        Decrement => decrement,
        LongToStr => long_to_str,
        DoubleToStr => double_to_str,
        ZvalGetString => zval_get_string,
        StrAlloc => str_alloc,
        StrRealloc => str_realloc,
        StrChar => str_char,
        Memcpy => memcpy,
        StrlenSlow => strlen_slow,
        HandleNumericStr => handle_numeric_str,
        DvalToLval => dval_to_lval,
        HashIndexFind => hash_index_find,
        HashFind => hash_find,
        HashIndexAddNew => hash_index_add_new,
        HashNextIndexInsert => hash_next_index_insert,
        HashAddNew => hash_add_new,
        ArrayInit => array_init,
        FetchDimRSlow => fetch_dim_r_slow,
        FetchDimIsSlow => fetch_dim_is_slow,
        FetchDimWSlow => fetch_dim_w_slow,
        IssetDimSlow => isset_dim_slow,
        AssignDimSlow => assign_dim_slow,
        AssignToStringOffset => assign_to_string_offset,
        ObjectStoreCtorFailed => object_store_ctor_failed,
        FetchObjSlow => fetch_obj_slow,
        InitFcallByName => init_fcall_by_name,
        InitMethodCall => init_method_call,
        VmStackExtend => vm_stack_extend,
        VmStackFreeCallFrame => vm_stack_free_call_frame,
        FreeArgs => free_args,
        VerifyArgType => verify_arg_type,
        VerifyInternalArgTypes => verify_internal_arg_types,
        CopyExtraArgs => copy_extra_args,
        InitFuncRunTimeCache => init_func_run_time_cache,
        InitFuncExecuteData => init_func_execute_data,
        ExecuteEx => execute_ex,
        CreateGenerator => create_generator,
        DoFcallGeneric => do_fcall_generic,
        MakeRef => make_ref,
        SymtableCleanCache => symtable_clean_cache,
        FreeExtraArgs => free_extra_args,
        ArgMustBeByRef => arg_must_be_by_ref,
    }
    assert_eq!(h.missing().count(), 0, "mock covers every helper");
    h
}
