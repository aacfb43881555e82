//! Runtime ABI mirror.
//!
//! `#[repr(C)]` copies of the runtime structures generated code touches,
//! plus every byte offset and flag it needs. Offsets are derived with
//! `offset_of!` and pinned by compile-time assertions, so nothing outside
//! this module spells a raw number.

use std::mem::{offset_of, size_of};

use opjit_bytecode::{Instruction, tag};

/// Status codes returned by opcode handlers and compiled entry points.
pub mod status {
    /// Continue with `EX(opline)` in the current frame
    pub const CONTINUE: i32 = 0;
    /// A new frame was pushed; start executing it
    pub const ENTER: i32 = 1;
    /// The frame returned to its caller
    pub const LEAVE: i32 = 2;
    /// The top-level frame finished; stop the executor
    pub const RETURN: i32 = -1;
}

/// Type flags in bits 8..16 of a zval's type info.
pub mod type_flags {
    /// Shift of the flag byte inside the type info
    pub const SHIFT: u32 = 8;
    /// Payload carries a reference count
    pub const REFCOUNTED: u32 = 1 << 0;
    /// Payload may participate in cycles
    pub const COLLECTABLE: u32 = 1 << 1;
}

/// Full 32-bit type info words stored by generated code.
pub mod type_info {
    use super::{tag, type_flags};

    const RC: u32 = type_flags::REFCOUNTED << type_flags::SHIFT;
    const RC_GC: u32 = (type_flags::REFCOUNTED | type_flags::COLLECTABLE) << type_flags::SHIFT;

    /// Undefined slot
    pub const UNDEF: u32 = tag::UNDEF as u32;
    /// `null`
    pub const NULL: u32 = tag::NULL as u32;
    /// `false`
    pub const FALSE: u32 = tag::FALSE as u32;
    /// `true`
    pub const TRUE: u32 = tag::TRUE as u32;
    /// Integer
    pub const LONG: u32 = tag::LONG as u32;
    /// Double
    pub const DOUBLE: u32 = tag::DOUBLE as u32;
    /// Interned (immutable) string
    pub const INTERNED_STRING: u32 = tag::STRING as u32;
    /// Counted string
    pub const STRING: u32 = tag::STRING as u32 | RC;
    /// Immutable array
    pub const IMMUTABLE_ARRAY: u32 = tag::ARRAY as u32;
    /// Counted array
    pub const ARRAY: u32 = tag::ARRAY as u32 | RC_GC;
    /// Object
    pub const OBJECT: u32 = tag::OBJECT as u32 | RC_GC;
    /// Resource
    pub const RESOURCE: u32 = tag::RESOURCE as u32 | RC;
    /// Reference cell
    pub const REFERENCE: u32 = tag::REFERENCE as u32 | RC;
    /// Pointer to another zval
    pub const INDIRECT: u32 = tag::INDIRECT as u32;

    /// Type info of a simple value with tag `t`
    pub const fn simple(t: u8) -> u32 {
        t as u32
    }
}

/// Flags of the counted header (`gc.type_info`).
pub mod gc {
    /// Low bits hold the payload type
    pub const TYPE_MASK: u32 = 0x0000_000f;
    /// Collectable by the cycle collector
    pub const COLLECTABLE: u32 = 1 << 4;
    /// Shared immutable payload; never modified or freed
    pub const IMMUTABLE: u32 = 1 << 6;
    /// Allocated outside the request heap
    pub const PERSISTENT: u32 = 1 << 7;
    /// Shift of the collector's buffer index
    pub const INFO_SHIFT: u32 = 10;
    /// Collector buffer index; zero when not enqueued
    pub const INFO_MASK: u32 = 0xffff_fc00;
}

/// Call info bits in the upper half of `EX(This).type_info`.
pub mod call_info {
    /// Shift of the call-info half
    pub const SHIFT: u32 = 16;
    /// Frame executes top-level code
    pub const CODE: u32 = 1 << 16;
    /// Frame was entered from outside the executor loop
    pub const TOP: u32 = 1 << 17;
    /// Frame lives in a separately allocated stack page
    pub const ALLOCATED: u32 = 1 << 18;
    /// Extra arguments beyond the declared parameters must be freed
    pub const FREE_EXTRA_ARGS: u32 = 1 << 19;
    /// A symbol table was attached to the frame
    pub const HAS_SYMBOL_TABLE: u32 = 1 << 20;
    /// `$this` holds a reference to release on exit
    pub const RELEASE_THIS: u32 = 1 << 21;
    /// Frame runs a closure
    pub const CLOSURE: u32 = 1 << 22;
    /// Frame belongs to a generator
    pub const GENERATOR: u32 = 1 << 24;
    /// Frame runs a constructor
    pub const CTOR: u32 = 1 << 26;
    /// `EX(This)` holds an object
    pub const HAS_THIS: u32 = super::type_info::OBJECT;
}

/// Function kinds (`common.type`).
pub mod func_kind {
    /// Natively implemented
    pub const INTERNAL: u8 = 1;
    /// Bytecode
    pub const USER: u8 = 2;
    /// Trampoline / overloaded call
    pub const OVERLOADED: u8 = 3;
}

/// Function flags (`common.fn_flags`).
pub mod acc {
    /// Static method
    pub const STATIC: u32 = 1 << 4;
    /// Abstract method
    pub const ABSTRACT: u32 = 1 << 6;
    /// Parameters carry type declarations
    pub const HAS_TYPE_HINTS: u32 = 1 << 8;
    /// Deprecated function
    pub const DEPRECATED: u32 = 1 << 11;
    /// Returns by reference
    pub const RETURN_REFERENCE: u32 = 1 << 12;
    /// Variadic last parameter
    pub const VARIADIC: u32 = 1 << 14;
    /// Closure
    pub const CLOSURE: u32 = 1 << 20;
    /// Generator
    pub const GENERATOR: u32 = 1 << 24;
}

/// Argument passing modes in `quick_arg_flags` (two bits per argument).
pub mod send_mode {
    /// Pass by value
    pub const BY_VAL: u64 = 0;
    /// Pass by reference
    pub const BY_REF: u64 = 1;
    /// Prefer reference, accept values
    pub const PREFER_REF: u64 = 2;
    /// Arguments covered by `quick_arg_flags`
    pub const QUICK_ARGS: u32 = 32;
}

/// Hash table flags.
pub mod hash_flags {
    /// Integer keys `0..used` stored without a hash part
    pub const PACKED: u32 = 1 << 2;
}

/// Fetch kinds passed to object handlers.
pub mod fetch_kind {
    /// Read
    pub const R: i32 = 0;
    /// Write
    pub const W: i32 = 1;
    /// Read-modify-write
    pub const RW: i32 = 2;
    /// Quiet read (`isset`)
    pub const IS: i32 = 3;
    /// Unset
    pub const UNSET: i32 = 5;
}

/// Tagged value.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Zval {
    /// Payload: integer bits, double bits or a pointer
    pub value: u64,
    /// Type tag (low byte) and type flags
    pub type_info: u32,
    /// Opcode-specific extra word (argument count in `EX(This)`)
    pub u2: u32,
}

impl Zval {
    /// Undefined slot
    pub const UNDEF: Self = Self::with(0, type_info::UNDEF);

    /// Zval with payload bits and type info
    pub const fn with(value: u64, type_info: u32) -> Self {
        Self {
            value,
            type_info,
            u2: 0,
        }
    }

    /// `null`
    pub const fn null() -> Self {
        Self::with(0, type_info::NULL)
    }

    /// Boolean
    pub const fn bool(b: bool) -> Self {
        Self::with(0, if b { type_info::TRUE } else { type_info::FALSE })
    }

    /// Integer
    pub const fn long(v: i64) -> Self {
        Self::with(v as u64, type_info::LONG)
    }

    /// Double
    pub fn double(d: f64) -> Self {
        Self::with(d.to_bits(), type_info::DOUBLE)
    }

    /// Pointer payload
    pub fn ptr<T>(p: *mut T, type_info: u32) -> Self {
        Self::with(p as usize as u64, type_info)
    }

    /// Type tag
    #[inline]
    pub const fn type_tag(&self) -> u8 {
        self.type_info as u8
    }

    /// Type flags
    #[inline]
    pub const fn type_flags(&self) -> u32 {
        (self.type_info >> type_flags::SHIFT) & 0xff
    }

    /// Payload is counted
    #[inline]
    pub const fn is_refcounted(&self) -> bool {
        self.type_flags() & type_flags::REFCOUNTED != 0
    }

    /// Integer payload
    #[inline]
    pub const fn lval(&self) -> i64 {
        self.value as i64
    }

    /// Double payload
    #[inline]
    pub fn dval(&self) -> f64 {
        f64::from_bits(self.value)
    }

    /// Pointer payload
    #[inline]
    pub fn as_ptr<T>(&self) -> *mut T {
        self.value as usize as *mut T
    }
}

/// Header shared by every counted payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ZendRefcounted {
    /// Reference count
    pub refcount: u32,
    /// Payload type and GC flags
    pub type_info: u32,
}

/// String payload; `val` is the first of `len + 1` bytes.
#[repr(C)]
#[derive(Debug)]
pub struct ZendString {
    /// Header
    pub gc: ZendRefcounted,
    /// Cached hash (0 when not computed)
    pub h: u64,
    /// Length in bytes
    pub len: usize,
    /// Inline bytes
    pub val: [u8; 1],
}

/// Hash table bucket.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Bucket {
    /// Stored value
    pub val: Zval,
    /// Integer key or string hash
    pub h: u64,
    /// String key, null for integer keys
    pub key: *mut ZendString,
}

/// Ordered hash table.
#[repr(C)]
#[derive(Debug)]
pub struct ZendArray {
    /// Header
    pub gc: ZendRefcounted,
    /// Hash flags
    pub flags: u32,
    /// Hash mask
    pub table_mask: u32,
    /// Buckets
    pub data: *mut Bucket,
    /// Used bucket slots
    pub used: u32,
    /// Live elements
    pub count: u32,
    /// Capacity
    pub size: u32,
    /// Iteration position
    pub internal_pointer: u32,
    /// Next free integer key
    pub next_free_element: i64,
    /// Element destructor
    pub destructor: usize,
}

/// Reference cell.
#[repr(C)]
#[derive(Debug)]
pub struct ZendReference {
    /// Header
    pub gc: ZendRefcounted,
    /// Referenced value
    pub val: Zval,
    /// Typed-property sources
    pub sources: usize,
}

/// Class entry (only the fields generated code compares or loads).
#[repr(C)]
#[derive(Debug)]
pub struct ClassEntry {
    /// Class kind
    pub kind: u8,
    /// Class name
    pub name: *mut ZendString,
    /// Parent class
    pub parent: *mut ClassEntry,
    /// Declared property slots
    pub default_properties_count: u32,
    /// Class flags
    pub ce_flags: u32,
}

/// Object.
#[repr(C)]
#[derive(Debug)]
pub struct ZendObject {
    /// Header
    pub gc: ZendRefcounted,
    /// Object store handle
    pub handle: u32,
    /// Class
    pub ce: *mut ClassEntry,
    /// Handler table
    pub handlers: *const ObjectHandlers,
    /// Dynamic properties
    pub properties: *mut ZendArray,
    /// Declared property slots (`default_properties_count` of them)
    pub properties_table: [Zval; 1],
}

/// `read_property(object, member, kind, cache_slot, rv) -> zval*`
pub type ReadPropertyFn = unsafe extern "C" fn(
    object: *mut ZendObject,
    member: *mut Zval,
    kind: i32,
    cache_slot: *mut usize,
    rv: *mut Zval,
) -> *mut Zval;
/// `write_property(object, member, value, cache_slot) -> zval*`
pub type WritePropertyFn = unsafe extern "C" fn(
    object: *mut ZendObject,
    member: *mut Zval,
    value: *mut Zval,
    cache_slot: *mut usize,
) -> *mut Zval;
/// `read_dimension(object, offset, kind, rv) -> zval*`
pub type ReadDimensionFn = unsafe extern "C" fn(
    object: *mut ZendObject,
    offset: *mut Zval,
    kind: i32,
    rv: *mut Zval,
) -> *mut Zval;
/// `write_dimension(object, offset, value)`; a null offset appends
pub type WriteDimensionFn =
    unsafe extern "C" fn(object: *mut ZendObject, offset: *mut Zval, value: *mut Zval);
/// `has_property(object, member, check_empty, cache_slot) -> bool`
pub type HasPropertyFn = unsafe extern "C" fn(
    object: *mut ZendObject,
    member: *mut Zval,
    check_empty: i32,
    cache_slot: *mut usize,
) -> i32;
/// `has_dimension(object, offset, check_empty) -> bool`
pub type HasDimensionFn =
    unsafe extern "C" fn(object: *mut ZendObject, offset: *mut Zval, check_empty: i32) -> i32;
/// `get(object, rv) -> zval*`: scalar value of a proxy object
pub type GetFn = unsafe extern "C" fn(object: *mut ZendObject, rv: *mut Zval) -> *mut Zval;
/// `set(object, value)`: assign to a proxy object
pub type SetFn = unsafe extern "C" fn(object: *mut ZendObject, value: *mut Zval);

/// Per-class object handler table.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct ObjectHandlers {
    /// Property read
    pub read_property: ReadPropertyFn,
    /// Property write
    pub write_property: WritePropertyFn,
    /// `$obj[...]` read
    pub read_dimension: ReadDimensionFn,
    /// `$obj[...]` write
    pub write_dimension: WriteDimensionFn,
    /// `isset($obj->p)`
    pub has_property: HasPropertyFn,
    /// `isset($obj[...])`
    pub has_dimension: HasDimensionFn,
    /// Proxy read, absent for ordinary objects
    pub get: Option<GetFn>,
    /// Proxy write, absent for ordinary objects
    pub set: Option<SetFn>,
}

/// Call frame.
#[repr(C)]
#[derive(Debug)]
pub struct ExecuteData {
    /// Currently executing instruction
    pub opline: *const Instruction,
    /// Innermost open (not yet invoked) call
    pub call: *mut ExecuteData,
    /// Where the callee stores its result
    pub return_value: *mut Zval,
    /// Function being executed
    pub func: *mut CommonFunction,
    /// `$this`, call info and argument count
    pub this: Zval,
    /// Calling frame
    pub prev_execute_data: *mut ExecuteData,
    /// Attached symbol table
    pub symbol_table: *mut ZendArray,
    /// Run-time cache of the function
    pub run_time_cache: *mut usize,
}

/// Internal function handler: `(execute_data, return_value)`
pub type InternalHandler = unsafe extern "C" fn(*mut ExecuteData, *mut Zval);

/// Opcode handler / compiled entry point: `(execute_data, opline) -> status`
pub type OpcodeHandler = unsafe extern "C" fn(*mut ExecuteData, *const Instruction) -> i32;

/// Header shared by internal and user functions.
#[repr(C)]
#[derive(Debug)]
pub struct CommonFunction {
    /// [`func_kind`]
    pub kind: u8,
    /// Function flags ([`acc`])
    pub fn_flags: u32,
    /// Name
    pub function_name: *mut ZendString,
    /// Declaring class
    pub scope: *mut ClassEntry,
    /// Prototype (closures)
    pub prototype: *mut CommonFunction,
    /// Declared parameters
    pub num_args: u32,
    /// Required parameters
    pub required_num_args: u32,
    /// Two bits per argument ([`send_mode`]) for the first 32 arguments
    pub quick_arg_flags: u64,
}

/// Natively implemented function.
#[repr(C)]
#[derive(Debug)]
pub struct InternalFunction {
    /// Header
    pub common: CommonFunction,
    /// Native handler
    pub handler: InternalHandler,
}

/// Bytecode function.
#[repr(C)]
#[derive(Debug)]
pub struct UserFunction {
    /// Header
    pub common: CommonFunction,
    /// Compiled variables
    pub last_var: u32,
    /// Temporaries
    pub temporaries: u32,
    /// First instruction
    pub opcodes: *const Instruction,
    /// Lazily allocated run-time cache
    pub run_time_cache: *mut usize,
    /// Run-time cache size in bytes
    pub cache_size: u32,
    /// Materialized literals
    pub literals: *const Zval,
}

/// Byte offsets used by generated code.
pub mod offsets {
    use super::*;

    /// Size of a zval
    pub const ZVAL_SIZE: i32 = size_of::<Zval>() as i32;
    /// `zval.value`
    pub const ZVAL_VALUE: i32 = offset_of!(Zval, value) as i32;
    /// `zval.u1.type_info`
    pub const ZVAL_TYPE_INFO: i32 = offset_of!(Zval, type_info) as i32;
    /// `zval.u2`
    pub const ZVAL_U2: i32 = offset_of!(Zval, u2) as i32;

    /// `gc.refcount`
    pub const GC_REFCOUNT: i32 = offset_of!(ZendRefcounted, refcount) as i32;
    /// `gc.u.type_info`
    pub const GC_TYPE_INFO: i32 = offset_of!(ZendRefcounted, type_info) as i32;

    /// `zend_string.len`
    pub const STR_LEN: i32 = offset_of!(ZendString, len) as i32;
    /// `zend_string.h`
    pub const STR_H: i32 = offset_of!(ZendString, h) as i32;
    /// `zend_string.val`
    pub const STR_VAL: i32 = offset_of!(ZendString, val) as i32;

    /// `zend_array.flags`
    pub const ARR_FLAGS: i32 = offset_of!(ZendArray, flags) as i32;
    /// `zend_array.arData`
    pub const ARR_DATA: i32 = offset_of!(ZendArray, data) as i32;
    /// `zend_array.nNumUsed`
    pub const ARR_USED: i32 = offset_of!(ZendArray, used) as i32;
    /// Size of a bucket
    pub const BUCKET_SIZE: i32 = size_of::<Bucket>() as i32;

    /// `zend_reference.val`
    pub const REF_VAL: i32 = offset_of!(ZendReference, val) as i32;

    /// `zend_object.ce`
    pub const OBJ_CE: i32 = offset_of!(ZendObject, ce) as i32;
    /// `zend_object.handlers`
    pub const OBJ_HANDLERS: i32 = offset_of!(ZendObject, handlers) as i32;
    /// `zend_object.properties_table`
    pub const OBJ_PROPERTIES_TABLE: i32 = offset_of!(ZendObject, properties_table) as i32;

    /// `handlers.read_property`
    pub const HND_READ_PROPERTY: i32 = offset_of!(ObjectHandlers, read_property) as i32;
    /// `handlers.write_property`
    pub const HND_WRITE_PROPERTY: i32 = offset_of!(ObjectHandlers, write_property) as i32;
    /// `handlers.read_dimension`
    pub const HND_READ_DIMENSION: i32 = offset_of!(ObjectHandlers, read_dimension) as i32;
    /// `handlers.write_dimension`
    pub const HND_WRITE_DIMENSION: i32 = offset_of!(ObjectHandlers, write_dimension) as i32;
    /// `handlers.has_property`
    pub const HND_HAS_PROPERTY: i32 = offset_of!(ObjectHandlers, has_property) as i32;
    /// `handlers.has_dimension`
    pub const HND_HAS_DIMENSION: i32 = offset_of!(ObjectHandlers, has_dimension) as i32;
    /// `handlers.get`
    pub const HND_GET: i32 = offset_of!(ObjectHandlers, get) as i32;
    /// `handlers.set`
    pub const HND_SET: i32 = offset_of!(ObjectHandlers, set) as i32;

    /// `EX(opline)`
    pub const EX_OPLINE: i32 = offset_of!(ExecuteData, opline) as i32;
    /// `EX(call)`
    pub const EX_CALL: i32 = offset_of!(ExecuteData, call) as i32;
    /// `EX(return_value)`
    pub const EX_RETURN_VALUE: i32 = offset_of!(ExecuteData, return_value) as i32;
    /// `EX(func)`
    pub const EX_FUNC: i32 = offset_of!(ExecuteData, func) as i32;
    /// `EX(This)`
    pub const EX_THIS: i32 = offset_of!(ExecuteData, this) as i32;
    /// `EX(This).u1.type_info` (call info in the upper half)
    pub const EX_CALL_INFO: i32 = EX_THIS + ZVAL_TYPE_INFO;
    /// `EX(This).u2.num_args`
    pub const EX_NUM_ARGS: i32 = EX_THIS + ZVAL_U2;
    /// `EX(prev_execute_data)`
    pub const EX_PREV: i32 = offset_of!(ExecuteData, prev_execute_data) as i32;
    /// `EX(symbol_table)`
    pub const EX_SYMBOL_TABLE: i32 = offset_of!(ExecuteData, symbol_table) as i32;
    /// `EX(run_time_cache)`
    pub const EX_RUN_TIME_CACHE: i32 = offset_of!(ExecuteData, run_time_cache) as i32;

    /// `func.type`
    pub const FUNC_KIND: i32 = offset_of!(CommonFunction, kind) as i32;
    /// `func.common.fn_flags`
    pub const FUNC_FLAGS: i32 = offset_of!(CommonFunction, fn_flags) as i32;
    /// `func.common.scope`
    pub const FUNC_SCOPE: i32 = offset_of!(CommonFunction, scope) as i32;
    /// `func.common.prototype`
    pub const FUNC_PROTOTYPE: i32 = offset_of!(CommonFunction, prototype) as i32;
    /// `func.common.num_args`
    pub const FUNC_NUM_ARGS: i32 = offset_of!(CommonFunction, num_args) as i32;
    /// `func.common.quick_arg_flags`
    pub const FUNC_QUICK_ARG_FLAGS: i32 = offset_of!(CommonFunction, quick_arg_flags) as i32;
    /// `func.internal_function.handler`
    pub const FUNC_HANDLER: i32 = offset_of!(InternalFunction, handler) as i32;
    /// `func.op_array.last_var`
    pub const FUNC_LAST_VAR: i32 = offset_of!(UserFunction, last_var) as i32;
    /// `func.op_array.T`
    pub const FUNC_TEMPORARIES: i32 = offset_of!(UserFunction, temporaries) as i32;
    /// `func.op_array.opcodes`
    pub const FUNC_OPCODES: i32 = offset_of!(UserFunction, opcodes) as i32;
    /// `func.op_array.run_time_cache`
    pub const FUNC_RUN_TIME_CACHE: i32 = offset_of!(UserFunction, run_time_cache) as i32;

    const _: () = assert!(ZVAL_SIZE == 16);
    const _: () = assert!(ZVAL_TYPE_INFO == 8);
    const _: () = assert!(STR_VAL == 24);
    const _: () = assert!(BUCKET_SIZE == 32);
    const _: () = assert!(REF_VAL == 8);
    const _: () = assert!(EX_THIS % ZVAL_SIZE == 0);
    const _: () = assert!(OBJ_PROPERTIES_TABLE % 8 == 0);
}

/// Zval slots occupied by the frame header.
pub const FRAME_SLOT: u32 = size_of::<ExecuteData>().div_ceil(size_of::<Zval>()) as u32;

/// Byte offset of frame slot `slot` from the frame base.
#[inline]
pub const fn var_offset(slot: u32) -> i32 {
    ((FRAME_SLOT + slot) as i32) * offsets::ZVAL_SIZE
}

/// Byte offset of argument `arg_num` (1-based) in a callee frame.
#[inline]
pub const fn arg_offset(arg_num: u32) -> i32 {
    var_offset(arg_num - 1)
}

/// Bytes of VM stack a call needs: header, `num_args` argument slots and,
/// for bytecode callees, the locals not covered by arguments.
pub const fn used_stack(num_args: u32, user_frame: Option<(u32, u32, u32)>) -> u32 {
    let mut slots = FRAME_SLOT + num_args;
    if let Some((last_var, temporaries, declared_args)) = user_frame {
        let covered = if num_args < declared_args {
            num_args
        } else {
            declared_args
        };
        slots += last_var + temporaries - covered;
    }
    slots * offsets::ZVAL_SIZE as u32
}

/// Bytes to allocate for a string of `len` bytes.
#[inline]
pub const fn string_alloc_size(len: usize) -> usize {
    (offsets::STR_VAL as usize + len + 1 + 7) & !7
}

/// `u2` of a call result whose callee returns by reference.
pub const VAR_RET_REF: u32 = 1;

/// Largest string length whose allocation size does not overflow.
pub const MAX_STRING_LEN: u64 = (isize::MAX as u64) - (offsets::STR_VAL as u64) - 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_rounds_up_to_slots() {
        assert_eq!(FRAME_SLOT as usize * 16 >= size_of::<ExecuteData>(), true);
        assert_eq!(var_offset(0), FRAME_SLOT as i32 * 16);
        assert_eq!(arg_offset(1), var_offset(0));
    }

    #[test]
    fn used_stack_counts_uncovered_locals() {
        let internal = used_stack(2, None);
        assert_eq!(internal, (FRAME_SLOT + 2) * 16);
        // 3 CVs, 1 temporary, 2 declared parameters, 1 passed
        let user = used_stack(1, Some((3, 1, 2)));
        assert_eq!(user, (FRAME_SLOT + 1 + 3 + 1 - 1) * 16);
    }

    #[test]
    fn type_info_words() {
        assert!(Zval::with(0, type_info::STRING).is_refcounted());
        assert!(!Zval::with(0, type_info::INTERNED_STRING).is_refcounted());
        assert_eq!(Zval::long(-3).lval(), -3);
        assert_eq!(Zval::double(1.5).dval(), 1.5);
        assert_eq!(Zval::bool(true).type_tag(), tag::TRUE);
        assert_eq!(call_info::HAS_THIS & 0xff, tag::OBJECT as u32);
    }
}
