//! Runtime helper table.
//!
//! Slow paths, diagnostics and everything that touches the runtime's
//! allocator or hash tables are calls into `extern "C"` helpers the host
//! registers by address. Generated code calls them through absolute
//! addresses, so the emitted bytes need no relocations.
//!
//! # ABI
//!
//! Pointer arguments are `*mut Zval` unless noted otherwise; `res` is the
//! result slot a helper writes. Integers are `i64` (`long`) or `i32`
//! (flags, argument numbers, booleans).

use cranelift_codegen::ir::{self, AbiParam, Type, types};
use cranelift_codegen::isa::CallConv;

use crate::error::{JitError, Result};

/// Argument / return value class of a helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    /// Pointer-sized
    Ptr,
    /// 64-bit integer
    I64,
    /// 32-bit integer
    I32,
    /// Double
    F64,
}

impl Arg {
    /// IR type of this class on a target with pointer type `ptr`.
    pub fn ir_type(self, ptr: Type) -> Type {
        match self {
            Self::Ptr => ptr,
            Self::I64 => types::I64,
            Self::I32 => types::I32,
            Self::F64 => types::F64,
        }
    }
}

/// Calling convention class.
///
/// `Fast` marks the small hot helpers the runtime compiles with its
/// register-passing convention; both classes lower to the host's C
/// convention here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperConv {
    /// Hot one- and two-argument helpers
    Fast,
    /// Generic runtime library entry points
    Default,
}

/// What a helper may do besides computing its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HelperAttrs {
    /// May leave a pending exception; callers check right after the call
    pub may_throw: bool,
    /// Only reports a diagnostic; needs the opline for the message but
    /// does not change which opline is current
    pub diagnostic: bool,
    /// Never returns
    pub noreturn: bool,
    /// Reads memory only; no side effects
    pub pure: bool,
}

impl HelperAttrs {
    const PLAIN: Self = Self {
        may_throw: false,
        diagnostic: false,
        noreturn: false,
        pure: false,
    };
    const THROWS: Self = Self {
        may_throw: true,
        ..Self::PLAIN
    };
    const DIAG: Self = Self {
        diagnostic: true,
        ..Self::PLAIN
    };
    const FATAL: Self = Self {
        may_throw: true,
        noreturn: true,
        ..Self::PLAIN
    };
    const PURE: Self = Self {
        pure: true,
        ..Self::PLAIN
    };
}

/// Return class of a helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ret {
    /// Nothing
    Void,
    /// Pointer-sized
    Ptr,
    /// 64-bit integer
    I64,
    /// 32-bit integer
    I32,
}

macro_rules! helper_kinds {
    ($(
        $(#[$doc:meta])*
        $kind:ident = $sym:literal, $conv:ident, ($($arg:ident),*) -> $ret:ident, $attrs:ident;
    )*) => {
        /// Identifies a runtime helper function.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum HelperKind {
            $($(#[$doc])* $kind,)*
        }

        impl HelperKind {
            /// Every helper, in table order.
            pub const ALL: &'static [HelperKind] = &[$(Self::$kind,)*];

            /// Exported symbol name of the helper.
            pub const fn symbol_name(self) -> &'static str {
                match self {
                    $(Self::$kind => $sym,)*
                }
            }

            /// Parameter classes.
            pub const fn params(self) -> &'static [Arg] {
                match self {
                    $(Self::$kind => &[$(Arg::$arg),*],)*
                }
            }

            /// Return class.
            pub const fn ret(self) -> Ret {
                match self {
                    $(Self::$kind => Ret::$ret,)*
                }
            }

            /// Calling convention class.
            pub const fn conv(self) -> HelperConv {
                match self {
                    $(Self::$kind => HelperConv::$conv,)*
                }
            }

            /// Side-effect attributes.
            pub const fn attrs(self) -> HelperAttrs {
                match self {
                    $(Self::$kind => HelperAttrs::$attrs,)*
                }
            }
        }
    };
}

helper_kinds! {
    // ==================== Refcounting / GC ====================
    /// `(counted)`: destroy a payload whose count reached zero
    RcDtor = "opjit_rt_rc_dtor", Fast, (Ptr) -> Void, PLAIN;
    /// `(counted)`: buffer a collectable payload as a possible cycle root
    GcPossibleRoot = "opjit_rt_gc_possible_root", Fast, (Ptr) -> Void, PLAIN;
    /// `(array) -> array`: duplicate a shared array (count 1)
    ArrayDup = "opjit_rt_array_dup", Fast, (Ptr) -> Ptr, PLAIN;

    // ==================== Diagnostics ====================
    /// `(execute_data, cv_slot)`: "Undefined variable"
    UndefinedCv = "opjit_rt_undefined_cv", Fast, (Ptr, I32) -> Void, DIAG;
    /// `(offset)`: "Undefined array key" for an integer key
    UndefinedOffset = "opjit_rt_undefined_offset", Fast, (I64) -> Void, DIAG;
    /// `(key string)`: "Undefined array key" for a string key
    UndefinedIndex = "opjit_rt_undefined_index", Fast, (Ptr) -> Void, DIAG;
    /// `()`: "Illegal offset type"
    IllegalOffset = "opjit_rt_illegal_offset", Fast, () -> Void, DIAG;
    /// `(offset)`: "Uninitialized string offset"
    StringOffsetNotice = "opjit_rt_string_offset_notice", Fast, (I64) -> Void, DIAG;
    /// `()`: "Division by zero"
    DivByZeroWarning = "opjit_rt_div_by_zero_warning", Fast, () -> Void, DIAG;
    /// `()`: "Cannot use a scalar value as an array"
    ScalarAsArray = "opjit_rt_scalar_as_array", Fast, () -> Void, DIAG;
    /// `(container)`: "Trying to access array offset on value of type ..."
    InvalidContainerRead = "opjit_rt_invalid_container_read", Fast, (Ptr) -> Void, DIAG;
    /// `(func)`: "Function ... is deprecated"
    DeprecatedCall = "opjit_rt_deprecated_call", Fast, (Ptr) -> Void, DIAG;
    /// `(container)`: "Automatic conversion of false to array"
    AutovivifyNotice = "opjit_rt_autovivify_notice", Fast, (Ptr) -> Void, DIAG;
    /// `(container, member, kind)`: "Attempt to read property on ..."
    PropertyOfNonObject = "opjit_rt_property_of_non_object", Fast, (Ptr, Ptr, I32) -> Void, DIAG;
    /// `(container)`: turn an empty container into a default object, with a warning
    CreateDefaultObject = "opjit_rt_create_default_object", Default, (Ptr) -> Void, THROWS;

    // ==================== Errors ====================
    /// `()`: throw "Modulo by zero"
    ThrowModByZero = "opjit_rt_throw_mod_by_zero", Fast, () -> Void, THROWS;
    /// `()`: fatal "String size overflow"
    StringSizeOverflow = "opjit_rt_string_size_overflow", Fast, () -> Void, FATAL;
    /// `(func)`: fatal "Cannot call abstract method"
    AbstractCall = "opjit_rt_abstract_call", Fast, (Ptr) -> Void, FATAL;
    /// `(arg_num)`: throw "Cannot pass parameter by reference"
    CannotPassByRef = "opjit_rt_cannot_pass_by_ref", Fast, (I32) -> Void, THROWS;
    /// `(execute_data)`: throw "Too few arguments"
    MissingArgError = "opjit_rt_missing_arg_error", Fast, (Ptr) -> Void, THROWS;
    /// `()`: throw "Using $this when not in object context"
    InvalidThis = "opjit_rt_invalid_this", Fast, () -> Void, THROWS;

    // ==================== Operator slow paths ====================
    /// `(res, op1, op2)`
    Add = "opjit_rt_add", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    Sub = "opjit_rt_sub", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    Mul = "opjit_rt_mul", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    Div = "opjit_rt_div", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    Mod = "opjit_rt_mod", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    Sl = "opjit_rt_sl", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    Sr = "opjit_rt_sr", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    BwOr = "opjit_rt_bw_or", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    BwAnd = "opjit_rt_bw_and", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    BwXor = "opjit_rt_bw_xor", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    Concat = "opjit_rt_concat", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1, op2)`
    Pow = "opjit_rt_pow", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, op1)`
    BwNot = "opjit_rt_bw_not", Default, (Ptr, Ptr) -> Void, THROWS;
    /// `(op1, op2) -> <0 | 0 | >0`: loose comparison
    Compare = "opjit_rt_compare", Default, (Ptr, Ptr) -> I64, THROWS;
    /// `(op1, op2) -> bool`: strict identity
    IsIdentical = "opjit_rt_is_identical", Fast, (Ptr, Ptr) -> I32, PURE;
    /// `(op) -> bool`: truthiness of any value
    IsTrue = "opjit_rt_is_true", Fast, (Ptr) -> I32, THROWS;
    /// `(var)`: `++var` on a non-numeric value
    Increment = "opjit_rt_increment", Default, (Ptr) -> Void, THROWS;
    /// `(var)`: `--var` on a non-numeric value
    Decrement = "opjit_rt_decrement", Default, (Ptr) -> Void, THROWS;

    // ==================== Strings ====================
    /// `(value) -> string`: counted decimal representation
    LongToStr = "opjit_rt_long_to_str", Fast, (I64) -> Ptr, PLAIN;
    /// `(value, precision) -> string`
    DoubleToStr = "opjit_rt_double_to_str", Fast, (F64, I64) -> Ptr, PLAIN;
    /// `(value) -> string`: string conversion of any value, new reference
    ZvalGetString = "opjit_rt_zval_get_string", Default, (Ptr) -> Ptr, THROWS;
    /// `(len) -> string`: uninitialized counted string, count 1
    StrAlloc = "opjit_rt_str_alloc", Fast, (I64) -> Ptr, PLAIN;
    /// `(string, len) -> string`: grow a count-1 string in place
    StrRealloc = "opjit_rt_str_realloc", Fast, (Ptr, I64) -> Ptr, PLAIN;
    /// `(byte) -> string`: interned one-character string
    StrChar = "opjit_rt_str_char", Fast, (I32) -> Ptr, PURE;
    /// `(dst, src, len)`: byte copy
    Memcpy = "opjit_rt_memcpy", Fast, (Ptr, Ptr, I64) -> Void, PLAIN;
    /// `(res, op)`: `strlen` of a non-string
    StrlenSlow = "opjit_rt_strlen_slow", Default, (Ptr, Ptr) -> Void, THROWS;

    // ==================== Hash tables ====================
    /// `(string, out) -> bool`: parse a canonical integer key
    HandleNumericStr = "opjit_rt_handle_numeric_str", Fast, (Ptr, Ptr) -> I32, PLAIN;
    /// `(double) -> long`: key conversion of a double offset
    DvalToLval = "opjit_rt_dval_to_lval", Fast, (F64) -> I64, PURE;
    /// `(array, h) -> zval*` or null
    HashIndexFind = "opjit_rt_hash_index_find", Fast, (Ptr, I64) -> Ptr, PURE;
    /// `(array, key) -> zval*` or null
    HashFind = "opjit_rt_hash_find", Fast, (Ptr, Ptr) -> Ptr, PURE;
    /// `(array, h, value) -> zval*`: insert a key known to be absent
    HashIndexAddNew = "opjit_rt_hash_index_add_new", Default, (Ptr, I64, Ptr) -> Ptr, PLAIN;
    /// `(array, value) -> zval*` or null when the next index is taken
    HashNextIndexInsert = "opjit_rt_hash_next_index_insert", Default, (Ptr, Ptr) -> Ptr, THROWS;
    /// `(array, key, value) -> zval*`: insert a key known to be absent
    HashAddNew = "opjit_rt_hash_add_new", Default, (Ptr, Ptr, Ptr) -> Ptr, PLAIN;
    /// `(zval)`: store a fresh empty array
    ArrayInit = "opjit_rt_array_init", Fast, (Ptr) -> Void, PLAIN;

    // ==================== Container slow paths ====================
    /// `(res, container, dim)`: read access the inline paths do not cover
    FetchDimRSlow = "opjit_rt_fetch_dim_r_slow", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, container, dim)`: quiet read access the inline paths do not cover
    FetchDimIsSlow = "opjit_rt_fetch_dim_is_slow", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(res, container, dim, kind)`: write access the inline paths do not cover
    FetchDimWSlow = "opjit_rt_fetch_dim_w_slow", Default, (Ptr, Ptr, Ptr, I32) -> Void, THROWS;
    /// `(container, dim, check_empty) -> bool`
    IssetDimSlow = "opjit_rt_isset_dim_slow", Default, (Ptr, Ptr, I32) -> I32, THROWS;
    /// `(container, dim, value, res)`: element assignment the inline paths do not cover
    AssignDimSlow = "opjit_rt_assign_dim_slow", Default, (Ptr, Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(container, dim, value, res)`: `$str[i] = v`
    AssignToStringOffset = "opjit_rt_assign_to_string_offset", Default, (Ptr, Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(object)`: mark the object's constructor as failed
    ObjectStoreCtorFailed = "opjit_rt_object_store_ctor_failed", Fast, (Ptr) -> Void, PLAIN;
    /// `(res, container, member, cache_slot, kind)`: property fetch for writing
    FetchObjSlow = "opjit_rt_fetch_obj_slow", Default, (Ptr, Ptr, Ptr, Ptr, I32) -> Void, THROWS;

    // ==================== Calls ====================
    /// `(execute_data, name, cache_slot, num_args) -> call`: resolve, push and
    /// open a frame; null on failure
    InitFcallByName = "opjit_rt_init_fcall_by_name", Default, (Ptr, Ptr, Ptr, I32) -> Ptr, THROWS;
    /// `(execute_data, object, name, cache_slot, num_args) -> call`: like
    /// [`HelperKind::InitFcallByName`], binding a new reference to the object
    InitMethodCall = "opjit_rt_init_method_call", Default, (Ptr, Ptr, Ptr, Ptr, I32) -> Ptr, THROWS;
    /// `(size) -> frame`: push a frame on a fresh VM stack page
    VmStackExtend = "opjit_rt_vm_stack_extend", Fast, (I64) -> Ptr, PLAIN;
    /// `(call)`: free a frame allocated by [`HelperKind::VmStackExtend`]
    VmStackFreeCallFrame = "opjit_rt_vm_stack_free_call_frame", Fast, (Ptr) -> Void, PLAIN;
    /// `(call)`: release the arguments of a finished internal call
    FreeArgs = "opjit_rt_free_args", Fast, (Ptr) -> Void, PLAIN;
    /// `(func, arg_num, arg) -> ok`
    VerifyArgType = "opjit_rt_verify_arg_type", Default, (Ptr, I32, Ptr) -> I32, THROWS;
    /// `(func, call) -> ok`
    VerifyInternalArgTypes = "opjit_rt_verify_internal_arg_types", Default, (Ptr, Ptr) -> I32, THROWS;
    /// `(call)`: move arguments beyond the declared ones past the locals
    CopyExtraArgs = "opjit_rt_copy_extra_args", Default, (Ptr) -> Void, PLAIN;
    /// `(func) -> cache`: allocate the function's run-time cache
    InitFuncRunTimeCache = "opjit_rt_init_func_run_time_cache", Default, (Ptr) -> Ptr, PLAIN;
    /// `(call, return_value)`: full frame setup of a user call
    InitFuncExecuteData = "opjit_rt_init_func_execute_data", Default, (Ptr, Ptr) -> Void, PLAIN;
    /// `(call)`: run a prepared user frame in the interpreter
    ExecuteEx = "opjit_rt_execute_ex", Default, (Ptr) -> Void, THROWS;
    /// `(call, return_value)`: wrap a prepared frame in a generator object
    CreateGenerator = "opjit_rt_create_generator", Default, (Ptr, Ptr) -> Void, THROWS;
    /// `(execute_data, call, return_value)`: invoke any function kind
    DoFcallGeneric = "opjit_rt_do_fcall_generic", Default, (Ptr, Ptr, Ptr) -> Void, THROWS;
    /// `(zval) -> reference`: box a value into a reference cell in place
    MakeRef = "opjit_rt_make_ref", Fast, (Ptr) -> Ptr, PLAIN;
    /// `(execute_data)`: detach and cache the frame's symbol table
    SymtableCleanCache = "opjit_rt_symtable_clean_cache", Default, (Ptr) -> Void, PLAIN;
    /// `(execute_data)`: release arguments beyond the declared ones
    FreeExtraArgs = "opjit_rt_free_extra_args", Default, (Ptr) -> Void, PLAIN;
    /// `(func, arg_num) -> bool`: parameter is passed by reference
    ArgMustBeByRef = "opjit_rt_arg_must_be_by_ref", Fast, (Ptr, I32) -> I32, PURE;
}

/// Total number of helper kinds.
pub const HELPER_COUNT: usize = HelperKind::ALL.len();

impl HelperKind {
    /// Cranelift signature of the helper.
    pub fn signature(self, ptr: Type, call_conv: CallConv) -> ir::Signature {
        let mut sig = ir::Signature::new(call_conv);
        sig.params
            .extend(self.params().iter().map(|a| AbiParam::new(a.ir_type(ptr))));
        match self.ret() {
            Ret::Void => {}
            Ret::Ptr => sig.returns.push(AbiParam::new(ptr)),
            Ret::I64 => sig.returns.push(AbiParam::new(types::I64)),
            Ret::I32 => sig.returns.push(AbiParam::new(types::I32)),
        }
        sig
    }

    /// Helper implementing binary operator `opcode`, if any.
    pub fn for_binary(opcode: opjit_bytecode::Opcode) -> Option<Self> {
        use opjit_bytecode::Opcode;
        Some(match opcode {
            Opcode::Add => Self::Add,
            Opcode::Sub => Self::Sub,
            Opcode::Mul => Self::Mul,
            Opcode::Div => Self::Div,
            Opcode::Mod => Self::Mod,
            Opcode::Sl => Self::Sl,
            Opcode::Sr => Self::Sr,
            Opcode::BwOr => Self::BwOr,
            Opcode::BwAnd => Self::BwAnd,
            Opcode::BwXor => Self::BwXor,
            Opcode::Concat | Opcode::FastConcat => Self::Concat,
            Opcode::Pow => Self::Pow,
            _ => return None,
        })
    }
}

/// Table of runtime helper addresses, indexed by [`HelperKind`].
///
/// The host fills it in before constructing a [`crate::RuntimeContext`].
/// A function whose translation needs an unset helper is rejected.
#[derive(Clone)]
pub struct RuntimeHelpers {
    ptrs: [Option<usize>; HELPER_COUNT],
}

impl Default for RuntimeHelpers {
    fn default() -> Self {
        Self {
            ptrs: [None; HELPER_COUNT],
        }
    }
}

impl std::fmt::Debug for RuntimeHelpers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeHelpers")
            .field("registered", &self.ptrs.iter().flatten().count())
            .finish()
    }
}

impl RuntimeHelpers {
    /// Create an empty helper table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the address of a helper.
    ///
    /// # Safety
    ///
    /// `addr` must be an `extern "C"` function with the parameter and
    /// return classes [`HelperKind::params`] / [`HelperKind::ret`] describe,
    /// valid for as long as code compiled against this table runs.
    pub unsafe fn set(&mut self, kind: HelperKind, addr: usize) {
        self.ptrs[kind as usize] = Some(addr);
    }

    /// Address of a helper, if registered.
    pub fn get(&self, kind: HelperKind) -> Option<usize> {
        self.ptrs[kind as usize]
    }

    /// Address of a helper, or [`JitError::MissingHelper`].
    pub fn require(&self, kind: HelperKind) -> Result<usize> {
        self.get(kind)
            .ok_or(JitError::MissingHelper(kind.symbol_name()))
    }

    /// Helpers without an address.
    pub fn missing(&self) -> impl Iterator<Item = HelperKind> + '_ {
        HelperKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.get(*kind).is_none())
    }
}
