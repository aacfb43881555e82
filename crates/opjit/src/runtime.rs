//! Process-wide runtime slots the generated code reads and writes.

use crate::helpers::RuntimeHelpers;

/// Explicit handle on the runtime's process-wide state.
///
/// Every field is an address owned by the host runtime. Generated code
/// embeds them as constants, so they must stay valid (and fixed) for as
/// long as any code compiled against this context can run.
#[derive(Debug, Clone)]
pub struct RuntimeContext {
    /// `*mut *mut ZendObject`: pending exception, null when none
    pub exception: usize,
    /// `*const Instruction`: the `HANDLE_EXCEPTION` instruction stored as
    /// the current opline while an exception is dispatched
    pub exception_op: usize,
    /// `*mut *const Instruction`: opline that raised the pending exception
    pub opline_before_exception: usize,
    /// `*mut *mut ExecuteData`: currently executing frame
    pub current_execute_data: usize,
    /// `*mut *mut ClassEntry`: current class scope
    pub scope: usize,
    /// `*mut *mut u8`: VM stack bump pointer
    pub vm_stack_top: usize,
    /// `*mut *mut u8`: end of the current VM stack page
    pub vm_stack_end: usize,
    /// `*mut Zval`: shared undefined-value sentinel, read in place of undefined variables
    pub uninitialized_zval: usize,
    /// `*mut Zval`: shared error-value sentinel
    pub error_zval: usize,
    /// `*mut ZendString`: interned empty string
    pub empty_string: usize,
    /// `*mut i64`: configured decimal precision for double-to-string
    pub precision: usize,
    /// `OpcodeHandler` invoked to dispatch a pending exception
    pub exception_handler: usize,
    /// `*const ObjectHandlers`: standard handler table, when the host has one
    pub std_object_handlers: Option<usize>,
    /// Helper addresses
    pub helpers: RuntimeHelpers,
}
