//! Parameter reception and statically resolved calls into native
//! functions.

mod common;

use std::cell::Cell;
use std::ptr;

use common::{Diag, MockRuntime};
use opjit::layout::{
    CommonFunction, ExecuteData, InternalFunction, InternalHandler, Zval, ZendReference,
    arg_offset, func_kind, send_mode, status,
};
use opjit_bytecode::{
    ArgInfo, CallSite, Callee, CalleeKind, CloneEntry, FactsBuilder, FunctionFacts, Instruction,
    Literal, OpArray, Opcode, Operand, OperandSlot, ReturnConv, SsaFacts, TypeMask, ValueRange,
    tag,
};

/// `function id($a) { return $a; }`, optionally with an `int` declaration.
fn identity(typed: bool) -> OpArray {
    let param = ArgInfo {
        has_type: typed,
        ..ArgInfo::new("a")
    };
    OpArray::builder()
        .name("id")
        .num_args(1)
        .arg(param)
        .cv("a")
        .instruction(
            Instruction::new(Opcode::Recv)
                .op1(Operand::num(1))
                .result(Operand::cv(0)),
        )
        .instruction(Instruction::new(Opcode::Return).op1(Operand::cv(0)))
        .build()
        .expect("valid op array")
}

#[test]
fn missing_required_argument_throws() {
    let rt = MockRuntime::new();
    let op_array = identity(false);
    let facts = SsaFacts::untyped(&op_array);
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[]);
    assert_eq!(out.status, status::LEAVE);
    assert!(rt.exception_pending());
    assert_eq!(
        rt.diags(),
        vec![Diag::Thrown("Too few arguments"), Diag::ExceptionDispatched]
    );
    assert_eq!(
        rt.globals().opline_before_exception as usize,
        op_array.opline_addr(0)
    );
}

#[test]
fn received_argument_is_returned() {
    let rt = MockRuntime::new();
    let op_array = identity(false);
    let facts = SsaFacts::untyped(&op_array);
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[Zval::long(4)]);
    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret, Zval::long(4));
    assert!(rt.diags().is_empty());
}

#[test]
fn untyped_parameters_let_callers_skip_reception() {
    let rt = MockRuntime::new();
    let op_array = identity(false);
    let facts = SsaFacts::untyped(&op_array);
    let (_jit, compiled) = rt.compile(&op_array, &facts);
    assert_eq!(op_array.dispatch().get(0), compiled.entry);
    assert_eq!(op_array.dispatch().get(1), compiled.entry);

    let typed = identity(true);
    let facts = SsaFacts::untyped(&typed);
    let (_jit, compiled) = rt.compile(&typed, &facts);
    assert_eq!(typed.dispatch().get(0), compiled.entry);
    assert_ne!(typed.dispatch().get(1), compiled.entry);
}

#[test]
fn typed_parameter_is_verified() {
    let rt = MockRuntime::new();
    let op_array = identity(true);
    let facts = SsaFacts::untyped(&op_array);
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[Zval::long(5)]);
    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret, Zval::long(5));
    assert_eq!(rt.diags(), vec![Diag::ArgVerified(1)]);
}

#[test]
fn mistyped_argument_throws() {
    let rt = MockRuntime::new();
    let op_array = identity(true);
    let facts = SsaFacts::untyped(&op_array);
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let arg = rt.string("five");
    let out = rt.run(&compiled, &op_array, &[arg]);
    assert_eq!(out.status, status::LEAVE);
    assert_eq!(
        rt.diags(),
        vec![
            Diag::ArgVerified(1),
            Diag::Thrown("TypeError"),
            Diag::ExceptionDispatched
        ]
    );
}

#[test]
fn absent_optional_argument_takes_its_default() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("opt")
        .num_args(1)
        .required_num_args(0)
        .arg(ArgInfo::new("a"))
        .cv("a")
        .literal(Literal::Long(10))
        .instruction(
            Instruction::new(Opcode::RecvInit)
                .op1(Operand::num(1))
                .op2(Operand::literal(0))
                .result(Operand::cv(0)),
        )
        .instruction(Instruction::new(Opcode::Return).op1(Operand::cv(0)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    let a = b.def(0, OperandSlot::Result, TypeMask::LONG);
    b.use_var(a, 1, OperandSlot::Op1);
    let facts = b.build().expect("consistent facts");
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[]);
    assert_eq!(out.ret, Zval::long(10));
    let out = rt.run(&compiled, &op_array, &[Zval::long(3)]);
    assert_eq!(out.ret, Zval::long(3));
    assert!(rt.diags().is_empty());
}

// ---- native callees ----

thread_local! {
    static ENTERED_FRAME: Cell<bool> = const { Cell::new(false) };
}

unsafe fn arg(call: *mut ExecuteData, n: u32) -> Zval {
    // SAFETY: the caller passes a call frame holding at least `n` arguments.
    unsafe { *call.cast::<u8>().add(arg_offset(n) as usize).cast::<Zval>() }
}

unsafe extern "C" fn native_sum(call: *mut ExecuteData, ret: *mut Zval) {
    ENTERED_FRAME.with(|e| e.set(common::current_frame() == call));
    // SAFETY: invoked with the frame the arguments were sent to.
    unsafe {
        let n = (*call).this.u2;
        let total = (1..=n).map(|i| arg(call, i).lval()).sum::<i64>();
        *ret = Zval::long(total);
    }
}

unsafe extern "C" fn native_fail(_call: *mut ExecuteData, _ret: *mut Zval) {
    common::throw("boom");
}

fn native(name: &str, handler: InternalHandler) -> Callee {
    native_taking(name, handler, 2, 0)
}

/// A native function of `num_args` parameters, those in `by_ref_args`
/// taken by reference.
fn native_taking(name: &str, handler: InternalHandler, num_args: u32, by_ref_args: u64) -> Callee {
    let quick_arg_flags = (0..num_args)
        .filter(|i| by_ref_args & (1 << i) != 0)
        .fold(0, |flags, i| flags | send_mode::BY_REF << (2 * i));
    let func = Box::into_raw(Box::new(InternalFunction {
        common: CommonFunction {
            kind: func_kind::INTERNAL,
            fn_flags: 0,
            function_name: ptr::null_mut(),
            scope: ptr::null_mut(),
            prototype: ptr::null_mut(),
            num_args,
            required_num_args: num_args,
            quick_arg_flags,
        },
        handler,
    }));
    Callee {
        func: func as usize,
        name: name.into(),
        kind: CalleeKind::Internal {
            handler: handler as usize,
        },
        num_args,
        required_num_args: num_args,
        has_type_hints: false,
        by_ref_args,
        returns_reference: false,
        is_deprecated: false,
        is_abstract: false,
    }
}

/// `function f($x) { return <name>(1, $x); }` with the call resolved.
fn calling(name: &str, handler: InternalHandler) -> (OpArray, SsaFacts) {
    let op_array = OpArray::builder()
        .name("f")
        .num_args(1)
        .cv("x")
        .temporaries(1)
        .literal(Literal::string(name))
        .literal(Literal::Long(1))
        .instruction(
            Instruction::new(Opcode::InitFcall)
                .op2(Operand::literal(0))
                .ext(2),
        )
        .instruction(
            Instruction::new(Opcode::SendVal)
                .op1(Operand::literal(1))
                .op2(Operand::num(1)),
        )
        .instruction(
            Instruction::new(Opcode::SendVar)
                .op1(Operand::cv(0))
                .op2(Operand::num(2)),
        )
        .instruction(Instruction::new(Opcode::DoIcall).result(Operand::tmp(1)))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::tmp(1)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    b.input(2, OperandSlot::Op1, TypeMask::LONG);
    let r = b.def(3, OperandSlot::Result, TypeMask::ANY);
    b.use_var(r, 4, OperandSlot::Op1);
    b.call(CallSite {
        init: 0,
        do_call: 3,
        num_args: 2,
        callee: Some(native(name, handler)),
    });
    let facts = b.build().expect("consistent facts");
    (op_array, facts)
}

#[test]
fn resolved_native_call_runs_in_its_own_frame() {
    let rt = MockRuntime::new();
    let (op_array, facts) = calling("sum", native_sum);
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[Zval::long(41)]);
    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret, Zval::long(42));
    assert!(ENTERED_FRAME.with(Cell::get));
    // both the call frame and the function's own frame were popped
    assert_eq!(rt.globals().vm_stack_top, out.frame.cast::<u8>());
    assert!(rt.globals().current_execute_data.is_null());
    rt.assert_modelled();
}

#[test]
fn exception_from_a_native_callee_unwinds() {
    let rt = MockRuntime::new();
    let (op_array, facts) = calling("fail", native_fail);
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[Zval::long(1)]);
    assert_eq!(out.status, status::LEAVE);
    assert_eq!(
        rt.diags(),
        vec![Diag::Thrown("boom"), Diag::ExceptionDispatched]
    );
    assert_eq!(
        rt.globals().opline_before_exception as usize,
        op_array.opline_addr(3)
    );
    assert_eq!(out.ret.type_tag(), tag::UNDEF);
}

// ---- by-reference arguments ----

thread_local! {
    static SAW_REFERENCE: Cell<bool> = const { Cell::new(false) };
}

/// Stores 42 into its first argument, through the reference when it got one.
unsafe extern "C" fn assign_42(call: *mut ExecuteData, _ret: *mut Zval) {
    // SAFETY: invoked with a frame holding one argument.
    unsafe {
        let z = call.cast::<u8>().add(arg_offset(1) as usize).cast::<Zval>();
        let by_ref = (*z).type_tag() == tag::REFERENCE;
        SAW_REFERENCE.with(|s| s.set(by_ref));
        if by_ref {
            (*(*z).as_ptr::<ZendReference>()).val = Zval::long(42);
        } else {
            *z = Zval::long(42);
        }
    }
}

/// `function f($x) { g($x); return $x; }` with `g` resolved and the
/// argument sent by `send`.
fn passing(send: Opcode, by_ref: bool) -> (OpArray, SsaFacts) {
    let op_array = OpArray::builder()
        .name("f")
        .num_args(1)
        .cv("x")
        .literal(Literal::string("g"))
        .instruction(
            Instruction::new(Opcode::InitFcall)
                .op2(Operand::literal(0))
                .ext(1),
        )
        .instruction(Instruction::new(send).op1(Operand::cv(0)).op2(Operand::num(1)))
        .instruction(Instruction::new(Opcode::DoIcall))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::cv(0)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    b.call(CallSite {
        init: 0,
        do_call: 2,
        num_args: 1,
        callee: Some(native_taking("g", assign_42, 1, u64::from(by_ref))),
    });
    let facts = b.build().expect("consistent facts");
    (op_array, facts)
}

#[test]
fn variable_sent_by_reference_is_updated_by_the_callee() {
    let rt = MockRuntime::new();
    let (op_array, facts) = passing(Opcode::SendRef, true);
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[Zval::long(5)]);
    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret, Zval::long(42));
    assert!(SAW_REFERENCE.with(Cell::get));
    assert!(rt.diags().is_empty());
}

#[test]
fn variable_follows_the_declared_passing_mode() {
    let rt = MockRuntime::new();
    let (op_array, facts) = passing(Opcode::SendVarEx, true);
    let (_jit, compiled) = rt.compile(&op_array, &facts);
    let out = rt.run(&compiled, &op_array, &[Zval::long(5)]);
    assert_eq!(out.ret, Zval::long(42));
    assert!(SAW_REFERENCE.with(Cell::get));

    let (op_array, facts) = passing(Opcode::SendVarEx, false);
    let (_jit, compiled) = rt.compile(&op_array, &facts);
    let out = rt.run(&compiled, &op_array, &[Zval::long(5)]);
    // the callee changed its own copy only
    assert_eq!(out.ret, Zval::long(5));
    assert!(!SAW_REFERENCE.with(Cell::get));
    assert!(rt.diags().is_empty());
}

#[test]
fn literal_for_a_reference_parameter_throws() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("f")
        .literal(Literal::string("g"))
        .literal(Literal::Long(7))
        .instruction(
            Instruction::new(Opcode::InitFcall)
                .op2(Operand::literal(0))
                .ext(1),
        )
        .instruction(
            Instruction::new(Opcode::SendValEx)
                .op1(Operand::literal(1))
                .op2(Operand::num(1)),
        )
        .instruction(Instruction::new(Opcode::DoIcall))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::literal(1)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    b.call(CallSite {
        init: 0,
        do_call: 2,
        num_args: 1,
        callee: Some(native_taking("g", assign_42, 1, 1)),
    });
    let facts = b.build().expect("consistent facts");
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[]);
    assert_eq!(out.status, status::LEAVE);
    assert_eq!(
        rt.diags(),
        vec![
            Diag::Thrown("Cannot pass parameter by reference"),
            Diag::ExceptionDispatched
        ]
    );
    assert_eq!(
        rt.globals().opline_before_exception as usize,
        op_array.opline_addr(1)
    );
}

// ---- bytecode callees ----

/// `function inc($a) { return $a + 1; }`
fn inc() -> OpArray {
    OpArray::builder()
        .name("inc")
        .num_args(1)
        .arg(ArgInfo::new("a"))
        .cv("a")
        .temporaries(1)
        .literal(Literal::Long(1))
        .instruction(
            Instruction::new(Opcode::Recv)
                .op1(Operand::num(1))
                .result(Operand::cv(0)),
        )
        .instruction(Instruction::binary(
            Opcode::Add,
            Operand::cv(0),
            Operand::literal(0),
            Operand::tmp(1),
        ))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::tmp(1)))
        .build()
        .expect("valid op array")
}

fn user(op_array: &OpArray, entry_slot: Option<usize>, clone: Option<CloneEntry>) -> Callee {
    Callee {
        func: common::user_function(op_array) as usize,
        name: op_array.name.clone().expect("named op array"),
        kind: CalleeKind::User {
            last_var: op_array.last_var,
            temporaries: op_array.temporaries,
            is_generator: false,
            is_variadic: false,
            entry_slot,
            clone,
        },
        num_args: 1,
        required_num_args: 1,
        has_type_hints: false,
        by_ref_args: 0,
        returns_reference: false,
        is_deprecated: false,
        is_abstract: false,
    }
}

/// `function f($x) { return inc($x); }` with `inc` resolved to `callee`.
fn calling_user(callee: Callee) -> (OpArray, SsaFacts) {
    let op_array = OpArray::builder()
        .name("f")
        .num_args(1)
        .cv("x")
        .temporaries(1)
        .literal(Literal::string("inc"))
        .instruction(
            Instruction::new(Opcode::InitFcall)
                .op2(Operand::literal(0))
                .ext(1),
        )
        .instruction(
            Instruction::new(Opcode::SendVar)
                .op1(Operand::cv(0))
                .op2(Operand::num(1)),
        )
        .instruction(Instruction::new(Opcode::DoUcall).result(Operand::tmp(1)))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::tmp(1)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    b.input(1, OperandSlot::Op1, TypeMask::LONG);
    let r = b.def(2, OperandSlot::Result, TypeMask::ANY);
    b.use_var(r, 3, OperandSlot::Op1);
    b.call(CallSite {
        init: 0,
        do_call: 2,
        num_args: 1,
        callee: Some(callee),
    });
    let facts = b.build().expect("consistent facts");
    (op_array, facts)
}

#[test]
fn compiled_callee_is_entered_directly() {
    let rt = MockRuntime::new();
    let callee_op = inc();
    let callee_facts = SsaFacts::untyped(&callee_op);
    let (_callee_jit, _) = rt.compile(&callee_op, &callee_facts);

    let slot = callee_op.dispatch().slot_addr(0);
    let (op_array, facts) = calling_user(user(&callee_op, Some(slot), None));
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[Zval::long(41)]);
    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret, Zval::long(42));
    assert_eq!(rt.globals().vm_stack_top, out.frame.cast::<u8>());
    assert!(rt.globals().current_execute_data.is_null());
    // no trip through the interpreter
    rt.assert_modelled();
}

unsafe extern "C" fn enters_a_frame(_ex: *mut ExecuteData, _opline: *const Instruction) -> i32 {
    status::ENTER
}

#[test]
fn unfinished_callee_status_is_handed_to_the_executor() {
    let rt = MockRuntime::new();
    let callee_op = inc();
    let slot: &'static usize = Box::leak(Box::new(enters_a_frame as usize));
    let (op_array, facts) = calling_user(user(&callee_op, Some(slot as *const usize as usize), None));
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[Zval::long(1)]);
    assert_eq!(out.status, status::ENTER);
    assert_eq!(out.ret.type_tag(), tag::UNDEF);
    rt.assert_modelled();
}

#[test]
fn register_returning_clone_is_called_with_a_fresh_frame() {
    let rt = MockRuntime::new();
    let callee_op = inc();
    let mut b = FactsBuilder::new(&callee_op);
    let a = b.def(0, OperandSlot::Result, TypeMask::LONG);
    b.range(a, ValueRange::new(0, 100));
    b.use_var(a, 1, OperandSlot::Op1);
    let sum = b.def(1, OperandSlot::Result, TypeMask::LONG);
    b.range(sum, ValueRange::new(1, 101));
    b.use_var(sum, 2, OperandSlot::Op1);
    b.function(FunctionFacts {
        clone_num: 1,
        return_conv: ReturnConv::Long,
        ..FunctionFacts::default()
    });
    let callee_facts = b.build().expect("consistent facts");
    let (_callee_jit, clone) = rt.compile(&callee_op, &callee_facts);
    assert!(!clone.is_handler());

    let entry = CloneEntry {
        entry: clone.entry,
        conv: ReturnConv::Long,
    };
    let (op_array, facts) = calling_user(user(&callee_op, None, Some(entry)));
    let (_jit, compiled) = rt.compile(&op_array, &facts);

    let out = rt.run(&compiled, &op_array, &[Zval::long(41)]);
    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret, Zval::long(42));
    assert_eq!(rt.globals().vm_stack_top, out.frame.cast::<u8>());
    assert!(rt.globals().current_execute_data.is_null());
    rt.assert_modelled();
}
