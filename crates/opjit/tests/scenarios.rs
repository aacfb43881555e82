//! End-to-end runs of compiled bodies against the mock runtime.

mod common;

use common::{Diag, MockRuntime, array_get, array_len, refcount, str_of};
use opjit::JitError;
use opjit::layout::{Zval, status};
use opjit_bytecode::{
    FactsBuilder, Instruction, Literal, OpArray, Opcode, Operand, OperandSlot, SsaFacts,
    TryCatchElement, TypeMask, tag,
};

#[test]
fn constant_addition_returns_three() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("three")
        .temporaries(1)
        .literal(Literal::Long(1))
        .literal(Literal::Long(2))
        .instruction(Instruction::binary(
            Opcode::Add,
            Operand::literal(0),
            Operand::literal(1),
            Operand::tmp(0),
        ))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::tmp(0)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    let sum = b.def(0, OperandSlot::Result, TypeMask::LONG);
    b.use_var(sum, 1, OperandSlot::Op1);
    let facts = b.build().expect("consistent facts");

    let (_jit, compiled) = rt.compile(&op_array, &facts);
    let out = rt.run(&compiled, &op_array, &[]);

    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret, Zval::long(3));
    assert!(rt.diags().is_empty());
}

#[test]
fn literal_concatenation_builds_a_counted_string() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("abcd")
        .temporaries(1)
        .literal(Literal::string("ab"))
        .literal(Literal::string("cd"))
        .instruction(Instruction::binary(
            Opcode::Concat,
            Operand::literal(0),
            Operand::literal(1),
            Operand::tmp(0),
        ))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::tmp(0)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    let s = b.def(0, OperandSlot::Result, TypeMask::STRING);
    b.use_var(s, 1, OperandSlot::Op1);
    let facts = b.build().expect("consistent facts");

    let (_jit, compiled) = rt.compile(&op_array, &facts);
    let out = rt.run(&compiled, &op_array, &[]);

    assert_eq!(out.status, status::RETURN);
    assert_eq!(str_of(&out.ret), "abcd");
    assert!(out.ret.is_refcounted());
    assert_eq!(refcount(&out.ret), 1);
    common::release(out.ret);
    rt.assert_modelled();
}

#[test]
fn reading_a_missing_offset_warns_and_yields_null() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("read")
        .num_args(1)
        .cv("a")
        .temporaries(1)
        .literal(Literal::Long(5))
        .instruction(Instruction::binary(
            Opcode::FetchDimR,
            Operand::cv(0),
            Operand::literal(0),
            Operand::tmp(1),
        ))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::tmp(1)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    b.input(0, OperandSlot::Op1, TypeMask::ARRAY);
    let elem = b.def(0, OperandSlot::Result, TypeMask::ANY);
    b.use_var(elem, 1, OperandSlot::Op1);
    let facts = b.build().expect("consistent facts");

    let arr = rt.array(&[(1, Zval::long(10))]);
    common::addref(&arr);
    let (_jit, compiled) = rt.compile(&op_array, &facts);
    let out = rt.run(&compiled, &op_array, &[arr]);

    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret.type_tag(), tag::NULL);
    assert_eq!(rt.diags(), vec![Diag::UndefinedOffset(5)]);
    // no element was created, and the frame gave its reference back
    assert_eq!(array_len(&arr), 1);
    assert_eq!(array_get(&arr, 5), None);
    assert_eq!(refcount(&arr), 1);
}

#[test]
fn assigning_an_element_vivifies_null() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("store")
        .num_args(2)
        .cv("a")
        .cv("b")
        .literal(Literal::Long(5))
        .instruction(
            Instruction::new(Opcode::AssignDim)
                .op1(Operand::cv(0))
                .op2(Operand::literal(0)),
        )
        .instruction(Instruction::new(Opcode::OpData).op1(Operand::cv(1)))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::cv(0)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    b.input(0, OperandSlot::Op1, TypeMask::NULL | TypeMask::ARRAY);
    let vivified = b.def(0, OperandSlot::Op1, TypeMask::ARRAY);
    b.input(1, OperandSlot::Op1, TypeMask::LONG);
    b.use_var(vivified, 2, OperandSlot::Op1);
    let facts = b.build().expect("consistent facts");

    let (_jit, compiled) = rt.compile(&op_array, &facts);
    let out = rt.run(&compiled, &op_array, &[Zval::null(), Zval::long(7)]);

    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret.type_tag(), tag::ARRAY);
    assert_eq!(array_len(&out.ret), 1);
    assert_eq!(array_get(&out.ret, 5), Some(Zval::long(7)));
    assert_eq!(refcount(&out.ret), 1);
    rt.assert_modelled();
    assert!(!rt.diags().contains(&Diag::Autovivify));
}

#[test]
fn dividing_by_zero_warns_and_yields_infinity() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("div")
        .num_args(2)
        .cv("a")
        .cv("b")
        .temporaries(1)
        .instruction(Instruction::binary(
            Opcode::Div,
            Operand::cv(0),
            Operand::cv(1),
            Operand::tmp(2),
        ))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::tmp(2)))
        .build()
        .expect("valid op array");
    let mut b = FactsBuilder::new(&op_array);
    b.input(0, OperandSlot::Op1, TypeMask::LONG);
    b.input(0, OperandSlot::Op2, TypeMask::LONG);
    let q = b.def(0, OperandSlot::Result, TypeMask::NUMBER);
    b.use_var(q, 1, OperandSlot::Op1);
    let facts = b.build().expect("consistent facts");

    let (_jit, compiled) = rt.compile(&op_array, &facts);
    let out = rt.run(&compiled, &op_array, &[Zval::long(5), Zval::long(0)]);

    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret.type_tag(), tag::DOUBLE);
    assert_eq!(out.ret.dval(), f64::INFINITY);
    assert_eq!(rt.diags(), vec![Diag::DivByZero]);
}

#[test]
fn finally_blocks_are_left_to_the_interpreter() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("guarded")
        .default_handler(0x5150)
        .instruction(Instruction::new(Opcode::Nop))
        .instruction(Instruction::new(Opcode::Nop))
        .instruction(Instruction::new(Opcode::Return))
        .try_catch(TryCatchElement {
            try_op: 0,
            catch_op: 0,
            finally_op: 1,
            finally_end: 2,
        })
        .build()
        .expect("valid op array");
    let facts = SsaFacts::untyped(&op_array);

    let mut jit = rt.compiler();
    let err = jit.compile(&op_array, &facts).expect_err("finally is rejected");
    assert!(matches!(err, JitError::Unsupported { reason: "finally" }));
    assert_eq!(op_array.dispatch().get(0), 0x5150);
    assert_eq!(jit.arena().used(), 0);
}

#[test]
fn generators_are_left_to_the_interpreter() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("gen")
        .is_generator(true)
        .default_handler(0x5150)
        .instruction(Instruction::new(Opcode::GeneratorCreate))
        .instruction(Instruction::new(Opcode::GeneratorReturn))
        .build()
        .expect("valid op array");
    let facts = SsaFacts::untyped(&op_array);

    let mut jit = rt.compiler();
    let err = jit.compile(&op_array, &facts).expect_err("generator is rejected");
    assert!(matches!(err, JitError::Unsupported { reason: "generator" }));
    assert_eq!(op_array.dispatch().get(0), 0x5150);
}

#[test]
fn handler_entry_replaces_the_first_dispatch_slot() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("null")
        .default_handler(0x5150)
        .literal(Literal::Null)
        .instruction(Instruction::new(Opcode::Return).op1(Operand::literal(0)))
        .build()
        .expect("valid op array");
    let facts = SsaFacts::untyped(&op_array);

    let (jit, compiled) = rt.compile(&op_array, &facts);
    assert_eq!(op_array.dispatch().get(0), compiled.entry);
    assert!(jit.arena().used() >= compiled.size);

    let out = rt.run(&compiled, &op_array, &[]);
    assert_eq!(out.status, status::RETURN);
    assert_eq!(out.ret.type_tag(), tag::NULL);
}

#[test]
fn translation_is_deterministic() {
    let rt = MockRuntime::new();
    let op_array = OpArray::builder()
        .name("mix")
        .num_args(2)
        .cv("a")
        .cv("b")
        .temporaries(2)
        .literal(Literal::string("x"))
        .instruction(Instruction::binary(
            Opcode::Mul,
            Operand::cv(0),
            Operand::cv(1),
            Operand::tmp(2),
        ))
        .instruction(Instruction::binary(
            Opcode::Concat,
            Operand::tmp(2),
            Operand::literal(0),
            Operand::tmp(3),
        ))
        .instruction(Instruction::new(Opcode::Return).op1(Operand::tmp(3)))
        .build()
        .expect("valid op array");
    let facts = SsaFacts::untyped(&op_array);

    let mut jit = rt.compiler();
    let a = jit.compile(&op_array, &facts).expect("first compile");
    let b = jit.compile(&op_array, &facts).expect("second compile");
    assert_ne!(a.entry, b.entry);
    assert_eq!(a.size, b.size);
    // SAFETY: both ranges were written to the arena and stay mapped.
    let (code_a, code_b) = unsafe {
        (
            std::slice::from_raw_parts(a.entry as *const u8, a.size),
            std::slice::from_raw_parts(b.entry as *const u8, b.size),
        )
    };
    assert_eq!(code_a, code_b);
}
