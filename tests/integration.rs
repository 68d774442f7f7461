//! End-to-end scenarios, driven entirely through the public `load_string` /
//! `disassemble` / `Vm` surface — no internal module is reached into here.

use corvid::{disassemble, load_string, CCallback, Compiler, CompilerOptions, SymbolTable, Vm, VmValue};
use std::cell::RefCell;
use std::rc::Rc;

fn compile(source: &[u8]) -> (Vec<u8>, Vec<corvid::Diagnostic>, Compiler<'static>) {
    let mut compiler = Compiler::new(CompilerOptions::default());
    let (bytecode, diagnostics) = load_string(&mut compiler, source, "t.lisp", None);
    (bytecode, diagnostics, compiler)
}

fn run(bytecode: &[u8]) -> VmValue {
    let mut vm = Vm::new();
    let mut symbols = SymbolTable::new();
    vm.execute(bytecode, &mut symbols).unwrap()
}

/// S1 — a bare integer literal compiles to a push of that value followed by
/// a halt, and the disassembler renders both lines.
#[test]
fn s1_literal_integer() {
    let (bytecode, diagnostics, _compiler) = compile(b"42");
    assert!(diagnostics.is_empty());
    assert_eq!(run(&bytecode), VmValue::Int(42));

    let text = disassemble(&bytecode).unwrap();
    assert!(text.contains("push-integer 42"));
    assert!(text.contains("halt"));
}

/// S2 — a call to a registered C-callback pushes its arguments, invokes the
/// callback, and leaves the stack depth where it was before the call's
/// arguments went on (one slot: the callback's return value).
#[test]
fn s2_global_print_calls_the_registered_callback() {
    let mut compiler = Compiler::new(CompilerOptions::default());
    // The comptime-side callback is never invoked in this test (no
    // __comptime/macro call happens), so a stub is enough to satisfy
    // `link_c_function`'s registration of both sides.
    compiler.link_c_function(
        "print-string",
        Box::new(|_args: &[VmValue]| Ok(VmValue::Nil)),
    );

    let (bytecode, diagnostics) =
        load_string(&mut compiler, b"(print-string \"hi\")", "t.lisp", None);
    assert!(diagnostics.is_empty());

    let text = disassemble(&bytecode).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    let push_string_idx = lines.iter().position(|l| l.contains("push-string")).unwrap();
    let ccall_idx = lines.iter().position(|l| l.contains("ccall")).unwrap();
    assert!(push_string_idx < ccall_idx);
    assert!(lines.last().unwrap().contains("halt"));

    let log = Rc::new(RefCell::new(Vec::new()));
    let log_for_callback = log.clone();
    let callback: CCallback = Box::new(move |args: &[VmValue]| {
        if let Some(VmValue::String(s)) = args.first() {
            log_for_callback.borrow_mut().push(s.as_str().to_string());
        }
        Ok(VmValue::Nil)
    });
    let symbol = compiler
        .symbols
        .lookup("print-string")
        .expect("print-string was interned by link_c_function");

    let mut vm = Vm::new();
    vm.link_c_function(symbol, callback);
    let mut symbols = SymbolTable::new();
    vm.execute(&bytecode, &mut symbols).unwrap();
    assert_eq!(log.borrow().as_slice(), ["hi"]);
}

/// S3 — a lambda nested inside another lambda captures the outer
/// parameter; applying the fully-applied chain yields the sum.
#[test]
fn s3_closure_capture_across_two_levels() {
    let (bytecode, diagnostics, _compiler) =
        compile(b"(((lambda (x) (lambda (y) (+ x y))) 3) 4)");
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
    assert_eq!(run(&bytecode), VmValue::Int(7));
}

/// S4 — a macro's expansion is spliced in at its call site; the runtime
/// bytecode never mentions the macro by name, and the result is as if the
/// expansion had been written directly.
#[test]
fn s4_macro_expansion_doubles_its_argument() {
    let (bytecode, diagnostics, _compiler) =
        compile(b"(__defmacro m (a) (__list (__quote __+) a a)) (m 21)");
    assert!(diagnostics.is_empty(), "unexpected diagnostics: {diagnostics:?}");
    assert_eq!(run(&bytecode), VmValue::Int(42));

    let text = disassemble(&bytecode).unwrap();
    assert!(!text.contains("\"m\""));
}

/// S5 — a conditional whose taken branch is large enough to put its else
/// label more than 127 bytes away widens `brz`'s operand from 8 to 16 bits;
/// a short branch keeps the narrow encoding. Both programs start with the
/// same one-byte `push-boolean-true`, so byte 1 is always `brz`'s opcode
/// byte, and identical opcodes only ever differ in their low two bits (the
/// width selector), so a difference there is exactly the widening.
#[test]
fn s5_forward_jump_widens_only_when_the_branch_is_long() {
    let (short_bytecode, diagnostics, _compiler) = compile(b"(if true 1 0)");
    assert!(diagnostics.is_empty());

    let long_string = "A".repeat(200);
    let long_source = format!("(if true \"{long_string}\" 0)");
    let (long_bytecode, diagnostics, _compiler) = compile(long_source.as_bytes());
    assert!(diagnostics.is_empty());

    let short_brz_byte = short_bytecode[1];
    let long_brz_byte = long_bytecode[1];
    assert_eq!(short_brz_byte % 3, 0, "short branch should stay at the narrowest width");
    assert_ne!(
        long_brz_byte % 3,
        short_brz_byte % 3,
        "long branch should have widened brz's operand"
    );
    assert_eq!(
        long_brz_byte - short_brz_byte,
        long_brz_byte % 3,
        "only the width selector should differ between the two encodings"
    );
}

/// S6 — an unresolved identifier is a non-aborting diagnostic; the form
/// still compiles to a late-bound global funcall.
#[test]
fn s6_unresolved_identifier_is_a_diagnostic_not_an_abort() {
    let (bytecode, diagnostics, _compiler) = compile(b"(foo)");
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(
        diagnostics[0].message,
        "Could not find variable \"foo\". Assuming global scope."
    );

    let text = disassemble(&bytecode).unwrap();
    assert!(text.contains("push-global"));
    assert!(text.contains("funcall"));
}

/// Universal invariant 7: diagnostics accumulate in emission order and
/// draining (what `load_string` does internally) empties the buffer for
/// the next call.
#[test]
fn diagnostics_are_fifo_across_forms() {
    let (_bytecode, diagnostics, _compiler) = compile(b"(foo) (bar)");
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics[0].message.contains("foo"));
    assert!(diagnostics[1].message.contains("bar"));
}
