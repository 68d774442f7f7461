//! Minimal bytecode VM (spec.md §4.8's "comptime VM" and the runtime VM a
//! compiled program is eventually handed to). Executes one assembled byte
//! stream at a time; the macro driver runs a second, fully independent
//! instance of this same VM over comptime bytecode.

use crate::instruction::{decode_one, decode_upvalue_source, DecodedArg};
use crate::scope::UpvalueSource;
use crate::symbol::{SymbolId, SymbolTable};
use crate::vmvalue::{Closure, Instance, VmString, VmValue};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::VmError;

/// A C-callback: takes the popped argument list (in call order) and
/// returns a value or an error. Registered with [`Vm::link_c_function`],
/// matching the embedder-facing `link_c_function` of spec.md §6.
pub type CCallback<'a> = Box<dyn FnMut(&[VmValue]) -> Result<VmValue, VmError> + 'a>;

struct CallFrame {
    base: usize,
    return_pc: usize,
    upvalues: Vec<Rc<RefCell<VmValue>>>,
    cells: HashMap<u32, Rc<RefCell<VmValue>>>,
}

/// Owns the data stack, call frames, globals, and the registered
/// C-callbacks for one execution context. A fresh `Vm` is created for the
/// runtime program and another, separate one for the comptime program
/// (spec.md §4.9) — they never share a data stack, only the symbol table.
pub struct Vm<'a> {
    stack: Vec<VmValue>,
    frames: Vec<CallFrame>,
    globals: Vec<VmValue>,
    callbacks: HashMap<SymbolId, CCallback<'a>>,
    next_type_id: u32,
    /// Scratch: the entry pc of the closure most recently pushed by
    /// [`Vm::enter_call`], read immediately afterward by `Funcall`/`Apply`.
    last_entry_pc: usize,
}

impl<'a> Vm<'a> {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Vec::new(),
            callbacks: HashMap::new(),
            next_type_id: 0,
            last_entry_pc: 0,
        }
    }

    pub fn link_c_function(&mut self, symbol: SymbolId, callback: CCallback<'a>) {
        self.callbacks.insert(symbol, callback);
    }

    /// Pushes a value directly onto the data stack, ahead of a call to
    /// [`Vm::execute`]. Used by the macro driver to seed a fresh `execute`
    /// call with its reified argument list at slot 0.
    pub fn push_value(&mut self, value: VmValue) {
        self.stack.push(value);
    }

    /// Drops any leftover stack/frame state from a previous `execute` call.
    /// The comptime VM is reused across every macro invocation in one
    /// compile, so each invocation must start from a clean slate.
    pub fn clear_stack(&mut self) {
        self.stack.clear();
        self.frames.clear();
    }

    fn pop(&mut self) -> Result<VmValue, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn current_base(&self) -> usize {
        self.frames.last().map(|f| f.base).unwrap_or(0)
    }

    fn read_local(&self, slot: u32) -> Result<VmValue, VmError> {
        if let Some(frame) = self.frames.last() {
            if let Some(cell) = frame.cells.get(&slot) {
                return Ok(cell.borrow().clone());
            }
        }
        let index = self.current_base() + slot as usize;
        self.stack
            .get(index)
            .cloned()
            .ok_or(VmError::OutOfBounds {
                index: slot as i64,
                len: self.stack.len() - self.current_base(),
            })
    }

    fn write_local(&mut self, slot: u32, value: VmValue) -> Result<(), VmError> {
        if let Some(frame) = self.frames.last() {
            if let Some(cell) = frame.cells.get(&slot) {
                *cell.borrow_mut() = value;
                return Ok(());
            }
        }
        let index = self.current_base() + slot as usize;
        if index >= self.stack.len() {
            return Err(VmError::OutOfBounds {
                index: slot as i64,
                len: self.stack.len() - self.current_base(),
            });
        }
        self.stack[index] = value;
        Ok(())
    }

    /// Runs `bytecode` from offset 0 until a `halt` instruction or the end
    /// of the stream, returning whatever is left on top of the stack.
    pub fn execute(&mut self, bytecode: &[u8], symbols: &mut SymbolTable) -> Result<VmValue, VmError> {
        self.frames.push(CallFrame {
            base: 0,
            return_pc: bytecode.len(),
            upvalues: Vec::new(),
            cells: HashMap::new(),
        });

        let mut pc = 0usize;
        while pc < bytecode.len() {
            let (op, decoded_args) = decode_one(bytecode, &mut pc)
                .map_err(|e| VmError::IllegalOpcode(bytecode.get(e.0).copied().unwrap_or(0)))?;
            if self.step(bytecode, op, &decoded_args, &mut pc, symbols)? {
                break;
            }
        }

        if !self.frames.is_empty() {
            self.frames.pop();
        }
        Ok(self.stack.pop().unwrap_or(VmValue::Nil))
    }

    /// Executes one instruction. Returns `Ok(true)` when the VM should halt.
    fn step(
        &mut self,
        bytecode: &[u8],
        op: crate::instruction::Opcode,
        args: &[DecodedArg],
        pc: &mut usize,
        symbols: &mut SymbolTable,
    ) -> Result<bool, VmError> {
        use crate::instruction::Opcode::*;

        match op {
            Nop => {}
            Nil => self.stack.push(VmValue::Nil),
            PushBooleanFalse => self.stack.push(VmValue::Bool(false)),
            PushBooleanTrue => self.stack.push(VmValue::Bool(true)),
            PushInteger => self.stack.push(VmValue::Int(expect_int(args, 0)?)),
            PushDoubleFloat => self.stack.push(VmValue::Float(expect_float(args, 0)?)),
            PushString => self
                .stack
                .push(VmValue::String(VmString::from_bytes(expect_bytes(args, 0)?))),
            PushSymbol => self.stack.push(VmValue::Symbol(expect_int(args, 0)? as u32)),
            PushIndex => {
                let slot = expect_slot(args, 0)?;
                self.stack.push(self.read_local(slot)?);
            }
            PushUpvalue => {
                let idx = expect_slot(args, 0)? as usize;
                let cell = self
                    .frames
                    .last()
                    .and_then(|f| f.upvalues.get(idx))
                    .cloned()
                    .ok_or(VmError::StackUnderflow)?;
                self.stack.push(cell.borrow().clone());
            }
            PushGlobal => {
                let slot = expect_slot(args, 0)? as usize;
                let value = self
                    .globals
                    .get(slot)
                    .cloned()
                    .ok_or(VmError::UnboundGlobal(slot as u32))?;
                self.stack.push(value);
            }
            SetUpvalue => {
                let value_slot = expect_slot(args, 0)?;
                let idx = expect_slot(args, 1)? as usize;
                let value = self.read_local(value_slot)?;
                let cell = self
                    .frames
                    .last()
                    .and_then(|f| f.upvalues.get(idx))
                    .cloned()
                    .ok_or(VmError::StackUnderflow)?;
                *cell.borrow_mut() = value;
            }
            SetStatic => {
                let value_slot = expect_slot(args, 0)?;
                let global_slot = expect_slot(args, 1)? as usize;
                let value = self.read_local(value_slot)?;
                if global_slot >= self.globals.len() {
                    self.globals.resize(global_slot + 1, VmValue::Nil);
                }
                self.globals[global_slot] = value;
            }
            Move => {
                let dst = expect_slot(args, 0)?;
                let src = expect_slot(args, 1)?;
                let value = self.read_local(src)?;
                self.write_local(dst, value)?;
            }
            ReleaseUpvalues => {
                let slots = expect_slots(args, 0)?;
                let base = self.current_base();
                for slot in slots {
                    let value = self
                        .stack
                        .get(base + slot as usize)
                        .cloned()
                        .ok_or(VmError::StackUnderflow)?;
                    self.frames
                        .last_mut()
                        .unwrap()
                        .cells
                        .insert(slot, Rc::new(RefCell::new(value)));
                }
            }
            PushClosure | PushVaClosure => {
                let delta = expect_label(args, 0)?;
                let entry = (*pc as i64 + delta) as u32;
                let arity = expect_int(args, 1)? as u32;
                let variadic = expect_int(args, 2)? != 0;
                let encoded = expect_slots(args, 3)?;
                let mut upvalues = Vec::with_capacity(encoded.len());
                for code in encoded {
                    let cell = match decode_upvalue_source(code) {
                        UpvalueSource::Local(slot) => {
                            // `ReleaseUpvalues` is the textbook place to box a
                            // captured local (spec.md §4.3 step 6), but a
                            // closure can also be the very first thing to
                            // observe the capture, so box on demand here too
                            // — boxing is idempotent, whichever comes first.
                            if let Some(cell) = self.frames.last().and_then(|f| f.cells.get(&slot)) {
                                cell.clone()
                            } else {
                                let value = self.read_local(slot)?;
                                let cell = Rc::new(RefCell::new(value));
                                self.frames
                                    .last_mut()
                                    .unwrap()
                                    .cells
                                    .insert(slot, cell.clone());
                                cell
                            }
                        }
                        UpvalueSource::Upvalue(idx) => self
                            .frames
                            .last()
                            .and_then(|f| f.upvalues.get(idx as usize))
                            .cloned()
                            .ok_or(VmError::StackUnderflow)?,
                    };
                    upvalues.push(cell);
                }
                self.stack.push(VmValue::Closure(Rc::new(Closure {
                    entry,
                    arity,
                    variadic,
                    upvalues,
                })));
            }
            Funcall => {
                let n = expect_int(args, 0)? as usize;
                let callee = self.pop()?;
                let mut call_args = Vec::with_capacity(n);
                for _ in 0..n {
                    call_args.push(self.pop()?);
                }
                call_args.reverse();
                self.enter_call(callee, call_args, *pc)?;
                *pc = self.last_entry_pc;
            }
            Apply => {
                let args_list = self.pop()?;
                let callee = self.pop()?;
                let call_args = crate::vmvalue::list_to_vec(args_list).ok_or_else(|| {
                    VmError::TypeError("apply requires a proper list of arguments".to_string())
                })?;
                self.enter_call(callee, call_args, *pc)?;
                *pc = self.last_entry_pc;
            }
            Ccall => {
                // Only `symbol_id` is an operand (spec.md §6); the argument
                // count travels on the data stack as the topmost value,
                // pushed by `lower::compile_ccall` right after the
                // arguments themselves.
                let symbol = expect_int(args, 0)? as u32;
                let n = expect_value_int(&self.pop()?)? as usize;
                let mut call_args = Vec::with_capacity(n);
                for _ in 0..n {
                    call_args.push(self.pop()?);
                }
                call_args.reverse();
                let callback = self
                    .callbacks
                    .get_mut(&symbol)
                    .ok_or(VmError::UnknownCallback(symbol))?;
                let result = callback(&call_args)?;
                self.stack.push(result);
            }
            Jump => {
                let delta = expect_label(args, 0)?;
                *pc = (*pc as i64 + delta) as usize;
            }
            Brz => {
                let delta = expect_label(args, 0)?;
                let target = (*pc as i64 + delta) as usize;
                let cond = self.pop()?;
                if !cond.is_truthy() {
                    *pc = target;
                }
            }
            Brnz => {
                let delta = expect_label(args, 0)?;
                let target = (*pc as i64 + delta) as usize;
                let cond = self.pop()?;
                if cond.is_truthy() {
                    *pc = target;
                }
            }
            Not => {
                let v = self.pop()?;
                self.stack.push(VmValue::Bool(!v.is_truthy()));
            }
            Mul => self.binary_numeric(|a, b| a * b, |a, b| a * b)?,
            Div => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(checked_div(a, b)?);
            }
            Add => self.binary_numeric(|a, b| a + b, |a, b| a + b)?,
            Sub => self.binary_numeric(|a, b| a - b, |a, b| a - b)?,
            Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.stack.push(VmValue::Bool(deep_equal(&a, &b)));
            }
            Less => self.binary_compare(|a, b| a < b, |a, b| a < b)?,
            Greater => self.binary_compare(|a, b| a > b, |a, b| a > b)?,
            Cons => {
                let cdr = self.pop()?;
                let car = self.pop()?;
                self.stack.push(VmValue::cons(car, cdr));
            }
            Car => {
                let v = self.pop()?;
                match v {
                    VmValue::Cons(cell) => self.stack.push(cell.head.borrow().clone()),
                    other => {
                        return Err(VmError::TypeError(format!(
                            "car expects a cons cell, got type {}",
                            other.type_tag()
                        )))
                    }
                }
            }
            Cdr => {
                let v = self.pop()?;
                match v {
                    VmValue::Cons(cell) => self.stack.push(cell.tail.borrow().clone()),
                    other => {
                        return Err(VmError::TypeError(format!(
                            "cdr expects a cons cell, got type {}",
                            other.type_tag()
                        )))
                    }
                }
            }
            SetCar => {
                let value = self.pop()?;
                let cons = self.pop()?;
                match cons {
                    VmValue::Cons(cell) => *cell.head.borrow_mut() = value,
                    _ => return Err(VmError::TypeError("set-car expects a cons cell".to_string())),
                }
            }
            SetCdr => {
                let value = self.pop()?;
                let cons = self.pop()?;
                match cons {
                    VmValue::Cons(cell) => *cell.tail.borrow_mut() = value,
                    _ => return Err(VmError::TypeError("set-cdr expects a cons cell".to_string())),
                }
            }
            Nullp => {
                let v = self.pop()?;
                self.stack.push(VmValue::Bool(v.is_nil()));
            }
            Typeof => {
                let v = self.pop()?;
                self.stack.push(VmValue::Int(v.type_tag()));
            }
            Vector => {
                let n = expect_int(args, 0)? as usize;
                let mut items = Vec::with_capacity(n);
                for _ in 0..n {
                    items.push(self.pop()?);
                }
                items.reverse();
                self.stack
                    .push(VmValue::Vector(Rc::new(RefCell::new(items))));
            }
            MakeVector => {
                let size = self.pop()?;
                let fill = self.pop()?;
                let n = expect_value_int(&size)? as usize;
                self.stack
                    .push(VmValue::Vector(Rc::new(RefCell::new(vec![fill; n]))));
            }
            GetVecElt => {
                let index = self.pop()?;
                let vector = self.pop()?;
                let i = expect_value_int(&index)? as usize;
                match vector {
                    VmValue::Vector(elems) => {
                        let elems = elems.borrow();
                        let value = elems.get(i).cloned().ok_or(VmError::OutOfBounds {
                            index: i as i64,
                            len: elems.len(),
                        })?;
                        self.stack.push(value);
                    }
                    _ => return Err(VmError::TypeError("get-vec-elt expects a vector".to_string())),
                }
            }
            SetVecElt => {
                let value = self.pop()?;
                let index = self.pop()?;
                let vector = self.pop()?;
                let i = expect_value_int(&index)? as usize;
                match vector {
                    VmValue::Vector(elems) => {
                        let mut elems = elems.borrow_mut();
                        let len = elems.len();
                        let slot = elems
                            .get_mut(i)
                            .ok_or(VmError::OutOfBounds { index: i as i64, len })?;
                        *slot = value;
                    }
                    _ => return Err(VmError::TypeError("set-vec-elt expects a vector".to_string())),
                }
            }
            MakeType => {
                let id = self.next_type_id;
                self.next_type_id += 1;
                self.stack.push(VmValue::Type(id));
            }
            MakeInstance => {
                let function = self.pop()?;
                let value = self.pop()?;
                let ty = self.pop()?;
                let type_id = match ty {
                    VmValue::Type(id) => id,
                    _ => return Err(VmError::TypeError("make-instance expects a type".to_string())),
                };
                self.stack.push(VmValue::Instance(Rc::new(Instance {
                    type_id,
                    value: Rc::new(RefCell::new(value)),
                    function: Rc::new(RefCell::new(function)),
                })));
            }
            CompositeValue => {
                let instance = self.pop()?;
                self.stack.push(expect_instance(&instance)?.value.borrow().clone());
            }
            CompositeFunction => {
                let instance = self.pop()?;
                self.stack
                    .push(expect_instance(&instance)?.function.borrow().clone());
            }
            SetCompositeValue => {
                let value = self.pop()?;
                let instance = self.pop()?;
                *expect_instance(&instance)?.value.borrow_mut() = value;
            }
            SetCompositeFunction => {
                let function = self.pop()?;
                let instance = self.pop()?;
                *expect_instance(&instance)?.function.borrow_mut() = function;
            }
            MakeString => {
                let bytes_value = self.pop()?;
                let items = crate::vmvalue::list_to_vec(bytes_value).ok_or_else(|| {
                    VmError::TypeError("make-string expects a proper list of bytes".to_string())
                })?;
                let mut bytes = Vec::with_capacity(items.len());
                for item in items {
                    bytes.push(expect_value_int(&item)? as u8);
                }
                self.stack.push(VmValue::String(VmString::from_bytes(bytes)));
            }
            Concatenate => {
                let b = self.pop()?;
                let a = self.pop()?;
                let (a, b) = (expect_string(&a)?, expect_string(&b)?);
                let mut bytes = a.as_bytes().to_vec();
                bytes.extend_from_slice(b.as_bytes());
                self.stack.push(VmValue::String(VmString::from_bytes(bytes)));
            }
            Substring => {
                let len = self.pop()?;
                let start = self.pop()?;
                let s = self.pop()?;
                let s = expect_string(&s)?;
                let start = expect_value_int(&start)? as usize;
                let len = expect_value_int(&len)? as usize;
                if start + len > s.len {
                    return Err(VmError::OutOfBounds {
                        index: (start + len) as i64,
                        len: s.len,
                    });
                }
                self.stack.push(VmValue::String(s.slice(start, len)));
            }
            Length => {
                let v = self.pop()?;
                let len = match &v {
                    VmValue::String(s) => s.len as i64,
                    VmValue::Vector(elems) => elems.borrow().len() as i64,
                    VmValue::Nil => 0,
                    VmValue::Cons(_) => crate::vmvalue::list_to_vec(v.clone())
                        .ok_or_else(|| VmError::TypeError("length expects a proper list".to_string()))?
                        .len() as i64,
                    other => {
                        return Err(VmError::TypeError(format!(
                            "length is not defined for type {}",
                            other.type_tag()
                        )))
                    }
                };
                self.stack.push(VmValue::Int(len));
            }
            SymbolString => {
                let v = self.pop()?;
                match v {
                    VmValue::Symbol(id) => self
                        .stack
                        .push(VmValue::String(VmString::from_bytes(symbols.name(id).into()))),
                    _ => return Err(VmError::TypeError("symbol-string expects a symbol".to_string())),
                }
            }
            SymbolId => {
                let v = self.pop()?;
                let s = expect_string(&v)?;
                let id = symbols.intern(s.as_str());
                self.stack.push(VmValue::Symbol(id));
            }
            Pop => {
                self.pop()?;
            }
            Return => {
                let value = self.pop()?;
                if let Some(frame) = self.frames.pop() {
                    self.stack.truncate(frame.base);
                    self.stack.push(value);
                    *pc = frame.return_pc;
                } else {
                    self.stack.push(value);
                    return Ok(true);
                }
            }
            Yield => {
                return Err(VmError::TypeError(
                    "yield requires a generator-kind function, unsupported here".to_string(),
                ))
            }
            Halt => return Ok(true),
            Label => unreachable!("labels are consumed by the assembler"),
        }

        let _ = bytecode;
        Ok(false)
    }

    /// Pushes a call frame for `callee` and records the entry pc in
    /// `self.last_entry_pc` for the caller to jump to. Kept as a method
    /// (rather than inline in `step`) so `Funcall` and `Apply` share one
    /// calling convention.
    fn enter_call(
        &mut self,
        callee: VmValue,
        call_args: Vec<VmValue>,
        return_pc: usize,
    ) -> Result<(), VmError> {
        let (entry, upvalues) = match callee {
            VmValue::Closure(c) => (c.entry, c.upvalues.clone()),
            VmValue::Function(entry) => (entry, Vec::new()),
            other => {
                return Err(VmError::TypeError(format!(
                    "value of type {} is not callable",
                    other.type_tag()
                )))
            }
        };
        let base = self.stack.len();
        for arg in call_args {
            self.stack.push(arg);
        }
        self.frames.push(CallFrame {
            base,
            return_pc,
            upvalues,
            cells: HashMap::new(),
        });
        self.last_entry_pc = entry as usize;
        Ok(())
    }

    fn binary_numeric(
        &mut self,
        int_op: impl Fn(i64, i64) -> i64,
        float_op: impl Fn(f64, f64) -> f64,
    ) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.stack.push(numeric_op(a, b, int_op, float_op)?);
        Ok(())
    }

    fn binary_compare(
        &mut self,
        int_cmp: impl Fn(i64, i64) -> bool,
        float_cmp: impl Fn(f64, f64) -> bool,
    ) -> Result<(), VmError> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (&a, &b) {
            (VmValue::Int(x), VmValue::Int(y)) => int_cmp(*x, *y),
            (VmValue::Float(_), _) | (_, VmValue::Float(_)) => {
                float_cmp(expect_value_float(&a)?, expect_value_float(&b)?)
            }
            _ => return Err(VmError::TypeError("comparison expects numbers".to_string())),
        };
        self.stack.push(VmValue::Bool(result));
        Ok(())
    }
}

impl<'a> Default for Vm<'a> {
    fn default() -> Self {
        Self::new()
    }
}

fn numeric_op(
    a: VmValue,
    b: VmValue,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<VmValue, VmError> {
    match (&a, &b) {
        (VmValue::Int(x), VmValue::Int(y)) => Ok(VmValue::Int(int_op(*x, *y))),
        _ => Ok(VmValue::Float(float_op(
            expect_value_float(&a)?,
            expect_value_float(&b)?,
        ))),
    }
}

fn checked_div(a: VmValue, b: VmValue) -> Result<VmValue, VmError> {
    match (&a, &b) {
        (VmValue::Int(_), VmValue::Int(y)) if *y == 0 => Err(VmError::DivisionByZero),
        (VmValue::Int(x), VmValue::Int(y)) => Ok(VmValue::Int(x / y)),
        _ => {
            let y = expect_value_float(&b)?;
            if y == 0.0 {
                return Err(VmError::DivisionByZero);
            }
            Ok(VmValue::Float(expect_value_float(&a)? / y))
        }
    }
}

fn deep_equal(a: &VmValue, b: &VmValue) -> bool {
    match (a, b) {
        (VmValue::Cons(x), VmValue::Cons(y)) => {
            deep_equal(&x.head.borrow(), &y.head.borrow()) && deep_equal(&x.tail.borrow(), &y.tail.borrow())
        }
        (VmValue::Vector(x), VmValue::Vector(y)) => {
            let x = x.borrow();
            let y = y.borrow();
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(p, q)| deep_equal(p, q))
        }
        (VmValue::String(x), VmValue::String(y)) => x == y,
        _ => a == b,
    }
}

fn expect_int(args: &[DecodedArg], i: usize) -> Result<i64, VmError> {
    match args.get(i) {
        Some(DecodedArg::Int(v)) => Ok(*v),
        _ => Err(VmError::TypeError(format!("expected an integer operand at position {i}"))),
    }
}

fn expect_float(args: &[DecodedArg], i: usize) -> Result<f64, VmError> {
    match args.get(i) {
        Some(DecodedArg::Float(v)) => Ok(*v),
        _ => Err(VmError::TypeError(format!("expected a float operand at position {i}"))),
    }
}

fn expect_bytes(args: &[DecodedArg], i: usize) -> Result<Vec<u8>, VmError> {
    match args.get(i) {
        Some(DecodedArg::Bytes(b)) => Ok(b.clone()),
        _ => Err(VmError::TypeError(format!("expected a bytes operand at position {i}"))),
    }
}

fn expect_slot(args: &[DecodedArg], i: usize) -> Result<u32, VmError> {
    match args.get(i) {
        Some(DecodedArg::Slot(v)) => Ok(*v),
        _ => Err(VmError::TypeError(format!("expected a slot operand at position {i}"))),
    }
}

fn expect_label(args: &[DecodedArg], i: usize) -> Result<i64, VmError> {
    match args.get(i) {
        Some(DecodedArg::Label(v)) => Ok(*v),
        _ => Err(VmError::TypeError(format!("expected a label operand at position {i}"))),
    }
}

fn expect_slots(args: &[DecodedArg], i: usize) -> Result<Vec<u32>, VmError> {
    match args.get(i) {
        Some(DecodedArg::Slots(v)) => Ok(v.clone()),
        _ => Err(VmError::TypeError(format!("expected a slots operand at position {i}"))),
    }
}

fn expect_value_int(value: &VmValue) -> Result<i64, VmError> {
    match value {
        VmValue::Int(v) => Ok(*v),
        other => Err(VmError::TypeError(format!(
            "expected an integer, got type {}",
            other.type_tag()
        ))),
    }
}

fn expect_value_float(value: &VmValue) -> Result<f64, VmError> {
    match value {
        VmValue::Int(v) => Ok(*v as f64),
        VmValue::Float(v) => Ok(*v),
        other => Err(VmError::TypeError(format!(
            "expected a number, got type {}",
            other.type_tag()
        ))),
    }
}

fn expect_string(value: &VmValue) -> Result<&VmString, VmError> {
    match value {
        VmValue::String(s) => Ok(s),
        other => Err(VmError::TypeError(format!(
            "expected a string, got type {}",
            other.type_tag()
        ))),
    }
}

fn expect_instance(value: &VmValue) -> Result<&Instance, VmError> {
    match value {
        VmValue::Instance(i) => Ok(i),
        other => Err(VmError::TypeError(format!(
            "expected an instance, got type {}",
            other.type_tag()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::assemble;
    use crate::instruction::{Arg, Instruction, Opcode};
    use crate::span::Span;

    fn simple(op: Opcode, args: Vec<Arg>) -> Instruction {
        Instruction::new(op, args, Span::dummy())
    }

    #[test]
    fn pushes_and_returns_an_integer_literal() {
        let program = vec![
            simple(Opcode::PushInteger, vec![Arg::Int(42)]),
            simple(Opcode::Halt, vec![]),
        ];
        let bytes = assemble(&program).unwrap();
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        let result = vm.execute(&bytes, &mut symbols).unwrap();
        assert_eq!(result, VmValue::Int(42));
    }

    #[test]
    fn add_pops_two_and_pushes_the_sum() {
        let program = vec![
            simple(Opcode::PushInteger, vec![Arg::Int(2)]),
            simple(Opcode::PushInteger, vec![Arg::Int(3)]),
            simple(Opcode::Add, vec![]),
            simple(Opcode::Halt, vec![]),
        ];
        let bytes = assemble(&program).unwrap();
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(vm.execute(&bytes, &mut symbols).unwrap(), VmValue::Int(5));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let program = vec![
            simple(Opcode::PushInteger, vec![Arg::Int(1)]),
            simple(Opcode::PushInteger, vec![Arg::Int(0)]),
            simple(Opcode::Div, vec![]),
        ];
        let bytes = assemble(&program).unwrap();
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(vm.execute(&bytes, &mut symbols), Err(VmError::DivisionByZero));
    }

    #[test]
    fn cons_car_cdr_round_trip() {
        let program = vec![
            simple(Opcode::PushInteger, vec![Arg::Int(1)]),
            simple(Opcode::PushInteger, vec![Arg::Int(2)]),
            simple(Opcode::Cons, vec![]),
            simple(Opcode::Car, vec![]),
            simple(Opcode::Halt, vec![]),
        ];
        let bytes = assemble(&program).unwrap();
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(vm.execute(&bytes, &mut symbols).unwrap(), VmValue::Int(1));
    }

    #[test]
    fn forward_branch_skips_the_true_arm() {
        // if false { push 1 } else { push 2 }
        let program = vec![
            simple(Opcode::PushBooleanFalse, vec![]),
            simple(Opcode::Brz, vec![Arg::Label(0)]),
            simple(Opcode::PushInteger, vec![Arg::Int(1)]),
            simple(Opcode::Jump, vec![Arg::Label(1)]),
            Instruction::new(Opcode::Label, vec![Arg::Label(0)], Span::dummy()),
            simple(Opcode::PushInteger, vec![Arg::Int(2)]),
            Instruction::new(Opcode::Label, vec![Arg::Label(1)], Span::dummy()),
            simple(Opcode::Halt, vec![]),
        ];
        let bytes = assemble(&program).unwrap();
        let mut vm = Vm::new();
        let mut symbols = SymbolTable::new();
        assert_eq!(vm.execute(&bytes, &mut symbols).unwrap(), VmValue::Int(2));
    }

    #[test]
    fn ccall_invokes_the_registered_callback() {
        let program = vec![
            simple(Opcode::PushInteger, vec![Arg::Int(7)]),
            simple(Opcode::PushInteger, vec![Arg::Int(1)]), // argc, read off the stack
            simple(Opcode::Ccall, vec![Arg::Int(0)]),
            simple(Opcode::Halt, vec![]),
        ];
        let bytes = assemble(&program).unwrap();
        let mut vm = Vm::new();
        vm.link_c_function(
            0,
            Box::new(|args| match args[0] {
                VmValue::Int(n) => Ok(VmValue::Int(n + 1)),
                _ => panic!("expected an integer argument"),
            }),
        );
        let mut symbols = SymbolTable::new();
        assert_eq!(vm.execute(&bytes, &mut symbols).unwrap(), VmValue::Int(8));
    }
}
