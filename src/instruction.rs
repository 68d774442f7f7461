//! Instruction objects: the assembler's input format (spec.md §3, §4.6).
//!
//! An instruction is an opcode tag plus an ordered list of argument cells.
//! Width (`.8`/`.16`/`.32`) is *not* baked into the opcode here — per the
//! REDESIGN FLAGS in spec.md §9 ("format-descriptor-driven disassembler...
//! replace with a table of typed operand-kind lists"), width is a property
//! the assembler computes once label offsets are known, not something the
//! lowerer decides up front.

use crate::scope::UpvalueSource;
use crate::span::Span;

pub type LabelId = u32;

/// Packs an [`UpvalueSource`] into a single `u32` for the fixed-width
/// `Slots` element carried by `push-closure`/`push-va-closure` (the low bit
/// is the tag, the remaining bits are the index).
pub fn encode_upvalue_source(source: UpvalueSource) -> u32 {
    match source {
        UpvalueSource::Local(i) => i << 1,
        UpvalueSource::Upvalue(i) => (i << 1) | 1,
    }
}

pub fn decode_upvalue_source(encoded: u32) -> UpvalueSource {
    if encoded & 1 == 1 {
        UpvalueSource::Upvalue(encoded >> 1)
    } else {
        UpvalueSource::Local(encoded >> 1)
    }
}

/// Opcode tags, matching the family list enumerated in spec.md §6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Nop,
    PushString,
    PushSymbol,
    PushBooleanFalse,
    PushBooleanTrue,
    PushInteger,
    PushDoubleFloat,
    PushIndex,
    PushUpvalue,
    PushClosure,
    PushVaClosure,
    PushGlobal,
    SetUpvalue,
    SetStatic,
    Funcall,
    ReleaseUpvalues,
    Apply,
    Ccall,
    Jump,
    Brz,
    Brnz,
    Move,
    Not,
    Mul,
    Div,
    Add,
    Sub,
    Equal,
    Less,
    Greater,
    Cons,
    Car,
    Cdr,
    SetCar,
    SetCdr,
    Nullp,
    Typeof,
    Vector,
    MakeVector,
    GetVecElt,
    SetVecElt,
    MakeType,
    MakeInstance,
    CompositeValue,
    CompositeFunction,
    SetCompositeValue,
    SetCompositeFunction,
    MakeString,
    Concatenate,
    Substring,
    Length,
    SymbolString,
    SymbolId,
    Pop,
    Return,
    Yield,
    Halt,
    Nil,
    /// Pseudo-opcode: marks a label's position. Removed by the assembler
    /// once label offsets are resolved; never appears in emitted bytecode.
    Label,
}

/// One operand cell. Label references are resolved to a signed byte offset
/// by the assembler; everything else is already in its final form.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// A plain integer operand (counts, symbol ids, arities).
    Int(i64),
    /// A stack slot / local index operand.
    Slot(u32),
    /// An unresolved jump/branch/closure target.
    Label(LabelId),
    /// A raw byte payload (string contents), length-prefixed by the
    /// assembler using the instruction's chosen width.
    Bytes(Vec<u8>),
    /// An IEEE-754 double, always emitted as a fixed 8 bytes.
    Float(f64),
    /// A vector of slot indices (e.g. upvalue lists), each emitted as a
    /// fixed 4-byte element regardless of the instruction's chosen width.
    Slots(Vec<u32>),
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Opcode,
    pub args: Vec<Arg>,
    pub span: Span,
}

impl Instruction {
    pub fn new(op: Opcode, args: Vec<Arg>, span: Span) -> Self {
        Self { op, args, span }
    }

    pub fn simple(op: Opcode, span: Span) -> Self {
        Self::new(op, Vec::new(), span)
    }
}

/// The kind of each operand cell an opcode carries, in order. Shared by the
/// assembler's emitter and the disassembler's decoder so the two can never
/// drift apart (spec.md §4.6, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Int,
    Slot,
    Label,
    Bytes,
    Float,
    Slots,
}

/// Every opcode in declaration order, used to derive a stable base number
/// (`base * 3 + width_index` is the emitted byte) and to round-trip a byte
/// back to its `Opcode`.
const OPCODE_TABLE: &[Opcode] = &[
    Opcode::Nop,
    Opcode::PushString,
    Opcode::PushSymbol,
    Opcode::PushBooleanFalse,
    Opcode::PushBooleanTrue,
    Opcode::PushInteger,
    Opcode::PushDoubleFloat,
    Opcode::PushIndex,
    Opcode::PushUpvalue,
    Opcode::PushClosure,
    Opcode::PushVaClosure,
    Opcode::PushGlobal,
    Opcode::SetUpvalue,
    Opcode::SetStatic,
    Opcode::Funcall,
    Opcode::ReleaseUpvalues,
    Opcode::Apply,
    Opcode::Ccall,
    Opcode::Jump,
    Opcode::Brz,
    Opcode::Brnz,
    Opcode::Move,
    Opcode::Not,
    Opcode::Mul,
    Opcode::Div,
    Opcode::Add,
    Opcode::Sub,
    Opcode::Equal,
    Opcode::Less,
    Opcode::Greater,
    Opcode::Cons,
    Opcode::Car,
    Opcode::Cdr,
    Opcode::SetCar,
    Opcode::SetCdr,
    Opcode::Nullp,
    Opcode::Typeof,
    Opcode::Vector,
    Opcode::MakeVector,
    Opcode::GetVecElt,
    Opcode::SetVecElt,
    Opcode::MakeType,
    Opcode::MakeInstance,
    Opcode::CompositeValue,
    Opcode::CompositeFunction,
    Opcode::SetCompositeValue,
    Opcode::SetCompositeFunction,
    Opcode::MakeString,
    Opcode::Concatenate,
    Opcode::Substring,
    Opcode::Length,
    Opcode::SymbolString,
    Opcode::SymbolId,
    Opcode::Pop,
    Opcode::Return,
    Opcode::Yield,
    Opcode::Halt,
    Opcode::Nil,
];

pub fn opcode_base(op: Opcode) -> u8 {
    OPCODE_TABLE
        .iter()
        .position(|&o| o == op)
        .expect("Label has no base; every other opcode is in OPCODE_TABLE") as u8
}

pub fn opcode_from_base(base: u8) -> Option<Opcode> {
    OPCODE_TABLE.get(base as usize).copied()
}

pub fn opcode_name(op: Opcode) -> &'static str {
    match op {
        Opcode::Nop => "nop",
        Opcode::PushString => "push-string",
        Opcode::PushSymbol => "push-symbol",
        Opcode::PushBooleanFalse => "push-boolean-false",
        Opcode::PushBooleanTrue => "push-boolean-true",
        Opcode::PushInteger => "push-integer",
        Opcode::PushDoubleFloat => "push-double-float",
        Opcode::PushIndex => "push-index",
        Opcode::PushUpvalue => "push-upvalue",
        Opcode::PushClosure => "push-closure",
        Opcode::PushVaClosure => "push-va-closure",
        Opcode::PushGlobal => "push-global",
        Opcode::SetUpvalue => "set-upvalue",
        Opcode::SetStatic => "set-static",
        Opcode::Funcall => "funcall",
        Opcode::ReleaseUpvalues => "release-upvalues",
        Opcode::Apply => "apply",
        Opcode::Ccall => "ccall",
        Opcode::Jump => "jump",
        Opcode::Brz => "brz",
        Opcode::Brnz => "brnz",
        Opcode::Move => "move",
        Opcode::Not => "not",
        Opcode::Mul => "mul",
        Opcode::Div => "div",
        Opcode::Add => "add",
        Opcode::Sub => "sub",
        Opcode::Equal => "equal",
        Opcode::Less => "less",
        Opcode::Greater => "greater",
        Opcode::Cons => "cons",
        Opcode::Car => "car",
        Opcode::Cdr => "cdr",
        Opcode::SetCar => "set-car",
        Opcode::SetCdr => "set-cdr",
        Opcode::Nullp => "nullp",
        Opcode::Typeof => "typeof",
        Opcode::Vector => "vector",
        Opcode::MakeVector => "make-vector",
        Opcode::GetVecElt => "get-vec-elt",
        Opcode::SetVecElt => "set-vec-elt",
        Opcode::MakeType => "make-type",
        Opcode::MakeInstance => "make-instance",
        Opcode::CompositeValue => "composite-value",
        Opcode::CompositeFunction => "composite-function",
        Opcode::SetCompositeValue => "set-composite-value",
        Opcode::SetCompositeFunction => "set-composite-function",
        Opcode::MakeString => "make-string",
        Opcode::Concatenate => "concatenate",
        Opcode::Substring => "substring",
        Opcode::Length => "length",
        Opcode::SymbolString => "symbol-string",
        Opcode::SymbolId => "symbol-id",
        Opcode::Pop => "pop",
        Opcode::Return => "return",
        Opcode::Yield => "yield",
        Opcode::Halt => "halt",
        Opcode::Nil => "nil",
        Opcode::Label => "label",
    }
}

/// The operand shape for each opcode, in the order the assembler writes
/// them and the disassembler must read them back.
pub fn arg_shape(op: Opcode) -> &'static [ArgKind] {
    use ArgKind::*;
    use Opcode::*;
    match op {
        Nop | PushBooleanFalse | PushBooleanTrue | Apply | Not | Mul | Div | Add | Sub | Equal
        | Less | Greater | Cons | Car | Cdr | SetCar | SetCdr | Nullp | Typeof | MakeVector
        | GetVecElt | SetVecElt | MakeType | MakeInstance | CompositeValue | CompositeFunction
        | SetCompositeValue | SetCompositeFunction | MakeString | Concatenate | Substring
        | Length | SymbolString | SymbolId | Pop | Return | Yield | Halt | Nil => &[],
        PushString => &[Bytes],
        PushSymbol => &[Int],
        PushInteger => &[Int],
        PushDoubleFloat => &[Float],
        PushIndex => &[Slot],
        PushUpvalue => &[Slot],
        PushClosure | PushVaClosure => &[Label, Int, Int, Slots],
        PushGlobal => &[Slot],
        // `value_slot, uv_index`: reads the local at `value_slot` (no pop)
        // and stores it into upvalue `uv_index`, mirroring `Move`'s
        // non-popping local-to-local convention rather than the spec's
        // literal `slot:1 uv:{1,2,4}` mixed-width layout (see DESIGN.md).
        SetUpvalue => &[Slot, Slot],
        // `value_slot, global_slot`: same non-popping read as `SetUpvalue`,
        // written to the globals table. Forced to the narrowest width by
        // the assembler (see `assemble::required_width`), matching the
        // spec's `.8`-only family for this opcode.
        SetStatic => &[Slot, Slot],
        Funcall => &[Int],
        ReleaseUpvalues => &[Slots],
        // `symbol_id` only — the single operand the spec's `ccall.{8,16,32}
        // symbol_id:{1,2,4}` family declares. Argument count travels on the
        // data stack instead of as a second operand (see `lower::compile_ccall`).
        Ccall => &[Int],
        Jump | Brz | Brnz => &[Label],
        Move => &[Slot, Slot],
        Vector => &[Int],
        Label => &[Label],
    }
}

/// One decoded operand value, typed per its [`ArgKind`]. `Label` decodes to
/// a signed byte offset relative to the end of the instruction it's
/// attached to; the reader adds it to its own already-advanced position to
/// find the target.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedArg {
    Int(i64),
    Slot(u32),
    Label(i64),
    Bytes(Vec<u8>),
    Float(f64),
    Slots(Vec<u32>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError(pub usize);

fn read_signed(bytes: &[u8], pos: &mut usize, width: usize) -> Result<i64, DecodeError> {
    if *pos + width > bytes.len() {
        return Err(DecodeError(*pos));
    }
    let slice = &bytes[*pos..*pos + width];
    *pos += width;
    Ok(match width {
        1 => slice[0] as i8 as i64,
        2 => i16::from_le_bytes(slice.try_into().unwrap()) as i64,
        4 => i32::from_le_bytes(slice.try_into().unwrap()) as i64,
        _ => unreachable!("widths are always 1, 2, or 4"),
    })
}

fn read_unsigned(bytes: &[u8], pos: &mut usize, width: usize) -> Result<u32, DecodeError> {
    if *pos + width > bytes.len() {
        return Err(DecodeError(*pos));
    }
    let slice = &bytes[*pos..*pos + width];
    *pos += width;
    Ok(match width {
        1 => slice[0] as u32,
        2 => u16::from_le_bytes(slice.try_into().unwrap()) as u32,
        4 => u32::from_le_bytes(slice.try_into().unwrap()),
        _ => unreachable!("widths are always 1, 2, or 4"),
    })
}

/// Decodes one instruction at `*pos`, advancing `*pos` past it. Returns the
/// opcode and its operands in declaration order.
pub fn decode_one(
    bytes: &[u8],
    pos: &mut usize,
) -> Result<(Opcode, Vec<DecodedArg>), DecodeError> {
    if *pos >= bytes.len() {
        return Err(DecodeError(*pos));
    }
    let byte = bytes[*pos];
    *pos += 1;
    let base = byte / 3;
    let width = match byte % 3 {
        0 => 1,
        1 => 2,
        _ => 4,
    };
    let op = opcode_from_base(base).ok_or(DecodeError(*pos - 1))?;
    let mut args = Vec::new();
    for kind in arg_shape(op) {
        let arg = match kind {
            ArgKind::Int => DecodedArg::Int(read_signed(bytes, pos, width)?),
            ArgKind::Slot => DecodedArg::Slot(read_unsigned(bytes, pos, width)?),
            ArgKind::Label => DecodedArg::Label(read_signed(bytes, pos, width)?),
            ArgKind::Float => {
                if *pos + 8 > bytes.len() {
                    return Err(DecodeError(*pos));
                }
                let slice = &bytes[*pos..*pos + 8];
                *pos += 8;
                DecodedArg::Float(f64::from_le_bytes(slice.try_into().unwrap()))
            }
            ArgKind::Bytes => {
                let len = read_unsigned(bytes, pos, width)? as usize;
                if *pos + len > bytes.len() {
                    return Err(DecodeError(*pos));
                }
                let slice = bytes[*pos..*pos + len].to_vec();
                *pos += len;
                DecodedArg::Bytes(slice)
            }
            ArgKind::Slots => {
                let count = read_unsigned(bytes, pos, width)? as usize;
                let mut elems = Vec::with_capacity(count);
                for _ in 0..count {
                    elems.push(read_unsigned(bytes, pos, 4)?);
                }
                DecodedArg::Slots(elems)
            }
        };
        args.push(arg);
    }
    Ok((op, args))
}
