//! Disassembler: renders an assembled byte stream back to text (spec.md
//! §4.10). Decodes through [`crate::instruction::decode_one`], the same
//! opcode/width/operand-shape table the assembler emits from, so the two
//! can never silently disagree about the format.

use crate::instruction::{decode_one, opcode_name, DecodeError, DecodedArg};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub struct DisasmError {
    pub offset: usize,
}

impl From<DecodeError> for DisasmError {
    fn from(e: DecodeError) -> Self {
        DisasmError { offset: e.0 }
    }
}

impl std::fmt::Display for DisasmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "could not decode an instruction at byte offset {}", self.offset)
    }
}

impl std::error::Error for DisasmError {}

/// One decoded instruction, for callers that want structured access rather
/// than the rendered text (e.g. a future stepping debugger).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedInstruction {
    pub offset: usize,
    pub mnemonic: &'static str,
    pub operands: Vec<String>,
}

fn render(arg: &DecodedArg) -> String {
    match arg {
        DecodedArg::Int(v) => v.to_string(),
        DecodedArg::Slot(v) => v.to_string(),
        DecodedArg::Label(v) => format!("{v:+}"),
        DecodedArg::Float(v) => v.to_string(),
        DecodedArg::Bytes(bytes) => format!("{:?}", String::from_utf8_lossy(bytes)),
        DecodedArg::Slots(elems) => format!(
            "[{}]",
            elems.iter().map(u32::to_string).collect::<Vec<_>>().join(" ")
        ),
    }
}

pub fn decode(bytes: &[u8]) -> Result<Vec<DecodedInstruction>, DisasmError> {
    let mut pos = 0;
    let mut out = Vec::new();
    while pos < bytes.len() {
        let offset = pos;
        let (op, args) = decode_one(bytes, &mut pos)?;
        out.push(DecodedInstruction {
            offset,
            mnemonic: opcode_name(op),
            operands: args.iter().map(render).collect(),
        });
    }
    Ok(out)
}

/// Renders `bytes` as one line per instruction: `<offset>: <mnemonic> <operands...>`.
pub fn disassemble(bytes: &[u8]) -> Result<String, DisasmError> {
    let decoded = decode(bytes)?;
    let mut out = String::new();
    for instr in decoded {
        let _ = write!(out, "{:>6}: {}", instr.offset, instr.mnemonic);
        for operand in &instr.operands {
            let _ = write!(out, " {operand}");
        }
        out.push('\n');
    }
    Ok(out)
}
