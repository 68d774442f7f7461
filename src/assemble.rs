//! Assembler: turns a flat list of [`Instruction`] objects (with unresolved
//! label operands) into a byte stream (spec.md §4.6).
//!
//! Each opcode family has three width variants (`.8`/`.16`/`.32`); the
//! assembler doesn't know which one a generator "wants" because it doesn't
//! know yet how far away a label will land. It starts every instruction at
//! the narrowest width and repeatedly recomputes byte offsets, widening any
//! instruction whose operand no longer fits, until a pass makes no further
//! changes (or gives up after a bounded number of passes — real programs
//! converge in at most a couple of widenings per jump).
//!
//! Label operands are encoded as signed byte offsets *relative to the
//! instruction's end* (spec.md §4.6), not absolute positions — the same
//! convention a PC-relative jump uses: the VM adds the decoded offset to
//! its already-advanced program counter.

use crate::error::AssembleError;
use crate::instruction::{opcode_base, Arg, Instruction, LabelId, Opcode};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Width {
    W1,
    W2,
    W4,
}

impl Width {
    fn size(self) -> usize {
        match self {
            Width::W1 => 1,
            Width::W2 => 2,
            Width::W4 => 4,
        }
    }

    fn fits_signed(self, value: i64) -> bool {
        match self {
            Width::W1 => i8::try_from(value).is_ok(),
            Width::W2 => i16::try_from(value).is_ok(),
            Width::W4 => i32::try_from(value).is_ok(),
        }
    }

    fn fits_unsigned(self, value: i64) -> bool {
        if value < 0 {
            return false;
        }
        match self {
            Width::W1 => u8::try_from(value).is_ok(),
            Width::W2 => u16::try_from(value).is_ok(),
            Width::W4 => u32::try_from(value).is_ok(),
        }
    }
}

const MAX_PASSES: usize = 64;

/// Assembles `instructions` into a byte stream. `Opcode::Label` entries mark
/// positions and are consumed here, never emitted.
pub fn assemble(instructions: &[Instruction]) -> Result<Vec<u8>, AssembleError> {
    let mut real: Vec<&Instruction> = Vec::new();
    let mut label_after: HashMap<LabelId, usize> = HashMap::new();
    for instr in instructions {
        if instr.op == Opcode::Label {
            let label = match instr.args.first() {
                Some(Arg::Label(l)) => *l,
                _ => panic!("Label instruction without a label argument"),
            };
            label_after.insert(label, real.len());
        } else {
            real.push(instr);
        }
    }
    check_labels_defined(&real, &label_after)?;

    let mut widths = vec![Width::W1; real.len()];

    for _pass in 0..MAX_PASSES {
        let offsets = compute_offsets(&real, &widths);
        let label_targets = resolve_label_targets(&label_after, &offsets);

        let mut changed = false;
        for (i, instr) in real.iter().enumerate() {
            let end_of_this = offsets[i + 1] as i64;
            let required = required_width(instr, &label_targets, end_of_this)?;
            if required > widths[i] {
                widths[i] = required;
                changed = true;
            }
        }

        if !changed {
            return Ok(emit(&real, &widths, &offsets, &label_targets));
        }
    }

    Err(AssembleError::DidNotConverge(MAX_PASSES))
}

fn check_labels_defined(
    real: &[&Instruction],
    label_after: &HashMap<LabelId, usize>,
) -> Result<(), AssembleError> {
    for instr in real {
        for arg in &instr.args {
            if let Arg::Label(l) = arg {
                if !label_after.contains_key(l) {
                    return Err(AssembleError::UndefinedLabel(*l));
                }
            }
        }
    }
    Ok(())
}

/// Absolute byte position each label resolves to, given the current widths.
fn resolve_label_targets(
    label_after: &HashMap<LabelId, usize>,
    offsets: &[usize],
) -> HashMap<LabelId, i64> {
    label_after
        .iter()
        .map(|(&label, &index)| {
            let offset = *offsets.get(index).unwrap_or_else(|| offsets.last().unwrap_or(&0));
            (label, offset as i64)
        })
        .collect()
}

fn compute_offsets(real: &[&Instruction], widths: &[Width]) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(real.len() + 1);
    let mut pos = 0usize;
    for (instr, &width) in real.iter().zip(widths) {
        offsets.push(pos);
        pos += instruction_size(instr, width);
    }
    offsets.push(pos);
    offsets
}

fn instruction_size(instr: &Instruction, width: Width) -> usize {
    let mut size = 1; // opcode byte
    for arg in &instr.args {
        size += match arg {
            Arg::Int(_) | Arg::Slot(_) | Arg::Label(_) | Arg::Bytes(_) => width.size(),
            Arg::Float(_) => 8,
            Arg::Slots(elems) => width.size() + elems.len() * 4,
        };
        if let Arg::Bytes(bytes) = arg {
            size += bytes.len();
        }
    }
    size
}

/// The narrowest width whose operands (after resolving this instruction's
/// label arguments to a delta from `end_of_this`) all fit.
fn required_width(
    instr: &Instruction,
    label_targets: &HashMap<LabelId, i64>,
    end_of_this: i64,
) -> Result<Width, AssembleError> {
    // spec.md §6 defines `pushGlobal` and `setStatic` as single-width
    // (`.8`-only) families, unlike every other opcode's `.8/.16/.32` trio.
    // `pushGlobal` beyond 256 globals silently truncates rather than
    // widening (spec.md §9, explicitly named as a kept behavior rather
    // than a bug to fix — see DESIGN.md); `setStatic` is held to the same
    // single-width rule for the same reason.
    if matches!(instr.op, Opcode::PushGlobal | Opcode::SetStatic) {
        return Ok(Width::W1);
    }

    let mut needed = Width::W1;
    for arg in &instr.args {
        let width = match arg {
            Arg::Int(v) => smallest_signed(*v)?,
            Arg::Slot(v) => smallest_unsigned(*v as i64)?,
            Arg::Label(l) => {
                let target = label_targets.get(l).copied().unwrap_or(0);
                smallest_signed(target - end_of_this)?
            }
            Arg::Bytes(bytes) => smallest_unsigned(bytes.len() as i64)?,
            Arg::Float(_) => Width::W1,
            Arg::Slots(elems) => smallest_unsigned(elems.len() as i64)?,
        };
        if width > needed {
            needed = width;
        }
    }
    Ok(needed)
}

fn smallest_signed(value: i64) -> Result<Width, AssembleError> {
    for width in [Width::W1, Width::W2, Width::W4] {
        if width.fits_signed(value) {
            return Ok(width);
        }
    }
    Err(AssembleError::OperandTooLarge(value))
}

fn smallest_unsigned(value: i64) -> Result<Width, AssembleError> {
    for width in [Width::W1, Width::W2, Width::W4] {
        if width.fits_unsigned(value) {
            return Ok(width);
        }
    }
    Err(AssembleError::OperandTooLarge(value))
}

fn emit(
    real: &[&Instruction],
    widths: &[Width],
    offsets: &[usize],
    label_targets: &HashMap<LabelId, i64>,
) -> Vec<u8> {
    let total = *offsets.last().unwrap_or(&0);
    let mut out = Vec::with_capacity(total);

    for (i, (instr, &width)) in real.iter().zip(widths).enumerate() {
        let end_of_this = offsets[i + 1] as i64;
        let width_index = match width {
            Width::W1 => 0u8,
            Width::W2 => 1u8,
            Width::W4 => 2u8,
        };
        out.push(opcode_base(instr.op) * 3 + width_index);
        for arg in &instr.args {
            match arg {
                Arg::Int(v) => write_signed(&mut out, *v, width),
                Arg::Slot(v) => write_unsigned(&mut out, *v as i64, width),
                Arg::Label(l) => {
                    let target = label_targets.get(l).copied().unwrap_or(0);
                    write_signed(&mut out, target - end_of_this, width)
                }
                Arg::Bytes(bytes) => {
                    write_unsigned(&mut out, bytes.len() as i64, width);
                    out.extend_from_slice(bytes);
                }
                Arg::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
                Arg::Slots(elems) => {
                    write_unsigned(&mut out, elems.len() as i64, width);
                    for slot in elems {
                        out.extend_from_slice(&slot.to_le_bytes());
                    }
                }
            }
        }
    }
    out
}

fn write_signed(out: &mut Vec<u8>, value: i64, width: Width) {
    match width {
        Width::W1 => out.push(value as i8 as u8),
        Width::W2 => out.extend_from_slice(&(value as i16).to_le_bytes()),
        Width::W4 => out.extend_from_slice(&(value as i32).to_le_bytes()),
    }
}

fn write_unsigned(out: &mut Vec<u8>, value: i64, width: Width) {
    match width {
        Width::W1 => out.push(value as u8),
        Width::W2 => out.extend_from_slice(&(value as u16).to_le_bytes()),
        Width::W4 => out.extend_from_slice(&(value as u32).to_le_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Span;

    fn simple(op: Opcode, args: Vec<Arg>) -> Instruction {
        Instruction::new(op, args, Span::dummy())
    }

    #[test]
    fn halt_assembles_to_a_single_opcode_byte() {
        let bytes = assemble(&[simple(Opcode::Halt, vec![])]).unwrap();
        assert_eq!(bytes.len(), 1);
        assert_eq!(bytes[0], opcode_base(Opcode::Halt) * 3);
    }

    #[test]
    fn push_integer_then_pop_round_trips_through_width_selection() {
        let program = vec![
            simple(Opcode::PushInteger, vec![Arg::Int(5)]),
            simple(Opcode::Pop, vec![]),
        ];
        let bytes = assemble(&program).unwrap();
        // opcode byte + 1-byte operand, then opcode byte.
        assert_eq!(bytes.len(), 3);
    }

    #[test]
    fn undefined_label_is_an_error() {
        let program = vec![simple(Opcode::Jump, vec![Arg::Label(99)])];
        assert_eq!(assemble(&program), Err(AssembleError::UndefinedLabel(99)));
    }

    #[test]
    fn forward_jump_past_127_bytes_widens_its_own_operand() {
        let mut program = vec![simple(Opcode::Jump, vec![Arg::Label(0)])];
        for _ in 0..200 {
            program.push(simple(Opcode::Nop, vec![]));
        }
        program.push(Instruction::new(
            Opcode::Label,
            vec![Arg::Label(0)],
            Span::dummy(),
        ));
        let bytes = assemble(&program).unwrap();
        let jump_opcode = bytes[0];
        assert_ne!(jump_opcode % 3, 0, "jump operand should have widened");
    }

    #[test]
    fn short_forward_jump_stays_at_8_bits() {
        let program = vec![
            simple(Opcode::Jump, vec![Arg::Label(0)]),
            simple(Opcode::Nop, vec![]),
            Instruction::new(Opcode::Label, vec![Arg::Label(0)], Span::dummy()),
        ];
        let bytes = assemble(&program).unwrap();
        assert_eq!(bytes[0] % 3, 0, "short jump should stay 8-bit");
        assert_eq!(bytes.len(), 3); // jump opcode + 1-byte operand + nop
    }

    #[test]
    fn backward_jump_resolves_to_a_negative_delta() {
        let program = vec![
            Instruction::new(Opcode::Label, vec![Arg::Label(0)], Span::dummy()),
            simple(Opcode::Nop, vec![]),
            simple(Opcode::Jump, vec![Arg::Label(0)]),
        ];
        let bytes = assemble(&program).unwrap();
        // nop (1 byte) + jump opcode + 1-byte operand; operand should be -2
        // (back past the jump instruction itself and the nop).
        assert_eq!(bytes.len(), 3);
        assert_eq!(bytes[2] as i8, -2);
    }
}
