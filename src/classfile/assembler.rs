use std::collections::{BTreeMap, BTreeSet};

use crate::descriptor::argument_slots;
use crate::error::{ConversionError, Result};
use crate::ir::LabelId;
use crate::lower::{CodeSink, Insn, InsnList, TryCatch};
use crate::opcodes::*;

use super::pool::ConstantPool;

const MAX_CODE_LENGTH: usize = 65_535;

/// Assembled `Code` attribute contents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Code {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) bytes: Vec<u8>,
    pub(crate) exception_table: Vec<ExceptionEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ExceptionEntry {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    pub(crate) catch_type: u16,
}

/// Byte-level code sink. Instructions are buffered until [`Assembler::finish`].
pub(crate) struct Assembler<'p> {
    pool: &'p mut ConstantPool,
    list: InsnList,
}

impl CodeSink for Assembler<'_> {
    fn emit(&mut self, insn: Insn) {
        self.list.emit(insn);
    }

    fn try_catch(&mut self, entry: TryCatch) {
        self.list.try_catch(entry);
    }

    fn max_locals(&mut self, count: u16) {
        self.list.max_locals(count);
    }
}

/// Branch operand to patch once every label position is known.
struct Fixup {
    /// Position of the branching instruction.
    pc: usize,
    /// Position of the offset operand.
    at: usize,
    target: LabelId,
    wide: bool,
}

impl<'p> Assembler<'p> {
    pub(crate) fn new(pool: &'p mut ConstantPool) -> Self {
        Self {
            pool,
            list: InsnList::default(),
        }
    }

    /// Encodes the buffered instructions and resolves labels, pool operands and `max_stack`.
    pub(crate) fn finish(self) -> Result<Code> {
        let Assembler { pool, list } = self;
        let mut bytes = Vec::new();
        let mut labels: BTreeMap<LabelId, usize> = BTreeMap::new();
        let mut fixups = Vec::new();
        for insn in &list.insns {
            encode(insn, pool, &mut bytes, &mut labels, &mut fixups)?;
        }
        if bytes.len() > MAX_CODE_LENGTH {
            return Err(ConversionError::MethodTooLarge { size: bytes.len() });
        }
        for fixup in fixups {
            let target = position(&labels, fixup.target)?;
            let offset = target as i64 - fixup.pc as i64;
            if fixup.wide {
                let offset = offset as i32;
                bytes[fixup.at..fixup.at + 4].copy_from_slice(&offset.to_be_bytes());
            } else {
                let short = i16::try_from(offset).map_err(|_| {
                    ConversionError::BranchOutOfRange {
                        pc: fixup.pc,
                        offset,
                    }
                })?;
                bytes[fixup.at..fixup.at + 2].copy_from_slice(&short.to_be_bytes());
            }
        }
        let mut exception_table = Vec::with_capacity(list.handlers.len());
        for entry in &list.handlers {
            let start_pc = position(&labels, entry.start)? as u16;
            let end_pc = position(&labels, entry.end)? as u16;
            if start_pc >= end_pc {
                continue;
            }
            let catch_type = match &entry.catch {
                Some(class) => pool.class(class)?,
                None => 0,
            };
            exception_table.push(ExceptionEntry {
                start_pc,
                end_pc,
                handler_pc: position(&labels, entry.handler)? as u16,
                catch_type,
            });
        }
        let handlers: BTreeSet<LabelId> = list.handlers.iter().map(|entry| entry.handler).collect();
        Ok(Code {
            max_stack: max_stack(&list.insns, &handlers)?,
            max_locals: list.max_locals,
            bytes,
            exception_table,
        })
    }
}

fn position(labels: &BTreeMap<LabelId, usize>, label: LabelId) -> Result<usize> {
    labels
        .get(&label)
        .copied()
        .ok_or_else(|| ConversionError::Invariant {
            pass: "assemble",
            message: format!("label {} was never emitted", label.0),
        })
}

fn push_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn encode(
    insn: &Insn,
    pool: &mut ConstantPool,
    bytes: &mut Vec<u8>,
    labels: &mut BTreeMap<LabelId, usize>,
    fixups: &mut Vec<Fixup>,
) -> Result<()> {
    let pc = bytes.len();
    match insn {
        Insn::Label(label) => {
            labels.insert(*label, pc);
        }
        Insn::Op(op) => bytes.push(*op),
        Insn::Push { op, value } => {
            bytes.push(*op);
            if *op == BIPUSH {
                bytes.push(*value as i8 as u8);
            } else {
                bytes.extend_from_slice(&value.to_be_bytes());
            }
        }
        Insn::Ldc(constant) => {
            let index = pool.constant(constant)?;
            if constant.is_wide() {
                bytes.push(LDC2_W);
                push_u16(bytes, index);
            } else if let Ok(index) = u8::try_from(index) {
                bytes.extend_from_slice(&[LDC, index]);
            } else {
                bytes.push(LDC_W);
                push_u16(bytes, index);
            }
        }
        Insn::Var { op, slot } => {
            let short_base = if (ILOAD..=ALOAD).contains(op) {
                ILOAD_0 + (op - ILOAD) * 4
            } else {
                ISTORE_0 + (op - ISTORE) * 4
            };
            match (*slot, u8::try_from(*slot)) {
                (0..=3, _) => bytes.push(short_base + *slot as u8),
                (_, Ok(slot)) => bytes.extend_from_slice(&[*op, slot]),
                (slot, Err(_)) => {
                    bytes.extend_from_slice(&[WIDE, *op]);
                    push_u16(bytes, slot);
                }
            }
        }
        Insn::Jump { op, target } => {
            bytes.push(*op);
            fixups.push(Fixup {
                pc,
                at: bytes.len(),
                target: *target,
                wide: false,
            });
            bytes.extend_from_slice(&[0, 0]);
        }
        Insn::TableSwitch {
            low,
            default,
            targets,
        } => {
            bytes.push(TABLESWITCH);
            pad(bytes);
            wide_fixup(bytes, fixups, pc, *default);
            let high = low.saturating_add(targets.len() as i32 - 1);
            bytes.extend_from_slice(&low.to_be_bytes());
            bytes.extend_from_slice(&high.to_be_bytes());
            for target in targets {
                wide_fixup(bytes, fixups, pc, *target);
            }
        }
        Insn::LookupSwitch { default, pairs } => {
            bytes.push(LOOKUPSWITCH);
            pad(bytes);
            wide_fixup(bytes, fixups, pc, *default);
            bytes.extend_from_slice(&(pairs.len() as i32).to_be_bytes());
            for (key, target) in pairs {
                bytes.extend_from_slice(&key.to_be_bytes());
                wide_fixup(bytes, fixups, pc, *target);
            }
        }
        Insn::Field { op, field } => {
            let index = pool.field(field)?;
            bytes.push(*op);
            push_u16(bytes, index);
        }
        Insn::Invoke { op, method } => {
            let interface = *op == INVOKEINTERFACE;
            let index = pool.method(method, interface)?;
            bytes.push(*op);
            push_u16(bytes, index);
            if interface {
                let count = u8::try_from(argument_slots(&method.params) + 1).map_err(|_| {
                    ConversionError::Lowering(format!("too many arguments to {}", method.name))
                })?;
                bytes.extend_from_slice(&[count, 0]);
            }
        }
        Insn::Type { op, class } => {
            let index = pool.class(class)?;
            bytes.push(*op);
            push_u16(bytes, index);
        }
        Insn::NewArray(code) => bytes.extend_from_slice(&[NEWARRAY, *code]),
        Insn::MultiNewArray { class, dims } => {
            let index = pool.class(class)?;
            bytes.push(MULTIANEWARRAY);
            push_u16(bytes, index);
            bytes.push(*dims);
        }
    }
    Ok(())
}

/// Switch operands start at a multiple of four from the method start.
fn pad(bytes: &mut Vec<u8>) {
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
}

fn wide_fixup(bytes: &mut Vec<u8>, fixups: &mut Vec<Fixup>, pc: usize, target: LabelId) {
    fixups.push(Fixup {
        pc,
        at: bytes.len(),
        target,
        wide: true,
    });
    bytes.extend_from_slice(&[0; 4]);
}

/// Operand stack high-water mark by straight-line simulation.
///
/// Each statement leaves the stack empty, so depth restarts at 0 after an unconditional
/// transfer and at 1 on a handler label.
fn max_stack(insns: &[Insn], handlers: &BTreeSet<LabelId>) -> Result<u16> {
    let mut depth: i32 = 0;
    let mut max = 0;
    for insn in insns {
        if let Insn::Label(label) = insn {
            if handlers.contains(label) {
                depth = 1;
            }
            max = max.max(depth);
            continue;
        }
        depth += stack_effect(insn)?;
        if depth < 0 {
            return Err(ConversionError::Invariant {
                pass: "assemble",
                message: format!("operand stack underflow at {insn:?}"),
            });
        }
        max = max.max(depth);
        if ends_block(insn) {
            depth = 0;
        }
    }
    u16::try_from(max).map_err(|_| ConversionError::Lowering("operand stack too deep".to_string()))
}

fn ends_block(insn: &Insn) -> bool {
    match insn {
        Insn::Op(op) => matches!(
            *op,
            IRETURN | LRETURN | FRETURN | DRETURN | ARETURN | RETURN | ATHROW
        ),
        Insn::Jump { op, .. } => *op == GOTO,
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => true,
        _ => false,
    }
}

fn stack_effect(insn: &Insn) -> Result<i32> {
    let effect = match insn {
        Insn::Label(_) => 0,
        Insn::Op(op) => simple_stack_effect(*op).ok_or_else(|| ConversionError::Invariant {
            pass: "assemble",
            message: format!("no stack effect for opcode {op:#04x}"),
        })?,
        Insn::Push { .. } => 1,
        Insn::Ldc(constant) => {
            if constant.is_wide() {
                2
            } else {
                1
            }
        }
        Insn::Var { op, .. } => match *op {
            LLOAD | DLOAD => 2,
            ILOAD | FLOAD | ALOAD => 1,
            LSTORE | DSTORE => -2,
            _ => -1,
        },
        Insn::Jump { op, .. } => match *op {
            GOTO => 0,
            IFEQ..=IFLE | IFNULL | IFNONNULL => -1,
            _ => -2,
        },
        Insn::TableSwitch { .. } | Insn::LookupSwitch { .. } => -1,
        Insn::Field { op, field } => {
            let size = i32::from(field.ty.size());
            match *op {
                GETSTATIC => size,
                PUTSTATIC => -size,
                GETFIELD => size - 1,
                _ => -size - 1,
            }
        }
        Insn::Invoke { op, method } => {
            let receiver = i32::from(*op != INVOKESTATIC);
            i32::from(method.ret.size()) - i32::from(argument_slots(&method.params)) - receiver
        }
        Insn::Type { op, .. } => i32::from(*op == NEW),
        Insn::NewArray(_) => 0,
        Insn::MultiNewArray { dims, .. } => 1 - i32::from(*dims),
    };
    Ok(effect)
}
