use crate::ir::{FieldRef, LabelId, MethodRef};

/// Value loaded through the constant pool.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum PoolConstant {
    Int(i32),
    /// IEEE-754 bits.
    Float(u32),
    Long(i64),
    /// IEEE-754 bits.
    Double(u64),
    String(String),
    /// Internal name, or descriptor for array classes.
    Class(String),
}

impl PoolConstant {
    pub(crate) fn is_wide(&self) -> bool {
        matches!(self, PoolConstant::Long(_) | PoolConstant::Double(_))
    }
}

/// Symbolic JVM instruction. Branch targets are labels, pool operands are values; the
/// assembler picks encodings and resolves both.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Insn {
    Label(LabelId),
    /// Opcode without operands.
    Op(u8),
    /// `bipush` or `sipush`.
    Push { op: u8, value: i16 },
    Ldc(PoolConstant),
    /// Load or store with the long-form opcode (`iload`, `astore`, …).
    Var { op: u8, slot: u16 },
    Jump { op: u8, target: LabelId },
    TableSwitch {
        low: i32,
        default: LabelId,
        targets: Vec<LabelId>,
    },
    LookupSwitch {
        default: LabelId,
        pairs: Vec<(i32, LabelId)>,
    },
    Field { op: u8, field: FieldRef },
    Invoke { op: u8, method: MethodRef },
    /// `new`, `anewarray`, `checkcast` or `instanceof`.
    Type { op: u8, class: String },
    /// `newarray` with its primitive type code.
    NewArray(u8),
    MultiNewArray { class: String, dims: u8 },
}

/// Exception-table entry by labels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TryCatch {
    pub(crate) start: LabelId,
    pub(crate) end: LabelId,
    pub(crate) handler: LabelId,
    /// Internal name of the caught class, `None` for catch-any.
    pub(crate) catch: Option<String>,
}

/// Receiver of lowered code.
pub(crate) trait CodeSink {
    fn emit(&mut self, insn: Insn);

    /// Registers an exception-table entry. Entries keep registration order.
    fn try_catch(&mut self, entry: TryCatch);

    /// Declares the local frame size.
    fn max_locals(&mut self, count: u16);
}

/// In-memory instruction stream, used to inspect lowering output.
#[derive(Debug, Default)]
pub(crate) struct InsnList {
    pub(crate) insns: Vec<Insn>,
    pub(crate) handlers: Vec<TryCatch>,
    pub(crate) max_locals: u16,
}

impl InsnList {
    /// Instructions without label pseudo-instructions.
    #[cfg(test)]
    pub(crate) fn code(&self) -> Vec<&Insn> {
        self.insns
            .iter()
            .filter(|insn| !matches!(insn, Insn::Label(_)))
            .collect()
    }

    /// Position of `label` in the stream.
    #[cfg(test)]
    pub(crate) fn position(&self, label: LabelId) -> Option<usize> {
        self.insns
            .iter()
            .position(|insn| *insn == Insn::Label(label))
    }
}

impl CodeSink for InsnList {
    fn emit(&mut self, insn: Insn) {
        self.insns.push(insn);
    }

    fn try_catch(&mut self, entry: TryCatch) {
        self.handlers.push(entry);
    }

    fn max_locals(&mut self, count: u16) {
        self.max_locals = count;
    }
}
