//! Lowering of finalized IR onto the JVM operand stack.
//!
//! Input must be phi-free, typed and slot-assigned. Every statement starts and ends with an
//! empty operand stack, except at a handler entry where the thrown exception is on top.

mod insn;
mod monitors;

use std::collections::{BTreeMap, BTreeSet};

pub(crate) use insn::{CodeSink, Insn, InsnList, PoolConstant, TryCatch};

use crate::error::{ConversionError, Result};
use crate::ir::{
    BinaryOp, CompareOp, CondOp, Constant, Expr, FieldRef, InvokeKind, IrMethod, JType, LabelId,
    LocalId, NumKind, Stmt, UnaryOp,
};
use crate::opcodes::*;
use monitors::Monitors;

/// Emits the code of `method` into `sink`.
pub(crate) fn lower(
    method: &IrMethod,
    optimize_synchronized: bool,
    sink: &mut dyn CodeSink,
) -> Result<()> {
    let frame = frame_size(method);
    let monitors = if optimize_synchronized {
        Monitors::analyze(method, frame)?
    } else {
        Monitors::default()
    };
    let mut lowering = Lowering {
        method,
        sink,
        monitors: &monitors,
        handlers: method.handler_labels(),
    };
    lowering.body()?;
    monitors.emit_handlers(lowering.sink);
    lowering.sink.max_locals(frame + monitors.lock_slots());
    Ok(())
}

/// First slot past `this`, the parameters and every assigned local.
fn frame_size(method: &IrMethod) -> u16 {
    method
        .locals
        .iter()
        .enumerate()
        .filter_map(|(index, info)| {
            info.slot
                .map(|slot| slot + method.local_type(LocalId(index as u32)).size())
        })
        .fold(method.param_slots(), u16::max)
}

fn lowering_error(message: impl Into<String>) -> ConversionError {
    ConversionError::Lowering(message.into())
}

struct Lowering<'a> {
    method: &'a IrMethod,
    sink: &'a mut dyn CodeSink,
    monitors: &'a Monitors,
    handlers: BTreeSet<LabelId>,
}

impl Lowering<'_> {
    fn body(&mut self) -> Result<()> {
        let (method, monitors) = (self.method, self.monitors);
        for trap in &method.traps {
            self.sink.try_catch(TryCatch {
                start: trap.start,
                end: trap.end,
                handler: trap.handler,
                catch: trap.catch.clone(),
            });
        }
        for entry in monitors.entries() {
            self.sink.try_catch(entry.clone());
        }
        let mut at_handler = false;
        for (index, stmt) in method.stmts.iter().enumerate() {
            for label in monitors.labels_before(index) {
                self.sink.emit(Insn::Label(*label));
            }
            if let Stmt::Label(label) = stmt {
                self.sink.emit(Insn::Label(*label));
                at_handler |= self.handlers.contains(label);
                continue;
            }
            if std::mem::take(&mut at_handler)
                && !matches!(
                    stmt,
                    Stmt::Assign {
                        value: Expr::CaughtException,
                        ..
                    }
                )
            {
                self.sink.emit(Insn::Op(POP));
            }
            self.stmt(index, stmt)?;
        }
        for label in monitors.labels_before(method.stmts.len()) {
            self.sink.emit(Insn::Label(*label));
        }
        Ok(())
    }

    fn stmt(&mut self, index: usize, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Label(label) => self.sink.emit(Insn::Label(*label)),
            Stmt::Assign { local, value } => self.assign(*local, value)?,
            Stmt::FieldSet {
                field,
                object,
                value,
            } => {
                if let Some(object) = object {
                    self.expr(object)?;
                }
                self.expr(value)?;
                let op = if object.is_some() { PUTFIELD } else { PUTSTATIC };
                self.sink.emit(Insn::Field {
                    op,
                    field: field.clone(),
                });
            }
            Stmt::ArraySet {
                array,
                index,
                value,
                elem,
            } => {
                let elem = self.method.element_hint(array, elem).resolve();
                self.expr(array)?;
                self.expr(index)?;
                self.expr(value)?;
                self.sink.emit(Insn::Op(array_store(&elem)?));
            }
            Stmt::Goto(target) => self.sink.emit(Insn::Jump {
                op: GOTO,
                target: *target,
            }),
            Stmt::If {
                op,
                left,
                right,
                target,
            } => self.branch(*op, left, right, *target)?,
            Stmt::Switch {
                value,
                cases,
                default,
            } => {
                self.expr(value)?;
                self.sink.emit(switch(cases, *default));
            }
            Stmt::Return(None) => self.sink.emit(Insn::Op(RETURN)),
            Stmt::Return(Some(value)) => {
                self.expr(value)?;
                let op = typed_op(&self.method.ret, [IRETURN, LRETURN, FRETURN, DRETURN, ARETURN])?;
                self.sink.emit(Insn::Op(op));
            }
            Stmt::Throw(value) => {
                self.expr(value)?;
                self.sink.emit(Insn::Op(ATHROW));
            }
            Stmt::MonitorEnter(lock) => {
                self.expr(lock)?;
                if let Some(slot) = self.monitors.enter_slot(index) {
                    self.sink.emit(Insn::Op(DUP));
                    self.sink.emit(Insn::Var { op: ASTORE, slot });
                }
                self.sink.emit(Insn::Op(MONITORENTER));
            }
            Stmt::MonitorExit(lock) => {
                match self.monitors.exit_slot(index).filter(|_| lock.is_pure()) {
                    Some(slot) => self.sink.emit(Insn::Var { op: ALOAD, slot }),
                    None => self.expr(lock)?,
                }
                self.sink.emit(Insn::Op(MONITOREXIT));
            }
            Stmt::Eval(value) => {
                self.expr(value)?;
                match self.method.expr_type(value).size() {
                    0 => {}
                    1 => self.sink.emit(Insn::Op(POP)),
                    _ => self.sink.emit(Insn::Op(POP2)),
                }
            }
            Stmt::FillArrayData { array, data, elem } => {
                let elem = self.method.element_hint(array, elem).resolve();
                self.expr(array)?;
                for (position, value) in data.iter().enumerate() {
                    self.sink.emit(Insn::Op(DUP));
                    self.push_int(position as i32);
                    self.constant(value)?;
                    self.sink.emit(Insn::Op(array_store(&elem)?));
                }
                self.sink.emit(Insn::Op(POP));
            }
            Stmt::Nop => {}
        }
        Ok(())
    }

    fn assign(&mut self, local: LocalId, value: &Expr) -> Result<()> {
        let slot = self.slot(local)?;
        let in_place = match value {
            Expr::CaughtException => {
                return self.store(local);
            }
            Expr::Local(source) => self.slot(*source)? == slot,
            Expr::This => slot == 0,
            Expr::Param(index) => self.method.param_slot(*index) == slot,
            _ => false,
        };
        if in_place {
            return Ok(());
        }
        self.expr(value)?;
        self.store(local)
    }

    fn branch(&mut self, op: CondOp, left: &Expr, right: &Expr, target: LabelId) -> Result<()> {
        let is_null = |expr: &Expr| expr.as_const().is_some_and(Constant::is_null_like);
        let left_type = self.method.expr_type(left);
        if op.is_equality() && left_type.is_reference() && is_null(right) {
            self.expr(left)?;
            let op = if op == CondOp::Eq { IFNULL } else { IFNONNULL };
            self.sink.emit(Insn::Jump { op, target });
            return Ok(());
        }
        if op.is_equality() && is_null(left) && self.method.expr_type(right).is_reference() {
            self.expr(right)?;
            let op = if op == CondOp::Eq { IFNULL } else { IFNONNULL };
            self.sink.emit(Insn::Jump { op, target });
            return Ok(());
        }
        let is_zero = right.as_const().is_some_and(Constant::is_zero);
        if left_type.is_int_like() && is_zero {
            self.expr(left)?;
            self.sink.emit(Insn::Jump {
                op: if_zero(op),
                target,
            });
            return Ok(());
        }
        self.expr(left)?;
        self.expr(right)?;
        let op = if left_type.is_reference() {
            match op {
                CondOp::Eq => IF_ACMPEQ,
                CondOp::Ne => IF_ACMPNE,
                _ => return Err(lowering_error("ordered comparison of references")),
            }
        } else {
            if_icmp(op)
        };
        self.sink.emit(Insn::Jump { op, target });
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Local(local) => self.load(*local)?,
            Expr::Const(constant) => self.constant(constant)?,
            Expr::This => self.sink.emit(Insn::Var { op: ALOAD, slot: 0 }),
            Expr::Param(index) => {
                let ty = self
                    .method
                    .params
                    .get(*index as usize)
                    .ok_or_else(|| lowering_error(format!("no parameter {index}")))?;
                let op = typed_op(ty, [ILOAD, LLOAD, FLOAD, DLOAD, ALOAD])?;
                self.sink.emit(Insn::Var {
                    op,
                    slot: self.method.param_slot(*index),
                });
            }
            Expr::CaughtException => {
                return Err(lowering_error("caught exception outside a handler entry"));
            }
            Expr::Unary { op, operand } => {
                self.expr(operand)?;
                self.unary(op)?;
            }
            Expr::Binary {
                op,
                kind,
                left,
                right,
            } => {
                self.expr(left)?;
                self.expr(right)?;
                self.sink.emit(Insn::Op(binary_op(*op, *kind)?));
            }
            Expr::Compare {
                op,
                kind,
                left,
                right,
            } => {
                self.expr(left)?;
                self.expr(right)?;
                let opcode = match (op, kind) {
                    (CompareOp::Cmp, NumKind::Long) => LCMP,
                    (CompareOp::Cmpl, NumKind::Float) => FCMPL,
                    (CompareOp::Cmpg, NumKind::Float) => FCMPG,
                    (CompareOp::Cmpl, NumKind::Double) => DCMPL,
                    (CompareOp::Cmpg, NumKind::Double) => DCMPG,
                    _ => return Err(lowering_error(format!("{op:?} on {kind:?}"))),
                };
                self.sink.emit(Insn::Op(opcode));
            }
            Expr::InstanceOf { ty, operand } => {
                self.expr(operand)?;
                self.sink.emit(Insn::Type {
                    op: INSTANCEOF,
                    class: ty.internal_name(),
                });
            }
            Expr::CheckCast { ty, operand } => {
                self.expr(operand)?;
                self.sink.emit(Insn::Type {
                    op: CHECKCAST,
                    class: ty.internal_name(),
                });
            }
            Expr::ArrayLength(array) => {
                self.expr(array)?;
                self.sink.emit(Insn::Op(ARRAYLENGTH));
            }
            Expr::FieldGet { field, object } => {
                let op = match object {
                    Some(object) => {
                        self.expr(object)?;
                        GETFIELD
                    }
                    None => GETSTATIC,
                };
                self.sink.emit(Insn::Field {
                    op,
                    field: field.clone(),
                });
            }
            Expr::ArrayGet { array, index, elem } => {
                let elem = self.method.element_hint(array, elem).resolve();
                self.expr(array)?;
                self.expr(index)?;
                self.sink.emit(Insn::Op(array_load(&elem)?));
            }
            Expr::Invoke { kind, method, args } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let op = match kind {
                    InvokeKind::Virtual => INVOKEVIRTUAL,
                    InvokeKind::Super | InvokeKind::Direct => INVOKESPECIAL,
                    InvokeKind::Static => INVOKESTATIC,
                    InvokeKind::Interface => INVOKEINTERFACE,
                };
                self.sink.emit(Insn::Invoke {
                    op,
                    method: method.clone(),
                });
            }
            Expr::New(class) => self.sink.emit(Insn::Type {
                op: NEW,
                class: class.clone(),
            }),
            Expr::NewInit { method, args } => {
                self.sink.emit(Insn::Type {
                    op: NEW,
                    class: method.owner.clone(),
                });
                self.sink.emit(Insn::Op(DUP));
                for arg in args {
                    self.expr(arg)?;
                }
                self.sink.emit(Insn::Invoke {
                    op: INVOKESPECIAL,
                    method: method.clone(),
                });
            }
            Expr::NewArray { elem, size } => {
                self.expr(size)?;
                self.new_array(elem)?;
            }
            Expr::FilledArray { elem, values } => {
                self.push_int(values.len() as i32);
                self.new_array(elem)?;
                let store = array_store(elem)?;
                for (position, value) in values.iter().enumerate() {
                    self.sink.emit(Insn::Op(DUP));
                    self.push_int(position as i32);
                    self.expr(value)?;
                    self.sink.emit(Insn::Op(store));
                }
            }
            Expr::NewMultiArray { ty, dims } => {
                let count = u8::try_from(dims.len())
                    .map_err(|_| lowering_error("too many array dimensions"))?;
                for dim in dims {
                    self.expr(dim)?;
                }
                self.sink.emit(Insn::MultiNewArray {
                    class: ty.descriptor(),
                    dims: count,
                });
            }
            Expr::Phi(_) => return Err(lowering_error("phi survived until lowering")),
        }
        Ok(())
    }

    fn unary(&mut self, op: &UnaryOp) -> Result<()> {
        match op {
            UnaryOp::Neg(kind) => self.sink.emit(Insn::Op(INEG + kind_offset(*kind))),
            UnaryOp::Not(NumKind::Int) => {
                self.sink.emit(Insn::Op(ICONST_M1));
                self.sink.emit(Insn::Op(IXOR));
            }
            UnaryOp::Not(NumKind::Long) => {
                self.sink.emit(Insn::Ldc(PoolConstant::Long(-1)));
                self.sink.emit(Insn::Op(IXOR + 1));
            }
            UnaryOp::Not(kind) => return Err(lowering_error(format!("bitwise not on {kind:?}"))),
            UnaryOp::Convert { from, to } => {
                if let Some(op) = conversion(*from, to)? {
                    self.sink.emit(Insn::Op(op));
                }
            }
        }
        Ok(())
    }

    fn constant(&mut self, constant: &Constant) -> Result<()> {
        let insn = match constant {
            Constant::Int(value) => {
                self.push_int(*value);
                return Ok(());
            }
            Constant::Long(value @ 0..=1) => Insn::Op(LCONST_0 + *value as u8),
            Constant::Long(value) => Insn::Ldc(PoolConstant::Long(*value)),
            Constant::Float(0) => Insn::Op(FCONST_0),
            Constant::Float(0x3f80_0000) => Insn::Op(FCONST_0 + 1),
            Constant::Float(0x4000_0000) => Insn::Op(FCONST_0 + 2),
            Constant::Float(bits) => Insn::Ldc(PoolConstant::Float(*bits)),
            Constant::Double(0) => Insn::Op(DCONST_0),
            Constant::Double(0x3ff0_0000_0000_0000) => Insn::Op(DCONST_0 + 1),
            Constant::Double(bits) => Insn::Ldc(PoolConstant::Double(*bits)),
            Constant::Null => Insn::Op(ACONST_NULL),
            Constant::String(value) => Insn::Ldc(PoolConstant::String(value.clone())),
            Constant::Class(ty) => match primitive_wrapper(ty) {
                Some(wrapper) => Insn::Field {
                    op: GETSTATIC,
                    field: FieldRef {
                        owner: wrapper.to_string(),
                        name: "TYPE".to_string(),
                        descriptor: "Ljava/lang/Class;".to_string(),
                        ty: JType::object("java/lang/Class"),
                    },
                },
                None => Insn::Ldc(PoolConstant::Class(ty.internal_name())),
            },
            Constant::Narrow(_) | Constant::Wide(_) => {
                return Err(lowering_error(format!("untyped literal {constant:?}")));
            }
        };
        self.sink.emit(insn);
        Ok(())
    }

    fn push_int(&mut self, value: i32) {
        let insn = match value {
            -1..=5 => Insn::Op((ICONST_0 as i32 + value) as u8),
            _ => match i8::try_from(value) {
                Ok(byte) => Insn::Push {
                    op: BIPUSH,
                    value: byte.into(),
                },
                Err(_) => match i16::try_from(value) {
                    Ok(short) => Insn::Push {
                        op: SIPUSH,
                        value: short,
                    },
                    Err(_) => Insn::Ldc(PoolConstant::Int(value)),
                },
            },
        };
        self.sink.emit(insn);
    }

    fn new_array(&mut self, elem: &JType) -> Result<()> {
        let code = match elem {
            JType::Boolean => T_BOOLEAN,
            JType::Char => T_CHAR,
            JType::Float => T_FLOAT,
            JType::Double => T_DOUBLE,
            JType::Byte => T_BYTE,
            JType::Short => T_SHORT,
            JType::Int => T_INT,
            JType::Long => T_LONG,
            JType::Void => return Err(lowering_error("array of void")),
            reference => {
                self.sink.emit(Insn::Type {
                    op: ANEWARRAY,
                    class: reference.internal_name(),
                });
                return Ok(());
            }
        };
        self.sink.emit(Insn::NewArray(code));
        Ok(())
    }

    fn slot(&self, local: LocalId) -> Result<u16> {
        self.method
            .local(local)
            .slot
            .ok_or_else(|| lowering_error(format!("local ${} has no slot", local.0)))
    }

    fn load(&mut self, local: LocalId) -> Result<()> {
        let op = typed_op(
            &self.method.local_type(local),
            [ILOAD, LLOAD, FLOAD, DLOAD, ALOAD],
        )?;
        let slot = self.slot(local)?;
        self.sink.emit(Insn::Var { op, slot });
        Ok(())
    }

    fn store(&mut self, local: LocalId) -> Result<()> {
        let op = typed_op(
            &self.method.local_type(local),
            [ISTORE, LSTORE, FSTORE, DSTORE, ASTORE],
        )?;
        let slot = self.slot(local)?;
        self.sink.emit(Insn::Var { op, slot });
        Ok(())
    }
}

/// Picks the int, long, float, double or reference variant of an instruction.
fn typed_op(ty: &JType, ops: [u8; 5]) -> Result<u8> {
    let op = match ty {
        JType::Long => ops[1],
        JType::Float => ops[2],
        JType::Double => ops[3],
        JType::Object(_) | JType::Array(_) => ops[4],
        JType::Void => return Err(lowering_error("value of type void")),
        _ => ops[0],
    };
    Ok(op)
}

fn array_load(elem: &JType) -> Result<u8> {
    let op = match elem {
        JType::Boolean | JType::Byte => BALOAD,
        JType::Char => CALOAD,
        JType::Short => SALOAD,
        other => typed_op(other, [IALOAD, LALOAD, FALOAD, DALOAD, AALOAD])?,
    };
    Ok(op)
}

fn array_store(elem: &JType) -> Result<u8> {
    let op = match elem {
        JType::Boolean | JType::Byte => BASTORE,
        JType::Char => CASTORE,
        JType::Short => SASTORE,
        other => typed_op(other, [IASTORE, LASTORE, FASTORE, DASTORE, AASTORE])?,
    };
    Ok(op)
}

fn kind_offset(kind: NumKind) -> u8 {
    match kind {
        NumKind::Int => 0,
        NumKind::Long => 1,
        NumKind::Float => 2,
        NumKind::Double => 3,
    }
}

fn if_zero(op: CondOp) -> u8 {
    match op {
        CondOp::Eq => IFEQ,
        CondOp::Ne => IFNE,
        CondOp::Lt => IFLT,
        CondOp::Ge => IFGE,
        CondOp::Gt => IFGT,
        CondOp::Le => IFLE,
    }
}

fn if_icmp(op: CondOp) -> u8 {
    match op {
        CondOp::Eq => IF_ICMPEQ,
        CondOp::Ne => IF_ICMPNE,
        CondOp::Lt => IF_ICMPLT,
        CondOp::Ge => IF_ICMPGE,
        CondOp::Gt => IF_ICMPGT,
        CondOp::Le => IF_ICMPLE,
    }
}

fn binary_op(op: BinaryOp, kind: NumKind) -> Result<u8> {
    let arithmetic = |base: u8| base + kind_offset(kind);
    let integral = |base: u8| match kind {
        NumKind::Int => Ok(base),
        NumKind::Long => Ok(base + 1),
        _ => Err(lowering_error(format!("{op:?} on {kind:?}"))),
    };
    match op {
        BinaryOp::Add => Ok(arithmetic(IADD)),
        BinaryOp::Sub => Ok(arithmetic(ISUB)),
        BinaryOp::Mul => Ok(arithmetic(IMUL)),
        BinaryOp::Div => Ok(arithmetic(IDIV)),
        BinaryOp::Rem => Ok(arithmetic(IREM)),
        BinaryOp::Shl => integral(ISHL),
        BinaryOp::Shr => integral(ISHR),
        BinaryOp::Ushr => integral(IUSHR),
        BinaryOp::And => integral(IAND),
        BinaryOp::Or => integral(IOR),
        BinaryOp::Xor => integral(IXOR),
    }
}

fn conversion(from: NumKind, to: &JType) -> Result<Option<u8>> {
    let op = match (from, to) {
        (NumKind::Int, JType::Int)
        | (NumKind::Long, JType::Long)
        | (NumKind::Float, JType::Float)
        | (NumKind::Double, JType::Double) => return Ok(None),
        (NumKind::Int, JType::Long) => I2L,
        (NumKind::Int, JType::Float) => I2F,
        (NumKind::Int, JType::Double) => I2D,
        (NumKind::Long, JType::Int) => L2I,
        (NumKind::Long, JType::Float) => L2F,
        (NumKind::Long, JType::Double) => L2D,
        (NumKind::Float, JType::Int) => F2I,
        (NumKind::Float, JType::Long) => F2L,
        (NumKind::Float, JType::Double) => F2D,
        (NumKind::Double, JType::Int) => D2I,
        (NumKind::Double, JType::Long) => D2L,
        (NumKind::Double, JType::Float) => D2F,
        (NumKind::Int, JType::Byte) => I2B,
        (NumKind::Int, JType::Char) => I2C,
        (NumKind::Int, JType::Short) => I2S,
        (from, to) => return Err(lowering_error(format!("conversion {from:?} to {to}"))),
    };
    Ok(Some(op))
}

fn primitive_wrapper(ty: &JType) -> Option<&'static str> {
    let wrapper = match ty {
        JType::Boolean => "java/lang/Boolean",
        JType::Byte => "java/lang/Byte",
        JType::Char => "java/lang/Character",
        JType::Short => "java/lang/Short",
        JType::Int => "java/lang/Integer",
        JType::Long => "java/lang/Long",
        JType::Float => "java/lang/Float",
        JType::Double => "java/lang/Double",
        JType::Void => "java/lang/Void",
        JType::Object(_) | JType::Array(_) => return None,
    };
    Some(wrapper)
}

/// `tableswitch` when its size plus weighted dispatch time beats `lookupswitch`.
fn switch(cases: &[(i32, LabelId)], default: LabelId) -> Insn {
    let mut pairs = cases.to_vec();
    pairs.sort_by_key(|(key, _)| *key);
    pairs.dedup_by_key(|(key, _)| *key);
    let (Some(&(low, _)), Some(&(high, _))) = (pairs.first(), pairs.last()) else {
        return Insn::LookupSwitch { default, pairs };
    };
    let count = pairs.len() as i64;
    let table_space = 4 + (i64::from(high) - i64::from(low) + 1);
    let table_time = 3;
    let lookup_space = 3 + 2 * count;
    let lookup_time = count;
    if table_space + 3 * table_time > lookup_space + 3 * lookup_time {
        return Insn::LookupSwitch { default, pairs };
    }
    let targets: BTreeMap<i32, LabelId> = pairs.into_iter().collect();
    Insn::TableSwitch {
        low,
        default,
        targets: (low..=high)
            .map(|key| targets.get(&key).copied().unwrap_or(default))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::dex::{DexInsn, DexMethodRef, InvokeType, ValueKind};
    use crate::ir::{MethodRef, Trap, TypeHint};
    use crate::passes::fixtures::{int_method, void_method};
    use crate::test_harness::{MethodBuilder, transform};

    fn lowered(ir: &IrMethod, optimize_synchronized: bool) -> InsnList {
        let mut list = InsnList::default();
        lower(ir, optimize_synchronized, &mut list).expect("lower");
        list
    }

    fn slotted(ir: &mut IrMethod, local: LocalId, slot: u16) {
        ir.local_mut(local).slot = Some(slot);
    }

    fn call(name: &str) -> Expr {
        Expr::Invoke {
            kind: InvokeKind::Static,
            method: MethodRef {
                owner: "a/B".to_string(),
                name: name.to_string(),
                descriptor: "()V".to_string(),
                params: Vec::new(),
                ret: JType::Void,
            },
            args: Vec::new(),
        }
    }

    #[test]
    fn constant_return_is_two_instructions() {
        let method = MethodBuilder::new("answer", "()I")
            .static_method()
            .registers(1)
            .insn(DexInsn::Const { dst: 0, value: 42 })
            .insn(DexInsn::Return {
                src: 0,
                kind: ValueKind::Single,
            })
            .build();
        let ir = transform(&method, &Config::default()).expect("transform");
        let list = lowered(&ir, true);
        assert_eq!(
            list.code(),
            [
                &Insn::Push {
                    op: BIPUSH,
                    value: 42
                },
                &Insn::Op(IRETURN)
            ]
        );
        assert!(list.handlers.is_empty());
        assert_eq!(list.max_locals, 0);
    }

    #[test]
    fn integers_use_the_shortest_push() {
        let mut ir = void_method();
        ir.stmts = [-1, 5, 100, -129, 40_000]
            .into_iter()
            .map(|value| Stmt::Eval(Expr::int(value)))
            .chain([Stmt::Return(None)])
            .collect();
        let list = lowered(&ir, false);
        let pushes: Vec<&Insn> = list
            .code()
            .into_iter()
            .filter(|insn| **insn != Insn::Op(POP) && **insn != Insn::Op(RETURN))
            .collect();
        assert_eq!(
            pushes,
            [
                &Insn::Op(ICONST_M1),
                &Insn::Op(ICONST_0 + 5),
                &Insn::Push {
                    op: BIPUSH,
                    value: 100
                },
                &Insn::Push {
                    op: SIPUSH,
                    value: -129
                },
                &Insn::Ldc(PoolConstant::Int(40_000)),
            ]
        );
    }

    #[test]
    fn dense_cases_become_tableswitch_and_sparse_lookupswitch() {
        let default = LabelId(9);
        let dense = switch(&[(2, LabelId(1)), (0, LabelId(2)), (3, LabelId(3))], default);
        assert_eq!(
            dense,
            Insn::TableSwitch {
                low: 0,
                default,
                targets: vec![LabelId(2), default, LabelId(1), LabelId(3)],
            }
        );
        let sparse = switch(&[(1_000, LabelId(1)), (-5, LabelId(2))], default);
        assert_eq!(
            sparse,
            Insn::LookupSwitch {
                default,
                pairs: vec![(-5, LabelId(2)), (1_000, LabelId(1))],
            }
        );
    }

    #[test]
    fn null_and_zero_comparisons_use_single_operand_branches() {
        let mut ir = void_method();
        let object = ir.new_local(TypeHint::Exact(JType::object("java/lang/String")));
        let number = ir.new_local(TypeHint::Exact(JType::Int));
        slotted(&mut ir, object, 0);
        slotted(&mut ir, number, 1);
        let target = ir.new_label();
        ir.stmts = vec![
            Stmt::If {
                op: CondOp::Ne,
                left: Expr::Local(object),
                right: Expr::Const(Constant::Null),
                target,
            },
            Stmt::If {
                op: CondOp::Lt,
                left: Expr::Local(number),
                right: Expr::int(0),
                target,
            },
            Stmt::If {
                op: CondOp::Ge,
                left: Expr::Local(number),
                right: Expr::int(3),
                target,
            },
            Stmt::Label(target),
            Stmt::Return(None),
        ];
        let list = lowered(&ir, false);
        let jumps: Vec<u8> = list
            .insns
            .iter()
            .filter_map(|insn| match insn {
                Insn::Jump { op, .. } => Some(*op),
                _ => None,
            })
            .collect();
        assert_eq!(jumps, [IFNONNULL, IFLT, IF_ICMPGE]);
    }

    #[test]
    fn copy_within_one_slot_emits_nothing() {
        let mut ir = int_method();
        let param = ir.new_local(TypeHint::Exact(JType::Int));
        let copy = ir.new_local(TypeHint::Exact(JType::Int));
        slotted(&mut ir, param, 0);
        slotted(&mut ir, copy, 0);
        ir.stmts = vec![
            Stmt::assign(param, Expr::Param(0)),
            Stmt::assign(copy, Expr::Local(param)),
            Stmt::Return(Some(Expr::Local(copy))),
        ];
        let list = lowered(&ir, false);
        assert_eq!(
            list.code(),
            [
                &Insn::Var {
                    op: ILOAD,
                    slot: 0
                },
                &Insn::Op(IRETURN)
            ]
        );
        assert_eq!(list.max_locals, 1);
    }

    #[test]
    fn handler_without_caught_value_pops_it() {
        let mut ir = void_method();
        let (start, end, handler) = (ir.new_label(), ir.new_label(), ir.new_label());
        ir.stmts = vec![
            Stmt::Label(start),
            Stmt::Eval(call("work")),
            Stmt::Label(end),
            Stmt::Return(None),
            Stmt::Label(handler),
            Stmt::Return(None),
        ];
        ir.traps.push(Trap {
            start,
            end,
            handler,
            catch: Some("java/io/IOException".to_string()),
        });
        let list = lowered(&ir, true);
        let at = list.position(handler).expect("handler label");
        assert_eq!(list.insns[at + 1], Insn::Op(POP));
        assert_eq!(
            list.handlers,
            [TryCatch {
                start,
                end,
                handler,
                catch: Some("java/io/IOException".to_string()),
            }]
        );
    }

    #[test]
    fn array_literal_stores_each_element() {
        let method = MethodBuilder::new("pair", "()[J")
            .static_method()
            .registers(5)
            .insn(DexInsn::Const { dst: 0, value: 2 })
            .insn(DexInsn::NewArray {
                dst: 1,
                size: 0,
                class: "[J".to_string(),
            })
            .insn(DexInsn::FillArrayData {
                array: 1,
                width: 8,
                data: vec![1, 7],
            })
            .insn(DexInsn::Return {
                src: 1,
                kind: ValueKind::Object,
            })
            .build();
        let ir = transform(&method, &Config::default()).expect("transform");
        let list = lowered(&ir, true);
        assert_eq!(
            list.code(),
            [
                &Insn::Op(ICONST_0 + 2),
                &Insn::NewArray(T_LONG),
                &Insn::Op(DUP),
                &Insn::Op(ICONST_0),
                &Insn::Op(LCONST_0 + 1),
                &Insn::Op(LASTORE),
                &Insn::Op(DUP),
                &Insn::Op(ICONST_0 + 1),
                &Insn::Ldc(PoolConstant::Long(7)),
                &Insn::Op(LASTORE),
                &Insn::Op(ARETURN),
            ]
        );
    }

    #[test]
    fn synchronized_block_releases_monitor_on_both_exits() {
        let lock = DexMethodRef {
            owner: "Lcom/example/Util;".to_string(),
            name: "work".to_string(),
            descriptor: "()V".to_string(),
        };
        let method = MethodBuilder::new("locked", "()V")
            .registers(1)
            .insn(DexInsn::MonitorEnter { reg: 0 })
            .insn(DexInsn::Invoke {
                kind: InvokeType::Static,
                method: lock,
                args: Vec::new(),
            })
            .insn(DexInsn::MonitorExit { reg: 0 })
            .insn(DexInsn::ReturnVoid)
            .build();
        let ir = transform(&method, &Config::default()).expect("transform");
        let list = lowered(&ir, true);
        let exits = list
            .insns
            .iter()
            .filter(|insn| **insn == Insn::Op(MONITOREXIT))
            .count();
        assert_eq!(exits, 2, "{list:?}");
        assert_eq!(list.handlers.len(), 1);
        let entry = &list.handlers[0];
        assert_eq!(entry.catch, None);
        let handler = list.position(entry.handler).expect("handler emitted");
        let lock_slot = 1;
        assert_eq!(
            list.insns[handler + 1..handler + 4],
            [
                Insn::Var {
                    op: ALOAD,
                    slot: lock_slot
                },
                Insn::Op(MONITOREXIT),
                Insn::Op(ATHROW)
            ]
        );
        let start = list.position(entry.start).expect("start");
        let end = list.position(entry.end).expect("end");
        assert!(
            list.insns[start..end]
                .iter()
                .any(|insn| matches!(insn, Insn::Invoke { .. }))
        );
        assert_eq!(list.max_locals, 2);

        let plain = lowered(&ir, false);
        assert!(plain.handlers.is_empty());
        assert_eq!(plain.max_locals, 1);
    }
}
