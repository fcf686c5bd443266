//! Translation of decoded register code into SSA-form IR.

use std::collections::BTreeMap;

use crate::context::ClassContext;
use crate::descriptor;
use crate::dex::{
    ArrayKind, BinOp, CmpType, DexCode, DexFieldRef, DexInsn, DexMethod, DexMethodRef, InvokeType,
    Operand, Test, UnOp, ValueKind,
};
use crate::error::{ConversionError, Result};
use crate::ir::{
    BinaryOp, CompareOp, CondOp, Constant, Expr, FieldRef, InvokeKind, IrMethod, JType, LabelId,
    LocalId, MethodRef, NumKind, PhiArg, Stmt, Trap, TypeHint, UnaryOp,
};

/// Build the IR of `method` in SSA form.
pub(crate) fn build_method(
    context: &ClassContext,
    method: &DexMethod,
    code: &DexCode,
    skip_exceptions: bool,
) -> Result<IrMethod> {
    let (params, ret) = descriptor::parse_method(&method.descriptor)?;
    let ir = IrMethod::new(
        context.name.clone(),
        method.name.clone(),
        method.descriptor.clone(),
        method.is_static(),
        params,
        ret,
    );
    Builder::new(ir, code, skip_exceptions)?.run()
}

/// An instruction, or a label pseudo-instruction, with any `move-result` folded in.
enum Unit<'a> {
    Label(u32),
    Insn {
        insn: &'a DexInsn,
        result: Option<(u16, ValueKind)>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Edge {
    Normal,
    Exceptional,
}

/// Predecessor of a block; `None` is method entry.
type Pred = Option<usize>;

struct Block {
    label: LabelId,
    units: Vec<usize>,
    succs: Vec<(usize, Edge)>,
    preds: Vec<(Pred, Edge)>,
}

/// Register contents during renaming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Reg {
    Undef,
    Value { local: LocalId, wide: bool },
    /// Upper half of the wide value in the register below.
    High,
}

/// Register kind during the definedness analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Undef,
    Narrow,
    Wide,
    High,
}

impl Reg {
    fn kind(self) -> Kind {
        match self {
            Reg::Undef => Kind::Undef,
            Reg::Value { wide: false, .. } => Kind::Narrow,
            Reg::Value { wide: true, .. } => Kind::Wide,
            Reg::High => Kind::High,
        }
    }
}

/// Destination register written by an instruction.
#[derive(Clone, Copy)]
struct Def {
    reg: u16,
    wide: bool,
}

fn write_kind(kinds: &mut [Kind], def: Def) {
    write_slots(kinds, def, Kind::Narrow, Kind::Wide, Kind::High, Kind::Undef, |k| {
        *k == Kind::Wide
    });
}

/// Writes a register, invalidating any wide value it overlaps.
fn write_slots<T: Copy>(
    slots: &mut [T],
    def: Def,
    narrow: T,
    wide: T,
    high: T,
    undef: T,
    is_wide: impl Fn(&T) -> bool,
) {
    let reg = def.reg as usize;
    let last = if def.wide { reg + 1 } else { reg };
    if reg > 0 && is_wide(&slots[reg - 1]) {
        slots[reg - 1] = undef;
    }
    if is_wide(&slots[last]) && last + 1 < slots.len() {
        slots[last + 1] = undef;
    }
    if def.wide {
        slots[reg] = wide;
        slots[last] = high;
    } else {
        slots[reg] = narrow;
    }
}

struct Builder<'a> {
    ir: IrMethod,
    units: Vec<Unit<'a>>,
    /// Handlers `(caught class, handler label)` of each try, in table order.
    tries: Vec<(usize, usize, Vec<(Option<String>, u32)>)>,
    blocks: Vec<Block>,
    block_of_label: BTreeMap<u32, usize>,
    entry_label: LabelId,
    registers: usize,
}

impl<'a> Builder<'a> {
    fn new(mut ir: IrMethod, code: &'a DexCode, skip_exceptions: bool) -> Result<Self> {
        let units = pair_results(&code.insns)?;
        if !units.iter().any(|unit| matches!(unit, Unit::Insn { .. })) {
            return Err(malformed("code item has no instructions".to_string()));
        }
        let mut label_units = BTreeMap::new();
        for (index, unit) in units.iter().enumerate() {
            if let Unit::Label(id) = unit {
                if label_units.insert(*id, index).is_some() {
                    return Err(malformed(format!("label {id} defined twice")));
                }
            }
        }
        let mut tries = Vec::new();
        if !skip_exceptions {
            for entry in &code.tries {
                let start = lookup(&label_units, entry.start)?;
                let end = lookup(&label_units, entry.end)?;
                let mut handlers = Vec::new();
                for handler in &entry.handlers {
                    lookup(&label_units, handler.handler)?;
                    let caught = handler
                        .exception
                        .as_deref()
                        .map(descriptor::class_name)
                        .transpose()?;
                    handlers.push((caught, handler.handler));
                }
                tries.push((start, end, handlers));
            }
        }
        let entry_label = ir.new_label();
        Ok(Self {
            ir,
            units,
            tries,
            blocks: Vec::new(),
            block_of_label: BTreeMap::new(),
            entry_label,
            registers: code.registers as usize,
        })
    }

    fn run(mut self) -> Result<IrMethod> {
        self.split_blocks();
        self.link_blocks()?;
        let order = self.reverse_post_order();
        let entry_state = self.entry_state()?;
        let entry_kinds: Vec<Kind> = entry_state.iter().map(|reg| reg.kind()).collect();
        let in_kinds = self.definedness(&order, &entry_kinds)?;
        self.rename(&order, entry_state, &in_kinds)
    }

    /// Handlers covering unit `index`, stopping after the first catch-all.
    fn covering(&self, index: usize) -> Vec<(Option<String>, u32)> {
        let mut handlers = Vec::new();
        for (start, end, entries) in &self.tries {
            if *start < index && index < *end {
                for (caught, label) in entries {
                    handlers.push((caught.clone(), *label));
                    if caught.is_none() {
                        return handlers;
                    }
                }
            }
        }
        handlers
    }

    fn split_blocks(&mut self) {
        let mut blocks = Vec::new();
        let mut labels: Vec<u32> = Vec::new();
        let mut units = Vec::new();
        for (index, unit) in self.units.iter().enumerate() {
            match unit {
                Unit::Label(id) => {
                    if !units.is_empty() {
                        blocks.push((std::mem::take(&mut labels), std::mem::take(&mut units)));
                    }
                    labels.push(*id);
                }
                Unit::Insn { insn, .. } => {
                    units.push(index);
                    let splits = insn.ends_flow()
                        || insn.is_branch()
                        || (insn.can_throw() && !self.covering(index).is_empty());
                    if splits {
                        blocks.push((std::mem::take(&mut labels), std::mem::take(&mut units)));
                    }
                }
            }
        }
        if !labels.is_empty() || !units.is_empty() {
            blocks.push((labels, units));
        }
        for (labels, units) in blocks {
            let block = self.blocks.len();
            for id in labels {
                self.block_of_label.insert(id, block);
            }
            let label = self.ir.new_label();
            self.blocks.push(Block {
                label,
                units,
                succs: Vec::new(),
                preds: Vec::new(),
            });
        }
    }

    fn target(&self, id: u32) -> Result<usize> {
        self.block_of_label
            .get(&id)
            .copied()
            .ok_or_else(|| malformed(format!("unknown label {id}")))
    }

    fn link_blocks(&mut self) -> Result<()> {
        for block in 0..self.blocks.len() {
            let next = (block + 1 < self.blocks.len()).then_some(block + 1);
            let mut succs = Vec::new();
            let last = self.blocks[block].units.last().copied();
            let last_insn = last.and_then(|index| match &self.units[index] {
                Unit::Insn { insn, .. } => Some(*insn),
                Unit::Label(_) => None,
            });
            match last_insn {
                Some(DexInsn::Goto { target }) => succs.push(self.target(*target)?),
                Some(DexInsn::If { target, .. }) | Some(DexInsn::IfZ { target, .. }) => {
                    succs.push(self.target(*target)?);
                    succs.push(next.ok_or_else(|| malformed("branch falls off the end"))?);
                }
                Some(DexInsn::PackedSwitch { targets, .. })
                | Some(DexInsn::SparseSwitch { targets, .. }) => {
                    for target in targets {
                        succs.push(self.target(*target)?);
                    }
                    succs.push(next.ok_or_else(|| malformed("switch falls off the end"))?);
                }
                Some(insn) if insn.ends_flow() => {}
                Some(_) => {
                    if let Some(next) = next {
                        succs.push(next);
                    } else {
                        return Err(malformed("code falls off the end"));
                    }
                }
                None => succs.extend(next),
            }
            let mut edges: Vec<(usize, Edge)> = Vec::new();
            for succ in succs {
                if !edges.contains(&(succ, Edge::Normal)) {
                    edges.push((succ, Edge::Normal));
                }
            }
            if let Some(index) = last {
                if matches!(&self.units[index], Unit::Insn { insn, .. } if insn.can_throw()) {
                    for (_, handler) in self.covering(index) {
                        let handler = self.target(handler)?;
                        if !edges.iter().any(|(succ, _)| *succ == handler) {
                            edges.push((handler, Edge::Exceptional));
                        }
                    }
                }
            }
            for (succ, edge) in &edges {
                self.blocks[*succ].preds.push((Some(block), *edge));
            }
            self.blocks[block].succs = edges;
        }
        if !self.blocks.is_empty() {
            self.blocks[0].preds.insert(0, (None, Edge::Normal));
        }
        Ok(())
    }

    fn reverse_post_order(&self) -> Vec<usize> {
        let mut order = Vec::new();
        if self.blocks.is_empty() {
            return order;
        }
        let mut visited = vec![false; self.blocks.len()];
        let mut stack = vec![(0usize, 0usize)];
        visited[0] = true;
        while let Some((block, next)) = stack.pop() {
            if let Some((succ, _)) = self.blocks[block].succs.get(next) {
                stack.push((block, next + 1));
                if !visited[*succ] {
                    visited[*succ] = true;
                    stack.push((*succ, 0));
                }
            } else {
                order.push(block);
            }
        }
        order.reverse();
        order
    }

    /// Register file at method entry and the identity statements binding it.
    fn entry_state(&mut self) -> Result<Vec<Reg>> {
        let mut state = vec![Reg::Undef; self.registers];
        let receiver = if self.ir.is_static { 0 } else { 1 };
        let ins = receiver + descriptor::argument_slots(&self.ir.params) as usize;
        if ins > self.registers {
            return Err(malformed(format!(
                "{} registers cannot hold {ins} argument slots",
                self.registers
            )));
        }
        let mut reg = self.registers - ins;
        let mut stmts = vec![Stmt::Label(self.entry_label)];
        if !self.ir.is_static {
            let this = self
                .ir
                .new_local(TypeHint::Exact(JType::object(self.ir.owner.clone())));
            stmts.push(Stmt::assign(this, Expr::This));
            state[reg] = Reg::Value {
                local: this,
                wide: false,
            };
            reg += 1;
        }
        for (index, ty) in self.ir.params.clone().into_iter().enumerate() {
            let wide = ty.is_wide();
            let local = self.ir.new_local(TypeHint::Exact(ty));
            stmts.push(Stmt::assign(local, Expr::Param(index as u16)));
            state[reg] = Reg::Value { local, wide };
            if wide {
                state[reg + 1] = Reg::High;
                reg += 2;
            } else {
                reg += 1;
            }
        }
        self.ir.stmts = stmts;
        Ok(state)
    }

    /// Must-defined register kinds at the entry of every reachable block.
    fn definedness(&self, order: &[usize], entry: &[Kind]) -> Result<Vec<Option<Vec<Kind>>>> {
        let mut ins: Vec<Option<Vec<Kind>>> = vec![None; self.blocks.len()];
        let mut outs: Vec<Option<(Vec<Kind>, Vec<Kind>)>> = vec![None; self.blocks.len()];
        let mut changed = true;
        while changed {
            changed = false;
            for &block in order {
                let mut merged: Option<Vec<Kind>> = None;
                for (pred, edge) in &self.blocks[block].preds {
                    let incoming = match pred {
                        None => Some(entry.to_vec()),
                        Some(pred) => outs[*pred].as_ref().map(|(out, throw)| match edge {
                            Edge::Normal => out.clone(),
                            Edge::Exceptional => throw.clone(),
                        }),
                    };
                    let Some(incoming) = incoming else {
                        continue;
                    };
                    merged = Some(match merged {
                        None => incoming,
                        Some(current) => current
                            .iter()
                            .zip(&incoming)
                            .map(|(a, b)| if a == b { *a } else { Kind::Undef })
                            .collect(),
                    });
                }
                let Some(kinds) = merged else {
                    continue;
                };
                if ins[block].as_ref() == Some(&kinds) {
                    continue;
                }
                let mut out = kinds.clone();
                let mut throw = kinds.clone();
                for &index in &self.blocks[block].units {
                    throw = out.clone();
                    if let Some(def) = self.unit_def(index)? {
                        self.check_def(def)?;
                        write_kind(&mut out, def);
                    }
                }
                ins[block] = Some(kinds);
                outs[block] = Some((out, throw));
                changed = true;
            }
        }
        Ok(ins)
    }

    fn check_def(&self, def: Def) -> Result<()> {
        let span = if def.wide { 2 } else { 1 };
        if def.reg as usize + span > self.registers {
            return Err(malformed(format!("register v{} out of range", def.reg)));
        }
        Ok(())
    }

    fn unit_def(&self, index: usize) -> Result<Option<Def>> {
        let Unit::Insn { insn, result } = &self.units[index] else {
            return Ok(None);
        };
        let def = |reg: u16, wide: bool| Some(Def { reg, wide });
        let def = match insn {
            DexInsn::Move { dst, kind, .. } => def(*dst, *kind == ValueKind::Wide),
            DexInsn::MoveException { dst }
            | DexInsn::Const { dst, .. }
            | DexInsn::ConstString { dst, .. }
            | DexInsn::ConstClass { dst, .. }
            | DexInsn::InstanceOf { dst, .. }
            | DexInsn::ArrayLength { dst, .. }
            | DexInsn::NewInstance { dst, .. }
            | DexInsn::NewArray { dst, .. }
            | DexInsn::Cmp { dst, .. }
            | DexInsn::BinopLit { dst, .. } => def(*dst, false),
            DexInsn::ConstWide { dst, .. } => def(*dst, true),
            DexInsn::CheckCast { reg, .. } => def(*reg, false),
            DexInsn::Invoke { .. } | DexInsn::FilledNewArray { .. } => {
                result.map(|(dst, kind)| Def {
                    reg: dst,
                    wide: kind == ValueKind::Wide,
                })
            }
            DexInsn::Aget { kind, dst, .. } => def(*dst, *kind == ArrayKind::Wide),
            DexInsn::Iget { dst, field, .. } | DexInsn::Sget { dst, field } => {
                def(*dst, descriptor::parse_field(&field.descriptor)?.is_wide())
            }
            DexInsn::Unop { unop, dst, .. } => def(*dst, unop_result(*unop).is_wide()),
            DexInsn::Binop { operand, dst, .. } => {
                def(*dst, matches!(operand, Operand::Long | Operand::Double))
            }
            _ => None,
        };
        Ok(def)
    }

    fn rename(
        mut self,
        order: &[usize],
        entry_state: Vec<Reg>,
        in_kinds: &[Option<Vec<Kind>>],
    ) -> Result<IrMethod> {
        let position: BTreeMap<usize, usize> =
            order.iter().enumerate().map(|(i, b)| (*b, i)).collect();
        let handler_types = self.handler_types();

        // Blocks that merge values get one phi per defined register.
        let mut phis: BTreeMap<usize, Vec<(usize, LocalId)>> = BTreeMap::new();
        for &block in order {
            let preds = &self.blocks[block].preds;
            let needs_phi = preds.len() != 1
                || preds.iter().any(|(pred, edge)| {
                    *edge == Edge::Exceptional
                        || pred.is_some_and(|pred| position.get(&pred) >= position.get(&block))
                });
            if !needs_phi {
                continue;
            }
            let Some(kinds) = &in_kinds[block] else {
                continue;
            };
            let mut block_phis = Vec::new();
            for (reg, kind) in kinds.iter().enumerate() {
                let hint = match kind {
                    Kind::Narrow => TypeHint::Unknown,
                    Kind::Wide => TypeHint::Wide,
                    Kind::Undef | Kind::High => continue,
                };
                block_phis.push((reg, self.ir.new_local(hint)));
            }
            phis.insert(block, block_phis);
        }

        let mut outs: Vec<Option<Vec<Reg>>> = vec![None; self.blocks.len()];
        let mut throws: Vec<Option<Vec<Reg>>> = vec![None; self.blocks.len()];
        let mut bodies: BTreeMap<usize, Vec<Stmt>> = BTreeMap::new();
        for &block in order {
            let mut state = match phis.get(&block) {
                Some(block_phis) => {
                    let mut state = vec![Reg::Undef; self.registers];
                    for (reg, local) in block_phis {
                        let wide = self.ir.local(*local).hint == TypeHint::Wide;
                        state[*reg] = Reg::Value {
                            local: *local,
                            wide,
                        };
                        if wide {
                            state[*reg + 1] = Reg::High;
                        }
                    }
                    state
                }
                None => {
                    let (pred, edge) = self.blocks[block].preds[0];
                    let incoming = match (pred, edge) {
                        (None, _) => Some(&entry_state),
                        (Some(pred), Edge::Normal) => outs[pred].as_ref(),
                        (Some(pred), Edge::Exceptional) => throws[pred].as_ref(),
                    };
                    incoming
                        .cloned()
                        .ok_or_else(|| malformed("predecessor visited out of order"))?
                }
            };
            let mut body = Vec::new();
            let units = self.blocks[block].units.clone();
            let next_label = self.blocks.get(block + 1).map(|next| next.label);
            for index in units {
                throws[block] = Some(state.clone());
                self.translate(
                    index,
                    &mut state,
                    &mut body,
                    next_label,
                    handler_types.get(&block),
                )?;
            }
            outs[block] = Some(state);
            bodies.insert(block, body);
        }

        for (block, block_phis) in &phis {
            let mut stmts = Vec::new();
            for (reg, local) in block_phis {
                let mut args: Vec<PhiArg> = Vec::new();
                for (pred, edge) in &self.blocks[*block].preds {
                    let (key, state) = match (pred, edge) {
                        (None, _) => (self.entry_label, Some(&entry_state)),
                        (Some(pred), Edge::Normal) => {
                            (self.blocks[*pred].label, outs[*pred].as_ref())
                        }
                        (Some(pred), Edge::Exceptional) => {
                            (self.blocks[*pred].label, throws[*pred].as_ref())
                        }
                    };
                    // Unreachable predecessors contribute nothing.
                    let Some(state) = state else {
                        continue;
                    };
                    let Reg::Value { local: value, .. } = state[*reg] else {
                        return Err(malformed(format!("register v{reg} undefined on a path")));
                    };
                    if let Some(existing) = args.iter().find(|arg| arg.pred == key) {
                        if existing.value != value {
                            return Err(malformed(format!(
                                "conflicting values for v{reg} on parallel edges"
                            )));
                        }
                        continue;
                    }
                    args.push(PhiArg { pred: key, value });
                }
                stmts.push(Stmt::assign(*local, Expr::Phi(args)));
            }
            let body = bodies.entry(*block).or_default();
            let at = usize::from(matches!(
                body.first(),
                Some(Stmt::Assign {
                    value: Expr::CaughtException,
                    ..
                })
            ));
            body.splice(at..at, stmts);
        }

        for (index, block) in self.blocks.iter().enumerate() {
            self.ir.stmts.push(Stmt::Label(block.label));
            if let Some(body) = bodies.remove(&index) {
                self.ir.stmts.extend(body);
            }
        }

        for (start, end, handlers) in &self.tries {
            let start_block = self.block_at_unit(*start)?;
            let end_block = self.block_at_unit(*end)?;
            for (caught, handler) in handlers {
                let handler = self.target(*handler)?;
                self.ir.traps.push(Trap {
                    start: start_block,
                    end: end_block,
                    handler: self.blocks[handler].label,
                    catch: caught.clone(),
                });
            }
        }
        Ok(self.ir)
    }

    fn block_at_unit(&self, unit: usize) -> Result<LabelId> {
        let Unit::Label(id) = self.units[unit] else {
            return Err(malformed("try bound is not a label"));
        };
        Ok(self.blocks[self.target(id)?].label)
    }

    /// Type of the exception delivered to each handler block.
    fn handler_types(&self) -> BTreeMap<usize, JType> {
        let mut types: BTreeMap<usize, JType> = BTreeMap::new();
        for (_, _, handlers) in &self.tries {
            for (caught, label) in handlers {
                let Ok(block) = self.target(*label) else {
                    continue;
                };
                let ty = JType::object(
                    caught
                        .clone()
                        .unwrap_or_else(|| "java/lang/Throwable".to_string()),
                );
                types
                    .entry(block)
                    .and_modify(|existing| {
                        if *existing != ty {
                            *existing = JType::object("java/lang/Throwable");
                        }
                    })
                    .or_insert(ty);
            }
        }
        types
    }

    fn translate(
        &mut self,
        index: usize,
        state: &mut [Reg],
        out: &mut Vec<Stmt>,
        next_label: Option<LabelId>,
        caught_type: Option<&JType>,
    ) -> Result<()> {
        let Unit::Insn { insn, result } = self.units[index] else {
            return Ok(());
        };
        let def = self.unit_def(index)?;
        let read = |reg: u16| -> Result<Expr> {
            match state.get(reg as usize) {
                Some(Reg::Value { local, .. }) => Ok(Expr::Local(*local)),
                _ => Err(malformed(format!("read of undefined register v{reg}"))),
            }
        };
        let label = |id: u32| -> Result<LabelId> { Ok(self.blocks[self.target(id)?].label) };
        let assigned: Option<(Expr, TypeHint)> = match insn {
            DexInsn::Label { .. } => None,
            DexInsn::Nop => {
                out.push(Stmt::Nop);
                None
            }
            DexInsn::Move { src, .. } => Some((read(*src)?, TypeHint::Unknown)),
            DexInsn::MoveResult { .. } => {
                return Err(malformed("move-result without a preceding invoke"));
            }
            DexInsn::MoveException { .. } => {
                let ty = caught_type
                    .cloned()
                    .unwrap_or_else(|| JType::object("java/lang/Throwable"));
                Some((Expr::CaughtException, TypeHint::Exact(ty)))
            }
            DexInsn::ReturnVoid => {
                out.push(Stmt::Return(None));
                None
            }
            DexInsn::Return { src, .. } => {
                out.push(Stmt::Return(Some(read(*src)?)));
                None
            }
            DexInsn::Const { value, .. } => {
                Some((Expr::Const(Constant::Narrow(*value)), TypeHint::Single))
            }
            DexInsn::ConstWide { value, .. } => {
                Some((Expr::Const(Constant::Wide(*value)), TypeHint::Wide))
            }
            DexInsn::ConstString { value, .. } => {
                let constant = Constant::String(value.clone());
                let hint = constant.hint();
                Some((Expr::Const(constant), hint))
            }
            DexInsn::ConstClass { class, .. } => {
                let constant = Constant::Class(descriptor::parse_field(class)?);
                let hint = constant.hint();
                Some((Expr::Const(constant), hint))
            }
            DexInsn::MonitorEnter { reg } => {
                out.push(Stmt::MonitorEnter(read(*reg)?));
                None
            }
            DexInsn::MonitorExit { reg } => {
                out.push(Stmt::MonitorExit(read(*reg)?));
                None
            }
            DexInsn::CheckCast { reg, class } => {
                let ty = reference_type(class)?;
                Some((
                    Expr::CheckCast {
                        ty: ty.clone(),
                        operand: Box::new(read(*reg)?),
                    },
                    TypeHint::Exact(ty),
                ))
            }
            DexInsn::InstanceOf { src, class, .. } => Some((
                Expr::InstanceOf {
                    ty: reference_type(class)?,
                    operand: Box::new(read(*src)?),
                },
                TypeHint::Exact(JType::Int),
            )),
            DexInsn::ArrayLength { array, .. } => Some((
                Expr::ArrayLength(Box::new(read(*array)?)),
                TypeHint::Exact(JType::Int),
            )),
            DexInsn::NewInstance { class, .. } => {
                let name = descriptor::class_name(class)?;
                Some((Expr::New(name.clone()), TypeHint::Exact(JType::Object(name))))
            }
            DexInsn::NewArray { size, class, .. } => {
                let ty = array_type(class)?;
                let elem = ty.element().cloned().unwrap_or(JType::Int);
                Some((
                    Expr::NewArray {
                        elem,
                        size: Box::new(read(*size)?),
                    },
                    TypeHint::Exact(ty),
                ))
            }
            DexInsn::FilledNewArray { args, class } => {
                let ty = array_type(class)?;
                let elem = ty.element().cloned().unwrap_or(JType::Int);
                let values = args.iter().map(|reg| read(*reg)).collect::<Result<_>>()?;
                let expr = Expr::FilledArray { elem, values };
                if result.is_none() {
                    out.push(Stmt::Eval(expr));
                    None
                } else {
                    Some((expr, TypeHint::Exact(ty)))
                }
            }
            DexInsn::FillArrayData { array, width, data } => {
                let data = match *width {
                    1 | 2 | 4 => data
                        .iter()
                        .map(|value| Constant::Narrow(*value as i32))
                        .collect(),
                    8 => data.iter().map(|value| Constant::Wide(*value)).collect(),
                    other => return Err(malformed(format!("fill-array-data width {other}"))),
                };
                out.push(Stmt::FillArrayData {
                    array: read(*array)?,
                    data,
                    elem: TypeHint::Unknown,
                });
                None
            }
            DexInsn::Throw { reg } => {
                out.push(Stmt::Throw(read(*reg)?));
                None
            }
            DexInsn::Goto { target } => {
                out.push(Stmt::Goto(label(*target)?));
                None
            }
            DexInsn::PackedSwitch {
                reg,
                first_key,
                targets,
            } => {
                let mut cases = Vec::with_capacity(targets.len());
                for (offset, target) in targets.iter().enumerate() {
                    let key = first_key.wrapping_add(offset as i32);
                    cases.push((key, label(*target)?));
                }
                out.push(Stmt::Switch {
                    value: read(*reg)?,
                    cases,
                    default: next_label.ok_or_else(|| malformed("switch at end of code"))?,
                });
                None
            }
            DexInsn::SparseSwitch { reg, keys, targets } => {
                if keys.len() != targets.len() {
                    return Err(malformed("sparse-switch keys and targets differ in length"));
                }
                let mut cases = Vec::with_capacity(targets.len());
                for (key, target) in keys.iter().zip(targets) {
                    cases.push((*key, label(*target)?));
                }
                out.push(Stmt::Switch {
                    value: read(*reg)?,
                    cases,
                    default: next_label.ok_or_else(|| malformed("switch at end of code"))?,
                });
                None
            }
            DexInsn::Cmp { cmp, a, b, .. } => {
                let (op, kind) = match cmp {
                    CmpType::CmplFloat => (CompareOp::Cmpl, NumKind::Float),
                    CmpType::CmpgFloat => (CompareOp::Cmpg, NumKind::Float),
                    CmpType::CmplDouble => (CompareOp::Cmpl, NumKind::Double),
                    CmpType::CmpgDouble => (CompareOp::Cmpg, NumKind::Double),
                    CmpType::CmpLong => (CompareOp::Cmp, NumKind::Long),
                };
                Some((
                    Expr::Compare {
                        op,
                        kind,
                        left: Box::new(read(*a)?),
                        right: Box::new(read(*b)?),
                    },
                    TypeHint::Exact(JType::Int),
                ))
            }
            DexInsn::If { test, a, b, target } => {
                out.push(Stmt::If {
                    op: cond(*test),
                    left: read(*a)?,
                    right: read(*b)?,
                    target: label(*target)?,
                });
                None
            }
            DexInsn::IfZ { test, a, target } => {
                out.push(Stmt::If {
                    op: cond(*test),
                    left: read(*a)?,
                    right: Expr::Const(Constant::Narrow(0)),
                    target: label(*target)?,
                });
                None
            }
            DexInsn::Aget {
                kind, array, index, ..
            } => {
                let elem = array_kind_hint(*kind);
                Some((
                    Expr::ArrayGet {
                        array: Box::new(read(*array)?),
                        index: Box::new(read(*index)?),
                        elem: elem.clone(),
                    },
                    elem,
                ))
            }
            DexInsn::Aput {
                kind,
                src,
                array,
                index,
            } => {
                out.push(Stmt::ArraySet {
                    array: read(*array)?,
                    index: read(*index)?,
                    value: read(*src)?,
                    elem: array_kind_hint(*kind),
                });
                None
            }
            DexInsn::Iget { object, field, .. } => {
                let field = field_ref(field)?;
                let hint = TypeHint::Exact(field.ty.clone());
                Some((
                    Expr::FieldGet {
                        field,
                        object: Some(Box::new(read(*object)?)),
                    },
                    hint,
                ))
            }
            DexInsn::Sget { field, .. } => {
                let field = field_ref(field)?;
                let hint = TypeHint::Exact(field.ty.clone());
                Some((Expr::FieldGet { field, object: None }, hint))
            }
            DexInsn::Iput { src, object, field } => {
                out.push(Stmt::FieldSet {
                    field: field_ref(field)?,
                    object: Some(read(*object)?),
                    value: read(*src)?,
                });
                None
            }
            DexInsn::Sput { src, field } => {
                out.push(Stmt::FieldSet {
                    field: field_ref(field)?,
                    object: None,
                    value: read(*src)?,
                });
                None
            }
            DexInsn::Invoke { kind, method, args } => {
                let method = method_ref(method)?;
                let mut regs = args.iter();
                let mut operands = Vec::new();
                if *kind != InvokeType::Static {
                    let receiver = regs
                        .next()
                        .ok_or_else(|| malformed("instance invoke without receiver"))?;
                    operands.push(read(*receiver)?);
                }
                for param in &method.params {
                    let reg = regs
                        .next()
                        .ok_or_else(|| malformed(format!("too few arguments for {}", method.name)))?;
                    operands.push(read(*reg)?);
                    if param.is_wide() {
                        regs.next();
                    }
                }
                if regs.next().is_some() {
                    return Err(malformed(format!("too many arguments for {}", method.name)));
                }
                let ret = method.ret.clone();
                let expr = Expr::Invoke {
                    kind: invoke_kind(*kind),
                    method,
                    args: operands,
                };
                match (result, ret) {
                    (None, _) => {
                        out.push(Stmt::Eval(expr));
                        None
                    }
                    (Some(_), JType::Void) => {
                        return Err(malformed("move-result after a void invoke"));
                    }
                    (Some(_), ret) => Some((expr, TypeHint::Exact(ret))),
                }
            }
            DexInsn::Unop { unop, src, .. } => {
                let (op, ty) = unary(*unop);
                Some((
                    Expr::Unary {
                        op,
                        operand: Box::new(read(*src)?),
                    },
                    TypeHint::Exact(ty),
                ))
            }
            DexInsn::Binop {
                binop,
                operand,
                a,
                b,
                ..
            } => {
                let kind = num_kind(*operand);
                let op = binary(*binop)?;
                Some((
                    Expr::Binary {
                        op,
                        kind,
                        left: Box::new(read(*a)?),
                        right: Box::new(read(*b)?),
                    },
                    TypeHint::Exact(kind.jtype()),
                ))
            }
            DexInsn::BinopLit {
                binop,
                src,
                literal,
                ..
            } => {
                let literal = Expr::Const(Constant::Int(*literal));
                let source = read(*src)?;
                let (op, left, right) = match binop {
                    BinOp::Rsub => (BinaryOp::Sub, literal, source),
                    other => (binary(*other)?, source, literal),
                };
                Some((
                    Expr::Binary {
                        op,
                        kind: NumKind::Int,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    TypeHint::Exact(JType::Int),
                ))
            }
        };
        if let Some((value, hint)) = assigned {
            let def = def.ok_or_else(|| malformed("value-producing instruction without target"))?;
            self.check_def(def)?;
            let hint = if def.wide && hint == TypeHint::Unknown {
                TypeHint::Wide
            } else {
                hint
            };
            let local = self.ir.new_local(hint);
            out.push(Stmt::assign(local, value));
            write_slots(
                state,
                def,
                Reg::Value { local, wide: false },
                Reg::Value { local, wide: true },
                Reg::High,
                Reg::Undef,
                |reg| matches!(reg, Reg::Value { wide: true, .. }),
            );
        }
        Ok(())
    }
}

fn pair_results(insns: &[DexInsn]) -> Result<Vec<Unit<'_>>> {
    let mut units = Vec::with_capacity(insns.len());
    let mut iter = insns.iter().peekable();
    while let Some(insn) = iter.next() {
        match insn {
            DexInsn::Label { id } => units.push(Unit::Label(*id)),
            DexInsn::Invoke { .. } | DexInsn::FilledNewArray { .. } => {
                let result = match iter.peek() {
                    Some(DexInsn::MoveResult { dst, kind }) => {
                        let result = (*dst, *kind);
                        iter.next();
                        Some(result)
                    }
                    _ => None,
                };
                units.push(Unit::Insn { insn, result });
            }
            DexInsn::MoveResult { .. } => {
                return Err(malformed("move-result without a preceding invoke"));
            }
            other => units.push(Unit::Insn {
                insn: other,
                result: None,
            }),
        }
    }
    Ok(units)
}

fn lookup(labels: &BTreeMap<u32, usize>, id: u32) -> Result<usize> {
    labels
        .get(&id)
        .copied()
        .ok_or_else(|| malformed(format!("unknown label {id}")))
}

fn malformed(message: impl Into<String>) -> ConversionError {
    ConversionError::Malformed(message.into())
}

fn reference_type(descriptor_text: &str) -> Result<JType> {
    let ty = descriptor::parse_field(descriptor_text)?;
    if !ty.is_reference() {
        return Err(malformed(format!("{descriptor_text} is not a reference type")));
    }
    Ok(ty)
}

fn array_type(descriptor_text: &str) -> Result<JType> {
    let ty = descriptor::parse_field(descriptor_text)?;
    if ty.element().is_none() {
        return Err(malformed(format!("{descriptor_text} is not an array type")));
    }
    Ok(ty)
}

fn field_ref(field: &DexFieldRef) -> Result<FieldRef> {
    Ok(FieldRef {
        owner: descriptor::class_name(&field.owner)?,
        name: field.name.clone(),
        descriptor: field.descriptor.clone(),
        ty: descriptor::parse_field(&field.descriptor)?,
    })
}

fn method_ref(method: &DexMethodRef) -> Result<MethodRef> {
    let (params, ret) = descriptor::parse_method(&method.descriptor)?;
    Ok(MethodRef {
        owner: descriptor::class_name(&method.owner)?,
        name: method.name.clone(),
        descriptor: method.descriptor.clone(),
        params,
        ret,
    })
}

fn array_kind_hint(kind: ArrayKind) -> TypeHint {
    match kind {
        ArrayKind::Single => TypeHint::Prim,
        ArrayKind::Wide => TypeHint::Wide,
        ArrayKind::Object => TypeHint::Ref,
        ArrayKind::Boolean => TypeHint::Exact(JType::Boolean),
        ArrayKind::Byte => TypeHint::Exact(JType::Byte),
        ArrayKind::Char => TypeHint::Exact(JType::Char),
        ArrayKind::Short => TypeHint::Exact(JType::Short),
    }
}

fn cond(test: Test) -> CondOp {
    match test {
        Test::Eq => CondOp::Eq,
        Test::Ne => CondOp::Ne,
        Test::Lt => CondOp::Lt,
        Test::Ge => CondOp::Ge,
        Test::Gt => CondOp::Gt,
        Test::Le => CondOp::Le,
    }
}

fn invoke_kind(kind: InvokeType) -> InvokeKind {
    match kind {
        InvokeType::Virtual => InvokeKind::Virtual,
        InvokeType::Super => InvokeKind::Super,
        InvokeType::Direct => InvokeKind::Direct,
        InvokeType::Static => InvokeKind::Static,
        InvokeType::Interface => InvokeKind::Interface,
    }
}

fn num_kind(operand: Operand) -> NumKind {
    match operand {
        Operand::Int => NumKind::Int,
        Operand::Long => NumKind::Long,
        Operand::Float => NumKind::Float,
        Operand::Double => NumKind::Double,
    }
}

fn binary(op: BinOp) -> Result<BinaryOp> {
    Ok(match op {
        BinOp::Add => BinaryOp::Add,
        BinOp::Sub => BinaryOp::Sub,
        BinOp::Mul => BinaryOp::Mul,
        BinOp::Div => BinaryOp::Div,
        BinOp::Rem => BinaryOp::Rem,
        BinOp::And => BinaryOp::And,
        BinOp::Or => BinaryOp::Or,
        BinOp::Xor => BinaryOp::Xor,
        BinOp::Shl => BinaryOp::Shl,
        BinOp::Shr => BinaryOp::Shr,
        BinOp::Ushr => BinaryOp::Ushr,
        BinOp::Rsub => return Err(malformed("rsub requires a literal operand")),
    })
}

fn unop_result(op: UnOp) -> JType {
    unary(op).1
}

fn unary(op: UnOp) -> (UnaryOp, JType) {
    let convert = |from, to: JType| (UnaryOp::Convert { from, to: to.clone() }, to);
    match op {
        UnOp::NegInt => (UnaryOp::Neg(NumKind::Int), JType::Int),
        UnOp::NotInt => (UnaryOp::Not(NumKind::Int), JType::Int),
        UnOp::NegLong => (UnaryOp::Neg(NumKind::Long), JType::Long),
        UnOp::NotLong => (UnaryOp::Not(NumKind::Long), JType::Long),
        UnOp::NegFloat => (UnaryOp::Neg(NumKind::Float), JType::Float),
        UnOp::NegDouble => (UnaryOp::Neg(NumKind::Double), JType::Double),
        UnOp::IntToLong => convert(NumKind::Int, JType::Long),
        UnOp::IntToFloat => convert(NumKind::Int, JType::Float),
        UnOp::IntToDouble => convert(NumKind::Int, JType::Double),
        UnOp::LongToInt => convert(NumKind::Long, JType::Int),
        UnOp::LongToFloat => convert(NumKind::Long, JType::Float),
        UnOp::LongToDouble => convert(NumKind::Long, JType::Double),
        UnOp::FloatToInt => convert(NumKind::Float, JType::Int),
        UnOp::FloatToLong => convert(NumKind::Float, JType::Long),
        UnOp::FloatToDouble => convert(NumKind::Float, JType::Double),
        UnOp::DoubleToInt => convert(NumKind::Double, JType::Int),
        UnOp::DoubleToLong => convert(NumKind::Double, JType::Long),
        UnOp::DoubleToFloat => convert(NumKind::Double, JType::Float),
        UnOp::IntToByte => convert(NumKind::Int, JType::Byte),
        UnOp::IntToChar => convert(NumKind::Int, JType::Char),
        UnOp::IntToShort => convert(NumKind::Int, JType::Short),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{MethodBuilder, class_context};

    #[test]
    fn straight_line_code_has_no_phis() {
        let method = MethodBuilder::new("answer", "()I")
            .registers(1)
            .insn(DexInsn::Const { dst: 0, value: 42 })
            .insn(DexInsn::Return {
                src: 0,
                kind: ValueKind::Single,
            })
            .build();
        let ir = build(&method);
        assert!(!ir.has_phi());
        ir.validate("build").expect("valid");
        assert!(
            ir.stmts
                .iter()
                .any(|stmt| matches!(stmt, Stmt::Return(Some(Expr::Local(_)))))
        );
    }

    #[test]
    fn join_point_gets_phi_over_both_paths() {
        // v0 = p0 == 0 ? 1 : 2
        let method = MethodBuilder::new("pick", "(I)I")
            .registers(2)
            .insn(DexInsn::IfZ {
                test: Test::Eq,
                a: 1,
                target: 1,
            })
            .insn(DexInsn::Const { dst: 0, value: 2 })
            .insn(DexInsn::Goto { target: 2 })
            .label(1)
            .insn(DexInsn::Const { dst: 0, value: 1 })
            .label(2)
            .insn(DexInsn::Return {
                src: 0,
                kind: ValueKind::Single,
            })
            .build();
        let ir = build(&method);
        ir.validate("build").expect("valid");
        let phi_with_two_args = ir.stmts.iter().any(|stmt| {
            matches!(stmt, Stmt::Assign { value: Expr::Phi(args), .. }
                if args.len() == 2 && args[0].value != args[1].value)
        });
        assert!(phi_with_two_args, "{ir}");
    }

    #[test]
    fn try_range_becomes_trap_with_handler_phi() {
        let method = MethodBuilder::new("guarded", "()V")
            .registers(1)
            .label(0)
            .insn(DexInsn::Invoke {
                kind: InvokeType::Static,
                method: DexMethodRef {
                    owner: "Lcom/example/Util;".to_string(),
                    name: "work".to_string(),
                    descriptor: "()V".to_string(),
                },
                args: Vec::new(),
            })
            .label(1)
            .insn(DexInsn::ReturnVoid)
            .label(2)
            .insn(DexInsn::MoveException { dst: 0 })
            .insn(DexInsn::ReturnVoid)
            .try_catch(0, 1, Some("Ljava/lang/Exception;"), 2)
            .build();
        let ir = build(&method);
        ir.validate("build").expect("valid");
        assert_eq!(ir.traps.len(), 1);
        assert_eq!(ir.traps[0].catch.as_deref(), Some("java/lang/Exception"));
        let caught = ir.stmts.iter().find_map(|stmt| match stmt {
            Stmt::Assign {
                local,
                value: Expr::CaughtException,
            } => Some(*local),
            _ => None,
        });
        let caught = caught.expect("catch identity");
        assert_eq!(
            ir.local(caught).hint,
            TypeHint::Exact(JType::object("java/lang/Exception"))
        );
    }

    #[test]
    fn wide_arguments_consume_register_pairs() {
        let method = MethodBuilder::new("wide", "(J)J")
            .static_method()
            .registers(4)
            .insn(DexInsn::Invoke {
                kind: InvokeType::Static,
                method: DexMethodRef {
                    owner: "Ljava/lang/Math;".to_string(),
                    name: "abs".to_string(),
                    descriptor: "(J)J".to_string(),
                },
                args: vec![2, 3],
            })
            .insn(DexInsn::MoveResult {
                dst: 0,
                kind: ValueKind::Wide,
            })
            .insn(DexInsn::Return {
                src: 0,
                kind: ValueKind::Wide,
            })
            .build();
        let ir = build(&method);
        let invoke_args = ir.stmts.iter().find_map(|stmt| match stmt {
            Stmt::Assign {
                value: Expr::Invoke { args, .. },
                ..
            } => Some(args.len()),
            _ => None,
        });
        assert_eq!(invoke_args, Some(1));
    }

    #[test]
    fn reading_undefined_register_is_malformed() {
        let method = MethodBuilder::new("broken", "()I")
            .static_method()
            .registers(1)
            .insn(DexInsn::Return {
                src: 0,
                kind: ValueKind::Single,
            })
            .build();
        let code = method.code.as_ref().expect("code");
        let error =
            build_method(&class_context(), &method, code, false).expect_err("undefined register");
        assert!(matches!(error, ConversionError::Malformed(_)));
    }

    #[test]
    fn body_without_instructions_is_malformed() {
        let method = MethodBuilder::new("empty", "()V").label(0).build();
        let code = method.code.as_ref().expect("code");
        let error = build_method(&class_context(), &method, code, false).expect_err("empty body");
        assert!(matches!(error, ConversionError::Malformed(_)));
    }

    #[test]
    fn fill_array_data_rejects_odd_element_width() {
        let fill = |width| {
            MethodBuilder::new("fill", "()V")
                .static_method()
                .registers(2)
                .insn(DexInsn::Const { dst: 0, value: 3 })
                .insn(DexInsn::NewArray {
                    dst: 1,
                    size: 0,
                    class: "[B".to_string(),
                })
                .insn(DexInsn::FillArrayData {
                    array: 1,
                    width,
                    data: vec![1, 2, 3],
                })
                .insn(DexInsn::ReturnVoid)
                .build()
        };
        build(&fill(1));
        let method = fill(3);
        let code = method.code.as_ref().expect("code");
        let error = build_method(&class_context(), &method, code, false).expect_err("width 3");
        assert!(error.to_string().contains("width 3"), "{error}");
    }

    #[test]
    fn loop_header_phi_references_back_edge() {
        // for (v0 = 0; v0 < p0; v0++) {}
        let method = MethodBuilder::new("count", "(I)V")
            .static_method()
            .registers(2)
            .insn(DexInsn::Const { dst: 0, value: 0 })
            .label(1)
            .insn(DexInsn::If {
                test: Test::Ge,
                a: 0,
                b: 1,
                target: 2,
            })
            .insn(DexInsn::BinopLit {
                binop: BinOp::Add,
                dst: 0,
                src: 0,
                literal: 1,
            })
            .insn(DexInsn::Goto { target: 1 })
            .label(2)
            .insn(DexInsn::ReturnVoid)
            .build();
        let ir = build(&method);
        ir.validate("build").expect("valid");
        let looped = ir.stmts.iter().any(|stmt| match stmt {
            Stmt::Assign {
                local,
                value: Expr::Phi(args),
            } => args.iter().any(|arg| arg.value != *local) && args.len() == 2,
            _ => false,
        });
        assert!(looped, "{ir}");
    }

    fn build(method: &DexMethod) -> IrMethod {
        let code = method.code.as_ref().expect("code");
        build_method(&class_context(), method, code, false).expect("build")
    }
}
