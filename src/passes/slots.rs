//! Output frame slot assignment.
//!
//! `this` and the parameters keep the slots the JVM calling convention gives them. Every other
//! local either gets a fresh slot, or, with reuse enabled, the lowest slot range that no
//! interfering local occupies.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::ir::{Expr, Flow, IrMethod, LocalId, Stmt};
use crate::passes::Pass;

pub(crate) struct AssignSlots {
    pub(crate) reuse: bool,
}

impl Pass for AssignSlots {
    fn name(&self) -> &'static str {
        "slots"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let mut slots: Vec<Option<u16>> = vec![None; method.locals.len()];
        for stmt in &method.stmts {
            match stmt {
                Stmt::Assign {
                    local,
                    value: Expr::This,
                } => slots[local.index()] = Some(0),
                Stmt::Assign {
                    local,
                    value: Expr::Param(index),
                } => slots[local.index()] = Some(method.param_slot(*index)),
                _ => {}
            }
        }
        let order = definition_order(method);
        if self.reuse {
            let interference = interference(method)?;
            color(method, &order, &interference, &mut slots);
        } else {
            let mut next = method.param_slots();
            for local in order {
                if slots[local.index()].is_none() {
                    slots[local.index()] = Some(next);
                    next += method.local_type(local).size();
                }
            }
        }
        let mut changed = false;
        for (info, slot) in method.locals.iter_mut().zip(slots) {
            if info.slot != slot {
                info.slot = slot;
                changed = true;
            }
        }
        Ok(changed)
    }
}

/// Locals in order of first definition, never-defined ones last.
fn definition_order(method: &IrMethod) -> Vec<LocalId> {
    let mut seen = vec![false; method.locals.len()];
    let mut order = Vec::with_capacity(method.locals.len());
    for local in method.stmts.iter().filter_map(Stmt::defined_local) {
        if !std::mem::replace(&mut seen[local.index()], true) {
            order.push(local);
        }
    }
    for (index, seen) in seen.iter().enumerate() {
        if !seen {
            order.push(LocalId(index as u32));
        }
    }
    order
}

/// Interference graph plus the copy partners used as coloring preferences.
struct Interference {
    edges: Vec<BTreeSet<LocalId>>,
    partners: Vec<Vec<LocalId>>,
}

fn interference(method: &IrMethod) -> Result<Interference> {
    let live_out = liveness(method)?;
    let count = method.locals.len();
    let mut edges = vec![BTreeSet::new(); count];
    let mut partners = vec![Vec::new(); count];
    for (index, stmt) in method.stmts.iter().enumerate() {
        let Stmt::Assign { local, value } = stmt else {
            continue;
        };
        let source = value.as_local();
        if let Some(source) = source {
            partners[local.index()].push(source);
            partners[source.index()].push(*local);
        }
        for live in &live_out[index] {
            if live != local && Some(*live) != source {
                edges[local.index()].insert(*live);
                edges[live.index()].insert(*local);
            }
        }
    }
    Ok(Interference { edges, partners })
}

/// Locals live after each statement along normal flow.
///
/// Live-in also absorbs the live-in of reachable handlers, since a throwing statement leaves
/// its own definition unwritten.
fn liveness(method: &IrMethod) -> Result<Vec<BTreeSet<LocalId>>> {
    let flow = Flow::new(method)?;
    let count = method.stmts.len();
    let normal: Vec<Vec<usize>> = (0..count)
        .map(|index| flow.normal_successors(method, index))
        .collect();
    let exceptional: Vec<Vec<usize>> = (0..count)
        .map(|index| flow.exceptional_successors(method, index))
        .collect();
    let uses: Vec<Vec<LocalId>> = method.stmts.iter().map(Stmt::uses).collect();
    let mut live_in: Vec<BTreeSet<LocalId>> = vec![BTreeSet::new(); count];
    let mut live_out: Vec<BTreeSet<LocalId>> = vec![BTreeSet::new(); count];
    let mut changed = true;
    while changed {
        changed = false;
        for index in (0..count).rev() {
            let out: BTreeSet<LocalId> = normal[index]
                .iter()
                .flat_map(|successor| live_in[*successor].iter().copied())
                .collect();
            let defined = method.stmts[index].defined_local();
            let mut incoming: BTreeSet<LocalId> = out
                .iter()
                .copied()
                .filter(|local| Some(*local) != defined)
                .collect();
            incoming.extend(uses[index].iter().copied());
            for handler in &exceptional[index] {
                incoming.extend(live_in[*handler].iter().copied());
            }
            if incoming != live_in[index] {
                live_in[index] = incoming;
                changed = true;
            }
            live_out[index] = out;
        }
    }
    Ok(live_out)
}

fn color(
    method: &IrMethod,
    order: &[LocalId],
    interference: &Interference,
    slots: &mut [Option<u16>],
) {
    let floor = if method.is_static { 0 } else { 1 };
    for &local in order {
        if slots[local.index()].is_some() {
            continue;
        }
        let size = method.local_type(local).size();
        let taken: Vec<(u16, u16)> = interference.edges[local.index()]
            .iter()
            .filter_map(|other| {
                slots[other.index()].map(|slot| (slot, slot + method.local_type(*other).size()))
            })
            .collect();
        let free = |slot: u16| {
            slot >= floor
                && taken
                    .iter()
                    .all(|(start, end)| slot + size <= *start || *end <= slot)
        };
        let preferred = interference.partners[local.index()]
            .iter()
            .filter(|partner| method.local_type(**partner).size() == size)
            .find_map(|partner| slots[partner.index()].filter(|slot| free(*slot)));
        let slot = preferred.unwrap_or_else(|| (floor..).find(|slot| free(*slot)).unwrap_or(floor));
        slots[local.index()] = Some(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, JType, LabelId, NumKind, TypeHint};
    use crate::passes::fixtures::int_method;

    fn add(left: LocalId, right: LocalId) -> Expr {
        Expr::Binary {
            op: BinaryOp::Add,
            kind: NumKind::Int,
            left: Box::new(Expr::Local(left)),
            right: Box::new(Expr::Local(right)),
        }
    }

    /// `p = param; a = p + p; b = a + a; return b`
    fn chain() -> (IrMethod, [LocalId; 3]) {
        let mut ir = int_method();
        let p = ir.new_local(TypeHint::Exact(JType::Int));
        let a = ir.new_local(TypeHint::Exact(JType::Int));
        let b = ir.new_local(TypeHint::Exact(JType::Long));
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(p, Expr::Param(0)),
            Stmt::assign(a, add(p, p)),
            Stmt::assign(
                b,
                Expr::Unary {
                    op: crate::ir::UnaryOp::Convert {
                        from: NumKind::Int,
                        to: JType::Long,
                    },
                    operand: Box::new(Expr::Local(a)),
                },
            ),
            Stmt::Return(Some(Expr::Local(a))),
        ];
        (ir, [p, a, b])
    }

    #[test]
    fn parameters_are_pre_colored_and_others_get_fresh_slots() {
        let (mut ir, [p, a, b]) = chain();
        assert!(AssignSlots { reuse: false }.run(&mut ir).expect("run"));
        assert_eq!(ir.local(p).slot, Some(0));
        assert_eq!(ir.local(a).slot, Some(1));
        assert_eq!(ir.local(b).slot, Some(2));
        assert!(!AssignSlots { reuse: false }.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn dead_parameter_slot_is_reused_and_live_ranges_stay_disjoint() {
        let (mut ir, [p, a, b]) = chain();
        assert!(AssignSlots { reuse: true }.run(&mut ir).expect("run"));
        assert_eq!(ir.local(p).slot, Some(0));
        // `p` is dead once `a` is defined, so `a` may take its slot.
        assert_eq!(ir.local(a).slot, Some(0));
        // `b` is wide and `a` is still live: the pair must avoid slot 0.
        assert_eq!(ir.local(b).slot, Some(1));
        assert!(!AssignSlots { reuse: true }.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn copy_partner_shares_a_slot() {
        let mut ir = int_method();
        let p = ir.new_local(TypeHint::Exact(JType::Int));
        let x = ir.new_local(TypeHint::Exact(JType::Int));
        let y = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(p, Expr::Param(0)),
            Stmt::assign(x, add(p, p)),
            Stmt::assign(y, Expr::Local(x)),
            Stmt::Return(Some(add(y, p))),
        ];
        AssignSlots { reuse: true }.run(&mut ir).expect("run");
        assert_eq!(ir.local(x).slot, ir.local(y).slot);
        assert_ne!(ir.local(x).slot, ir.local(p).slot);
    }
}
