use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::ir::{Expr, Flow, IrMethod, LabelId, LocalId, Stmt};
use crate::passes::{Pass, block_of, retain_indexed};

/// Removes unreachable statements, dead traps, stale phi arguments and unused pure assignments.
pub(crate) struct DeadCode;

impl Pass for DeadCode {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let mut changed = false;
        loop {
            let round = remove_unreachable(method)?
                | remove_dead_traps(method)
                | prune_phi_arguments(method)?
                | remove_unused_assignments(method);
            if !round {
                return Ok(changed);
            }
            changed = true;
        }
    }
}

fn remove_unreachable(method: &mut IrMethod) -> Result<bool> {
    let flow = Flow::new(method)?;
    let reachable = flow.reachable(method);
    let keep: Vec<bool> = method
        .stmts
        .iter()
        .zip(&reachable)
        .map(|(stmt, reachable)| *reachable || stmt.is_label())
        .collect();
    if keep.iter().all(|kept| *kept) {
        return Ok(false);
    }
    retain_indexed(method, &keep);
    Ok(true)
}

fn remove_dead_traps(method: &mut IrMethod) -> bool {
    let positions: BTreeMap<LabelId, usize> = method
        .stmts
        .iter()
        .enumerate()
        .filter_map(|(index, stmt)| stmt.as_label().map(|label| (label, index)))
        .collect();
    let before = method.traps.len();
    let stmts = &method.stmts;
    method
        .traps
        .retain(|trap| match (positions.get(&trap.start), positions.get(&trap.end)) {
            (Some(start), Some(end)) if start < end => {
                stmts[start + 1..*end].iter().any(Stmt::can_throw)
            }
            _ => false,
        });
    method.traps.len() != before
}

fn prune_phi_arguments(method: &mut IrMethod) -> Result<bool> {
    let flow = Flow::new(method)?;
    let reachable = flow.reachable(method);
    let preds = flow.predecessor_blocks(method, &reachable);
    let blocks = block_of(method);
    let empty = BTreeSet::new();
    let mut changed = false;
    for (stmt, block) in method.stmts.iter_mut().zip(blocks) {
        let Stmt::Assign {
            value: Expr::Phi(args),
            ..
        } = stmt
        else {
            continue;
        };
        let incoming = block
            .and_then(|block| preds.get(&block))
            .unwrap_or(&empty);
        let before = args.len();
        args.retain(|arg| incoming.contains(&arg.pred));
        changed |= args.len() != before;
    }
    Ok(changed)
}

/// Mark-and-sweep over locals: roots are statements with effects.
fn remove_unused_assignments(method: &mut IrMethod) -> bool {
    let removable = |stmt: &Stmt| matches!(stmt, Stmt::Assign { value, .. } if value.is_pure());
    let definitions = method.definitions();
    let mut live: BTreeSet<LocalId> = BTreeSet::new();
    let mut worklist: Vec<LocalId> = Vec::new();
    for stmt in method.stmts.iter().filter(|stmt| !removable(stmt)) {
        stmt.for_each_use(&mut |id| {
            if live.insert(id) {
                worklist.push(id);
            }
        });
    }
    while let Some(id) = worklist.pop() {
        let Some(index) = definitions[id.index()] else {
            continue;
        };
        method.stmts[index].for_each_use(&mut |used| {
            if live.insert(used) {
                worklist.push(used);
            }
        });
    }
    let keep: Vec<bool> = method
        .stmts
        .iter()
        .map(|stmt| match stmt.defined_local() {
            Some(local) if removable(stmt) => live.contains(&local),
            _ => true,
        })
        .collect();
    if keep.iter().all(|kept| *kept) {
        return false;
    }
    retain_indexed(method, &keep);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JType, PhiArg, Trap, TypeHint};
    use crate::passes::fixtures::{int_method, void_method};

    #[test]
    fn unreachable_statements_go_but_labels_stay() {
        let mut ir = void_method();
        let entry = ir.new_label();
        let orphan = ir.new_label();
        ir.stmts = vec![
            Stmt::Label(entry),
            Stmt::Return(None),
            Stmt::Eval(Expr::int(1)),
            Stmt::Label(orphan),
            Stmt::Return(None),
        ];
        assert!(DeadCode.run(&mut ir).expect("run"));
        assert_eq!(
            ir.stmts,
            vec![Stmt::Label(entry), Stmt::Return(None), Stmt::Label(orphan)]
        );
        assert!(!DeadCode.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn unused_pure_assignment_is_removed_but_invoke_is_kept() {
        let mut ir = int_method();
        let entry = ir.new_label();
        let dead = ir.new_local(TypeHint::Exact(JType::Int));
        let used = ir.new_local(TypeHint::Exact(JType::Int));
        let call = ir.new_local(TypeHint::Exact(JType::Int));
        let invoke = Expr::Invoke {
            kind: crate::ir::InvokeKind::Static,
            method: crate::ir::MethodRef {
                owner: "a/B".to_string(),
                name: "f".to_string(),
                descriptor: "()I".to_string(),
                params: Vec::new(),
                ret: JType::Int,
            },
            args: Vec::new(),
        };
        ir.stmts = vec![
            Stmt::Label(entry),
            Stmt::assign(dead, Expr::int(3)),
            Stmt::assign(used, Expr::int(4)),
            Stmt::assign(call, invoke),
            Stmt::Return(Some(Expr::Local(used))),
        ];
        DeadCode.run(&mut ir).expect("run");
        assert_eq!(ir.stmts.len(), 4);
        assert!(!ir.stmts.iter().any(|stmt| stmt.defined_local() == Some(dead)));
        assert!(ir.stmts.iter().any(|stmt| stmt.defined_local() == Some(call)));
    }

    #[test]
    fn trap_without_throwing_statement_is_dropped() {
        let mut ir = void_method();
        let start = ir.new_label();
        let end = ir.new_label();
        let handler = ir.new_label();
        let caught = ir.new_local(TypeHint::Ref);
        ir.stmts = vec![
            Stmt::Label(start),
            Stmt::Nop,
            Stmt::Label(end),
            Stmt::Return(None),
            Stmt::Label(handler),
            Stmt::assign(caught, Expr::CaughtException),
            Stmt::Throw(Expr::Local(caught)),
        ];
        ir.traps.push(Trap {
            start,
            end,
            handler,
            catch: None,
        });
        DeadCode.run(&mut ir).expect("run");
        assert!(ir.traps.is_empty());
        assert_eq!(ir.stmts.last(), Some(&Stmt::Label(handler)));
    }

    #[test]
    fn phi_arguments_from_removed_edges_are_pruned() {
        let mut ir = int_method();
        let entry = ir.new_label();
        let dead = ir.new_label();
        let join = ir.new_label();
        let a = ir.new_local(TypeHint::Exact(JType::Int));
        let b = ir.new_local(TypeHint::Exact(JType::Int));
        let phi = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(entry),
            Stmt::assign(a, Expr::Param(0)),
            Stmt::Goto(join),
            Stmt::Label(dead),
            Stmt::assign(b, Expr::int(2)),
            Stmt::Goto(join),
            Stmt::Label(join),
            Stmt::assign(
                phi,
                Expr::Phi(vec![
                    PhiArg {
                        pred: entry,
                        value: a,
                    },
                    PhiArg {
                        pred: dead,
                        value: b,
                    },
                ]),
            ),
            Stmt::Return(Some(Expr::Local(phi))),
        ];
        DeadCode.run(&mut ir).expect("run");
        let args = ir.stmts.iter().find_map(|stmt| match stmt {
            Stmt::Assign {
                value: Expr::Phi(args),
                ..
            } => Some(args.clone()),
            _ => None,
        });
        assert_eq!(
            args,
            Some(vec![PhiArg {
                pred: entry,
                value: a
            }])
        );
    }
}
