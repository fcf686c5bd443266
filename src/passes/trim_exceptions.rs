use std::collections::BTreeMap;

use crate::error::Result;
use crate::ir::{IrMethod, LabelId, Stmt, Trap};
use crate::passes::Pass;

/// Narrows every trap to the runs of statements that can actually throw.
pub(crate) struct TrimExceptions;

impl Pass for TrimExceptions {
    fn name(&self) -> &'static str {
        "trim-exceptions"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        if method.traps.is_empty() {
            return Ok(false);
        }
        let positions: BTreeMap<LabelId, usize> = method
            .stmts
            .iter()
            .enumerate()
            .filter_map(|(index, stmt)| stmt.as_label().map(|label| (label, index)))
            .collect();
        // New labels keyed by the statement they are inserted before.
        let mut inserted: BTreeMap<usize, LabelId> = BTreeMap::new();
        let mut traps = Vec::with_capacity(method.traps.len());
        for trap in method.traps.clone() {
            let (Some(&start), Some(&end)) = (positions.get(&trap.start), positions.get(&trap.end))
            else {
                continue;
            };
            for (first, last) in throwing_runs(&method.stmts, start, end) {
                let start = label_at_gap(method, &mut inserted, first.checked_sub(1), first);
                let end = label_at_gap(method, &mut inserted, Some(last + 1), last + 1);
                traps.push(Trap {
                    start,
                    end,
                    handler: trap.handler,
                    catch: trap.catch.clone(),
                });
            }
        }
        let changed = !inserted.is_empty() || traps != method.traps;
        for (position, label) in inserted.into_iter().rev() {
            method.stmts.insert(position, Stmt::Label(label));
        }
        method.traps = traps;
        Ok(changed)
    }
}

/// Maximal runs of throwing statements strictly between `start` and `end`; labels do not break a run.
fn throwing_runs(stmts: &[Stmt], start: usize, end: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (index, stmt) in stmts.iter().enumerate().take(end).skip(start + 1) {
        if stmt.can_throw() {
            current = Some(match current {
                Some((first, _)) => (first, index),
                None => (index, index),
            });
        } else if !stmt.is_label() {
            runs.extend(current.take());
        }
    }
    runs.extend(current);
    runs
}

/// Label bounding a run at the gap before statement `position`.
///
/// An existing label at `neighbour` is reused; otherwise one label is created per gap.
fn label_at_gap(
    method: &mut IrMethod,
    inserted: &mut BTreeMap<usize, LabelId>,
    neighbour: Option<usize>,
    position: usize,
) -> LabelId {
    if let Some(label) = neighbour
        .and_then(|index| method.stmts.get(index))
        .and_then(Stmt::as_label)
    {
        return label;
    }
    if let Some(label) = inserted.get(&position) {
        return *label;
    }
    let label = method.new_label();
    inserted.insert(position, label);
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, InvokeKind, JType, MethodRef, TypeHint};
    use crate::passes::fixtures::void_method;

    fn call() -> Stmt {
        Stmt::Eval(Expr::Invoke {
            kind: InvokeKind::Static,
            method: MethodRef {
                owner: "a/B".to_string(),
                name: "f".to_string(),
                descriptor: "()V".to_string(),
                params: Vec::new(),
                ret: JType::Void,
            },
            args: Vec::new(),
        })
    }

    #[test]
    fn range_is_split_around_non_throwing_code() {
        let mut ir = void_method();
        let start = ir.new_label();
        let end = ir.new_label();
        let handler = ir.new_label();
        let local = ir.new_local(TypeHint::Exact(JType::Int));
        let caught = ir.new_local(TypeHint::Ref);
        ir.stmts = vec![
            Stmt::Label(start),
            Stmt::assign(local, Expr::int(1)),
            call(),
            Stmt::assign(local, Expr::int(2)),
            call(),
            Stmt::Label(end),
            Stmt::Return(None),
            Stmt::Label(handler),
            Stmt::assign(caught, Expr::CaughtException),
            Stmt::Return(None),
        ];
        ir.traps.push(Trap {
            start,
            end,
            handler,
            catch: Some("java/lang/Exception".to_string()),
        });
        assert!(TrimExceptions.run(&mut ir).expect("run"));
        assert_eq!(ir.traps.len(), 2);
        let positions: BTreeMap<LabelId, usize> = ir
            .stmts
            .iter()
            .enumerate()
            .filter_map(|(index, stmt)| stmt.as_label().map(|label| (label, index)))
            .collect();
        for trap in &ir.traps {
            let covered = &ir.stmts[positions[&trap.start] + 1..positions[&trap.end]];
            assert_eq!(covered, &[call()]);
            assert_eq!(trap.handler, handler);
        }
        assert_eq!(ir.traps[1].end, end);
        assert!(!TrimExceptions.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn trap_without_throwing_statement_disappears() {
        let mut ir = void_method();
        let start = ir.new_label();
        let end = ir.new_label();
        ir.stmts = vec![
            Stmt::Label(start),
            Stmt::Nop,
            Stmt::Label(end),
            Stmt::Return(None),
        ];
        ir.traps.push(Trap {
            start,
            end,
            handler: end,
            catch: None,
        });
        assert!(TrimExceptions.run(&mut ir).expect("run"));
        assert!(ir.traps.is_empty());
    }
}
