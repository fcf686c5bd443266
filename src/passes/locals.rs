use crate::error::Result;
use crate::ir::{Expr, IrMethod, LocalId, LocalInfo, Stmt, TypeHint};
use crate::passes::Pass;

/// Propagates copies, removes trivial phis and compacts the local table.
pub(crate) struct CleanLocals;

impl Pass for CleanLocals {
    fn name(&self) -> &'static str {
        "clean-locals"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let mut changed = false;
        while let Some((index, from, to, hint)) = find_redundant(method) {
            method.stmts.remove(index);
            method.local_mut(to).hint = hint;
            for stmt in &mut method.stmts {
                stmt.map_locals(&mut |id| if id == from { to } else { id });
            }
            changed = true;
        }
        changed |= compact(method);
        Ok(changed)
    }
}

/// Finds a definition whose local can be replaced by another local everywhere.
fn find_redundant(method: &IrMethod) -> Option<(usize, LocalId, LocalId, TypeHint)> {
    for (index, stmt) in method.stmts.iter().enumerate() {
        let Stmt::Assign { local, value } = stmt else {
            continue;
        };
        let replacement = match value {
            Expr::Local(source) if source != local => *source,
            Expr::Phi(args) => {
                let mut distinct = args.iter().map(|arg| arg.value).filter(|v| v != local);
                let Some(first) = distinct.next() else {
                    continue;
                };
                if !distinct.all(|value| value == first) {
                    continue;
                }
                first
            }
            _ => continue,
        };
        let target = method.local(*local).hint.clone();
        let source = method.local(replacement).hint.clone();
        // Keep the copy when the two hints cannot describe one value.
        let Some(merged) = source.merge(&target) else {
            continue;
        };
        return Some((index, *local, replacement, merged));
    }
    None
}

/// Renumbers locals in order of first definition and drops those never mentioned.
fn compact(method: &mut IrMethod) -> bool {
    let mut map: Vec<Option<LocalId>> = vec![None; method.locals.len()];
    let mut order: Vec<LocalId> = Vec::new();
    let mut visit = |id: LocalId, map: &mut Vec<Option<LocalId>>| {
        if map[id.index()].is_none() {
            map[id.index()] = Some(LocalId(order.len() as u32));
            order.push(id);
        }
    };
    for stmt in &method.stmts {
        if let Some(local) = stmt.defined_local() {
            visit(local, &mut map);
        }
    }
    for stmt in &method.stmts {
        for used in stmt.uses() {
            visit(used, &mut map);
        }
    }
    let identity = order.len() == method.locals.len()
        && order.iter().enumerate().all(|(index, id)| id.index() == index);
    if identity {
        return false;
    }
    let locals: Vec<LocalInfo> = order
        .iter()
        .map(|id| method.locals[id.index()].clone())
        .collect();
    for stmt in &mut method.stmts {
        stmt.map_locals(&mut |id| map[id.index()].unwrap_or(id));
    }
    method.locals = locals;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JType, PhiArg};
    use crate::passes::fixtures::int_method;

    #[test]
    fn copies_are_propagated_and_table_compacted() {
        let mut ir = int_method();
        let entry = ir.new_label();
        let unused = ir.new_local(TypeHint::Unknown);
        let param = ir.new_local(TypeHint::Exact(JType::Int));
        let copy = ir.new_local(TypeHint::Unknown);
        ir.stmts = vec![
            Stmt::Label(entry),
            Stmt::assign(param, Expr::Param(0)),
            Stmt::assign(copy, Expr::Local(param)),
            Stmt::Return(Some(Expr::Local(copy))),
        ];
        let _ = unused;
        assert!(CleanLocals.run(&mut ir).expect("run"));
        assert_eq!(
            ir.stmts,
            vec![
                Stmt::Label(entry),
                Stmt::assign(LocalId(0), Expr::Param(0)),
                Stmt::Return(Some(Expr::Local(LocalId(0)))),
            ]
        );
        assert_eq!(ir.locals.len(), 1);
        assert_eq!(ir.locals[0].hint, TypeHint::Exact(JType::Int));
        assert!(!CleanLocals.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn self_referencing_phi_collapses_to_its_input() {
        let mut ir = int_method();
        let entry = ir.new_label();
        let head = ir.new_label();
        let x = ir.new_local(TypeHint::Exact(JType::Int));
        let phi = ir.new_local(TypeHint::Unknown);
        ir.stmts = vec![
            Stmt::Label(entry),
            Stmt::assign(x, Expr::Param(0)),
            Stmt::Label(head),
            Stmt::assign(
                phi,
                Expr::Phi(vec![
                    PhiArg {
                        pred: entry,
                        value: x,
                    },
                    PhiArg {
                        pred: head,
                        value: phi,
                    },
                ]),
            ),
            Stmt::Return(Some(Expr::Local(phi))),
        ];
        CleanLocals.run(&mut ir).expect("run");
        assert!(!ir.has_phi());
        assert_eq!(ir.stmts[3], Stmt::Return(Some(Expr::Local(LocalId(0)))));
    }
}
