use std::collections::BTreeSet;

use crate::error::{ConversionError, Result};
use crate::ir::{Expr, Flow, IrMethod, LabelId, LocalId, Stmt, TypeHint};
use crate::passes::{Pass, block_of};

/// Replaces every phi with copies placed on the incoming edges.
pub(crate) struct Unssa;

impl Pass for Unssa {
    fn name(&self) -> &'static str {
        "unssa"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        if !method.has_phi() {
            return Ok(false);
        }
        let flow = Flow::new(method)?;
        let blocks = block_of(method);
        let definitions = method.definitions();
        let mut copies: Vec<(usize, Stmt)> = Vec::new();
        for index in 0..method.stmts.len() {
            let Stmt::Assign {
                local,
                value: Expr::Phi(args),
            } = &method.stmts[index]
            else {
                continue;
            };
            let (local, args) = (*local, args.clone());
            let block = blocks[index].ok_or_else(|| invariant("phi outside any block"))?;
            let fresh = method.new_local(TypeHint::Exact(method.local_type(local)));
            for arg in args {
                let position = copy_position(method, &flow, arg.pred, block, arg.value, &definitions)
                    .ok_or_else(|| {
                        invariant(format!(
                            "no edge from {} into the phi block of ${}",
                            method.label_name(arg.pred),
                            local.0
                        ))
                    })?;
                copies.push((position, Stmt::assign(fresh, Expr::Local(arg.value))));
            }
            method.stmts[index] = Stmt::assign(local, Expr::Local(fresh));
        }
        // Descending positions keep the remaining ones valid.
        copies.sort_by(|a, b| b.0.cmp(&a.0));
        for (position, copy) in copies {
            method.stmts.insert(position, copy);
        }
        Ok(true)
    }
}

fn invariant(message: impl Into<String>) -> ConversionError {
    ConversionError::Invariant {
        pass: "unssa",
        message: message.into(),
    }
}

/// Where the copy for the edge `pred -> block` goes.
fn copy_position(
    method: &IrMethod,
    flow: &Flow,
    pred: LabelId,
    block: LabelId,
    value: LocalId,
    definitions: &[Option<usize>],
) -> Option<usize> {
    let start = flow.index_of(pred)?;
    let end = method.stmts[start + 1..]
        .iter()
        .position(Stmt::is_label)
        .map_or(method.stmts.len(), |offset| start + 1 + offset);
    let range = start + 1..end;
    if let Some(branch) = range
        .clone()
        .find(|index| method.stmts[*index].targets().contains(&block))
    {
        return Some(branch);
    }
    let falls_into_block = method.stmts.get(end).and_then(Stmt::as_label) == Some(block)
        && method.stmts[end - 1].falls_through();
    if falls_into_block {
        return Some(end);
    }
    let handlers: BTreeSet<usize> = method
        .traps
        .iter()
        .enumerate()
        .filter(|(_, trap)| trap.handler == block)
        .map(|(position, _)| position)
        .collect();
    // Values defined in the block reach the handler only from statements after the definition.
    let from = match definitions.get(value.index()).copied().flatten() {
        Some(def) if range.contains(&def) => def + 1,
        _ => range.start,
    };
    (from..end).find(|index| {
        method.stmts[*index].can_throw()
            && flow
                .covering_traps(*index)
                .iter()
                .any(|trap| handlers.contains(trap))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CondOp, Constant, JType, PhiArg, Trap};
    use crate::passes::fixtures::int_method;

    fn phi(args: &[(LabelId, LocalId)]) -> Expr {
        Expr::Phi(
            args.iter()
                .map(|(pred, value)| PhiArg {
                    pred: *pred,
                    value: *value,
                })
                .collect(),
        )
    }

    #[test]
    fn copies_land_before_branch_and_at_fall_through() {
        let mut ir = int_method();
        let entry = ir.new_label();
        let other = ir.new_label();
        let join = ir.new_label();
        let param = ir.new_local(TypeHint::Exact(JType::Int));
        let one = ir.new_local(TypeHint::Exact(JType::Int));
        let merged = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(entry),
            Stmt::assign(param, Expr::Param(0)),
            Stmt::If {
                op: CondOp::Eq,
                left: Expr::Local(param),
                right: Expr::int(0),
                target: join,
            },
            Stmt::Label(other),
            Stmt::assign(one, Expr::int(1)),
            Stmt::Label(join),
            Stmt::assign(merged, phi(&[(entry, param), (other, one)])),
            Stmt::Return(Some(Expr::Local(merged))),
        ];
        assert!(Unssa.run(&mut ir).expect("run"));
        assert!(!ir.has_phi());
        let fresh = LocalId(3);
        assert_eq!(ir.local(fresh).hint, TypeHint::Exact(JType::Int));
        assert_eq!(ir.stmts[2], Stmt::assign(fresh, Expr::Local(param)));
        assert!(matches!(ir.stmts[3], Stmt::If { .. }));
        assert_eq!(ir.stmts[6], Stmt::assign(fresh, Expr::Local(one)));
        assert_eq!(ir.stmts[7], Stmt::Label(join));
        assert_eq!(ir.stmts[8], Stmt::assign(merged, Expr::Local(fresh)));
        assert!(!Unssa.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn exceptional_edge_copy_precedes_throwing_statement() {
        let mut ir = int_method();
        let entry = ir.new_label();
        let start = ir.new_label();
        let end = ir.new_label();
        let handler = ir.new_label();
        let param = ir.new_local(TypeHint::Exact(JType::Int));
        let caught = ir.new_local(TypeHint::Ref);
        let merged = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(entry),
            Stmt::assign(param, Expr::Param(0)),
            Stmt::Label(start),
            Stmt::Throw(Expr::Const(Constant::Null)),
            Stmt::Label(end),
            Stmt::Label(handler),
            Stmt::assign(caught, Expr::CaughtException),
            Stmt::assign(merged, phi(&[(start, param)])),
            Stmt::Return(Some(Expr::Local(merged))),
        ];
        ir.traps.push(Trap {
            start,
            end,
            handler,
            catch: None,
        });
        Unssa.run(&mut ir).expect("run");
        let fresh = LocalId(3);
        assert_eq!(ir.stmts[3], Stmt::assign(fresh, Expr::Local(param)));
        assert!(matches!(ir.stmts[4], Stmt::Throw(_)));
        assert_eq!(ir.stmts[8], Stmt::assign(merged, Expr::Local(fresh)));
    }
}
