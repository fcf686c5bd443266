use crate::error::Result;
use crate::ir::{Expr, IrMethod, LocalId, Stmt};
use crate::passes::{Pass, evaluated_before};

/// Folds single-use assignments into the statement right after them.
pub(crate) struct Aggregate;

impl Pass for Aggregate {
    fn name(&self) -> &'static str {
        "aggregate"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let counts = method.use_counts();
        let in_phi = method.phi_operands();
        let mut changed = false;
        let mut index = 0;
        while index + 1 < method.stmts.len() {
            let foldable = match &method.stmts[index] {
                Stmt::Assign { local, value } => {
                    counts[local.index()] == 1
                        && !in_phi.contains(local)
                        && is_movable(value)
                        && can_fold(value, *local, &method.stmts[index + 1])
                }
                _ => false,
            };
            if !foldable {
                index += 1;
                continue;
            }
            let Stmt::Assign { local, value } = method.stmts.remove(index) else {
                continue;
            };
            let replaced: usize = method.stmts[index]
                .operands_mut()
                .into_iter()
                .map(|operand| operand.substitute(local, &value))
                .sum();
            debug_assert_eq!(replaced, 1);
            changed = true;
            // The merged statement may itself fold into the one before it.
            index = index.saturating_sub(1);
        }
        Ok(changed)
    }
}

fn is_movable(value: &Expr) -> bool {
    !value.is_identity() && !value.is_phi() && !matches!(value, Expr::New(_))
}

/// Whether `a = value` can be folded into `next`, its only reader.
fn can_fold(value: &Expr, local: LocalId, next: &Stmt) -> bool {
    if next.is_label() || next.is_phi() {
        return false;
    }
    let target = Expr::Local(local);
    let Some(before) = evaluated_before(next, &mut |expr| *expr == target) else {
        return false;
    };
    value.is_pure() || before.iter().all(|expr| expr.is_pure())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinaryOp, InvokeKind, JType, LabelId, MethodRef, NumKind, TypeHint};
    use crate::passes::fixtures::int_method;

    fn add(left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op: BinaryOp::Add,
            kind: NumKind::Int,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn call(name: &str) -> Expr {
        Expr::Invoke {
            kind: InvokeKind::Static,
            method: MethodRef {
                owner: "a/B".to_string(),
                name: name.to_string(),
                descriptor: "()I".to_string(),
                params: Vec::new(),
                ret: JType::Int,
            },
            args: Vec::new(),
        }
    }

    #[test]
    fn assignment_chain_folds_into_return() {
        let mut ir = int_method();
        let p = ir.new_local(TypeHint::Exact(JType::Int));
        let a = ir.new_local(TypeHint::Exact(JType::Int));
        let b = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(p, Expr::Param(0)),
            Stmt::assign(a, add(Expr::Local(p), Expr::int(1))),
            Stmt::assign(b, add(Expr::Local(a), Expr::int(2))),
            Stmt::Return(Some(Expr::Local(b))),
        ];
        assert!(Aggregate.run(&mut ir).expect("run"));
        assert_eq!(
            ir.stmts,
            vec![
                Stmt::Label(LabelId(0)),
                Stmt::assign(p, Expr::Param(0)),
                Stmt::Return(Some(add(add(Expr::Local(p), Expr::int(1)), Expr::int(2)))),
            ]
        );
        assert!(!Aggregate.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn side_effects_keep_their_order() {
        let mut ir = int_method();
        let first = ir.new_local(TypeHint::Exact(JType::Int));
        let second = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(first, call("first")),
            Stmt::assign(second, call("second")),
            Stmt::Return(Some(add(Expr::Local(second), Expr::Local(first)))),
        ];
        Aggregate.run(&mut ir).expect("run");
        assert!(
            ir.stmts
                .iter()
                .any(|stmt| stmt == &Stmt::assign(first, call("first")))
        );
        assert_eq!(
            ir.stmts.last(),
            Some(&Stmt::Return(Some(add(call("second"), Expr::Local(first)))))
        );
    }

    #[test]
    fn values_read_twice_are_not_folded() {
        let mut ir = int_method();
        let a = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(a, Expr::int(4)),
            Stmt::Return(Some(add(Expr::Local(a), Expr::Local(a)))),
        ];
        assert!(!Aggregate.run(&mut ir).expect("run"));
    }
}
