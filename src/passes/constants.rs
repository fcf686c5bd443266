use crate::error::Result;
use crate::ir::{Expr, IrMethod, LocalId, Stmt};
use crate::passes::{Pass, retain_indexed};

/// Substitutes literal locals read exactly once into their single use.
pub(crate) struct RemoveConstants;

impl Pass for RemoveConstants {
    fn name(&self) -> &'static str {
        "remove-constants"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let counts = method.use_counts();
        let in_phi = method.phi_operands();
        let candidates: Vec<(usize, LocalId, Expr)> = method
            .stmts
            .iter()
            .enumerate()
            .filter_map(|(index, stmt)| match stmt {
                Stmt::Assign {
                    local,
                    value: value @ Expr::Const(_),
                } if counts[local.index()] == 1 && !in_phi.contains(local) && value.is_pure() => {
                    Some((index, *local, value.clone()))
                }
                _ => None,
            })
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }
        let mut keep = vec![true; method.stmts.len()];
        for (index, local, value) in candidates {
            for (position, stmt) in method.stmts.iter_mut().enumerate() {
                if position == index {
                    continue;
                }
                let replaced: usize = stmt
                    .operands_mut()
                    .into_iter()
                    .map(|operand| operand.substitute(local, &value))
                    .sum();
                if replaced > 0 {
                    break;
                }
            }
            keep[index] = false;
        }
        retain_indexed(method, &keep);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, JType, LabelId, PhiArg, TypeHint};
    use crate::passes::fixtures::int_method;

    #[test]
    fn single_use_literal_moves_into_its_use() {
        let mut ir = int_method();
        let five = ir.new_local(TypeHint::Single);
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(five, Expr::Const(Constant::Narrow(5))),
            Stmt::Return(Some(Expr::Local(five))),
        ];
        assert!(RemoveConstants.run(&mut ir).expect("run"));
        assert_eq!(
            ir.stmts,
            vec![
                Stmt::Label(LabelId(0)),
                Stmt::Return(Some(Expr::Const(Constant::Narrow(5)))),
            ]
        );
        assert!(!RemoveConstants.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn literals_feeding_phis_or_read_twice_stay() {
        let mut ir = int_method();
        let entry = LabelId(0);
        let join = LabelId(1);
        let twice = ir.new_local(TypeHint::Exact(JType::Int));
        let merged = ir.new_local(TypeHint::Exact(JType::Int));
        let phi = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(entry),
            Stmt::assign(twice, Expr::int(2)),
            Stmt::assign(merged, Expr::int(3)),
            Stmt::FieldSet {
                field: crate::ir::FieldRef {
                    owner: "a/B".to_string(),
                    name: "f".to_string(),
                    descriptor: "I".to_string(),
                    ty: JType::Int,
                },
                object: None,
                value: Expr::Local(twice),
            },
            Stmt::Label(join),
            Stmt::assign(
                phi,
                Expr::Phi(vec![PhiArg {
                    pred: entry,
                    value: merged,
                }]),
            ),
            Stmt::Return(Some(Expr::Local(twice))),
        ];
        assert!(!RemoveConstants.run(&mut ir).expect("run"));
    }
}
