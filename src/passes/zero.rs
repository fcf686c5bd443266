use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ConversionError, Result};
use crate::ir::{
    Category, Constant, Expr, IrMethod, JType, LocalId, Stmt, TypeHint, walk_operands,
    walk_operands_mut,
};
use crate::passes::Pass;

/// Splits raw literal locals that are read in several value categories.
pub(crate) struct ZeroNormalize;

impl Pass for ZeroNormalize {
    fn name(&self) -> &'static str {
        "zero"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let literals: Vec<(usize, LocalId, Constant)> = method
            .stmts
            .iter()
            .enumerate()
            .filter_map(|(index, stmt)| match stmt {
                Stmt::Assign {
                    local,
                    value: Expr::Const(constant),
                } if !constant.is_resolved() => Some((index, *local, constant.clone())),
                _ => None,
            })
            .collect();
        let mut changed = false;
        // Later definitions first so earlier indices stay valid while inserting.
        for (index, local, constant) in literals.into_iter().rev() {
            changed |= split(method, index, local, &constant)?;
        }
        Ok(changed)
    }
}

fn split(method: &mut IrMethod, index: usize, local: LocalId, constant: &Constant) -> Result<bool> {
    let mut categories = read_categories(method, local);
    let phis: Vec<(LocalId, Kind)> = phis_reading(method, local)
        .into_iter()
        .filter_map(|phi| phi_category(method, phi).map(|kind| (phi, kind)))
        .collect();
    categories.extend(phis.iter().map(|(_, kind)| *kind));
    if categories.is_empty() {
        return Ok(false);
    }
    if categories.len() == 1 && categories.contains(&Kind::Reference) {
        if *constant != Constant::Narrow(0) {
            return Err(non_zero_reference(constant));
        }
        method.stmts[index] = Stmt::assign(local, Expr::Const(Constant::Null));
        method.local_mut(local).hint = TypeHint::Ref;
        return Ok(true);
    }
    if categories.len() < 2 {
        return Ok(false);
    }
    let mut replacements: BTreeMap<Kind, LocalId> = BTreeMap::new();
    let mut definitions = Vec::new();
    for kind in &categories {
        let ty = kind.jtype();
        let resolved = constant
            .resolve_for(&ty)
            .ok_or_else(|| non_zero_reference(constant))?;
        let hint = match kind {
            Kind::Reference => TypeHint::Ref,
            _ => TypeHint::Exact(ty),
        };
        let fresh = method.new_local(hint);
        replacements.insert(*kind, fresh);
        definitions.push(Stmt::assign(fresh, Expr::Const(resolved)));
    }
    let phi_kinds: BTreeMap<LocalId, Kind> = phis.into_iter().collect();
    for position in 0..method.stmts.len() {
        if let Stmt::Assign {
            local: result,
            value: Expr::Phi(args),
        } = &mut method.stmts[position]
        {
            let fresh = phi_kinds
                .get(result)
                .and_then(|kind| replacements.get(kind));
            if let Some(fresh) = fresh {
                for arg in args.iter_mut().filter(|arg| arg.value == local) {
                    arg.value = *fresh;
                }
            }
            continue;
        }
        let hints = method.operand_hints(&method.stmts[position]);
        let mut hints = hints.into_iter();
        walk_operands_mut(&mut method.stmts[position], &mut |expr| {
            let hint = hints.next();
            if *expr != Expr::Local(local) {
                return;
            }
            let fresh = hint
                .as_ref()
                .and_then(Kind::of)
                .and_then(|kind| replacements.get(&kind));
            if let Some(fresh) = fresh {
                *expr = Expr::Local(*fresh);
            }
        });
    }
    method.stmts.splice(index + 1..index + 1, definitions);
    Ok(true)
}

/// Value category of every read of `local`, outside phis, whose context decides one.
fn read_categories(method: &IrMethod, local: LocalId) -> BTreeSet<Kind> {
    let mut categories = BTreeSet::new();
    for stmt in &method.stmts {
        if stmt.is_phi() {
            continue;
        }
        let hints = method.operand_hints(stmt);
        let mut hints = hints.iter();
        walk_operands(stmt, &mut |expr| {
            let hint = hints.next();
            if *expr == Expr::Local(local) {
                if let Some(kind) = hint.and_then(Kind::of) {
                    categories.insert(kind);
                }
            }
        });
    }
    categories
}

/// Results of the phis that take `local` as an argument.
fn phis_reading(method: &IrMethod, local: LocalId) -> Vec<LocalId> {
    method
        .stmts
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::Assign {
                local: result,
                value: Expr::Phi(args),
            } if args.iter().any(|arg| arg.value == local) => Some(*result),
            _ => None,
        })
        .collect()
}

/// The one category the reads of `phi` decide, following the phis it feeds in turn.
/// `None` when the web is read in no category or in several.
fn phi_category(method: &IrMethod, phi: LocalId) -> Option<Kind> {
    let mut seen = BTreeSet::from([phi]);
    let mut pending = vec![phi];
    let mut categories = BTreeSet::new();
    while let Some(current) = pending.pop() {
        categories.extend(read_categories(method, current));
        for next in phis_reading(method, current) {
            if seen.insert(next) {
                pending.push(next);
            }
        }
    }
    let mut categories = categories.into_iter();
    match (categories.next(), categories.next()) {
        (Some(kind), None) => Some(kind),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Kind {
    Int,
    Float,
    Long,
    Double,
    Reference,
}

impl Kind {
    fn of(hint: &TypeHint) -> Option<Kind> {
        match hint {
            TypeHint::Ref => Some(Kind::Reference),
            TypeHint::Exact(ty) => match ty.category() {
                Category::Int => Some(Kind::Int),
                Category::Float => Some(Kind::Float),
                Category::Long => Some(Kind::Long),
                Category::Double => Some(Kind::Double),
                Category::Reference => Some(Kind::Reference),
                Category::Void => None,
            },
            _ => None,
        }
    }

    fn jtype(self) -> JType {
        match self {
            Kind::Int => JType::Int,
            Kind::Float => JType::Float,
            Kind::Long => JType::Long,
            Kind::Double => JType::Double,
            Kind::Reference => JType::java_lang_object(),
        }
    }
}

fn non_zero_reference(constant: &Constant) -> ConversionError {
    ConversionError::Malformed(format!("literal {constant:?} used as a reference"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{CondOp, FieldRef, LabelId, PhiArg};
    use crate::passes::fixtures::void_method;

    fn static_field(name: &str, ty: JType) -> FieldRef {
        FieldRef {
            owner: "a/B".to_string(),
            name: name.to_string(),
            descriptor: ty.descriptor(),
            ty,
        }
    }

    #[test]
    fn zero_used_as_int_and_reference_is_split() {
        let mut ir = void_method();
        let zero = ir.new_local(TypeHint::Single);
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(zero, Expr::Const(Constant::Narrow(0))),
            Stmt::FieldSet {
                field: static_field("count", JType::Int),
                object: None,
                value: Expr::Local(zero),
            },
            Stmt::FieldSet {
                field: static_field("name", JType::object("java/lang/String")),
                object: None,
                value: Expr::Local(zero),
            },
            Stmt::Return(None),
        ];
        assert!(ZeroNormalize.run(&mut ir).expect("run"));
        let constants: Vec<&Expr> = ir
            .stmts
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Assign { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert!(constants.contains(&&Expr::Const(Constant::Int(0))));
        assert!(constants.contains(&&Expr::Const(Constant::Null)));
        let stored: Vec<&Expr> = ir
            .stmts
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::FieldSet { value, .. } => Some(value),
                _ => None,
            })
            .collect();
        assert_ne!(stored[0], stored[1]);
        assert_ne!(stored[0], &Expr::Local(zero));
        assert!(!ZeroNormalize.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn phi_reads_count_toward_the_split() {
        // zero is compared with an object and also merged into an int return.
        let mut ir = IrMethod::new(
            crate::test_harness::SAMPLE_CLASS,
            "m",
            "(Ljava/lang/Object;)I",
            true,
            vec![JType::java_lang_object()],
            JType::Int,
        );
        let entry = ir.new_label();
        let other = ir.new_label();
        let join = ir.new_label();
        let object = ir.new_local(TypeHint::Ref);
        let zero = ir.new_local(TypeHint::Single);
        let one = ir.new_local(TypeHint::Single);
        let merged = ir.new_local(TypeHint::Single);
        ir.stmts = vec![
            Stmt::Label(entry),
            Stmt::assign(object, Expr::Param(0)),
            Stmt::assign(zero, Expr::Const(Constant::Narrow(0))),
            Stmt::If {
                op: CondOp::Eq,
                left: Expr::Local(object),
                right: Expr::Local(zero),
                target: join,
            },
            Stmt::Label(other),
            Stmt::assign(one, Expr::Const(Constant::Narrow(1))),
            Stmt::Label(join),
            Stmt::assign(
                merged,
                Expr::Phi(vec![
                    PhiArg {
                        pred: entry,
                        value: zero,
                    },
                    PhiArg {
                        pred: other,
                        value: one,
                    },
                ]),
            ),
            Stmt::Return(Some(Expr::Local(merged))),
        ];
        assert!(ZeroNormalize.run(&mut ir).expect("run"));

        let defined_as = |local: LocalId| {
            ir.stmts.iter().find_map(|stmt| match stmt {
                Stmt::Assign {
                    local: defined,
                    value: Expr::Const(constant),
                } if *defined == local => Some(constant.clone()),
                _ => None,
            })
        };
        let compared = ir
            .stmts
            .iter()
            .find_map(|stmt| match stmt {
                Stmt::If {
                    right: Expr::Local(right),
                    ..
                } => Some(*right),
                _ => None,
            })
            .expect("comparison");
        assert_eq!(defined_as(compared), Some(Constant::Null));
        let incoming = ir
            .stmts
            .iter()
            .find_map(|stmt| match stmt {
                Stmt::Assign {
                    value: Expr::Phi(args),
                    ..
                } => Some(args[0].value),
                _ => None,
            })
            .expect("phi");
        assert_eq!(defined_as(incoming), Some(Constant::Int(0)));
        assert!(!ZeroNormalize.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn reference_only_literal_becomes_null() {
        let mut ir = void_method();
        let zero = ir.new_local(TypeHint::Single);
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(zero, Expr::Const(Constant::Narrow(0))),
            Stmt::Throw(Expr::Local(zero)),
        ];
        ZeroNormalize.run(&mut ir).expect("run");
        assert_eq!(ir.stmts[1], Stmt::assign(zero, Expr::Const(Constant::Null)));
        assert_eq!(ir.local(zero).hint, TypeHint::Ref);
    }

    #[test]
    fn non_zero_reference_literal_is_rejected() {
        let mut ir = void_method();
        let one = ir.new_local(TypeHint::Single);
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(one, Expr::Const(Constant::Narrow(1))),
            Stmt::Throw(Expr::Local(one)),
        ];
        let error = ZeroNormalize.run(&mut ir).expect_err("reference literal");
        assert_eq!(error.code(), "MALFORMED_INPUT");
    }
}
