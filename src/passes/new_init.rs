use crate::error::Result;
use crate::ir::{Expr, InvokeKind, IrMethod, LocalId, Stmt};
use crate::passes::{Pass, entry_labels, region_end};

/// Fuses `a = new C` with the constructor call that initializes `a`.
pub(crate) struct NewInit;

impl Pass for NewInit {
    fn name(&self) -> &'static str {
        "new-init"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let mut changed = false;
        while let Some((allocation, init)) = find_fusion(method) {
            let Stmt::Assign { local, .. } = method.stmts[allocation] else {
                break;
            };
            let Stmt::Eval(Expr::Invoke {
                method: constructor,
                mut args,
                ..
            }) = std::mem::replace(&mut method.stmts[init], Stmt::Nop)
            else {
                break;
            };
            args.remove(0);
            method.stmts[init] = Stmt::assign(
                local,
                Expr::NewInit {
                    method: constructor,
                    args,
                },
            );
            method.stmts.remove(allocation);
            changed = true;
        }
        Ok(changed)
    }
}

/// Positions of an allocation and the constructor call it can be fused with.
fn find_fusion(method: &IrMethod) -> Option<(usize, usize)> {
    let entries = entry_labels(method);
    let in_phi = method.phi_operands();
    for (index, stmt) in method.stmts.iter().enumerate() {
        let Stmt::Assign {
            local,
            value: Expr::New(class),
        } = stmt
        else {
            continue;
        };
        if in_phi.contains(local) {
            continue;
        }
        let end = region_end(method, index, &entries);
        for position in index + 1..end {
            let candidate = &method.stmts[position];
            if is_constructor_of(candidate, *local, class) {
                return Some((index, position));
            }
            if candidate.uses().contains(local) {
                break;
            }
        }
    }
    None
}

fn is_constructor_of(stmt: &Stmt, local: LocalId, class: &str) -> bool {
    let Stmt::Eval(Expr::Invoke {
        kind: InvokeKind::Direct,
        method,
        args,
    }) = stmt
    else {
        return false;
    };
    if method.name != "<init>" || method.owner != class {
        return false;
    }
    let Some((receiver, rest)) = args.split_first() else {
        return false;
    };
    let mut mentioned = false;
    for arg in rest {
        arg.for_each_local(&mut |id| mentioned |= id == local);
    }
    *receiver == Expr::Local(local) && !mentioned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{JType, LabelId, MethodRef, TypeHint};
    use crate::passes::fixtures::void_method;

    fn constructor(owner: &str, params: Vec<JType>) -> MethodRef {
        let descriptor = format!(
            "({})V",
            params.iter().map(JType::descriptor).collect::<String>()
        );
        MethodRef {
            owner: owner.to_string(),
            name: "<init>".to_string(),
            descriptor,
            params,
            ret: JType::Void,
        }
    }

    #[test]
    fn allocation_and_constructor_become_one_construction() {
        let mut ir = void_method();
        let object = ir.new_local(TypeHint::Exact(JType::object("java/lang/StringBuilder")));
        let capacity = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(object, Expr::New("java/lang/StringBuilder".to_string())),
            Stmt::assign(capacity, Expr::int(16)),
            Stmt::Eval(Expr::Invoke {
                kind: InvokeKind::Direct,
                method: constructor("java/lang/StringBuilder", vec![JType::Int]),
                args: vec![Expr::Local(object), Expr::Local(capacity)],
            }),
            Stmt::Throw(Expr::Local(object)),
        ];
        assert!(NewInit.run(&mut ir).expect("run"));
        assert_eq!(ir.stmts.len(), 4);
        assert_eq!(
            ir.stmts[2],
            Stmt::assign(
                object,
                Expr::NewInit {
                    method: constructor("java/lang/StringBuilder", vec![JType::Int]),
                    args: vec![Expr::Local(capacity)],
                }
            )
        );
        assert!(!NewInit.run(&mut ir).expect("rerun"));
    }

    #[test]
    fn intervening_use_blocks_fusion() {
        let mut ir = void_method();
        let object = ir.new_local(TypeHint::Exact(JType::object("a/B")));
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(object, Expr::New("a/B".to_string())),
            Stmt::MonitorEnter(Expr::Local(object)),
            Stmt::Eval(Expr::Invoke {
                kind: InvokeKind::Direct,
                method: constructor("a/B", Vec::new()),
                args: vec![Expr::Local(object)],
            }),
            Stmt::Return(None),
        ];
        assert!(!NewInit.run(&mut ir).expect("run"));
    }

    #[test]
    fn superclass_constructor_is_not_fused() {
        let mut ir = void_method();
        let object = ir.new_local(TypeHint::Exact(JType::object("a/B")));
        ir.stmts = vec![
            Stmt::Label(LabelId(0)),
            Stmt::assign(object, Expr::New("a/B".to_string())),
            Stmt::Eval(Expr::Invoke {
                kind: InvokeKind::Direct,
                method: constructor("java/lang/Object", Vec::new()),
                args: vec![Expr::Local(object)],
            }),
            Stmt::Return(None),
        ];
        assert!(!NewInit.run(&mut ir).expect("run"));
    }
}
