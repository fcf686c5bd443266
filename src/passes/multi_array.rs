use crate::error::Result;
use crate::ir::{Constant, Expr, InvokeKind, IrMethod, JType, walk_operands_mut};
use crate::passes::Pass;

const REFLECT_ARRAY: &str = "java/lang/reflect/Array";
const NEW_INSTANCE_DIMS: &str = "(Ljava/lang/Class;[I)Ljava/lang/Object;";
const NEW_INSTANCE_LENGTH: &str = "(Ljava/lang/Class;I)Ljava/lang/Object;";

/// Turns casted `Array.newInstance` calls into direct array allocations.
pub(crate) struct MultiArray;

impl Pass for MultiArray {
    fn name(&self) -> &'static str {
        "multi-array"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let mut changed = false;
        for stmt in &mut method.stmts {
            walk_operands_mut(stmt, &mut |expr| {
                if let Some(allocation) = direct_allocation(expr) {
                    *expr = allocation;
                    changed = true;
                }
            });
        }
        Ok(changed)
    }
}

fn direct_allocation(expr: &Expr) -> Option<Expr> {
    let Expr::CheckCast { ty, operand } = expr else {
        return None;
    };
    let Expr::Invoke {
        kind: InvokeKind::Static,
        method,
        args,
    } = operand.as_ref()
    else {
        return None;
    };
    if method.owner != REFLECT_ARRAY || method.name != "newInstance" {
        return None;
    }
    let [class, shape] = args.as_slice() else {
        return None;
    };
    let component = component_type(class)?;
    match method.descriptor.as_str() {
        NEW_INSTANCE_DIMS => {
            let Expr::FilledArray {
                elem: JType::Int,
                values: dims,
            } = shape
            else {
                return None;
            };
            (!dims.is_empty() && strip(ty, dims.len())? == &component).then(|| Expr::NewMultiArray {
                ty: ty.clone(),
                dims: dims.clone(),
            })
        }
        NEW_INSTANCE_LENGTH => (strip(ty, 1)? == &component).then(|| Expr::NewArray {
            elem: component,
            size: Box::new(shape.clone()),
        }),
        _ => None,
    }
}

/// Element type left after removing `depth` array dimensions.
fn strip(ty: &JType, depth: usize) -> Option<&JType> {
    let mut current = ty;
    for _ in 0..depth {
        current = current.element()?;
    }
    Some(current)
}

/// Type named by a class literal or a primitive wrapper's `TYPE` field.
fn component_type(class: &Expr) -> Option<JType> {
    match class {
        Expr::Const(Constant::Class(ty)) => Some(ty.clone()),
        Expr::FieldGet {
            field,
            object: None,
        } if field.name == "TYPE" => {
            let primitive = match field.owner.as_str() {
                "java/lang/Boolean" => JType::Boolean,
                "java/lang/Byte" => JType::Byte,
                "java/lang/Character" => JType::Char,
                "java/lang/Short" => JType::Short,
                "java/lang/Integer" => JType::Int,
                "java/lang/Long" => JType::Long,
                "java/lang/Float" => JType::Float,
                "java/lang/Double" => JType::Double,
                _ => return None,
            };
            Some(primitive)
        }
        _ => None,
    }
}
