//! Type inference over the local table.
//!
//! Locals that must share a type (copies, phi arguments, operands of an equality test) are
//! grouped with a union-find. Each group's hint is the merge of every definition and use
//! hint of its members, iterated until nothing changes. Unresolved literals and array element
//! kinds are then fixed from the final local types.

use crate::error::{ConversionError, Result};
use crate::ir::{
    Constant, Expr, IrMethod, JType, LabelId, LocalId, Stmt, TypeHint, walk_operands,
    walk_operands_mut,
};
use crate::passes::{Pass, block_of};

pub(crate) struct TypeAssign;

impl Pass for TypeAssign {
    fn name(&self) -> &'static str {
        "type-assign"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let before = (method.locals.clone(), method.stmts.clone());
        let mut groups = Groups::new(method);
        infer(method, &mut groups)?;
        for info in &mut method.locals {
            info.hint = TypeHint::Exact(info.hint.resolve());
        }
        for position in 0..method.stmts.len() {
            let mut stmt = method.stmts[position].clone();
            resolve_stmt(method, &mut stmt)?;
            method.stmts[position] = stmt;
        }
        Ok((method.locals.clone(), method.stmts.clone()) != before)
    }
}

/// Union-find over local ids.
struct Groups {
    parent: Vec<usize>,
}

impl Groups {
    fn new(method: &IrMethod) -> Self {
        let mut groups = Self {
            parent: (0..method.locals.len()).collect(),
        };
        for stmt in &method.stmts {
            match stmt {
                Stmt::Assign {
                    local,
                    value: Expr::Local(source),
                } => groups.union(*local, *source),
                Stmt::Assign {
                    local,
                    value: Expr::Phi(args),
                } => {
                    for arg in args {
                        groups.union(*local, arg.value);
                    }
                }
                Stmt::If {
                    op,
                    left: Expr::Local(left),
                    right: Expr::Local(right),
                    ..
                } if op.is_equality() => groups.union(*left, *right),
                _ => {}
            }
        }
        groups
    }

    fn find(&mut self, id: usize) -> usize {
        let mut root = id;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = id;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: LocalId, b: LocalId) {
        let a = self.find(a.index());
        let b = self.find(b.index());
        if a != b {
            self.parent[a.max(b)] = a.min(b);
        }
    }
}

/// Merges definition and use hints into every group until a fixpoint.
fn infer(method: &mut IrMethod, groups: &mut Groups) -> Result<()> {
    let blocks = block_of(method);
    loop {
        let mut hints: Vec<TypeHint> = vec![TypeHint::Unknown; method.locals.len()];
        let mut merge = |groups: &mut Groups, local: LocalId, hint: &TypeHint| -> Result<()> {
            let root = groups.find(local.index());
            hints[root] = hints[root].merge(hint).ok_or_else(|| ConversionError::TypeConflict {
                local: local.0,
                existing: describe(&hints[root]),
                incoming: describe(hint),
            })?;
            Ok(())
        };
        for (id, info) in method.locals.iter().enumerate() {
            merge(groups, LocalId(id as u32), &info.hint)?;
        }
        for (stmt, block) in method.stmts.iter().zip(&blocks) {
            if let Stmt::Assign { local, value } = stmt {
                merge(groups, *local, &definition_hint(method, value, *block))?;
            }
            let operand_hints = method.operand_hints(stmt);
            let mut operand_hints = operand_hints.iter();
            let mut failure = None;
            walk_operands(stmt, &mut |expr| {
                let hint = operand_hints.next();
                if failure.is_some() {
                    return;
                }
                if let (Expr::Local(id), Some(hint)) = (expr, hint) {
                    failure = merge(groups, *id, hint).err();
                }
            });
            if let Some(error) = failure {
                return Err(error);
            }
        }
        let mut changed = false;
        for id in 0..method.locals.len() {
            let hint = hints[groups.find(id)].clone();
            if method.locals[id].hint != hint {
                method.locals[id].hint = hint;
                changed = true;
            }
        }
        if !changed {
            return Ok(());
        }
    }
}

fn definition_hint(method: &IrMethod, value: &Expr, block: Option<LabelId>) -> TypeHint {
    match value {
        Expr::CaughtException => caught_type(method, block),
        // An int literal fits every int-like local and boolean is the bottom of that chain.
        Expr::Const(Constant::Int(_)) => TypeHint::Exact(JType::Boolean),
        value => method.expr_hint(value),
    }
}

/// Type of the exception bound at the handler starting at `block`.
fn caught_type(method: &IrMethod, block: Option<LabelId>) -> TypeHint {
    let mut classes = method
        .traps
        .iter()
        .filter(|trap| Some(trap.handler) == block)
        .map(|trap| trap.catch.clone());
    let throwable = || TypeHint::Exact(JType::object("java/lang/Throwable"));
    let Some(Some(first)) = classes.next() else {
        return throwable();
    };
    if classes.all(|class| class.as_deref() == Some(first.as_str())) {
        TypeHint::Exact(JType::object(first))
    } else {
        throwable()
    }
}

/// Fixes literals and array element kinds of `stmt` from the final local types.
fn resolve_stmt(method: &IrMethod, stmt: &mut Stmt) -> Result<()> {
    let hints = method.operand_hints(stmt);
    let mut hints = hints.into_iter();
    let mut failure = None;
    walk_operands_mut(stmt, &mut |expr| {
        let hint = hints.next().unwrap_or(TypeHint::Unknown);
        match expr {
            Expr::Const(constant) if !constant.is_resolved() => {
                match resolve_constant(constant, &hint) {
                    Ok(resolved) => *constant = resolved,
                    Err(error) => failure = Some(error),
                }
            }
            Expr::ArrayGet { array, elem, .. } => {
                *elem = TypeHint::Exact(element_type(method, array, elem));
            }
            _ => {}
        }
    });
    if let Some(error) = failure {
        return Err(error);
    }
    match stmt {
        Stmt::ArraySet { array, elem, .. } => {
            *elem = TypeHint::Exact(element_type(method, array, elem));
        }
        Stmt::FillArrayData { array, data, elem } => {
            let ty = element_type(method, array, elem);
            for constant in data.iter_mut() {
                *constant = resolve_constant(constant, &TypeHint::Exact(ty.clone()))?;
            }
            *elem = TypeHint::Exact(ty);
        }
        _ => {}
    }
    Ok(())
}

/// The array's own element type wins; the access hint is the fallback.
fn element_type(method: &IrMethod, array: &Expr, elem: &TypeHint) -> JType {
    match method.expr_hint(array).exact().and_then(JType::element) {
        Some(element) => element.clone(),
        None => elem.resolve(),
    }
}

fn resolve_constant(constant: &Constant, hint: &TypeHint) -> Result<Constant> {
    let ty = match (constant, hint) {
        (Constant::Wide(_), TypeHint::Exact(ty)) if ty.is_wide() => ty.clone(),
        (Constant::Wide(_), _) => JType::Long,
        (_, hint) => hint.resolve(),
    };
    constant.resolve_for(&ty).ok_or_else(|| {
        ConversionError::Malformed(format!("literal {constant:?} cannot be typed as {ty}"))
    })
}

fn describe(hint: &TypeHint) -> String {
    match hint {
        TypeHint::Unknown => "unknown".to_string(),
        TypeHint::Single => "32-bit value".to_string(),
        TypeHint::Prim => "32-bit primitive".to_string(),
        TypeHint::Wide => "64-bit primitive".to_string(),
        TypeHint::Ref => "reference".to_string(),
        TypeHint::Exact(ty) => ty.to_string(),
    }
}
