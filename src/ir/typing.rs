//! Result types of expressions and the type each operand position expects.

use super::{Expr, IrMethod, JType, Stmt, TypeHint, UnaryOp};

/// Hint for a value consumed where `ty` is declared.
pub fn use_hint(ty: &JType) -> TypeHint {
    if ty.is_reference() {
        TypeHint::Ref
    } else {
        TypeHint::Exact(ty.clone())
    }
}

impl IrMethod {
    /// Best known hint for the value `expr` produces.
    pub fn expr_hint(&self, expr: &Expr) -> TypeHint {
        match expr {
            Expr::Local(id) => self.local(*id).hint.clone(),
            Expr::Const(constant) => constant.hint(),
            Expr::This => TypeHint::Exact(JType::object(self.owner.clone())),
            Expr::Param(index) => self
                .params
                .get(*index as usize)
                .cloned()
                .map_or(TypeHint::Unknown, TypeHint::Exact),
            Expr::CaughtException => TypeHint::Ref,
            Expr::Unary { op, .. } => TypeHint::Exact(match op {
                UnaryOp::Neg(kind) | UnaryOp::Not(kind) => kind.jtype(),
                UnaryOp::Convert { to, .. } => to.clone(),
            }),
            Expr::Binary { kind, .. } => TypeHint::Exact(kind.jtype()),
            Expr::Compare { .. } | Expr::InstanceOf { .. } | Expr::ArrayLength(_) => {
                TypeHint::Exact(JType::Int)
            }
            Expr::CheckCast { ty, .. } => TypeHint::Exact(ty.clone()),
            Expr::FieldGet { field, .. } => TypeHint::Exact(field.ty.clone()),
            Expr::ArrayGet { array, elem, .. } => self.element_hint(array, elem),
            Expr::Invoke { method, .. } => TypeHint::Exact(method.ret.clone()),
            Expr::New(class) => TypeHint::Exact(JType::object(class.clone())),
            Expr::NewInit { method, .. } => TypeHint::Exact(JType::object(method.owner.clone())),
            Expr::NewArray { elem, .. } | Expr::FilledArray { elem, .. } => {
                TypeHint::Exact(JType::array_of(elem.clone()))
            }
            Expr::NewMultiArray { ty, .. } => TypeHint::Exact(ty.clone()),
            Expr::Phi(_) => TypeHint::Unknown,
        }
    }

    /// Concrete type of `expr`, defaulting unresolved hints.
    pub fn expr_type(&self, expr: &Expr) -> JType {
        match expr {
            Expr::Const(constant) if !constant.is_resolved() => constant.hint().resolve(),
            _ => self.expr_hint(expr).resolve(),
        }
    }

    /// Element hint of an array access, refined by the array's own type when known.
    pub fn element_hint(&self, array: &Expr, elem: &TypeHint) -> TypeHint {
        match self.expr_hint(array).exact().and_then(JType::element) {
            Some(element) => elem
                .merge(&TypeHint::Exact(element.clone()))
                .unwrap_or_else(|| elem.clone()),
            None => elem.clone(),
        }
    }

    /// Expected hint of every operand node of `stmt`, in pre-order.
    pub fn operand_hints(&self, stmt: &Stmt) -> Vec<TypeHint> {
        let mut hints = Vec::new();
        let mut push = |expr: &Expr, hint: TypeHint| self.expr_hints(expr, hint, &mut hints);
        match stmt {
            Stmt::Label(_) | Stmt::Goto(_) | Stmt::Nop | Stmt::Return(None) => {}
            Stmt::Assign { local, value } => push(value, self.local(*local).hint.clone()),
            Stmt::FieldSet {
                field,
                object,
                value,
            } => {
                if let Some(object) = object {
                    push(object, TypeHint::Ref);
                }
                push(value, use_hint(&field.ty));
            }
            Stmt::ArraySet {
                array,
                index,
                value,
                elem,
            } => {
                let elem = self.element_hint(array, elem);
                push(array, TypeHint::Ref);
                push(index, TypeHint::Exact(JType::Int));
                push(value, elem);
            }
            Stmt::If {
                op, left, right, ..
            } => {
                let (left_hint, right_hint) = if op.is_equality() {
                    (self.expr_hint(right), self.expr_hint(left))
                } else {
                    (TypeHint::Exact(JType::Int), TypeHint::Exact(JType::Int))
                };
                push(left, comparable(left_hint));
                push(right, comparable(right_hint));
            }
            Stmt::Switch { value, .. } => push(value, TypeHint::Exact(JType::Int)),
            Stmt::Return(Some(value)) => push(value, use_hint(&self.ret)),
            Stmt::Throw(value) | Stmt::MonitorEnter(value) | Stmt::MonitorExit(value) => {
                push(value, TypeHint::Ref)
            }
            Stmt::Eval(value) => push(value, TypeHint::Unknown),
            Stmt::FillArrayData { array, .. } => push(array, TypeHint::Ref),
        }
        hints
    }

    fn expr_hints(&self, expr: &Expr, hint: TypeHint, hints: &mut Vec<TypeHint>) {
        hints.push(hint);
        let exact = |ty: JType| TypeHint::Exact(ty);
        let children: Vec<TypeHint> = match expr {
            Expr::Unary { op, .. } => vec![exact(match op {
                UnaryOp::Neg(kind) | UnaryOp::Not(kind) => kind.jtype(),
                UnaryOp::Convert { from, .. } => from.jtype(),
            })],
            Expr::Binary { op, kind, .. } => {
                let right = if op.is_shift() {
                    JType::Int
                } else {
                    kind.jtype()
                };
                vec![exact(kind.jtype()), exact(right)]
            }
            Expr::Compare { kind, .. } => vec![exact(kind.jtype()), exact(kind.jtype())],
            Expr::InstanceOf { .. }
            | Expr::CheckCast { .. }
            | Expr::ArrayLength(_)
            | Expr::FieldGet { .. } => vec![TypeHint::Ref],
            Expr::ArrayGet { .. } => vec![TypeHint::Ref, exact(JType::Int)],
            Expr::Invoke { method, args, .. } => {
                let receiver = args.len() > method.params.len();
                receiver
                    .then_some(TypeHint::Ref)
                    .into_iter()
                    .chain(method.params.iter().map(use_hint))
                    .collect()
            }
            Expr::NewInit { method, .. } => method.params.iter().map(use_hint).collect(),
            Expr::NewArray { .. } => vec![exact(JType::Int)],
            Expr::FilledArray { elem, values } => vec![use_hint(elem); values.len()],
            Expr::NewMultiArray { dims, .. } => vec![exact(JType::Int); dims.len()],
            _ => Vec::new(),
        };
        for (child, hint) in expr.children().into_iter().zip(children) {
            self.expr_hints(child, hint, hints);
        }
    }
}

/// Operands of an equality test agree on category only.
fn comparable(hint: TypeHint) -> TypeHint {
    match hint {
        TypeHint::Exact(ty) => use_hint(&ty),
        other => other,
    }
}

/// Visits every operand node of `stmt` in the pre-order used by [`IrMethod::operand_hints`].
pub fn walk_operands_mut(stmt: &mut Stmt, f: &mut impl FnMut(&mut Expr)) {
    fn walk(expr: &mut Expr, f: &mut impl FnMut(&mut Expr)) {
        f(expr);
        for child in expr.children_mut() {
            walk(child, f);
        }
    }
    for operand in stmt.operands_mut() {
        walk(operand, f);
    }
}

/// Immutable counterpart of [`walk_operands_mut`].
pub fn walk_operands<'a>(stmt: &'a Stmt, f: &mut impl FnMut(&'a Expr)) {
    fn walk<'a>(expr: &'a Expr, f: &mut impl FnMut(&'a Expr)) {
        f(expr);
        for child in expr.children() {
            walk(child, f);
        }
    }
    for operand in stmt.operands() {
        walk(operand, f);
    }
}
