use crate::error::Result;
use crate::ir::{BinaryOp, Constant, Expr, InvokeKind, IrMethod, JType, MethodRef, NumKind, Stmt};
use crate::passes::{Pass, evaluated_before, literal_value};

/// Replaces operations that must fail at run time with an explicit throw.
pub(crate) struct NullCheck;

impl Pass for NullCheck {
    fn name(&self) -> &'static str {
        "null-check"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let mut changed = false;
        let mut index = 0;
        while index < method.stmts.len() {
            match rewrite(method, index) {
                Some(replacement) => {
                    let count = replacement.len();
                    method.stmts.splice(index..=index, replacement);
                    index += count;
                    changed = true;
                }
                None => index += 1,
            }
        }
        Ok(changed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Failure {
    NullPointer,
    DivideByZero,
    NegativeSize,
}

impl Failure {
    fn exception(self) -> Expr {
        let (class, message) = match self {
            Failure::NullPointer => ("java/lang/NullPointerException", None),
            Failure::DivideByZero => ("java/lang/ArithmeticException", Some("/ by zero")),
            Failure::NegativeSize => ("java/lang/NegativeArraySizeException", None),
        };
        let (descriptor, params, args) = match message {
            Some(message) => (
                "(Ljava/lang/String;)V",
                vec![JType::object("java/lang/String")],
                vec![Expr::Const(Constant::String(message.to_string()))],
            ),
            None => ("()V", Vec::new(), Vec::new()),
        };
        Expr::NewInit {
            method: MethodRef {
                owner: class.to_string(),
                name: "<init>".to_string(),
                descriptor: descriptor.to_string(),
                params,
                ret: JType::Void,
            },
            args,
        }
    }
}

/// Statements replacing `method.stmts[index]` when it must fail.
fn rewrite(method: &IrMethod, index: usize) -> Option<Vec<Stmt>> {
    let stmt = &method.stmts[index];
    if let Stmt::Throw(Expr::NewInit { .. }) = stmt {
        return None;
    }
    let mut failure = None;
    let before = evaluated_before(stmt, &mut |expr| {
        failure = expr_failure(method, expr);
        failure.is_some()
    });
    let (before, failure) = match (before, failure) {
        (Some(before), Some(failure)) => (before, failure),
        _ => {
            if !stmt_dereferences_null(method, stmt) {
                return None;
            }
            (stmt.operands(), Failure::NullPointer)
        }
    };
    let mut replacement: Vec<Stmt> = before
        .into_iter()
        .filter(|expr| !expr.is_pure())
        .map(|expr| Stmt::Eval(expr.clone()))
        .collect();
    replacement.push(Stmt::Throw(failure.exception()));
    Some(replacement)
}

fn expr_failure(method: &IrMethod, expr: &Expr) -> Option<Failure> {
    let null = |operand: &Expr| is_known_null(method, operand);
    match expr {
        Expr::FieldGet {
            object: Some(object),
            ..
        } if null(object) => Some(Failure::NullPointer),
        Expr::ArrayGet { array, .. } if null(array) => Some(Failure::NullPointer),
        Expr::ArrayLength(array) if null(array) => Some(Failure::NullPointer),
        Expr::Invoke { kind, args, .. }
            if *kind != InvokeKind::Static && args.first().is_some_and(null) =>
        {
            Some(Failure::NullPointer)
        }
        Expr::Binary {
            op: BinaryOp::Div | BinaryOp::Rem,
            kind: NumKind::Int | NumKind::Long,
            right,
            ..
        } if literal_value(method, right).is_some_and(|value| value.is_zero()) => {
            Some(Failure::DivideByZero)
        }
        Expr::NewArray { size, .. } if is_negative(method, size) => Some(Failure::NegativeSize),
        Expr::NewMultiArray { dims, .. } if dims.iter().any(|dim| is_negative(method, dim)) => {
            Some(Failure::NegativeSize)
        }
        _ => None,
    }
}

fn stmt_dereferences_null(method: &IrMethod, stmt: &Stmt) -> bool {
    let null = |operand: &Expr| is_known_null(method, operand);
    match stmt {
        Stmt::FieldSet {
            object: Some(object),
            ..
        } => null(object),
        Stmt::ArraySet { array, .. } | Stmt::FillArrayData { array, .. } => null(array),
        Stmt::MonitorEnter(value) | Stmt::MonitorExit(value) => null(value),
        _ => false,
    }
}

fn is_known_null(method: &IrMethod, expr: &Expr) -> bool {
    literal_value(method, expr).is_some_and(Constant::is_null_like)
}

fn is_negative(method: &IrMethod, expr: &Expr) -> bool {
    literal_value(method, expr)
        .and_then(Constant::as_int)
        .is_some_and(|value| value < 0)
}
