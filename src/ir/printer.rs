use std::fmt::{self, Write};

use super::{
    BinaryOp, CompareOp, CondOp, Constant, Expr, IrMethod, LocalId, NumKind, Stmt, TypeHint,
    UnaryOp,
};

impl fmt::Display for IrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let modifier = if self.is_static { "static " } else { "" };
        writeln!(f, "{modifier}{}.{}{}", self.owner, self.name, self.descriptor)?;
        if !self.locals.is_empty() {
            let mut locals = String::new();
            for (index, info) in self.locals.iter().enumerate() {
                if index > 0 {
                    locals.push_str(", ");
                }
                write!(locals, "${index}:{}", hint_name(&info.hint))?;
                if let Some(slot) = info.slot {
                    write!(locals, "@{slot}")?;
                }
            }
            writeln!(f, "  locals {locals}")?;
        }
        for stmt in &self.stmts {
            match stmt {
                Stmt::Label(label) => writeln!(f, "  {}:", self.label_name(*label))?,
                other => writeln!(f, "    {}", self.render_stmt(other))?,
            }
        }
        for trap in &self.traps {
            writeln!(
                f,
                "  catch {} {} .. {} => {}",
                trap.catch.as_deref().unwrap_or("any"),
                self.label_name(trap.start),
                self.label_name(trap.end),
                self.label_name(trap.handler)
            )?;
        }
        Ok(())
    }
}

fn hint_name(hint: &TypeHint) -> String {
    match hint {
        TypeHint::Unknown => "?".to_string(),
        TypeHint::Single => "single".to_string(),
        TypeHint::Prim => "prim".to_string(),
        TypeHint::Wide => "wide".to_string(),
        TypeHint::Ref => "ref".to_string(),
        TypeHint::Exact(ty) => ty.to_string(),
    }
}

fn local(id: LocalId) -> String {
    format!("${}", id.0)
}

impl IrMethod {
    /// One-line rendering of a statement using the current display names.
    pub fn render_stmt(&self, stmt: &Stmt) -> String {
        match stmt {
            Stmt::Label(label) => format!("{}:", self.label_name(*label)),
            Stmt::Assign { local: id, value } => {
                format!("{} = {}", local(*id), self.render_expr(value))
            }
            Stmt::FieldSet {
                field,
                object,
                value,
            } => {
                let target = match object {
                    Some(object) => self.render_expr(object),
                    None => field.owner.clone(),
                };
                format!("{target}.{} = {}", field.name, self.render_expr(value))
            }
            Stmt::ArraySet {
                array,
                index,
                value,
                ..
            } => format!(
                "{}[{}] = {}",
                self.render_expr(array),
                self.render_expr(index),
                self.render_expr(value)
            ),
            Stmt::Goto(target) => format!("goto {}", self.label_name(*target)),
            Stmt::If {
                op,
                left,
                right,
                target,
            } => format!(
                "if {} {} {} goto {}",
                self.render_expr(left),
                cond_symbol(*op),
                self.render_expr(right),
                self.label_name(*target)
            ),
            Stmt::Switch {
                value,
                cases,
                default,
            } => {
                let arms: Vec<String> = cases
                    .iter()
                    .map(|(key, label)| format!("{key} => {}", self.label_name(*label)))
                    .collect();
                format!(
                    "switch {} {{ {}, default => {} }}",
                    self.render_expr(value),
                    arms.join(", "),
                    self.label_name(*default)
                )
            }
            Stmt::Return(None) => "return".to_string(),
            Stmt::Return(Some(value)) => format!("return {}", self.render_expr(value)),
            Stmt::Throw(value) => format!("throw {}", self.render_expr(value)),
            Stmt::MonitorEnter(value) => format!("lock {}", self.render_expr(value)),
            Stmt::MonitorExit(value) => format!("unlock {}", self.render_expr(value)),
            Stmt::Eval(value) => format!("void {}", self.render_expr(value)),
            Stmt::FillArrayData { array, data, .. } => {
                let values: Vec<String> = data.iter().map(render_constant).collect();
                format!("fill {} {{{}}}", self.render_expr(array), values.join(", "))
            }
            Stmt::Nop => "nop".to_string(),
        }
    }

    pub fn render_expr(&self, expr: &Expr) -> String {
        let list = |exprs: &[Expr]| {
            exprs
                .iter()
                .map(|expr| self.render_expr(expr))
                .collect::<Vec<_>>()
                .join(", ")
        };
        match expr {
            Expr::Local(id) => local(*id),
            Expr::Const(constant) => render_constant(constant),
            Expr::This => "@this".to_string(),
            Expr::Param(index) => format!("@param{index}"),
            Expr::CaughtException => "@caught".to_string(),
            Expr::Unary { op, operand } => {
                let operand = self.render_expr(operand);
                match op {
                    UnaryOp::Neg(_) => format!("-{operand}"),
                    UnaryOp::Not(_) => format!("~{operand}"),
                    UnaryOp::Convert { to, .. } => format!("({to}) {operand}"),
                }
            }
            Expr::Binary {
                op,
                left,
                right,
                ..
            } => format!(
                "({} {} {})",
                self.render_expr(left),
                binary_symbol(*op),
                self.render_expr(right)
            ),
            Expr::Compare {
                op,
                kind,
                left,
                right,
            } => {
                let name = match (op, kind) {
                    (CompareOp::Cmp, _) => "lcmp",
                    (CompareOp::Cmpl, NumKind::Float) => "fcmpl",
                    (CompareOp::Cmpg, NumKind::Float) => "fcmpg",
                    (CompareOp::Cmpl, _) => "dcmpl",
                    (CompareOp::Cmpg, _) => "dcmpg",
                };
                format!(
                    "{name}({}, {})",
                    self.render_expr(left),
                    self.render_expr(right)
                )
            }
            Expr::InstanceOf { ty, operand } => {
                format!("{} instanceof {ty}", self.render_expr(operand))
            }
            Expr::CheckCast { ty, operand } => format!("(({ty}) {})", self.render_expr(operand)),
            Expr::ArrayLength(array) => format!("{}.length", self.render_expr(array)),
            Expr::FieldGet { field, object } => match object {
                Some(object) => format!("{}.{}", self.render_expr(object), field.name),
                None => format!("{}.{}", field.owner, field.name),
            },
            Expr::ArrayGet { array, index, .. } => {
                format!("{}[{}]", self.render_expr(array), self.render_expr(index))
            }
            Expr::Invoke { method, args, .. } => {
                format!("{}.{}({})", method.owner, method.name, list(args))
            }
            Expr::New(class) => format!("new {class}"),
            Expr::NewInit { method, args } => format!("new {}({})", method.owner, list(args)),
            Expr::NewArray { elem, size } => format!("new {elem}[{}]", self.render_expr(size)),
            Expr::FilledArray { elem, values } => format!("new {elem}[] {{{}}}", list(values)),
            Expr::NewMultiArray { ty, dims } => format!("new {ty} dims({})", list(dims)),
            Expr::Phi(args) => {
                let args: Vec<String> = args
                    .iter()
                    .map(|arg| format!("{}: {}", self.label_name(arg.pred), local(arg.value)))
                    .collect();
                format!("phi({})", args.join(", "))
            }
        }
    }
}

fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::Narrow(value) => format!("{value}?"),
        Constant::Wide(value) => format!("{value}L?"),
        Constant::Int(value) => value.to_string(),
        Constant::Long(value) => format!("{value}L"),
        Constant::Float(bits) => format!("{}F", f32::from_bits(*bits)),
        Constant::Double(bits) => format!("{}D", f64::from_bits(*bits)),
        Constant::Null => "null".to_string(),
        Constant::String(value) => format!("{value:?}"),
        Constant::Class(ty) => format!("{ty}.class"),
    }
}

fn cond_symbol(op: CondOp) -> &'static str {
    match op {
        CondOp::Eq => "==",
        CondOp::Ne => "!=",
        CondOp::Lt => "<",
        CondOp::Ge => ">=",
        CondOp::Gt => ">",
        CondOp::Le => "<=",
    }
}

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::And => "&",
        BinaryOp::Or => "|",
        BinaryOp::Xor => "^",
        BinaryOp::Shl => "<<",
        BinaryOp::Shr => ">>",
        BinaryOp::Ushr => ">>>",
    }
}

#[cfg(test)]
mod tests {
    use crate::ir::{Constant, Expr, IrMethod, JType, Stmt, Trap, TypeHint};

    #[test]
    fn renders_labels_with_display_names() {
        let mut ir = IrMethod::new("a/B", "m", "()I", true, Vec::new(), JType::Int);
        let start = ir.new_label();
        let handler = ir.new_label();
        let x = ir.new_local(TypeHint::Exact(JType::Int));
        ir.stmts = vec![
            Stmt::Label(start),
            Stmt::assign(x, Expr::Const(Constant::Int(7))),
            Stmt::Return(Some(Expr::Local(x))),
            Stmt::Label(handler),
            Stmt::Return(Some(Expr::int(0))),
        ];
        ir.traps.push(Trap {
            start,
            end: handler,
            handler,
            catch: None,
        });
        ir.assign_label_names();
        let text = ir.to_string();
        assert!(text.contains("static a/B.m()I"));
        assert!(text.contains("  L0:\n    $0 = 7\n    return $0\n  L1:"));
        assert!(text.contains("catch any L0 .. L1 => L1"));
    }
}
