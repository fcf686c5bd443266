use super::types::{JType, TypeHint};
use super::{LabelId, LocalId};

/// Literal value. `Narrow` and `Wide` are raw bit patterns whose kind is decided by type assignment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Constant {
    Narrow(i32),
    Wide(i64),
    Int(i32),
    Long(i64),
    /// IEEE-754 bits.
    Float(u32),
    /// IEEE-754 bits.
    Double(u64),
    Null,
    String(String),
    Class(JType),
}

impl Constant {
    pub fn is_zero(&self) -> bool {
        matches!(
            self,
            Constant::Narrow(0) | Constant::Wide(0) | Constant::Int(0) | Constant::Long(0)
        )
    }

    /// Known null: the null literal or an untyped zero.
    pub fn is_null_like(&self) -> bool {
        matches!(self, Constant::Null | Constant::Narrow(0))
    }

    /// Integer value of an int-like literal.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Constant::Narrow(value) | Constant::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, Constant::Narrow(_) | Constant::Wide(_))
    }

    /// Reinterpret a raw literal for a value of type `ty`.
    pub fn resolve_for(&self, ty: &JType) -> Option<Constant> {
        let resolved = match (self, ty) {
            (Constant::Narrow(value), ty) if ty.is_int_like() => Constant::Int(*value),
            (Constant::Narrow(value), JType::Float) => Constant::Float(*value as u32),
            (Constant::Narrow(0), ty) if ty.is_reference() => Constant::Null,
            (Constant::Wide(value), JType::Long) => Constant::Long(*value),
            (Constant::Wide(value), JType::Double) => Constant::Double(*value as u64),
            (Constant::Narrow(_), _) | (Constant::Wide(_), _) => return None,
            (resolved, _) => resolved.clone(),
        };
        Some(resolved)
    }

    /// Hint implied by the literal alone.
    pub fn hint(&self) -> TypeHint {
        match self {
            Constant::Narrow(_) => TypeHint::Single,
            Constant::Wide(_) => TypeHint::Wide,
            Constant::Int(_) => TypeHint::Exact(JType::Int),
            Constant::Long(_) => TypeHint::Exact(JType::Long),
            Constant::Float(_) => TypeHint::Exact(JType::Float),
            Constant::Double(_) => TypeHint::Exact(JType::Double),
            Constant::Null => TypeHint::Ref,
            Constant::String(_) => TypeHint::Exact(JType::object("java/lang/String")),
            Constant::Class(_) => TypeHint::Exact(JType::object("java/lang/Class")),
        }
    }
}

/// Arithmetic operand kind of unary and binary operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NumKind {
    Int,
    Long,
    Float,
    Double,
}

impl NumKind {
    pub fn jtype(self) -> JType {
        match self {
            NumKind::Int => JType::Int,
            NumKind::Long => JType::Long,
            NumKind::Float => JType::Float,
            NumKind::Double => JType::Double,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg(NumKind),
    /// Bitwise complement, int or long only.
    Not(NumKind),
    /// Primitive conversion; `to` may be a sub-int type for truncations.
    Convert { from: NumKind, to: JType },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl BinaryOp {
    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::Ushr)
    }
}

/// Three-way comparison producing -1, 0 or 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `lcmp`
    Cmp,
    /// NaN yields -1.
    Cmpl,
    /// NaN yields 1.
    Cmpg,
}

/// Relation tested by a conditional jump.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

impl CondOp {
    pub fn is_equality(self) -> bool {
        matches!(self, CondOp::Eq | CondOp::Ne)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub ty: JType,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub params: Vec<JType>,
    pub ret: JType,
}

/// Value flowing into a phi from the block starting at `pred`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PhiArg {
    pub pred: LabelId,
    pub value: LocalId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Local(LocalId),
    Const(Constant),
    This,
    Param(u16),
    /// Exception delivered to a handler; only valid right after the handler label.
    CaughtException,
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        kind: NumKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CompareOp,
        kind: NumKind,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    InstanceOf {
        ty: JType,
        operand: Box<Expr>,
    },
    CheckCast {
        ty: JType,
        operand: Box<Expr>,
    },
    ArrayLength(Box<Expr>),
    FieldGet {
        field: FieldRef,
        object: Option<Box<Expr>>,
    },
    ArrayGet {
        array: Box<Expr>,
        index: Box<Expr>,
        elem: TypeHint,
    },
    /// Receiver, when present, is `args[0]`.
    Invoke {
        kind: InvokeKind,
        method: MethodRef,
        args: Vec<Expr>,
    },
    /// Uninitialized allocation awaiting its constructor call.
    New(String),
    /// Allocation fused with its constructor; the class is `method.owner`.
    NewInit {
        method: MethodRef,
        args: Vec<Expr>,
    },
    NewArray {
        elem: JType,
        size: Box<Expr>,
    },
    FilledArray {
        elem: JType,
        values: Vec<Expr>,
    },
    NewMultiArray {
        ty: JType,
        dims: Vec<Expr>,
    },
    Phi(Vec<PhiArg>),
}

impl Expr {
    pub fn local(id: LocalId) -> Self {
        Expr::Local(id)
    }

    pub fn int(value: i32) -> Self {
        Expr::Const(Constant::Int(value))
    }

    pub fn as_local(&self) -> Option<LocalId> {
        match self {
            Expr::Local(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<&Constant> {
        match self {
            Expr::Const(constant) => Some(constant),
            _ => None,
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Expr::Phi(_))
    }

    /// Identity values bound at method or handler entry.
    pub fn is_identity(&self) -> bool {
        matches!(self, Expr::This | Expr::Param(_) | Expr::CaughtException)
    }

    /// Direct operands in JVM evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Local(_)
            | Expr::Const(_)
            | Expr::This
            | Expr::Param(_)
            | Expr::CaughtException
            | Expr::New(_)
            | Expr::Phi(_) => Vec::new(),
            Expr::Unary { operand, .. }
            | Expr::InstanceOf { operand, .. }
            | Expr::CheckCast { operand, .. } => vec![operand.as_ref()],
            Expr::ArrayLength(array) => vec![array.as_ref()],
            Expr::Binary { left, right, .. } | Expr::Compare { left, right, .. } => {
                vec![left.as_ref(), right.as_ref()]
            }
            Expr::FieldGet { object, .. } => object.iter().map(|o| o.as_ref()).collect(),
            Expr::ArrayGet { array, index, .. } => vec![array.as_ref(), index.as_ref()],
            Expr::Invoke { args, .. } | Expr::NewInit { args, .. } => args.iter().collect(),
            Expr::NewArray { size, .. } => vec![size.as_ref()],
            Expr::FilledArray { values, .. } => values.iter().collect(),
            Expr::NewMultiArray { dims, .. } => dims.iter().collect(),
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Expr::Local(_)
            | Expr::Const(_)
            | Expr::This
            | Expr::Param(_)
            | Expr::CaughtException
            | Expr::New(_)
            | Expr::Phi(_) => Vec::new(),
            Expr::Unary { operand, .. }
            | Expr::InstanceOf { operand, .. }
            | Expr::CheckCast { operand, .. } => vec![operand.as_mut()],
            Expr::ArrayLength(array) => vec![array.as_mut()],
            Expr::Binary { left, right, .. } | Expr::Compare { left, right, .. } => {
                vec![left.as_mut(), right.as_mut()]
            }
            Expr::FieldGet { object, .. } => object.iter_mut().map(|o| o.as_mut()).collect(),
            Expr::ArrayGet { array, index, .. } => vec![array.as_mut(), index.as_mut()],
            Expr::Invoke { args, .. } | Expr::NewInit { args, .. } => args.iter_mut().collect(),
            Expr::NewArray { size, .. } => vec![size.as_mut()],
            Expr::FilledArray { values, .. } => values.iter_mut().collect(),
            Expr::NewMultiArray { dims, .. } => dims.iter_mut().collect(),
        }
    }

    /// Calls `f` for every local read, phi arguments included.
    pub fn for_each_local(&self, f: &mut impl FnMut(LocalId)) {
        match self {
            Expr::Local(id) => f(*id),
            Expr::Phi(args) => args.iter().for_each(|arg| f(arg.value)),
            _ => self.children().into_iter().for_each(|child| child.for_each_local(f)),
        }
    }

    /// Replaces reads of `from` outside phi arguments with `to`, returning how many were replaced.
    pub fn substitute(&mut self, from: LocalId, to: &Expr) -> usize {
        if let Expr::Local(id) = self {
            if *id == from {
                *self = to.clone();
                return 1;
            }
            return 0;
        }
        self.children_mut()
            .into_iter()
            .map(|child| child.substitute(from, to))
            .sum()
    }

    /// Renames every read of `from`, phi arguments included.
    pub fn rename_local(&mut self, from: LocalId, to: LocalId) {
        match self {
            Expr::Local(id) if *id == from => *id = to,
            Expr::Phi(args) => {
                for arg in args.iter_mut().filter(|arg| arg.value == from) {
                    arg.value = to;
                }
            }
            _ => self
                .children_mut()
                .into_iter()
                .for_each(|child| child.rename_local(from, to)),
        }
    }

    /// Rewrites every local read, phi arguments included, through `f`.
    pub fn map_locals(&mut self, f: &mut impl FnMut(LocalId) -> LocalId) {
        match self {
            Expr::Local(id) => *id = f(*id),
            Expr::Phi(args) => args.iter_mut().for_each(|arg| arg.value = f(arg.value)),
            _ => self
                .children_mut()
                .into_iter()
                .for_each(|child| child.map_locals(f)),
        }
    }

    /// Whether evaluating this node itself (operands aside) may raise an exception.
    fn node_can_throw(&self) -> bool {
        match self {
            Expr::Binary { op, kind, .. } => {
                matches!(op, BinaryOp::Div | BinaryOp::Rem)
                    && matches!(kind, NumKind::Int | NumKind::Long)
            }
            Expr::Const(constant) => matches!(constant, Constant::Class(_)),
            Expr::CheckCast { .. }
            | Expr::ArrayLength(_)
            | Expr::FieldGet { .. }
            | Expr::ArrayGet { .. }
            | Expr::Invoke { .. }
            | Expr::New(_)
            | Expr::NewInit { .. }
            | Expr::NewArray { .. }
            | Expr::FilledArray { .. }
            | Expr::NewMultiArray { .. } => true,
            _ => false,
        }
    }

    pub fn can_throw(&self) -> bool {
        self.node_can_throw() || self.children().into_iter().any(Expr::can_throw)
    }

    /// Free of side effects and unable to throw: may be moved, duplicated or dropped.
    pub fn is_pure(&self) -> bool {
        let node_pure = match self {
            Expr::Invoke { .. } | Expr::NewInit { .. } | Expr::New(_) => false,
            Expr::NewArray { size, .. } => {
                matches!(size.as_const().and_then(Constant::as_int), Some(n) if n >= 0)
            }
            _ => !self.node_can_throw(),
        };
        node_pure && self.children().into_iter().all(Expr::is_pure)
    }

    /// Number of nodes, used to measure IR size.
    pub fn size(&self) -> usize {
        1 + self.children().into_iter().map(Expr::size).sum::<usize>()
    }
}
