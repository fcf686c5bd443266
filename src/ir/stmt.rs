use super::expr::{CondOp, Constant, Expr, FieldRef};
use super::types::TypeHint;
use super::{LabelId, LocalId};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Stmt {
    Label(LabelId),
    Assign {
        local: LocalId,
        value: Expr,
    },
    FieldSet {
        field: FieldRef,
        object: Option<Expr>,
        value: Expr,
    },
    ArraySet {
        array: Expr,
        index: Expr,
        value: Expr,
        elem: TypeHint,
    },
    Goto(LabelId),
    If {
        op: CondOp,
        left: Expr,
        right: Expr,
        target: LabelId,
    },
    /// Never falls through: `default` names the next block when the source did.
    Switch {
        value: Expr,
        cases: Vec<(i32, LabelId)>,
        default: LabelId,
    },
    Return(Option<Expr>),
    Throw(Expr),
    MonitorEnter(Expr),
    MonitorExit(Expr),
    /// Value-discarding evaluation: void invokes and constructions whose result is unused.
    Eval(Expr),
    FillArrayData {
        array: Expr,
        data: Vec<Constant>,
        elem: TypeHint,
    },
    Nop,
}

impl Stmt {
    pub fn assign(local: LocalId, value: Expr) -> Self {
        Stmt::Assign { local, value }
    }

    pub fn as_label(&self) -> Option<LabelId> {
        match self {
            Stmt::Label(label) => Some(*label),
            _ => None,
        }
    }

    pub fn is_label(&self) -> bool {
        matches!(self, Stmt::Label(_))
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Stmt::Assign { value, .. } if value.is_phi())
    }

    pub fn defined_local(&self) -> Option<LocalId> {
        match self {
            Stmt::Assign { local, .. } => Some(*local),
            _ => None,
        }
    }

    /// Operand expressions in evaluation order.
    pub fn operands(&self) -> Vec<&Expr> {
        match self {
            Stmt::Label(_) | Stmt::Goto(_) | Stmt::Nop | Stmt::Return(None) => Vec::new(),
            Stmt::Assign { value, .. } => vec![value],
            Stmt::FieldSet { object, value, .. } => object.iter().chain([value]).collect(),
            Stmt::ArraySet {
                array,
                index,
                value,
                ..
            } => vec![array, index, value],
            Stmt::If { left, right, .. } => vec![left, right],
            Stmt::Switch { value, .. } => vec![value],
            Stmt::Return(Some(value))
            | Stmt::Throw(value)
            | Stmt::MonitorEnter(value)
            | Stmt::MonitorExit(value)
            | Stmt::Eval(value) => vec![value],
            Stmt::FillArrayData { array, .. } => vec![array],
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            Stmt::Label(_) | Stmt::Goto(_) | Stmt::Nop | Stmt::Return(None) => Vec::new(),
            Stmt::Assign { value, .. } => vec![value],
            Stmt::FieldSet { object, value, .. } => {
                let mut operands: Vec<&mut Expr> = object.iter_mut().collect();
                operands.push(value);
                operands
            }
            Stmt::ArraySet {
                array,
                index,
                value,
                ..
            } => vec![array, index, value],
            Stmt::If { left, right, .. } => vec![left, right],
            Stmt::Switch { value, .. } => vec![value],
            Stmt::Return(Some(value))
            | Stmt::Throw(value)
            | Stmt::MonitorEnter(value)
            | Stmt::MonitorExit(value)
            | Stmt::Eval(value) => vec![value],
            Stmt::FillArrayData { array, .. } => vec![array],
        }
    }

    /// Calls `f` for every local read by this statement, phi arguments included.
    pub fn for_each_use(&self, f: &mut impl FnMut(LocalId)) {
        for operand in self.operands() {
            operand.for_each_local(f);
        }
    }

    /// Rewrites the defined local and every read through `f`.
    pub fn map_locals(&mut self, f: &mut impl FnMut(LocalId) -> LocalId) {
        if let Stmt::Assign { local, .. } = self {
            *local = f(*local);
        }
        for operand in self.operands_mut() {
            operand.map_locals(f);
        }
    }

    pub fn uses(&self) -> Vec<LocalId> {
        let mut uses = Vec::new();
        self.for_each_use(&mut |id| uses.push(id));
        uses
    }

    /// Explicit jump targets, switch default included.
    pub fn targets(&self) -> Vec<LabelId> {
        match self {
            Stmt::Goto(target) | Stmt::If { target, .. } => vec![*target],
            Stmt::Switch { cases, default, .. } => cases
                .iter()
                .map(|(_, label)| *label)
                .chain([*default])
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn targets_mut(&mut self) -> Vec<&mut LabelId> {
        match self {
            Stmt::Goto(target) | Stmt::If { target, .. } => vec![target],
            Stmt::Switch { cases, default, .. } => cases
                .iter_mut()
                .map(|(_, label)| label)
                .chain([default])
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Stmt::Goto(_) | Stmt::If { .. } | Stmt::Switch { .. })
    }

    /// Whether control may continue with the next statement.
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Stmt::Goto(_) | Stmt::Switch { .. } | Stmt::Return(_) | Stmt::Throw(_)
        )
    }

    pub fn can_throw(&self) -> bool {
        match self {
            Stmt::Label(_) | Stmt::Goto(_) | Stmt::Nop => false,
            Stmt::FieldSet { .. }
            | Stmt::ArraySet { .. }
            | Stmt::Throw(_)
            | Stmt::MonitorEnter(_)
            | Stmt::MonitorExit(_)
            | Stmt::FillArrayData { .. } => true,
            _ => self.operands().into_iter().any(Expr::can_throw),
        }
    }

    /// Whether this statement emits code when lowered.
    pub fn emits_code(&self) -> bool {
        !matches!(self, Stmt::Label(_) | Stmt::Nop)
    }

    /// Node count, used to measure IR size.
    pub fn size(&self) -> usize {
        1 + self.operands().into_iter().map(Expr::size).sum::<usize>()
    }
}
