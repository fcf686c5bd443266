//! Method-level intermediate representation: an arena of statements, a local table and traps.

mod cfg;
mod expr;
mod printer;
mod stmt;
mod types;
mod typing;

use std::collections::{BTreeMap, BTreeSet};

pub use cfg::Flow;
pub use expr::{
    BinaryOp, CompareOp, CondOp, Constant, Expr, FieldRef, InvokeKind, MethodRef, NumKind, PhiArg,
    UnaryOp,
};
pub use stmt::Stmt;
pub use types::{Category, JType, TypeHint};
pub use typing::{use_hint, walk_operands, walk_operands_mut};

use crate::error::{ConversionError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

impl LocalId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Entry of the local table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalInfo {
    pub hint: TypeHint,
    /// Output frame slot, set by slot assignment.
    pub slot: Option<u16>,
}

/// Exception-handler entry. Statements strictly between `start` and `end` are covered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Trap {
    pub start: LabelId,
    pub end: LabelId,
    pub handler: LabelId,
    /// Internal name of the caught class, `None` for catch-any.
    pub catch: Option<String>,
}

/// Translated body of one method.
#[derive(Clone, Debug, PartialEq)]
pub struct IrMethod {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    pub params: Vec<JType>,
    pub ret: JType,
    pub stmts: Vec<Stmt>,
    pub locals: Vec<LocalInfo>,
    pub traps: Vec<Trap>,
    next_label: u32,
    /// Display names for diagnostics, filled by [`IrMethod::assign_label_names`].
    pub label_names: BTreeMap<LabelId, String>,
}

impl IrMethod {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        is_static: bool,
        params: Vec<JType>,
        ret: JType,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            descriptor: descriptor.into(),
            is_static,
            params,
            ret,
            stmts: Vec::new(),
            locals: Vec::new(),
            traps: Vec::new(),
            next_label: 0,
            label_names: BTreeMap::new(),
        }
    }

    pub fn new_label(&mut self) -> LabelId {
        let label = LabelId(self.next_label);
        self.next_label += 1;
        label
    }

    /// First label id not yet handed out.
    pub fn label_limit(&self) -> u32 {
        self.next_label
    }

    pub fn new_local(&mut self, hint: TypeHint) -> LocalId {
        let id = LocalId(self.locals.len() as u32);
        self.locals.push(LocalInfo { hint, slot: None });
        id
    }

    pub fn local(&self, id: LocalId) -> &LocalInfo {
        &self.locals[id.index()]
    }

    pub fn local_mut(&mut self, id: LocalId) -> &mut LocalInfo {
        &mut self.locals[id.index()]
    }

    /// Resolved type of a local; only meaningful after type assignment.
    pub fn local_type(&self, id: LocalId) -> JType {
        self.local(id).hint.resolve()
    }

    /// Slots taken by `this` and the parameters.
    pub fn param_slots(&self) -> u16 {
        let receiver = if self.is_static { 0 } else { 1 };
        receiver + self.params.iter().map(JType::size).sum::<u16>()
    }

    /// Frame slot of parameter `index` (receiver excluded).
    pub fn param_slot(&self, index: u16) -> u16 {
        let receiver = if self.is_static { 0 } else { 1 };
        receiver
            + self.params[..index as usize]
                .iter()
                .map(JType::size)
                .sum::<u16>()
    }

    /// Number of reads of each local, phi arguments included.
    pub fn use_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.locals.len()];
        for stmt in &self.stmts {
            stmt.for_each_use(&mut |id| counts[id.index()] += 1);
        }
        counts
    }

    /// Locals read as phi arguments.
    pub fn phi_operands(&self) -> BTreeSet<LocalId> {
        self.stmts
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Assign {
                    value: Expr::Phi(args),
                    ..
                } => Some(args.iter().map(|arg| arg.value)),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Index of the defining statement of each local.
    pub fn definitions(&self) -> Vec<Option<usize>> {
        let mut defs = vec![None; self.locals.len()];
        for (index, stmt) in self.stmts.iter().enumerate() {
            if let Some(local) = stmt.defined_local() {
                defs[local.index()] = Some(index);
            }
        }
        defs
    }

    /// Labels referenced by jumps, traps and phi predecessors.
    pub fn referenced_labels(&self) -> BTreeSet<LabelId> {
        let mut labels = BTreeSet::new();
        for stmt in &self.stmts {
            labels.extend(stmt.targets());
            if let Stmt::Assign {
                value: Expr::Phi(args),
                ..
            } = stmt
            {
                labels.extend(args.iter().map(|arg| arg.pred));
            }
        }
        for trap in &self.traps {
            labels.extend([trap.start, trap.end, trap.handler]);
        }
        labels
    }

    /// Labels that start an exception handler.
    pub fn handler_labels(&self) -> BTreeSet<LabelId> {
        self.traps.iter().map(|trap| trap.handler).collect()
    }

    /// Rewrites every reference to a label according to `map`.
    pub fn rename_labels(&mut self, map: &BTreeMap<LabelId, LabelId>) {
        let rename = |label: &mut LabelId| {
            if let Some(to) = map.get(label) {
                *label = *to;
            }
        };
        for stmt in &mut self.stmts {
            for target in stmt.targets_mut() {
                rename(target);
            }
            if let Stmt::Assign {
                value: Expr::Phi(args),
                ..
            } = stmt
            {
                for arg in args.iter_mut() {
                    rename(&mut arg.pred);
                }
            }
        }
        for trap in &mut self.traps {
            rename(&mut trap.start);
            rename(&mut trap.end);
            rename(&mut trap.handler);
        }
    }

    /// Total node count of the statement list.
    pub fn size(&self) -> usize {
        self.stmts.iter().map(Stmt::size).sum()
    }

    pub fn has_phi(&self) -> bool {
        self.stmts.iter().any(Stmt::is_phi)
    }

    /// Checks that every referenced label is defined exactly once and traps are ordered.
    pub fn validate(&self, pass: &'static str) -> Result<()> {
        let invariant = |message: String| ConversionError::Invariant { pass, message };
        let mut defined = BTreeMap::new();
        for (index, stmt) in self.stmts.iter().enumerate() {
            if let Some(label) = stmt.as_label() {
                if defined.insert(label, index).is_some() {
                    return Err(invariant(format!("label {} defined twice", label.0)));
                }
            }
        }
        for label in self.referenced_labels() {
            if !defined.contains_key(&label) {
                return Err(invariant(format!("label {} referenced but not defined", label.0)));
            }
        }
        for trap in &self.traps {
            if defined[&trap.start] > defined[&trap.end] {
                return Err(invariant(format!(
                    "trap range {}..{} is reversed",
                    trap.start.0, trap.end.0
                )));
            }
        }
        for stmt in &self.stmts {
            let mut bad = None;
            stmt.for_each_use(&mut |id| {
                if id.index() >= self.locals.len() {
                    bad = Some(id);
                }
            });
            if let Some(id) = bad {
                return Err(invariant(format!("unknown local ${}", id.0)));
            }
        }
        Ok(())
    }

    /// Names labels `L0, L1, …` in order of appearance.
    pub fn assign_label_names(&mut self) {
        self.label_names = self
            .stmts
            .iter()
            .filter_map(Stmt::as_label)
            .enumerate()
            .map(|(index, label)| (label, format!("L{index}")))
            .collect();
    }

    pub fn label_name(&self, label: LabelId) -> String {
        self.label_names
            .get(&label)
            .cloned()
            .unwrap_or_else(|| format!("@{}", label.0))
    }
}
