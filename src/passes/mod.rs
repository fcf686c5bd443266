//! IR-to-IR transformations run by the method pipeline.

use std::collections::BTreeSet;

use crate::error::Result;
use crate::ir::{Constant, Expr, IrMethod, LabelId, Stmt};

pub(crate) mod aggregate;
pub(crate) mod clean_labels;
pub(crate) mod constants;
pub(crate) mod dead_code;
pub(crate) mod fill_array;
pub(crate) mod locals;
pub(crate) mod multi_array;
pub(crate) mod new_init;
pub(crate) mod null_check;
pub(crate) mod reorder;
pub(crate) mod slots;
pub(crate) mod trim_exceptions;
pub(crate) mod type_assign;
pub(crate) mod unssa;
pub(crate) mod void_invoke;
pub(crate) mod zero;

/// A transformation over one method body.
pub(crate) trait Pass {
    /// Name used in logs and invariant errors.
    fn name(&self) -> &'static str;

    /// Rewrites `method` in place and reports whether anything changed.
    fn run(&self, method: &mut IrMethod) -> Result<bool>;
}

/// Label of the block owning each statement.
pub(crate) fn block_of(method: &IrMethod) -> Vec<Option<LabelId>> {
    let mut current = None;
    method
        .stmts
        .iter()
        .map(|stmt| {
            if let Some(label) = stmt.as_label() {
                current = Some(label);
            }
            current
        })
        .collect()
}

/// Whether the block starting at `index` (a label) opens with phi assignments.
pub(crate) fn carries_phi(stmts: &[Stmt], index: usize) -> bool {
    for stmt in &stmts[index + 1..] {
        match stmt {
            Stmt::Assign {
                value: Expr::CaughtException,
                ..
            } => continue,
            stmt => return stmt.is_phi(),
        }
    }
    false
}

/// Subtrees of `stmt` fully evaluated before the first node matching `target`.
///
/// Nodes are visited in JVM evaluation order: operands first, then the operation. Returns `None`
/// when no node matches.
pub(crate) fn evaluated_before<'a>(
    stmt: &'a Stmt,
    target: &mut impl FnMut(&Expr) -> bool,
) -> Option<Vec<&'a Expr>> {
    fn scan<'a>(
        expr: &'a Expr,
        target: &mut impl FnMut(&Expr) -> bool,
        before: &mut Vec<&'a Expr>,
    ) -> bool {
        let mark = before.len();
        for child in expr.children() {
            if scan(child, target, before) {
                return true;
            }
            before.push(child);
        }
        if target(expr) {
            return true;
        }
        before.truncate(mark);
        false
    }
    let mut before = Vec::new();
    for operand in stmt.operands() {
        if scan(operand, target, &mut before) {
            return Some(before);
        }
        before.push(operand);
    }
    None
}

/// Literal value of `expr`, looking through a local defined by a literal.
pub(crate) fn literal_value<'a>(method: &'a IrMethod, expr: &'a Expr) -> Option<&'a Constant> {
    match expr {
        Expr::Const(constant) => Some(constant),
        Expr::Local(id) => method.stmts.iter().find_map(|stmt| match stmt {
            Stmt::Assign {
                local,
                value: Expr::Const(constant),
            } if local == id => Some(constant),
            _ => None,
        }),
        _ => None,
    }
}

/// Labels control can enter other than by falling through.
pub(crate) fn entry_labels(method: &IrMethod) -> BTreeSet<LabelId> {
    let mut labels = method.handler_labels();
    for stmt in &method.stmts {
        labels.extend(stmt.targets());
    }
    labels
}

/// End (exclusive) of the straight-line region that continues after statement `index`.
///
/// The region stops before a label in `entries` and after any branch or non-falling statement.
pub(crate) fn region_end(method: &IrMethod, index: usize, entries: &BTreeSet<LabelId>) -> usize {
    let stmts = &method.stmts;
    let mut end = index + 1;
    while end < stmts.len() {
        let previous = &stmts[end - 1];
        if end - 1 != index && (previous.is_branch() || !previous.falls_through()) {
            break;
        }
        if stmts[end].as_label().is_some_and(|label| entries.contains(&label)) {
            break;
        }
        end += 1;
    }
    end
}

/// Drops statements whose flag in `keep` is false.
pub(crate) fn retain_indexed(method: &mut IrMethod, keep: &[bool]) {
    let mut index = 0;
    method.stmts.retain(|_| {
        let kept = keep[index];
        index += 1;
        kept
    });
}
