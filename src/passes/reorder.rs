use std::collections::BTreeSet;

use crate::error::Result;
use crate::ir::{IrMethod, LabelId, Stmt};
use crate::passes::{Pass, carries_phi};

/// Pulls exit blocks reached by exactly one `goto` up to the jump site.
pub(crate) struct TopologicalReorder;

impl Pass for TopologicalReorder {
    fn name(&self) -> &'static str {
        "topological-reorder"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let mut changed = false;
        while let Some((jump, start, end)) = find_candidate(method) {
            let block: Vec<Stmt> = method.stmts.drain(start..end).collect();
            method.stmts.splice(jump..=jump, block);
            changed = true;
        }
        Ok(changed)
    }
}

/// Returns the index of the `goto` and the statement range of the block it should absorb.
fn find_candidate(method: &IrMethod) -> Option<(usize, usize, usize)> {
    let stmts = &method.stmts;
    let bounds: BTreeSet<LabelId> = method
        .traps
        .iter()
        .flat_map(|trap| [trap.start, trap.end, trap.handler])
        .collect();
    for (start, stmt) in stmts.iter().enumerate() {
        let Some(label) = stmt.as_label() else {
            continue;
        };
        if bounds.contains(&label) || carries_phi(stmts, start) {
            continue;
        }
        if start > 0 && stmts[start - 1].falls_through() {
            continue;
        }
        let end = stmts[start + 1..]
            .iter()
            .position(Stmt::is_label)
            .map_or(stmts.len(), |offset| start + 1 + offset);
        if !matches!(stmts[end - 1], Stmt::Return(_) | Stmt::Throw(_)) {
            continue;
        }
        let mut jumps = stmts
            .iter()
            .enumerate()
            .filter(|(_, stmt)| stmt.targets().contains(&label));
        let (Some((jump, Stmt::Goto(_))), None) = (jumps.next(), jumps.next()) else {
            continue;
        };
        // Moving the block forward over itself is meaningless.
        if (start..end).contains(&jump) {
            continue;
        }
        let coverage = covering(method, jump);
        if (start..end).all(|index| covering(method, index) == coverage) {
            let jump = if jump > start { jump - (end - start) } else { jump };
            return Some((jump, start, end));
        }
    }
    None
}

fn covering(method: &IrMethod, index: usize) -> Vec<usize> {
    let position = |label: LabelId| {
        method
            .stmts
            .iter()
            .position(|stmt| stmt.as_label() == Some(label))
    };
    method
        .traps
        .iter()
        .enumerate()
        .filter(|(_, trap)| match (position(trap.start), position(trap.end)) {
            (Some(start), Some(end)) => start < index && index < end,
            _ => false,
        })
        .map(|(trap, _)| trap)
        .collect()
}
