use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::ir::{IrMethod, LabelId, Stmt};
use crate::passes::{Pass, carries_phi};

/// Merges, threads and drops labels until the label structure is minimal.
pub(crate) struct CleanLabels;

impl Pass for CleanLabels {
    fn name(&self) -> &'static str {
        "clean-labels"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let mut changed = false;
        loop {
            let round = merge_adjacent(method)
                | drop_jumps_to_next(method)
                | thread_jumps(method)
                | drop_unreferenced(method)
                | drop_empty_traps(method);
            if !round {
                return Ok(changed);
            }
            changed = true;
        }
    }
}

fn merge_adjacent(method: &mut IrMethod) -> bool {
    let mut map = BTreeMap::new();
    let mut keep = vec![true; method.stmts.len()];
    let mut previous: Option<LabelId> = None;
    for index in 0..method.stmts.len() {
        match method.stmts[index].as_label() {
            Some(label) => match previous {
                Some(first) if !carries_phi(&method.stmts, index) => {
                    map.insert(label, first);
                    keep[index] = false;
                }
                _ => previous = Some(label),
            },
            None => previous = None,
        }
    }
    if map.is_empty() {
        return false;
    }
    super::retain_indexed(method, &keep);
    method.rename_labels(&map);
    true
}

fn drop_jumps_to_next(method: &mut IrMethod) -> bool {
    let mut keep = vec![true; method.stmts.len()];
    let mut changed = false;
    for index in 0..method.stmts.len().saturating_sub(1) {
        if let (Stmt::Goto(target), Stmt::Label(next)) =
            (&method.stmts[index], &method.stmts[index + 1])
        {
            if target == next {
                keep[index] = false;
                changed = true;
            }
        }
    }
    if changed {
        super::retain_indexed(method, &keep);
    }
    changed
}

/// Retargets jumps into blocks that consist of a single `goto`.
fn thread_jumps(method: &mut IrMethod) -> bool {
    let handlers = method.handler_labels();
    let mut forwards = BTreeMap::new();
    for (index, stmt) in method.stmts.iter().enumerate() {
        let Some(label) = stmt.as_label() else {
            continue;
        };
        if let Some(Stmt::Goto(target)) = method.stmts.get(index + 1) {
            if *target != label && !handlers.contains(&label) && !handlers.contains(target) {
                forwards.insert(label, *target);
            }
        }
    }
    if forwards.is_empty() {
        return false;
    }
    let phi_labels: BTreeSet<LabelId> = method
        .stmts
        .iter()
        .enumerate()
        .filter_map(|(index, stmt)| {
            let label = stmt.as_label()?;
            carries_phi(&method.stmts, index).then_some(label)
        })
        .collect();
    let resolve = |start: LabelId| {
        let mut current = start;
        let mut seen = BTreeSet::from([start]);
        while let Some(next) = forwards.get(&current) {
            if phi_labels.contains(next) || !seen.insert(*next) {
                break;
            }
            current = *next;
        }
        current
    };
    let mut changed = false;
    for stmt in &mut method.stmts {
        for target in stmt.targets_mut() {
            let resolved = resolve(*target);
            if resolved != *target {
                *target = resolved;
                changed = true;
            }
        }
    }
    changed
}

fn drop_unreferenced(method: &mut IrMethod) -> bool {
    let referenced = method.referenced_labels();
    let keep: Vec<bool> = method
        .stmts
        .iter()
        .enumerate()
        .map(|(index, stmt)| match stmt.as_label() {
            Some(label) => {
                index == 0 || referenced.contains(&label) || carries_phi(&method.stmts, index)
            }
            None => true,
        })
        .collect();
    if keep.iter().all(|kept| *kept) {
        return false;
    }
    super::retain_indexed(method, &keep);
    true
}

fn drop_empty_traps(method: &mut IrMethod) -> bool {
    let positions: BTreeMap<LabelId, usize> = method
        .stmts
        .iter()
        .enumerate()
        .filter_map(|(index, stmt)| stmt.as_label().map(|label| (label, index)))
        .collect();
    let before = method.traps.len();
    let stmts = &method.stmts;
    method.traps.retain(|trap| {
        match (positions.get(&trap.start), positions.get(&trap.end)) {
            (Some(start), Some(end)) if start < end => {
                stmts[start + 1..*end].iter().any(Stmt::emits_code)
            }
            _ => false,
        }
    });
    method.traps.len() != before
}
