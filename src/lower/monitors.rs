use std::collections::{BTreeMap, BTreeSet};

use super::insn::{CodeSink, Insn, TryCatch};
use crate::error::Result;
use crate::ir::{Flow, IrMethod, LabelId, Stmt};
use crate::opcodes::{ALOAD, ATHROW, MONITOREXIT};

/// Plan for desugaring monitor regions: a lock slot per monitor-enter and a release handler
/// for throwing code that no catch-any handler already protects.
#[derive(Debug, Default)]
pub(super) struct Monitors {
    enter_slots: BTreeMap<usize, u16>,
    exit_slots: BTreeMap<usize, u16>,
    /// Range labels to emit before the statement at each index.
    bounds: BTreeMap<usize, Vec<LabelId>>,
    entries: Vec<TryCatch>,
    releases: Vec<Release>,
}

/// Handler code `aload lock; monitorexit; athrow`.
#[derive(Debug)]
struct Release {
    label: LabelId,
    slot: u16,
    /// End of the handler code when an outer monitor must release too.
    end: Option<LabelId>,
}

impl Monitors {
    pub(super) fn analyze(method: &IrMethod, first_slot: u16) -> Result<Self> {
        let enter_slots: BTreeMap<usize, u16> = method
            .stmts
            .iter()
            .enumerate()
            .filter(|(_, stmt)| matches!(stmt, Stmt::MonitorEnter(_)))
            .zip(first_slot..)
            .map(|((index, _), slot)| (index, slot))
            .collect();
        if enter_slots.is_empty() {
            return Ok(Self::default());
        }
        let flow = Flow::new(method)?;
        let held = held_monitors(method, &flow);
        let innermost = |index: usize| held[index].as_ref().and_then(|stack| stack.last().copied());

        let exit_slots = method
            .stmts
            .iter()
            .enumerate()
            .filter(|(_, stmt)| matches!(stmt, Stmt::MonitorExit(_)))
            .filter_map(|(index, _)| {
                innermost(index).and_then(|enter| enter_slots.get(&enter).map(|slot| (index, *slot)))
            })
            .collect();

        let runs = unprotected_runs(method, &flow, &innermost);
        let mut next_label = method.label_limit();
        let mut fresh = || {
            let label = LabelId(next_label);
            next_label += 1;
            label
        };

        let mut required: BTreeSet<usize> = runs.iter().map(|(_, _, enter)| *enter).collect();
        let mut pending: Vec<usize> = required.iter().copied().collect();
        while let Some(enter) = pending.pop() {
            if let Some(outer) = innermost(enter) {
                if required.insert(outer) {
                    pending.push(outer);
                }
            }
        }
        let handlers: BTreeMap<usize, LabelId> =
            required.iter().map(|enter| (*enter, fresh())).collect();

        let mut bounds: BTreeMap<usize, Vec<LabelId>> = BTreeMap::new();
        let mut entries = Vec::new();
        for (first, last, enter) in runs {
            let (start, end) = (fresh(), fresh());
            bounds.entry(first).or_default().push(start);
            bounds.entry(last + 1).or_default().push(end);
            entries.push(TryCatch {
                start,
                end,
                handler: handlers[&enter],
                catch: None,
            });
        }
        let mut releases = Vec::with_capacity(handlers.len());
        for (enter, label) in &handlers {
            let end = innermost(*enter).map(|outer| {
                let end = fresh();
                entries.push(TryCatch {
                    start: *label,
                    end,
                    handler: handlers[&outer],
                    catch: None,
                });
                end
            });
            releases.push(Release {
                label: *label,
                slot: enter_slots[enter],
                end,
            });
        }
        Ok(Self {
            enter_slots,
            exit_slots,
            bounds,
            entries,
            releases,
        })
    }

    pub(super) fn enter_slot(&self, index: usize) -> Option<u16> {
        self.enter_slots.get(&index).copied()
    }

    pub(super) fn exit_slot(&self, index: usize) -> Option<u16> {
        self.exit_slots.get(&index).copied()
    }

    pub(super) fn lock_slots(&self) -> u16 {
        self.enter_slots.len() as u16
    }

    pub(super) fn entries(&self) -> &[TryCatch] {
        &self.entries
    }

    pub(super) fn labels_before(&self, index: usize) -> &[LabelId] {
        self.bounds.get(&index).map_or(&[], Vec::as_slice)
    }

    /// Appends the release handlers after the method body.
    pub(super) fn emit_handlers(&self, sink: &mut dyn CodeSink) {
        for release in &self.releases {
            sink.emit(Insn::Label(release.label));
            sink.emit(Insn::Var {
                op: ALOAD,
                slot: release.slot,
            });
            sink.emit(Insn::Op(MONITOREXIT));
            sink.emit(Insn::Op(ATHROW));
            if let Some(end) = release.end {
                sink.emit(Insn::Label(end));
            }
        }
    }
}

/// Stack of monitor-enter indices certainly held before each statement; `None` if unreachable.
///
/// Paths that disagree keep only their common outer monitors.
fn held_monitors(method: &IrMethod, flow: &Flow) -> Vec<Option<Vec<usize>>> {
    let mut held: Vec<Option<Vec<usize>>> = vec![None; method.stmts.len()];
    if method.stmts.is_empty() {
        return held;
    }
    held[0] = Some(Vec::new());
    let mut worklist = vec![0];
    while let Some(index) = worklist.pop() {
        let Some(before) = held[index].clone() else {
            continue;
        };
        let mut after = before.clone();
        match &method.stmts[index] {
            Stmt::MonitorEnter(_) => after.push(index),
            Stmt::MonitorExit(_) => {
                after.pop();
            }
            _ => {}
        }
        let normal = flow
            .normal_successors(method, index)
            .into_iter()
            .map(|successor| (successor, &after));
        let exceptional = flow
            .exceptional_successors(method, index)
            .into_iter()
            .map(|successor| (successor, &before));
        for (successor, incoming) in normal.chain(exceptional) {
            let merged = match &held[successor] {
                None => incoming.clone(),
                Some(existing) => existing
                    .iter()
                    .zip(incoming)
                    .take_while(|(a, b)| a == b)
                    .map(|(a, _)| *a)
                    .collect(),
            };
            if held[successor].as_ref() != Some(&merged) {
                held[successor] = Some(merged);
                worklist.push(successor);
            }
        }
    }
    held
}

/// Runs `(first, last, enter)` of throwing statements executed under monitor `enter` with no
/// covering catch-any trap. Monitor exits are left out.
fn unprotected_runs(
    method: &IrMethod,
    flow: &Flow,
    innermost: &impl Fn(usize) -> Option<usize>,
) -> Vec<(usize, usize, usize)> {
    let mut runs = Vec::new();
    let mut current: Option<(usize, usize, usize)> = None;
    for (index, stmt) in method.stmts.iter().enumerate() {
        if !stmt.can_throw() {
            continue;
        }
        let protected = flow
            .covering_traps(index)
            .iter()
            .any(|trap| method.traps[*trap].catch.is_none());
        let need = innermost(index).filter(|_| !protected && !matches!(stmt, Stmt::MonitorExit(_)));
        current = match (current, need) {
            (Some((first, _, enter)), Some(need)) if enter == need => Some((first, index, enter)),
            (current, need) => {
                runs.extend(current);
                need.map(|enter| (index, index, enter))
            }
        };
    }
    runs.extend(current);
    runs
}
