use std::collections::{BTreeMap, BTreeSet};

use super::{IrMethod, LabelId, Stmt};
use crate::error::{ConversionError, Result};

/// Statement-level control-flow view of a method, resolved through label positions.
///
/// Built on demand from the statement arena and discarded after the pass that needed it.
#[derive(Debug)]
pub struct Flow {
    labels: BTreeMap<LabelId, usize>,
    /// Start, end and handler positions of each trap, in table order.
    ranges: Vec<TrapRange>,
    /// Label of the block each statement belongs to.
    block_labels: Vec<Option<LabelId>>,
}

#[derive(Debug, Clone, Copy)]
struct TrapRange {
    start: usize,
    end: usize,
    handler: usize,
    catch_all: bool,
}

impl Flow {
    pub fn new(ir: &IrMethod) -> Result<Self> {
        let mut labels = BTreeMap::new();
        let mut block_labels = Vec::with_capacity(ir.stmts.len());
        let mut current = None;
        for (index, stmt) in ir.stmts.iter().enumerate() {
            if let Stmt::Label(label) = stmt {
                labels.insert(*label, index);
                current = Some(*label);
            }
            block_labels.push(current);
        }
        let position = |label: LabelId| {
            labels
                .get(&label)
                .copied()
                .ok_or_else(|| ConversionError::Invariant {
                    pass: "flow",
                    message: format!("label {} is not defined", label.0),
                })
        };
        let mut ranges = Vec::with_capacity(ir.traps.len());
        for trap in &ir.traps {
            ranges.push(TrapRange {
                start: position(trap.start)?,
                end: position(trap.end)?,
                handler: position(trap.handler)?,
                catch_all: trap.catch.is_none(),
            });
        }
        for stmt in &ir.stmts {
            for target in stmt.targets() {
                position(target)?;
            }
        }
        Ok(Self {
            labels,
            ranges,
            block_labels,
        })
    }

    pub fn index_of(&self, label: LabelId) -> Option<usize> {
        self.labels.get(&label).copied()
    }

    /// Label of the block containing statement `index`.
    pub fn block_label(&self, index: usize) -> Option<LabelId> {
        self.block_labels.get(index).copied().flatten()
    }

    /// Traps whose range covers statement `index`, in table order.
    pub fn covering_traps(&self, index: usize) -> Vec<usize> {
        self.ranges
            .iter()
            .enumerate()
            .filter(|(_, range)| range.start < index && index < range.end)
            .map(|(trap, _)| trap)
            .collect()
    }

    pub fn normal_successors(&self, ir: &IrMethod, index: usize) -> Vec<usize> {
        let stmt = &ir.stmts[index];
        let mut successors = Vec::new();
        if stmt.falls_through() && index + 1 < ir.stmts.len() {
            successors.push(index + 1);
        }
        for target in stmt.targets() {
            if let Some(position) = self.index_of(target) {
                if !successors.contains(&position) {
                    successors.push(position);
                }
            }
        }
        successors
    }

    /// Handler positions reachable when statement `index` throws.
    pub fn exceptional_successors(&self, ir: &IrMethod, index: usize) -> Vec<usize> {
        if !ir.stmts[index].can_throw() {
            return Vec::new();
        }
        let mut handlers = Vec::new();
        for trap in self.covering_traps(index) {
            let range = self.ranges[trap];
            if !handlers.contains(&range.handler) {
                handlers.push(range.handler);
            }
            if range.catch_all {
                break;
            }
        }
        handlers
    }

    pub fn successors(&self, ir: &IrMethod, index: usize) -> Vec<usize> {
        let mut successors = self.normal_successors(ir, index);
        for handler in self.exceptional_successors(ir, index) {
            if !successors.contains(&handler) {
                successors.push(handler);
            }
        }
        successors
    }

    /// Statements reachable from method entry, exceptional edges included.
    pub fn reachable(&self, ir: &IrMethod) -> Vec<bool> {
        let mut reachable = vec![false; ir.stmts.len()];
        let mut worklist = Vec::new();
        if !ir.stmts.is_empty() {
            reachable[0] = true;
            worklist.push(0);
        }
        while let Some(index) = worklist.pop() {
            for successor in self.successors(ir, index) {
                if !reachable[successor] {
                    reachable[successor] = true;
                    worklist.push(successor);
                }
            }
        }
        reachable
    }

    /// For every label entered from another block, the labels of its predecessor blocks.
    pub fn predecessor_blocks(
        &self,
        ir: &IrMethod,
        reachable: &[bool],
    ) -> BTreeMap<LabelId, BTreeSet<LabelId>> {
        let mut preds: BTreeMap<LabelId, BTreeSet<LabelId>> = BTreeMap::new();
        for index in (0..ir.stmts.len()).filter(|index| reachable[*index]) {
            let Some(from) = self.block_label(index) else {
                continue;
            };
            for successor in self.successors(ir, index) {
                // Fall-through into a non-label statement stays inside the block.
                if let Stmt::Label(to) = ir.stmts[successor] {
                    preds.entry(to).or_default().insert(from);
                }
            }
        }
        preds
    }
}
