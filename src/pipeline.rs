use tracing::{debug, info};

use crate::config::Config;
use crate::error::Result;
use crate::ir::IrMethod;
use crate::passes::{
    Pass, aggregate::Aggregate, clean_labels::CleanLabels, constants::RemoveConstants,
    dead_code::DeadCode, fill_array::FillArray, locals::CleanLocals, multi_array::MultiArray,
    new_init::NewInit, null_check::NullCheck, reorder::TopologicalReorder, slots::AssignSlots,
    trim_exceptions::TrimExceptions, type_assign::TypeAssign, unssa::Unssa,
    void_invoke::VoidInvoke, zero::ZeroNormalize,
};

/// Fixed sequence of passes applied to every method body.
///
/// The only branch is after null-check insertion: when it reports a change the cleanup passes
/// run one more time before the rewriting passes.
pub(crate) struct Pipeline {
    prelude: Vec<Box<dyn Pass>>,
    cleanup: Vec<Box<dyn Pass>>,
    normalize: Box<dyn Pass>,
    null_check: Box<dyn Pass>,
    rewrites: Vec<Box<dyn Pass>>,
    finish: Vec<Box<dyn Pass>>,
    print_ir: bool,
}

impl Pipeline {
    pub(crate) fn new(config: &Config) -> Self {
        let mut prelude: Vec<Box<dyn Pass>> = vec![Box::new(CleanLabels)];
        if config.topological_reorder {
            prelude.push(Box::new(TopologicalReorder));
        }
        Self {
            prelude,
            cleanup: vec![
                Box::new(DeadCode),
                Box::new(CleanLocals),
                Box::new(RemoveConstants),
            ],
            normalize: Box::new(ZeroNormalize),
            null_check: Box::new(NullCheck),
            rewrites: vec![
                Box::new(NewInit),
                Box::new(FillArray),
                Box::new(Aggregate),
                Box::new(MultiArray),
                Box::new(VoidInvoke),
            ],
            finish: vec![
                Box::new(TypeAssign),
                Box::new(Unssa),
                Box::new(AssignSlots {
                    reuse: config.reuse_register_slots,
                }),
                Box::new(TrimExceptions),
            ],
            print_ir: config.print_ir,
        }
    }

    /// Transforms `method` from builder output into typed, slot-assigned, phi-free IR.
    pub(crate) fn run(&self, method: &mut IrMethod) -> Result<()> {
        apply_all(&self.prelude, method)?;
        apply_all(&self.cleanup, method)?;
        apply(self.normalize.as_ref(), method)?;
        if apply(self.null_check.as_ref(), method)? {
            apply_all(&self.cleanup, method)?;
        }
        apply_all(&self.rewrites, method)?;
        apply_all(&self.cleanup, method)?;
        apply_all(&self.finish, method)?;
        if self.print_ir {
            method.assign_label_names();
            info!(
                method = %format!("{}.{}{}", method.owner, method.name, method.descriptor),
                "final IR\n{method}"
            );
        }
        Ok(())
    }

    #[cfg(test)]
    fn pass_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.prelude.iter().map(|pass| pass.name()).collect();
        names.extend(self.cleanup.iter().map(|pass| pass.name()));
        names.push(self.normalize.name());
        names.push(self.null_check.name());
        names.extend(self.rewrites.iter().map(|pass| pass.name()));
        names.extend(self.cleanup.iter().map(|pass| pass.name()));
        names.extend(self.finish.iter().map(|pass| pass.name()));
        names
    }
}

fn apply_all(passes: &[Box<dyn Pass>], method: &mut IrMethod) -> Result<bool> {
    let mut changed = false;
    for pass in passes {
        changed |= apply(pass.as_ref(), method)?;
    }
    Ok(changed)
}

fn apply(pass: &dyn Pass, method: &mut IrMethod) -> Result<bool> {
    let changed = pass.run(method)?;
    method.validate(pass.name())?;
    if changed {
        debug!(
            pass = pass.name(),
            method = %method.name,
            size = method.size(),
            "pass changed method"
        );
    }
    Ok(changed)
}
