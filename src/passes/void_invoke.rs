use crate::error::Result;
use crate::ir::{Expr, IrMethod, Stmt};
use crate::passes::Pass;

/// Turns invocations whose result is never read into value-discarding statements.
pub(crate) struct VoidInvoke;

impl Pass for VoidInvoke {
    fn name(&self) -> &'static str {
        "void-invoke"
    }

    fn run(&self, method: &mut IrMethod) -> Result<bool> {
        let counts = method.use_counts();
        let mut changed = false;
        for stmt in &mut method.stmts {
            let Stmt::Assign { local, value } = stmt else {
                continue;
            };
            if counts[local.index()] != 0
                || !matches!(value, Expr::Invoke { .. } | Expr::NewInit { .. })
            {
                continue;
            }
            let value = std::mem::replace(value, Expr::This);
            *stmt = Stmt::Eval(value);
            changed = true;
        }
        Ok(changed)
    }
}
