/// Failure raised while converting one method or class.
///
/// Every variant is recoverable at the batch level: the driver reports it to the
/// injected error handler and moves on to the next unit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversionError {
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("type conflict on local ${local}: {existing} vs {incoming}")]
    TypeConflict {
        local: u32,
        existing: String,
        incoming: String,
    },

    /// Internal bug: a pass produced ill-formed IR.
    #[error("IR invariant violated after {pass}: {message}")]
    Invariant { pass: &'static str, message: String },

    #[error("method code too large: {size} bytes (limit 65535)")]
    MethodTooLarge { size: usize },

    #[error("branch offset {offset} at pc {pc} does not fit in 16 bits")]
    BranchOutOfRange { pc: usize, offset: i64 },

    #[error("constant pool overflow: more than 65535 entries")]
    ConstantPoolOverflow,

    #[error("lowering failed: {0}")]
    Lowering(String),
}

impl ConversionError {
    /// Short stable identifier used in reports.
    pub fn code(&self) -> &'static str {
        match self {
            ConversionError::Malformed(_) => "MALFORMED_INPUT",
            ConversionError::TypeConflict { .. } => "TYPE_CONFLICT",
            ConversionError::Invariant { .. } => "IR_INVARIANT",
            ConversionError::MethodTooLarge { .. } => "METHOD_TOO_LARGE",
            ConversionError::BranchOutOfRange { .. } => "BRANCH_OUT_OF_RANGE",
            ConversionError::ConstantPoolOverflow => "CONSTANT_POOL_OVERFLOW",
            ConversionError::Lowering(_) => "LOWERING_FAILED",
        }
    }

    /// Whether this error points at a bug in the converter rather than at the input.
    pub fn is_internal(&self) -> bool {
        matches!(self, ConversionError::Invariant { .. })
    }
}

pub type Result<T> = std::result::Result<T, ConversionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_too_large_has_distinct_code() {
        let error = ConversionError::MethodTooLarge { size: 70_000 };
        assert_eq!(error.code(), "METHOD_TOO_LARGE");
        assert!(!error.is_internal());
        assert!(error.to_string().contains("70000"));
    }

    #[test]
    fn invariant_errors_are_internal() {
        let error = ConversionError::Invariant {
            pass: "label-cleanup",
            message: "dangling label".to_string(),
        };
        assert!(error.is_internal());
        assert!(error.to_string().contains("label-cleanup"));
    }
}
