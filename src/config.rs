/// Immutable conversion settings, built once per batch and passed down explicitly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Omit debug attributes such as `SourceFile`.
    pub skip_debug_info: bool,
    /// Emit methods without bodies.
    pub skip_code: bool,
    /// With `skip_code`, still convert `<clinit>`.
    pub keep_static_initializers: bool,
    /// Ignore try ranges of the input.
    pub skip_exceptions: bool,
    /// Share output slots between locals with disjoint live ranges.
    pub reuse_register_slots: bool,
    /// Run the block reordering pass.
    pub topological_reorder: bool,
    /// Desugar monitors into a protected region with a release handler.
    pub optimize_synchronized: bool,
    /// Log the final IR of every method.
    pub print_ir: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            skip_debug_info: true,
            skip_code: false,
            keep_static_initializers: true,
            skip_exceptions: false,
            reuse_register_slots: false,
            topological_reorder: false,
            optimize_synchronized: true,
            print_ir: false,
        }
    }
}

impl Config {
    /// Whether the body of `method_name` should be converted under this configuration.
    pub fn converts_code_of(&self, method_name: &str) -> bool {
        !self.skip_code || (self.keep_static_initializers && method_name == "<clinit>")
    }
}
