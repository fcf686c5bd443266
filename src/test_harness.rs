use crate::builder::build_method;
use crate::config::Config;
use crate::context::ClassContext;
use crate::dex::{
    ACC_PUBLIC, ACC_STATIC, DexCatch, DexClass, DexCode, DexInsn, DexMethod, DexTry,
};
use crate::error::Result;
use crate::ir::IrMethod;
use crate::pipeline::Pipeline;

pub(crate) const SAMPLE_CLASS: &str = "com/example/Sample";

/// Context of the class every harness method belongs to.
pub(crate) fn class_context() -> ClassContext {
    ClassContext {
        name: SAMPLE_CLASS.to_string(),
        super_name: Some("java/lang/Object".to_string()),
        interfaces: Vec::new(),
        access_flags: ACC_PUBLIC,
    }
}

/// Fluent construction of a method body in decoded register form.
pub(crate) struct MethodBuilder {
    method: DexMethod,
    registers: u16,
    insns: Vec<DexInsn>,
    tries: Vec<DexTry>,
}

impl MethodBuilder {
    pub(crate) fn new(name: &str, descriptor: &str) -> Self {
        Self {
            method: DexMethod {
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                access_flags: ACC_PUBLIC,
                throws: Vec::new(),
                code: None,
            },
            registers: 0,
            insns: Vec::new(),
            tries: Vec::new(),
        }
    }

    pub(crate) fn static_method(mut self) -> Self {
        self.method.access_flags |= ACC_STATIC;
        self
    }

    pub(crate) fn registers(mut self, registers: u16) -> Self {
        self.registers = registers;
        self
    }

    pub(crate) fn insn(mut self, insn: DexInsn) -> Self {
        self.insns.push(insn);
        self
    }

    pub(crate) fn label(self, id: u32) -> Self {
        self.insn(DexInsn::Label { id })
    }

    pub(crate) fn try_catch(
        mut self,
        start: u32,
        end: u32,
        exception: Option<&str>,
        handler: u32,
    ) -> Self {
        self.tries.push(DexTry {
            start,
            end,
            handlers: vec![DexCatch {
                exception: exception.map(str::to_string),
                handler,
            }],
        });
        self
    }

    pub(crate) fn build(mut self) -> DexMethod {
        self.method.code = Some(DexCode {
            registers: self.registers,
            insns: self.insns,
            tries: self.tries,
        });
        self.method
    }
}

/// Builds the IR of `method` and runs the full transform pipeline.
pub(crate) fn transform(method: &DexMethod, config: &Config) -> Result<IrMethod> {
    let code = method.code.as_ref().expect("method has code");
    let mut ir = build_method(&class_context(), method, code, config.skip_exceptions)?;
    Pipeline::new(config).run(&mut ir)?;
    Ok(ir)
}

/// A one-class document holding `methods`.
pub(crate) fn sample_class(methods: Vec<DexMethod>) -> DexClass {
    DexClass {
        name: format!("L{SAMPLE_CLASS};"),
        access_flags: ACC_PUBLIC,
        super_name: Some("Ljava/lang/Object;".to_string()),
        interfaces: Vec::new(),
        source_file: Some("Sample.java".to_string()),
        fields: Vec::new(),
        methods,
    }
}
