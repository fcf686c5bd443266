//! Batch conversion of decoded classes into class files.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use opentelemetry::Context as OtelContext;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::builder::build_method;
use crate::classfile::{
    Assembler, ClassWriter, Code, ConstantPool, class_access, field_access, lambda_safe,
    method_access,
};
use crate::config::Config;
use crate::context::ClassContext;
use crate::descriptor;
use crate::dex::{
    self, ACC_FINAL, ACC_STATIC, DexClass, DexCode, DexField, DexFile, DexMethod, FieldValue,
};
use crate::error::ConversionError;
use crate::handler::{ErrorHandler, HandlerAction, LoggingErrorHandler};
use crate::hooks::{ConversionHooks, DefaultHooks};
use crate::ir::{Constant, Expr, FieldRef, IrMethod, JType, MethodRef, Stmt};
use crate::lower::{PoolConstant, lower};
use crate::output::OutputSink;
use crate::pipeline::Pipeline;
use crate::telemetry::{Telemetry, Unit, record_method_failure, traced};

const CLINIT: &str = "<clinit>";

/// Counts for one converted batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    pub classes: usize,
    /// Classes a hook took over.
    pub declined_classes: usize,
    pub failed_classes: usize,
    /// Methods written as failure stubs.
    pub failed_methods: usize,
    pub failed_files: usize,
}

impl ConversionSummary {
    pub fn merge(&mut self, other: ConversionSummary) {
        self.classes += other.classes;
        self.declined_classes += other.declined_classes;
        self.failed_classes += other.failed_classes;
        self.failed_methods += other.failed_methods;
        self.failed_files += other.failed_files;
    }
}

/// Converts decoded dex documents class by class, consulting hooks and the error handler.
pub struct Converter {
    config: Config,
    hooks: Arc<dyn ConversionHooks>,
    errors: Arc<dyn ErrorHandler>,
    telemetry: Option<Arc<Telemetry>>,
}

enum ClassOutcome {
    Written {
        name: String,
        bytes: Vec<u8>,
        failed_methods: usize,
    },
    Declined,
    Failed,
}

/// Why a class produced no output.
enum ClassFailure {
    Conversion(ConversionError),
    Aborted(anyhow::Error),
}

impl From<ConversionError> for ClassFailure {
    fn from(error: ConversionError) -> Self {
        ClassFailure::Conversion(error)
    }
}

impl Converter {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            hooks: Arc::new(DefaultHooks),
            errors: Arc::new(LoggingErrorHandler),
            telemetry: None,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn ConversionHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_error_handler(mut self, errors: Arc<dyn ErrorHandler>) -> Self {
        self.errors = errors;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Option<Arc<Telemetry>>) -> Self {
        self.telemetry = telemetry;
        self
    }

    fn telemetry(&self) -> Option<&Telemetry> {
        self.telemetry.as_deref()
    }

    /// Loads one decoded dex document and converts it into `sink`.
    ///
    /// A load failure goes to the error handler; the call fails only if the handler aborts.
    pub fn convert_file(&self, path: &Path, sink: &mut dyn OutputSink) -> Result<ConversionSummary> {
        traced(self.telemetry(), Unit::File(path), None, || {
            let dex = match dex::load(path) {
                Ok(dex) => dex,
                Err(error) => {
                    return match self.errors.handle_file_error(path, &error) {
                        HandlerAction::Continue => Ok(ConversionSummary {
                            failed_files: 1,
                            ..ConversionSummary::default()
                        }),
                        HandlerAction::Abort => Err(error.context("conversion aborted")),
                    };
                }
            };
            let summary = self.convert_dex(&dex, sink)?;
            info!(
                input = %path.display(),
                classes = summary.classes,
                failed_methods = summary.failed_methods,
                "converted"
            );
            Ok(summary)
        })
    }

    /// Converts every class of `dex` in parallel, then writes the results in input order.
    pub fn convert_dex(&self, dex: &DexFile, sink: &mut dyn OutputSink) -> Result<ConversionSummary> {
        let parent_cx = OtelContext::current();
        let outcomes = dex
            .classes
            .par_iter()
            .map(|class| {
                traced(
                    self.telemetry(),
                    Unit::Class(&class.name),
                    Some(&parent_cx),
                    || self.convert_class(class),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let mut summary = ConversionSummary::default();
        for outcome in outcomes {
            match outcome {
                ClassOutcome::Written {
                    name,
                    bytes,
                    failed_methods,
                } => {
                    sink.write_class(&name, &bytes)?;
                    summary.classes += 1;
                    summary.failed_methods += failed_methods;
                }
                ClassOutcome::Declined => summary.declined_classes += 1,
                ClassOutcome::Failed => summary.failed_classes += 1,
            }
        }
        Ok(summary)
    }

    fn convert_class(&self, class: &DexClass) -> Result<ClassOutcome> {
        if !self.hooks.convert_class(class) {
            debug!(class = %class.name, "class taken over by hook");
            return Ok(ClassOutcome::Declined);
        }
        let mut failed_methods = 0;
        match self.write_class(class, &mut failed_methods) {
            Ok((name, bytes)) => Ok(ClassOutcome::Written {
                name,
                bytes,
                failed_methods,
            }),
            Err(ClassFailure::Aborted(error)) => Err(error),
            Err(ClassFailure::Conversion(error)) => {
                let name = descriptor::class_name(&class.name).unwrap_or_else(|_| class.name.clone());
                match self.errors.handle_method_error(&name, None, &error) {
                    HandlerAction::Continue => Ok(ClassOutcome::Failed),
                    HandlerAction::Abort => Err(anyhow::Error::new(error)
                        .context(format!("conversion aborted at class {name}"))),
                }
            }
        }
    }

    fn write_class(
        &self,
        class: &DexClass,
        failed_methods: &mut usize,
    ) -> std::result::Result<(String, Vec<u8>), ClassFailure> {
        let context = ClassContext::from_class(class)?;
        let mut writer = ClassWriter::new(
            class_access(class.access_flags),
            &context.name,
            context.super_name.as_deref(),
            &context.interfaces,
        )?;

        let mut initializers = Vec::new();
        for field in &class.fields {
            if !self.hooks.convert_field(&context, field) {
                continue;
            }
            let constant_value = self.write_field(&context, field, &mut initializers)?;
            writer.field(
                field_access(field.access_flags),
                &field.name,
                &field.descriptor,
                constant_value.as_ref(),
            )?;
        }

        for method in &class.methods {
            if !self.hooks.convert_method(&context, method) {
                continue;
            }
            let prefix = if method.name == CLINIT {
                initializers.as_slice()
            } else {
                &[]
            };
            self.write_method(&context, method, prefix, &mut writer, failed_methods)?;
        }

        let has_clinit = class.methods.iter().any(|method| method.name == CLINIT);
        if !initializers.is_empty()
            && !has_clinit
            && self.config.converts_code_of(CLINIT)
            && self.hooks.add_synthetic_method(&context, CLINIT)
        {
            let code = self.static_initializer(&context, initializers, writer.pool_mut())?;
            writer.method(ACC_STATIC as u16, CLINIT, "()V", &[], Some(&code))?;
        }

        if !self.config.skip_debug_info {
            if let Some(source_file) = &class.source_file {
                writer.source_file(source_file)?;
            }
        }
        let bytes = writer.finish()?;
        debug!(class = %context.name, bytes = bytes.len(), "class written");
        Ok((lambda_safe(&context.name).into_owned(), bytes))
    }

    /// `ConstantValue` of a static final field; other static initial values are queued as
    /// `<clinit>` assignments.
    fn write_field(
        &self,
        context: &ClassContext,
        field: &DexField,
        initializers: &mut Vec<Stmt>,
    ) -> crate::error::Result<Option<PoolConstant>> {
        let is_static = field.access_flags & ACC_STATIC != 0;
        let Some(value) = field.initial_value.as_ref().filter(|_| is_static) else {
            return Ok(None);
        };
        let Some(constant) = field_constant(value) else {
            return Ok(None);
        };
        if field.access_flags & ACC_FINAL != 0 {
            return Ok(pool_constant(&constant));
        }
        if !value.is_default() {
            initializers.push(Stmt::FieldSet {
                field: FieldRef {
                    owner: context.name.clone(),
                    name: field.name.clone(),
                    descriptor: field.descriptor.clone(),
                    ty: descriptor::parse_field(&field.descriptor)?,
                },
                object: None,
                value: Expr::Const(constant),
            });
        }
        Ok(None)
    }

    fn write_method(
        &self,
        context: &ClassContext,
        method: &DexMethod,
        initializers: &[Stmt],
        writer: &mut ClassWriter,
        failed_methods: &mut usize,
    ) -> std::result::Result<(), ClassFailure> {
        // Without a valid signature there is no stub to write; the method is left out.
        let exceptions = match method_exceptions(method) {
            Ok(exceptions) => exceptions,
            Err(error) => {
                self.method_failed(context, method, &error, failed_methods)?;
                return Ok(());
            }
        };
        let code = match &method.code {
            Some(code)
                if self.config.converts_code_of(&method.name)
                    && self.hooks.convert_code(context, method) =>
            {
                match self.method_code(context, method, code, initializers, writer.pool_mut()) {
                    Ok(code) => Some(code),
                    Err(error) => {
                        self.method_failed(context, method, &error, failed_methods)?;
                        Some(failure_stub(context, method, &error, writer.pool_mut())?)
                    }
                }
            }
            _ => None,
        };
        writer.method(
            method_access(method.access_flags),
            &method.name,
            &method.descriptor,
            &exceptions,
            code.as_ref(),
        )?;
        Ok(())
    }

    /// Reports a failed method once; an `Err` means the handler aborted the batch.
    fn method_failed(
        &self,
        context: &ClassContext,
        method: &DexMethod,
        error: &ConversionError,
        failed_methods: &mut usize,
    ) -> std::result::Result<(), ClassFailure> {
        *failed_methods += 1;
        record_method_failure(&method.name, error);
        match self
            .errors
            .handle_method_error(&context.name, Some(&method.name), error)
        {
            HandlerAction::Continue => Ok(()),
            HandlerAction::Abort => Err(ClassFailure::Aborted(
                anyhow::Error::new(error.clone()).context(format!(
                    "conversion aborted at {}.{}{}",
                    context.name, method.name, method.descriptor
                )),
            )),
        }
    }

    fn method_code(
        &self,
        context: &ClassContext,
        method: &DexMethod,
        code: &DexCode,
        initializers: &[Stmt],
        pool: &mut ConstantPool,
    ) -> crate::error::Result<Code> {
        let mut ir = build_method(context, method, code, self.config.skip_exceptions)?;
        ir.stmts.splice(0..0, initializers.iter().cloned());
        Pipeline::new(&self.config).run(&mut ir)?;
        assemble(&ir, self.config.optimize_synchronized, pool)
    }

    fn static_initializer(
        &self,
        context: &ClassContext,
        initializers: Vec<Stmt>,
        pool: &mut ConstantPool,
    ) -> crate::error::Result<Code> {
        let mut ir = IrMethod::new(
            context.name.clone(),
            CLINIT,
            "()V",
            true,
            Vec::new(),
            JType::Void,
        );
        ir.stmts = initializers;
        ir.stmts.push(Stmt::Return(None));
        Pipeline::new(&self.config).run(&mut ir)?;
        assemble(&ir, false, pool)
    }
}

fn assemble(
    ir: &IrMethod,
    optimize_synchronized: bool,
    pool: &mut ConstantPool,
) -> crate::error::Result<Code> {
    let mut assembler = Assembler::new(pool);
    lower(ir, optimize_synchronized, &mut assembler)?;
    assembler.finish()
}

/// Internal names of the declared exceptions, once the method signature is known to parse.
fn method_exceptions(method: &DexMethod) -> crate::error::Result<Vec<String>> {
    descriptor::parse_method(&method.descriptor)?;
    method
        .throws
        .iter()
        .map(|name| descriptor::class_name(name))
        .collect()
}

/// Body `throw new RuntimeException(message)` for a method that failed to convert.
fn failure_stub(
    context: &ClassContext,
    method: &DexMethod,
    error: &ConversionError,
    pool: &mut ConstantPool,
) -> crate::error::Result<Code> {
    let (params, ret) = descriptor::parse_method(&method.descriptor)?;
    let mut ir = IrMethod::new(
        context.name.clone(),
        method.name.clone(),
        method.descriptor.clone(),
        method.is_static(),
        params,
        ret,
    );
    let string = JType::object("java/lang/String");
    ir.stmts.push(Stmt::Throw(Expr::NewInit {
        method: MethodRef {
            owner: "java/lang/RuntimeException".to_string(),
            name: "<init>".to_string(),
            descriptor: format!("({})V", string.descriptor()),
            params: vec![string],
            ret: JType::Void,
        },
        args: vec![Expr::Const(Constant::String(error.to_string()))],
    }));
    assemble(&ir, false, pool)
}

/// Typed literal for an encoded field value; `None` for null.
fn field_constant(value: &FieldValue) -> Option<Constant> {
    let constant = match value {
        FieldValue::Boolean(value) => Constant::Int(i32::from(*value)),
        FieldValue::Byte(value) => Constant::Int(i32::from(*value)),
        FieldValue::Short(value) => Constant::Int(i32::from(*value)),
        FieldValue::Char(value) => Constant::Int(i32::from(*value)),
        FieldValue::Int(value) => Constant::Int(*value),
        FieldValue::Long(value) => Constant::Long(*value),
        FieldValue::Float(value) => Constant::Float(value.to_bits()),
        FieldValue::Double(value) => Constant::Double(value.to_bits()),
        FieldValue::String(value) => Constant::String(value.clone()),
        FieldValue::Null => return None,
    };
    Some(constant)
}

fn pool_constant(constant: &Constant) -> Option<PoolConstant> {
    match constant {
        Constant::Int(value) => Some(PoolConstant::Int(*value)),
        Constant::Long(value) => Some(PoolConstant::Long(*value)),
        Constant::Float(bits) => Some(PoolConstant::Float(*bits)),
        Constant::Double(bits) => Some(PoolConstant::Double(*bits)),
        Constant::String(value) => Some(PoolConstant::String(value.clone())),
        _ => None,
    }
}
