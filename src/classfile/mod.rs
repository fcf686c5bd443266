//! Class-file serialization, version 50.0.

mod assembler;
mod pool;

use std::borrow::Cow;

pub(crate) use assembler::{Assembler, Code};
pub(crate) use pool::ConstantPool;

use crate::dex::{ACC_DECLARED_SYNCHRONIZED, ACC_INTERFACE, ACC_SYNCHRONIZED};
use crate::error::Result;
use crate::lower::PoolConstant;

const MAGIC: u32 = 0xCAFE_BABE;
const MAJOR_VERSION: u16 = 50;
const ACC_SUPER: u16 = 0x0020;
/// Flags valid on a top-level class.
const CLASS_FLAGS: u32 = 0x7631;

/// Rewrites `-$$Lambda$` class name segments, which some JVM tools reject, to `_$$Lambda$`.
pub(crate) fn lambda_safe(name: &str) -> Cow<'_, str> {
    if name.contains("-$$Lambda$") {
        Cow::Owned(name.replace("-$$Lambda$", "_$$Lambda$"))
    } else {
        Cow::Borrowed(name)
    }
}

/// JVM class access flags for dex class flags.
pub(crate) fn class_access(flags: u32) -> u16 {
    let mut access = (flags & CLASS_FLAGS) as u16;
    if flags & ACC_INTERFACE == 0 {
        access |= ACC_SUPER;
    }
    access
}

/// JVM method access flags; dex-only bits are dropped.
pub(crate) fn method_access(flags: u32) -> u16 {
    let mut flags = flags;
    if flags & ACC_DECLARED_SYNCHRONIZED != 0 {
        flags |= ACC_SYNCHRONIZED;
    }
    (flags & 0xffff) as u16
}

pub(crate) fn field_access(flags: u32) -> u16 {
    (flags & 0xffff) as u16
}

/// Incremental writer for one class. Members are encoded as they are added, against the
/// shared constant pool.
pub(crate) struct ClassWriter {
    pool: ConstantPool,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
    source_file: Option<u16>,
}

impl ClassWriter {
    pub(crate) fn new(
        access: u16,
        name: &str,
        super_name: Option<&str>,
        interfaces: &[String],
    ) -> Result<Self> {
        let mut pool = ConstantPool::default();
        let this_class = pool.class(name)?;
        let super_class = match super_name {
            Some(super_name) => pool.class(super_name)?,
            None => 0,
        };
        let interfaces = interfaces
            .iter()
            .map(|interface| pool.class(interface))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        })
    }

    /// Pool that method code must be assembled against.
    pub(crate) fn pool_mut(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    pub(crate) fn field(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        constant_value: Option<&PoolConstant>,
    ) -> Result<()> {
        let mut out = Vec::new();
        push_u16(&mut out, access);
        push_u16(&mut out, self.pool.utf8(name)?);
        push_u16(&mut out, self.pool.descriptor(descriptor)?);
        match constant_value {
            Some(value) => {
                push_u16(&mut out, 1);
                push_u16(&mut out, self.pool.utf8("ConstantValue")?);
                out.extend_from_slice(&2u32.to_be_bytes());
                push_u16(&mut out, self.pool.constant(value)?);
            }
            None => push_u16(&mut out, 0),
        }
        self.fields.push(out);
        Ok(())
    }

    /// Adds a method; `code` is absent for abstract and native methods.
    pub(crate) fn method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        exceptions: &[String],
        code: Option<&Code>,
    ) -> Result<()> {
        let mut out = Vec::new();
        push_u16(&mut out, access);
        push_u16(&mut out, self.pool.utf8(name)?);
        push_u16(&mut out, self.pool.descriptor(descriptor)?);
        let count = u16::from(code.is_some()) + u16::from(!exceptions.is_empty());
        push_u16(&mut out, count);
        if let Some(code) = code {
            push_u16(&mut out, self.pool.utf8("Code")?);
            let length = 2 + 2 + 4 + code.bytes.len() + 2 + 8 * code.exception_table.len() + 2;
            out.extend_from_slice(&(length as u32).to_be_bytes());
            push_u16(&mut out, code.max_stack);
            push_u16(&mut out, code.max_locals);
            out.extend_from_slice(&(code.bytes.len() as u32).to_be_bytes());
            out.extend_from_slice(&code.bytes);
            push_u16(&mut out, code.exception_table.len() as u16);
            for entry in &code.exception_table {
                push_u16(&mut out, entry.start_pc);
                push_u16(&mut out, entry.end_pc);
                push_u16(&mut out, entry.handler_pc);
                push_u16(&mut out, entry.catch_type);
            }
            push_u16(&mut out, 0);
        }
        if !exceptions.is_empty() {
            push_u16(&mut out, self.pool.utf8("Exceptions")?);
            out.extend_from_slice(&((2 + 2 * exceptions.len()) as u32).to_be_bytes());
            push_u16(&mut out, exceptions.len() as u16);
            for exception in exceptions {
                push_u16(&mut out, self.pool.class(exception)?);
            }
        }
        self.methods.push(out);
        Ok(())
    }

    pub(crate) fn source_file(&mut self, name: &str) -> Result<()> {
        self.source_file = Some(self.pool.utf8(name)?);
        Ok(())
    }

    pub(crate) fn finish(mut self) -> Result<Vec<u8>> {
        let source_file_name = match self.source_file {
            Some(_) => Some(self.pool.utf8("SourceFile")?),
            None => None,
        };
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC.to_be_bytes());
        push_u16(&mut out, 0);
        push_u16(&mut out, MAJOR_VERSION);
        self.pool.write(&mut out)?;
        push_u16(&mut out, self.access);
        push_u16(&mut out, self.this_class);
        push_u16(&mut out, self.super_class);
        push_u16(&mut out, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            push_u16(&mut out, *interface);
        }
        push_u16(&mut out, self.fields.len() as u16);
        for field in &self.fields {
            out.extend_from_slice(field);
        }
        push_u16(&mut out, self.methods.len() as u16);
        for method in &self.methods {
            out.extend_from_slice(method);
        }
        match (source_file_name, self.source_file) {
            (Some(attribute), Some(value)) => {
                push_u16(&mut out, 1);
                push_u16(&mut out, attribute);
                out.extend_from_slice(&2u32.to_be_bytes());
                push_u16(&mut out, value);
            }
            _ => push_u16(&mut out, 0),
        }
        Ok(out)
    }
}

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::{ACC_CONSTRUCTOR, ACC_PUBLIC, ACC_STATIC};
    use crate::lower::{CodeSink, Insn};
    use crate::opcodes::{ICONST_0, IRETURN};
    use jclassfile::attributes::Attribute;
    use jclassfile::class_file;
    use jclassfile::constant_pool::ConstantPool as ParsedPool;

    fn utf8(pool: &[ParsedPool], index: u16) -> String {
        match &pool[index as usize] {
            ParsedPool::Utf8 { value } => value.clone(),
            other => panic!("expected utf8, found {other:?}"),
        }
    }

    fn class_name(pool: &[ParsedPool], index: u16) -> String {
        match &pool[index as usize] {
            ParsedPool::Class { name_index } => utf8(pool, *name_index),
            other => panic!("expected class, found {other:?}"),
        }
    }

    #[test]
    fn access_flags_drop_dex_only_bits() {
        assert_eq!(class_access(ACC_PUBLIC), 0x0021);
        assert_eq!(class_access(ACC_PUBLIC | ACC_INTERFACE | 0x0400), 0x0601);
        assert_eq!(
            method_access(ACC_PUBLIC | ACC_CONSTRUCTOR | ACC_DECLARED_SYNCHRONIZED),
            0x0021
        );
        assert_eq!(field_access(ACC_STATIC), 0x0008);
    }

    #[test]
    fn lambda_class_names_are_rewritten() {
        assert_eq!(
            lambda_safe("a/B-$$Lambda$C$1"),
            Cow::<str>::Owned("a/B_$$Lambda$C$1".to_string())
        );
        assert!(matches!(lambda_safe("a/B"), Cow::Borrowed("a/B")));
    }

    #[test]
    fn written_class_parses_back() {
        let mut writer = ClassWriter::new(
            class_access(ACC_PUBLIC),
            "com/example/Sample-$$Lambda$0",
            Some("java/lang/Object"),
            &["java/lang/Runnable".to_string()],
        )
        .expect("writer");
        writer
            .field(
                field_access(ACC_STATIC | 0x10),
                "LIMIT",
                "I",
                Some(&PoolConstant::Int(7)),
            )
            .expect("field");
        let code = {
            let mut assembler = Assembler::new(writer.pool_mut());
            assembler.emit(Insn::Op(ICONST_0));
            assembler.emit(Insn::Op(IRETURN));
            assembler.max_locals(1);
            assembler.finish().expect("assemble")
        };
        writer
            .method(
                method_access(ACC_PUBLIC | ACC_STATIC),
                "zero",
                "()I",
                &["java/io/IOException".to_string()],
                Some(&code),
            )
            .expect("method");
        writer.source_file("Sample.java").expect("source");
        let bytes = writer.finish().expect("bytes");

        let parsed = class_file::parse(&bytes).expect("parse");
        let pool = parsed.constant_pool();
        assert_eq!(
            class_name(pool, parsed.this_class()),
            "com/example/Sample_$$Lambda$0"
        );
        assert_eq!(class_name(pool, parsed.super_class()), "java/lang/Object");
        assert_eq!(parsed.interfaces().len(), 1);
        assert_eq!(parsed.fields().len(), 1);
        let method = &parsed.methods()[0];
        assert_eq!(utf8(pool, method.name_index()), "zero");
        let body = method.attributes().iter().find_map(|attribute| match attribute {
            Attribute::Code { code, .. } => Some(code.clone()),
            _ => None,
        });
        assert_eq!(body, Some(vec![ICONST_0, IRETURN]));
        assert!(
            method
                .attributes()
                .iter()
                .any(|attribute| matches!(attribute, Attribute::Exceptions { .. }))
        );
    }
}
