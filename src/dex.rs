//! Decoded Dalvik input model.
//!
//! Type names use dex descriptors (`Lcom/example/Foo;`), method descriptors use the JVM
//! form (`(I)V`). Branch targets and try bounds refer to `label` pseudo-instructions.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const ACC_PUBLIC: u32 = 0x0001;
pub const ACC_PRIVATE: u32 = 0x0002;
pub const ACC_STATIC: u32 = 0x0008;
pub const ACC_FINAL: u32 = 0x0010;
pub const ACC_SYNCHRONIZED: u32 = 0x0020;
pub const ACC_NATIVE: u32 = 0x0100;
pub const ACC_INTERFACE: u32 = 0x0200;
pub const ACC_ABSTRACT: u32 = 0x0400;
pub const ACC_CONSTRUCTOR: u32 = 0x1_0000;
pub const ACC_DECLARED_SYNCHRONIZED: u32 = 0x2_0000;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DexFile {
    #[serde(default)]
    pub classes: Vec<DexClass>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DexClass {
    /// Class descriptor.
    pub name: String,
    #[serde(default)]
    pub access_flags: u32,
    #[serde(default)]
    pub super_name: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub fields: Vec<DexField>,
    #[serde(default)]
    pub methods: Vec<DexMethod>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DexField {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub access_flags: u32,
    #[serde(default)]
    pub initial_value: Option<FieldValue>,
}

/// Encoded static value of a field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Null,
}

impl FieldValue {
    /// Whether the value equals the JVM default the field would hold anyway.
    pub fn is_default(&self) -> bool {
        match self {
            FieldValue::Boolean(value) => !value,
            FieldValue::Byte(value) => *value == 0,
            FieldValue::Short(value) => *value == 0,
            FieldValue::Char(value) => *value == 0,
            FieldValue::Int(value) => *value == 0,
            FieldValue::Long(value) => *value == 0,
            FieldValue::Float(value) => value.to_bits() == 0,
            FieldValue::Double(value) => value.to_bits() == 0,
            FieldValue::String(_) => false,
            FieldValue::Null => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DexMethod {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub access_flags: u32,
    /// Declared exceptions, as class descriptors.
    #[serde(default)]
    pub throws: Vec<String>,
    #[serde(default)]
    pub code: Option<DexCode>,
}

impl DexMethod {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DexCode {
    pub registers: u16,
    pub insns: Vec<DexInsn>,
    #[serde(default)]
    pub tries: Vec<DexTry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DexTry {
    pub start: u32,
    pub end: u32,
    pub handlers: Vec<DexCatch>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DexCatch {
    /// Caught class descriptor; absent for catch-all.
    #[serde(default)]
    pub exception: Option<String>,
    pub handler: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DexFieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DexMethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    #[default]
    Single,
    Wide,
    Object,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrayKind {
    /// Plain `aget`/`aput`: int or float.
    Single,
    Wide,
    Object,
    Boolean,
    Byte,
    Char,
    Short,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvokeType {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Test {
    Eq,
    Ne,
    Lt,
    Ge,
    Gt,
    Le,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpType {
    CmplFloat,
    CmpgFloat,
    CmplDouble,
    CmpgDouble,
    CmpLong,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    Int,
    Long,
    Float,
    Double,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnOp {
    NegInt,
    NotInt,
    NegLong,
    NotLong,
    NegFloat,
    NegDouble,
    IntToLong,
    IntToFloat,
    IntToDouble,
    LongToInt,
    LongToFloat,
    LongToDouble,
    FloatToInt,
    FloatToLong,
    FloatToDouble,
    DoubleToInt,
    DoubleToLong,
    DoubleToFloat,
    IntToByte,
    IntToChar,
    IntToShort,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
    /// Only valid with a literal: `literal - src`.
    Rsub,
}

/// One decoded Dalvik instruction. `*/2addr`, `/16`, `/from16` and `/jumbo` forms collapse
/// into the base instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum DexInsn {
    Label {
        id: u32,
    },
    Nop,
    Move {
        dst: u16,
        src: u16,
        #[serde(default)]
        kind: ValueKind,
    },
    MoveResult {
        dst: u16,
        #[serde(default)]
        kind: ValueKind,
    },
    MoveException {
        dst: u16,
    },
    ReturnVoid,
    Return {
        src: u16,
        #[serde(default)]
        kind: ValueKind,
    },
    Const {
        dst: u16,
        value: i32,
    },
    ConstWide {
        dst: u16,
        value: i64,
    },
    ConstString {
        dst: u16,
        value: String,
    },
    ConstClass {
        dst: u16,
        class: String,
    },
    MonitorEnter {
        reg: u16,
    },
    MonitorExit {
        reg: u16,
    },
    CheckCast {
        reg: u16,
        class: String,
    },
    InstanceOf {
        dst: u16,
        src: u16,
        class: String,
    },
    ArrayLength {
        dst: u16,
        array: u16,
    },
    NewInstance {
        dst: u16,
        class: String,
    },
    NewArray {
        dst: u16,
        size: u16,
        class: String,
    },
    FilledNewArray {
        args: Vec<u16>,
        class: String,
    },
    FillArrayData {
        array: u16,
        width: u8,
        data: Vec<i64>,
    },
    Throw {
        reg: u16,
    },
    Goto {
        target: u32,
    },
    PackedSwitch {
        reg: u16,
        first_key: i32,
        targets: Vec<u32>,
    },
    SparseSwitch {
        reg: u16,
        keys: Vec<i32>,
        targets: Vec<u32>,
    },
    Cmp {
        cmp: CmpType,
        dst: u16,
        a: u16,
        b: u16,
    },
    If {
        test: Test,
        a: u16,
        b: u16,
        target: u32,
    },
    IfZ {
        test: Test,
        a: u16,
        target: u32,
    },
    Aget {
        kind: ArrayKind,
        dst: u16,
        array: u16,
        index: u16,
    },
    Aput {
        kind: ArrayKind,
        src: u16,
        array: u16,
        index: u16,
    },
    Iget {
        dst: u16,
        object: u16,
        field: DexFieldRef,
    },
    Iput {
        src: u16,
        object: u16,
        field: DexFieldRef,
    },
    Sget {
        dst: u16,
        field: DexFieldRef,
    },
    Sput {
        src: u16,
        field: DexFieldRef,
    },
    Invoke {
        kind: InvokeType,
        method: DexMethodRef,
        /// Argument registers as encoded; a wide argument names both halves.
        args: Vec<u16>,
    },
    Unop {
        unop: UnOp,
        dst: u16,
        src: u16,
    },
    Binop {
        binop: BinOp,
        operand: Operand,
        dst: u16,
        a: u16,
        b: u16,
    },
    BinopLit {
        binop: BinOp,
        dst: u16,
        src: u16,
        literal: i32,
    },
}

impl DexInsn {
    /// Whether the instruction may raise an exception at run time.
    pub fn can_throw(&self) -> bool {
        match self {
            DexInsn::ConstClass { .. }
            | DexInsn::MonitorEnter { .. }
            | DexInsn::MonitorExit { .. }
            | DexInsn::CheckCast { .. }
            | DexInsn::ArrayLength { .. }
            | DexInsn::NewInstance { .. }
            | DexInsn::NewArray { .. }
            | DexInsn::FilledNewArray { .. }
            | DexInsn::FillArrayData { .. }
            | DexInsn::Throw { .. }
            | DexInsn::Aget { .. }
            | DexInsn::Aput { .. }
            | DexInsn::Iget { .. }
            | DexInsn::Iput { .. }
            | DexInsn::Sget { .. }
            | DexInsn::Sput { .. }
            | DexInsn::Invoke { .. } => true,
            DexInsn::Binop {
                binop: BinOp::Div | BinOp::Rem,
                operand: Operand::Int | Operand::Long,
                ..
            } => true,
            DexInsn::BinopLit {
                binop: BinOp::Div | BinOp::Rem,
                ..
            } => true,
            _ => false,
        }
    }

    /// Whether control never continues with the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            DexInsn::ReturnVoid
                | DexInsn::Return { .. }
                | DexInsn::Throw { .. }
                | DexInsn::Goto { .. }
        )
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            DexInsn::Goto { .. }
                | DexInsn::If { .. }
                | DexInsn::IfZ { .. }
                | DexInsn::PackedSwitch { .. }
                | DexInsn::SparseSwitch { .. }
        )
    }
}

/// Load a decoded dex file, reporting the JSON path of malformed entries.
pub fn load(path: &Path) -> Result<DexFile> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse(&data).with_context(|| format!("failed to decode {}", path.display()))
}

pub fn parse(data: &[u8]) -> Result<DexFile> {
    let mut deserializer = serde_json::Deserializer::from_slice(data);
    let file: DexFile =
        serde_path_to_error::deserialize(&mut deserializer).context("invalid dex document")?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_instructions() {
        let json = r#"{
            "classes": [{
                "name": "Lcom/example/A;",
                "access_flags": 1,
                "super_name": "Ljava/lang/Object;",
                "methods": [{
                    "name": "answer",
                    "descriptor": "()I",
                    "access_flags": 9,
                    "code": {
                        "registers": 1,
                        "insns": [
                            {"op": "const", "dst": 0, "value": 42},
                            {"op": "return", "src": 0}
                        ]
                    }
                }]
            }]
        }"#;
        let file = parse(json.as_bytes()).expect("parse");
        let method = &file.classes[0].methods[0];
        assert!(method.is_static());
        let code = method.code.as_ref().expect("code");
        assert_eq!(code.insns[0], DexInsn::Const { dst: 0, value: 42 });
        assert_eq!(
            code.insns[1],
            DexInsn::Return {
                src: 0,
                kind: ValueKind::Single
            }
        );
    }

    #[test]
    fn malformed_document_reports_json_path() {
        let json = r#"{"classes": [{"name": "La;", "methods": [{"name": 3}]}]}"#;
        let error = parse(json.as_bytes()).expect_err("invalid");
        let message = format!("{error:#}");
        assert!(message.contains("classes[0].methods[0].name"), "{message}");
    }

    #[test]
    fn default_field_values_are_detected() {
        assert!(FieldValue::Int(0).is_default());
        assert!(!FieldValue::Float(-0.0).is_default());
        assert!(!FieldValue::String(String::new()).is_default());
    }
}
