use std::collections::HashMap;

use crate::error::{ConversionError, Result};
use crate::ir::{FieldRef, MethodRef};
use crate::lower::PoolConstant;

use super::lambda_safe;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Entry {
    Utf8(String),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class(u16),
    String(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
}

impl Entry {
    fn slots(&self) -> u16 {
        match self {
            Entry::Long(_) | Entry::Double(_) => 2,
            _ => 1,
        }
    }
}

/// Deduplicating constant pool of one class file.
///
/// Class names and descriptors pass through [`lambda_safe`] on the way in.
#[derive(Debug)]
pub(crate) struct ConstantPool {
    entries: Vec<Entry>,
    indices: HashMap<Entry, u16>,
    next: u16,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            indices: HashMap::new(),
            next: 1,
        }
    }
}

impl ConstantPool {
    fn add(&mut self, entry: Entry) -> Result<u16> {
        if let Some(index) = self.indices.get(&entry) {
            return Ok(*index);
        }
        let index = self.next;
        let next = u32::from(index) + u32::from(entry.slots());
        self.next = u16::try_from(next).map_err(|_| ConversionError::ConstantPoolOverflow)?;
        self.indices.insert(entry.clone(), index);
        self.entries.push(entry);
        Ok(index)
    }

    pub(crate) fn utf8(&mut self, value: &str) -> Result<u16> {
        self.add(Entry::Utf8(value.to_string()))
    }

    pub(crate) fn descriptor(&mut self, descriptor: &str) -> Result<u16> {
        self.utf8(&lambda_safe(descriptor))
    }

    pub(crate) fn class(&mut self, name: &str) -> Result<u16> {
        let name = self.utf8(&lambda_safe(name))?;
        self.add(Entry::Class(name))
    }

    pub(crate) fn string(&mut self, value: &str) -> Result<u16> {
        let value = self.utf8(value)?;
        self.add(Entry::String(value))
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.utf8(name)?;
        let descriptor = self.descriptor(descriptor)?;
        self.add(Entry::NameAndType(name, descriptor))
    }

    pub(crate) fn field(&mut self, field: &FieldRef) -> Result<u16> {
        let owner = self.class(&field.owner)?;
        let name_and_type = self.name_and_type(&field.name, &field.descriptor)?;
        self.add(Entry::FieldRef(owner, name_and_type))
    }

    pub(crate) fn method(&mut self, method: &MethodRef, interface: bool) -> Result<u16> {
        let owner = self.class(&method.owner)?;
        let name_and_type = self.name_and_type(&method.name, &method.descriptor)?;
        if interface {
            self.add(Entry::InterfaceMethodRef(owner, name_and_type))
        } else {
            self.add(Entry::MethodRef(owner, name_and_type))
        }
    }

    /// Loadable constant, as used by `ldc` and `ConstantValue`.
    pub(crate) fn constant(&mut self, constant: &PoolConstant) -> Result<u16> {
        match constant {
            PoolConstant::Int(value) => self.add(Entry::Integer(*value)),
            PoolConstant::Float(bits) => self.add(Entry::Float(*bits)),
            PoolConstant::Long(value) => self.add(Entry::Long(*value)),
            PoolConstant::Double(bits) => self.add(Entry::Double(*bits)),
            PoolConstant::String(value) => self.string(value),
            PoolConstant::Class(name) => self.class(name),
        }
    }

    /// `constant_pool_count` followed by the entries.
    pub(crate) fn write(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.next.to_be_bytes());
        for entry in &self.entries {
            match entry {
                Entry::Utf8(value) => {
                    let bytes = modified_utf8(value);
                    let length = u16::try_from(bytes.len()).map_err(|_| {
                        ConversionError::Lowering(format!(
                            "string of {} bytes exceeds the constant pool limit",
                            bytes.len()
                        ))
                    })?;
                    out.push(TAG_UTF8);
                    out.extend_from_slice(&length.to_be_bytes());
                    out.extend_from_slice(&bytes);
                }
                Entry::Integer(value) => {
                    out.push(TAG_INTEGER);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Entry::Float(bits) => {
                    out.push(TAG_FLOAT);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Entry::Long(value) => {
                    out.push(TAG_LONG);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Entry::Double(bits) => {
                    out.push(TAG_DOUBLE);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                Entry::Class(name) => {
                    out.push(TAG_CLASS);
                    out.extend_from_slice(&name.to_be_bytes());
                }
                Entry::String(value) => {
                    out.push(TAG_STRING);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Entry::FieldRef(owner, name_and_type)
                | Entry::MethodRef(owner, name_and_type)
                | Entry::InterfaceMethodRef(owner, name_and_type) => {
                    out.push(match entry {
                        Entry::FieldRef(..) => TAG_FIELDREF,
                        Entry::MethodRef(..) => TAG_METHODREF,
                        _ => TAG_INTERFACE_METHODREF,
                    });
                    out.extend_from_slice(&owner.to_be_bytes());
                    out.extend_from_slice(&name_and_type.to_be_bytes());
                }
                Entry::NameAndType(name, descriptor) => {
                    out.push(TAG_NAME_AND_TYPE);
                    out.extend_from_slice(&name.to_be_bytes());
                    out.extend_from_slice(&descriptor.to_be_bytes());
                }
            }
        }
        Ok(())
    }
}

/// JVM "modified UTF-8": NUL takes two bytes and supplementary characters are written as
/// surrogate pairs.
fn modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007f => out.push(unit as u8),
            0x0000 | 0x0080..=0x07ff => {
                out.push(0xc0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
            _ => {
                out.push(0xe0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3f) as u8);
                out.push(0x80 | (unit & 0x3f) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_shared_and_wide_constants_take_two_slots() {
        let mut pool = ConstantPool::default();
        let first = pool.class("java/lang/Object").expect("class");
        assert_eq!(pool.class("java/lang/Object").expect("again"), first);
        let long = pool.constant(&PoolConstant::Long(5)).expect("long");
        let after = pool.utf8("x").expect("utf8");
        assert_eq!(after, long + 2);
    }

    #[test]
    fn overflow_is_reported() {
        let mut pool = ConstantPool::default();
        let mut result = Ok(0);
        for value in 0..70_000 {
            result = pool.constant(&PoolConstant::Int(value));
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(ConversionError::ConstantPoolOverflow));
    }

    #[test]
    fn modified_utf8_escapes_nul_and_supplementary_characters() {
        assert_eq!(modified_utf8("a\0"), [b'a', 0xc0, 0x80]);
        assert_eq!(modified_utf8("\u{1F600}").len(), 6);
    }
}
