use std::str::FromStr;

use jdescriptor::{MethodDescriptor, TypeDescriptor};

use crate::error::{ConversionError, Result};
use crate::ir::JType;

/// Parameter and return types of a JVM method descriptor.
pub(crate) fn parse_method(descriptor: &str) -> Result<(Vec<JType>, JType)> {
    let parsed = MethodDescriptor::from_str(descriptor).map_err(|err| {
        ConversionError::Malformed(format!("method descriptor {descriptor}: {err:?}"))
    })?;
    let params = parsed.parameter_types().iter().map(convert).collect();
    Ok((params, convert(parsed.return_type())))
}

/// Type named by a JVM field descriptor.
pub(crate) fn parse_field(descriptor: &str) -> Result<JType> {
    let malformed = || ConversionError::Malformed(format!("field descriptor {descriptor}"));
    let parsed = TypeDescriptor::from_str(descriptor).map_err(|_| malformed())?;
    // The parser stops after one type; trailing input is not a field descriptor.
    let void_based = match &parsed {
        TypeDescriptor::Array(element, _) => **element == TypeDescriptor::Void,
        other => *other == TypeDescriptor::Void,
    };
    if void_based || parsed.to_string() != descriptor {
        return Err(malformed());
    }
    Ok(convert(&parsed))
}

/// Internal class name from a dex type descriptor (`Lcom/a/B;` or an array descriptor).
pub(crate) fn class_name(descriptor: &str) -> Result<String> {
    match parse_field(descriptor)? {
        JType::Object(name) => Ok(name),
        array @ JType::Array(_) => Ok(array.descriptor()),
        _ => Err(ConversionError::Malformed(format!(
            "expected a class type, found {descriptor}"
        ))),
    }
}

/// Slots taken by the arguments of a method descriptor, receiver excluded.
pub(crate) fn argument_slots(params: &[JType]) -> u16 {
    params.iter().map(JType::size).sum()
}

fn convert(descriptor: &TypeDescriptor) -> JType {
    match descriptor {
        TypeDescriptor::Boolean => JType::Boolean,
        TypeDescriptor::Byte => JType::Byte,
        TypeDescriptor::Char => JType::Char,
        TypeDescriptor::Short => JType::Short,
        TypeDescriptor::Integer => JType::Int,
        TypeDescriptor::Long => JType::Long,
        TypeDescriptor::Float => JType::Float,
        TypeDescriptor::Double => JType::Double,
        TypeDescriptor::Void => JType::Void,
        TypeDescriptor::Object(name) => JType::Object(name.clone()),
        TypeDescriptor::Array(element, dimensions) => {
            let mut ty = convert(element);
            for _ in 0..*dimensions {
                ty = JType::array_of(ty);
            }
            ty
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_descriptor_with_wide_and_array_params() {
        let (params, ret) = parse_method("(J[ILjava/lang/String;)V").expect("descriptor");
        assert_eq!(
            params,
            vec![
                JType::Long,
                JType::array_of(JType::Int),
                JType::object("java/lang/String")
            ]
        );
        assert_eq!(ret, JType::Void);
        assert_eq!(argument_slots(&params), 4);
    }

    #[test]
    fn class_names_keep_array_descriptors() {
        assert_eq!(class_name("Ljava/lang/Object;").expect("class"), "java/lang/Object");
        assert_eq!(class_name("[[I").expect("array"), "[[I");
        assert!(class_name("I").is_err());
    }

    #[test]
    fn rejects_void_field_type() {
        assert!(parse_field("V").is_err());
        assert!(parse_field("Q").is_err());
        assert!(parse_field("[V").is_err());
        assert!(parse_field("II").is_err());
        assert!(parse_field("Ljava/lang/String").is_err());
    }

    #[test]
    fn parses_field_descriptors_directly() {
        assert_eq!(parse_field("I").expect("int"), JType::Int);
        assert_eq!(
            parse_field("[[Ljava/lang/Object;").expect("array"),
            JType::array_of(JType::array_of(JType::java_lang_object()))
        );
    }
}
