use crate::descriptor;
use crate::dex::{ACC_INTERFACE, DexClass};
use crate::error::Result;

/// Read-only facts about the class whose methods are being converted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassContext {
    /// Internal name (`com/example/Foo`).
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub access_flags: u32,
}

impl ClassContext {
    pub fn from_class(class: &DexClass) -> Result<Self> {
        let super_name = class
            .super_name
            .as_deref()
            .map(descriptor::class_name)
            .transpose()?;
        let interfaces = class
            .interfaces
            .iter()
            .map(|name| descriptor::class_name(name))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: descriptor::class_name(&class.name)?,
            super_name,
            interfaces,
            access_flags: class.access_flags,
        })
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_descriptors_to_internal_names() {
        let class = DexClass {
            name: "Lcom/example/Foo;".to_string(),
            access_flags: ACC_INTERFACE,
            super_name: Some("Ljava/lang/Object;".to_string()),
            interfaces: vec!["Ljava/lang/Runnable;".to_string()],
            source_file: None,
            fields: Vec::new(),
            methods: Vec::new(),
        };
        let context = ClassContext::from_class(&class).expect("context");
        assert_eq!(context.name, "com/example/Foo");
        assert_eq!(context.super_name.as_deref(), Some("java/lang/Object"));
        assert_eq!(context.interfaces, vec!["java/lang/Runnable".to_string()]);
        assert!(context.is_interface());
    }
}
