//! Extension points consulted by the converter before each unit of default work.
//!
//! Every hook returns whether default processing of that unit should still run. A caller that
//! returns `false` takes over the unit entirely.

use crate::context::ClassContext;
use crate::dex::{DexClass, DexField, DexMethod};

pub trait ConversionHooks: Send + Sync {
    /// Consulted once per class before anything is written. `false` drops the class.
    fn convert_class(&self, _class: &DexClass) -> bool {
        true
    }

    fn convert_field(&self, _class: &ClassContext, _field: &DexField) -> bool {
        true
    }

    /// `false` leaves the method out of the class.
    fn convert_method(&self, _class: &ClassContext, _method: &DexMethod) -> bool {
        true
    }

    /// `false` writes the method without a body.
    fn convert_code(&self, _class: &ClassContext, _method: &DexMethod) -> bool {
        true
    }

    /// Consulted before synthesizing a method the input lacks, such as a `<clinit>` holding
    /// static field initializers.
    fn add_synthetic_method(&self, _class: &ClassContext, _name: &str) -> bool {
        true
    }
}

/// Hooks that keep every default.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl ConversionHooks for DefaultHooks {}

/// Ordered hook list. The first hook that declines a unit stops the chain.
#[derive(Default)]
pub struct HookChain {
    hooks: Vec<Box<dyn ConversionHooks>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hooks: impl ConversionHooks + 'static) -> Self {
        self.hooks.push(Box::new(hooks));
        self
    }

    fn all(&self, f: impl Fn(&dyn ConversionHooks) -> bool) -> bool {
        self.hooks.iter().all(|hooks| f(hooks.as_ref()))
    }
}

impl ConversionHooks for HookChain {
    fn convert_class(&self, class: &DexClass) -> bool {
        self.all(|hooks| hooks.convert_class(class))
    }

    fn convert_field(&self, class: &ClassContext, field: &DexField) -> bool {
        self.all(|hooks| hooks.convert_field(class, field))
    }

    fn convert_method(&self, class: &ClassContext, method: &DexMethod) -> bool {
        self.all(|hooks| hooks.convert_method(class, method))
    }

    fn convert_code(&self, class: &ClassContext, method: &DexMethod) -> bool {
        self.all(|hooks| hooks.convert_code(class, method))
    }

    fn add_synthetic_method(&self, class: &ClassContext, name: &str) -> bool {
        self.all(|hooks| hooks.add_synthetic_method(class, name))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::test_harness::class_context;

    struct SkipMethod(&'static str);

    impl ConversionHooks for SkipMethod {
        fn convert_method(&self, _class: &ClassContext, method: &DexMethod) -> bool {
            method.name != self.0
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl ConversionHooks for Counting {
        fn convert_method(&self, _class: &ClassContext, _method: &DexMethod) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    fn method(name: &str) -> DexMethod {
        DexMethod {
            name: name.to_string(),
            descriptor: "()V".to_string(),
            access_flags: 0,
            throws: Vec::new(),
            code: None,
        }
    }

    #[test]
    fn first_declining_hook_stops_the_chain() {
        let calls = Arc::new(AtomicUsize::new(0));
        let chain = HookChain::new()
            .with(SkipMethod("secret"))
            .with(Counting(Arc::clone(&calls)));
        let context = class_context();

        assert!(chain.convert_method(&context, &method("run")));
        assert!(!chain.convert_method(&context, &method("secret")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(chain.convert_code(&context, &method("secret")));
    }

    #[test]
    fn empty_chain_keeps_defaults() {
        let chain = HookChain::new();
        assert!(chain.add_synthetic_method(&class_context(), "<clinit>"));
        assert!(DefaultHooks.convert_field(
            &class_context(),
            &DexField {
                name: "x".to_string(),
                descriptor: "I".to_string(),
                access_flags: 0,
                initial_value: None,
            }
        ));
    }
}
