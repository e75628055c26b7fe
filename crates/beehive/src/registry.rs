//! # Module Registry
//!
//! Collects the modules a process hosts before the [`Core`](crate::runtime::Core) starts
//! them. Disabled modules are left out at registration time, so they never get an
//! inbox and never appear in a group.

use crate::context::ModuleInfo;
use crate::error::BusError;
use crate::module::Module;
use std::sync::Arc;
use tracing::info;

/// An enabled module together with its inbox parameters.
pub struct Registration {
    pub module: Arc<dyn Module>,
    pub info: ModuleInfo,
}

/// Ordered set of enabled modules, keyed by name.
#[derive(Default)]
pub struct ModuleRegistry {
    entries: Vec<Registration>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module with the default inbox capacity.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<(), BusError> {
        let info = ModuleInfo::new(module.name());
        self.register_with(module, info)
    }

    /// Registers a module with explicit inbox parameters.
    ///
    /// A disabled module is skipped and the call still succeeds.
    pub fn register_with(
        &mut self,
        module: Arc<dyn Module>,
        info: ModuleInfo,
    ) -> Result<(), BusError> {
        if !module.enabled() {
            info!(module = module.name(), "module is disabled, do not register");
            return Ok(());
        }
        if self.contains(&info.name) {
            return Err(BusError::AlreadyRegistered(info.name));
        }
        info!(module = module.name(), group = module.group(), "module registered");
        self.entries.push(Registration { module, info });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|r| r.info.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.info.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<Registration> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BusContext;
    use crate::error::ModuleError;
    use async_trait::async_trait;

    struct Named {
        name: &'static str,
        enabled: bool,
    }

    #[async_trait]
    impl Module for Named {
        fn name(&self) -> &str {
            self.name
        }

        fn group(&self) -> &str {
            "test"
        }

        fn enabled(&self) -> bool {
            self.enabled
        }

        async fn start(&self, _ctx: BusContext) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    #[test]
    fn disabled_modules_are_skipped() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(Arc::new(Named { name: "off", enabled: false }))
            .unwrap();
        registry
            .register(Arc::new(Named { name: "on", enabled: true }))
            .unwrap();

        assert_eq!(registry.names(), vec!["on".to_string()]);
        assert!(!registry.contains("off"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = ModuleRegistry::new();
        registry
            .register(Arc::new(Named { name: "twin", enabled: true }))
            .unwrap();
        let err = registry
            .register(Arc::new(Named { name: "twin", enabled: true }))
            .unwrap_err();
        assert_eq!(err, BusError::AlreadyRegistered("twin".into()));
        assert_eq!(registry.len(), 1);
    }
}
