//! Plugin capability registry.
//!
//! Plugins contribute providers against a fixed capability set; hosts
//! enumerate installed providers at startup. The registry is one of the two
//! sanctioned process-wide singletons (the other being the module machine's
//! plugin-prefix fallback). `JAC_DISABLE_PLUGINS=1` empties it.

use std::sync::{Mutex, OnceLock};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    CliCommand,
    CodegenBackend,
    BytecodeCache,
    StorageBackend,
    AuthBackend,
    ClientBundler,
}

#[derive(Clone, Debug)]
pub struct Provider {
    pub name: String,
    pub capability: Capability,
}

#[derive(Default)]
pub struct PluginRegistry {
    providers: Vec<Provider>,
}

impl PluginRegistry {
    pub fn global() -> &'static Mutex<PluginRegistry> {
        static REGISTRY: OnceLock<Mutex<PluginRegistry>> = OnceLock::new();
        REGISTRY.get_or_init(|| Mutex::new(PluginRegistry::default()))
    }

    pub fn disabled() -> bool {
        std::env::var("JAC_DISABLE_PLUGINS").is_ok_and(|v| v == "1")
            || std::env::var("JAC_DISABLED_PLUGINS").is_ok_and(|v| v == "*")
    }

    pub fn register(&mut self, provider: Provider) {
        if Self::disabled() {
            return;
        }
        self.providers.push(provider);
    }

    pub fn providers_for(&self, capability: Capability) -> Vec<Provider> {
        self.providers
            .iter()
            .filter(|p| p.capability == capability)
            .cloned()
            .collect()
    }

    pub fn all(&self) -> &[Provider] {
        &self.providers
    }

    pub fn clear(&mut self) {
        self.providers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_enumerate_by_capability() {
        let mut registry = PluginRegistry::default();
        registry.register(Provider {
            name: "vite-bundler".into(),
            capability: Capability::ClientBundler,
        });
        registry.register(Provider {
            name: "s3-cache".into(),
            capability: Capability::BytecodeCache,
        });

        let bundlers = registry.providers_for(Capability::ClientBundler);
        assert_eq!(bundlers.len(), 1);
        assert_eq!(bundlers[0].name, "vite-bundler");
        assert_eq!(registry.all().len(), 2);
    }
}
