use crate::descriptor::ToolDescriptor;
use crate::error::{LoadError, ToolError};
use crate::fixtures::FixtureDb;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single operation exposed to task files.
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    /// Tools taking arbitrary keywords skip the parameter binding check.
    fn accepts_extra_arguments(&self) -> bool {
        false
    }

    fn invoke(
        &self,
        fixtures: &mut FixtureDb,
        arguments: &Map<String, Value>,
    ) -> Result<Value, ToolError>;
}

type InvokeFn = dyn Fn(&mut FixtureDb, &Map<String, Value>) -> Result<Value, ToolError> + Send + Sync;

/// Closure-backed tool, for plugins that do not need their own type.
pub struct FnTool {
    descriptor: ToolDescriptor,
    invoke: Box<InvokeFn>,
}

impl FnTool {
    pub fn new<F>(descriptor: ToolDescriptor, invoke: F) -> Self
    where
        F: Fn(&mut FixtureDb, &Map<String, Value>) -> Result<Value, ToolError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            descriptor,
            invoke: Box::new(invoke),
        }
    }
}

impl Tool for FnTool {
    fn descriptor(&self) -> ToolDescriptor {
        self.descriptor.clone()
    }

    fn invoke(
        &self,
        fixtures: &mut FixtureDb,
        arguments: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        (self.invoke)(fixtures, arguments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InterfaceKey {
    pub env: String,
    pub interface: String,
}

impl InterfaceKey {
    pub fn new(env: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            env: env.into(),
            interface: interface.into(),
        }
    }
}

impl fmt::Display for InterfaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/interface_{}", self.env, self.interface)
    }
}

/// Registry of tool implementations, keyed by `(environment, interface)`.
///
/// Shared tools are visible to every pair; a scoped registration with the
/// same name takes precedence.
#[derive(Default)]
pub struct PluginCatalog {
    scoped: BTreeMap<InterfaceKey, BTreeMap<String, Arc<dyn Tool>>>,
    shared: BTreeMap<String, Arc<dyn Tool>>,
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scoped: BTreeMap<String, Vec<&String>> = self
            .scoped
            .iter()
            .map(|(k, tools)| (k.to_string(), tools.keys().collect()))
            .collect();
        f.debug_struct("PluginCatalog")
            .field("scoped", &scoped)
            .field("shared", &self.shared.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog preloaded with the generic fixture tools.
    pub fn with_builtin_tools() -> Self {
        let mut catalog = Self::new();
        for tool in crate::builtin::builtin_tools() {
            // Built-in names are distinct, so registration cannot collide.
            let _ = catalog.register_shared(tool);
        }
        catalog
    }

    pub fn register(
        &mut self,
        env: &str,
        interface: &str,
        tool: Arc<dyn Tool>,
    ) -> Result<(), LoadError> {
        let key = InterfaceKey::new(env, interface);
        let name = tool.descriptor().name().to_string();
        let tools = self.scoped.entry(key.clone()).or_default();
        if tools.contains_key(&name) {
            return Err(LoadError::DuplicateRegistration {
                name,
                scope: key.to_string(),
            });
        }
        tools.insert(name, tool);
        Ok(())
    }

    pub fn register_fn<F>(
        &mut self,
        env: &str,
        interface: &str,
        descriptor: ToolDescriptor,
        invoke: F,
    ) -> Result<(), LoadError>
    where
        F: Fn(&mut FixtureDb, &Map<String, Value>) -> Result<Value, ToolError>
            + Send
            + Sync
            + 'static,
    {
        self.register(env, interface, Arc::new(FnTool::new(descriptor, invoke)))
    }

    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) -> Result<(), LoadError> {
        let name = tool.descriptor().name().to_string();
        if self.shared.contains_key(&name) {
            return Err(LoadError::DuplicateRegistration {
                name,
                scope: "shared".to_string(),
            });
        }
        self.shared.insert(name, tool);
        Ok(())
    }

    pub fn resolve(&self, key: &InterfaceKey, name: &str) -> Option<Arc<dyn Tool>> {
        self.scoped
            .get(key)
            .and_then(|tools| tools.get(name))
            .or_else(|| self.shared.get(name))
            .cloned()
    }

    /// Every tool visible to `key`, sorted by name.
    pub fn registered(&self, key: &InterfaceKey) -> Vec<(String, Arc<dyn Tool>)> {
        let mut merged: BTreeMap<String, Arc<dyn Tool>> = self.shared.clone();
        if let Some(tools) = self.scoped.get(key) {
            for (name, tool) in tools {
                merged.insert(name.clone(), tool.clone());
            }
        }
        merged.into_iter().collect()
    }
}
