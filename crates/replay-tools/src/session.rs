use crate::catalog::{InterfaceKey, PluginCatalog};
use crate::dispatch::{dispatch, Envelope};
use crate::error::LoadError;
use crate::fixtures::FixtureDb;
use crate::loader::{load_toolset, PluginDiagnostic, Toolset};
use replay_core::env_layout;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the fixture tables and the toolset of one loaded
/// `(environment, interface)` pair. Both are replaced together by `switch`.
#[derive(Debug)]
pub struct Session {
    envs_root: PathBuf,
    catalog: Arc<PluginCatalog>,
    loaded: Option<InterfaceKey>,
    fixtures: FixtureDb,
    toolset: Toolset,
    diagnostics: Vec<PluginDiagnostic>,
}

impl Session {
    pub fn new(envs_root: impl Into<PathBuf>, catalog: Arc<PluginCatalog>) -> Self {
        Self {
            envs_root: envs_root.into(),
            catalog,
            loaded: None,
            fixtures: FixtureDb::new(),
            toolset: Toolset::default(),
            diagnostics: Vec::new(),
        }
    }

    /// Loads `env`/`interface` unless it is already the active pair.
    /// Returns whether a load happened. On error the session is left empty.
    pub fn switch(&mut self, env: &str, interface: &str) -> Result<bool, LoadError> {
        let key = InterfaceKey::new(env, interface);
        if self.loaded.as_ref() == Some(&key) {
            return Ok(false);
        }
        self.clear();
        self.load(key)?;
        Ok(true)
    }

    /// Drops the current state and loads the active pair again from disk.
    pub fn reload(&mut self) -> Result<(), LoadError> {
        let Some(key) = self.loaded.clone() else {
            return Ok(());
        };
        self.clear();
        self.load(key)
    }

    pub fn clear(&mut self) {
        self.loaded = None;
        self.fixtures = FixtureDb::new();
        self.toolset = Toolset::default();
        self.diagnostics.clear();
    }

    pub fn invoke(&mut self, name: &str, arguments: &Map<String, Value>) -> Envelope {
        dispatch(&mut self.fixtures, &self.toolset, name, arguments)
    }

    pub fn loaded(&self) -> Option<&InterfaceKey> {
        self.loaded.as_ref()
    }

    pub fn fixtures(&self) -> &FixtureDb {
        &self.fixtures
    }

    pub fn fixtures_mut(&mut self) -> &mut FixtureDb {
        &mut self.fixtures
    }

    pub fn toolset(&self) -> &Toolset {
        &self.toolset
    }

    pub fn diagnostics(&self) -> &[PluginDiagnostic] {
        &self.diagnostics
    }

    fn load(&mut self, key: InterfaceKey) -> Result<(), LoadError> {
        let layout = env_layout(&self.envs_root, &key.env, &key.interface);
        if !layout.env_dir.is_dir() {
            return Err(LoadError::EnvironmentNotFound {
                path: layout.env_dir,
            });
        }
        let fixtures = if layout.data_dir.is_dir() {
            FixtureDb::load_dir(&layout.data_dir)?
        } else {
            warn!(data_dir = %layout.data_dir.display(), "environment has no data directory");
            FixtureDb::new()
        };
        let loaded = load_toolset(&self.catalog, &layout.tools_dir, &key)?;
        info!(
            interface = %key,
            tables = fixtures.len(),
            tools = loaded.toolset.len(),
            diagnostics = loaded.diagnostics.len(),
            "environment loaded"
        );
        self.fixtures = fixtures;
        self.toolset = loaded.toolset;
        self.diagnostics = loaded.diagnostics;
        self.loaded = Some(key);
        Ok(())
    }
}
