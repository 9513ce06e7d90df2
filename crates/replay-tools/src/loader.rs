use crate::catalog::{InterfaceKey, PluginCatalog, Tool};
use crate::descriptor::ToolDescriptor;
use crate::error::LoadError;
use replay_schemas::{validate_value, TOOL_DESCRIPTOR_SCHEMA};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

const DESCRIPTOR_EXTENSION: &str = "json";
const PLUGIN_SOURCE_EXTENSIONS: &[&str] = &["py", "rs"];
const INVOKE_SUFFIX: &str = "_invoke";
const NAMESPACE_QUALIFIER: &str = "Tools";

/// One callable in a loaded toolset.
#[derive(Clone)]
pub struct ToolEntry {
    pub name: String,
    /// `<name>_invoke`, qualified with the namespace in signature errors.
    pub symbol: String,
    pub descriptor: ToolDescriptor,
    pub source: Option<PathBuf>,
    tool: Arc<dyn Tool>,
}

impl ToolEntry {
    fn new(
        name: &str,
        descriptor: ToolDescriptor,
        source: Option<PathBuf>,
        tool: Arc<dyn Tool>,
    ) -> Self {
        Self {
            name: name.to_string(),
            symbol: invoke_symbol(name),
            descriptor,
            source,
            tool,
        }
    }

    pub fn qualified_symbol(&self) -> String {
        format!("{}.{}", NAMESPACE_QUALIFIER, self.symbol)
    }

    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }
}

impl fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolEntry")
            .field("name", &self.name)
            .field("symbol", &self.symbol)
            .field("source", &self.source)
            .finish()
    }
}

pub fn invoke_symbol(name: &str) -> String {
    format!("{}{}", name, INVOKE_SUFFIX)
}

/// The callable namespace for one `(environment, interface)` pair.
#[derive(Debug, Clone, Default)]
pub struct Toolset {
    entries: BTreeMap<String, ToolEntry>,
}

impl Toolset {
    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, entry: ToolEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    Syntax,
    MissingDescriptor,
    MissingInvocation,
}

/// A plugin that was skipped while the rest of the directory loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDiagnostic {
    pub file: PathBuf,
    pub kind: DiagnosticKind,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedToolset {
    pub toolset: Toolset,
    pub diagnostics: Vec<PluginDiagnostic>,
}

#[derive(Debug, Default)]
struct PluginFiles {
    descriptor: Option<PathBuf>,
    source: Option<PathBuf>,
}

impl PluginFiles {
    fn primary(&self) -> PathBuf {
        self.source
            .clone()
            .or_else(|| self.descriptor.clone())
            .unwrap_or_default()
    }
}

/// Builds the toolset for `key`.
///
/// When `tools_dir` exists it is the manifest of the interface: every plugin
/// file in it must resolve to a registered implementation, and only those
/// plugins are exposed. Without the directory, every registration visible
/// to `key` is exposed.
pub fn load_toolset(
    catalog: &PluginCatalog,
    tools_dir: &Path,
    key: &InterfaceKey,
) -> Result<LoadedToolset, LoadError> {
    let mut loaded = LoadedToolset::default();
    if !tools_dir.is_dir() {
        debug!(
            interface = %key,
            tools_dir = %tools_dir.display(),
            "tool directory absent; exposing registered tools"
        );
        for (name, tool) in catalog.registered(key) {
            let descriptor = tool.descriptor();
            loaded
                .toolset
                .insert(ToolEntry::new(&name, descriptor, None, tool));
        }
        return Ok(loaded);
    }

    let plugins = scan_plugin_files(tools_dir)?;
    let mut declared_by: BTreeMap<String, PathBuf> = BTreeMap::new();
    for (stem, files) in plugins {
        let file = files.primary();
        let disk_descriptor = match &files.descriptor {
            Some(path) => match read_descriptor(path) {
                Ok(descriptor) => Some(descriptor),
                Err(diagnostic) => {
                    warn!(file = %diagnostic.file.display(), kind = ?diagnostic.kind, "{}", diagnostic.message);
                    loaded.diagnostics.push(diagnostic);
                    continue;
                }
            },
            None => None,
        };
        let name = disk_descriptor
            .as_ref()
            .map(|d| d.name().to_string())
            .unwrap_or_else(|| stem.clone());

        if let Some(first) = declared_by.get(&name) {
            return Err(LoadError::DuplicateOperation {
                name,
                first: first.clone(),
                second: file,
            });
        }
        declared_by.insert(name.clone(), file.clone());

        let Some(tool) = catalog.resolve(key, &name) else {
            let diagnostic = PluginDiagnostic {
                file,
                kind: DiagnosticKind::MissingInvocation,
                message: format!("no invocation registered for operation '{}' in {}", name, key),
            };
            warn!(file = %diagnostic.file.display(), kind = ?diagnostic.kind, "{}", diagnostic.message);
            loaded.diagnostics.push(diagnostic);
            continue;
        };
        let descriptor = disk_descriptor.unwrap_or_else(|| tool.descriptor());
        loaded
            .toolset
            .insert(ToolEntry::new(&name, descriptor, Some(file), tool));
    }
    debug!(
        interface = %key,
        tools = loaded.toolset.len(),
        skipped = loaded.diagnostics.len(),
        "tool directory loaded"
    );
    Ok(loaded)
}

fn scan_plugin_files(tools_dir: &Path) -> Result<BTreeMap<String, PluginFiles>, LoadError> {
    let mut plugins: BTreeMap<String, PluginFiles> = BTreeMap::new();
    let entries = fs::read_dir(tools_dir).map_err(|e| LoadError::io(tools_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| LoadError::io(tools_dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem.starts_with('.') || stem.starts_with("__") {
            continue;
        }
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let slot = if ext == DESCRIPTOR_EXTENSION {
            &mut plugins.entry(stem.to_string()).or_default().descriptor
        } else if PLUGIN_SOURCE_EXTENSIONS.contains(&ext) {
            &mut plugins.entry(stem.to_string()).or_default().source
        } else {
            debug!(file = %path.display(), "ignoring non-plugin file");
            continue;
        };
        *slot = Some(path);
    }
    Ok(plugins)
}

fn read_descriptor(path: &Path) -> Result<ToolDescriptor, PluginDiagnostic> {
    let syntax = |message: String| PluginDiagnostic {
        file: path.to_path_buf(),
        kind: DiagnosticKind::Syntax,
        message,
    };
    let data = fs::read_to_string(path).map_err(|e| syntax(format!("unreadable descriptor: {}", e)))?;
    let value: Value =
        serde_json::from_str(&data).map_err(|e| syntax(format!("invalid descriptor JSON: {}", e)))?;
    validate_value(TOOL_DESCRIPTOR_SCHEMA, &value).map_err(|e| syntax(e.to_string()))?;
    let descriptor: ToolDescriptor =
        serde_json::from_value(value).map_err(|e| syntax(format!("invalid descriptor: {}", e)))?;
    if descriptor.name().trim().is_empty() {
        return Err(PluginDiagnostic {
            file: path.to_path_buf(),
            kind: DiagnosticKind::MissingDescriptor,
            message: "descriptor declares no function name".to_string(),
        });
    }
    Ok(descriptor)
}
