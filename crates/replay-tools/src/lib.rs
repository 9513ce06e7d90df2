//! Tool surface for task replay: plugin registration and directory loading,
//! the fixture store, argument coercion and envelope dispatch, and the
//! `Session` that ties one `(environment, interface)` pair together.

mod builtin;
mod catalog;
mod descriptor;
mod dispatch;
mod error;
mod fixtures;
mod literal;
mod loader;
mod session;

pub use builtin::builtin_tools;
pub use catalog::{FnTool, InterfaceKey, PluginCatalog, Tool};
pub use descriptor::{FunctionDescriptor, ParameterSchema, ToolDescriptor};
pub use dispatch::{
    coerce_arguments, decode_return, dispatch, is_identifier_key, Envelope, InvocationFailure,
    STATUS_NOT_FOUND, STATUS_OK, STATUS_TOOL_ERROR,
};
pub use error::{LoadError, ToolError};
pub use fixtures::FixtureDb;
pub use literal::parse_python_literal;
pub use loader::{
    invoke_symbol, load_toolset, DiagnosticKind, LoadedToolset, PluginDiagnostic, ToolEntry,
    Toolset,
};
pub use session::Session;
