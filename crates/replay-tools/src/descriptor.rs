use crate::error::ToolError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Function-calling descriptor of one tool:
/// `{type: "function", function: {name, description, parameters}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    #[serde(rename = "type", default = "default_descriptor_kind")]
    pub kind: String,
    pub function: FunctionDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: ParameterSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type", default = "default_parameters_kind")]
    pub kind: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self {
            kind: default_parameters_kind(),
            properties: Map::new(),
            required: Vec::new(),
        }
    }
}

fn default_descriptor_kind() -> String {
    "function".to_string()
}

fn default_parameters_kind() -> String {
    "object".to_string()
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: default_descriptor_kind(),
            function: FunctionDescriptor {
                name: name.into(),
                description: description.into(),
                parameters: ParameterSchema::default(),
            },
        }
    }

    /// Adds an optional parameter.
    pub fn param(mut self, name: &str, kind: &str, description: &str) -> Self {
        self.function.parameters.properties.insert(
            name.to_string(),
            json!({"type": kind, "description": description}),
        );
        self
    }

    /// Adds a required parameter.
    pub fn required_param(mut self, name: &str, kind: &str, description: &str) -> Self {
        self = self.param(name, kind, description);
        self.function.parameters.required.push(name.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    pub fn accepts(&self, argument: &str) -> bool {
        self.function.parameters.properties.contains_key(argument)
    }

    /// Binds `arguments` against the declared parameters the way a keyword
    /// call would: the first unknown keyword wins, then every required
    /// parameter that was not supplied is reported together.
    pub fn check_arguments(
        &self,
        symbol: &str,
        arguments: &Map<String, Value>,
    ) -> Result<(), ToolError> {
        if let Some(unknown) = arguments.keys().find(|k| !self.accepts(k)) {
            return Err(ToolError::UnexpectedArgument {
                symbol: symbol.to_string(),
                argument: unknown.clone(),
            });
        }
        let missing: Vec<String> = self
            .function
            .parameters
            .required
            .iter()
            .filter(|name| !arguments.contains_key(name.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(ToolError::MissingArguments {
                symbol: symbol.to_string(),
                names: missing,
            });
        }
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_descriptor() -> ToolDescriptor {
        ToolDescriptor::new("get_repo_branch", "Fetch a branch of a repository")
            .required_param("repository_id", "string", "Repository id")
            .required_param("branch_name", "string", "Branch name")
            .param("include_commits", "boolean", "Embed commit list")
    }

    #[test]
    fn descriptor_parses_wire_shape_with_defaults() {
        let value = json!({
            "type": "function",
            "function": {
                "name": "get_user",
                "description": "Fetch one user",
                "parameters": {"properties": {"user_id": {"type": "string"}}, "required": ["user_id"]}
            }
        });
        let descriptor: ToolDescriptor = serde_json::from_value(value).expect("parse");
        assert_eq!(descriptor.name(), "get_user");
        assert_eq!(descriptor.function.parameters.kind, "object");
        assert!(descriptor.accepts("user_id"));
        assert_eq!(descriptor.function.parameters.required, vec!["user_id"]);
    }

    #[test]
    fn unexpected_keyword_is_reported_before_missing_ones() {
        let descriptor = branch_descriptor();
        let mut args = Map::new();
        args.insert("repo_name".to_string(), json!("core"));
        let err = descriptor
            .check_arguments("Tools.get_repo_branch_invoke", &args)
            .expect_err("unknown keyword");
        assert_eq!(
            err.to_string(),
            "Tools.get_repo_branch_invoke() got an unexpected keyword argument 'repo_name'"
        );
    }

    #[test]
    fn missing_required_parameters_are_listed_in_declaration_order() {
        let descriptor = branch_descriptor();
        let err = descriptor
            .check_arguments("Tools.get_repo_branch_invoke", &Map::new())
            .expect_err("missing");
        assert_eq!(
            err.to_string(),
            "Tools.get_repo_branch_invoke() missing 2 required positional arguments: 'repository_id' and 'branch_name'"
        );
    }

    #[test]
    fn complete_arguments_bind() {
        let descriptor = branch_descriptor();
        let mut args = Map::new();
        args.insert("repository_id".to_string(), json!("4"));
        args.insert("branch_name".to_string(), json!("main"));
        descriptor
            .check_arguments("Tools.get_repo_branch_invoke", &args)
            .expect("binds");
    }
}
