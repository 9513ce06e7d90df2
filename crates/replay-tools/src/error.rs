use std::path::PathBuf;

/// Failure raised by a tool invocation. The `Display` text is what lands in
/// the error envelope, so signature errors mirror the wording recorded in
/// existing task files.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("{symbol}() got an unexpected keyword argument '{argument}'")]
    UnexpectedArgument { symbol: String, argument: String },

    #[error("{symbol}() {}", missing_arguments_phrase(.names))]
    MissingArguments { symbol: String, names: Vec<String> },

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_signature_error(&self) -> bool {
        matches!(
            self,
            Self::UnexpectedArgument { .. } | Self::MissingArguments { .. }
        )
    }
}

fn missing_arguments_phrase(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|n| format!("'{}'", n)).collect();
    let list = match quoted.len() {
        0 => String::new(),
        1 => quoted[0].clone(),
        2 => format!("{} and {}", quoted[0], quoted[1]),
        n => format!("{}, and {}", quoted[..n - 1].join(", "), quoted[n - 1]),
    };
    let noun = if names.len() == 1 {
        "argument"
    } else {
        "arguments"
    };
    format!(
        "missing {} required positional {}: {}",
        names.len(),
        noun,
        list
    )
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("environment not found: {}", .path.display())]
    EnvironmentNotFound { path: PathBuf },

    #[error("operation '{name}' registered twice for {scope}")]
    DuplicateRegistration { name: String, scope: String },

    #[error("operation '{name}' declared by both {} and {}", .first.display(), .second.display())]
    DuplicateOperation {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    #[error("invalid fixture table {}: {reason}", .path.display())]
    InvalidFixtureTable { path: PathBuf, reason: String },

    #[error("io error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_arguments_message_matches_recorded_wording() {
        let one = ToolError::MissingArguments {
            symbol: "Tools.get_user_invoke".to_string(),
            names: vec!["user_id".to_string()],
        };
        assert_eq!(
            one.to_string(),
            "Tools.get_user_invoke() missing 1 required positional argument: 'user_id'"
        );

        let two = ToolError::MissingArguments {
            symbol: "Tools.f_invoke".to_string(),
            names: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            two.to_string(),
            "Tools.f_invoke() missing 2 required positional arguments: 'a' and 'b'"
        );

        let three = ToolError::MissingArguments {
            symbol: "Tools.f_invoke".to_string(),
            names: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        };
        assert_eq!(
            three.to_string(),
            "Tools.f_invoke() missing 3 required positional arguments: 'a', 'b', and 'c'"
        );
    }

    #[test]
    fn unexpected_argument_message_names_the_argument() {
        let err = ToolError::UnexpectedArgument {
            symbol: "Tools.get_repo_branch_invoke".to_string(),
            argument: "repo_name".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Tools.get_repo_branch_invoke() got an unexpected keyword argument 'repo_name'"
        );
        assert!(err.is_signature_error());
        assert!(!ToolError::failed("boom").is_signature_error());
    }
}
