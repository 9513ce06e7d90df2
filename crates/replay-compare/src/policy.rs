use serde::{Deserialize, Serialize};

/// Relaxations applied when comparing an expected output with an observed
/// one. Each flag widens equality independently of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparePolicy {
    /// Objects compare as key sets instead of key sequences.
    pub ignore_key_order: bool,
    /// A string equals the value its JSON text decodes to.
    pub json_string_fuzz: bool,
    /// An integer equals a float of the same value.
    pub numeric_tolerance: bool,
    /// Error values compare by normalized message and error class.
    pub error_fuzz: bool,
}

impl ComparePolicy {
    pub const fn strict() -> Self {
        Self {
            ignore_key_order: false,
            json_string_fuzz: false,
            numeric_tolerance: false,
            error_fuzz: false,
        }
    }

    pub const fn loose() -> Self {
        Self {
            ignore_key_order: true,
            ..Self::strict()
        }
    }

    pub const fn fuzzy() -> Self {
        Self {
            ignore_key_order: true,
            json_string_fuzz: true,
            numeric_tolerance: true,
            error_fuzz: true,
        }
    }
}

impl Default for ComparePolicy {
    fn default() -> Self {
        Self::fuzzy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_fuzzy_toggles() {
        let policy: ComparePolicy =
            serde_json::from_str(r#"{"error_fuzz": false}"#).expect("parse");
        assert_eq!(
            policy,
            ComparePolicy {
                error_fuzz: false,
                ..ComparePolicy::fuzzy()
            }
        );
        assert!(ComparePolicy::loose().ignore_key_order);
        assert!(!ComparePolicy::loose().json_string_fuzz);
    }
}
