use anyhow::{anyhow, Context, Result};
use replay_compare::ComparePolicy;
use replay_core::{REPLAY_ENV_ENVS_ROOT, REPLAY_ENV_MAX_CONSECUTIVE_FAILURES, REPLAY_ENV_SHA_RULE};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_ENVS_ROOT: &str = "envs";
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: usize = 5;

/// Which arguments receive the most recently observed `commit_sha`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaRule {
    /// Every argument whose key contains `sha`.
    #[default]
    Broad,
    /// Only arguments holding a `commit_sha` recorded by an earlier step.
    OnlyRecorded,
}

impl FromStr for ShaRule {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "broad" => Ok(Self::Broad),
            "only_recorded" => Ok(Self::OnlyRecorded),
            other => Err(anyhow!(
                "unknown sha rule '{}' (expected broad or only_recorded)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub envs_root: PathBuf,
    /// Verify aborts a file after this many failing steps in a row.
    pub max_consecutive_failures: usize,
    /// Reload fixtures before every task file, even within one environment.
    pub fresh_fixtures_per_task: bool,
    /// Environments whose tools return floats where recordings hold ints.
    pub float_envs: Vec<String>,
    pub sha_rule: ShaRule,
    pub compare: ComparePolicy,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            envs_root: PathBuf::from(DEFAULT_ENVS_ROOT),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            fresh_fixtures_per_task: true,
            float_envs: Vec::new(),
            sha_rule: ShaRule::default(),
            compare: ComparePolicy::fuzzy(),
        }
    }
}

impl ReplayConfig {
    /// Reads a JSON or YAML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let config: Self = if is_yaml {
            serde_yaml::from_str(&data)
                .with_context(|| format!("invalid config {}", path.display()))?
        } else {
            serde_json::from_str(&data)
                .with_context(|| format!("invalid config {}", path.display()))?
        };
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_consecutive_failures == 0 {
            return Err(anyhow!("max_consecutive_failures must be > 0"));
        }
        Ok(())
    }

    /// Defaults, then the optional file, then process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| match env::var(name) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) => Ok(None),
            Err(err) => Err(anyhow!("failed reading {}: {}", name, err)),
        })
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Result<Option<String>>,
    {
        let read = |name: &str| -> Result<Option<String>> {
            Ok(lookup(name)?
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty()))
        };
        if let Some(root) = read(REPLAY_ENV_ENVS_ROOT)? {
            self.envs_root = PathBuf::from(root);
        }
        if let Some(raw) = read(REPLAY_ENV_MAX_CONSECUTIVE_FAILURES)? {
            let parsed = raw.parse::<usize>().map_err(|_| {
                anyhow!(
                    "{} must be a positive integer when set (got: {})",
                    REPLAY_ENV_MAX_CONSECUTIVE_FAILURES,
                    raw
                )
            })?;
            if parsed == 0 {
                return Err(anyhow!(
                    "{} must be > 0 when set",
                    REPLAY_ENV_MAX_CONSECUTIVE_FAILURES
                ));
            }
            self.max_consecutive_failures = parsed;
        }
        if let Some(raw) = read(REPLAY_ENV_SHA_RULE)? {
            self.sha_rule = raw
                .parse()
                .with_context(|| format!("invalid {}", REPLAY_ENV_SHA_RULE))?;
        }
        Ok(())
    }

    pub fn is_float_env(&self, env: &str) -> bool {
        self.float_envs.iter().any(|e| e == env)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Result<Option<String>> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| Ok(vars.get(name).cloned())
    }

    #[test]
    fn yaml_config_fills_unset_fields_with_defaults() {
        let config: ReplayConfig = serde_yaml::from_str(
            "envs_root: /data/envs\nfloat_envs: [finance]\ncompare:\n  error_fuzz: false\n",
        )
        .expect("yaml");
        assert_eq!(config.envs_root, PathBuf::from("/data/envs"));
        assert_eq!(config.max_consecutive_failures, 5);
        assert!(config.fresh_fixtures_per_task);
        assert!(config.is_float_env("finance"));
        assert!(!config.compare.error_fuzz);
        assert!(config.compare.json_string_fuzz);
        assert_eq!(config.sha_rule, ShaRule::Broad);
    }

    #[test]
    fn zero_failure_budget_in_a_config_file_is_rejected() {
        let dir = std::env::temp_dir().join(format!(
            "replay_config_zero_{}_{}",
            std::process::id(),
            chrono::Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("dir");
        let path = dir.join("replay.json");
        fs::write(&path, r#"{"max_consecutive_failures": 0}"#).expect("config");
        let err = ReplayConfig::load(Some(&path)).expect_err("zero budget");
        assert!(format!("{:#}", err).contains("must be > 0"), "{:#}", err);

        fs::write(&path, r#"{"max_consecutive_failures": 3}"#).expect("config");
        let config = ReplayConfig::from_file(&path).expect("valid config");
        assert_eq!(config.max_consecutive_failures, 3);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn environment_overrides_win_over_file_values() {
        let mut config = ReplayConfig::default();
        config
            .apply_overrides(lookup(&[
                (REPLAY_ENV_ENVS_ROOT, " /srv/envs "),
                (REPLAY_ENV_MAX_CONSECUTIVE_FAILURES, "2"),
                (REPLAY_ENV_SHA_RULE, "only-recorded"),
            ]))
            .expect("overrides");
        assert_eq!(config.envs_root, PathBuf::from("/srv/envs"));
        assert_eq!(config.max_consecutive_failures, 2);
        assert_eq!(config.sha_rule, ShaRule::OnlyRecorded);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let mut config = ReplayConfig::default();
        let err = config
            .apply_overrides(lookup(&[(REPLAY_ENV_MAX_CONSECUTIVE_FAILURES, "0")]))
            .expect_err("zero");
        assert!(err.to_string().contains("> 0"), "{}", err);
        let err = config
            .apply_overrides(lookup(&[(REPLAY_ENV_SHA_RULE, "everything")]))
            .expect_err("rule");
        assert!(format!("{:#}", err).contains("unknown sha rule"), "{:#}", err);
        config
            .apply_overrides(lookup(&[(REPLAY_ENV_ENVS_ROOT, "   ")]))
            .expect("blank is unset");
        assert_eq!(config.envs_root, PathBuf::from(DEFAULT_ENVS_ROOT));
    }
}
