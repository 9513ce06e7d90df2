use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

mod pyjson;
pub use pyjson::{to_python_json_string, PythonCompactFormatter};

pub const ENV_DATA_DIR: &str = "data";
pub const ENV_TOOLS_DIR: &str = "tools";
pub const ENV_INTERFACE_PREFIX: &str = "interface_";

pub const REPLAY_ENV_ENVS_ROOT: &str = "REPLAY_ENVS_ROOT";
pub const REPLAY_ENV_MAX_CONSECUTIVE_FAILURES: &str = "REPLAY_MAX_CONSECUTIVE_FAILURES";
pub const REPLAY_ENV_SHA_RULE: &str = "REPLAY_SHA_RULE";

/// Host paths for one `(environment, interface)` pair under an envs root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvLayout {
    pub env_dir: PathBuf,
    pub data_dir: PathBuf,
    pub tools_dir: PathBuf,
}

pub fn env_layout(envs_root: &Path, env: &str, interface: &str) -> EnvLayout {
    let env_dir = envs_root.join(env);
    let data_dir = env_dir.join(ENV_DATA_DIR);
    let tools_dir = env_dir
        .join(ENV_TOOLS_DIR)
        .join(format!("{}{}", ENV_INTERFACE_PREFIX, interface));
    EnvLayout {
        env_dir,
        data_dir,
        tools_dir,
    }
}

/// Renders an `interface_num` value the way it appears in directory names.
pub fn interface_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path)?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(sha256_bytes(&buf))
}

/// Key-sorted compact JSON, independent of map insertion order.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s)),
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let parts: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| {
                    let ks = serde_json::to_string(k).unwrap_or_else(|_| format!("\"{}\"", k));
                    format!("{}:{}", ks, canonical_json(v))
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

pub fn canonical_json_digest(value: &Value) -> String {
    sha256_bytes(canonical_json(value).as_bytes())
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("invalid target path: {}", path.display()))?;
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

/// Writes `value` with two-space indentation, UTF-8 and original key order.
pub fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write_bytes(path, &bytes)
}
