use anyhow::{Context as AnyhowContext, Result};
use std::fs;
use std::path::Path;

use crate::dsl::NetSpec;

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Loads a net from a `.json` file, or from YAML for any other extension.
pub fn load_net(path: impl AsRef<Path>) -> Result<NetSpec> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read net file from {}", path.display()))?;

    let spec = if is_json(path) {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to deserialize JSON content from {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to deserialize YAML content from {}", path.display()))?
    };

    Ok(spec)
}

pub fn load_net_from_yaml_str(content: &str) -> Result<NetSpec> {
    serde_yaml::from_str(content).context("Failed to deserialize YAML net")
}

/// Writes a net in the format its extension names.
pub fn save_net(spec: &NetSpec, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let content = if is_json(path) {
        serde_json::to_string_pretty(spec)?
    } else {
        serde_yaml::to_string(spec)?
    };
    fs::write(path, content).with_context(|| format!("Failed to write net file to {}", path.display()))
}
