// src/schema.rs

use std::path::{Path, PathBuf};

use anyhow::{Context, Error};
use feature_plugin::message::{ExecutorMessage, HistoryEntry, PluginConfig, Request, Response, Settings};
use schemars::{Schema, schema_for};
use tracing::info;

/// The entry point invoked by `main.rs` for `Commands::Schema`.
/// Writes one `<name>.schema.json` per wire type and returns the paths.
pub fn write_schema(out_dir: &Path) -> Result<Vec<PathBuf>, Error> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create {}", out_dir.display()))?;

    let schemas: [(&str, Schema); 6] = [
        ("request", schema_for!(Request)),
        ("response", schema_for!(Response)),
        ("settings", schema_for!(Settings)),
        ("history-entry", schema_for!(HistoryEntry)),
        ("plugin-config", schema_for!(PluginConfig)),
        ("executor-message", schema_for!(ExecutorMessage)),
    ];

    let mut written = Vec::with_capacity(schemas.len());
    for (name, schema) in schemas {
        let path = out_dir.join(format!("{name}.schema.json"));
        let json = serde_json::to_string_pretty(&schema)?;
        std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!("schema written to {}", path.display());
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_write_schema_emits_every_wire_type() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("schemas");

        let written = write_schema(&out).unwrap();
        assert_eq!(written.len(), 6);

        let request: Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("request.schema.json")).unwrap()).unwrap();
        assert!(request.to_string().contains("EXECUTE_FEATURE"));
        assert!(out.join("executor-message.schema.json").exists());
    }
}
