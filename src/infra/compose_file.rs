use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
struct ComposeFile {
    #[serde(default)]
    services: BTreeMap<String, serde_yml::Value>,
}

/// Union of the service names declared across compose files, in first-seen order.
pub fn declared_services(files: &[impl AsRef<Path>]) -> Result<Vec<String>> {
    let mut names: Vec<String> = Vec::new();

    for file in files {
        let path = file.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("reading compose file {:?}", path))?;
        let parsed: ComposeFile = serde_yml::from_str(&content)
            .with_context(|| format!("parsing compose file {:?}", path))?;

        for name in parsed.services.into_keys() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    Ok(names)
}
