use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::{info, warn};

use crate::tree::external::ExternalDocument;
use crate::tree::newick;
use crate::tree::viewer::LoadedTree;

/// Contents of one input file.
#[derive(Debug)]
pub enum LoadedInput {
    Trees(Vec<LoadedTree>),
    Document(ExternalDocument),
}

pub fn load_input(path: &Path) -> Result<LoadedInput> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read input file: {}", path.display()))?;

    if is_vector_document(path, &raw) {
        let document = load_document(&raw)
            .with_context(|| format!("failed to load vector document {}", path.display()))?;
        info!(
            "loaded vector document {} ({} bytes)",
            path.display(),
            document.markup().len()
        );
        return Ok(LoadedInput::Document(document));
    }

    let trees = load_trees(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    info!(
        "loaded {} tree(s) from {} ({} leaves in the first)",
        trees.len(),
        path.display(),
        trees[0].layout.leaf_count
    );
    Ok(LoadedInput::Trees(trees))
}

pub fn load_document(raw: &str) -> Result<ExternalDocument> {
    Ok(ExternalDocument::new(raw)?)
}

/// Parse every tree in `raw`; any failure fails the whole load.
pub fn load_trees(raw: &str) -> Result<Vec<LoadedTree>> {
    let mut trees = Vec::new();
    for parsed in newick::parse_each(raw) {
        let parsed = parsed.map_err(|err| {
            let number = trees.len() + 1;
            warn!("tree #{number} failed to parse: {err}");
            anyhow::Error::new(err).context(format!("tree #{number} is malformed"))
        })?;
        trees.push(LoadedTree::from_parsed(parsed.tree, parsed.source.to_string()));
    }
    if trees.is_empty() {
        bail!("input did not contain any trees");
    }
    Ok(trees)
}

fn is_vector_document(path: &Path, raw: &str) -> bool {
    let head = raw.trim_start();
    if head.starts_with("<svg") || head.starts_with("<?xml") {
        return true;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("svg"))
        .unwrap_or(false)
}

/// Read a `key=value` settings file. Blank lines and `#` comments are skipped.
pub fn read_settings(path: &Path) -> Result<BTreeMap<String, String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file: {}", path.display()))?;

    let mut settings = BTreeMap::new();
    for (line_no, line) in raw.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match trimmed.split_once('=') {
            Some((key, value)) => {
                settings.insert(key.trim().to_string(), value.trim().to_string());
            }
            None => warn!(
                "ignoring malformed line {} in {}: {trimmed}",
                line_no + 1,
                path.display()
            ),
        }
    }
    Ok(settings)
}

pub fn write_settings(path: &Path, settings: &BTreeMap<String, String>) -> Result<()> {
    let mut contents = String::new();
    for (key, value) in settings {
        contents.push_str(key);
        contents.push('=');
        contents.push_str(value);
        contents.push('\n');
    }
    fs::write(path, contents)
        .with_context(|| format!("failed to write settings file: {}", path.display()))?;
    info!("saved view settings to {}", path.display());
    Ok(())
}
