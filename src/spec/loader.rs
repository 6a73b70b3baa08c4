//! Loading chatbot documents from disk
//!
//! A document is either a single module object or a bundle
//! `{"entry": "...", "modules": [...]}`. A directory is loaded by merging
//! every top-level `*.json` document in it, in file name order.

use super::{ChatbotModel, ModuleSpec, SpecError};
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Deserialize)]
struct Bundle {
    #[serde(default)]
    entry: Option<String>,
    modules: Vec<ModuleSpec>,
}

/// Modules declared by one document, plus its entry if it names one
struct Document {
    entry: Option<String>,
    modules: Vec<ModuleSpec>,
}

fn parse_document(text: &str, origin: &str) -> Result<Document, SpecError> {
    let parse_err = |source| SpecError::Parse {
        path: origin.to_string(),
        source,
    };

    let value: Value = serde_json::from_str(text).map_err(parse_err)?;
    if value.get("modules").is_some() {
        let bundle: Bundle = serde_json::from_value(value).map_err(parse_err)?;
        Ok(Document {
            entry: bundle.entry,
            modules: bundle.modules,
        })
    } else {
        let module: ModuleSpec = serde_json::from_value(value).map_err(parse_err)?;
        Ok(Document {
            entry: None,
            modules: vec![module],
        })
    }
}

fn read(path: &Path) -> Result<String, SpecError> {
    std::fs::read_to_string(path).map_err(|source| SpecError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn documents_in(dir: &Path) -> Result<Vec<PathBuf>, SpecError> {
    let io_err = |source| SpecError::Io {
        path: dir.display().to_string(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

impl ChatbotModel {
    /// Load a chatbot from a `.json` file or a directory of them
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SpecError> {
        let path = path.as_ref();
        let files = if path.is_dir() {
            documents_in(path)?
        } else {
            vec![path.to_path_buf()]
        };

        let mut entry = None;
        let mut modules = Vec::new();
        for file in &files {
            let document = parse_document(&read(file)?, &file.display().to_string())?;
            entry = entry.or(document.entry);
            modules.extend(document.modules);
        }

        tracing::debug!(
            path = %path.display(),
            files = files.len(),
            modules = modules.len(),
            "Loaded chatbot documents"
        );

        Self::new(modules, entry)
    }

    /// Parse a single in-memory document
    pub fn from_json_str(text: &str) -> Result<Self, SpecError> {
        let document = parse_document(text, "<inline>")?;
        Self::new(document.modules, document.entry)
    }
}
