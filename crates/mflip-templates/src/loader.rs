//! JSON definition files.
//!
//! A path may name a single file or a directory of `*.json` files. Each file
//! holds either one definition or an array of them.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{TemplateError, TemplateResult};

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

fn read_file<T: DeserializeOwned>(path: &Path) -> TemplateResult<Vec<T>> {
    let content = fs::read_to_string(path).map_err(|source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parsed: OneOrMany<T> =
        serde_json::from_str(&content).map_err(|source| TemplateError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(match parsed {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

pub fn load_definitions<T: DeserializeOwned>(path: &Path) -> TemplateResult<Vec<T>> {
    let io_err = |source| TemplateError::Io {
        path: path.to_path_buf(),
        source,
    };

    if !path.is_dir() {
        return read_file(path);
    }

    let mut files: Vec<PathBuf> = fs::read_dir(path)
        .map_err(io_err)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut out = Vec::new();
    for file in files {
        debug!(path = %file.display(), "Loading definitions");
        out.extend(read_file(&file)?);
    }
    Ok(out)
}
