//! Reading a deployed package directory.

use std::path::{Path, PathBuf};

use pkgmgr_types::Constraints;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFINITION_FILE: &str = "package.yaml";
pub const VALUES_FILE: &str = "values.yaml";
pub const SETTINGS_SCHEMA_FILE: &str = "openapi/config-values.yaml";
pub const CHART_FILE: &str = "Chart.yaml";
pub const HOOKS_DIR: &str = "hooks";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("package definition {0} not found")]
    MissingDefinition(PathBuf),
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{path} must contain a mapping")]
    NotAMapping { path: PathBuf },
    #[error("package name mismatch: expected {expected}, found {found}")]
    NameMismatch { expected: String, found: String },
}

/// Contents of `package.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub requirements: Constraints,
}

/// Everything static about a deployed package, hooks excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageFiles {
    pub definition: Definition,
    pub values: Value,
    pub settings_schema: Option<Value>,
    pub helm: bool,
}

fn read_optional(path: &Path) -> Result<Option<String>, LoadError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(LoadError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_yaml<T: serde::de::DeserializeOwned>(path: &Path, text: &str) -> Result<T, LoadError> {
    serde_yaml::from_str(text).map_err(|source| LoadError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse an optional YAML mapping; an empty file counts as an empty mapping.
fn read_mapping(path: &Path) -> Result<Option<Value>, LoadError> {
    let Some(text) = read_optional(path)? else {
        return Ok(None);
    };
    let value: Value = if text.trim().is_empty() {
        Value::Object(Default::default())
    } else {
        parse_yaml(path, &text)?
    };
    match value {
        Value::Object(_) => Ok(Some(value)),
        Value::Null => Ok(Some(Value::Object(Default::default()))),
        _ => Err(LoadError::NotAMapping {
            path: path.to_path_buf(),
        }),
    }
}

/// Read the definition, static values and settings schema of the package
/// deployed at `dir`. `expected_name` guards against a symlink pointing at
/// another bundle.
pub fn load_package_files(dir: &Path, expected_name: &str) -> Result<PackageFiles, LoadError> {
    let def_path = dir.join(DEFINITION_FILE);
    let Some(text) = read_optional(&def_path)? else {
        return Err(LoadError::MissingDefinition(def_path));
    };
    let definition: Definition = parse_yaml(&def_path, &text)?;
    if !expected_name.is_empty() && definition.name != expected_name {
        return Err(LoadError::NameMismatch {
            expected: expected_name.to_string(),
            found: definition.name,
        });
    }

    let values = read_mapping(&dir.join(VALUES_FILE))?.unwrap_or(Value::Object(Default::default()));
    let settings_schema = read_mapping(&dir.join(SETTINGS_SCHEMA_FILE))?;
    let helm = dir.join(CHART_FILE).is_file();

    Ok(PackageFiles {
        definition,
        values,
        settings_schema,
        helm,
    })
}
