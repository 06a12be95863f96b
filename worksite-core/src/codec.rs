//! YAML codec for the registry, project definition and settings documents.
//!
//! Decoding is two-staged so the two failure modes stay distinct:
//!
//! 1. bytes → untyped `serde_yaml::Value`: failure is [`DecodeError::Syntax`]
//! 2. `Value` → typed document + invariant checks: failure is [`DecodeError::Schema`]
//!
//! Unknown keys are kept in each struct's flattened `extra` map, so they are
//! written back unchanged. Loaders are expected to warn about them.
//!
//! Nothing here touches the filesystem.

use std::collections::HashSet;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::ConfigError;
use crate::settings::Settings;
use crate::types::{validate_name, ProjectDefinition, Registry, INFRA_START, INFRA_STOP, REGISTRY_VERSION};

/// Path-free decode failure; attach a path with [`DecodeError::at`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("{0}")]
    Syntax(#[source] serde_yaml::Error),

    #[error("{0}")]
    Schema(String),
}

impl DecodeError {
    pub fn at(self, path: &Path) -> ConfigError {
        match self {
            DecodeError::Syntax(source) => ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            },
            DecodeError::Schema(message) => ConfigError::Schema {
                path: path.to_path_buf(),
                message,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Generic helpers
// ---------------------------------------------------------------------------

fn decode_value(bytes: &[u8]) -> Result<Option<serde_yaml::Value>, DecodeError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: serde_yaml::Value = serde_yaml::from_slice(bytes).map_err(DecodeError::Syntax)?;
    Ok(if value.is_null() { None } else { Some(value) })
}

fn decode_typed<T: DeserializeOwned>(value: serde_yaml::Value) -> Result<T, DecodeError> {
    serde_yaml::from_value(value).map_err(|e| DecodeError::Schema(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ConfigError> {
    Ok(serde_yaml::to_string(value)?.into_bytes())
}

fn schema(message: impl Into<String>) -> DecodeError {
    DecodeError::Schema(message.into())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Decode the global registry. Empty input is an empty registry.
pub fn decode_registry(bytes: &[u8]) -> Result<Registry, DecodeError> {
    let Some(value) = decode_value(bytes)? else {
        return Ok(Registry::default());
    };
    let registry: Registry = decode_typed(value)?;
    validate_registry(&registry)?;
    Ok(registry)
}

pub fn encode_registry(registry: &Registry) -> Result<Vec<u8>, ConfigError> {
    encode(registry)
}

fn validate_registry(registry: &Registry) -> Result<(), DecodeError> {
    if registry.version == 0 || registry.version > REGISTRY_VERSION {
        return Err(schema(format!(
            "unsupported registry version {} (this build reads version {REGISTRY_VERSION})",
            registry.version
        )));
    }

    let mut projects = HashSet::new();
    for project in &registry.projects {
        validate_name(&project.name.0).map_err(|e| schema(e.to_string()))?;
        if !projects.insert(&project.name) {
            return Err(schema(format!("duplicate project '{}'", project.name)));
        }
    }

    let mut pairs = HashSet::new();
    for ws in &registry.workspaces {
        validate_name(&ws.name.0).map_err(|e| schema(e.to_string()))?;
        if !pairs.insert((&ws.project, &ws.name)) {
            return Err(schema(format!(
                "duplicate workspace '{}' in project '{}'",
                ws.name, ws.project
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Project definition
// ---------------------------------------------------------------------------

/// Decode a `.worksite.yaml` project definition.
pub fn decode_definition(bytes: &[u8]) -> Result<ProjectDefinition, DecodeError> {
    let value = decode_value(bytes)?.ok_or_else(|| schema("project definition is empty"))?;
    let definition: ProjectDefinition = decode_typed(value)?;
    validate_definition(&definition)?;
    Ok(definition)
}

pub fn encode_definition(definition: &ProjectDefinition) -> Result<Vec<u8>, ConfigError> {
    encode(definition)
}

fn validate_definition(definition: &ProjectDefinition) -> Result<(), DecodeError> {
    validate_name(&definition.name.0).map_err(|e| schema(e.to_string()))?;
    for required in [INFRA_START, INFRA_STOP] {
        if !definition.infra.contains_key(required) {
            return Err(schema(format!("infra.{required} is required")));
        }
    }
    if let Some((name, _)) = definition.infra.iter().find(|(_, cmd)| cmd.trim().is_empty()) {
        return Err(schema(format!("infra.{name} must not be blank")));
    }
    if let Some(agent) = &definition.agent {
        if agent.primary.trim().is_empty() {
            return Err(schema("agent.primary must not be blank"));
        }
        if agent.readonly.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(schema("agent.readonly must not be blank"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Decode `settings.yaml`. Every field is optional; empty input is the defaults.
pub fn decode_settings(bytes: &[u8]) -> Result<Settings, DecodeError> {
    match decode_value(bytes)? {
        Some(value) => decode_typed(value),
        None => Ok(Settings::default()),
    }
}

pub fn encode_settings(settings: &Settings) -> Result<Vec<u8>, ConfigError> {
    encode(settings)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

/// Log each unknown key of the document at `path`. The keys stay in the
/// document's `extra` maps, so a re-encode keeps them.
pub(crate) fn warn_unknown_fields(fields: impl IntoIterator<Item = String>, path: &Path) {
    for field in fields {
        tracing::warn!("{}", unknown_field_message(&field, path));
    }
}

fn unknown_field_message(field: &str, path: &Path) -> String {
    format!("preserving unknown field '{field}' in {}", path.display())
}
