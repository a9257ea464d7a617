use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SupervisorError};

pub const DEFAULT_SPEAKER: &str = "default";
pub const DEFAULT_LANGUAGE: &str = "en";

/// Static catalog entry. Never mutated after startup.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub id: String,
    pub name: String,
    /// Backend model reference, passed verbatim to the server binary.
    pub model_name: String,
}

impl ModelDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model_name: model_name.into(),
        }
    }
}

/// Speakers and languages a running backend reported.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub speakers: BTreeSet<String>,
    pub languages: BTreeSet<String>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            speakers: BTreeSet::from([DEFAULT_SPEAKER.to_string()]),
            languages: BTreeSet::from([DEFAULT_LANGUAGE.to_string()]),
        }
    }
}

/// Per-model entry returned by `ModelRegistry::list`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelStatus {
    pub name: String,
    pub model_name: String,
    pub loaded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speakers: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<BTreeSet<String>>,
}

pub fn default_catalog() -> Vec<ModelDescriptor> {
    vec![
        ModelDescriptor::new(
            "xtts_v2",
            "XTTS v2",
            "tts_models/multilingual/multi-dataset/xtts_v2",
        ),
        ModelDescriptor::new("bark", "Bark", "tts_models/multilingual/multi-dataset/bark"),
    ]
}

/// Reads a JSON array of descriptors and rejects empty or duplicate-id catalogs.
pub fn load_catalog(path: &Path) -> Result<Vec<ModelDescriptor>> {
    let bytes = std::fs::read(path)
        .map_err(|e| SupervisorError::Catalog(format!("{}: {e}", path.display())))?;
    let catalog: Vec<ModelDescriptor> = serde_json::from_slice(&bytes)
        .map_err(|e| SupervisorError::Catalog(format!("{}: {e}", path.display())))?;
    validate_catalog(&catalog)?;
    Ok(catalog)
}

pub fn validate_catalog(catalog: &[ModelDescriptor]) -> Result<()> {
    if catalog.is_empty() {
        return Err(SupervisorError::Catalog("catalog is empty".into()));
    }
    let mut seen = BTreeSet::new();
    for d in catalog {
        if d.id.is_empty() {
            return Err(SupervisorError::Catalog("model id must not be empty".into()));
        }
        if !seen.insert(d.id.as_str()) {
            return Err(SupervisorError::Catalog(format!("duplicate model id: {}", d.id)));
        }
    }
    Ok(())
}
