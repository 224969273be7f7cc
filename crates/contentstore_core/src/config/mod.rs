//! Attribute-type catalog configuration.
//!
//! # Responsibility
//! - Provide the built-in catalog of attribute kinds and their options.
//! - Load deployment-specific override catalogs from JSON.
//! - Merge overrides into the defaults, kind by kind.
//!
//! # Invariants
//! - Every built-in codec kind has a default catalog entry.
//! - Override entries only replace the fields they set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

const DEFAULT_CATALOG_JSON: &str = include_str!("default_catalog.json");

/// Options of one attribute kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributeTypeSpec {
    /// Storage encoding, `string` or `json`.
    pub encoding: String,
    /// In-memory cast, e.g. `string`, `float`, `bool`.
    pub cast: String,
    /// Display template name for presentation layers.
    pub template: String,
    /// Input template name for presentation layers.
    pub form_template: String,
    /// Whether `null` may be stored (as an empty raw value).
    pub nullable: bool,
}

impl Default for AttributeTypeSpec {
    fn default() -> Self {
        Self {
            encoding: "string".to_string(),
            cast: "string".to_string(),
            template: "string".to_string(),
            form_template: "string".to_string(),
            nullable: true,
        }
    }
}

/// Partial entry used by override catalogs; unset fields keep the base value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AttributeTypeOverride {
    pub encoding: Option<String>,
    pub cast: Option<String>,
    pub template: Option<String>,
    pub form_template: Option<String>,
    pub nullable: Option<bool>,
}

impl AttributeTypeOverride {
    fn apply_to(self, base: &mut AttributeTypeSpec) {
        if let Some(encoding) = self.encoding {
            base.encoding = encoding;
        }
        if let Some(cast) = self.cast {
            base.cast = cast;
        }
        if let Some(template) = self.template {
            base.template = template;
        }
        if let Some(form_template) = self.form_template {
            base.form_template = form_template;
        }
        if let Some(nullable) = self.nullable {
            base.nullable = nullable;
        }
    }
}

/// Mapping from attribute kind to its options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeTypeCatalog {
    kinds: BTreeMap<String, AttributeTypeSpec>,
}

impl AttributeTypeCatalog {
    /// Returns the built-in catalog.
    pub fn builtin() -> Self {
        let kinds = serde_json::from_str::<BTreeMap<String, AttributeTypeSpec>>(
            DEFAULT_CATALOG_JSON,
        )
        .unwrap_or_default();
        Self { kinds }
    }

    /// Returns an empty catalog.
    pub fn empty() -> Self {
        Self {
            kinds: BTreeMap::new(),
        }
    }

    /// Looks up one kind.
    pub fn get(&self, kind: &str) -> Option<&AttributeTypeSpec> {
        self.kinds.get(kind)
    }

    /// Iterates kinds in name order.
    pub fn kinds(&self) -> impl Iterator<Item = (&str, &AttributeTypeSpec)> {
        self.kinds.iter().map(|(kind, spec)| (kind.as_str(), spec))
    }

    /// Inserts or replaces one kind.
    pub fn insert(&mut self, kind: impl Into<String>, spec: AttributeTypeSpec) {
        self.kinds.insert(kind.into(), spec);
    }

    /// Merges a JSON override catalog (`{kind: {field: value}}`) into this one.
    ///
    /// Known kinds keep every field the override does not set; unknown kinds
    /// start from [`AttributeTypeSpec::default`].
    pub fn merge_json(&mut self, json: &str) -> Result<(), ConfigError> {
        let overrides: BTreeMap<String, AttributeTypeOverride> =
            serde_json::from_str(json).map_err(ConfigError::Parse)?;
        for (kind, entry) in overrides {
            entry.apply_to(self.kinds.entry(kind).or_default());
        }
        Ok(())
    }

    /// Builds the built-in catalog merged with an override file.
    pub fn with_override_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            source: err,
        })?;
        let mut catalog = Self::builtin();
        catalog.merge_json(&json)?;
        Ok(catalog)
    }
}

impl Default for AttributeTypeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Catalog loading failures.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    Parse(serde_json::Error),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read catalog `{path}`: {source}"),
            Self::Parse(err) => write!(f, "invalid attribute-type catalog: {err}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
        }
    }
}
