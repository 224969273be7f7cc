//! Attribute definition and stored attribute value records.
//!
//! # Responsibility
//! - Describe one named, typed attribute scoped to a `model_type`.
//! - Describe one stored raw value of one attribute on one entity.
//! - Validate definition names before they reach the registry.
//!
//! # Invariants
//! - Definition names are lowercase slugs and never shadow core attributes.
//! - At most one non-deleted definition exists per `(name, model_type)`.
//! - At most one stored value exists per `(entity_id, attribute_definition_id)`.

use crate::model::entity::{is_core_attribute, EntityId};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

static DEFINITION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("valid definition name regex"));

/// Storage-assigned attribute definition identifier.
pub type DefinitionId = i64;

/// Persisted schema declaration of one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub id: DefinitionId,
    /// Slug used as payload key.
    pub name: String,
    /// Codec kind, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
    /// Entity type this definition belongs to.
    pub model_type: String,
    /// Whether create payloads for `model_type` must carry this attribute.
    pub required: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl AttributeDefinition {
    /// `model_type.name`, used in diagnostics.
    pub fn unique_name(&self) -> String {
        format!("{}.{}", self.model_type, self.name)
    }
}

/// Candidate definition passed to bulk registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAttributeDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

impl NewAttributeDefinition {
    /// Creates an optional definition titled after its name.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            title: name.clone(),
            name,
            kind: kind.into(),
            description: None,
            required: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the definition as required for its model type.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Validates declaration-level invariants.
    pub fn validate(&self) -> Result<(), DefinitionValidationError> {
        if !DEFINITION_NAME_RE.is_match(&self.name) {
            return Err(DefinitionValidationError::InvalidName(self.name.clone()));
        }
        if is_core_attribute(&self.name) {
            return Err(DefinitionValidationError::ReservedName(self.name.clone()));
        }
        if self.kind.trim().is_empty() {
            return Err(DefinitionValidationError::EmptyKind(self.name.clone()));
        }
        Ok(())
    }
}

/// Definition declaration failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionValidationError {
    InvalidName(String),
    /// Name collides with a core entity attribute.
    ReservedName(String),
    EmptyKind(String),
}

impl Display for DefinitionValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(name) => write!(
                f,
                "attribute name `{name}` must match ^[a-z][a-z0-9_]*$"
            ),
            Self::ReservedName(name) => {
                write!(f, "attribute name `{name}` is reserved for a core entity field")
            }
            Self::EmptyKind(name) => write!(f, "attribute `{name}` must declare a type"),
        }
    }
}

impl Error for DefinitionValidationError {}

/// Stored raw value of one attribute on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeValue {
    pub id: i64,
    pub entity_id: EntityId,
    pub attribute_definition_id: DefinitionId,
    /// Codec-encoded text; empty means null.
    pub raw_value: String,
    pub created_at: i64,
    pub updated_at: i64,
}
