//! Entity domain model and core-attribute payload handling.
//!
//! # Responsibility
//! - Define the canonical entity record with its fixed core attributes.
//! - Split flat request payloads into core fields and attribute values.
//! - Validate core fields before persistence.
//!
//! # Invariants
//! - `title` and `type` are always required; `type` is a non-empty string.
//! - `alias_id <= 0` means "not an alias", exactly like an absent value.
//! - `id`, `created_at`, `updated_at` and `deleted_at` are storage-managed and
//!   ignored on input.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage-assigned entity identifier. Always positive once persisted.
pub type EntityId = i64;

/// Flat key/value payload accepted by create, update, exists and search.
pub type Values = BTreeMap<String, JsonValue>;

/// Core attribute names stored as entity columns. Every other payload key is
/// an attribute value.
pub const CORE_ATTRIBUTES: &[&str] = &[
    "id",
    "title",
    "type",
    "href",
    "alias_id",
    "content",
    "created_at",
    "created_by",
    "updated_at",
    "updated_by",
    "deleted_at",
];

/// Core attributes every non-empty create payload must carry.
pub const REQUIRED_CORE_ATTRIBUTES: &[&str] = &["title", "type"];

/// Returns whether `name` is one of the fixed core attributes.
pub fn is_core_attribute(name: &str) -> bool {
    CORE_ATTRIBUTES.contains(&name)
}

/// Splits a payload into `(core, attributes)` by key classification.
pub fn split_values(values: &Values) -> (Values, Values) {
    let mut core = Values::new();
    let mut attributes = Values::new();
    for (key, value) in values {
        if is_core_attribute(key) {
            core.insert(key.clone(), value.clone());
        } else {
            attributes.insert(key.clone(), value.clone());
        }
    }
    (core, attributes)
}

/// Generic content object of a declared `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Schema family name, serialized as `type`.
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub href: Option<String>,
    /// Original entity this one points to, when it is an alias.
    pub alias_id: Option<EntityId>,
    pub content: Option<String>,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub created_by: Option<i64>,
    /// Epoch milliseconds.
    pub updated_at: i64,
    pub updated_by: Option<i64>,
    /// Soft-delete tombstone in epoch milliseconds.
    pub deleted_at: Option<i64>,
}

impl Entity {
    /// Builds an in-memory entity that has not been persisted yet.
    ///
    /// Attribute writes against it fail with `NotSaved`.
    pub fn unsaved(kind: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: 0,
            kind: kind.into(),
            title: title.into(),
            href: None,
            alias_id: None,
            content: None,
            created_at: 0,
            created_by: None,
            updated_at: 0,
            updated_by: None,
            deleted_at: None,
        }
    }

    /// Returns whether this entity is persisted and typed.
    pub fn is_saved(&self) -> bool {
        self.id > 0 && !self.kind.trim().is_empty()
    }

    /// Returns whether this entity points to an original.
    pub fn is_alias(&self) -> bool {
        self.alias_id.is_some_and(|id| id > 0)
    }

    /// Returns whether this entity is not soft-deleted.
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Returns one core attribute as a JSON value, or `None` for unknown names.
    pub fn core_value(&self, name: &str) -> Option<JsonValue> {
        let value = match name {
            "id" => JsonValue::from(self.id),
            "title" => JsonValue::from(self.title.clone()),
            "type" => JsonValue::from(self.kind.clone()),
            "href" => JsonValue::from(self.href.clone()),
            "alias_id" => JsonValue::from(self.alias_id),
            "content" => JsonValue::from(self.content.clone()),
            "created_at" => JsonValue::from(self.created_at),
            "created_by" => JsonValue::from(self.created_by),
            "updated_at" => JsonValue::from(self.updated_at),
            "updated_by" => JsonValue::from(self.updated_by),
            "deleted_at" => JsonValue::from(self.deleted_at),
            _ => return None,
        };
        Some(value)
    }
}

/// Writable core columns parsed from a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreFields {
    pub kind: String,
    pub title: String,
    pub href: Option<String>,
    pub alias_id: Option<EntityId>,
    pub content: Option<String>,
    pub created_by: Option<i64>,
    pub updated_by: Option<i64>,
}

impl CoreFields {
    /// Parses the writable core columns of a create payload.
    ///
    /// Requires `type` and `title`; other fields are optional. Storage-managed
    /// keys are ignored.
    pub fn from_values(values: &Values) -> Result<Self, EntityValidationError> {
        Ok(Self {
            kind: model_type_of(values)?.to_string(),
            title: required_string(values, "title")?,
            href: optional_string(values, "href")?,
            alias_id: alias_id_of(values)?,
            content: optional_string(values, "content")?,
            created_by: optional_id(values, "created_by")?,
            updated_by: optional_id(values, "updated_by")?,
        })
    }
}

/// Reads `type` as a non-empty string.
pub fn model_type_of(values: &Values) -> Result<&str, EntityValidationError> {
    match values.get("type") {
        Some(JsonValue::String(kind)) if !kind.trim().is_empty() => Ok(kind.as_str()),
        _ => Err(EntityValidationError::MissingType),
    }
}

/// Reads `alias_id`, mapping absent, null and non-positive ids to `None`.
pub fn alias_id_of(values: &Values) -> Result<Option<EntityId>, EntityValidationError> {
    Ok(optional_id(values, "alias_id")?.filter(|id| *id > 0))
}

/// Reads an optional string field.
pub fn optional_string(
    values: &Values,
    field: &'static str,
) -> Result<Option<String>, EntityValidationError> {
    match values.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(EntityValidationError::InvalidCoreField {
            field,
            expected: "string",
        }),
    }
}

/// Reads an optional integer id field; numeric strings are accepted.
pub fn optional_id(
    values: &Values,
    field: &'static str,
) -> Result<Option<i64>, EntityValidationError> {
    let invalid = EntityValidationError::InvalidCoreField {
        field,
        expected: "integer",
    };
    match values.get(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Number(number)) => number.as_i64().map(Some).ok_or(invalid),
        Some(JsonValue::String(text)) => text.trim().parse::<i64>().map(Some).map_err(|_| invalid),
        Some(_) => Err(invalid),
    }
}

fn required_string(values: &Values, field: &'static str) -> Result<String, EntityValidationError> {
    optional_string(values, field)?
        .ok_or_else(|| EntityValidationError::MissingAttributes(vec![field.to_string()]))
}

/// Payload validation failures raised before any write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValidationError {
    /// `type` is absent, not a string or blank.
    MissingType,
    /// Required keys absent from the payload, sorted by name.
    MissingAttributes(Vec<String>),
    /// A core field has the wrong JSON shape.
    InvalidCoreField {
        field: &'static str,
        expected: &'static str,
    },
    /// An alias must share its original's type.
    AliasTypeMismatch {
        alias_type: String,
        original_type: String,
    },
    /// An entity's type cannot change once persisted.
    ImmutableType { current: String, requested: String },
}

impl Display for EntityValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingType => write!(f, "must provide a string value for entity type"),
            Self::MissingAttributes(names) => write!(
                f,
                "must provide a value for these entity attributes: {}",
                names.join(", ")
            ),
            Self::InvalidCoreField { field, expected } => {
                write!(f, "entity field `{field}` must be {expected}")
            }
            Self::AliasTypeMismatch {
                alias_type,
                original_type,
            } => write!(
                f,
                "alias of type `{alias_type}` cannot point to an original of type `{original_type}`"
            ),
            Self::ImmutableType { current, requested } => write!(
                f,
                "entity type `{current}` cannot be changed to `{requested}`"
            ),
        }
    }
}

impl Error for EntityValidationError {}
