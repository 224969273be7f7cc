//! Typed attribute values returned by attribute reads.

use crate::model::entity::Entity;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Deserialized value of one attribute, tagged by codec family.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    String(String),
    Text(String),
    Number(f64),
    Flag(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Json(JsonValue),
    Coords(Coords),
    /// Referenced entity resolved by an `entity-reference` attribute.
    Entity(Box<Entity>),
}

impl TypedValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) | Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<&Entity> {
        match self {
            Self::Entity(entity) => Some(entity.as_ref()),
            _ => None,
        }
    }

    /// JSON rendering used by views.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

/// Three-component coordinate; components may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coords {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

impl Coords {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// Reads `{x, y, z}` objects or `[x, y, z]` arrays.
    ///
    /// Missing components become `None`. Returns `None` for any other shape,
    /// for unknown object keys, for arrays longer than three and for
    /// non-numeric components.
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Object(map) => {
                if map.keys().any(|key| !matches!(key.as_str(), "x" | "y" | "z")) {
                    return None;
                }
                Some(Self {
                    x: component(map.get("x"))?,
                    y: component(map.get("y"))?,
                    z: component(map.get("z"))?,
                })
            }
            JsonValue::Array(items) if items.len() <= 3 => Some(Self {
                x: component(items.first())?,
                y: component(items.get(1))?,
                z: component(items.get(2))?,
            }),
            _ => None,
        }
    }
}

// Outer `None` is a shape mismatch, inner `None` a missing component.
fn component(value: Option<&JsonValue>) -> Option<Option<f64>> {
    match value {
        None | Some(JsonValue::Null) => Some(None),
        Some(JsonValue::Number(number)) => number.as_f64().map(Some),
        Some(_) => None,
    }
}
