//! Attribute codecs: typed value <-> stored text.
//!
//! # Responsibility
//! - Define the single capability interface every attribute kind implements.
//! - Select codec implementations at runtime by the definition's kind string.
//! - Apply catalog nullability before a value reaches a codec.
//!
//! # Invariants
//! - An empty raw value always decodes to `None`, for every kind.
//! - `null` encodes to an empty raw value only for nullable kinds.
//! - Codecs never touch storage except through [`EntityLookup`].

use crate::config::AttributeTypeCatalog;
use crate::model::entity::{Entity, EntityId};
use crate::model::value::TypedValue;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

mod reference;
mod scalar;
mod structured;

pub use reference::ReferenceCodec;
pub use scalar::{DateCodec, FlagCodec, NumberCodec, StringCodec};
pub use structured::{CoordsCodec, JsonCodec};

pub type CodecResult<T> = Result<T, CodecError>;

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input shape does not match what the codec accepts.
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    /// Persisted raw text cannot be decoded.
    InvalidStoredValue { expected: &'static str, raw: String },
    /// No codec is registered or derivable for the kind.
    UnknownCodec(String),
    /// Reference lookup failed in storage.
    Lookup(String),
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TypeMismatch { expected, found } => {
                write!(f, "incorrect data type {found}, expected {expected}")
            }
            Self::InvalidStoredValue { expected, raw } => {
                write!(f, "stored value `{raw}` is not a valid {expected}")
            }
            Self::UnknownCodec(kind) => write!(f, "no codec for attribute type `{kind}`"),
            Self::Lookup(message) => write!(f, "reference lookup failed: {message}"),
        }
    }
}

impl Error for CodecError {}

/// Read access to entities for reference codecs.
pub trait EntityLookup {
    /// Returns the active entity with `id`, if any.
    fn find_entity(&self, id: EntityId) -> CodecResult<Option<Entity>>;
}

/// Lookup that never finds anything; for contexts without storage.
pub struct NoLookup;

impl EntityLookup for NoLookup {
    fn find_entity(&self, _id: EntityId) -> CodecResult<Option<Entity>> {
        Ok(None)
    }
}

/// Serialize/deserialize strategy of one attribute kind.
pub trait AttributeCodec: Send + Sync {
    /// Encodes a non-null value to its stored text.
    fn serialize(&self, value: &JsonValue) -> CodecResult<String>;

    /// Decodes non-empty stored text.
    fn deserialize(&self, raw: &str, lookup: &dyn EntityLookup)
        -> CodecResult<Option<TypedValue>>;

    /// Whether stored text is an entity id, so predicates need a join.
    fn is_reference(&self) -> bool {
        false
    }
}

/// Kind-name to codec mapping, built from an attribute-type catalog.
pub struct CodecRegistry {
    catalog: AttributeTypeCatalog,
    codecs: BTreeMap<String, Arc<dyn AttributeCodec>>,
}

impl CodecRegistry {
    /// Builds a registry with the built-in codecs plus one derived codec for
    /// every catalog kind without a built-in implementation.
    pub fn new(catalog: AttributeTypeCatalog) -> Self {
        let mut codecs: BTreeMap<String, Arc<dyn AttributeCodec>> = BTreeMap::new();
        codecs.insert("string".to_string(), Arc::new(StringCodec::plain()));
        codecs.insert("text".to_string(), Arc::new(StringCodec::long_text()));
        codecs.insert("number".to_string(), Arc::new(NumberCodec));
        codecs.insert("flag".to_string(), Arc::new(FlagCodec));
        codecs.insert("date".to_string(), Arc::new(DateCodec::date()));
        codecs.insert("datetime".to_string(), Arc::new(DateCodec::datetime()));
        codecs.insert("options".to_string(), Arc::new(JsonCodec));
        codecs.insert("json".to_string(), Arc::new(JsonCodec));
        codecs.insert("coords".to_string(), Arc::new(CoordsCodec));
        codecs.insert("entity-reference".to_string(), Arc::new(ReferenceCodec));

        for (kind, spec) in catalog.kinds() {
            if codecs.contains_key(kind) {
                continue;
            }
            let derived: Arc<dyn AttributeCodec> = if spec.encoding == "json" {
                Arc::new(JsonCodec)
            } else {
                match spec.cast.as_str() {
                    "float" | "int" | "integer" | "number" => Arc::new(NumberCodec),
                    "bool" | "boolean" => Arc::new(FlagCodec),
                    _ => Arc::new(StringCodec::plain()),
                }
            };
            codecs.insert(kind.to_string(), derived);
        }

        Self { catalog, codecs }
    }

    /// Registry over the built-in catalog.
    pub fn builtin() -> Self {
        Self::new(AttributeTypeCatalog::builtin())
    }

    /// Registers or replaces the codec of one kind.
    pub fn register(&mut self, kind: impl Into<String>, codec: Arc<dyn AttributeCodec>) {
        self.codecs.insert(kind.into(), codec);
    }

    pub fn catalog(&self) -> &AttributeTypeCatalog {
        &self.catalog
    }

    pub fn supports(&self, kind: &str) -> bool {
        self.codecs.contains_key(kind)
    }

    pub fn codec(&self, kind: &str) -> CodecResult<&dyn AttributeCodec> {
        self.codecs
            .get(kind)
            .map(|codec| codec.as_ref())
            .ok_or_else(|| CodecError::UnknownCodec(kind.to_string()))
    }

    pub fn is_reference(&self, kind: &str) -> bool {
        self.codecs
            .get(kind)
            .is_some_and(|codec| codec.is_reference())
    }

    /// Kinds are nullable unless the catalog says otherwise.
    pub fn is_nullable(&self, kind: &str) -> bool {
        self.catalog.get(kind).map_or(true, |spec| spec.nullable)
    }

    /// Encodes `value` for `kind`; `null` becomes `""` for nullable kinds.
    pub fn serialize(&self, kind: &str, value: &JsonValue) -> CodecResult<String> {
        let codec = self.codec(kind)?;
        if value.is_null() {
            if self.is_nullable(kind) {
                return Ok(String::new());
            }
            return Err(CodecError::TypeMismatch {
                expected: "non-null value",
                found: "null",
            });
        }
        codec.serialize(value)
    }

    /// Decodes stored text for `kind`; empty text is `None`.
    pub fn deserialize(
        &self,
        kind: &str,
        raw: &str,
        lookup: &dyn EntityLookup,
    ) -> CodecResult<Option<TypedValue>> {
        let codec = self.codec(kind)?;
        if raw.is_empty() {
            return Ok(None);
        }
        codec.deserialize(raw, lookup)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Short JSON type name used in mismatch diagnostics.
pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
