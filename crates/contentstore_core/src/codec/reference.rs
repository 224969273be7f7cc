//! Entity-reference codec: stores the referenced entity id.

use super::{json_type_name, AttributeCodec, CodecError, CodecResult, EntityLookup};
use crate::model::entity::EntityId;
use crate::model::value::TypedValue;
use serde_json::Value as JsonValue;

/// Stores an entity id; decoding loads the entity through the lookup.
///
/// Input may be a positive id, a numeric string or an object carrying `id`.
/// A dangling reference decodes to `None`.
pub struct ReferenceCodec;

fn positive_id(value: &JsonValue) -> Option<EntityId> {
    let id = match value {
        JsonValue::Number(number) => number.as_i64(),
        JsonValue::String(text) => text.trim().parse::<i64>().ok(),
        JsonValue::Object(map) => return map.get("id").and_then(positive_id),
        _ => None,
    }?;
    (id > 0).then_some(id)
}

impl AttributeCodec for ReferenceCodec {
    fn serialize(&self, value: &JsonValue) -> CodecResult<String> {
        positive_id(value)
            .map(|id| id.to_string())
            .ok_or(CodecError::TypeMismatch {
                expected: "entity id",
                found: json_type_name(value),
            })
    }

    fn deserialize(
        &self,
        raw: &str,
        lookup: &dyn EntityLookup,
    ) -> CodecResult<Option<TypedValue>> {
        let id = raw
            .trim()
            .parse::<EntityId>()
            .map_err(|_| CodecError::InvalidStoredValue {
                expected: "entity id",
                raw: raw.to_string(),
            })?;
        Ok(lookup
            .find_entity(id)?
            .map(|entity| TypedValue::Entity(Box::new(entity))))
    }

    fn is_reference(&self) -> bool {
        true
    }
}
