//! JSON-encoded codecs: free-form structures and coordinates.

use super::{json_type_name, AttributeCodec, CodecError, CodecResult, EntityLookup};
use crate::model::value::{Coords, TypedValue};
use serde_json::Value as JsonValue;

/// Stores any JSON value as its compact text.
pub struct JsonCodec;

impl AttributeCodec for JsonCodec {
    fn serialize(&self, value: &JsonValue) -> CodecResult<String> {
        serde_json::to_string(value).map_err(|_| CodecError::TypeMismatch {
            expected: "json value",
            found: json_type_name(value),
        })
    }

    fn deserialize(
        &self,
        raw: &str,
        _lookup: &dyn EntityLookup,
    ) -> CodecResult<Option<TypedValue>> {
        serde_json::from_str::<JsonValue>(raw)
            .map(|value| Some(TypedValue::Json(value)))
            .map_err(|_| CodecError::InvalidStoredValue {
                expected: "json",
                raw: raw.to_string(),
            })
    }
}

/// Stores `{x, y, z}` coordinates; arrays are normalized to objects.
pub struct CoordsCodec;

impl AttributeCodec for CoordsCodec {
    fn serialize(&self, value: &JsonValue) -> CodecResult<String> {
        let mismatch = || CodecError::TypeMismatch {
            expected: "coords object or array",
            found: json_type_name(value),
        };
        let coords = Coords::from_json(value).ok_or_else(mismatch)?;
        serde_json::to_string(&coords).map_err(|_| mismatch())
    }

    fn deserialize(
        &self,
        raw: &str,
        _lookup: &dyn EntityLookup,
    ) -> CodecResult<Option<TypedValue>> {
        serde_json::from_str::<JsonValue>(raw)
            .ok()
            .as_ref()
            .and_then(Coords::from_json)
            .map(|coords| Some(TypedValue::Coords(coords)))
            .ok_or_else(|| CodecError::InvalidStoredValue {
                expected: "coords",
                raw: raw.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::{CoordsCodec, JsonCodec};
    use crate::codec::{AttributeCodec, NoLookup};
    use crate::model::value::{Coords, TypedValue};
    use serde_json::json;

    #[test]
    fn json_codec_keeps_structure() {
        let raw = JsonCodec.serialize(&json!({"k": [1, "two"]})).unwrap();
        assert_eq!(raw, r#"{"k":[1,"two"]}"#);
        assert_eq!(
            JsonCodec.deserialize(&raw, &NoLookup).unwrap(),
            Some(TypedValue::Json(json!({"k": [1, "two"]})))
        );
        assert!(JsonCodec.deserialize("{broken", &NoLookup).is_err());
    }

    #[test]
    fn coords_codec_normalizes_arrays_and_partial_input() {
        let raw = CoordsCodec.serialize(&json!([1, 2])).unwrap();
        assert_eq!(
            CoordsCodec.deserialize(&raw, &NoLookup).unwrap(),
            Some(TypedValue::Coords(Coords {
                x: Some(1.0),
                y: Some(2.0),
                z: None,
            }))
        );
        assert!(CoordsCodec.serialize(&json!({"lat": 1})).is_err());
        assert!(CoordsCodec.serialize(&json!("1,2,3")).is_err());
        assert!(CoordsCodec.deserialize("[1,2,3,4]", &NoLookup).is_err());
    }
}
