//! Predicate-map query composer over entities and attribute values.
//!
//! # Responsibility
//! - Split a flat predicate map into core-column and attribute predicates.
//! - Build one parameterized statement that ANDs every predicate.
//! - Answer the identity probe used by create-time uniqueness checks.
//!
//! # Invariants
//! - Soft-deleted entities never match.
//! - Results are ordered by entity id.
//! - Column names are only interpolated after matching a core attribute name;
//!   every value is bound as a parameter.

use crate::codec::CodecError;
use crate::model::attribute::DefinitionId;
use crate::model::entity::{is_core_attribute, Entity, Values};
use crate::repo::definition_repo::DefinitionRegistry;
use crate::repo::entity_repo::{parse_entity_row, ENTITY_COLUMNS};
use crate::repo::value_repo::SqliteValueStore;
use crate::repo::{RepoError, RepoResult};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde_json::Value as JsonValue;

/// SQL text plus positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedQuery {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Identity of an entity as checked before create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityProbe {
    pub kind: String,
    pub title: String,
    /// Encoded values of required attributes supplied by the caller.
    pub attributes: Vec<(DefinitionId, String)>,
}

/// Builds and runs entity searches from predicate maps.
pub struct QueryComposer<'a, 'conn> {
    conn: &'conn Connection,
    values: &'a SqliteValueStore<'conn>,
}

impl<'a, 'conn> QueryComposer<'a, 'conn> {
    pub fn new(conn: &'conn Connection, values: &'a SqliteValueStore<'conn>) -> Self {
        Self { conn, values }
    }

    /// Composes the search statement for `predicates`.
    ///
    /// Returns `None` when the predicates can never match, i.e. a typed search
    /// names an attribute the type does not define.
    pub fn compose(&self, predicates: &Values) -> RepoResult<Option<ComposedQuery>> {
        let mut clauses = vec!["e.deleted_at IS NULL".to_string()];
        let mut params = Vec::new();

        let model_type = match predicates.get("type") {
            Some(JsonValue::String(kind)) => Some(kind.as_str()),
            _ => None,
        };

        for (name, value) in predicates {
            if is_core_attribute(name) {
                push_core_clause("e", name, value, &mut clauses, &mut params)?;
                continue;
            }

            let clause = match model_type {
                Some(kind) => self.typed_attribute_clause(kind, name, value, &mut params)?,
                None => Some(untyped_attribute_clause(name, value, &mut params)),
            };
            match clause {
                Some(clause) => clauses.push(clause),
                None => {
                    debug!(
                        "event=entity_search module=search status=empty reason=undefined_attribute name={}",
                        name
                    );
                    return Ok(None);
                }
            }
        }

        let sql = format!(
            "SELECT {ENTITY_COLUMNS}
             FROM entities e
             WHERE {}
             ORDER BY e.id ASC;",
            clauses.join("\n               AND ")
        );
        Ok(Some(ComposedQuery { sql, params }))
    }

    /// Active entities matching every predicate, by id.
    pub fn search(&self, predicates: &Values) -> RepoResult<Vec<Entity>> {
        let Some(query) = self.compose(predicates)? else {
            return Ok(Vec::new());
        };

        let mut stmt = self.conn.prepare(&query.sql)?;
        let mut rows = stmt.query(params_from_iter(query.params))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(parse_entity_row(row)?);
        }
        Ok(entities)
    }

    /// Returns whether an active entity matches `probe` on every attribute.
    ///
    /// Each candidate scores `1 + matched attribute rows`; a full match scores
    /// `1 + probe.attributes.len()`.
    pub fn identity_exists(&self, probe: &IdentityProbe) -> RepoResult<bool> {
        let mut params = Vec::new();
        let score = if probe.attributes.is_empty() {
            "1".to_string()
        } else {
            let mut matches = Vec::with_capacity(probe.attributes.len());
            for (definition_id, raw_value) in &probe.attributes {
                matches.push("(v.attribute_definition_id = ? AND v.value = ?)");
                params.push(Value::Integer(*definition_id));
                params.push(Value::Text(raw_value.clone()));
            }
            format!(
                "1 + (SELECT COUNT(*)
                      FROM attribute_values v
                      WHERE v.entity_id = e.id
                        AND ({}))",
                matches.join(" OR ")
            )
        };

        params.push(Value::Text(probe.kind.clone()));
        params.push(Value::Text(probe.title.clone()));

        let sql = format!(
            "SELECT {score} AS score
             FROM entities e
             WHERE e.type = ?
               AND e.title = ?
               AND e.deleted_at IS NULL;"
        );

        let expected = 1 + probe.attributes.len() as i64;
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        while let Some(row) = rows.next()? {
            if row.get::<_, i64>(0)? == expected {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn typed_attribute_clause(
        &self,
        model_type: &str,
        name: &str,
        value: &JsonValue,
        params: &mut Vec<Value>,
    ) -> RepoResult<Option<String>> {
        let Some(definition) = self.values.registry().get(name, model_type)? else {
            return Ok(None);
        };
        params.push(Value::Integer(definition.id));

        if value.is_null() {
            return Ok(Some(
                "NOT EXISTS (SELECT 1
                    FROM attribute_values v
                    WHERE v.entity_id = e.id
                      AND v.attribute_definition_id = ?
                      AND v.value <> '')"
                    .to_string(),
            ));
        }

        let codecs = self.values.codecs();
        if let JsonValue::Object(fields) = value {
            if codecs.is_reference(&definition.kind) && fields.keys().any(|key| key != "id") {
                let mut joined = vec!["r.deleted_at IS NULL".to_string()];
                for (field, field_value) in fields {
                    if !is_core_attribute(field) {
                        return Err(RepoError::InvalidPredicate(format!(
                            "`{name}.{field}` is not a core field of the referenced entity"
                        )));
                    }
                    push_core_clause("r", field, field_value, &mut joined, params)?;
                }
                return Ok(Some(format!(
                    "EXISTS (SELECT 1
                    FROM attribute_values v
                    INNER JOIN entities r ON r.id = CAST(v.value AS INTEGER)
                    WHERE v.entity_id = e.id
                      AND v.attribute_definition_id = ?
                      AND {})",
                    joined.join(" AND ")
                )));
            }
        }

        let raw_value = codecs
            .serialize(&definition.kind, value)
            .map_err(|source| match source {
                CodecError::TypeMismatch { .. } => RepoError::TypeMismatch {
                    name: name.to_string(),
                    source,
                },
                other => RepoError::Codec(other),
            })?;
        params.push(Value::Text(raw_value));
        Ok(Some(
            "EXISTS (SELECT 1
                    FROM attribute_values v
                    WHERE v.entity_id = e.id
                      AND v.attribute_definition_id = ?
                      AND v.value = ?)"
                .to_string(),
        ))
    }
}

fn untyped_attribute_clause(name: &str, value: &JsonValue, params: &mut Vec<Value>) -> String {
    params.push(Value::Text(name.to_string()));
    let (quantifier, value_clause) = if value.is_null() {
        ("NOT EXISTS", "v.value <> ''")
    } else {
        params.push(Value::Text(canonical_text(value)));
        ("EXISTS", "v.value = ?")
    };
    format!(
        "{quantifier} (SELECT 1
                    FROM attribute_values v
                    INNER JOIN attribute_definitions d ON d.id = v.attribute_definition_id
                    WHERE v.entity_id = e.id
                      AND d.name = ?
                      AND d.model_type = e.type
                      AND d.deleted_at IS NULL
                      AND {value_clause})"
    )
}

fn push_core_clause(
    alias: &str,
    column: &str,
    value: &JsonValue,
    clauses: &mut Vec<String>,
    params: &mut Vec<Value>,
) -> RepoResult<()> {
    let sql_value = match value {
        JsonValue::Null => {
            clauses.push(format!("{alias}.{column} IS NULL"));
            return Ok(());
        }
        JsonValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        JsonValue::Number(number) => match number.as_i64() {
            Some(integer) => Value::Integer(integer),
            None => Value::Real(number.as_f64().unwrap_or_default()),
        },
        JsonValue::String(text) => Value::Text(text.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            return Err(RepoError::InvalidPredicate(format!(
                "core field `{column}` only accepts scalar values"
            )));
        }
    };
    clauses.push(format!("{alias}.{column} = ?"));
    params.push(sql_value);
    Ok(())
}

/// Stored-text form of a value compared without codec knowledge.
pub fn canonical_text(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::Bool(flag) => if *flag { "1" } else { "0" }.to_string(),
        JsonValue::Number(number) => number
            .as_f64()
            .map(|float| float.to_string())
            .unwrap_or_else(|| number.to_string()),
        JsonValue::String(text) => text.clone(),
        JsonValue::Array(_) | JsonValue::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{canonical_text, QueryComposer};
    use crate::codec::CodecRegistry;
    use crate::db::open_db_in_memory;
    use crate::model::entity::Values;
    use crate::repo::value_repo::SqliteValueStore;
    use crate::repo::RepoError;
    use serde_json::json;
    use std::sync::Arc;

    fn values(pairs: &[(&str, serde_json::Value)]) -> Values {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn canonical_text_matches_codec_encodings() {
        assert_eq!(canonical_text(&json!("x")), "x");
        assert_eq!(canonical_text(&json!(true)), "1");
        assert_eq!(canonical_text(&json!(4)), "4");
        assert_eq!(canonical_text(&json!(4.5)), "4.5");
        assert_eq!(canonical_text(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn core_predicates_bind_values_and_map_null() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteValueStore::new(&conn, Arc::new(CodecRegistry::builtin()));
        let composer = QueryComposer::new(&conn, &store);

        let query = composer
            .compose(&values(&[("href", json!(null)), ("title", json!("Home"))]))
            .unwrap()
            .unwrap();
        assert!(query.sql.contains("e.href IS NULL"));
        assert!(query.sql.contains("e.title = ?"));
        assert!(query.sql.contains("ORDER BY e.id ASC"));
        assert_eq!(query.params.len(), 1);
    }

    #[test]
    fn undefined_attribute_in_typed_search_composes_nothing() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteValueStore::new(&conn, Arc::new(CodecRegistry::builtin()));
        let composer = QueryComposer::new(&conn, &store);

        let predicates = values(&[("type", json!("product")), ("color", json!("red"))]);
        assert_eq!(composer.compose(&predicates).unwrap(), None);
        assert!(composer.search(&predicates).unwrap().is_empty());
    }

    #[test]
    fn structured_core_predicates_are_rejected() {
        let conn = open_db_in_memory().unwrap();
        let store = SqliteValueStore::new(&conn, Arc::new(CodecRegistry::builtin()));
        let composer = QueryComposer::new(&conn, &store);

        assert!(matches!(
            composer.compose(&values(&[("title", json!(["a"]))])),
            Err(RepoError::InvalidPredicate(_))
        ));
    }
}
