//! Placement record of an entity in the hierarchy.
//!
//! # Invariants
//! - At most one placement exists per entity.
//! - `C` is listed in `P.children` iff `C.parent_id == P`; both sides are
//!   only ever written together.

use crate::model::entity::EntityId;
use serde::{Deserialize, Serialize};

/// Parent pointer plus ordered children set of one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub id: i64,
    pub entity_id: EntityId,
    /// `None` for root entities.
    pub parent_id: Option<EntityId>,
    /// Child ids in insertion order, without duplicates.
    pub children: Vec<EntityId>,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl Placement {
    pub fn contains_child(&self, child_id: EntityId) -> bool {
        self.children.contains(&child_id)
    }
}

/// Which children to load for an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildrenMode {
    /// Own children followed by the original's children when this is an alias.
    CurrentAndOriginal,
    /// Only children placed directly under this entity.
    #[default]
    Current,
    /// Only the original's children; the entity must be an alias.
    Original,
}

impl ChildrenMode {
    /// Maps the numeric mode codes used by request payloads.
    ///
    /// `1` current+original, `2` current, `3` original.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::CurrentAndOriginal),
            2 => Some(Self::Current),
            3 => Some(Self::Original),
            _ => None,
        }
    }
}
