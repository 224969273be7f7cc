//! Domain model for the EAV content store.
//!
//! # Responsibility
//! - Define entity, attribute definition/value and placement records.
//! - Define the typed value returned by attribute reads.
//! - Validate request payloads before any storage access.
//!
//! # Invariants
//! - Every entity is identified by a positive storage-assigned `EntityId`.
//! - Deletion is represented by `deleted_at` tombstones, not hard delete.

pub mod attribute;
pub mod entity;
pub mod placement;
pub mod value;
