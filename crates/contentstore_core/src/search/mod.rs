//! Entity search entry points.
//!
//! # Responsibility
//! - Turn flat predicate maps into parameterized SQL over entities.
//! - Keep predicate classification next to the definition registry.

pub mod query;
