//! Record store: persistence of synchronized subsidies into the local
//! record system (records, custom fields, taxonomy terms).
//!
//! This module is split into three submodules:
//! - `model`: record composition (title/body/excerpt precedence, field
//!   mapping) and row views.
//! - `repo`: SQL-only functions that map rows into entities.
//! - `taxonomy`: the fixed industry→category and prefecture lookup tables.

pub mod model;
pub mod repo;
pub mod taxonomy;

pub use model::{NewRecord, RecordCounts, RecordRow, RecordStatus};
pub use repo::*;
