//! J-Grants synchronization pipeline: fetch subsidy listings from the
//! J-Grants public API, optionally enrich them with Gemini-generated
//! content, and persist them as draft records with taxonomy terms.

pub mod config;
pub mod gemini;
pub mod jgrants;
pub mod model;
pub mod store;
pub mod sync;
