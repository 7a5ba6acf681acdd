//! Database module: query models and SQL repositories.
//!
//! - `model`: filter shapes passed into repositories.
//! - `repo`: SQL-only functions that map rows into `crate::model` entities.
//!
//! The repository API is re-exported at `crate::db::*`.

pub mod model;
pub mod repo;

pub use model::DataRequestsFilter;
pub use repo::*;
