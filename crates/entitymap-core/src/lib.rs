//! Core types and traits for entitymap.
//!
//! `entitymap-core` is the contract layer shared by the repository engine
//! and by backends. It defines what a record looks like on the wire
//! (`Row` of `Value`s), how a model maps onto those records
//! (`ModelConfig` and its relation specs), and what a backend must
//! provide (`Backend`).
//!
//! # Who Uses This Crate
//!
//! - `entitymap-repository` consumes `ModelConfig` and `Backend` to run the
//!   identity map and the save/delete cascade.
//! - Backend crates (`entitymap-memory`) implement `Backend` and evaluate
//!   `Query` descriptions.
//!
//! Most applications should use the `entitymap` facade; reach for
//! `entitymap-core` directly when writing a backend.

pub mod backend;
pub mod config;
pub mod error;
pub mod filter;
pub mod query;
pub mod row;
pub mod validate;
pub mod value;

pub use backend::Backend;
pub use config::{BelongsToSpec, HasManySpec, JunctionSpec, ModelConfig, PropertyKind};
pub use error::{Error, Result};
pub use filter::ValueFilter;
pub use query::{Condition, Operator, Order, Query};
pub use row::Row;
pub use validate::{
    IDENTIFIER_PATTERN, Registered, matches_pattern, reciprocal_relation, validate_backend_configs,
    validate_identifier,
};
pub use value::Value;
