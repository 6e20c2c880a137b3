//! The storage contract consumed by the repository.
//!
//! A backend owns raw records for a set of models. The repository never
//! talks to storage directly: it asks the backend for rows and hands it
//! projected rows to write. Atomicity, transactions and retries are the
//! backend's business.

use crate::config::ModelConfig;
use crate::error::Result;
use crate::query::{Condition, Query};
use crate::row::Row;
use crate::value::Value;

/// Raw record I/O for the models a backend serves.
pub trait Backend {
    /// Identifier, unique within one repository.
    fn identifier(&self) -> &str;

    /// Configs of the models this backend serves.
    fn configs(&self) -> Vec<ModelConfig>;

    /// Configs of bridge models used by many-to-many relations.
    fn junctions(&self) -> Vec<ModelConfig> {
        Vec::new()
    }

    /// Fetch one record by its identity columns.
    ///
    /// Fails with `Error::NotFound` when no record exists.
    fn get(&mut self, id: &Row, config: &ModelConfig) -> Result<Row>;

    /// Fetch the records selected by `query`.
    fn all(&mut self, config: &ModelConfig, query: &Query) -> Result<Vec<Row>>;

    /// Fetch the records whose `reference` column equals `id`, further
    /// narrowed by `query`.
    fn related(
        &mut self,
        config: &ModelConfig,
        reference: &str,
        id: &Value,
        query: &Query,
    ) -> Result<Vec<Row>> {
        let mut query = query.clone();
        query.conditions.push(Condition::eq(reference, id.clone()));
        self.all(config, &query)
    }

    /// Insert a record; returns it with generated columns filled in.
    fn add(&mut self, data: Row, config: &ModelConfig) -> Result<Row>;

    /// Replace `old` with `new`; returns the stored record.
    fn update(&mut self, new: Row, old: &Row, config: &ModelConfig) -> Result<Row>;

    /// Remove a record. Fails unless exactly one record is affected.
    fn delete(&mut self, data: &Row, config: &ModelConfig) -> Result<()>;
}
