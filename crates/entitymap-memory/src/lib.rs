//! In-memory backend for entitymap.
//!
//! `entitymap-memory` keeps one table of rows per model and evaluates
//! [`Query`] descriptions with [`Query::apply`]. It exists for tests,
//! prototypes and as the reference implementation of the [`Backend`]
//! contract.
//!
//! Every call is appended to a shared [`CallLog`], so tests can assert on
//! the exact I/O a repository operation performed:
//!
//! ```ignore
//! let backend = MemoryBackend::new("db").with_model(customer_config());
//! let handle = backend.handle();
//! repo.register_backend(Box::new(backend))?;
//!
//! repo.get("Customer", 1, &GetOptions::default())?;
//! assert_eq!(handle.count(CallKind::Get), 1);
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use entitymap_core::{Backend, Condition, Error, ModelConfig, Query, Result, Row, Value};

// ============================================================================
// Call Log
// ============================================================================

/// Kind of backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    /// `Backend::get`
    Get,
    /// `Backend::all`
    All,
    /// `Backend::related`
    Related,
    /// `Backend::add`
    Add,
    /// `Backend::update`
    Update,
    /// `Backend::delete`
    Delete,
}

impl CallKind {
    /// True for calls that modify stored rows.
    pub const fn is_write(self) -> bool {
        matches!(self, CallKind::Add | CallKind::Update | CallKind::Delete)
    }
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// What was called.
    pub kind: CallKind,
    /// Model the call was made for.
    pub model: String,
    /// Identity for `Get`, the written row for `Add`/`Update`/`Delete`,
    /// and an empty row for reads.
    pub row: Row,
}

/// Ordered record of every call made against a [`MemoryBackend`].
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Vec<Call>,
}

impl CallLog {
    /// All calls in order.
    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    /// Number of calls of `kind`.
    pub fn count(&self, kind: CallKind) -> usize {
        self.calls.iter().filter(|c| c.kind == kind).count()
    }

    /// Number of calls of `kind` for `model`.
    pub fn count_for(&self, kind: CallKind, model: &str) -> usize {
        self.calls
            .iter()
            .filter(|c| c.kind == kind && c.model == model)
            .count()
    }

    /// Calls that modified stored rows.
    pub fn writes(&self) -> Vec<&Call> {
        self.calls.iter().filter(|c| c.kind.is_write()).collect()
    }

    fn push(&mut self, kind: CallKind, model: &str, row: Row) {
        self.calls.push(Call {
            kind,
            model: model.to_string(),
            row,
        });
    }
}

// ============================================================================
// Shared State
// ============================================================================

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

impl Table {
    fn position(&self, identity: &[String], key: &Row) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| {
                identity.iter().all(|column| {
                    row.get_or_null(column)
                        .loosely_equals(&key.get_or_null(column))
                })
            })
            .map(|(i, _)| i)
            .collect()
    }

    fn assign_identity(&mut self, identity: &[String], row: &mut Row) {
        let [column] = identity else {
            return;
        };
        match row.get(column).and_then(Value::as_i64) {
            Some(explicit) => self.next_id = self.next_id.max(explicit),
            None if row.get_or_null(column).is_null() => {
                self.next_id += 1;
                row.insert(column.clone(), Value::Int(self.next_id));
            }
            None => {}
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: BTreeMap<String, Table>,
    log: CallLog,
    fail_next_write: Option<String>,
}

/// Cloneable handle onto the rows and call log of a [`MemoryBackend`].
///
/// The backend itself is moved into the repository at registration; keep
/// a handle to seed tables and to inspect what happened.
#[derive(Debug, Clone, Default)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHandle {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a row without logging a call. A NULL single-column integer
    /// identity is auto-assigned.
    pub fn seed(&self, config: &ModelConfig, row: Row) -> Row {
        let mut row = row;
        let mut state = self.lock();
        let table = state.tables.entry(config.name.clone()).or_default();
        table.assign_identity(&config.identity, &mut row);
        table.rows.push(row.clone());
        row
    }

    /// Merge `row` into the stored row with the same identity, as another
    /// writer would. Not logged. Returns false when no row matched.
    pub fn touch(&self, config: &ModelConfig, row: &Row) -> bool {
        let mut state = self.lock();
        let Some(table) = state.tables.get_mut(&config.name) else {
            return false;
        };
        match table.position(&config.identity, row).first() {
            Some(&i) => {
                table.rows[i].merge(row);
                true
            }
            None => false,
        }
    }

    /// Current rows of `model`, in insertion order.
    pub fn rows(&self, model: &str) -> Vec<Row> {
        self.lock()
            .tables
            .get(model)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Snapshot of the call log.
    pub fn log(&self) -> CallLog {
        self.lock().log.clone()
    }

    /// Number of calls of `kind` so far.
    pub fn count(&self, kind: CallKind) -> usize {
        self.lock().log.count(kind)
    }

    /// Number of calls of `kind` for `model` so far.
    pub fn count_for(&self, kind: CallKind, model: &str) -> usize {
        self.lock().log.count_for(kind, model)
    }

    /// Forget every recorded call.
    pub fn clear_log(&self) {
        self.lock().log = CallLog::default();
    }

    /// Make the next `add`, `update` or `delete` fail with `message`.
    pub fn fail_next_write(&self, message: impl Into<String>) {
        self.lock().fail_next_write = Some(message.into());
    }
}

// ============================================================================
// Backend
// ============================================================================

/// A [`Backend`] that stores rows in memory.
#[derive(Debug)]
pub struct MemoryBackend {
    identifier: String,
    configs: Vec<ModelConfig>,
    junctions: Vec<ModelConfig>,
    handle: MemoryHandle,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            configs: Vec::new(),
            junctions: Vec::new(),
            handle: MemoryHandle::default(),
        }
    }

    /// Serve `config`.
    #[must_use]
    pub fn with_model(mut self, config: ModelConfig) -> Self {
        self.configs.push(config);
        self
    }

    /// Serve `config` as a junction model.
    #[must_use]
    pub fn with_junction(mut self, config: ModelConfig) -> Self {
        self.junctions.push(config);
        self
    }

    /// Handle sharing this backend's state.
    pub fn handle(&self) -> MemoryHandle {
        self.handle.clone()
    }

    fn check_write(&self, state: &mut MemoryState) -> Result<()> {
        match state.fail_next_write.take() {
            Some(message) => Err(Error::backend(&self.identifier, message)),
            None => Ok(()),
        }
    }
}

impl Backend for MemoryBackend {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn configs(&self) -> Vec<ModelConfig> {
        self.configs.clone()
    }

    fn junctions(&self) -> Vec<ModelConfig> {
        self.junctions.clone()
    }

    fn get(&mut self, id: &Row, config: &ModelConfig) -> Result<Row> {
        let mut state = self.handle.lock();
        state.log.push(CallKind::Get, &config.name, id.clone());
        tracing::debug!(backend = %self.identifier, model = %config.name, "get");

        let table = state.tables.get(&config.name);
        let found = table.and_then(|t| {
            t.position(&config.identity, id)
                .first()
                .map(|&i| t.rows[i].clone())
        });
        found.ok_or_else(|| {
            let detail: Vec<String> = id.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
            Error::not_found(&config.name, detail.join(", "))
        })
    }

    fn all(&mut self, config: &ModelConfig, query: &Query) -> Result<Vec<Row>> {
        let mut state = self.handle.lock();
        state.log.push(CallKind::All, &config.name, Row::new());
        tracing::debug!(
            backend = %self.identifier,
            model = %config.name,
            conditions = query.conditions.len(),
            "all"
        );

        let rows = state
            .tables
            .get(&config.name)
            .map(|t| t.rows.clone())
            .unwrap_or_default();
        Ok(query.apply(rows))
    }

    fn related(
        &mut self,
        config: &ModelConfig,
        reference: &str,
        id: &Value,
        query: &Query,
    ) -> Result<Vec<Row>> {
        let mut state = self.handle.lock();
        state.log.push(
            CallKind::Related,
            &config.name,
            Row::new().with(reference, id.clone()),
        );
        tracing::debug!(backend = %self.identifier, model = %config.name, reference, "related");

        let query = query.clone().filter(Condition::eq(reference, id.clone()));
        let rows = state
            .tables
            .get(&config.name)
            .map(|t| t.rows.clone())
            .unwrap_or_default();
        Ok(query.apply(rows))
    }

    fn add(&mut self, data: Row, config: &ModelConfig) -> Result<Row> {
        let mut state = self.handle.lock();
        state.log.push(CallKind::Add, &config.name, data.clone());
        self.check_write(&mut state)?;

        let mut row = data;
        let table = state.tables.entry(config.name.clone()).or_default();
        table.assign_identity(&config.identity, &mut row);
        if !table.position(&config.identity, &row).is_empty() {
            return Err(Error::backend(
                &self.identifier,
                format!("duplicate identity for {}", config.name),
            ));
        }
        table.rows.push(row.clone());
        tracing::info!(backend = %self.identifier, model = %config.name, "row added");
        Ok(row)
    }

    fn update(&mut self, new: Row, old: &Row, config: &ModelConfig) -> Result<Row> {
        let mut state = self.handle.lock();
        state.log.push(CallKind::Update, &config.name, new.clone());
        self.check_write(&mut state)?;

        let table = state.tables.entry(config.name.clone()).or_default();
        let matches = table.position(&config.identity, old);
        let [position] = matches.as_slice() else {
            return Err(Error::backend(
                &self.identifier,
                format!("update of {} affected {} rows", config.name, matches.len()),
            ));
        };
        let mut stored = table.rows[*position].clone();
        stored.merge(&new);
        table.rows[*position] = stored.clone();
        tracing::info!(backend = %self.identifier, model = %config.name, "row updated");
        Ok(stored)
    }

    fn delete(&mut self, data: &Row, config: &ModelConfig) -> Result<()> {
        let mut state = self.handle.lock();
        state.log.push(CallKind::Delete, &config.name, data.clone());
        self.check_write(&mut state)?;

        let table = state.tables.entry(config.name.clone()).or_default();
        let matches = table.position(&config.identity, data);
        let [position] = matches.as_slice() else {
            return Err(Error::backend(
                &self.identifier,
                format!("delete of {} affected {} rows", config.name, matches.len()),
            ));
        };
        table.rows.remove(*position);
        tracing::info!(backend = %self.identifier, model = %config.name, "row deleted");
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
