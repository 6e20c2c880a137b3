//! Lazy collections.
//!
//! A [`Collection`] starts out as a backend [`Query`]. Filters, sort keys
//! and paging are pushed into the query for as long as it is pending.
//! Once realized, the collection is a list of identity-mapped handles and
//! further operations run in memory on projected rows. Realization is
//! one-way.

use std::sync::Arc;

use entitymap_core::{Condition, ModelConfig, Operator, Order, Query, Result, Value};

use crate::instance::InstanceId;
use crate::Repository;

#[derive(Debug, Clone)]
enum State {
    Pending(Query),
    Realized(Vec<InstanceId>),
}

/// Lazily evaluated, restartable sequence of instances of one model.
#[derive(Debug, Clone)]
pub struct Collection {
    config: Arc<ModelConfig>,
    state: State,
}

impl Collection {
    pub(crate) fn new(config: Arc<ModelConfig>) -> Self {
        Self {
            config,
            state: State::Pending(Query::new()),
        }
    }

    /// Model of the elements.
    pub fn model(&self) -> &str {
        &self.config.name
    }

    /// True once the elements were fetched.
    pub fn is_realized(&self) -> bool {
        matches!(self.state, State::Realized(_))
    }

    /// The backend query while the collection is pending.
    pub fn query(&self) -> Option<&Query> {
        match &self.state {
            State::Pending(query) => Some(query),
            State::Realized(_) => None,
        }
    }

    /// Keep the elements whose `property` satisfies `operator value`.
    ///
    /// A belongsTo property compares its foreign key.
    pub fn where_(
        self,
        repo: &mut Repository,
        property: &str,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Result<Self> {
        let condition = self
            .config
            .translate_condition(&Condition::new(property, operator, value))?;
        let Self { config, state } = self;
        match state {
            State::Pending(mut query) if !is_paged(&query) => {
                query.conditions.push(condition);
                Ok(Self {
                    config,
                    state: State::Pending(query),
                })
            }
            state => {
                let mut kept = Vec::new();
                for id in realize(&config, state, repo)? {
                    if condition.matches(&repo.project(id, &config)?) {
                        kept.push(id);
                    }
                }
                Ok(Self {
                    config,
                    state: State::Realized(kept),
                })
            }
        }
    }

    /// Sort by `property`. The most recent call is the primary key.
    pub fn order_by(self, repo: &mut Repository, property: &str, descending: bool) -> Result<Self> {
        let column = self
            .config
            .translate_condition(&Condition::eq(property, Value::Null))?
            .column;
        let key = Order { column, descending };
        let Self { config, state } = self;
        match state {
            State::Pending(mut query) if !is_paged(&query) => {
                query.order.insert(0, key);
                Ok(Self {
                    config,
                    state: State::Pending(query),
                })
            }
            state => {
                let ids = realize(&config, state, repo)?;
                let mut rows = Vec::with_capacity(ids.len());
                for id in ids {
                    rows.push((id, repo.project(id, &config)?));
                }
                let sort = Query {
                    order: vec![key],
                    ..Query::default()
                };
                rows.sort_by(|(_, a), (_, b)| sort.compare_rows(a, b));
                Ok(Self {
                    config,
                    state: State::Realized(rows.into_iter().map(|(id, _)| id).collect()),
                })
            }
        }
    }

    /// Skip the first `n` elements.
    #[must_use]
    pub fn offset(mut self, n: usize) -> Self {
        match &mut self.state {
            State::Pending(query) => {
                query.offset += n;
                query.limit = query.limit.map(|limit| limit.saturating_sub(n));
            }
            State::Realized(ids) => {
                ids.drain(..n.min(ids.len()));
            }
        }
        self
    }

    /// Keep at most `n` elements.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        match &mut self.state {
            State::Pending(query) => {
                query.limit = Some(query.limit.map_or(n, |limit| limit.min(n)));
            }
            State::Realized(ids) => ids.truncate(n),
        }
        self
    }

    /// Number of elements. A pending collection asks the backend without
    /// mapping any instance.
    pub fn count(&self, repo: &mut Repository) -> Result<usize> {
        match &self.state {
            State::Pending(query) => Ok(repo
                .backend_for(&self.config)?
                .all(&self.config, query)?
                .len()),
            State::Realized(ids) => Ok(ids.iter().filter(|id| repo.contains(**id)).count()),
        }
    }

    /// Realize the collection and return its live elements.
    pub fn to_vec(&mut self, repo: &mut Repository) -> Result<Vec<InstanceId>> {
        if let State::Pending(query) = &self.state {
            let ids = realize(&self.config, State::Pending(query.clone()), repo)?;
            self.state = State::Realized(ids);
        }
        match &self.state {
            State::Realized(ids) => Ok(ids.iter().copied().filter(|id| repo.contains(*id)).collect()),
            State::Pending(_) => Ok(Vec::new()),
        }
    }

    /// First element. A pending collection fetches a single row and stays
    /// pending.
    pub fn first(&mut self, repo: &mut Repository) -> Result<Option<InstanceId>> {
        match &self.state {
            State::Pending(query) => {
                let mut query = query.clone();
                query.limit = Some(query.limit.map_or(1, |limit| limit.min(1)));
                let row = repo
                    .backend_for(&self.config)?
                    .all(&self.config, &query)?
                    .into_iter()
                    .next();
                match row {
                    Some(row) => Ok(Some(repo.adopt_row(&self.config, row)?)),
                    None => Ok(None),
                }
            }
            State::Realized(ids) => Ok(ids.iter().copied().find(|id| repo.contains(*id))),
        }
    }
}

fn is_paged(query: &Query) -> bool {
    query.offset > 0 || query.limit.is_some()
}

fn realize(config: &ModelConfig, state: State, repo: &mut Repository) -> Result<Vec<InstanceId>> {
    match state {
        State::Realized(ids) => Ok(ids.into_iter().filter(|id| repo.contains(*id)).collect()),
        State::Pending(query) => {
            let rows = repo.backend_for(config)?.all(config, &query)?;
            tracing::debug!(model = %config.name, rows = rows.len(), "Realizing collection");
            let mut ids = Vec::with_capacity(rows.len());
            for row in rows {
                ids.push(repo.adopt_row(config, row)?);
            }
            Ok(ids)
        }
    }
}
