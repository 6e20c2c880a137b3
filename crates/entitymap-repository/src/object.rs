//! Identity-map entries.

use std::collections::BTreeMap;

use entitymap_core::{ModelConfig, Row};

use crate::index::Index;
use crate::instance::{Instance, InstanceId, Member};

/// Lifecycle state of a mapped record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectState {
    /// Created in memory, never persisted.
    New,
    /// Being fetched from the backend.
    Retrieving,
    /// Loaded from the backend.
    Retrieved,
    /// A save is in progress.
    Saving,
    /// Persisted by this repository.
    Saved,
    /// A delete is in progress.
    Deleting,
    /// Removed; terminal.
    Deleted,
}

impl ObjectState {
    /// Lowercase label used in logs and debug output.
    pub const fn as_str(self) -> &'static str {
        match self {
            ObjectState::New => "new",
            ObjectState::Retrieving => "retrieving",
            ObjectState::Retrieved => "retrieved",
            ObjectState::Saving => "saving",
            ObjectState::Saved => "saved",
            ObjectState::Deleting => "deleting",
            ObjectState::Deleted => "deleted",
        }
    }
}

/// One identity-map entry.
#[derive(Debug)]
pub(crate) struct ObjectRecord {
    pub(crate) state: ObjectState,
    /// Absent only while `Retrieving`.
    pub(crate) id: Option<InstanceId>,
    pub(crate) instance: Option<Instance>,
    /// Last row known to be in the backend.
    pub(crate) data: Option<Row>,
    /// Materialized hasMany contents at load or last save: property → members.
    pub(crate) realized_has_many: BTreeMap<String, Vec<Member>>,
    /// Junction rows at load or last save: property → target index → row.
    pub(crate) realized_junctions: BTreeMap<String, BTreeMap<Index, Row>>,
}

impl ObjectRecord {
    pub(crate) fn retrieving() -> Self {
        Self {
            state: ObjectState::Retrieving,
            id: None,
            instance: None,
            data: None,
            realized_has_many: BTreeMap::new(),
            realized_junctions: BTreeMap::new(),
        }
    }

    pub(crate) fn with_instance(state: ObjectState, id: InstanceId, instance: Instance) -> Self {
        Self {
            state,
            id: Some(id),
            instance: Some(instance),
            ..Self::retrieving()
        }
    }

    /// Empty baselines for every hasMany relation of a never-persisted
    /// instance.
    pub(crate) fn start_empty(&mut self, config: &ModelConfig) {
        for (property, spec) in &config.has_many {
            self.realized_has_many.insert(property.clone(), Vec::new());
            if spec.is_many_to_many() {
                self.realized_junctions
                    .insert(property.clone(), BTreeMap::new());
            }
        }
    }

    /// Drop cached relation baselines.
    pub(crate) fn forget_realized(&mut self) {
        self.realized_has_many.clear();
        self.realized_junctions.clear();
    }
}
