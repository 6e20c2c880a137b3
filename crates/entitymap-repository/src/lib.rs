//! Repository engine for entitymap.
//!
//! The [`Repository`] is the data mapper. It binds backend rows to live
//! [`Instance`]s, guarantees one instance per (model, identity), resolves
//! relations lazily through [`RelationSlot`] placeholders, and persists
//! graphs of related instances.
//!
//! # Design Philosophy
//!
//! - **Handles, not references**: instances live in the repository and are
//!   addressed by [`InstanceId`]; cycle guards are plain sets of handles.
//! - **Explicit relation access**: relation properties are read through
//!   `related`/`members`, which resolve placeholders on first use.
//! - **Backend owns storage**: atomicity and retries belong to the
//!   [`Backend`]; a failed cascade restores lifecycle state only.
//!
//! # Example
//!
//! ```ignore
//! let mut repo = Repository::new(RepositoryConfig::default());
//! repo.register_backend(Box::new(backend))?;
//!
//! // Identity-mapped lookup
//! let order = repo.get("Order", 1, &GetOptions::default())?;
//!
//! // Lazy relation
//! let customer = repo.related(order, "customer")?;
//!
//! // Cascading save
//! let customer = repo.create("Customer", Row::new().with("name", "Alice"))?;
//! repo.set_related(order, "customer", Some(customer))?;
//! repo.save(order, &SaveOptions::default())?;
//! ```

pub mod access;
pub mod collection;
pub mod delete;
pub mod index;
pub mod instance;
pub mod lazy_tracker;
pub mod lifecycle;
pub mod map;
pub mod object;
pub mod options;
pub mod reload;
pub mod resolve;
pub mod save;

#[cfg(test)]
mod test_support;

pub use collection::Collection;
pub use index::{Index, Key};
pub use instance::{
    Instance, InstanceId, Junction, Member, Placeholder, PlaceholderRef, Property, RelationSlot,
};
pub use lazy_tracker::{LazyLoadStats, LazyLoadTracker};
pub use lifecycle::{LifecycleEvent, LifecycleHooks};
pub use object::ObjectState;
pub use options::{GetOptions, Preload, ReloadOptions, SaveOptions};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use entitymap_core::{Backend, Error, ModelConfig, Registered, Result, validate_backend_configs};
use serde::{Deserialize, Serialize};

use crate::object::ObjectRecord;

// ============================================================================
// Repository Configuration
// ============================================================================

/// Configuration for Repository behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Name recorded in placeholders; placeholders of another repository
    /// are refused.
    pub name: String,
    /// Lazy loads of one relation before a warning is logged.
    pub lazy_load_threshold: usize,
    /// Whether lazy loads are counted at all.
    pub detect_lazy_loads: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            lazy_load_threshold: 3,
            detect_lazy_loads: true,
        }
    }
}

impl RepositoryConfig {
    /// Default configuration under `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the lazy-load warning threshold.
    #[must_use]
    pub fn lazy_load_threshold(mut self, threshold: usize) -> Self {
        self.lazy_load_threshold = threshold;
        self
    }

    /// Turn lazy-load detection on or off.
    #[must_use]
    pub fn detect_lazy_loads(mut self, enabled: bool) -> Self {
        self.detect_lazy_loads = enabled;
        self
    }
}

static NEXT_SERIAL: AtomicU32 = AtomicU32::new(1);

// ============================================================================
// Repository
// ============================================================================

/// Identity map, relation resolver and cascade engine.
///
/// Single-threaded: every operation takes `&mut self`, and the only
/// re-entrancy is the recursion of one cascading call.
pub struct Repository {
    config: RepositoryConfig,
    serial: u32,
    models: BTreeMap<String, Arc<ModelConfig>>,
    junctions: BTreeMap<String, Arc<ModelConfig>>,
    backends: BTreeMap<String, Box<dyn Backend>>,
    /// model -> index -> entry
    objects: HashMap<String, HashMap<Index, ObjectRecord>>,
    locations: HashMap<InstanceId, (String, Index)>,
    /// Handles of deleted instances, kept for the repository's lifetime so
    /// a stale handle keeps reporting `Deleted` and a repeated `delete`
    /// stays a no-op. One id per deletion; records and fields are freed.
    retired: HashSet<InstanceId>,
    /// Guard of the current cascading save.
    saving: HashSet<InstanceId>,
    /// Guard of the current preload.
    loading: HashSet<InstanceId>,
    /// Instances written by the current cascading save.
    persisted: usize,
    hooks: HashMap<String, Box<dyn LifecycleHooks>>,
    tracker: LazyLoadTracker,
    next_instance: u64,
    next_temporary: u64,
    next_token: u64,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.config.name)
            .field("serial", &self.serial)
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("backends", &self.backends.keys().collect::<Vec<_>>())
            .field("mapped", &self.locations.len())
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Create an empty repository.
    pub fn new(config: RepositoryConfig) -> Self {
        let mut tracker = LazyLoadTracker::new().with_threshold(config.lazy_load_threshold);
        tracker.set_enabled(config.detect_lazy_loads);
        Self {
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            config,
            models: BTreeMap::new(),
            junctions: BTreeMap::new(),
            backends: BTreeMap::new(),
            objects: HashMap::new(),
            locations: HashMap::new(),
            retired: HashSet::new(),
            saving: HashSet::new(),
            loading: HashSet::new(),
            persisted: 0,
            hooks: HashMap::new(),
            tracker,
            next_instance: 0,
            next_temporary: 0,
            next_token: 0,
        }
    }

    /// Repository configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Registered config of `model`.
    pub fn model(&self, model: &str) -> Option<&ModelConfig> {
        self.models.get(model).map(AsRef::as_ref)
    }

    /// Names of every registered model.
    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Validate and register a backend with all of its models.
    ///
    /// Nothing is registered when any config is invalid.
    #[tracing::instrument(level = "debug", skip(self, backend))]
    pub fn register_backend(&mut self, backend: Box<dyn Backend>) -> Result<()> {
        let identifier = backend.identifier().to_string();
        if self.backends.contains_key(&identifier) {
            return Err(Error::config(format!(
                "backend {} is registered twice",
                identifier
            )));
        }

        let (models, junctions) = {
            let registered = Registered {
                models: self
                    .models
                    .iter()
                    .map(|(name, config)| (name.as_str(), config.as_ref()))
                    .collect(),
                junctions: self
                    .junctions
                    .iter()
                    .map(|(name, config)| (name.as_str(), config.as_ref()))
                    .collect(),
            };
            validate_backend_configs(
                &identifier,
                backend.configs(),
                backend.junctions(),
                &registered,
            )?
        };

        tracing::info!(
            backend = %identifier,
            models = models.len(),
            junctions = junctions.len(),
            "Registering backend"
        );
        for config in models {
            self.models.insert(config.name.clone(), Arc::new(config));
        }
        for config in junctions {
            self.junctions.insert(config.name.clone(), Arc::new(config));
        }
        self.backends.insert(identifier, backend);
        Ok(())
    }

    /// Install lifecycle hooks for `model`, replacing earlier ones.
    pub fn set_hooks(&mut self, model: &str, hooks: impl LifecycleHooks + 'static) -> Result<()> {
        self.model_config(model)?;
        self.hooks.insert(model.to_string(), Box::new(hooks));
        Ok(())
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Rename a model. Only allowed while none of its instances is mapped.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rename_model(&mut self, old: &str, new: &str) -> Result<()> {
        self.ensure_unmapped(old)?;
        entitymap_core::validate_identifier("model", new)?;
        if self.models.contains_key(new) || self.junctions.contains_key(new) {
            return Err(Error::config(format!("model {} already exists", new)));
        }
        let mut config = self
            .models
            .remove(old)
            .ok_or_else(|| Error::config(format!("unknown model {}", old)))?;
        {
            let config = Arc::make_mut(&mut config);
            config.name = new.to_string();
            if config.plural == old {
                config.plural = new.to_string();
            }
        }
        self.models.insert(new.to_string(), config);

        for config in self.models.values_mut() {
            let config = Arc::make_mut(config);
            for spec in config.belongs_to.values_mut() {
                if spec.model == old {
                    spec.model = new.to_string();
                }
            }
            for spec in config.has_many.values_mut() {
                if spec.model == old {
                    spec.model = new.to_string();
                }
            }
        }
        if let Some(hooks) = self.hooks.remove(old) {
            self.hooks.insert(new.to_string(), hooks);
        }
        self.objects.remove(old);
        tracing::info!(old, new, "Renamed model");
        Ok(())
    }

    /// Rename a property of `model`. Only allowed while none of its
    /// instances is mapped.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn rename_property(&mut self, model: &str, old: &str, new: &str) -> Result<()> {
        self.ensure_unmapped(model)?;
        entitymap_core::validate_identifier("property", new)?;
        let config = self
            .models
            .get_mut(model)
            .ok_or_else(|| Error::config(format!("unknown model {}", model)))?;
        Arc::make_mut(config).rename_property(old, new)?;

        self.for_each_relation_into(model, |spec| {
            if spec.belongs_to.as_deref() == Some(old) {
                spec.belongs_to = Some(new.to_string());
            }
            if let Some(junction) = spec.junction.as_mut() {
                if junction.reciprocal.as_deref() == Some(old) {
                    junction.reciprocal = Some(new.to_string());
                }
            }
        });
        tracing::info!(model, old, new, "Renamed property");
        Ok(())
    }

    /// Stop mapping a property of `model`. Only allowed while none of its
    /// instances is mapped.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn skip_property(&mut self, model: &str, property: &str) -> Result<()> {
        self.ensure_unmapped(model)?;
        let config = self
            .models
            .get_mut(model)
            .ok_or_else(|| Error::config(format!("unknown model {}", model)))?;
        Arc::make_mut(config).skip_property(property)?;

        self.for_each_relation_into(model, |spec| {
            if spec.belongs_to.as_deref() == Some(property) {
                spec.belongs_to = None;
            }
            if let Some(junction) = spec.junction.as_mut() {
                if junction.reciprocal.as_deref() == Some(property) {
                    junction.reciprocal = None;
                }
            }
        });
        tracing::info!(model, property, "Skipped property");
        Ok(())
    }

    fn ensure_unmapped(&self, model: &str) -> Result<()> {
        let mapped = self.objects.get(model).map_or(0, HashMap::len);
        if mapped > 0 {
            return Err(Error::InvalidState(format!(
                "{} has {} mapped instances",
                model, mapped
            )));
        }
        Ok(())
    }

    /// Apply `f` to every hasMany relation (of any model) that targets `model`.
    fn for_each_relation_into(
        &mut self,
        model: &str,
        mut f: impl FnMut(&mut entitymap_core::HasManySpec),
    ) {
        for config in self.models.values_mut() {
            if !config.has_many.values().any(|spec| spec.model == model) {
                continue;
            }
            for spec in Arc::make_mut(config).has_many.values_mut() {
                if spec.model == model {
                    f(spec);
                }
            }
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// True if `id` is a live instance of this repository.
    pub fn contains(&self, id: InstanceId) -> bool {
        self.is_bound(id)
    }

    /// Lifecycle state of `id`.
    ///
    /// Deleted handles report `Deleted` for as long as the repository
    /// lives; handles of other repositories report `None`.
    pub fn state_of(&self, id: InstanceId) -> Option<ObjectState> {
        if self.retired.contains(&id) {
            return Some(ObjectState::Deleted);
        }
        self.record(id).ok().map(|record| record.state)
    }

    /// Identity-map index of `id`.
    pub fn index_of(&self, id: InstanceId) -> Option<Index> {
        self.locations.get(&id).map(|(_, index)| index.clone())
    }

    /// Model name of `id`.
    pub fn model_of(&self, id: InstanceId) -> Option<&str> {
        self.locations.get(&id).map(|(model, _)| model.as_str())
    }

    /// Read-only view of a live instance.
    pub fn instance(&self, id: InstanceId) -> Result<&Instance> {
        self.check_bound(id)?;
        self.record(id)?
            .instance
            .as_ref()
            .ok_or_else(|| Error::InvalidState(format!("{} is still being retrieved", id)))
    }

    /// Lazy-load statistics.
    pub fn lazy_load_stats(&self) -> LazyLoadStats {
        self.tracker.stats()
    }

    /// Lazy loads recorded for `model.property`.
    pub fn lazy_load_count(&self, model: &str, property: &str) -> usize {
        self.tracker.count_for(model, property)
    }

    /// Forget lazy-load counts, e.g. at the start of a request.
    pub fn reset_lazy_load_stats(&mut self) {
        self.tracker.reset();
    }

    /// Get debug information about the repository state.
    pub fn debug_state(&self) -> RepositoryDebugInfo {
        let mut by_state = BTreeMap::new();
        for record in self.objects.values().flat_map(HashMap::values) {
            *by_state.entry(record.state).or_insert(0) += 1;
        }
        let count = |state: ObjectState| by_state.get(&state).copied().unwrap_or(0);
        RepositoryDebugInfo {
            name: self.config.name.clone(),
            models: self.models.len(),
            backends: self.backends.len(),
            mapped: self.locations.len(),
            new: count(ObjectState::New),
            retrieved: count(ObjectState::Retrieved),
            saved: count(ObjectState::Saved),
            deleted: self.retired.len(),
            saving: self.saving.len(),
            loading: self.loading.len(),
        }
    }

    // ========================================================================
    // Internal Lookups
    // ========================================================================

    pub(crate) fn model_config(&self, model: &str) -> Result<Arc<ModelConfig>> {
        self.models
            .get(model)
            .cloned()
            .ok_or_else(|| Error::config(format!("unknown model {}", model)))
    }

    pub(crate) fn junction_config(&self, model: &str) -> Result<Arc<ModelConfig>> {
        self.junctions
            .get(model)
            .cloned()
            .ok_or_else(|| Error::config(format!("unknown junction model {}", model)))
    }

    pub(crate) fn backend_for(&mut self, config: &ModelConfig) -> Result<&mut dyn Backend> {
        match self.backends.get_mut(&config.backend) {
            Some(backend) => Ok(backend.as_mut()),
            None => Err(Error::config(format!(
                "model {} has no registered backend {}",
                config.name, config.backend
            ))),
        }
    }

    pub(crate) fn is_bound(&self, id: InstanceId) -> bool {
        id.repository == self.serial && self.locations.contains_key(&id)
    }

    pub(crate) fn check_bound(&self, id: InstanceId) -> Result<()> {
        if id.repository != self.serial {
            return Err(Error::NotBound(format!(
                "{} was issued by another repository",
                id
            )));
        }
        if self.retired.contains(&id) {
            return Err(Error::InvalidState(format!("{} was deleted", id)));
        }
        if !self.locations.contains_key(&id) {
            return Err(Error::NotBound(format!("{} is not mapped", id)));
        }
        Ok(())
    }

    pub(crate) fn location(&self, id: InstanceId) -> Result<(String, Index)> {
        self.check_bound(id)?;
        self.locations
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotBound(format!("{} is not mapped", id)))
    }

    pub(crate) fn record(&self, id: InstanceId) -> Result<&ObjectRecord> {
        let (model, index) = self
            .locations
            .get(&id)
            .ok_or_else(|| Error::NotBound(format!("{} is not mapped", id)))?;
        self.objects
            .get(model)
            .and_then(|entries| entries.get(index))
            .ok_or_else(|| Error::NotBound(format!("{} has no map entry", id)))
    }

    pub(crate) fn record_mut(&mut self, id: InstanceId) -> Result<&mut ObjectRecord> {
        let (model, index) = self
            .locations
            .get(&id)
            .ok_or_else(|| Error::NotBound(format!("{} is not mapped", id)))?;
        self.objects
            .get_mut(model)
            .and_then(|entries| entries.get_mut(index))
            .ok_or_else(|| Error::NotBound(format!("{} has no map entry", id)))
    }

    pub(crate) fn instance_mut(&mut self, id: InstanceId) -> Result<&mut Instance> {
        self.record_mut(id)?
            .instance
            .as_mut()
            .ok_or_else(|| Error::InvalidState(format!("{} is still being retrieved", id)))
    }

    /// Entry id for (model, index), failing on an entry still being fetched.
    pub(crate) fn lookup(&self, model: &str, index: &Index) -> Result<Option<InstanceId>> {
        match self.objects.get(model).and_then(|entries| entries.get(index)) {
            None => Ok(None),
            Some(record) if record.state == ObjectState::Retrieving => Err(Error::InvalidState(
                format!("{} {} is already being retrieved", model, index),
            )),
            Some(record) => Ok(record.id),
        }
    }

    pub(crate) fn allocate_id(&mut self) -> InstanceId {
        self.next_instance += 1;
        InstanceId {
            repository: self.serial,
            serial: self.next_instance,
        }
    }

    pub(crate) fn allocate_temporary(&mut self) -> Index {
        self.next_temporary += 1;
        Index::Temporary(self.next_temporary)
    }

    pub(crate) fn placeholder(
        &mut self,
        container: InstanceId,
        model: &str,
        property: &str,
        key: Option<entitymap_core::Value>,
    ) -> Placeholder {
        self.next_token += 1;
        Placeholder {
            reference: PlaceholderRef {
                repository: self.config.name.clone(),
                model: model.to_string(),
                property: property.to_string(),
            },
            container,
            token: self.next_token,
            key,
        }
    }

    /// Drop an entry without retiring its handle.
    pub(crate) fn forget(&mut self, id: InstanceId) {
        if let Some((model, index)) = self.locations.remove(&id) {
            if let Some(entries) = self.objects.get_mut(&model) {
                entries.remove(&index);
            }
        }
    }

    /// Run the hooks of the instance's model.
    pub(crate) fn fire(&mut self, event: LifecycleEvent, id: InstanceId) -> Result<()> {
        let Some((model, index)) = self.locations.get(&id) else {
            return Ok(());
        };
        let Some(hooks) = self.hooks.get_mut(model) else {
            return Ok(());
        };
        let Some(instance) = self
            .objects
            .get_mut(model)
            .and_then(|entries| entries.get_mut(index))
            .and_then(|record| record.instance.as_mut())
        else {
            return Ok(());
        };
        tracing::debug!(%event, instance = %id, model = %model, "Lifecycle event");
        hooks.on_event(event, id, instance)
    }
}

/// Debug information about repository state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryDebugInfo {
    /// Repository name.
    pub name: String,
    /// Registered models.
    pub models: usize,
    /// Registered backends.
    pub backends: usize,
    /// Live mapped instances.
    pub mapped: usize,
    /// Instances never persisted.
    pub new: usize,
    /// Instances loaded and not saved since.
    pub retrieved: usize,
    /// Instances saved by this repository.
    pub saved: usize,
    /// Deleted handles.
    pub deleted: usize,
    /// Instances in the current save guard.
    pub saving: usize,
    /// Instances in the current preload guard.
    pub loading: usize,
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests;
