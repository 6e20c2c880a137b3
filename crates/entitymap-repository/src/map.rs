//! Identity-map operations: lookup, load, create and duplicate.

use std::sync::Arc;

use entitymap_core::{Condition, Error, ModelConfig, Result, Row, Value};

use crate::collection::Collection;
use crate::index::{Index, Key};
use crate::instance::{Instance, InstanceId, Property, RelationSlot};
use crate::lifecycle::LifecycleEvent;
use crate::object::{ObjectRecord, ObjectState};
use crate::options::{GetOptions, Preload};
use crate::Repository;

impl Repository {
    // ========================================================================
    // Lookup
    // ========================================================================

    /// Get an instance by identity, loading it from the backend if it is
    /// not mapped yet.
    ///
    /// Every successful call with the same identity returns the same handle.
    #[tracing::instrument(level = "debug", skip(self, key, options))]
    pub fn get(&mut self, model: &str, key: impl Into<Key>, options: &GetOptions) -> Result<InstanceId> {
        let config = self.model_config(model)?;
        let identity = key.into().into_row(&config)?;
        let index = Index::of_row(&config, &identity)?;

        let id = match self.lookup(model, &index)? {
            Some(id) => {
                tracing::debug!(model, index = %index, "Found in identity map");
                id
            }
            None => self.fetch(&config, identity, index)?,
        };
        self.preload(id, options.preload)?;
        Ok(id)
    }

    /// Identity-map lookup without backend I/O.
    pub fn mapped(&self, model: &str, key: impl Into<Key>) -> Result<Option<InstanceId>> {
        let config = self.model_config(model)?;
        let identity = key.into().into_row(&config)?;
        let index = Index::of_row(&config, &identity)?;
        self.lookup(model, &index)
    }

    /// Lazy collection of every record of `model`.
    pub fn all(&self, model: &str) -> Result<Collection> {
        Ok(Collection::new(self.model_config(model)?))
    }

    /// Exactly one instance matching property-level `conditions`.
    ///
    /// Zero matches fail with `NotFound` unless `allow_none`; more than one
    /// fails with `AmbiguousMatch`.
    #[tracing::instrument(level = "debug", skip(self, conditions))]
    pub fn one(
        &mut self,
        model: &str,
        conditions: &[Condition],
        allow_none: bool,
    ) -> Result<Option<InstanceId>> {
        let mut collection = self.all(model)?;
        for condition in conditions {
            collection = collection.where_(
                self,
                &condition.column,
                condition.operator,
                condition.value.clone(),
            )?;
        }
        let found = collection.to_vec(self)?;
        match found.as_slice() {
            [] if allow_none => Ok(None),
            [] => {
                let detail: Vec<String> = conditions
                    .iter()
                    .map(|c| format!("{} {} {}", c.column, c.operator.symbol(), c.value))
                    .collect();
                Err(Error::not_found(model, detail.join(" and ")))
            }
            [only] => Ok(Some(*only)),
            many => Err(Error::AmbiguousMatch {
                model: model.to_string(),
                count: many.len(),
            }),
        }
    }

    fn fetch(&mut self, config: &Arc<ModelConfig>, identity: Row, index: Index) -> Result<InstanceId> {
        self.objects
            .entry(config.name.clone())
            .or_default()
            .insert(index.clone(), ObjectRecord::retrieving());

        let fetched = self
            .backend_for(config)
            .and_then(|backend| backend.get(&identity, config));
        let row = match fetched {
            Ok(row) => row,
            Err(e) => {
                self.drop_entry(&config.name, &index);
                return Err(e);
            }
        };

        match Index::of_row(config, &row) {
            Ok(actual) if actual == index => {}
            other => {
                self.drop_entry(&config.name, &index);
                return Err(Error::IndexMismatch {
                    model: config.name.clone(),
                    expected: index.to_string(),
                    actual: other.map_or_else(|_| "<none>".to_string(), |i| i.to_string()),
                });
            }
        }

        let id = self.materialize(config, index.clone(), row);
        if id.is_err() {
            self.drop_entry(&config.name, &index);
        }
        id
    }

    fn drop_entry(&mut self, model: &str, index: &Index) {
        if let Some(entries) = self.objects.get_mut(model) {
            entries.remove(index);
        }
    }

    // ========================================================================
    // Row Conversion
    // ========================================================================

    /// Map a backend row, reusing the live instance when one exists.
    pub(crate) fn adopt_row(&mut self, config: &ModelConfig, row: Row) -> Result<InstanceId> {
        let index = Index::of_row(config, &row)?;
        match self.lookup(&config.name, &index)? {
            Some(id) => Ok(id),
            None => self.materialize(config, index, row),
        }
    }

    /// Turn a fetched row into a mapped, `Retrieved` instance.
    fn materialize(&mut self, config: &ModelConfig, index: Index, row: Row) -> Result<InstanceId> {
        let id = self.allocate_id();
        let instance = self.instance_from_row(config, id, &row)?;
        let mut record = ObjectRecord::with_instance(ObjectState::Retrieved, id, instance);
        record.data = Some(row);

        self.objects
            .entry(config.name.clone())
            .or_default()
            .insert(index.clone(), record);
        tracing::debug!(model = %config.name, index = %index, instance = %id, "Instance loaded");
        self.locations.insert(id, (config.name.clone(), index));
        if let Err(e) = self.fire(LifecycleEvent::Load, id) {
            self.forget(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Build instance fields from a backend row: read filters on plain
    /// properties, placeholders on relations.
    pub(crate) fn instance_from_row(
        &mut self,
        config: &ModelConfig,
        id: InstanceId,
        row: &Row,
    ) -> Result<Instance> {
        let mut instance = Instance::new(&config.name);
        for (column, property) in &config.properties {
            let mut value = row.get_or_null(column);
            if let Some(filter) = config.filters.get(property) {
                value = filter.read(value)?;
            }
            instance
                .fields
                .insert(property.clone(), Property::Scalar(value));
        }
        for (property, spec) in &config.belongs_to {
            let key = row.get_or_null(&spec.reference);
            let slot = if key.is_null() {
                RelationSlot::Resolved(None)
            } else {
                RelationSlot::Unresolved(self.placeholder(id, &config.name, property, Some(key)))
            };
            instance
                .fields
                .insert(property.clone(), Property::BelongsTo(slot));
        }
        for property in config.has_many.keys() {
            let slot = RelationSlot::Unresolved(self.placeholder(id, &config.name, property, None));
            instance
                .fields
                .insert(property.clone(), Property::HasMany(slot));
        }
        Ok(instance)
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create a new, unsaved instance.
    ///
    /// `values` are keyed by property. Plain properties take `values`, then
    /// the model defaults, then NULL. A belongsTo property may be given a
    /// foreign key; otherwise its configured default is used. hasMany
    /// relations start out empty.
    #[tracing::instrument(level = "debug", skip(self, values))]
    pub fn create(&mut self, model: &str, values: Row) -> Result<InstanceId> {
        let config = self.model_config(model)?;
        for (property, _) in &values {
            match config.kind_of(property) {
                None => return Err(Error::unknown_property(model, property.as_str())),
                Some(entitymap_core::PropertyKind::HasMany) => {
                    return Err(Error::InvalidState(format!(
                        "{}.{} is a collection; use set_related_many",
                        model, property
                    )));
                }
                Some(_) => {}
            }
        }

        let id = self.allocate_id();
        let index = self.allocate_temporary();
        let mut instance = Instance::new(model);
        for property in config.properties.values() {
            let value = values
                .get(property)
                .or_else(|| config.defaults.get(property))
                .cloned()
                .unwrap_or(Value::Null);
            instance
                .fields
                .insert(property.clone(), Property::Scalar(value));
        }
        for (property, spec) in &config.belongs_to {
            let key = values
                .get(property)
                .cloned()
                .or_else(|| spec.default.clone())
                .filter(|key| !key.is_null());
            let slot = match key {
                Some(key) => RelationSlot::Unresolved(self.placeholder(id, model, property, Some(key))),
                None => RelationSlot::Resolved(None),
            };
            instance
                .fields
                .insert(property.clone(), Property::BelongsTo(slot));
        }

        for property in config.has_many.keys() {
            instance.fields.insert(
                property.clone(),
                Property::HasMany(RelationSlot::Resolved(Vec::new())),
            );
        }
        let mut record = ObjectRecord::with_instance(ObjectState::New, id, instance);
        record.start_empty(&config);

        self.objects
            .entry(model.to_string())
            .or_default()
            .insert(index.clone(), record);
        self.locations.insert(id, (model.to_string(), index));
        tracing::debug!(model, instance = %id, "Instance created");

        if let Err(e) = self.fire(LifecycleEvent::Create, id) {
            self.forget(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Copy an instance into a new, unsaved one.
    ///
    /// Plain properties are copied except the identity, which is reset so
    /// the copy gets its own. Relation slots are copied verbatim: an
    /// unresolved placeholder keeps pointing at the original container and
    /// adopts the original's value when it is resolved through the copy.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn duplicate(&mut self, id: InstanceId) -> Result<InstanceId> {
        let (model, _) = self.location(id)?;
        let config = self.model_config(&model)?;
        let mut instance = self.instance(id)?.clone();
        for property in config.identity_properties() {
            instance.set_value(property, Value::Null)?;
        }

        let copy = self.allocate_id();
        let index = self.allocate_temporary();
        let mut record = ObjectRecord::with_instance(ObjectState::New, copy, instance);
        record.start_empty(&config);

        self.objects
            .entry(model.clone())
            .or_default()
            .insert(index.clone(), record);
        self.locations.insert(copy, (model, index));

        if let Err(e) = self.fire(LifecycleEvent::Create, copy) {
            self.forget(copy);
            return Err(e);
        }
        Ok(copy)
    }

    // ========================================================================
    // Preload
    // ========================================================================

    /// Resolve relations of `id` eagerly, `preload` levels deep.
    pub fn preload(&mut self, id: InstanceId, preload: Preload) -> Result<()> {
        if preload == Preload::None {
            return Ok(());
        }
        let root = self.loading.is_empty();
        let result = self.preload_from(id, preload.depth());
        if root {
            self.loading.clear();
        }
        result
    }

    fn preload_from(&mut self, id: InstanceId, remaining: Option<usize>) -> Result<()> {
        if remaining == Some(0) || !self.loading.insert(id) {
            return Ok(());
        }
        let (model, _) = self.location(id)?;
        let config = self.model_config(&model)?;
        let next = remaining.map(|depth| depth - 1);

        for property in config.belongs_to.keys() {
            if let Some(target) = self.related(id, property)? {
                if self.is_bound(target) {
                    self.preload_from(target, next)?;
                }
            }
        }
        for property in config.has_many.keys() {
            for member in self.related_many(id, property)? {
                if self.is_bound(member) {
                    self.preload_from(member, next)?;
                }
            }
        }
        Ok(())
    }
}
