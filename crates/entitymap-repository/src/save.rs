//! Cascading save.
//!
//! `save` walks the graph reachable from one instance: belongsTo targets
//! first so foreign keys are known, then the instance itself, then its
//! hasMany members. The `saving` set makes every instance count once per
//! cascade, which is what keeps cyclic graphs finite.

use std::collections::HashSet;

use entitymap_core::{Error, HasManySpec, JunctionSpec, ModelConfig, Result, Row, Value};

use crate::index::Index;
use crate::instance::{InstanceId, Member, Property, RelationSlot};
use crate::lifecycle::LifecycleEvent;
use crate::object::ObjectState;
use crate::options::SaveOptions;
use crate::resolve::wrap_member;
use crate::Repository;

/// Junction change mirrored onto the other side of a many-to-many
/// relation.
#[derive(Clone, Copy)]
enum Mirror<'a> {
    Link(&'a Row),
    Unlink,
}

/// The reciprocal relation seen from one owner.
struct MirrorSide<'a> {
    owner: InstanceId,
    owner_index: Index,
    property: &'a str,
    junction: &'a JunctionSpec,
    bridge: &'a ModelConfig,
}

impl Repository {
    // ========================================================================
    // Entry Point
    // ========================================================================

    /// Save `id` and, unless `ignore_relations`, every instance reachable
    /// through its resolved relations.
    ///
    /// Returns the number of instances written to a backend. An instance
    /// whose projected row equals its stored data is not written.
    #[tracing::instrument(level = "debug", skip(self, options))]
    pub fn save(&mut self, id: InstanceId, options: &SaveOptions) -> Result<usize> {
        self.saving.clear();
        self.persisted = 0;
        let result = self.save_instance(id, options);
        self.saving.clear();
        let persisted = std::mem::take(&mut self.persisted);
        result?;
        tracing::info!(instance = %id, persisted, "Save complete");
        Ok(persisted)
    }

    fn save_instance(&mut self, id: InstanceId, options: &SaveOptions) -> Result<()> {
        if self.saving.contains(&id) {
            return Ok(());
        }
        self.check_bound(id)?;
        let (model, index) = self.location(id)?;
        let config = self.model_config(&model)?;
        let previous = self.record(id)?.state;
        match previous {
            ObjectState::New | ObjectState::Retrieved | ObjectState::Saved => {}
            other => {
                return Err(Error::InvalidState(format!(
                    "{} cannot be saved while {}",
                    id,
                    other.as_str()
                )));
            }
        }
        self.check_identity_drift(id, &config, &index)?;

        self.saving.insert(id);
        self.record_mut(id)?.state = ObjectState::Saving;
        tracing::debug!(model = %model, instance = %id, "Saving");

        match self.save_steps(id, &config, options) {
            Ok(()) => {
                self.record_mut(id)?.state = ObjectState::Saved;
                self.fire(LifecycleEvent::Saved, id)
            }
            Err(e) => {
                if let Ok(record) = self.record_mut(id) {
                    record.state = previous;
                }
                tracing::debug!(instance = %id, error = %e, "Save failed; state restored");
                Err(e)
            }
        }
    }

    fn save_steps(&mut self, id: InstanceId, config: &ModelConfig, options: &SaveOptions) -> Result<()> {
        self.fire(LifecycleEvent::Saving, id)?;
        if !options.ignore_relations {
            self.save_parents(id, config, options)?;
        }
        self.write_instance(id, config)?;
        if !options.ignore_relations {
            self.save_children(id, config, options)?;
        }
        Ok(())
    }

    /// A persisted instance must still carry the identity of its map entry.
    fn check_identity_drift(&self, id: InstanceId, config: &ModelConfig, index: &Index) -> Result<()> {
        if index.is_temporary() {
            return Ok(());
        }
        let projected = self.project(id, config)?;
        match Index::of_row(config, &config.identity_of(&projected)) {
            Ok(actual) if actual == *index => Ok(()),
            other => Err(Error::IndexMismatch {
                model: config.name.clone(),
                expected: index.to_string(),
                actual: other.map_or_else(|_| "<none>".to_string(), |i| i.to_string()),
            }),
        }
    }

    /// Whether a related handle takes part in the cascade.
    fn admit_related(&self, target: InstanceId, options: &SaveOptions) -> Result<bool> {
        if self.retired.contains(&target) {
            return Ok(false);
        }
        if self.is_bound(target) {
            return Ok(true);
        }
        if options.reject_unknown_related_instances {
            return Err(Error::NotBound(format!(
                "related instance {} is not owned by this repository",
                target
            )));
        }
        tracing::warn!(instance = %target, "Skipping related instance not owned by this repository");
        Ok(false)
    }

    // ========================================================================
    // Row Projection
    // ========================================================================

    /// Backend row for the current state of `id`: plain properties through
    /// their write filters, belongsTo targets as foreign keys.
    pub(crate) fn project(&self, id: InstanceId, config: &ModelConfig) -> Result<Row> {
        let record = self.record(id)?;
        let instance = record
            .instance
            .as_ref()
            .ok_or_else(|| Error::InvalidState(format!("{} has no fields", id)))?;
        let stored = |column: &str| {
            record
                .data
                .as_ref()
                .map_or(Value::Null, |data| data.get_or_null(column))
        };

        let mut row = Row::new();
        for (column, property) in &config.properties {
            let mut value = instance.value(property).cloned().unwrap_or(Value::Null);
            if let Some(filter) = config.filters.get(property) {
                value = filter.write(value)?;
            }
            row.insert(column.as_str(), value);
        }
        for (property, spec) in &config.belongs_to {
            let key = match instance.belongs_to(property) {
                Some(RelationSlot::Resolved(None)) => Value::Null,
                Some(RelationSlot::Resolved(Some(target))) if self.is_bound(*target) => {
                    let target_config = self.model_config(&spec.model)?;
                    let column = spec
                        .id
                        .as_deref()
                        .or_else(|| target_config.single_identity())
                        .unwrap_or_default();
                    self.referenced_value(*target, &target_config, column)?
                }
                Some(RelationSlot::Unresolved(placeholder)) => {
                    self.pending_key(id, spec, placeholder)?
                }
                Some(RelationSlot::Resolved(Some(_))) | None => stored(&spec.reference),
            };
            row.insert(spec.reference.as_str(), key);
        }
        Ok(row)
    }

    // ========================================================================
    // Writing
    // ========================================================================

    fn save_parents(&mut self, id: InstanceId, config: &ModelConfig, options: &SaveOptions) -> Result<()> {
        for property in config.belongs_to.keys() {
            let target = match self.instance(id)?.belongs_to(property) {
                Some(RelationSlot::Resolved(Some(target))) => *target,
                _ => continue,
            };
            if self.admit_related(target, options)? {
                self.save_instance(target, options)?;
            }
        }
        Ok(())
    }

    fn write_instance(&mut self, id: InstanceId, config: &ModelConfig) -> Result<()> {
        let row = self.project(id, config)?;
        let previous = self.record(id)?.data.clone();
        let stored = match previous {
            None => {
                let stored = self.backend_for(config)?.add(row, config)?;
                tracing::info!(model = %config.name, instance = %id, "Inserted");
                stored
            }
            Some(old) => {
                let changed = row.changed_columns(&old.project(row.columns()));
                if changed.is_empty() {
                    tracing::debug!(model = %config.name, instance = %id, "Unchanged; no write");
                    return Ok(());
                }
                let stored = self.backend_for(config)?.update(row, &old, config)?;
                tracing::info!(model = %config.name, instance = %id, columns = ?changed, "Updated");
                stored
            }
        };
        self.persisted += 1;
        self.absorb(id, config, stored)
    }

    /// Take backend-assigned values into the instance and re-key its entry
    /// when the identity changed.
    fn absorb(&mut self, id: InstanceId, config: &ModelConfig, stored: Row) -> Result<()> {
        let mut updates = Vec::with_capacity(config.properties.len());
        for (column, property) in &config.properties {
            if let Some(value) = stored.get(column) {
                let value = match config.filters.get(property) {
                    Some(filter) => filter.read(value.clone())?,
                    None => value.clone(),
                };
                updates.push((property.as_str(), value));
            }
        }
        let index = Index::of_row(config, &stored)?;

        let instance = self.instance_mut(id)?;
        for (property, value) in updates {
            if let Some(Property::Scalar(slot)) = instance.fields.get_mut(property) {
                *slot = value;
            }
        }
        self.record_mut(id)?.data = Some(stored);
        self.move_entry(id, &config.name, index)
    }

    fn move_entry(&mut self, id: InstanceId, model: &str, index: Index) -> Result<()> {
        let (_, old) = self.location(id)?;
        if old == index {
            return Ok(());
        }
        let entries = self.objects.entry(model.to_string()).or_default();
        if entries.contains_key(&index) {
            return Err(Error::IndexMismatch {
                model: model.to_string(),
                expected: old.to_string(),
                actual: index.to_string(),
            });
        }
        if let Some(record) = entries.remove(&old) {
            entries.insert(index.clone(), record);
        }
        tracing::debug!(model, instance = %id, from = %old, to = %index, "Re-keyed entry");
        self.locations.insert(id, (model.to_string(), index));
        Ok(())
    }

    // ========================================================================
    // hasMany
    // ========================================================================

    fn save_children(&mut self, id: InstanceId, config: &ModelConfig, options: &SaveOptions) -> Result<()> {
        for (property, spec) in &config.has_many {
            let members = match self.instance(id)?.has_many(property) {
                Some(RelationSlot::Resolved(members)) => members.clone(),
                _ => continue,
            };
            if spec.is_many_to_many() {
                self.save_many_to_many(id, config, property, spec, &members, options)?;
            } else {
                self.save_one_to_many(id, config, property, spec, &members, options)?;
            }
        }
        Ok(())
    }

    fn save_one_to_many(
        &mut self,
        id: InstanceId,
        config: &ModelConfig,
        property: &str,
        spec: &HasManySpec,
        members: &[Member],
        options: &SaveOptions,
    ) -> Result<()> {
        let target = self.model_config(&spec.model)?;
        let owner_key = self.owner_key(id, config, spec)?;
        let baseline = self
            .record(id)?
            .realized_has_many
            .get(property)
            .cloned()
            .unwrap_or_default();

        let mut current = Vec::with_capacity(members.len());
        for member in members {
            let child = member.id();
            if !self.admit_related(child, options)? {
                continue;
            }
            self.check_member_model(child, &spec.model)?;
            self.attach_child(child, id, &target, spec, &owner_key)?;
            self.save_instance(child, options)?;
            current.push(member.clone());
        }

        let present: HashSet<InstanceId> = members.iter().map(Member::id).collect();
        for old in baseline {
            let child = old.id();
            if present.contains(&child) || !self.is_bound(child) {
                continue;
            }
            // Re-parented elsewhere: no longer ours to delete.
            let points_here = self
                .project(child, &target)?
                .get_or_null(&spec.reference)
                .loosely_equals(&owner_key);
            if !points_here {
                continue;
            }
            if options.keep_missing_related_instances || self.saving.contains(&child) {
                current.push(old);
            } else {
                tracing::debug!(instance = %child, owner = %id, property, "Deleting removed child");
                self.delete(child)?;
            }
        }

        self.record_mut(id)?
            .realized_has_many
            .insert(property.to_string(), current);
        Ok(())
    }

    /// Point a child's back-reference at its owner.
    fn attach_child(
        &mut self,
        child: InstanceId,
        owner: InstanceId,
        target: &ModelConfig,
        spec: &HasManySpec,
        owner_key: &Value,
    ) -> Result<()> {
        let pointer = spec.belongs_to.clone().or_else(|| {
            target
                .belongs_to
                .iter()
                .find(|(_, b)| b.reference == spec.reference)
                .map(|(p, _)| p.clone())
        });
        if let Some(pointer) = pointer {
            if let Some(slot) = self.instance_mut(child)?.belongs_to_mut(&pointer) {
                *slot = RelationSlot::Resolved(Some(owner));
            }
            return Ok(());
        }
        if let Some(property) = target.property_of(&spec.reference) {
            self.set(child, property, owner_key.clone())?;
        }
        Ok(())
    }

    fn save_many_to_many(
        &mut self,
        id: InstanceId,
        config: &ModelConfig,
        property: &str,
        spec: &HasManySpec,
        members: &[Member],
        options: &SaveOptions,
    ) -> Result<()> {
        let Some(junction) = spec.junction.as_ref() else {
            return Ok(());
        };
        let bridge = self.junction_config(&junction.model)?;
        let target = self.model_config(&spec.model)?;
        let target_column = target
            .single_identity()
            .ok_or_else(|| Error::config(format!("{} has no single identity", target.name)))?
            .to_string();
        let owner_key = self.owner_key(id, config, spec)?;
        let owner_index = match config.single_identity() {
            Some(column) => Index::of_row(config, &Row::new().with(column, owner_key.clone()))?,
            None => self.location(id)?.1,
        };
        let side = junction.reciprocal.as_deref().and_then(|reciprocal| {
            target
                .has_many
                .get(reciprocal)
                .and_then(|s| s.junction.as_ref())
                .map(|mirror| MirrorSide {
                    owner: id,
                    owner_index: owner_index.clone(),
                    property: reciprocal,
                    junction: mirror,
                    bridge: &bridge,
                })
        });

        // Linked instances first, so every target has an identity.
        let mut linked: Vec<(Index, Value, &Member)> = Vec::with_capacity(members.len());
        for member in members {
            let other = member.id();
            if !self.admit_related(other, options)? {
                continue;
            }
            self.check_member_model(other, &spec.model)?;
            self.save_instance(other, options)?;
            let foreign = self.referenced_value(other, &target, &target_column)?;
            if foreign.is_null() {
                tracing::warn!(instance = %other, property, "Linked instance has no identity yet; link skipped");
                continue;
            }
            let index = Index::of_row(&target, &Row::new().with(target_column.as_str(), foreign.clone()))?;
            linked.push((index, foreign, member));
        }
        let present: HashSet<&Index> = linked.iter().map(|(index, _, _)| index).collect();

        // Read the baseline only now: saving a linked instance can mirror
        // links into this owner.
        let (mut rows, old_members) = {
            let record = self.record(id)?;
            (
                record.realized_junctions.get(property).cloned().unwrap_or_default(),
                record.realized_has_many.get(property).cloned().unwrap_or_default(),
            )
        };

        // Removed links.
        let removed: Vec<Index> = rows
            .keys()
            .filter(|index| !present.contains(index))
            .cloned()
            .collect();
        let mut kept = HashSet::new();
        for index in removed {
            if options.keep_missing_related_instances {
                kept.insert(index);
                continue;
            }
            if let Some(old) = rows.remove(&index) {
                self.backend_for(&bridge)?.delete(&old, &bridge)?;
                tracing::info!(junction = %bridge.name, owner = %id, target = %index, "Unlinked");
                if let (Some(side), Some(other)) = (&side, self.find_mapped(&target.name, &index)) {
                    self.mirror_junction(other, side, Mirror::Unlink)?;
                }
            }
        }

        // New and changed links.
        for (index, foreign, member) in &linked {
            let old = rows.get(index).cloned();
            let mut row = old.clone().unwrap_or_default();
            row.insert(spec.reference.as_str(), owner_key.clone());
            row.insert(junction.foreign.as_str(), foreign.clone());
            if let Some(wrapper) = member.junction() {
                for (column, field) in &junction.fields {
                    let mut value = wrapper.field(field).cloned().unwrap_or(Value::Null);
                    if let Some(filter) = bridge.property_of(column).and_then(|p| bridge.filters.get(p)) {
                        value = filter.write(value)?;
                    }
                    row.insert(column.as_str(), value);
                }
            }

            let stored = match old {
                None => {
                    let stored = self.backend_for(&bridge)?.add(row, &bridge)?;
                    tracing::info!(junction = %bridge.name, owner = %id, target = %index, "Linked");
                    stored
                }
                Some(old) if !row.changed_columns(&old).is_empty() => {
                    let stored = self.backend_for(&bridge)?.update(row, &old, &bridge)?;
                    tracing::info!(junction = %bridge.name, owner = %id, target = %index, "Updated link");
                    stored
                }
                Some(_) => continue,
            };
            if let Some(side) = &side {
                self.mirror_junction(member.id(), side, Mirror::Link(&stored))?;
            }
            rows.insert(index.clone(), stored);
        }

        let mut baseline: Vec<Member> = linked.iter().map(|(_, _, member)| (*member).clone()).collect();
        if !kept.is_empty() {
            for old in old_members {
                let still_linked = baseline.iter().any(|m| m.id() == old.id());
                let index = Index::of_row(
                    &target,
                    &Row::new().with(
                        target_column.as_str(),
                        self.referenced_value(old.id(), &target, &target_column)
                            .unwrap_or(Value::Null),
                    ),
                );
                if !still_linked && index.is_ok_and(|index| kept.contains(&index)) {
                    baseline.push(old);
                }
            }
        }

        let record = self.record_mut(id)?;
        record.realized_junctions.insert(property.to_string(), rows);
        record
            .realized_has_many
            .insert(property.to_string(), baseline);
        Ok(())
    }

    /// Apply a junction change to the reciprocal relation of `other`: its
    /// resolved slot, its snapshot and its junction baseline.
    ///
    /// An unresolved reciprocal relation is loaded instead, after the
    /// junction write, so it already reflects the change when it is read.
    /// That load is not counted as a lazy load.
    fn mirror_junction(&mut self, other: InstanceId, side: &MirrorSide<'_>, change: Mirror<'_>) -> Result<()> {
        if !self.is_bound(other) || other == side.owner {
            return Ok(());
        }
        let unresolved = matches!(
            self.instance(other)?.has_many(side.property),
            Some(RelationSlot::Unresolved(_))
        );
        if unresolved {
            let tracking = self.tracker.is_enabled();
            self.tracker.set_enabled(false);
            let loaded = self.resolve(other, side.property);
            self.tracker.set_enabled(tracking);
            tracing::debug!(
                instance = %other,
                property = side.property,
                owner = %side.owner,
                "Loaded reciprocal relation after junction change"
            );
            return loaded;
        }
        let member = match change {
            Mirror::Link(row) => Some(wrap_member(side.owner, side.junction, side.bridge, Some(row))?),
            Mirror::Unlink => None,
        };

        let record = self.record_mut(other)?;
        if let Some(RelationSlot::Resolved(members)) = record
            .instance
            .as_mut()
            .and_then(|instance| instance.has_many_mut(side.property))
        {
            apply_member(members, side.owner, member.as_ref());
        }
        if let Some(members) = record.realized_has_many.get_mut(side.property) {
            apply_member(members, side.owner, member.as_ref());
        }
        if let Some(rows) = record.realized_junctions.get_mut(side.property) {
            match change {
                Mirror::Link(row) => {
                    rows.insert(side.owner_index.clone(), row.clone());
                }
                Mirror::Unlink => {
                    rows.remove(&side.owner_index);
                }
            }
        }
        tracing::debug!(
            instance = %other,
            property = side.property,
            owner = %side.owner,
            linked = member.is_some(),
            "Mirrored junction change"
        );
        Ok(())
    }

    /// Live instance mapped at (model, index), if any.
    pub(crate) fn find_mapped(&self, model: &str, index: &Index) -> Option<InstanceId> {
        self.lookup(model, index).ok().flatten()
    }
}

fn apply_member(members: &mut Vec<Member>, owner: InstanceId, member: Option<&Member>) {
    match member {
        Some(member) => match members.iter_mut().find(|m| m.id() == owner) {
            Some(existing) => *existing = member.clone(),
            None => members.push(member.clone()),
        },
        None => members.retain(|m| m.id() != owner),
    }
}
