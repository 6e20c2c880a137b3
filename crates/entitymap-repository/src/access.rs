//! Property access on mapped instances.
//!
//! Plain properties are read and written directly. Relation properties go
//! through `related`/`members`, which resolve a placeholder on first use,
//! and through the `set_*` methods, which replace the slot contents; the
//! next save diffs them against the realized baseline.

use std::collections::HashSet;
use std::sync::Arc;

use entitymap_core::{Error, ModelConfig, PropertyKind, Result, Value};

use crate::instance::{InstanceId, Junction, Member, Property, RelationSlot};
use crate::Repository;

impl Repository {
    // ========================================================================
    // Plain Properties
    // ========================================================================

    /// Value of a plain property.
    pub fn value(&self, id: InstanceId, property: &str) -> Result<Value> {
        let instance = self.instance(id)?;
        match instance.property(property) {
            Some(Property::Scalar(value)) => Ok(value.clone()),
            Some(_) => Err(Error::InvalidState(format!(
                "{}.{} is a relation",
                instance.model(),
                property
            ))),
            None => Err(Error::unknown_property(instance.model(), property)),
        }
    }

    /// Set a plain property.
    pub fn set(&mut self, id: InstanceId, property: &str, value: impl Into<Value>) -> Result<()> {
        self.check_bound(id)?;
        let instance = self.instance_mut(id)?;
        let model = instance.model().to_string();
        match instance.fields.get_mut(property) {
            Some(Property::Scalar(slot)) => {
                *slot = value.into();
                Ok(())
            }
            Some(_) => Err(Error::InvalidState(format!(
                "{}.{} is a relation",
                model, property
            ))),
            None => Err(Error::unknown_property(model, property)),
        }
    }

    /// True once a relation slot holds real values.
    pub fn is_resolved(&self, id: InstanceId, property: &str) -> Result<bool> {
        let instance = self.instance(id)?;
        match instance.property(property) {
            Some(Property::BelongsTo(slot)) => Ok(slot.is_resolved()),
            Some(Property::HasMany(slot)) => Ok(slot.is_resolved()),
            Some(Property::Scalar(_)) => Err(Error::InvalidState(format!(
                "{}.{} is not a relation",
                instance.model(),
                property
            ))),
            None => Err(Error::unknown_property(instance.model(), property)),
        }
    }

    // ========================================================================
    // belongsTo
    // ========================================================================

    /// Target of a belongsTo relation, resolving it if needed.
    pub fn related(&mut self, id: InstanceId, property: &str) -> Result<Option<InstanceId>> {
        self.relation_config(id, property, PropertyKind::BelongsTo)?;
        self.resolve(id, property)?;
        match self.instance(id)?.belongs_to(property) {
            Some(RelationSlot::Resolved(target)) => Ok(*target),
            _ => Err(Error::InvalidState(format!(
                "{} could not resolve {}",
                id, property
            ))),
        }
    }

    /// Identity of a belongsTo target without resolving the relation.
    pub fn related_key(&self, id: InstanceId, property: &str) -> Result<Option<Value>> {
        let config = self.relation_config(id, property, PropertyKind::BelongsTo)?;
        let Some(spec) = config.belongs_to.get(property) else {
            return Ok(None);
        };
        let key = match self.instance(id)?.belongs_to(property) {
            Some(RelationSlot::Unresolved(placeholder)) => self.pending_key(id, spec, placeholder)?,
            Some(RelationSlot::Resolved(Some(target))) if self.is_bound(*target) => {
                let target_config = self.model_config(&spec.model)?;
                let column = spec
                    .id
                    .as_deref()
                    .or_else(|| target_config.single_identity())
                    .unwrap_or_default();
                self.referenced_value(*target, &target_config, column)?
            }
            Some(RelationSlot::Resolved(Some(_))) => self
                .record(id)?
                .data
                .as_ref()
                .map_or(Value::Null, |data| data.get_or_null(&spec.reference)),
            Some(RelationSlot::Resolved(None)) | None => Value::Null,
        };
        Ok(Some(key).filter(|key| !key.is_null()))
    }

    /// Point a belongsTo relation at `target`, or clear it.
    pub fn set_related(
        &mut self,
        id: InstanceId,
        property: &str,
        target: Option<InstanceId>,
    ) -> Result<()> {
        let config = self.relation_config(id, property, PropertyKind::BelongsTo)?;
        if let (Some(target), Some(spec)) = (target, config.belongs_to.get(property)) {
            self.check_member_model(target, &spec.model)?;
        }
        if let Some(slot) = self.instance_mut(id)?.belongs_to_mut(property) {
            *slot = RelationSlot::Resolved(target);
        }
        Ok(())
    }

    // ========================================================================
    // hasMany
    // ========================================================================

    /// Handles of a hasMany relation's members, resolving it if needed.
    pub fn related_many(&mut self, id: InstanceId, property: &str) -> Result<Vec<InstanceId>> {
        Ok(self
            .members(id, property)?
            .iter()
            .map(Member::id)
            .collect())
    }

    /// Members of a hasMany relation, junction wrappers included.
    pub fn members(&mut self, id: InstanceId, property: &str) -> Result<Vec<Member>> {
        self.relation_config(id, property, PropertyKind::HasMany)?;
        self.resolve(id, property)?;
        match self.instance(id)?.has_many(property) {
            Some(RelationSlot::Resolved(members)) => Ok(members.clone()),
            _ => Err(Error::InvalidState(format!(
                "{} could not resolve {}",
                id, property
            ))),
        }
    }

    /// Replace the members of a hasMany relation.
    ///
    /// Duplicates are dropped. On a relation with bridge fields plain
    /// handles are wrapped in junctions, reusing the bridge values of
    /// members that are already present.
    pub fn set_related_many(
        &mut self,
        id: InstanceId,
        property: &str,
        members: Vec<Member>,
    ) -> Result<()> {
        let config = self.relation_config(id, property, PropertyKind::HasMany)?;
        let Some(spec) = config.has_many.get(property) else {
            return Ok(());
        };
        let current = self.members(id, property)?;
        let bridge = spec.junction.as_ref().filter(|junction| junction.has_fields());

        let mut seen = HashSet::new();
        let mut normalized = Vec::with_capacity(members.len());
        for member in members {
            let linked = member.id();
            if !seen.insert(linked) {
                continue;
            }
            self.check_member_model(linked, &spec.model)?;
            let member = match (bridge, member) {
                (Some(junction), Member::Junction(mut wrapper)) => {
                    if junction.closed {
                        let declared: HashSet<&str> =
                            junction.fields.values().map(String::as_str).collect();
                        if let Some((field, _)) =
                            wrapper.fields.iter().find(|(field, _)| !declared.contains(field.as_str()))
                        {
                            return Err(Error::unknown_property(&junction.model, field));
                        }
                    }
                    wrapper.model.clone_from(&junction.model);
                    wrapper.closed = junction.closed;
                    Member::Junction(wrapper)
                }
                (Some(junction), Member::Instance(linked)) => current
                    .iter()
                    .find(|m| m.id() == linked && m.junction().is_some())
                    .cloned()
                    .unwrap_or_else(|| {
                        Member::Junction(Junction {
                            instance: linked,
                            model: junction.model.clone(),
                            fields: junction
                                .fields
                                .values()
                                .map(|p| (p.clone(), Value::Null))
                                .collect(),
                            closed: junction.closed,
                        })
                    }),
                (None, member) => Member::Instance(member.id()),
            };
            normalized.push(member);
        }

        if let Some(slot) = self.instance_mut(id)?.has_many_mut(property) {
            *slot = RelationSlot::Resolved(normalized);
        }
        Ok(())
    }

    /// Append a member to a hasMany relation.
    pub fn push_related(
        &mut self,
        id: InstanceId,
        property: &str,
        member: impl Into<Member>,
    ) -> Result<()> {
        let mut members = self.members(id, property)?;
        members.push(member.into());
        self.set_related_many(id, property, members)
    }

    /// Remove a member from a hasMany relation; false when it was absent.
    pub fn remove_related(
        &mut self,
        id: InstanceId,
        property: &str,
        target: InstanceId,
    ) -> Result<bool> {
        let mut members = self.members(id, property)?;
        let before = members.len();
        members.retain(|m| m.id() != target);
        if members.len() == before {
            return Ok(false);
        }
        self.set_related_many(id, property, members)?;
        Ok(true)
    }

    // ========================================================================
    // Junction Routing
    // ========================================================================

    /// Read `field` through a hasMany member: a plain property of the
    /// linked instance first, a bridge field second.
    pub fn member_value(
        &mut self,
        owner: InstanceId,
        property: &str,
        target: InstanceId,
        field: &str,
    ) -> Result<Value> {
        let member = self.find_member(owner, property, target)?;
        if self.is_bound(target) {
            if let Some(Property::Scalar(value)) = self.instance(target)?.property(field) {
                return Ok(value.clone());
            }
        }
        match member.junction().and_then(|junction| junction.field(field)) {
            Some(value) => Ok(value.clone()),
            None => Err(Error::unknown_property(self.member_model(&member), field)),
        }
    }

    /// Write `field` through a hasMany member: a plain property of the
    /// linked instance first, a bridge field second. Closed junctions
    /// refuse bridge fields they do not declare.
    pub fn set_member_value(
        &mut self,
        owner: InstanceId,
        property: &str,
        target: InstanceId,
        field: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        let value = value.into();
        let member = self.find_member(owner, property, target)?;
        let plain = self.is_bound(target)
            && matches!(
                self.instance(target)?.property(field),
                Some(Property::Scalar(_))
            );
        if plain {
            return self.set(target, field, value);
        }
        if member.junction().is_none() {
            return Err(Error::unknown_property(self.member_model(&member), field));
        }
        if let Some(RelationSlot::Resolved(members)) = self.instance_mut(owner)?.has_many_mut(property) {
            for member in members.iter_mut() {
                if let Member::Junction(junction) = member {
                    if junction.instance == target {
                        return junction.set_field(field, value);
                    }
                }
            }
        }
        Ok(())
    }

    fn find_member(&mut self, owner: InstanceId, property: &str, target: InstanceId) -> Result<Member> {
        self.members(owner, property)?
            .into_iter()
            .find(|m| m.id() == target)
            .ok_or_else(|| {
                Error::not_found(
                    self.model_of(owner).unwrap_or_default(),
                    format!("{} in {}", target, property),
                )
            })
    }

    fn member_model(&self, member: &Member) -> String {
        match member {
            Member::Junction(junction) => junction.model.clone(),
            Member::Instance(id) => self.model_of(*id).unwrap_or_default().to_string(),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Config of `id`'s model, after checking `property` is a relation of
    /// the expected kind.
    fn relation_config(
        &self,
        id: InstanceId,
        property: &str,
        expected: PropertyKind,
    ) -> Result<Arc<ModelConfig>> {
        let (model, _) = self.location(id)?;
        let config = self.model_config(&model)?;
        match config.kind_of(property) {
            Some(kind) if kind == expected => Ok(config),
            Some(_) => Err(Error::InvalidState(format!(
                "{}.{} is not a {} relation",
                model,
                property,
                match expected {
                    PropertyKind::BelongsTo => "belongsTo",
                    PropertyKind::HasMany => "hasMany",
                    PropertyKind::Plain => "plain",
                }
            ))),
            None => Err(Error::unknown_property(model, property)),
        }
    }

    /// Instances of this repository must be live and of `model`; handles
    /// of other repositories are left to the save options.
    pub(crate) fn check_member_model(&self, target: InstanceId, model: &str) -> Result<()> {
        if target.repository != self.serial {
            return Ok(());
        }
        self.check_bound(target)?;
        match self.model_of(target) {
            Some(actual) if actual == model => Ok(()),
            actual => Err(Error::InvalidState(format!(
                "{} is a {}, expected {}",
                target,
                actual.unwrap_or("<unmapped>"),
                model
            ))),
        }
    }

    /// Backend value of `column` on a live target: the plain property
    /// through its write filter, else the stored column.
    pub(crate) fn referenced_value(
        &self,
        target: InstanceId,
        config: &ModelConfig,
        column: &str,
    ) -> Result<Value> {
        let record = self.record(target)?;
        if let Some(property) = config.property_of(column) {
            if let Some(value) = record.instance.as_ref().and_then(|i| i.value(property)) {
                return match config.filters.get(property) {
                    Some(filter) => filter.write(value.clone()),
                    None => Ok(value.clone()),
                };
            }
        }
        Ok(record
            .data
            .as_ref()
            .map_or(Value::Null, |data| data.get_or_null(column)))
    }
}
