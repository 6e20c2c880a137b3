//! Placeholder resolution.
//!
//! A relation slot starts out as a [`Placeholder`] when its contents are
//! not in memory yet. Resolving it loads the target(s) through the
//! identity map and replaces the slot in place, once. A placeholder is
//! only honoured by the instance that holds it as its container; a copy
//! found anywhere else adopts whatever its container ends up holding.

use std::collections::BTreeMap;

use entitymap_core::{
    BelongsToSpec, Condition, Error, HasManySpec, JunctionSpec, ModelConfig, PropertyKind, Query,
    Result, Row, Value,
};

use crate::index::{Index, Key};
use crate::instance::{InstanceId, Junction, Member, Placeholder, Property, RelationSlot};
use crate::object::ObjectState;
use crate::options::GetOptions;
use crate::Repository;

impl Repository {
    /// Resolve the relation `property` of `id` in place.
    ///
    /// A no-op when the slot is already resolved.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn resolve(&mut self, id: InstanceId, property: &str) -> Result<()> {
        let (model, _) = self.location(id)?;
        let config = self.model_config(&model)?;
        let instance = self.instance(id)?;
        let placeholder = match config.kind_of(property) {
            Some(PropertyKind::BelongsTo) => instance
                .belongs_to(property)
                .and_then(RelationSlot::placeholder)
                .cloned(),
            Some(PropertyKind::HasMany) => instance
                .has_many(property)
                .and_then(RelationSlot::placeholder)
                .cloned(),
            Some(PropertyKind::Plain) => {
                return Err(Error::InvalidState(format!(
                    "{}.{} is not a relation",
                    model, property
                )));
            }
            None => return Err(Error::unknown_property(&model, property)),
        };
        let Some(placeholder) = placeholder else {
            return Ok(());
        };

        if placeholder.container != id {
            return self.adopt_from_container(id, property, &placeholder);
        }
        let reference = &placeholder.reference;
        if reference.repository != self.config.name
            || reference.model != config.name
            || reference.property != property
        {
            return Err(Error::NotBound(format!(
                "placeholder {} cannot be resolved as {}:{}.{}",
                reference, self.config.name, config.name, property
            )));
        }

        if let Some(spec) = config.belongs_to.get(property) {
            self.resolve_belongs_to(id, &config, property, spec, &placeholder)
        } else if let Some(spec) = config.has_many.get(property) {
            self.resolve_has_many(id, &config, property, spec, &placeholder)
        } else {
            Ok(())
        }
    }

    /// A slot that holds another container's placeholder takes over the
    /// container's resolved value.
    fn adopt_from_container(
        &mut self,
        id: InstanceId,
        property: &str,
        placeholder: &Placeholder,
    ) -> Result<()> {
        let container = placeholder.container;
        tracing::warn!(
            target: "entitymap::placeholder",
            instance = %id,
            container = %container,
            property,
            "Placeholder is held by a copy of its container; adopting the container's value"
        );
        if !self.is_bound(container) {
            return Err(Error::NotBound(format!(
                "{} holds a placeholder of {}, which is no longer mapped",
                id, container
            )));
        }
        self.resolve(container, property)?;
        let current = self.instance(container)?.property(property).cloned();

        let instance = self.instance_mut(id)?;
        match (instance.fields.get_mut(property), current) {
            (
                Some(Property::BelongsTo(slot)),
                Some(Property::BelongsTo(RelationSlot::Resolved(target))),
            ) => {
                slot.fill(placeholder.token, target);
            }
            (
                Some(Property::HasMany(slot)),
                Some(Property::HasMany(RelationSlot::Resolved(members))),
            ) => {
                slot.fill(placeholder.token, members);
            }
            _ => {}
        }
        Ok(())
    }

    // ========================================================================
    // belongsTo
    // ========================================================================

    fn resolve_belongs_to(
        &mut self,
        id: InstanceId,
        config: &ModelConfig,
        property: &str,
        spec: &BelongsToSpec,
        placeholder: &Placeholder,
    ) -> Result<()> {
        let key = self.pending_key(id, spec, placeholder)?;
        let target = if key.is_null() {
            None
        } else {
            self.tracker.record_load(&config.name, property);
            Some(self.load_target(spec, key)?)
        };
        if let Some(slot) = self.instance_mut(id)?.belongs_to_mut(property) {
            slot.fill(placeholder.token, target);
        }
        tracing::debug!(
            model = %config.name,
            property,
            instance = %id,
            found = target.is_some(),
            "Resolved belongsTo"
        );
        Ok(())
    }

    /// Foreign key behind an unresolved belongsTo slot: the stored column
    /// unless the instance is new, then the key the placeholder was
    /// created with, then the relation default.
    pub(crate) fn pending_key(
        &self,
        id: InstanceId,
        spec: &BelongsToSpec,
        placeholder: &Placeholder,
    ) -> Result<Value> {
        let record = self.record(id)?;
        let stored = match record.state {
            ObjectState::New => None,
            _ => record.data.as_ref().map(|data| data.get_or_null(&spec.reference)),
        };
        Ok(stored
            .or_else(|| placeholder.key.clone())
            .or_else(|| spec.default.clone())
            .unwrap_or(Value::Null))
    }

    fn load_target(&mut self, spec: &BelongsToSpec, key: Value) -> Result<InstanceId> {
        if spec.use_index {
            return self.get(&spec.model, Key::Single(key), &GetOptions::default());
        }

        let target = self.model_config(&spec.model)?;
        let column = match spec.id.as_deref().or_else(|| target.single_identity()) {
            Some(column) => column.to_string(),
            None => {
                return Err(Error::config(format!(
                    "{} has no single identity to reference",
                    target.name
                )));
            }
        };
        let query = Query::new().filter(Condition::eq(column.as_str(), key.clone()));
        let mut rows = self.backend_for(&target)?.all(&target, &query)?;
        if rows.len() > 1 {
            return Err(Error::AmbiguousMatch {
                model: target.name.clone(),
                count: rows.len(),
            });
        }
        match rows.pop() {
            Some(row) => self.adopt_row(&target, row),
            None => Err(Error::not_found(&target.name, format!("{} = {}", column, key))),
        }
    }

    // ========================================================================
    // hasMany
    // ========================================================================

    fn resolve_has_many(
        &mut self,
        id: InstanceId,
        config: &ModelConfig,
        property: &str,
        spec: &HasManySpec,
        placeholder: &Placeholder,
    ) -> Result<()> {
        let snapshot = self.record(id)?.realized_has_many.get(property).cloned();
        let members = match snapshot {
            Some(members) => members,
            None => self.fetch_members(id, config, property, spec)?,
        };
        let count = members.len();
        if let Some(slot) = self.instance_mut(id)?.has_many_mut(property) {
            slot.fill(placeholder.token, members);
        }
        tracing::debug!(
            model = %config.name,
            property,
            instance = %id,
            members = count,
            "Resolved hasMany"
        );
        Ok(())
    }

    /// Load the members of a hasMany relation and record them as the
    /// baseline for the next save.
    fn fetch_members(
        &mut self,
        id: InstanceId,
        config: &ModelConfig,
        property: &str,
        spec: &HasManySpec,
    ) -> Result<Vec<Member>> {
        let state = self.record(id)?.state;
        let owner_key = self.owner_key(id, config, spec)?;

        let (members, junction_rows) = if state == ObjectState::New || owner_key.is_null() {
            let rows = spec.junction.as_ref().map(|_| BTreeMap::new());
            (Vec::new(), rows)
        } else {
            self.tracker.record_load(&config.name, property);
            let target = self.model_config(&spec.model)?;
            match &spec.junction {
                None => {
                    let query = Query {
                        conditions: spec.conditions.clone(),
                        ..Query::default()
                    };
                    let rows = self.backend_for(&target)?.related(
                        &target,
                        &spec.reference,
                        &owner_key,
                        &query,
                    )?;
                    let mut members = Vec::with_capacity(rows.len());
                    for row in rows {
                        members.push(Member::Instance(self.adopt_row(&target, row)?));
                    }
                    (members, None)
                }
                Some(junction) => {
                    let (members, rows) = self.fetch_through(&target, spec, junction, &owner_key)?;
                    (members, Some(rows))
                }
            }
        };

        let record = self.record_mut(id)?;
        record
            .realized_has_many
            .insert(property.to_string(), members.clone());
        if let Some(rows) = junction_rows {
            record.realized_junctions.insert(property.to_string(), rows);
        }
        Ok(members)
    }

    /// Many-to-many: junction rows of the owner, then the targets they
    /// point at, each tagged with its bridge row.
    fn fetch_through(
        &mut self,
        target: &ModelConfig,
        spec: &HasManySpec,
        junction: &JunctionSpec,
        owner_key: &Value,
    ) -> Result<(Vec<Member>, BTreeMap<Index, Row>)> {
        let bridge = self.junction_config(&junction.model)?;
        let rows = self
            .backend_for(&bridge)?
            .related(&bridge, &spec.reference, owner_key, &Query::new())?;
        let target_column = target
            .single_identity()
            .ok_or_else(|| {
                Error::config(format!("{} has no single identity to reference", target.name))
            })?
            .to_string();

        let mut by_target = BTreeMap::new();
        let mut keys = Vec::new();
        for row in rows {
            let foreign = row.get_or_null(&junction.foreign);
            if foreign.is_null() {
                continue;
            }
            let index = Index::of_row(target, &Row::new().with(target_column.as_str(), foreign.clone()))?;
            if by_target.insert(index, row).is_none() {
                keys.push(foreign);
            }
        }
        if keys.is_empty() {
            return Ok((Vec::new(), BTreeMap::new()));
        }

        let mut query = Query::new().filter(Condition::is_in(target_column.as_str(), keys));
        query.conditions.extend(spec.conditions.iter().cloned());
        let rows = self.backend_for(target)?.all(target, &query)?;

        let mut members = Vec::with_capacity(rows.len());
        let mut realized = BTreeMap::new();
        for row in rows {
            let index = Index::of_row(target, &row)?;
            let linked = self.adopt_row(target, row)?;
            let bridge_row = by_target.remove(&index);
            members.push(wrap_member(linked, junction, &bridge, bridge_row.as_ref())?);
            if let Some(bridge_row) = bridge_row {
                realized.insert(index, bridge_row);
            }
        }
        Ok((members, realized))
    }

    /// Value of the owner's referenced column, as last stored. NULL while
    /// the owner has no backend data.
    pub(crate) fn owner_key(
        &self,
        id: InstanceId,
        config: &ModelConfig,
        spec: &HasManySpec,
    ) -> Result<Value> {
        let column = spec
            .id
            .as_deref()
            .or_else(|| config.single_identity())
            .ok_or_else(|| {
                Error::config(format!("{} has no single identity to reference", config.name))
            })?;
        Ok(self
            .record(id)?
            .data
            .as_ref()
            .map_or(Value::Null, |data| data.get_or_null(column)))
    }
}

/// Wrap a linked instance in a [`Junction`] when the relation carries
/// bridge fields. Bridge values go through the junction model's read
/// filters.
pub(crate) fn wrap_member(
    linked: InstanceId,
    junction: &JunctionSpec,
    bridge: &ModelConfig,
    row: Option<&Row>,
) -> Result<Member> {
    if !junction.has_fields() {
        return Ok(Member::Instance(linked));
    }
    let mut fields = Row::new();
    for (column, property) in &junction.fields {
        let mut value = row.map_or(Value::Null, |row| row.get_or_null(column));
        if let Some(filter) = bridge.property_of(column).and_then(|p| bridge.filters.get(p)) {
            value = filter.read(value)?;
        }
        fields.insert(property.as_str(), value);
    }
    Ok(Member::Junction(Junction {
        instance: linked,
        model: junction.model.clone(),
        fields,
        closed: junction.closed,
    }))
}

#[cfg(test)]
mod tests {
    use entitymap_core::{Error, Row, Value};
    use entitymap_memory::CallKind;

    use crate::options::GetOptions;
    use crate::test_support::{fixture, seed_shop};
    use crate::Member;

    #[test]
    fn test_belongs_to_resolves_once() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);

        let order = repo.get("Order", 10, &GetOptions::default()).unwrap();
        assert!(!repo.is_resolved(order, "customer").unwrap());
        assert_eq!(repo.related_key(order, "customer").unwrap(), Some(Value::Int(1)));

        let first = repo.related(order, "customer").unwrap();
        let second = repo.related(order, "customer").unwrap();
        assert_eq!(first, second);
        assert_eq!(handle.count_for(CallKind::Get, "Customer"), 1);
        assert_eq!(repo.lazy_load_count("Order", "customer"), 1);
    }

    #[test]
    fn test_belongs_to_reuses_mapped_target() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);

        let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
        let order = repo.get("Order", 10, &GetOptions::default()).unwrap();
        assert_eq!(repo.related(order, "customer").unwrap(), Some(alice));
        assert_eq!(handle.count_for(CallKind::Get, "Customer"), 1);
    }

    #[test]
    fn test_null_foreign_key_is_resolved_empty() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);

        let orphan = repo.get("Order", 12, &GetOptions::default()).unwrap();
        assert!(repo.is_resolved(orphan, "customer").unwrap());
        assert_eq!(repo.related(orphan, "customer").unwrap(), None);
    }

    #[test]
    fn test_has_many_direct_and_snapshot() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);

        let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
        let orders = repo.related_many(alice, "orders").unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(handle.count_for(CallKind::Related, "Order"), 1);

        // The order is shared with the identity map.
        let order = repo.get("Order", 10, &GetOptions::default()).unwrap();
        assert!(orders.contains(&order));
        assert_eq!(handle.count(CallKind::Get), 1);
    }

    #[test]
    fn test_many_to_many_through_junction() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);

        let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
        let members = repo.members(alice, "groups").unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| matches!(m, Member::Junction(_))));
        assert_eq!(handle.count_for(CallKind::Related, "Membership"), 1);
        assert_eq!(handle.count_for(CallKind::All, "Group"), 1);

        let admin = members
            .iter()
            .find(|m| m.junction().and_then(|j| j.field("role")) == Some(&Value::from("admin")));
        assert!(admin.is_some());
    }

    #[test]
    fn test_new_owner_has_empty_collections() {
        let (mut repo, handle) = fixture();
        let id = repo.create("Customer", Row::new()).unwrap();
        assert!(repo.related_many(id, "orders").unwrap().is_empty());
        assert!(repo.related_many(id, "groups").unwrap().is_empty());
        assert!(handle.log().calls().is_empty());
    }

    #[test]
    fn test_resolve_rejects_plain_property() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);
        let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
        assert!(matches!(repo.resolve(alice, "name"), Err(Error::InvalidState(_))));
        assert!(matches!(
            repo.resolve(alice, "nickname"),
            Err(Error::UnknownProperty { .. })
        ));
    }

    #[test]
    fn test_duplicate_adopts_container_value() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);

        let order = repo.get("Order", 10, &GetOptions::default()).unwrap();
        let copy = repo.duplicate(order).unwrap();
        let placeholder = repo
            .instance(copy)
            .unwrap()
            .property("customer")
            .cloned()
            .unwrap();
        assert!(matches!(
            placeholder,
            crate::Property::BelongsTo(crate::RelationSlot::Unresolved(ref p)) if p.container() == order
        ));

        let via_copy = repo.related(copy, "customer").unwrap();
        assert!(repo.is_resolved(order, "customer").unwrap());
        assert_eq!(via_copy, repo.related(order, "customer").unwrap());
        assert_eq!(handle.count_for(CallKind::Get, "Customer"), 1);
    }

    #[test]
    fn test_foreign_placeholder_is_refused() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);
        let order = repo.get("Order", 10, &GetOptions::default()).unwrap();
        if let Some(crate::Property::BelongsTo(crate::RelationSlot::Unresolved(p))) = repo
            .instance_mut(order)
            .unwrap()
            .fields
            .get_mut("customer")
        {
            p.reference.repository = "elsewhere".to_string();
        }
        assert!(matches!(repo.resolve(order, "customer"), Err(Error::NotBound(_))));
    }
}
