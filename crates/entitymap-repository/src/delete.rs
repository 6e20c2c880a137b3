//! Deleting instances.

use entitymap_core::{Error, ModelConfig, Result};

use crate::index::{Index, Key};
use crate::instance::{InstanceId, RelationSlot};
use crate::lifecycle::LifecycleEvent;
use crate::object::ObjectState;
use crate::options::GetOptions;
use crate::Repository;

impl Repository {
    /// Delete an instance from its backend and from the identity map.
    ///
    /// Idempotent: deleting a deleted handle is a no-op. The instance is
    /// stripped of its fields and removed from every realized hasMany
    /// relation of the instances still mapped. An instance that was never
    /// persisted only leaves the map.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn delete(&mut self, id: InstanceId) -> Result<()> {
        if self.retired.contains(&id) {
            return Ok(());
        }
        self.check_bound(id)?;
        let (model, index) = self.location(id)?;
        let config = self.model_config(&model)?;
        let previous = self.record(id)?.state;
        match previous {
            ObjectState::Deleting => return Ok(()),
            ObjectState::Saving | ObjectState::Retrieving => {
                return Err(Error::InvalidState(format!(
                    "{} cannot be deleted while {}",
                    id,
                    previous.as_str()
                )));
            }
            _ => {}
        }

        self.record_mut(id)?.state = ObjectState::Deleting;
        if let Err(e) = self.delete_steps(id, &config) {
            if let Ok(record) = self.record_mut(id) {
                record.state = previous;
            }
            return Err(e);
        }
        self.retire(id, &config, &index);
        tracing::info!(model = %model, index = %index, instance = %id, "Deleted");
        Ok(())
    }

    /// Delete by identity, loading the record first when it is not mapped.
    /// A missing record is not an error.
    pub fn delete_by_key(&mut self, model: &str, key: impl Into<Key>) -> Result<()> {
        let key = key.into();
        let id = match self.mapped(model, key.clone())? {
            Some(id) => id,
            None => match self.get(model, key, &GetOptions::default()) {
                Ok(id) => id,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            },
        };
        self.delete(id)
    }

    fn delete_steps(&mut self, id: InstanceId, config: &ModelConfig) -> Result<()> {
        self.fire(LifecycleEvent::Deleting, id)?;
        let data = self.record(id)?.data.clone();
        if let Some(data) = data {
            self.backend_for(config)?.delete(&data, config)?;
        }
        self.fire(LifecycleEvent::Deleted, id)
    }

    /// Strip the instance, drop its entry and detach it from realized
    /// hasMany relations pointing at its model.
    fn retire(&mut self, id: InstanceId, config: &ModelConfig, index: &Index) {
        if let Ok(record) = self.record_mut(id) {
            record.state = ObjectState::Deleted;
            if let Some(instance) = record.instance.as_mut() {
                instance.clear();
            }
        }
        self.forget(id);
        self.retired.insert(id);
        self.saving.remove(&id);
        self.loading.remove(&id);

        let relations: Vec<(String, String, bool)> = self
            .models
            .values()
            .flat_map(|owner| {
                owner
                    .has_many
                    .iter()
                    .filter(|(_, spec)| spec.model == config.name)
                    .map(|(property, spec)| {
                        (owner.name.clone(), property.clone(), spec.is_many_to_many())
                    })
            })
            .collect();

        let mut detached = 0;
        for (owner, property, many_to_many) in relations {
            let Some(entries) = self.objects.get_mut(&owner) else {
                continue;
            };
            for record in entries.values_mut() {
                if let Some(RelationSlot::Resolved(members)) = record
                    .instance
                    .as_mut()
                    .and_then(|instance| instance.has_many_mut(&property))
                {
                    let before = members.len();
                    members.retain(|m| m.id() != id);
                    detached += before - members.len();
                }
                if let Some(members) = record.realized_has_many.get_mut(&property) {
                    members.retain(|m| m.id() != id);
                }
                if many_to_many {
                    if let Some(rows) = record.realized_junctions.get_mut(&property) {
                        rows.remove(index);
                    }
                }
            }
        }
        tracing::debug!(instance = %id, detached, "Retired instance");
    }
}
