//! Reloading instances from their backend.

use entitymap_core::{Error, Result};

use crate::index::Index;
use crate::instance::InstanceId;
use crate::lifecycle::LifecycleEvent;
use crate::object::ObjectState;
use crate::options::ReloadOptions;
use crate::Repository;

impl Repository {
    /// Re-fetch an instance and rebuild its fields from the stored row.
    ///
    /// Refuses with `PendingChanges` when the instance differs from its
    /// stored data, unless `discard_changes` is set. Relation slots become
    /// placeholders again and realized baselines are dropped.
    #[tracing::instrument(level = "debug", skip(self, options))]
    pub fn reload(&mut self, id: InstanceId, options: &ReloadOptions) -> Result<()> {
        self.check_bound(id)?;
        let (model, index) = self.location(id)?;
        let config = self.model_config(&model)?;
        let record = self.record(id)?;
        let data = match (record.state, &record.data) {
            (ObjectState::Retrieved | ObjectState::Saved, Some(data)) => data.clone(),
            (state, _) => {
                return Err(Error::InvalidState(format!(
                    "{} cannot be reloaded while {}",
                    id,
                    state.as_str()
                )));
            }
        };

        if !options.discard_changes {
            let projected = self.project(id, &config)?;
            let columns = projected.changed_columns(&data.project(projected.columns()));
            if !columns.is_empty() {
                return Err(Error::PendingChanges {
                    model,
                    index: index.to_string(),
                    columns,
                });
            }
        }

        let identity = config.identity_of(&data);
        let row = self.backend_for(&config)?.get(&identity, &config)?;
        match Index::of_row(&config, &row) {
            Ok(actual) if actual == index => {}
            other => {
                return Err(Error::IndexMismatch {
                    model,
                    expected: index.to_string(),
                    actual: other.map_or_else(|_| "<none>".to_string(), |i| i.to_string()),
                });
            }
        }

        let instance = self.instance_from_row(&config, id, &row)?;
        let record = self.record_mut(id)?;
        record.instance = Some(instance);
        record.data = Some(row);
        record.state = ObjectState::Retrieved;
        record.forget_realized();
        tracing::debug!(model = %model, index = %index, instance = %id, "Reloaded");
        self.fire(LifecycleEvent::Load, id)
    }

    /// Reload every persisted instance of `model`; returns how many were
    /// reloaded.
    #[tracing::instrument(level = "debug", skip(self, options))]
    pub fn reload_all(&mut self, model: &str, options: &ReloadOptions) -> Result<usize> {
        self.model_config(model)?;
        let mut ids: Vec<InstanceId> = self
            .objects
            .get(model)
            .map(|entries| {
                entries
                    .values()
                    .filter(|record| {
                        matches!(record.state, ObjectState::Retrieved | ObjectState::Saved)
                            && record.data.is_some()
                    })
                    .filter_map(|record| record.id)
                    .collect()
            })
            .unwrap_or_default();
        ids.sort();

        for id in &ids {
            self.reload(*id, options)?;
        }
        Ok(ids.len())
    }
}

#[cfg(test)]
mod tests {
    use entitymap_core::{Error, Row, Value};

    use crate::options::{GetOptions, ReloadOptions};
    use crate::test_support::{customer, fixture, seed_shop};
    use crate::ObjectState;

    #[test]
    fn test_reload_picks_up_backend_changes() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);

        let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
        repo.related_many(alice, "orders").unwrap();

        // Another writer changes the row behind the repository's back.
        assert!(handle.touch(
            &customer(),
            &Row::new().with("id", 1_i64).with("name", "Alice Smith"),
        ));

        repo.reload(alice, &ReloadOptions::default()).unwrap();
        assert_eq!(repo.value(alice, "name").unwrap(), Value::from("Alice Smith"));
        assert!(!repo.is_resolved(alice, "orders").unwrap());
        assert_eq!(repo.state_of(alice), Some(ObjectState::Retrieved));
    }

    #[test]
    fn test_reload_refuses_pending_changes() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);

        let alice = repo.get("Customer", 1, &GetOptions::default()).unwrap();
        repo.set(alice, "name", "Changed").unwrap();
        let err = repo.reload(alice, &ReloadOptions::default()).unwrap_err();
        match err {
            Error::PendingChanges { columns, .. } => assert_eq!(columns, vec!["name".to_string()]),
            other => panic!("unexpected error: {other}"),
        }

        repo.reload(alice, &ReloadOptions::new().discard_changes(true))
            .unwrap();
        assert_eq!(repo.value(alice, "name").unwrap(), Value::from("Alice"));
    }

    #[test]
    fn test_reload_new_instance_fails() {
        let (mut repo, _handle) = fixture();
        let id = repo.create("Customer", Row::new()).unwrap();
        assert!(matches!(
            repo.reload(id, &ReloadOptions::default()),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_reload_all() {
        let (mut repo, handle) = fixture();
        seed_shop(&handle);

        repo.get("Customer", 1, &GetOptions::default()).unwrap();
        repo.get("Customer", 2, &GetOptions::default()).unwrap();
        repo.create("Customer", Row::new()).unwrap();
        assert_eq!(repo.reload_all("Customer", &ReloadOptions::default()).unwrap(), 2);
    }
}
