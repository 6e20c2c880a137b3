//! Instance lifecycle hooks.

use std::fmt;

use entitymap_core::Result;

use crate::instance::{Instance, InstanceId};

/// Points in an instance's life at which hooks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// After `Repository::create` built the instance.
    Create,
    /// After the instance was loaded or reloaded from the backend.
    Load,
    /// Before the instance is written.
    Saving,
    /// After the instance and its relations were written.
    Saved,
    /// Before the backend delete.
    Deleting,
    /// After the backend delete, before the fields are stripped.
    Deleted,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Create => "create",
            LifecycleEvent::Load => "load",
            LifecycleEvent::Saving => "saving",
            LifecycleEvent::Saved => "saved",
            LifecycleEvent::Deleting => "deleting",
            LifecycleEvent::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// Per-model lifecycle callbacks.
///
/// An error returned from a hook aborts the operation that fired it.
pub trait LifecycleHooks {
    /// Called for every lifecycle event of an instance of the model.
    fn on_event(
        &mut self,
        event: LifecycleEvent,
        id: InstanceId,
        instance: &mut Instance,
    ) -> Result<()>;
}

impl<F> LifecycleHooks for F
where
    F: FnMut(LifecycleEvent, InstanceId, &mut Instance) -> Result<()>,
{
    fn on_event(
        &mut self,
        event: LifecycleEvent,
        id: InstanceId,
        instance: &mut Instance,
    ) -> Result<()> {
        self(event, id, instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entitymap_core::{Error, Value};

    use crate::instance::Property;

    #[test]
    fn test_closure_hooks() {
        let mut seen = Vec::new();
        let mut hook = |event: LifecycleEvent, _id: InstanceId, instance: &mut Instance| {
            seen.push(event);
            if event == LifecycleEvent::Deleting {
                return Err(Error::InvalidState("locked".to_string()));
            }
            instance.set_value("stamp", event.to_string())
        };

        let id = InstanceId {
            repository: 1,
            serial: 1,
        };
        let mut instance = Instance::new("Customer");
        instance
            .fields
            .insert("stamp".to_string(), Property::Scalar(Value::Null));

        hook.on_event(LifecycleEvent::Saving, id, &mut instance).unwrap();
        assert_eq!(instance.value("stamp"), Some(&Value::from("saving")));
        assert!(hook.on_event(LifecycleEvent::Deleting, id, &mut instance).is_err());
        drop(hook);
        assert_eq!(seen, vec![LifecycleEvent::Saving, LifecycleEvent::Deleting]);
    }
}
