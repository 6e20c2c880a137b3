//! Live instances and their relation slots.
//!
//! An [`Instance`] is the in-memory form of one record. Plain properties
//! hold a [`Value`]; relation properties hold a [`RelationSlot`] that is
//! either resolved or still a [`Placeholder`]. Instances live inside the
//! repository and are addressed by [`InstanceId`] handles, so "is this the
//! same object" is always a handle comparison.

use std::collections::BTreeMap;
use std::fmt;

use entitymap_core::{Error, Result, Row, Value};

// ============================================================================
// Handles
// ============================================================================

/// Stable handle of a live instance.
///
/// Handles carry the serial of the repository that issued them, so a
/// handle from another repository is recognised as foreign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    pub(crate) repository: u32,
    pub(crate) serial: u64,
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.repository, self.serial)
    }
}

// ============================================================================
// Placeholders
// ============================================================================

/// Where a placeholder points: repository, model and property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceholderRef {
    /// Repository name.
    pub repository: String,
    /// Model of the container.
    pub model: String,
    /// Relation property on the container.
    pub property: String,
}

impl fmt::Display for PlaceholderRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.repository, self.model, self.property)
    }
}

/// Stand-in for a relation value that has not been loaded yet.
///
/// A placeholder is only valid while its container's slot still holds it
/// (same token). A copy found anywhere else is stale.
#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub(crate) reference: PlaceholderRef,
    pub(crate) container: InstanceId,
    pub(crate) token: u64,
    pub(crate) key: Option<Value>,
}

impl Placeholder {
    /// Serialized reference.
    pub fn reference(&self) -> &PlaceholderRef {
        &self.reference
    }

    /// Instance whose slot this placeholder was installed into.
    pub fn container(&self) -> InstanceId {
        self.container
    }

    /// Known foreign key of a belongsTo placeholder.
    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }
}

/// A relation value: loaded, or deferred behind a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationSlot<T> {
    /// The value is in memory.
    Resolved(T),
    /// The value will be fetched on first use.
    Unresolved(Placeholder),
}

impl<T> RelationSlot<T> {
    /// True once the value is in memory.
    pub fn is_resolved(&self) -> bool {
        matches!(self, RelationSlot::Resolved(_))
    }

    /// The value, if resolved.
    pub fn resolved(&self) -> Option<&T> {
        match self {
            RelationSlot::Resolved(value) => Some(value),
            RelationSlot::Unresolved(_) => None,
        }
    }

    /// The placeholder, if unresolved.
    pub fn placeholder(&self) -> Option<&Placeholder> {
        match self {
            RelationSlot::Resolved(_) => None,
            RelationSlot::Unresolved(placeholder) => Some(placeholder),
        }
    }

    /// Replace the placeholder identified by `token` with `value`.
    ///
    /// Returns false, leaving the slot untouched, when the slot no longer
    /// holds that placeholder.
    pub(crate) fn fill(&mut self, token: u64, value: T) -> bool {
        match self {
            RelationSlot::Unresolved(placeholder) if placeholder.token == token => {
                *self = RelationSlot::Resolved(value);
                true
            }
            _ => false,
        }
    }
}

// ============================================================================
// Members and Junctions
// ============================================================================

/// Bridge row of a many-to-many relation that carries extra fields.
///
/// Reads and writes go to the linked instance first and to the bridge
/// fields second (see `Repository::member_value`).
#[derive(Debug, Clone, PartialEq)]
pub struct Junction {
    pub(crate) instance: InstanceId,
    pub(crate) model: String,
    pub(crate) fields: Row,
    pub(crate) closed: bool,
}

impl Junction {
    /// Linked instance.
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Junction model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Bridge fields by property name.
    pub fn fields(&self) -> &Row {
        &self.fields
    }

    /// A bridge field.
    pub fn field(&self, property: &str) -> Option<&Value> {
        self.fields.get(property)
    }

    /// True if only declared bridge fields are accepted.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn set_field(&mut self, property: &str, value: Value) -> Result<()> {
        if self.closed && !self.fields.contains(property) {
            return Err(Error::unknown_property(&self.model, property));
        }
        self.fields.insert(property, value);
        Ok(())
    }
}

/// One element of a hasMany collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    /// Plain member.
    Instance(InstanceId),
    /// Member of a many-to-many relation with bridge fields.
    Junction(Junction),
}

impl Member {
    /// The linked instance.
    pub fn id(&self) -> InstanceId {
        match self {
            Member::Instance(id) => *id,
            Member::Junction(junction) => junction.instance,
        }
    }

    /// Bridge data, if any.
    pub fn junction(&self) -> Option<&Junction> {
        match self {
            Member::Instance(_) => None,
            Member::Junction(junction) => Some(junction),
        }
    }
}

impl From<InstanceId> for Member {
    fn from(id: InstanceId) -> Self {
        Member::Instance(id)
    }
}

// ============================================================================
// Instances
// ============================================================================

/// Value of one instance property.
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    /// Plain column-backed value.
    Scalar(Value),
    /// Many-to-one reference.
    BelongsTo(RelationSlot<Option<InstanceId>>),
    /// One-to-many or many-to-many collection.
    HasMany(RelationSlot<Vec<Member>>),
}

/// In-memory form of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    model: String,
    pub(crate) fields: BTreeMap<String, Property>,
}

impl Instance {
    pub(crate) fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Model name.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// A property of any kind.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.fields.get(name)
    }

    /// Value of a plain property.
    pub fn value(&self, name: &str) -> Option<&Value> {
        match self.fields.get(name) {
            Some(Property::Scalar(value)) => Some(value),
            _ => None,
        }
    }

    /// Overwrite a plain property.
    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        match self.fields.get_mut(name) {
            Some(Property::Scalar(slot)) => {
                *slot = value.into();
                Ok(())
            }
            _ => Err(Error::unknown_property(&self.model, name)),
        }
    }

    /// Property names, sorted.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// True once the instance was deleted and its fields stripped.
    pub fn is_cleared(&self) -> bool {
        self.fields.is_empty()
    }

    pub(crate) fn belongs_to(&self, name: &str) -> Option<&RelationSlot<Option<InstanceId>>> {
        match self.fields.get(name) {
            Some(Property::BelongsTo(slot)) => Some(slot),
            _ => None,
        }
    }

    pub(crate) fn belongs_to_mut(
        &mut self,
        name: &str,
    ) -> Option<&mut RelationSlot<Option<InstanceId>>> {
        match self.fields.get_mut(name) {
            Some(Property::BelongsTo(slot)) => Some(slot),
            _ => None,
        }
    }

    pub(crate) fn has_many(&self, name: &str) -> Option<&RelationSlot<Vec<Member>>> {
        match self.fields.get(name) {
            Some(Property::HasMany(slot)) => Some(slot),
            _ => None,
        }
    }

    pub(crate) fn has_many_mut(&mut self, name: &str) -> Option<&mut RelationSlot<Vec<Member>>> {
        match self.fields.get_mut(name) {
            Some(Property::HasMany(slot)) => Some(slot),
            _ => None,
        }
    }

    pub(crate) fn clear(&mut self) {
        self.fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(serial: u64) -> InstanceId {
        InstanceId {
            repository: 1,
            serial,
        }
    }

    fn placeholder(token: u64) -> Placeholder {
        Placeholder {
            reference: PlaceholderRef {
                repository: "default".to_string(),
                model: "Order".to_string(),
                property: "customer".to_string(),
            },
            container: id(1),
            token,
            key: Some(Value::Int(3)),
        }
    }

    #[test]
    fn test_fill_requires_matching_token() {
        let mut slot: RelationSlot<Option<InstanceId>> = RelationSlot::Unresolved(placeholder(5));
        assert!(!slot.fill(6, Some(id(2))));
        assert!(!slot.is_resolved());
        assert!(slot.fill(5, Some(id(2))));
        assert_eq!(slot.resolved(), Some(&Some(id(2))));
        assert!(!slot.fill(5, None));
    }

    #[test]
    fn test_placeholder_reference_display() {
        assert_eq!(placeholder(1).reference().to_string(), "default:Order.customer");
        assert_eq!(placeholder(1).key(), Some(&Value::Int(3)));
    }

    #[test]
    fn test_closed_junction_rejects_unknown_fields() {
        let mut junction = Junction {
            instance: id(2),
            model: "Membership".to_string(),
            fields: Row::new().with("role", Value::Null),
            closed: true,
        };
        junction.set_field("role", Value::from("admin")).unwrap();
        assert_eq!(junction.field("role"), Some(&Value::from("admin")));
        assert!(junction.set_field("rank", Value::Int(1)).is_err());

        junction.closed = false;
        junction.set_field("rank", Value::Int(1)).unwrap();
        assert_eq!(Member::Junction(junction).id(), id(2));
    }

    #[test]
    fn test_instance_scalar_access() {
        let mut instance = Instance::new("Customer");
        instance
            .fields
            .insert("name".to_string(), Property::Scalar(Value::from("Alice")));
        instance.set_value("name", "Bob").unwrap();
        assert_eq!(instance.value("name"), Some(&Value::from("Bob")));
        assert!(instance.set_value("orders", 1_i64).is_err());
        instance.clear();
        assert!(instance.is_cleared());
    }
}
