//! Static model metadata.
//!
//! A [`ModelConfig`] describes how one backend record maps onto an
//! instance: which columns become which properties, which columns form
//! the identity, and how the model relates to others. Configs are built
//! once (in code or from JSON), validated when their backend is
//! registered, and afterwards only consulted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filter::ValueFilter;
use crate::query::Condition;
use crate::row::Row;
use crate::value::Value;

/// What kind of property a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// Plain column-backed value.
    Plain,
    /// Many-to-one reference.
    BelongsTo,
    /// One-to-many or many-to-many collection.
    HasMany,
}

/// A many-to-one relation: the owning model stores the reference column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BelongsToSpec {
    /// Column on the owning model holding the foreign key (e.g. `"customer_id"`).
    pub reference: String,
    /// Target model name.
    pub model: String,
    /// Referenced column on the target; defaults to its identity column.
    #[serde(default)]
    pub id: Option<String>,
    /// Foreign key used for new instances that did not set the relation.
    #[serde(default)]
    pub default: Option<Value>,
    /// Resolve through `get()` instead of a filtered lookup.
    /// Computed at registration.
    #[serde(default)]
    pub use_index: bool,
}

impl BelongsToSpec {
    /// Create a relation stored in `reference` pointing at `model`.
    pub fn new(reference: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            model: model.into(),
            id: None,
            default: None,
            use_index: false,
        }
    }

    /// Reference a column other than the target identity.
    #[must_use]
    pub fn id(mut self, column: impl Into<String>) -> Self {
        self.id = Some(column.into());
        self
    }

    /// Set the default foreign key for new instances.
    #[must_use]
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Bridge-model details of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JunctionSpec {
    /// Junction model name (one of the backend's junction configs).
    pub model: String,
    /// Junction column holding the target's identity.
    pub foreign: String,
    /// Extra bridge columns: column → property.
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Reject bridge properties that are not listed in `fields`.
    #[serde(default)]
    pub closed: bool,
    /// Mirror relation on the target model. Detected at registration when absent.
    #[serde(default)]
    pub reciprocal: Option<String>,
}

impl JunctionSpec {
    /// Create a junction over `model` whose `foreign` column points at the target.
    pub fn new(model: impl Into<String>, foreign: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            foreign: foreign.into(),
            fields: BTreeMap::new(),
            closed: false,
            reciprocal: None,
        }
    }

    /// Declare a bridge field.
    #[must_use]
    pub fn field(mut self, column: impl Into<String>, property: impl Into<String>) -> Self {
        self.fields.insert(column.into(), property.into());
        self
    }

    /// Only accept declared bridge fields.
    #[must_use]
    pub fn closed(mut self, value: bool) -> Self {
        self.closed = value;
        self
    }

    /// Name the mirror relation on the target model.
    #[must_use]
    pub fn reciprocal(mut self, property: impl Into<String>) -> Self {
        self.reciprocal = Some(property.into());
        self
    }

    /// True if the relation carries bridge data beyond the two keys.
    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Bridge column for a bridge property.
    pub fn column_of(&self, property: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(_, p)| p.as_str() == property)
            .map(|(c, _)| c.as_str())
    }
}

/// A one-to-many or many-to-many relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HasManySpec {
    /// Target model name.
    pub model: String,
    /// Column pointing back at the owner: on the target for one-to-many,
    /// on the junction for many-to-many.
    pub reference: String,
    /// Owner column the reference points at; defaults to the owner identity.
    #[serde(default)]
    pub id: Option<String>,
    /// belongsTo property on the target that mirrors this relation.
    #[serde(default)]
    pub belongs_to: Option<String>,
    /// Present for many-to-many relations.
    #[serde(default)]
    pub junction: Option<JunctionSpec>,
    /// Extra static column conditions on the target rows.
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl HasManySpec {
    /// One-to-many relation: `model.reference` points at the owner.
    pub fn new(model: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            reference: reference.into(),
            id: None,
            belongs_to: None,
            junction: None,
            conditions: Vec::new(),
        }
    }

    /// Many-to-many relation through `junction`; `reference` is the
    /// junction column pointing at the owner.
    pub fn through(model: impl Into<String>, reference: impl Into<String>, junction: JunctionSpec) -> Self {
        Self {
            junction: Some(junction),
            ..Self::new(model, reference)
        }
    }

    /// Name the back-pointer on the target.
    #[must_use]
    pub fn belongs_to(mut self, property: impl Into<String>) -> Self {
        self.belongs_to = Some(property.into());
        self
    }

    /// Add a static condition.
    #[must_use]
    pub fn condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// True for many-to-many relations.
    pub fn is_many_to_many(&self) -> bool {
        self.junction.is_some()
    }
}

/// Static, validated metadata for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name.
    pub name: String,
    /// Plural name; defaults to `name`.
    #[serde(default)]
    pub plural: String,
    /// Identity columns, in order.
    pub identity: Vec<String>,
    /// Plain properties: column → property.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// belongsTo relations by property.
    #[serde(default)]
    pub belongs_to: BTreeMap<String, BelongsToSpec>,
    /// hasMany relations by property.
    #[serde(default)]
    pub has_many: BTreeMap<String, HasManySpec>,
    /// Default values for new instances: property → value.
    #[serde(default)]
    pub defaults: BTreeMap<String, Value>,
    /// Read/write filters: property → filter.
    #[serde(default)]
    pub filters: BTreeMap<String, ValueFilter>,
    /// Identifier of the owning backend; filled in at registration.
    #[serde(default)]
    pub backend: String,
}

impl ModelConfig {
    /// Create an empty config for `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            plural: name.clone(),
            name,
            identity: Vec::new(),
            properties: BTreeMap::new(),
            belongs_to: BTreeMap::new(),
            has_many: BTreeMap::new(),
            defaults: BTreeMap::new(),
            filters: BTreeMap::new(),
            backend: String::new(),
        }
    }

    /// Parse a config from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut config: ModelConfig = serde_json::from_str(json)?;
        if config.plural.is_empty() {
            config.plural.clone_from(&config.name);
        }
        Ok(config)
    }

    /// Set the plural name.
    #[must_use]
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    /// Set the identity columns.
    #[must_use]
    pub fn identity<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.identity = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Map `column` onto `property`.
    #[must_use]
    pub fn property(mut self, column: impl Into<String>, property: impl Into<String>) -> Self {
        self.properties.insert(column.into(), property.into());
        self
    }

    /// Map columns onto properties of the same name.
    #[must_use]
    pub fn columns<S: AsRef<str>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        for column in columns {
            let column = column.as_ref();
            self.properties.insert(column.to_string(), column.to_string());
        }
        self
    }

    /// Declare a belongsTo relation.
    #[must_use]
    pub fn belongs_to(mut self, property: impl Into<String>, spec: BelongsToSpec) -> Self {
        self.belongs_to.insert(property.into(), spec);
        self
    }

    /// Declare a hasMany relation.
    #[must_use]
    pub fn has_many(mut self, property: impl Into<String>, spec: HasManySpec) -> Self {
        self.has_many.insert(property.into(), spec);
        self
    }

    /// Default value for a property of new instances.
    #[must_use]
    pub fn default_value(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(property.into(), value.into());
        self
    }

    /// Attach a read/write filter to a property.
    #[must_use]
    pub fn filter(mut self, property: impl Into<String>, filter: ValueFilter) -> Self {
        self.filters.insert(property.into(), filter);
        self
    }

    /// Column backing a plain property.
    pub fn column_of(&self, property: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(_, p)| p.as_str() == property)
            .map(|(c, _)| c.as_str())
    }

    /// Plain property backed by a column.
    pub fn property_of(&self, column: &str) -> Option<&str> {
        self.properties.get(column).map(String::as_str)
    }

    /// True if some plain property or belongsTo reference uses `column`.
    pub fn has_column(&self, column: &str) -> bool {
        self.properties.contains_key(column)
            || self.belongs_to.values().any(|b| b.reference == column)
    }

    /// Classify a property name.
    pub fn kind_of(&self, property: &str) -> Option<PropertyKind> {
        if self.belongs_to.contains_key(property) {
            Some(PropertyKind::BelongsTo)
        } else if self.has_many.contains_key(property) {
            Some(PropertyKind::HasMany)
        } else if self.column_of(property).is_some() {
            Some(PropertyKind::Plain)
        } else {
            None
        }
    }

    /// True for belongsTo/hasMany properties.
    pub fn is_relation(&self, property: &str) -> bool {
        matches!(
            self.kind_of(property),
            Some(PropertyKind::BelongsTo | PropertyKind::HasMany)
        )
    }

    /// Properties backing the identity columns, in identity order.
    pub fn identity_properties(&self) -> Vec<&str> {
        self.identity
            .iter()
            .filter_map(|c| self.property_of(c))
            .collect()
    }

    /// The identity column when the identity is a single column.
    pub fn single_identity(&self) -> Option<&str> {
        match self.identity.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }

    /// The identity columns of `row`.
    pub fn identity_of(&self, row: &Row) -> Row {
        row.project(self.identity.iter().map(String::as_str))
    }

    /// Every property name: plain, belongsTo and hasMany.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties
            .values()
            .map(String::as_str)
            .chain(self.belongs_to.keys().map(String::as_str))
            .chain(self.has_many.keys().map(String::as_str))
    }

    /// Translate a property-level condition into a column-level one.
    ///
    /// belongsTo properties translate to their reference column; the
    /// condition value is then expected to be the foreign key.
    pub fn translate_condition(&self, condition: &Condition) -> Result<Condition> {
        let column = if let Some(column) = self.column_of(&condition.column) {
            column.to_string()
        } else if let Some(spec) = self.belongs_to.get(&condition.column) {
            spec.reference.clone()
        } else if self.properties.contains_key(&condition.column) {
            condition.column.clone()
        } else {
            return Err(Error::unknown_property(&self.name, &condition.column));
        };
        Ok(Condition {
            column,
            operator: condition.operator,
            value: condition.value.clone(),
        })
    }

    /// Rename a property in place, whatever its kind.
    pub fn rename_property(&mut self, old: &str, new: &str) -> Result<()> {
        if self.kind_of(new).is_some() {
            return Err(Error::config(format!(
                "{}.{} already exists",
                self.name, new
            )));
        }
        match self.kind_of(old) {
            Some(PropertyKind::Plain) => {
                for property in self.properties.values_mut() {
                    if property == old {
                        *property = new.to_string();
                    }
                }
            }
            Some(PropertyKind::BelongsTo) => {
                if let Some(spec) = self.belongs_to.remove(old) {
                    self.belongs_to.insert(new.to_string(), spec);
                }
            }
            Some(PropertyKind::HasMany) => {
                if let Some(spec) = self.has_many.remove(old) {
                    self.has_many.insert(new.to_string(), spec);
                }
            }
            None => return Err(Error::unknown_property(&self.name, old)),
        }
        if let Some(value) = self.defaults.remove(old) {
            self.defaults.insert(new.to_string(), value);
        }
        if let Some(filter) = self.filters.remove(old) {
            self.filters.insert(new.to_string(), filter);
        }
        Ok(())
    }

    /// Stop mapping a property. Identity properties cannot be skipped.
    pub fn skip_property(&mut self, property: &str) -> Result<()> {
        match self.kind_of(property) {
            Some(PropertyKind::Plain) => {
                let column = self.column_of(property).map(str::to_string);
                if let Some(column) = column {
                    if self.identity.contains(&column) {
                        return Err(Error::config(format!(
                            "{}.{} is part of the identity and cannot be skipped",
                            self.name, property
                        )));
                    }
                    self.properties.remove(&column);
                }
            }
            Some(PropertyKind::BelongsTo) => {
                self.belongs_to.remove(property);
            }
            Some(PropertyKind::HasMany) => {
                self.has_many.remove(property);
            }
            None => return Err(Error::unknown_property(&self.name, property)),
        }
        self.defaults.remove(property);
        self.filters.remove(property);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer() -> ModelConfig {
        ModelConfig::new("Customer")
            .plural("Customers")
            .identity(["id"])
            .columns(["id", "name"])
            .property("email_address", "email")
            .has_many("orders", HasManySpec::new("Order", "customer_id").belongs_to("customer"))
            .has_many(
                "groups",
                HasManySpec::through(
                    "Group",
                    "customer_id",
                    JunctionSpec::new("Membership", "group_id"),
                ),
            )
            .default_value("name", "anonymous")
    }

    #[test]
    fn test_property_lookup() {
        let config = customer();
        assert_eq!(config.column_of("email"), Some("email_address"));
        assert_eq!(config.property_of("email_address"), Some("email"));
        assert_eq!(config.kind_of("orders"), Some(PropertyKind::HasMany));
        assert_eq!(config.kind_of("name"), Some(PropertyKind::Plain));
        assert_eq!(config.kind_of("missing"), None);
        assert_eq!(config.identity_properties(), vec!["id"]);
        assert_eq!(config.single_identity(), Some("id"));
    }

    #[test]
    fn test_translate_condition() {
        let order = ModelConfig::new("Order")
            .identity(["id"])
            .columns(["id", "product"])
            .belongs_to("customer", BelongsToSpec::new("customer_id", "Customer"));
        let c = order
            .translate_condition(&Condition::eq("customer", 3_i64))
            .unwrap();
        assert_eq!(c.column, "customer_id");
        assert!(order.translate_condition(&Condition::eq("nope", 1_i64)).is_err());
    }

    #[test]
    fn test_rename_and_skip_property() {
        let mut config = customer();
        config.rename_property("name", "full_name").unwrap();
        assert_eq!(config.column_of("full_name"), Some("name"));
        assert_eq!(config.defaults.get("full_name"), Some(&Value::from("anonymous")));
        assert!(config.rename_property("full_name", "email").is_err());

        config.skip_property("email").unwrap();
        assert_eq!(config.kind_of("email"), None);
        assert!(config.skip_property("id").is_err());
    }

    #[test]
    fn test_from_json() {
        let config = ModelConfig::from_json(
            r#"{
                "name": "Group",
                "identity": ["id"],
                "properties": {"id": "id", "title": "title"},
                "has_many": {
                    "customers": {
                        "model": "Customer",
                        "reference": "group_id",
                        "junction": {"model": "Membership", "foreign": "customer_id"}
                    }
                },
                "filters": {"title": "json"}
            }"#,
        )
        .unwrap();
        assert_eq!(config.plural, "Group");
        assert!(config.has_many["customers"].is_many_to_many());
        assert_eq!(config.filters.get("title"), Some(&ValueFilter::Json));
    }

    #[test]
    fn test_junction_has_fields() {
        let plain = JunctionSpec::new("Membership", "group_id");
        assert!(!plain.has_fields());
        let bridged = JunctionSpec::new("Membership", "group_id").field("since", "member_since");
        assert!(bridged.has_fields());
        assert_eq!(bridged.column_of("member_since"), Some("since"));
    }
}
