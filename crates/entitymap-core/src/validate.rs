//! Registration-time validation of model configs.
//!
//! Every defect found here is a configuration error: registration fails
//! loudly instead of letting a broken mapping surface on first use.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::config::{HasManySpec, ModelConfig};
use crate::error::{Error, Result};

/// Thread-safe regex cache for compiled patterns.
struct RegexCache {
    cache: std::sync::RwLock<std::collections::HashMap<String, Regex>>,
}

impl RegexCache {
    fn new() -> Self {
        Self {
            cache: std::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }

    fn get_or_compile(&self, pattern: &str) -> std::result::Result<Regex, regex::Error> {
        if let Ok(cache) = self.cache.read() {
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern)?;
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(pattern.to_string(), regex.clone());
        }
        Ok(regex)
    }
}

fn regex_cache() -> &'static RegexCache {
    static CACHE: OnceLock<RegexCache> = OnceLock::new();
    CACHE.get_or_init(RegexCache::new)
}

/// Pattern every model and property name must match.
pub const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Check a string against a regex pattern, using the shared cache.
///
/// An invalid pattern is logged and treated as a non-match.
pub fn matches_pattern(value: &str, pattern: &str) -> bool {
    match regex_cache().get_or_compile(pattern) {
        Ok(regex) => regex.is_match(value),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid regex pattern, treating as non-match"
            );
            false
        }
    }
}

/// Validate a model or property name.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if matches_pattern(name, IDENTIFIER_PATTERN) {
        Ok(())
    } else {
        Err(Error::config(format!("invalid {} name {:?}", kind, name)))
    }
}

/// Find the mirror relation of a many-to-many `spec` (declared on `owner`)
/// among the hasMany relations of `target`.
pub fn reciprocal_relation(target: &ModelConfig, owner: &str, spec: &HasManySpec) -> Option<String> {
    let junction = spec.junction.as_ref()?;
    if let Some(declared) = &junction.reciprocal {
        return target
            .has_many
            .contains_key(declared)
            .then(|| declared.clone());
    }
    target
        .has_many
        .iter()
        .find(|(_, other)| {
            other.model == owner
                && other.reference == junction.foreign
                && other.junction.as_ref().is_some_and(|j| {
                    j.model == junction.model && j.foreign == spec.reference
                })
        })
        .map(|(name, _)| name.clone())
}

/// Models and junctions that are already registered.
#[derive(Debug, Default)]
pub struct Registered<'a> {
    /// Registered models by name.
    pub models: BTreeMap<&'a str, &'a ModelConfig>,
    /// Registered junction models by name.
    pub junctions: BTreeMap<&'a str, &'a ModelConfig>,
}

/// Validate and normalize the configs of one backend.
///
/// Returns the configs with registration-derived fields filled in:
/// `backend`, `plural` (when empty), `BelongsToSpec::use_index` and
/// `JunctionSpec::reciprocal` (when detectable).
pub fn validate_backend_configs(
    backend: &str,
    models: Vec<ModelConfig>,
    junctions: Vec<ModelConfig>,
    registered: &Registered<'_>,
) -> Result<(Vec<ModelConfig>, Vec<ModelConfig>)> {
    if backend.is_empty() {
        return Err(Error::config("backend identifier must not be empty"));
    }

    let mut models = models;
    let mut junctions = junctions;
    let mut names = BTreeSet::new();
    let mut plurals: BTreeSet<String> = registered.models.values().map(|m| m.plural.clone()).collect();

    for config in models.iter_mut().chain(junctions.iter_mut()) {
        validate_identifier("model", &config.name)?;
        if registered.models.contains_key(config.name.as_str())
            || registered.junctions.contains_key(config.name.as_str())
            || !names.insert(config.name.clone())
        {
            return Err(Error::config(format!("model {} is registered twice", config.name)));
        }
        if config.plural.is_empty() {
            config.plural.clone_from(&config.name);
        }
        config.backend = backend.to_string();
        validate_shape(config)?;
    }
    for config in &models {
        if !plurals.insert(config.plural.clone()) {
            return Err(Error::config(format!(
                "plural name {} of model {} is already in use",
                config.plural, config.name
            )));
        }
    }

    // Relation targets may live in this backend or in one registered earlier.
    let mut all_models: BTreeMap<String, ModelConfig> = registered
        .models
        .iter()
        .map(|(name, config)| ((*name).to_string(), (*config).clone()))
        .collect();
    for config in &models {
        all_models.insert(config.name.clone(), config.clone());
    }
    let mut all_junctions: BTreeMap<String, ModelConfig> = registered
        .junctions
        .iter()
        .map(|(name, config)| ((*name).to_string(), (*config).clone()))
        .collect();
    for config in &junctions {
        all_junctions.insert(config.name.clone(), config.clone());
    }

    for config in &mut models {
        validate_relations(config, &all_models, &all_junctions)?;
    }

    Ok((models, junctions))
}

fn validate_shape(config: &ModelConfig) -> Result<()> {
    if config.identity.is_empty() {
        return Err(Error::config(format!("model {} has no identity", config.name)));
    }
    for column in &config.identity {
        if config.property_of(column).is_none() {
            return Err(Error::config(format!(
                "identity column {}.{} is not mapped to a property",
                config.name, column
            )));
        }
    }

    let mut seen = BTreeSet::new();
    for property in config.property_names() {
        validate_identifier("property", property)?;
        if !seen.insert(property) {
            return Err(Error::config(format!(
                "property {}.{} is declared more than once",
                config.name, property
            )));
        }
    }

    for (property, spec) in &config.belongs_to {
        if config.properties.contains_key(&spec.reference) {
            return Err(Error::config(format!(
                "column {}.{} is mapped both as a property and as the reference of {}",
                config.name, spec.reference, property
            )));
        }
    }

    for property in config.defaults.keys() {
        if !matches!(
            config.kind_of(property),
            Some(crate::config::PropertyKind::Plain)
        ) {
            return Err(Error::config(format!(
                "default for unknown property {}.{}",
                config.name, property
            )));
        }
    }
    for property in config.filters.keys() {
        if !matches!(
            config.kind_of(property),
            Some(crate::config::PropertyKind::Plain)
        ) {
            return Err(Error::config(format!(
                "filter for unknown property {}.{}",
                config.name, property
            )));
        }
    }
    Ok(())
}

fn validate_relations(
    config: &mut ModelConfig,
    models: &BTreeMap<String, ModelConfig>,
    junctions: &BTreeMap<String, ModelConfig>,
) -> Result<()> {
    let owner = config.name.clone();

    for (property, spec) in &mut config.belongs_to {
        let target = models.get(&spec.model).ok_or_else(|| {
            Error::config(format!(
                "{}.{} refers to unknown model {}",
                owner, property, spec.model
            ))
        })?;
        let target_identity = target.single_identity();
        let column = match (&spec.id, target_identity) {
            (Some(column), _) => column.as_str(),
            (None, Some(column)) => column,
            (None, None) => {
                return Err(Error::config(format!(
                    "{}.{} needs an explicit id: {} has a composite identity",
                    owner, property, spec.model
                )));
            }
        };
        if !target.has_column(column) {
            return Err(Error::config(format!(
                "{}.{} refers to unmapped column {}.{}",
                owner, property, spec.model, column
            )));
        }
        spec.use_index = target_identity == Some(column);
    }

    let owner_identity = config.single_identity().map(str::to_string);
    let owner_columns: Vec<String> = config
        .properties
        .keys()
        .cloned()
        .chain(config.belongs_to.values().map(|b| b.reference.clone()))
        .collect();

    for (property, spec) in &mut config.has_many {
        let target = models.get(&spec.model).ok_or_else(|| {
            Error::config(format!(
                "{}.{} refers to unknown model {}",
                owner, property, spec.model
            ))
        })?;
        match (&spec.id, &owner_identity) {
            (Some(column), _) if !owner_columns.contains(column) => {
                return Err(Error::config(format!(
                    "{}.{} refers to unmapped owner column {}",
                    owner, property, column
                )));
            }
            (None, None) => {
                return Err(Error::config(format!(
                    "{}.{} needs an explicit id: {} has a composite identity",
                    owner, property, owner
                )));
            }
            _ => {}
        }

        let Some(junction) = &spec.junction else {
            if !target.has_column(&spec.reference) {
                return Err(Error::config(format!(
                    "{}.{}: column {}.{} is not mapped",
                    owner, property, spec.model, spec.reference
                )));
            }
            if let Some(back) = &spec.belongs_to {
                let valid = target
                    .belongs_to
                    .get(back)
                    .is_some_and(|b| b.model == owner && b.reference == spec.reference);
                if !valid {
                    return Err(Error::config(format!(
                        "{}.{}: {}.{} is not a belongsTo relation back to {} over {}",
                        owner, property, spec.model, back, owner, spec.reference
                    )));
                }
            }
            continue;
        };

        let bridge = junctions.get(&junction.model).ok_or_else(|| {
            Error::config(format!(
                "{}.{} refers to unknown junction {}",
                owner, property, junction.model
            ))
        })?;
        for column in [&spec.reference, &junction.foreign] {
            if !bridge.has_column(column) {
                return Err(Error::config(format!(
                    "{}.{}: junction column {}.{} is not mapped",
                    owner, property, junction.model, column
                )));
            }
        }
        for (column, bridge_property) in &junction.fields {
            validate_identifier("bridge property", bridge_property)?;
            if !bridge.has_column(column) {
                return Err(Error::config(format!(
                    "{}.{}: bridge column {}.{} is not mapped",
                    owner, property, junction.model, column
                )));
            }
        }
        if target.single_identity().is_none() {
            return Err(Error::config(format!(
                "{}.{}: many-to-many target {} needs a single-column identity",
                owner, property, spec.model
            )));
        }
        if let Some(declared) = &junction.reciprocal {
            if !target.has_many.contains_key(declared) {
                return Err(Error::config(format!(
                    "{}.{}: reciprocal {}.{} does not exist",
                    owner, property, spec.model, declared
                )));
            }
        }
        let reciprocal = reciprocal_relation(target, &owner, spec);
        if let Some(junction) = spec.junction.as_mut() {
            junction.reciprocal = reciprocal;
        }
    }
    Ok(())
}
