//! Identity-map keys.

use std::fmt;

use entitymap_core::{Error, ModelConfig, Result, Row, Value};

/// Key of an identity-map entry within one model.
///
/// Persisted records are keyed by the canonical text of their identity
/// values; instances that were never saved get a repository-unique
/// temporary token. The two variants can never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Index {
    /// Derived from identity values.
    Key(String),
    /// Not yet persisted.
    Temporary(u64),
}

impl Index {
    /// Derive the index of `row`, which must carry every identity column.
    pub fn of_row(config: &ModelConfig, row: &Row) -> Result<Index> {
        let mut fragments = Vec::with_capacity(config.identity.len());
        for column in &config.identity {
            let value = row.get_or_null(column);
            let fragment = value.key_fragment().ok_or_else(|| {
                Error::InvalidState(format!(
                    "{}: identity column {} holds no usable value ({})",
                    config.name,
                    column,
                    value.type_name()
                ))
            })?;
            fragments.push(fragment);
        }
        if let [single] = fragments.as_slice() {
            return Ok(Index::Key(single.clone()));
        }
        let escaped: Vec<String> = fragments
            .iter()
            .map(|f| f.replace('\\', "\\\\").replace(',', "\\,"))
            .collect();
        Ok(Index::Key(escaped.join(",")))
    }

    /// True for instances that were never persisted.
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Index::Temporary(_))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Index::Key(key) => f.write_str(key),
            Index::Temporary(token) => write!(f, "new#{}", token),
        }
    }
}

/// Identity a caller looks a record up by.
#[derive(Debug, Clone, PartialEq)]
pub enum Key {
    /// Value of a single-column identity.
    Single(Value),
    /// Identity columns by name.
    Composite(Row),
}

impl Key {
    /// Expand into the identity row of `config`.
    pub fn into_row(self, config: &ModelConfig) -> Result<Row> {
        match self {
            Key::Single(value) => match config.single_identity() {
                Some(column) => Ok(Row::new().with(column, value)),
                None => Err(Error::InvalidState(format!(
                    "{} has a composite identity ({}); look it up by row",
                    config.name,
                    config.identity.join(", ")
                ))),
            },
            Key::Composite(row) => Ok(config.identity_of(&row)),
        }
    }
}

impl From<Value> for Key {
    fn from(value: Value) -> Self {
        Key::Single(value)
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Single(Value::Int(value))
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Single(Value::Int(i64::from(value)))
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Single(Value::from(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Single(Value::Text(value))
    }
}

impl From<Row> for Key {
    fn from(row: Row) -> Self {
        Key::Composite(row)
    }
}
