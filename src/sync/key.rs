// ABOUTME: Primary key model and resolution policy
// ABOUTME: Keys are ordered column sets; composite keys are refused unless explicitly allowed

use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::{Side, SyncError};
use super::value::{Row, Value};

/// How many primary-key columns a table may have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyPolicy {
    /// Exactly one key column; composite keys fail as ambiguous.
    #[default]
    Single,
    /// Any non-empty ordered set of key columns.
    Composite,
}

/// The ordered columns identifying a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PrimaryKey {
    columns: Vec<String>,
}

impl PrimaryKey {
    pub fn single(column: impl Into<String>) -> Self {
        Self {
            columns: vec![column.into()],
        }
    }

    /// Returns `None` for an empty column list.
    pub fn composite<I, S>(columns: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            None
        } else {
            Some(Self { columns })
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn is_composite(&self) -> bool {
        self.columns.len() > 1
    }

    /// Extract this key from a row.
    ///
    /// `None` when a key column is missing or null, since such a row cannot
    /// be identified.
    pub fn key_of(&self, row: &Row) -> Option<KeyTuple> {
        self.columns
            .iter()
            .map(|column| match row.get(column) {
                Some(value) if !value.is_null() => Some(value.clone()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(KeyTuple)
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({})", self.columns.join(", "))
    }
}

/// Key values of one row, in key-column order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct KeyTuple(pub Vec<Value>);

impl KeyTuple {
    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl fmt::Display for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [single] => write!(f, "{}", single),
            values => {
                let parts: Vec<String> = values.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(", "))
            }
        }
    }
}

/// Turn the key columns reported by the catalog into a [`PrimaryKey`].
pub fn resolve_primary_key(
    side: Side,
    table: &str,
    columns: Vec<String>,
    policy: KeyPolicy,
) -> Result<PrimaryKey, SyncError> {
    match (columns.len(), policy) {
        (0, _) => Err(SyncError::NoPrimaryKey {
            side,
            table: table.to_string(),
        }),
        (1, _) | (_, KeyPolicy::Composite) => Ok(PrimaryKey { columns }),
        (_, KeyPolicy::Single) => Err(SyncError::AmbiguousPrimaryKey {
            side,
            table: table.to_string(),
            columns,
        }),
    }
}

/// Source and target must be keyed on the same columns; no renaming.
pub fn ensure_keys_match(source: &PrimaryKey, target: &PrimaryKey) -> Result<(), SyncError> {
    if source == target {
        Ok(())
    } else {
        Err(SyncError::PrimaryKeyMismatch {
            source_key: source.clone(),
            target_key: target.clone(),
        })
    }
}
