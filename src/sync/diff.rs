// ABOUTME: Row differ - classifies source/target rows into insert, update and delete sets
// ABOUTME: Single pass over source against a target index keyed by primary key

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use super::error::Side;
use super::key::{KeyTuple, PrimaryKey};
use super::value::Row;

/// Rows that must change for the target to match the source.
///
/// A key appears in at most one of the three lists. `to_update` holds the
/// source version of each changed row, `to_delete` the target version of
/// each row the source no longer has.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiffResult {
    pub to_insert: Vec<Row>,
    pub to_update: Vec<Row>,
    pub to_delete: Vec<Row>,
    /// Rows present on both sides with identical content
    pub unchanged: usize,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.to_insert.len() + self.to_update.len() + self.to_delete.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiffError {
    #[error("{side} row {index} has no value for key column(s) {key}")]
    MissingKey {
        side: Side,
        index: usize,
        key: PrimaryKey,
    },
    #[error("{side} rows share primary key {key}")]
    DuplicateKey { side: Side, key: String },
}

/// Compare two fully materialized row sets.
///
/// Runs in O(|source| + |target|) time with an index over the target.
/// Output order follows the source scan for inserts and updates and the
/// original target order for deletes.
pub fn diff(
    source: Vec<Row>,
    target: Vec<Row>,
    key: &PrimaryKey,
) -> Result<DiffResult, DiffError> {
    let mut index: HashMap<KeyTuple, usize> = HashMap::with_capacity(target.len());
    for (i, row) in target.iter().enumerate() {
        let k = key.key_of(row).ok_or_else(|| DiffError::MissingKey {
            side: Side::Target,
            index: i,
            key: key.clone(),
        })?;
        if index.insert(k.clone(), i).is_some() {
            return Err(DiffError::DuplicateKey {
                side: Side::Target,
                key: k.to_string(),
            });
        }
    }

    let mut remaining: Vec<Option<Row>> = target.into_iter().map(Some).collect();
    let mut seen: HashSet<KeyTuple> = HashSet::with_capacity(source.len());
    let mut result = DiffResult::default();

    for (i, row) in source.into_iter().enumerate() {
        let k = key.key_of(&row).ok_or_else(|| DiffError::MissingKey {
            side: Side::Source,
            index: i,
            key: key.clone(),
        })?;

        match index.remove(&k) {
            Some(j) => {
                let matched = remaining[j].take();
                if matched.as_ref() != Some(&row) {
                    result.to_update.push(row);
                } else {
                    result.unchanged += 1;
                }
                seen.insert(k);
            }
            None => {
                if !seen.insert(k.clone()) {
                    return Err(DiffError::DuplicateKey {
                        side: Side::Source,
                        key: k.to_string(),
                    });
                }
                result.to_insert.push(row);
            }
        }
    }

    result.to_delete = remaining.into_iter().flatten().collect();

    tracing::debug!(
        "Diff by {}: {} to insert, {} to update, {} to delete, {} unchanged",
        key,
        result.to_insert.len(),
        result.to_update.len(),
        result.to_delete.len(),
        result.unchanged
    );

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::value::Value;

    fn row(id: i64, val: &str) -> Row {
        Row::new().with("id", id).with("val", val)
    }

    fn ids(rows: &[Row]) -> HashSet<i64> {
        rows.iter()
            .map(|r| match r.get("id") {
                Some(Value::Int(id)) => *id,
                other => panic!("unexpected id {:?}", other),
            })
            .collect()
    }

    fn key() -> PrimaryKey {
        PrimaryKey::single("id")
    }

    #[test]
    fn test_insert_into_empty_target() {
        let result = diff(vec![row(1, "a")], vec![], &key()).unwrap();
        assert_eq!(result.to_insert, vec![row(1, "a")]);
        assert!(result.to_update.is_empty());
        assert!(result.to_delete.is_empty());
    }

    #[test]
    fn test_changed_row_updates_with_source_version() {
        let result = diff(vec![row(1, "a")], vec![row(1, "b")], &key()).unwrap();
        assert!(result.to_insert.is_empty());
        assert_eq!(result.to_update, vec![row(1, "a")]);
        assert!(result.to_delete.is_empty());
    }

    #[test]
    fn test_removed_row_deletes_target_version() {
        let result = diff(vec![], vec![row(1, "a")], &key()).unwrap();
        assert!(result.to_insert.is_empty());
        assert!(result.to_update.is_empty());
        assert_eq!(result.to_delete, vec![row(1, "a")]);
    }

    #[test]
    fn test_mixed_partition() {
        let source = vec![row(1, "same"), row(2, "new"), row(3, "changed")];
        let target = vec![row(1, "same"), row(3, "old"), row(4, "gone"), row(5, "gone")];

        let result = diff(source, target, &key()).unwrap();

        assert_eq!(ids(&result.to_insert), HashSet::from([2]));
        assert_eq!(ids(&result.to_update), HashSet::from([3]));
        assert_eq!(ids(&result.to_delete), HashSet::from([4, 5]));
        assert_eq!(result.unchanged, 1);
        assert!(result.change_count() <= 3 + 4);
    }

    #[test]
    fn test_identical_sets_produce_no_changes() {
        let rows = vec![row(1, "a"), row(2, "b")];
        let result = diff(rows.clone(), rows, &key()).unwrap();
        assert!(result.is_empty());
        assert_eq!(result.unchanged, 2);
    }

    #[test]
    fn test_null_vs_absent_column_is_an_update() {
        let source = vec![Row::new().with("id", 1).with("x", Value::Null)];
        let target = vec![Row::new().with("id", 1)];
        let result = diff(source, target, &key()).unwrap();
        assert_eq!(result.to_update.len(), 1);

        let source = vec![Row::new().with("id", 1)];
        let target = vec![Row::new().with("id", 1).with("x", Value::Null)];
        let result = diff(source, target, &key()).unwrap();
        assert_eq!(result.to_update.len(), 1);
    }

    #[test]
    fn test_null_vs_zero_is_an_update() {
        let source = vec![Row::new().with("id", 1).with("x", Value::Null)];
        let target = vec![Row::new().with("id", 1).with("x", 0)];
        let result = diff(source, target, &key()).unwrap();
        assert_eq!(result.to_update.len(), 1);
    }

    #[test]
    fn test_null_equals_null() {
        let rows = vec![Row::new().with("id", 1).with("x", Value::Null)];
        let result = diff(rows.clone(), rows, &key()).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_composite_key_diff() {
        let key = PrimaryKey::composite(["order_id", "item_id"]).unwrap();
        let line = |o: i64, i: i64, q: i64| {
            Row::new()
                .with("order_id", o)
                .with("item_id", i)
                .with("qty", q)
        };

        let source = vec![line(1, 1, 5), line(1, 2, 1)];
        let target = vec![line(1, 1, 4), line(2, 1, 1)];
        let result = diff(source, target, &key).unwrap();

        assert_eq!(result.to_insert, vec![line(1, 2, 1)]);
        assert_eq!(result.to_update, vec![line(1, 1, 5)]);
        assert_eq!(result.to_delete, vec![line(2, 1, 1)]);
    }

    #[test]
    fn test_missing_key_column_is_an_error() {
        let err = diff(vec![Row::new().with("val", "a")], vec![], &key()).unwrap_err();
        assert!(matches!(
            err,
            DiffError::MissingKey {
                side: Side::Source,
                index: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_keys_are_errors() {
        let err = diff(vec![], vec![row(1, "a"), row(1, "b")], &key()).unwrap_err();
        assert!(matches!(err, DiffError::DuplicateKey { side: Side::Target, .. }));

        let err = diff(vec![row(1, "a"), row(1, "b")], vec![], &key()).unwrap_err();
        assert!(matches!(err, DiffError::DuplicateKey { side: Side::Source, .. }));

        let err = diff(vec![row(1, "a"), row(1, "b")], vec![row(1, "a")], &key()).unwrap_err();
        assert!(matches!(err, DiffError::DuplicateKey { side: Side::Source, .. }));
    }
}
