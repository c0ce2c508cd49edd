//! Structural diff over settings snapshots.
//!
//! A change list is computed on every version write and stored next to the
//! snapshot, so the history reads as "what changed" without diffing
//! snapshots at query time.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One changed path between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    /// Dot path of the changed field.
    pub path: String,

    /// What happened at the path.
    pub op: ChangeOp,

    /// Previous value, absent for additions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<Value>,

    /// New value, absent for removals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<Value>,
}

/// Kind of change at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    /// The path exists only in the new snapshot.
    Added,
    /// The path exists only in the old snapshot.
    Removed,
    /// The path exists in both with different values.
    Changed,
}

/// Computes the structural diff between two snapshots.
///
/// Objects recurse; arrays and scalars compare atomically. The result is
/// ordered by path.
#[must_use]
pub fn compute_changes(old: &Value, new: &Value) -> Vec<Change> {
    let mut changes = Vec::new();
    walk(old, new, String::new(), &mut changes);
    changes.sort_by(|a, b| a.path.cmp(&b.path));
    changes
}

fn walk(old: &Value, new: &Value, path: String, out: &mut Vec<Change>) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, old_value) in old_map {
                let child = join(&path, key);
                match new_map.get(key) {
                    Some(new_value) => walk(old_value, new_value, child, out),
                    None => out.push(Change {
                        path: child,
                        op: ChangeOp::Removed,
                        from: Some(old_value.clone()),
                        to: None,
                    }),
                }
            }
            for (key, new_value) in new_map {
                if !old_map.contains_key(key) {
                    out.push(Change {
                        path: join(&path, key),
                        op: ChangeOp::Added,
                        from: None,
                        to: Some(new_value.clone()),
                    });
                }
            }
        }
        (old, new) if old != new => out.push(Change {
            path,
            op: ChangeOp::Changed,
            from: Some(old.clone()),
            to: Some(new.clone()),
        }),
        _ => {}
    }
}

fn join(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}
