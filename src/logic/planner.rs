use serde_json::{Map, Value};

use crate::model::{DiffMode, DiffPlan, PartialUpdate};

/// Compute the changed leaf fields of `desired` relative to `current`.
///
/// Objects are walked recursively, everything else is a leaf. The function is
/// total: shapes that do not line up are reported as changed instead of
/// failing.
pub fn plan_update(current: &Value, desired: &Value, mode: DiffMode) -> DiffPlan {
    let mut changed_paths = Vec::new();

    let payload = match desired {
        Value::Object(fields) => {
            diff_fields(current.as_object(), fields, mode, "", &mut changed_paths)
        }
        // A bare value has no named fields to mask
        _ => Map::new(),
    };

    DiffPlan {
        mode,
        changed_paths,
        payload: Value::Object(payload),
    }
}

/// Plan both views of one update: the wire mask and the diagnostic trace
pub fn plan_partial_update(current: &Value, desired: &Value) -> PartialUpdate {
    PartialUpdate {
        mask: plan_update(current, desired, DiffMode::MaskOnly),
        trace: plan_update(current, desired, DiffMode::WithNewFields),
        body: desired.clone(),
    }
}

/// Get the dotted paths of every leaf of a tree
pub fn properties_to_paths(tree: &Value) -> Vec<String> {
    let mut paths = Vec::new();
    if let Value::Object(fields) = tree {
        for (key, value) in fields {
            collect_leaf_paths(value, key, &mut paths);
        }
    }
    paths
}

fn diff_fields(
    current: Option<&Map<String, Value>>,
    desired: &Map<String, Value>,
    mode: DiffMode,
    head: &str,
    changed: &mut Vec<String>,
) -> Map<String, Value> {
    let mut payload = Map::new();

    for (key, value) in desired {
        let path = join_path(head, key);
        let existing = current.and_then(|fields| fields.get(key));

        match (value, existing) {
            (Value::Object(children), Some(Value::Object(existing_children))) => {
                let nested = diff_fields(Some(existing_children), children, mode, &path, changed);
                if !nested.is_empty() {
                    payload.insert(key.clone(), Value::Object(nested));
                }
            }
            (Value::Object(_), None) => {
                if mode == DiffMode::WithNewFields && collect_leaf_paths(value, &path, changed) > 0 {
                    payload.insert(key.clone(), value.clone());
                }
            }
            // The field exists but is not an object any more: every leaf differs
            (Value::Object(_), Some(_)) => {
                if collect_leaf_paths(value, &path, changed) > 0 {
                    payload.insert(key.clone(), value.clone());
                }
            }
            (leaf, Some(existing)) => {
                if !values_equal(existing, leaf) {
                    changed.push(path);
                    payload.insert(key.clone(), leaf.clone());
                }
            }
            (leaf, None) => {
                if mode == DiffMode::WithNewFields {
                    changed.push(path);
                    payload.insert(key.clone(), leaf.clone());
                }
            }
        }
    }

    payload
}

/// Push the leaf paths below `value`, returns how many were added
fn collect_leaf_paths(value: &Value, path: &str, paths: &mut Vec<String>) -> usize {
    match value {
        Value::Object(fields) => fields
            .iter()
            .map(|(key, child)| collect_leaf_paths(child, &join_path(path, key), paths))
            .sum(),
        _ => {
            paths.push(path.to_string());
            1
        }
    }
}

fn join_path(head: &str, key: &str) -> String {
    if head.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", head, key)
    }
}

/// Deep equality where numbers compare by value (`1 == 1.0`)
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        // Integers compare exactly, floats only when one side is a float
        (Value::Number(x), Value::Number(y)) => {
            if x.is_f64() || y.is_f64() {
                x.as_f64() == y.as_f64()
            } else {
                x == y
            }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(key, x)| ys.get(key).map_or(false, |y| values_equal(x, y)))
        }
        _ => a == b,
    }
}
