//! Active-value projection.
//!
//! Builds the submission view of a form: the values tree with every path
//! whose governing active flag is `false` removed. A boolean in the active
//! tree governs the whole subtree below it; paths with no active entry are
//! kept. Array elements left as `{}` after their last active child was
//! dropped are spliced out so the submitted array has no holes.

use serde_json::Value;

use crate::path::PathSegment;
use crate::tree;

/// Project `values` through `active`.
pub fn project(values: &Value, active: &Value) -> Value {
    let mut drops = Vec::new();
    let mut prefix = Vec::new();
    collect_drops(values, Some(active), &mut prefix, &mut drops);

    let mut out = values.clone();
    for path in drops.iter().rev() {
        if path.is_empty() {
            return empty_like(values);
        }
        tree::delete_in(&mut out, path);
        compact_parent(&mut out, path);
    }
    out
}

/// Paths to drop, in document order.
fn collect_drops(
    value: &Value,
    active: Option<&Value>,
    prefix: &mut Vec<PathSegment>,
    drops: &mut Vec<Vec<PathSegment>>,
) {
    match active {
        Some(Value::Bool(false)) => drops.push(prefix.clone()),
        Some(flags) if tree::is_container(flags) => match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let seg = PathSegment::Key(key.clone());
                    let flag = tree::get_in(flags, std::slice::from_ref(&seg));
                    prefix.push(seg);
                    collect_drops(child, flag, prefix, drops);
                    prefix.pop();
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    let seg = PathSegment::Index(i);
                    let flag = tree::get_in(flags, std::slice::from_ref(&seg));
                    prefix.push(seg);
                    collect_drops(child, flag, prefix, drops);
                    prefix.pop();
                }
            }
            _ => {}
        },
        // `true`, absent, or a non-boolean leaf: keep the whole subtree.
        _ => {}
    }
}

/// Splice out the array element holding `dropped` if it became `{}`.
fn compact_parent(out: &mut Value, dropped: &[PathSegment]) {
    if dropped.len() < 2 {
        return;
    }
    let parent = &dropped[..dropped.len() - 1];
    let holder = &dropped[..dropped.len() - 2];
    let parent_is_element = tree::get_in(out, holder).is_some_and(Value::is_array);
    let parent_is_empty = tree::get_in(out, parent).is_some_and(tree::is_empty_object);
    if parent_is_element && parent_is_empty {
        tree::delete_in(out, parent);
    }
}

fn empty_like(values: &Value) -> Value {
    match values {
        Value::Array(_) => Value::Array(Vec::new()),
        _ => Value::Object(serde_json::Map::new()),
    }
}
