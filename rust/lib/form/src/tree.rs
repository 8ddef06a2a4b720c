//! Path-addressed operations over nested `serde_json::Value` trees.
//!
//! These are the primitives behind every state bag. They never fail: reads
//! through missing ancestors return `None`, deletes through missing ancestors
//! are no-ops, and writes create whatever containers the path needs (or
//! refuse an index far past the end of its array).

use serde_json::{Map, Value};
use tracing::warn;

use crate::path::{PathSegment, format};

/// How far past the end of an array a write may pad with `null`.
pub const MAX_INDEX_GAP: usize = 10_000;

/// Read the node at `path`. `None` when any step is missing.
///
/// `Index(i)` against an object reads key `"i"`; a numeric `Key` against an
/// array reads that index.
pub fn get_in<'a>(tree: &'a Value, path: &[PathSegment]) -> Option<&'a Value> {
    let mut cur = tree;
    for seg in path {
        cur = child(cur, seg)?;
    }
    Some(cur)
}

/// Write `value` at `path`, creating intermediate containers.
///
/// A missing (or null, or scalar) intermediate is replaced by a container
/// whose kind is taken from the *next* segment: an index creates an array,
/// anything else an object. Writing past the end of an array pads the gap
/// with `null`. An empty path replaces the whole tree.
///
/// An index more than [`MAX_INDEX_GAP`] past the end of its array is treated
/// as a malformed path: nothing is written and `false` is returned.
pub fn set_in(tree: &mut Value, path: &[PathSegment], value: Value) -> bool {
    let Some((last, parents)) = path.split_last() else {
        *tree = value;
        return true;
    };
    if !within_reach(tree, path) {
        warn!(path = %format(path), "array index out of reach, write ignored");
        return false;
    }

    let mut cur = tree;
    for (i, seg) in parents.iter().enumerate() {
        let slot = entry_mut(cur, seg);
        if !is_container(slot) {
            *slot = empty_container(path[i + 1].is_index());
        }
        cur = slot;
    }
    *entry_mut(cur, last) = value;
    true
}

/// Whether every index in `path` lands within [`MAX_INDEX_GAP`] of the end of
/// the array it would pad.
fn within_reach(tree: &Value, path: &[PathSegment]) -> bool {
    let mut cur = Some(tree);
    for seg in path {
        let len = match cur {
            Some(Value::Array(items)) => Some(items.len()),
            Some(Value::Object(_)) => None,
            _ => seg.is_index().then_some(0),
        };
        if let (Some(len), Some(i)) = (len, seg.as_index()) {
            if i > len.saturating_add(MAX_INDEX_GAP) {
                return false;
            }
        }
        cur = cur.and_then(|node| child(node, seg));
    }
    true
}

/// Remove the node at `path` and return it.
///
/// Array parents are spliced, so later elements shift down by one. Missing
/// ancestors and out-of-range indices are silent no-ops.
pub fn delete_in(tree: &mut Value, path: &[PathSegment]) -> Option<Value> {
    let (last, parents) = path.split_last()?;
    let mut cur = tree;
    for seg in parents {
        cur = child_mut(cur, seg)?;
    }
    match cur {
        Value::Object(map) => map.remove(last.as_key().as_ref()),
        Value::Array(items) => {
            let i = last.as_index()?;
            if i < items.len() {
                Some(items.remove(i))
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Shallow-merge the top-level keys of `partial` into `tree`.
///
/// Non-object `partial` values are ignored. A non-object `tree` becomes an
/// object first.
pub fn merge_top_level(tree: &mut Value, partial: Value) {
    let Value::Object(entries) = partial else {
        return;
    };
    if !tree.is_object() {
        *tree = Value::Object(Map::new());
    }
    if let Value::Object(map) = tree {
        for (key, value) in entries {
            map.insert(key, value);
        }
    }
}

/// True for `{}`.
pub fn is_empty_object(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.is_empty())
}

pub fn is_container(value: &Value) -> bool {
    value.is_object() || value.is_array()
}

fn child<'a>(node: &'a Value, seg: &PathSegment) -> Option<&'a Value> {
    match node {
        Value::Object(map) => map.get(seg.as_key().as_ref()),
        Value::Array(items) => items.get(seg.as_index()?),
        _ => None,
    }
}

fn child_mut<'a>(node: &'a mut Value, seg: &PathSegment) -> Option<&'a mut Value> {
    match node {
        Value::Object(map) => map.get_mut(seg.as_key().as_ref()),
        Value::Array(items) => items.get_mut(seg.as_index()?),
        _ => None,
    }
}

/// The slot for `seg` inside `node`, created (as `null`) when missing.
///
/// A non-container `node` becomes a container of the kind `seg` implies. A
/// non-numeric key written into an array promotes the array to an object
/// keyed by index text.
fn entry_mut<'a>(node: &'a mut Value, seg: &PathSegment) -> &'a mut Value {
    if !is_container(node) {
        *node = empty_container(seg.is_index());
    }
    if node.is_array() && seg.as_index().is_none() {
        promote_to_object(node);
    }
    match node {
        Value::Array(items) => {
            // `as_index` is Some here, checked above.
            let i = seg.as_index().unwrap_or(items.len());
            if items.len() <= i {
                items.resize(i.saturating_add(1), Value::Null);
            }
            &mut items[i]
        }
        Value::Object(map) => map.entry(seg.as_key().into_owned()).or_insert(Value::Null),
        _ => unreachable!("entry_mut: node was made a container above"),
    }
}

fn promote_to_object(node: &mut Value) {
    if let Value::Array(items) = node {
        let map: Map<String, Value> = std::mem::take(items)
            .into_iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v))
            .collect();
        *node = Value::Object(map);
    }
}

fn empty_container(array: bool) -> Value {
    if array {
        Value::Array(Vec::new())
    } else {
        Value::Object(Map::new())
    }
}
