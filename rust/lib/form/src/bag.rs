use std::fmt;
use std::sync::RwLock;

use serde_json::{Map, Value};

use crate::path::AsSegments;
use crate::reactive::{Runtime, Source};
use crate::tree;

/// One of the six parallel state trees a form keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Axis {
    Values,
    Touched,
    Errors,
    Active,
    Editable,
    Visible,
}

impl Axis {
    pub const ALL: [Axis; 6] = [
        Axis::Values,
        Axis::Touched,
        Axis::Errors,
        Axis::Active,
        Axis::Editable,
        Axis::Visible,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::Values => "values",
            Axis::Touched => "touched",
            Axis::Errors => "errors",
            Axis::Active => "active",
            Axis::Editable => "editable",
            Axis::Visible => "visible",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nested state store for one axis.
///
/// - `initial` is a deep copy taken at construction and on every
///   `rebaseline`.
/// - `current` is mutated in place by `set`, `delete`, `set_batch` and
///   `replace`.
/// - Reads are tracked by the form's runtime; every mutation notifies it, so
///   memos and effects observing the bag see the change.
pub struct StateBag {
    axis: Axis,
    initial: RwLock<Value>,
    current: RwLock<Value>,
    source: Source,
}

impl StateBag {
    pub fn new(runtime: &Runtime, axis: Axis, initial: Value) -> Self {
        Self {
            axis,
            current: RwLock::new(initial.clone()),
            initial: RwLock::new(initial),
            source: Source::new(runtime),
        }
    }

    pub fn axis(&self) -> Axis {
        self.axis
    }

    // ── Reads ──

    /// Value at `path`, if present.
    pub fn get<P: AsSegments + ?Sized>(&self, path: &P) -> Option<Value> {
        self.source.track();
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        tree::get_in(&current, &path.as_segments()).cloned()
    }

    /// Value at `path`, or `default` when absent.
    pub fn get_or<P: AsSegments + ?Sized>(&self, path: &P, default: Value) -> Value {
        self.get(path).unwrap_or(default)
    }

    /// True when a non-null value is present at `path`.
    pub fn contains<P: AsSegments + ?Sized>(&self, path: &P) -> bool {
        self.get(path).is_some_and(|v| !v.is_null())
    }

    /// Deep copy of the current tree.
    pub fn current(&self) -> Value {
        self.source.track();
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Deep copy of the baseline tree.
    pub fn initial(&self) -> Value {
        self.source.track();
        self.initial.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// True when `current` deep-equals `initial`.
    pub fn is_pristine(&self) -> bool {
        self.source.track();
        let initial = self.initial.read().unwrap_or_else(|e| e.into_inner());
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        *initial == *current
    }

    // ── Writes ──

    /// Write `value` at `path`, creating intermediate containers.
    ///
    /// Writing the value already stored, or writing through an index out of
    /// reach (see [`tree::set_in`]), notifies nobody.
    pub fn set<P: AsSegments + ?Sized>(&self, path: &P, value: Value) {
        let segments = path.as_segments();
        {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            if tree::get_in(&current, &segments) == Some(&value) {
                return;
            }
            if !tree::set_in(&mut current, &segments, value) {
                return;
            }
        }
        self.source.notify();
    }

    /// Remove the entry at `path`. Array parents are spliced.
    ///
    /// Returns the removed value. Nothing is notified when the path was absent.
    pub fn delete<P: AsSegments + ?Sized>(&self, path: &P) -> Option<Value> {
        let segments = path.as_segments();
        let removed = {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            tree::delete_in(&mut current, &segments)
        };
        if removed.is_some() {
            self.source.notify();
        }
        removed
    }

    /// Fill `path` with `value` where it is missing or null, in the baseline
    /// as well as the current tree, so seeding never makes the bag dirty.
    ///
    /// Returns `true` when the current tree changed.
    pub fn seed<P: AsSegments + ?Sized>(&self, path: &P, value: Value) -> bool {
        let segments = path.as_segments();
        let absent = |tree: &Value| tree::get_in(tree, &segments).is_none_or(Value::is_null);
        let filled = {
            let mut initial = self.initial.write().unwrap_or_else(|e| e.into_inner());
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            if absent(&*initial) {
                tree::set_in(&mut initial, &segments, value.clone());
            }
            absent(&*current) && tree::set_in(&mut current, &segments, value)
        };
        if filled {
            self.source.notify();
        }
        filled
    }

    /// Shallow-merge the top-level keys of `partial` into `current`.
    pub fn set_batch(&self, partial: Value) {
        {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            tree::merge_top_level(&mut current, partial);
        }
        self.source.notify();
    }

    /// Replace `current` wholesale.
    pub fn replace(&self, next: Value) {
        {
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            *current = next;
        }
        self.source.notify();
    }

    /// Adopt `next` as both baseline and current state.
    pub fn rebaseline(&self, next: Value) {
        {
            let mut initial = self.initial.write().unwrap_or_else(|e| e.into_inner());
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            *current = next.clone();
            *initial = next;
        }
        self.source.notify();
    }

    /// Reset `current` to a copy of the baseline.
    pub fn restore(&self) {
        {
            let initial = self.initial.read().unwrap_or_else(|e| e.into_inner());
            let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
            *current = initial.clone();
        }
        self.source.notify();
    }
}

impl fmt::Debug for StateBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        f.debug_struct("StateBag")
            .field("axis", &self.axis)
            .field("current", &*current)
            .finish()
    }
}

/// An empty object, the default tree for every axis.
pub(crate) fn empty_tree() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Effect, Memo};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn bag(initial: Value) -> StateBag {
        StateBag::new(&Runtime::new(), Axis::Values, initial)
    }

    // ========================================================================
    // Reads and writes
    // ========================================================================

    #[test]
    fn set_then_get() {
        let b = bag(json!({}));
        b.set("a.b[0].c", json!("x"));
        assert_eq!(b.get("a.b[0].c"), Some(json!("x")));
        assert_eq!(b.current(), json!({"a": {"b": [{"c": "x"}]}}));
    }

    #[test]
    fn delete_then_get_or_default() {
        let b = bag(json!({}));
        b.set("foo", json!(1));
        assert_eq!(b.delete("foo"), Some(json!(1)));
        assert_eq!(b.get_or("foo", json!("d")), json!("d"));
        assert_eq!(b.delete("foo"), None);
    }

    #[test]
    fn contains_ignores_null() {
        let b = bag(json!({"a": null, "b": 0}));
        assert!(!b.contains("a"));
        assert!(b.contains("b"));
        assert!(!b.contains("c"));
    }

    #[test]
    fn set_batch_merges_top_level() {
        let b = bag(json!({"a": 1, "b": {"x": 1}}));
        b.set_batch(json!({"b": {"y": 2}, "c": 3}));
        assert_eq!(b.current(), json!({"a": 1, "b": {"y": 2}, "c": 3}));
    }

    #[test]
    fn replace_keeps_initial() {
        let b = bag(json!({"a": 1}));
        b.replace(json!({"z": true}));
        assert_eq!(b.current(), json!({"z": true}));
        assert_eq!(b.initial(), json!({"a": 1}));
        assert!(!b.is_pristine());
    }

    #[test]
    fn rebaseline_and_restore() {
        let b = bag(json!({"a": 1}));
        b.rebaseline(json!({"a": 2}));
        assert_eq!(b.initial(), json!({"a": 2}));
        assert!(b.is_pristine());

        b.set("a", json!(3));
        assert!(!b.is_pristine());
        b.restore();
        assert_eq!(b.current(), json!({"a": 2}));
        assert!(b.is_pristine());
    }

    #[test]
    fn seed_fills_absent_entries_in_both_trees() {
        let b = bag(json!({"kept": 1, "hole": null}));
        assert!(!b.seed("kept", json!(9)));
        assert!(b.seed("hole", json!(2)));
        assert!(b.seed("new.deep", json!(3)));

        assert_eq!(b.current(), json!({"kept": 1, "hole": 2, "new": {"deep": 3}}));
        assert!(b.is_pristine());
    }

    #[test]
    fn initial_is_a_deep_copy() {
        let b = bag(json!({"a": {"b": 1}}));
        b.set("a.b", json!(2));
        assert_eq!(b.initial(), json!({"a": {"b": 1}}));
    }

    // ========================================================================
    // Reactivity
    // ========================================================================

    #[test]
    fn memo_sees_nested_writes() {
        let rt = Runtime::new();
        let b = Arc::new(StateBag::new(&rt, Axis::Values, json!({})));
        let memo = {
            let b = b.clone();
            Memo::new(&rt, move || b.get("a.b[0]").is_some())
        };
        assert!(!memo.get());
        b.set("a.b[0]", json!(1));
        assert!(memo.get());
    }

    #[test]
    fn effect_reruns_on_bag_change() {
        let rt = Runtime::new();
        let b = Arc::new(StateBag::new(&rt, Axis::Active, json!({})));
        let runs = Arc::new(AtomicUsize::new(0));
        let _effect = {
            let (b, runs) = (b.clone(), runs.clone());
            Effect::new(&rt, move || {
                b.get("x");
                runs.fetch_add(1, Ordering::Relaxed);
            })
        };
        b.set("y", json!(true));
        b.delete("missing");
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn noop_writes_do_not_notify() {
        let rt = Runtime::new();
        let b = Arc::new(StateBag::new(&rt, Axis::Values, json!({"a": 1, "list": []})));
        let runs = Arc::new(AtomicUsize::new(0));
        let _effect = {
            let (b, runs) = (b.clone(), runs.clone());
            Effect::new(&rt, move || {
                b.get("a");
                runs.fetch_add(1, Ordering::Relaxed);
            })
        };
        b.set("a", json!(1));
        b.set("list[18446744073709551615]", json!(1));
        b.set("list[100000000000]", json!(1));
        assert!(!b.seed("far[100000000000]", json!(1)));
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert_eq!(b.current(), json!({"a": 1, "list": []}));

        b.set("a", json!(2));
        assert_eq!(runs.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn axis_names() {
        assert_eq!(Axis::Errors.as_str(), "errors");
        assert_eq!(Axis::ALL.len(), 6);
        assert_eq!(Axis::Visible.index(), 5);
    }
}
