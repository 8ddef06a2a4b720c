use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::debug;

use crate::field::Field;

/// Registered fields keyed by their raw path text.
///
/// Iteration is ordered by path. Registering a path twice replaces the
/// earlier field.
#[derive(Default)]
pub struct FieldRegistry {
    fields: RwLock<BTreeMap<String, Field>>,
}

impl FieldRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `field` under `path`, returning the field it replaced.
    pub fn register(&self, path: &str, field: Field) -> Option<Field> {
        debug!(path, "register field");
        let mut fields = self.fields.write().unwrap_or_else(|e| e.into_inner());
        fields.insert(path.to_string(), field)
    }

    /// Remove the field under `path`. Unknown paths are a no-op.
    pub fn unregister(&self, path: &str) -> Option<Field> {
        let removed = {
            let mut fields = self.fields.write().unwrap_or_else(|e| e.into_inner());
            fields.remove(path)
        };
        if removed.is_some() {
            debug!(path, "unregister field");
        }
        removed
    }

    pub fn lookup(&self, path: &str) -> Option<Field> {
        let fields = self.fields.read().unwrap_or_else(|e| e.into_inner());
        fields.get(path).cloned()
    }

    /// Call `f` for every registered field, in path order.
    ///
    /// Runs over a snapshot, so `f` may register or unregister fields.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Field)) {
        for (path, field) in self.snapshot() {
            f(&path, &field);
        }
    }

    /// All registered fields, in path order.
    pub fn snapshot(&self) -> Vec<(String, Field)> {
        let fields = self.fields.read().unwrap_or_else(|e| e.into_inner());
        fields.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn paths(&self) -> Vec<String> {
        let fields = self.fields.read().unwrap_or_else(|e| e.into_inner());
        fields.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let fields = self.fields.read().unwrap_or_else(|e| e.into_inner());
        fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
