use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;
use tracing::{debug, warn};

use crate::bag::Axis;
use crate::context;
use crate::error::FormError;
use crate::form::{Form, WeakForm};
use crate::path::FieldPath;
use crate::reactive::{Effect, untracked};
use crate::tree::MAX_INDEX_GAP;

/// Derived-state predicate, evaluated as an effect against the owning form.
pub type Predicate = Arc<dyn Fn(&Form) -> bool + Send + Sync>;

/// Per-field configuration.
///
/// Built with chained setters:
///
/// ```ignore
/// let options = FieldOptions::new()
///     .initial_value(json!(""))
///     .default_value(json!(""))
///     .active_when(|form| form.get_field_value("kind") == Some(json!("custom")));
/// ```
#[derive(Clone)]
pub struct FieldOptions {
    pub(crate) initial_value: Option<Value>,
    pub(crate) initial_touched: bool,
    pub(crate) initial_error: String,
    pub(crate) initial_active: bool,
    pub(crate) initial_editable: bool,
    pub(crate) initial_visible: bool,
    pub(crate) active_when: Option<Predicate>,
    pub(crate) editable_when: Option<Predicate>,
    pub(crate) visible_when: Option<Predicate>,
    pub(crate) default_value: Option<Value>,
    pub(crate) restore_when_become_inactive: bool,
    pub(crate) apply_derived_state_on_mount: bool,
    pub(crate) retain_value_on_destroy: bool,
}

impl FieldOptions {
    pub fn new() -> Self {
        Self {
            initial_value: None,
            initial_touched: false,
            initial_error: String::new(),
            initial_active: true,
            initial_editable: true,
            initial_visible: true,
            active_when: None,
            editable_when: None,
            visible_when: None,
            default_value: None,
            restore_when_become_inactive: true,
            apply_derived_state_on_mount: false,
            retain_value_on_destroy: true,
        }
    }

    /// Value seeded into the form when the path has none.
    pub fn initial_value(mut self, value: Value) -> Self {
        self.initial_value = Some(value);
        self
    }

    pub fn initial_touched(mut self, touched: bool) -> Self {
        self.initial_touched = touched;
        self
    }

    pub fn initial_error(mut self, error: impl Into<String>) -> Self {
        self.initial_error = error.into();
        self
    }

    pub fn initial_active(mut self, active: bool) -> Self {
        self.initial_active = active;
        self
    }

    pub fn initial_editable(mut self, editable: bool) -> Self {
        self.initial_editable = editable;
        self
    }

    pub fn initial_visible(mut self, visible: bool) -> Self {
        self.initial_visible = visible;
        self
    }

    pub fn active_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Form) -> bool + Send + Sync + 'static,
    {
        self.active_when = Some(Arc::new(predicate));
        self
    }

    pub fn editable_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Form) -> bool + Send + Sync + 'static,
    {
        self.editable_when = Some(Arc::new(predicate));
        self
    }

    pub fn visible_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Form) -> bool + Send + Sync + 'static,
    {
        self.visible_when = Some(Arc::new(predicate));
        self
    }

    /// Value written back when the field becomes inactive.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn restore_when_become_inactive(mut self, restore: bool) -> Self {
        self.restore_when_become_inactive = restore;
        self
    }

    /// Apply the first evaluation of the `*_when` predicates on mount and on
    /// reinitialize. Off by default, so explicit initial state wins.
    pub fn apply_derived_state_on_mount(mut self, apply: bool) -> Self {
        self.apply_derived_state_on_mount = apply;
        self
    }

    pub fn retain_value_on_destroy(mut self, retain: bool) -> Self {
        self.retain_value_on_destroy = retain;
        self
    }
}

impl Default for FieldOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FieldOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldOptions")
            .field("initial_value", &self.initial_value)
            .field("initial_active", &self.initial_active)
            .field("active_when", &self.active_when.is_some())
            .field("editable_when", &self.editable_when.is_some())
            .field("visible_when", &self.visible_when.is_some())
            .field("default_value", &self.default_value)
            .field(
                "restore_when_become_inactive",
                &self.restore_when_become_inactive,
            )
            .field("retain_value_on_destroy", &self.retain_value_on_destroy)
            .finish_non_exhaustive()
    }
}

// ── Field ──

/// Live view of one registered path across all axes.
///
/// Cheap to clone. Holds only a weak reference to its form: reads on a
/// dropped form return the fallbacks, writes fail with
/// [`FormError::FormDropped`].
#[derive(Clone)]
pub struct Field {
    inner: Arc<FieldInner>,
}

struct FieldInner {
    path: FieldPath,
    form: WeakForm,
    options: FieldOptions,
    watchers: Mutex<Vec<Effect>>,
    destroyed: AtomicBool,
}

impl Field {
    /// Create a field on `form`, seed its state and register it.
    pub fn new(
        form: &Form,
        path: impl Into<FieldPath>,
        options: FieldOptions,
    ) -> Result<Self, FormError> {
        let path = path.into();
        if path.is_empty() {
            return Err(FormError::MissingPath);
        }
        if cfg!(debug_assertions)
            && options.active_when.is_some()
            && options.default_value.is_none()
        {
            warn!(
                path = path.as_str(),
                "`active_when` without `default_value`, the value is deleted when the field becomes inactive"
            );
        }

        let field = Field {
            inner: Arc::new(FieldInner {
                path,
                form: form.downgrade(),
                options,
                watchers: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        };
        form.runtime().batch(|| {
            field.seed(form);
            field.start_watchers();
        });
        form.register_field(field.path().as_str(), field.clone());
        Ok(field)
    }

    /// Create a field on the form provided by the enclosing scope.
    pub fn mount(path: impl Into<FieldPath>, options: FieldOptions) -> Result<Self, FormError> {
        let path = path.into();
        if path.is_empty() {
            return Err(FormError::MissingPath);
        }
        let form = context::inject().ok_or(FormError::MissingContext)?;
        Field::new(&form, path, options)
    }

    pub fn path(&self) -> &FieldPath {
        &self.inner.path
    }

    pub fn options(&self) -> &FieldOptions {
        &self.inner.options
    }

    pub fn form(&self) -> Option<Form> {
        self.inner.form.upgrade()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// True when both handles point at the same field.
    pub fn ptr_eq(&self, other: &Field) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Helpers for a field whose value is an array.
    pub fn array(&self) -> FieldArray {
        FieldArray {
            field: self.clone(),
        }
    }

    // ── Readers ──

    pub fn value(&self) -> Option<Value> {
        self.read(Axis::Values)
    }

    pub fn touched(&self) -> bool {
        self.read_bool(Axis::Touched, false)
    }

    pub fn error(&self) -> String {
        match self.read(Axis::Errors) {
            Some(Value::String(s)) => s,
            _ => String::new(),
        }
    }

    pub fn active(&self) -> bool {
        self.read_bool(Axis::Active, true)
    }

    pub fn editable(&self) -> bool {
        self.read_bool(Axis::Editable, true)
    }

    pub fn visible(&self) -> bool {
        self.read_bool(Axis::Visible, true)
    }

    fn read(&self, axis: Axis) -> Option<Value> {
        let form = self.form()?;
        form.bag(axis).get(&self.inner.path)
    }

    fn read_bool(&self, axis: Axis, fallback: bool) -> bool {
        self.read(axis).and_then(|v| v.as_bool()).unwrap_or(fallback)
    }

    // ── Writers ──

    /// Write the value and mark the field touched.
    pub fn set_value(&self, value: Value) -> Result<(), FormError> {
        self.require_form()?.set_field_value(&self.inner.path, value);
        Ok(())
    }

    pub fn set_touched(&self, touched: bool) -> Result<(), FormError> {
        self.write(Axis::Touched, Value::Bool(touched))
    }

    pub fn set_error(&self, error: impl Into<String>) -> Result<(), FormError> {
        self.write(Axis::Errors, Value::String(error.into()))
    }

    /// Set the active flag using the field's restore policy and default value.
    pub fn set_active(&self, active: bool) -> Result<(), FormError> {
        let options = &self.inner.options;
        self.set_active_with(
            active,
            options.restore_when_become_inactive,
            options.default_value.clone(),
        )
    }

    /// Set the active flag. Becoming inactive with `should_restore` writes
    /// `value` (or deletes the value when `None`).
    pub fn set_active_with(
        &self,
        active: bool,
        should_restore: bool,
        value: Option<Value>,
    ) -> Result<(), FormError> {
        self.require_form()?
            .set_field_active(&self.inner.path, active, should_restore, value);
        Ok(())
    }

    pub fn set_editable(&self, editable: bool) -> Result<(), FormError> {
        self.write(Axis::Editable, Value::Bool(editable))
    }

    pub fn set_visible(&self, visible: bool) -> Result<(), FormError> {
        self.write(Axis::Visible, Value::Bool(visible))
    }

    pub fn delete_value(&self) -> Result<(), FormError> {
        self.remove(Axis::Values)
    }

    pub fn delete_touched(&self) -> Result<(), FormError> {
        self.remove(Axis::Touched)
    }

    pub fn delete_error(&self) -> Result<(), FormError> {
        self.remove(Axis::Errors)
    }

    pub fn delete_active(&self) -> Result<(), FormError> {
        self.remove(Axis::Active)
    }

    pub fn delete_editable(&self) -> Result<(), FormError> {
        self.remove(Axis::Editable)
    }

    pub fn delete_visible(&self) -> Result<(), FormError> {
        self.remove(Axis::Visible)
    }

    fn write(&self, axis: Axis, value: Value) -> Result<(), FormError> {
        self.require_form()?.bag(axis).set(&self.inner.path, value);
        Ok(())
    }

    fn remove(&self, axis: Axis) -> Result<(), FormError> {
        self.require_form()?.bag(axis).delete(&self.inner.path);
        Ok(())
    }

    fn require_form(&self) -> Result<Form, FormError> {
        self.form()
            .ok_or_else(|| FormError::FormDropped(self.inner.path.to_string()))
    }

    // ── UI event handlers ──

    pub fn handle_input(&self, value: Value) -> Result<(), FormError> {
        self.set_value(value)
    }

    pub fn handle_change(&self, value: Value) -> Result<(), FormError> {
        self.set_value(value)
    }

    pub fn handle_input_change(&self, value: Value) -> Result<(), FormError> {
        self.set_value(value)
    }

    pub fn handle_blur(&self) -> Result<(), FormError> {
        self.set_touched(true)
    }

    // ── Lifecycle ──

    /// Re-seed absent state and re-evaluate watchers under the mount policy.
    pub fn reinitialize(&self) -> Result<(), FormError> {
        if self.is_destroyed() {
            return Ok(());
        }
        let form = self.require_form()?;
        form.runtime().batch(|| {
            self.seed(&form);
            self.start_watchers();
        });
        Ok(())
    }

    /// Stop watchers, drop this field's state and unregister it.
    ///
    /// The value is kept unless `retain_value_on_destroy` is off. Calling
    /// it again is a no-op.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_watchers();

        let Some(form) = self.form() else {
            return;
        };
        let path = &self.inner.path;
        debug!(path = path.as_str(), "destroy field");
        form.runtime().batch(|| {
            for axis in Axis::ALL {
                if axis == Axis::Values && self.inner.options.retain_value_on_destroy {
                    continue;
                }
                form.bag(axis).delete(path);
            }
        });
        if form
            .get_field(path.as_str())
            .is_some_and(|registered| registered.ptr_eq(self))
        {
            form.unregister_field(path.as_str());
        }
    }

    /// Fill every absent (missing or null) axis entry from the options.
    fn seed(&self, form: &Form) {
        let path = &self.inner.path;
        let options = &self.inner.options;

        if let Some(value) = &options.initial_value {
            form.bag(Axis::Values).seed(path, value.clone());
        }
        let defaults = [
            (Axis::Touched, Value::Bool(options.initial_touched)),
            (Axis::Errors, Value::String(options.initial_error.clone())),
            (Axis::Active, Value::Bool(options.initial_active)),
            (Axis::Editable, Value::Bool(options.initial_editable)),
            (Axis::Visible, Value::Bool(options.initial_visible)),
        ];
        for (axis, value) in defaults {
            form.bag(axis).seed(path, value);
        }

        let inactive = untracked(|| form.bag(Axis::Active).get(path)) == Some(Value::Bool(false));
        if inactive {
            form.set_field_active(
                path,
                false,
                options.restore_when_become_inactive,
                options.default_value.clone(),
            );
        }
    }

    fn start_watchers(&self) {
        let options = &self.inner.options;
        let watched = [
            (options.active_when.clone(), Axis::Active),
            (options.editable_when.clone(), Axis::Editable),
            (options.visible_when.clone(), Axis::Visible),
        ];

        let Some(form) = self.form() else {
            return;
        };
        let mut effects = Vec::new();
        for (predicate, axis) in watched {
            if let Some(predicate) = predicate {
                effects.push(self.watch(&form, predicate, axis));
            }
        }

        // Old watchers drop outside the lock.
        let old = {
            let mut watchers = self.inner.watchers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::replace(&mut *watchers, effects)
        };
        drop(old);
    }

    fn stop_watchers(&self) {
        let old = {
            let mut watchers = self.inner.watchers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *watchers)
        };
        drop(old);
    }

    /// Evaluate `predicate` as an effect and write each result after the
    /// first (or every result, with `apply_derived_state_on_mount`) to `axis`.
    fn watch(&self, form: &Form, predicate: Predicate, axis: Axis) -> Effect {
        let weak_form = form.downgrade();
        let weak_field: Weak<FieldInner> = Arc::downgrade(&self.inner);
        let apply_on_mount = self.inner.options.apply_derived_state_on_mount;
        let mounted = AtomicBool::new(false);

        Effect::new(form.runtime(), move || {
            let (Some(form), Some(inner)) = (weak_form.upgrade(), weak_field.upgrade()) else {
                return;
            };
            let next = predicate(&form);
            let first = !mounted.swap(true, Ordering::SeqCst);
            if first && !apply_on_mount {
                return;
            }
            let field = Field { inner };
            let result = untracked(|| match axis {
                Axis::Active => field.set_active(next),
                Axis::Editable => field.set_editable(next),
                _ => field.set_visible(next),
            });
            if let Err(err) = result {
                warn!(path = field.path().as_str(), axis = %axis, error = %err, "derived state not applied");
            }
        })
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("path", &self.inner.path.as_str())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// ── FieldArray ──

/// Array helpers over a field's value.
///
/// Every operation reads the current array (a non-array value counts as
/// empty), edits a copy and writes the whole array back with
/// [`Field::set_value`].
#[derive(Debug, Clone)]
pub struct FieldArray {
    field: Field,
}

impl FieldArray {
    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn items(&self) -> Vec<Value> {
        match self.field.value() {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&self, value: Value) -> Result<(), FormError> {
        let mut items = self.items();
        items.push(value);
        self.commit(items)
    }

    pub fn pop(&self) -> Result<Option<Value>, FormError> {
        let mut items = self.items();
        let popped = items.pop();
        self.commit(items)?;
        Ok(popped)
    }

    /// Overwrite the item at `index`, padding with `null` past the end.
    ///
    /// An index more than [`MAX_INDEX_GAP`] past the end is ignored.
    pub fn replace_value(&self, index: usize, value: Value) -> Result<(), FormError> {
        let mut items = self.items();
        if index > items.len().saturating_add(MAX_INDEX_GAP) {
            warn!(
                path = self.field.path().as_str(),
                index, "array index out of reach, write ignored"
            );
            return Ok(());
        }
        if items.len() <= index {
            items.resize(index + 1, Value::Null);
        }
        items[index] = value;
        self.commit(items)
    }

    /// Remove the item at `index`. Out of range is a no-op.
    pub fn remove(&self, index: usize) -> Result<Option<Value>, FormError> {
        let mut items = self.items();
        if index >= items.len() {
            return Ok(None);
        }
        let removed = items.remove(index);
        self.commit(items)?;
        Ok(Some(removed))
    }

    /// Insert at `index`, clamped to the end.
    pub fn insert(&self, index: usize, value: Value) -> Result<(), FormError> {
        let mut items = self.items();
        let index = index.min(items.len());
        items.insert(index, value);
        self.commit(items)
    }

    /// Swap two items. Out-of-range indices are a no-op.
    pub fn swap(&self, a: usize, b: usize) -> Result<(), FormError> {
        let mut items = self.items();
        if a >= items.len() || b >= items.len() {
            return Ok(());
        }
        items.swap(a, b);
        self.commit(items)
    }

    fn commit(&self, items: Vec<Value>) -> Result<(), FormError> {
        self.field.set_value(Value::Array(items))
    }
}
