use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::bag::{Axis, StateBag, empty_tree};
use crate::context::{self, FormScope};
use crate::error::FormError;
use crate::field::Field;
use crate::path::AsSegments;
use crate::projection;
use crate::reactive::{Effect, Memo, Runtime, Signal, untracked};
use crate::registry::FieldRegistry;

/// Boxed future returned by form collaborators.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Validation collaborator: receives a copy of the values, returns an error
/// tree. An empty tree (or `null`) means valid.
pub type ValidateFn = Arc<dyn Fn(Value, Form) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

/// Submit collaborator: receives a copy of the values, returns the submit
/// result.
pub type SubmitFn = Arc<dyn Fn(Value, Form) -> BoxFuture<anyhow::Result<Value>> + Send + Sync>;

/// Reset collaborator: receives the current values, optionally returns the
/// state to reinitialize with.
pub type ResetFn =
    Arc<dyn Fn(Value, Form) -> BoxFuture<anyhow::Result<Option<FormState>>> + Send + Sync>;

// ── Configuration ──

/// Form behavior flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormSettings {
    pub validate_on_mount: bool,
    pub validate_on_blur: bool,
    pub validate_on_change: bool,
    /// Reject a submit while another one is still running.
    pub guard_concurrent_submit: bool,
}

impl Default for FormSettings {
    fn default() -> Self {
        Self {
            validate_on_mount: true,
            validate_on_blur: true,
            validate_on_change: true,
            guard_concurrent_submit: false,
        }
    }
}

/// A tree per axis. Axes left as `None` are not touched by
/// [`Form::reinitialize`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub touched: Option<Value>,
    #[serde(alias = "error", skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub editable: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visible: Option<Value>,
}

impl FormState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, axis: Axis, tree: Value) -> Self {
        *self.slot_mut(axis) = Some(tree);
        self
    }

    pub fn get(&self, axis: Axis) -> Option<&Value> {
        match axis {
            Axis::Values => self.values.as_ref(),
            Axis::Touched => self.touched.as_ref(),
            Axis::Errors => self.errors.as_ref(),
            Axis::Active => self.active.as_ref(),
            Axis::Editable => self.editable.as_ref(),
            Axis::Visible => self.visible.as_ref(),
        }
    }

    fn slot_mut(&mut self, axis: Axis) -> &mut Option<Value> {
        match axis {
            Axis::Values => &mut self.values,
            Axis::Touched => &mut self.touched,
            Axis::Errors => &mut self.errors,
            Axis::Active => &mut self.active,
            Axis::Editable => &mut self.editable,
            Axis::Visible => &mut self.visible,
        }
    }
}

/// Options for [`Form::new`].
#[derive(Default)]
pub struct FormOptions {
    initial_state: FormState,
    initial_state_signal: Option<Signal<FormState>>,
    validate: Option<ValidateFn>,
    on_submit: Option<SubmitFn>,
    on_reset: Option<ResetFn>,
    settings: FormSettings,
}

impl FormOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_state(mut self, state: FormState) -> Self {
        self.initial_state = state;
        self
    }

    /// Seed the form from a signal and reinitialize whenever it changes.
    ///
    /// The form joins the signal's runtime. Takes precedence over
    /// `initial_state`.
    pub fn initial_state_signal(mut self, signal: Signal<FormState>) -> Self {
        self.initial_state_signal = Some(signal);
        self
    }

    pub fn validate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, Form) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let validate: ValidateFn = Arc::new(
            move |values: Value, form: Form| -> BoxFuture<anyhow::Result<Value>> {
                Box::pin(f(values, form))
            },
        );
        self.validate = Some(validate);
        self
    }

    pub fn on_submit<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, Form) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let on_submit: SubmitFn = Arc::new(
            move |values: Value, form: Form| -> BoxFuture<anyhow::Result<Value>> {
                Box::pin(f(values, form))
            },
        );
        self.on_submit = Some(on_submit);
        self
    }

    pub fn on_reset<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, Form) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<FormState>>> + Send + 'static,
    {
        let on_reset: ResetFn = Arc::new(
            move |values: Value, form: Form| -> BoxFuture<anyhow::Result<Option<FormState>>> {
                Box::pin(f(values, form))
            },
        );
        self.on_reset = Some(on_reset);
        self
    }

    pub fn settings(mut self, settings: FormSettings) -> Self {
        self.settings = settings;
        self
    }
}

// ── Form ──

/// Headless form controller.
///
/// Owns one [`StateBag`] per [`Axis`], the field registry and the derived
/// state. Cheap to clone (Arc).
#[derive(Clone)]
pub struct Form {
    inner: Arc<FormInner>,
}

/// Non-owning handle to a [`Form`].
#[derive(Clone)]
pub struct WeakForm {
    inner: Weak<FormInner>,
}

impl WeakForm {
    pub fn upgrade(&self) -> Option<Form> {
        self.inner.upgrade().map(|inner| Form { inner })
    }
}

impl fmt::Debug for WeakForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakForm")
    }
}

struct FormInner {
    runtime: Runtime,
    bags: [Arc<StateBag>; 6],
    registry: FieldRegistry,
    submitting: Signal<bool>,
    validating: Signal<bool>,
    dirty: Memo<bool>,
    active_values: Memo<Value>,
    validate: Option<ValidateFn>,
    on_submit: Option<SubmitFn>,
    on_reset: Option<ResetFn>,
    settings: FormSettings,
    submit_in_flight: AtomicBool,
    state_watcher: Mutex<Option<Effect>>,
}

impl Form {
    pub fn new(options: FormOptions) -> Self {
        let FormOptions {
            initial_state,
            initial_state_signal,
            validate,
            on_submit,
            on_reset,
            settings,
        } = options;

        let runtime = initial_state_signal
            .as_ref()
            .map(|signal| signal.runtime().clone())
            .unwrap_or_default();
        let state = match &initial_state_signal {
            Some(signal) => untracked(|| signal.get()),
            None => initial_state,
        };

        let bags = Axis::ALL.map(|axis| {
            let tree = state.get(axis).cloned().unwrap_or_else(empty_tree);
            Arc::new(StateBag::new(&runtime, axis, tree))
        });

        let dirty = {
            let values = Arc::clone(&bags[Axis::Values.index()]);
            Memo::new(&runtime, move || !values.is_pristine())
        };
        let active_values = {
            let values = Arc::clone(&bags[Axis::Values.index()]);
            let active = Arc::clone(&bags[Axis::Active.index()]);
            Memo::new(&runtime, move || {
                projection::project(&values.current(), &active.current())
            })
        };

        let form = Form {
            inner: Arc::new(FormInner {
                submitting: Signal::new(&runtime, false),
                validating: Signal::new(&runtime, false),
                runtime,
                bags,
                registry: FieldRegistry::new(),
                dirty,
                active_values,
                validate,
                on_submit,
                on_reset,
                settings,
                submit_in_flight: AtomicBool::new(false),
                state_watcher: Mutex::new(None),
            }),
        };

        if let Some(signal) = initial_state_signal {
            let watcher = form.watch_state(signal);
            *form
                .inner
                .state_watcher
                .lock()
                .unwrap_or_else(|e| e.into_inner()) = Some(watcher);
        }
        form
    }

    /// Reinitialize from every change of `signal` after the first read.
    fn watch_state(&self, signal: Signal<FormState>) -> Effect {
        let weak = self.downgrade();
        let primed = AtomicBool::new(false);
        Effect::new(&self.inner.runtime, move || {
            let state = signal.get();
            if !primed.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(form) = weak.upgrade() {
                untracked(|| form.reinitialize(Some(state)));
            }
        })
    }

    pub fn runtime(&self) -> &Runtime {
        &self.inner.runtime
    }

    pub fn settings(&self) -> &FormSettings {
        &self.inner.settings
    }

    /// The state bag behind `axis`.
    pub fn bag(&self, axis: Axis) -> &StateBag {
        &self.inner.bags[axis.index()]
    }

    pub fn downgrade(&self) -> WeakForm {
        WeakForm {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// True when both handles point at the same form.
    pub fn ptr_eq(&self, other: &Form) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Make this form the one [`Field::mount`] resolves until the scope drops.
    pub fn provide(&self) -> FormScope {
        context::provide(self)
    }

    // ── Axis access ──

    /// Snapshot of the current tree for `axis`.
    pub fn state(&self, axis: Axis) -> Value {
        self.bag(axis).current()
    }

    /// Snapshot of every axis.
    pub fn form_state(&self) -> FormState {
        Axis::ALL
            .into_iter()
            .fold(FormState::new(), |state, axis| state.with(axis, self.state(axis)))
    }

    pub fn get_in<P: AsSegments + ?Sized>(&self, axis: Axis, path: &P) -> Option<Value> {
        self.bag(axis).get(path)
    }

    pub fn set_in<P: AsSegments + ?Sized>(&self, axis: Axis, path: &P, value: Value) {
        self.bag(axis).set(path, value);
    }

    pub fn delete_in<P: AsSegments + ?Sized>(&self, axis: Axis, path: &P) -> Option<Value> {
        self.bag(axis).delete(path)
    }

    /// Replace the whole tree for `axis`.
    pub fn replace(&self, axis: Axis, tree: Value) {
        self.bag(axis).replace(tree);
    }

    /// Shallow-merge top-level keys into the tree for `axis`.
    pub fn set_batch(&self, axis: Axis, partial: Value) {
        self.bag(axis).set_batch(partial);
    }

    /// Write a value and mark the path touched.
    pub fn set_field_value<P: AsSegments + ?Sized>(&self, path: &P, value: Value) {
        let segments = path.as_segments();
        self.inner.runtime.batch(|| {
            self.bag(Axis::Values).set(&*segments, value);
            self.bag(Axis::Touched).set(&*segments, Value::Bool(true));
        });
    }

    /// Set the active flag at `path`. Becoming inactive with `should_restore`
    /// writes `default` through [`Form::set_field_value`], or deletes the
    /// value when `None`; either way the path is marked touched.
    pub fn set_field_active<P: AsSegments + ?Sized>(
        &self,
        path: &P,
        active: bool,
        should_restore: bool,
        default: Option<Value>,
    ) {
        let segments = path.as_segments();
        self.inner.runtime.batch(|| {
            self.bag(Axis::Active).set(&*segments, Value::Bool(active));
            if !active && should_restore {
                match default {
                    Some(value) => self.set_field_value(&*segments, value),
                    None => {
                        self.bag(Axis::Values).delete(&*segments);
                        self.bag(Axis::Touched).set(&*segments, Value::Bool(true));
                    }
                }
            }
        });
    }

    // ── Derived state ──

    /// True when the values differ from their baseline.
    pub fn dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    /// The values with every inactive path removed.
    pub fn active_values(&self) -> Value {
        self.inner.active_values.get()
    }

    pub fn is_submitting(&self) -> bool {
        self.inner.submitting.get()
    }

    pub fn is_validating(&self) -> bool {
        self.inner.validating.get()
    }

    // ── Fields ──

    pub fn register_field(&self, path: &str, field: Field) -> Option<Field> {
        self.inner.registry.register(path, field)
    }

    pub fn unregister_field(&self, path: &str) -> Option<Field> {
        self.inner.registry.unregister(path)
    }

    pub fn get_field(&self, path: &str) -> Option<Field> {
        self.inner.registry.lookup(path)
    }

    /// Registered fields in path order.
    pub fn fields(&self) -> Vec<(String, Field)> {
        self.inner.registry.snapshot()
    }

    pub fn registry(&self) -> &FieldRegistry {
        &self.inner.registry
    }

    // ── Lifecycle ──

    /// Rebaseline from `state`, or restore every axis to its baseline when
    /// `None`, then re-seed every registered field.
    ///
    /// Axes absent from `state` keep their current trees.
    pub fn reinitialize(&self, state: Option<FormState>) {
        debug!(
            restore = state.is_none(),
            fields = self.inner.registry.len(),
            "reinitialize form"
        );
        self.inner.runtime.batch(|| {
            match state {
                Some(state) => {
                    for axis in Axis::ALL {
                        if let Some(tree) = state.get(axis) {
                            debug!(axis = %axis, "rebaseline");
                            self.bag(axis).rebaseline(tree.clone());
                        }
                    }
                }
                None => {
                    for axis in Axis::ALL {
                        self.bag(axis).restore();
                    }
                }
            }
            self.inner.registry.for_each(|path, field| {
                if let Err(err) = field.reinitialize() {
                    error!(path, error = %err, "field reinitialize failed");
                }
            });
        });
    }

    /// Run the validate collaborator on `values` and store the error tree.
    ///
    /// Returns whether the values are valid.
    pub async fn exec_validate(&self, values: Value) -> Result<bool, FormError> {
        let _validating = FlagGuard::raise(&self.inner.validating);
        let errors = match &self.inner.validate {
            Some(validate) => validate(values, self.clone()).await.map_err(|e| {
                error!(error = %e, "validate failed");
                FormError::Validate(e)
            })?,
            None => empty_tree(),
        };
        let errors = if errors.is_null() { empty_tree() } else { errors };
        let valid = is_empty_tree(&errors);
        self.bag(Axis::Errors).replace(errors);
        Ok(valid)
    }

    /// Validate `values`, then hand them to the submit collaborator.
    ///
    /// Returns `Ok(None)` when validation found errors.
    pub async fn exec_submit(&self, values: Value) -> Result<Option<Value>, FormError> {
        let _claim = if self.inner.settings.guard_concurrent_submit {
            Some(SubmitClaim::acquire(&self.inner.submit_in_flight)?)
        } else {
            None
        };
        let _submitting = FlagGuard::raise(&self.inner.submitting);

        if !self.exec_validate(values.clone()).await? {
            debug!("submit skipped, validation failed");
            return Ok(None);
        }
        let result = match &self.inner.on_submit {
            Some(submit) => submit(values, self.clone()).await.map_err(|e| {
                error!(error = %e, "submit failed");
                FormError::Submit(e)
            })?,
            None => Value::Null,
        };
        Ok(Some(result))
    }

    /// Run the reset collaborator, then reinitialize with what it returned.
    pub async fn exec_reset(&self, values: Value) -> Result<(), FormError> {
        let state = match &self.inner.on_reset {
            Some(reset) => reset(values, self.clone()).await.map_err(|e| {
                error!(error = %e, "reset failed");
                FormError::Reset(e)
            })?,
            None => None,
        };
        self.reinitialize(state);
        Ok(())
    }

    pub async fn handle_validate(&self) -> Result<bool, FormError> {
        self.exec_validate(self.active_values()).await
    }

    pub async fn handle_submit(&self) -> Result<Option<Value>, FormError> {
        self.exec_submit(self.active_values()).await
    }

    pub async fn handle_reset(&self) -> Result<(), FormError> {
        self.exec_reset(self.values()).await
    }
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("values", &untracked(|| self.values()))
            .field("fields", &self.inner.registry.paths())
            .finish_non_exhaustive()
    }
}

/// Named accessors for each axis.
macro_rules! axis_accessors {
    ($(
        $axis:ident {
            snapshot: $snapshot:ident,
            replace: $replace:ident,
            set_batch: $set_batch:ident,
            get: $get:ident,
            set: $set:ident,
            delete: $delete:ident $(,)?
        }
    )*) => {
        impl Form {
            $(
                pub fn $snapshot(&self) -> Value {
                    self.state(Axis::$axis)
                }

                pub fn $replace(&self, tree: Value) {
                    self.replace(Axis::$axis, tree);
                }

                pub fn $set_batch(&self, partial: Value) {
                    self.set_batch(Axis::$axis, partial);
                }

                pub fn $get<P: AsSegments + ?Sized>(&self, path: &P) -> Option<Value> {
                    self.get_in(Axis::$axis, path)
                }

                pub fn $set<P: AsSegments + ?Sized>(&self, path: &P, value: Value) {
                    self.set_in(Axis::$axis, path, value);
                }

                pub fn $delete<P: AsSegments + ?Sized>(&self, path: &P) -> Option<Value> {
                    self.delete_in(Axis::$axis, path)
                }
            )*
        }
    };
}

// `set_field_value` and `set_field_active` carry extra behavior, so the raw
// writers for those two axes are `write_field_*`.
axis_accessors! {
    Values {
        snapshot: values,
        replace: set_values,
        set_batch: set_batch_values,
        get: get_field_value,
        set: write_field_value,
        delete: delete_field_value,
    }
    Touched {
        snapshot: touched,
        replace: set_touched,
        set_batch: set_batch_touched,
        get: get_field_touched,
        set: set_field_touched,
        delete: delete_field_touched,
    }
    Errors {
        snapshot: errors,
        replace: set_errors,
        set_batch: set_batch_errors,
        get: get_field_error,
        set: set_field_error,
        delete: delete_field_error,
    }
    Active {
        snapshot: active,
        replace: set_active,
        set_batch: set_batch_active,
        get: get_field_active,
        set: write_field_active,
        delete: delete_field_active,
    }
    Editable {
        snapshot: editable,
        replace: set_editable,
        set_batch: set_batch_editable,
        get: get_field_editable,
        set: set_field_editable,
        delete: delete_field_editable,
    }
    Visible {
        snapshot: visible,
        replace: set_visible,
        set_batch: set_batch_visible,
        get: get_field_visible,
        set: set_field_visible,
        delete: delete_field_visible,
    }
}

/// Errors trees count as empty when they hold no entries.
fn is_empty_tree(tree: &Value) -> bool {
    match tree {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Raises a flag for its lifetime.
struct FlagGuard {
    flag: Signal<bool>,
}

impl FlagGuard {
    fn raise(flag: &Signal<bool>) -> Self {
        flag.set(true);
        Self { flag: flag.clone() }
    }
}

impl Drop for FlagGuard {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Exclusive claim on the submit slot.
struct SubmitClaim<'a> {
    in_flight: &'a AtomicBool,
}

impl<'a> SubmitClaim<'a> {
    fn acquire(in_flight: &'a AtomicBool) -> Result<Self, FormError> {
        if in_flight.swap(true, Ordering::SeqCst) {
            return Err(FormError::SubmitInProgress);
        }
        Ok(Self { in_flight })
    }
}

impl Drop for SubmitClaim<'_> {
    fn drop(&mut self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }
}
