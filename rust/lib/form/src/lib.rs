//! Form — headless form-state engine.
//!
//! Tracks per-field state across a nested path space and drives the
//! validate/submit/reset lifecycle. Nothing here renders; a UI layer reads
//! [`Form`] and [`Field`] and calls their setters.
//!
//! # State Axes
//!
//! Every form keeps six parallel trees, one [`StateBag`] per [`Axis`]:
//! - `values` — field values (any JSON)
//! - `touched` — whether the user interacted with the field
//! - `errors` — validation messages
//! - `active` — whether the field takes part in submission
//! - `editable`, `visible` — UI flags
//!
//! # Path Addressing
//!
//! Paths use dot/bracket notation over objects and arrays:
//! - `user.name`
//! - `items[0].sku`, or equivalently `items.0.sku`
//! - `grid[1][2]`
//!
//! Writes create the containers a path needs: an index segment creates an
//! array, anything else an object.
//!
//! # Active Values
//!
//! [`Form::active_values`] is the values tree with every path whose active
//! flag is `false` removed, with array elements that became empty spliced
//! out. Submission always sends active values.
//!
//! # Example
//!
//! ```ignore
//! use openerp_form::{Field, FieldOptions, Form, FormOptions};
//! use serde_json::json;
//!
//! let form = Form::new(
//!     FormOptions::new()
//!         .validate(|values, _| async move {
//!             Ok(if values["name"].is_null() { json!({"name": "required"}) } else { json!({}) })
//!         })
//!         .on_submit(|values, _| async move { Ok(values) }),
//! );
//!
//! let _scope = form.provide();
//! let name = Field::mount("name", FieldOptions::new())?;
//! name.handle_input(json!("Ada"))?;
//!
//! let submitted = form.handle_submit().await?;
//! ```

pub mod bag;
pub mod context;
pub mod error;
pub mod field;
pub mod form;
pub mod path;
pub mod projection;
pub mod reactive;
pub mod registry;
pub mod tree;

// Re-export primary types at crate root.
pub use bag::{Axis, StateBag};
pub use context::{FormScope, inject};
pub use error::FormError;
pub use field::{Field, FieldArray, FieldOptions, Predicate};
pub use form::{
    BoxFuture, Form, FormOptions, FormSettings, FormState, ResetFn, SubmitFn, ValidateFn, WeakForm,
};
pub use path::{AsSegments, FieldPath, PathSegment};
pub use projection::project;
pub use reactive::{Effect, Memo, Runtime, Signal, SourceId};
pub use registry::FieldRegistry;
