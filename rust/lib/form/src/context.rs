//! Scoped form context.
//!
//! [`Form::provide`] pushes the form onto a per-thread stack and returns a
//! guard; [`Field::mount`](crate::Field::mount) resolves the innermost
//! provided form. Scopes nest; dropping a scope withdraws only its own
//! form, whatever order the guards drop in.

use std::cell::{Cell, RefCell};
use std::marker::PhantomData;

use crate::form::Form;

thread_local! {
    static FORMS: RefCell<Vec<(u64, Form)>> = const { RefCell::new(Vec::new()) };
    static NEXT_SCOPE: Cell<u64> = const { Cell::new(0) };
}

/// Keeps a form provided until dropped. Not `Send`: the scope belongs to the
/// thread that opened it.
#[must_use = "the form is only provided while the scope is alive"]
pub struct FormScope {
    id: u64,
    _not_send: PhantomData<*const ()>,
}

pub(crate) fn provide(form: &Form) -> FormScope {
    let id = NEXT_SCOPE.with(|next| {
        let id = next.get();
        next.set(id + 1);
        id
    });
    FORMS.with(|stack| stack.borrow_mut().push((id, form.clone())));
    FormScope {
        id,
        _not_send: PhantomData,
    }
}

/// The innermost provided form on this thread.
pub fn inject() -> Option<Form> {
    FORMS.with(|stack| stack.borrow().last().map(|(_, form)| form.clone()))
}

impl Drop for FormScope {
    fn drop(&mut self) {
        // Take the entry out before dropping it; a form's drop may re-enter.
        let removed = FORMS.with(|stack| {
            let mut stack = stack.borrow_mut();
            let pos = stack.iter().rposition(|(id, _)| *id == self.id);
            pos.map(|pos| stack.remove(pos))
        });
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::FormOptions;

    #[test]
    fn nothing_provided_by_default() {
        assert!(inject().is_none());
    }

    #[test]
    fn scopes_nest() {
        let outer = Form::new(FormOptions::new());
        let inner = Form::new(FormOptions::new());

        let _a = outer.provide();
        assert!(inject().unwrap().ptr_eq(&outer));
        {
            let _b = inner.provide();
            assert!(inject().unwrap().ptr_eq(&inner));
        }
        assert!(inject().unwrap().ptr_eq(&outer));
    }

    #[test]
    fn out_of_order_drop_withdraws_own_form() {
        let first = Form::new(FormOptions::new());
        let second = Form::new(FormOptions::new());

        let a = first.provide();
        let b = second.provide();
        drop(a);
        assert!(inject().unwrap().ptr_eq(&second));
        drop(b);
        assert!(inject().is_none());
    }

    #[test]
    fn dropping_scope_clears_context() {
        let form = Form::new(FormOptions::new());
        let scope = form.provide();
        drop(scope);
        assert!(inject().is_none());
    }
}
