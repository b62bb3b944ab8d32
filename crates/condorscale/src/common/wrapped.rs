use std::cell::{Ref, RefCell, RefMut};
use std::ops::Deref;
use std::rc::Rc;

/// Wrapper struct containing a `Rc<RefCell<T>>` with several helper
/// functions.
///
/// The contained borrow serializes all access to the shared state; it must
/// never be held across an `.await` point (enforced crate-wide by
/// `deny(clippy::await_holding_refcell_ref)`).
#[derive(Default, Debug)]
pub struct WrappedRcRefCell<T: ?Sized> {
    inner: Rc<RefCell<T>>,
}

impl<T> WrappedRcRefCell<T> {
    /// Create a new wrapped instance. This is not called `new` so that you may
    /// implement your own function `new`.
    #[inline]
    pub fn wrap(t: T) -> Self {
        WrappedRcRefCell {
            inner: Rc::new(RefCell::new(t)),
        }
    }
}

impl<T: ?Sized> WrappedRcRefCell<T> {
    /// Return an immutable reference to contents. Panics whenever
    /// `RefCell::borrow()` would.
    #[inline]
    #[track_caller]
    pub fn get(&self) -> Ref<T> {
        self.inner.deref().borrow()
    }

    /// Return a mutable reference to contents. Panics whenever
    /// `RefCell::borrow_mut()` would.
    #[inline]
    #[track_caller]
    pub fn get_mut(&self) -> RefMut<T> {
        self.inner.deref().borrow_mut()
    }
}

impl<T: ?Sized> Clone for WrappedRcRefCell<T> {
    #[inline]
    fn clone(&self) -> Self {
        WrappedRcRefCell {
            inner: self.inner.clone(),
        }
    }
}
