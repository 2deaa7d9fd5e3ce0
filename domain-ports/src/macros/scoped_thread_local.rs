use std::cell::Cell;
use std::marker;
use std::thread::LocalKey;

/// Declares a thread-local slot that can hold a reference for the duration of
/// a closure.
///
/// The worker loop uses it to publish its own state, so that code running in a
/// task can find out which worker it runs on without the task carrying a
/// handle. Reading an unset slot yields `None` rather than panicking.
macro_rules! scoped_thread_local {
    ($(#[$attrs:meta])* $vis:vis static $name:ident: $ty:ty) => (
        $(#[$attrs])*
        $vis static $name: $crate::macros::scoped_thread_local::ScopedLocalKey<$ty>
            = unsafe {
                ::std::thread_local!(static SLOT: ::std::cell::Cell<*const ()> = const {
                        ::std::cell::Cell::new(::std::ptr::null())
                });
                $crate::macros::scoped_thread_local::ScopedLocalKey::new(&SLOT)
            };
    )
}
pub(crate) use scoped_thread_local;

/// Thread-local key holding a reference to a `T`.
pub(crate) struct ScopedLocalKey<T> {
    inner: &'static LocalKey<Cell<*const ()>>,
    _marker: marker::PhantomData<T>,
}

unsafe impl<T> Sync for ScopedLocalKey<T> {}

impl<T> ScopedLocalKey<T> {
    #[doc(hidden)]
    /// # Safety
    ///
    /// Should only be called through the `scoped_thread_local` macro.
    pub(crate) const unsafe fn new(inner: &'static LocalKey<Cell<*const ()>>) -> Self {
        Self {
            inner,
            _marker: marker::PhantomData,
        }
    }

    /// Publishes `t` in the slot while `f` runs; the previous value is
    /// restored afterwards, even if `f` unwinds.
    pub(crate) fn set<F, R>(&'static self, t: &T, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        struct Restore {
            key: &'static LocalKey<Cell<*const ()>>,
            prev: *const (),
        }

        impl Drop for Restore {
            fn drop(&mut self) {
                self.key.with(|c| c.set(self.prev));
            }
        }

        let prev = self.inner.with(|c| c.replace(t as *const T as *const ()));
        let _restore = Restore {
            key: self.inner,
            prev,
        };

        f()
    }

    /// Applies `f` to the published value, if any.
    pub(crate) fn map<F, R>(&'static self, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let val = self.inner.with(|c| c.get());

        if val.is_null() {
            None
        } else {
            // The pointer was published by `set`, whose scope is still active
            // on this thread.
            Some(f(unsafe { &*(val as *const T) }))
        }
    }
}
