//! Per-microthread storage.
//!
//! A [`MicroThreadLocal`] is a key; each microthread holds its own value for
//! it. Values live until the microthread finishes (or, after a switch, until
//! the [`MicroThreadScope`](crate::MicroThreadScope) is dropped).

use crate::cx::Cx;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_KEY: AtomicUsize = AtomicUsize::new(1);

type Init<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Key for a value stored per microthread.
///
/// ```ignore
/// static DEPTH: LazyLock<MicroThreadLocal<u32>> = LazyLock::new(|| MicroThreadLocal::with_init(|| 0));
///
/// scheduler.add(|cx| async move {
///     DEPTH.set(&cx, 3);
///     assert_eq!(DEPTH.get(&cx), Some(3));
///     Ok(())
/// });
/// ```
pub struct MicroThreadLocal<T> {
    key: usize,
    init: Option<Init<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> MicroThreadLocal<T> {
    /// Creates a key without an initial value.
    #[must_use]
    pub fn new() -> Self {
        Self {
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            init: None,
            _marker: PhantomData,
        }
    }

    /// Creates a key whose value is produced by `init` on first access.
    #[must_use]
    pub fn with_init(init: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            init: Some(Box::new(init)),
            ..Self::new()
        }
    }

    /// Stores `value` for the context's microthread, returning the old one.
    pub fn set(&self, cx: &Cx, value: T) -> Option<T> {
        let previous = cx.inner().locals.lock().insert(self.key, Box::new(value));
        previous.and_then(downcast)
    }

    /// Removes and returns the context's value.
    pub fn take(&self, cx: &Cx) -> Option<T> {
        let previous = cx.inner().locals.lock().remove(&self.key);
        previous.and_then(downcast)
    }

    /// Returns true if the context's microthread holds a value.
    #[must_use]
    pub fn is_set(&self, cx: &Cx) -> bool {
        cx.inner().locals.lock().contains_key(&self.key)
    }

    /// Runs `f` with the context's value, initializing it first if the key
    /// has an initializer.
    ///
    /// `f` runs while the microthread's storage is locked; it must not touch
    /// other keys of the same microthread.
    pub fn with<R>(&self, cx: &Cx, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        let mut locals = cx.inner().locals.lock();
        if !locals.contains_key(&self.key) {
            if let Some(init) = &self.init {
                locals.insert(self.key, Box::new(init()));
            }
        }
        let value = locals
            .get_mut(&self.key)
            .and_then(|boxed| boxed.downcast_mut::<T>());
        f(value)
    }

    /// Returns a clone of the context's value.
    #[must_use]
    pub fn get(&self, cx: &Cx) -> Option<T>
    where
        T: Clone,
    {
        self.with(cx, |value| value.cloned())
    }
}

impl<T: Send + 'static> Default for MicroThreadLocal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MicroThreadLocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MicroThreadLocal")
            .field("key", &self.key)
            .field("has_init", &self.init.is_some())
            .finish()
    }
}

fn downcast<T: 'static>(boxed: Box<dyn Any + Send>) -> Option<T> {
    boxed.downcast::<T>().ok().map(|value| *value)
}
