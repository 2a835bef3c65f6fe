use std::sync::{Arc, RwLock, Weak};

/// Non-owning registration point for an observer. The owner of the
/// observer controls its lifetime; once it is dropped the slot reads as
/// empty.
pub struct DelegateSlot<T: ?Sized> {
    inner: RwLock<Option<Weak<T>>>,
}

impl<T: ?Sized> DelegateSlot<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    pub fn set(&self, delegate: Weak<T>) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Some(delegate);
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .and_then(Weak::upgrade)
    }
}

impl<T: ?Sized> Default for DelegateSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
