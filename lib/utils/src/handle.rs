//! Lightweight handle types for shared ownership and weak back references.
//!
//! Provide two complementary handle types:
//! - [Handle<T>] owns a strong reference to an object using [alloc::sync::Arc]. Cloning it is
//!   an atomic increment and dropping it an atomic decrement, so holders on different threads
//!   may acquire and release the same object. The value is dropped exactly once, when the last
//!   [Handle<T>] goes away.
//! - [HandleRef<T>] stores a weak reference ([alloc::sync::Weak]) for observers that must not
//!   keep the target alive; [HandleRef::is_dropped] reports whether the last owner is gone.
use alloc::sync::{Arc, Weak};
use core::ops::Deref;

/// Strong owning handle backed by [Arc<T>].
#[derive(Debug)]
pub struct Handle<T> {
    inner: Arc<T>,
}

impl<T> Deref for Handle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> From<T> for Handle<T> {
    fn from(value: T) -> Self {
        Self {
            inner: Arc::new(value),
        }
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Handle<T> {
    /// Create a non-owning [HandleRef<T>] that refers to the same underlying object.
    pub fn create_ref(&self) -> HandleRef<T> {
        HandleRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Number of strong holders, this one included.
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

/// Weak (non-owning) handle backed by [Weak<T>].
#[derive(Debug)]
pub struct HandleRef<T> {
    inner: Weak<T>,
}

impl<T> Clone for HandleRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> HandleRef<T> {
    /// Whether the target has already been dropped.
    pub fn is_dropped(&self) -> bool {
        self.inner.strong_count() == 0
    }
}
