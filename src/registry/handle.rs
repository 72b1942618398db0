//! Opaque remote-callable handle.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A type-erased, cloneable handle to a remote-callable object.
///
/// Handles are the currency of the service directory and of bind results:
/// the producer wraps a concrete interface object, the consumer downcasts it
/// back. Two clones of the same handle compare equal under [`Handle::same_as`].
#[derive(Clone)]
pub struct Handle(Arc<dyn Any + Send + Sync>);

impl Handle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Downcast to the concrete interface type, if it matches.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.0.clone().downcast::<T>().ok()
    }

    /// Identity comparison: true when both handles wrap the same object.
    pub fn same_as(&self, other: &Handle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_roundtrip() {
        let handle = Handle::new(42u32);
        assert_eq!(*handle.downcast::<u32>().unwrap(), 42);
        assert!(handle.downcast::<String>().is_none());
    }

    #[test]
    fn test_identity() {
        let a = Handle::new("service".to_string());
        let b = a.clone();
        let c = Handle::new("service".to_string());
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }
}
