//! Pluggable size estimation for memory accounting

use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// Estimates how many bytes a cached value occupies
///
/// Only used for the memory budget; it does not need to be exact, but it
/// should be stable for the same value.
pub trait SizeEstimator<T>: Send + Sync {
    fn estimate(&self, value: &T) -> usize;
}

/// Shared estimator handle held by the stores
pub type SharedEstimator<T> = Arc<dyn SizeEstimator<T>>;

/// Length of the value's JSON encoding
///
/// Values that fail to serialize fall back to their in-memory size.
pub struct JsonSizeEstimator<T> {
    _marker: PhantomData<fn(&T)>,
}

impl<T> JsonSizeEstimator<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonSizeEstimator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> SizeEstimator<T> for JsonSizeEstimator<T> {
    fn estimate(&self, value: &T) -> usize {
        serde_json::to_vec(value)
            .map(|bytes| bytes.len())
            .unwrap_or_else(|_| std::mem::size_of::<T>())
    }
}

/// Fixed in-memory size of `T`, ignoring heap allocations
pub struct ShallowSizeEstimator;

impl<T> SizeEstimator<T> for ShallowSizeEstimator {
    fn estimate(&self, _value: &T) -> usize {
        std::mem::size_of::<T>()
    }
}

/// Closure-backed estimator for structural sizing without serialization
pub struct FnSizeEstimator<F>(pub F);

impl<T, F> SizeEstimator<T> for FnSizeEstimator<F>
where
    F: Fn(&T) -> usize + Send + Sync,
{
    fn estimate(&self, value: &T) -> usize {
        (self.0)(value)
    }
}

/// Convenience constructor for the default estimator
pub fn json_estimator<T: Serialize + 'static>() -> SharedEstimator<T> {
    Arc::new(JsonSizeEstimator::new())
}
