//! Type-dispatch cache.
//!
//! Element types are only known at run time, as [`TypeToken`]s. The cache
//! maps each token (or element/result pair for selector operations) to a
//! strategy built once over a concrete Rust representation. Entries are
//! never evicted; concurrent first requests may build twice, but only the
//! first stored strategy is ever handed out.
pub mod element;
pub mod strategy;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use tracing::trace;

use crate::expr::TypeToken;

pub use element::{Dynamic, Element};
pub use strategy::{
    ElementStrategy, Entry, PendingFuture, SelectorStrategy, TypedElement, TypedSelector,
};

static GLOBAL: OnceLock<DispatchCache> = OnceLock::new();

type SelectorKey = (TypeToken, TypeToken);

#[derive(Debug, Default)]
pub struct DispatchCache {
    elements: RwLock<HashMap<TypeToken, Arc<dyn ElementStrategy>>>,
    selectors: RwLock<HashMap<SelectorKey, Arc<dyn SelectorStrategy>>>,
    builds: AtomicUsize,
}

macro_rules! by_representation {
    ($ty:expr, $build:ident) => {
        match $ty {
            TypeToken::Bool => $build!(bool),
            TypeToken::Int32 => $build!(i32),
            TypeToken::Int64 => $build!(i64),
            TypeToken::Float32 => $build!(f32),
            TypeToken::Float64 => $build!(f64),
            TypeToken::String => $build!(String),
            TypeToken::Nullable(inner) => match &**inner {
                TypeToken::Bool => $build!(Option<bool>),
                TypeToken::Int32 => $build!(Option<i32>),
                TypeToken::Int64 => $build!(Option<i64>),
                TypeToken::Float32 => $build!(Option<f32>),
                TypeToken::Float64 => $build!(Option<f64>),
                _ => $build!(Dynamic),
            },
            _ => $build!(Dynamic),
        }
    };
}

impl DispatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide cache shared by every engine.
    pub fn global() -> &'static DispatchCache {
        GLOBAL.get_or_init(DispatchCache::new)
    }

    /// Strategy for one element type.
    pub fn element(&self, ty: &TypeToken) -> Arc<dyn ElementStrategy> {
        if let Some(found) = read(&self.elements).get(ty) {
            return found.clone();
        }
        let built = self.build_element(ty);
        let mut elements = write(&self.elements);
        elements.entry(ty.clone()).or_insert(built).clone()
    }

    /// Strategy for a selector from `element` to `result`.
    pub fn selector(&self, element: &TypeToken, result: &TypeToken) -> Arc<dyn SelectorStrategy> {
        let key = (element.clone(), result.clone());
        if let Some(found) = read(&self.selectors).get(&key) {
            return found.clone();
        }
        let built = self.build_selector(element, result);
        let mut selectors = write(&self.selectors);
        selectors.entry(key).or_insert(built).clone()
    }

    /// Number of cached (element, selector) strategies.
    pub fn len(&self) -> (usize, usize) {
        (read(&self.elements).len(), read(&self.selectors).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == (0, 0)
    }

    /// Strategies constructed so far, including ones that lost a race.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    fn build_element(&self, ty: &TypeToken) -> Arc<dyn ElementStrategy> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        trace!(%ty, "building element strategy");
        macro_rules! typed {
            ($repr:ty) => {
                Arc::new(TypedElement::<$repr>::new(ty.clone())) as Arc<dyn ElementStrategy>
            };
        }
        by_representation!(ty, typed)
    }

    fn build_selector(&self, element: &TypeToken, result: &TypeToken) -> Arc<dyn SelectorStrategy> {
        self.builds.fetch_add(1, Ordering::Relaxed);
        trace!(%element, %result, "building selector strategy");
        macro_rules! typed {
            ($repr:ty) => {
                Arc::new(TypedSelector::<$repr>::new(element.clone(), result.clone()))
                    as Arc<dyn SelectorStrategy>
            };
        }
        by_representation!(result, typed)
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::expr::Value;

    #[test]
    fn test_same_strategy_is_returned() {
        let cache = DispatchCache::new();
        let a = cache.element(&TypeToken::Int32);
        let b = cache.element(&TypeToken::Int32);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), (1, 0));
        assert_eq!(cache.builds(), 1);
    }

    #[test]
    fn test_concurrent_requests_share_one_entry() {
        let cache = Arc::new(DispatchCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.element(&TypeToken::nullable(TypeToken::Float64))
                })
            })
            .collect();
        let strategies: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &strategies {
            assert!(Arc::ptr_eq(s, &strategies[0]));
        }
        assert_eq!(cache.len(), (1, 0));
    }

    #[test]
    fn test_concurrent_selector_requests_share_one_entry() {
        let cache = Arc::new(DispatchCache::new());
        let start = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let start = start.clone();
                std::thread::spawn(move || {
                    start.wait();
                    cache.selector(&TypeToken::String, &TypeToken::nullable(TypeToken::Int64))
                })
            })
            .collect();
        let strategies: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for s in &strategies {
            assert!(Arc::ptr_eq(s, &strategies[0]));
        }
        assert_eq!(cache.len(), (0, 1));
        assert_eq!(
            strategies[0].result_type(),
            &TypeToken::nullable(TypeToken::Int64)
        );
        assert!(Arc::ptr_eq(
            &cache.selector(&TypeToken::String, &TypeToken::nullable(TypeToken::Int64)),
            &strategies[0]
        ));
    }

    #[test]
    fn test_numeric_kernels() {
        let cache = DispatchCache::new();
        let ints = [Value::from(1), Value::from(2), Value::from(3)];
        assert_eq!(
            cache.element(&TypeToken::Int32).sum_values(&ints).unwrap(),
            Value::Int32(6)
        );
        assert_eq!(
            cache.element(&TypeToken::Int32).max_values(&ints).unwrap(),
            Value::Int32(3)
        );
        let err = cache
            .element(&TypeToken::Int32)
            .average_values(&ints)
            .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedType { operation: "average", .. }));
        let floats = [Value::from(1.0), Value::from(2.0)];
        assert_eq!(
            cache
                .element(&TypeToken::Float64)
                .average_values(&floats)
                .unwrap(),
            Value::Float64(1.5)
        );
    }

    #[test]
    fn test_sum_over_strings_is_unsupported() {
        let cache = DispatchCache::new();
        let err = cache
            .element(&TypeToken::String)
            .sum_values(&[Value::from("a")])
            .unwrap_err();
        assert_eq!(
            err,
            QueryError::UnsupportedType {
                operation: "sum",
                ty: TypeToken::String
            }
        );
    }

    #[test]
    fn test_min_of_empty() {
        let cache = DispatchCache::new();
        assert_eq!(
            cache.element(&TypeToken::Int32).min_values(&[]).unwrap_err(),
            QueryError::NoElements
        );
        assert_eq!(
            cache
                .element(&TypeToken::nullable(TypeToken::Int32))
                .min_values(&[Value::Null])
                .unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_selector_strategy_keyed_by_pair() {
        let cache = DispatchCache::new();
        let a = cache.selector(&TypeToken::String, &TypeToken::Int32);
        let b = cache.selector(&TypeToken::String, &TypeToken::Int64);
        assert_eq!(a.result_type(), &TypeToken::Int32);
        assert_eq!(b.result_type(), &TypeToken::Int64);
        assert_eq!(cache.len(), (0, 2));
    }

    #[test]
    fn test_mismatched_values_are_rejected() {
        let cache = DispatchCache::new();
        let err = cache
            .element(&TypeToken::Int32)
            .sum_values(&[Value::from(1i64)])
            .unwrap_err();
        assert!(matches!(err, QueryError::Evaluation(_)));
    }
}
