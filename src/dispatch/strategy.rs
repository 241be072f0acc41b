//! Per-type strategies: validate arguments synchronously, then forward to
//! the adapter hooks or run the numeric kernels.
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::adapter::{AggregateRequest, NativeQuery, QueryAdapter, SecondSequence};
use crate::error::{QueryError, Result};
use crate::expr::{Comparer, Lambda, TypeToken, Value};
use crate::sequence::{CancellationSignal, ValueStream};

use super::element::Element;

/// Deferred scalar result of a terminal hook.
pub type PendingFuture = BoxFuture<'static, Result<Value>>;

/// Operations keyed by one element type.
pub trait ElementStrategy: Send + Sync + fmt::Debug {
    fn element_type(&self) -> &TypeToken;

    fn sum_values(&self, values: &[Value]) -> Result<Value>;
    fn average_values(&self, values: &[Value]) -> Result<Value>;
    fn min_values(&self, values: &[Value]) -> Result<Value>;
    fn max_values(&self, values: &[Value]) -> Result<Value>;

    fn get_queryable(&self, adapter: &Arc<dyn QueryAdapter>) -> Result<NativeQuery>;
    fn evaluate_async(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: &NativeQuery,
        cancel: &CancellationSignal,
    ) -> Result<ValueStream>;

    fn aggregate(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        request: AggregateRequest,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn any(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn all(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        predicate: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn count(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        predicate: Option<Lambda>,
        long: bool,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn min(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn max(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn sum(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn average(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn single_entry(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        entry: Entry,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn element_at(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        index: i32,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn contains(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        value: Value,
        comparer: Option<Comparer>,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn sequence_equal(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        second: SecondSequence,
        comparer: Option<Comparer>,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
}

/// Operations keyed by (element type, selector result type).
pub trait SelectorStrategy: Send + Sync + fmt::Debug {
    fn element_type(&self) -> &TypeToken;
    fn result_type(&self) -> &TypeToken;

    fn min(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        selector: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn max(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        selector: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn sum(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        selector: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
    fn average(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        selector: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture>;
}

/// Which single-entry hook to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    First { or_default: bool },
    Last { or_default: bool },
    Single { or_default: bool },
}

fn unsupported(operation: &'static str, ty: &TypeToken) -> QueryError {
    QueryError::UnsupportedType {
        operation,
        ty: ty.clone(),
    }
}

fn check_query(query: &NativeQuery, element: &TypeToken) -> Result<()> {
    if query.element_type() != element {
        return Err(QueryError::mismatch(element, query.element_type()));
    }
    Ok(())
}

fn check_lambda(lambda: &Lambda, params: Vec<TypeToken>, result: TypeToken) -> Result<()> {
    let expected = TypeToken::function(params, result);
    if lambda.ty() != &expected {
        return Err(QueryError::mismatch(&expected, lambda.ty()));
    }
    Ok(())
}

fn predicate_type(element: &TypeToken) -> (Vec<TypeToken>, TypeToken) {
    (vec![element.clone()], TypeToken::Bool)
}

/// Strategy for elements represented by `T`.
pub struct TypedElement<T> {
    ty: TypeToken,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Element> TypedElement<T> {
    pub fn new(ty: TypeToken) -> Self {
        Self {
            ty,
            _marker: PhantomData,
        }
    }

    fn typed(&self, values: &[Value]) -> Result<Vec<T>> {
        values
            .iter()
            .map(|v| {
                if !v.conforms_to(&self.ty) {
                    return None;
                }
                T::from_value(v)
            })
            .collect::<Option<Vec<T>>>()
            .ok_or_else(|| QueryError::evaluation(format!("values do not conform to {}", self.ty)))
    }

    fn extreme(&self, values: &[Value], pick_max: bool) -> Result<Value> {
        self.typed(values)?;
        let present = values.iter().filter(|v| !v.is_null());
        let found = if pick_max {
            present.max_by(|a, b| a.total_cmp(b))
        } else {
            present.min_by(|a, b| a.total_cmp(b))
        };
        match found {
            Some(v) => Ok(v.clone()),
            None if self.ty.admits_null() => Ok(Value::Null),
            None => Err(QueryError::NoElements),
        }
    }
}

impl<T> fmt::Debug for TypedElement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedElement")
            .field("ty", &self.ty)
            .field("repr", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: Element> ElementStrategy for TypedElement<T> {
    fn element_type(&self) -> &TypeToken {
        &self.ty
    }

    fn sum_values(&self, values: &[Value]) -> Result<Value> {
        if !T::SUM {
            return Err(unsupported("sum", &self.ty));
        }
        T::sum(self.typed(values)?).map(Element::into_value)
    }

    fn average_values(&self, values: &[Value]) -> Result<Value> {
        if !T::AVERAGE {
            return Err(unsupported("average", &self.ty));
        }
        T::average(self.typed(values)?).map(Element::into_value)
    }

    fn min_values(&self, values: &[Value]) -> Result<Value> {
        self.extreme(values, false)
    }

    fn max_values(&self, values: &[Value]) -> Result<Value> {
        self.extreme(values, true)
    }

    fn get_queryable(&self, adapter: &Arc<dyn QueryAdapter>) -> Result<NativeQuery> {
        let query = adapter.get_queryable(&self.ty)?;
        check_query(&query, &self.ty)?;
        Ok(query)
    }

    fn evaluate_async(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: &NativeQuery,
        cancel: &CancellationSignal,
    ) -> Result<ValueStream> {
        check_query(query, &self.ty)?;
        adapter.evaluate_async(query, cancel)
    }

    fn aggregate(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        request: AggregateRequest,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        let accumulate = request.accumulator.ty();
        match accumulate {
            TypeToken::Function { params, .. }
                if params.len() == 2 && params[1] == self.ty => {}
            other => {
                return Err(QueryError::mismatch(
                    &TypeToken::function(vec![TypeToken::Unit, self.ty.clone()], TypeToken::Unit),
                    other,
                ))
            }
        }
        let adapter = adapter.clone();
        Ok(async move { adapter.aggregate(query, request, cancel).await }.boxed())
    }

    fn any(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        if let Some(predicate) = &predicate {
            let (params, result) = predicate_type(&self.ty);
            check_lambda(predicate, params, result)?;
        }
        let adapter = adapter.clone();
        Ok(async move { adapter.any(query, predicate, cancel).await.map(Value::Bool) }.boxed())
    }

    fn all(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        predicate: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        let (params, result) = predicate_type(&self.ty);
        check_lambda(&predicate, params, result)?;
        let adapter = adapter.clone();
        Ok(async move { adapter.all(query, predicate, cancel).await.map(Value::Bool) }.boxed())
    }

    fn count(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        predicate: Option<Lambda>,
        long: bool,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        if let Some(predicate) = &predicate {
            let (params, result) = predicate_type(&self.ty);
            check_lambda(predicate, params, result)?;
        }
        let adapter = adapter.clone();
        Ok(async move {
            if long {
                adapter.long_count(query, predicate, cancel).await.map(Value::Int64)
            } else {
                adapter.count(query, predicate, cancel).await.map(Value::Int32)
            }
        }
        .boxed())
    }

    fn min(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        let adapter = adapter.clone();
        Ok(async move { adapter.min(query, None, cancel).await }.boxed())
    }

    fn max(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        let adapter = adapter.clone();
        Ok(async move { adapter.max(query, None, cancel).await }.boxed())
    }

    fn sum(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        if !T::SUM {
            return Err(unsupported("sum", &self.ty));
        }
        let adapter = adapter.clone();
        Ok(async move { adapter.sum(query, None, cancel).await }.boxed())
    }

    fn average(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        if !T::AVERAGE {
            return Err(unsupported("average", &self.ty));
        }
        let adapter = adapter.clone();
        Ok(async move { adapter.average(query, None, cancel).await }.boxed())
    }

    fn single_entry(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        entry: Entry,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        if let Some(predicate) = &predicate {
            let (params, result) = predicate_type(&self.ty);
            check_lambda(predicate, params, result)?;
        }
        let adapter = adapter.clone();
        Ok(async move {
            match entry {
                Entry::First { or_default } => {
                    adapter.first(query, predicate, or_default, cancel).await
                }
                Entry::Last { or_default } => {
                    adapter.last(query, predicate, or_default, cancel).await
                }
                Entry::Single { or_default } => {
                    adapter.single(query, predicate, or_default, cancel).await
                }
            }
        }
        .boxed())
    }

    fn element_at(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        index: i32,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        let adapter = adapter.clone();
        Ok(async move { adapter.element_at(query, index, or_default, cancel).await }.boxed())
    }

    fn contains(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        value: Value,
        comparer: Option<Comparer>,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        if !value.conforms_to(&self.ty) || T::from_value(&value).is_none() {
            return Err(QueryError::invalid(format!(
                "{} is not a value of type {}",
                value, self.ty
            )));
        }
        if let Some(cmp) = &comparer {
            if cmp.element_type() != &self.ty {
                return Err(QueryError::mismatch(&self.ty, cmp.element_type()));
            }
        }
        let adapter = adapter.clone();
        Ok(async move {
            adapter
                .contains(query, value, comparer, cancel)
                .await
                .map(Value::Bool)
        }
        .boxed())
    }

    fn sequence_equal(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        second: SecondSequence,
        comparer: Option<Comparer>,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        check_query(&query, &self.ty)?;
        let second_element = match &second {
            SecondSequence::Query(q) => q.element_type(),
            SecondSequence::Sequence(s) => s.element_type(),
        };
        if second_element != &self.ty {
            return Err(QueryError::mismatch(&self.ty, second_element));
        }
        let adapter = adapter.clone();
        Ok(async move {
            adapter
                .sequence_equal(query, second, comparer, cancel)
                .await
                .map(Value::Bool)
        }
        .boxed())
    }
}

/// Strategy for selectors projecting elements onto `R`.
pub struct TypedSelector<R> {
    element: TypeToken,
    result: TypeToken,
    _marker: PhantomData<fn() -> R>,
}

impl<R: Element> TypedSelector<R> {
    pub fn new(element: TypeToken, result: TypeToken) -> Self {
        Self {
            element,
            result,
            _marker: PhantomData,
        }
    }

    fn check(&self, query: &NativeQuery, selector: &Lambda) -> Result<()> {
        check_query(query, &self.element)?;
        check_lambda(selector, vec![self.element.clone()], self.result.clone())
    }
}

impl<R> fmt::Debug for TypedSelector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedSelector")
            .field("element", &self.element)
            .field("result", &self.result)
            .field("repr", &std::any::type_name::<R>())
            .finish()
    }
}

impl<R: Element> SelectorStrategy for TypedSelector<R> {
    fn element_type(&self) -> &TypeToken {
        &self.element
    }

    fn result_type(&self) -> &TypeToken {
        &self.result
    }

    fn min(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        selector: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        self.check(&query, &selector)?;
        let adapter = adapter.clone();
        Ok(async move { adapter.min(query, Some(selector), cancel).await }.boxed())
    }

    fn max(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        selector: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        self.check(&query, &selector)?;
        let adapter = adapter.clone();
        Ok(async move { adapter.max(query, Some(selector), cancel).await }.boxed())
    }

    fn sum(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        selector: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        self.check(&query, &selector)?;
        if !R::SUM {
            return Err(unsupported("sum", &self.result));
        }
        let adapter = adapter.clone();
        Ok(async move { adapter.sum(query, Some(selector), cancel).await }.boxed())
    }

    fn average(
        &self,
        adapter: &Arc<dyn QueryAdapter>,
        query: NativeQuery,
        selector: Lambda,
        cancel: CancellationSignal,
    ) -> Result<PendingFuture> {
        self.check(&query, &selector)?;
        if !R::AVERAGE {
            return Err(unsupported("average", &self.result));
        }
        let adapter = adapter.clone();
        Ok(async move { adapter.average(query, Some(selector), cancel).await }.boxed())
    }
}
