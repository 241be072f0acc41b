//! Default terminal hooks: evaluate the native query, then finish the
//! terminal operator in memory.
//!
//! Every hook is gated by `allow_in_memory_evaluation`.
use futures::StreamExt;
use tracing::debug;

use crate::dispatch::DispatchCache;
use crate::error::{QueryError, Result};
use crate::expr::{interp, Comparer, Lambda, TypeToken, Value};
use crate::operator::Family;
use crate::sequence::algebra;
use crate::sequence::CancellationSignal;

use super::{AggregateRequest, NativeQuery, QueryAdapter, SecondSequence};

/// Pulls every row of `query` into memory.
pub async fn pull<A>(
    adapter: &A,
    query: &NativeQuery,
    operation: &'static str,
    cancel: &CancellationSignal,
) -> Result<Vec<Value>>
where
    A: QueryAdapter + ?Sized,
{
    if !adapter.options().allow_in_memory_evaluation {
        return Err(QueryError::InMemoryEvaluationDisabled {
            operation,
            adapter: adapter.name().to_string(),
        });
    }
    debug!(adapter = adapter.name(), operation, "evaluating terminal in memory");
    let mut stream = adapter.evaluate_async(query, cancel)?;
    let mut rows = Vec::new();
    while let Some(row) = stream.next().await {
        cancel.check()?;
        rows.push(row?);
    }
    Ok(rows)
}

pub async fn aggregate<A>(
    adapter: &A,
    query: &NativeQuery,
    request: &AggregateRequest,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let rows = pull(adapter, query, "aggregate", cancel).await?;
    let mut iter = rows.into_iter();
    let mut acc = match &request.seed {
        Some(seed) => seed.clone(),
        None => iter.next().ok_or(QueryError::NoElements)?,
    };
    for row in iter {
        acc = interp::invoke(&request.accumulator, &[acc, row])?;
    }
    match &request.result_selector {
        Some(selector) => interp::invoke(selector, &[acc]),
        None => Ok(acc),
    }
}

pub async fn any<A>(
    adapter: &A,
    query: &NativeQuery,
    predicate: Option<&Lambda>,
    cancel: &CancellationSignal,
) -> Result<bool>
where
    A: QueryAdapter + ?Sized,
{
    let rows = pull(adapter, query, "any", cancel).await?;
    Ok(!algebra::filter_sync(predicate, rows)?.is_empty())
}

pub async fn count<A>(
    adapter: &A,
    query: &NativeQuery,
    predicate: Option<&Lambda>,
    cancel: &CancellationSignal,
) -> Result<i32>
where
    A: QueryAdapter + ?Sized,
{
    let rows = pull(adapter, query, "count", cancel).await?;
    let matched = algebra::filter_sync(predicate, rows)?.len();
    i32::try_from(matched).map_err(|_| QueryError::Overflow("Count"))
}

pub async fn long_count<A>(
    adapter: &A,
    query: &NativeQuery,
    predicate: Option<&Lambda>,
    cancel: &CancellationSignal,
) -> Result<i64>
where
    A: QueryAdapter + ?Sized,
{
    let rows = pull(adapter, query, "long_count", cancel).await?;
    Ok(algebra::filter_sync(predicate, rows)?.len() as i64)
}

/// Rows projected through an optional selector, with their type.
async fn projected<A>(
    adapter: &A,
    query: &NativeQuery,
    selector: Option<&Lambda>,
    operation: &'static str,
    cancel: &CancellationSignal,
) -> Result<(TypeToken, Vec<Value>)>
where
    A: QueryAdapter + ?Sized,
{
    let ty = match selector {
        Some(selector) => selector.result_type(),
        None => query.element_type().clone(),
    };
    let rows = pull(adapter, query, operation, cancel).await?;
    Ok((ty, algebra::map_sync(selector, rows)?))
}

pub async fn min<A>(
    adapter: &A,
    query: &NativeQuery,
    selector: Option<&Lambda>,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let (ty, values) = projected(adapter, query, selector, "min", cancel).await?;
    DispatchCache::global().element(&ty).min_values(&values)
}

pub async fn max<A>(
    adapter: &A,
    query: &NativeQuery,
    selector: Option<&Lambda>,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let (ty, values) = projected(adapter, query, selector, "max", cancel).await?;
    DispatchCache::global().element(&ty).max_values(&values)
}

pub async fn sum<A>(
    adapter: &A,
    query: &NativeQuery,
    selector: Option<&Lambda>,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let (ty, values) = projected(adapter, query, selector, "sum", cancel).await?;
    DispatchCache::global().element(&ty).sum_values(&values)
}

pub async fn average<A>(
    adapter: &A,
    query: &NativeQuery,
    selector: Option<&Lambda>,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let ty = match selector {
        Some(selector) => selector.result_type(),
        None => query.element_type().clone(),
    };
    if !ty.is_floating() {
        return Err(QueryError::UnsupportedType {
            operation: "average",
            ty,
        });
    }
    let (ty, values) = projected(adapter, query, selector, "average", cancel).await?;
    DispatchCache::global().element(&ty).average_values(&values)
}

async fn entry<A>(
    adapter: &A,
    query: &NativeQuery,
    predicate: Option<&Lambda>,
    family: Family,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let rows = pull(adapter, query, "single_entry", cancel).await?;
    let rows = algebra::filter_sync(predicate, rows)?;
    algebra::pick_entry(family, rows, query.element_type())
}

pub async fn first<A>(
    adapter: &A,
    query: &NativeQuery,
    predicate: Option<&Lambda>,
    or_default: bool,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let family = if or_default {
        Family::FirstOrDefault
    } else {
        Family::First
    };
    entry(adapter, query, predicate, family, cancel).await
}

pub async fn last<A>(
    adapter: &A,
    query: &NativeQuery,
    predicate: Option<&Lambda>,
    or_default: bool,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let family = if or_default {
        Family::LastOrDefault
    } else {
        Family::Last
    };
    entry(adapter, query, predicate, family, cancel).await
}

pub async fn single<A>(
    adapter: &A,
    query: &NativeQuery,
    predicate: Option<&Lambda>,
    or_default: bool,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let family = if or_default {
        Family::SingleOrDefault
    } else {
        Family::Single
    };
    entry(adapter, query, predicate, family, cancel).await
}

pub async fn element_at<A>(
    adapter: &A,
    query: &NativeQuery,
    index: i32,
    or_default: bool,
    cancel: &CancellationSignal,
) -> Result<Value>
where
    A: QueryAdapter + ?Sized,
{
    let rows = pull(adapter, query, "element_at", cancel).await?;
    algebra::element_at(rows, i64::from(index), or_default, query.element_type())
}

pub async fn contains<A>(
    adapter: &A,
    query: &NativeQuery,
    value: &Value,
    comparer: Option<&Comparer>,
    cancel: &CancellationSignal,
) -> Result<bool>
where
    A: QueryAdapter + ?Sized,
{
    let rows = pull(adapter, query, "contains", cancel).await?;
    Ok(algebra::contains(&rows, value, comparer))
}

pub async fn sequence_equal<A>(
    adapter: &A,
    query: &NativeQuery,
    second: &SecondSequence,
    comparer: Option<&Comparer>,
    cancel: &CancellationSignal,
) -> Result<bool>
where
    A: QueryAdapter + ?Sized,
{
    let first = pull(adapter, query, "sequence_equal", cancel).await?;
    let second = match second {
        SecondSequence::Query(other) => pull(adapter, other, "sequence_equal", cancel).await?,
        SecondSequence::Sequence(seq) => seq.collect(cancel).await?,
    };
    Ok(algebra::sequence_equal(&first, &second, comparer))
}
