//! In-memory semantics of every operator family.
//!
//! Used for post-processing after a fallback, for native queries run by the
//! in-memory provider, and by the adapter's default terminal hooks. Both
//! surfaces share the same semantics; the async surface additionally awaits
//! the results of awaitable lambdas.
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::dispatch::DispatchCache;
use crate::error::{QueryError, Result};
use crate::expr::interp;
use crate::expr::{Call, Comparer, GroupingValue, Lambda, TypeToken, Value};
use crate::operator::{Callback, Family};

use super::{AsyncSequence, CancellationSignal};

/// An evaluated call argument or result.
#[derive(Debug, Clone)]
pub enum Operand {
    Value(Value),
    Sequence(AsyncSequence),
    /// Result of an ordering operator; `ThenBy` extends its keys.
    Ordered(OrderedValues),
    Lambda(Lambda),
    Comparer(Comparer),
    Cancellation(CancellationSignal),
}

impl Operand {
    /// Materializes a sequence-like operand.
    pub async fn values(&self, cancel: &CancellationSignal) -> Result<Vec<Value>> {
        match self {
            Operand::Sequence(seq) => seq.collect(cancel).await,
            Operand::Ordered(ordered) => ordered.materialize(),
            Operand::Value(Value::Null) => Err(QueryError::invalid("sequence argument is null")),
            Operand::Value(value) => Ok(value.elements()?.to_vec()),
            other => Err(QueryError::evaluation(format!(
                "expected a sequence, found {:?}",
                other
            ))),
        }
    }

    pub fn into_value(self) -> Result<Value> {
        match self {
            Operand::Value(value) => Ok(value),
            other => Err(QueryError::evaluation(format!(
                "expected a scalar, found {:?}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortKey {
    pub selector: Lambda,
    pub descending: bool,
    pub comparer: Option<Comparer>,
}

/// Elements plus the ordering keys accumulated so far.
#[derive(Debug, Clone)]
pub struct OrderedValues {
    element: TypeToken,
    values: Vec<Value>,
    keys: Vec<SortKey>,
}

impl OrderedValues {
    pub fn new(element: TypeToken, values: Vec<Value>, key: SortKey) -> Self {
        Self {
            element,
            values,
            keys: vec![key],
        }
    }

    pub fn then_by(mut self, key: SortKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn element_type(&self) -> &TypeToken {
        &self.element
    }

    /// Stable sort by every key in order.
    pub fn materialize(&self) -> Result<Vec<Value>> {
        let mut rows = Vec::with_capacity(self.values.len());
        for value in &self.values {
            let keys = self
                .keys
                .iter()
                .map(|key| interp::invoke(&key.selector, std::slice::from_ref(value)))
                .collect::<Result<Vec<_>>>()?;
            rows.push((keys, value.clone()));
        }
        rows.sort_by(|(a, _), (b, _)| {
            for (i, key) in self.keys.iter().enumerate() {
                let ord = match &key.comparer {
                    Some(cmp) => cmp.compare(&a[i], &b[i]),
                    None => a[i].total_cmp(&b[i]),
                };
                let ord = if key.descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(rows.into_iter().map(|(_, value)| value).collect())
    }
}

/// Invokes a lambda, awaiting its result when the callback is awaitable.
pub async fn call_lambda(
    lambda: &Lambda,
    args: &[Value],
    callback: Callback,
    cancel: &CancellationSignal,
) -> Result<Value> {
    let value = if callback == Callback::AwaitWithCancellation {
        let mut args = args.to_vec();
        args.push(Value::Unit);
        interp::invoke(lambda, &args)?
    } else {
        interp::invoke(lambda, args)?
    };
    match value {
        Value::Pending(pending) => pending.resolve(cancel).await,
        other => Ok(other),
    }
}

/// Strips an `Awaitable` wrapper.
pub fn awaited(ty: TypeToken) -> TypeToken {
    match ty {
        TypeToken::Awaitable(inner) => *inner,
        other => other,
    }
}

fn lambda_at(args: &[Operand], index: usize) -> Result<&Lambda> {
    match args.get(index) {
        Some(Operand::Lambda(lambda)) => Ok(lambda),
        other => Err(QueryError::evaluation(format!(
            "argument {} is not a lambda: {:?}",
            index, other
        ))),
    }
}

fn value_at(args: &[Operand], index: usize) -> Result<&Value> {
    match args.get(index) {
        Some(Operand::Value(value)) => Ok(value),
        other => Err(QueryError::evaluation(format!(
            "argument {} is not a scalar: {:?}",
            index, other
        ))),
    }
}

fn comparer_in(args: &[Operand]) -> Option<&Comparer> {
    args.iter().find_map(|arg| match arg {
        Operand::Comparer(cmp) => Some(cmp),
        _ => None,
    })
}

/// Arguments without a trailing cancellation operand.
fn significant(args: &[Operand]) -> &[Operand] {
    match args.split_last() {
        Some((Operand::Cancellation(_), rest)) => rest,
        _ => args,
    }
}

/// Applies `call` to evaluated arguments.
pub async fn apply(
    call: &Call,
    args: Vec<Operand>,
    cancel: &CancellationSignal,
) -> Result<Operand> {
    cancel.check()?;
    let operator = call.operator();
    let callback = operator.callback;
    let family = operator.family;
    let args = significant(&args);
    let source_ty = call
        .args()
        .first()
        .map(|arg| arg.ty())
        .ok_or_else(|| QueryError::invalid(format!("{} has no source argument", operator)))?;
    let element = source_ty
        .element_type()
        .cloned()
        .ok_or_else(|| {
            QueryError::mismatch(&TypeToken::async_queryable(TypeToken::Unit), &source_ty)
        })?;
    let source = args
        .first()
        .ok_or_else(|| QueryError::invalid(format!("{} has no source argument", operator)))?;

    if family == Family::ThenBy || family == Family::ThenByDescending {
        let Operand::Ordered(ordered) = source else {
            return Err(QueryError::evaluation(format!(
                "{} requires an ordered sequence",
                operator
            )));
        };
        let key = SortKey {
            selector: lambda_at(args, 1)?.clone(),
            descending: family == Family::ThenByDescending,
            comparer: comparer_in(args).cloned(),
        };
        return Ok(Operand::Ordered(ordered.clone().then_by(key)));
    }

    let values = source.values(cancel).await?;

    if family.is_terminal() {
        let result = terminal(family, callback, &element, values, args, cancel).await?;
        return Ok(Operand::Value(result));
    }

    let out_element = call
        .ty()
        .element_type()
        .cloned()
        .unwrap_or_else(|| element.clone());
    let out = match family {
        Family::Where | Family::TakeWhile | Family::SkipWhile => {
            let predicate = lambda_at(args, 1)?;
            let mut out = Vec::new();
            for (i, value) in values.iter().enumerate() {
                let keep = call_lambda(predicate, std::slice::from_ref(value), callback, cancel)
                    .await?
                    .as_bool()?;
                match family {
                    Family::Where if keep => out.push(value.clone()),
                    Family::TakeWhile if !keep => break,
                    Family::TakeWhile => out.push(value.clone()),
                    Family::SkipWhile if keep => {}
                    Family::SkipWhile => {
                        out.extend(values[i..].iter().cloned());
                        break;
                    }
                    _ => {}
                }
            }
            out
        }
        Family::Select => {
            let selector = lambda_at(args, 1)?;
            let mut out = Vec::with_capacity(values.len());
            for value in &values {
                let item = std::slice::from_ref(value);
                out.push(call_lambda(selector, item, callback, cancel).await?);
            }
            out
        }
        Family::OrderBy | Family::OrderByDescending => {
            let key = SortKey {
                selector: lambda_at(args, 1)?.clone(),
                descending: family == Family::OrderByDescending,
                comparer: comparer_in(args).cloned(),
            };
            return Ok(Operand::Ordered(OrderedValues::new(element, values, key)));
        }
        Family::Take => {
            let count = value_at(args, 1)?.as_i64()?.max(0) as usize;
            values.into_iter().take(count).collect()
        }
        Family::Skip => {
            let count = value_at(args, 1)?.as_i64()?.max(0) as usize;
            values.into_iter().skip(count).collect()
        }
        Family::Distinct => distinct(values, comparer_in(args)),
        Family::Reverse => values.into_iter().rev().collect(),
        Family::Concat => {
            let second = second_values(args, cancel).await?;
            values.into_iter().chain(second).collect()
        }
        Family::Union => {
            let second = second_values(args, cancel).await?;
            distinct(values.into_iter().chain(second).collect(), comparer_in(args))
        }
        Family::Intersect | Family::Except => {
            let comparer = comparer_in(args);
            let second: HashSet<Value> = second_values(args, cancel)
                .await?
                .iter()
                .map(|v| canonical(comparer, v))
                .collect();
            let keep_present = family == Family::Intersect;
            let filtered = values
                .into_iter()
                .filter(|v| second.contains(&canonical(comparer, v)) == keep_present)
                .collect();
            distinct(filtered, comparer)
        }
        Family::Append => {
            let mut values = values;
            values.push(value_at(args, 1)?.clone());
            values
        }
        Family::Prepend => {
            let mut out = vec![value_at(args, 1)?.clone()];
            out.extend(values);
            out
        }
        Family::DefaultIfEmpty => {
            if values.is_empty() {
                let fill = match args.get(1) {
                    Some(_) => value_at(args, 1)?.clone(),
                    None => Value::default_for(&element),
                };
                vec![fill]
            } else {
                values
            }
        }
        Family::GroupBy => {
            let key_selector = lambda_at(args, 1)?;
            let element_selector = match args.get(2) {
                Some(_) => Some(lambda_at(args, 2)?),
                None => None,
            };
            let mut order: Vec<Value> = Vec::new();
            let mut groups: HashMap<Value, Vec<Value>> = HashMap::new();
            for value in &values {
                let key =
                    call_lambda(key_selector, std::slice::from_ref(value), callback, cancel).await?;
                let item = match element_selector {
                    Some(selector) => {
                        call_lambda(selector, std::slice::from_ref(value), callback, cancel).await?
                    }
                    None => value.clone(),
                };
                groups
                    .entry(key.clone())
                    .or_insert_with(|| {
                        order.push(key);
                        Vec::new()
                    })
                    .push(item);
            }
            order
                .into_iter()
                .map(|key| {
                    let elements = groups.remove(&key).unwrap_or_default();
                    Value::Grouping(std::sync::Arc::new(GroupingValue {
                        key,
                        elements: elements.into(),
                    }))
                })
                .collect()
        }
        _ => {
            return Err(QueryError::evaluation(format!(
                "{} cannot be evaluated in memory",
                operator
            )))
        }
    };
    Ok(Operand::Sequence(AsyncSequence::from_values(out_element, out)))
}

async fn second_values(args: &[Operand], cancel: &CancellationSignal) -> Result<Vec<Value>> {
    match args.get(1) {
        Some(second) => second.values(cancel).await,
        None => Err(QueryError::invalid("missing second sequence")),
    }
}

async fn terminal(
    family: Family,
    callback: Callback,
    element: &TypeToken,
    values: Vec<Value>,
    args: &[Operand],
    cancel: &CancellationSignal,
) -> Result<Value> {
    let dispatch = DispatchCache::global();
    match family {
        Family::Aggregate => {
            let (seed, func, result) = match args.len() {
                2 => (None, lambda_at(args, 1)?, None),
                3 => (Some(value_at(args, 1)?.clone()), lambda_at(args, 2)?, None),
                _ => (
                    Some(value_at(args, 1)?.clone()),
                    lambda_at(args, 2)?,
                    Some(lambda_at(args, 3)?),
                ),
            };
            let mut iter = values.into_iter();
            let mut acc = match seed {
                Some(seed) => seed,
                None => iter.next().ok_or(QueryError::NoElements)?,
            };
            for value in iter {
                acc = call_lambda(func, &[acc, value], callback, cancel).await?;
            }
            match result {
                Some(selector) => call_lambda(selector, &[acc], callback, cancel).await,
                None => Ok(acc),
            }
        }
        Family::Any | Family::All | Family::Count | Family::LongCount => {
            let matched = match args.get(1) {
                Some(_) => {
                    filter(lambda_at(args, 1)?, values, callback, cancel, family == Family::All)
                        .await?
                }
                None => values,
            };
            Ok(match family {
                Family::Any => Value::Bool(!matched.is_empty()),
                Family::All => Value::Bool(matched.is_empty()),
                Family::Count => Value::Int32(
                    i32::try_from(matched.len()).map_err(|_| QueryError::Overflow("Count"))?,
                ),
                _ => Value::Int64(matched.len() as i64),
            })
        }
        Family::Min | Family::Max | Family::Sum | Family::Average => {
            let (ty, values) = match args.get(1) {
                Some(_) => {
                    let selector = lambda_at(args, 1)?;
                    let mut out = Vec::with_capacity(values.len());
                    for value in &values {
                        out.push(
                            call_lambda(selector, std::slice::from_ref(value), callback, cancel)
                                .await?,
                        );
                    }
                    (awaited(selector.result_type()), out)
                }
                None => (element.clone(), values),
            };
            let strategy = dispatch.element(&ty);
            match family {
                Family::Min => strategy.min_values(&values),
                Family::Max => strategy.max_values(&values),
                Family::Sum => strategy.sum_values(&values),
                _ => {
                    let widened = ty.widened();
                    let values = values
                        .into_iter()
                        .map(|v| interp::convert(v, &widened))
                        .collect::<Result<Vec<_>>>()?;
                    dispatch.element(&widened).average_values(&values)
                }
            }
        }
        Family::First
        | Family::FirstOrDefault
        | Family::Last
        | Family::LastOrDefault
        | Family::Single
        | Family::SingleOrDefault => {
            let values = match args.get(1) {
                Some(_) => filter(lambda_at(args, 1)?, values, callback, cancel, false).await?,
                None => values,
            };
            pick_entry(family, values, element)
        }
        Family::ElementAt | Family::ElementAtOrDefault => {
            let index = value_at(args, 1)?.as_i64()?;
            element_at(values, index, family.or_default(), element)
        }
        Family::Contains => {
            let needle = value_at(args, 1)?;
            Ok(Value::Bool(contains(&values, needle, comparer_in(args))))
        }
        Family::SequenceEqual => {
            let second = second_values(args, cancel).await?;
            Ok(Value::Bool(sequence_equal(&values, &second, comparer_in(args))))
        }
        Family::ToList => Ok(Value::list(values)),
        other => Err(QueryError::evaluation(format!(
            "{} is not a terminal operator",
            other
        ))),
    }
}

/// Keeps elements matching `predicate`, or failing it when `negate` is set.
async fn filter(
    predicate: &Lambda,
    values: Vec<Value>,
    callback: Callback,
    cancel: &CancellationSignal,
    negate: bool,
) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for value in values {
        let keep = call_lambda(predicate, std::slice::from_ref(&value), callback, cancel)
            .await?
            .as_bool()?;
        if keep != negate {
            out.push(value);
        }
    }
    Ok(out)
}

/// Keeps elements matching a synchronous predicate.
pub fn filter_sync(predicate: Option<&Lambda>, values: Vec<Value>) -> Result<Vec<Value>> {
    let Some(predicate) = predicate else {
        return Ok(values);
    };
    let mut out = Vec::new();
    for value in values {
        if interp::invoke(predicate, std::slice::from_ref(&value))?.as_bool()? {
            out.push(value);
        }
    }
    Ok(out)
}

/// Applies a synchronous selector to every element.
pub fn map_sync(selector: Option<&Lambda>, values: Vec<Value>) -> Result<Vec<Value>> {
    match selector {
        Some(selector) => values
            .iter()
            .map(|v| interp::invoke(selector, std::slice::from_ref(v)))
            .collect(),
        None => Ok(values),
    }
}

/// `First`, `Last` and `Single` over already-filtered elements.
pub fn pick_entry(family: Family, values: Vec<Value>, element: &TypeToken) -> Result<Value> {
    let or_default = family.or_default();
    let empty = || {
        if or_default {
            Ok(Value::default_for(element))
        } else {
            Err(QueryError::NoElements)
        }
    };
    match family {
        Family::First | Family::FirstOrDefault => match values.into_iter().next() {
            Some(v) => Ok(v),
            None => empty(),
        },
        Family::Last | Family::LastOrDefault => match values.into_iter().last() {
            Some(v) => Ok(v),
            None => empty(),
        },
        Family::Single | Family::SingleOrDefault => {
            let mut iter = values.into_iter();
            match (iter.next(), iter.next()) {
                (None, _) => empty(),
                (Some(v), None) => Ok(v),
                (Some(_), Some(_)) => Err(QueryError::MoreThanOneElement),
            }
        }
        other => Err(QueryError::invalid(format!(
            "{} does not select a single entry",
            other
        ))),
    }
}

pub fn element_at(
    values: Vec<Value>,
    index: i64,
    or_default: bool,
    element: &TypeToken,
) -> Result<Value> {
    let found = usize::try_from(index)
        .ok()
        .and_then(|i| values.into_iter().nth(i));
    match found {
        Some(v) => Ok(v),
        None if or_default => Ok(Value::default_for(element)),
        None => Err(QueryError::IndexOutOfRange(index)),
    }
}

fn canonical(comparer: Option<&Comparer>, value: &Value) -> Value {
    match comparer {
        Some(cmp) => cmp.canonical(value),
        None => value.clone(),
    }
}

/// Removes duplicates, keeping first occurrences.
pub fn distinct(values: Vec<Value>, comparer: Option<&Comparer>) -> Vec<Value> {
    let mut seen = HashSet::new();
    values
        .into_iter()
        .filter(|v| seen.insert(canonical(comparer, v)))
        .collect()
}

pub fn contains(values: &[Value], needle: &Value, comparer: Option<&Comparer>) -> bool {
    values.iter().any(|v| match comparer {
        Some(cmp) => cmp.equals(v, needle),
        None => v == needle,
    })
}

pub fn sequence_equal(first: &[Value], second: &[Value], comparer: Option<&Comparer>) -> bool {
    first.len() == second.len()
        && first.iter().zip(second).all(|(a, b)| match comparer {
            Some(cmp) => cmp.equals(a, b),
            None => a == b,
        })
}
