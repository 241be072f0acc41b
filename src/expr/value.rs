//! Dynamically typed values flowing through sequences and lambdas.
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{QueryError, Result};
use crate::sequence::CancellationSignal;

use super::types::TypeToken;

/// A single runtime value.
///
/// Equality, hashing and ordering are total: floats compare by their total
/// order so values can key hash maps and sort stably.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Unit,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Str(Arc<str>),
    Tuple(Arc<[Value]>),
    List(Arc<[Value]>),
    Grouping(Arc<GroupingValue>),
    /// Result of an awaitable callback body.
    Pending(Pending),
}

/// One group produced by `GroupBy`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupingValue {
    pub key: Value,
    pub elements: Arc<[Value]>,
}

/// A pending result produced by an awaitable callback.
///
/// `Ready` completes without suspending; `Delayed` suspends for the given
/// duration before yielding its value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pending {
    Ready(Box<Value>),
    Delayed { value: Box<Value>, millis: u64 },
}

impl Pending {
    pub async fn resolve(self, cancel: &CancellationSignal) -> Result<Value> {
        match self {
            Pending::Ready(value) => Ok(*value),
            Pending::Delayed { value, millis } => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(millis)) => Ok(*value),
                    _ = cancel.cancelled() => Err(QueryError::Cancelled),
                }
            }
        }
    }
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Arc::from(items))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::from(items))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The value a `*OrDefault` operator yields for an element type.
    pub fn default_for(ty: &TypeToken) -> Value {
        match ty {
            TypeToken::Unit => Value::Unit,
            TypeToken::Bool => Value::Bool(false),
            TypeToken::Int32 => Value::Int32(0),
            TypeToken::Int64 => Value::Int64(0),
            TypeToken::Float32 => Value::Float32(0.0),
            TypeToken::Float64 => Value::Float64(0.0),
            _ => Value::Null,
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(QueryError::evaluation(format!(
                "expected a bool, found {}",
                other
            ))),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Value::Int32(v) => Ok(i64::from(*v)),
            Value::Int64(v) => Ok(*v),
            other => Err(QueryError::evaluation(format!(
                "expected an integer, found {}",
                other
            ))),
        }
    }

    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Int32(v) => Ok(f64::from(*v)),
            Value::Int64(v) => Ok(*v as f64),
            Value::Float32(v) => Ok(f64::from(*v)),
            Value::Float64(v) => Ok(*v),
            other => Err(QueryError::evaluation(format!(
                "expected a number, found {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(&**s),
            other => Err(QueryError::evaluation(format!(
                "expected a string, found {}",
                other
            ))),
        }
    }

    /// Elements of a list or grouping value.
    pub fn elements(&self) -> Result<&[Value]> {
        match self {
            Value::List(items) => Ok(&**items),
            Value::Grouping(group) => Ok(&*group.elements),
            other => Err(QueryError::evaluation(format!(
                "expected a sequence value, found {}",
                other
            ))),
        }
    }

    /// Whether this value can inhabit `ty`.
    pub fn conforms_to(&self, ty: &TypeToken) -> bool {
        match (self, ty) {
            (Value::Null, ty) => ty.admits_null(),
            (value, TypeToken::Nullable(inner)) => value.conforms_to(inner),
            (Value::Unit, TypeToken::Unit)
            | (Value::Bool(_), TypeToken::Bool)
            | (Value::Int32(_), TypeToken::Int32)
            | (Value::Int64(_), TypeToken::Int64)
            | (Value::Float32(_), TypeToken::Float32)
            | (Value::Float64(_), TypeToken::Float64)
            | (Value::Str(_), TypeToken::String) => true,
            (Value::Tuple(items), TypeToken::Tuple(types)) => {
                items.len() == types.len()
                    && items.iter().zip(types).all(|(v, t)| v.conforms_to(t))
            }
            (Value::List(items), TypeToken::Sequence(_, element)) => {
                items.iter().all(|v| v.conforms_to(element))
            }
            (Value::Grouping(group), TypeToken::Grouping { key, element, .. }) => {
                group.key.conforms_to(key) && group.elements.iter().all(|v| v.conforms_to(element))
            }
            (Value::Pending(_), TypeToken::Awaitable(_)) => true,
            _ => false,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Unit => 1,
            Value::Bool(_) => 2,
            Value::Int32(_) => 3,
            Value::Int64(_) => 4,
            Value::Float32(_) => 5,
            Value::Float64(_) => 6,
            Value::Str(_) => 7,
            Value::Tuple(_) => 8,
            Value::List(_) => 9,
            Value::Grouping(_) => 10,
            Value::Pending(_) => 11,
        }
    }

    /// Total order across all values. Values of different variants order by
    /// variant, nulls first.
    pub fn total_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float32(a), Value::Float32(b)) => a.total_cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Str(a), Value::Str(b)) => a.cmp(b),
            (Value::Tuple(a), Value::Tuple(b)) | (Value::List(a), Value::List(b)) => {
                cmp_slices(a, b)
            }
            (Value::Grouping(a), Value::Grouping(b)) => a
                .key
                .total_cmp(&b.key)
                .then_with(|| cmp_slices(&a.elements, &b.elements)),
            (Value::Pending(a), Value::Pending(b)) => {
                let (left, right) = (pending_parts(a), pending_parts(b));
                (left.0, left.1)
                    .cmp(&(right.0, right.1))
                    .then_with(|| left.2.total_cmp(right.2))
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Null | Value::Unit => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int32(v) => Json::from(*v),
            Value::Int64(v) => Json::from(*v),
            Value::Float32(v) => Json::from(f64::from(*v)),
            Value::Float64(v) => Json::from(*v),
            Value::Str(s) => Json::String(s.to_string()),
            Value::Tuple(items) | Value::List(items) => {
                Json::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Grouping(group) => serde_json::json!({
                "key": group.key.to_json(),
                "elements": group.elements.iter().map(Value::to_json).collect::<Vec<_>>(),
            }),
            Value::Pending(p) => pending_parts(p).2.to_json(),
        }
    }
}

fn pending_parts(p: &Pending) -> (u8, u64, &Value) {
    match p {
        Pending::Ready(value) => (0, 0, &**value),
        Pending::Delayed { value, millis } => (1, *millis, &**value),
    }
}

fn cmp_slices(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = x.total_cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.total_cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_cmp(other)
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null | Value::Unit => {}
            Value::Bool(b) => b.hash(state),
            Value::Int32(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float32(v) => v.to_bits().hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Tuple(items) | Value::List(items) => items.hash(state),
            Value::Grouping(group) => group.hash(state),
            Value::Pending(p) => p.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}L", v),
            Value::Float32(v) => write!(f, "{}f", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Tuple(items) => write!(f, "({})", join(items)),
            Value::List(items) => write!(f, "[{}]", join(items)),
            Value::Grouping(group) => write!(f, "{{{}: [{}]}}", group.key, join(&group.elements)),
            Value::Pending(Pending::Ready(value)) => write!(f, "ready({})", value),
            Value::Pending(Pending::Delayed { value, millis }) => {
                write!(f, "delay({}, {}ms)", value, millis)
            }
        }
    }
}

fn join(items: &[Value]) -> String {
    items
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Equality (and optionally ordering) supplied by the caller for
/// `Contains`, `SequenceEqual`, `Distinct` and the set operators.
pub trait ValueComparer: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn equals(&self, left: &Value, right: &Value) -> bool;

    fn compare(&self, left: &Value, right: &Value) -> Ordering {
        left.total_cmp(right)
    }

    /// Canonical representative used to hash values this comparer treats as equal.
    fn canonical(&self, value: &Value) -> Value {
        value.clone()
    }
}

/// Shared handle to a [`ValueComparer`] plus the element type it compares.
#[derive(Debug, Clone)]
pub struct Comparer {
    inner: Arc<dyn ValueComparer>,
    element: TypeToken,
}

impl Comparer {
    pub fn new(element: TypeToken, comparer: impl ValueComparer + 'static) -> Self {
        Self {
            inner: Arc::new(comparer),
            element,
        }
    }

    /// Ordinal, case-insensitive string comparer.
    pub fn case_insensitive() -> Self {
        Self::new(TypeToken::String, CaseInsensitive)
    }

    pub fn element_type(&self) -> &TypeToken {
        &self.element
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn equals(&self, left: &Value, right: &Value) -> bool {
        self.inner.equals(left, right)
    }

    pub fn compare(&self, left: &Value, right: &Value) -> Ordering {
        self.inner.compare(left, right)
    }

    pub fn canonical(&self, value: &Value) -> Value {
        self.inner.canonical(value)
    }
}

impl PartialEq for Comparer {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[derive(Debug)]
struct CaseInsensitive;

impl ValueComparer for CaseInsensitive {
    fn name(&self) -> &str {
        "case_insensitive"
    }

    fn equals(&self, left: &Value, right: &Value) -> bool {
        self.canonical(left) == self.canonical(right)
    }

    fn compare(&self, left: &Value, right: &Value) -> Ordering {
        self.canonical(left).total_cmp(&self.canonical(right))
    }

    fn canonical(&self, value: &Value) -> Value {
        match value {
            Value::Str(s) => Value::from(s.to_lowercase()),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_float_equality_is_total() {
        assert_eq!(Value::Float64(f64::NAN), Value::Float64(f64::NAN));
        assert!(Value::Float64(1.0) < Value::Float64(2.0));
        let mut set = HashSet::new();
        set.insert(Value::Float64(1.5));
        assert!(set.contains(&Value::Float64(1.5)));
    }

    #[test]
    fn test_null_orders_first() {
        let mut values = vec![Value::from(3), Value::Null, Value::from(1)];
        values.sort();
        assert_eq!(values, vec![Value::Null, Value::from(1), Value::from(3)]);
    }

    #[test]
    fn test_default_for() {
        assert_eq!(Value::default_for(&TypeToken::Int32), Value::Int32(0));
        assert_eq!(Value::default_for(&TypeToken::String), Value::Null);
        assert_eq!(
            Value::default_for(&TypeToken::nullable(TypeToken::Int32)),
            Value::Null
        );
    }

    #[test]
    fn test_conforms_to() {
        assert!(Value::from(1).conforms_to(&TypeToken::Int32));
        assert!(Value::from(1).conforms_to(&TypeToken::nullable(TypeToken::Int32)));
        assert!(!Value::from(1).conforms_to(&TypeToken::Int64));
        assert!(Value::Null.conforms_to(&TypeToken::String));
        assert!(!Value::Null.conforms_to(&TypeToken::Int32));
        let pair = Value::tuple(vec![Value::from(1), Value::from("a")]);
        assert!(pair.conforms_to(&TypeToken::Tuple(vec![TypeToken::Int32, TypeToken::String])));
    }

    #[test]
    fn test_case_insensitive_comparer() {
        let cmp = Comparer::case_insensitive();
        assert!(cmp.equals(&Value::from("Hello"), &Value::from("hELLO")));
        assert!(!cmp.equals(&Value::from("Hello"), &Value::from("World")));
        assert_eq!(cmp.clone(), cmp);
    }

    #[tokio::test]
    async fn test_pending_resolve() {
        let cancel = CancellationSignal::new();
        let ready = Pending::Ready(Box::new(Value::from(7)));
        assert_eq!(ready.resolve(&cancel).await.unwrap(), Value::from(7));
        let delayed = Pending::Delayed {
            value: Box::new(Value::from(8)),
            millis: 1,
        };
        assert_eq!(delayed.resolve(&cancel).await.unwrap(), Value::from(8));
    }
}
