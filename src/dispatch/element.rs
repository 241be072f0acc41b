//! Statically typed element kinds behind the dispatch strategies.
use crate::error::{QueryError, Result};
use crate::expr::Value;

/// A Rust type that element values of one [`TypeToken`] convert into.
///
/// [`TypeToken`]: crate::expr::TypeToken
pub trait Element: Sized + Send + Sync + 'static {
    /// True if `Sum` is defined for this type.
    const SUM: bool = false;
    /// True if the adapter-level `Average` accepts this type.
    const AVERAGE: bool = false;

    fn from_value(value: &Value) -> Option<Self>;

    fn into_value(self) -> Value;

    fn sum(_values: Vec<Self>) -> Result<Self> {
        Err(QueryError::evaluation("sum is not defined"))
    }

    fn average(_values: Vec<Self>) -> Result<Self> {
        Err(QueryError::evaluation("average is not defined"))
    }
}

macro_rules! integer_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const SUM: bool = true;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(*v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn sum(values: Vec<Self>) -> Result<Self> {
                values.into_iter().try_fold(0, |acc: $ty, v| {
                    acc.checked_add(v).ok_or(QueryError::Overflow("Sum"))
                })
            }
        }
    };
}

integer_element!(i32, Int32);
integer_element!(i64, Int64);

macro_rules! float_element {
    ($ty:ty, $variant:ident) => {
        impl Element for $ty {
            const SUM: bool = true;
            const AVERAGE: bool = true;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(*v),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            // Accumulates in f64 like the single-precision overloads of
            // most query providers.
            fn sum(values: Vec<Self>) -> Result<Self> {
                Ok(values.into_iter().map(f64::from).sum::<f64>() as $ty)
            }

            fn average(values: Vec<Self>) -> Result<Self> {
                if values.is_empty() {
                    return Err(QueryError::NoElements);
                }
                let count = values.len() as f64;
                let total: f64 = values.into_iter().map(f64::from).sum();
                Ok((total / count) as $ty)
            }
        }
    };
}

float_element!(f32, Float32);
float_element!(f64, Float64);

impl Element for bool {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl Element for String {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.to_string()),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        Value::from(self)
    }
}

/// Nullable numerics: nulls are skipped; `Average` of no values is null.
impl<T: Element> Element for Option<T> {
    const SUM: bool = T::SUM;
    const AVERAGE: bool = T::AVERAGE;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }

    fn into_value(self) -> Value {
        self.map_or(Value::Null, T::into_value)
    }

    fn sum(values: Vec<Self>) -> Result<Self> {
        T::sum(values.into_iter().flatten().collect()).map(Some)
    }

    fn average(values: Vec<Self>) -> Result<Self> {
        let present: Vec<T> = values.into_iter().flatten().collect();
        if present.is_empty() {
            return Ok(None);
        }
        T::average(present).map(Some)
    }
}

/// Any value, for composite element types.
#[derive(Debug, Clone)]
pub struct Dynamic(pub Value);

impl Element for Dynamic {
    fn from_value(value: &Value) -> Option<Self> {
        Some(Dynamic(value.clone()))
    }

    fn into_value(self) -> Value {
        self.0
    }
}
