//! Runtime type tokens.
//!
//! Every expression node reports a [`TypeToken`]. The rewrite engine only
//! learns element types at evaluation time, so all generic dispatch is keyed
//! by these tokens rather than by Rust type parameters.
use std::fmt;

/// The four kinds of sequence the engine distinguishes.
///
/// `AsyncQueryable` is the caller-facing abstract sequence, `Queryable` is
/// the provider's native query. The enumerable kinds are plain sequences
/// that can be consumed but not composed into a provider query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SeqKind {
    AsyncQueryable,
    AsyncEnumerable,
    Queryable,
    Enumerable,
}

impl SeqKind {
    pub fn is_async(self) -> bool {
        matches!(self, SeqKind::AsyncQueryable | SeqKind::AsyncEnumerable)
    }

    pub fn is_queryable(self) -> bool {
        matches!(self, SeqKind::AsyncQueryable | SeqKind::Queryable)
    }

    pub fn to_sync(self) -> SeqKind {
        match self {
            SeqKind::AsyncQueryable => SeqKind::Queryable,
            SeqKind::AsyncEnumerable => SeqKind::Enumerable,
            other => other,
        }
    }

    pub fn to_async(self) -> SeqKind {
        match self {
            SeqKind::Queryable => SeqKind::AsyncQueryable,
            SeqKind::Enumerable => SeqKind::AsyncEnumerable,
            other => other,
        }
    }
}

/// Closed runtime type identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeToken {
    Unit,
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Nullable(Box<TypeToken>),
    Tuple(Vec<TypeToken>),
    Sequence(SeqKind, Box<TypeToken>),
    /// A group produced by `GroupBy`. Async groupings enumerate their
    /// elements as an async sequence; sync ones as a plain list.
    Grouping {
        sync: bool,
        key: Box<TypeToken>,
        element: Box<TypeToken>,
    },
    Function {
        params: Vec<TypeToken>,
        result: Box<TypeToken>,
    },
    Awaitable(Box<TypeToken>),
    Comparer(Box<TypeToken>),
    Cancellation,
}

impl TypeToken {
    pub fn nullable(inner: TypeToken) -> Self {
        match inner {
            TypeToken::Nullable(_) => inner,
            other => TypeToken::Nullable(Box::new(other)),
        }
    }

    pub fn sequence(kind: SeqKind, element: TypeToken) -> Self {
        TypeToken::Sequence(kind, Box::new(element))
    }

    pub fn async_queryable(element: TypeToken) -> Self {
        Self::sequence(SeqKind::AsyncQueryable, element)
    }

    pub fn async_enumerable(element: TypeToken) -> Self {
        Self::sequence(SeqKind::AsyncEnumerable, element)
    }

    pub fn queryable(element: TypeToken) -> Self {
        Self::sequence(SeqKind::Queryable, element)
    }

    pub fn enumerable(element: TypeToken) -> Self {
        Self::sequence(SeqKind::Enumerable, element)
    }

    pub fn grouping(sync: bool, key: TypeToken, element: TypeToken) -> Self {
        TypeToken::Grouping {
            sync,
            key: Box::new(key),
            element: Box::new(element),
        }
    }

    pub fn function(params: Vec<TypeToken>, result: TypeToken) -> Self {
        TypeToken::Function {
            params,
            result: Box::new(result),
        }
    }

    pub fn awaitable(inner: TypeToken) -> Self {
        TypeToken::Awaitable(Box::new(inner))
    }

    pub fn comparer(inner: TypeToken) -> Self {
        TypeToken::Comparer(Box::new(inner))
    }

    pub fn sequence_kind(&self) -> Option<SeqKind> {
        match self {
            TypeToken::Sequence(kind, _) => Some(*kind),
            TypeToken::Grouping { sync: true, .. } => Some(SeqKind::Enumerable),
            TypeToken::Grouping { sync: false, .. } => Some(SeqKind::AsyncEnumerable),
            _ => None,
        }
    }

    /// Element type of a sequence or grouping.
    pub fn element_type(&self) -> Option<&TypeToken> {
        match self {
            TypeToken::Sequence(_, element) => Some(&**element),
            TypeToken::Grouping { element, .. } => Some(&**element),
            _ => None,
        }
    }

    /// True for the caller-facing asynchronous sequence kinds.
    pub fn is_async_sequence(&self) -> bool {
        self.sequence_kind().is_some_and(SeqKind::is_async)
    }

    pub fn is_grouping(&self) -> bool {
        matches!(self, TypeToken::Grouping { .. })
    }

    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeToken::Nullable(_))
    }

    /// Strips one level of `Nullable`.
    pub fn underlying(&self) -> &TypeToken {
        match self {
            TypeToken::Nullable(inner) => &**inner,
            other => other,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self.underlying(),
            TypeToken::Int32 | TypeToken::Int64 | TypeToken::Float32 | TypeToken::Float64
        )
    }

    pub fn is_integer(&self) -> bool {
        matches!(self.underlying(), TypeToken::Int32 | TypeToken::Int64)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self.underlying(), TypeToken::Float32 | TypeToken::Float64)
    }

    /// Types whose default value is null rather than a zero value.
    pub fn admits_null(&self) -> bool {
        !matches!(
            self,
            TypeToken::Unit
                | TypeToken::Bool
                | TypeToken::Int32
                | TypeToken::Int64
                | TypeToken::Float32
                | TypeToken::Float64
        )
    }

    /// Result type of `Average` over this numeric type.
    pub fn average_type(&self) -> Option<TypeToken> {
        match self {
            TypeToken::Int32 | TypeToken::Int64 | TypeToken::Float64 => Some(TypeToken::Float64),
            TypeToken::Float32 => Some(TypeToken::Float32),
            TypeToken::Nullable(inner) => inner.average_type().map(TypeToken::nullable),
            _ => None,
        }
    }

    /// Integer types widened to their floating representation.
    pub fn widened(&self) -> TypeToken {
        match self {
            TypeToken::Int32 | TypeToken::Int64 => TypeToken::Float64,
            TypeToken::Nullable(inner) if inner.is_integer() => {
                TypeToken::nullable(TypeToken::Float64)
            }
            other => other.clone(),
        }
    }

    /// Substitutes every async sequence kind with its synchronous twin.
    pub fn to_sync(&self) -> TypeToken {
        self.map_kinds(true)
    }

    /// Substitutes every synchronous sequence kind with its async twin.
    pub fn to_async(&self) -> TypeToken {
        self.map_kinds(false)
    }

    fn map_kinds(&self, sync: bool) -> TypeToken {
        let map = |t: &TypeToken| t.map_kinds(sync);
        match self {
            TypeToken::Nullable(inner) => TypeToken::Nullable(Box::new(map(&**inner))),
            TypeToken::Tuple(items) => TypeToken::Tuple(items.iter().map(map).collect()),
            TypeToken::Sequence(kind, element) => {
                let kind = if sync { kind.to_sync() } else { kind.to_async() };
                TypeToken::Sequence(kind, Box::new(map(&**element)))
            }
            TypeToken::Grouping { key, element, .. } => TypeToken::Grouping {
                sync,
                key: Box::new(map(&**key)),
                element: Box::new(map(&**element)),
            },
            TypeToken::Function { params, result } => TypeToken::Function {
                params: params.iter().map(map).collect(),
                result: Box::new(map(&**result)),
            },
            TypeToken::Awaitable(inner) => TypeToken::Awaitable(Box::new(map(&**inner))),
            TypeToken::Comparer(inner) => TypeToken::Comparer(Box::new(map(&**inner))),
            other => other.clone(),
        }
    }

    /// True if this type mentions an async grouping anywhere.
    pub fn mentions_async_grouping(&self) -> bool {
        match self {
            TypeToken::Grouping { sync: false, .. } => true,
            TypeToken::Grouping { key, element, .. } => {
                key.mentions_async_grouping() || element.mentions_async_grouping()
            }
            TypeToken::Nullable(inner)
            | TypeToken::Sequence(_, inner)
            | TypeToken::Awaitable(inner)
            | TypeToken::Comparer(inner) => inner.mentions_async_grouping(),
            TypeToken::Tuple(items) => items.iter().any(TypeToken::mentions_async_grouping),
            TypeToken::Function { params, result } => {
                params.iter().any(TypeToken::mentions_async_grouping)
                    || result.mentions_async_grouping()
            }
            _ => false,
        }
    }

    /// Assignability used when binding arguments to parameters.
    ///
    /// Beyond equality, a queryable may stand in for the enumerable of the
    /// same synchronicity, and a grouping is an enumerable of its elements.
    pub fn is_assignable_from(&self, other: &TypeToken) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (TypeToken::Sequence(target, element), source) if !target.is_queryable() => {
                match (source.sequence_kind(), source.element_type()) {
                    (Some(kind), Some(source_element)) => {
                        kind.is_async() == target.is_async() && **element == *source_element
                    }
                    _ => false,
                }
            }
            _ => false,
        }
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeToken::Unit => write!(f, "()"),
            TypeToken::Bool => write!(f, "bool"),
            TypeToken::Int32 => write!(f, "i32"),
            TypeToken::Int64 => write!(f, "i64"),
            TypeToken::Float32 => write!(f, "f32"),
            TypeToken::Float64 => write!(f, "f64"),
            TypeToken::String => write!(f, "string"),
            TypeToken::Nullable(inner) => write!(f, "{}?", inner),
            TypeToken::Tuple(items) => {
                let items: Vec<String> = items.iter().map(|t| t.to_string()).collect();
                write!(f, "({})", items.join(", "))
            }
            TypeToken::Sequence(kind, element) => {
                let name = match kind {
                    SeqKind::AsyncQueryable => "AsyncQueryable",
                    SeqKind::AsyncEnumerable => "AsyncEnumerable",
                    SeqKind::Queryable => "Queryable",
                    SeqKind::Enumerable => "Enumerable",
                };
                write!(f, "{}<{}>", name, element)
            }
            TypeToken::Grouping { sync, key, element } => {
                let name = if *sync { "Grouping" } else { "AsyncGrouping" };
                write!(f, "{}<{}, {}>", name, key, element)
            }
            TypeToken::Function { params, result } => {
                let params: Vec<String> = params.iter().map(|t| t.to_string()).collect();
                write!(f, "fn({}) -> {}", params.join(", "), result)
            }
            TypeToken::Awaitable(inner) => write!(f, "Awaitable<{}>", inner),
            TypeToken::Comparer(inner) => write!(f, "Comparer<{}>", inner),
            TypeToken::Cancellation => write!(f, "Cancellation"),
        }
    }
}
