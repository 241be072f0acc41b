//! Provider abstraction.
//!
//! A [`QueryAdapter`] owns a family of abstract sources, hands out native
//! queries for them and evaluates native queries asynchronously. Terminal
//! operators go through overridable hooks whose defaults pull the rows into
//! memory (see [`in_memory`]).
pub mod in_memory;
pub mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AdapterOptions;
use crate::error::{QueryError, Result};
use crate::expr::{Call, Comparer, Expr, Lambda, TypeToken, Value};
use crate::sequence::{AsyncSequence, CancellationSignal, ValueStream};

pub use memory::{Capabilities, MemoryProvider};

/// Root of a provider-native expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NativeRoot {
    name: Arc<str>,
    element: TypeToken,
}

impl NativeRoot {
    pub fn new(name: &str, element: TypeToken) -> Self {
        Self {
            name: Arc::from(name),
            element,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn element_type(&self) -> &TypeToken {
        &self.element
    }
}

/// Builds concrete native query objects from native expressions.
pub trait QueryBuilder: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Whether the provider can express this native call. Translators
    /// consult this after a structural match and refuse on `false`.
    fn accepts(&self, _call: &Call) -> bool {
        true
    }

    /// Checks a native expression before it is packaged into a query.
    fn validate(&self, _expression: &Expr) -> Result<()> {
        Ok(())
    }
}

/// A provider-native query: its element type, native expression and the
/// builder that produced it.
#[derive(Clone)]
pub struct NativeQuery {
    element: TypeToken,
    expression: Arc<Expr>,
    builder: Arc<dyn QueryBuilder>,
}

impl NativeQuery {
    pub fn new(
        element: TypeToken,
        expression: Expr,
        builder: Arc<dyn QueryBuilder>,
    ) -> Result<Self> {
        let expected = TypeToken::queryable(element.clone());
        let found = expression.ty();
        if found != expected {
            return Err(QueryError::mismatch(&expected, &found));
        }
        builder.validate(&expression)?;
        Ok(Self {
            element,
            expression: Arc::new(expression),
            builder,
        })
    }

    pub fn element_type(&self) -> &TypeToken {
        &self.element
    }

    pub fn expression(&self) -> &Expr {
        &self.expression
    }

    pub fn builder(&self) -> &Arc<dyn QueryBuilder> {
        &self.builder
    }
}

impl fmt::Debug for NativeQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeQuery")
            .field("element", &self.element)
            .field("expression", &self.expression.to_string())
            .field("builder", &self.builder.name())
            .finish()
    }
}

/// Seed, accumulator and optional result selector of an `Aggregate` call.
#[derive(Debug, Clone)]
pub struct AggregateRequest {
    pub seed: Option<Value>,
    pub accumulator: Lambda,
    pub result_selector: Option<Lambda>,
}

/// Second operand of `SequenceEqual`.
#[derive(Debug, Clone)]
pub enum SecondSequence {
    /// Native query of the same adapter.
    Query(NativeQuery),
    /// Plain asynchronous sequence.
    Sequence(AsyncSequence),
}

/// The provider contract.
#[async_trait]
pub trait QueryAdapter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn options(&self) -> &AdapterOptions;

    /// Native query over the whole collection of `element`.
    fn get_queryable(&self, element: &TypeToken) -> Result<NativeQuery>;

    /// Starts evaluating a native query.
    fn evaluate_async(
        &self,
        query: &NativeQuery,
        cancel: &CancellationSignal,
    ) -> Result<ValueStream>;

    async fn aggregate(
        &self,
        query: NativeQuery,
        request: AggregateRequest,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        in_memory::aggregate(self, &query, &request, &cancel).await
    }

    async fn any(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<bool> {
        in_memory::any(self, &query, predicate.as_ref(), &cancel).await
    }

    /// `All(p)` is `!Any(!p)` unless the provider knows better.
    async fn all(
        &self,
        query: NativeQuery,
        predicate: Lambda,
        cancel: CancellationSignal,
    ) -> Result<bool> {
        let negated = predicate.negated()?;
        Ok(!self.any(query, Some(negated), cancel).await?)
    }

    async fn count(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<i32> {
        in_memory::count(self, &query, predicate.as_ref(), &cancel).await
    }

    async fn long_count(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<i64> {
        in_memory::long_count(self, &query, predicate.as_ref(), &cancel).await
    }

    async fn min(
        &self,
        query: NativeQuery,
        selector: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        in_memory::min(self, &query, selector.as_ref(), &cancel).await
    }

    async fn max(
        &self,
        query: NativeQuery,
        selector: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        in_memory::max(self, &query, selector.as_ref(), &cancel).await
    }

    async fn sum(
        &self,
        query: NativeQuery,
        selector: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        in_memory::sum(self, &query, selector.as_ref(), &cancel).await
    }

    /// Average over floating-point values; integer sources are widened by
    /// the caller before reaching the adapter.
    async fn average(
        &self,
        query: NativeQuery,
        selector: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        in_memory::average(self, &query, selector.as_ref(), &cancel).await
    }

    async fn first(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        in_memory::first(self, &query, predicate.as_ref(), or_default, &cancel).await
    }

    async fn last(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        in_memory::last(self, &query, predicate.as_ref(), or_default, &cancel).await
    }

    async fn single(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        in_memory::single(self, &query, predicate.as_ref(), or_default, &cancel).await
    }

    async fn element_at(
        &self,
        query: NativeQuery,
        index: i32,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        in_memory::element_at(self, &query, index, or_default, &cancel).await
    }

    async fn contains(
        &self,
        query: NativeQuery,
        value: Value,
        comparer: Option<Comparer>,
        cancel: CancellationSignal,
    ) -> Result<bool> {
        in_memory::contains(self, &query, &value, comparer.as_ref(), &cancel).await
    }

    async fn sequence_equal(
        &self,
        query: NativeQuery,
        second: SecondSequence,
        comparer: Option<Comparer>,
        cancel: CancellationSignal,
    ) -> Result<bool> {
        in_memory::sequence_equal(self, &query, &second, comparer.as_ref(), &cancel).await
    }
}

/// Adapter identity is reference identity.
pub fn same_adapter(left: &Arc<dyn QueryAdapter>, right: &Arc<dyn QueryAdapter>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

/// One whole collection owned by an adapter, as it appears in a caller's
/// expression before rewriting.
#[derive(Clone)]
pub struct AbstractSource {
    adapter: Arc<dyn QueryAdapter>,
    element: TypeToken,
}

impl AbstractSource {
    pub fn new(adapter: Arc<dyn QueryAdapter>, element: TypeToken) -> Self {
        Self { adapter, element }
    }

    pub fn adapter(&self) -> &Arc<dyn QueryAdapter> {
        &self.adapter
    }

    pub fn element_type(&self) -> &TypeToken {
        &self.element
    }
}

impl fmt::Debug for AbstractSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbstractSource")
            .field("adapter", &self.adapter.name())
            .field("element", &self.element)
            .finish()
    }
}

impl PartialEq for AbstractSource {
    fn eq(&self, other: &Self) -> bool {
        same_adapter(&self.adapter, &other.adapter) && self.element == other.element
    }
}
