//! Values produced by successful translation.
use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::adapter::{same_adapter, NativeQuery, QueryAdapter, QueryBuilder};
use crate::dispatch::DispatchCache;
use crate::error::{QueryError, Result};
use crate::expr::{Expr, TypeToken, Value};
use crate::sequence::AsyncSequence;

/// Key and element types of a translated grouped sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupingTypes {
    pub key: TypeToken,
    pub element: TypeToken,
}

/// An async-surface sequence whose whole subtree maps onto one native query.
///
/// The element type is the native (synchronous) one; the native expression
/// always has type `Queryable<element>`.
#[derive(Clone)]
pub struct TranslatedQueryable {
    adapter: Arc<dyn QueryAdapter>,
    element: TypeToken,
    expression: Arc<Expr>,
    builder: Arc<dyn QueryBuilder>,
    grouping: Option<GroupingTypes>,
}

impl TranslatedQueryable {
    /// Wraps the adapter's root query for one source.
    pub fn from_query(adapter: Arc<dyn QueryAdapter>, query: NativeQuery) -> Self {
        Self {
            adapter,
            element: query.element_type().clone(),
            expression: Arc::new(query.expression().clone()),
            builder: query.builder().clone(),
            grouping: None,
        }
    }

    /// Same adapter and builder, new native expression.
    ///
    /// A result element that is a grouping yields a grouped queryable.
    pub fn compose(&self, expression: Expr) -> Result<TranslatedQueryable> {
        let ty = expression.ty();
        let element = match &ty {
            TypeToken::Sequence(kind, element) if !kind.is_async() && kind.is_queryable() => {
                (**element).clone()
            }
            other => {
                return Err(QueryError::mismatch(
                    &TypeToken::queryable(TypeToken::Unit),
                    other,
                ))
            }
        };
        let grouping = match &element {
            TypeToken::Grouping {
                sync: true,
                key,
                element,
            } => Some(GroupingTypes {
                key: (**key).clone(),
                element: (**element).clone(),
            }),
            _ => None,
        };
        Ok(Self {
            adapter: self.adapter.clone(),
            element,
            expression: Arc::new(expression),
            builder: self.builder.clone(),
            grouping,
        })
    }

    pub fn adapter(&self) -> &Arc<dyn QueryAdapter> {
        &self.adapter
    }

    /// Native element type.
    pub fn element_type(&self) -> &TypeToken {
        &self.element
    }

    pub fn expression(&self) -> &Expr {
        &self.expression
    }

    pub fn builder(&self) -> &Arc<dyn QueryBuilder> {
        &self.builder
    }

    pub fn grouping(&self) -> Option<&GroupingTypes> {
        self.grouping.as_ref()
    }

    pub fn is_grouped(&self) -> bool {
        self.grouping.is_some()
    }

    pub fn same_adapter(&self, other: &TranslatedQueryable) -> bool {
        same_adapter(&self.adapter, &other.adapter)
    }

    /// Type as seen by the async surface.
    pub fn surface_type(&self) -> TypeToken {
        TypeToken::async_queryable(self.element.to_async())
    }

    /// Materializes the concrete native query object.
    pub fn query(&self) -> Result<NativeQuery> {
        NativeQuery::new(
            self.element.clone(),
            (*self.expression).clone(),
            self.builder.clone(),
        )
    }

    /// Lazy async sequence evaluating this query through the dispatch cache.
    pub fn to_sequence(&self) -> AsyncSequence {
        let translated = self.clone();
        let label = format!("{}:{}", self.adapter.name(), self.expression);
        AsyncSequence::from_fn(self.element.to_async(), &label, move |cancel| {
            let query = translated.query()?;
            DispatchCache::global()
                .element(&translated.element)
                .evaluate_async(&translated.adapter, &query, cancel)
        })
    }
}

impl fmt::Debug for TranslatedQueryable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslatedQueryable")
            .field("adapter", &self.adapter.name())
            .field("element", &self.element)
            .field("expression", &self.expression.to_string())
            .field("grouping", &self.grouping)
            .finish()
    }
}

impl PartialEq for TranslatedQueryable {
    fn eq(&self, other: &Self) -> bool {
        self.same_adapter(other)
            && self.element == other.element
            && self.expression == other.expression
    }
}

/// Awaitable scalar produced by a terminal translator.
///
/// The underlying future is shared so the same node may be awaited more
/// than once; the adapter hook runs at most once.
#[derive(Clone)]
pub struct PendingResult {
    ty: TypeToken,
    label: Arc<str>,
    future: Shared<BoxFuture<'static, Result<Value>>>,
}

impl PendingResult {
    pub fn new(ty: TypeToken, label: &str, future: BoxFuture<'static, Result<Value>>) -> Self {
        Self {
            ty,
            label: Arc::from(label),
            future: future.shared(),
        }
    }

    /// Type of the awaited value.
    pub fn result_type(&self) -> &TypeToken {
        &self.ty
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn resolve(&self) -> Result<Value> {
        self.future.clone().await
    }
}

impl fmt::Debug for PendingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingResult")
            .field("ty", &self.ty)
            .field("label", &self.label)
            .finish()
    }
}

impl PartialEq for PendingResult {
    fn eq(&self, other: &Self) -> bool {
        self.future.ptr_eq(&other.future)
    }
}
