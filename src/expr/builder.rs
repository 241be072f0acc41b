//! Fluent construction of async-surface query expressions.
use std::sync::Arc;

use crate::adapter::{AbstractSource, QueryAdapter};
use crate::error::{QueryError, Result};
use crate::operator::{Family, Operator};
use crate::sequence::{AsyncSequence, CancellationSignal};

use super::{Call, Expr, TypeToken, Value};

/// An abstract asynchronous sequence under composition.
///
/// Chainable methods return a new `AsyncQuery`; terminal methods return the
/// finished call expression, ready for [`crate::rewrite::QueryEngine`].
/// Terminal calls carry the builder's cancellation signal.
#[derive(Debug, Clone)]
pub struct AsyncQuery {
    expr: Expr,
    cancel: CancellationSignal,
}

impl AsyncQuery {
    /// Wraps an expression of abstract-sequence type.
    pub fn new(expr: Expr) -> Result<Self> {
        let ty = expr.ty();
        if !ty.is_async_sequence() {
            return Err(QueryError::mismatch(
                &TypeToken::async_queryable(ty.element_type().cloned().unwrap_or(TypeToken::Unit)),
                &ty,
            ));
        }
        Ok(Self {
            expr,
            cancel: CancellationSignal::new(),
        })
    }

    /// The whole collection of `element` owned by `adapter`.
    pub fn from_adapter(adapter: Arc<dyn QueryAdapter>, element: TypeToken) -> Self {
        Self {
            expr: Expr::source(AbstractSource::new(adapter, element)),
            cancel: CancellationSignal::new(),
        }
    }

    /// A plain in-memory sequence; nothing about it is ever translated.
    pub fn from_values(element: TypeToken, values: Vec<Value>) -> Self {
        Self::from_sequence(AsyncSequence::from_values(element, values))
    }

    pub fn from_sequence(sequence: AsyncSequence) -> Self {
        Self {
            expr: Expr::sequence(sequence),
            cancel: CancellationSignal::new(),
        }
    }

    /// Signal handed to the adapter by terminal calls built from here on.
    pub fn with_cancellation(mut self, cancel: &CancellationSignal) -> Self {
        self.cancel = cancel.clone();
        self
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn into_expr(self) -> Expr {
        self.expr
    }

    pub fn element_type(&self) -> TypeToken {
        self.expr
            .ty()
            .element_type()
            .cloned()
            .unwrap_or(TypeToken::Unit)
    }

    /// Applies any chainable operator with `args` after the source.
    pub fn chain(self, operator: Operator, args: Vec<Expr>) -> Result<Self> {
        if operator.is_terminal() || !operator.is_async() {
            return Err(QueryError::invalid(format!(
                "{} does not continue an async query",
                operator
            )));
        }
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(self.expr);
        all.extend(args);
        Ok(Self {
            expr: Expr::Call(Call::resolve(operator, all)?),
            cancel: self.cancel,
        })
    }

    /// Applies any terminal operator; the cancellation argument is appended.
    pub fn terminal(self, operator: Operator, args: Vec<Expr>) -> Result<Expr> {
        if !operator.is_terminal() || !operator.is_async() {
            return Err(QueryError::invalid(format!(
                "{} is not an async terminal operator",
                operator
            )));
        }
        let mut all = Vec::with_capacity(args.len() + 2);
        all.push(self.expr);
        all.extend(args);
        all.push(Expr::cancellation(&self.cancel));
        Ok(Expr::Call(Call::resolve(operator, all)?))
    }

    fn plain(self, family: Family, args: Vec<Expr>) -> Result<Self> {
        self.chain(Operator::asynchronous(family), args)
    }

    pub fn where_(self, predicate: Expr) -> Result<Self> {
        self.plain(Family::Where, vec![predicate])
    }

    pub fn select(self, selector: Expr) -> Result<Self> {
        self.plain(Family::Select, vec![selector])
    }

    pub fn order_by(self, key: Expr) -> Result<Self> {
        self.plain(Family::OrderBy, vec![key])
    }

    pub fn order_by_descending(self, key: Expr) -> Result<Self> {
        self.plain(Family::OrderByDescending, vec![key])
    }

    pub fn then_by(self, key: Expr) -> Result<Self> {
        self.plain(Family::ThenBy, vec![key])
    }

    pub fn take(self, count: i32) -> Result<Self> {
        self.plain(Family::Take, vec![Expr::int32(count)])
    }

    pub fn skip(self, count: i32) -> Result<Self> {
        self.plain(Family::Skip, vec![Expr::int32(count)])
    }

    pub fn distinct(self) -> Result<Self> {
        self.plain(Family::Distinct, vec![])
    }

    pub fn concat(self, other: Expr) -> Result<Self> {
        self.plain(Family::Concat, vec![other])
    }

    pub fn group_by(self, key: Expr) -> Result<Self> {
        self.plain(Family::GroupBy, vec![key])
    }

    fn finish(self, family: Family, args: Vec<Expr>) -> Result<Expr> {
        self.terminal(Operator::asynchronous(family), args)
    }

    pub fn count(self) -> Result<Expr> {
        self.finish(Family::Count, vec![])
    }

    pub fn any(self) -> Result<Expr> {
        self.finish(Family::Any, vec![])
    }

    pub fn sum(self) -> Result<Expr> {
        self.finish(Family::Sum, vec![])
    }

    pub fn average(self) -> Result<Expr> {
        self.finish(Family::Average, vec![])
    }

    pub fn min(self) -> Result<Expr> {
        self.finish(Family::Min, vec![])
    }

    pub fn max(self) -> Result<Expr> {
        self.finish(Family::Max, vec![])
    }

    pub fn first(self) -> Result<Expr> {
        self.finish(Family::First, vec![])
    }

    pub fn contains(self, value: Expr) -> Result<Expr> {
        self.finish(Family::Contains, vec![value])
    }

    pub fn sequence_equal(self, other: Expr) -> Result<Expr> {
        self.finish(Family::SequenceEqual, vec![other])
    }

    pub fn to_list(self) -> Result<Expr> {
        self.finish(Family::ToList, vec![])
    }
}
