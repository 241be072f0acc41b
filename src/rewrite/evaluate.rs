//! Asynchronous evaluator for rewritten expression trees.
//!
//! Interprets operator calls of either surface with the in-memory algebra.
//! Translated subtrees are pulled through their adapter; native roots are
//! resolved through an optional [`RootResolver`].
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};

use crate::dispatch::DispatchCache;
use crate::error::{QueryError, Result};
use crate::expr::{interp, Constant, Expr, Value};
use crate::sequence::algebra::{self, Operand};
use crate::sequence::{AsyncSequence, CancellationSignal};

use crate::adapter::NativeRoot;

/// Supplies the rows behind native roots.
pub trait RootResolver: Send + Sync {
    fn rows(&self, root: &NativeRoot) -> Result<Arc<[Value]>>;
}

pub struct Evaluator {
    cancel: CancellationSignal,
    roots: Option<Arc<dyn RootResolver>>,
}

impl Evaluator {
    pub fn new(cancel: CancellationSignal) -> Self {
        Self {
            cancel,
            roots: None,
        }
    }

    pub fn with_roots(cancel: CancellationSignal, roots: Arc<dyn RootResolver>) -> Self {
        Self {
            cancel,
            roots: Some(roots),
        }
    }

    pub fn eval<'a>(&'a self, expr: &'a Expr) -> BoxFuture<'a, Result<Operand>> {
        async move {
            self.cancel.check()?;
            match expr {
                Expr::Constant(constant) => self.constant(constant).await,
                Expr::Lambda(lambda) => Ok(Operand::Lambda(lambda.clone())),
                Expr::Call(call) => {
                    let mut args = Vec::with_capacity(call.args().len());
                    for arg in call.args() {
                        args.push(self.eval(arg).await?);
                    }
                    algebra::apply(call, args, &self.cancel).await
                }
                other => Ok(Operand::Value(interp::eval(other, &[])?)),
            }
        }
        .boxed()
    }

    async fn constant(&self, constant: &Constant) -> Result<Operand> {
        Ok(match constant {
            Constant::Value { value, .. } => Operand::Value(value.clone()),
            Constant::Source(source) => {
                let strategy = DispatchCache::global().element(source.element_type());
                let query = strategy.get_queryable(source.adapter())?;
                let adapter = source.adapter().clone();
                let element = source.element_type().clone();
                let label = format!("{}:{}", adapter.name(), query.expression());
                Operand::Sequence(AsyncSequence::from_fn(element, &label, move |cancel| {
                    strategy.evaluate_async(&adapter, &query, cancel)
                }))
            }
            Constant::Translated(translated) => Operand::Sequence(translated.to_sequence()),
            Constant::Sequence(seq) => Operand::Sequence(seq.clone()),
            Constant::Root(root) => {
                let roots = self.roots.as_ref().ok_or_else(|| {
                    QueryError::evaluation(format!("no rows available for root '{}'", root.name()))
                })?;
                Operand::Sequence(AsyncSequence::from_shared(
                    root.element_type().clone(),
                    roots.rows(root)?,
                ))
            }
            Constant::Pending(pending) => Operand::Value(pending.resolve().await?),
            Constant::Comparer(cmp) => Operand::Comparer(cmp.clone()),
            Constant::Cancellation(cancel) => Operand::Cancellation(cancel.clone()),
        })
    }

    /// Evaluates a sequence-valued expression and collects it.
    pub async fn eval_values(&self, expr: &Expr) -> Result<Vec<Value>> {
        self.eval(expr).await?.values(&self.cancel).await
    }
}
