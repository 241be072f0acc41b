//! Specialized translators for terminal operators.
//!
//! Async terminals take awaitable-callback overloads and a trailing
//! cancellation argument that have no native shape, so each family gets a
//! hand-written translator. All of them unwrap the translated source, turn
//! callbacks into plain lambdas, call the adapter through the dispatch cache
//! and wrap the resulting future as a pending scalar.
pub mod aggregate;
pub mod containment;
pub mod math;
pub mod predicate;
pub mod single;

use std::sync::Arc;

use tracing::debug;

use crate::adapter::{NativeQuery, QueryAdapter};
use crate::dispatch::{DispatchCache, ElementStrategy, PendingFuture};
use crate::error::Result;
use crate::expr::{Call, Comparer, Constant, Expr, Lambda, TypeToken, Value};
use crate::operator::Family;
use crate::sequence::algebra::awaited;
use crate::sequence::CancellationSignal;

use super::callback::{classify, native_lambda, LambdaShape};
use super::{PendingResult, TranslateContext, TranslatedQueryable, Translator};

pub use aggregate::AggregateTranslator;
pub use containment::{ContainsTranslator, SequenceEqualTranslator};
pub use math::MathTranslator;
pub use predicate::PredicateTranslator;
pub use single::SingleEntryTranslator;

/// The specialized translator for a terminal family, if any.
pub fn for_family(family: Family) -> Option<Arc<dyn Translator>> {
    let translator: Arc<dyn Translator> = match family {
        Family::Aggregate => Arc::new(AggregateTranslator),
        Family::Any | Family::All | Family::Count | Family::LongCount => {
            Arc::new(PredicateTranslator::new(family))
        }
        Family::Min | Family::Max | Family::Sum | Family::Average => {
            Arc::new(MathTranslator::new(family))
        }
        Family::First
        | Family::FirstOrDefault
        | Family::Last
        | Family::LastOrDefault
        | Family::Single
        | Family::SingleOrDefault
        | Family::ElementAt
        | Family::ElementAtOrDefault => Arc::new(SingleEntryTranslator::new(family)),
        Family::Contains => Arc::new(ContainsTranslator),
        Family::SequenceEqual => Arc::new(SequenceEqualTranslator),
        _ => return None,
    };
    Some(translator)
}

/// A terminal call taken apart: translated source, operator-specific
/// arguments and the cancellation signal.
pub(crate) struct TerminalCall<'a> {
    call: &'a Call,
    source: &'a TranslatedQueryable,
    rest: &'a [Expr],
    cancel: CancellationSignal,
}

impl<'a> TerminalCall<'a> {
    /// `None` unless the source argument is translated.
    pub fn split(cx: &TranslateContext<'_>, call: &'a Call, args: &'a [Expr]) -> Option<Self> {
        if !cx.is_candidate(0) {
            return None;
        }
        let (first, tail) = args.split_first()?;
        let source = first.as_translated()?;
        let rest = match tail.split_last() {
            Some((last, rest)) if last.as_cancellation().is_some() => rest,
            _ => tail,
        };
        Some(Self {
            call,
            source,
            rest,
            cancel: cx.cancellation(args),
        })
    }

    pub fn source(&self) -> &TranslatedQueryable {
        self.source
    }

    pub fn adapter(&self) -> &Arc<dyn QueryAdapter> {
        self.source.adapter()
    }

    pub fn element(&self) -> &TypeToken {
        self.source.element_type()
    }

    pub fn strategy(&self) -> Arc<dyn ElementStrategy> {
        DispatchCache::global().element(self.element())
    }

    pub fn query(&self) -> Result<NativeQuery> {
        self.source.query()
    }

    pub fn cancel(&self) -> CancellationSignal {
        self.cancel.clone()
    }

    /// Operator-specific arguments.
    pub fn rest(&self) -> &[Expr] {
        self.rest
    }

    /// Awaited result type of the call.
    pub fn result_type(&self) -> TypeToken {
        awaited(self.call.ty().clone())
    }

    /// The lambda at `index` of the specific arguments, made native, if its
    /// shape satisfies `accept`.
    pub fn lambda(&self, index: usize, accept: fn(LambdaShape) -> bool) -> Option<Lambda> {
        let lambda = self.rest.get(index)?.as_lambda()?;
        if !accept(classify(lambda)) {
            debug!(
                operator = %self.call.operator(),
                shape = ?classify(lambda),
                "unexpected lambda shape"
            );
            return None;
        }
        native_lambda(lambda, self.call.operator().callback)
    }

    /// Optional single lambda argument.
    ///
    /// `Some(None)` when there is none, `None` when one exists but cannot be
    /// made native.
    pub fn optional_lambda(&self, accept: fn(LambdaShape) -> bool) -> Option<Option<Lambda>> {
        match self.rest.first() {
            None => Some(None),
            Some(_) => self.lambda(0, accept).map(Some),
        }
    }

    /// A plain constant argument.
    pub fn value(&self, index: usize) -> Option<Value> {
        self.rest.get(index)?.as_value().cloned()
    }

    pub fn comparer(&self) -> Option<Comparer> {
        self.rest.iter().find_map(|arg| arg.as_comparer().cloned())
    }

    /// Wraps a hook future as the call's pending result.
    pub fn finish(&self, future: PendingFuture) -> Expr {
        let label = format!("{}:{}", self.adapter().name(), self.call.operator());
        debug!(
            operator = %self.call.operator(),
            native = %self.source.expression(),
            "terminal translated"
        );
        Expr::Constant(Constant::Pending(PendingResult::new(
            self.result_type(),
            &label,
            future,
        )))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::adapter::{Capabilities, MemoryProvider};
    use crate::config::AdapterOptions;
    use crate::expr::{BinaryOp, Param};
    use crate::operator::Operator;

    pub fn provider(options: AdapterOptions) -> Arc<MemoryProvider> {
        Arc::new(
            MemoryProvider::with_capabilities("ints", options, Capabilities::all())
                .with_table(TypeToken::Int32, (1..=5).map(Value::from).collect())
                .unwrap(),
        )
    }

    pub fn translated(provider: &Arc<MemoryProvider>) -> Expr {
        let adapter: Arc<dyn QueryAdapter> = provider.clone();
        let query = adapter.get_queryable(&TypeToken::Int32).unwrap();
        Expr::Constant(Constant::Translated(TranslatedQueryable::from_query(
            adapter, query,
        )))
    }

    pub fn greater_than(n: i32) -> Expr {
        let x = Param::new("x", TypeToken::Int32);
        Expr::lambda(
            vec![x.clone()],
            Expr::binary(BinaryOp::GreaterThan, Expr::param(&x), Expr::int32(n)).unwrap(),
        )
    }

    /// Resolves `operator` over `args` plus a trailing cancellation and runs
    /// `translator` on it.
    pub fn translate(
        translator: &dyn Translator,
        operator: Operator,
        mut args: Vec<Expr>,
    ) -> Option<Expr> {
        let cancel = CancellationSignal::new();
        args.push(Expr::cancellation(&cancel));
        let call = Call::resolve(operator, args.clone()).unwrap();
        let cx = TranslateContext {
            candidates: &[0],
            cancel: &cancel,
        };
        translator.translate(&cx, &call, &args).unwrap()
    }

    pub async fn resolve(expr: Expr) -> Value {
        match expr {
            Expr::Constant(Constant::Pending(pending)) => pending.resolve().await.unwrap(),
            other => panic!("Expected pending result, got {}", other),
        }
    }
}
