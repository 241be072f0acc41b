//! The rewrite walker and the execution entry points.
//!
//! A pass visits the tree post-order, arguments left to right. Abstract
//! sources become translated queryables; every call with at least one
//! translated argument goes to the registry, and whatever the registry
//! cannot take goes to [`fallback`]. Lambda bodies are walked but never
//! translated: to the provider they are opaque function values.
pub mod evaluate;
pub mod fallback;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::adapter::same_adapter;
use crate::dispatch::DispatchCache;
use crate::error::{QueryError, Result};
use crate::expr::{Call, Constant, Expr, Lambda, Value};
use crate::sequence::algebra::Operand;
use crate::sequence::{AsyncSequence, CancellationSignal};
use crate::translate::{TranslateContext, TranslatedQueryable, TranslatorRegistry};

use evaluate::Evaluator;
use fallback::Refusal;

/// Outcome of executing a query expression.
#[derive(Debug, Clone)]
pub enum QueryResult {
    Scalar(Value),
    Sequence(AsyncSequence),
}

/// Rewrites and runs query expressions against one translator registry.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    registry: Arc<TranslatorRegistry>,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    /// Engine over the process-wide registry.
    pub fn new() -> Self {
        Self::with_registry(TranslatorRegistry::global())
    }

    pub fn with_registry(registry: Arc<TranslatorRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TranslatorRegistry> {
        &self.registry
    }

    pub fn rewrite(&self, expr: &Expr) -> Result<Expr> {
        self.rewrite_with(expr, &CancellationSignal::new())
    }

    /// Rewrites `expr`; terminal translators capture `cancel` for their
    /// adapter calls unless the call carries its own signal.
    pub fn rewrite_with(&self, expr: &Expr, cancel: &CancellationSignal) -> Result<Expr> {
        let walker = Rewriter {
            registry: &self.registry,
            cancel,
        };
        walker.rewrite(expr, false)
    }

    pub async fn execute(&self, expr: &Expr, cancel: CancellationSignal) -> Result<QueryResult> {
        let rewritten = self.rewrite_with(expr, &cancel)?;
        debug!(rewritten = %rewritten, "executing");
        let evaluator = Evaluator::new(cancel);
        match evaluator.eval(&rewritten).await? {
            Operand::Value(value) => Ok(QueryResult::Scalar(value)),
            Operand::Sequence(seq) => Ok(QueryResult::Sequence(seq)),
            Operand::Ordered(ordered) => Ok(QueryResult::Sequence(AsyncSequence::from_values(
                ordered.element_type().clone(),
                ordered.materialize()?,
            ))),
            _ => Err(QueryError::invalid(format!(
                "{} does not evaluate to a value or a sequence",
                rewritten
            ))),
        }
    }

    /// Executes and collects; a list scalar (from `ToList`) is unpacked.
    pub async fn execute_to_vec(
        &self,
        expr: &Expr,
        cancel: CancellationSignal,
    ) -> Result<Vec<Value>> {
        match self.execute(expr, cancel.clone()).await? {
            QueryResult::Sequence(seq) => seq.collect(&cancel).await,
            QueryResult::Scalar(value) => Ok(value.elements()?.to_vec()),
        }
    }
}

struct Rewriter<'a> {
    registry: &'a TranslatorRegistry,
    cancel: &'a CancellationSignal,
}

impl Rewriter<'_> {
    fn rewrite(&self, expr: &Expr, in_lambda: bool) -> Result<Expr> {
        match expr {
            Expr::Constant(Constant::Source(source)) if !in_lambda => {
                let adapter = source.adapter();
                let query = DispatchCache::global()
                    .element(source.element_type())
                    .get_queryable(adapter)?;
                trace!(adapter = adapter.name(), root = %query.expression(), "source translated");
                Ok(Expr::Constant(Constant::Translated(
                    TranslatedQueryable::from_query(adapter.clone(), query),
                )))
            }
            Expr::Lambda(lambda) => {
                let body = self.rewrite(lambda.body(), true)?;
                Ok(Expr::Lambda(Lambda::new(lambda.params().to_vec(), body)))
            }
            Expr::Call(call) => self.rewrite_call(call, in_lambda),
            other => Ok(other.clone()),
        }
    }

    fn rewrite_call(&self, call: &Call, in_lambda: bool) -> Result<Expr> {
        self.cancel.check()?;
        let mut args = Vec::with_capacity(call.args().len());
        for arg in call.args() {
            args.push(self.rewrite(arg, in_lambda)?);
        }
        if in_lambda {
            return Ok(Expr::Call(call.rebuild(args)));
        }

        let candidates: Vec<usize> = call
            .args()
            .iter()
            .zip(&args)
            .enumerate()
            .filter(|(_, (original, rewritten))| {
                original.ty().is_async_sequence() && rewritten.as_translated().is_some()
            })
            .map(|(i, _)| i)
            .collect();
        if candidates.is_empty() {
            return Ok(Expr::Call(call.rebuild(args)));
        }
        check_single_adapter(call, &args, &candidates)?;

        let operator = call.operator();
        let Some(translator) = self.registry.get(&operator) else {
            debug!(operator = %operator, "no translator registered");
            return fallback::resolve(call, args, &candidates, Refusal::NoTranslator);
        };
        let cx = TranslateContext {
            candidates: &candidates,
            cancel: self.cancel,
        };
        match translator.translate(&cx, call, &args)? {
            Some(translated) => {
                trace!(operator = %operator, translator = translator.name(), "call translated");
                Ok(translated)
            }
            None => {
                debug!(operator = %operator, translator = translator.name(), "translator refused");
                fallback::resolve(call, args, &candidates, Refusal::Refused(translator.kind()))
            }
        }
    }
}

fn check_single_adapter(call: &Call, args: &[Expr], candidates: &[usize]) -> Result<()> {
    let mut translated = candidates.iter().filter_map(|&i| args[i].as_translated());
    let Some(first) = translated.next() else {
        return Ok(());
    };
    for other in translated {
        if !same_adapter(first.adapter(), other.adapter()) {
            debug!(operator = %call.operator(), "cross-adapter combination");
            return Err(QueryError::CrossAdapter {
                left: first.adapter().name().to_string(),
                right: other.adapter().name().to_string(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::adapter::{Capabilities, MemoryProvider, QueryAdapter};
    use crate::config::AdapterOptions;
    use crate::expr::{AsyncQuery, BinaryOp, Param, ScalarMethod, TypeToken};
    use crate::operator::{Family, Operator};

    fn ints(options: AdapterOptions, capabilities: Capabilities) -> Arc<MemoryProvider> {
        Arc::new(
            MemoryProvider::with_capabilities("ints", options, capabilities)
                .with_table(TypeToken::Int32, (1..=5).map(Value::from).collect())
                .unwrap(),
        )
    }

    fn query(provider: &Arc<MemoryProvider>) -> AsyncQuery {
        let adapter: Arc<dyn QueryAdapter> = provider.clone();
        AsyncQuery::from_adapter(adapter, TypeToken::Int32)
    }

    fn greater_than(n: i32) -> Expr {
        let x = Param::new("x", TypeToken::Int32);
        Expr::lambda(
            vec![x.clone()],
            Expr::binary(BinaryOp::GreaterThan, Expr::param(&x), Expr::int32(n)).unwrap(),
        )
    }

    fn text_length() -> Expr {
        let x = Param::new("x", TypeToken::Int32);
        let text = Expr::method(ScalarMethod::ToString, vec![Expr::param(&x)]).unwrap();
        Expr::lambda(
            vec![x],
            Expr::method(ScalarMethod::Length, vec![text]).unwrap(),
        )
    }

    fn doubled() -> Expr {
        let x = Param::new("x", TypeToken::Int32);
        Expr::lambda(
            vec![x.clone()],
            Expr::binary(BinaryOp::Multiply, Expr::param(&x), Expr::int32(2)).unwrap(),
        )
    }

    async fn scalar(engine: &QueryEngine, expr: &Expr) -> Result<Value> {
        match engine.execute(expr, CancellationSignal::new()).await? {
            QueryResult::Scalar(value) => Ok(value),
            QueryResult::Sequence(seq) => panic!("Expected a scalar, got {:?}", seq),
        }
    }

    #[tokio::test]
    async fn test_where_sum_is_pushed_down() {
        let provider = ints(
            AdapterOptions::default(),
            Capabilities::only(&[Family::Where, Family::Sum]),
        );
        let expr = query(&provider)
            .where_(greater_than(2))
            .unwrap()
            .sum()
            .unwrap();
        let engine = QueryEngine::new();
        assert_eq!(scalar(&engine, &expr).await.unwrap(), Value::Int32(12));
        assert_eq!(provider.operation_log(), vec!["native:Sum"]);
    }

    #[tokio::test]
    async fn test_where_is_folded_into_native_tree() {
        let provider = ints(AdapterOptions::default(), Capabilities::all());
        let expr = query(&provider)
            .where_(greater_than(2))
            .unwrap()
            .into_expr();
        let rewritten = QueryEngine::new().rewrite(&expr).unwrap();
        let translated = rewritten.as_translated().unwrap();
        assert_eq!(
            translated.expression().to_string(),
            "Queryable.Where(ints<i32>, x => (x > 2))"
        );
    }

    #[tokio::test]
    async fn test_select_falls_back_when_allowed() {
        let provider = ints(
            AdapterOptions::default().with_implicit_post_processing(true),
            Capabilities::all(),
        );
        let mut registry = TranslatorRegistry::with_defaults();
        registry.unregister(&Operator::asynchronous(Family::Select));
        let engine = QueryEngine::with_registry(Arc::new(registry));
        let expr = query(&provider).select(text_length()).unwrap().into_expr();
        let values = engine
            .execute_to_vec(&expr, CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(values, vec![Value::Int32(1); 5]);
        assert_eq!(provider.operation_log(), vec!["evaluate"]);
    }

    #[tokio::test]
    async fn test_fallback_rejected_without_touching_the_adapter() {
        let provider = ints(AdapterOptions::default(), Capabilities::all());
        let mut registry = TranslatorRegistry::with_defaults();
        registry.unregister(&Operator::asynchronous(Family::Select));
        let engine = QueryEngine::with_registry(Arc::new(registry));
        let expr = query(&provider).select(text_length()).unwrap().into_expr();
        let err = engine
            .execute(&expr, CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::QueryNotSupported { .. }));
        assert!(provider.operation_log().is_empty());
    }

    #[tokio::test]
    async fn test_default_translator_refusal_needs_default_flag() {
        let options = AdapterOptions::default().with_implicit_post_processing(true);
        let provider = ints(options, Capabilities::only(&[Family::Where, Family::Sum]));
        let expr = query(&provider).select(doubled()).unwrap().into_expr();
        let err = QueryEngine::new()
            .execute(&expr, CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(err.is_policy_violation());

        let provider = ints(
            AdapterOptions::permissive(),
            Capabilities::only(&[Family::Where, Family::Sum]),
        );
        let expr = query(&provider).select(doubled()).unwrap().into_expr();
        let values = QueryEngine::new()
            .execute_to_vec(&expr, CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(values, (1..=5).map(|v| Value::Int32(v * 2)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_average_is_floating() {
        let provider = ints(AdapterOptions::default(), Capabilities::all());
        let expr = query(&provider).average().unwrap();
        assert_eq!(
            scalar(&QueryEngine::new(), &expr).await.unwrap(),
            Value::Float64(3.0)
        );
    }

    #[tokio::test]
    async fn test_translated_matches_in_memory() {
        let provider = ints(AdapterOptions::default(), Capabilities::all());
        let translated = query(&provider)
            .where_(greater_than(1))
            .unwrap()
            .order_by_descending(doubled())
            .unwrap()
            .skip(1)
            .unwrap()
            .take(2)
            .unwrap()
            .into_expr();
        let plain = AsyncQuery::from_values(TypeToken::Int32, (1..=5).map(Value::from).collect())
            .where_(greater_than(1))
            .unwrap()
            .order_by_descending(doubled())
            .unwrap()
            .skip(1)
            .unwrap()
            .take(2)
            .unwrap()
            .into_expr();
        let engine = QueryEngine::new();
        let native = engine
            .execute_to_vec(&translated, CancellationSignal::new())
            .await
            .unwrap();
        let memory = engine
            .execute_to_vec(&plain, CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(native, memory);
        assert_eq!(native, vec![Value::Int32(4), Value::Int32(3)]);
    }

    type Build = Box<dyn Fn(AsyncQuery) -> Result<Expr>>;

    fn case(
        name: &'static str,
        build: impl Fn(AsyncQuery) -> Result<Expr> + 'static,
    ) -> (&'static str, Build) {
        (name, Box::new(build))
    }

    fn compare(op: BinaryOp, n: i32) -> Expr {
        let x = Param::new("x", TypeToken::Int32);
        Expr::lambda(
            vec![x.clone()],
            Expr::binary(op, Expr::param(&x), Expr::int32(n)).unwrap(),
        )
    }

    fn add() -> Expr {
        let acc = Param::new("acc", TypeToken::Int32);
        let x = Param::new("x", TypeToken::Int32);
        Expr::lambda(
            vec![acc.clone(), x.clone()],
            Expr::binary(BinaryOp::Add, Expr::param(&acc), Expr::param(&x)).unwrap(),
        )
    }

    fn negated() -> Expr {
        let x = Param::new("x", TypeToken::Int32);
        Expr::lambda(
            vec![x.clone()],
            Expr::binary(BinaryOp::Subtract, Expr::int32(0), Expr::param(&x)).unwrap(),
        )
    }

    fn chain(query: AsyncQuery, family: Family, args: Vec<Expr>) -> Result<Expr> {
        Ok(query.chain(Operator::asynchronous(family), args)?.into_expr())
    }

    fn finish(query: AsyncQuery, family: Family, args: Vec<Expr>) -> Result<Expr> {
        query.terminal(Operator::asynchronous(family), args)
    }

    async fn outcome(expr: &Expr) -> Result<Vec<Value>> {
        let cancel = CancellationSignal::new();
        match QueryEngine::new().execute(expr, cancel.clone()).await? {
            QueryResult::Scalar(value) => Ok(vec![value]),
            QueryResult::Sequence(seq) => seq.collect(&cancel).await,
        }
    }

    fn operator_cases() -> Vec<(&'static str, Build)> {
        vec![
            case("TakeWhile", |q| {
                chain(q, Family::TakeWhile, vec![compare(BinaryOp::LessThan, 3)])
            }),
            case("SkipWhile", |q| {
                chain(q, Family::SkipWhile, vec![compare(BinaryOp::LessThan, 3)])
            }),
            case("Select", |q| chain(q, Family::Select, vec![doubled()])),
            case("Distinct", |q| chain(q, Family::Distinct, vec![])),
            case("Reverse", |q| chain(q, Family::Reverse, vec![])),
            case("Append", |q| chain(q, Family::Append, vec![Expr::int32(9)])),
            case("Prepend", |q| chain(q, Family::Prepend, vec![Expr::int32(0)])),
            case("DefaultIfEmpty", |q| chain(q, Family::DefaultIfEmpty, vec![])),
            case("Concat", |q| {
                let other = q.clone().skip(3)?.into_expr();
                chain(q, Family::Concat, vec![other])
            }),
            case("Union", |q| {
                let other = q.clone().skip(2)?.into_expr();
                chain(q, Family::Union, vec![other])
            }),
            case("Intersect", |q| {
                let other = q.clone().skip(2)?.into_expr();
                chain(q, Family::Intersect, vec![other])
            }),
            case("Except", |q| {
                let other = q.clone().skip(2)?.into_expr();
                chain(q, Family::Except, vec![other])
            }),
            case("OrderBy.ThenBy", |q| {
                let parity = compare(BinaryOp::Modulo, 2);
                Ok(q.order_by(parity)?.then_by(negated())?.into_expr())
            }),
            case("Aggregate", |q| finish(q, Family::Aggregate, vec![add()])),
            case("Aggregate(seed)", |q| {
                finish(q, Family::Aggregate, vec![Expr::int32(100), add()])
            }),
            case("Any", |q| finish(q, Family::Any, vec![greater_than(4)])),
            case("All", |q| finish(q, Family::All, vec![greater_than(0)])),
            case("Count", |q| finish(q, Family::Count, vec![greater_than(2)])),
            case("LongCount", |q| finish(q, Family::LongCount, vec![])),
            case("Min", |q| finish(q, Family::Min, vec![])),
            case("Max", |q| finish(q, Family::Max, vec![doubled()])),
            case("First", |q| finish(q, Family::First, vec![])),
            case("LastOrDefault", |q| {
                finish(q, Family::LastOrDefault, vec![greater_than(10)])
            }),
            case("SingleOrDefault", |q| {
                finish(q, Family::SingleOrDefault, vec![greater_than(4)])
            }),
            case("ElementAt", |q| finish(q, Family::ElementAt, vec![Expr::int32(2)])),
            case("Contains", |q| finish(q, Family::Contains, vec![Expr::int32(4)])),
            case("SequenceEqual", |q| {
                let other = q.clone().into_expr();
                finish(q, Family::SequenceEqual, vec![other])
            }),
        ]
    }

    #[tokio::test]
    async fn test_every_translated_operator_matches_in_memory() {
        let rows: Vec<Value> = (1..=5).map(Value::from).collect();
        for (name, build) in operator_cases() {
            let provider = ints(AdapterOptions::default(), Capabilities::all());
            let native = outcome(&build(query(&provider)).unwrap()).await;
            let plain = AsyncQuery::from_values(TypeToken::Int32, rows.clone());
            let memory = outcome(&build(plain).unwrap()).await;
            assert!(native.is_ok(), "{} failed natively: {:?}", name, native);
            assert_eq!(native, memory, "{} differs from in-memory evaluation", name);
            assert!(
                !provider.operation_log().iter().any(|op| op == "evaluate"),
                "{} was evaluated in memory",
                name
            );
        }
    }

    #[tokio::test]
    async fn test_empty_table_edge_cases() {
        let cases: Vec<((&'static str, Build), Result<Vec<Value>>)> = vec![
            (case("Average", |q| q.average()), Err(QueryError::NoElements)),
            (case("Sum", |q| q.sum()), Ok(vec![Value::Int32(0)])),
            (case("Min", |q| q.min()), Err(QueryError::NoElements)),
            (
                case("ElementAt", |q| {
                    finish(q, Family::ElementAt, vec![Expr::int32(-1)])
                }),
                Err(QueryError::IndexOutOfRange(-1)),
            ),
            (
                case("ElementAtOrDefault", |q| {
                    finish(q, Family::ElementAtOrDefault, vec![Expr::int32(-1)])
                }),
                Ok(vec![Value::Int32(0)]),
            ),
        ];
        for ((name, build), expected) in cases {
            let provider = Arc::new(
                MemoryProvider::new("empty", AdapterOptions::default())
                    .with_table(TypeToken::Int32, vec![])
                    .unwrap(),
            );
            let native = outcome(&build(query(&provider)).unwrap()).await;
            let plain = AsyncQuery::from_values(TypeToken::Int32, vec![]);
            let memory = outcome(&build(plain).unwrap()).await;
            assert_eq!(native, expected, "{} on an empty table", name);
            assert_eq!(native, memory, "{} differs from in-memory evaluation", name);
        }
    }

    #[tokio::test]
    async fn test_cross_adapter_concat_fails() {
        let left = ints(AdapterOptions::permissive(), Capabilities::all());
        let right = ints(AdapterOptions::permissive(), Capabilities::all());
        let expr = query(&left).concat(query(&right).into_expr()).unwrap().into_expr();
        let err = QueryEngine::new().rewrite(&expr).unwrap_err();
        assert!(matches!(err, QueryError::CrossAdapter { .. }));
    }

    #[tokio::test]
    async fn test_cross_adapter_sequence_equal_fails() {
        let left = ints(AdapterOptions::permissive(), Capabilities::all());
        let right = ints(AdapterOptions::permissive(), Capabilities::all());
        let expr = query(&left)
            .sequence_equal(query(&right).into_expr())
            .unwrap();
        let err = QueryEngine::new().rewrite(&expr).unwrap_err();
        assert!(matches!(err, QueryError::CrossAdapter { .. }));
    }

    #[tokio::test]
    async fn test_to_list_needs_no_permission() {
        let provider = ints(AdapterOptions::default(), Capabilities::all());
        let expr = query(&provider).where_(greater_than(3)).unwrap().to_list().unwrap();
        let values = QueryEngine::new()
            .execute_to_vec(&expr, CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(values, vec![Value::Int32(4), Value::Int32(5)]);
    }

    #[tokio::test]
    async fn test_group_by_key_projection_stays_native() {
        let provider = ints(AdapterOptions::default(), Capabilities::all());
        let x = Param::new("x", TypeToken::Int32);
        let parity = Expr::lambda(
            vec![x.clone()],
            Expr::binary(BinaryOp::Modulo, Expr::param(&x), Expr::int32(2)).unwrap(),
        );
        let g = Param::new(
            "g",
            TypeToken::grouping(false, TypeToken::Int32, TypeToken::Int32),
        );
        let key = Expr::lambda(
            vec![g.clone()],
            Expr::member(Expr::param(&g), crate::expr::Member::Key).unwrap(),
        );
        let expr = query(&provider)
            .group_by(parity)
            .unwrap()
            .select(key)
            .unwrap()
            .into_expr();
        let engine = QueryEngine::new();
        assert!(engine.rewrite(&expr).unwrap().as_translated().is_some());
        let keys = engine
            .execute_to_vec(&expr, CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(keys, vec![Value::Int32(1), Value::Int32(0)]);
    }

    #[tokio::test]
    async fn test_cancelled_rewrite() {
        let provider = ints(AdapterOptions::default(), Capabilities::all());
        let expr = query(&provider).count().unwrap();
        let cancel = CancellationSignal::new();
        cancel.cancel();
        let err = QueryEngine::new().execute(&expr, cancel).await.unwrap_err();
        assert_eq!(err, QueryError::Cancelled);
    }
}
