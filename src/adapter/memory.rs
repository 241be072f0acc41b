//! In-memory provider.
//!
//! Holds one table per element type and evaluates native expressions with
//! the in-memory algebra. Capabilities restrict which native operators its
//! query builder accepts, so it can stand in for providers of any strength.
//! Every evaluation and terminal hook is recorded in an operation log.
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::TryFutureExt;
use tracing::debug;

use crate::config::AdapterOptions;
use crate::error::{QueryError, Result};
use crate::expr::{Call, Comparer, Constant, Expr, Lambda, TypeToken, Value};
use crate::operator::{Family, Operator};
use crate::rewrite::evaluate::{Evaluator, RootResolver};
use crate::sequence::{CancellationSignal, ValueStream};

use super::{
    in_memory, AggregateRequest, NativeQuery, NativeRoot, QueryAdapter, QueryBuilder,
    SecondSequence,
};

/// What the provider can express natively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    families: Option<BTreeSet<Family>>,
    scalar_methods: bool,
    native_terminals: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl Capabilities {
    /// Every native operator, scalar methods and native terminals.
    pub fn all() -> Self {
        Self {
            families: None,
            scalar_methods: true,
            native_terminals: true,
        }
    }

    /// Only the listed chainable operators.
    pub fn only(families: &[Family]) -> Self {
        Self {
            families: Some(families.iter().copied().collect()),
            scalar_methods: true,
            native_terminals: true,
        }
    }

    pub fn with_scalar_methods(mut self, allowed: bool) -> Self {
        self.scalar_methods = allowed;
        self
    }

    /// When off, terminal hooks fall back to the in-memory defaults. Terminals
    /// outside [`Capabilities::only`] always do.
    pub fn with_native_terminals(mut self, allowed: bool) -> Self {
        self.native_terminals = allowed;
        self
    }

    pub fn supports(&self, family: Family) -> bool {
        self.families
            .as_ref()
            .map_or(true, |families| families.contains(&family))
    }
}

#[derive(Debug)]
struct MemoryQueryBuilder {
    name: String,
    capabilities: Capabilities,
}

impl QueryBuilder for MemoryQueryBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, call: &Call) -> bool {
        if !self.capabilities.supports(call.operator().family) {
            return false;
        }
        self.capabilities.scalar_methods
            || !call
                .args()
                .iter()
                .any(|arg| arg.any_node(&mut |e| matches!(e, Expr::Method { .. })))
    }
}

struct Tables {
    name: String,
    rows: HashMap<TypeToken, Arc<[Value]>>,
}

impl RootResolver for Tables {
    fn rows(&self, root: &NativeRoot) -> Result<Arc<[Value]>> {
        if root.name() != self.name {
            return Err(QueryError::Provider(format!(
                "root '{}' does not belong to '{}'",
                root.name(),
                self.name
            )));
        }
        self.rows.get(root.element_type()).cloned().ok_or_else(|| {
            QueryError::Provider(format!("no table of {} in '{}'", root.element_type(), self.name))
        })
    }
}

pub struct MemoryProvider {
    name: String,
    options: AdapterOptions,
    capabilities: Capabilities,
    tables: Arc<Tables>,
    builder: Arc<MemoryQueryBuilder>,
    log: Mutex<Vec<String>>,
}

impl MemoryProvider {
    pub fn new(name: &str, options: AdapterOptions) -> Self {
        Self::with_capabilities(name, options, Capabilities::all())
    }

    pub fn with_capabilities(
        name: &str,
        options: AdapterOptions,
        capabilities: Capabilities,
    ) -> Self {
        Self {
            name: name.to_string(),
            options,
            capabilities: capabilities.clone(),
            tables: Arc::new(Tables {
                name: name.to_string(),
                rows: HashMap::new(),
            }),
            builder: Arc::new(MemoryQueryBuilder {
                name: name.to_string(),
                capabilities,
            }),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Adds (or replaces) the table for `element`.
    pub fn with_table(mut self, element: TypeToken, rows: Vec<Value>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|row| !row.conforms_to(&element)) {
            return Err(QueryError::invalid(format!(
                "row {} does not conform to {}",
                bad, element
            )));
        }
        let mut tables = HashMap::new();
        for (ty, existing) in self.tables.rows.iter() {
            tables.insert(ty.clone(), existing.clone());
        }
        tables.insert(element, Arc::from(rows));
        self.tables = Arc::new(Tables {
            name: self.name.clone(),
            rows: tables,
        });
        Ok(self)
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Entries such as `evaluate`, `native:Sum` or `in-memory:Count`.
    pub fn operation_log(&self) -> Vec<String> {
        self.log
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }

    pub fn clear_log(&self) {
        if let Ok(mut log) = self.log.lock() {
            log.clear();
        }
    }

    fn record(&self, entry: String) {
        debug!(provider = %self.name, %entry, "provider operation");
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }

    fn evaluator(&self, cancel: &CancellationSignal) -> Evaluator {
        Evaluator::with_roots(cancel.clone(), self.tables.clone())
    }

    /// Whether a terminal runs natively; records which path was taken.
    fn route(&self, family: Family) -> bool {
        if self.capabilities.native_terminals && self.capabilities.supports(family) {
            self.record(format!("native:{}", family));
            true
        } else {
            self.record(format!("in-memory:{}", family));
            false
        }
    }

    /// Runs a native terminal call over `query`.
    async fn native(
        &self,
        family: Family,
        query: &NativeQuery,
        extra: Vec<Expr>,
        cancel: &CancellationSignal,
    ) -> Result<Value> {
        let mut args = vec![query.expression().clone()];
        args.extend(extra);
        let call = Call::resolve(Operator::sync(family), args)?;
        self.evaluator(cancel)
            .eval(&Expr::Call(call))
            .await?
            .into_value()
    }

    fn lambda_args(lambda: Option<Lambda>) -> Vec<Expr> {
        lambda.map(Expr::Lambda).into_iter().collect()
    }

    fn comparer_args(comparer: Option<Comparer>) -> Vec<Expr> {
        comparer.map(Expr::comparer).into_iter().collect()
    }
}

impl fmt::Debug for MemoryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryProvider")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("capabilities", &self.capabilities)
            .field("tables", &self.tables.rows.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl QueryAdapter for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    fn get_queryable(&self, element: &TypeToken) -> Result<NativeQuery> {
        if !self.tables.rows.contains_key(element) {
            return Err(QueryError::Provider(format!(
                "no table of {} in '{}'",
                element, self.name
            )));
        }
        let root = Expr::Constant(Constant::Root(NativeRoot::new(&self.name, element.clone())));
        NativeQuery::new(element.clone(), root, self.builder.clone())
    }

    fn evaluate_async(
        &self,
        query: &NativeQuery,
        cancel: &CancellationSignal,
    ) -> Result<ValueStream> {
        self.record("evaluate".to_string());
        let evaluator = self.evaluator(cancel);
        let expression = query.expression().clone();
        let rows = async move { evaluator.eval_values(&expression).await }
            .map_ok(|rows| stream::iter(rows.into_iter().map(Ok::<Value, QueryError>)));
        Ok(stream::once(rows).try_flatten().boxed())
    }

    async fn aggregate(
        &self,
        query: NativeQuery,
        request: AggregateRequest,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        if !self.route(Family::Aggregate) {
            return in_memory::aggregate(self, &query, &request, &cancel).await;
        }
        let mut extra = Vec::new();
        if let Some(seed) = request.seed {
            let ty = request
                .accumulator
                .params()
                .first()
                .map(|p| p.ty().clone())
                .unwrap_or(TypeToken::Unit);
            extra.push(Expr::constant(seed, ty)?);
        }
        extra.push(Expr::Lambda(request.accumulator));
        extra.extend(Self::lambda_args(request.result_selector));
        self.native(Family::Aggregate, &query, extra, &cancel).await
    }

    async fn any(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<bool> {
        if !self.route(Family::Any) {
            return in_memory::any(self, &query, predicate.as_ref(), &cancel).await;
        }
        self.native(Family::Any, &query, Self::lambda_args(predicate), &cancel)
            .await?
            .as_bool()
    }

    async fn all(
        &self,
        query: NativeQuery,
        predicate: Lambda,
        cancel: CancellationSignal,
    ) -> Result<bool> {
        if !self.route(Family::All) {
            let negated = predicate.negated()?;
            return Ok(!in_memory::any(self, &query, Some(&negated), &cancel).await?);
        }
        self.native(Family::All, &query, vec![Expr::Lambda(predicate)], &cancel)
            .await?
            .as_bool()
    }

    async fn count(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<i32> {
        if !self.route(Family::Count) {
            return in_memory::count(self, &query, predicate.as_ref(), &cancel).await;
        }
        match self
            .native(Family::Count, &query, Self::lambda_args(predicate), &cancel)
            .await?
        {
            Value::Int32(n) => Ok(n),
            other => Err(QueryError::Provider(format!("Count returned {}", other))),
        }
    }

    async fn long_count(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<i64> {
        if !self.route(Family::LongCount) {
            return in_memory::long_count(self, &query, predicate.as_ref(), &cancel).await;
        }
        self.native(Family::LongCount, &query, Self::lambda_args(predicate), &cancel)
            .await?
            .as_i64()
    }

    async fn min(
        &self,
        query: NativeQuery,
        selector: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        if !self.route(Family::Min) {
            return in_memory::min(self, &query, selector.as_ref(), &cancel).await;
        }
        self.native(Family::Min, &query, Self::lambda_args(selector), &cancel)
            .await
    }

    async fn max(
        &self,
        query: NativeQuery,
        selector: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        if !self.route(Family::Max) {
            return in_memory::max(self, &query, selector.as_ref(), &cancel).await;
        }
        self.native(Family::Max, &query, Self::lambda_args(selector), &cancel)
            .await
    }

    async fn sum(
        &self,
        query: NativeQuery,
        selector: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        if !self.route(Family::Sum) {
            return in_memory::sum(self, &query, selector.as_ref(), &cancel).await;
        }
        self.native(Family::Sum, &query, Self::lambda_args(selector), &cancel)
            .await
    }

    async fn average(
        &self,
        query: NativeQuery,
        selector: Option<Lambda>,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        if !self.route(Family::Average) {
            return in_memory::average(self, &query, selector.as_ref(), &cancel).await;
        }
        self.native(Family::Average, &query, Self::lambda_args(selector), &cancel)
            .await
    }

    async fn first(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        let family = if or_default {
            Family::FirstOrDefault
        } else {
            Family::First
        };
        if !self.route(family) {
            return in_memory::first(self, &query, predicate.as_ref(), or_default, &cancel).await;
        }
        self.native(family, &query, Self::lambda_args(predicate), &cancel)
            .await
    }

    async fn last(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        let family = if or_default {
            Family::LastOrDefault
        } else {
            Family::Last
        };
        if !self.route(family) {
            return in_memory::last(self, &query, predicate.as_ref(), or_default, &cancel).await;
        }
        self.native(family, &query, Self::lambda_args(predicate), &cancel)
            .await
    }

    async fn single(
        &self,
        query: NativeQuery,
        predicate: Option<Lambda>,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        let family = if or_default {
            Family::SingleOrDefault
        } else {
            Family::Single
        };
        if !self.route(family) {
            return in_memory::single(self, &query, predicate.as_ref(), or_default, &cancel).await;
        }
        self.native(family, &query, Self::lambda_args(predicate), &cancel)
            .await
    }

    async fn element_at(
        &self,
        query: NativeQuery,
        index: i32,
        or_default: bool,
        cancel: CancellationSignal,
    ) -> Result<Value> {
        let family = if or_default {
            Family::ElementAtOrDefault
        } else {
            Family::ElementAt
        };
        if !self.route(family) {
            return in_memory::element_at(self, &query, index, or_default, &cancel).await;
        }
        self.native(family, &query, vec![Expr::int32(index)], &cancel)
            .await
    }

    async fn contains(
        &self,
        query: NativeQuery,
        value: Value,
        comparer: Option<Comparer>,
        cancel: CancellationSignal,
    ) -> Result<bool> {
        if !self.route(Family::Contains) {
            return in_memory::contains(self, &query, &value, comparer.as_ref(), &cancel).await;
        }
        let mut extra = vec![Expr::constant(value, query.element_type().clone())?];
        extra.extend(Self::comparer_args(comparer));
        self.native(Family::Contains, &query, extra, &cancel)
            .await?
            .as_bool()
    }

    async fn sequence_equal(
        &self,
        query: NativeQuery,
        second: SecondSequence,
        comparer: Option<Comparer>,
        cancel: CancellationSignal,
    ) -> Result<bool> {
        if !self.route(Family::SequenceEqual) {
            return in_memory::sequence_equal(self, &query, &second, comparer.as_ref(), &cancel)
                .await;
        }
        let second = match second {
            SecondSequence::Query(other) => other.expression().clone(),
            SecondSequence::Sequence(seq) => {
                let element = seq.element_type().clone();
                let rows = seq.collect(&cancel).await?;
                Expr::constant(Value::list(rows), TypeToken::enumerable(element))?
            }
        };
        let mut extra = vec![second];
        extra.extend(Self::comparer_args(comparer));
        self.native(Family::SequenceEqual, &query, extra, &cancel)
            .await?
            .as_bool()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Param};

    fn provider(options: AdapterOptions, capabilities: Capabilities) -> MemoryProvider {
        MemoryProvider::with_capabilities("test", options, capabilities)
            .with_table(TypeToken::Int32, (1..=5).map(Value::from).collect())
            .unwrap()
    }

    fn greater_than(n: i32) -> Lambda {
        let x = Param::new("x", TypeToken::Int32);
        Lambda::new(
            vec![x.clone()],
            Expr::binary(BinaryOp::GreaterThan, Expr::param(&x), Expr::int32(n)).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_evaluate_root_query() {
        let provider = provider(AdapterOptions::default(), Capabilities::all());
        let query = provider.get_queryable(&TypeToken::Int32).unwrap();
        let rows: Vec<Value> = provider
            .evaluate_async(&query, &CancellationSignal::new())
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(provider.operation_log(), vec!["evaluate"]);
    }

    #[tokio::test]
    async fn test_native_count_with_predicate() {
        let provider = provider(AdapterOptions::default(), Capabilities::all());
        let query = provider.get_queryable(&TypeToken::Int32).unwrap();
        let count = provider
            .count(query, Some(greater_than(3)), CancellationSignal::new())
            .await
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(provider.operation_log(), vec!["native:Count"]);
    }

    #[tokio::test]
    async fn test_in_memory_hook_respects_options() {
        let provider = provider(
            AdapterOptions::default(),
            Capabilities::all().with_native_terminals(false),
        );
        let query = provider.get_queryable(&TypeToken::Int32).unwrap();
        let err = provider
            .any(query, None, CancellationSignal::new())
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::InMemoryEvaluationDisabled { .. }));
    }

    #[tokio::test]
    async fn test_in_memory_all_via_negated_any() {
        let provider = provider(
            AdapterOptions::default().with_in_memory_evaluation(true),
            Capabilities::all().with_native_terminals(false),
        );
        let query = provider.get_queryable(&TypeToken::Int32).unwrap();
        let all = provider
            .all(query, greater_than(0), CancellationSignal::new())
            .await
            .unwrap();
        assert!(all);
        assert_eq!(
            provider.operation_log(),
            vec!["in-memory:All", "evaluate"]
        );
    }

    #[test]
    fn test_unknown_table() {
        let provider = provider(AdapterOptions::default(), Capabilities::all());
        assert!(provider.get_queryable(&TypeToken::String).is_err());
    }

    #[test]
    fn test_rows_must_conform() {
        let err = MemoryProvider::new("bad", AdapterOptions::default())
            .with_table(TypeToken::Int32, vec![Value::from("x")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_builder_capabilities() {
        let builder = MemoryQueryBuilder {
            name: "t".into(),
            capabilities: Capabilities::only(&[Family::Where]).with_scalar_methods(false),
        };
        let root = Expr::Constant(Constant::Root(NativeRoot::new("t", TypeToken::Int32)));
        let call = Call::resolve(
            Operator::sync(Family::Where),
            vec![root.clone(), Expr::Lambda(greater_than(1))],
        )
        .unwrap();
        assert!(builder.accepts(&call));
        let take = Call::resolve(Operator::sync(Family::Take), vec![root, Expr::int32(1)]).unwrap();
        assert!(!builder.accepts(&take));
    }
}
