use crate::error::Result;
use crate::expr::{Call, Expr};
use crate::operator::Family;

use super::super::callback::LambdaShape;
use super::super::{TranslateContext, Translator, TranslatorKind};
use super::TerminalCall;

fn is_predicate(shape: LambdaShape) -> bool {
    shape == LambdaShape::Predicate
}

/// `Any`, `All`, `Count` and `LongCount`.
///
/// `All` needs a predicate; the adapter answers it as `!Any(!p)` unless it
/// overrides the hook.
#[derive(Debug, Clone)]
pub struct PredicateTranslator {
    family: Family,
    name: String,
}

impl PredicateTranslator {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            name: format!("predicate:{}", family),
        }
    }
}

impl Translator for PredicateTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TranslatorKind {
        TranslatorKind::Specialized
    }

    fn translate(
        &self,
        cx: &TranslateContext<'_>,
        call: &Call,
        args: &[Expr],
    ) -> Result<Option<Expr>> {
        let Some(terminal) = TerminalCall::split(cx, call, args) else {
            return Ok(None);
        };
        let Some(predicate) = terminal.optional_lambda(is_predicate) else {
            return Ok(None);
        };
        let strategy = terminal.strategy();
        let adapter = terminal.adapter();
        let query = terminal.query()?;
        let cancel = terminal.cancel();
        let future = match self.family {
            Family::Any => strategy.any(adapter, query, predicate, cancel)?,
            Family::All => match predicate {
                Some(predicate) => strategy.all(adapter, query, predicate, cancel)?,
                None => return Ok(None),
            },
            Family::Count => strategy.count(adapter, query, predicate, false, cancel)?,
            Family::LongCount => strategy.count(adapter, query, predicate, true, cancel)?,
            _ => return Ok(None),
        };
        Ok(Some(terminal.finish(future)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::adapter::Capabilities;
    use crate::config::AdapterOptions;
    use crate::expr::Value;
    use crate::operator::Operator;

    #[tokio::test]
    async fn test_count_with_predicate() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &PredicateTranslator::new(Family::Count),
            Operator::asynchronous(Family::Count),
            vec![translated(&provider), greater_than(2)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Int32(3));
    }

    #[tokio::test]
    async fn test_long_count_without_predicate() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &PredicateTranslator::new(Family::LongCount),
            Operator::asynchronous(Family::LongCount),
            vec![translated(&provider)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Int64(5));
    }

    #[tokio::test]
    async fn test_all_goes_through_negated_any_in_memory() {
        let provider = std::sync::Arc::new(
            crate::adapter::MemoryProvider::with_capabilities(
                "ints",
                AdapterOptions::default().with_in_memory_evaluation(true),
                Capabilities::all().with_native_terminals(false),
            )
            .with_table(
                crate::expr::TypeToken::Int32,
                (1..=5).map(Value::from).collect(),
            )
            .unwrap(),
        );
        let out = translate(
            &PredicateTranslator::new(Family::All),
            Operator::asynchronous(Family::All),
            vec![translated(&provider), greater_than(0)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Bool(true));
        assert_eq!(provider.operation_log(), vec!["in-memory:All", "evaluate"]);
    }

    #[test]
    fn test_selector_is_not_a_predicate() {
        let provider = provider(AdapterOptions::default());
        let x = crate::expr::Param::new("x", crate::expr::TypeToken::Int32);
        let identity = Expr::lambda(vec![x.clone()], Expr::param(&x));
        let cancel = crate::sequence::CancellationSignal::new();
        let args = vec![translated(&provider), identity, Expr::cancellation(&cancel)];
        let call = Call::resolve(
            Operator::asynchronous(Family::Any),
            vec![translated(&provider), greater_than(1), Expr::cancellation(&cancel)],
        )
        .unwrap();
        let cx = TranslateContext {
            candidates: &[0],
            cancel: &cancel,
        };
        let out = PredicateTranslator::new(Family::Any)
            .translate(&cx, &call, &args)
            .unwrap();
        assert!(out.is_none());
    }
}
