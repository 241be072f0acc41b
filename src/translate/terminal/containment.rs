use crate::adapter::SecondSequence;
use crate::error::{QueryError, Result};
use crate::expr::{Call, Constant, Expr};

use super::super::{TranslateContext, Translator, TranslatorKind};
use super::TerminalCall;

/// `Contains`, with an optional comparer.
#[derive(Debug, Clone, Copy)]
pub struct ContainsTranslator;

impl Translator for ContainsTranslator {
    fn name(&self) -> &str {
        "contains"
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
        let Some(value) = terminal.value(0) else {
            return Ok(None);
        };
        let future = terminal.strategy().contains(
            terminal.adapter(),
            terminal.query()?,
            value,
            terminal.comparer(),
            terminal.cancel(),
        )?;
        Ok(Some(terminal.finish(future)))
    }
}

/// `SequenceEqual` against either another query of the same adapter or a
/// plain asynchronous sequence.
#[derive(Debug, Clone, Copy)]
pub struct SequenceEqualTranslator;

impl Translator for SequenceEqualTranslator {
    fn name(&self) -> &str {
        "sequence-equal"
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
        let second = match terminal.rest().first() {
            Some(Expr::Constant(Constant::Translated(other))) => {
                if !other.same_adapter(terminal.source()) {
                    return Err(QueryError::CrossAdapter {
                        left: terminal.adapter().name().to_string(),
                        right: other.adapter().name().to_string(),
                    });
                }
                SecondSequence::Query(other.query()?)
            }
            Some(Expr::Constant(Constant::Sequence(sequence))) => {
                SecondSequence::Sequence(sequence.clone())
            }
            _ => return Ok(None),
        };
        let future = terminal.strategy().sequence_equal(
            terminal.adapter(),
            terminal.query()?,
            second,
            terminal.comparer(),
            terminal.cancel(),
        )?;
        Ok(Some(terminal.finish(future)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::config::AdapterOptions;
    use crate::expr::{Comparer, TypeToken, Value, ValueComparer};
    use crate::operator::{Family, Operator};
    use crate::sequence::{AsyncSequence, CancellationSignal};

    #[tokio::test]
    async fn test_contains() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &ContainsTranslator,
            Operator::asynchronous(Family::Contains),
            vec![translated(&provider), Expr::int32(4)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Bool(true));
        assert_eq!(provider.operation_log(), vec!["native:Contains"]);
    }

    #[derive(Debug)]
    struct LastDigit;

    impl ValueComparer for LastDigit {
        fn name(&self) -> &str {
            "last-digit"
        }

        fn equals(&self, left: &Value, right: &Value) -> bool {
            self.canonical(left) == self.canonical(right)
        }

        fn canonical(&self, value: &Value) -> Value {
            match value {
                Value::Int32(v) => Value::Int32(v % 10),
                other => other.clone(),
            }
        }
    }

    #[tokio::test]
    async fn test_contains_with_comparer() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &ContainsTranslator,
            Operator::asynchronous(Family::Contains),
            vec![
                translated(&provider),
                Expr::int32(14),
                Expr::comparer(Comparer::new(TypeToken::Int32, LastDigit)),
            ],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_sequence_equal_with_plain_sequence() {
        let provider = provider(AdapterOptions::default());
        let second =
            AsyncSequence::from_values(TypeToken::Int32, (1..=5).map(Value::from).collect());
        let out = translate(
            &SequenceEqualTranslator,
            Operator::asynchronous(Family::SequenceEqual),
            vec![translated(&provider), Expr::sequence(second)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Bool(true));
    }

    #[tokio::test]
    async fn test_sequence_equal_with_same_adapter() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &SequenceEqualTranslator,
            Operator::asynchronous(Family::SequenceEqual),
            vec![translated(&provider), translated(&provider)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Bool(true));
    }

    #[test]
    fn test_sequence_equal_across_adapters_fails() {
        let left = provider(AdapterOptions::default());
        let right = provider(AdapterOptions::default());
        let cancel = CancellationSignal::new();
        let args = vec![translated(&left), translated(&right), Expr::cancellation(&cancel)];
        let call =
            Call::resolve(Operator::asynchronous(Family::SequenceEqual), args.clone()).unwrap();
        let cx = TranslateContext {
            candidates: &[0, 1],
            cancel: &cancel,
        };
        let err = SequenceEqualTranslator.translate(&cx, &call, &args).unwrap_err();
        assert!(matches!(err, QueryError::CrossAdapter { .. }));
    }
}
