use crate::dispatch::Entry;
use crate::error::Result;
use crate::expr::{Call, Expr, Value};
use crate::operator::Family;

use super::super::callback::LambdaShape;
use super::super::{TranslateContext, Translator, TranslatorKind};
use super::TerminalCall;

fn is_predicate(shape: LambdaShape) -> bool {
    shape == LambdaShape::Predicate
}

/// Operators returning one element: `First`, `Last`, `Single` (each with
/// an `OrDefault` twin) and `ElementAt`/`ElementAtOrDefault`.
#[derive(Debug, Clone)]
pub struct SingleEntryTranslator {
    family: Family,
    name: String,
}

impl SingleEntryTranslator {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            name: format!("single:{}", family),
        }
    }

    fn entry(&self) -> Option<Entry> {
        let or_default = self.family.or_default();
        match self.family {
            Family::First | Family::FirstOrDefault => Some(Entry::First { or_default }),
            Family::Last | Family::LastOrDefault => Some(Entry::Last { or_default }),
            Family::Single | Family::SingleOrDefault => Some(Entry::Single { or_default }),
            _ => None,
        }
    }
}

impl Translator for SingleEntryTranslator {
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
        let strategy = terminal.strategy();
        let future = match self.entry() {
            Some(entry) => {
                let Some(predicate) = terminal.optional_lambda(is_predicate) else {
                    return Ok(None);
                };
                strategy.single_entry(
                    terminal.adapter(),
                    terminal.query()?,
                    entry,
                    predicate,
                    terminal.cancel(),
                )?
            }
            None => {
                let Some(Value::Int32(index)) = terminal.value(0) else {
                    return Ok(None);
                };
                strategy.element_at(
                    terminal.adapter(),
                    terminal.query()?,
                    index,
                    self.family.or_default(),
                    terminal.cancel(),
                )?
            }
        };
        Ok(Some(terminal.finish(future)))
    }
}

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use super::*;
    use crate::config::AdapterOptions;
    use crate::error::QueryError;
    use crate::expr::Constant;
    use crate::operator::Operator;

    #[tokio::test]
    async fn test_first_with_predicate() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &SingleEntryTranslator::new(Family::First),
            Operator::asynchronous(Family::First),
            vec![translated(&provider), greater_than(3)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Int32(4));
        assert_eq!(provider.operation_log(), vec!["native:First"]);
    }

    #[tokio::test]
    async fn test_last_or_default_on_no_match() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &SingleEntryTranslator::new(Family::LastOrDefault),
            Operator::asynchronous(Family::LastOrDefault),
            vec![translated(&provider), greater_than(10)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Int32(0));
    }

    #[tokio::test]
    async fn test_single_with_many_matches_fails() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &SingleEntryTranslator::new(Family::Single),
            Operator::asynchronous(Family::Single),
            vec![translated(&provider), greater_than(1)],
        )
        .unwrap();
        let Expr::Constant(Constant::Pending(pending)) = out else {
            panic!("Expected pending result");
        };
        assert!(matches!(
            pending.resolve().await,
            Err(QueryError::MoreThanOneElement)
        ));
    }

    #[tokio::test]
    async fn test_element_at() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &SingleEntryTranslator::new(Family::ElementAt),
            Operator::asynchronous(Family::ElementAt),
            vec![translated(&provider), Expr::int32(1)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Int32(2));
    }

    #[tokio::test]
    async fn test_element_at_or_default_past_the_end() {
        let provider = provider(AdapterOptions::default());
        let out = translate(
            &SingleEntryTranslator::new(Family::ElementAtOrDefault),
            Operator::asynchronous(Family::ElementAtOrDefault),
            vec![translated(&provider), Expr::int32(9)],
        )
        .unwrap();
        assert_eq!(resolve(out).await, Value::Int32(0));
    }
}
