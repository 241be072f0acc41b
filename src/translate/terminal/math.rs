use tracing::trace;

use crate::dispatch::DispatchCache;
use crate::error::Result;
use crate::expr::{Call, Expr, Lambda};
use crate::operator::Family;

use super::super::callback::LambdaShape;
use super::super::{TranslateContext, Translator, TranslatorKind};
use super::TerminalCall;

/// `Min`, `Max`, `Sum` and `Average`, with or without a selector.
///
/// Averages over integers are computed in floating point: the element (or
/// the selector result) is converted before it reaches the adapter.
#[derive(Debug, Clone)]
pub struct MathTranslator {
    family: Family,
    name: String,
}

impl MathTranslator {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            name: format!("math:{}", family),
        }
    }
}

impl Translator for MathTranslator {
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
        let Some(selector) = terminal.optional_lambda(LambdaShape::is_selector) else {
            return Ok(None);
        };
        let element = terminal.element().clone();
        let adapter = terminal.adapter();
        let query = terminal.query()?;
        let cancel = terminal.cancel();
        let cache = DispatchCache::global();

        let future = match (self.family, selector) {
            (Family::Average, selector) => {
                let selector = match selector {
                    Some(selector) => selector,
                    None if element.is_integer() => {
                        Lambda::conversion(&element, &element.widened())?
                    }
                    None => {
                        let future = terminal.strategy().average(adapter, query, cancel)?;
                        return Ok(Some(terminal.finish(future)));
                    }
                };
                let result = selector.result_type();
                let selector = if result.is_integer() {
                    trace!(from = %result, to = %result.widened(), "widening average selector");
                    selector.converted(&result.widened())?
                } else {
                    selector
                };
                cache
                    .selector(&element, &selector.result_type())
                    .average(adapter, query, selector, cancel)?
            }
            (family, Some(selector)) => {
                let strategy = cache.selector(&element, &selector.result_type());
                match family {
                    Family::Min => strategy.min(adapter, query, selector, cancel)?,
                    Family::Max => strategy.max(adapter, query, selector, cancel)?,
                    Family::Sum => strategy.sum(adapter, query, selector, cancel)?,
                    _ => return Ok(None),
                }
            }
            (family, None) => {
                let strategy = terminal.strategy();
                match family {
                    Family::Min => strategy.min(adapter, query, cancel)?,
                    Family::Max => strategy.max(adapter, query, cancel)?,
                    Family::Sum => strategy.sum(adapter, query, cancel)?,
                    _ => return Ok(None),
                }
            }
        };
        Ok(Some(terminal.finish(future)))
    }
}
