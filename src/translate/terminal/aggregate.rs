use crate::adapter::AggregateRequest;
use crate::error::Result;
use crate::expr::{Call, Expr};

use super::super::callback::LambdaShape;
use super::super::{TranslateContext, Translator, TranslatorKind};
use super::TerminalCall;

/// `Aggregate` with one, two or three type parameters.
#[derive(Debug, Clone, Copy)]
pub struct AggregateTranslator;

impl Translator for AggregateTranslator {
    fn name(&self) -> &str {
        "aggregate"
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
        let request = match terminal.rest().len() {
            1 => terminal
                .lambda(0, LambdaShape::is_accumulator)
                .map(|accumulator| AggregateRequest {
                    seed: None,
                    accumulator,
                    result_selector: None,
                }),
            2 | 3 => {
                let seed = terminal.value(0);
                let accumulator = terminal.lambda(1, LambdaShape::is_accumulator);
                let result_selector = match terminal.rest().len() {
                    3 => terminal.lambda(2, LambdaShape::is_selector).map(Some),
                    _ => Some(None),
                };
                match (seed, accumulator, result_selector) {
                    (Some(seed), Some(accumulator), Some(result_selector)) => {
                        Some(AggregateRequest {
                            seed: Some(seed),
                            accumulator,
                            result_selector,
                        })
                    }
                    _ => None,
                }
            }
            _ => None,
        };
        let Some(request) = request else {
            return Ok(None);
        };
        let future = terminal.strategy().aggregate(
            terminal.adapter(),
            terminal.query()?,
            request,
            terminal.cancel(),
        )?;
        Ok(Some(terminal.finish(future)))
    }
}
