//! Structural async → native translation for chainable operators.
use tracing::debug;

use crate::error::{QueryError, Result};
use crate::expr::{Call, Constant, Expr};
use crate::operator::{Callback, Catalog, MethodRef, Operator};

use super::callback::native_lambda;
use super::{TranslateContext, TranslatedQueryable, Translator, TranslatorKind};

/// Maps an async chainable call onto the native overload with the same
/// shape.
///
/// Awaitable-callback variants are accepted when every callback reduces to
/// a plain lambda; the call is then treated as its plain twin.
#[derive(Debug, Clone)]
pub struct DefaultTranslator {
    operator: Operator,
    name: String,
}

impl DefaultTranslator {
    pub fn new(operator: Operator) -> Self {
        Self {
            operator,
            name: format!("default:{}", operator),
        }
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// True when every overload of `operator` has a native twin.
    pub fn is_applicable(operator: &Operator) -> bool {
        let catalog = Catalog::global();
        let plain = Operator::asynchronous(operator.family);
        let overloads = catalog.overloads(&plain);
        !operator.is_terminal()
            && !overloads.is_empty()
            && overloads
                .iter()
                .all(|signature| catalog.sync_twin(&plain, signature).is_some())
    }

    fn refuse(&self, call: &Call, reason: &str) -> Result<Option<Expr>> {
        debug!(operator = %call.operator(), reason, "default translation refused");
        Ok(None)
    }
}

impl Translator for DefaultTranslator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> TranslatorKind {
        TranslatorKind::Default
    }

    fn translate(
        &self,
        cx: &TranslateContext<'_>,
        call: &Call,
        args: &[Expr],
    ) -> Result<Option<Expr>> {
        let operator = call.operator();
        let Some(&first) = cx.candidates.first() else {
            return self.refuse(call, "no translated argument");
        };
        let Some(source) = args.get(first).and_then(Expr::as_translated) else {
            return Err(QueryError::invalid(format!(
                "argument {} of {} is not translated",
                first, operator
            )));
        };

        // Reduce awaitable callbacks so the call can be resolved as its
        // plain twin.
        let mut plain_args = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Expr::Lambda(lambda) if operator.callback != Callback::None => {
                    match native_lambda(lambda, operator.callback) {
                        Some(plain) => plain_args.push(Expr::Lambda(plain)),
                        None => return self.refuse(call, "callback is not reducible"),
                    }
                }
                other => plain_args.push(other.clone()),
            }
        }
        let plain_op = Operator::asynchronous(operator.family);
        let plain_call = if operator.callback == Callback::None {
            call.rebuild(plain_args)
        } else {
            match Call::resolve(plain_op, plain_args) {
                Ok(resolved) => resolved,
                Err(_) => return self.refuse(call, "no plain overload"),
            }
        };

        let catalog = Catalog::global();
        let Some((sync_op, twin)) = catalog.sync_twin(&plain_op, plain_call.method().signature())
        else {
            return self.refuse(call, "no structural twin");
        };
        let generics = plain_call
            .method()
            .generics()
            .iter()
            .map(|g| g.to_sync())
            .collect();
        let method = MethodRef::new(sync_op, twin, generics)?;

        let mut native_args = Vec::with_capacity(args.len());
        for arg in plain_call.args() {
            let native = match arg {
                Expr::Constant(Constant::Translated(translated)) => {
                    if !translated.same_adapter(source) {
                        return Err(QueryError::CrossAdapter {
                            left: source.adapter().name().to_string(),
                            right: translated.adapter().name().to_string(),
                        });
                    }
                    translated.expression().clone()
                }
                Expr::Constant(Constant::Sequence(_)) | Expr::Constant(Constant::Source(_)) => {
                    return self.refuse(call, "argument is not native");
                }
                Expr::Lambda(lambda) => match native_lambda(lambda, Callback::None) {
                    Some(native) => Expr::Lambda(native),
                    None => return self.refuse(call, "lambda cannot be retargeted"),
                },
                other => other.clone(),
            };
            native_args.push(native);
        }

        let native_call = match Call::new(method, native_args) {
            Ok(native_call) => native_call,
            Err(err) => {
                debug!(operator = %operator, %err, "native call does not line up");
                return Ok(None);
            }
        };
        if !source.builder().accepts(&native_call) {
            return self.refuse(call, "provider does not accept the call");
        }
        let translated: TranslatedQueryable = source.compose(Expr::Call(native_call))?;
        debug!(
            operator = %operator,
            native = %translated.expression(),
            grouped = translated.is_grouped(),
            "translated"
        );
        Ok(Some(Expr::Constant(Constant::Translated(translated))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::adapter::{MemoryProvider, QueryAdapter};
    use crate::config::AdapterOptions;
    use crate::expr::{BinaryOp, Lambda, Member, Param, ScalarMethod, TypeToken, Value};
    use crate::operator::Family;
    use crate::sequence::{AsyncSequence, CancellationSignal};

    fn translated_ints() -> TranslatedQueryable {
        let provider: Arc<dyn QueryAdapter> = Arc::new(
            MemoryProvider::new("ints", AdapterOptions::default())
                .with_table(TypeToken::Int32, (1..=5).map(Value::from).collect())
                .unwrap(),
        );
        let query = provider.get_queryable(&TypeToken::Int32).unwrap();
        TranslatedQueryable::from_query(provider, query)
    }

    fn translate(call: &Call, args: &[Expr]) -> Option<Expr> {
        let cancel = CancellationSignal::new();
        let cx = TranslateContext {
            candidates: &[0],
            cancel: &cancel,
        };
        DefaultTranslator::new(call.operator())
            .translate(&cx, call, args)
            .unwrap()
    }

    fn greater_than(n: i32) -> Lambda {
        let x = Param::new("x", TypeToken::Int32);
        Lambda::new(
            vec![x.clone()],
            Expr::binary(BinaryOp::GreaterThan, Expr::param(&x), Expr::int32(n)).unwrap(),
        )
    }

    #[test]
    fn test_where_becomes_native() {
        let source = Expr::Constant(Constant::Translated(translated_ints()));
        let args = vec![source, Expr::Lambda(greater_than(2))];
        let call = Call::resolve(Operator::asynchronous(Family::Where), args.clone()).unwrap();
        let out = translate(&call, &args).unwrap();
        let translated = out.as_translated().unwrap();
        assert_eq!(
            translated.expression().to_string(),
            "Queryable.Where(ints<i32>, x => (x > 2))"
        );
    }

    #[test]
    fn test_await_variant_reduces() {
        let x = Param::new("x", TypeToken::Int32);
        let body = Expr::method(
            ScalarMethod::FromResult,
            vec![Expr::binary(BinaryOp::GreaterThan, Expr::param(&x), Expr::int32(2)).unwrap()],
        )
        .unwrap();
        let source = Expr::Constant(Constant::Translated(translated_ints()));
        let args = vec![source, Expr::lambda(vec![x], body)];
        let call = Call::resolve(Operator::awaiting(Family::Where), args.clone()).unwrap();
        assert!(translate(&call, &args).is_some());
    }

    #[test]
    fn test_plain_sequence_argument_is_refused() {
        let source = Expr::Constant(Constant::Translated(translated_ints()));
        let other = Expr::sequence(AsyncSequence::from_values(TypeToken::Int32, vec![]));
        let args = vec![source, other];
        let call = Call::resolve(Operator::asynchronous(Family::Concat), args.clone()).unwrap();
        assert!(translate(&call, &args).is_none());
    }

    #[test]
    fn test_group_by_then_select_key() {
        let source = Expr::Constant(Constant::Translated(translated_ints()));
        let args = vec![source, Expr::Lambda(greater_than(2))];
        let group_call =
            Call::resolve(Operator::asynchronous(Family::GroupBy), args.clone()).unwrap();
        let grouped = translate(&group_call, &args).unwrap();
        assert!(grouped.as_translated().unwrap().is_grouped());

        let g = Param::new("g", TypeToken::grouping(false, TypeToken::Bool, TypeToken::Int32));
        let key = Expr::lambda(
            vec![g.clone()],
            Expr::member(Expr::param(&g), Member::Key).unwrap(),
        );
        let args = vec![grouped, key];
        let select = Call::resolve(Operator::asynchronous(Family::Select), args.clone()).unwrap();
        let keys = translate(&select, &args).unwrap();
        assert_eq!(
            keys.as_translated().unwrap().element_type(),
            &TypeToken::Bool
        );
    }

    #[test]
    fn test_every_chainable_family_is_applicable() {
        for &family in Family::ALL.iter().filter(|f| !f.is_terminal()) {
            assert!(DefaultTranslator::is_applicable(&Operator::asynchronous(family)));
        }
        assert!(!DefaultTranslator::is_applicable(&Operator::asynchronous(Family::Sum)));
    }
}
