//! Lambda classification and rewriting shared by every translator.
//!
//! Three rewrites happen here before a lambda may cross into native form:
//! awaitable callbacks are reduced to plain ones, a trailing cancellation
//! parameter is dropped, and lambdas over async groupings are retargeted to
//! the native grouping type. Each one refuses (`None`) when it cannot prove
//! the result equivalent.
use tracing::trace;

use crate::expr::{Constant, Expr, Lambda, Member, Param, ScalarMethod, TypeToken, Value};
use crate::expr::Pending;
use crate::operator::Callback;
use crate::sequence::algebra::awaited;

/// What a lambda argument looks like, independent of the operator using it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LambdaShape {
    /// One parameter, boolean result.
    Predicate,
    /// One parameter, any other result.
    Selector,
    /// Two parameters of the same type.
    MultiSelector,
    /// One grouping parameter, non-boolean result.
    GroupSelector,
    /// Two parameters of different types (seeded accumulators).
    MultiSourceSelector,
    Unknown,
}

impl LambdaShape {
    /// Single-parameter projections of any kind.
    pub fn is_selector(self) -> bool {
        matches!(
            self,
            LambdaShape::Selector | LambdaShape::GroupSelector | LambdaShape::Predicate
        )
    }

    pub fn is_accumulator(self) -> bool {
        matches!(self, LambdaShape::MultiSelector | LambdaShape::MultiSourceSelector)
    }
}

/// Classifies a lambda, ignoring awaitable wrappers and cancellation
/// parameters.
pub fn classify(lambda: &Lambda) -> LambdaShape {
    let params: Vec<&TypeToken> = lambda
        .params()
        .iter()
        .map(Param::ty)
        .filter(|ty| **ty != TypeToken::Cancellation)
        .collect();
    let result = awaited(lambda.result_type());
    match params.as_slice() {
        [_] if result.underlying() == &TypeToken::Bool => LambdaShape::Predicate,
        [p] if p.is_grouping() => LambdaShape::GroupSelector,
        [_] => LambdaShape::Selector,
        [a, b] if a == b => LambdaShape::MultiSelector,
        [_, _] => LambdaShape::MultiSourceSelector,
        _ => LambdaShape::Unknown,
    }
}

/// Reduces an awaitable body to the plain expression it completes with.
///
/// `FromResult(e)` reduces to `e`, a conditional reduces when both branches
/// do, and an already-completed constant reduces to its value. Anything
/// that may actually suspend (`Delay`, parameters, calls) does not.
pub fn reduce_awaitable(body: &Expr) -> Option<Expr> {
    match body {
        Expr::Method {
            method: ScalarMethod::FromResult,
            args,
            ..
        } => match args.as_slice() {
            [inner] => Some(inner.clone()),
            _ => None,
        },
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => {
            let if_true = reduce_awaitable(if_true)?;
            let if_false = reduce_awaitable(if_false)?;
            Expr::conditional((**test).clone(), if_true, if_false).ok()
        }
        Expr::Constant(Constant::Value {
            value: Value::Pending(Pending::Ready(value)),
            ty: TypeToken::Awaitable(inner),
        }) => Expr::constant((**value).clone(), (**inner).clone()).ok(),
        _ => None,
    }
}

/// Converts an async-surface lambda into its native equivalent.
pub fn native_lambda(lambda: &Lambda, callback: Callback) -> Option<Lambda> {
    let plain = match callback {
        Callback::None => lambda.clone(),
        Callback::Await => Lambda::new(lambda.params().to_vec(), reduce_awaitable(lambda.body())?),
        Callback::AwaitWithCancellation => {
            let (cancel, params) = lambda.params().split_last()?;
            if cancel.ty() != &TypeToken::Cancellation || lambda.body().references(cancel) {
                return None;
            }
            Lambda::new(params.to_vec(), reduce_awaitable(lambda.body())?)
        }
    };
    if plain.ty().mentions_async_grouping() {
        retarget(&plain)
    } else {
        Some(plain)
    }
}

/// Rewrites a lambda over async groupings into one over native groupings.
///
/// The only use of a grouping parameter the rewrite can prove safe is
/// reading its key; any other use aborts.
pub fn retarget(lambda: &Lambda) -> Option<Lambda> {
    let mapping: Vec<(Param, Param)> = lambda
        .params()
        .iter()
        .map(|p| (p.clone(), p.with_type(p.ty().to_sync())))
        .collect();
    let body = retarget_expr(lambda.body(), &mapping);
    if body.is_none() {
        trace!(lambda = %Expr::Lambda(lambda.clone()), "grouping lambda cannot be retargeted");
    }
    let params = mapping.into_iter().map(|(_, new)| new).collect();
    Some(Lambda::new(params, body?))
}

fn mapped<'a>(param: &Param, mapping: &'a [(Param, Param)]) -> Option<&'a Param> {
    mapping
        .iter()
        .find(|(old, _)| old == param)
        .map(|(_, new)| new)
}

fn retarget_expr(expr: &Expr, mapping: &[(Param, Param)]) -> Option<Expr> {
    let go = |e: &Expr| retarget_expr(e, mapping);
    match expr {
        Expr::Member {
            target,
            member: Member::Key,
            ..
        } => match &**target {
            Expr::Parameter(p) => {
                let new = mapped(p, mapping).unwrap_or(p);
                Expr::member(Expr::param(new), Member::Key).ok()
            }
            other => Expr::member(go(other)?, Member::Key).ok(),
        },
        Expr::Parameter(p) => match mapped(p, mapping) {
            Some(new) if new.ty() != p.ty() => None,
            Some(new) => Some(Expr::param(new)),
            None => Some(expr.clone()),
        },
        Expr::Constant(_) => Some(expr.clone()),
        Expr::Lambda(_) | Expr::Call(_) => None,
        Expr::Unary { op, operand, .. } => Expr::unary(op.clone(), go(operand)?).ok(),
        Expr::Binary {
            op, left, right, ..
        } => Expr::binary(*op, go(left)?, go(right)?).ok(),
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => Expr::conditional(go(test)?, go(if_true)?, go(if_false)?).ok(),
        Expr::Member { target, member, .. } => Expr::member(go(target)?, *member).ok(),
        Expr::Method { method, args, .. } => {
            let args = args.iter().map(go).collect::<Option<Vec<_>>>()?;
            Expr::method(*method, args).ok()
        }
        Expr::Tuple(items) => Some(Expr::tuple(items.iter().map(go).collect::<Option<Vec<_>>>()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;

    fn async_group() -> TypeToken {
        TypeToken::grouping(false, TypeToken::Bool, TypeToken::Int32)
    }

    #[test]
    fn test_classify() {
        let x = Param::new("x", TypeToken::Int32);
        let predicate = Lambda::new(
            vec![x.clone()],
            Expr::binary(BinaryOp::GreaterThan, Expr::param(&x), Expr::int32(1)).unwrap(),
        );
        assert_eq!(classify(&predicate), LambdaShape::Predicate);
        let selector = Lambda::new(vec![x.clone()], Expr::param(&x));
        assert_eq!(classify(&selector), LambdaShape::Selector);
        let acc = Param::new("acc", TypeToken::Int64);
        let seeded = Lambda::new(vec![acc.clone(), x.clone()], Expr::param(&acc));
        assert_eq!(classify(&seeded), LambdaShape::MultiSourceSelector);
        let y = Param::new("y", TypeToken::Int32);
        let pair = Lambda::new(vec![x, y.clone()], Expr::param(&y));
        assert_eq!(classify(&pair), LambdaShape::MultiSelector);
        let g = Param::new("g", async_group());
        let key = Lambda::new(vec![g.clone()], Expr::int32(1));
        assert_eq!(classify(&key), LambdaShape::GroupSelector);
    }

    #[test]
    fn test_reduce_from_result() {
        let x = Param::new("x", TypeToken::Int32);
        let inner = Expr::binary(BinaryOp::GreaterThan, Expr::param(&x), Expr::int32(2)).unwrap();
        let body = Expr::method(ScalarMethod::FromResult, vec![inner.clone()]).unwrap();
        assert_eq!(reduce_awaitable(&body), Some(inner));
    }

    #[test]
    fn test_delay_is_not_reducible() {
        let body =
            Expr::method(ScalarMethod::Delay, vec![Expr::boolean(true), Expr::int32(10)]).unwrap();
        assert_eq!(reduce_awaitable(&body), None);
    }

    #[test]
    fn test_conditional_reduces_when_both_branches_do() {
        let b = Param::new("b", TypeToken::Bool);
        let ready = |v| Expr::method(ScalarMethod::FromResult, vec![Expr::int32(v)]).unwrap();
        let body = Expr::conditional(Expr::param(&b), ready(1), ready(2)).unwrap();
        assert!(reduce_awaitable(&body).is_some());
        let delayed =
            Expr::method(ScalarMethod::Delay, vec![Expr::int32(2), Expr::int32(5)]).unwrap();
        let body = Expr::conditional(Expr::param(&b), ready(1), delayed).unwrap();
        assert!(reduce_awaitable(&body).is_none());
    }

    #[test]
    fn test_native_lambda_drops_cancellation() {
        let x = Param::new("x", TypeToken::Int32);
        let ct = Param::new("ct", TypeToken::Cancellation);
        let lambda = Lambda::new(
            vec![x.clone(), ct],
            Expr::method(ScalarMethod::FromResult, vec![Expr::param(&x)]).unwrap(),
        );
        let plain = native_lambda(&lambda, Callback::AwaitWithCancellation).unwrap();
        assert_eq!(
            plain.ty(),
            &TypeToken::function(vec![TypeToken::Int32], TypeToken::Int32)
        );
    }

    #[test]
    fn test_retarget_key_access() {
        let g = Param::new("g", async_group());
        let lambda = Lambda::new(
            vec![g.clone()],
            Expr::member(Expr::param(&g), Member::Key).unwrap(),
        );
        let native = native_lambda(&lambda, Callback::None).unwrap();
        assert_eq!(native.params()[0].ty(), &async_group().to_sync());
        assert_eq!(native.result_type(), TypeToken::Bool);
    }

    #[test]
    fn test_retarget_refuses_opaque_use() {
        let g = Param::new("g", async_group());
        let lambda = Lambda::new(
            vec![g.clone()],
            Expr::method(ScalarMethod::ToString, vec![Expr::param(&g)]).unwrap(),
        );
        assert!(retarget(&lambda).is_none());
    }
}
