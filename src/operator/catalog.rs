//! Static catalog of every operator overload on both surfaces.
//!
//! Overloads are generated from one table of native signatures. Async
//! chainable operators share the native shapes verbatim; async terminals
//! take a trailing cancellation parameter and return an awaitable; the
//! awaitable-lambda variants rewrite every lambda result into an awaitable.
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{QueryError, Result};
use crate::expr::TypeToken;

use super::shape::{SeqRole, Shape, Signature};
use super::{Callback, Family, MethodRef, Operator, Surface};

static CATALOG: OnceLock<Catalog> = OnceLock::new();

/// Overloads keyed by operator.
#[derive(Debug)]
pub struct Catalog {
    overloads: BTreeMap<Operator, Vec<Signature>>,
}

impl Catalog {
    /// The process-wide catalog, built once on first use.
    pub fn global() -> &'static Catalog {
        CATALOG.get_or_init(Catalog::build)
    }

    fn build() -> Catalog {
        let mut overloads = BTreeMap::new();
        for &family in Family::ALL {
            let base = native_overloads(family);
            if !family.is_async_only() {
                overloads.insert(Operator::sync(family), base.clone());
            }
            let plain: Vec<Signature> = if family.is_terminal() {
                base.iter().map(terminal_async).collect()
            } else {
                base.clone()
            };
            if family.has_await_variants() {
                for callback in [Callback::Await, Callback::AwaitWithCancellation] {
                    let variants: Vec<Signature> = plain
                        .iter()
                        .filter(|sig| sig.params.iter().any(Shape::contains_func))
                        .map(|sig| awaiting(sig, callback))
                        .collect();
                    overloads.insert(Operator::new(Surface::Async, family, callback), variants);
                }
            }
            overloads.insert(Operator::asynchronous(family), plain);
        }
        Catalog { overloads }
    }

    pub fn overloads(&self, operator: &Operator) -> &[Signature] {
        self.overloads
            .get(operator)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn operators(&self) -> impl Iterator<Item = &Operator> {
        self.overloads.keys()
    }

    /// Picks the first overload whose shapes unify with the argument types.
    pub fn resolve(&'static self, operator: Operator, args: &[TypeToken]) -> Result<MethodRef> {
        for signature in self.overloads(&operator) {
            if let Some(generics) = signature.bind(operator.surface, args) {
                return MethodRef::new(operator, signature, generics);
            }
        }
        Err(QueryError::invalid(format!(
            "no overload of {} accepts ({})",
            operator,
            args.iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    /// Native overload structurally identical to an async one.
    pub fn sync_twin(
        &'static self,
        operator: &Operator,
        signature: &Signature,
    ) -> Option<(Operator, &'static Signature)> {
        let sync = operator.sync_counterpart()?;
        self.overloads(&sync)
            .iter()
            .find(|candidate| signature.matches(candidate))
            .map(|candidate| (sync, candidate))
    }
}

fn t(i: usize) -> Shape {
    Shape::Generic(i)
}

fn fixed(ty: TypeToken) -> Shape {
    Shape::Fixed(ty)
}

fn q(element: Shape) -> Shape {
    Shape::Seq(SeqRole::Queryable, Box::new(element))
}

fn e(element: Shape) -> Shape {
    Shape::Seq(SeqRole::Enumerable, Box::new(element))
}

fn func(params: Vec<Shape>, result: Shape) -> Shape {
    Shape::Func(params, Box::new(result))
}

fn cmp(element: Shape) -> Shape {
    Shape::Comparer(Box::new(element))
}

fn grouping(key: Shape, element: Shape) -> Shape {
    Shape::Grouping(Box::new(key), Box::new(element))
}

fn sig(generics: usize, params: Vec<Shape>, result: Shape) -> Signature {
    Signature::new(generics, params, result)
}

fn numeric_types() -> Vec<TypeToken> {
    let base = [
        TypeToken::Int32,
        TypeToken::Int64,
        TypeToken::Float32,
        TypeToken::Float64,
    ];
    base.iter()
        .cloned()
        .chain(base.iter().cloned().map(TypeToken::nullable))
        .collect()
}

/// Native (sync-surface) overloads of a family.
fn native_overloads(family: Family) -> Vec<Signature> {
    let bool_ty = || fixed(TypeToken::Bool);
    let predicate = || func(vec![t(0)], bool_ty());
    match family {
        Family::Where | Family::TakeWhile | Family::SkipWhile => {
            vec![sig(1, vec![q(t(0)), predicate()], q(t(0)))]
        }
        Family::Select => vec![sig(2, vec![q(t(0)), func(vec![t(0)], t(1))], q(t(1)))],
        Family::OrderBy | Family::OrderByDescending | Family::ThenBy | Family::ThenByDescending => {
            vec![
                sig(2, vec![q(t(0)), func(vec![t(0)], t(1))], q(t(0))),
                sig(2, vec![q(t(0)), func(vec![t(0)], t(1)), cmp(t(1))], q(t(0))),
            ]
        }
        Family::Take | Family::Skip => {
            vec![sig(1, vec![q(t(0)), fixed(TypeToken::Int32)], q(t(0)))]
        }
        Family::Distinct => vec![
            sig(1, vec![q(t(0))], q(t(0))),
            sig(1, vec![q(t(0)), cmp(t(0))], q(t(0))),
        ],
        Family::Reverse => vec![sig(1, vec![q(t(0))], q(t(0)))],
        Family::Concat => vec![sig(1, vec![q(t(0)), e(t(0))], q(t(0)))],
        Family::Union | Family::Intersect | Family::Except => vec![
            sig(1, vec![q(t(0)), e(t(0))], q(t(0))),
            sig(1, vec![q(t(0)), e(t(0)), cmp(t(0))], q(t(0))),
        ],
        Family::Append | Family::Prepend => vec![sig(1, vec![q(t(0)), t(0)], q(t(0)))],
        Family::DefaultIfEmpty => vec![
            sig(1, vec![q(t(0))], q(t(0))),
            sig(1, vec![q(t(0)), t(0)], q(t(0))),
        ],
        Family::GroupBy => vec![
            sig(
                2,
                vec![q(t(0)), func(vec![t(0)], t(1))],
                q(grouping(t(1), t(0))),
            ),
            sig(
                3,
                vec![q(t(0)), func(vec![t(0)], t(1)), func(vec![t(0)], t(2))],
                q(grouping(t(1), t(2))),
            ),
        ],
        Family::Aggregate => vec![
            sig(1, vec![q(t(0)), func(vec![t(0), t(0)], t(0))], t(0)),
            sig(
                2,
                vec![q(t(0)), t(1), func(vec![t(1), t(0)], t(1))],
                t(1),
            ),
            sig(
                3,
                vec![
                    q(t(0)),
                    t(1),
                    func(vec![t(1), t(0)], t(1)),
                    func(vec![t(1)], t(2)),
                ],
                t(2),
            ),
        ],
        Family::Any => vec![
            sig(1, vec![q(t(0))], bool_ty()),
            sig(1, vec![q(t(0)), predicate()], bool_ty()),
        ],
        Family::All => vec![sig(1, vec![q(t(0)), predicate()], bool_ty())],
        Family::Count | Family::LongCount => {
            let result = if family == Family::Count {
                TypeToken::Int32
            } else {
                TypeToken::Int64
            };
            vec![
                sig(1, vec![q(t(0))], fixed(result.clone())),
                sig(1, vec![q(t(0)), predicate()], fixed(result)),
            ]
        }
        Family::Min | Family::Max => vec![
            sig(1, vec![q(t(0))], t(0)),
            sig(2, vec![q(t(0)), func(vec![t(0)], t(1))], t(1)),
        ],
        Family::Sum | Family::Average => {
            let mut overloads = Vec::new();
            for ty in numeric_types() {
                let result = if family == Family::Sum {
                    ty.clone()
                } else {
                    match ty.average_type() {
                        Some(avg) => avg,
                        None => continue,
                    }
                };
                overloads.push(sig(0, vec![q(fixed(ty.clone()))], fixed(result.clone())));
                overloads.push(sig(
                    1,
                    vec![q(t(0)), func(vec![t(0)], fixed(ty))],
                    fixed(result),
                ));
            }
            overloads
        }
        Family::First
        | Family::FirstOrDefault
        | Family::Last
        | Family::LastOrDefault
        | Family::Single
        | Family::SingleOrDefault => vec![
            sig(1, vec![q(t(0))], t(0)),
            sig(1, vec![q(t(0)), predicate()], t(0)),
        ],
        Family::ElementAt | Family::ElementAtOrDefault => {
            vec![sig(1, vec![q(t(0)), fixed(TypeToken::Int32)], t(0))]
        }
        Family::Contains => vec![
            sig(1, vec![q(t(0)), t(0)], bool_ty()),
            sig(1, vec![q(t(0)), t(0), cmp(t(0))], bool_ty()),
        ],
        Family::SequenceEqual => vec![
            sig(1, vec![q(t(0)), e(t(0))], bool_ty()),
            sig(1, vec![q(t(0)), e(t(0)), cmp(t(0))], bool_ty()),
        ],
        Family::ToList => vec![sig(1, vec![q(t(0))], Shape::List(Box::new(t(0))))],
    }
}

/// Async terminal form: trailing cancellation, awaitable result.
fn terminal_async(base: &Signature) -> Signature {
    let mut params = base.params.clone();
    params.push(Shape::Cancel);
    sig(
        base.generics,
        params,
        Shape::Awaitable(Box::new(base.result.clone())),
    )
}

fn awaiting(base: &Signature, callback: Callback) -> Signature {
    let params = base
        .params
        .iter()
        .map(|shape| match shape {
            Shape::Func(params, result) => {
                let mut params = params.clone();
                if callback == Callback::AwaitWithCancellation {
                    params.push(Shape::Cancel);
                }
                Shape::Func(params, Box::new(Shape::Awaitable(result.clone())))
            }
            other => other.clone(),
        })
        .collect();
    sig(base.generics, params, base.result.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_async_chainable_has_a_sync_twin() {
        let catalog = Catalog::global();
        for &family in Family::ALL.iter().filter(|f| !f.is_terminal()) {
            let op = Operator::asynchronous(family);
            for signature in catalog.overloads(&op) {
                assert!(
                    catalog.sync_twin(&op, signature).is_some(),
                    "{} has no native twin",
                    op
                );
            }
        }
    }

    #[test]
    fn test_terminals_have_no_structural_twin() {
        let catalog = Catalog::global();
        let op = Operator::asynchronous(Family::Sum);
        for signature in catalog.overloads(&op) {
            assert!(catalog.sync_twin(&op, signature).is_none());
        }
    }

    #[test]
    fn test_resolve_sum_overload() {
        let catalog = Catalog::global();
        let method = catalog
            .resolve(
                Operator::asynchronous(Family::Sum),
                &[
                    TypeToken::async_queryable(TypeToken::Int32),
                    TypeToken::Cancellation,
                ],
            )
            .unwrap();
        assert_eq!(
            method.return_type().unwrap(),
            TypeToken::awaitable(TypeToken::Int32)
        );
    }

    #[test]
    fn test_resolve_average_widens() {
        let method = Catalog::global()
            .resolve(
                Operator::sync(Family::Average),
                &[TypeToken::queryable(TypeToken::Int64)],
            )
            .unwrap();
        assert_eq!(method.return_type().unwrap(), TypeToken::Float64);
    }

    #[test]
    fn test_await_variant_lambda_shape() {
        let method = Catalog::global()
            .resolve(
                Operator::awaiting_with_cancellation(Family::Where),
                &[
                    TypeToken::async_queryable(TypeToken::Int32),
                    TypeToken::function(
                        vec![TypeToken::Int32, TypeToken::Cancellation],
                        TypeToken::awaitable(TypeToken::Bool),
                    ),
                ],
            )
            .unwrap();
        assert_eq!(method.generics(), &[TypeToken::Int32]);
    }

    #[test]
    fn test_to_list_is_async_only() {
        let catalog = Catalog::global();
        assert!(catalog.overloads(&Operator::sync(Family::ToList)).is_empty());
        assert_eq!(
            catalog
                .overloads(&Operator::asynchronous(Family::ToList))
                .len(),
            1
        );
    }

    #[test]
    fn test_group_by_result_shape() {
        let method = Catalog::global()
            .resolve(
                Operator::asynchronous(Family::GroupBy),
                &[
                    TypeToken::async_queryable(TypeToken::Int32),
                    TypeToken::function(vec![TypeToken::Int32], TypeToken::Bool),
                ],
            )
            .unwrap();
        assert_eq!(
            method.return_type().unwrap(),
            TypeToken::async_queryable(TypeToken::grouping(
                false,
                TypeToken::Bool,
                TypeToken::Int32
            ))
        );
    }
}
