//! Surface-relative signature shapes.
//!
//! A [`Shape`] describes a parameter or result type with its sequence kinds
//! left open: the same shape instantiates to `AsyncQueryable<T>` on the
//! async surface and `Queryable<T>` on the native one. Comparing the shapes
//! of two overloads therefore tells whether they are structural twins.
use crate::error::{QueryError, Result};
use crate::expr::{SeqKind, TypeToken};

use super::Surface;

/// Whether a sequence parameter must be composable or merely consumable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeqRole {
    Queryable,
    Enumerable,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Shape {
    Generic(usize),
    Fixed(TypeToken),
    Seq(SeqRole, Box<Shape>),
    /// A synchronous list, identical on both surfaces.
    List(Box<Shape>),
    Grouping(Box<Shape>, Box<Shape>),
    Func(Vec<Shape>, Box<Shape>),
    Awaitable(Box<Shape>),
    Comparer(Box<Shape>),
    Cancel,
}

impl Shape {
    pub fn instantiate(&self, surface: Surface, generics: &[TypeToken]) -> Result<TypeToken> {
        let sync = surface == Surface::Sync;
        Ok(match self {
            Shape::Generic(i) => generics.get(*i).cloned().ok_or_else(|| {
                QueryError::invalid(format!("generic argument {} is unbound", i))
            })?,
            Shape::Fixed(ty) => ty.clone(),
            Shape::Seq(role, element) => {
                let element = element.instantiate(surface, generics)?;
                TypeToken::sequence(seq_kind(*role, surface), element)
            }
            Shape::List(element) => TypeToken::enumerable(element.instantiate(surface, generics)?),
            Shape::Grouping(key, element) => TypeToken::grouping(
                sync,
                key.instantiate(surface, generics)?,
                element.instantiate(surface, generics)?,
            ),
            Shape::Func(params, result) => TypeToken::function(
                params
                    .iter()
                    .map(|p| p.instantiate(surface, generics))
                    .collect::<Result<Vec<_>>>()?,
                result.instantiate(surface, generics)?,
            ),
            Shape::Awaitable(inner) => TypeToken::awaitable(inner.instantiate(surface, generics)?),
            Shape::Comparer(inner) => TypeToken::comparer(inner.instantiate(surface, generics)?),
            Shape::Cancel => TypeToken::Cancellation,
        })
    }

    /// Binds generic slots so that this shape accepts `ty` as an argument.
    pub fn unify(
        &self,
        surface: Surface,
        ty: &TypeToken,
        bindings: &mut [Option<TypeToken>],
    ) -> bool {
        match (self, ty) {
            (Shape::Generic(i), ty) => match bindings.get_mut(*i) {
                Some(slot) => match slot {
                    Some(bound) => *bound == *ty,
                    None => {
                        *slot = Some(ty.clone());
                        true
                    }
                },
                None => false,
            },
            (Shape::Fixed(expected), ty) => expected == ty,
            (Shape::Seq(role, element), ty) => {
                let expected = seq_kind(*role, surface);
                let Some(kind) = ty.sequence_kind() else {
                    return false;
                };
                let accepted = kind == expected
                    || (*role == SeqRole::Enumerable && kind.is_async() == expected.is_async());
                match (accepted, ty.element_type()) {
                    (true, Some(actual)) => element.unify(surface, actual, bindings),
                    _ => false,
                }
            }
            (Shape::List(element), TypeToken::Sequence(SeqKind::Enumerable, actual)) => {
                element.unify(surface, actual, bindings)
            }
            (Shape::Grouping(key, element), TypeToken::Grouping { sync, key: k, element: e }) => {
                *sync == (surface == Surface::Sync)
                    && key.unify(surface, k, bindings)
                    && element.unify(surface, e, bindings)
            }
            (Shape::Func(params, result), TypeToken::Function { params: ps, result: r }) => {
                params.len() == ps.len()
                    && params
                        .iter()
                        .zip(ps)
                        .all(|(shape, ty)| shape.unify(surface, ty, bindings))
                    && result.unify(surface, r, bindings)
            }
            (Shape::Awaitable(inner), TypeToken::Awaitable(actual))
            | (Shape::Comparer(inner), TypeToken::Comparer(actual)) => {
                inner.unify(surface, actual, bindings)
            }
            (Shape::Cancel, TypeToken::Cancellation) => true,
            _ => false,
        }
    }

    pub fn contains_func(&self) -> bool {
        matches!(self, Shape::Func(..))
    }
}

fn seq_kind(role: SeqRole, surface: Surface) -> SeqKind {
    match (role, surface) {
        (SeqRole::Queryable, Surface::Async) => SeqKind::AsyncQueryable,
        (SeqRole::Queryable, Surface::Sync) => SeqKind::Queryable,
        (SeqRole::Enumerable, Surface::Async) => SeqKind::AsyncEnumerable,
        (SeqRole::Enumerable, Surface::Sync) => SeqKind::Enumerable,
    }
}

/// One overload: number of generic parameters, parameter shapes, result shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub generics: usize,
    pub params: Vec<Shape>,
    pub result: Shape,
}

impl Signature {
    pub fn new(generics: usize, params: Vec<Shape>, result: Shape) -> Self {
        Self {
            generics,
            params,
            result,
        }
    }

    /// Parameters with a trailing cancellation parameter removed.
    pub fn params_without_cancel(&self) -> &[Shape] {
        match self.params.split_last() {
            Some((Shape::Cancel, rest)) => rest,
            _ => &self.params,
        }
    }

    /// Structural equality with another overload, disregarding a trailing
    /// cancellation parameter.
    pub fn matches(&self, other: &Signature) -> bool {
        self.generics == other.generics
            && self.params_without_cancel() == other.params_without_cancel()
            && self.result == other.result
    }

    /// Binds generics against argument types.
    pub fn bind(&self, surface: Surface, args: &[TypeToken]) -> Option<Vec<TypeToken>> {
        if self.params.len() != args.len() {
            return None;
        }
        let mut bindings = vec![None; self.generics];
        for (shape, ty) in self.params.iter().zip(args) {
            if !shape.unify(surface, ty, &mut bindings) {
                return None;
            }
        }
        bindings.into_iter().collect()
    }
}
