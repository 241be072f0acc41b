//! Operator identities and resolved method references.
//!
//! Every call node names an [`Operator`]: a family (`Where`, `Sum`, ...),
//! the surface it belongs to (the async caller-facing API or the provider's
//! native synchronous one) and, for async operators, which callback shape
//! its lambdas use.
pub mod catalog;
pub mod shape;

use std::fmt;

pub use catalog::Catalog;
pub use shape::{SeqRole, Shape, Signature};

use crate::error::{QueryError, Result};
use crate::expr::TypeToken;

/// Which API an operator belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Surface {
    Async,
    Sync,
}

/// Lambda flavour of an async operator overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Callback {
    /// Plain synchronous lambdas.
    None,
    /// Lambdas returning an awaitable.
    Await,
    /// Awaitable lambdas taking a trailing cancellation parameter.
    AwaitWithCancellation,
}

macro_rules! families {
    ($($name:ident => $text:literal, $terminal:literal, $awaitable:literal;)*) => {
        /// Operator families shared by both surfaces.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Family {
            $($name,)*
        }

        impl Family {
            pub const ALL: &'static [Family] = &[$(Family::$name,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(Family::$name => $text,)*
                }
            }

            /// True for operators that yield a scalar instead of a sequence.
            pub fn is_terminal(self) -> bool {
                match self {
                    $(Family::$name => $terminal,)*
                }
            }

            /// True if the async surface offers awaitable-lambda overloads.
            pub fn has_await_variants(self) -> bool {
                match self {
                    $(Family::$name => $awaitable,)*
                }
            }
        }
    };
}

families! {
    Where => "Where", false, true;
    Select => "Select", false, true;
    OrderBy => "OrderBy", false, false;
    OrderByDescending => "OrderByDescending", false, false;
    ThenBy => "ThenBy", false, false;
    ThenByDescending => "ThenByDescending", false, false;
    Take => "Take", false, false;
    Skip => "Skip", false, false;
    TakeWhile => "TakeWhile", false, true;
    SkipWhile => "SkipWhile", false, true;
    Distinct => "Distinct", false, false;
    Reverse => "Reverse", false, false;
    Concat => "Concat", false, false;
    Union => "Union", false, false;
    Intersect => "Intersect", false, false;
    Except => "Except", false, false;
    Append => "Append", false, false;
    Prepend => "Prepend", false, false;
    DefaultIfEmpty => "DefaultIfEmpty", false, false;
    GroupBy => "GroupBy", false, true;
    Aggregate => "Aggregate", true, true;
    Any => "Any", true, true;
    All => "All", true, true;
    Count => "Count", true, true;
    LongCount => "LongCount", true, true;
    Min => "Min", true, true;
    Max => "Max", true, true;
    Sum => "Sum", true, true;
    Average => "Average", true, true;
    First => "First", true, true;
    FirstOrDefault => "FirstOrDefault", true, true;
    Last => "Last", true, true;
    LastOrDefault => "LastOrDefault", true, true;
    Single => "Single", true, true;
    SingleOrDefault => "SingleOrDefault", true, true;
    ElementAt => "ElementAt", true, false;
    ElementAtOrDefault => "ElementAtOrDefault", true, false;
    Contains => "Contains", true, false;
    SequenceEqual => "SequenceEqual", true, false;
    ToList => "ToList", true, false;
}

impl Family {
    /// `First`/`Last`/`Single` style operators with a default-value twin.
    pub fn or_default(self) -> bool {
        matches!(
            self,
            Family::FirstOrDefault
                | Family::LastOrDefault
                | Family::SingleOrDefault
                | Family::ElementAtOrDefault
        )
    }

    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Family::OrderBy | Family::OrderByDescending | Family::ThenBy | Family::ThenByDescending
        )
    }

    /// Families that only exist on the async surface.
    pub fn is_async_only(self) -> bool {
        matches!(self, Family::ToList)
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identity of one operator overload group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Operator {
    pub surface: Surface,
    pub family: Family,
    pub callback: Callback,
}

impl Operator {
    pub const fn new(surface: Surface, family: Family, callback: Callback) -> Self {
        Self {
            surface,
            family,
            callback,
        }
    }

    /// Async operator with plain lambdas.
    pub const fn asynchronous(family: Family) -> Self {
        Self::new(Surface::Async, family, Callback::None)
    }

    pub const fn awaiting(family: Family) -> Self {
        Self::new(Surface::Async, family, Callback::Await)
    }

    pub const fn awaiting_with_cancellation(family: Family) -> Self {
        Self::new(Surface::Async, family, Callback::AwaitWithCancellation)
    }

    /// Provider-native operator.
    pub const fn sync(family: Family) -> Self {
        Self::new(Surface::Sync, family, Callback::None)
    }

    pub fn is_terminal(&self) -> bool {
        self.family.is_terminal()
    }

    pub fn is_async(&self) -> bool {
        self.surface == Surface::Async
    }

    /// The native operator an async operator with plain lambdas maps to.
    pub fn sync_counterpart(&self) -> Option<Operator> {
        match (self.surface, self.callback) {
            (Surface::Async, Callback::None) if !self.family.is_async_only() => {
                Some(Operator::sync(self.family))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.surface {
            Surface::Sync => write!(f, "Queryable.{}", self.family),
            Surface::Async => {
                write!(f, "{}", self.family)?;
                match self.callback {
                    Callback::None => {}
                    Callback::Await => write!(f, "Await")?,
                    Callback::AwaitWithCancellation => write!(f, "AwaitWithCancellation")?,
                }
                if self.family.is_terminal() {
                    write!(f, "Async")?;
                }
                Ok(())
            }
        }
    }
}

/// A concrete overload with its generic arguments bound.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodRef {
    operator: Operator,
    signature: &'static Signature,
    generics: Vec<TypeToken>,
}

impl MethodRef {
    pub fn new(
        operator: Operator,
        signature: &'static Signature,
        generics: Vec<TypeToken>,
    ) -> Result<Self> {
        if generics.len() != signature.generics {
            return Err(QueryError::invalid(format!(
                "{} takes {} generic arguments, got {}",
                operator,
                signature.generics,
                generics.len()
            )));
        }
        Ok(Self {
            operator,
            signature,
            generics,
        })
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn signature(&self) -> &'static Signature {
        self.signature
    }

    pub fn generics(&self) -> &[TypeToken] {
        &self.generics
    }

    pub fn param_types(&self) -> Result<Vec<TypeToken>> {
        self.signature
            .params
            .iter()
            .map(|shape| shape.instantiate(self.operator.surface, &self.generics))
            .collect()
    }

    pub fn return_type(&self) -> Result<TypeToken> {
        self.signature
            .result
            .instantiate(self.operator.surface, &self.generics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_display() {
        assert_eq!(Operator::asynchronous(Family::Where).to_string(), "Where");
        assert_eq!(Operator::asynchronous(Family::Sum).to_string(), "SumAsync");
        assert_eq!(Operator::awaiting(Family::Sum).to_string(), "SumAwaitAsync");
        assert_eq!(
            Operator::awaiting_with_cancellation(Family::Where).to_string(),
            "WhereAwaitWithCancellation"
        );
        assert_eq!(Operator::sync(Family::Select).to_string(), "Queryable.Select");
    }

    #[test]
    fn test_sync_counterpart() {
        assert_eq!(
            Operator::asynchronous(Family::Take).sync_counterpart(),
            Some(Operator::sync(Family::Take))
        );
        assert_eq!(Operator::awaiting(Family::Where).sync_counterpart(), None);
        assert_eq!(Operator::asynchronous(Family::ToList).sync_counterpart(), None);
    }

    #[test]
    fn test_family_flags() {
        assert!(Family::Count.is_terminal());
        assert!(!Family::GroupBy.is_terminal());
        assert!(Family::FirstOrDefault.or_default());
        assert!(!Family::Take.has_await_variants());
        assert_eq!(Family::ALL.len(), 40);
    }
}
