/// Translators: rewrite one async operator call into native form.
///
/// A translator receives a call whose source argument (and possibly
/// others) has already been proven translatable and either returns the
/// rewritten node or refuses. Refusal is a normal outcome and is reported
/// as `Ok(None)`; only contract violations are errors.
pub mod callback;
pub mod default;
pub mod queryable;
pub mod registry;
pub mod terminal;

use std::fmt;

use crate::error::Result;
use crate::expr::{Call, Expr};
use crate::sequence::CancellationSignal;

pub use callback::{classify, LambdaShape};
pub use default::DefaultTranslator;
pub use queryable::{GroupingTypes, PendingResult, TranslatedQueryable};
pub use registry::TranslatorRegistry;

/// Whether a translator was derived mechanically or written for its family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TranslatorKind {
    /// Structural async → native mapping.
    Default,
    /// Hand-written translator for an asymmetric family.
    Specialized,
}

/// State shared by every translation attempt of one rewrite pass.
#[derive(Debug, Clone, Copy)]
pub struct TranslateContext<'a> {
    /// Argument positions holding translated queryables.
    pub candidates: &'a [usize],
    /// Signal of the request, used when a call carries none of its own.
    pub cancel: &'a CancellationSignal,
}

impl TranslateContext<'_> {
    /// The call's trailing cancellation constant, or the request's signal.
    pub fn cancellation(&self, args: &[Expr]) -> CancellationSignal {
        args.last()
            .and_then(Expr::as_cancellation)
            .unwrap_or(self.cancel)
            .clone()
    }

    pub fn is_candidate(&self, index: usize) -> bool {
        self.candidates.contains(&index)
    }
}

pub trait Translator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn kind(&self) -> TranslatorKind;

    /// Rewrites `call` given its already-rewritten `args`.
    fn translate(
        &self,
        cx: &TranslateContext<'_>,
        call: &Call,
        args: &[Expr],
    ) -> Result<Option<Expr>>;
}
