//! What happens to a call no translator could take.
//!
//! Chainable calls need the adapter's permission to continue in memory;
//! terminal calls were already asked to produce an in-memory value and
//! never do. When allowed, every translated candidate is replaced by a
//! plain sequence that pulls the native query, and the original call runs
//! against the in-memory algebra.
use tracing::{debug, warn};

use crate::error::{QueryError, Result};
use crate::expr::{Call, Expr};
use crate::translate::TranslatorKind;

/// Why a call is left untranslated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refusal {
    /// No translator is registered for the operator.
    NoTranslator,
    /// A translator exists but refused this call.
    Refused(TranslatorKind),
}

impl Refusal {
    fn describe(self) -> &'static str {
        match self {
            Refusal::NoTranslator => "no translator is registered",
            Refusal::Refused(TranslatorKind::Default) => "the default translator refused the call",
            Refusal::Refused(TranslatorKind::Specialized) => {
                "the specialized translator refused the call"
            }
        }
    }
}

/// Falls back for `call`, whose rewritten arguments are `args` and whose
/// translated arguments sit at `candidates`.
pub fn resolve(
    call: &Call,
    mut args: Vec<Expr>,
    candidates: &[usize],
    refusal: Refusal,
) -> Result<Expr> {
    let operator = call.operator();
    let Some(source) = candidates
        .first()
        .and_then(|&i| args.get(i))
        .and_then(Expr::as_translated)
    else {
        return Err(QueryError::invalid(format!(
            "{} has no translated argument to fall back from",
            operator
        )));
    };
    let options = source.adapter().options().clone();

    if !operator.is_terminal() {
        let denied = if !options.allow_implicit_post_processing {
            Some("implicit post-processing is disabled")
        } else if refusal == Refusal::Refused(TranslatorKind::Default)
            && !options.allow_implicit_default_post_processing
        {
            Some("implicit post-processing after a default translator is disabled")
        } else {
            None
        };
        if let Some(reason) = denied {
            warn!(
                operator = %operator,
                adapter = source.adapter().name(),
                cause = refusal.describe(),
                allow_implicit_post_processing = options.allow_implicit_post_processing,
                allow_implicit_default_post_processing =
                    options.allow_implicit_default_post_processing,
                "fallback rejected"
            );
            return Err(QueryError::QueryNotSupported {
                operator: operator.to_string(),
                reason: reason.to_string(),
            });
        }
    }

    debug!(
        operator = %operator,
        adapter = source.adapter().name(),
        cause = refusal.describe(),
        terminal = operator.is_terminal(),
        "falling back to in-memory evaluation"
    );
    for &index in candidates {
        if let Some(translated) = args.get(index).and_then(Expr::as_translated) {
            let sequence = translated.to_sequence();
            args[index] = Expr::sequence(sequence);
        }
    }
    Ok(Expr::Call(call.rebuild(args)))
}
