/// Error taxonomy for the rewrite engine.
///
/// Contract violations (`InvalidArgument`, `TypeMismatch`, `UnsupportedType`)
/// are raised synchronously while a tree is being rewritten. Policy
/// violations (`QueryNotSupported`) and cross-adapter combinations are fatal
/// for the request. Translation refusals are not errors and never show up here.
use thiserror::Error;

use crate::expr::TypeToken;

pub type Result<T, E = QueryError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    /// A null/invalid argument or malformed expression.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A type token did not match what the operation requires.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: TypeToken,
        found: TypeToken,
    },

    /// Fallback would be required but the adapter options forbid it.
    #[error("query not supported: {operator} ({reason})")]
    QueryNotSupported { operator: String, reason: String },

    /// Two subtrees owned by different adapters were combined.
    #[error("cannot combine sequences from different adapters ({left} and {right})")]
    CrossAdapter { left: String, right: String },

    /// The dispatch cache was asked for an operation the type cannot support.
    #[error("{operation} is not supported for type {ty}")]
    UnsupportedType {
        operation: &'static str,
        ty: TypeToken,
    },

    /// The adapter was asked to pull rows into memory but its options forbid it.
    #[error("in-memory evaluation of {operation} is disabled for adapter '{adapter}'")]
    InMemoryEvaluationDisabled {
        operation: &'static str,
        adapter: String,
    },

    #[error("sequence contains no elements")]
    NoElements,

    #[error("sequence contains more than one element")]
    MoreThanOneElement,

    #[error("no matching element")]
    NoMatch,

    #[error("index {0} is out of range")]
    IndexOutOfRange(i64),

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("operation was cancelled")]
    Cancelled,

    /// Failure reported by the underlying provider.
    #[error("provider error: {0}")]
    Provider(String),

    /// Failure while interpreting an expression in memory.
    #[error("evaluation error: {0}")]
    Evaluation(String),
}

impl QueryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        QueryError::InvalidArgument(msg.into())
    }

    pub fn mismatch(expected: &TypeToken, found: &TypeToken) -> Self {
        QueryError::TypeMismatch {
            expected: expected.clone(),
            found: found.clone(),
        }
    }

    pub fn evaluation(msg: impl Into<String>) -> Self {
        QueryError::Evaluation(msg.into())
    }

    /// True for errors that come from the caller-controlled fallback policy.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            QueryError::QueryNotSupported { .. } | QueryError::InMemoryEvaluationDisabled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QueryError::QueryNotSupported {
            operator: "Select".into(),
            reason: "implicit post-processing is disabled".into(),
        };
        assert_eq!(
            err.to_string(),
            "query not supported: Select (implicit post-processing is disabled)"
        );
        assert!(err.is_policy_violation());
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = QueryError::mismatch(&TypeToken::Int32, &TypeToken::String);
        assert_eq!(err.to_string(), "type mismatch: expected i32, found string");
        assert!(!err.is_policy_violation());
    }
}
