pub mod adapter;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod expr;
pub mod operator;
pub mod rewrite;
pub mod sequence;
pub mod translate;

pub use error::{QueryError, Result};
pub use rewrite::{QueryEngine, QueryResult};
