//! Expression trees, runtime types and values.
pub mod builder;
pub mod format;
pub mod interp;
pub mod node;
pub mod types;
pub mod value;

pub use builder::AsyncQuery;
pub use node::{BinaryOp, Call, Constant, Expr, Lambda, Member, Param, ScalarMethod, UnaryOp};
pub use types::{SeqKind, TypeToken};
pub use value::{Comparer, GroupingValue, Pending, Value, ValueComparer};
