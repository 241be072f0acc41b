//! Query expression tree.
//!
//! The tree is immutable: the rewrite walker never mutates a node, it builds
//! new ones. Node kinds form a closed enum so every pass matches
//! exhaustively.
use std::sync::Arc;

use crate::adapter::{AbstractSource, NativeRoot};
use crate::error::{QueryError, Result};
use crate::operator::{Catalog, MethodRef, Operator};
use crate::sequence::{AsyncSequence, CancellationSignal};
use crate::translate::{PendingResult, TranslatedQueryable};

use super::types::TypeToken;
use super::value::{Comparer, Value};

/// Core expression type.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Constant),
    Parameter(Param),
    Lambda(Lambda),
    Call(Call),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        ty: TypeToken,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        ty: TypeToken,
    },
    Conditional {
        test: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Member {
        target: Box<Expr>,
        member: Member,
        ty: TypeToken,
    },
    Method {
        method: ScalarMethod,
        args: Vec<Expr>,
        ty: TypeToken,
    },
    Tuple(Vec<Expr>),
}

/// Leaf values. Besides plain data this carries the handles the engine
/// threads through a tree: abstract sources, translated queryables,
/// materialized sequences, native roots and pending scalar results.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Value { value: Value, ty: TypeToken },
    /// A whole queryable collection owned by an adapter.
    Source(AbstractSource),
    /// A subtree proven translatable into the provider's native form.
    Translated(TranslatedQueryable),
    /// A plain asynchronous sequence (in-memory or materialized).
    Sequence(AsyncSequence),
    /// Root of a provider-native query expression.
    Root(NativeRoot),
    /// Awaitable scalar produced by a terminal translator.
    Pending(PendingResult),
    Comparer(Comparer),
    Cancellation(CancellationSignal),
}

impl Constant {
    pub fn ty(&self) -> TypeToken {
        match self {
            Constant::Value { ty, .. } => ty.clone(),
            Constant::Source(source) => TypeToken::async_queryable(source.element_type().clone()),
            Constant::Translated(translated) => translated.surface_type(),
            Constant::Sequence(seq) => seq.sequence_type(),
            Constant::Root(root) => TypeToken::queryable(root.element_type().clone()),
            Constant::Pending(pending) => TypeToken::awaitable(pending.result_type().clone()),
            Constant::Comparer(cmp) => TypeToken::comparer(cmp.element_type().clone()),
            Constant::Cancellation(_) => TypeToken::Cancellation,
        }
    }
}

/// A named, typed lambda parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    name: Arc<str>,
    ty: TypeToken,
}

impl Param {
    pub fn new(name: &str, ty: TypeToken) -> Self {
        Self {
            name: Arc::from(name),
            ty,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> &TypeToken {
        &self.ty
    }

    pub fn with_type(&self, ty: TypeToken) -> Self {
        Self {
            name: self.name.clone(),
            ty,
        }
    }
}

/// A lambda abstraction: captured predicate/selector body.
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    params: Vec<Param>,
    body: Box<Expr>,
    ty: TypeToken,
}

impl Lambda {
    pub fn new(params: Vec<Param>, body: Expr) -> Self {
        let ty = TypeToken::function(
            params.iter().map(|p| p.ty().clone()).collect(),
            body.ty(),
        );
        Self {
            params,
            body: Box::new(body),
            ty,
        }
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }

    pub fn body(&self) -> &Expr {
        &self.body
    }

    pub fn ty(&self) -> &TypeToken {
        &self.ty
    }

    pub fn result_type(&self) -> TypeToken {
        self.body.ty()
    }

    /// `x => !body`, used to express `All(p)` as `!Any(!p)`.
    pub fn negated(&self) -> Result<Lambda> {
        let body = Expr::unary(UnaryOp::Not, self.body().clone())?;
        Ok(Lambda::new(self.params.clone(), body))
    }

    /// Wraps the body in a numeric conversion.
    pub fn converted(&self, target: &TypeToken) -> Result<Lambda> {
        if self.result_type() == *target {
            return Ok(self.clone());
        }
        let body = Expr::unary(UnaryOp::Convert(target.clone()), self.body().clone())?;
        Ok(Lambda::new(self.params.clone(), body))
    }

    /// `x => (target)x`
    pub fn conversion(from: &TypeToken, to: &TypeToken) -> Result<Lambda> {
        let x = Param::new("x", from.clone());
        let body = Expr::unary(UnaryOp::Convert(to.clone()), Expr::param(&x))?;
        Ok(Lambda::new(vec![x], body))
    }
}

/// An operator call node: operator identity plus ordered arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    method: MethodRef,
    args: Vec<Expr>,
    ty: TypeToken,
}

impl Call {
    /// Builds a call against an already-instantiated method, checking arity
    /// and argument assignability.
    pub fn new(method: MethodRef, args: Vec<Expr>) -> Result<Call> {
        let params = method.param_types()?;
        if params.len() != args.len() {
            return Err(QueryError::invalid(format!(
                "{} expects {} arguments, got {}",
                method.operator(),
                params.len(),
                args.len()
            )));
        }
        for (param, arg) in params.iter().zip(&args) {
            let arg_ty = arg.ty();
            if !param.is_assignable_from(&arg_ty) {
                return Err(QueryError::mismatch(param, &arg_ty));
            }
        }
        let ty = method.return_type()?;
        Ok(Call { method, args, ty })
    }

    /// Resolves the overload of `operator` matching the argument types.
    pub fn resolve(operator: Operator, args: Vec<Expr>) -> Result<Call> {
        let arg_types: Vec<TypeToken> = args.iter().map(Expr::ty).collect();
        let method = Catalog::global().resolve(operator, &arg_types)?;
        Call::new(method, args)
    }

    /// Same method and type, new arguments. Used by the walker, which only
    /// ever substitutes arguments of identical static type.
    pub fn rebuild(&self, args: Vec<Expr>) -> Call {
        Call {
            method: self.method.clone(),
            args,
            ty: self.ty.clone(),
        }
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn operator(&self) -> Operator {
        self.method.operator()
    }

    pub fn args(&self) -> &[Expr] {
        &self.args
    }

    pub fn ty(&self) -> &TypeToken {
        &self.ty
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Negate,
    Convert(TypeToken),
}

impl UnaryOp {
    pub fn result_type(&self, operand: &TypeToken) -> Result<TypeToken> {
        match self {
            UnaryOp::Not if operand.underlying() == &TypeToken::Bool => Ok(operand.clone()),
            UnaryOp::Negate if operand.is_numeric() => Ok(operand.clone()),
            UnaryOp::Convert(target) => {
                let convertible = (operand.is_numeric() && target.is_numeric())
                    || operand.underlying() == target.underlying()
                    || target == &TypeToken::String;
                if convertible {
                    Ok(target.clone())
                } else {
                    Err(QueryError::mismatch(target, operand))
                }
            }
            _ => Err(QueryError::invalid(format!(
                "operator {:?} cannot be applied to {}",
                self, operand
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Subtract
                | BinaryOp::Multiply
                | BinaryOp::Divide
                | BinaryOp::Modulo
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Equal
                | BinaryOp::NotEqual
                | BinaryOp::LessThan
                | BinaryOp::LessThanOrEqual
                | BinaryOp::GreaterThan
                | BinaryOp::GreaterThanOrEqual
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanOrEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanOrEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn result_type(self, left: &TypeToken, right: &TypeToken) -> Result<TypeToken> {
        if self.is_comparison() {
            return if left.underlying() == right.underlying() {
                Ok(TypeToken::Bool)
            } else {
                Err(QueryError::mismatch(left, right))
            };
        }
        match self {
            BinaryOp::And | BinaryOp::Or => {
                if left == &TypeToken::Bool && right == &TypeToken::Bool {
                    Ok(TypeToken::Bool)
                } else {
                    Err(QueryError::mismatch(&TypeToken::Bool, left))
                }
            }
            BinaryOp::Add if left == &TypeToken::String && right == &TypeToken::String => {
                Ok(TypeToken::String)
            }
            _ if left.is_numeric() && left.underlying() == right.underlying() => {
                if left.is_nullable() || right.is_nullable() {
                    Ok(TypeToken::nullable(left.underlying().clone()))
                } else {
                    Ok(left.clone())
                }
            }
            _ => Err(QueryError::mismatch(left, right)),
        }
    }
}

/// Member accesses the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Member {
    /// Key of a grouping.
    Key,
    /// Zero-based tuple field.
    Item(usize),
}

impl Member {
    pub fn result_type(self, target: &TypeToken) -> Result<TypeToken> {
        match (self, target) {
            (Member::Key, TypeToken::Grouping { key, .. }) => Ok((**key).clone()),
            (Member::Item(i), TypeToken::Tuple(items)) if i < items.len() => Ok(items[i].clone()),
            _ => Err(QueryError::invalid(format!(
                "member {:?} does not exist on {}",
                self, target
            ))),
        }
    }
}

/// Closed set of scalar methods that may appear inside lambda bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarMethod {
    ToString,
    Length,
    ToUpper,
    ToLower,
    Abs,
    /// Completed awaitable wrapping its argument.
    FromResult,
    /// Awaitable that suspends for `args[1]` milliseconds.
    Delay,
}

impl ScalarMethod {
    pub fn name(self) -> &'static str {
        match self {
            ScalarMethod::ToString => "ToString",
            ScalarMethod::Length => "Length",
            ScalarMethod::ToUpper => "ToUpper",
            ScalarMethod::ToLower => "ToLower",
            ScalarMethod::Abs => "Abs",
            ScalarMethod::FromResult => "FromResult",
            ScalarMethod::Delay => "Delay",
        }
    }

    pub fn result_type(self, args: &[TypeToken]) -> Result<TypeToken> {
        let arity_error = || {
            QueryError::invalid(format!(
                "{} cannot be applied to ({})",
                self.name(),
                args.iter()
                    .map(|t| t.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        };
        match (self, args) {
            (ScalarMethod::ToString, [_]) => Ok(TypeToken::String),
            (ScalarMethod::Length, [TypeToken::String]) => Ok(TypeToken::Int32),
            (ScalarMethod::ToUpper | ScalarMethod::ToLower, [TypeToken::String]) => {
                Ok(TypeToken::String)
            }
            (ScalarMethod::Abs, [t]) if t.is_numeric() => Ok(t.clone()),
            (ScalarMethod::FromResult, [t]) => Ok(TypeToken::awaitable(t.clone())),
            (ScalarMethod::Delay, [t, TypeToken::Int32]) => Ok(TypeToken::awaitable(t.clone())),
            _ => Err(arity_error()),
        }
    }
}

impl Expr {
    /// Static result type of this node.
    pub fn ty(&self) -> TypeToken {
        match self {
            Expr::Constant(c) => c.ty(),
            Expr::Parameter(p) => p.ty().clone(),
            Expr::Lambda(l) => l.ty().clone(),
            Expr::Call(c) => c.ty().clone(),
            Expr::Unary { ty, .. }
            | Expr::Binary { ty, .. }
            | Expr::Member { ty, .. }
            | Expr::Method { ty, .. } => ty.clone(),
            Expr::Conditional { if_true, .. } => if_true.ty(),
            Expr::Tuple(items) => TypeToken::Tuple(items.iter().map(Expr::ty).collect()),
        }
    }

    pub fn constant(value: Value, ty: TypeToken) -> Result<Expr> {
        if !value.conforms_to(&ty) {
            return Err(QueryError::invalid(format!(
                "constant {} does not conform to {}",
                value, ty
            )));
        }
        Ok(Expr::Constant(Constant::Value { value, ty }))
    }

    pub fn int32(v: i32) -> Expr {
        Expr::Constant(Constant::Value {
            value: Value::Int32(v),
            ty: TypeToken::Int32,
        })
    }

    pub fn int64(v: i64) -> Expr {
        Expr::Constant(Constant::Value {
            value: Value::Int64(v),
            ty: TypeToken::Int64,
        })
    }

    pub fn float64(v: f64) -> Expr {
        Expr::Constant(Constant::Value {
            value: Value::Float64(v),
            ty: TypeToken::Float64,
        })
    }

    pub fn string(v: &str) -> Expr {
        Expr::Constant(Constant::Value {
            value: Value::str(v),
            ty: TypeToken::String,
        })
    }

    pub fn boolean(v: bool) -> Expr {
        Expr::Constant(Constant::Value {
            value: Value::Bool(v),
            ty: TypeToken::Bool,
        })
    }

    pub fn source(source: AbstractSource) -> Expr {
        Expr::Constant(Constant::Source(source))
    }

    pub fn sequence(seq: AsyncSequence) -> Expr {
        Expr::Constant(Constant::Sequence(seq))
    }

    pub fn comparer(cmp: Comparer) -> Expr {
        Expr::Constant(Constant::Comparer(cmp))
    }

    pub fn cancellation(cancel: &CancellationSignal) -> Expr {
        Expr::Constant(Constant::Cancellation(cancel.clone()))
    }

    pub fn param(p: &Param) -> Expr {
        Expr::Parameter(p.clone())
    }

    pub fn lambda(params: Vec<Param>, body: Expr) -> Expr {
        Expr::Lambda(Lambda::new(params, body))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Result<Expr> {
        let ty = op.result_type(&operand.ty())?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
            ty,
        })
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Result<Expr> {
        let ty = op.result_type(&left.ty(), &right.ty())?;
        Ok(Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            ty,
        })
    }

    pub fn conditional(test: Expr, if_true: Expr, if_false: Expr) -> Result<Expr> {
        if test.ty() != TypeToken::Bool {
            return Err(QueryError::mismatch(&TypeToken::Bool, &test.ty()));
        }
        if if_true.ty() != if_false.ty() {
            return Err(QueryError::mismatch(&if_true.ty(), &if_false.ty()));
        }
        Ok(Expr::Conditional {
            test: Box::new(test),
            if_true: Box::new(if_true),
            if_false: Box::new(if_false),
        })
    }

    pub fn member(target: Expr, member: Member) -> Result<Expr> {
        let ty = member.result_type(&target.ty())?;
        Ok(Expr::Member {
            target: Box::new(target),
            member,
            ty,
        })
    }

    pub fn method(method: ScalarMethod, args: Vec<Expr>) -> Result<Expr> {
        let arg_types: Vec<TypeToken> = args.iter().map(Expr::ty).collect();
        let ty = method.result_type(&arg_types)?;
        Ok(Expr::Method { method, args, ty })
    }

    pub fn tuple(items: Vec<Expr>) -> Expr {
        Expr::Tuple(items)
    }

    pub fn as_translated(&self) -> Option<&TranslatedQueryable> {
        match self {
            Expr::Constant(Constant::Translated(t)) => Some(t),
            _ => None,
        }
    }

    pub fn as_lambda(&self) -> Option<&Lambda> {
        match self {
            Expr::Lambda(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Expr::Constant(Constant::Value { value, .. }) => Some(value),
            _ => None,
        }
    }

    pub fn as_comparer(&self) -> Option<&Comparer> {
        match self {
            Expr::Constant(Constant::Comparer(c)) => Some(c),
            _ => None,
        }
    }

    pub fn as_cancellation(&self) -> Option<&CancellationSignal> {
        match self {
            Expr::Constant(Constant::Cancellation(c)) => Some(c),
            _ => None,
        }
    }

    /// Direct children in argument order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Constant(_) | Expr::Parameter(_) => Vec::new(),
            Expr::Lambda(l) => vec![l.body()],
            Expr::Call(c) => c.args().iter().collect(),
            Expr::Unary { operand, .. } => vec![&**operand],
            Expr::Binary { left, right, .. } => vec![&**left, &**right],
            Expr::Conditional {
                test,
                if_true,
                if_false,
            } => vec![&**test, &**if_true, &**if_false],
            Expr::Member { target, .. } => vec![&**target],
            Expr::Method { args, .. } => args.iter().collect(),
            Expr::Tuple(items) => items.iter().collect(),
        }
    }

    /// Pre-order search for a node matching `pred`.
    pub fn any_node(&self, pred: &mut dyn FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().into_iter().any(|child| child.any_node(pred))
    }

    pub fn references(&self, param: &Param) -> bool {
        self.any_node(&mut |e| matches!(e, Expr::Parameter(p) if p == param))
    }
}
