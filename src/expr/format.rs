/// Expression tree → compact text.
///
/// Used by `Display` for [`Expr`], in log lines and by the binary's
/// `--explain` output. The rendering is for people, not for parsing.
use std::fmt;

use super::node::{Call, Constant, Expr, Lambda, Member, ScalarMethod, UnaryOp};

/// Render an expression as a single line.
pub fn render(expr: &Expr) -> String {
    match expr {
        Expr::Constant(c) => render_constant(c),
        Expr::Parameter(p) => p.name().to_string(),
        Expr::Lambda(l) => render_lambda(l),
        Expr::Call(c) => render_call(c),
        Expr::Unary { op, operand, .. } => match op {
            UnaryOp::Not => format!("!{}", render(operand)),
            UnaryOp::Negate => format!("-{}", render(operand)),
            UnaryOp::Convert(ty) => format!("({}){}", ty, render(operand)),
        },
        Expr::Binary {
            op, left, right, ..
        } => format!("({} {} {})", render(left), op.symbol(), render(right)),
        Expr::Conditional {
            test,
            if_true,
            if_false,
        } => format!(
            "({} ? {} : {})",
            render(test),
            render(if_true),
            render(if_false)
        ),
        Expr::Member { target, member, .. } => match member {
            Member::Key => format!("{}.Key", render(target)),
            Member::Item(i) => format!("{}.{}", render(target), i),
        },
        Expr::Method { method, args, .. } => render_method(*method, args),
        Expr::Tuple(items) => format!("({})", render_list(items)),
    }
}

fn render_list(items: &[Expr]) -> String {
    items.iter().map(render).collect::<Vec<_>>().join(", ")
}

fn render_constant(constant: &Constant) -> String {
    match constant {
        Constant::Value { value, .. } => value.to_string(),
        Constant::Source(source) => {
            format!("source<{}:{}>", source.adapter().name(), source.element_type())
        }
        Constant::Translated(translated) => format!(
            "translated<{}>[{}]",
            translated.adapter().name(),
            render(translated.expression())
        ),
        Constant::Sequence(seq) => format!("seq<{}>", seq.label()),
        Constant::Root(root) => format!("{}<{}>", root.name(), root.element_type()),
        Constant::Pending(pending) => format!("pending<{}>", pending.label()),
        Constant::Comparer(cmp) => format!("comparer<{}>", cmp.name()),
        Constant::Cancellation(_) => "cancel".to_string(),
    }
}

fn render_lambda(lambda: &Lambda) -> String {
    let params: Vec<&str> = lambda.params().iter().map(|p| p.name()).collect();
    let head = match params.as_slice() {
        [single] => single.to_string(),
        many => format!("({})", many.join(", ")),
    };
    format!("{} => {}", head, render(lambda.body()))
}

fn render_call(call: &Call) -> String {
    format!("{}({})", call.operator(), render_list(call.args()))
}

fn render_method(method: ScalarMethod, args: &[Expr]) -> String {
    match (method, args) {
        (ScalarMethod::FromResult | ScalarMethod::Delay, _) => {
            format!("{}({})", method.name(), render_list(args))
        }
        (ScalarMethod::Length, [target]) => format!("{}.Length", render(target)),
        (_, [target, rest @ ..]) => {
            format!("{}.{}({})", render(target), method.name(), render_list(rest))
        }
        (_, []) => format!("{}()", method.name()),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self))
    }
}
