//! Expression evaluation against an environment.
//!
//! Evaluation is tolerant: a live performance must not stop because
//! a name is misspelled mid-edit. Missing variables evaluate to [`Value::Null`]
//! and unsupported shapes evaluate to nothing rather than erroring.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::dsl::{BinaryOp, Expr, Literal, LogicalOp, UnaryOp};

/// A builtin function callable from the DSL. Receives the caller's
/// environment merged with the evaluated call arguments.
pub type BuiltinFn = Rc<dyn Fn(&Env) -> Value>;

/// A primitive runtime value.
#[derive(Clone)]
pub enum Value {
    Null,
    Number(f64),
    Bool(bool),
    Str(String),
    Builtin(BuiltinFn),
}

impl Value {
    /// Truthiness, matching the host-language rules the DSL inherited:
    /// null and NaN/zero are false, empty strings are false.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::Builtin(_) => true,
        }
    }

    /// Numeric coercion: booleans become 0/1, everything non-numeric is 0.
    pub fn as_number(&self) -> f64 {
        match self {
            Value::Number(n) => *n,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            _ => 0.0,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Builtin(_) => write!(f, "<builtin>"),
        }
    }
}

impl PartialEq for Value {
    /// Strict equality: values of different types are never equal; builtins
    /// compare by identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&Literal> for Value {
    fn from(literal: &Literal) -> Self {
        match literal {
            Literal::Number(n) => Value::Number(*n),
            Literal::Str(s) => Value::Str(s.clone()),
            Literal::Bool(b) => Value::Bool(*b),
        }
    }
}

/// A flat name → value mapping. Layered head scopes are flattened into one
/// map before evaluation (right-biased merge, innermost frame wins).
pub type Env = HashMap<String, Value>;

/// A single track-slot message: evaluated params for one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    pub params: HashMap<String, Value>,
}

impl Message {
    /// Build a message from a param list: `name: expr` evaluates the
    /// expression, a bare `name` copies the same-named environment variable.
    pub fn from_params(params: &[Expr], env: &Env) -> Self {
        Self {
            params: params_to_env(params, env),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    /// Numeric view of a param, if present and numeric.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.params.get(key) {
            Some(Value::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// The bare `-` param marks the track-step as silence.
    pub fn is_silent(&self) -> bool {
        self.params.contains_key("-")
    }
}

/// Evaluate an expression to a primitive value. Never mutates `env`.
pub fn evaluate(expr: &Expr, env: &Env) -> Value {
    match expr {
        Expr::Variable(var) => env.get(&var.name).cloned().unwrap_or(Value::Null),
        Expr::Literal(lit) => Value::from(&lit.value),
        Expr::Grouping(inner) => evaluate(inner, env),
        Expr::Unary(unary) => {
            let right = evaluate(&unary.right, env);
            match unary.op {
                UnaryOp::Not => Value::Bool(!right.truthy()),
                UnaryOp::Negate => Value::Number(-right.as_number()),
            }
        }
        Expr::Binary(binary) => {
            // Both operands evaluate eagerly; no short-circuit here.
            let left = evaluate(&binary.left, env);
            let right = evaluate(&binary.right, env);
            evaluate_binary(binary.op, left, right)
        }
        Expr::Logical(logical) => {
            let left = evaluate(&logical.left, env);
            match logical.op {
                LogicalOp::And if !left.truthy() => left,
                LogicalOp::Or if left.truthy() => left,
                _ => evaluate(&logical.right, env),
            }
        }
        Expr::Ternary(ternary) => {
            if evaluate(&ternary.condition, env).truthy() {
                evaluate(&ternary.if_branch, env)
            } else {
                evaluate(&ternary.else_branch, env)
            }
        }
        Expr::Call(call) => {
            let callee = evaluate(&call.callee, env);
            if let Value::Builtin(function) = callee {
                let mut merged = env.clone();
                merged.extend(params_to_env(&call.args, env));
                function(&merged)
            } else {
                Value::Null
            }
        }
        // Sequences and step nodes have no primitive value; they are walked
        // structurally by playback cursors.
        _ => Value::Null,
    }
}

fn evaluate_binary(op: BinaryOp, left: Value, right: Value) -> Value {
    match op {
        BinaryOp::Equal => Value::Bool(left == right),
        BinaryOp::NotEqual => Value::Bool(left != right),
        BinaryOp::Greater => Value::Bool(left.as_number() > right.as_number()),
        BinaryOp::GreaterEqual => Value::Bool(left.as_number() >= right.as_number()),
        BinaryOp::Less => Value::Bool(left.as_number() < right.as_number()),
        BinaryOp::LessEqual => Value::Bool(left.as_number() <= right.as_number()),
        BinaryOp::ShiftLeft => Value::Number(shift(left, right, true)),
        BinaryOp::ShiftRight => Value::Number(shift(left, right, false)),
        BinaryOp::Subtract => Value::Number(left.as_number() - right.as_number()),
        BinaryOp::Divide => Value::Number(left.as_number() / right.as_number()),
        BinaryOp::Multiply => Value::Number(left.as_number() * right.as_number()),
        BinaryOp::Add => match (&left, &right) {
            (Value::Str(a), Value::Str(b)) => Value::Str(format!("{a}{b}")),
            _ => Value::Number(left.as_number() + right.as_number()),
        },
    }
}

fn shift(left: Value, right: Value, to_left: bool) -> f64 {
    let value = left.as_number() as i64;
    let amount = (right.as_number() as i64).clamp(0, 63) as u32;
    let shifted = if to_left {
        value.wrapping_shl(amount)
    } else {
        value.wrapping_shr(amount)
    };
    shifted as f64
}

/// Evaluate a param list into name → value bindings.
pub fn params_to_env(params: &[Expr], env: &Env) -> Env {
    let mut bindings = Env::new();

    for param in params {
        if let Expr::Param(param) = param {
            let value = match &param.value {
                Some(expr) => evaluate(expr, env),
                None => env.get(&param.name).cloned().unwrap_or(Value::Null),
            };
            bindings.insert(param.name.clone(), value);
        }
    }

    bindings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::{self, Assign};
    use std::cell::Cell;

    fn value_of(source: &str, env: &Env) -> Value {
        // Parse `x = <expr>` and evaluate the right-hand side.
        let exprs = dsl::parse(&format!("x = {source}")).unwrap();
        let Expr::Assign(Assign { value, .. }) = &exprs[0] else {
            panic!("expected assign");
        };
        evaluate(value, env)
    }

    #[test]
    fn missing_variable_is_null_not_error() {
        assert_eq!(value_of("nope", &Env::new()), Value::Null);
    }

    #[test]
    fn literal_values() {
        assert_eq!(value_of("42", &Env::new()), Value::Number(42.0));
        assert_eq!(value_of("\"hi\"", &Env::new()), Value::Str("hi".into()));
        assert_eq!(value_of("true", &Env::new()), Value::Bool(true));
    }

    #[test]
    fn unary_operators() {
        assert_eq!(value_of("!0", &Env::new()), Value::Bool(true));
        assert_eq!(value_of("-3", &Env::new()), Value::Number(-3.0));
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert_eq!(value_of("2 + 3 * 4", &Env::new()), Value::Number(14.0));
        assert_eq!(value_of("10 / 4", &Env::new()), Value::Number(2.5));
        assert_eq!(value_of("3 > 2", &Env::new()), Value::Bool(true));
        assert_eq!(value_of("3 == 3", &Env::new()), Value::Bool(true));
        assert_eq!(value_of("3 != 3", &Env::new()), Value::Bool(false));
    }

    #[test]
    fn shifts_operate_on_integers() {
        assert_eq!(value_of("1 << 4", &Env::new()), Value::Number(16.0));
        assert_eq!(value_of("16 >> 2", &Env::new()), Value::Number(4.0));
    }

    #[test]
    fn string_concatenation() {
        let mut env = Env::new();
        env.insert("a".into(), Value::Str("foo".into()));
        env.insert("b".into(), Value::Str("bar".into()));
        assert_eq!(value_of("a + b", &env), Value::Str("foobar".into()));
    }

    #[test]
    fn logical_returns_deciding_operand() {
        let mut env = Env::new();
        env.insert("zero".into(), Value::Number(0.0));
        env.insert("seven".into(), Value::Number(7.0));
        assert_eq!(value_of("zero || seven", &env), Value::Number(7.0));
        assert_eq!(value_of("seven || zero", &env), Value::Number(7.0));
        assert_eq!(value_of("zero && seven", &env), Value::Number(0.0));
        assert_eq!(value_of("seven && zero", &env), Value::Number(0.0));
    }

    #[test]
    fn logical_short_circuits() {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let mut env = Env::new();
        env.insert(
            "probe".into(),
            Value::Builtin(Rc::new(move |_| {
                seen.set(seen.get() + 1);
                Value::Bool(true)
            })),
        );
        env.insert("one".into(), Value::Number(1.0));

        assert_eq!(value_of("one || probe()", &env), Value::Number(1.0));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn ternary_evaluates_one_branch() {
        let count = Rc::new(Cell::new(0));
        let seen = count.clone();
        let mut env = Env::new();
        env.insert(
            "probe".into(),
            Value::Builtin(Rc::new(move |_| {
                seen.set(seen.get() + 1);
                Value::Number(99.0)
            })),
        );

        assert_eq!(value_of("1 ? 5 : probe()", &env), Value::Number(5.0));
        assert_eq!(count.get(), 0);
        assert_eq!(value_of("0 ? 5 : probe()", &env), Value::Number(99.0));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn call_merges_args_over_env() {
        let mut env = Env::new();
        env.insert("x".into(), Value::Number(1.0));
        env.insert(
            "f".into(),
            Value::Builtin(Rc::new(|env| env.get("x").cloned().unwrap_or(Value::Null))),
        );

        assert_eq!(value_of("f()", &env), Value::Number(1.0));
        assert_eq!(value_of("f(x: 2)", &env), Value::Number(2.0));
    }

    #[test]
    fn calling_a_non_function_is_null() {
        let mut env = Env::new();
        env.insert("n".into(), Value::Number(3.0));
        assert_eq!(value_of("n()", &env), Value::Null);
    }

    #[test]
    fn params_copy_bare_names_from_env() {
        let exprs = dsl::parse("x = [p, v: 2 + 3|]").unwrap();
        let Expr::Assign(Assign { value, .. }) = &exprs[0] else {
            panic!("expected assign");
        };
        let Expr::Sequence(seq) = value.as_ref() else {
            panic!("expected sequence");
        };
        let Expr::Tracks(tracks) = &seq.steps[0] else {
            panic!("expected tracks");
        };

        let mut env = Env::new();
        env.insert("p".into(), Value::Number(64.0));

        let message = Message::from_params(&tracks.tracks[0].params, &env);
        assert_eq!(message.number("p"), Some(64.0));
        assert_eq!(message.number("v"), Some(5.0));
    }

    #[test]
    fn silence_marker() {
        let exprs = dsl::parse("x = [-|]").unwrap();
        let Expr::Assign(Assign { value, .. }) = &exprs[0] else {
            panic!("expected assign");
        };
        let Expr::Sequence(seq) = value.as_ref() else {
            panic!("expected sequence");
        };
        let Expr::Tracks(tracks) = &seq.steps[0] else {
            panic!("expected tracks");
        };

        let message = Message::from_params(&tracks.tracks[0].params, &Env::new());
        assert!(message.is_silent());
    }
}
