//! In-process expression evaluation with host semantics.
//!
//! Used for sub-expressions that cannot be sent to the server: values that
//! do not depend on a row are computed once at parameter-binding time, and
//! untranslatable filter conjuncts are re-checked against materialized
//! entities. Host semantics differ from SQL: `null == null` is true and any
//! ordering comparison involving null is false.

use crate::error::{RelqError, RelqResult};
use crate::expr::{BinaryOp, Expr, ExprRef, TypeKind, UnaryOp, declaring, types};
use crate::tracking::{EntityId, UnitOfWork};
use crate::value::{Value, ValueType};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A caller-supplied function usable in queries; never translated to SQL.
pub type HostFunction = Arc<dyn Fn(&[Value]) -> RelqResult<Value> + Send + Sync>;

/// Registry of named host functions.
#[derive(Clone, Default)]
pub struct HostFunctions {
    functions: HashMap<Arc<str>, HostFunction>,
}

impl fmt::Debug for HostFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

impl HostFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[Value]) -> RelqResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

/// Values visible to an evaluation.
#[derive(Clone, Copy)]
pub struct EvalEnv<'a> {
    pub params: &'a HashMap<Arc<str>, Value>,
    /// The entity a source reference denotes, for post-materialization filters.
    pub row: Option<EntityId>,
    pub uow: Option<&'a UnitOfWork>,
}

impl<'a> EvalEnv<'a> {
    pub fn new(params: &'a HashMap<Arc<str>, Value>) -> Self {
        Self {
            params,
            row: None,
            uow: None,
        }
    }

    pub fn with_row(mut self, row: EntityId, uow: &'a UnitOfWork) -> Self {
        self.row = Some(row);
        self.uow = Some(uow);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'a> {
    host: &'a HostFunctions,
}

fn fault(message: impl Into<String>) -> RelqError {
    RelqError::ClientEvaluation(message.into())
}

impl<'a> Evaluator<'a> {
    pub fn new(host: &'a HostFunctions) -> Self {
        Self { host }
    }

    /// Whether `evaluate` supports every node of `expr`.
    pub fn can_evaluate(&self, expr: &ExprRef) -> bool {
        match &**expr {
            Expr::Constant { .. } | Expr::QueryParameter { .. } => true,
            Expr::Parameter { .. } | Expr::Lambda { .. } | Expr::Record { .. } => false,
            Expr::SourceRef { .. } => false,
            Expr::Member { target, member, ty } => match &**target {
                Expr::SourceRef { .. } => ty.is_scalar(),
                _ => types::member_type(&target.ty(), member).is_some() && self.can_evaluate(target),
            },
            Expr::MethodCall {
                target,
                method,
                args,
                ..
            } => {
                let supported = match &*method.declaring {
                    declaring::STRING | declaring::MATH | declaring::OBJECT => true,
                    declaring::HOST => self.host.contains(&method.name),
                    _ => false,
                };
                supported
                    && target.iter().all(|t| self.can_evaluate(t))
                    && args.iter().all(|a| self.can_evaluate(a))
            }
            Expr::Binary { left, right, .. } => self.can_evaluate(left) && self.can_evaluate(right),
            Expr::Unary { operand, .. } => self.can_evaluate(operand),
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => self.can_evaluate(test) && self.can_evaluate(if_true) && self.can_evaluate(if_false),
        }
    }

    pub fn evaluate(&self, expr: &ExprRef, env: &EvalEnv<'_>) -> RelqResult<Value> {
        match &**expr {
            Expr::Constant { value, .. } => Ok(value.clone()),
            Expr::QueryParameter { name, .. } => env
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| RelqError::Binding(format!("No value for parameter '{}'", name))),
            Expr::Member { target, member, .. } => {
                if let Expr::SourceRef { .. } = &**target {
                    let (Some(row), Some(uow)) = (env.row, env.uow) else {
                        return Err(fault(format!("'{}' needs a materialized row", expr)));
                    };
                    return uow.property_value(row, member);
                }
                let value = self.evaluate(target, env)?;
                match (value, &**member) {
                    (Value::Text(s), "Length") => Ok(Value::Int(s.chars().count() as i64)),
                    (Value::Null, _) => Err(fault(format!("'{}' is null", target))),
                    (_, m) => Err(fault(format!("member '{}' is not supported", m))),
                }
            }
            Expr::MethodCall {
                target,
                method,
                args,
                ..
            } => {
                let target = target.as_ref().map(|t| self.evaluate(t, env)).transpose()?;
                let args = args
                    .iter()
                    .map(|a| self.evaluate(a, env))
                    .collect::<RelqResult<Vec<_>>>()?;
                self.call(method, target, args)
            }
            Expr::Binary {
                op, left, right, ..
            } => self.binary(*op, left, right, env),
            Expr::Unary { op, operand, ty } => {
                let value = self.evaluate(operand, env)?;
                match op {
                    UnaryOp::Not => match value {
                        Value::Null => Ok(Value::Null),
                        v => Ok(Value::Bool(!truthy(&v))),
                    },
                    UnaryOp::Negate => match value {
                        Value::Int(n) => n
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| fault("integer overflow")),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        Value::Null => Ok(Value::Null),
                        other => Err(fault(format!("cannot negate {}", other))),
                    },
                    UnaryOp::Convert => match ty.value_type() {
                        Some(to) => convert(value, to),
                        None if ty.kind == TypeKind::Object => Ok(value),
                        None => Err(fault(format!("cannot convert to {}", ty))),
                    },
                }
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => {
                if truthy(&self.evaluate(test, env)?) {
                    self.evaluate(if_true, env)
                } else {
                    self.evaluate(if_false, env)
                }
            }
            Expr::Parameter { .. } | Expr::SourceRef { .. } | Expr::Lambda { .. } | Expr::Record { .. } => {
                Err(fault(format!("'{}' cannot be evaluated in process", expr)))
            }
        }
    }

    /// Evaluate a predicate; NULL counts as false.
    pub fn predicate(&self, expr: &ExprRef, env: &EvalEnv<'_>) -> RelqResult<bool> {
        Ok(truthy(&self.evaluate(expr, env)?))
    }

    fn binary(&self, op: BinaryOp, left: &ExprRef, right: &ExprRef, env: &EvalEnv<'_>) -> RelqResult<Value> {
        match op {
            BinaryOp::And => {
                if !truthy(&self.evaluate(left, env)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&self.evaluate(right, env)?)))
            }
            BinaryOp::Or => {
                if truthy(&self.evaluate(left, env)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&self.evaluate(right, env)?)))
            }
            BinaryOp::Coalesce => match self.evaluate(left, env)? {
                Value::Null => self.evaluate(right, env),
                v => Ok(v),
            },
            _ => {
                let l = self.evaluate(left, env)?;
                let r = self.evaluate(right, env)?;
                arithmetic_or_compare(op, l, r)
            }
        }
    }

    fn call(&self, method: &crate::expr::Method, target: Option<Value>, args: Vec<Value>) -> RelqResult<Value> {
        match &*method.declaring {
            declaring::HOST => {
                let f = self
                    .host
                    .get(&method.name)
                    .ok_or_else(|| fault(format!("unknown host function '{}'", method.name)))?;
                f(&args)
            }
            declaring::STRING => string_method(&method.name, target, &args),
            declaring::MATH => math_method(&method.name, &args),
            declaring::OBJECT if &*method.name == "Equals" => match (target, args.as_slice()) {
                (Some(Value::Null), _) => Err(fault("Equals called on null")),
                (Some(t), [a]) => Ok(Value::Bool(t.host_eq(a))),
                (None, [a, b]) => Ok(Value::Bool(a.host_eq(b))),
                _ => Err(fault("Equals takes one argument")),
            },
            _ => Err(fault(format!("method '{}' is not supported", method))),
        }
    }
}

fn truthy(value: &Value) -> bool {
    value.as_bool().unwrap_or(false)
}

fn arithmetic_or_compare(op: BinaryOp, l: Value, r: Value) -> RelqResult<Value> {
    use std::cmp::Ordering::*;
    if op.is_comparison() {
        let result = match op {
            BinaryOp::Eq => l.host_eq(&r),
            BinaryOp::Ne => !l.host_eq(&r),
            _ => match l.compare(&r) {
                Some(ord) => match op {
                    BinaryOp::Lt => ord == Less,
                    BinaryOp::Le => ord != Greater,
                    BinaryOp::Gt => ord == Greater,
                    BinaryOp::Ge => ord != Less,
                    _ => false,
                },
                None => false,
            },
        };
        return Ok(Value::Bool(result));
    }

    if op == BinaryOp::Add {
        if let (Value::Text(_), _) | (_, Value::Text(_)) = (&l, &r) {
            let text = |v: Value| match v {
                Value::Null => String::new(),
                Value::Text(s) => s,
                other => other.to_string(),
            };
            return Ok(Value::Text(text(l) + &text(r)));
        }
    }

    match (l, r) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinaryOp::Add => a.checked_add(b),
                BinaryOp::Sub => a.checked_sub(b),
                BinaryOp::Mul => a.checked_mul(b),
                BinaryOp::Div if b == 0 => return Err(fault("division by zero")),
                BinaryOp::Div => a.checked_div(b),
                BinaryOp::Mod if b == 0 => return Err(fault("division by zero")),
                BinaryOp::Mod => a.checked_rem(b),
                _ => return Err(fault(format!("operator '{}' on integers", op.symbol()))),
            };
            result.map(Value::Int).ok_or_else(|| fault("integer overflow"))
        }
        (a, b) => {
            let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) else {
                return Err(fault(format!("operator '{}' on {} and {}", op.symbol(), a, b)));
            };
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Mod => x % y,
                _ => return Err(fault(format!("operator '{}' on numbers", op.symbol()))),
            };
            Ok(Value::Float(result))
        }
    }
}

fn convert(value: Value, to: ValueType) -> RelqResult<Value> {
    match (value, to) {
        (Value::Float(f), ValueType::Int) => Ok(Value::Int(f.trunc() as i64)),
        (value, to) => crate::metadata::coerce(value, to).map_err(|e| fault(e.to_string())),
    }
}

fn text_arg(args: &[Value], i: usize) -> RelqResult<&str> {
    match args.get(i) {
        Some(Value::Text(s)) => Ok(s),
        Some(Value::Null) => Err(fault("string argument is null")),
        _ => Err(fault("expected a string argument")),
    }
}

fn int_arg(args: &[Value], i: usize) -> RelqResult<i64> {
    args.get(i)
        .and_then(Value::as_i64)
        .ok_or_else(|| fault("expected an integer argument"))
}

fn string_method(name: &str, target: Option<Value>, args: &[Value]) -> RelqResult<Value> {
    if name == "Compare" {
        let ord = match (args.first(), args.get(1)) {
            (Some(Value::Null), Some(Value::Null)) => std::cmp::Ordering::Equal,
            (Some(Value::Null), Some(_)) => std::cmp::Ordering::Less,
            (Some(_), Some(Value::Null)) => std::cmp::Ordering::Greater,
            _ => text_arg(args, 0)?.cmp(text_arg(args, 1)?),
        };
        return Ok(Value::Int(ord as i64));
    }
    let s = match target {
        Some(Value::Text(s)) => s,
        Some(Value::Null) => return Err(fault(format!("{} called on null", name))),
        _ => return Err(fault(format!("{} requires a string target", name))),
    };
    let value = match name {
        "Contains" => Value::Bool(s.contains(text_arg(args, 0)?)),
        "StartsWith" => Value::Bool(s.starts_with(text_arg(args, 0)?)),
        "EndsWith" => Value::Bool(s.ends_with(text_arg(args, 0)?)),
        "ToUpper" => Value::Text(s.to_uppercase()),
        "ToLower" => Value::Text(s.to_lowercase()),
        "Trim" => Value::Text(s.trim().to_string()),
        "Replace" => Value::Text(s.replace(text_arg(args, 0)?, text_arg(args, 1)?)),
        "IndexOf" => {
            let needle = text_arg(args, 0)?;
            Value::Int(match s.find(needle) {
                Some(byte) => s[..byte].chars().count() as i64,
                None => -1,
            })
        }
        "Substring" => {
            let start = int_arg(args, 0)?;
            let len = int_arg(args, 1)?;
            let count = s.chars().count() as i64;
            if start < 0 || len < 0 || start + len > count {
                return Err(fault("Substring arguments out of range"));
            }
            Value::Text(s.chars().skip(start as usize).take(len as usize).collect())
        }
        other => return Err(fault(format!("string.{} is not supported", other))),
    };
    Ok(value)
}

fn math_method(name: &str, args: &[Value]) -> RelqResult<Value> {
    let arg = args.first().cloned().unwrap_or(Value::Null);
    let value = match (name, arg) {
        (_, Value::Null) => Value::Null,
        ("Abs", Value::Int(n)) => Value::Int(n.checked_abs().ok_or_else(|| fault("integer overflow"))?),
        ("Round" | "Floor" | "Ceiling", Value::Int(n)) => Value::Int(n),
        ("Abs", Value::Float(f)) => Value::Float(f.abs()),
        ("Round", Value::Float(f)) => Value::Float(f.round_ties_even()),
        ("Floor", Value::Float(f)) => Value::Float(f.floor()),
        ("Ceiling", Value::Float(f)) => Value::Float(f.ceil()),
        (name, other) => return Err(fault(format!("Math.{} of {}", name, other))),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{E, lit, null, param};

    fn eval(e: E, params: &HashMap<Arc<str>, Value>, host: &HostFunctions) -> RelqResult<Value> {
        Evaluator::new(host).evaluate(e.expr(), &EvalEnv::new(params))
    }

    #[test]
    fn test_host_null_semantics() {
        let host = HostFunctions::new();
        let params = HashMap::new();
        assert_eq!(eval(null().eq(null()), &params, &host).unwrap(), Value::Bool(true));
        assert_eq!(eval(null().lt(1), &params, &host).unwrap(), Value::Bool(false));
        assert_eq!(eval(lit("a").add(null()), &params, &host).unwrap(), Value::Text("a".into()));
    }

    #[test]
    fn test_string_methods() {
        let host = HostFunctions::new();
        let params = HashMap::from([(Arc::from("s"), Value::Text("héllo".into()))]);
        let s = param("s", ValueType::Text);
        assert_eq!(eval(s.index_of("llo"), &params, &host).unwrap(), Value::Int(2));
        assert_eq!(eval(s.substring(1, 3), &params, &host).unwrap(), Value::Text("éll".into()));
        assert_eq!(eval(s.length(), &params, &host).unwrap(), Value::Int(5));
        assert_eq!(
            eval(E::compare("a", "b"), &params, &host).unwrap(),
            Value::Int(-1)
        );
    }

    #[test]
    fn test_host_functions() {
        let mut host = HostFunctions::new();
        host.register("double", |args: &[Value]| {
            Ok(Value::Int(args[0].as_i64().unwrap_or(0) * 2))
        });
        let call = E::host("double", vec![lit(21)]);
        assert!(Evaluator::new(&host).can_evaluate(call.expr()));
        assert_eq!(eval(call, &HashMap::new(), &host).unwrap(), Value::Int(42));

        let unknown = E::host("missing", vec![]);
        assert!(!Evaluator::new(&host).can_evaluate(unknown.expr()));
    }

    #[test]
    fn test_missing_parameter_is_a_binding_error() {
        let host = HostFunctions::new();
        let err = eval(param("x", ValueType::Int).add(1), &HashMap::new(), &host).unwrap_err();
        assert!(matches!(err, RelqError::Binding(_)));
    }
}
