//! Fluent construction of expression trees.
//!
//! ```ignore
//! use relq::expr::E;
//! let pred = E::lambda1(|p| p.member("Price").ge(10).and(p.member("Name").starts_with("A")));
//! ```

use super::{BinaryOp, Expr, ExprRef, ExprType, Method, TypeKind, UnaryOp, declaring};
use crate::value::{Value, ValueType};
use std::cell::Cell;
use std::sync::Arc;

thread_local! {
    static LAMBDA_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Expression builder handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct E(pub ExprRef);

/// A constant.
pub fn lit(value: impl Into<Value>) -> E {
    E(Expr::constant(value.into()))
}

/// The `null` literal.
pub fn null() -> E {
    E(Expr::constant(Value::Null))
}

/// A named query parameter bound at execution time.
pub fn param(name: &str, ty: ValueType) -> E {
    E(Arc::new(Expr::QueryParameter {
        name: name.into(),
        ty: ExprType::scalar(ty, false),
    }))
}

/// A named query parameter whose value may be NULL.
pub fn nullable_param(name: &str, ty: ValueType) -> E {
    E(Arc::new(Expr::QueryParameter {
        name: name.into(),
        ty: ExprType::scalar(ty, true),
    }))
}

macro_rules! literal_into_e {
    ($($t:ty),*) => {
        $(impl From<$t> for E {
            fn from(value: $t) -> Self {
                lit(value)
            }
        })*
    };
}

literal_into_e!(bool, i32, i64, f64, &str, String, Value);

impl std::fmt::Display for E {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&E> for E {
    fn from(e: &E) -> Self {
        e.clone()
    }
}

impl E {
    pub fn into_ref(self) -> ExprRef {
        self.0
    }

    pub fn expr(&self) -> &ExprRef {
        &self.0
    }

    /// Build a lambda of `arity` parameters. Parameter names encode the
    /// nesting depth so nested lambdas never shadow each other.
    pub fn lambda(arity: usize, f: impl FnOnce(&[E]) -> E) -> E {
        let depth = LAMBDA_DEPTH.with(|d| {
            let depth = d.get();
            d.set(depth + 1);
            depth
        });
        let names: Vec<Arc<str>> = (0..arity)
            .map(|i| {
                if arity == 1 {
                    format!("x{}", depth).into()
                } else {
                    format!("x{}_{}", depth, i).into()
                }
            })
            .collect();
        let params: Vec<E> = names
            .iter()
            .map(|name| {
                E(Arc::new(Expr::Parameter {
                    name: name.clone(),
                    ty: ExprType::unknown(),
                }))
            })
            .collect();
        let body = f(&params);
        LAMBDA_DEPTH.with(|d| d.set(depth));
        E(Arc::new(Expr::Lambda {
            params: names,
            body: body.0,
        }))
    }

    pub fn lambda1(f: impl FnOnce(E) -> E) -> E {
        Self::lambda(1, |p| f(p[0].clone()))
    }

    pub fn member(&self, name: &str) -> E {
        E(Arc::new(Expr::Member {
            target: self.0.clone(),
            member: name.into(),
            ty: ExprType::unknown(),
        }))
    }

    /// Instance method call.
    pub fn method(&self, declaring: &str, name: &str, args: Vec<E>) -> E {
        E(Arc::new(Expr::MethodCall {
            target: Some(self.0.clone()),
            method: Method::new(declaring, name),
            args: args.into_iter().map(|a| a.0).collect(),
            ty: ExprType::unknown(),
        }))
    }

    /// Static method call.
    pub fn call(declaring: &str, name: &str, args: Vec<E>) -> E {
        E(Arc::new(Expr::MethodCall {
            target: None,
            method: Method::new(declaring, name),
            args: args.into_iter().map(|a| a.0).collect(),
            ty: ExprType::unknown(),
        }))
    }

    /// Call a registered host function.
    pub fn host(name: &str, args: Vec<E>) -> E {
        Self::call(declaring::HOST, name, args)
    }

    fn binary(&self, op: BinaryOp, other: impl Into<E>) -> E {
        E(Arc::new(Expr::Binary {
            op,
            left: self.0.clone(),
            right: other.into().0,
            ty: ExprType::unknown(),
        }))
    }

    fn unary(&self, op: UnaryOp, ty: ExprType) -> E {
        E(Arc::new(Expr::Unary {
            op,
            operand: self.0.clone(),
            ty,
        }))
    }

    pub fn eq(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Eq, other)
    }

    pub fn ne(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Ne, other)
    }

    pub fn lt(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Lt, other)
    }

    pub fn le(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Le, other)
    }

    pub fn gt(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Gt, other)
    }

    pub fn ge(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Ge, other)
    }

    pub fn and(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::And, other)
    }

    pub fn or(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Or, other)
    }

    pub fn add(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Add, other)
    }

    pub fn sub(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Sub, other)
    }

    pub fn mul(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Mul, other)
    }

    pub fn div(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Div, other)
    }

    pub fn rem(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Mod, other)
    }

    pub fn coalesce(&self, other: impl Into<E>) -> E {
        self.binary(BinaryOp::Coalesce, other)
    }

    pub fn not(&self) -> E {
        self.unary(UnaryOp::Not, ExprType::unknown())
    }

    pub fn neg(&self) -> E {
        self.unary(UnaryOp::Negate, ExprType::unknown())
    }

    pub fn is_null(&self) -> E {
        self.eq(null())
    }

    pub fn is_not_null(&self) -> E {
        self.ne(null())
    }

    /// Explicit conversion to a scalar type.
    pub fn cast(&self, ty: ValueType) -> E {
        self.unary(UnaryOp::Convert, ExprType::scalar(ty, true))
    }

    /// Box to `object`, as when a value is passed to `Equals(object)`.
    pub fn as_object(&self) -> E {
        self.unary(UnaryOp::Convert, ExprType::new(TypeKind::Object, true))
    }

    pub fn cond(test: E, if_true: impl Into<E>, if_false: impl Into<E>) -> E {
        E(Arc::new(Expr::Conditional {
            test: test.0,
            if_true: if_true.into().0,
            if_false: if_false.into().0,
            ty: ExprType::unknown(),
        }))
    }

    pub fn record<'a>(fields: impl IntoIterator<Item = (&'a str, E)>) -> E {
        E(Arc::new(Expr::Record {
            fields: fields
                .into_iter()
                .map(|(name, e)| (Arc::from(name), e.0))
                .collect(),
        }))
    }

    // object

    pub fn equals(&self, other: impl Into<E>) -> E {
        self.method(declaring::OBJECT, "Equals", vec![other.into()])
    }

    // string

    pub fn contains(&self, other: impl Into<E>) -> E {
        self.method(declaring::STRING, "Contains", vec![other.into()])
    }

    pub fn starts_with(&self, other: impl Into<E>) -> E {
        self.method(declaring::STRING, "StartsWith", vec![other.into()])
    }

    pub fn ends_with(&self, other: impl Into<E>) -> E {
        self.method(declaring::STRING, "EndsWith", vec![other.into()])
    }

    pub fn to_upper(&self) -> E {
        self.method(declaring::STRING, "ToUpper", vec![])
    }

    pub fn to_lower(&self) -> E {
        self.method(declaring::STRING, "ToLower", vec![])
    }

    pub fn trim(&self) -> E {
        self.method(declaring::STRING, "Trim", vec![])
    }

    pub fn length(&self) -> E {
        self.member("Length")
    }

    pub fn substring(&self, start: impl Into<E>, len: impl Into<E>) -> E {
        self.method(declaring::STRING, "Substring", vec![start.into(), len.into()])
    }

    pub fn index_of(&self, other: impl Into<E>) -> E {
        self.method(declaring::STRING, "IndexOf", vec![other.into()])
    }

    pub fn replace(&self, from: impl Into<E>, to: impl Into<E>) -> E {
        self.method(declaring::STRING, "Replace", vec![from.into(), to.into()])
    }

    pub fn compare(a: impl Into<E>, b: impl Into<E>) -> E {
        Self::call(declaring::STRING, "Compare", vec![a.into(), b.into()])
    }

    // math

    pub fn abs(&self) -> E {
        Self::call(declaring::MATH, "Abs", vec![self.clone()])
    }

    pub fn round(&self) -> E {
        Self::call(declaring::MATH, "Round", vec![self.clone()])
    }

    pub fn floor(&self) -> E {
        Self::call(declaring::MATH, "Floor", vec![self.clone()])
    }

    pub fn ceiling(&self) -> E {
        Self::call(declaring::MATH, "Ceiling", vec![self.clone()])
    }

    // sequences (collection navigations and groups)

    pub fn any(&self) -> E {
        self.method(declaring::SEQUENCE, "Any", vec![])
    }

    pub fn any_where(&self, f: impl FnOnce(E) -> E) -> E {
        self.method(declaring::SEQUENCE, "Any", vec![E::lambda1(f)])
    }

    pub fn all(&self, f: impl FnOnce(E) -> E) -> E {
        self.method(declaring::SEQUENCE, "All", vec![E::lambda1(f)])
    }

    pub fn count(&self) -> E {
        self.method(declaring::SEQUENCE, "Count", vec![])
    }

    pub fn count_where(&self, f: impl FnOnce(E) -> E) -> E {
        self.method(declaring::SEQUENCE, "Count", vec![E::lambda1(f)])
    }

    pub fn sum(&self, f: impl FnOnce(E) -> E) -> E {
        self.method(declaring::SEQUENCE, "Sum", vec![E::lambda1(f)])
    }

    pub fn min(&self, f: impl FnOnce(E) -> E) -> E {
        self.method(declaring::SEQUENCE, "Min", vec![E::lambda1(f)])
    }

    pub fn max(&self, f: impl FnOnce(E) -> E) -> E {
        self.method(declaring::SEQUENCE, "Max", vec![E::lambda1(f)])
    }

    pub fn average(&self, f: impl FnOnce(E) -> E) -> E {
        self.method(declaring::SEQUENCE, "Average", vec![E::lambda1(f)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_lambdas_get_distinct_names() {
        let e = E::lambda1(|c| c.member("Orders").any_where(|o| o.member("Total").gt(c.member("Limit"))));
        let s = e.to_string();
        assert!(s.starts_with("x0 => x0.Orders.Any(x1 => "), "{}", s);
    }

    #[test]
    fn test_lambda_names_are_stable_across_builds() {
        let a = E::lambda1(|p| p.member("Price").gt(1));
        let b = E::lambda1(|p| p.member("Price").gt(1));
        assert_eq!(a, b);
    }
}
