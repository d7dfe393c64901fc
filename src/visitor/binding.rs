//! Binding of clause lambdas to query sources.
//!
//! The builders leave member and method types unknown. Binding substitutes
//! each lambda parameter with the expression it ranges over (a source
//! reference, a group, or a sequence element) and resolves static types
//! against metadata, bottom-up.

use crate::error::{RelqError, RelqResult};
use crate::expr::visit::{map_children, substitute};
use crate::expr::{BinaryOp, Expr, ExprRef, ExprType, TypeKind, UnaryOp, declaring, types};
use crate::metadata::Model;
use std::collections::HashMap;
use std::sync::Arc;

/// Name of the placeholder parameter that stands for the current group.
pub const GROUP_PARAMETER: &str = "<group>";

/// The grouping in effect after a `group_by` clause.
#[derive(Debug, Clone)]
pub struct GroupBinding {
    /// Bound grouping key; `g.Key` resolves to it.
    pub key: ExprRef,
    /// Bound element expression aggregates range over.
    pub element: ExprRef,
}

impl GroupBinding {
    /// The expression lambdas receive in place of the group.
    pub fn placeholder(&self) -> ExprRef {
        let entity = self
            .element
            .ty()
            .entity_name()
            .cloned()
            .unwrap_or_else(|| Arc::from("?"));
        Arc::new(Expr::Parameter {
            name: GROUP_PARAMETER.into(),
            ty: ExprType::new(TypeKind::Group(entity), false),
        })
    }
}

pub struct Binder<'a> {
    model: &'a Model,
    group: Option<GroupBinding>,
}

impl<'a> Binder<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self { model, group: None }
    }

    pub fn set_group(&mut self, group: GroupBinding) {
        self.group = Some(group);
    }

    pub fn group(&self) -> Option<&GroupBinding> {
        self.group.as_ref()
    }

    /// Substitute `lambda`'s parameters with `args` and bind the body.
    pub fn bind_lambda(&self, lambda: &ExprRef, args: &[ExprRef]) -> RelqResult<ExprRef> {
        let (params, body) = lambda.as_lambda();
        if params.len() != args.len() {
            return Err(RelqError::untranslatable(
                lambda.to_string(),
                format!(
                    "lambda takes {} parameters but {} sources are in scope",
                    params.len(),
                    args.len()
                ),
            ));
        }
        let bindings: HashMap<Arc<str>, ExprRef> =
            params.iter().cloned().zip(args.iter().cloned()).collect();
        self.bind(&substitute(body, &bindings))
    }

    /// Resolve static types of `expr` and its children.
    pub fn bind(&self, expr: &ExprRef) -> RelqResult<ExprRef> {
        match &**expr {
            Expr::Constant { .. }
            | Expr::Parameter { .. }
            | Expr::QueryParameter { .. }
            | Expr::SourceRef { .. } => Ok(expr.clone()),
            Expr::Member { target, member, .. } => {
                let target = self.bind(target)?;
                self.bind_member(target, member)
            }
            Expr::MethodCall {
                target,
                method,
                args,
                ..
            } => {
                let target = target.as_ref().map(|t| self.bind(t)).transpose()?;
                if &*method.declaring == declaring::SEQUENCE {
                    return self.bind_sequence_call(target, method, args);
                }
                let args = args
                    .iter()
                    .map(|a| self.bind(a))
                    .collect::<RelqResult<Vec<_>>>()?;
                let arg_types: Vec<ExprType> = args.iter().map(|a| a.ty()).collect();
                let ty = types::method_type(
                    method,
                    target.as_ref().map(|t| t.ty()).as_ref(),
                    &arg_types,
                    None,
                );
                Ok(Arc::new(Expr::MethodCall {
                    target,
                    method: method.clone(),
                    args,
                    ty,
                }))
            }
            Expr::Binary {
                op, left, right, ..
            } => {
                let left = self.bind(left)?;
                let right = self.bind(right)?;
                let (left, right) = infer_parameter_types(*op, left, right);
                let ty = types::binary_type(*op, &left.ty(), &right.ty());
                Ok(Arc::new(Expr::Binary {
                    op: *op,
                    left,
                    right,
                    ty,
                }))
            }
            Expr::Unary { op, operand, ty } => {
                let operand = self.bind(operand)?;
                let ty = match op {
                    UnaryOp::Not => ExprType::bool(),
                    UnaryOp::Negate => operand.ty(),
                    UnaryOp::Convert => ty.clone(),
                };
                Ok(Arc::new(Expr::Unary {
                    op: *op,
                    operand,
                    ty,
                }))
            }
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => {
                let test = self.bind(test)?;
                let if_true = self.bind(if_true)?;
                let if_false = self.bind(if_false)?;
                let (t, f) = (if_true.ty(), if_false.ty());
                let kind = if t.kind == TypeKind::Null {
                    f.kind.clone()
                } else {
                    t.kind.clone()
                };
                Ok(Arc::new(Expr::Conditional {
                    test,
                    if_true,
                    if_false,
                    ty: ExprType::new(kind, t.nullable || f.nullable),
                }))
            }
            Expr::Lambda { .. } | Expr::Record { .. } => map_children(expr, |c| self.bind(c)),
        }
    }

    fn bind_member(&self, target: ExprRef, member: &Arc<str>) -> RelqResult<ExprRef> {
        let target_ty = target.ty();
        let ty = match &target_ty.kind {
            TypeKind::Entity(name) => {
                let entity = self.model.entity(name)?;
                if let Some(property) = entity.property(member) {
                    ExprType::scalar(property.value_type, property.nullable || target_ty.nullable)
                } else if let Some(nav) = entity.navigation(member) {
                    if nav.is_collection() {
                        ExprType::collection(nav.target.clone())
                    } else {
                        ExprType::new(
                            TypeKind::Entity(nav.target.clone()),
                            !nav.required || nav.foreign_key_on_target || target_ty.nullable,
                        )
                    }
                } else {
                    return Err(RelqError::Metadata(format!(
                        "'{}' has no property or navigation '{}'",
                        name, member
                    )));
                }
            }
            TypeKind::Group(_) if &**member == "Key" => {
                return match &self.group {
                    Some(group) => Ok(group.key.clone()),
                    None => Err(RelqError::Internal("group key outside group_by".into())),
                };
            }
            TypeKind::Record => {
                let Expr::Record { fields } = &*target else {
                    return Err(RelqError::untranslatable(
                        format!("{}.{}", target, member),
                        "member access on a computed record",
                    ));
                };
                return fields
                    .iter()
                    .find(|(name, _)| name == member)
                    .map(|(_, e)| e.clone())
                    .ok_or_else(|| {
                        RelqError::Metadata(format!("record has no field '{}'", member))
                    });
            }
            _ => types::member_type(&target_ty, member).unwrap_or_else(ExprType::unknown),
        };
        Ok(Arc::new(Expr::Member {
            target,
            member: member.clone(),
            ty,
        }))
    }

    /// Sequence methods over collection navigations and groups. Lambda
    /// arguments are bound with their parameter typed as the element.
    fn bind_sequence_call(
        &self,
        target: Option<ExprRef>,
        method: &crate::expr::Method,
        args: &[ExprRef],
    ) -> RelqResult<ExprRef> {
        let target_ty = target.as_ref().map(|t| t.ty());
        let element: Option<ExprRef> = match target_ty.as_ref().map(|t| &t.kind) {
            Some(TypeKind::Group(_)) => self.group.as_ref().map(|g| g.element.clone()),
            _ => None,
        };
        let element_ty = match target_ty.as_ref().map(|t| &t.kind) {
            Some(TypeKind::Collection(name)) | Some(TypeKind::Group(name)) => {
                ExprType::entity(name.clone())
            }
            _ => {
                return Err(RelqError::untranslatable(
                    method.to_string(),
                    "sequence methods apply to collection navigations and groups only",
                ));
            }
        };

        let mut bound_args = Vec::with_capacity(args.len());
        let mut selector = None;
        for arg in args {
            match &**arg {
                Expr::Lambda { params, body } if params.len() == 1 => {
                    let replacement = match &element {
                        Some(e) => e.clone(),
                        None => Arc::new(Expr::Parameter {
                            name: params[0].clone(),
                            ty: element_ty.clone(),
                        }),
                    };
                    let bindings = HashMap::from([(params[0].clone(), replacement)]);
                    let body = self.bind(&substitute(body, &bindings))?;
                    selector = Some(body.ty());
                    bound_args.push(Arc::new(Expr::Lambda {
                        params: params.clone(),
                        body,
                    }));
                }
                _ => bound_args.push(self.bind(arg)?),
            }
        }
        let ty = types::method_type(method, target_ty.as_ref(), &[], selector.as_ref());
        Ok(Arc::new(Expr::MethodCall {
            target,
            method: method.clone(),
            args: bound_args,
            ty,
        }))
    }
}

/// A query parameter of unknown type takes the type of the operand it is
/// compared with, and may hold NULL.
fn infer_parameter_types(op: BinaryOp, left: ExprRef, right: ExprRef) -> (ExprRef, ExprRef) {
    if !(op.is_comparison() || op == BinaryOp::Coalesce || op == BinaryOp::Add) {
        return (left, right);
    }
    let typed = |param: &ExprRef, other: &ExprRef| -> Option<ExprRef> {
        match &**param {
            Expr::QueryParameter { name, ty } if ty.kind == TypeKind::Unknown => {
                let other_ty = other.ty();
                other_ty.is_scalar().then(|| {
                    Arc::new(Expr::QueryParameter {
                        name: name.clone(),
                        ty: other_ty.with_nullable(true),
                    })
                })
            }
            _ => None,
        }
    };
    let new_left = typed(&left, &right);
    let new_right = typed(&right, &left);
    (new_left.unwrap_or(left), new_right.unwrap_or(right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::E;
    use crate::metadata::{EntityDef, NavigationDef, nullable_prop, prop};
    use crate::query::SourceId;
    use crate::value::ValueType;

    fn model() -> Model {
        Model::builder()
            .entity(
                EntityDef::new("Customer")
                    .key(["Id"])
                    .property(prop("Id", ValueType::Int))
                    .property(nullable_prop("Name", ValueType::Text))
                    .navigation(NavigationDef::collection("Orders", "Order", ["CustomerId"])),
            )
            .entity(
                EntityDef::new("Order")
                    .key(["Id"])
                    .property(prop("Id", ValueType::Int))
                    .property(nullable_prop("CustomerId", ValueType::Int))
                    .property(prop("Total", ValueType::Float))
                    .navigation(NavigationDef::reference("Customer", "Customer", ["CustomerId"])),
            )
            .build()
            .unwrap()
    }

    fn source(entity: &str) -> ExprRef {
        Arc::new(Expr::SourceRef {
            source: SourceId(0),
            ty: ExprType::entity(entity),
        })
    }

    #[test]
    fn test_binds_property_and_navigation_types() {
        let model = model();
        let binder = Binder::new(&model);
        let lambda = E::lambda1(|o| o.member("Customer").member("Name")).into_ref();
        let bound = binder.bind_lambda(&lambda, &[source("Order")]).unwrap();
        assert_eq!(bound.ty(), ExprType::scalar(ValueType::Text, true));
        let Expr::Member { target, .. } = &*bound else {
            panic!("expected member");
        };
        assert_eq!(
            target.ty(),
            ExprType::new(TypeKind::Entity("Customer".into()), true)
        );
    }

    #[test]
    fn test_unknown_member_is_a_metadata_error() {
        let model = model();
        let binder = Binder::new(&model);
        let lambda = E::lambda1(|o| o.member("Nope")).into_ref();
        let err = binder.bind_lambda(&lambda, &[source("Order")]).unwrap_err();
        assert!(matches!(err, RelqError::Metadata(_)));
    }

    #[test]
    fn test_sequence_lambda_parameter_is_typed_as_element() {
        let model = model();
        let binder = Binder::new(&model);
        let lambda = E::lambda1(|c| c.member("Orders").any_where(|o| o.member("Total").gt(5.0)))
            .into_ref();
        let bound = binder.bind_lambda(&lambda, &[source("Customer")]).unwrap();
        assert_eq!(bound.ty(), ExprType::bool());
        let Expr::MethodCall { args, .. } = &*bound else {
            panic!("expected call");
        };
        let (_, body) = args[0].as_lambda();
        let Expr::Binary { left, .. } = &**body else {
            panic!("expected comparison");
        };
        assert_eq!(left.ty(), ExprType::float());
    }

    #[test]
    fn test_untyped_parameter_takes_operand_type() {
        let model = model();
        let binder = Binder::new(&model);
        let untyped = E(Arc::new(Expr::QueryParameter {
            name: "total".into(),
            ty: ExprType::unknown(),
        }));
        let lambda = E::lambda1(|o| o.member("Total").ge(untyped)).into_ref();
        let bound = binder.bind_lambda(&lambda, &[source("Order")]).unwrap();
        let Expr::Binary { right, .. } = &*bound else {
            panic!("expected comparison");
        };
        assert_eq!(right.ty(), ExprType::scalar(ValueType::Float, true));
    }
}
