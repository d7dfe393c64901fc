//! Expression translation: bound host expressions to [`SqlExpr`].

use super::{ClientParameter, Frame, QueryModelVisitor, SourceInfo, table_source};
use crate::error::{RelqError, RelqResult};
use crate::expr::visit::{is_row_dependent, substitute};
use crate::expr::{BinaryOp, Expr, ExprRef, TypeKind, UnaryOp, declaring};
use crate::metadata::Navigation;
use crate::sql::{Join, JoinKind, Projection, Select, SqlBinaryOp, SqlExpr, func};
use crate::translator::{ConversionSite, MemberSite, MethodCallSite, SqlFragment};
use crate::value::ValueType;
use std::collections::HashMap;
use std::sync::Arc;

const CLIENT_PARAMETER_PREFIX: &str = "__c_";

impl<'a> QueryModelVisitor<'a> {
    /// Translate a bound expression. A subtree that has no SQL form but does
    /// not depend on the row is evaluated in process and sent as a parameter.
    pub(crate) fn translate(&mut self, expr: &ExprRef) -> RelqResult<SqlExpr> {
        match self.translate_node(expr) {
            Err(RelqError::Untranslatable { construct, reason }) => {
                if is_row_dependent(expr) || !self.evaluator.can_evaluate(expr) {
                    return Err(RelqError::Untranslatable { construct, reason });
                }
                self.client_evaluated(expr, "value")?;
                Ok(self.lift(expr))
            }
            other => other,
        }
    }

    fn lift(&mut self, expr: &ExprRef) -> SqlExpr {
        if let Some(existing) = self.client_parameters.iter().find(|p| &p.expr == expr) {
            return SqlExpr::Parameter(existing.name.clone());
        }
        let name: Arc<str> =
            format!("{}{}", CLIENT_PARAMETER_PREFIX, self.client_parameters.len()).into();
        self.client_parameters.push(ClientParameter {
            name: name.clone(),
            expr: expr.clone(),
        });
        SqlExpr::Parameter(name)
    }

    fn translate_node(&mut self, expr: &ExprRef) -> RelqResult<SqlExpr> {
        match &**expr {
            Expr::Constant { value, .. } => Ok(SqlExpr::Literal(value.clone())),
            Expr::QueryParameter { name, .. } => Ok(SqlExpr::Parameter(name.clone())),
            Expr::Parameter { name, .. } => Err(RelqError::untranslatable(
                name.to_string(),
                "a lambda parameter cannot be used as a value",
            )),
            Expr::SourceRef { .. } => Err(RelqError::untranslatable(
                expr.to_string(),
                "an entity cannot be used as a scalar value",
            )),
            Expr::Member { target, member, ty } => self.translate_member(expr, target, member, ty),
            Expr::MethodCall {
                target,
                method,
                args,
                ty,
            } => {
                if &*method.declaring == declaring::HOST {
                    return Err(RelqError::untranslatable(
                        expr.to_string(),
                        "host functions have no server translation",
                    ));
                }
                if &*method.declaring == declaring::SEQUENCE {
                    let target = target.as_ref().ok_or_else(|| {
                        RelqError::untranslatable(expr.to_string(), "sequence method without a source")
                    })?;
                    return self.translate_sequence(expr, target, &method.name, args);
                }
                let target = match target {
                    Some(t) => Some(self.fragment(t)?),
                    None => None,
                };
                let mut fragments = Vec::with_capacity(args.len());
                for arg in args {
                    fragments.push(self.fragment(arg)?);
                }
                let site = MethodCallSite {
                    method,
                    target: target.as_ref(),
                    args: &fragments,
                    ty,
                };
                self.registry
                    .translate_method(&site, &mut self.ctx)
                    .ok_or_else(|| {
                        RelqError::untranslatable(expr.to_string(), "no translator for this method")
                    })
            }
            Expr::Binary {
                op, left, right, ty,
            } => self.translate_binary(*op, left, right, &ty.kind),
            Expr::Unary { op, operand, ty } => match op {
                UnaryOp::Not => self.translate_not(operand),
                UnaryOp::Negate => Ok(SqlExpr::Negate(Box::new(self.translate(operand)?))),
                UnaryOp::Convert => {
                    let operand = self.fragment(operand)?;
                    let site = ConversionSite {
                        operand: &operand,
                        to: ty,
                    };
                    self.registry
                        .translate_conversion(&site, &mut self.ctx)
                        .ok_or_else(|| {
                            RelqError::untranslatable(
                                expr.to_string(),
                                format!("no conversion from {} to {}", operand.ty, ty),
                            )
                        })
                }
            },
            Expr::Conditional {
                test,
                if_true,
                if_false,
                ..
            } => Ok(SqlExpr::Case {
                whens: vec![(self.translate(test)?, self.translate(if_true)?)],
                otherwise: Some(Box::new(self.translate(if_false)?)),
            }),
            Expr::Lambda { .. } | Expr::Record { .. } => Err(RelqError::untranslatable(
                expr.to_string(),
                "not a scalar expression",
            )),
        }
    }

    fn fragment(&mut self, expr: &ExprRef) -> RelqResult<SqlFragment> {
        Ok(SqlFragment {
            sql: self.translate(expr)?,
            ty: expr.ty(),
            expr: expr.clone(),
        })
    }

    fn translate_member(
        &mut self,
        expr: &ExprRef,
        target: &ExprRef,
        member: &Arc<str>,
        ty: &crate::expr::ExprType,
    ) -> RelqResult<SqlExpr> {
        if let TypeKind::Entity(_) = target.ty().kind {
            let info = self.entity_source(target)?;
            return match info.entity.property(member) {
                Some(property) => Ok(SqlExpr::column(&info.alias, &property.column)),
                None => Err(RelqError::untranslatable(
                    expr.to_string(),
                    "navigations cannot be used as scalar values",
                )),
            };
        }
        let target = self.fragment(target)?;
        let site = MemberSite {
            target: &target,
            member,
            ty,
        };
        self.registry
            .translate_member(&site, &mut self.ctx)
            .ok_or_else(|| RelqError::untranslatable(expr.to_string(), "no translator for this member"))
    }

    fn translate_binary(
        &mut self,
        op: BinaryOp,
        left: &ExprRef,
        right: &ExprRef,
        kind: &TypeKind,
    ) -> RelqResult<SqlExpr> {
        if op.is_comparison() {
            return self.translate_comparison(op, left, right);
        }
        match op {
            BinaryOp::And => Ok(SqlExpr::and(self.translate(left)?, self.translate(right)?)),
            BinaryOp::Or => Ok(SqlExpr::or(self.translate(left)?, self.translate(right)?)),
            BinaryOp::Coalesce => Ok(SqlExpr::function(
                func::COALESCE,
                vec![self.translate(left)?, self.translate(right)?],
            )),
            BinaryOp::Add if *kind == TypeKind::Text => {
                let l = self.concat_operand(left)?;
                let r = self.concat_operand(right)?;
                Ok(SqlExpr::binary(SqlBinaryOp::Concat, l, r))
            }
            _ => {
                let sql_op = match op {
                    BinaryOp::Add => SqlBinaryOp::Add,
                    BinaryOp::Sub => SqlBinaryOp::Sub,
                    BinaryOp::Mul => SqlBinaryOp::Mul,
                    BinaryOp::Div => SqlBinaryOp::Div,
                    BinaryOp::Mod => SqlBinaryOp::Mod,
                    other => {
                        return Err(RelqError::Internal(format!(
                            "unexpected operator {}",
                            other.symbol()
                        )));
                    }
                };
                Ok(SqlExpr::binary(sql_op, self.translate(left)?, self.translate(right)?))
            }
        }
    }

    /// Concatenation treats NULL as the empty string.
    fn concat_operand(&mut self, expr: &ExprRef) -> RelqResult<SqlExpr> {
        let ty = expr.ty();
        let mut sql = self.translate(expr)?;
        if !ty.is_text() && ty.kind != TypeKind::Null {
            sql = SqlExpr::Cast {
                operand: Box::new(sql),
                to: ValueType::Text,
            };
        }
        if ty.nullable {
            sql = SqlExpr::function(func::COALESCE, vec![sql, SqlExpr::literal("")]);
        }
        Ok(sql)
    }

    /// Comparisons follow host semantics: `null == null` holds and a NULL
    /// operand never makes `!=` unknown.
    fn translate_comparison(
        &mut self,
        op: BinaryOp,
        left: &ExprRef,
        right: &ExprRef,
    ) -> RelqResult<SqlExpr> {
        if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
            let operand = if right.is_null_constant() {
                Some(left)
            } else if left.is_null_constant() {
                Some(right)
            } else {
                None
            };
            if let Some(operand) = operand {
                let sql = self.translate(operand)?;
                return Ok(if op == BinaryOp::Eq {
                    SqlExpr::is_null(sql)
                } else {
                    SqlExpr::is_not_null(sql)
                });
            }
        }

        let l = self.translate(left)?;
        let r = self.translate(right)?;
        let (ln, rn) = (left.ty().nullable, right.ty().nullable);
        let sql_op = comparison_op(op)?;
        let compared = SqlExpr::binary(sql_op, l.clone(), r.clone());
        Ok(match (op, ln, rn) {
            (BinaryOp::Eq, true, true) => SqlExpr::or(
                compared,
                SqlExpr::and(SqlExpr::is_null(l), SqlExpr::is_null(r)),
            ),
            (BinaryOp::Ne, true, true) => SqlExpr::and(
                SqlExpr::or(
                    SqlExpr::or(compared, SqlExpr::is_null(l.clone())),
                    SqlExpr::is_null(r.clone()),
                ),
                SqlExpr::or(SqlExpr::is_not_null(l), SqlExpr::is_not_null(r)),
            ),
            (BinaryOp::Ne, true, false) => SqlExpr::or(compared, SqlExpr::is_null(l)),
            (BinaryOp::Ne, false, true) => SqlExpr::or(compared, SqlExpr::is_null(r)),
            _ => compared,
        })
    }

    /// Negation pushed through the operand, so comparisons against NULL
    /// still come out true where the host would say so.
    pub(crate) fn translate_not(&mut self, operand: &ExprRef) -> RelqResult<SqlExpr> {
        match &**operand {
            Expr::Unary {
                op: UnaryOp::Not,
                operand: inner,
                ..
            } => self.translate(inner),
            Expr::Binary {
                op: BinaryOp::And,
                left,
                right,
                ..
            } => Ok(SqlExpr::or(self.translate_not(left)?, self.translate_not(right)?)),
            Expr::Binary {
                op: BinaryOp::Or,
                left,
                right,
                ..
            } => Ok(SqlExpr::and(self.translate_not(left)?, self.translate_not(right)?)),
            Expr::Binary {
                op, left, right, ..
            } if op.is_comparison() => {
                let negated = op
                    .negated()
                    .ok_or_else(|| RelqError::Internal("comparison without a negation".into()))?;
                let mut sql = self.translate_comparison(negated, left, right)?;
                if !matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
                    for side in [left, right] {
                        if side.ty().nullable && !side.is_null_constant() {
                            sql = SqlExpr::or(sql, SqlExpr::is_null(self.translate(side)?));
                        }
                    }
                }
                Ok(sql)
            }
            _ => Ok(SqlExpr::not(self.translate(operand)?)),
        }
    }

    /// Resolve an entity-typed expression to the source providing its row.
    pub(crate) fn entity_source(&mut self, expr: &ExprRef) -> RelqResult<SourceInfo> {
        match &**expr {
            Expr::SourceRef { source, .. } => self
                .frames
                .iter()
                .rev()
                .find_map(|f| f.sources.get(source))
                .cloned()
                .ok_or_else(|| {
                    RelqError::untranslatable(
                        expr.to_string(),
                        "source is not visible after the preceding result operator",
                    )
                }),
            Expr::Member { target, member, .. } => {
                let parent = self.entity_source(target)?;
                let navigation = parent
                    .entity
                    .navigation(member)
                    .cloned()
                    .ok_or_else(|| {
                        RelqError::Metadata(format!(
                            "'{}' has no navigation '{}'",
                            parent.entity.name, member
                        ))
                    })?;
                if navigation.is_collection() {
                    return Err(RelqError::untranslatable(
                        expr.to_string(),
                        "a collection navigation is not a single entity",
                    ));
                }
                self.join_navigation(&parent, &navigation)
            }
            _ => Err(RelqError::untranslatable(
                expr.to_string(),
                "expression does not denote a query source",
            )),
        }
    }

    /// Join a reference navigation into the select owning `parent`, once per
    /// navigation. The join is inner only when a row is guaranteed to exist.
    pub(crate) fn join_navigation(
        &mut self,
        parent: &SourceInfo,
        navigation: &Navigation,
    ) -> RelqResult<SourceInfo> {
        let key = (parent.alias.clone(), navigation.name.clone());
        if let Some(info) = self.frames[parent.frame].nav_joins.get(&key) {
            return Ok(info.clone());
        }

        let target = self.model.entity(&navigation.target)?.clone();
        let alias = self.fresh_alias(&target.table);
        let pairs = navigation.foreign_key.iter().zip(&navigation.principal_key);
        let condition = SqlExpr::and_all(pairs.map(|(&fk, &pk)| {
            if navigation.foreign_key_on_target {
                SqlExpr::eq(
                    SqlExpr::column(&alias, &target.properties[fk].column),
                    SqlExpr::column(&parent.alias, &parent.entity.properties[pk].column),
                )
            } else {
                SqlExpr::eq(
                    SqlExpr::column(&alias, &target.properties[pk].column),
                    SqlExpr::column(&parent.alias, &parent.entity.properties[fk].column),
                )
            }
        }));
        let inner = navigation.required && !navigation.foreign_key_on_target && !parent.nullable;

        let frame = &mut self.frames[parent.frame];
        frame.select.joins.push(Join {
            kind: if inner { JoinKind::Inner } else { JoinKind::LeftOuter },
            source: table_source(&target, &alias),
            condition,
        });
        let info = SourceInfo {
            alias,
            entity: target,
            nullable: !inner,
            frame: parent.frame,
        };
        frame.nav_joins.insert(key, info.clone());
        Ok(info)
    }

    fn translate_sequence(
        &mut self,
        expr: &ExprRef,
        target: &ExprRef,
        method: &str,
        args: &[ExprRef],
    ) -> RelqResult<SqlExpr> {
        match target.ty().kind {
            TypeKind::Group(_) => self.translate_group_aggregate(expr, method, args),
            TypeKind::Collection(_) => self.translate_correlated(expr, target, method, args),
            _ => Err(RelqError::untranslatable(
                expr.to_string(),
                "sequence methods apply to collection navigations and groups only",
            )),
        }
    }

    /// Aggregates over the current group. Lambda bodies are already bound to
    /// the grouped source.
    fn translate_group_aggregate(
        &mut self,
        expr: &ExprRef,
        method: &str,
        args: &[ExprRef],
    ) -> RelqResult<SqlExpr> {
        let body = args.first().map(|a| a.as_lambda().1.clone());
        match (method, body) {
            ("Count", None) => Ok(SqlExpr::function(func::COUNT, vec![])),
            ("Count", Some(predicate)) => {
                let predicate = self.translate(&predicate)?;
                Ok(SqlExpr::function(
                    func::COUNT,
                    vec![SqlExpr::Case {
                        whens: vec![(predicate, SqlExpr::literal(1))],
                        otherwise: None,
                    }],
                ))
            }
            ("Sum" | "Min" | "Max" | "Average", Some(selector)) => {
                let arg = self.translate(&selector)?;
                Ok(aggregate(method, arg))
            }
            _ => Err(RelqError::untranslatable(
                expr.to_string(),
                format!("{} is not supported over a group", method),
            )),
        }
    }

    /// Sequence methods over a collection navigation become correlated
    /// subqueries against the navigation's target table.
    fn translate_correlated(
        &mut self,
        expr: &ExprRef,
        target: &ExprRef,
        method: &str,
        args: &[ExprRef],
    ) -> RelqResult<SqlExpr> {
        let Expr::Member {
            target: owner,
            member,
            ..
        } = &**target
        else {
            return Err(RelqError::untranslatable(
                expr.to_string(),
                "only collection navigations can be queried",
            ));
        };
        let parent = self.entity_source(owner)?;
        let navigation = parent
            .entity
            .navigation(member)
            .cloned()
            .ok_or_else(|| {
                RelqError::Metadata(format!(
                    "'{}' has no navigation '{}'",
                    parent.entity.name, member
                ))
            })?;
        let child = self.model.entity(&navigation.target)?.clone();
        let alias = self.fresh_alias(&child.table);

        let mut select = Select::new(table_source(&child, &alias));
        for (&fk, &pk) in navigation.foreign_key.iter().zip(&navigation.principal_key) {
            select.add_predicate(SqlExpr::eq(
                SqlExpr::column(&alias, &child.properties[fk].column),
                SqlExpr::column(&parent.alias, &parent.entity.properties[pk].column),
            ));
        }
        self.frames.push(Frame::new(select));
        let result = self.correlated_body(expr, &child, &alias, method, args);
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| RelqError::Internal("subquery frame lost".into()))?;
        let (wrap, projection) = result?;
        let mut select = frame.select;
        select.projection = vec![Projection {
            expr: projection,
            alias: "value".into(),
        }];
        Ok(match wrap {
            Wrap::Exists => SqlExpr::Exists(Box::new(select)),
            Wrap::NotExists => SqlExpr::not(SqlExpr::Exists(Box::new(select))),
            Wrap::Scalar => SqlExpr::Subquery(Box::new(select)),
        })
    }

    fn correlated_body(
        &mut self,
        expr: &ExprRef,
        child: &Arc<crate::metadata::EntityType>,
        alias: &Arc<str>,
        method: &str,
        args: &[ExprRef],
    ) -> RelqResult<(Wrap, SqlExpr)> {
        let id = self.fresh_source_id();
        let element = self.register_source(id, child, alias, false);
        let body = match args.first() {
            Some(lambda) => {
                let (params, body) = lambda.as_lambda();
                let bindings: HashMap<Arc<str>, ExprRef> =
                    params.iter().map(|p| (p.clone(), element.clone())).collect();
                Some(substitute(body, &bindings))
            }
            None => None,
        };

        match (method, body) {
            ("Any", None) => Ok((Wrap::Exists, SqlExpr::literal(1))),
            ("Any", Some(predicate)) => {
                let predicate = self.translate(&predicate)?;
                self.frame_mut()?.select.add_predicate(predicate);
                Ok((Wrap::Exists, SqlExpr::literal(1)))
            }
            ("All", Some(predicate)) => {
                let negated = self.translate_not(&predicate)?;
                self.frame_mut()?.select.add_predicate(negated);
                Ok((Wrap::NotExists, SqlExpr::literal(1)))
            }
            ("Count", None) => Ok((Wrap::Scalar, SqlExpr::function(func::COUNT, vec![]))),
            ("Count", Some(predicate)) => {
                let predicate = self.translate(&predicate)?;
                self.frame_mut()?.select.add_predicate(predicate);
                Ok((Wrap::Scalar, SqlExpr::function(func::COUNT, vec![])))
            }
            ("Sum" | "Min" | "Max" | "Average", Some(selector)) => {
                let arg = self.translate(&selector)?;
                Ok((Wrap::Scalar, aggregate(method, arg)))
            }
            _ => Err(RelqError::untranslatable(
                expr.to_string(),
                format!("{} is not supported over a collection navigation", method),
            )),
        }
    }
}

enum Wrap {
    Exists,
    NotExists,
    Scalar,
}

/// Sum is zero over no rows; Average is computed in floating point.
pub(super) fn aggregate(method: &str, arg: SqlExpr) -> SqlExpr {
    match method {
        "Sum" => SqlExpr::function(
            func::COALESCE,
            vec![SqlExpr::function(func::SUM, vec![arg]), SqlExpr::literal(0)],
        ),
        "Min" => SqlExpr::function(func::MIN, vec![arg]),
        "Max" => SqlExpr::function(func::MAX, vec![arg]),
        _ => SqlExpr::function(
            func::AVG,
            vec![SqlExpr::Cast {
                operand: Box::new(arg),
                to: ValueType::Float,
            }],
        ),
    }
}

fn comparison_op(op: BinaryOp) -> RelqResult<SqlBinaryOp> {
    Ok(match op {
        BinaryOp::Eq => SqlBinaryOp::Eq,
        BinaryOp::Ne => SqlBinaryOp::Ne,
        BinaryOp::Lt => SqlBinaryOp::Lt,
        BinaryOp::Le => SqlBinaryOp::Le,
        BinaryOp::Gt => SqlBinaryOp::Gt,
        BinaryOp::Ge => SqlBinaryOp::Ge,
        other => {
            return Err(RelqError::Internal(format!(
                "{} is not a comparison",
                other.symbol()
            )));
        }
    })
}
