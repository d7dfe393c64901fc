//! Query model visitor.
//!
//! Walks a [`QueryModel`] clause by clause, binds each clause lambda to the
//! query sources in scope and builds one [`Select`] together with the
//! [`Shaper`] that reads its projection. Everything that cannot run on the
//! server is recorded as client work: derived parameters, post filters and
//! in-memory result operators.

pub mod binding;
mod expression;
mod include;

use crate::error::{Diagnostic, DiagnosticCode, RelqError, RelqResult};
use crate::eval::Evaluator;
use crate::expr::{BinaryOp, Expr, ExprRef, ExprType, TypeKind, UnaryOp};
use crate::metadata::{EntityType, Model, Property};
use crate::query::{BodyClause, QueryModel, ResultOperator, SourceId};
use crate::shaper::{EntityShaper, Shaper};
use crate::sql::verify::verify;
use crate::sql::{Join, JoinKind, OrderItem, Projection, Select, SqlExpr, TableSource, func};
use crate::translator::{TranslationContext, TranslatorRegistry};
use crate::value::ValueType;
use binding::{Binder, GroupBinding};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// What to do with expressions that have to be evaluated in process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientEvaluation {
    /// Evaluate silently.
    Allow,
    /// Evaluate and report a diagnostic.
    #[default]
    Warn,
    /// Refuse: compilation fails with `Untranslatable`.
    Throw,
}

/// A parameter whose value is computed in process before execution.
#[derive(Debug, Clone)]
pub struct ClientParameter {
    pub name: Arc<str>,
    pub expr: ExprRef,
}

/// In-memory sequence operators applied after post filters.
#[derive(Debug, Clone)]
pub enum ClientStage {
    Skip(ExprRef),
    Take(ExprRef),
    Distinct,
}

/// How the shaped sequence is turned into the query result.
#[derive(Debug, Clone)]
pub enum Terminal {
    Sequence,
    First,
    FirstOrDefault,
    /// The command returns one row holding the result.
    Single,
    /// The result is whether the command returned a row.
    Exists,
    // reductions over the shaped sequence, used after post filters
    Count,
    Any,
    Sum(ExprRef),
    Min(ExprRef),
    Max(ExprRef),
    Average(ExprRef),
}

/// A collection include loaded by its own command.
#[derive(Debug, Clone)]
pub struct SplitQuery {
    /// Dotted navigation path from the root entity.
    pub path: String,
    pub select: Select,
    pub shaper: EntityShaper,
}

/// Output of the front end for one query.
#[derive(Debug, Clone)]
pub struct Translation {
    pub select: Select,
    pub shaper: Shaper,
    pub splits: Vec<SplitQuery>,
    pub client_parameters: Vec<ClientParameter>,
    /// Bound predicates over the root entity, checked after materialization.
    pub post_filters: Vec<ExprRef>,
    pub client_stages: Vec<ClientStage>,
    pub terminal: Terminal,
    pub diagnostics: Vec<Diagnostic>,
}

/// A source visible to translation.
#[derive(Debug, Clone)]
pub(crate) struct SourceInfo {
    pub alias: Arc<str>,
    pub entity: Arc<EntityType>,
    /// Rows may be missing (outer join).
    pub nullable: bool,
    /// Index of the frame whose select introduces the alias.
    pub frame: usize,
}

/// One SELECT under construction.
#[derive(Debug)]
pub(crate) struct Frame {
    pub select: Select,
    pub sources: HashMap<SourceId, SourceInfo>,
    /// Joins added for reference navigations, per (alias, navigation).
    pub nav_joins: HashMap<(Arc<str>, Arc<str>), SourceInfo>,
}

impl Frame {
    fn new(select: Select) -> Self {
        Self {
            select,
            sources: HashMap::new(),
            nav_joins: HashMap::new(),
        }
    }
}

pub struct QueryModelVisitor<'a> {
    model: &'a Model,
    registry: &'a TranslatorRegistry,
    evaluator: Evaluator<'a>,
    policy: ClientEvaluation,
    binder: Binder<'a>,
    ctx: TranslationContext,
    frames: Vec<Frame>,
    aliases: HashSet<Arc<str>>,
    next_source: u32,
    client_parameters: Vec<ClientParameter>,
    /// The projected root entity, when the projection is one.
    root: Option<SourceInfo>,
    /// Bound projection expression; aggregate selectors are applied to it.
    projected: Option<ExprRef>,
    /// Projection columns the shaper reads; later columns are helpers.
    visible: usize,
}

impl<'a> QueryModelVisitor<'a> {
    pub fn new(
        model: &'a Model,
        registry: &'a TranslatorRegistry,
        evaluator: Evaluator<'a>,
        policy: ClientEvaluation,
    ) -> Self {
        Self {
            model,
            registry,
            evaluator,
            policy,
            binder: Binder::new(model),
            ctx: TranslationContext::new(),
            frames: Vec::new(),
            aliases: HashSet::new(),
            next_source: 0,
            client_parameters: Vec::new(),
            root: None,
            projected: None,
            visible: 0,
        }
    }

    /// Translate a whole query model.
    pub fn visit(mut self, query: &QueryModel) -> RelqResult<Translation> {
        self.next_source = query.next_source_id().0;

        let main = self.model.entity(&query.main_from.entity)?.clone();
        let alias = self.fresh_alias(&main.table);
        let mut select = Select::new(table_source(&main, &alias));
        select.identity = key_columns(&main, &alias);
        self.frames.push(Frame::new(select));
        let main_ref = self.register_source(query.main_from.id, &main, &alias, false);
        let mut scope: Vec<ExprRef> = vec![main_ref.clone()];

        let mut grouped = false;
        let groups_later = query
            .body
            .iter()
            .any(|c| matches!(c, BodyClause::GroupBy(_)));
        let mut post_filters = Vec::new();

        for clause in &query.body {
            match clause {
                BodyClause::AdditionalFrom(source) => {
                    let entity = self.model.entity(&source.entity)?.clone();
                    let alias = self.fresh_alias(&entity.table);
                    self.frame_mut()?.select.joins.push(Join {
                        kind: JoinKind::Cross,
                        source: table_source(&entity, &alias),
                        condition: None,
                    });
                    scope.push(self.register_source(source.id, &entity, &alias, false));
                }
                BodyClause::Join {
                    source,
                    outer_key,
                    inner_key,
                } => {
                    let entity = self.model.entity(&source.entity)?.clone();
                    let alias = self.fresh_alias(&entity.table);
                    let outer = self.binder.bind_lambda(outer_key, &scope)?;
                    let inner_ref = self.register_source(source.id, &entity, &alias, false);
                    let inner = self.binder.bind_lambda(inner_key, &[inner_ref.clone()])?;
                    let condition = self.join_condition(&outer, &inner)?;
                    self.frame_mut()?.select.joins.push(Join {
                        kind: JoinKind::Inner,
                        source: table_source(&entity, &alias),
                        condition: Some(condition),
                    });
                    scope.push(inner_ref);
                }
                BodyClause::Where(predicate) => {
                    let bound = self.binder.bind_lambda(predicate, &scope)?;
                    if grouped {
                        let having = self.translate(&bound)?;
                        self.frame_mut()?.select.add_having(having);
                        continue;
                    }
                    for conjunct in conjuncts(&bound) {
                        match self.translate(&conjunct) {
                            Ok(sql) => self.frame_mut()?.select.add_predicate(sql),
                            Err(RelqError::Untranslatable { construct, reason }) => {
                                let eligible = scope.len() == 1
                                    && !groups_later
                                    && query.select.is_none()
                                    && self.evaluator.can_evaluate(&conjunct);
                                if !eligible {
                                    return Err(RelqError::Untranslatable { construct, reason });
                                }
                                self.client_evaluated(&conjunct, "filter")?;
                                post_filters.push(conjunct);
                            }
                            Err(other) => return Err(other),
                        }
                    }
                }
                BodyClause::OrderBy(keys) => {
                    let mut items = Vec::with_capacity(keys.len());
                    for key in keys {
                        let bound = self.binder.bind_lambda(&key.key, &scope)?;
                        items.push(OrderItem {
                            expr: self.translate(&bound)?,
                            descending: key.descending,
                        });
                    }
                    self.frame_mut()?.select.order_by = items;
                }
                BodyClause::GroupBy(key) => {
                    if scope.len() != 1 {
                        return Err(RelqError::untranslatable(
                            "group_by",
                            "grouping over more than one source is not supported",
                        ));
                    }
                    let bound = self.binder.bind_lambda(key, &scope)?;
                    let keys: Vec<ExprRef> = match &*bound {
                        Expr::Record { fields } => fields.iter().map(|(_, e)| e.clone()).collect(),
                        _ => vec![bound.clone()],
                    };
                    let mut group_by = Vec::with_capacity(keys.len());
                    for k in &keys {
                        group_by.push(self.translate(k)?);
                    }
                    let select = &mut self.frame_mut()?.select;
                    select.identity = group_by.clone();
                    select.group_by = group_by;
                    select.order_by.clear();
                    let group = GroupBinding {
                        key: bound,
                        element: main_ref.clone(),
                    };
                    scope = vec![group.placeholder()];
                    self.binder.set_group(group);
                    grouped = true;
                }
            }
        }

        // projection
        let projected = match &query.select {
            Some(selector) => self.binder.bind_lambda(selector, &scope)?,
            None if grouped => {
                return Err(RelqError::untranslatable(
                    "group_by",
                    "a grouped query needs a select projecting keys and aggregates",
                ));
            }
            None => main_ref.clone(),
        };
        let mut shaper = self.project(&projected, None)?;
        if let Shaper::Entity(_) = shaper {
            self.root = Some(self.entity_source(&projected)?);
        }
        self.projected = Some(projected);

        let reduces = query.result_operators.iter().any(|op| {
            matches!(
                op,
                ResultOperator::Count
                    | ResultOperator::Any
                    | ResultOperator::Sum(_)
                    | ResultOperator::Min(_)
                    | ResultOperator::Max(_)
                    | ResultOperator::Average(_)
            )
        });
        let includes: Vec<Vec<Arc<str>>> = query
            .result_operators
            .iter()
            .filter_map(|op| match op {
                ResultOperator::Include(path) => Some(path.clone()),
                _ => None,
            })
            .collect();
        let mut pending = Vec::new();
        if !includes.is_empty() && !reduces {
            pending = self.apply_includes(&mut shaper, &includes)?;
        }
        self.visible = self.frame()?.select.projection.len();

        // result operators
        let mut terminal = Terminal::Sequence;
        let mut client_stages = Vec::new();
        for op in &query.result_operators {
            if !post_filters.is_empty() {
                self.client_operator(op, &mut client_stages, &mut terminal)?;
                continue;
            }
            match op {
                ResultOperator::Include(_) => {}
                ResultOperator::Take(count) => {
                    let bound = self.binder.bind(count)?;
                    let count = self.translate(&bound)?;
                    if self.frame()?.select.limit.is_some() {
                        self.push_down(&[])?;
                    }
                    self.frame_mut()?.select.limit = Some(count);
                }
                ResultOperator::Skip(count) => {
                    let bound = self.binder.bind(count)?;
                    let count = self.translate(&bound)?;
                    if self.frame()?.select.is_paged() {
                        self.push_down(&[])?;
                    }
                    self.frame_mut()?.select.offset = Some(count);
                }
                ResultOperator::Distinct => {
                    if self.frame()?.select.is_paged() {
                        self.push_down(&[])?;
                    }
                    let select = &mut self.frame_mut()?.select;
                    select.distinct = true;
                    select.order_by.clear();
                    select.identity = select.projection.iter().map(|p| p.expr.clone()).collect();
                }
                ResultOperator::Count => {
                    let select = &self.frame()?.select;
                    if select.is_paged() || select.distinct || !select.group_by.is_empty() {
                        self.push_down(&[])?;
                    }
                    shaper = self.project_aggregate(
                        SqlExpr::function(func::COUNT, vec![]),
                        Some(ValueType::Int),
                    )?;
                    terminal = Terminal::Single;
                }
                ResultOperator::Any => {
                    let select = &self.frame()?.select;
                    if select.limit.is_some() || (select.distinct && select.offset.is_some()) {
                        self.push_down(&[])?;
                    }
                    let select = &mut self.frame_mut()?.select;
                    select.projection = vec![Projection {
                        expr: SqlExpr::literal(1),
                        alias: "value".into(),
                    }];
                    select.distinct = false;
                    if select.offset.is_none() {
                        select.order_by.clear();
                    }
                    select.limit = Some(SqlExpr::literal(1));
                    shaper = Shaper::Scalar {
                        index: 0,
                        ty: None,
                        converter: None,
                    };
                    terminal = Terminal::Exists;
                }
                ResultOperator::Sum(selector)
                | ResultOperator::Min(selector)
                | ResultOperator::Max(selector)
                | ResultOperator::Average(selector) => {
                    let (sql, ty) = self.aggregate(op, selector)?;
                    shaper = self.project_aggregate(sql, ty)?;
                    terminal = Terminal::Single;
                }
                ResultOperator::First | ResultOperator::FirstOrDefault => {
                    if self.frame()?.select.limit.is_some() {
                        self.push_down(&[])?;
                    }
                    self.frame_mut()?.select.limit = Some(SqlExpr::literal(1));
                    terminal = if matches!(op, ResultOperator::First) {
                        Terminal::First
                    } else {
                        Terminal::FirstOrDefault
                    };
                }
            }
        }

        // split commands re-run a paged parent select; both must pick the
        // same parent rows
        if !pending.is_empty() {
            let root = &mut self.frame_mut()?.select;
            if root.is_paged() && root.order_by.is_empty() {
                root.order_by = root
                    .identity
                    .iter()
                    .map(|expr| OrderItem {
                        expr: expr.clone(),
                        descending: false,
                    })
                    .collect();
            }
        }

        let select = self.frame()?.select.clone();
        let mut splits = Vec::new();
        for split in pending {
            splits.extend(self.build_split(&select, split)?);
        }

        verify(&select)?;
        for split in &splits {
            verify(&split.select)?;
        }

        Ok(Translation {
            select,
            shaper,
            splits,
            client_parameters: self.client_parameters,
            post_filters,
            client_stages,
            terminal,
            diagnostics: self.ctx.take_diagnostics(),
        })
    }

    fn frame(&self) -> RelqResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| RelqError::Internal("no select under construction".into()))
    }

    fn frame_mut(&mut self) -> RelqResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| RelqError::Internal("no select under construction".into()))
    }

    /// Allocate a table alias: the table's lowercased initial, suffixed with
    /// a counter when taken.
    pub(crate) fn fresh_alias(&mut self, table: &str) -> Arc<str> {
        let base: String = table
            .chars()
            .find(|c| c.is_ascii_alphabetic())
            .map(|c| c.to_ascii_lowercase().to_string())
            .unwrap_or_else(|| "t".to_string());
        let mut candidate: Arc<str> = base.as_str().into();
        let mut n = 0;
        while self.aliases.contains(&candidate) {
            candidate = format!("{}{}", base, n).into();
            n += 1;
        }
        self.aliases.insert(candidate.clone());
        candidate
    }

    pub(crate) fn fresh_source_id(&mut self) -> SourceId {
        let id = SourceId(self.next_source);
        self.next_source += 1;
        id
    }

    /// Make `id` resolvable in the innermost frame; returns its reference node.
    pub(crate) fn register_source(
        &mut self,
        id: SourceId,
        entity: &Arc<EntityType>,
        alias: &Arc<str>,
        nullable: bool,
    ) -> ExprRef {
        let frame = self.frames.len().saturating_sub(1);
        if let Some(top) = self.frames.last_mut() {
            top.sources.insert(
                id,
                SourceInfo {
                    alias: alias.clone(),
                    entity: entity.clone(),
                    nullable,
                    frame,
                },
            );
        }
        Arc::new(Expr::SourceRef {
            source: id,
            ty: ExprType::entity(entity.name.clone()),
        })
    }

    fn join_condition(&mut self, outer: &ExprRef, inner: &ExprRef) -> RelqResult<SqlExpr> {
        match (&**outer, &**inner) {
            (Expr::Record { fields: a }, Expr::Record { fields: b }) if a.len() == b.len() => {
                let mut parts = Vec::with_capacity(a.len());
                for ((_, l), (_, r)) in a.iter().zip(b) {
                    parts.push(SqlExpr::eq(self.translate(l)?, self.translate(r)?));
                }
                SqlExpr::and_all(parts)
                    .ok_or_else(|| RelqError::untranslatable("join", "empty composite key"))
            }
            _ => Ok(SqlExpr::eq(self.translate(outer)?, self.translate(inner)?)),
        }
    }

    /// Apply the client-evaluation policy to an in-process expression.
    pub(crate) fn client_evaluated(&mut self, expr: &ExprRef, role: &str) -> RelqResult<()> {
        match self.policy {
            ClientEvaluation::Throw => Err(RelqError::untranslatable(
                expr.to_string(),
                format!("{} would be evaluated in process and client evaluation is disabled", role),
            )),
            ClientEvaluation::Warn => {
                self.ctx.report(Diagnostic::new(
                    DiagnosticCode::ClientEvaluation,
                    format!("'{}' ({}) is evaluated in process", expr, role),
                ));
                Ok(())
            }
            ClientEvaluation::Allow => {
                tracing::debug!("Evaluating '{}' ({}) in process", expr, role);
                Ok(())
            }
        }
    }

    /// Add projection columns for `expr` and return the shaper reading them.
    fn project(&mut self, expr: &ExprRef, name: Option<&Arc<str>>) -> RelqResult<Shaper> {
        let ty = expr.ty();
        match &ty.kind {
            TypeKind::Entity(_) => {
                let info = self.entity_source(expr)?;
                Ok(Shaper::Entity(self.project_entity(&info)?))
            }
            TypeKind::Record => {
                let Expr::Record { fields } = &**expr else {
                    return Err(RelqError::untranslatable(expr.to_string(), "computed record"));
                };
                let mut shapers = Vec::with_capacity(fields.len());
                for (field, value) in fields {
                    shapers.push((field.clone(), self.project(value, Some(field))?));
                }
                Ok(Shaper::Composite { fields: shapers })
            }
            TypeKind::Collection(_) | TypeKind::Group(_) => Err(RelqError::untranslatable(
                expr.to_string(),
                "projecting a sequence is not supported",
            )),
            _ => {
                let mut sql = self.translate(expr)?;
                // a comparison over NULL is unknown; read it back as false
                if sql.is_predicate() && may_be_unknown(expr) {
                    sql = SqlExpr::Case {
                        whens: vec![(sql, SqlExpr::literal(true))],
                        otherwise: Some(Box::new(SqlExpr::literal(false))),
                    };
                }
                let (value_type, converter) = match self.property_of(expr) {
                    Some(property) => (Some(property.value_type), property.converter.clone()),
                    None => (ty.value_type(), None),
                };
                let alias: Arc<str> = match (name, &**expr) {
                    (Some(name), _) => name.clone(),
                    (None, Expr::Member { member, .. }) => member.clone(),
                    _ => "value".into(),
                };
                let index = self.frame_mut()?.select.add_projection(sql, &alias);
                Ok(Shaper::Scalar {
                    index,
                    ty: value_type,
                    converter,
                })
            }
        }
    }

    /// Project every property of an entity source, in property order.
    pub(crate) fn project_entity(&mut self, info: &SourceInfo) -> RelqResult<EntityShaper> {
        if info.frame + 1 != self.frames.len() {
            return Err(RelqError::Internal(
                "entity projected from an outer scope".into(),
            ));
        }
        let select = &mut self.frame_mut()?.select;
        let start = select.projection.len();
        for property in &info.entity.properties {
            select.add_projection(SqlExpr::column(&info.alias, &property.column), &property.name);
        }
        Ok(EntityShaper::new(info.entity.clone(), start, info.nullable))
    }

    fn property_of(&self, expr: &ExprRef) -> Option<&'a Property> {
        let Expr::Member { target, member, .. } = &**expr else {
            return None;
        };
        let entity = self.model.find_entity(target.ty().entity_name()?)?;
        entity.property(member)
    }

    /// Replace the projection with a single aggregate column.
    fn project_aggregate(&mut self, sql: SqlExpr, ty: Option<ValueType>) -> RelqResult<Shaper> {
        let select = &mut self.frame_mut()?.select;
        select.projection = vec![Projection {
            expr: sql,
            alias: "value".into(),
        }];
        select.order_by.clear();
        select.distinct = false;
        select.identity.clear();
        Ok(Shaper::Scalar {
            index: 0,
            ty,
            converter: None,
        })
    }

    /// Translate `Sum/Min/Max/Average(selector)` over the projected element.
    fn aggregate(
        &mut self,
        op: &ResultOperator,
        selector: &ExprRef,
    ) -> RelqResult<(SqlExpr, Option<ValueType>)> {
        let element = self
            .projected
            .clone()
            .ok_or_else(|| RelqError::Internal("aggregate before projection".into()))?;
        let bound = self.binder.bind_lambda(selector, &[element])?;
        let mut arg = self.translate(&bound)?;
        let ty = bound.ty().value_type();
        let numeric = ty.map(ValueType::is_numeric).unwrap_or(false);
        let ordered = matches!(op, ResultOperator::Min(_) | ResultOperator::Max(_));
        if !numeric && !(ordered && ty.is_some()) {
            return Err(RelqError::untranslatable(
                bound.to_string(),
                format!("{} needs a numeric selector", op.name()),
            ));
        }

        let select = &self.frame()?.select;
        if select.is_paged() || select.distinct || !select.group_by.is_empty() {
            let columns = self.push_down(&[arg])?;
            arg = columns
                .into_iter()
                .next()
                .ok_or_else(|| RelqError::Internal("aggregate column lost in pushdown".into()))?;
        }

        let ty = match op {
            ResultOperator::Average(_) => Some(ValueType::Float),
            _ => ty,
        };
        Ok((expression::aggregate(op.name(), arg), ty))
    }

    /// Wrap the current select in a derived table so further operators apply
    /// to its result. `extra` expressions are carried as hidden columns; the
    /// returned columns reference them from the outer select.
    fn push_down(&mut self, extra: &[SqlExpr]) -> RelqResult<Vec<SqlExpr>> {
        let alias = self.fresh_alias("t");
        let visible = self.visible;
        let frame = self.frame_mut()?;
        let placeholder = TableSource::Table {
            name: "".into(),
            schema: None,
            alias: alias.clone(),
        };
        let mut inner = std::mem::replace(&mut frame.select, Select::new(placeholder));
        let visible = visible.min(inner.projection.len());

        let mut order_by = Vec::new();
        if inner.is_paged() {
            let items = std::mem::take(&mut inner.order_by);
            for (i, item) in items.iter().enumerate() {
                let index = inner.add_projection(item.expr.clone(), &format!("__o{}", i));
                order_by.push(OrderItem {
                    expr: SqlExpr::column(&alias, &inner.projection[index].alias),
                    descending: item.descending,
                });
            }
            inner.order_by = items;
        } else {
            inner.order_by.clear();
        }

        let mut carried = Vec::with_capacity(extra.len());
        for (i, e) in extra.iter().enumerate() {
            let index = inner.add_projection(e.clone(), &format!("__a{}", i));
            carried.push(SqlExpr::column(&alias, &inner.projection[index].alias));
        }

        let projection: Vec<Projection> = inner.projection[..visible]
            .iter()
            .map(|p| Projection {
                expr: SqlExpr::column(&alias, &p.alias),
                alias: p.alias.clone(),
            })
            .collect();
        // identity reaches the outer select through hidden key columns;
        // DISTINCT and GROUP BY rows are keyed by their projection
        let mut identity = Vec::with_capacity(inner.identity.len());
        if inner.distinct || !inner.group_by.is_empty() {
            identity.extend(projection.iter().map(|p| p.expr.clone()));
        } else {
            for (i, e) in inner.identity.clone().iter().enumerate() {
                let index = match inner.projection[..visible].iter().position(|p| &p.expr == e) {
                    Some(index) => index,
                    None => inner.add_projection(e.clone(), &format!("__k{}", i)),
                };
                identity.push(SqlExpr::column(&alias, &inner.projection[index].alias));
            }
        }

        let mut outer = Select::new(TableSource::Subquery {
            select: Box::new(inner),
            alias,
        });
        outer.projection = projection;
        outer.order_by = order_by;
        outer.identity = identity;
        frame.select = outer;
        frame.sources.clear();
        frame.nav_joins.clear();
        Ok(carried)
    }

    /// Result operators after a post filter run in memory.
    fn client_operator(
        &mut self,
        op: &ResultOperator,
        stages: &mut Vec<ClientStage>,
        terminal: &mut Terminal,
    ) -> RelqResult<()> {
        let element = self
            .projected
            .clone()
            .ok_or_else(|| RelqError::Internal("client operator before projection".into()))?;
        match op {
            ResultOperator::Include(_) => {}
            ResultOperator::Take(count) => stages.push(ClientStage::Take(self.binder.bind(count)?)),
            ResultOperator::Skip(count) => stages.push(ClientStage::Skip(self.binder.bind(count)?)),
            ResultOperator::Distinct => stages.push(ClientStage::Distinct),
            ResultOperator::Count => *terminal = Terminal::Count,
            ResultOperator::Any => *terminal = Terminal::Any,
            ResultOperator::First => *terminal = Terminal::First,
            ResultOperator::FirstOrDefault => *terminal = Terminal::FirstOrDefault,
            ResultOperator::Sum(s)
            | ResultOperator::Min(s)
            | ResultOperator::Max(s)
            | ResultOperator::Average(s) => {
                let bound = self.binder.bind_lambda(s, &[element])?;
                if !self.evaluator.can_evaluate(&bound) {
                    return Err(RelqError::untranslatable(
                        bound.to_string(),
                        "selector cannot be evaluated in process",
                    ));
                }
                *terminal = match op {
                    ResultOperator::Sum(_) => Terminal::Sum(bound),
                    ResultOperator::Min(_) => Terminal::Min(bound),
                    ResultOperator::Max(_) => Terminal::Max(bound),
                    _ => Terminal::Average(bound),
                };
            }
        }
        Ok(())
    }
}

pub(crate) fn table_source(entity: &EntityType, alias: &Arc<str>) -> TableSource {
    TableSource::Table {
        name: entity.table.clone(),
        schema: entity.schema.clone(),
        alias: alias.clone(),
    }
}

pub(crate) fn key_columns(entity: &EntityType, alias: &Arc<str>) -> Vec<SqlExpr> {
    entity
        .key_properties()
        .map(|p| SqlExpr::column(alias, &p.column))
        .collect()
}

/// Top-level conjuncts of a predicate.
fn conjuncts(expr: &ExprRef) -> Vec<ExprRef> {
    match &**expr {
        Expr::Binary {
            op: BinaryOp::And,
            left,
            right,
            ..
        } => {
            let mut all = conjuncts(left);
            all.extend(conjuncts(right));
            all
        }
        _ => vec![expr.clone()],
    }
}

/// True when a boolean expression can evaluate to SQL's unknown.
fn may_be_unknown(expr: &ExprRef) -> bool {
    match &**expr {
        Expr::Binary {
            op, left, right, ..
        } if op.is_comparison() => left.ty().nullable || right.ty().nullable,
        Expr::Binary {
            op, left, right, ..
        } if op.is_logical() => may_be_unknown(left) || may_be_unknown(right),
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
            ..
        } => may_be_unknown(operand),
        _ => false,
    }
}
